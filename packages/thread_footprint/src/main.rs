#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]

//! Binary entry point: compares the memory used by a single platform thread against a single
//! virtual thread and optionally times batches of tasks through each execution strategy.
//!
//! This module is excluded from mutation testing because testing process entry/exit behavior
//! is impractical - it requires spawning subprocesses and checking exit codes.

use std::num::NonZero;
use std::process::ExitCode;

use argh::FromArgs;
use thread_footprint::{
    BatchStrategy, BatchThroughputHarness, ComparisonReporter, ExecutionUnitFactory,
    HarnessConfig, Interrupt, MemoryMetric, ProbePair, Result, SingleUnitMemoryProbe,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const DEFAULT_LOG_FILTER: &str = "warn";

/// Measures the memory cost of a single platform thread versus a single virtual thread.
#[derive(FromArgs)]
struct Args {
    /// also time batches of tasks through every execution strategy
    #[argh(switch)]
    throughput: bool,

    /// number of tasks in each throughput batch (default 1000)
    #[argh(option)]
    batch_tasks: Option<NonZero<usize>>,

    /// maximum number of workers in the bounded pool (default 1000)
    #[argh(option)]
    pool_capacity: Option<NonZero<usize>>,

    /// stack reserved for each platform thread, in KiB (default 1024)
    #[argh(option)]
    stack_kib: Option<NonZero<usize>>,

    /// used-memory figure to read (address-space, resident)
    #[argh(option)]
    metric: Option<MemoryMetric>,
}

impl Args {
    fn to_config(&self) -> HarnessConfig {
        let mut config = HarnessConfig::default();

        if let Some(batch_tasks) = self.batch_tasks {
            config = config.batch_task_count(batch_tasks);
        }

        if let Some(pool_capacity) = self.pool_capacity {
            config = config.bounded_pool_capacity(pool_capacity);
        }

        if let Some(stack_kib) = self.stack_kib {
            config = config.heavyweight_stack_size(stack_kib.get().saturating_mul(1024));
        }

        if let Some(metric) = self.metric {
            config = config.memory_metric(metric);
        }

        config
    }
}

// Binary entry point - mutations would require subprocess testing which is impractical.
#[cfg_attr(test, mutants::skip)]
fn main() -> ExitCode {
    let args: Args = argh::from_env();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "measurement aborted");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg_attr(test, mutants::skip)]
fn run(args: &Args) -> Result<()> {
    let config = args.to_config();
    let interrupt = Interrupt::new();
    let factory = ExecutionUnitFactory::new(&config, interrupt.clone())?;

    // Ctrl+C makes every pending wait end early. Whatever was started is still joined.
    factory.scheduler().spawn({
        let interrupt = interrupt.clone();

        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt requested");
                interrupt.raise();
            }
        }
    });

    println!("=== Total Memory Used: Single Platform Thread vs Single Virtual Thread ===");
    println!();

    let probe = SingleUnitMemoryProbe::new(&factory, &config);
    let ProbePair {
        heavyweight,
        lightweight,
    } = probe.compare()?;

    println!("--- Total Memory Used by Single Thread ({}) ---", probe.metric());
    println!();
    println!("Single Platform Thread:");
    println!("{heavyweight}");
    println!();
    println!("Single Virtual Thread:");
    println!("{lightweight}");
    println!();

    println!("=== Total Memory Comparison Results ===");
    println!(
        "{}",
        ComparisonReporter::compare(heavyweight.delta(), lightweight.delta())
    );

    if args.throughput {
        let harness = BatchThroughputHarness::new(&factory, &config);

        println!();
        println!(
            "=== Batch Throughput: {} tasks per strategy ===",
            harness.task_count()
        );

        for strategy in BatchStrategy::ALL {
            let result = harness.run_configured(strategy)?;
            println!("{result}");
        }
    }

    Ok(())
}
