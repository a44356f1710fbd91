#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Measures what a single unit of concurrency costs: an operating system thread with its own
//! fixed stack (a "platform thread") against a task multiplexed onto a few scheduler threads (a
//! "virtual thread").
//!
//! Two measurements are provided:
//!
//! - [`SingleUnitMemoryProbe`] attributes process-wide used-memory to exactly one running unit of
//!   each kind and [`ComparisonReporter`] turns the two readings into a ratio.
//! - [`BatchThroughputHarness`] times how long a batch of identical tasks takes to drain through a
//!   bounded pool of threads, an unbounded pool of threads or one task per unit of work.
//!
//! Both run the same [`WorkUnit`] in every unit, so any difference is caused by the execution
//! mechanism and not by the payload.
//!
//! This package is not meant for use in production, serving only as a development tool for
//! understanding the cost of threads.
//!
//! # Operating principles
//!
//! ## Temporal isolation
//!
//! Used-memory is a single process-wide figure. No lock protects it; measurements are only valid
//! because nothing else runs while they are taken. The probe creates and joins its units
//! synchronously and strictly one after the other, and a batch is fully drained before the next
//! one starts. Callers must not run two measurements concurrently.
//!
//! ## Settling
//!
//! Every [`MemorySnapshot`] is taken after asking the allocator to return freed memory to the
//! operating system and pausing for a settle delay. This makes two snapshots comparable.
//!
//! ## Interruption
//!
//! All waits of the controller and of the units observe one shared [`Interrupt`]. Raising it makes
//! every wait end early; the controller still joins or drains whatever it started and then reports
//! [`HarnessError::Interrupted`] instead of a result.
//!
//! # Example
//!
//! ```no_run
//! use thread_footprint::{
//!     ComparisonReporter, ExecutionUnitFactory, HarnessConfig, Interrupt, SingleUnitMemoryProbe,
//! };
//!
//! # fn main() -> thread_footprint::Result<()> {
//! let config = HarnessConfig::default();
//! let factory = ExecutionUnitFactory::new(&config, Interrupt::new())?;
//! let probe = SingleUnitMemoryProbe::new(&factory, &config);
//!
//! let pair = probe.compare()?;
//! let comparison =
//!     ComparisonReporter::compare(pair.heavyweight.delta(), pair.lightweight.delta());
//!
//! println!("{comparison}");
//! # Ok(())
//! # }
//! ```

mod batch;
mod config;
mod error;
mod interrupt;
mod pal;
mod probe;
mod report;
mod snapshot;
mod unit;
mod work;

pub use batch::*;
pub use config::*;
pub use error::*;
pub use interrupt::*;
pub use probe::*;
pub use report::*;
pub use snapshot::*;
pub use unit::*;
pub use work::*;
