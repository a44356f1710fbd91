use std::str::FromStr;
use std::time::{Duration, Instant};

use derive_more::Display;
use tracing::debug;

use crate::pal::{Platform, PlatformFacade};
use crate::{HarnessConfig, HarnessError, Interrupt, Interrupted, Result};

/// Which process-wide memory figure a snapshot reads.
#[derive(Clone, Copy, Debug, Default, Display, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum MemoryMetric {
    /// Committed virtual address space (`VmSize`).
    ///
    /// Includes the full stack reserved for every thread, whether or not it has been touched.
    #[default]
    #[display("address space")]
    AddressSpace,

    /// Resident set (`VmRSS`). Only counts pages that have actually been touched.
    #[display("resident set")]
    Resident,
}

impl MemoryMetric {
    const fn status_key(self) -> &'static str {
        match self {
            Self::AddressSpace => "VmSize:",
            Self::Resident => "VmRSS:",
        }
    }
}

impl FromStr for MemoryMetric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "address-space" | "vmsize" => Ok(Self::AddressSpace),
            "resident" | "rss" => Ok(Self::Resident),
            _ => Err(format!(
                "Invalid memory metric: '{s}'. Valid options are: address-space, resident"
            )),
        }
    }
}

/// Used-memory of the whole process at one point in time.
///
/// Every snapshot is taken right after a reclaim pass and a fixed settle delay, which is what
/// makes two snapshots comparable with each other.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct MemorySnapshot {
    used_bytes: u64,
    taken_at: Instant,
}

impl MemorySnapshot {
    pub(crate) fn new(used_bytes: u64, taken_at: Instant) -> Self {
        Self {
            used_bytes,
            taken_at,
        }
    }

    /// Used-memory of the process, in bytes.
    #[must_use]
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    /// When the memory figure was read.
    #[must_use]
    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }
}

/// Difference between two snapshots: `after - before`.
///
/// This may be negative because the allocator may hand memory back to the operating system
/// between the two readings. Small negative values are noise, not a result, but they are still
/// values that must be reported.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct MemoryDelta {
    bytes: i64,
}

impl MemoryDelta {
    /// Creates a delta of the given number of bytes.
    #[must_use]
    pub const fn from_bytes(bytes: i64) -> Self {
        Self { bytes }
    }

    /// The delta between two snapshots, saturating at the bounds of `i64`.
    #[must_use]
    pub fn between(before: &MemorySnapshot, after: &MemorySnapshot) -> Self {
        let difference = i128::from(after.used_bytes)
            .checked_sub(i128::from(before.used_bytes))
            .expect("difference of two u64 values always fits in i128");

        let bytes = i64::try_from(difference).unwrap_or(if difference.is_negative() {
            i64::MIN
        } else {
            i64::MAX
        });

        Self { bytes }
    }

    /// The delta in bytes.
    #[must_use]
    pub const fn bytes(&self) -> i64 {
        self.bytes
    }

    /// The delta in whole KiB, truncated towards zero.
    #[must_use]
    pub const fn kib(&self) -> i64 {
        self.bytes / 1024
    }

    /// Whether the second reading was lower than the first.
    #[must_use]
    pub const fn is_negative(&self) -> bool {
        self.bytes < 0
    }
}

/// Produces comparable [`MemorySnapshot`]s of the whole process.
///
/// Each snapshot first asks the allocator to return unused memory to the operating system, then
/// waits for the settle delay so deferred reclamation cannot leak into the reading, and only then
/// reads used-memory.
///
/// Creating a snapshotter limits the allocator to its existing heap arenas, so that memory
/// attributed to a new thread is its stack and bookkeeping rather than a per-thread arena.
///
/// Snapshots observe the entire process. Two measurements must never be in progress at the same
/// time or each will see the other's allocations.
#[derive(Debug)]
pub struct MemorySnapshotter {
    platform: PlatformFacade,
    metric: MemoryMetric,
    settle_delay: Duration,
    interrupt: Interrupt,
}

impl MemorySnapshotter {
    /// Creates a snapshotter for the real platform.
    ///
    /// Raising `interrupt` cuts the settle delay short.
    #[must_use]
    pub fn new(config: &HarnessConfig, interrupt: Interrupt) -> Self {
        Self::with_platform(PlatformFacade::target(), config, interrupt)
    }

    pub(crate) fn with_platform(
        platform: PlatformFacade,
        config: &HarnessConfig,
        interrupt: Interrupt,
    ) -> Self {
        // Threads created after this point must not bring a fresh allocator arena with them,
        // or the arena would be counted as part of the thread.
        platform.limit_allocator_arenas();

        Self {
            platform,
            metric: config.memory_metric,
            settle_delay: config.settle_delay,
            interrupt,
        }
    }

    /// The memory figure this snapshotter reads.
    #[must_use]
    pub fn metric(&self) -> MemoryMetric {
        self.metric
    }

    /// Asks the allocator to release unused memory, without settling or reading anything.
    pub(crate) fn reclaim(&self) {
        self.platform.release_free_memory();
    }

    /// Reclaims, settles and reads used-memory.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Interrupted`] if the interrupt is raised during the settle delay and
    /// [`HarnessError::MemoryReadout`] if the platform does not expose the configured figure.
    pub fn snapshot(&self) -> Result<MemorySnapshot> {
        self.reclaim();

        self.interrupt
            .sleep_blocking(self.settle_delay)
            .map_err(|Interrupted| HarnessError::Interrupted {
                stage: "waiting for memory to settle",
            })?;

        let status = self
            .platform
            .get_proc_self_status_contents()
            .ok_or_else(|| HarnessError::MemoryReadout {
                reason: "this platform does not expose /proc/self/status".to_string(),
            })?;

        let used_bytes = parse_status_bytes(&status, self.metric)?;

        debug!(used_bytes, metric = %self.metric, "memory snapshot taken");

        Ok(MemorySnapshot::new(used_bytes, Instant::now()))
    }
}

/// Extracts one "Key:   1234 kB" entry from /proc/self/status, converted to bytes.
fn parse_status_bytes(status: &str, metric: MemoryMetric) -> Result<u64> {
    let key = metric.status_key();

    let value = status
        .lines()
        .find_map(|line| line.strip_prefix(key))
        .ok_or_else(|| HarnessError::MemoryReadout {
            reason: format!("/proc/self/status has no {key} entry"),
        })?;

    let kib = value
        .trim()
        .trim_end_matches("kB")
        .trim_end()
        .parse::<u64>()
        .map_err(|e| HarnessError::MemoryReadout {
            reason: format!("/proc/self/status has a malformed {key} entry '{value}': {e}"),
        })?;

    kib.checked_mul(1024)
        .ok_or_else(|| HarnessError::MemoryReadout {
            reason: format!("{key} of {kib} kB does not fit in a byte count"),
        })
}

#[cfg(test)]
mod tests {
    use mockall::Sequence;

    use super::*;
    use crate::pal::MockPlatform;

    fn status_with(vm_size_kib: u64, vm_rss_kib: u64) -> String {
        format!(
            "Name:\tthread_footprint\nVmPeak:\t  999999 kB\nVmSize:\t  {vm_size_kib} kB\nVmLck:\t       0 kB\nVmRSS:\t  {vm_rss_kib} kB\nThreads:\t3\n"
        )
    }

    fn fast_config() -> HarnessConfig {
        HarnessConfig::default().settle_delay(Duration::ZERO)
    }

    #[test]
    fn snapshot_reads_address_space_in_bytes() {
        let mut platform = MockPlatform::new();
        platform.expect_limit_allocator_arenas().return_const(());
        platform.expect_release_free_memory().times(1).return_const(());
        platform
            .expect_get_proc_self_status_contents()
            .times(1)
            .return_const(Some(status_with(2048, 100)));

        let snapshotter = MemorySnapshotter::with_platform(
            PlatformFacade::from_mock(platform),
            &fast_config(),
            Interrupt::new(),
        );

        let snapshot = snapshotter.snapshot().unwrap();

        assert_eq!(snapshot.used_bytes(), 2048 * 1024);
    }

    #[test]
    fn allocator_arenas_are_limited_once_before_any_reading() {
        let mut seq = Sequence::new();
        let mut platform = MockPlatform::new();

        platform
            .expect_limit_allocator_arenas()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        platform
            .expect_release_free_memory()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        platform
            .expect_get_proc_self_status_contents()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(Some(status_with(10, 10)));

        let snapshotter = MemorySnapshotter::with_platform(
            PlatformFacade::from_mock(platform),
            &fast_config(),
            Interrupt::new(),
        );

        snapshotter.snapshot().unwrap();
    }

    #[test]
    fn snapshot_reads_resident_set_when_configured() {
        let mut platform = MockPlatform::new();
        platform.expect_limit_allocator_arenas().return_const(());
        platform.expect_release_free_memory().return_const(());
        platform
            .expect_get_proc_self_status_contents()
            .return_const(Some(status_with(2048, 100)));

        let snapshotter = MemorySnapshotter::with_platform(
            PlatformFacade::from_mock(platform),
            &fast_config().memory_metric(MemoryMetric::Resident),
            Interrupt::new(),
        );

        assert_eq!(snapshotter.metric(), MemoryMetric::Resident);
        assert_eq!(snapshotter.snapshot().unwrap().used_bytes(), 100 * 1024);
    }

    #[test]
    fn reclaim_happens_before_the_reading() {
        let mut seq = Sequence::new();
        let mut platform = MockPlatform::new();
        platform.expect_limit_allocator_arenas().return_const(());

        platform
            .expect_release_free_memory()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        platform
            .expect_get_proc_self_status_contents()
            .times(1)
            .in_sequence(&mut seq)
            .return_const(Some(status_with(10, 10)));

        let snapshotter = MemorySnapshotter::with_platform(
            PlatformFacade::from_mock(platform),
            &fast_config(),
            Interrupt::new(),
        );

        snapshotter.snapshot().unwrap();
    }

    #[test]
    fn settle_delay_is_honored() {
        let mut platform = MockPlatform::new();
        platform.expect_limit_allocator_arenas().return_const(());
        platform.expect_release_free_memory().return_const(());
        platform
            .expect_get_proc_self_status_contents()
            .return_const(Some(status_with(10, 10)));

        let snapshotter = MemorySnapshotter::with_platform(
            PlatformFacade::from_mock(platform),
            &HarnessConfig::default().settle_delay(Duration::from_millis(30)),
            Interrupt::new(),
        );

        let started = Instant::now();
        snapshotter.snapshot().unwrap();

        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn interrupted_settle_delay_skips_the_reading() {
        let mut platform = MockPlatform::new();
        platform.expect_limit_allocator_arenas().return_const(());
        platform.expect_release_free_memory().return_const(());
        platform.expect_get_proc_self_status_contents().never();

        let interrupt = Interrupt::new();
        interrupt.raise();

        let snapshotter = MemorySnapshotter::with_platform(
            PlatformFacade::from_mock(platform),
            &HarnessConfig::default(),
            interrupt,
        );

        let error = snapshotter.snapshot().unwrap_err();
        assert!(matches!(error, HarnessError::Interrupted { .. }));
    }

    #[test]
    fn missing_proc_filesystem_is_a_readout_error() {
        let mut platform = MockPlatform::new();
        platform.expect_limit_allocator_arenas().return_const(());
        platform.expect_release_free_memory().return_const(());
        platform
            .expect_get_proc_self_status_contents()
            .return_const(None);

        let snapshotter = MemorySnapshotter::with_platform(
            PlatformFacade::from_mock(platform),
            &fast_config(),
            Interrupt::new(),
        );

        let error = snapshotter.snapshot().unwrap_err();
        assert!(matches!(error, HarnessError::MemoryReadout { .. }));
    }

    #[test]
    fn malformed_entries_are_readout_errors() {
        assert!(matches!(
            parse_status_bytes("Name:\tx\n", MemoryMetric::AddressSpace),
            Err(HarnessError::MemoryReadout { .. })
        ));
        assert!(matches!(
            parse_status_bytes("VmSize:\t lots kB\n", MemoryMetric::AddressSpace),
            Err(HarnessError::MemoryReadout { .. })
        ));
        assert!(matches!(
            parse_status_bytes(&format!("VmRSS:\t{} kB\n", u64::MAX), MemoryMetric::Resident),
            Err(HarnessError::MemoryReadout { .. })
        ));
    }

    #[test]
    fn delta_is_signed() {
        let now = Instant::now();
        let low = MemorySnapshot::new(1000, now);
        let high = MemorySnapshot::new(5096, now);

        assert_eq!(MemoryDelta::between(&low, &high).bytes(), 4096);
        assert_eq!(MemoryDelta::between(&high, &low).bytes(), -4096);
        assert!(MemoryDelta::between(&high, &low).is_negative());
        assert_eq!(MemoryDelta::between(&high, &low).kib(), -4);
    }

    #[test]
    fn delta_saturates_at_i64_bounds() {
        let now = Instant::now();
        let empty = MemorySnapshot::new(0, now);
        let full = MemorySnapshot::new(u64::MAX, now);

        assert_eq!(MemoryDelta::between(&empty, &full).bytes(), i64::MAX);
        assert_eq!(MemoryDelta::between(&full, &empty).bytes(), i64::MIN);
    }

    #[test]
    fn metric_parses_from_command_line_names() {
        assert_eq!(
            "address-space".parse::<MemoryMetric>(),
            Ok(MemoryMetric::AddressSpace)
        );
        assert_eq!("RSS".parse::<MemoryMetric>(), Ok(MemoryMetric::Resident));
        assert!("heap".parse::<MemoryMetric>().is_err());
    }
}
