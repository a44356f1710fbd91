use std::time::Duration;

use scopeguard::ScopeGuard;
use tracing::{info, warn};

use crate::{
    ExecutionUnitFactory, ExecutionUnitKind, HarnessConfig, HarnessError, Interrupted,
    MemoryDelta, MemoryMetric, MemorySnapshot, MemorySnapshotter, Payload, Result, WorkOutcome,
    WorkUnit,
};

/// Result of measuring one execution unit.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ProbeReading {
    kind: ExecutionUnitKind,
    before: MemorySnapshot,
    after: MemorySnapshot,
    delta: MemoryDelta,
}

impl ProbeReading {
    pub(crate) fn new(
        kind: ExecutionUnitKind,
        before: MemorySnapshot,
        after: MemorySnapshot,
    ) -> Self {
        Self {
            kind,
            before,
            after,
            delta: MemoryDelta::between(&before, &after),
        }
    }

    /// The kind of unit that was measured.
    #[must_use]
    pub fn kind(&self) -> ExecutionUnitKind {
        self.kind
    }

    /// Baseline taken before the unit was created.
    #[must_use]
    pub fn before(&self) -> &MemorySnapshot {
        &self.before
    }

    /// Snapshot taken while the unit was alive.
    #[must_use]
    pub fn after(&self) -> &MemorySnapshot {
        &self.after
    }

    /// Memory attributed to the unit.
    #[must_use]
    pub fn delta(&self) -> MemoryDelta {
        self.delta
    }
}

/// Heavyweight and lightweight readings taken one after the other.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[expect(
    clippy::exhaustive_structs,
    reason = "plain pair of readings, there is nothing else it could hold"
)]
pub struct ProbePair {
    /// Reading for a single heavyweight unit.
    pub heavyweight: ProbeReading,

    /// Reading for a single lightweight unit.
    pub lightweight: ProbeReading,
}

/// Attributes used-memory to exactly one execution unit.
///
/// The steps of a measurement always happen in this order:
///
/// 1. Baseline snapshot.
/// 2. Create one unit, which starts its work immediately.
/// 3. Wait for the stabilization delay so the unit holds its steady-state footprint.
/// 4. Second snapshot.
/// 5. Join the unit.
/// 6. Return the difference between the two snapshots.
///
/// The unit is joined on every exit path, including failed snapshots and interruptions, so the
/// next measurement never starts with a stray unit still alive.
///
/// Measurements observe the whole process. Only one may be in progress at any time, which the
/// `&self` receivers do not enforce: callers must not share a probe (or two probes) across
/// threads that measure concurrently.
#[derive(Debug)]
pub struct SingleUnitMemoryProbe<'a, P = WorkUnit> {
    factory: &'a ExecutionUnitFactory<P>,
    snapshotter: MemorySnapshotter,
    stabilization_delay: Duration,
    inter_probe_pause: Duration,
}

impl<'a, P: Payload> SingleUnitMemoryProbe<'a, P> {
    /// Creates a probe that creates its units through `factory`.
    ///
    /// The probe observes the factory's interrupt at all of its own suspension points.
    #[must_use]
    pub fn new(factory: &'a ExecutionUnitFactory<P>, config: &HarnessConfig) -> Self {
        let snapshotter = MemorySnapshotter::new(config, factory.interrupt().clone());
        Self::with_snapshotter(factory, snapshotter, config)
    }

    pub(crate) fn with_snapshotter(
        factory: &'a ExecutionUnitFactory<P>,
        snapshotter: MemorySnapshotter,
        config: &HarnessConfig,
    ) -> Self {
        Self {
            factory,
            snapshotter,
            stabilization_delay: config.stabilization_delay,
            inter_probe_pause: config.inter_probe_pause,
        }
    }

    /// The used-memory figure the probe's snapshots read.
    #[must_use]
    pub fn metric(&self) -> MemoryMetric {
        self.snapshotter.metric()
    }

    /// Measures the memory used by a single unit of `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::UnitCreation`] if the unit cannot be created,
    /// [`HarnessError::Interrupted`] if the interrupt is raised at any suspension point (after the
    /// unit has been joined) and any error of [`MemorySnapshotter::snapshot()`].
    pub fn measure(&self, kind: ExecutionUnitKind) -> Result<ProbeReading> {
        info!(%kind, "measuring total memory used by a single unit");

        let before = self.snapshotter.snapshot()?;

        let unit = self.factory.create(unit_name(kind), kind)?;

        let unit = scopeguard::guard(unit, |unit| {
            // We are bailing out early. The outcome no longer matters, only the release does.
            drop(unit.join());
        });

        self.factory
            .interrupt()
            .sleep_blocking(self.stabilization_delay)
            .map_err(|Interrupted| HarnessError::Interrupted {
                stage: "waiting for the measured unit to stabilize",
            })?;

        let after = self.snapshotter.snapshot()?;

        let outcome = ScopeGuard::into_inner(unit).join()?;

        if outcome == WorkOutcome::Interrupted || self.factory.interrupt().is_raised() {
            return Err(HarnessError::Interrupted {
                stage: "joining the measured unit",
            });
        }

        let reading = ProbeReading::new(kind, before, after);

        if reading.delta.is_negative() {
            warn!(
                %kind,
                bytes = reading.delta.bytes(),
                "negative memory delta, the allocator released memory during the measurement"
            );
        }

        info!(%kind, bytes = reading.delta.bytes(), "single unit measured");

        Ok(reading)
    }

    /// Measures a heavyweight unit, then a lightweight unit.
    ///
    /// The heavyweight measurement, including the join of its unit, completes before the
    /// lightweight measurement starts. Between the two the allocator is asked to release memory
    /// and the controller pauses so that reclamation does not contaminate the second baseline.
    ///
    /// # Errors
    ///
    /// Returns any error of [`measure()`][Self::measure]. Nothing of the second measurement
    /// happens if the first one fails.
    pub fn compare(&self) -> Result<ProbePair> {
        let heavyweight = self.measure(ExecutionUnitKind::Heavyweight)?;

        self.snapshotter.reclaim();

        self.factory
            .interrupt()
            .sleep_blocking(self.inter_probe_pause)
            .map_err(|Interrupted| HarnessError::Interrupted {
                stage: "pausing between measurements",
            })?;

        let lightweight = self.measure(ExecutionUnitKind::Lightweight)?;

        Ok(ProbePair {
            heavyweight,
            lightweight,
        })
    }
}

fn unit_name(kind: ExecutionUnitKind) -> &'static str {
    match kind {
        ExecutionUnitKind::Heavyweight => "platform-thread-test",
        ExecutionUnitKind::Lightweight => "virtual-thread-test",
    }
}
