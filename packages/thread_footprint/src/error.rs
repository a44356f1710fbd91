use std::io;

use thiserror::Error;

use crate::ExecutionUnitKind;

/// Errors that abort a measurement or a batch run.
///
/// Task-level failures inside a batch are never reported through this type. They are recovered
/// at the task boundary and only show up as the failure count of a [`BatchResult`][1].
///
/// [1]: crate::BatchResult
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HarnessError {
    /// The operating system or scheduler refused to create a new execution unit.
    ///
    /// Retrying does not help because resource availability does not change by itself.
    #[error("{kind} creation failed for unit '{name}'")]
    UnitCreation {
        /// Name that was requested for the unit.
        name: String,

        /// Kind of unit that could not be created.
        kind: ExecutionUnitKind,

        /// The underlying cause reported by the operating system.
        #[source]
        source: io::Error,
    },

    /// The scheduler that hosts lightweight units could not be started.
    #[error("lightweight scheduler could not be started")]
    SchedulerStartup(#[source] io::Error),

    /// The controller was interrupted while waiting at a suspension point.
    #[error("interrupted while {stage}")]
    Interrupted {
        /// The suspension point the controller was waiting at.
        stage: &'static str,
    },

    /// A measured execution unit panicked instead of completing its work.
    #[error("execution unit '{name}' panicked")]
    UnitPanicked {
        /// Name of the unit that panicked.
        name: String,
    },

    /// Used-memory could not be read from the platform.
    #[error("memory readout unavailable: {reason}")]
    MemoryReadout {
        /// A human-readable description of what went wrong.
        reason: String,
    },
}

/// A specialized `Result` type for harness operations, returning the crate's
/// [`HarnessError`] type as the error value.
pub type Result<T> = std::result::Result<T, HarnessError>;
