//! Top-level error taxonomy for the conductor core.
//!
//! Each subsystem defines its own `thiserror` enum; this module composes them
//! into a single `ConductorError` so the RPC and periodic-task layers can
//! match on a stable `kind()` without caring which subsystem raised it.

use thiserror::Error;

use crate::executor::ExecutorError;
use crate::fsm::FsmError;
use crate::periodics::PeriodicsError;
use crate::reservation::ReservationError;
use crate::ring::RingError;

/// Abstract error kind, independent of which subsystem produced the error.
/// The RPC layer preserves this across whatever transport boundary it uses,
/// so the (out of scope) API layer can map it to a user-visible status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ClientInput,
    NotFound,
    Conflict,
    TemporaryFailure,
    DriverError,
    DatabaseVersionTooOld,
    NoFreeConductorWorker,
}

#[derive(Error, Debug)]
pub enum ConductorError {
    #[error(transparent)]
    Ring(#[from] RingError),

    #[error(transparent)]
    Reservation(#[from] ReservationError),

    #[error(transparent)]
    Fsm(#[from] FsmError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Periodics(#[from] PeriodicsError),

    #[error("node {0} not found")]
    NodeNotFound(uuid::Uuid),

    #[error("{0}")]
    ClientInput(String),
}

impl ConductorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConductorError::Ring(e) => e.kind(),
            ConductorError::Reservation(e) => e.kind(),
            ConductorError::Fsm(_) => ErrorKind::ClientInput,
            ConductorError::Executor(e) => e.kind(),
            ConductorError::Periodics(_) => ErrorKind::NoFreeConductorWorker,
            ConductorError::NodeNotFound(_) => ErrorKind::NotFound,
            ConductorError::ClientInput(_) => ErrorKind::ClientInput,
        }
    }

    /// Whether the caller may simply retry the same operation.
    pub fn retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::TemporaryFailure | ErrorKind::Conflict | ErrorKind::NoFreeConductorWorker
        )
    }
}
