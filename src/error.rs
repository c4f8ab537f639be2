//! Error taxonomy for the allocation engine.

use rust_decimal::Decimal;
use thiserror::Error;

use crate::allocation::AllocationId;
use crate::block::BlockId;
use crate::project::ProjectId;

/// Errors surfaced by the allocation engine.
///
/// Per-block contention (a lost `try_commit` race, a repository `Conflict`)
/// is recovered inside the coordinator's walk and only surfaces as
/// [`AllocationError::AllocationFailed`] when it exhausts every candidate.
/// [`AllocationError::Store`] wraps transient infrastructure failures and is
/// the only retryable variant.
#[derive(Error, Debug)]
pub enum AllocationError {
    /// Requested amount is outside the accepted bounds.
    #[error("invalid capacity request: {message}")]
    Validation { message: String },

    /// Project does not exist or is not open for reservations.
    #[error("project {project_id} is not open for reservations")]
    ProjectUnavailable { project_id: ProjectId },

    /// The available snapshot cannot cover the request. Carries the real
    /// available total for display.
    #[error("insufficient capacity: {available_kw} kW available, {requested_kw} kW requested")]
    InsufficientCapacity {
        requested_kw: Decimal,
        available_kw: Decimal,
    },

    /// Every candidate block was lost to contention; nothing was committed.
    #[error("no capacity could be committed for project {project_id}")]
    AllocationFailed { project_id: ProjectId },

    /// An active allocation already exists for this block (repository
    /// uniqueness constraint).
    #[error("an active allocation already exists for block {block_id}")]
    Conflict { block_id: BlockId },

    /// Allocation does not exist or is no longer active.
    #[error("allocation {allocation_id} not found or not active")]
    AllocationNotFound { allocation_id: AllocationId },

    /// Transient storage failure; safe to retry the whole call.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

impl AllocationError {
    /// Whether the caller may simply re-invoke the failed operation.
    ///
    /// `reserve` is idempotent in effect (the repository's uniqueness
    /// constraint prevents duplicate commitment) though not in outcome: a
    /// retry may allocate different or fewer blocks.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AllocationError::Store(_))
    }
}

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, AllocationError>;
