//! Storage traits for the allocation engine.
//!
//! Three seams, matching the ownership boundaries of the state involved.
//! The block store's compare-and-swap commit and the repository's
//! uniqueness constraint are *independent* defenses against double-booking:
//! the second catches anything that slips through a gap between the block
//! commit and the record write (crash-restart duplicate retries included).

use async_trait::async_trait;

use crate::allocation::{Allocation, AllocationId};
use crate::block::{AvailableBlock, BlockId, CommitOutcome, ReleaseOutcome};
use crate::error::Result;
use crate::project::{Project, ProjectId, RequesterId};
use rust_decimal::Decimal;

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

/// Durable, race-safe state for the block inventory.
///
/// `try_commit` and `release` are the only operations permitted to flip a
/// block's status. Implementations must make both atomic conditional
/// transitions (a row-version / conditional-write primitive, never a
/// read-then-write), so two simultaneous callers can never both succeed on
/// the same block.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Snapshot of AVAILABLE blocks for a project, oldest-provisioned first
    /// (FIFO fairness).
    ///
    /// Reserves nothing; any entry may be stale by the time a commit is
    /// attempted against it.
    async fn list_available(&self, project_id: ProjectId) -> Result<Vec<AvailableBlock>>;

    /// Atomically transition a block AVAILABLE→ALLOCATED, setting the
    /// allocation timestamp, only if it is still AVAILABLE.
    async fn try_commit(&self, block_id: BlockId) -> Result<CommitOutcome>;

    /// Atomically transition a block ALLOCATED→AVAILABLE, clearing the
    /// allocation timestamp, only if it is currently ALLOCATED. Used by
    /// compensation and by the release/refund mirror flow; releasing a block
    /// that is already AVAILABLE reports `NotFound` rather than succeeding.
    async fn release(&self, block_id: BlockId) -> Result<ReleaseOutcome>;
}

/// Durable mapping of committed blocks to requesters.
#[async_trait]
pub trait AllocationRepository: Send + Sync {
    /// Insert a new active allocation.
    ///
    /// Implementations enforce one active allocation per block as a hard
    /// constraint and return [`crate::AllocationError::Conflict`] rather
    /// than a duplicate row.
    async fn create(
        &self,
        requester_id: RequesterId,
        block_id: BlockId,
        kw: Decimal,
    ) -> Result<Allocation>;

    /// Mark an active allocation ended, stamping `ended_at`.
    async fn end(&self, allocation_id: AllocationId) -> Result<Allocation>;

    /// Look up an allocation by id, whatever its status. The coordinator's
    /// release flow uses this to resume after an interrupted block release.
    async fn get(&self, allocation_id: AllocationId) -> Result<Option<Allocation>>;

    /// The active allocation backing a block, if any.
    async fn active_for_block(&self, block_id: BlockId) -> Result<Option<Allocation>>;

    /// All allocations for a requester, newest first. Read-only reporting
    /// surface; not part of the coordinator's write path.
    async fn list_for(&self, requester_id: RequesterId) -> Result<Vec<Allocation>>;
}

/// Project existence and status lookup, consumed from the project registry
/// collaborator.
#[async_trait]
pub trait ProjectRegistry: Send + Sync {
    async fn get(&self, project_id: ProjectId) -> Result<Option<Project>>;
}
