//! Capacity blocks: the fixed-size units of allocatable inventory.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::project::ProjectId;

/// Unique identifier for a capacity block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct BlockId(pub Uuid);

impl From<Uuid> for BlockId {
    fn from(uuid: Uuid) -> Self {
        BlockId(uuid)
    }
}

impl std::ops::Deref for BlockId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Block lifecycle status.
///
/// AVAILABLE→ALLOCATED only via [`crate::store::BlockStore::try_commit`];
/// ALLOCATED→AVAILABLE only via [`crate::store::BlockStore::release`]. No
/// other code path flips a block's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockStatus {
    Available,
    Allocated,
}

/// A fixed-size unit of allocatable capacity belonging to a project.
///
/// Size never changes after creation. A block is ALLOCATED if and only if
/// exactly one active allocation references it.
#[derive(Debug, Clone, Serialize)]
pub struct CapacityBlock {
    pub id: BlockId,
    pub project_id: ProjectId,
    pub size_kw: Decimal,
    pub status: BlockStatus,
    /// Set when the block transitions to ALLOCATED, cleared on release.
    pub allocated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One entry of the availability snapshot returned by
/// [`crate::store::BlockStore::list_available`].
///
/// The snapshot is advisory: any listed block may be claimed by a concurrent
/// requester before a commit is attempted against it.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct AvailableBlock {
    pub id: BlockId,
    pub size_kw: Decimal,
}

/// Outcome of an atomic commit attempt on a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The block transitioned AVAILABLE→ALLOCATED in this call.
    Committed,
    /// The block was claimed by a concurrent requester between the listing
    /// and this attempt. Expected under contention, not an error.
    AlreadyTaken,
    /// No block with this id exists.
    NotFound,
}

/// Outcome of releasing a block back to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The block transitioned ALLOCATED→AVAILABLE in this call.
    Released,
    /// Nothing to release: the block does not exist or is already AVAILABLE.
    NotFound,
}
