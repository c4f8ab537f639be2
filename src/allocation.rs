//! Allocations: committed reservations binding a requester to one block.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::block::BlockId;
use crate::project::RequesterId;

/// Unique identifier for an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct AllocationId(pub Uuid);

impl From<Uuid> for AllocationId {
    fn from(uuid: Uuid) -> Self {
        AllocationId(uuid)
    }
}

impl std::ops::Deref for AllocationId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for AllocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStatus {
    Active,
    Ended,
}

/// A commitment of one capacity block to one requester.
///
/// Created only after the backing block was successfully committed; `kw` is
/// copied from the block's size at commit time and must not diverge from it.
#[derive(Debug, Clone, Serialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub requester_id: RequesterId,
    /// The backing block. At most one *active* allocation exists per block,
    /// enforced by the repository as a hard constraint.
    pub block_id: BlockId,
    pub kw: Decimal,
    pub status: AllocationStatus,
    pub created_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Allocation {
    pub fn is_active(&self) -> bool {
        self.status == AllocationStatus::Active
    }
}

/// A satisfied reservation: one or more allocations plus the true committed
/// total.
///
/// `committed_kw` may exceed `requested_kw` by up to one block's size (blocks
/// are indivisible, the last one is not split), or fall short of it when
/// concurrent contention consumed candidates. Callers must read
/// `committed_kw` rather than assume the request was fully satisfied.
#[derive(Debug, Clone, Serialize)]
pub struct Reservation {
    pub requested_kw: Decimal,
    pub committed_kw: Decimal,
    pub allocations: Vec<Allocation>,
}

impl Reservation {
    /// True when contention left the reservation short of the requested
    /// amount. The caller decides whether to accept it or request more.
    pub fn is_partial(&self) -> bool {
        self.committed_kw < self.requested_kw
    }
}
