//! Projects and the requesters reserving against them.

use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// Unique identifier for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ProjectId(pub Uuid);

impl From<Uuid> for ProjectId {
    fn from(uuid: Uuid) -> Self {
        ProjectId(uuid)
    }
}

impl std::ops::Deref for ProjectId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Opaque identifier for an authenticated requester.
///
/// Supplied by the identity provider; the engine never interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct RequesterId(pub Uuid);

impl From<Uuid> for RequesterId {
    fn from(uuid: Uuid) -> Self {
        RequesterId(uuid)
    }
}

impl std::ops::Deref for RequesterId {
    type Target = Uuid;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for RequesterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Whether a project accepts new reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Inactive,
}

/// A solar installation offering capacity for reservation.
///
/// Immutable for allocation purposes except status gating; block inventory
/// is provisioned separately and tracked by the block store.
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
    /// Total installed capacity, informational only. The allocatable amount
    /// is whatever the block inventory says it is.
    pub total_kw: Decimal,
    /// Rate used by downstream billing to convert generation into credits.
    pub credit_rate_per_kwh: Decimal,
    pub status: ProjectStatus,
}

impl Project {
    pub fn is_active(&self) -> bool {
        self.status == ProjectStatus::Active
    }
}
