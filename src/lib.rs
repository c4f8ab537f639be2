//! Capacity allocation engine for shared solar generation projects.
//!
//! A project offers a finite pool of fixed-size capacity blocks. A request
//! for N kW is satisfied by greedily committing blocks from that pool,
//! oldest-provisioned first, with per-block compare-and-swap semantics so
//! that concurrent requests can never double-book a block.
//!
//! The crate is split along the ownership boundaries of the state involved:
//! - [`store::BlockStore`]: durable, race-safe block inventory (the two
//!   atomic verbs `try_commit` and `release` are the only ways to flip a
//!   block's status).
//! - [`store::AllocationRepository`]: durable requester-to-block
//!   commitments, with a hard one-active-allocation-per-block constraint as
//!   an independent safety net against double-booking.
//! - [`coordinator::AllocationCoordinator`]: the reserve/release
//!   orchestration, including compensation (releasing a block whose paired
//!   allocation write failed).
//!
//! Storage is pluggable: [`store::memory::InMemoryStorage`] is always
//! available, and a Postgres implementation lives behind the `postgres`
//! feature (on by default).

pub mod allocation;
pub mod block;
pub mod coordinator;
pub mod error;
pub mod project;
pub mod store;

pub use allocation::{Allocation, AllocationId, AllocationStatus, Reservation};
pub use block::{AvailableBlock, BlockId, BlockStatus, CapacityBlock, CommitOutcome, ReleaseOutcome};
pub use coordinator::{AllocationCoordinator, CoordinatorConfig};
pub use error::{AllocationError, Result};
pub use project::{Project, ProjectId, ProjectStatus, RequesterId};
pub use store::memory::InMemoryStorage;
#[cfg(feature = "postgres")]
pub use store::postgres::PostgresStorage;
pub use store::{AllocationRepository, BlockStore, ProjectRegistry};
