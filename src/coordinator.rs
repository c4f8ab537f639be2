//! The allocation coordinator: converts capacity requests into committed
//! reservations.
//!
//! Each `reserve` call is one logical unit of work; many run concurrently
//! against the same project's pool. There is no global lock over a project's
//! inventory — correctness rests entirely on the block store's conditional
//! commit and the repository's uniqueness constraint, so allocation is
//! first-committed-wins per block, not first-requested-wins.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::instrument;

use crate::allocation::{Allocation, AllocationId, Reservation};
use crate::block::{CommitOutcome, ReleaseOutcome};
use crate::error::{AllocationError, Result};
use crate::project::{ProjectId, RequesterId};
use crate::store::{AllocationRepository, BlockStore, ProjectRegistry};

/// Policy parameters for the coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Per-request ceiling in kW. Policy, not a structural constant.
    pub max_request_kw: Decimal,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_request_kw: Decimal::from(100),
        }
    }
}

/// Orchestrates block commits and allocation writes.
///
/// The coordinator owns no block or allocation state itself; it drives the
/// transitions owned by the block store and the allocation repository, and
/// compensates (releases the block) whenever the paired record write fails.
pub struct AllocationCoordinator<S, R, P> {
    blocks: Arc<S>,
    allocations: Arc<R>,
    projects: Arc<P>,
    config: CoordinatorConfig,
}

impl<S, R, P> AllocationCoordinator<S, R, P>
where
    S: BlockStore,
    R: AllocationRepository,
    P: ProjectRegistry,
{
    pub fn new(
        blocks: Arc<S>,
        allocations: Arc<R>,
        projects: Arc<P>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            blocks,
            allocations,
            projects,
            config,
        }
    }

    /// Reserve `requested_kw` of capacity against a project.
    ///
    /// Walks the availability snapshot in FIFO order, committing blocks until
    /// the running total reaches the requested amount. Greedy bin-fill, not
    /// bin-packing: blocks are indivisible, so the committed total may
    /// overshoot by up to one block's size. Under contention it may also fall
    /// short — partial satisfaction is reported as success with the true
    /// committed total, and the caller decides whether to accept it.
    ///
    /// Candidates are attempted sequentially, not in parallel, which keeps
    /// compensation per-block and bounds the blast radius of a single
    /// failure. Blocks committed and recorded before an abandonment or a
    /// later failure remain valid reservations.
    #[instrument(skip_all, fields(requester_id = %requester_id, project_id = %project_id, requested_kw = %requested_kw))]
    pub async fn reserve(
        &self,
        requester_id: RequesterId,
        project_id: ProjectId,
        requested_kw: Decimal,
    ) -> Result<Reservation> {
        if requested_kw <= Decimal::ZERO {
            return Err(AllocationError::Validation {
                message: format!("requested capacity must be positive, got {requested_kw} kW"),
            });
        }
        if requested_kw > self.config.max_request_kw {
            return Err(AllocationError::Validation {
                message: format!(
                    "requested capacity {requested_kw} kW exceeds the per-request ceiling of {} kW",
                    self.config.max_request_kw
                ),
            });
        }

        let project = self
            .projects
            .get(project_id)
            .await?
            .ok_or(AllocationError::ProjectUnavailable { project_id })?;
        if !project.is_active() {
            return Err(AllocationError::ProjectUnavailable { project_id });
        }

        // Advisory fast-fail only: the snapshot is stale the instant it is
        // read, and correctness never relies on it.
        let candidates = self.blocks.list_available(project_id).await?;
        let available_kw: Decimal = candidates.iter().map(|b| b.size_kw).sum();
        if available_kw < requested_kw {
            return Err(AllocationError::InsufficientCapacity {
                requested_kw,
                available_kw,
            });
        }

        let mut allocations: Vec<Allocation> = Vec::new();
        let mut committed_kw = Decimal::ZERO;

        for candidate in candidates {
            if committed_kw >= requested_kw {
                break;
            }

            // Transient failures are retried at the granularity of "next
            // candidate", never by re-running the whole walk.
            match self.blocks.try_commit(candidate.id).await {
                Ok(CommitOutcome::Committed) => {}
                Ok(CommitOutcome::AlreadyTaken) => {
                    tracing::debug!(block_id = %candidate.id, "block lost to a concurrent requester, skipping");
                    continue;
                }
                Ok(CommitOutcome::NotFound) => {
                    tracing::warn!(block_id = %candidate.id, "listed block no longer exists, skipping");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(block_id = %candidate.id, error = %err, "commit attempt failed, skipping block");
                    continue;
                }
            }

            match self
                .allocations
                .create(requester_id, candidate.id, candidate.size_kw)
                .await
            {
                Ok(allocation) => {
                    committed_kw += allocation.kw;
                    allocations.push(allocation);
                }
                Err(err) => {
                    // Compensation is unconditional: the block must never be
                    // left ALLOCATED without a backing allocation record.
                    tracing::warn!(
                        block_id = %candidate.id,
                        error = %err,
                        "allocation record write failed, releasing block"
                    );
                    match self.blocks.release(candidate.id).await {
                        Ok(ReleaseOutcome::Released) => {}
                        Ok(ReleaseOutcome::NotFound) => {
                            tracing::error!(block_id = %candidate.id, "committed block vanished during compensation");
                        }
                        Err(release_err) => {
                            tracing::error!(
                                block_id = %candidate.id,
                                error = %release_err,
                                "failed to release block after record write failure, block needs reconciliation"
                            );
                        }
                    }
                }
            }
        }

        if committed_kw == Decimal::ZERO {
            return Err(AllocationError::AllocationFailed { project_id });
        }

        let partial = committed_kw < requested_kw;
        tracing::info!(
            committed_kw = %committed_kw,
            blocks = allocations.len(),
            partial,
            "reservation committed"
        );
        Ok(Reservation {
            requested_kw,
            committed_kw,
            allocations,
        })
    }

    /// End an allocation and return its block to the pool.
    ///
    /// Mirror of the commit step, with the same atomicity contract. The
    /// allocation is ended *before* the block is released: the in-between
    /// state (block ALLOCATED, no active allocation) cannot be double-claimed,
    /// whereas the opposite order would let a concurrent `reserve` commit a
    /// block still referenced by an active allocation.
    ///
    /// A transient failure between the two steps leaves the allocation ended
    /// and the block still ALLOCATED; retrying the call resumes at the block
    /// release rather than refusing the already-ended record, so no capacity
    /// is stranded.
    #[instrument(skip_all, fields(allocation_id = %allocation_id))]
    pub async fn release(&self, allocation_id: AllocationId) -> Result<Allocation> {
        let allocation = match self.allocations.end(allocation_id).await {
            Ok(allocation) => allocation,
            Err(AllocationError::AllocationNotFound { .. }) => {
                // An earlier attempt may have ended the record and then
                // failed to free the block; finish that release instead of
                // refusing the retry. Not if the block has since been
                // committed to a new active allocation: that block belongs
                // to its new owner.
                match self.allocations.get(allocation_id).await? {
                    Some(allocation) if !allocation.is_active() => {
                        if self
                            .allocations
                            .active_for_block(allocation.block_id)
                            .await?
                            .is_some()
                        {
                            return Err(AllocationError::AllocationNotFound { allocation_id });
                        }
                        allocation
                    }
                    _ => return Err(AllocationError::AllocationNotFound { allocation_id }),
                }
            }
            Err(err) => return Err(err),
        };
        match self.blocks.release(allocation.block_id).await? {
            ReleaseOutcome::Released => {
                tracing::info!(block_id = %allocation.block_id, kw = %allocation.kw, "allocation released");
                Ok(allocation)
            }
            // Already AVAILABLE (or gone): nothing left to undo, so a
            // repeated release of a finished allocation reports not-found
            // rather than a second success.
            ReleaseOutcome::NotFound => Err(AllocationError::AllocationNotFound { allocation_id }),
        }
    }

    /// All allocations for a requester, newest first.
    pub async fn list_for(&self, requester_id: RequesterId) -> Result<Vec<Allocation>> {
        self.allocations.list_for(requester_id).await
    }
}
