//! In-memory storage, the reference implementation of the storage traits.
//!
//! All state lives behind a single `parking_lot` lock; each atomic verb is
//! one short critical section, which gives `try_commit`/`release` their
//! compare-and-swap semantics and `list_available` a consistent snapshot.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::allocation::{Allocation, AllocationId, AllocationStatus};
use crate::block::{
    AvailableBlock, BlockId, BlockStatus, CapacityBlock, CommitOutcome, ReleaseOutcome,
};
use crate::error::{AllocationError, Result};
use crate::project::{Project, ProjectId, RequesterId};
use crate::store::{AllocationRepository, BlockStore, ProjectRegistry};

struct StoredBlock {
    block: CapacityBlock,
    /// Monotonic provisioning order; timestamps alone can tie.
    seq: u64,
}

#[derive(Default)]
struct State {
    projects: HashMap<ProjectId, Project>,
    blocks: HashMap<BlockId, StoredBlock>,
    allocations: HashMap<AllocationId, Allocation>,
    /// Active allocation per block; the in-memory stand-in for the partial
    /// unique index.
    active_by_block: HashMap<BlockId, AllocationId>,
    next_seq: u64,
}

/// In-memory implementation of [`BlockStore`], [`AllocationRepository`] and
/// [`ProjectRegistry`].
#[derive(Default)]
pub struct InMemoryStorage {
    state: RwLock<State>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a project. Stand-in for the out-of-scope provisioning flow.
    pub fn add_project(&self, project: Project) {
        self.state.write().projects.insert(project.id, project);
    }

    /// Provision AVAILABLE blocks of the given sizes, in FIFO order.
    pub fn add_blocks(&self, project_id: ProjectId, sizes_kw: &[Decimal]) -> Vec<BlockId> {
        let mut state = self.state.write();
        let mut ids = Vec::with_capacity(sizes_kw.len());
        for &size_kw in sizes_kw {
            let id = BlockId::from(Uuid::new_v4());
            let seq = state.next_seq;
            state.next_seq += 1;
            state.blocks.insert(
                id,
                StoredBlock {
                    block: CapacityBlock {
                        id,
                        project_id,
                        size_kw,
                        status: BlockStatus::Available,
                        allocated_at: None,
                        created_at: Utc::now(),
                    },
                    seq,
                },
            );
            ids.push(id);
        }
        ids
    }

    /// Current state of a block, for diagnostics and tests.
    pub fn block(&self, block_id: BlockId) -> Option<CapacityBlock> {
        self.state.read().blocks.get(&block_id).map(|s| s.block.clone())
    }

    /// Current state of an allocation, for diagnostics and tests.
    pub fn allocation(&self, allocation_id: AllocationId) -> Option<Allocation> {
        self.state.read().allocations.get(&allocation_id).cloned()
    }

    /// The active allocation backing a block, if any.
    pub fn active_allocation_for(&self, block_id: BlockId) -> Option<Allocation> {
        let state = self.state.read();
        let id = state.active_by_block.get(&block_id)?;
        state.allocations.get(id).cloned()
    }
}

#[async_trait]
impl BlockStore for InMemoryStorage {
    async fn list_available(&self, project_id: ProjectId) -> Result<Vec<AvailableBlock>> {
        let state = self.state.read();
        let mut available: Vec<(u64, AvailableBlock)> = state
            .blocks
            .values()
            .filter(|s| {
                s.block.project_id == project_id && s.block.status == BlockStatus::Available
            })
            .map(|s| {
                (
                    s.seq,
                    AvailableBlock {
                        id: s.block.id,
                        size_kw: s.block.size_kw,
                    },
                )
            })
            .collect();
        available.sort_by_key(|(seq, _)| *seq);
        Ok(available.into_iter().map(|(_, b)| b).collect())
    }

    async fn try_commit(&self, block_id: BlockId) -> Result<CommitOutcome> {
        let mut state = self.state.write();
        let Some(stored) = state.blocks.get_mut(&block_id) else {
            return Ok(CommitOutcome::NotFound);
        };
        match stored.block.status {
            BlockStatus::Allocated => Ok(CommitOutcome::AlreadyTaken),
            BlockStatus::Available => {
                stored.block.status = BlockStatus::Allocated;
                stored.block.allocated_at = Some(Utc::now());
                Ok(CommitOutcome::Committed)
            }
        }
    }

    async fn release(&self, block_id: BlockId) -> Result<ReleaseOutcome> {
        let mut state = self.state.write();
        let Some(stored) = state.blocks.get_mut(&block_id) else {
            return Ok(ReleaseOutcome::NotFound);
        };
        match stored.block.status {
            BlockStatus::Available => Ok(ReleaseOutcome::NotFound),
            BlockStatus::Allocated => {
                stored.block.status = BlockStatus::Available;
                stored.block.allocated_at = None;
                Ok(ReleaseOutcome::Released)
            }
        }
    }
}

#[async_trait]
impl AllocationRepository for InMemoryStorage {
    async fn create(
        &self,
        requester_id: RequesterId,
        block_id: BlockId,
        kw: Decimal,
    ) -> Result<Allocation> {
        let mut state = self.state.write();
        if state.active_by_block.contains_key(&block_id) {
            return Err(AllocationError::Conflict { block_id });
        }
        let allocation = Allocation {
            id: AllocationId::from(Uuid::new_v4()),
            requester_id,
            block_id,
            kw,
            status: AllocationStatus::Active,
            created_at: Utc::now(),
            ended_at: None,
        };
        state.active_by_block.insert(block_id, allocation.id);
        state.allocations.insert(allocation.id, allocation.clone());
        Ok(allocation)
    }

    async fn end(&self, allocation_id: AllocationId) -> Result<Allocation> {
        let mut state = self.state.write();
        let Some(allocation) = state.allocations.get_mut(&allocation_id) else {
            return Err(AllocationError::AllocationNotFound { allocation_id });
        };
        if allocation.status != AllocationStatus::Active {
            return Err(AllocationError::AllocationNotFound { allocation_id });
        }
        allocation.status = AllocationStatus::Ended;
        allocation.ended_at = Some(Utc::now());
        let allocation = allocation.clone();
        state.active_by_block.remove(&allocation.block_id);
        Ok(allocation)
    }

    async fn get(&self, allocation_id: AllocationId) -> Result<Option<Allocation>> {
        Ok(self.state.read().allocations.get(&allocation_id).cloned())
    }

    async fn active_for_block(&self, block_id: BlockId) -> Result<Option<Allocation>> {
        Ok(self.active_allocation_for(block_id))
    }

    async fn list_for(&self, requester_id: RequesterId) -> Result<Vec<Allocation>> {
        let state = self.state.read();
        let mut allocations: Vec<Allocation> = state
            .allocations
            .values()
            .filter(|a| a.requester_id == requester_id)
            .cloned()
            .collect();
        allocations.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.0.cmp(&a.id.0)));
        Ok(allocations)
    }
}

#[async_trait]
impl ProjectRegistry for InMemoryStorage {
    async fn get(&self, project_id: ProjectId) -> Result<Option<Project>> {
        Ok(self.state.read().projects.get(&project_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(v: i64) -> Decimal {
        Decimal::from(v)
    }

    fn storage_with_blocks(sizes: &[i64]) -> (InMemoryStorage, ProjectId, Vec<BlockId>) {
        let storage = InMemoryStorage::new();
        let project_id = ProjectId::from(Uuid::new_v4());
        let sizes: Vec<Decimal> = sizes.iter().copied().map(kw).collect();
        let ids = storage.add_blocks(project_id, &sizes);
        (storage, project_id, ids)
    }

    #[test_log::test(tokio::test)]
    async fn list_available_is_fifo_and_filtered() {
        let (storage, project_id, ids) = storage_with_blocks(&[10, 20, 30]);
        let other_project = ProjectId::from(Uuid::new_v4());
        storage.add_blocks(other_project, &[kw(99)]);

        let listed = storage.list_available(project_id).await.unwrap();
        assert_eq!(listed.iter().map(|b| b.id).collect::<Vec<_>>(), ids);
        assert_eq!(listed[1].size_kw, kw(20));

        storage.try_commit(ids[0]).await.unwrap();
        let listed = storage.list_available(project_id).await.unwrap();
        assert_eq!(listed.iter().map(|b| b.id).collect::<Vec<_>>(), ids[1..].to_vec());
    }

    #[test_log::test(tokio::test)]
    async fn try_commit_is_conditional() {
        let (storage, _, ids) = storage_with_blocks(&[10]);

        assert_eq!(
            storage.try_commit(ids[0]).await.unwrap(),
            CommitOutcome::Committed
        );
        assert_eq!(
            storage.try_commit(ids[0]).await.unwrap(),
            CommitOutcome::AlreadyTaken
        );
        assert_eq!(
            storage.try_commit(BlockId::from(Uuid::new_v4())).await.unwrap(),
            CommitOutcome::NotFound
        );

        let block = storage.block(ids[0]).unwrap();
        assert_eq!(block.status, BlockStatus::Allocated);
        assert!(block.allocated_at.is_some());
    }

    #[test_log::test(tokio::test)]
    async fn release_reopens_a_block() {
        let (storage, _, ids) = storage_with_blocks(&[10]);
        storage.try_commit(ids[0]).await.unwrap();

        assert_eq!(
            storage.release(ids[0]).await.unwrap(),
            ReleaseOutcome::Released
        );
        let block = storage.block(ids[0]).unwrap();
        assert_eq!(block.status, BlockStatus::Available);
        assert!(block.allocated_at.is_none());

        assert_eq!(
            storage.release(BlockId::from(Uuid::new_v4())).await.unwrap(),
            ReleaseOutcome::NotFound
        );
        // Releasing a block that is already AVAILABLE is not a transition.
        assert_eq!(
            storage.release(ids[0]).await.unwrap(),
            ReleaseOutcome::NotFound
        );
        // Committable again after release.
        assert_eq!(
            storage.try_commit(ids[0]).await.unwrap(),
            CommitOutcome::Committed
        );
    }

    #[test_log::test(tokio::test)]
    async fn duplicate_create_for_a_block_is_a_conflict() {
        let (storage, _, ids) = storage_with_blocks(&[10]);
        let requester = RequesterId::from(Uuid::new_v4());
        storage.try_commit(ids[0]).await.unwrap();

        storage.create(requester, ids[0], kw(10)).await.unwrap();
        let err = storage.create(requester, ids[0], kw(10)).await.unwrap_err();
        assert!(matches!(err, AllocationError::Conflict { block_id } if block_id == ids[0]));

        let listed = storage.list_for(requester).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn ending_an_allocation_frees_the_uniqueness_slot() {
        let (storage, _, ids) = storage_with_blocks(&[10]);
        let requester = RequesterId::from(Uuid::new_v4());
        storage.try_commit(ids[0]).await.unwrap();
        let allocation = storage.create(requester, ids[0], kw(10)).await.unwrap();

        let ended = storage.end(allocation.id).await.unwrap();
        assert_eq!(ended.status, AllocationStatus::Ended);
        assert!(ended.ended_at.is_some());
        assert!(storage.active_allocation_for(ids[0]).is_none());

        // Ended twice is not-found, not a second mutation.
        let err = storage.end(allocation.id).await.unwrap_err();
        assert!(matches!(err, AllocationError::AllocationNotFound { .. }));

        // The block can back a fresh allocation again.
        storage.create(requester, ids[0], kw(10)).await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn list_for_is_newest_first_per_requester() {
        let (storage, _, ids) = storage_with_blocks(&[10, 20]);
        let requester = RequesterId::from(Uuid::new_v4());
        let other = RequesterId::from(Uuid::new_v4());

        storage.try_commit(ids[0]).await.unwrap();
        storage.try_commit(ids[1]).await.unwrap();
        let first = storage.create(requester, ids[0], kw(10)).await.unwrap();
        // Keep the creation timestamps distinguishable so the ordering
        // assertion below is meaningful.
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = storage.create(requester, ids[1], kw(20)).await.unwrap();

        let listed = storage.list_for(requester).await.unwrap();
        assert_eq!(
            listed.iter().map(|a| a.id).collect::<Vec<_>>(),
            vec![second.id, first.id]
        );

        assert!(storage.list_for(other).await.unwrap().is_empty());
    }
}
