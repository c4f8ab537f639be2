//! Races many concurrent `reserve` calls over one shared pool and checks the
//! double-booking and conservation properties hold.

use std::collections::HashSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::task::JoinSet;
use uuid::Uuid;

use solshare::{
    AllocationCoordinator, AllocationError, BlockId, BlockStatus, BlockStore, CoordinatorConfig,
    InMemoryStorage, Project, ProjectId, ProjectStatus, RequesterId, Reservation,
};

fn kw(v: i64) -> Decimal {
    Decimal::from(v)
}

fn setup(
    block_sizes: &[i64],
) -> (
    Arc<InMemoryStorage>,
    Arc<AllocationCoordinator<InMemoryStorage, InMemoryStorage, InMemoryStorage>>,
    ProjectId,
    Vec<BlockId>,
) {
    let storage = Arc::new(InMemoryStorage::new());
    let project_id = ProjectId::from(Uuid::new_v4());
    storage.add_project(Project {
        id: project_id,
        name: "Sunfield I".to_string(),
        total_kw: kw(1000),
        credit_rate_per_kwh: Decimal::new(45, 1),
        status: ProjectStatus::Active,
    });
    let sizes: Vec<Decimal> = block_sizes.iter().copied().map(kw).collect();
    let block_ids = storage.add_blocks(project_id, &sizes);
    let coordinator = Arc::new(AllocationCoordinator::new(
        storage.clone(),
        storage.clone(),
        storage.clone(),
        CoordinatorConfig::default(),
    ));
    (storage, coordinator, project_id, block_ids)
}

/// Every block a requester walks away with must be theirs alone, and block
/// status must agree with the allocation records, no matter how the race
/// interleaves.
#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 8))]
async fn concurrent_reservations_never_double_book() {
    // 20 blocks of 5 kW; ten requesters want 15 kW each, 150 kW against a
    // 100 kW pool, so some must lose.
    let (storage, coordinator, project_id, block_ids) = setup(&[5; 20]);

    let mut tasks = JoinSet::new();
    for _ in 0..10 {
        let coordinator = coordinator.clone();
        let requester = RequesterId::from(Uuid::new_v4());
        tasks.spawn(async move { coordinator.reserve(requester, project_id, kw(15)).await });
    }

    let mut reservations: Vec<Reservation> = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(reservation) => reservations.push(reservation),
            Err(AllocationError::InsufficientCapacity { .. })
            | Err(AllocationError::AllocationFailed { .. }) => {}
            Err(other) => panic!("unexpected error under contention: {other:?}"),
        }
    }

    // No block appears in two reservations.
    let mut seen = HashSet::new();
    for reservation in &reservations {
        assert!(!reservation.allocations.is_empty());
        for allocation in &reservation.allocations {
            assert!(
                seen.insert(allocation.block_id),
                "block {} double-booked",
                allocation.block_id
            );
            assert_eq!(allocation.kw, kw(5));
        }
    }

    // Committed totals are honest and bounded by the pool.
    let committed_total: Decimal = reservations.iter().map(|r| r.committed_kw).sum();
    assert!(committed_total <= kw(100));
    for reservation in &reservations {
        let sum: Decimal = reservation.allocations.iter().map(|a| a.kw).sum();
        assert_eq!(reservation.committed_kw, sum);
    }

    // Conservation: ALLOCATED iff exactly one active allocation references
    // the block.
    for block_id in block_ids {
        let block = storage.block(block_id).unwrap();
        match block.status {
            BlockStatus::Allocated => {
                assert!(seen.contains(&block_id));
                assert!(storage.active_allocation_for(block_id).is_some());
                assert!(block.allocated_at.is_some());
            }
            BlockStatus::Available => {
                assert!(!seen.contains(&block_id));
                assert!(storage.active_allocation_for(block_id).is_none());
            }
        }
    }
}

/// Two requesters race for a pool of exactly one block: one wins it, the
/// other walks away empty-handed with a clean failure.
#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 4))]
async fn single_block_race_has_exactly_one_winner() {
    let (storage, coordinator, project_id, block_ids) = setup(&[10]);

    let mut tasks = JoinSet::new();
    for _ in 0..2 {
        let coordinator = coordinator.clone();
        let requester = RequesterId::from(Uuid::new_v4());
        tasks.spawn(async move { coordinator.reserve(requester, project_id, kw(10)).await });
    }

    let mut wins = 0;
    let mut losses = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined.unwrap() {
            Ok(reservation) => {
                assert_eq!(reservation.committed_kw, kw(10));
                assert_eq!(reservation.allocations.len(), 1);
                wins += 1;
            }
            // Depending on where the loser's snapshot lands it sees either
            // an empty pool or loses the commit race.
            Err(AllocationError::InsufficientCapacity { available_kw, .. }) => {
                assert_eq!(available_kw, Decimal::ZERO);
                losses += 1;
            }
            Err(AllocationError::AllocationFailed { .. }) => losses += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!((wins, losses), (1, 1));

    let block = storage.block(block_ids[0]).unwrap();
    assert_eq!(block.status, BlockStatus::Allocated);
    assert!(storage.active_allocation_for(block_ids[0]).is_some());
}

/// Reserve/release churn from many tasks leaves the pool fully available
/// with no active allocations.
#[test_log::test(tokio::test(flavor = "multi_thread", worker_threads = 8))]
async fn churn_returns_every_block_to_the_pool() {
    let (storage, coordinator, project_id, block_ids) = setup(&[10; 4]);

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let coordinator = coordinator.clone();
        let requester = RequesterId::from(Uuid::new_v4());
        tasks.spawn(async move {
            for _ in 0..25 {
                match coordinator.reserve(requester, project_id, kw(10)).await {
                    Ok(reservation) => {
                        for allocation in reservation.allocations {
                            coordinator.release(allocation.id).await.unwrap();
                        }
                    }
                    Err(AllocationError::InsufficientCapacity { .. })
                    | Err(AllocationError::AllocationFailed { .. }) => {
                        tokio::task::yield_now().await;
                    }
                    Err(other) => panic!("unexpected error during churn: {other:?}"),
                }
            }
        });
    }
    while let Some(joined) = tasks.join_next().await {
        joined.unwrap();
    }

    for block_id in block_ids {
        let block = storage.block(block_id).unwrap();
        assert_eq!(block.status, BlockStatus::Available);
        assert!(block.allocated_at.is_none());
        assert!(storage.active_allocation_for(block_id).is_none());
    }
    assert_eq!(storage.list_available(project_id).await.unwrap().len(), 4);
}
