//! Postgres storage implementation.
//!
//! The conditional transitions are single `UPDATE ... WHERE status = ...`
//! statements, so the check and the write are one atomic operation against
//! the database. The one-active-allocation-per-block rule is a partial
//! unique index (see `migrations/`), enforced by Postgres itself rather
//! than by application code.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::allocation::{Allocation, AllocationId, AllocationStatus};
use crate::block::{AvailableBlock, BlockId, CommitOutcome, ReleaseOutcome};
use crate::error::{AllocationError, Result};
use crate::project::{Project, ProjectId, ProjectStatus, RequesterId};
use crate::store::{AllocationRepository, BlockStore, ProjectRegistry};

/// Postgres-backed implementation of [`BlockStore`],
/// [`AllocationRepository`] and [`ProjectRegistry`].
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the crate's migrations against the connected database.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AllocationError::Store(e.into()))
    }
}

fn store_err(err: sqlx::Error) -> AllocationError {
    AllocationError::Store(err.into())
}

#[derive(sqlx::FromRow)]
struct AvailableBlockRow {
    id: Uuid,
    size_kw: Decimal,
}

#[derive(sqlx::FromRow)]
struct AllocationRow {
    id: Uuid,
    requester_id: Uuid,
    capacity_block_id: Uuid,
    kw: Decimal,
    status: String,
    created_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
}

impl AllocationRow {
    fn into_allocation(self) -> Result<Allocation> {
        let status = match self.status.as_str() {
            "active" => AllocationStatus::Active,
            "ended" => AllocationStatus::Ended,
            other => {
                return Err(AllocationError::Store(anyhow::anyhow!(
                    "unknown allocation status {other:?} for allocation {}",
                    self.id
                )))
            }
        };
        Ok(Allocation {
            id: AllocationId::from(self.id),
            requester_id: RequesterId::from(self.requester_id),
            block_id: BlockId::from(self.capacity_block_id),
            kw: self.kw,
            status,
            created_at: self.created_at,
            ended_at: self.ended_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: Uuid,
    name: String,
    total_kw: Decimal,
    credit_rate_per_kwh: Decimal,
    status: String,
}

impl ProjectRow {
    fn into_project(self) -> Result<Project> {
        let status = match self.status.as_str() {
            "active" => ProjectStatus::Active,
            "inactive" => ProjectStatus::Inactive,
            other => {
                return Err(AllocationError::Store(anyhow::anyhow!(
                    "unknown project status {other:?} for project {}",
                    self.id
                )))
            }
        };
        Ok(Project {
            id: ProjectId::from(self.id),
            name: self.name,
            total_kw: self.total_kw,
            credit_rate_per_kwh: self.credit_rate_per_kwh,
            status,
        })
    }
}

#[async_trait]
impl BlockStore for PostgresStorage {
    #[instrument(skip_all, fields(project_id = %project_id), err)]
    async fn list_available(&self, project_id: ProjectId) -> Result<Vec<AvailableBlock>> {
        let rows = sqlx::query_as::<_, AvailableBlockRow>(
            r#"
            SELECT id, size_kw
            FROM capacity_blocks
            WHERE project_id = $1 AND status = 'available'
            ORDER BY created_at, id
            "#,
        )
        .bind(*project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|row| AvailableBlock {
                id: BlockId::from(row.id),
                size_kw: row.size_kw,
            })
            .collect())
    }

    #[instrument(skip_all, fields(block_id = %block_id), err)]
    async fn try_commit(&self, block_id: BlockId) -> Result<CommitOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE capacity_blocks
            SET status = 'allocated', allocated_at = now()
            WHERE id = $1 AND status = 'available'
            "#,
        )
        .bind(*block_id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        if result.rows_affected() > 0 {
            return Ok(CommitOutcome::Committed);
        }

        // Advisory disambiguation only; both outcomes are non-success.
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM capacity_blocks WHERE id = $1)")
                .bind(*block_id)
                .fetch_one(&self.pool)
                .await
                .map_err(store_err)?;

        Ok(if exists {
            CommitOutcome::AlreadyTaken
        } else {
            CommitOutcome::NotFound
        })
    }

    #[instrument(skip_all, fields(block_id = %block_id), err)]
    async fn release(&self, block_id: BlockId) -> Result<ReleaseOutcome> {
        let result = sqlx::query(
            r#"
            UPDATE capacity_blocks
            SET status = 'available', allocated_at = NULL
            WHERE id = $1 AND status = 'allocated'
            "#,
        )
        .bind(*block_id)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(if result.rows_affected() > 0 {
            ReleaseOutcome::Released
        } else {
            ReleaseOutcome::NotFound
        })
    }
}

#[async_trait]
impl AllocationRepository for PostgresStorage {
    #[instrument(skip_all, fields(requester_id = %requester_id, block_id = %block_id, kw = %kw), err)]
    async fn create(
        &self,
        requester_id: RequesterId,
        block_id: BlockId,
        kw: Decimal,
    ) -> Result<Allocation> {
        let row = sqlx::query_as::<_, AllocationRow>(
            r#"
            INSERT INTO allocations (requester_id, capacity_block_id, kw, status)
            VALUES ($1, $2, $3, 'active')
            RETURNING id, requester_id, capacity_block_id, kw, status, created_at, ended_at
            "#,
        )
        .bind(*requester_id)
        .bind(*block_id)
        .bind(kw)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                AllocationError::Conflict { block_id }
            }
            _ => store_err(err),
        })?;

        row.into_allocation()
    }

    #[instrument(skip_all, fields(allocation_id = %allocation_id), err)]
    async fn end(&self, allocation_id: AllocationId) -> Result<Allocation> {
        let row = sqlx::query_as::<_, AllocationRow>(
            r#"
            UPDATE allocations
            SET status = 'ended', ended_at = now()
            WHERE id = $1 AND status = 'active'
            RETURNING id, requester_id, capacity_block_id, kw, status, created_at, ended_at
            "#,
        )
        .bind(*allocation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        match row {
            Some(row) => row.into_allocation(),
            None => Err(AllocationError::AllocationNotFound { allocation_id }),
        }
    }

    #[instrument(skip_all, fields(allocation_id = %allocation_id), err)]
    async fn get(&self, allocation_id: AllocationId) -> Result<Option<Allocation>> {
        let row = sqlx::query_as::<_, AllocationRow>(
            r#"
            SELECT id, requester_id, capacity_block_id, kw, status, created_at, ended_at
            FROM allocations
            WHERE id = $1
            "#,
        )
        .bind(*allocation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(AllocationRow::into_allocation).transpose()
    }

    #[instrument(skip_all, fields(block_id = %block_id), err)]
    async fn active_for_block(&self, block_id: BlockId) -> Result<Option<Allocation>> {
        let row = sqlx::query_as::<_, AllocationRow>(
            r#"
            SELECT id, requester_id, capacity_block_id, kw, status, created_at, ended_at
            FROM allocations
            WHERE capacity_block_id = $1 AND status = 'active'
            "#,
        )
        .bind(*block_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(AllocationRow::into_allocation).transpose()
    }

    #[instrument(skip_all, fields(requester_id = %requester_id), err)]
    async fn list_for(&self, requester_id: RequesterId) -> Result<Vec<Allocation>> {
        let rows = sqlx::query_as::<_, AllocationRow>(
            r#"
            SELECT id, requester_id, capacity_block_id, kw, status, created_at, ended_at
            FROM allocations
            WHERE requester_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(*requester_id)
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter().map(AllocationRow::into_allocation).collect()
    }
}

#[async_trait]
impl ProjectRegistry for PostgresStorage {
    #[instrument(skip_all, fields(project_id = %project_id), err)]
    async fn get(&self, project_id: ProjectId) -> Result<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            r#"
            SELECT id, name, total_kw, credit_rate_per_kwh, status
            FROM projects
            WHERE id = $1
            "#,
        )
        .bind(*project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        row.map(ProjectRow::into_project).transpose()
    }
}
