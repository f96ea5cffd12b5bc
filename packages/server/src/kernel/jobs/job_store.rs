//! Job store trait and its PostgreSQL implementation.
//!
//! The store is the single source of truth for job state. Every transition
//! is a conditional update on `state` (and `locked_by` for transitions made by
//! the claiming worker), so several workers or dispatcher processes can share
//! one store without double execution.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::error::{DispatchError, JobResult};
use super::job::{Job, JobState};

/// Trait for persisting and transitioning jobs.
///
/// Implementations decide how atomicity is achieved; the contract is that
/// every method that changes `state` only succeeds when the row is still in
/// the expected source state.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job.
    async fn insert(&self, job: Job) -> JobResult<Job>;

    async fn find_by_id(&self, id: Uuid) -> JobResult<Option<Job>>;

    /// Pending jobs with `scheduled_at <= now`, ordered by
    /// `(priority desc, scheduled_at asc)`, leaving out `skip_types`.
    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        skip_types: &[String],
    ) -> JobResult<Vec<Job>>;

    /// Atomically move a due pending job to running for `worker_id`.
    ///
    /// Returns [`DispatchError::ClaimConflict`] if the job is no longer pending.
    async fn claim(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> JobResult<Job>;

    /// running → completed. Returns false if `worker_id` no longer holds the job.
    async fn complete(&self, id: Uuid, worker_id: &str, now: DateTime<Utc>) -> JobResult<bool>;

    /// running → pending with `attempts + 1`, `last_error` and a new `scheduled_at`.
    async fn retry(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> JobResult<bool>;

    /// running → failed (terminal) with `attempts + 1` and `last_error`.
    async fn fail(&self, id: Uuid, worker_id: &str, error: &str, now: DateTime<Utc>)
        -> JobResult<bool>;

    /// Push `locked_until` forward while the handler is still running (heartbeat).
    async fn extend_lock(
        &self,
        id: Uuid,
        worker_id: &str,
        locked_until: DateTime<Utc>,
    ) -> JobResult<bool>;

    /// Reset running jobs whose lock expired before `now`.
    ///
    /// Each recovered job gets `attempts + 1`; it goes back to pending, or to
    /// failed if that exhausts `max_attempts`. Returns the updated jobs.
    async fn recover_expired(&self, now: DateTime<Utc>) -> JobResult<Vec<Job>>;

    async fn count_by_state(&self, job_type: &str, state: JobState) -> JobResult<i64>;

    /// Delete completed/failed jobs last touched before `older_than`.
    async fn purge_finished(&self, older_than: DateTime<Utc>) -> JobResult<u64>;
}

macro_rules! job_columns {
    () => {
        "id, job_type, payload, priority, state, scheduled_at, attempts, max_attempts, \
         last_error, locked_by, locked_until, completed_at, created_at, updated_at"
    };
}

/// PostgreSQL-backed job store.
#[derive(Debug, Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with a small pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> JobResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Run the embedded migrations that create the `jobs` table.
    pub async fn migrate(&self) -> JobResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DispatchError::StoreUnavailable(e.to_string()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert(&self, job: Job) -> JobResult<Job> {
        let job = sqlx::query_as::<_, Job>(concat!(
            r#"
            INSERT INTO jobs (
                id, job_type, payload, priority, state, scheduled_at, attempts, max_attempts,
                last_error, locked_by, locked_until, completed_at, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING "#,
            job_columns!()
        ))
        .bind(job.id)
        .bind(&job.job_type)
        .bind(&job.payload)
        .bind(job.priority)
        .bind(job.state)
        .bind(job.scheduled_at)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(&job.last_error)
        .bind(&job.locked_by)
        .bind(job.locked_until)
        .bind(job.completed_at)
        .bind(job.created_at)
        .bind(job.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(job)
    }

    async fn find_by_id(&self, id: Uuid) -> JobResult<Option<Job>> {
        let job = sqlx::query_as::<_, Job>(concat!(
            "SELECT ",
            job_columns!(),
            " FROM jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn find_due(
        &self,
        now: DateTime<Utc>,
        limit: i64,
        skip_types: &[String],
    ) -> JobResult<Vec<Job>> {
        // job_priority is declared high, normal, low so ascending order is highest first
        let jobs = sqlx::query_as::<_, Job>(concat!(
            "SELECT ",
            job_columns!(),
            r#"
            FROM jobs
            WHERE state = 'pending'
              AND scheduled_at <= $1
              AND NOT (job_type = ANY($3))
            ORDER BY priority, scheduled_at
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit)
        .bind(skip_types)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn claim(
        &self,
        id: Uuid,
        worker_id: &str,
        now: DateTime<Utc>,
        locked_until: DateTime<Utc>,
    ) -> JobResult<Job> {
        let claimed = sqlx::query_as::<_, Job>(concat!(
            r#"
            UPDATE jobs
            SET state = 'running',
                locked_by = $2,
                locked_until = $3,
                updated_at = $4
            WHERE id = $1
              AND state = 'pending'
              AND scheduled_at <= $4
            RETURNING "#,
            job_columns!()
        ))
        .bind(id)
        .bind(worker_id)
        .bind(locked_until)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        claimed.ok_or(DispatchError::ClaimConflict(id))
    }

    async fn complete(&self, id: Uuid, worker_id: &str, now: DateTime<Utc>) -> JobResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'completed',
                locked_by = NULL,
                locked_until = NULL,
                completed_at = $3,
                updated_at = $3
            WHERE id = $1 AND state = 'running' AND locked_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn retry(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        run_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> JobResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'pending',
                attempts = attempts + 1,
                last_error = $3,
                scheduled_at = $4,
                locked_by = NULL,
                locked_until = NULL,
                updated_at = $5
            WHERE id = $1 AND state = 'running' AND locked_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(error)
        .bind(run_at)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail(
        &self,
        id: Uuid,
        worker_id: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> JobResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'failed',
                attempts = attempts + 1,
                last_error = $3,
                locked_by = NULL,
                locked_until = NULL,
                completed_at = $4,
                updated_at = $4
            WHERE id = $1 AND state = 'running' AND locked_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn extend_lock(
        &self,
        id: Uuid,
        worker_id: &str,
        locked_until: DateTime<Utc>,
    ) -> JobResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET locked_until = $3,
                updated_at = NOW()
            WHERE id = $1 AND state = 'running' AND locked_by = $2
            "#,
        )
        .bind(id)
        .bind(worker_id)
        .bind(locked_until)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn recover_expired(&self, now: DateTime<Utc>) -> JobResult<Vec<Job>> {
        let jobs = sqlx::query_as::<_, Job>(concat!(
            r#"
            UPDATE jobs
            SET attempts = attempts + 1,
                state = CASE
                    WHEN attempts + 1 >= max_attempts THEN 'failed'::job_state
                    ELSE 'pending'::job_state
                END,
                completed_at = CASE WHEN attempts + 1 >= max_attempts THEN $1 ELSE NULL END,
                last_error = 'lock expired while running on ' || COALESCE(locked_by, 'unknown worker'),
                locked_by = NULL,
                locked_until = NULL,
                updated_at = $1
            WHERE state = 'running'
              AND locked_until < $1
            RETURNING "#,
            job_columns!()
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn count_by_state(&self, job_type: &str, state: JobState) -> JobResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM jobs WHERE job_type = $1 AND state = $2",
        )
        .bind(job_type)
        .bind(state)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn purge_finished(&self, older_than: DateTime<Utc>) -> JobResult<u64> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM jobs
            WHERE state IN ('completed', 'failed')
              AND updated_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(deleted)
    }
}
