//! Publish job repository.
//!
//! Every status transition is a single conditional `UPDATE` whose `WHERE`
//! clause re-checks the expected current status. Callers inspect the number
//! of affected rows to learn whether they won the transition.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{JobCounts, JobDbModel, JobFilters, NewJobDbModel};
use crate::database::retry::retry_on_sqlite_busy;

/// Job repository trait.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a pending job unless `(idempotency_key, channel)` already exists.
    ///
    /// Returns the stored row and whether this call created it.
    async fn insert_or_get(&self, job: &NewJobDbModel, now_ms: i64) -> Result<(JobDbModel, bool)>;
    async fn get_job(&self, id: i64) -> Result<Option<JobDbModel>>;
    async fn find_by_idempotency(&self, key: &str, channel: &str) -> Result<Option<JobDbModel>>;
    async fn list_due(&self, now_ms: i64, limit: u32) -> Result<Vec<JobDbModel>>;
    async fn running_counts(&self) -> Result<Vec<(String, i64)>>;
    async fn status_counts(&self) -> Result<JobCounts>;
    async fn list_page(
        &self,
        filters: &JobFilters,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<JobDbModel>, u64)>;

    /// `pending -> running`, incrementing `attempts`. `None` if no longer pending.
    async fn claim(&self, id: i64, now_ms: i64) -> Result<Option<JobDbModel>>;
    /// `running -> completed`. Returns affected rows.
    async fn complete(&self, id: i64, remote_id: Option<&str>, now_ms: i64) -> Result<u64>;
    /// `running -> pending` with a new `run_at`. Returns affected rows.
    async fn reschedule(&self, id: i64, run_at_ms: i64, error: &str, now_ms: i64) -> Result<u64>;
    /// `running -> failed`. Returns affected rows.
    async fn fail(&self, id: i64, error: &str, now_ms: i64) -> Result<u64>;
    /// Any non-pending status -> pending with `run_at = now`. `None` if nothing changed.
    async fn replay(&self, id: i64, now_ms: i64) -> Result<Option<JobDbModel>>;
    async fn set_child_job(&self, id: i64, child_job_id: i64, now_ms: i64) -> Result<u64>;
    /// Return `running` jobs not touched since `cutoff_ms` to `pending`.
    async fn requeue_stale_running(&self, cutoff_ms: i64, now_ms: i64) -> Result<u64>;
}

/// SQLx implementation of JobRepository.
pub struct SqlxJobRepository {
    pool: SqlitePool,
}

impl SqlxJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn where_clause(filters: &JobFilters) -> String {
    let mut conditions: Vec<&str> = Vec::new();
    if filters.channel.is_some() {
        conditions.push("channel = ?");
    }
    if filters.status.is_some() {
        conditions.push("status = ?");
    }
    if filters.search.is_some() {
        conditions.push("instr(idempotency_key, ?) > 0");
    }

    if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn insert_or_get(&self, job: &NewJobDbModel, now_ms: i64) -> Result<(JobDbModel, bool)> {
        let inserted = retry_on_sqlite_busy("insert_job", move || async move {
            let result = sqlx::query(
                r#"
                INSERT INTO publish_jobs
                    (channel, payload, status, run_at, attempts, idempotency_key,
                     child_job_id, created_at, updated_at)
                VALUES (?, ?, 'pending', ?, 0, ?, ?, ?, ?)
                ON CONFLICT(idempotency_key, channel) DO NOTHING
                "#,
            )
            .bind(&job.channel)
            .bind(&job.payload)
            .bind(job.run_at)
            .bind(&job.idempotency_key)
            .bind(job.child_job_id)
            .bind(now_ms)
            .bind(now_ms)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected() == 1)
        })
        .await?;

        let row = self
            .find_by_idempotency(&job.idempotency_key, &job.channel)
            .await?
            .ok_or_else(|| {
                crate::Error::Database(format!(
                    "job ({}, {}) missing right after insert",
                    job.idempotency_key, job.channel
                ))
            })?;

        Ok((row, inserted))
    }

    async fn get_job(&self, id: i64) -> Result<Option<JobDbModel>> {
        let job = sqlx::query_as::<_, JobDbModel>("SELECT * FROM publish_jobs WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn find_by_idempotency(&self, key: &str, channel: &str) -> Result<Option<JobDbModel>> {
        let job = sqlx::query_as::<_, JobDbModel>(
            "SELECT * FROM publish_jobs WHERE idempotency_key = ? AND channel = ?",
        )
        .bind(key)
        .bind(channel)
        .fetch_optional(&self.pool)
        .await?;
        Ok(job)
    }

    async fn list_due(&self, now_ms: i64, limit: u32) -> Result<Vec<JobDbModel>> {
        let jobs = sqlx::query_as::<_, JobDbModel>(
            r#"
            SELECT * FROM publish_jobs
            WHERE status = 'pending' AND run_at <= ?
            ORDER BY run_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(now_ms)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(jobs)
    }

    async fn running_counts(&self) -> Result<Vec<(String, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT channel, COUNT(*) FROM publish_jobs WHERE status = 'running' GROUP BY channel",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn status_counts(&self) -> Result<JobCounts> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM publish_jobs GROUP BY status",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = JobCounts::default();
        for (status, count) in rows {
            let count = count.max(0) as u64;
            match status.as_str() {
                "pending" => counts.pending = count,
                "running" => counts.running = count,
                "completed" => counts.completed = count,
                "failed" => counts.failed = count,
                _ => {}
            }
        }
        Ok(counts)
    }

    async fn list_page(
        &self,
        filters: &JobFilters,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<JobDbModel>, u64)> {
        let where_clause = where_clause(filters);

        let count_sql = format!("SELECT COUNT(*) FROM publish_jobs {}", where_clause);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        if let Some(channel) = &filters.channel {
            count_query = count_query.bind(channel);
        }
        if let Some(status) = filters.status {
            count_query = count_query.bind(status.as_str());
        }
        if let Some(search) = &filters.search {
            count_query = count_query.bind(search);
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let sql = format!(
            "SELECT * FROM publish_jobs {} ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?",
            where_clause
        );
        let mut query = sqlx::query_as::<_, JobDbModel>(&sql);
        if let Some(channel) = &filters.channel {
            query = query.bind(channel);
        }
        if let Some(status) = filters.status {
            query = query.bind(status.as_str());
        }
        if let Some(search) = &filters.search {
            query = query.bind(search);
        }
        let jobs = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;

        Ok((jobs, total.max(0) as u64))
    }

    async fn claim(&self, id: i64, now_ms: i64) -> Result<Option<JobDbModel>> {
        retry_on_sqlite_busy("claim_job", move || async move {
            let job = sqlx::query_as::<_, JobDbModel>(
                r#"
                UPDATE publish_jobs
                SET status = 'running', attempts = attempts + 1, updated_at = ?
                WHERE id = ? AND status = 'pending'
                RETURNING *
                "#,
            )
            .bind(now_ms)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(job)
        })
        .await
    }

    async fn complete(&self, id: i64, remote_id: Option<&str>, now_ms: i64) -> Result<u64> {
        retry_on_sqlite_busy("complete_job", move || async move {
            let result = sqlx::query(
                r#"
                UPDATE publish_jobs
                SET status = 'completed', remote_id = ?, error = NULL, updated_at = ?
                WHERE id = ? AND status = 'running'
                "#,
            )
            .bind(remote_id)
            .bind(now_ms)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn reschedule(&self, id: i64, run_at_ms: i64, error: &str, now_ms: i64) -> Result<u64> {
        retry_on_sqlite_busy("reschedule_job", move || async move {
            let result = sqlx::query(
                r#"
                UPDATE publish_jobs
                SET status = 'pending', run_at = ?, error = ?, updated_at = ?
                WHERE id = ? AND status = 'running'
                "#,
            )
            .bind(run_at_ms)
            .bind(error)
            .bind(now_ms)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn fail(&self, id: i64, error: &str, now_ms: i64) -> Result<u64> {
        retry_on_sqlite_busy("fail_job", move || async move {
            let result = sqlx::query(
                r#"
                UPDATE publish_jobs
                SET status = 'failed', error = ?, updated_at = ?
                WHERE id = ? AND status = 'running'
                "#,
            )
            .bind(error)
            .bind(now_ms)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn replay(&self, id: i64, now_ms: i64) -> Result<Option<JobDbModel>> {
        retry_on_sqlite_busy("replay_job", move || async move {
            let job = sqlx::query_as::<_, JobDbModel>(
                r#"
                UPDATE publish_jobs
                SET status = 'pending', run_at = ?, updated_at = ?
                WHERE id = ? AND status != 'pending'
                RETURNING *
                "#,
            )
            .bind(now_ms)
            .bind(now_ms)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(job)
        })
        .await
    }

    async fn set_child_job(&self, id: i64, child_job_id: i64, now_ms: i64) -> Result<u64> {
        retry_on_sqlite_busy("set_child_job", move || async move {
            let result = sqlx::query(
                "UPDATE publish_jobs SET child_job_id = ?, updated_at = ? WHERE id = ?",
            )
            .bind(child_job_id)
            .bind(now_ms)
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn requeue_stale_running(&self, cutoff_ms: i64, now_ms: i64) -> Result<u64> {
        retry_on_sqlite_busy("requeue_stale_running", move || async move {
            let result = sqlx::query(
                r#"
                UPDATE publish_jobs
                SET status = 'pending', run_at = ?, updated_at = ?
                WHERE status = 'running' AND updated_at < ?
                "#,
            )
            .bind(now_ms)
            .bind(now_ms)
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }
}
