//! PostgreSQL-backed job store.

use async_trait::async_trait;
use sqlx::PgPool;

use super::error::JobError;
use super::job::{Job, NewJob};
use super::store::JobStore;

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(&self, new_job: NewJob) -> Result<Job, JobError> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (name, job_type, campaign_id, status, params)
            VALUES ($1, $2, $3, 'pending', $4)
            RETURNING *
            "#,
        )
        .bind(&new_job.name)
        .bind(new_job.job_type)
        .bind(new_job.campaign_id)
        .bind(&new_job.params)
        .fetch_one(&self.pool)
        .await?;

        Ok(job)
    }

    async fn get(&self, job_id: i64) -> Result<Job, JobError> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        job.ok_or(JobError::NotFound(job_id))
    }

    async fn claim_ready(&self, worker_id: &str, limit: i64) -> Result<Vec<Job>, JobError> {
        let jobs = sqlx::query_as::<_, Job>(
            r#"
            WITH next_jobs AS (
                SELECT id
                FROM jobs
                WHERE status = 'pending'
                ORDER BY created_at
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'processing',
                task_handle = $2 || ':' || gen_random_uuid(),
                updated_at = NOW()
            WHERE id IN (SELECT id FROM next_jobs)
            RETURNING *
            "#,
        )
        .bind(limit)
        .bind(worker_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(jobs)
    }

    async fn start(&self, job_id: i64, task_handle: &str) -> Result<Job, JobError> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'processing',
                task_handle = COALESCE(task_handle, $2),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            RETURNING *
            "#,
        )
        .bind(job_id)
        .bind(task_handle)
        .fetch_optional(&self.pool)
        .await?;

        match job {
            Some(job) => Ok(job),
            None => {
                let current = self.get(job_id).await?;
                Err(JobError::InvalidTransition {
                    action: "start",
                    status: current.status,
                })
            }
        }
    }

    async fn complete(&self, job_id: i64, result: &str) -> Result<bool, JobError> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                result = $2,
                error = NULL,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .bind(result)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    async fn fail(&self, job_id: i64, error: &str) -> Result<bool, JobError> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'failed',
                error = $2,
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    async fn cancel(&self, job_id: i64) -> Result<Job, JobError> {
        let job = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'cancelled',
                completed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND status IN ('pending', 'processing')
            RETURNING *
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        match job {
            Some(job) => Ok(job),
            None => {
                let current = self.get(job_id).await?;
                Err(JobError::InvalidTransition {
                    action: "cancel",
                    status: current.status,
                })
            }
        }
    }
}
