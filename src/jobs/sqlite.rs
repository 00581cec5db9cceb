//! SQLite Job 台账（需要启用 `async-sqlite` feature）
//!
//! 进程重启后，未进入终态的 Job 可通过 list_unfinished 找回，交给 RunSupervisor 对账。

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::core::StoreError;
use crate::jobs::{Job, JobLedger, JobStage, JobStatus, JobUpdate};

const SELECT_COLUMNS: &str = "id, user_id, company_id, competency_target_name, job_type, status,
    progress, current_stage, result, error, created_at, updated_at";

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// 基于 sqlx 的持久化台账
pub struct SqliteJobLedger {
    pool: SqlitePool,
}

impl SqliteJobLedger {
    pub async fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.as_ref().display());
        let pool = SqlitePoolOptions::new()
            .max_connections(3)
            .connect(&db_url)
            .await
            .map_err(db_err)?;

        let ledger = Self { pool };
        ledger.init_tables().await?;
        Ok(ledger)
    }

    async fn init_tables(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                company_id TEXT NOT NULL,
                competency_target_name TEXT NOT NULL,
                job_type TEXT NOT NULL,
                status TEXT NOT NULL,
                progress INTEGER NOT NULL DEFAULT 0,
                current_stage TEXT,
                result TEXT,
                error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn write(&self, job: &Job) -> Result<(), StoreError> {
        let result = job.result.as_ref().map(|v| v.to_string());
        sqlx::query(
            "INSERT OR REPLACE INTO jobs
             (id, user_id, company_id, competency_target_name, job_type, status,
              progress, current_stage, result, error, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&job.id)
        .bind(&job.user_id)
        .bind(&job.company_id)
        .bind(&job.competency_target_name)
        .bind(&job.job_type)
        .bind(job.status.as_str())
        .bind(i64::from(job.progress))
        .bind(job.current_stage.map(JobStage::as_str))
        .bind(&result)
        .bind(&job.error)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

fn row_to_job(row: &SqliteRow) -> Result<Job, StoreError> {
    let status: String = row.try_get("status").map_err(db_err)?;
    let stage: Option<String> = row.try_get("current_stage").map_err(db_err)?;
    let result: Option<String> = row.try_get("result").map_err(db_err)?;
    let progress: i64 = row.try_get("progress").map_err(db_err)?;

    Ok(Job {
        id: row.try_get("id").map_err(db_err)?,
        user_id: row.try_get("user_id").map_err(db_err)?,
        company_id: row.try_get("company_id").map_err(db_err)?,
        competency_target_name: row.try_get("competency_target_name").map_err(db_err)?,
        job_type: row.try_get("job_type").map_err(db_err)?,
        status: JobStatus::parse(&status)
            .ok_or_else(|| StoreError::Backend(format!("unknown job status '{status}'")))?,
        progress: progress.clamp(0, 100) as u8,
        current_stage: stage.as_deref().and_then(JobStage::parse),
        result: result.map(|s| serde_json::from_str(&s)).transpose()?,
        error: row.try_get("error").map_err(db_err)?,
        created_at: row.try_get("created_at").map_err(db_err)?,
        updated_at: row.try_get("updated_at").map_err(db_err)?,
    })
}

#[async_trait]
impl JobLedger for SqliteJobLedger {
    async fn create(&self, job: Job) -> Result<Job, StoreError> {
        if self.get(&job.id).await?.is_some() {
            return Err(StoreError::Conflict(format!("job {} already exists", job.id)));
        }
        self.write(&job).await?;
        Ok(job)
    }

    async fn update(&self, id: &str, update: JobUpdate) -> Result<Job, StoreError> {
        let mut job = self
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("job {id}")))?;
        update.apply(&mut job);
        self.write(&job).await?;
        Ok(job)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, StoreError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(row_to_job).transpose()
    }

    async fn list_unfinished(&self) -> Result<Vec<Job>, StoreError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM jobs WHERE status IN ('pending', 'processing') ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        rows.iter().map(row_to_job).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sqlite_ledger_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");

        let job_id = {
            let ledger = SqliteJobLedger::open(&path).await.unwrap();
            let job = ledger.create(Job::new("u1", "c1", "Rust")).await.unwrap();
            ledger
                .update(
                    &job.id,
                    JobUpdate::stage(JobStage::SkillBreakdown, 50).with_status(JobStatus::Processing),
                )
                .await
                .unwrap();
            let other = ledger.create(Job::new("u2", "c1", "Go")).await.unwrap();
            ledger
                .update(&other.id, JobUpdate::completed(json!({"done": 1})))
                .await
                .unwrap();
            job.id
        };

        let ledger = SqliteJobLedger::open(&path).await.unwrap();
        let unfinished = ledger.list_unfinished().await.unwrap();
        assert_eq!(unfinished.len(), 1);
        assert_eq!(unfinished[0].id, job_id);
        assert_eq!(unfinished[0].progress, 50);
        assert_eq!(unfinished[0].current_stage, Some(JobStage::SkillBreakdown));
    }
}
