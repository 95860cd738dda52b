//! SQLite-backed job store.
//!
//! All mutations are single short transactions; the scheduler is the only
//! writer after the initial insert, so single-row updates need no extra
//! locking discipline.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use tracing::info;

use crate::models::{JobRecord, JobWithMedia, MediaRecord, MediaStatus, NewJob, QueuedMedia};

/// Database file name inside the configured database directory.
pub const DB_FILE_NAME: &str = "sqlite_job_cache_docker.db";

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS job (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        name         TEXT NOT NULL,
        engine       TEXT NOT NULL,
        model        TEXT NOT NULL,
        args         TEXT,
        metadata_b64 TEXT,
        job_type     TEXT NOT NULL DEFAULT 'DOCKER',
        created_at   TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS media (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        job_id       INTEGER NOT NULL REFERENCES job(id) ON DELETE CASCADE,
        name         TEXT NOT NULL,
        status       TEXT NOT NULL,
        metadata_b64 TEXT,
        updated_at   TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_media_status ON media(status, id)",
];

#[derive(Clone)]
pub struct JobStore {
    pool: Pool<Sqlite>,
}

impl JobStore {
    /// Open (creating if needed) the store in the given directory.
    pub async fn open(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create database directory {}", dir.display()))?;
        let db_path = dir.join(DB_FILE_NAME);
        info!("Opening job store at {}", db_path.display());

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database {}", db_path.display()))?;

        for statement in SCHEMA {
            sqlx::query(statement).execute(&pool).await?;
        }
        Ok(Self { pool })
    }

    /// Cheap connectivity probe for the health endpoint.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    /// Insert a job and its QUEUED media rows in one transaction.
    pub async fn insert_job(&self, new: NewJob) -> Result<JobWithMedia> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let job_id = sqlx::query(
            r#"
            INSERT INTO job (name, engine, model, args, metadata_b64, job_type, created_at)
            VALUES (?, ?, ?, ?, ?, 'DOCKER', ?)
            "#,
        )
        .bind(&new.name)
        .bind(&new.engine)
        .bind(&new.model)
        .bind(&new.args)
        .bind(&new.metadata_b64)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        for video in &new.videos {
            sqlx::query(
                r#"
                INSERT INTO media (job_id, name, status, metadata_b64, updated_at)
                VALUES (?, ?, 'QUEUED', NULL, ?)
                "#,
            )
            .bind(job_id)
            .bind(video)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("Inserted job {} '{}'", job_id, new.name);

        self.job_by_id(job_id)
            .await?
            .context("Job vanished immediately after insert")
    }

    pub async fn job_by_id(&self, id: i64) -> Result<Option<JobWithMedia>> {
        let job: Option<JobRecord> = sqlx::query_as("SELECT * FROM job WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        self.attach_media(job).await
    }

    /// First job with the given name. Names are not unique; the id is the
    /// identity and first-match mirrors lookup-by-name semantics.
    pub async fn job_by_name(&self, name: &str) -> Result<Option<JobWithMedia>> {
        let job: Option<JobRecord> =
            sqlx::query_as("SELECT * FROM job WHERE name = ? ORDER BY id ASC LIMIT 1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        self.attach_media(job).await
    }

    async fn attach_media(&self, job: Option<JobRecord>) -> Result<Option<JobWithMedia>> {
        let Some(job) = job else {
            return Ok(None);
        };
        let media: Vec<MediaRecord> =
            sqlx::query_as("SELECT * FROM media WHERE job_id = ? ORDER BY id ASC")
                .bind(job.id)
                .fetch_all(&self.pool)
                .await?;
        Ok(Some(JobWithMedia { job, media }))
    }

    /// All jobs with their media, oldest first.
    pub async fn list_jobs(&self) -> Result<Vec<JobWithMedia>> {
        let jobs: Vec<JobRecord> =
            sqlx::query_as("SELECT * FROM job WHERE job_type = 'DOCKER' ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;
        let media: Vec<MediaRecord> = sqlx::query_as(
            "SELECT media.* FROM media JOIN job ON job.id = media.job_id \
             WHERE job.job_type = 'DOCKER' ORDER BY media.id ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut result: Vec<JobWithMedia> = jobs
            .into_iter()
            .map(|job| JobWithMedia { job, media: Vec::new() })
            .collect();
        for row in media {
            if let Some(entry) = result.iter_mut().find(|j| j.job.id == row.job_id) {
                entry.media.push(row);
            }
        }
        Ok(result)
    }

    /// The media row at the head of the FIFO queue, with its parent job.
    pub async fn oldest_queued_media(&self) -> Result<Option<QueuedMedia>> {
        let media: Option<MediaRecord> = sqlx::query_as(
            "SELECT * FROM media WHERE status = 'QUEUED' ORDER BY id ASC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        let Some(media) = media else {
            return Ok(None);
        };
        let job: JobRecord = sqlx::query_as("SELECT * FROM job WHERE id = ?")
            .bind(media.job_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(Some(QueuedMedia { media, job }))
    }

    /// Promote a QUEUED media to RUNNING. Returns false when the row was no
    /// longer queued, so a promotion can never resurrect a terminal row.
    pub async fn mark_media_running(&self, media_id: i64) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE media SET status = 'RUNNING', updated_at = ? \
             WHERE id = ? AND status = 'QUEUED'",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(media_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows > 0)
    }

    /// Write a status (and optionally merged metadata) to a non-terminal
    /// media row. Terminal rows are left untouched.
    pub async fn update_media(
        &self,
        media_id: i64,
        status: MediaStatus,
        metadata_b64: Option<&str>,
    ) -> Result<bool> {
        let rows = sqlx::query(
            "UPDATE media SET status = ?, metadata_b64 = COALESCE(?, metadata_b64), updated_at = ? \
             WHERE id = ? AND status NOT IN ('SUCCESS', 'FAILED')",
        )
        .bind(status.as_str())
        .bind(metadata_b64)
        .bind(Utc::now().to_rfc3339())
        .bind(media_id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows > 0 {
            info!("Media {} -> {}", media_id, status.as_str());
        }
        Ok(rows > 0)
    }

    /// Startup reconciliation: a RUNNING row cannot have survived a restart.
    /// Returns the ids of the rows that were failed.
    pub async fn fail_running_media(&self) -> Result<Vec<i64>> {
        let ids: Vec<i64> =
            sqlx::query_scalar("SELECT id FROM media WHERE status = 'RUNNING' ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;
        if ids.is_empty() {
            return Ok(ids);
        }

        sqlx::query("UPDATE media SET status = 'FAILED', updated_at = ? WHERE status = 'RUNNING'")
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await?;
        info!("Reset {} orphaned RUNNING media to FAILED", ids.len());
        Ok(ids)
    }

    /// Admin purge. Media rows cascade with the job.
    pub async fn delete_job(&self, job_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM job WHERE id = ?")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::derive_status;

    async fn open_store() -> (tempfile::TempDir, JobStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    fn new_job(name: &str, video: &str) -> NewJob {
        NewJob {
            name: name.to_string(),
            engine: "mbari/strongsort-yolov5:latest".to_string(),
            model: "s3://test/models/yolov5s.pt".to_string(),
            args: None,
            metadata_b64: None,
            videos: vec![video.to_string()],
        }
    }

    #[tokio::test]
    async fn insert_yields_queued_job() {
        let (_dir, store) = open_store().await;
        let job = store
            .insert_job(new_job("dive 1", "http://localhost:8090/v1.mp4"))
            .await
            .unwrap();

        assert_eq!(job.media.len(), 1);
        assert_eq!(job.status(), MediaStatus::Queued);
        assert_eq!(job.media[0].name, "http://localhost:8090/v1.mp4");

        let fetched = store.job_by_id(job.job.id).await.unwrap().unwrap();
        assert_eq!(fetched.job.name, "dive 1");
        assert_eq!(fetched.status(), MediaStatus::Queued);
    }

    #[tokio::test]
    async fn lookup_by_name_returns_first_match() {
        let (_dir, store) = open_store().await;
        let first = store.insert_job(new_job("same name", "http://a/1.mp4")).await.unwrap();
        store.insert_job(new_job("same name", "http://a/2.mp4")).await.unwrap();

        let found = store.job_by_name("same name").await.unwrap().unwrap();
        assert_eq!(found.job.id, first.job.id);
        assert!(store.job_by_name("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn queue_pops_in_insertion_order() {
        let (_dir, store) = open_store().await;
        let a = store.insert_job(new_job("a", "http://a/a.mp4")).await.unwrap();
        let b = store.insert_job(new_job("b", "http://a/b.mp4")).await.unwrap();

        let head = store.oldest_queued_media().await.unwrap().unwrap();
        assert_eq!(head.job.id, a.job.id);

        assert!(store.mark_media_running(head.media.id).await.unwrap());
        let head = store.oldest_queued_media().await.unwrap().unwrap();
        assert_eq!(head.job.id, b.job.id);
    }

    #[tokio::test]
    async fn promotion_requires_queued() {
        let (_dir, store) = open_store().await;
        let job = store.insert_job(new_job("a", "http://a/a.mp4")).await.unwrap();
        let media_id = job.media[0].id;

        assert!(store.mark_media_running(media_id).await.unwrap());
        // Second promotion is a no-op: the row is no longer QUEUED.
        assert!(!store.mark_media_running(media_id).await.unwrap());
    }

    #[tokio::test]
    async fn terminal_rows_never_move_back() {
        let (_dir, store) = open_store().await;
        let job = store.insert_job(new_job("a", "http://a/a.mp4")).await.unwrap();
        let media_id = job.media[0].id;

        store.mark_media_running(media_id).await.unwrap();
        assert!(store
            .update_media(media_id, MediaStatus::Failed, None)
            .await
            .unwrap());

        assert!(!store
            .update_media(media_id, MediaStatus::Running, None)
            .await
            .unwrap());
        assert!(!store.mark_media_running(media_id).await.unwrap());

        let job = store.job_by_id(job.job.id).await.unwrap().unwrap();
        assert_eq!(job.status(), MediaStatus::Failed);
    }

    #[tokio::test]
    async fn success_carries_result_metadata() {
        let (_dir, store) = open_store().await;
        let job = store.insert_job(new_job("a", "http://a/a.mp4")).await.unwrap();
        let media_id = job.media[0].id;
        store.mark_media_running(media_id).await.unwrap();

        let enriched = crate::metadata::encode_metadata(&serde_json::json!({
            "s3_path": "s3://test/tracks/20230101T000000Z/output/a.tracks.tar.gz",
            "num_tracks": 12,
            "processing_time_secs": 42.0,
        }))
        .unwrap();
        store
            .update_media(media_id, MediaStatus::Success, Some(&enriched))
            .await
            .unwrap();

        let job = store.job_by_id(job.job.id).await.unwrap().unwrap();
        assert_eq!(job.status(), MediaStatus::Success);
        let decoded =
            crate::metadata::decode_metadata(job.media[0].metadata_b64.as_deref()).unwrap();
        assert_eq!(decoded["num_tracks"], 12);
    }

    #[tokio::test]
    async fn crash_reset_fails_running_media() {
        let (_dir, store) = open_store().await;
        let a = store.insert_job(new_job("a", "http://a/a.mp4")).await.unwrap();
        let b = store.insert_job(new_job("b", "http://a/b.mp4")).await.unwrap();
        store.mark_media_running(a.media[0].id).await.unwrap();

        let reset = store.fail_running_media().await.unwrap();
        assert_eq!(reset, vec![a.media[0].id]);

        let a = store.job_by_id(a.job.id).await.unwrap().unwrap();
        let b = store.job_by_id(b.job.id).await.unwrap().unwrap();
        assert_eq!(a.status(), MediaStatus::Failed);
        assert_eq!(b.status(), MediaStatus::Queued);
    }

    #[tokio::test]
    async fn delete_cascades_to_media() {
        let (_dir, store) = open_store().await;
        let job = store.insert_job(new_job("a", "http://a/a.mp4")).await.unwrap();
        store.delete_job(job.job.id).await.unwrap();

        assert!(store.job_by_id(job.job.id).await.unwrap().is_none());
        assert!(store.oldest_queued_media().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_jobs_groups_media() {
        let (_dir, store) = open_store().await;
        store.insert_job(new_job("a", "http://a/a.mp4")).await.unwrap();
        store.insert_job(new_job("b", "http://a/b.mp4")).await.unwrap();

        let jobs = store.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.media.len() == 1));
        assert_eq!(
            derive_status(&jobs[0].media.iter().map(|m| m.status).collect::<Vec<_>>()),
            MediaStatus::Queued
        );
    }
}
