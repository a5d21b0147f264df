//! Metadata storage using SQLite
//!
//! This module handles all persisted state of the ingestion engine:
//! - Knowledge sources and their processing status
//! - Documents (chunks of crawled pages, optionally embedded)
//! - Processing logs (append-only audit trail per source)

mod schema;

pub use schema::*;

use crate::config::Config;
use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Lifecycle status of a knowledge source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl SourceStatus {
    pub const ALL: [SourceStatus; 4] = [
        SourceStatus::Pending,
        SourceStatus::Processing,
        SourceStatus::Completed,
        SourceStatus::Failed,
    ];

    pub fn is_terminal(&self) -> bool {
        matches!(self, SourceStatus::Completed | SourceStatus::Failed)
    }

    /// Transitions the pipeline itself may perform.
    ///
    /// Re-entering `processing` from a terminal state is an explicit reset
    /// request; administrative overrides bypass this check entirely.
    pub fn can_transition_to(&self, next: SourceStatus) -> bool {
        matches!(
            (self, next),
            (SourceStatus::Pending, SourceStatus::Processing)
                | (SourceStatus::Processing, SourceStatus::Completed)
                | (SourceStatus::Processing, SourceStatus::Failed)
                | (SourceStatus::Completed, SourceStatus::Processing)
                | (SourceStatus::Failed, SourceStatus::Processing)
        )
    }
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceStatus::Pending => write!(f, "pending"),
            SourceStatus::Processing => write!(f, "processing"),
            SourceStatus::Completed => write!(f, "completed"),
            SourceStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for SourceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(SourceStatus::Pending),
            "processing" => Ok(SourceStatus::Processing),
            "completed" => Ok(SourceStatus::Completed),
            "failed" => Ok(SourceStatus::Failed),
            _ => Err(Error::InvalidStatus(s.to_string())),
        }
    }
}

/// Severity of a processing log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(Error::Other(format!("Unknown log level: {}", s))),
        }
    }
}

/// A website registered for crawling into an agent's knowledge base
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeSource {
    pub id: String,
    pub agent_id: String,
    pub name: String,
    pub url: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl KnowledgeSource {
    pub fn new(agent_id: String, name: String, url: String) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: Uuid::new_v4().to_string(),
            agent_id,
            name,
            url,
            status: SourceStatus::Pending.to_string(),
            run_id: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn get_status(&self) -> Result<SourceStatus> {
        self.status.parse()
    }

    pub fn updated_at_utc(&self) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| Error::Other(format!("Invalid timestamp '{}': {}", self.updated_at, e)))
    }

    /// Whole minutes elapsed since the last status change or progress
    pub fn minutes_since_update(&self, now: DateTime<Utc>) -> Result<i64> {
        Ok((now - self.updated_at_utc()?).num_minutes())
    }

    /// `processing` with no update for longer than `threshold_minutes`
    pub fn is_stuck_at(&self, now: DateTime<Utc>, threshold_minutes: i64) -> Result<bool> {
        if self.get_status()? != SourceStatus::Processing {
            return Ok(false);
        }
        Ok(now - self.updated_at_utc()? > Duration::minutes(threshold_minutes))
    }
}

/// A chunk of a crawled page, optionally carrying its embedding
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub source_id: String,
    pub url: String,
    pub title: String,
    pub content: String,
    pub chunk_index: i64,
    pub content_hash: String,
    /// JSON-encoded vector
    pub embedding: Option<String>,
    pub created_at: String,
}

impl Document {
    pub fn new(
        source_id: String,
        url: String,
        title: String,
        content: String,
        chunk_index: i64,
        content_hash: String,
        embedding: Option<&[f32]>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source_id,
            url,
            title,
            content,
            chunk_index,
            content_hash,
            embedding: embedding.map(|v| serde_json::to_string(v).unwrap_or_default()),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn embedding_vector(&self) -> Option<Vec<f32>> {
        self.embedding
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
    }
}

/// A persisted processing log row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingLog {
    pub id: String,
    #[serde(skip)]
    pub seq: i64,
    pub knowledge_source_id: String,
    pub level: String,
    pub step: String,
    pub message: String,
    pub details: Option<String>,
    pub url: Option<String>,
    pub progress: Option<i64>,
    pub created_at: String,
}

impl ProcessingLog {
    pub fn get_level(&self) -> Result<LogLevel> {
        self.level.parse()
    }
}

/// A log entry about to be appended
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub level: LogLevel,
    pub step: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub url: Option<String>,
    pub progress: Option<i64>,
}

impl LogEntry {
    pub fn new(level: LogLevel, step: &str, message: impl Into<String>) -> Self {
        Self {
            level,
            step: step.to_string(),
            message: message.into(),
            details: None,
            url: None,
            progress: None,
        }
    }

    pub fn info(step: &str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, step, message)
    }

    pub fn warn(step: &str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warn, step, message)
    }

    pub fn error(step: &str, message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, step, message)
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_progress(mut self, progress: i64) -> Self {
        self.progress = Some(progress.clamp(0, 100));
        self
    }
}

/// Metadata database handle
#[derive(Clone)]
pub struct MetaDb {
    pool: SqlitePool,
}

impl MetaDb {
    /// Connect to the database configured in `config.paths`
    pub async fn connect(config: &Config) -> Result<Self> {
        Self::open(&config.paths.db_file).await
    }

    /// Open (creating if needed) the database at `db_path` and ensure the schema
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(10));

        debug!("Connecting to SQLite database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        debug!("Initializing database schema");
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    // ===== Knowledge Source Operations =====

    /// Insert a new knowledge source
    pub async fn insert_source(&self, source: &KnowledgeSource) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO knowledge_sources (id, agent_id, name, url, status, run_id, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&source.id)
        .bind(&source.agent_id)
        .bind(&source.name)
        .bind(&source.url)
        .bind(&source.status)
        .bind(&source.run_id)
        .bind(&source.created_at)
        .bind(&source.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get source by ID
    pub async fn get_source(&self, id: &str) -> Result<Option<KnowledgeSource>> {
        let source =
            sqlx::query_as::<_, KnowledgeSource>("SELECT * FROM knowledge_sources WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(source)
    }

    /// List sources, optionally restricted to one agent
    pub async fn list_sources(&self, agent_id: Option<&str>) -> Result<Vec<KnowledgeSource>> {
        let sources = match agent_id {
            Some(agent) => {
                sqlx::query_as::<_, KnowledgeSource>(
                    "SELECT * FROM knowledge_sources WHERE agent_id = ? ORDER BY created_at DESC",
                )
                .bind(agent)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, KnowledgeSource>(
                    "SELECT * FROM knowledge_sources ORDER BY created_at DESC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(sources)
    }

    /// Delete a source together with its documents and logs
    pub async fn delete_source(&self, id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM documents WHERE source_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM processing_logs WHERE knowledge_source_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM knowledge_sources WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Atomically move a source into `processing` for `run_id`.
    ///
    /// Only statuses that may enter `processing` are claimed; the documents
    /// of the previous run are dropped in the same transaction. Returns
    /// `false` when the source is already processing, and then nothing is
    /// written.
    pub async fn claim_source(&self, id: &str, run_id: &str, entry: &LogEntry) -> Result<bool> {
        let claimable: Vec<String> = SourceStatus::ALL
            .iter()
            .filter(|s| s.can_transition_to(SourceStatus::Processing))
            .map(|s| s.to_string())
            .collect();
        let placeholders = vec!["?"; claimable.len()].join(", ");
        let sql = format!(
            "UPDATE knowledge_sources SET status = 'processing', run_id = ?, updated_at = ? \
             WHERE id = ? AND status IN ({})",
            placeholders
        );

        let mut tx = self.pool.begin().await?;

        let mut query = sqlx::query(&sql)
            .bind(run_id)
            .bind(Utc::now().to_rfc3339())
            .bind(id);
        for status in &claimable {
            query = query.bind(status);
        }
        let result = query.execute(&mut *tx).await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        let replaced = sqlx::query("DELETE FROM documents WHERE source_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        if replaced.rows_affected() > 0 {
            debug!(
                "Dropped {} document(s) of the previous run of {}",
                replaced.rows_affected(),
                id
            );
        }

        insert_log(&mut *tx, id, entry).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Write the terminal status of `run_id` together with its final log entry.
    ///
    /// Returns `false` if the run no longer owns the source (reset or deleted).
    pub async fn finish_run(
        &self,
        id: &str,
        run_id: &str,
        status: SourceStatus,
        entry: &LogEntry,
    ) -> Result<bool> {
        if !SourceStatus::Processing.can_transition_to(status) {
            return Err(Error::InvalidStatus(format!(
                "a run cannot finish as {}",
                status
            )));
        }

        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE knowledge_sources
            SET status = ?, updated_at = ?
            WHERE id = ? AND run_id = ? AND status = 'processing'
            "#,
        )
        .bind(status.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(run_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_log(&mut *tx, id, entry).await?;
        tx.commit().await?;
        Ok(true)
    }

    /// Record forward progress of `run_id`.
    ///
    /// Returns `false` if the run no longer owns the source.
    pub async fn touch_run(&self, id: &str, run_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE knowledge_sources SET updated_at = ?
            WHERE id = ? AND run_id = ? AND status = 'processing'
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Administrative status override; releases any running claim
    pub async fn set_status(&self, id: &str, status: SourceStatus, entry: &LogEntry) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE knowledge_sources SET status = ?, run_id = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(status.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() != 1 {
            tx.rollback().await?;
            return Ok(false);
        }

        insert_log(&mut *tx, id, entry).await?;
        tx.commit().await?;
        info!("Status of {} reset to {}", id, status);
        Ok(true)
    }

    // ===== Document Operations =====

    /// Insert all documents of one page atomically
    pub async fn insert_documents(&self, docs: &[Document]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for doc in docs {
            sqlx::query(
                r#"
                INSERT INTO documents (id, source_id, url, title, content, chunk_index, content_hash, embedding, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&doc.id)
            .bind(&doc.source_id)
            .bind(&doc.url)
            .bind(&doc.title)
            .bind(&doc.content)
            .bind(doc.chunk_index)
            .bind(&doc.content_hash)
            .bind(&doc.embedding)
            .bind(&doc.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Get all documents of a source
    pub async fn get_documents(&self, source_id: &str) -> Result<Vec<Document>> {
        let docs = sqlx::query_as::<_, Document>(
            "SELECT * FROM documents WHERE source_id = ? ORDER BY created_at, url, chunk_index",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(docs)
    }

    /// Count documents of a source
    pub async fn count_documents(&self, source_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM documents WHERE source_id = ?")
            .bind(source_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    /// Count documents of a source that carry an embedding
    pub async fn count_embedded_documents(&self, source_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM documents WHERE source_id = ? AND embedding IS NOT NULL",
        )
        .bind(source_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // ===== Processing Log Operations =====

    /// Append a log entry for a source
    pub async fn append_log(&self, source_id: &str, entry: &LogEntry) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_log(&mut *conn, source_id, entry).await
    }

    /// All logs of a source in the order they were written
    pub async fn get_logs(&self, source_id: &str) -> Result<Vec<ProcessingLog>> {
        let logs = sqlx::query_as::<_, ProcessingLog>(
            "SELECT * FROM processing_logs WHERE knowledge_source_id = ? ORDER BY seq",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    /// Most recent error-level logs, newest first
    pub async fn recent_errors(&self, source_id: &str, limit: usize) -> Result<Vec<ProcessingLog>> {
        let logs = sqlx::query_as::<_, ProcessingLog>(
            r#"
            SELECT * FROM processing_logs
            WHERE knowledge_source_id = ? AND level = 'error'
            ORDER BY seq DESC
            LIMIT ?
            "#,
        )
        .bind(source_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    /// Number of log rows per step for the latest run of a source.
    ///
    /// A run starts at its `processing_started` row; without one every row
    /// counts.
    pub async fn count_logs_by_step(
        &self,
        source_id: &str,
        run_start_step: &str,
    ) -> Result<HashMap<String, i64>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT step, COUNT(*) FROM processing_logs
            WHERE knowledge_source_id = ?
              AND seq >= COALESCE(
                  (SELECT MAX(seq) FROM processing_logs
                   WHERE knowledge_source_id = ? AND step = ?),
                  0)
            GROUP BY step
            "#,
        )
        .bind(source_id)
        .bind(source_id)
        .bind(run_start_step)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().collect())
    }
}

async fn insert_log(
    conn: &mut sqlx::SqliteConnection,
    source_id: &str,
    entry: &LogEntry,
) -> Result<()> {
    let details = entry
        .details
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    sqlx::query(
        r#"
        INSERT INTO processing_logs
            (id, seq, knowledge_source_id, level, step, message, details, url, progress, created_at)
        VALUES (
            ?,
            (SELECT COALESCE(MAX(seq), 0) + 1 FROM processing_logs WHERE knowledge_source_id = ?),
            ?, ?, ?, ?, ?, ?, ?, ?
        )
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(source_id)
    .bind(source_id)
    .bind(entry.level.to_string())
    .bind(&entry.step)
    .bind(&entry.message)
    .bind(details)
    .bind(&entry.url)
    .bind(entry.progress)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut *conn)
    .await?;
    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_db() -> (MetaDb, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("tempdir");
    let db = MetaDb::open(&dir.path().join("knowledge.db"))
        .await
        .expect("open db");
    (db, dir)
}
