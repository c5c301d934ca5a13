//! Database module - SQLx with SQLite

use crate::error::{Error, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
    SqlitePool,
};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Database state
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    /// Create a new database connection with default path
    pub async fn new() -> Result<Self> {
        let db_path = get_db_path()?;
        Self::open(db_path).await
    }

    /// Create a new database connection with a specific path
    pub async fn open(db_path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite:{}", db_path.display());
        log::info!("Connecting to database: {}", db_path.display());

        // Concurrent billing from several tasks must wait for the writer lock, not fail
        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10))
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        log::info!("Running database migrations...");

        // Per-user quota counters
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL,
                resume_quiz_count INTEGER NOT NULL DEFAULT 0 CHECK (resume_quiz_count >= 0),
                special_interview_count INTEGER NOT NULL DEFAULT 0 CHECK (special_interview_count >= 0),
                behavior_interview_count INTEGER NOT NULL DEFAULT 0 CHECK (behavior_interview_count >= 0),
                created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // One row per billable attempt
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS consumption_records (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                idempotency_key TEXT NOT NULL,
                result_id TEXT,
                input_snapshot TEXT NOT NULL DEFAULT '{}',
                output_snapshot TEXT,
                error_message TEXT,
                ai_model TEXT,
                prompt_tokens INTEGER,
                completion_tokens INTEGER,
                duration_ms INTEGER,
                is_refunded BOOLEAN NOT NULL DEFAULT 0,
                started_at DATETIME NOT NULL,
                completed_at DATETIME,
                failed_at DATETIME,
                refunded_at DATETIME,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Only pending/success rows take part in idempotency; failed attempts may be retried
        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_consumption_active_key
            ON consumption_records(user_id, kind, idempotency_key)
            WHERE status != 'failed'
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_consumption_user_started ON consumption_records(user_id, started_at)")
            .execute(&self.pool)
            .await?;

        // Resume quiz artifacts
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resume_quiz_results (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                consumption_record_id TEXT NOT NULL,
                company TEXT,
                position_name TEXT NOT NULL,
                resume_source TEXT NOT NULL,
                questions TEXT NOT NULL,
                analysis TEXT NOT NULL,
                ai_model TEXT,
                view_count INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME NOT NULL,
                last_viewed_at DATETIME,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_quiz_results_user ON resume_quiz_results(user_id, created_at)")
            .execute(&self.pool)
            .await?;

        // Mock interview artifacts; session_state holds the full session snapshot
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS interview_results (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                session_id TEXT NOT NULL,
                interview_kind TEXT NOT NULL,
                interviewer_name TEXT,
                company TEXT,
                position_name TEXT,
                status TEXT NOT NULL DEFAULT 'in_progress',
                session_state TEXT NOT NULL,
                consumption_record_id TEXT,
                end_reason TEXT,
                question_count INTEGER NOT NULL DEFAULT 0,
                duration_minutes INTEGER,
                view_count INTEGER NOT NULL DEFAULT 0,
                started_at DATETIME NOT NULL,
                paused_at DATETIME,
                resumed_at DATETIME,
                completed_at DATETIME,
                updated_at DATETIME NOT NULL,
                FOREIGN KEY (user_id) REFERENCES users(id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_interview_results_user ON interview_results(user_id, started_at)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_interview_results_session ON interview_results(session_id)")
            .execute(&self.pool)
            .await?;

        // Question/answer slots written through turn by turn
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS interview_qa (
                result_id TEXT NOT NULL,
                slot INTEGER NOT NULL,
                question TEXT NOT NULL DEFAULT '',
                answer TEXT,
                reference_answer TEXT,
                asked_at DATETIME NOT NULL,
                answered_at DATETIME,
                PRIMARY KEY (result_id, slot),
                FOREIGN KEY (result_id) REFERENCES interview_results(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        log::info!("Database migrations completed");
        Ok(())
    }
}

/// Get database file path
/// Priority: COACH_DB_PATH env var > default app data directory
pub fn get_db_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("COACH_DB_PATH") {
        return Ok(PathBuf::from(path));
    }

    let dirs = directories::ProjectDirs::from("com", "coach", "Coach")
        .ok_or_else(|| Error::config("Could not determine project directories"))?;

    Ok(dirs.data_dir().join("coach.db"))
}

/// Fresh database in a temp dir; keep the `TempDir` alive for the duration of the test
#[cfg(test)]
pub(crate) async fn test_database() -> (tempfile::TempDir, Database) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let db = Database::open(dir.path().join("test.db"))
        .await
        .expect("Failed to open test database");
    (dir, db)
}
