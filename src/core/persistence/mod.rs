mod owners;
mod results;
mod schedule;
pub mod types;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

use crate::platform::{NativePlatform, Platform};

pub use owners::OwnerRecords;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS schedules (
        schedule_id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        trigger_kind TEXT NOT NULL,
        trigger_expr TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        last_run TEXT,
        next_run TEXT,
        consecutive_failures INTEGER NOT NULL DEFAULT 0,
        history_json TEXT NOT NULL DEFAULT '[]',
        criteria_json TEXT NOT NULL,
        created_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS workflow_results (
        workflow_id TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        result_json TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_workflow_results_owner_started
        ON workflow_results(owner_id, started_at)",
    "CREATE TABLE IF NOT EXISTS owner_profiles (
        owner_id TEXT PRIMARY KEY,
        display_name TEXT,
        email TEXT,
        phone TEXT,
        resume TEXT,
        updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
    )",
    "CREATE TABLE IF NOT EXISTS applications (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id TEXT NOT NULL,
        workflow_id TEXT NOT NULL,
        candidate_id TEXT NOT NULL,
        job_url TEXT NOT NULL,
        company TEXT NOT NULL,
        title TEXT NOT NULL,
        status TEXT NOT NULL,
        serviced_by TEXT,
        applied_at TEXT NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_applications_owner ON applications(owner_id, applied_at)",
];

/// SQLite-backed storage for schedules, archived results, owner profiles and
/// application history. The connection sits behind a tokio mutex; every
/// method takes the lock for the duration of its statements only.
#[derive(Clone)]
pub struct Database {
    db: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl Database {
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent).await?;
            NativePlatform::restrict_dir_permissions(parent);
        }
        let conn = Connection::open(&path)?;
        NativePlatform::restrict_file_permissions(&path);
        migrate(&conn)?;
        info!("Database opened at {}", path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            path: Some(path),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    for stmt in SCHEMA {
        conn.execute(stmt, [])?;
    }
    Ok(())
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
pub(crate) fn to_sql_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn from_sql_time(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
