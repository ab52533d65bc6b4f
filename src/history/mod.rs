// backuptool/src/history/mod.rs
//! Append-only log of backup attempts, kept in a single SQLite table.
//!
//! A connection is opened per operation and closed again before returning, so
//! the store holds no state beyond the database path. Failures never reach the
//! backup pipeline: writes are dropped and reads report "no prior success".

use chrono::{Local, NaiveDateTime};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, error, info};

use crate::errors::StoreError;

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS backups (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        timestamp TEXT,
        backup_name TEXT,
        status TEXT,
        message TEXT
    )
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupStatus {
    Success,
    Failure,
}

impl BackupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupStatus::Success => "success",
            BackupStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(BackupStatus::Success),
            "failure" => Ok(BackupStatus::Failure),
            other => Err(StoreError::Status(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub id: i64,
    pub timestamp: String,
    pub backup_name: String,
    pub status: BackupStatus,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    db_path: PathBuf,
}

impl HistoryStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        HistoryStore {
            db_path: db_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Creates the `backups` table if needed. Safe to call on every start.
    pub async fn initialize(&self) {
        match self.try_initialize().await {
            Ok(()) => info!("History database initialised at {}", self.db_path.display()),
            Err(e) => error!("Failed to initialise history database {}: {}", self.db_path.display(), e),
        }
    }

    /// Appends one attempt stamped with the local clock. Storage errors are logged, not returned.
    pub async fn record(&self, backup_name: &str, status: BackupStatus, message: &str) {
        let timestamp = Local::now().naive_local();
        match self.insert(timestamp, backup_name, status, message).await {
            Ok(id) => debug!(id, backup_name, %status, "Recorded backup attempt"),
            Err(e) => error!("Failed to record backup {} in history database: {}", backup_name, e),
        }
    }

    /// Timestamp of the most recently inserted successful attempt, if any.
    pub async fn last_success_timestamp(&self) -> Option<NaiveDateTime> {
        match self.try_last_success_timestamp().await {
            Ok(last) => last,
            Err(e) => {
                error!("Failed to read last successful backup: {}", e);
                None
            }
        }
    }

    /// Most recent attempts, newest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<BackupRecord>, StoreError> {
        let mut conn = self.connect().await?;
        let rows = sqlx::query_as::<_, (i64, String, String, String, String)>(
            "SELECT id, timestamp, backup_name, status, message FROM backups ORDER BY id DESC LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&mut conn)
        .await;
        conn.close().await?;

        rows?
            .into_iter()
            .map(|(id, timestamp, backup_name, status, message)| -> Result<BackupRecord, StoreError> {
                Ok(BackupRecord {
                    id,
                    timestamp,
                    backup_name,
                    status: status.parse()?,
                    message,
                })
            })
            .collect()
    }

    pub(crate) async fn insert(
        &self,
        timestamp: NaiveDateTime,
        backup_name: &str,
        status: BackupStatus,
        message: &str,
    ) -> Result<i64, StoreError> {
        let mut conn = self.connect().await?;
        let result = sqlx::query(
            "INSERT INTO backups (timestamp, backup_name, status, message) VALUES (?, ?, ?, ?)",
        )
        .bind(timestamp.format(TIMESTAMP_FORMAT).to_string())
        .bind(backup_name)
        .bind(status.as_str())
        .bind(message)
        .execute(&mut conn)
        .await;
        conn.close().await?;
        Ok(result?.last_insert_rowid())
    }

    async fn try_initialize(&self) -> Result<(), StoreError> {
        let conn = self.connect().await?;
        conn.close().await?;
        Ok(())
    }

    async fn try_last_success_timestamp(&self) -> Result<Option<NaiveDateTime>, StoreError> {
        let mut conn = self.connect().await?;
        let row = sqlx::query_as::<_, (String,)>(
            "SELECT timestamp FROM backups WHERE status = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(BackupStatus::Success.as_str())
        .fetch_optional(&mut conn)
        .await;
        conn.close().await?;

        match row? {
            Some((value,)) => NaiveDateTime::parse_from_str(&value, TIMESTAMP_FORMAT)
                .map(Some)
                .map_err(|source| StoreError::Timestamp { value, source }),
            None => Ok(None),
        }
    }

    /// Opens the database file, creating it and the table on first use.
    async fn connect(&self) -> Result<SqliteConnection, StoreError> {
        let mut conn = SqliteConnectOptions::new()
            .filename(&self.db_path)
            .create_if_missing(true)
            .connect()
            .await?;
        if let Err(e) = sqlx::query(CREATE_TABLE_SQL).execute(&mut conn).await {
            let _ = conn.close().await;
            return Err(e.into());
        }
        Ok(conn)
    }
}
