use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Result as SqliteResult};
use std::path::Path;
use thiserror::Error;

use crate::sync::sync_engine::SyncSummary;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("Failed to create state directory: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Stored timestamp {0} is out of range")]
    InvalidTimestamp(i64),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncRun {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub watermark: DateTime<Utc>,
    pub summary: SyncSummary,
}

/// Run history. The watermark of the latest recorded run bounds which source
/// changes count as already applied.
pub struct SyncState {
    conn: Connection,
}

impl SyncState {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn open(path: &Path) -> Result<Self, StateError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let state = Self::new(Connection::open(path)?);
        state.initialize()?;
        Ok(state)
    }

    pub fn initialize(&self) -> Result<(), StateError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS sync_runs (
                id TEXT PRIMARY KEY,
                started_at INTEGER NOT NULL,
                watermark INTEGER NOT NULL,
                inserted INTEGER NOT NULL,
                updated INTEGER NOT NULL,
                deleted INTEGER NOT NULL,
                failed INTEGER NOT NULL
            )",
            [],
        )?;
        Ok(())
    }

    pub fn watermark(&self) -> Result<Option<DateTime<Utc>>, StateError> {
        let latest: Option<i64> = self
            .conn
            .query_row(
                "SELECT watermark FROM sync_runs ORDER BY started_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        latest.map(from_micros).transpose()
    }

    /// Records a finished run. `watermark` is normally `started_at`; it stays
    /// earlier when some source changes still have to be retried.
    pub fn record_run(
        &self,
        started_at: DateTime<Utc>,
        watermark: DateTime<Utc>,
        summary: &SyncSummary,
    ) -> Result<String, StateError> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO sync_runs (id, started_at, watermark, inserted, updated, deleted, failed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                &id,
                started_at.timestamp_micros(),
                watermark.timestamp_micros(),
                summary.inserted as i64,
                summary.updated as i64,
                summary.deleted as i64,
                summary.failed as i64,
            ],
        )?;
        tracing::debug!(
            "Recorded sync run {} started at {} (watermark {})",
            id,
            started_at,
            watermark
        );
        Ok(id)
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRun>, StateError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, started_at, watermark, inserted, updated, deleted, failed
             FROM sync_runs ORDER BY started_at DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, i64>(2)?,
                SyncSummary {
                    inserted: row.get::<_, i64>(3)? as usize,
                    updated: row.get::<_, i64>(4)? as usize,
                    deleted: row.get::<_, i64>(5)? as usize,
                    failed: row.get::<_, i64>(6)? as usize,
                },
            ))
        })?;

        let mut runs = Vec::new();
        for row in rows {
            let (id, started_at, watermark, summary) = row?;
            runs.push(SyncRun {
                id,
                started_at: from_micros(started_at)?,
                watermark: from_micros(watermark)?,
                summary,
            });
        }
        Ok(runs)
    }

    pub fn table_exists(&self, table_name: &str) -> bool {
        let result: SqliteResult<i32> = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table_name],
            |row| row.get(0),
        );
        result.unwrap_or(0) > 0
    }
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>, StateError> {
    DateTime::from_timestamp_micros(micros).ok_or(StateError::InvalidTimestamp(micros))
}
