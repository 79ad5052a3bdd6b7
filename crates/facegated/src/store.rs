//! SQLite persistence for enrolled faces and attendance records.
//!
//! Two tables: `faces` holds one row per reference embedding (a person may
//! have several), `attendance` holds at most one row per person per calendar
//! day, enforced by a unique index so that repeated approvals are idempotent.

use facegate_core::{Embedding, EnrolledFace};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_rusqlite::Connection;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("corrupt embedding for face {0}: {1}")]
    CorruptEmbedding(String, String),
    #[error("embedding encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// One recorded attendance event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub name: String,
    pub date: String,
    pub time: String,
    pub status: String,
}

/// Async handle to the SQLite database.
#[derive(Clone)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (or create) the database at `path` and apply the schema.
    pub async fn open(path: &std::path::Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).await?;
        Self::init(&conn).await?;
        Ok(Self { conn })
    }

    /// Open an in-memory database. Test use only.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        Self::init(&conn).await?;
        Ok(Self { conn })
    }

    async fn init(conn: &Connection) -> Result<(), StoreError> {
        conn.call(|conn| {
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS faces (
                    id TEXT PRIMARY KEY,
                    name TEXT NOT NULL,
                    embedding TEXT NOT NULL,
                    model_version TEXT,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_faces_name ON faces(name);
                CREATE TABLE IF NOT EXISTS attendance (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    date TEXT NOT NULL,
                    time TEXT NOT NULL,
                    status TEXT NOT NULL,
                    UNIQUE(name, date)
                );",
            )?;
            Ok(())
        })
        .await?;
        Ok(())
    }

    /// Persist one enrolled face (one reference embedding).
    pub async fn add_face(&self, face: EnrolledFace) -> Result<(), StoreError> {
        let values = serde_json::to_string(&face.embedding.values)?;
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO faces (id, name, embedding, model_version, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    rusqlite::params![
                        face.id,
                        face.name,
                        values,
                        face.embedding.model_version,
                        face.created_at
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Load the full gallery of enrolled faces.
    pub async fn gallery(&self) -> Result<Vec<EnrolledFace>, StoreError> {
        let rows: Vec<(String, String, String, Option<String>, String)> = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, name, embedding, model_version, created_at
                     FROM faces ORDER BY created_at",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(id, name, embedding, model_version, created_at)| {
                let values: Vec<f32> = serde_json::from_str(&embedding)
                    .map_err(|e| StoreError::CorruptEmbedding(id.clone(), e.to_string()))?;
                Ok(EnrolledFace {
                    id,
                    name,
                    embedding: Embedding {
                        values,
                        model_version,
                    },
                    created_at,
                })
            })
            .collect()
    }

    /// Distinct enrolled names, ordered by first enrollment.
    pub async fn enrolled_names(&self) -> Result<Vec<String>, StoreError> {
        let names = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name FROM faces GROUP BY name ORDER BY MIN(created_at)",
                )?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await?;
        Ok(names)
    }

    /// Record one attendance event, at most once per (name, date).
    ///
    /// Returns `true` when a new row was inserted, `false` when attendance
    /// for that person and day was already on record.
    pub async fn mark_attendance(
        &self,
        name: &str,
        date: &str,
        time: &str,
        status: &str,
    ) -> Result<bool, StoreError> {
        let (name, date, time, status) = (
            name.to_string(),
            date.to_string(),
            time.to_string(),
            status.to_string(),
        );
        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    "INSERT OR IGNORE INTO attendance (name, date, time, status)
                     VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![name, date, time, status],
                )?;
                Ok(changed > 0)
            })
            .await?;
        Ok(inserted)
    }

    /// All attendance records, most recent first.
    pub async fn attendance_records(&self) -> Result<Vec<AttendanceRecord>, StoreError> {
        let records = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT name, date, time, status FROM attendance
                     ORDER BY date DESC, time DESC",
                )?;
                let records = stmt
                    .query_map([], |row| {
                        Ok(AttendanceRecord {
                            name: row.get(0)?,
                            date: row.get(1)?,
                            time: row.get(2)?,
                            status: row.get(3)?,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(records)
            })
            .await?;
        Ok(records)
    }

    /// Distinct names with a "Present" record on `date`.
    pub async fn present_on(&self, date: &str) -> Result<Vec<String>, StoreError> {
        let date = date.to_string();
        let names = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT DISTINCT name FROM attendance
                     WHERE date = ?1 AND status = 'Present'",
                )?;
                let names = stmt
                    .query_map([date], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await?;
        Ok(names)
    }
}
