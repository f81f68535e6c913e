//! libSQL backend: async `WorkQueue` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::{QueueRecord, QueueStatus, WorkQueue};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        info!(path = %path.display(), "Work queue opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Parse a status string from the DB.
///
/// Unknown values read as `InProgress` so they are never mistaken for
/// finished work.
fn str_to_status(s: &str) -> QueueStatus {
    match s {
        "new" => QueueStatus::New,
        "done" => QueueStatus::Done,
        "in_progress" => QueueStatus::InProgress,
        other => {
            warn!(status = other, "Unknown queue status in DB, treating as in_progress");
            QueueStatus::InProgress
        }
    }
}

/// Map a libsql Row to a QueueRecord.
///
/// Column order matches QUEUE_COLUMNS.
fn row_to_record(row: &libsql::Row) -> Result<QueueRecord, libsql::Error> {
    let id_str: String = row.get(0)?;
    let status_str: String = row.get(3)?;
    let attempt_count: i64 = row.get(4)?;
    let created_str: String = row.get(6)?;
    let updated_str: String = row.get(7)?;

    Ok(QueueRecord {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        queue_name: row.get(1)?,
        case_identifier: row.get(2)?,
        status: str_to_status(&status_str),
        attempt_count: u32::try_from(attempt_count).unwrap_or(0),
        last_note: row.get(5)?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const QUEUE_COLUMNS: &str =
    "id, queue_name, case_identifier, status, attempt_count, last_note, created_at, updated_at";

#[async_trait]
impl WorkQueue for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn queue_get(
        &self,
        queue_name: &str,
        case_identifier: &str,
    ) -> Result<Vec<QueueRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {QUEUE_COLUMNS} FROM queue_records
                     WHERE queue_name = ?1 AND case_identifier = ?2
                     ORDER BY created_at ASC"
                ),
                params![queue_name, case_identifier],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("queue_get: {e}")))?;

        let mut records = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    let record = row_to_record(&row)
                        .map_err(|e| DatabaseError::Query(format!("queue_get row parse: {e}")))?;
                    records.push(record);
                }
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("queue_get: {e}"))),
            }
        }
        Ok(records)
    }

    async fn queue_upsert(&self, record: &QueueRecord) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO queue_records (id, queue_name, case_identifier, status,
                    attempt_count, last_note, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(id) DO UPDATE SET
                    status = excluded.status,
                    attempt_count = excluded.attempt_count,
                    last_note = excluded.last_note,
                    updated_at = excluded.updated_at",
                params![
                    record.id.to_string(),
                    record.queue_name.as_str(),
                    record.case_identifier.as_str(),
                    record.status.as_str(),
                    i64::from(record.attempt_count),
                    record.last_note.as_str(),
                    record.created_at.to_rfc3339(),
                    record.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("queue_upsert: {e}")))?;

        debug!(
            id = %record.id,
            case = %record.case_identifier,
            status = %record.status,
            attempts = record.attempt_count,
            "Queue record saved"
        );
        Ok(())
    }
}
