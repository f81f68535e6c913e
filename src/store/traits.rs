//! `WorkQueue` trait, the durable record of every dispatch attempt.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::DatabaseError;

/// Processing status of a queue record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueStatus {
    New,
    InProgress,
    Done,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InProgress => "in_progress",
            Self::Done => "done",
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One attempt record for a case. Never deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueRecord {
    pub id: Uuid,
    pub queue_name: String,
    pub case_identifier: String,
    pub status: QueueStatus,
    pub attempt_count: u32,
    pub last_note: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl QueueRecord {
    /// A fresh record for a case seen for the first time.
    pub fn new(queue_name: impl Into<String>, case_identifier: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            queue_name: queue_name.into(),
            case_identifier: case_identifier.into(),
            status: QueueStatus::New,
            attempt_count: 0,
            last_note: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `status` with a note, bumping `updated_at`.
    pub fn transition(&mut self, status: QueueStatus, note: impl Into<String>) {
        self.status = status;
        self.last_note = note.into();
        self.updated_at = Utc::now();
    }
}

/// Backend-agnostic work-queue store.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    /// All records for a case in a queue, oldest first.
    async fn queue_get(
        &self,
        queue_name: &str,
        case_identifier: &str,
    ) -> Result<Vec<QueueRecord>, DatabaseError>;

    /// Insert the record, or overwrite the existing record with the same id.
    async fn queue_upsert(&self, record: &QueueRecord) -> Result<(), DatabaseError>;
}
