//! Error types for case dispatch.

use std::fmt;

/// Top-level error type for the binary and setup paths.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Setup error: {0}")]
    Setup(#[from] SetupError),

    #[error("Run error: {0}")]
    Run(#[from] RunError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Failures that must abort a run before any case is touched.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Unable to read certificate at {path}: {reason}")]
    Certificate { path: String, reason: String },

    #[error("Invalid base URL for {service}: {reason}")]
    BaseUrl { service: String, reason: String },

    #[error("Unable to build HTTP client for {service}: {reason}")]
    HttpClient { service: String, reason: String },

    #[error("Unable to open work queue: {0}")]
    Store(String),

    #[error("Unable to load letterhead logo at {path}: {reason}")]
    Logo { path: String, reason: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Errors raised while handling a single case.
///
/// These never abort a batch; the run controller turns them into queue
/// state and a note.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaseError {
    /// Bad or missing case data. Needs manual review.
    #[error("data error: {0}")]
    Data(String),

    /// Network or service failure in an external system. Retried next run.
    #[error("{service} failed: {reason}")]
    TransientExternal { service: String, reason: String },

    /// Conflicting bookkeeping. Never retried automatically.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// The work queue could not be read or written for this case.
    #[error("work queue error: {0}")]
    Queue(String),
}

impl CaseError {
    pub fn transient(service: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self::TransientExternal {
            service: service.into(),
            reason: reason.to_string(),
        }
    }

    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Data(_) => "data",
            Self::TransientExternal { .. } => "transient_external",
            Self::Consistency(_) => "consistency",
            Self::Queue(_) => "queue",
        }
    }
}

impl From<DatabaseError> for CaseError {
    fn from(value: DatabaseError) -> Self {
        Self::Queue(value.to_string())
    }
}

/// The step of the dispatch sequence that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchStage {
    Render,
    Deliver,
    File,
    AuditNote,
}

impl fmt::Display for DispatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Render => "render",
            Self::Deliver => "deliver",
            Self::File => "file",
            Self::AuditNote => "audit_note",
        };
        write!(f, "{s}")
    }
}

/// A dispatch sequence stopped at `stage`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{stage} step failed: {source}")]
pub struct DispatchError {
    pub stage: DispatchStage,
    #[source]
    pub source: CaseError,
}

/// Batch-level failures.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Listing candidate cases failed: {0}")]
    ListCandidates(CaseError),

    #[error("Lookback of {days} days does not give a valid date range")]
    InvalidLookback { days: i64 },

    #[error("Stopped after {count} consecutive case failures (limit {limit})")]
    TooManyFailures { count: u32, limit: u32 },
}

/// Result type alias for the binary.
pub type Result<T> = std::result::Result<T, Error>;
