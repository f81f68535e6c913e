//! Dedup gate. Has this case already been handled?
//!
//! Two sources are consulted: the durable work queue (what this system
//! intended) and the case's own log (what actually landed in the external
//! system). The queue wins when it is conclusive; the log is the fallback.
//!
//! | Queue records                    | Audit marker | Decision          |
//! |----------------------------------|--------------|-------------------|
//! | none                             | any          | New               |
//! | one, Done                        | any          | AlreadyDone       |
//! | one, not Done                    | present      | AlreadyDone       |
//! | one, not Done, attempts left     | absent       | RetryEligible     |
//! | one, not Done, attempts used up  | absent       | AttemptsExhausted |
//! | more than one                    | any          | Poisoned          |
//!
//! A failure after delivery leaves no marker, so every retry may send the
//! letter again. The attempt limit bounds how often that can happen.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::CaseError;
use crate::pipeline::types::CaseSystem;
use crate::store::traits::{QueueRecord, QueueStatus, WorkQueue};

/// Why a case was let through the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProceedKind {
    New,
    RetryEligible,
}

/// Proof that a case passed the gate. Only the gate can create one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatePass {
    case_identifier: String,
    kind: ProceedKind,
    /// The single existing record when retrying.
    existing: Option<QueueRecord>,
}

impl GatePass {
    pub fn case_identifier(&self) -> &str {
        &self.case_identifier
    }

    pub fn kind(&self) -> ProceedKind {
        self.kind
    }

    /// The record to reuse on retry.
    pub fn existing(&self) -> Option<&QueueRecord> {
        self.existing.as_ref()
    }
}

/// Why a case was stopped at the gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// The queue already has a Done record.
    QueueDone,
    /// The queue says not done but the case log carries the marker.
    /// Holds the stale record.
    AuditMarkerPresent(QueueRecord),
    /// More than one attempt is recorded. Needs an operator.
    Poisoned { record_count: usize },
    /// The single record has used every allowed attempt without the marker
    /// landing. Needs an operator. Holds the record.
    AttemptsExhausted(QueueRecord),
}

/// Gate outcome for one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Proceed(GatePass),
    Skip(SkipReason),
}

impl GateDecision {
    /// Short label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Proceed(pass) => match pass.kind {
                ProceedKind::New => "new",
                ProceedKind::RetryEligible => "retry_eligible",
            },
            Self::Skip(SkipReason::QueueDone) | Self::Skip(SkipReason::AuditMarkerPresent(_)) => {
                "already_done"
            }
            Self::Skip(SkipReason::Poisoned { .. }) => "poisoned",
            Self::Skip(SkipReason::AttemptsExhausted(_)) => "attempts_exhausted",
        }
    }
}

/// What the queue alone says about a case.
enum QueueView<'a> {
    Empty,
    Done,
    Pending(&'a QueueRecord),
    Many(usize),
}

fn queue_view(records: &[QueueRecord]) -> QueueView<'_> {
    match records {
        [] => QueueView::Empty,
        [only] if only.status == QueueStatus::Done => QueueView::Done,
        [only] => QueueView::Pending(only),
        many => QueueView::Many(many.len()),
    }
}

/// The decision table. `marker_present` is only consulted when the queue
/// holds exactly one record that is not Done.
pub(crate) fn decide(
    case_identifier: &str,
    records: &[QueueRecord],
    marker_present: bool,
    max_attempts: u32,
) -> GateDecision {
    match queue_view(records) {
        QueueView::Empty => GateDecision::Proceed(GatePass {
            case_identifier: case_identifier.to_string(),
            kind: ProceedKind::New,
            existing: None,
        }),
        QueueView::Done => GateDecision::Skip(SkipReason::QueueDone),
        QueueView::Pending(record) if marker_present => {
            GateDecision::Skip(SkipReason::AuditMarkerPresent(record.clone()))
        }
        QueueView::Pending(record) if record.attempt_count >= max_attempts => {
            GateDecision::Skip(SkipReason::AttemptsExhausted(record.clone()))
        }
        QueueView::Pending(record) => GateDecision::Proceed(GatePass {
            case_identifier: case_identifier.to_string(),
            kind: ProceedKind::RetryEligible,
            existing: Some(record.clone()),
        }),
        QueueView::Many(record_count) => GateDecision::Skip(SkipReason::Poisoned { record_count }),
    }
}

/// Whether any log entry carries the marker.
pub fn log_contains_marker(entries: &[String], marker: &str) -> bool {
    let marker = marker.trim();
    !marker.is_empty() && entries.iter().any(|entry| entry.trim().contains(marker))
}

/// Consults the queue and, when needed, the case log.
pub struct DedupGate {
    queue: Arc<dyn WorkQueue>,
    cases: Arc<dyn CaseSystem>,
    queue_name: String,
    audit_marker: String,
    max_attempts: u32,
}

impl DedupGate {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        cases: Arc<dyn CaseSystem>,
        queue_name: impl Into<String>,
        audit_marker: impl Into<String>,
        max_attempts: u32,
    ) -> Self {
        Self {
            queue,
            cases,
            queue_name: queue_name.into(),
            audit_marker: audit_marker.into(),
            max_attempts,
        }
    }

    /// Classify a case.
    pub async fn check(&self, case_identifier: &str) -> Result<GateDecision, CaseError> {
        let records = self.queue.queue_get(&self.queue_name, case_identifier).await?;

        // Only a single unfinished record needs the log.
        let marker_present = match queue_view(&records) {
            QueueView::Pending(_) => {
                let entries = self.cases.read_audit_log(case_identifier).await?;
                log_contains_marker(&entries, &self.audit_marker)
            }
            _ => false,
        };

        let decision = decide(case_identifier, &records, marker_present, self.max_attempts);
        match &decision {
            GateDecision::Skip(SkipReason::Poisoned { record_count }) => {
                warn!(
                    case = %case_identifier,
                    record_count,
                    "Case has more than one recorded attempt, manual review required"
                );
            }
            GateDecision::Skip(SkipReason::AttemptsExhausted(record)) => {
                warn!(
                    case = %case_identifier,
                    attempts = record.attempt_count,
                    limit = self.max_attempts,
                    "Case used every dispatch attempt, manual review required"
                );
            }
            other => {
                debug!(case = %case_identifier, decision = other.label(), "Dedup gate decision");
            }
        }
        Ok(decision)
    }
}
