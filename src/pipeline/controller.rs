//! Run controller for one batch over the candidate cases.
//!
//! list → filter → for each case: gate → queue record → detail → dispatch.
//!
//! A failing case never aborts the batch. Its queue record stays
//! `InProgress` with a note naming the failed step, and the next run picks
//! it up as a retry, until the case has used its allowed attempts. The only
//! batch-level stops are a failed candidate listing, an unusable lookback
//! window and too many consecutive case failures.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{error, info, warn};

use crate::config::DispatchConfig;
use crate::error::{CaseError, DispatchStage, RunError};
use crate::pipeline::dedup::{DedupGate, GateDecision, GatePass, ProceedKind, SkipReason};
use crate::pipeline::dispatch::DispatchSequencer;
use crate::pipeline::eligibility::filter_cases;
use crate::pipeline::types::{CaseSystem, DateRange, LetterRenderer, PostalGateway, Registry};
use crate::store::{QueueRecord, QueueStatus, WorkQueue};

/// Note written on a record once its letter is out.
pub const NOTE_SENT: &str = "letter sent";

/// Note written on a stale record whose case log already has the marker.
pub const NOTE_STALE_DONE: &str = "skipped, already handled";

/// Prefix of the note written on a record held for manual review.
pub const NOTE_HELD: &str = "held for manual review";

/// A case that failed during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseFailure {
    pub case_identifier: String,
    /// `None` when the failure happened before dispatch started.
    pub stage: Option<DispatchStage>,
    pub error: CaseError,
}

/// What happened to one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaseOutcome {
    Sent,
    SkippedDone,
    Poisoned,
    /// Every allowed attempt is used up.
    Exhausted,
    Failed(CaseFailure),
}

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub candidates: usize,
    pub eligible: usize,
    pub sent: usize,
    pub skipped_done: usize,
    pub poisoned: Vec<String>,
    /// Cases held after using every allowed attempt.
    pub exhausted: Vec<String>,
    pub failures: Vec<CaseFailure>,
    /// Set when the run stopped early on consecutive failures.
    pub stopped_early: bool,
}

impl RunReport {
    fn record(&mut self, outcome: CaseOutcome) {
        match outcome {
            CaseOutcome::Sent => self.sent += 1,
            CaseOutcome::SkippedDone => self.skipped_done += 1,
            CaseOutcome::Poisoned | CaseOutcome::Exhausted => {}
            CaseOutcome::Failed(failure) => self.failures.push(failure),
        }
    }
}

/// Drives a single batch run.
pub struct RunController {
    cases: Arc<dyn CaseSystem>,
    queue: Arc<dyn WorkQueue>,
    gate: DedupGate,
    sequencer: DispatchSequencer,
    config: Arc<DispatchConfig>,
}

impl RunController {
    pub fn new(
        cases: Arc<dyn CaseSystem>,
        queue: Arc<dyn WorkQueue>,
        renderer: Arc<dyn LetterRenderer>,
        postal: Arc<dyn PostalGateway>,
        registry: Arc<dyn Registry>,
        config: Arc<DispatchConfig>,
    ) -> Self {
        let gate = DedupGate::new(
            queue.clone(),
            cases.clone(),
            config.queue_name.clone(),
            config.audit_marker.clone(),
            config.max_attempts,
        );
        let sequencer = DispatchSequencer::new(
            renderer,
            postal,
            registry,
            cases.clone(),
            config.clone(),
        );
        Self {
            cases,
            queue,
            gate,
            sequencer,
            config,
        }
    }

    /// Run one batch. `today` anchors the lookback window and the letter date.
    pub async fn run(&self, today: NaiveDate) -> Result<RunReport, RunError> {
        let days = self.config.lookback_days;
        let range = DateRange::lookback(today, days).ok_or(RunError::InvalidLookback { days })?;
        info!(from = %range.from, to = %range.to, "Listing candidate cases");

        let candidates = self
            .cases
            .list_candidate_cases(range, &self.config.candidate_query)
            .await
            .map_err(RunError::ListCandidates)?;

        let mut report = RunReport {
            candidates: candidates.len(),
            ..RunReport::default()
        };

        let eligible = filter_cases(candidates, &self.config.excluded_case_types);
        report.eligible = eligible.len();
        info!(
            candidates = report.candidates,
            eligible = report.eligible,
            "Candidate cases filtered"
        );

        let limit = self.config.max_consecutive_failures;
        let mut consecutive_failures: u32 = 0;

        for summary in &eligible {
            let case = summary.case_identifier.as_str();
            let outcome = self.process_case(case, today).await;

            match &outcome {
                CaseOutcome::Failed(failure) => {
                    consecutive_failures += 1;
                    let stage = failure
                        .stage
                        .map_or_else(|| "prepare".to_string(), |s| s.to_string());
                    error!(
                        case = %case,
                        stage = %stage,
                        kind = failure.error.kind(),
                        error = %failure.error,
                        consecutive_failures,
                        "Case failed"
                    );
                }
                CaseOutcome::Sent => consecutive_failures = 0,
                CaseOutcome::Poisoned => report.poisoned.push(case.to_string()),
                CaseOutcome::Exhausted => report.exhausted.push(case.to_string()),
                CaseOutcome::SkippedDone => {}
            }
            report.record(outcome);

            if limit > 0 && consecutive_failures >= limit {
                report.stopped_early = true;
                log_summary(&report);
                if self.config.fail_run_on_too_many_errors {
                    return Err(RunError::TooManyFailures {
                        count: consecutive_failures,
                        limit,
                    });
                }
                warn!(limit, "Consecutive failure limit reached, ending run");
                return Ok(report);
            }
        }

        log_summary(&report);
        Ok(report)
    }

    /// Gate and, when allowed, dispatch a single case.
    pub async fn process_case(&self, case_identifier: &str, today: NaiveDate) -> CaseOutcome {
        let decision = match self.gate.check(case_identifier).await {
            Ok(decision) => decision,
            Err(e) => {
                self.note_gate_failure(case_identifier, &e).await;
                return failed(case_identifier, None, e);
            }
        };

        match decision {
            GateDecision::Skip(SkipReason::QueueDone) => {
                info!(case = %case_identifier, "Skipping case, queue record is done");
                CaseOutcome::SkippedDone
            }
            GateDecision::Skip(SkipReason::AuditMarkerPresent(record)) => {
                self.settle_stale(record).await
            }
            GateDecision::Skip(SkipReason::Poisoned { record_count }) => {
                warn!(
                    case = %case_identifier,
                    record_count,
                    "Case left untouched, resolve the duplicate queue records by hand"
                );
                CaseOutcome::Poisoned
            }
            GateDecision::Skip(SkipReason::AttemptsExhausted(record)) => {
                self.hold_exhausted(record).await
            }
            GateDecision::Proceed(pass) => self.proceed(&pass, today).await,
        }
    }

    /// Leave the gate error on the case's single open record so the queue
    /// shows why the case did not move.
    async fn note_gate_failure(&self, case_identifier: &str, error: &CaseError) {
        let records = match self
            .queue
            .queue_get(&self.config.queue_name, case_identifier)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(case = %case_identifier, error = %e, "Could not note dedup check failure");
                return;
            }
        };
        let [record] = records.as_slice() else {
            return;
        };
        if record.status == QueueStatus::Done {
            return;
        }
        let mut record = record.clone();
        record.transition(record.status, format!("dedup check failed: {error}"));
        if let Err(e) = self.queue.queue_upsert(&record).await {
            warn!(case = %case_identifier, error = %e, "Could not note dedup check failure");
        }
    }

    async fn hold_exhausted(&self, mut record: QueueRecord) -> CaseOutcome {
        let note = format!("{NOTE_HELD} after {} attempts", record.attempt_count);
        if record.last_note != note {
            record.transition(record.status, note);
            if let Err(e) = self.queue.queue_upsert(&record).await {
                error!(case = %record.case_identifier, error = %e, "Failed to mark case as held");
            }
        }
        CaseOutcome::Exhausted
    }

    async fn settle_stale(&self, mut record: QueueRecord) -> CaseOutcome {
        info!(
            case = %record.case_identifier,
            "Case log already carries the marker, skipping"
        );
        if !self.config.mark_stale_done {
            return CaseOutcome::SkippedDone;
        }
        record.transition(QueueStatus::Done, NOTE_STALE_DONE);
        match self.queue.queue_upsert(&record).await {
            Ok(()) => CaseOutcome::SkippedDone,
            Err(e) => failed(&record.case_identifier, None, e.into()),
        }
    }

    async fn proceed(&self, pass: &GatePass, today: NaiveDate) -> CaseOutcome {
        let case = pass.case_identifier();

        let mut record = match (pass.kind(), pass.existing()) {
            (ProceedKind::RetryEligible, Some(existing)) => existing.clone(),
            _ => QueueRecord::new(&self.config.queue_name, case),
        };
        record.attempt_count += 1;
        record.transition(
            QueueStatus::InProgress,
            format!("attempt {} started", record.attempt_count),
        );
        if let Err(e) = self.queue.queue_upsert(&record).await {
            return failed(case, None, e.into());
        }
        info!(case = %case, attempt = record.attempt_count, "Dispatching case");

        let detail = match self.cases.fetch_case_detail(case).await {
            Ok(detail) => detail,
            Err(e) => {
                let note = format!("failed fetching case detail: {e}");
                return self.leave_in_progress(record, note, None, e).await;
            }
        };

        match self.sequencer.dispatch(&detail, pass, today).await {
            Ok(_) => {
                record.transition(QueueStatus::Done, NOTE_SENT);
                match self.queue.queue_upsert(&record).await {
                    Ok(()) => {
                        info!(case = %case, "Case done");
                        CaseOutcome::Sent
                    }
                    Err(e) => {
                        // The case log has the marker, so the next run settles it.
                        error!(case = %case, error = %e, "Letter sent but queue record not updated");
                        failed(case, None, e.into())
                    }
                }
            }
            Err(failure) => {
                let stage = failure.stage();
                let note = format!("failed at {stage}: {}", failure.error.source);
                self.leave_in_progress(record, note, Some(stage), failure.error.source)
                    .await
            }
        }
    }

    async fn leave_in_progress(
        &self,
        mut record: QueueRecord,
        note: String,
        stage: Option<DispatchStage>,
        error: CaseError,
    ) -> CaseOutcome {
        record.transition(QueueStatus::InProgress, note);
        if let Err(e) = self.queue.queue_upsert(&record).await {
            error!(case = %record.case_identifier, error = %e, "Failed to record case failure");
        }
        failed(&record.case_identifier, stage, error)
    }
}

fn failed(case_identifier: &str, stage: Option<DispatchStage>, error: CaseError) -> CaseOutcome {
    CaseOutcome::Failed(CaseFailure {
        case_identifier: case_identifier.to_string(),
        stage,
        error,
    })
}

fn log_summary(report: &RunReport) {
    info!(
        candidates = report.candidates,
        eligible = report.eligible,
        sent = report.sent,
        skipped_done = report.skipped_done,
        poisoned = report.poisoned.len(),
        exhausted = report.exhausted.len(),
        failed = report.failures.len(),
        stopped_early = report.stopped_early,
        "Run complete"
    );
}
