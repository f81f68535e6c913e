//! Dispatch sequencer: render, deliver, file, note, in that order.
//!
//! **Core invariant: nothing is filed in the registry before the postal
//! gateway has accepted the letter.**
//!
//! Each step short-circuits the rest. A failure reports the stage it
//! happened in together with the partial outcome, so the caller can record
//! exactly how far the case got.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::config::DispatchConfig;
use crate::error::{CaseError, DispatchError, DispatchStage};
use crate::pipeline::dedup::GatePass;
use crate::pipeline::types::{
    CaseDetail, CaseSystem, Document, Letter, LetterRenderer, PostalGateway, Registry,
    RegistryReference,
};

/// How far a dispatch got.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub delivered: bool,
    pub document_filed_in_registry: bool,
    pub audit_note_written: bool,
    pub registry_reference: Option<RegistryReference>,
}

impl DispatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.delivered && self.document_filed_in_registry && self.audit_note_written
    }
}

/// A dispatch that stopped partway.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{error}")]
pub struct DispatchFailure {
    pub error: DispatchError,
    pub partial: DispatchOutcome,
}

impl DispatchFailure {
    fn at(stage: DispatchStage, source: CaseError, partial: &DispatchOutcome) -> Self {
        Self {
            error: DispatchError { stage, source },
            partial: partial.clone(),
        }
    }

    pub fn stage(&self) -> DispatchStage {
        self.error.stage
    }
}

/// Runs the side-effecting steps for one case.
pub struct DispatchSequencer {
    renderer: Arc<dyn LetterRenderer>,
    postal: Arc<dyn PostalGateway>,
    registry: Arc<dyn Registry>,
    cases: Arc<dyn CaseSystem>,
    config: Arc<DispatchConfig>,
}

impl DispatchSequencer {
    pub fn new(
        renderer: Arc<dyn LetterRenderer>,
        postal: Arc<dyn PostalGateway>,
        registry: Arc<dyn Registry>,
        cases: Arc<dyn CaseSystem>,
        config: Arc<DispatchConfig>,
    ) -> Self {
        Self {
            renderer,
            postal,
            registry,
            cases,
            config,
        }
    }

    /// Dispatch the letter for a case that passed the gate.
    pub async fn dispatch(
        &self,
        detail: &CaseDetail,
        pass: &GatePass,
        letter_date: NaiveDate,
    ) -> Result<DispatchOutcome, DispatchFailure> {
        let mut outcome = DispatchOutcome::default();
        let case = detail.case_identifier.as_str();

        if pass.case_identifier() != case {
            return Err(DispatchFailure::at(
                DispatchStage::Render,
                CaseError::Consistency(format!(
                    "gate pass for {} used for case {case}",
                    pass.case_identifier()
                )),
                &outcome,
            ));
        }

        // Step 1: render
        let document = self
            .render(detail, letter_date)
            .map_err(|e| DispatchFailure::at(DispatchStage::Render, e, &outcome))?;
        debug!(case = %case, bytes = document.bytes.len(), "Letter rendered");

        // Step 2: deliver
        self.postal
            .deliver(&detail.applicant_cpr, &document, &self.config.delivery)
            .await
            .map_err(|e| DispatchFailure::at(DispatchStage::Deliver, e, &outcome))?;
        outcome.delivered = true;
        info!(case = %case, "Letter delivered");

        // Step 3: file (only reachable once delivered)
        let reference = self
            .registry
            .file(&detail.applicant_cpr, &detail.applicant_name, &document, case)
            .await
            .map_err(|e| DispatchFailure::at(DispatchStage::File, e, &outcome))?;
        outcome.document_filed_in_registry = true;
        info!(case = %case, registry_case = %reference.case_number, "Letter filed in registry");

        // Step 4: journal note, then the audit marker
        let journal_note = format!(
            "Orienteringsbrev om godkendelse journaliseret i sag: {}",
            reference.case_number
        );
        outcome.registry_reference = Some(reference);

        self.cases
            .add_case_note(case, &journal_note)
            .await
            .map_err(|e| DispatchFailure::at(DispatchStage::AuditNote, e, &outcome))?;
        self.cases
            .write_audit_note(case, &self.config.audit_activity, &self.config.audit_marker)
            .await
            .map_err(|e| DispatchFailure::at(DispatchStage::AuditNote, e, &outcome))?;
        outcome.audit_note_written = true;

        Ok(outcome)
    }

    fn render(&self, detail: &CaseDetail, letter_date: NaiveDate) -> Result<Document, CaseError> {
        if detail.applicant_cpr.trim().is_empty() {
            return Err(CaseError::Data("applicant has no person identifier".into()));
        }
        let letter = Letter {
            recipient_name: detail.applicant_name.clone(),
            address: detail.address.clone(),
            move_date: detail.move_date.clone(),
            case_identifier: detail.case_identifier.clone(),
            letter_date,
        };
        self.renderer.render(&letter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::dedup::{GateDecision, decide};
    use crate::pipeline::testing::{Fixture, detail};

    fn pass_for(case: &str) -> GatePass {
        match decide(case, &[], false, 2) {
            GateDecision::Proceed(pass) => pass,
            other => panic!("Expected Proceed, got {other:?}"),
        }
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()
    }

    #[tokio::test]
    async fn full_sequence_runs_in_order() {
        let fixture = Fixture::new();
        let outcome = fixture
            .sequencer()
            .dispatch(&detail("F-1"), &pass_for("F-1"), today())
            .await
            .unwrap();

        assert!(outcome.is_complete());
        assert_eq!(
            outcome.registry_reference.as_ref().map(|r| r.case_number.as_str()),
            Some("S2024-F-1")
        );
        assert_eq!(
            fixture.calls(),
            vec!["render:F-1", "deliver:0101011111", "file:F-1", "note:F-1", "audit:F-1"]
        );
    }

    #[tokio::test]
    async fn delivery_failure_stops_before_filing() {
        let fixture = Fixture::new();
        fixture.fail_delivery("gateway unavailable");

        let failure = fixture
            .sequencer()
            .dispatch(&detail("F-1"), &pass_for("F-1"), today())
            .await
            .unwrap_err();

        assert_eq!(failure.stage(), DispatchStage::Deliver);
        assert!(!failure.partial.delivered);
        assert!(!failure.partial.document_filed_in_registry);
        assert!(!failure.partial.audit_note_written);
        assert_eq!(fixture.calls(), vec!["render:F-1", "deliver:0101011111"]);
        assert!(fixture.audit_log("F-1").is_empty());
    }

    #[tokio::test]
    async fn filing_failure_keeps_delivered_flag() {
        let fixture = Fixture::new();
        fixture.fail_filing("registry timeout");

        let failure = fixture
            .sequencer()
            .dispatch(&detail("F-1"), &pass_for("F-1"), today())
            .await
            .unwrap_err();

        assert_eq!(failure.stage(), DispatchStage::File);
        assert!(failure.partial.delivered);
        assert!(!failure.partial.document_filed_in_registry);
        assert!(!fixture.calls().iter().any(|c| c.starts_with("audit")));
    }

    #[tokio::test]
    async fn audit_failure_reports_filed_letter() {
        let fixture = Fixture::new();
        fixture.fail_audit("session expired");

        let failure = fixture
            .sequencer()
            .dispatch(&detail("F-1"), &pass_for("F-1"), today())
            .await
            .unwrap_err();

        assert_eq!(failure.stage(), DispatchStage::AuditNote);
        assert!(failure.partial.delivered);
        assert!(failure.partial.document_filed_in_registry);
        assert!(failure.partial.registry_reference.is_some());
        assert!(!failure.partial.audit_note_written);
    }

    #[tokio::test]
    async fn render_failure_is_a_data_error() {
        let fixture = Fixture::new();
        let mut bad = detail("F-1");
        bad.applicant_cpr = String::new();

        let failure = fixture
            .sequencer()
            .dispatch(&bad, &pass_for("F-1"), today())
            .await
            .unwrap_err();

        assert_eq!(failure.stage(), DispatchStage::Render);
        assert!(matches!(failure.error.source, CaseError::Data(_)));
        assert!(fixture.calls().is_empty());
    }

    #[tokio::test]
    async fn pass_for_another_case_is_rejected() {
        let fixture = Fixture::new();
        let failure = fixture
            .sequencer()
            .dispatch(&detail("F-1"), &pass_for("F-2"), today())
            .await
            .unwrap_err();

        assert!(matches!(failure.error.source, CaseError::Consistency(_)));
        assert!(fixture.calls().is_empty());
    }

    #[tokio::test]
    async fn filing_never_precedes_delivery() {
        for fail_at in ["none", "deliver", "file", "audit"] {
            let fixture = Fixture::new();
            match fail_at {
                "deliver" => fixture.fail_delivery("x"),
                "file" => fixture.fail_filing("x"),
                "audit" => fixture.fail_audit("x"),
                _ => {}
            }
            let _ = fixture
                .sequencer()
                .dispatch(&detail("F-9"), &pass_for("F-9"), today())
                .await;

            let calls = fixture.calls();
            let deliver = calls.iter().position(|c| c.starts_with("deliver"));
            if let Some(file) = calls.iter().position(|c| c.starts_with("file")) {
                assert!(deliver.is_some_and(|d| d < file), "filed before delivery: {calls:?}");
                assert_ne!(fail_at, "deliver");
            }
        }
    }
}
