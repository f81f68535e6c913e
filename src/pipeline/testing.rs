//! In-memory collaborators for pipeline unit tests.
//!
//! `FakeWorld` implements every capability trait and records each call as
//! `"<step>:<key>"` so tests can assert on ordering.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::config::{CandidateQuery, DeliveryMetadata, DispatchConfig};
use crate::error::CaseError;
use crate::pipeline::controller::RunController;
use crate::pipeline::dispatch::DispatchSequencer;
use crate::pipeline::types::{
    CaseDetail, CaseStatus, CaseSummary, CaseSystem, DateRange, Document, Letter,
    LetterRenderer, PostalGateway, Registry, RegistryReference,
};
use crate::store::WorkQueue;

#[derive(Default)]
pub struct FakeWorld {
    calls: Mutex<Vec<String>>,
    candidates: Mutex<Vec<CaseSummary>>,
    details: Mutex<HashMap<String, CaseDetail>>,
    audit_logs: Mutex<HashMap<String, Vec<String>>>,
    notes: Mutex<HashMap<String, Vec<String>>>,
    fail_delivery: Mutex<Option<String>>,
    fail_filing: Mutex<Option<String>>,
    fail_audit: Mutex<Option<String>>,
    fail_log_read: Mutex<Option<String>>,
}

impl FakeWorld {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn failure(slot: &Mutex<Option<String>>, service: &str) -> Result<(), CaseError> {
        match slot.lock().unwrap().as_ref() {
            Some(reason) => Err(CaseError::transient(service, reason)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CaseSystem for FakeWorld {
    async fn list_candidate_cases(
        &self,
        _range: DateRange,
        _query: &CandidateQuery,
    ) -> Result<Vec<CaseSummary>, CaseError> {
        Ok(self.candidates.lock().unwrap().clone())
    }

    async fn fetch_case_detail(&self, case_identifier: &str) -> Result<CaseDetail, CaseError> {
        self.record(format!("fetch:{case_identifier}"));
        self.details
            .lock()
            .unwrap()
            .get(case_identifier)
            .cloned()
            .ok_or_else(|| CaseError::Data(format!("no main applicant found on case {case_identifier}")))
    }

    async fn read_audit_log(&self, case_identifier: &str) -> Result<Vec<String>, CaseError> {
        Self::failure(&self.fail_log_read, "case system")?;
        Ok(self.audit_log(case_identifier))
    }

    async fn write_audit_note(
        &self,
        case_identifier: &str,
        _activity: &str,
        note_text: &str,
    ) -> Result<(), CaseError> {
        self.record(format!("audit:{case_identifier}"));
        Self::failure(&self.fail_audit, "case system")?;
        self.audit_logs
            .lock()
            .unwrap()
            .entry(case_identifier.to_string())
            .or_default()
            .push(note_text.to_string());
        Ok(())
    }

    async fn add_case_note(&self, case_identifier: &str, text: &str) -> Result<(), CaseError> {
        self.record(format!("note:{case_identifier}"));
        self.notes
            .lock()
            .unwrap()
            .entry(case_identifier.to_string())
            .or_default()
            .push(text.to_string());
        Ok(())
    }
}

impl LetterRenderer for FakeWorld {
    fn render(&self, letter: &Letter) -> Result<Document, CaseError> {
        self.record(format!("render:{}", letter.case_identifier));
        Ok(Document {
            file_name: "Brev.pdf".into(),
            content_type: "application/pdf".into(),
            bytes: format!("letter for {}", letter.recipient_name).into_bytes(),
        })
    }
}

#[async_trait]
impl PostalGateway for FakeWorld {
    async fn deliver(
        &self,
        recipient_id: &str,
        _document: &Document,
        _metadata: &DeliveryMetadata,
    ) -> Result<(), CaseError> {
        self.record(format!("deliver:{recipient_id}"));
        Self::failure(&self.fail_delivery, "postal gateway")
    }
}

#[async_trait]
impl Registry for FakeWorld {
    async fn file(
        &self,
        _applicant_id: &str,
        _applicant_name: &str,
        _document: &Document,
        case_identifier: &str,
    ) -> Result<RegistryReference, CaseError> {
        self.record(format!("file:{case_identifier}"));
        Self::failure(&self.fail_filing, "registry")?;
        Ok(RegistryReference {
            case_uuid: format!("uuid-{case_identifier}"),
            case_number: format!("S2024-{case_identifier}"),
        })
    }
}

/// A fake world plus the config to run against it.
pub struct Fixture {
    pub world: Arc<FakeWorld>,
    pub config: Arc<DispatchConfig>,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            world: Arc::new(FakeWorld::default()),
            config: Arc::new(DispatchConfig::default()),
        }
    }

    pub fn sequencer(&self) -> DispatchSequencer {
        DispatchSequencer::new(
            self.world.clone(),
            self.world.clone(),
            self.world.clone(),
            self.world.clone(),
            self.config.clone(),
        )
    }

    pub fn controller(&self, queue: Arc<dyn WorkQueue>) -> RunController {
        RunController::new(
            self.world.clone(),
            queue,
            self.world.clone(),
            self.world.clone(),
            self.world.clone(),
            self.config.clone(),
        )
    }

    /// Register an approved, eligible case with a resolvable detail.
    pub fn add_case(&self, case_identifier: &str) {
        self.add_summary(approved(case_identifier));
        self.world
            .details
            .lock()
            .unwrap()
            .insert(case_identifier.to_string(), detail(case_identifier));
    }

    /// Register a summary without a detail (fetching it fails).
    pub fn add_summary(&self, summary: CaseSummary) {
        self.world.candidates.lock().unwrap().push(summary);
    }

    pub fn calls(&self) -> Vec<String> {
        self.world.calls.lock().unwrap().clone()
    }

    pub fn audit_log(&self, case_identifier: &str) -> Vec<String> {
        self.world.audit_log(case_identifier)
    }

    pub fn seed_audit_log(&self, case_identifier: &str, entry: &str) {
        self.world
            .audit_logs
            .lock()
            .unwrap()
            .entry(case_identifier.to_string())
            .or_default()
            .push(entry.to_string());
    }

    pub fn fail_delivery(&self, reason: &str) {
        *self.world.fail_delivery.lock().unwrap() = Some(reason.to_string());
    }

    pub fn fail_filing(&self, reason: &str) {
        *self.world.fail_filing.lock().unwrap() = Some(reason.to_string());
    }

    pub fn fail_audit(&self, reason: &str) {
        *self.world.fail_audit.lock().unwrap() = Some(reason.to_string());
    }

    pub fn fail_log_read(&self, reason: &str) {
        *self.world.fail_log_read.lock().unwrap() = Some(reason.to_string());
    }

    pub fn deliveries(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| call.starts_with("deliver:"))
            .count()
    }

    pub fn clear_failures(&self) {
        *self.world.fail_delivery.lock().unwrap() = None;
        *self.world.fail_filing.lock().unwrap() = None;
        *self.world.fail_audit.lock().unwrap() = None;
        *self.world.fail_log_read.lock().unwrap() = None;
    }
}

impl FakeWorld {
    fn audit_log(&self, case_identifier: &str) -> Vec<String> {
        self.audit_logs
            .lock()
            .unwrap()
            .get(case_identifier)
            .cloned()
            .unwrap_or_default()
    }
}

pub fn approved(case_identifier: &str) -> CaseSummary {
    CaseSummary {
        case_identifier: case_identifier.to_string(),
        case_types: ["Flytning".to_string()].into_iter().collect(),
        status: CaseStatus::Approved,
    }
}

pub fn detail(case_identifier: &str) -> CaseDetail {
    CaseDetail {
        case_identifier: case_identifier.to_string(),
        applicant_cpr: "0101011111".to_string(),
        applicant_name: "Anne Jensen".to_string(),
        address: "Testvej 1\n8000 Aarhus C".to_string(),
        move_date: "01-06-2024".to_string(),
    }
}
