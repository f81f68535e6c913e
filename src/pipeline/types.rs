//! Shared types for the dispatch pipeline.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::config::{CandidateQuery, DeliveryMetadata};
use crate::error::CaseError;

// ── Case summaries ──────────────────────────────────────────────────

/// Decision status of a case as shown in the case list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CaseStatus {
    Approved,
    Other(String),
}

impl CaseStatus {
    /// Map the case system's status label, given the label meaning "approved".
    pub fn from_label(label: &str, approved_label: &str) -> Self {
        if label.trim() == approved_label {
            Self::Approved
        } else {
            Self::Other(label.trim().to_string())
        }
    }
}

/// One row of the candidate case list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseSummary {
    pub case_identifier: String,
    pub case_types: BTreeSet<String>,
    pub status: CaseStatus,
}

// ── Case detail ─────────────────────────────────────────────────────

/// A person moving as part of a case.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovingPerson {
    /// `"A"` marks the applicant.
    pub role_marker: String,
    /// Person identifier as displayed, possibly with a dash.
    pub cpr: String,
    /// Display name, `"Last, First"`.
    pub display_name: String,
}

/// Raw case detail as read from the case system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseSheet {
    pub case_identifier: String,
    pub moving_persons: Vec<MovingPerson>,
    pub address: String,
    pub move_date: String,
}

/// Marker identifying the main applicant among the moving persons.
const MAIN_APPLICANT_MARKER: &str = "A";

impl CaseSheet {
    /// Resolve the main applicant and build a `CaseDetail`.
    pub fn into_detail(self) -> Result<CaseDetail, CaseError> {
        let applicant = self
            .moving_persons
            .iter()
            .find(|p| p.role_marker.trim() == MAIN_APPLICANT_MARKER)
            .ok_or_else(|| {
                CaseError::Data(format!(
                    "no main applicant found on case {}",
                    self.case_identifier
                ))
            })?;

        let applicant_cpr = applicant.cpr.replace('-', "");
        let applicant_name = display_name_to_full_name(&applicant.display_name);

        Ok(CaseDetail {
            case_identifier: self.case_identifier,
            applicant_cpr,
            applicant_name,
            address: self.address,
            move_date: self.move_date,
        })
    }
}

/// Turn `"Last, First Middle"` into `"First Middle Last"`.
///
/// Names without a comma are returned trimmed and unchanged.
pub fn display_name_to_full_name(display_name: &str) -> String {
    match display_name.split_once(',') {
        Some((last, first)) => format!("{} {}", first.trim(), last.trim()),
        None => display_name.trim().to_string(),
    }
}

/// The data needed to write and deliver the letter for one case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseDetail {
    pub case_identifier: String,
    pub applicant_cpr: String,
    pub applicant_name: String,
    /// Multi-line address; line breaks are preserved in the letter.
    pub address: String,
    /// Display-formatted move date.
    pub move_date: String,
}

// ── Documents and references ────────────────────────────────────────

/// A rendered binary document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Where a letter was filed in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryReference {
    pub case_uuid: String,
    pub case_number: String,
}

/// Inclusive calendar range for the candidate query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    /// The `days` days leading up to and including `today`.
    ///
    /// `None` when `days` is negative or reaches past the calendar.
    pub fn lookback(today: NaiveDate, days: i64) -> Option<Self> {
        if days < 0 {
            return None;
        }
        let from = today.checked_sub_signed(TimeDelta::try_days(days)?)?;
        Some(Self { from, to: today })
    }
}

/// Canonical content of a notification letter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Letter {
    pub recipient_name: String,
    pub address: String,
    pub move_date: String,
    pub case_identifier: String,
    /// Date printed on the letter.
    pub letter_date: NaiveDate,
}

// ── Capability traits ───────────────────────────────────────────────

/// The case-management system. How it is reached (browser session, REST
/// facade, fixture) is up to the implementation.
#[async_trait]
pub trait CaseSystem: Send + Sync {
    /// List cases in the date range matching the query.
    async fn list_candidate_cases(
        &self,
        range: DateRange,
        query: &CandidateQuery,
    ) -> Result<Vec<CaseSummary>, CaseError>;

    /// Load the detail view of one case.
    async fn fetch_case_detail(&self, case_identifier: &str) -> Result<CaseDetail, CaseError>;

    /// Read the text of every entry in the case's own log.
    async fn read_audit_log(&self, case_identifier: &str) -> Result<Vec<String>, CaseError>;

    /// Append an entry to the case's own log.
    async fn write_audit_note(
        &self,
        case_identifier: &str,
        activity: &str,
        note_text: &str,
    ) -> Result<(), CaseError>;

    /// Add a free-text journal note to the case.
    async fn add_case_note(&self, case_identifier: &str, text: &str) -> Result<(), CaseError>;
}

/// Renders letters into documents. Must be pure.
pub trait LetterRenderer: Send + Sync {
    fn render(&self, letter: &Letter) -> Result<Document, CaseError>;
}

/// The postal gateway delivering documents to citizens.
#[async_trait]
pub trait PostalGateway: Send + Sync {
    async fn deliver(
        &self,
        recipient_id: &str,
        document: &Document,
        metadata: &DeliveryMetadata,
    ) -> Result<(), CaseError>;
}

/// The records system where sent letters are filed.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Create a registry case for the applicant and file the document under it.
    async fn file(
        &self,
        applicant_id: &str,
        applicant_name: &str,
        document: &Document,
        case_identifier: &str,
    ) -> Result<RegistryReference, CaseError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(persons: Vec<MovingPerson>) -> CaseSheet {
        CaseSheet {
            case_identifier: "F-2024-001".into(),
            moving_persons: persons,
            address: "Testvej 1\n8000 Aarhus C".into(),
            move_date: "01-02-2024".into(),
        }
    }

    fn person(marker: &str, cpr: &str, name: &str) -> MovingPerson {
        MovingPerson {
            role_marker: marker.into(),
            cpr: cpr.into(),
            display_name: name.into(),
        }
    }

    #[test]
    fn resolves_main_applicant() {
        let detail = sheet(vec![
            person("B", "020202-2222", "Jensen, Lille"),
            person("A", "010101-1111", "Jensen, Anne Marie"),
        ])
        .into_detail()
        .unwrap();

        assert_eq!(detail.applicant_cpr, "0101011111");
        assert_eq!(detail.applicant_name, "Anne Marie Jensen");
        assert_eq!(detail.case_identifier, "F-2024-001");
    }

    #[test]
    fn missing_main_applicant_is_a_data_error() {
        let err = sheet(vec![person("B", "020202-2222", "Jensen, Lille")])
            .into_detail()
            .unwrap_err();
        assert!(matches!(err, CaseError::Data(_)));
    }

    #[test]
    fn name_without_comma_is_kept() {
        assert_eq!(display_name_to_full_name("  Madonna "), "Madonna");
    }

    #[test]
    fn status_label_mapping() {
        assert_eq!(CaseStatus::from_label("Godkendt ", "Godkendt"), CaseStatus::Approved);
        assert_eq!(
            CaseStatus::from_label("Afvist", "Godkendt"),
            CaseStatus::Other("Afvist".into())
        );
    }

    #[test]
    fn lookback_range_is_inclusive_of_today() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        let range = DateRange::lookback(today, 5).unwrap();
        assert_eq!(range.from, NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(range.to, today);
    }

    #[test]
    fn lookback_past_the_calendar_is_none() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        assert_eq!(DateRange::lookback(today, 100_000_000), None);
        assert_eq!(DateRange::lookback(today, i64::MAX), None);
        assert_eq!(DateRange::lookback(today, -1), None);
        assert_eq!(DateRange::lookback(today, 0).map(|r| r.from), Some(today));
    }
}
