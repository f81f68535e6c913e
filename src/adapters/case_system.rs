//! Case-management system over its REST facade.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::adapters::{build_client, ensure_success, parse_base_url, segment_url, transport_error};
use crate::config::{CandidateQuery, CaseSystemConfig};
use crate::error::{CaseError, SetupError};
use crate::pipeline::types::{
    CaseDetail, CaseSheet, CaseStatus, CaseSummary, CaseSystem, DateRange,
};

const SERVICE: &str = "case system";

/// A row of the case search result.
#[derive(Debug, Clone, Deserialize)]
struct CaseRow {
    case_number: String,
    #[serde(default)]
    case_types: Vec<String>,
    status: String,
}

impl CaseRow {
    fn into_summary(self, approved_label: &str) -> CaseSummary {
        CaseSummary {
            status: CaseStatus::from_label(&self.status, approved_label),
            case_identifier: self.case_number,
            case_types: self.case_types.into_iter().map(|t| t.trim().to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct LogEntry {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct NewLogEntry<'a> {
    activity: &'a str,
    /// `dd-mm-YYYY`, as the case log displays it.
    date: String,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct NewNote<'a> {
    text: &'a str,
}

/// `CaseSystem` over HTTP with basic auth.
pub struct HttpCaseSystem {
    client: Client,
    base_url: Url,
    username: String,
    password: SecretString,
    approved_label: String,
}

impl HttpCaseSystem {
    pub fn new(
        config: &CaseSystemConfig,
        approved_label: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SetupError> {
        Ok(Self {
            client: build_client(SERVICE, Client::builder(), timeout)?,
            base_url: parse_base_url(SERVICE, &config.base_url)?,
            username: config.username.clone(),
            password: config.password.clone(),
            approved_label: approved_label.into(),
        })
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
    }

    fn post(&self, url: Url) -> reqwest::RequestBuilder {
        self.client
            .post(url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, CaseError> {
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        ensure_success(SERVICE, response).await
    }
}

fn search_params(range: DateRange, query: &CandidateQuery) -> [(&'static str, String); 4] {
    [
        ("from", range.from.format("%Y-%m-%d").to_string()),
        ("to", range.to.format("%Y-%m-%d").to_string()),
        ("state", query.case_state.clone()),
        ("status", query.case_status.clone()),
    ]
}

/// `cases/{case_identifier}[/{sub}]`, with the identifier kept as one
/// segment whatever characters it holds.
fn case_url(base: &Url, case_identifier: &str, sub: Option<&str>) -> Url {
    segment_url(base, ["cases", case_identifier].into_iter().chain(sub))
}

#[async_trait]
impl CaseSystem for HttpCaseSystem {
    async fn list_candidate_cases(
        &self,
        range: DateRange,
        query: &CandidateQuery,
    ) -> Result<Vec<CaseSummary>, CaseError> {
        let response = self
            .send(
                self.get(segment_url(&self.base_url, ["cases"]))
                    .query(&search_params(range, query)),
            )
            .await?;
        let rows: Vec<CaseRow> = response
            .json()
            .await
            .map_err(|e| CaseError::transient(SERVICE, format!("invalid case list: {e}")))?;
        debug!(count = rows.len(), "Case search returned rows");
        Ok(rows
            .into_iter()
            .map(|row| row.into_summary(&self.approved_label))
            .collect())
    }

    async fn fetch_case_detail(&self, case_identifier: &str) -> Result<CaseDetail, CaseError> {
        let response = self
            .send(self.get(case_url(&self.base_url, case_identifier, None)))
            .await?;
        let sheet: CaseSheet = response
            .json()
            .await
            .map_err(|e| CaseError::Data(format!("unreadable case sheet for {case_identifier}: {e}")))?;
        sheet.into_detail()
    }

    async fn read_audit_log(&self, case_identifier: &str) -> Result<Vec<String>, CaseError> {
        let response = self
            .send(self.get(case_url(&self.base_url, case_identifier, Some("log"))))
            .await?;
        let entries: Vec<LogEntry> = response
            .json()
            .await
            .map_err(|e| CaseError::transient(SERVICE, format!("invalid case log: {e}")))?;
        Ok(entries.into_iter().map(|e| e.text).collect())
    }

    async fn write_audit_note(
        &self,
        case_identifier: &str,
        activity: &str,
        note_text: &str,
    ) -> Result<(), CaseError> {
        let entry = NewLogEntry {
            activity,
            date: Local::now().format("%d-%m-%Y").to_string(),
            text: note_text,
        };
        self.send(
            self.post(case_url(&self.base_url, case_identifier, Some("log")))
                .json(&entry),
        )
        .await?;
        debug!(case = %case_identifier, activity, "Case log entry written");
        Ok(())
    }

    async fn add_case_note(&self, case_identifier: &str, text: &str) -> Result<(), CaseError> {
        self.send(
            self.post(case_url(&self.base_url, case_identifier, Some("notes")))
                .json(&NewNote { text }),
        )
        .await?;
        Ok(())
    }
}
