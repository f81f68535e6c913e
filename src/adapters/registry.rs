//! Case registry filing.
//!
//! Filing a letter is three calls: create a registry case for the applicant,
//! upload the document, attach it to the case. Each filing creates a fresh
//! registry case, so a retried filing leaves duplicate paperwork behind
//! rather than nothing.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Url};
use reqwest::multipart::{Form, Part};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::adapters::{build_client, ensure_success, parse_base_url, segment_url, transport_error};
use crate::config::{Caseworker, Department, RegistryConfig, RegistryMetadata};
use crate::error::{CaseError, SetupError};
use crate::pipeline::types::{Document, Registry, RegistryReference};

const SERVICE: &str = "registry";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NewRegistryCase<'a> {
    uuid: Uuid,
    title: &'a str,
    case_date: DateTime<Utc>,
    progress_state: &'a str,
    kle_number: &'a str,
    proceeding_facet: &'a str,
    sensitivity: &'a str,
    caseworker: &'a Caseworker,
    responsible_department: &'a Department,
    security_unit: &'a Department,
    case_parties: Vec<CaseParty<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CaseParty<'a> {
    role: &'static str,
    identification_type: &'static str,
    identification: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttachDocument<'a> {
    document_uuid: &'a str,
    title: &'a str,
    sensitivity: &'a str,
    document_type: &'a str,
    description: &'a str,
    approved: bool,
    security_unit: &'a Department,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegistryCase {
    case_number: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedDocument {
    document_uuid: String,
}

fn new_case_payload<'a>(
    metadata: &'a RegistryMetadata,
    case_uuid: Uuid,
    applicant_id: &'a str,
    applicant_name: &'a str,
) -> NewRegistryCase<'a> {
    NewRegistryCase {
        uuid: case_uuid,
        title: &metadata.case_title,
        case_date: Utc::now(),
        progress_state: &metadata.progress_state,
        kle_number: &metadata.kle_number,
        proceeding_facet: &metadata.proceeding_facet,
        sensitivity: &metadata.sensitivity,
        caseworker: &metadata.caseworker,
        responsible_department: &metadata.responsible_department,
        security_unit: &metadata.security_unit,
        case_parties: vec![CaseParty {
            role: "Primær",
            identification_type: "CprNummer",
            identification: applicant_id,
            name: applicant_name,
        }],
    }
}

fn attach_payload<'a>(metadata: &'a RegistryMetadata, document_uuid: &'a str) -> AttachDocument<'a> {
    AttachDocument {
        document_uuid,
        title: &metadata.document_title,
        sensitivity: &metadata.sensitivity,
        document_type: &metadata.document_type,
        description: &metadata.document_description,
        approved: true,
        security_unit: &metadata.security_unit,
    }
}

/// `Registry` over the registry's REST API, authenticated with OAuth client
/// credentials.
pub struct HttpRegistry {
    client: Client,
    base_url: Url,
    client_id: String,
    client_secret: SecretString,
    metadata: RegistryMetadata,
}

impl HttpRegistry {
    pub fn new(
        config: &RegistryConfig,
        metadata: RegistryMetadata,
        timeout: Duration,
    ) -> Result<Self, SetupError> {
        Ok(Self {
            client: build_client(SERVICE, Client::builder(), timeout)?,
            base_url: parse_base_url(SERVICE, &config.base_url)?,
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            metadata,
        })
    }

    fn url<const N: usize>(&self, segments: [&str; N]) -> Url {
        segment_url(&self.base_url, segments)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, CaseError> {
        let response = request
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        ensure_success(SERVICE, response).await
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
        what: &str,
    ) -> Result<T, CaseError> {
        response
            .json()
            .await
            .map_err(|e| CaseError::transient(SERVICE, format!("invalid {what} response: {e}")))
    }

    async fn access_token(&self) -> Result<String, CaseError> {
        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ];
        let response = self
            .send(self.client.post(self.url(["oauth", "token"])).form(&form))
            .await?;
        let token: TokenResponse = Self::read_json(response, "token").await?;
        Ok(token.access_token)
    }

    async fn create_case(
        &self,
        token: &str,
        applicant_id: &str,
        applicant_name: &str,
    ) -> Result<RegistryReference, CaseError> {
        let case_uuid = Uuid::new_v4();
        let payload = new_case_payload(&self.metadata, case_uuid, applicant_id, applicant_name);
        self.send(
            self.client
                .post(self.url(["cases"]))
                .bearer_auth(token)
                .json(&payload),
        )
        .await?;

        // The case number is assigned by the registry.
        let response = self
            .send(
                self.client
                    .get(self.url(["cases", case_uuid.to_string().as_str()]))
                    .bearer_auth(token),
            )
            .await?;
        let created: RegistryCase = Self::read_json(response, "case").await?;

        Ok(RegistryReference {
            case_uuid: case_uuid.to_string(),
            case_number: created.case_number,
        })
    }

    async fn upload(&self, token: &str, document: &Document) -> Result<String, CaseError> {
        let part = Part::bytes(document.bytes.clone())
            .file_name(format!("{}.pdf", self.metadata.document_title))
            .mime_str(&document.content_type)
            .map_err(|e| CaseError::Data(format!("invalid document content type: {e}")))?;
        let form = Form::new().part("file", part);

        let response = self
            .send(
                self.client
                    .post(self.url(["documents"]))
                    .bearer_auth(token)
                    .multipart(form),
            )
            .await?;
        let uploaded: UploadedDocument = Self::read_json(response, "upload").await?;
        Ok(uploaded.document_uuid)
    }
}

#[async_trait]
impl Registry for HttpRegistry {
    async fn file(
        &self,
        applicant_id: &str,
        applicant_name: &str,
        document: &Document,
        case_identifier: &str,
    ) -> Result<RegistryReference, CaseError> {
        let token = self.access_token().await?;

        let reference = self.create_case(&token, applicant_id, applicant_name).await?;
        debug!(
            case = %case_identifier,
            registry_case = %reference.case_number,
            "Registry case created"
        );

        let document_uuid = self.upload(&token, document).await?;
        let payload = attach_payload(&self.metadata, &document_uuid);
        self.send(
            self.client
                .post(self.url(["cases", reference.case_uuid.as_str(), "documents"]))
                .bearer_auth(&token)
                .json(&payload),
        )
        .await?;

        info!(
            case = %case_identifier,
            registry_case = %reference.case_number,
            document = %document_uuid,
            "Document attached to registry case"
        );
        Ok(reference)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;

    #[test]
    fn new_case_names_the_applicant_as_primary_party() {
        let metadata = DispatchConfig::default().registry;
        let case_uuid = Uuid::new_v4();
        let payload = new_case_payload(&metadata, case_uuid, "0101011111", "Anne Jensen");
        let json = serde_json::to_value(&payload).unwrap();

        assert_eq!(json["uuid"], case_uuid.to_string());
        assert_eq!(json["kleNumber"], "23.00.00");
        assert_eq!(json["proceedingFacet"], "G01");
        assert_eq!(json["sensitivity"], "Følsomme");
        assert_eq!(json["progressState"], "Afsluttet");
        assert_eq!(json["caseParties"][0]["role"], "Primær");
        assert_eq!(json["caseParties"][0]["identificationType"], "CprNummer");
        assert_eq!(json["caseParties"][0]["identification"], "0101011111");
        assert_eq!(json["caseParties"][0]["name"], "Anne Jensen");
        assert_eq!(json["securityUnit"]["id"], 818485);
    }

    #[test]
    fn attached_document_is_outgoing_and_approved() {
        let metadata = DispatchConfig::default().registry;
        let json = serde_json::to_value(attach_payload(&metadata, "doc-1")).unwrap();

        assert_eq!(json["documentUuid"], "doc-1");
        assert_eq!(json["documentType"], "Udgående");
        assert_eq!(json["approved"], true);
        assert_eq!(json["title"], "Orienteringsbrev om flyttesag");
    }

    #[test]
    fn responses_use_camel_case() {
        let case: RegistryCase = serde_json::from_str(r#"{"caseNumber": "S2024-1"}"#).unwrap();
        assert_eq!(case.case_number, "S2024-1");
        let doc: UploadedDocument = serde_json::from_str(r#"{"documentUuid": "d-1"}"#).unwrap();
        assert_eq!(doc.document_uuid, "d-1");
    }
}
