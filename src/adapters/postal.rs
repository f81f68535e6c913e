//! Digital-post delivery through the government postal gateway.
//!
//! The gateway authenticates the sending organisation by client certificate.
//! The letter travels base64-encoded inside a JSON message.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, Identity, Url};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::adapters::{build_client, ensure_success, parse_base_url, segment_url, transport_error};
use crate::config::{DeliveryMetadata, PostalConfig};
use crate::error::{CaseError, SetupError};
use crate::pipeline::types::{Document, PostalGateway};

const SERVICE: &str = "postal gateway";

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct DigitalPostMessage {
    #[serde(rename = "messageUUID")]
    message_uuid: Uuid,
    label: String,
    recipient: Recipient,
    sender: Sender,
    files: Vec<MessageFile>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Recipient {
    #[serde(rename = "recipientID")]
    recipient_id: String,
    id_type: &'static str,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct Sender {
    #[serde(rename = "senderID")]
    sender_id: String,
    id_type: &'static str,
    label: String,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct MessageFile {
    filename: String,
    language: String,
    encoding_format: String,
    content: String,
}

fn build_message(
    recipient_id: &str,
    document: &Document,
    metadata: &DeliveryMetadata,
) -> Result<DigitalPostMessage, CaseError> {
    if recipient_id.trim().is_empty() {
        return Err(CaseError::Data("no recipient person identifier".into()));
    }
    Ok(DigitalPostMessage {
        message_uuid: Uuid::new_v4(),
        label: metadata.label.clone(),
        recipient: Recipient {
            recipient_id: recipient_id.to_string(),
            id_type: "CPR",
        },
        sender: Sender {
            sender_id: metadata.sender_id.clone(),
            id_type: "CVR",
            label: metadata.sender_label.clone(),
        },
        files: vec![MessageFile {
            filename: metadata.file_name.clone(),
            language: metadata.language.clone(),
            encoding_format: document.content_type.clone(),
            content: BASE64.encode(&document.bytes),
        }],
    })
}

fn read_pem(path: &Path) -> Result<Vec<u8>, SetupError> {
    std::fs::read(path).map_err(|e| SetupError::Certificate {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// `PostalGateway` for the digital-post service.
pub struct DigitalPostGateway {
    client: Client,
    messages_url: Url,
}

impl DigitalPostGateway {
    /// Load the client certificate and build the HTTP client.
    ///
    /// A missing or unreadable certificate aborts setup.
    pub fn new(config: &PostalConfig, timeout: Duration) -> Result<Self, SetupError> {
        let base_url = parse_base_url(SERVICE, &config.base_url)?;
        let certificate = read_pem(&config.certificate_path)?;
        let key = read_pem(&config.key_path)?;
        let identity =
            Identity::from_pkcs8_pem(&certificate, &key).map_err(|e| SetupError::Certificate {
                path: config.certificate_path.display().to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client: build_client(SERVICE, Client::builder().identity(identity), timeout)?,
            messages_url: segment_url(&base_url, ["messages"]),
        })
    }
}

#[async_trait]
impl PostalGateway for DigitalPostGateway {
    async fn deliver(
        &self,
        recipient_id: &str,
        document: &Document,
        metadata: &DeliveryMetadata,
    ) -> Result<(), CaseError> {
        let message = build_message(recipient_id, document, metadata)?;
        let message_uuid = message.message_uuid;

        let response = self
            .client
            .post(self.messages_url.clone())
            .json(&message)
            .send()
            .await
            .map_err(|e| transport_error(SERVICE, e))?;
        ensure_success(SERVICE, response).await?;

        debug!(message = %message_uuid, "Digital post message accepted");
        Ok(())
    }
}
