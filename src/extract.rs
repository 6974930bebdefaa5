//! `DocumentExtractor` implementation for the document-understanding gateway.
//!
//! One POST per file: the image travels base64-encoded with its mime type and
//! a document kind; the service answers with the structured fields. A bank
//! slip without a positive amount is rejected here so downstream code never
//! sees one.

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use crate::contract::{
    DocumentExtractor, ExtractError, ExtractedBankSlip, ExtractedPoDocument, RemoteFile,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(40);

#[derive(Serialize)]
struct ExtractionRequest<'a> {
    kind: &'static str,
    image_base64: String,
    mime_type: &'a str,
}

#[derive(Deserialize)]
struct ExtractionEnvelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct BankSlipPayload {
    amount: Option<f64>,
    recipient_name: Option<String>,
    transaction_date: Option<String>,
    transaction_id: Option<String>,
}

pub struct ExtractionClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl ExtractionClient {
    pub fn new(endpoint: String, api_key: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            endpoint,
            api_key,
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        kind: &'static str,
        file: &RemoteFile,
    ) -> Result<T, ExtractError> {
        let body = ExtractionRequest {
            kind,
            image_base64: base64::engine::general_purpose::STANDARD.encode(&file.content),
            mime_type: &file.mime_type,
        };
        debug!(file = %file.name, kind, "sending file to extraction service");
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ExtractError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            error!(file = %file.name, %status, "extraction service rejected the request");
            return Err(ExtractError::Service {
                status: status.as_u16(),
            });
        }
        let envelope: ExtractionEnvelope<T> = response
            .json()
            .await
            .map_err(|e| ExtractError::Decode(e.to_string()))?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl DocumentExtractor for ExtractionClient {
    async fn extract_purchase_order(
        &self,
        file: &RemoteFile,
    ) -> Result<ExtractedPoDocument, ExtractError> {
        self.call("purchase_order", file).await
    }

    async fn extract_bank_slip(
        &self,
        file: &RemoteFile,
    ) -> Result<ExtractedBankSlip, ExtractError> {
        let payload: BankSlipPayload = self.call("bank_slip", file).await?;
        let amount = match payload.amount {
            Some(a) if a > 0.0 => a,
            _ => return Err(ExtractError::MissingAmount),
        };
        Ok(ExtractedBankSlip {
            amount,
            recipient_name: payload.recipient_name.unwrap_or_default(),
            transaction_date: payload.transaction_date,
            transaction_id: payload.transaction_id,
        })
    }
}
