//! Phaxio-class provider: URL-fetch send, HMAC-signed callbacks.
//!
//! `send` hands Phaxio a tokenized URL to the rendered PDF; the provider
//! fetches it and reports completion through a webhook whose raw body is
//! signed with HMAC-SHA256 (hex) under the shared callback token. The
//! callback's page count is authoritative.

use async_trait::async_trait;
use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;

use super::{CallbackEvent, OutboundProvider, ProviderError, SendOutcome, SendRequest};
use crate::api::models::{Backend, JobStatus};
use crate::config::PhaxioConfig;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-phaxio-signature";

pub struct PhaxioProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    api_secret: String,
    callback_token: Option<String>,
}

impl PhaxioProvider {
    pub fn new(config: &PhaxioConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Send(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().unwrap_or_default(),
            api_secret: config.api_secret.clone().unwrap_or_default(),
            callback_token: config.callback_token.clone(),
        })
    }

    fn map_status(status: &str) -> JobStatus {
        match status.to_ascii_lowercase().as_str() {
            "success" => JobStatus::Success,
            "queued" | "inprogress" | "inprocess" => JobStatus::InProgress,
            _ => JobStatus::Failed,
        }
    }
}

#[async_trait]
impl OutboundProvider for PhaxioProvider {
    fn backend(&self) -> Backend {
        Backend::Phaxio
    }

    async fn send(&self, request: SendRequest<'_>) -> Result<SendOutcome, ProviderError> {
        let pdf_url = request
            .pdf_url
            .ok_or_else(|| ProviderError::Send("missing content url".into()))?;

        let response = self
            .client
            .post(format!("{}/faxes", self.base_url))
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .form(&[
                ("to", request.job.to_number.as_str()),
                ("content_url", pdf_url),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Send(sanitize_reqwest(&e)))?;

        if !response.status().is_success() {
            return Err(ProviderError::Send(format!(
                "provider returned {}",
                response.status().as_u16()
            )));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|_| ProviderError::Send("unparseable provider response".into()))?;

        if body.get("success").and_then(|v| v.as_bool()) != Some(true) {
            return Err(ProviderError::Send("provider rejected the fax".into()));
        }

        let sid = body
            .pointer("/data/id")
            .map(json_id)
            .ok_or_else(|| ProviderError::Send("provider response missing fax id".into()))?;

        Ok(SendOutcome {
            provider_sid: sid,
            status: JobStatus::InProgress,
            completion: None,
        })
    }

    async fn get_status(&self, provider_sid: &str) -> Result<JobStatus, ProviderError> {
        let response = self
            .client
            .get(format!("{}/faxes/{}", self.base_url, provider_sid))
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .send()
            .await
            .map_err(|e| ProviderError::Send(sanitize_reqwest(&e)))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|_| ProviderError::Parse("unparseable status response".into()))?;

        let status = body
            .pointer("/data/status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::Parse("status missing".into()))?;

        Ok(Self::map_status(status))
    }

    fn verify_callback(&self, headers: &HeaderMap, raw_body: &[u8]) -> Result<(), ProviderError> {
        let token = self
            .callback_token
            .as_deref()
            .ok_or_else(|| ProviderError::Auth("callback token not configured".into()))?;

        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ProviderError::Auth("missing signature header".into()))?;

        let signature = hex::decode(signature.trim())
            .map_err(|_| ProviderError::Auth("malformed signature".into()))?;

        let mut mac = HmacSha256::new_from_slice(token.as_bytes())
            .map_err(|_| ProviderError::Auth("bad callback token".into()))?;
        mac.update(raw_body);
        mac.verify_slice(&signature)
            .map_err(|_| ProviderError::Auth("signature mismatch".into()))
    }

    fn parse_callback(&self, raw_body: &[u8]) -> Result<CallbackEvent, ProviderError> {
        let body: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let fax = body
            .get("fax")
            .ok_or_else(|| ProviderError::Parse("missing fax object".into()))?;

        let provider_sid = fax
            .get("id")
            .map(json_id)
            .ok_or_else(|| ProviderError::Parse("missing fax id".into()))?;

        let status_str = fax.get("status").and_then(|v| v.as_str()).unwrap_or("");
        let success = body.get("success").and_then(|v| v.as_bool());
        let status = match success {
            Some(true) => Self::map_status(status_str),
            Some(false) => JobStatus::Failed,
            None => Self::map_status(status_str),
        };

        let direction = fax.get("direction").and_then(|v| v.as_str());
        let event_type = body
            .get("event_type")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| {
                if direction == Some("received") {
                    "inbound".to_string()
                } else {
                    "fax_complete".to_string()
                }
            });

        Ok(CallbackEvent {
            provider_sid,
            event_type,
            status,
            pages: fax.get("num_pages").and_then(|v| v.as_u64()).map(|p| p as u32),
            error: fax
                .get("error_message")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            from_number: fax
                .get("from_number")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            to_number: fax
                .get("to_number")
                .and_then(|v| v.as_str())
                .map(str::to_string),
        })
    }

    async fn fetch_inbound_pdf(
        &self,
        provider_sid: &str,
    ) -> Result<Option<Vec<u8>>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/faxes/{}/file", self.base_url, provider_sid))
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .send()
            .await
            .map_err(|e| ProviderError::Send(sanitize_reqwest(&e)))?;

        if !response.status().is_success() {
            return Err(ProviderError::Send(format!(
                "file fetch returned {}",
                response.status().as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Send(sanitize_reqwest(&e)))?;
        Ok(Some(bytes.to_vec()))
    }
}

/// Provider ids arrive as numbers or strings depending on the event.
fn json_id(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Keep reqwest's error chains (which can embed URLs) out of stored errors.
fn sanitize_reqwest(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "provider request timed out".to_string()
    } else if error.is_connect() {
        "provider unreachable".to_string()
    } else {
        "provider request failed".to_string()
    }
}
