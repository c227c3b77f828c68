//! Sinch-class provider: direct upload send, Basic/HMAC callbacks.
//!
//! `send` posts the PDF bytes in one multipart request. Callback
//! authentication is whatever the operator configured: HTTP Basic
//! credentials, an HMAC secret over the raw body, or both. With neither
//! configured callbacks are rejected.

use async_trait::async_trait;
use axum::http::HeaderMap;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;

use super::{CallbackEvent, OutboundProvider, ProviderError, SendOutcome, SendRequest};
use crate::api::models::{Backend, JobStatus};
use crate::config::SinchConfig;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-sinch-signature";

pub struct SinchProvider {
    client: reqwest::Client,
    base_url: String,
    project_id: String,
    api_key: String,
    api_secret: String,
    basic_user: Option<String>,
    basic_pass: Option<String>,
    hmac_secret: Option<String>,
}

impl SinchProvider {
    pub fn new(config: &SinchConfig) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ProviderError::Send(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            project_id: config.project_id.clone().unwrap_or_default(),
            api_key: config.api_key.clone().unwrap_or_default(),
            api_secret: config.api_secret.clone().unwrap_or_default(),
            basic_user: config.basic_user.clone(),
            basic_pass: config.basic_pass.clone(),
            hmac_secret: config.hmac_secret.clone(),
        })
    }

    fn map_status(status: &str) -> JobStatus {
        match status.to_ascii_uppercase().as_str() {
            "COMPLETED" => JobStatus::Success,
            "QUEUED" | "IN_PROGRESS" => JobStatus::InProgress,
            _ => JobStatus::Failed,
        }
    }

    fn verify_basic(&self, headers: &HeaderMap) -> Result<(), ProviderError> {
        let (user, pass) = match (&self.basic_user, &self.basic_pass) {
            (Some(u), Some(p)) => (u, p),
            _ => return Err(ProviderError::Auth("basic auth not configured".into())),
        };

        let header = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Basic "))
            .ok_or_else(|| ProviderError::Auth("missing basic credentials".into()))?;

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(header)
            .map_err(|_| ProviderError::Auth("malformed basic credentials".into()))?;

        let expected = format!("{user}:{pass}");
        if decoded.ct_eq(expected.as_bytes()).into() {
            Ok(())
        } else {
            Err(ProviderError::Auth("basic credentials mismatch".into()))
        }
    }

    fn verify_hmac(&self, headers: &HeaderMap, raw_body: &[u8]) -> Result<(), ProviderError> {
        let secret = self
            .hmac_secret
            .as_deref()
            .ok_or_else(|| ProviderError::Auth("hmac secret not configured".into()))?;

        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ProviderError::Auth("missing signature header".into()))?;

        let signature = hex::decode(signature.trim())
            .map_err(|_| ProviderError::Auth("malformed signature".into()))?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| ProviderError::Auth("bad hmac secret".into()))?;
        mac.update(raw_body);
        mac.verify_slice(&signature)
            .map_err(|_| ProviderError::Auth("signature mismatch".into()))
    }
}

#[async_trait]
impl OutboundProvider for SinchProvider {
    fn backend(&self) -> Backend {
        Backend::Sinch
    }

    async fn send(&self, request: SendRequest<'_>) -> Result<SendOutcome, ProviderError> {
        let pdf = request
            .pdf_bytes
            .ok_or_else(|| ProviderError::Send("missing pdf bytes".into()))?;

        let form = reqwest::multipart::Form::new()
            .text("to", request.job.to_number.clone())
            .part(
                "file",
                reqwest::multipart::Part::bytes(pdf.to_vec())
                    .file_name("fax.pdf")
                    .mime_str("application/pdf")
                    .map_err(|e| ProviderError::Send(e.to_string()))?,
            );

        let response = self
            .client
            .post(format!(
                "{}/projects/{}/faxes",
                self.base_url, self.project_id
            ))
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .multipart(form)
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

        let sid = body
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
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
            .get(format!(
                "{}/projects/{}/faxes/{}",
                self.base_url, self.project_id, provider_sid
            ))
            .basic_auth(&self.api_key, Some(&self.api_secret))
            .send()
            .await
            .map_err(|e| ProviderError::Send(sanitize_reqwest(&e)))?;

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|_| ProviderError::Parse("unparseable status response".into()))?;

        let status = body
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ProviderError::Parse("status missing".into()))?;

        Ok(Self::map_status(status))
    }

    /// Accept when any configured scheme passes; fail closed when none
    /// is configured.
    fn verify_callback(&self, headers: &HeaderMap, raw_body: &[u8]) -> Result<(), ProviderError> {
        let basic_configured = self.basic_user.is_some() && self.basic_pass.is_some();
        let hmac_configured = self.hmac_secret.is_some();

        if !basic_configured && !hmac_configured {
            return Err(ProviderError::Auth("no callback auth configured".into()));
        }

        let mut last_err = None;
        if basic_configured {
            match self.verify_basic(headers) {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        if hmac_configured {
            match self.verify_hmac(headers, raw_body) {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap())
    }

    fn parse_callback(&self, raw_body: &[u8]) -> Result<CallbackEvent, ProviderError> {
        let body: serde_json::Value = serde_json::from_slice(raw_body)
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        let fax = body
            .get("fax")
            .ok_or_else(|| ProviderError::Parse("missing fax object".into()))?;

        let provider_sid = fax
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::Parse("missing fax id".into()))?;

        let event_type = body
            .get("event")
            .and_then(|v| v.as_str())
            .unwrap_or("FAX_COMPLETED")
            .to_ascii_lowercase();

        let status_str = fax.get("status").and_then(|v| v.as_str()).unwrap_or("");
        let direction = fax.get("direction").and_then(|v| v.as_str());

        Ok(CallbackEvent {
            provider_sid,
            event_type: if direction == Some("INBOUND") {
                "inbound".to_string()
            } else {
                event_type
            },
            status: Self::map_status(status_str),
            pages: fax
                .get("pageCount")
                .and_then(|v| v.as_u64())
                .map(|p| p as u32),
            error: fax
                .get("errorMessage")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            from_number: fax.get("from").and_then(|v| v.as_str()).map(str::to_string),
            to_number: fax.get("to").and_then(|v| v.as_str()).map(str::to_string),
        })
    }

    async fn fetch_inbound_pdf(
        &self,
        provider_sid: &str,
    ) -> Result<Option<Vec<u8>>, ProviderError> {
        let response = self
            .client
            .get(format!(
                "{}/projects/{}/faxes/{}/file.pdf",
                self.base_url, self.project_id, provider_sid
            ))
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

fn sanitize_reqwest(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "provider request timed out".to_string()
    } else if error.is_connect() {
        "provider unreachable".to_string()
    } else {
        "provider request failed".to_string()
    }
}
