//! Core entities and API response models
//!
//! The ledger persists [`FaxJob`], [`InboundFax`], [`ApiKeyRecord`],
//! [`Mailbox`] and [`InboundRule`] as JSON. The `*Response` types are the
//! external contract: they never carry key hashes, and job responses never
//! carry the artifact access token (tokens travel only in the `pdf_url`
//! handed to URL-fetch providers, and in inbound listings for authenticated
//! readers).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Which provider handled a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Phaxio,
    Sinch,
    Sip,
    Disabled,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Phaxio => "phaxio",
            Backend::Sinch => "sinch",
            Backend::Sip => "sip",
            Backend::Disabled => "disabled",
        }
    }
}

/// Outbound job lifecycle. The queued → in_progress → terminal order is
/// enforced by the ledger; terminal states are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "FAILED")]
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InboundStatus {
    Received,
    Failed,
}

/// One outbound fax submission and its lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaxJob {
    pub id: String,
    pub to_number: String,
    pub status: JobStatus,
    pub backend: Backend,
    pub provider_sid: Option<String>,
    pub pages: Option<u32>,
    pub error: Option<String>,
    pub pdf_path: Option<String>,
    pub tiff_path: Option<String>,
    pub pdf_url: Option<String>,
    pub pdf_token: Option<String>,
    pub pdf_token_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FaxJob {
    pub fn new(id: String, to_number: String, backend: Backend) -> Self {
        let now = Utc::now();
        Self {
            id,
            to_number,
            status: JobStatus::Queued,
            backend,
            provider_sid: None,
            pages: None,
            error: None,
            pdf_path: None,
            tiff_path: None,
            pdf_url: None,
            pdf_token: None,
            pdf_token_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One received fax and its artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundFax {
    pub id: String,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub status: InboundStatus,
    pub backend: Backend,
    pub provider_sid: Option<String>,
    pub pages: Option<u32>,
    pub size_bytes: Option<u64>,
    pub sha256: Option<String>,
    pub error: Option<String>,
    pub pdf_path: Option<String>,
    pub tiff_path: Option<String>,
    pub mailbox_label: Option<String>,
    pub pdf_token: Option<String>,
    pub pdf_token_expires_at: Option<DateTime<Utc>>,
    pub retention_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Stored API key. `key_hash` is a PBKDF2 PHC string; the secret half of
/// the token is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub key_id: String,
    pub key_hash: String,
    pub name: String,
    pub owner: Option<String>,
    pub scopes: Vec<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl ApiKeyRecord {
    /// A key is valid iff not revoked and not past its expiry.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_at.is_none() && self.expires_at.map(|exp| now < exp).unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mailbox {
    pub label: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Routing rule: inbound faxes to `to_number` land in `mailbox_label`.
/// One active rule per number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundRule {
    pub to_number: String,
    pub mailbox_label: String,
    pub created_at: DateTime<Utc>,
}

// ── Response models ───────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobResponse {
    pub id: String,
    pub to: String,
    pub status: JobStatus,
    pub backend: Backend,
    pub provider_sid: Option<String>,
    pub pages: Option<u32>,
    pub error: Option<String>,
    pub pdf_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&FaxJob> for JobResponse {
    fn from(job: &FaxJob) -> Self {
        Self {
            id: job.id.clone(),
            to: job.to_number.clone(),
            status: job.status,
            backend: job.backend,
            provider_sid: job.provider_sid.clone(),
            pages: job.pages,
            error: job.error.clone(),
            pdf_url: job.pdf_url.clone(),
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InboundResponse {
    pub id: String,
    pub from_number: Option<String>,
    pub to_number: Option<String>,
    pub status: InboundStatus,
    pub backend: Backend,
    pub pages: Option<u32>,
    pub size_bytes: Option<u64>,
    pub sha256: Option<String>,
    pub mailbox_label: Option<String>,
    pub pdf_token: Option<String>,
    pub pdf_token_expires_at: Option<DateTime<Utc>>,
    pub received_at: DateTime<Utc>,
}

impl From<&InboundFax> for InboundResponse {
    fn from(inbound: &InboundFax) -> Self {
        Self {
            id: inbound.id.clone(),
            from_number: inbound.from_number.clone(),
            to_number: inbound.to_number.clone(),
            status: inbound.status,
            backend: inbound.backend,
            pages: inbound.pages,
            size_bytes: inbound.size_bytes,
            sha256: inbound.sha256.clone(),
            mailbox_label: inbound.mailbox_label.clone(),
            pdf_token: inbound.pdf_token.clone(),
            pdf_token_expires_at: inbound.pdf_token_expires_at,
            received_at: inbound.received_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InboundListResponse {
    pub items: Vec<InboundResponse>,
    pub total: usize,
}

/// Metadata view of an API key; never includes the hash or token.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiKeyResponse {
    pub key_id: String,
    pub name: String,
    pub owner: Option<String>,
    pub scopes: Vec<String>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl From<&ApiKeyRecord> for ApiKeyResponse {
    fn from(record: &ApiKeyRecord) -> Self {
        Self {
            key_id: record.key_id.clone(),
            name: record.name.clone(),
            owner: record.owner.clone(),
            scopes: record.scopes.clone(),
            note: record.note.clone(),
            created_at: record.created_at,
            last_used_at: record.last_used_at,
            expires_at: record.expires_at,
            revoked_at: record.revoked_at,
        }
    }
}

/// Returned exactly once, at creation or rotation.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ApiKeyCreatedResponse {
    pub key_id: String,
    pub token: String,
    pub name: String,
    pub scopes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub components: HashMap<String, String>,
    pub version: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_serialization() {
        assert_eq!(
            serde_json::to_string(&JobStatus::Queued).unwrap(),
            "\"queued\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::Success).unwrap(),
            "\"SUCCESS\""
        );
        assert_eq!(
            serde_json::to_string(&JobStatus::Failed).unwrap(),
            "\"FAILED\""
        );
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(JobStatus::Success.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_api_key_activity() {
        let now = Utc::now();
        let mut record = ApiKeyRecord {
            key_id: "abcd1234".into(),
            key_hash: "$pbkdf2-sha256$...".into(),
            name: "ci".into(),
            owner: None,
            scopes: vec!["fax:send".into()],
            note: None,
            created_at: now,
            last_used_at: None,
            expires_at: None,
            revoked_at: None,
        };
        assert!(record.is_active(now));

        record.expires_at = Some(now - chrono::Duration::seconds(1));
        assert!(!record.is_active(now));

        record.expires_at = Some(now + chrono::Duration::hours(1));
        assert!(record.is_active(now));

        record.revoked_at = Some(now);
        assert!(!record.is_active(now));
    }

    #[test]
    fn test_job_response_excludes_token() {
        let mut job = FaxJob::new("j1".into(), "+15551234567".into(), Backend::Phaxio);
        job.pdf_token = Some("secret-token".into());

        let value = serde_json::to_value(JobResponse::from(&job)).unwrap();
        assert!(value.get("pdf_token").is_none());
        assert_eq!(value.get("to").unwrap(), "+15551234567");
    }
}
