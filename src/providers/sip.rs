//! Self-hosted PBX provider: Originate + SendFAX over the AMI control
//! connection.
//!
//! The TIFF is spooled into a directory Asterisk can read, then an
//! Originate action runs the sendfax dialplan. The locally chosen action
//! id doubles as the provider sid; the dialplan reports the outcome with
//! a `UserEvent FaxResult` the AMI read loop correlates back to the
//! returned completion channel.

use async_trait::async_trait;
use axum::http::HeaderMap;
use std::path::PathBuf;

use super::{CallbackEvent, OutboundProvider, ProviderError, SendOutcome, SendRequest};
use crate::ami::AmiClient;
use crate::api::models::{Backend, JobStatus};
use crate::config::AmiConfig;

pub struct SipProvider {
    ami: AmiClient,
    fax_dir: PathBuf,
}

impl SipProvider {
    pub fn new(ami: AmiClient, config: &AmiConfig) -> Self {
        Self {
            ami,
            fax_dir: config.fax_dir.clone(),
        }
    }
}

#[async_trait]
impl OutboundProvider for SipProvider {
    fn backend(&self) -> Backend {
        Backend::Sip
    }

    async fn send(&self, request: SendRequest<'_>) -> Result<SendOutcome, ProviderError> {
        let tiff = request
            .tiff_bytes
            .ok_or_else(|| ProviderError::Send("missing tiff artifact".into()))?;

        let tiff_path = self.fax_dir.join(format!("{}.tiff", request.job.id));
        tokio::fs::create_dir_all(&self.fax_dir)
            .await
            .map_err(|_| ProviderError::Send("fax spool unavailable".into()))?;
        tokio::fs::write(&tiff_path, tiff)
            .await
            .map_err(|_| ProviderError::Send("cannot spool tiff".into()))?;

        let action_id = request.job.id.clone();
        let completion = self
            .ami
            .originate_sendfax(&action_id, &request.job.to_number, &tiff_path)
            .await
            .map_err(|e| ProviderError::Send(format!("pbx dispatch failed: {e}")))?;

        Ok(SendOutcome {
            provider_sid: action_id,
            status: JobStatus::InProgress,
            completion: Some(completion),
        })
    }

    async fn get_status(&self, _provider_sid: &str) -> Result<JobStatus, ProviderError> {
        // Results arrive over the control connection, not by polling
        Err(ProviderError::Unsupported)
    }

    fn verify_callback(&self, _headers: &HeaderMap, _raw_body: &[u8]) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported)
    }

    fn parse_callback(&self, _raw_body: &[u8]) -> Result<CallbackEvent, ProviderError> {
        Err(ProviderError::Unsupported)
    }
}
