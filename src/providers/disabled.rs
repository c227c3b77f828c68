use async_trait::async_trait;
use axum::http::HeaderMap;

use super::{CallbackEvent, OutboundProvider, ProviderError, SendOutcome, SendRequest};
use crate::api::models::{Backend, JobStatus};

/// Test/dev transport: no external I/O, every send lands terminal SUCCESS
/// immediately.
pub struct DisabledProvider;

#[async_trait]
impl OutboundProvider for DisabledProvider {
    fn backend(&self) -> Backend {
        Backend::Disabled
    }

    async fn send(&self, request: SendRequest<'_>) -> Result<SendOutcome, ProviderError> {
        Ok(SendOutcome {
            provider_sid: format!("test-{}", request.job.id),
            status: JobStatus::Success,
            completion: None,
        })
    }

    async fn get_status(&self, _provider_sid: &str) -> Result<JobStatus, ProviderError> {
        Ok(JobStatus::Success)
    }

    fn verify_callback(&self, _headers: &HeaderMap, _raw_body: &[u8]) -> Result<(), ProviderError> {
        Err(ProviderError::Unsupported)
    }

    fn parse_callback(&self, _raw_body: &[u8]) -> Result<CallbackEvent, ProviderError> {
        Err(ProviderError::Unsupported)
    }
}
