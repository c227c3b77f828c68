//! Outbound provider dispatch.
//!
//! Every transport implements [`OutboundProvider`]; configuration selects
//! which variant is active. The registry also holds non-active configured
//! providers so their webhook routes stay verifiable (an operator may
//! migrate backends while callbacks for old jobs are still in flight).

mod disabled;
mod phaxio;
mod sinch;
mod sip;

pub use disabled::DisabledProvider;
pub use phaxio::PhaxioProvider;
pub use sinch::SinchProvider;
pub use sip::SipProvider;

use async_trait::async_trait;
use axum::http::HeaderMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::ami::FaxResult;
use crate::api::models::{Backend, FaxJob, JobStatus};

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("callback authentication failed: {0}")]
    Auth(String),

    #[error("send failed: {0}")]
    Send(String),

    #[error("unparseable callback: {0}")]
    Parse(String),

    #[error("operation not supported by this backend")]
    Unsupported,
}

/// Everything a provider may need to transmit one job. Which fields are
/// populated depends on the backend: URL-fetch providers get `pdf_url`,
/// direct-upload providers get `pdf_bytes`, the PBX provider gets
/// `tiff_bytes`.
pub struct SendRequest<'a> {
    pub job: &'a FaxJob,
    pub pdf_bytes: Option<&'a [u8]>,
    pub pdf_url: Option<&'a str>,
    pub tiff_bytes: Option<&'a [u8]>,
}

/// Result of a successful hand-off to the provider
pub struct SendOutcome {
    pub provider_sid: String,
    pub status: JobStatus,
    /// Set by the PBX provider: resolves when the control connection
    /// reports the fax result. The job machine owns the timeout.
    pub completion: Option<oneshot::Receiver<FaxResult>>,
}

/// A parsed provider callback
#[derive(Debug, Clone)]
pub struct CallbackEvent {
    pub provider_sid: String,
    pub event_type: String,
    pub status: JobStatus,
    pub pages: Option<u32>,
    pub error: Option<String>,
    /// Inbound events carry caller metadata instead of a job reference
    pub from_number: Option<String>,
    pub to_number: Option<String>,
}

#[async_trait]
pub trait OutboundProvider: Send + Sync {
    fn backend(&self) -> Backend;

    /// Synchronous through to "handed off to provider" or error.
    async fn send(&self, request: SendRequest<'_>) -> Result<SendOutcome, ProviderError>;

    /// Optional poll; PBX results arrive over the control connection instead.
    async fn get_status(&self, provider_sid: &str) -> Result<JobStatus, ProviderError>;

    /// Authenticate a webhook delivery against the raw body.
    fn verify_callback(&self, headers: &HeaderMap, raw_body: &[u8]) -> Result<(), ProviderError>;

    /// Parse a webhook delivery into a uniform event.
    fn parse_callback(&self, raw_body: &[u8]) -> Result<CallbackEvent, ProviderError>;

    /// Fetch the PDF for an inbound fax, for providers that deliver
    /// metadata-only webhooks. Default: nothing to fetch.
    async fn fetch_inbound_pdf(
        &self,
        _provider_sid: &str,
    ) -> Result<Option<Vec<u8>>, ProviderError> {
        Ok(None)
    }
}

/// Registry of configured providers, selected by backend tag
pub struct ProviderRegistry {
    providers: BTreeMap<Backend, Arc<dyn OutboundProvider>>,
    active: Backend,
}

impl ProviderRegistry {
    pub fn new(active: Backend) -> Self {
        Self {
            providers: BTreeMap::new(),
            active,
        }
    }

    pub fn register(&mut self, provider: Arc<dyn OutboundProvider>) {
        self.providers.insert(provider.backend(), provider);
    }

    pub fn get(&self, backend: Backend) -> Option<Arc<dyn OutboundProvider>> {
        self.providers.get(&backend).cloned()
    }

    pub fn active_backend(&self) -> Backend {
        self.active
    }

    pub fn active(&self) -> Option<Arc<dyn OutboundProvider>> {
        self.get(self.active)
    }
}
