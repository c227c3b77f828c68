use std::sync::Arc;

use super::ratelimit::RateLimits;
use crate::config::Config;
use crate::convert::DocumentProcessor;
use crate::ledger::FaxStore;
use crate::observability::{Audit, Metrics};
use crate::providers::ProviderRegistry;
use crate::storage::StorageClient;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<FaxStore>,
    pub storage: Arc<StorageClient>,
    pub converter: Arc<dyn DocumentProcessor>,
    pub providers: Arc<ProviderRegistry>,
    pub limits: Arc<RateLimits>,
    pub metrics: Arc<Metrics>,
    pub audit: Arc<Audit>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: FaxStore,
        storage: StorageClient,
        converter: Arc<dyn DocumentProcessor>,
        providers: ProviderRegistry,
    ) -> Self {
        let limits = RateLimits::from_config(&config.limits);
        let audit = Audit::new(config.audit.enabled);
        Self {
            config: Arc::new(config),
            store: Arc::new(store),
            storage: Arc::new(storage),
            converter,
            providers: Arc::new(providers),
            limits: Arc::new(limits),
            metrics: Arc::new(Metrics::new()),
            audit: Arc::new(audit),
        }
    }
}
