use std::sync::Arc;

use paytr::{CorrelationStore, Notifier, Resolver};

use crate::config::RelayConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    /// Outcomes recorded from notifications, read by redirects
    pub store: Arc<CorrelationStore>,
    pub resolver: Arc<Resolver>,
    /// Queue feeding the order-system forwarding worker
    pub notifier: Notifier,
}

impl AppState {
    pub fn new(config: RelayConfig, store: Arc<CorrelationStore>, notifier: Notifier) -> Self {
        let resolver = Resolver::new(store.clone(), config.resolver_config());
        Self {
            config: Arc::new(config),
            store,
            resolver: Arc::new(resolver),
            notifier,
        }
    }
}
