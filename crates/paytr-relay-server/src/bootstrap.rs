//! Wire the relay together: store, order-system client, forwarding worker.

use std::sync::Arc;

use paytr::notifier::DeliveryObserver;
use paytr::order_api::order_client;
use paytr::{CorrelationStore, Delivery, ForwardJob, HttpOrderApi, Notifier, RelayError};
use tokio::task::JoinHandle;

use crate::config::RelayConfig;
use crate::metrics;
use crate::state::AppState;

/// Observer that counts every delivery attempt by result.
pub fn metrics_observer() -> DeliveryObserver {
    Arc::new(|_job: &ForwardJob, result: Delivery| {
        metrics::ORDER_FORWARDS
            .with_label_values(&[result.as_str()])
            .inc();
    })
}

/// Build the shared state and start the forwarding worker.
///
/// Must run inside a Tokio runtime. The returned handle finishes once every
/// clone of the state's [`Notifier`] has been dropped.
pub fn bootstrap(config: RelayConfig) -> Result<(AppState, JoinHandle<()>), RelayError> {
    let store = Arc::new(CorrelationStore::new(config.correlation_ttl));

    let client = order_client(config.notify_timeout)?;
    let api = Arc::new(
        HttpOrderApi::new(client, config.order_api_url.clone()).with_timeout(config.notify_timeout),
    );

    tracing::info!(
        ttl_secs = store.ttl().as_secs(),
        order_api = %api.endpoint(),
        "correlation store and order forwarding ready"
    );

    let (notifier, worker) = Notifier::spawn(
        api,
        store.clone(),
        config.notify_queue_capacity,
        Some(metrics_observer()),
    );

    Ok((AppState::new(config, store, notifier), worker))
}
