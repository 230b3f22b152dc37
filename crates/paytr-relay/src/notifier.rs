//! Downstream notifier: hands verified outcomes to the order system off the
//! request path.
//!
//! Request handlers call [`Notifier::notify`], which only enqueues. A
//! background worker pulls jobs and runs [`deliver`] for each one on its own
//! task, so a slow order system never delays the gateway acknowledgement or a
//! browser redirect. Delivery is attempted once; failures are logged and
//! dropped.
//!
//! Idempotency is advisory. The `forwarded` flag in the correlation store is
//! checked before sending and set after a 2xx, but two paths racing on the
//! same order can both send. The order system must tolerate that.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::notification::Outcome;
use crate::order_api::{OrderApi, OrderUpdate};
use crate::store::CorrelationStore;

/// Default queue size between handlers and the delivery worker.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// One outcome waiting to be forwarded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardJob {
    pub order_reference: String,
    pub outcome: Outcome,
    pub amount_major_units: u64,
}

/// Result of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The order system answered 2xx.
    Sent,
    /// The store says this outcome already went out; nothing was sent.
    AlreadyForwarded,
    /// Network error, timeout or non-2xx answer.
    Failed,
}

impl Delivery {
    pub fn delivered(self) -> bool {
        matches!(self, Delivery::Sent | Delivery::AlreadyForwarded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Delivery::Sent => "sent",
            Delivery::AlreadyForwarded => "skipped",
            Delivery::Failed => "failed",
        }
    }
}

/// Forward one outcome, consulting and updating the store's `forwarded` flag.
///
/// Never retries and never returns an error.
pub async fn deliver<A: OrderApi>(api: &A, store: &CorrelationStore, job: &ForwardJob) -> Delivery {
    if store
        .find_by_reference(&job.order_reference)
        .is_some_and(|entry| entry.forwarded && entry.outcome == job.outcome)
    {
        tracing::debug!(order = %job.order_reference, "outcome already forwarded, skipping");
        return Delivery::AlreadyForwarded;
    }

    let update = OrderUpdate::new(&job.order_reference, job.outcome, job.amount_major_units);
    match api.submit(&update).await {
        Ok(()) => {
            store.mark_forwarded_if(&job.order_reference, job.outcome);
            tracing::info!(
                order = %job.order_reference,
                status = %update.status,
                amount = update.amount,
                "order system notified"
            );
            Delivery::Sent
        }
        Err(e) => {
            tracing::warn!(
                order = %job.order_reference,
                status = %update.status,
                error = %e,
                "order system notification failed"
            );
            Delivery::Failed
        }
    }
}

/// Callback invoked after every delivery attempt (metrics, tests).
pub type DeliveryObserver = Arc<dyn Fn(&ForwardJob, Delivery) + Send + Sync>;

/// Handle used by request handlers to enqueue forwards. Cheap to clone.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::Sender<ForwardJob>,
}

impl Notifier {
    /// Start the delivery worker and return the handle feeding it.
    ///
    /// The worker runs until every `Notifier` clone has been dropped.
    pub fn spawn<A>(
        api: Arc<A>,
        store: Arc<CorrelationStore>,
        capacity: usize,
        observer: Option<DeliveryObserver>,
    ) -> (Self, JoinHandle<()>)
    where
        A: OrderApi + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<ForwardJob>(capacity.max(1));

        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let api = api.clone();
                let store = store.clone();
                let observer = observer.clone();
                tokio::spawn(async move {
                    let result = deliver(api.as_ref(), &store, &job).await;
                    if let Some(observe) = observer {
                        observe(&job, result);
                    }
                });
            }
            tracing::debug!("notifier queue closed, worker exiting");
        });

        (Self { tx }, worker)
    }

    /// Queue an outcome for forwarding without waiting.
    ///
    /// Returns `false` if the queue is full or the worker has stopped; the
    /// job is dropped and logged in that case.
    pub fn notify(&self, order_reference: &str, outcome: Outcome, amount_major_units: u64) -> bool {
        let job = ForwardJob {
            order_reference: order_reference.to_string(),
            outcome,
            amount_major_units,
        };
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                tracing::warn!(order = %job.order_reference, "notifier queue full, dropping forward");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                tracing::error!(order = %job.order_reference, "notifier worker stopped, dropping forward");
                false
            }
        }
    }
}
