use serde::Serialize;
use std::time::Duration;

use crate::error::RelayError;
use crate::notification::Outcome;

/// Payment method reported to the order system.
pub const PAYMENT_METHOD: &str = "paytr";

/// Default timeout for one delivery attempt.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Final status update sent to the order system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderUpdate {
    pub order_number: String,
    /// Major currency units.
    pub amount: u64,
    pub status: String,
    pub payment_method: String,
    /// RFC 3339 timestamp.
    pub processed_at: String,
}

impl OrderUpdate {
    pub fn new(order_number: &str, outcome: Outcome, amount_major_units: u64) -> Self {
        Self {
            order_number: order_number.to_string(),
            amount: amount_major_units,
            status: outcome.order_status().to_string(),
            payment_method: PAYMENT_METHOD.to_string(),
            processed_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// The downstream order system, seen only through its request/response contract.
pub trait OrderApi: Send + Sync {
    /// Submit one status update. `Ok` means the order system answered 2xx.
    fn submit(
        &self,
        update: &OrderUpdate,
    ) -> impl std::future::Future<Output = Result<(), RelayError>> + Send;
}

/// [`OrderApi`] over HTTP: a single JSON POST per update.
#[derive(Clone)]
pub struct HttpOrderApi {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpOrderApi {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl OrderApi for HttpOrderApi {
    async fn submit(&self, update: &OrderUpdate) -> Result<(), RelayError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(update)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| RelayError::DownstreamUnavailable(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RelayError::DownstreamRejected(status.as_u16()))
        }
    }
}

/// Build the client used for order updates: no redirects, bounded connect time.
pub fn order_client(timeout: Duration) -> Result<reqwest::Client, RelayError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| RelayError::DownstreamUnavailable(format!("failed to build client: {e}")))
}
