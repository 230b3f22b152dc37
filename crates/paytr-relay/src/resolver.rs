//! Reconciliation of browser redirects with recorded notifications.
//!
//! The gateway's hosted checkout does not always put the transaction back on
//! the redirect URL, so a redirect may arrive with no identifiers at all. In
//! that case the only link to the payment is timing plus the referrer: if the
//! browser came from the gateway and a success was recorded recently, that
//! success is assumed to be this browser's and is consumed so no other
//! anonymous redirect can take it. This holds only while at most one checkout
//! completes per match window. A redirect that names its order is never
//! matched by timing.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::notification::{minor_to_major, parse_minor_units, Outcome};
use crate::store::{CorrelationEntry, CorrelationStore};

/// Reference used on result pages when the payment could not be identified.
pub const UNKNOWN_REFERENCE: &str = "UNKNOWN";

/// Upper bound on how long a redirect may wait for its notification.
pub const MAX_CORRELATION_WAIT: Duration = Duration::from_secs(5);

/// Weak signal about where a redirect came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginHint {
    Gateway,
    Unknown,
}

impl OriginHint {
    /// Classify a `Referer` header value. The referrer counts as the gateway
    /// when its host equals one of `gateway_hosts` or is a subdomain of one.
    pub fn from_referrer(referrer: Option<&str>, gateway_hosts: &[String]) -> Self {
        let host = referrer
            .and_then(|r| url::Url::parse(r).ok())
            .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()));

        match host {
            Some(host) if gateway_hosts.iter().any(|g| host_matches(&host, g)) => {
                OriginHint::Gateway
            }
            _ => OriginHint::Unknown,
        }
    }

    pub fn is_gateway(self) -> bool {
        matches!(self, OriginHint::Gateway)
    }
}

fn host_matches(host: &str, gateway: &str) -> bool {
    let gateway = gateway.trim().to_ascii_lowercase();
    if gateway.is_empty() {
        return false;
    }
    host == gateway
        || host
            .strip_suffix(gateway.as_str())
            .is_some_and(|prefix| prefix.ends_with('.'))
}

/// Redirect query parameters as the browser sends them.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RedirectQuery {
    #[serde(default)]
    pub merchant_oid: Option<String>,
    /// Legacy name for `merchant_oid` used by older result links.
    #[serde(default)]
    pub siparis: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total_amount: Option<String>,
}

/// A browser redirect after leaving the hosted payment page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectRequest {
    pub order_reference: Option<String>,
    pub outcome: Option<Outcome>,
    pub amount_minor_units: Option<u64>,
    pub origin_hint: OriginHint,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl RedirectRequest {
    pub fn from_query(query: RedirectQuery, origin_hint: OriginHint) -> Self {
        let order_reference = non_empty(query.merchant_oid).or_else(|| non_empty(query.siparis));
        Self {
            order_reference,
            outcome: non_empty(query.status).map(|s| Outcome::from_token(&s)),
            amount_minor_units: non_empty(query.total_amount).and_then(|a| parse_minor_units(&a)),
            origin_hint,
        }
    }
}

/// What the user should be shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Success {
        order_reference: String,
        amount_major_units: u64,
    },
    Failure {
        order_reference: String,
        reason_code: String,
    },
    /// The browser came from the gateway but no outcome has been recorded yet.
    Pending,
}

impl Decision {
    pub const PENDING_REASON: &'static str = "processing";
    pub const FAILED_REASON: &'static str = "failed";
    pub const UNKNOWN_REASON: &'static str = "unknown";

    pub fn kind(&self) -> &'static str {
        match self {
            Decision::Success { .. } => "success",
            Decision::Failure { .. } => "failure",
            Decision::Pending => "pending",
        }
    }

    fn from_entry(entry: &CorrelationEntry) -> Self {
        match entry.outcome {
            Outcome::Success => Decision::Success {
                order_reference: entry.order_reference.clone(),
                amount_major_units: entry.amount_major_units(),
            },
            Outcome::Failure => Decision::Failure {
                order_reference: entry.order_reference.clone(),
                reason_code: Self::FAILED_REASON.to_string(),
            },
        }
    }
}

/// Which rule produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Basis {
    /// Reference and status were on the redirect itself.
    Explicit,
    /// Reference was on the redirect and matched a stored entry.
    StoredByReference,
    /// No reference; bound to the most recent stored success.
    Correlated,
    /// Nothing matched.
    None,
}

impl Basis {
    pub fn as_str(self) -> &'static str {
        match self {
            Basis::Explicit => "explicit",
            Basis::StoredByReference => "reference",
            Basis::Correlated => "correlated",
            Basis::None => "none",
        }
    }
}

/// A decision plus the stored entry backing it, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub decision: Decision,
    pub basis: Basis,
    pub entry: Option<CorrelationEntry>,
}

impl Resolution {
    fn stored(entry: CorrelationEntry, basis: Basis) -> Self {
        Self {
            decision: Decision::from_entry(&entry),
            basis,
            entry: Some(entry),
        }
    }

    fn pending() -> Self {
        Self {
            decision: Decision::Pending,
            basis: Basis::None,
            entry: None,
        }
    }

    fn unknown(order_reference: &str) -> Self {
        Self {
            decision: Decision::Failure {
                order_reference: order_reference.to_string(),
                reason_code: Decision::UNKNOWN_REASON.to_string(),
            },
            basis: Basis::None,
            entry: None,
        }
    }

    /// The stored entry if it still needs forwarding to the order system.
    pub fn unforwarded_entry(&self) -> Option<&CorrelationEntry> {
        self.entry.as_ref().filter(|e| !e.forwarded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolverConfig {
    /// How far back an anonymous redirect may bind to a stored success.
    pub match_window: Duration,
    /// How long a gateway redirect waits for a late notification before
    /// giving up with `Pending`. Capped at [`MAX_CORRELATION_WAIT`].
    pub correlation_wait: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            match_window: Duration::from_secs(5 * 60),
            correlation_wait: Duration::from_millis(1500),
        }
    }
}

pub struct Resolver {
    store: Arc<CorrelationStore>,
    config: ResolverConfig,
}

impl Resolver {
    pub fn new(store: Arc<CorrelationStore>, config: ResolverConfig) -> Self {
        Self {
            store,
            config: ResolverConfig {
                correlation_wait: config.correlation_wait.min(MAX_CORRELATION_WAIT),
                ..config
            },
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Decide what a redirect represents. First matching rule wins:
    ///
    /// 1. reference and status on the URL are trusted as-is;
    /// 2. a bare reference is only ever looked up exactly; a gateway-origin
    ///    miss waits once for its notification before answering `Pending`;
    /// 3. a gateway-origin redirect with no reference claims the latest
    ///    unclaimed success, waiting once before answering `Pending`;
    /// 4. anything else is an unknown failure.
    ///
    /// Waits hold no store lock and end early if the caller's future is
    /// dropped.
    pub async fn resolve(&self, request: &RedirectRequest) -> Resolution {
        if let (Some(reference), Some(outcome)) = (&request.order_reference, request.outcome) {
            let decision = match outcome {
                Outcome::Success => Decision::Success {
                    order_reference: reference.clone(),
                    amount_major_units: minor_to_major(request.amount_minor_units.unwrap_or(0)),
                },
                Outcome::Failure => Decision::Failure {
                    order_reference: reference.clone(),
                    reason_code: Decision::FAILED_REASON.to_string(),
                },
            };
            return Resolution {
                decision,
                basis: Basis::Explicit,
                entry: None,
            };
        }

        let gateway = request.origin_hint.is_gateway();

        if let Some(reference) = &request.order_reference {
            if let Some(entry) = self.store.find_by_reference(reference) {
                return Resolution::stored(entry, Basis::StoredByReference);
            }
            if !gateway {
                return Resolution::unknown(reference);
            }
            if self.wait_for_notification().await {
                if let Some(entry) = self.store.find_by_reference(reference) {
                    return Resolution::stored(entry, Basis::StoredByReference);
                }
            }
            return Resolution::pending();
        }

        if !gateway {
            return Resolution::unknown(UNKNOWN_REFERENCE);
        }

        if let Some(entry) = self.store.claim_recent_success(self.config.match_window) {
            return Resolution::stored(entry, Basis::Correlated);
        }
        if self.wait_for_notification().await {
            if let Some(entry) = self.store.claim_recent_success(self.config.match_window) {
                return Resolution::stored(entry, Basis::Correlated);
            }
        }
        Resolution::pending()
    }

    /// Sleep once for a late notification. Returns `false` when waiting is
    /// disabled.
    async fn wait_for_notification(&self) -> bool {
        if self.config.correlation_wait.is_zero() {
            return false;
        }
        tracing::debug!(
            wait_ms = self.config.correlation_wait.as_millis() as u64,
            "nothing recorded yet, waiting for notification"
        );
        tokio::time::sleep(self.config.correlation_wait).await;
        true
    }
}
