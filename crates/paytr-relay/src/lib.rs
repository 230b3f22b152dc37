//! PayTR callback relay: verification and reconciliation engine.
//!
//! A PayTR payment produces two unordered signals: a signed server-to-server
//! notification and an unsigned browser redirect that may carry no
//! identifiers at all. This crate turns them into one outcome per order and
//! forwards it to the order system.
//!
//! # Modules
//!
//! - [`signature`]: HMAC-SHA256 check over the gateway's canonical message
//! - [`notification`]: notification fields, outcome normalization, amounts
//! - [`store`]: TTL-bounded [`CorrelationStore`] shared by both paths
//! - [`resolver`]: maps a redirect to a [`Decision`]
//! - [`notifier`]: queued, best-effort forwarding via [`Notifier`]
//! - [`order_api`]: the order system's request/response contract

pub mod error;
pub mod notification;
pub mod notifier;
pub mod order_api;
pub mod resolver;
pub mod signature;
pub mod store;

pub use error::RelayError;
pub use notification::{CallbackNotification, Outcome, RawNotification, VerifiedOutcome};
pub use notifier::{Delivery, ForwardJob, Notifier};
pub use order_api::{HttpOrderApi, OrderApi, OrderUpdate};
pub use resolver::{
    Basis, Decision, OriginHint, RedirectQuery, RedirectRequest, Resolution, Resolver,
    ResolverConfig,
};
pub use store::{CorrelationEntry, CorrelationStore};
