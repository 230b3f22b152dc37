//! PayTR callback relay server.
//!
//! Receives the gateway's notification and the customer's browser redirect,
//! reconciles them with the [`paytr`] engine, forwards final outcomes to the
//! order system and sends the browser to the matching result page.
//!
//! # Modules
//!
//! - [`routes`]: HTTP endpoints (callback POST/GET, health, metrics)
//! - [`state`]: shared [`AppState`](state::AppState)
//! - [`bootstrap`]: builds the state and starts the forwarding worker
//! - [`config`]: environment configuration
//! - [`metrics`]: Prometheus counters for notifications, redirects, forwards

pub mod bootstrap;
pub mod config;
pub mod cors;
pub mod metrics;
pub mod routes;
pub mod state;

pub use config::{ConfigError, RelayConfig};
pub use state::AppState;
