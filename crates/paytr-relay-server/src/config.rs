use std::str::FromStr;
use std::time::Duration;
use url::Url;

use paytr::resolver::MAX_CORRELATION_WAIT;
use paytr::signature::clean_salt;
use paytr::store::{MAX_TTL, MIN_TTL};

const DEFAULT_SITE_BASE_URL: &str = "http://localhost:3000";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TTL_SECS: u64 = 600;
const DEFAULT_MATCH_WINDOW_SECS: u64 = 300;
const DEFAULT_WAIT_MS: u64 = 1500;
const DEFAULT_NOTIFY_TIMEOUT_SECS: u64 = 5;
const MAX_NOTIFY_TIMEOUT_SECS: u64 = 30;
const DEFAULT_QUEUE_CAPACITY: usize = paytr::notifier::DEFAULT_QUEUE_CAPACITY;
const DEFAULT_GATEWAY_HOSTS: &str = "paytr.com";
const DEFAULT_RATE_LIMIT_RPM: u64 = 600;

#[derive(Clone)]
pub struct RelayConfig {
    /// PayTR merchant key, the HMAC key for notification signatures
    pub merchant_key: Vec<u8>,
    /// PayTR merchant salt, already cleaned of a stray leading `=`
    pub merchant_salt: String,
    /// Base URL of the storefront hosting the result pages (no trailing slash)
    pub site_base_url: String,
    /// Order system endpoint receiving final status updates
    pub order_api_url: String,
    /// Server port
    pub port: u16,
    /// How long recorded outcomes stay visible to redirects
    pub correlation_ttl: Duration,
    /// How far back an anonymous redirect may bind to a recorded success
    pub match_window: Duration,
    /// How long a gateway redirect waits for a late notification
    pub correlation_wait: Duration,
    /// Timeout for one order-system request
    pub notify_timeout: Duration,
    /// Capacity of the queue between handlers and the forwarding worker
    pub notify_queue_capacity: usize,
    /// Referrer hosts treated as the gateway's redirect flow
    pub gateway_referrer_hosts: Vec<String>,
    /// Drop notifications whose signature does not verify (still acknowledged)
    pub require_valid_signature: bool,
    /// CORS allowed origins (empty = any)
    pub allowed_origins: Vec<String>,
    /// Rate limit requests per minute per IP
    pub rate_limit_rpm: u64,
    /// Bearer token required for /metrics endpoint (None = public)
    pub metrics_token: Option<String>,
}

impl std::fmt::Debug for RelayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConfig")
            .field("merchant_key", &"[REDACTED]")
            .field("merchant_salt", &"[REDACTED]")
            .field("site_base_url", &self.site_base_url)
            .field("order_api_url", &self.order_api_url)
            .field("port", &self.port)
            .field("correlation_ttl", &self.correlation_ttl)
            .field("match_window", &self.match_window)
            .field("correlation_wait", &self.correlation_wait)
            .field("notify_timeout", &self.notify_timeout)
            .field("notify_queue_capacity", &self.notify_queue_capacity)
            .field("gateway_referrer_hosts", &self.gateway_referrer_hosts)
            .field("require_valid_signature", &self.require_valid_signature)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field(
                "metrics_token",
                &self.metrics_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from any variable source. Empty values count
    /// as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        // Required: merchant credentials
        let merchant_key = var("PAYTR_MERCHANT_KEY")
            .ok_or(ConfigError::MissingRequired("PAYTR_MERCHANT_KEY"))?
            .trim()
            .as_bytes()
            .to_vec();

        let raw_salt =
            var("PAYTR_MERCHANT_SALT").ok_or(ConfigError::MissingRequired("PAYTR_MERCHANT_SALT"))?;
        let merchant_salt = clean_salt(&raw_salt);
        if merchant_salt.is_empty() {
            return Err(ConfigError::MissingRequired("PAYTR_MERCHANT_SALT"));
        }
        if merchant_salt.len() != raw_salt.len() {
            tracing::warn!("PAYTR_MERCHANT_SALT had leading '=' or whitespace, stripped");
        }

        // Optional: storefront base URL (NEXT_PUBLIC_BASE_URL kept for older deployments)
        let site_base_url = var("SITE_BASE_URL")
            .or_else(|| var("NEXT_PUBLIC_BASE_URL"))
            .unwrap_or_else(|| DEFAULT_SITE_BASE_URL.to_string())
            .trim()
            .trim_end_matches('/')
            .to_string();
        Url::parse(&site_base_url).map_err(|_| ConfigError::InvalidUrl(site_base_url.clone()))?;

        // Optional: order system endpoint
        let order_api_url = var("ORDER_API_URL")
            .map(|u| u.trim().to_string())
            .unwrap_or_else(|| format!("{site_base_url}/api/orders"));
        Url::parse(&order_api_url).map_err(|_| ConfigError::InvalidUrl(order_api_url.clone()))?;

        let port = parse_or(&var, "PORT", DEFAULT_PORT)?;

        let ttl_secs: u64 = parse_or(&var, "CORRELATION_TTL_SECS", DEFAULT_TTL_SECS)?;
        let correlation_ttl = Duration::from_secs(ttl_secs);
        if correlation_ttl < MIN_TTL || correlation_ttl > MAX_TTL {
            tracing::warn!(
                "CORRELATION_TTL_SECS={} outside {}..={}, clamping",
                ttl_secs,
                MIN_TTL.as_secs(),
                MAX_TTL.as_secs()
            );
        }
        let correlation_ttl = correlation_ttl.clamp(MIN_TTL, MAX_TTL);

        let window_secs: u64 =
            parse_or(&var, "REDIRECT_MATCH_WINDOW_SECS", DEFAULT_MATCH_WINDOW_SECS)?;
        if window_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "REDIRECT_MATCH_WINDOW_SECS",
                value: "0".to_string(),
            });
        }
        let match_window = Duration::from_secs(window_secs).min(correlation_ttl);

        let wait_ms: u64 = parse_or(&var, "REDIRECT_WAIT_MS", DEFAULT_WAIT_MS)?;
        let correlation_wait = Duration::from_millis(wait_ms);
        if correlation_wait > MAX_CORRELATION_WAIT {
            tracing::warn!(
                "REDIRECT_WAIT_MS={} exceeds {}ms, clamping",
                wait_ms,
                MAX_CORRELATION_WAIT.as_millis()
            );
        }
        let correlation_wait = correlation_wait.min(MAX_CORRELATION_WAIT);

        let timeout_secs: u64 =
            parse_or(&var, "NOTIFY_TIMEOUT_SECS", DEFAULT_NOTIFY_TIMEOUT_SECS)?;
        let notify_timeout = Duration::from_secs(timeout_secs.clamp(1, MAX_NOTIFY_TIMEOUT_SECS));

        let notify_queue_capacity: usize =
            parse_or(&var, "NOTIFY_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?;

        let gateway_referrer_hosts = split_list(
            &var("GATEWAY_REFERRER_HOSTS").unwrap_or_else(|| DEFAULT_GATEWAY_HOSTS.to_string()),
        );

        let require_valid_signature = var("REQUIRE_VALID_SIGNATURE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let allowed_origins = var("ALLOWED_ORIGINS")
            .map(|s| split_list(&s))
            .unwrap_or_default();

        let rate_limit_rpm = parse_or(&var, "RATE_LIMIT_RPM", DEFAULT_RATE_LIMIT_RPM)?;

        let metrics_token = var("METRICS_TOKEN");

        if metrics_token.is_none() {
            tracing::warn!("METRICS_TOKEN not set, /metrics endpoint is publicly accessible");
        }
        if !require_valid_signature {
            tracing::info!("signature mismatches are logged but do not block processing");
        }

        Ok(Self {
            merchant_key,
            merchant_salt,
            site_base_url,
            order_api_url,
            port,
            correlation_ttl,
            match_window,
            correlation_wait,
            notify_timeout,
            notify_queue_capacity,
            gateway_referrer_hosts,
            require_valid_signature,
            allowed_origins,
            rate_limit_rpm,
            metrics_token,
        })
    }

    pub fn resolver_config(&self) -> paytr::ResolverConfig {
        paytr::ResolverConfig {
            match_window: self.match_window,
            correlation_wait: self.correlation_wait,
        }
    }
}

fn parse_or<T, F>(var: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidValue {
            name,
            value,
        }),
        None => Ok(default),
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingRequired(&'static str),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(pairs: &[(&str, &str)]) -> Result<RelayConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        RelayConfig::from_lookup(|name| vars.get(name).cloned())
    }

    const CREDS: [(&str, &str); 2] = [
        ("PAYTR_MERCHANT_KEY", "key"),
        ("PAYTR_MERCHANT_SALT", "salt"),
    ];

    #[test]
    fn test_defaults() {
        let config = load(&CREDS).unwrap();
        assert_eq!(config.merchant_key, b"key");
        assert_eq!(config.site_base_url, "http://localhost:3000");
        assert_eq!(config.order_api_url, "http://localhost:3000/api/orders");
        assert_eq!(config.port, 3000);
        assert_eq!(config.correlation_ttl, Duration::from_secs(600));
        assert_eq!(config.match_window, Duration::from_secs(300));
        assert_eq!(config.correlation_wait, Duration::from_millis(1500));
        assert_eq!(config.gateway_referrer_hosts, vec!["paytr.com"]);
        assert!(!config.require_valid_signature);
        assert!(config.allowed_origins.is_empty());
    }

    #[test]
    fn test_missing_credentials() {
        assert!(matches!(
            load(&[("PAYTR_MERCHANT_SALT", "salt")]),
            Err(ConfigError::MissingRequired("PAYTR_MERCHANT_KEY"))
        ));
        assert!(matches!(
            load(&[("PAYTR_MERCHANT_KEY", "key"), ("PAYTR_MERCHANT_SALT", "  ")]),
            Err(ConfigError::MissingRequired("PAYTR_MERCHANT_SALT"))
        ));
    }

    #[test]
    fn test_salt_leading_equals_stripped() {
        let config = load(&[("PAYTR_MERCHANT_KEY", "key"), ("PAYTR_MERCHANT_SALT", "=s4lt")]).unwrap();
        assert_eq!(config.merchant_salt, "s4lt");
    }

    #[test]
    fn test_site_base_fallback_and_trailing_slash() {
        let mut vars = CREDS.to_vec();
        vars.push(("NEXT_PUBLIC_BASE_URL", "https://shop.example.com/"));
        let config = load(&vars).unwrap();
        assert_eq!(config.site_base_url, "https://shop.example.com");
        assert_eq!(config.order_api_url, "https://shop.example.com/api/orders");
    }

    #[test]
    fn test_invalid_url_rejected() {
        let mut vars = CREDS.to_vec();
        vars.push(("ORDER_API_URL", "not a url"));
        assert!(matches!(load(&vars), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn test_timing_values_clamped() {
        let mut vars = CREDS.to_vec();
        vars.push(("CORRELATION_TTL_SECS", "60"));
        vars.push(("REDIRECT_WAIT_MS", "60000"));
        vars.push(("REDIRECT_MATCH_WINDOW_SECS", "900"));
        let config = load(&vars).unwrap();
        assert_eq!(config.correlation_ttl, MIN_TTL);
        assert_eq!(config.correlation_wait, MAX_CORRELATION_WAIT);
        assert_eq!(config.match_window, MIN_TTL);
    }

    #[test]
    fn test_bad_number_rejected() {
        let mut vars = CREDS.to_vec();
        vars.push(("PORT", "eighty"));
        assert!(matches!(
            load(&vars),
            Err(ConfigError::InvalidValue { name: "PORT", .. })
        ));
    }

    #[test]
    fn test_lists_and_flags() {
        let mut vars = CREDS.to_vec();
        vars.push(("GATEWAY_REFERRER_HOSTS", "paytr.com, www.paytr.com ,"));
        vars.push(("ALLOWED_ORIGINS", "https://a.example,https://b.example"));
        vars.push(("REQUIRE_VALID_SIGNATURE", "1"));
        let config = load(&vars).unwrap();
        assert_eq!(config.gateway_referrer_hosts, vec!["paytr.com", "www.paytr.com"]);
        assert_eq!(config.allowed_origins.len(), 2);
        assert!(config.require_valid_signature);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = load(&CREDS).unwrap();
        let rendered = format!("{config:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("salt\""));
    }
}
