//! Dispatcher configuration: schema, file loading and hot reload.
//!
//! ```yaml
//! proxy_url: http://10.0.0.8:3128
//! direct_on_denial: true
//! breaker:
//!   name: proxy
//!   timeout_ms: 3000
//!   volume_threshold: 20
//!   error_percent_threshold: 50
//! balance:
//!   items:
//!     - { name: direct, weight: 1 }
//!     - { name: proxy, weight: 3 }
//! transport:
//!   timeout_ms: 10000
//! ```

use crate::balance::RouteSet;
use crate::resilience::BreakerConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

pub mod watcher;

pub use watcher::ConfigWatcher;

/// HTTP client settings shared by the direct and proxied transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Whole-request timeout.
    pub timeout_ms: u64,
    /// Bound for the reachability check run before a proxy is installed.
    pub check_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 10_000,
            check_timeout_ms: 10_000,
            connect_timeout_ms: 5_000,
            pool_max_idle_per_host: 32,
            pool_idle_timeout_secs: 90,
        }
    }
}

impl TransportConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn pool_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_idle_timeout_secs)
    }
}

fn default_direct_on_denial() -> bool {
    true
}

/// Everything needed to build and later reconfigure a dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub proxy_url: String,
    /// Without a breaker the proxy is never used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breaker: Option<BreakerConfig>,
    /// Without a route set every admitted request goes through the proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<RouteSet>,
    #[serde(default)]
    pub transport: TransportConfig,
    /// Re-issue a request directly when the breaker refuses it.
    #[serde(default = "default_direct_on_denial")]
    pub direct_on_denial: bool,
}

impl ProxyConfig {
    pub fn new(proxy_url: impl Into<String>) -> Self {
        Self {
            proxy_url: proxy_url.into(),
            breaker: None,
            balance: None,
            transport: TransportConfig::default(),
            direct_on_denial: true,
        }
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn with_balance(mut self, balance: RouteSet) -> Self {
        self.balance = Some(balance);
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_direct_on_denial(mut self, enable: bool) -> Self {
        self.direct_on_denial = enable;
        self
    }

    /// Parsed proxy target.
    pub fn proxy_target(&self) -> Result<Url> {
        parse_proxy_url(&self.proxy_url)
    }

    /// Check every section, reporting all problems at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if let Err(e) = self.proxy_target() {
            problems.push(problem(&e));
        }
        if let Some(breaker) = &self.breaker {
            if let Err(e) = breaker.validate() {
                problems.push(problem(&e));
            }
        }
        if let Some(balance) = &self.balance {
            if let Err(e) = balance.validate() {
                problems.push(problem(&e));
            }
        }
        if self.transport.timeout_ms == 0 {
            problems.push("transport.timeout_ms: must be > 0".to_string());
        }
        if self.transport.check_timeout_ms == 0 {
            problems.push("transport.check_timeout_ms: must be > 0".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::configuration_with_context(
                "invalid dispatcher config",
                ErrorContext::new()
                    .with_details(problems.join("; "))
                    .with_source("config_validation"),
            ))
        }
    }
}

fn problem(err: &Error) -> String {
    match err {
        Error::Configuration { message, context } => {
            let mut out = match &context.field_path {
                Some(path) => format!("{}: {}", path, message),
                None => message.clone(),
            };
            if let Some(details) = &context.details {
                out.push_str(&format!(" ({})", details));
            }
            out
        }
        other => other.to_string(),
    }
}

/// Parse and sanity-check a proxy URL.
pub fn parse_proxy_url(raw: &str) -> Result<Url> {
    let invalid = |details: String| {
        Error::configuration_with_context(
            "invalid proxy url",
            ErrorContext::new()
                .with_field_path("proxy_url")
                .with_details(details)
                .with_source("proxy_url"),
        )
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(format!("'{}': {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(invalid(format!("unsupported scheme '{}'", other))),
    }
    if url.host_str().map(str::is_empty).unwrap_or(true) {
        return Err(invalid(format!("'{}' has no host", raw)));
    }
    Ok(url)
}

/// Load a config file, YAML or JSON by extension, and validate it.
pub fn load_config(path: &Path) -> Result<ProxyConfig> {
    let raw = std::fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    let config: ProxyConfig = match ext.as_deref() {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&raw)?,
        Some("json") => serde_json::from_str(&raw)?,
        _ => {
            return Err(Error::configuration_with_context(
                "unsupported config file format",
                ErrorContext::new()
                    .with_details(format!("{}: expected .yaml, .yml or .json", path.display()))
                    .with_source("config_loader"),
            ))
        }
    };
    config.validate()?;
    Ok(config)
}
