//! HTTP transports behind a small async seam.
//!
//! The dispatcher never talks to `reqwest::Client` directly: it holds
//! `Arc<dyn Transport>` values built by a [`TransportFactory`], which also
//! knows how to check that a proxy is alive before it is used.

use crate::config::TransportConfig;
use crate::resilience::{Classify, Outcome};
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use url::Url;

pub mod http;
pub mod reachability;

pub use http::ReqwestTransport;
pub use reachability::{validate_address, validate_url};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Deadline expiry inside the client, the only transport error that says
    /// "unreachable". Cancellation is raised above the transport.
    pub fn is_timeout(&self) -> bool {
        match self {
            TransportError::Http(e) => e.is_timeout(),
            TransportError::Other(_) => false,
        }
    }
}

impl Classify for TransportError {
    fn outcome(&self) -> Outcome {
        if self.is_timeout() {
            Outcome::Failure
        } else {
            Outcome::Success
        }
    }
}

/// Sends one fully built request.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: reqwest::Request)
        -> std::result::Result<reqwest::Response, TransportError>;
}

/// Builds the direct and proxied transports a dispatcher owns.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    fn direct(&self) -> Result<Arc<dyn Transport>>;

    fn proxied(&self, proxy: &Url) -> Result<Arc<dyn Transport>>;

    /// Reachability check run before a proxy target is installed.
    async fn check_reachable(&self, proxy: &Url) -> Result<()>;
}

/// Default factory producing `reqwest` clients from a [`TransportConfig`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestFactory {
    config: TransportConfig,
}

impl ReqwestFactory {
    pub fn new(config: TransportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

#[async_trait]
impl TransportFactory for ReqwestFactory {
    fn direct(&self) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(ReqwestTransport::direct(&self.config)?))
    }

    fn proxied(&self, proxy: &Url) -> Result<Arc<dyn Transport>> {
        Ok(Arc::new(ReqwestTransport::proxied(&self.config, proxy)?))
    }

    async fn check_reachable(&self, proxy: &Url) -> Result<()> {
        validate_url(proxy, self.config.check_timeout()).await
    }
}
