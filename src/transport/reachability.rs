//! Reachability checks for proxy targets.

use crate::{Error, ErrorContext, Result};
use std::net::SocketAddr;
use std::time::Duration;
use url::Url;

/// Issue a GET against `url`; any HTTP response, whatever its status, proves the
/// endpoint answers.
pub async fn validate_url(url: &Url, timeout: Duration) -> Result<()> {
    let unreachable = |details: String| {
        Error::configuration_with_context(
            format!("proxy target {} is unreachable", url),
            ErrorContext::new()
                .with_field_path("proxy_url")
                .with_details(details)
                .with_source("proxy_check"),
        )
    };

    let client = reqwest::Client::builder()
        .timeout(timeout)
        .no_proxy()
        .pool_max_idle_per_host(0)
        .build()
        .map_err(|e| unreachable(e.to_string()))?;

    match client.get(url.clone()).send().await {
        Ok(resp) => {
            tracing::debug!(target_url = %url, status = resp.status().as_u16(), "proxy answered reachability check");
            Ok(())
        }
        Err(e) => {
            tracing::warn!(target_url = %url, error = %e, "proxy reachability check failed");
            Err(unreachable(e.to_string()))
        }
    }
}

/// Open and immediately close a TCP connection to `address` (`host:port`).
pub async fn validate_address(address: &str, timeout: Duration) -> Result<SocketAddr> {
    let unreachable = |details: String| {
        Error::configuration_with_context(
            format!("address {} is unreachable", address),
            ErrorContext::new()
                .with_details(details)
                .with_source("address_check"),
        )
    };

    let stream = tokio::time::timeout(timeout, tokio::net::TcpStream::connect(address))
        .await
        .map_err(|_| unreachable(format!("no connection within {}ms", timeout.as_millis())))?
        .map_err(|e| unreachable(e.to_string()))?;
    let peer = stream.peer_addr()?;
    drop(stream);
    Ok(peer)
}
