use super::{Transport, TransportError};
use crate::config::TransportConfig;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use reqwest::Proxy;
use url::Url;

/// `reqwest`-backed transport, either direct or pinned to one proxy.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    proxy: Option<Url>,
}

impl ReqwestTransport {
    /// Client that never goes through a proxy, including env-configured ones.
    pub fn direct(config: &TransportConfig) -> Result<Self> {
        let client = Self::builder(config).no_proxy().build().map_err(|e| {
            Error::configuration_with_context(
                "failed to build direct HTTP client",
                ErrorContext::new()
                    .with_details(e.to_string())
                    .with_source("transport"),
            )
        })?;
        Ok(Self {
            client,
            proxy: None,
        })
    }

    /// Client routing every request through `proxy`.
    pub fn proxied(config: &TransportConfig, proxy: &Url) -> Result<Self> {
        let invalid = |e: reqwest::Error| {
            Error::configuration_with_context(
                "invalid proxy target",
                ErrorContext::new()
                    .with_field_path("proxy_url")
                    .with_details(format!("{}: {}", proxy, e))
                    .with_source("transport"),
            )
        };
        let client = Self::builder(config)
            .proxy(Proxy::all(proxy.as_str()).map_err(invalid)?)
            .build()
            .map_err(invalid)?;
        Ok(Self {
            client,
            proxy: Some(proxy.clone()),
        })
    }

    fn builder(config: &TransportConfig) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .pool_idle_timeout(Some(config.pool_idle_timeout()))
    }

    pub fn proxy(&self) -> Option<&Url> {
        self.proxy.as_ref()
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(
        &self,
        request: reqwest::Request,
    ) -> std::result::Result<reqwest::Response, TransportError> {
        self.client
            .execute(request)
            .await
            .map_err(TransportError::Http)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::Method;

    #[tokio::test]
    async fn test_direct_transport_sends_request() {
        let mut server = mockito::Server::new_async().await;
        let m = server
            .mock("GET", "/ping")
            .with_status(204)
            .create_async()
            .await;

        let transport = ReqwestTransport::direct(&TransportConfig::default()).unwrap();
        assert!(transport.proxy().is_none());
        let url = Url::parse(&format!("{}/ping", server.url())).unwrap();
        let resp = transport
            .send(reqwest::Request::new(Method::GET, url))
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 204);
        m.assert_async().await;
    }

    #[tokio::test]
    async fn test_proxied_transport_goes_through_proxy() {
        // mockito stands in for a forward proxy: plain HTTP proxies receive the
        // absolute target URL in the request line.
        let mut proxy = mockito::Server::new_async().await;
        let m = proxy
            .mock("GET", mockito::Matcher::Any)
            .with_status(200)
            .with_body("via proxy")
            .create_async()
            .await;

        let proxy_url = Url::parse(&proxy.url()).unwrap();
        let transport =
            ReqwestTransport::proxied(&TransportConfig::default(), &proxy_url).unwrap();
        assert_eq!(transport.proxy(), Some(&proxy_url));

        let target = Url::parse("http://upstream.invalid/receipts").unwrap();
        let resp = transport
            .send(reqwest::Request::new(Method::GET, target))
            .await
            .unwrap();
        assert_eq!(resp.text().await.unwrap(), "via proxy");
        m.assert_async().await;
    }
}
