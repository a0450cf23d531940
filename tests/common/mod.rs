//! Shared fakes for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use egress_dispatch::{
    Error, ErrorContext, Result, Transport, TransportError, TransportFactory,
};
use reqwest::{Request, Response};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

/// Transport that answers every request itself and counts what it saw.
#[derive(Default)]
pub struct FakeTransport {
    pub label: String,
    hits: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    /// Number of upcoming calls that hang until the caller's deadline cuts them off.
    fail_deadline: AtomicUsize,
    /// Number of upcoming calls that fail with a non-deadline error.
    fail_other: AtomicUsize,
}

impl FakeTransport {
    pub fn new(label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            ..Self::default()
        })
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_deadline(&self, n: usize) {
        self.fail_deadline.store(n, Ordering::SeqCst);
    }

    pub fn fail_other(&self, n: usize) {
        self.fail_other.store(n, Ordering::SeqCst);
    }

    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, _request: Request) -> std::result::Result<Response, TransportError> {
        self.hits.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if Self::take(&self.fail_deadline) {
            tokio::time::sleep(Duration::from_secs(30)).await;
            return Err(TransportError::Other("hung call was not cut off".into()));
        }
        if Self::take(&self.fail_other) {
            return Err(TransportError::Other("connection reset".into()));
        }
        Ok(Response::from(
            http::Response::builder()
                .status(200)
                .header("x-served-by", self.label.as_str())
                .body(self.label.clone())
                .unwrap(),
        ))
    }
}

/// Factory handing out one fake per proxy target plus a shared direct fake.
pub struct FakeFactory {
    pub direct: Arc<FakeTransport>,
    proxies: Mutex<HashMap<String, Arc<FakeTransport>>>,
    unreachable: Mutex<HashSet<String>>,
    check_delays: Mutex<HashMap<String, Duration>>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            direct: FakeTransport::new("direct"),
            proxies: Mutex::new(HashMap::new()),
            unreachable: Mutex::new(HashSet::new()),
            check_delays: Mutex::new(HashMap::new()),
        })
    }

    /// Fake transport for `proxy_url`, created on first use.
    pub fn proxy(&self, proxy_url: &str) -> Arc<FakeTransport> {
        let key = Url::parse(proxy_url).unwrap().to_string();
        self.proxies
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_insert_with(|| FakeTransport::new(key))
            .clone()
    }

    pub fn mark_unreachable(&self, proxy_url: &str) {
        let key = Url::parse(proxy_url).unwrap().to_string();
        self.unreachable.lock().unwrap().insert(key);
    }

    /// Make the reachability check for `proxy_url` take `delay`.
    pub fn set_check_delay(&self, proxy_url: &str, delay: Duration) {
        let key = Url::parse(proxy_url).unwrap().to_string();
        self.check_delays.lock().unwrap().insert(key, delay);
    }

    pub fn proxy_hits(&self) -> usize {
        self.proxies.lock().unwrap().values().map(|p| p.hits()).sum()
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    fn direct(&self) -> Result<Arc<dyn Transport>> {
        Ok(self.direct.clone())
    }

    fn proxied(&self, proxy: &Url) -> Result<Arc<dyn Transport>> {
        Ok(self.proxy(proxy.as_str()))
    }

    async fn check_reachable(&self, proxy: &Url) -> Result<()> {
        let delay = self.check_delays.lock().unwrap().get(proxy.as_str()).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.lock().unwrap().contains(proxy.as_str()) {
            return Err(Error::configuration_with_context(
                format!("proxy target {} is unreachable", proxy),
                ErrorContext::new().with_source("proxy_check"),
            ));
        }
        Ok(())
    }
}

pub fn upstream() -> Url {
    Url::parse("http://upstream.test/v1/receipts").unwrap()
}

pub async fn served_by(resp: Response) -> String {
    resp.text().await.unwrap()
}
