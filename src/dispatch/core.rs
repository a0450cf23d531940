use super::route::{ClientKind, DecisionReason, RoutingDecision};
use super::signals::{Counters, DispatchSignals};
use crate::balance::{SmoothWeighted, WeightedSelector};
use crate::config::ProxyConfig;
use crate::resilience::{guard, Breaker, CircuitBreaker, GuardError};
use crate::transport::{Transport, TransportError, TransportFactory};
use crate::{Error, Result};
use arc_swap::{ArcSwap, ArcSwapOption};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Method, Request, Response};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;
use uuid::Uuid;

/// The proxied transport together with the target it was built for.
///
/// Replaced as a whole on reconfiguration, never mutated.
pub struct ProxyBinding {
    pub target: Url,
    pub transport: Arc<dyn Transport>,
}

/// Routes each outgoing request to the direct or the proxied transport.
///
/// - Without a breaker, or while it is open, traffic goes direct
/// - Otherwise the selector schedules between the `direct` and `proxy` routes
/// - Proxied calls run under the breaker; direct calls never touch it
///
/// All state that can change at runtime sits behind `arc-swap`, so requests
/// never wait on reconfiguration and in-flight calls finish on the instances
/// they started with.
pub struct Dispatcher<S = SmoothWeighted, B = CircuitBreaker> {
    pub(crate) factory: Arc<dyn TransportFactory>,
    pub(crate) direct: Arc<dyn Transport>,
    pub(crate) proxy: ArcSwap<ProxyBinding>,
    pub(crate) breaker: ArcSwapOption<B>,
    pub(crate) selector: ArcSwapOption<S>,
    pub(crate) direct_on_denial: AtomicBool,
    /// Live configuration, kept in step by every reconfiguration call.
    pub(crate) applied: Mutex<ProxyConfig>,
    /// Serializes every reconfiguration operation.
    pub(crate) reconfigure: tokio::sync::Mutex<()>,
    pub(crate) counters: Counters,
}

impl Dispatcher {
    /// Build a dispatcher with the default selector, breaker and `reqwest` transports.
    pub async fn new(config: ProxyConfig) -> Result<Self> {
        super::DispatcherBuilder::new(config).build().await
    }

    pub fn builder(config: ProxyConfig) -> super::DispatcherBuilder {
        super::DispatcherBuilder::new(config)
    }
}

impl<S, B> Dispatcher<S, B>
where
    S: WeightedSelector + Default + 'static,
    B: Breaker + 'static,
{
    pub fn proxy_target(&self) -> Url {
        self.proxy.load().target.clone()
    }

    pub fn breaker(&self) -> Option<Arc<B>> {
        self.breaker.load_full()
    }

    pub fn selector(&self) -> Option<Arc<S>> {
        self.selector.load_full()
    }

    pub fn direct_on_denial(&self) -> bool {
        self.direct_on_denial.load(Ordering::Relaxed)
    }

    pub fn set_direct_on_denial(&self, enable: bool) {
        let mut applied = self.lock_applied();
        self.direct_on_denial.store(enable, Ordering::Relaxed);
        applied.direct_on_denial = enable;
    }

    /// Copy of the configuration currently in effect.
    pub fn applied_config(&self) -> ProxyConfig {
        self.lock_applied().clone()
    }

    pub(crate) fn lock_applied(&self) -> MutexGuard<'_, ProxyConfig> {
        self.applied.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Decide where the next request would go.
    ///
    /// This consults the selector, so it advances the weighted schedule exactly
    /// like a real request does.
    pub fn decide(&self) -> RoutingDecision {
        self.route().0
    }

    fn route(&self) -> (RoutingDecision, Option<Arc<B>>) {
        let breaker = match self.breaker.load_full() {
            None => return (RoutingDecision::direct(DecisionReason::NoBreaker), None),
            Some(b) if b.is_open() => {
                return (RoutingDecision::direct(DecisionReason::BreakerOpen), None)
            }
            Some(b) => b,
        };
        let decision = match &*self.selector.load() {
            None => RoutingDecision::proxy(DecisionReason::NoSelector),
            Some(selector) => match selector.next() {
                Some(route) => RoutingDecision::scheduled(route),
                None => RoutingDecision::direct(DecisionReason::NoRoute),
            },
        };
        (decision, Some(breaker))
    }

    pub fn signals(&self) -> DispatchSignals {
        DispatchSignals {
            proxy_target: self.proxy.load().target.to_string(),
            breaker: self.breaker.load_full().map(|b| b.snapshot()),
            routes: self.selector.load_full().map(|s| s.all()),
            direct_on_denial: self.direct_on_denial(),
            counters: self.counters.snapshot(),
        }
    }

    pub async fn get(&self, url: Url) -> Result<Response> {
        self.execute(Request::new(Method::GET, url)).await
    }

    pub async fn get_with_cancel(&self, url: Url, cancel: &CancellationToken) -> Result<Response> {
        self.execute_with_cancel(Request::new(Method::GET, url), cancel)
            .await
    }

    pub async fn post(
        &self,
        url: Url,
        content_type: &str,
        body: impl Into<reqwest::Body>,
    ) -> Result<Response> {
        let request = post_request(url, content_type, body.into())?;
        self.execute(request).await
    }

    pub async fn post_with_cancel(
        &self,
        url: Url,
        content_type: &str,
        body: impl Into<reqwest::Body>,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        let request = post_request(url, content_type, body.into())?;
        self.execute_with_cancel(request, cancel).await
    }

    /// POST `form` as `application/x-www-form-urlencoded`.
    pub async fn post_form(&self, url: Url, form: &[(&str, &str)]) -> Result<Response> {
        self.execute(form_request(url, form)).await
    }

    pub async fn post_form_with_cancel(
        &self,
        url: Url,
        form: &[(&str, &str)],
        cancel: &CancellationToken,
    ) -> Result<Response> {
        self.execute_with_cancel(form_request(url, form), cancel)
            .await
    }

    /// Send a prepared request. Any HTTP status is a response, not an error.
    pub async fn execute(&self, request: Request) -> Result<Response> {
        self.dispatch(request, None).await
    }

    /// Like [`execute`](Self::execute), giving up once `cancel` fires.
    pub async fn execute_with_cancel(
        &self,
        request: Request,
        cancel: &CancellationToken,
    ) -> Result<Response> {
        self.dispatch(request, Some(cancel)).await
    }

    async fn dispatch(
        &self,
        request: Request,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response> {
        let span = tracing::debug_span!(
            "dispatch",
            request_id = %Uuid::new_v4(),
            method = %request.method(),
            url = %request.url(),
        );
        async move {
            let (decision, breaker) = self.route();
            tracing::debug!(
                kind = %decision.kind,
                reason = ?decision.reason,
                route = ?decision.route,
                "routing decision"
            );
            match (decision.kind, breaker) {
                (ClientKind::Proxy, Some(breaker)) => {
                    self.send_proxied(request, &breaker, cancel).await
                }
                _ => self.send_direct(request, cancel).await,
            }
        }
        .instrument(span)
        .await
    }

    async fn send_direct(
        &self,
        request: Request,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response> {
        self.counters.direct();
        match cancel {
            None => Ok(self.direct.send(request).await?),
            Some(token) => {
                if token.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                tokio::select! {
                    res = self.direct.send(request) => Ok(res?),
                    _ = token.cancelled() => Err(Error::Cancelled),
                }
            }
        }
    }

    async fn send_proxied(
        &self,
        request: Request,
        breaker: &B,
        cancel: Option<&CancellationToken>,
    ) -> Result<Response> {
        self.counters.proxied();
        // Streaming bodies cannot be replayed; those requests get no fallback.
        let retry = if self.direct_on_denial() {
            request.try_clone()
        } else {
            None
        };

        let binding = self.proxy.load_full();
        let run = binding.transport.send(request);
        let result = match cancel {
            Some(token) => guard::call_with_cancel(breaker, token, run, None).await,
            None => guard::call(breaker, run, None).await,
        };

        match result {
            Ok(resp) => Ok(resp),
            Err(GuardError::Run(e)) => Err(Error::Transport(e)),
            Err(GuardError::Breaker(e)) if e.is_denial() => {
                self.counters.denied();
                match retry {
                    Some(request) => {
                        tracing::debug!(error = %e, "proxy refused by breaker, sending direct");
                        self.counters.fell_back();
                        self.send_direct(request, cancel).await
                    }
                    None => Err(Error::Breaker(e)),
                }
            }
            Err(GuardError::Breaker(e)) => Err(Error::Breaker(e)),
        }
    }
}

fn post_request(url: Url, content_type: &str, body: reqwest::Body) -> Result<Request> {
    let value = HeaderValue::from_str(content_type).map_err(|e| {
        Error::Transport(TransportError::Other(format!(
            "invalid content type '{}': {}",
            content_type, e
        )))
    })?;
    let mut request = Request::new(Method::POST, url);
    request.headers_mut().insert(CONTENT_TYPE, value);
    *request.body_mut() = Some(body);
    Ok(request)
}

fn form_request(url: Url, form: &[(&str, &str)]) -> Request {
    let body = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(form.iter())
        .finish();
    let mut request = Request::new(Method::POST, url);
    request.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("application/x-www-form-urlencoded"),
    );
    *request.body_mut() = Some(body.into());
    request
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::balance::RouteSet;
    use crate::resilience::BreakerConfig;
    use crate::transport::TransportFactory;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[derive(Default)]
    struct Counting {
        hits: AtomicUsize,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Transport for Counting {
        async fn send(&self, _request: Request) -> std::result::Result<Response, TransportError> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(Response::from(
                http::Response::builder().status(200).body("ok").unwrap(),
            ))
        }
    }

    struct Fixed {
        direct: Arc<Counting>,
        proxy: Arc<Counting>,
    }

    #[async_trait]
    impl TransportFactory for Fixed {
        fn direct(&self) -> Result<Arc<dyn Transport>> {
            Ok(self.direct.clone())
        }

        fn proxied(&self, _proxy: &Url) -> Result<Arc<dyn Transport>> {
            Ok(self.proxy.clone())
        }

        async fn check_reachable(&self, _proxy: &Url) -> Result<()> {
            Ok(())
        }
    }

    async fn dispatcher(
        config: ProxyConfig,
        proxy_delay: Option<Duration>,
    ) -> (Dispatcher, Arc<Counting>, Arc<Counting>) {
        let direct = Arc::new(Counting::default());
        let proxy = Arc::new(Counting {
            hits: AtomicUsize::new(0),
            delay: proxy_delay,
        });
        let d = Dispatcher::builder(config)
            .with_factory(Arc::new(Fixed {
                direct: direct.clone(),
                proxy: proxy.clone(),
            }))
            .build()
            .await
            .unwrap();
        (d, direct, proxy)
    }

    fn url() -> Url {
        Url::parse("http://upstream.test/verify").unwrap()
    }

    #[tokio::test]
    async fn test_without_breaker_everything_goes_direct() {
        let config = ProxyConfig::new("http://10.0.0.1:3128")
            .with_balance(RouteSet::from_pairs([("proxy", 1)]));
        let (d, direct, proxy) = dispatcher(config, None).await;
        for _ in 0..5 {
            d.get(url()).await.unwrap();
        }
        assert_eq!(direct.hits.load(Ordering::SeqCst), 5);
        assert_eq!(proxy.hits.load(Ordering::SeqCst), 0);
        assert_eq!(d.decide().reason, DecisionReason::NoBreaker);
    }

    #[tokio::test]
    async fn test_breaker_without_selector_uses_proxy() {
        let config =
            ProxyConfig::new("http://10.0.0.1:3128").with_breaker(BreakerConfig::new("proxy"));
        let (d, direct, proxy) = dispatcher(config, None).await;
        d.get(url()).await.unwrap();
        assert_eq!(direct.hits.load(Ordering::SeqCst), 0);
        assert_eq!(proxy.hits.load(Ordering::SeqCst), 1);
        assert_eq!(d.breaker().unwrap().snapshot().total, 1);
    }

    #[tokio::test]
    async fn test_selector_splits_traffic_by_weight() {
        let config = ProxyConfig::new("http://10.0.0.1:3128")
            .with_breaker(BreakerConfig::new("proxy").with_volume_threshold(1_000))
            .with_balance(RouteSet::from_pairs([("row", 1), ("proxy", 3)]));
        let (d, direct, proxy) = dispatcher(config, None).await;
        for _ in 0..40 {
            d.get(url()).await.unwrap();
        }
        assert_eq!(direct.hits.load(Ordering::SeqCst), 10);
        assert_eq!(proxy.hits.load(Ordering::SeqCst), 30);
        let signals = d.signals();
        assert_eq!(signals.counters.direct, 10);
        assert_eq!(signals.counters.proxied, 30);
    }

    #[tokio::test]
    async fn test_empty_selector_sends_direct() {
        let config = ProxyConfig::new("http://10.0.0.1:3128")
            .with_breaker(BreakerConfig::new("proxy"))
            .with_balance(RouteSet::from_pairs([("proxy", 1)]));
        let (d, _direct, _proxy) = dispatcher(config, None).await;
        d.selector().unwrap().remove_all();
        let decision = d.decide();
        assert_eq!(decision.kind, ClientKind::Direct);
        assert_eq!(decision.reason, DecisionReason::NoRoute);
    }

    #[tokio::test]
    async fn test_open_breaker_routes_direct() {
        let config = ProxyConfig::new("http://10.0.0.1:3128").with_breaker(
            BreakerConfig::new("proxy")
                .with_volume_threshold(1)
                .with_timeout(Duration::from_millis(20))
                .with_sleep_window(Duration::from_secs(60)),
        );
        let (d, direct, proxy) = dispatcher(config, Some(Duration::from_millis(200))).await;

        let err = d.get(url()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Breaker(crate::resilience::BreakerError::Timeout { .. })
        ));
        assert!(err.is_deadline_or_cancel());
        assert!(d.breaker().unwrap().is_open());

        d.get(url()).await.unwrap();
        assert_eq!(proxy.hits.load(Ordering::SeqCst), 1);
        assert_eq!(direct.hits.load(Ordering::SeqCst), 1);
        assert_eq!(d.decide().reason, DecisionReason::BreakerOpen);
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_direct_call() {
        let config = ProxyConfig::new("http://10.0.0.1:3128");
        let (d, direct, _proxy) = dispatcher(config, None).await;
        let token = CancellationToken::new();
        token.cancel();
        let err = d.get_with_cancel(url(), &token).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert_eq!(direct.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_token_on_proxy_path_counts_as_failure() {
        let config =
            ProxyConfig::new("http://10.0.0.1:3128").with_breaker(BreakerConfig::new("proxy"));
        let (d, _direct, proxy) = dispatcher(config, None).await;
        let token = CancellationToken::new();
        token.cancel();
        let err = d.get_with_cancel(url(), &token).await.unwrap_err();
        assert!(err.is_deadline_or_cancel());
        assert_eq!(proxy.hits.load(Ordering::SeqCst), 0);
        assert_eq!(d.breaker().unwrap().snapshot().failures, 1);
    }

    #[test]
    fn test_form_request_is_url_encoded() {
        let request = form_request(url(), &[("receipt-data", "a+b=c"), ("password", "s p")]);
        assert_eq!(request.method(), Method::POST);
        assert_eq!(
            request.headers()[CONTENT_TYPE],
            "application/x-www-form-urlencoded"
        );
        let body = request.body().and_then(|b| b.as_bytes()).unwrap();
        assert_eq!(body, b"receipt-data=a%2Bb%3Dc&password=s+p");
    }

    #[test]
    fn test_post_request_rejects_bad_content_type() {
        assert!(post_request(url(), "application/json", reqwest::Body::from("{}")).is_ok());
        assert!(post_request(url(), "bad\nvalue", reqwest::Body::from("{}")).is_err());
    }
}
