use serde::Serialize;
use std::fmt;

/// Route name that sends traffic through the proxy.
pub const ROUTE_PROXY: &str = "proxy";
/// Route name for direct traffic.
pub const ROUTE_DIRECT: &str = "direct";
/// Older configs call the direct route "row".
pub const ROUTE_DIRECT_LEGACY: &str = "row";

/// Which transport a request goes out on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientKind {
    Direct,
    Proxy,
}

impl ClientKind {
    /// Map a scheduled route name onto a transport. Anything that is not the
    /// proxy route goes direct.
    pub fn from_route_name(name: &str) -> Self {
        if name == ROUTE_PROXY {
            ClientKind::Proxy
        } else {
            if name != ROUTE_DIRECT && name != ROUTE_DIRECT_LEGACY {
                tracing::debug!(route = name, "unknown route name, sending direct");
            }
            ClientKind::Direct
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ClientKind::Direct => ROUTE_DIRECT,
            ClientKind::Proxy => ROUTE_PROXY,
        }
    }
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why the dispatcher picked a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// No breaker configured; the proxy is never used.
    NoBreaker,
    BreakerOpen,
    /// Breaker admits traffic and no route set exists.
    NoSelector,
    /// The selector has no routes.
    NoRoute,
    Scheduled,
}

/// Outcome of the per-request routing decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    pub kind: ClientKind,
    pub reason: DecisionReason,
    /// Route name returned by the selector, when one was consulted.
    pub route: Option<String>,
}

impl RoutingDecision {
    pub(crate) fn direct(reason: DecisionReason) -> Self {
        Self {
            kind: ClientKind::Direct,
            reason,
            route: None,
        }
    }

    pub(crate) fn proxy(reason: DecisionReason) -> Self {
        Self {
            kind: ClientKind::Proxy,
            reason,
            route: None,
        }
    }

    pub(crate) fn scheduled(route: String) -> Self {
        Self {
            kind: ClientKind::from_route_name(&route),
            reason: DecisionReason::Scheduled,
            route: Some(route),
        }
    }
}
