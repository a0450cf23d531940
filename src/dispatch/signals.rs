use crate::resilience::BreakerSnapshot;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A lightweight snapshot of dispatcher state for operators and tests.
///
/// Facts only: no decision is derived from it.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchSignals {
    pub proxy_target: String,
    pub breaker: Option<BreakerSnapshot>,
    /// Configured route weights, `None` without a selector.
    pub routes: Option<HashMap<String, u32>>,
    pub direct_on_denial: bool,
    pub counters: CountersSnapshot,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CountersSnapshot {
    /// Requests sent on the direct transport, fallbacks included.
    pub direct: u64,
    /// Requests routed to the proxy, whether or not the breaker admitted them.
    pub proxied: u64,
    /// Proxy-routed requests the breaker refused.
    pub denied: u64,
    /// Refused requests re-issued directly.
    pub fell_back: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    direct: AtomicU64,
    proxied: AtomicU64,
    denied: AtomicU64,
    fell_back: AtomicU64,
}

impl Counters {
    pub(crate) fn direct(&self) {
        self.direct.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn proxied(&self) {
        self.proxied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fell_back(&self) {
        self.fell_back.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            direct: self.direct.load(Ordering::Relaxed),
            proxied: self.proxied.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            fell_back: self.fell_back.load(Ordering::Relaxed),
        }
    }
}
