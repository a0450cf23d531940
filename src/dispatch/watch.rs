//! Runtime reconfiguration.
//!
//! Every operation builds the replacement first and swaps it in only when it
//! is complete; a rejected change leaves the running setup untouched. All
//! operations take the dispatcher's reconfiguration lock, so changes never
//! interleave.

use super::core::{Dispatcher, ProxyBinding};
use crate::balance::{RouteSet, WeightedSelector};
use crate::config::{parse_proxy_url, ProxyConfig};
use crate::resilience::{Breaker, BreakerConfig};
use crate::Result;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Sections touched by [`Dispatcher::apply_config`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigChanges {
    pub proxy: bool,
    pub breaker: bool,
    pub balance: bool,
    pub direct_on_denial: bool,
}

impl ConfigChanges {
    pub fn is_empty(&self) -> bool {
        !(self.proxy || self.breaker || self.balance || self.direct_on_denial)
    }
}

impl<S, B> Dispatcher<S, B>
where
    S: WeightedSelector + Default + 'static,
    B: Breaker + 'static,
{
    /// Point the proxy route at a new target.
    ///
    /// The target must parse and answer a reachability check; otherwise the
    /// previous target stays in place and the error is returned. Concurrent
    /// changes are applied in the order they were requested.
    pub async fn on_proxy_change(&self, proxy_url: &str) -> Result<()> {
        let _serial = self.reconfigure.lock().await;
        self.change_proxy(proxy_url).await
    }

    /// Replace the route weights. An empty set changes nothing.
    pub async fn on_balance_change(&self, routes: &RouteSet) -> Result<()> {
        let _serial = self.reconfigure.lock().await;
        self.change_balance(routes)
    }

    /// Swap in a breaker built from `config`. Calls already running finish on
    /// the old breaker.
    pub async fn on_circuit_breaker_change(&self, config: BreakerConfig) -> Result<()> {
        let _serial = self.reconfigure.lock().await;
        self.change_breaker(config)
    }

    /// Drop the breaker; from now on every request goes direct.
    pub async fn disable_circuit_breaker(&self) {
        let _serial = self.reconfigure.lock().await;
        self.remove_breaker();
    }

    // The helpers below expect `reconfigure` to be held. Each installs its
    // replacement and updates `applied` under the same `applied` lock.

    async fn change_proxy(&self, proxy_url: &str) -> Result<()> {
        let target = parse_proxy_url(proxy_url).map_err(|e| {
            tracing::warn!(proxy = proxy_url, error = %e, "rejected proxy change");
            e
        })?;
        if let Err(e) = self.factory.check_reachable(&target).await {
            tracing::warn!(proxy = %target, error = %e, "proxy unreachable, keeping current target");
            return Err(e);
        }
        let transport = self.factory.proxied(&target)?;

        let mut applied = self.lock_applied();
        let previous = self.proxy.swap(Arc::new(ProxyBinding {
            target: target.clone(),
            transport,
        }));
        applied.proxy_url = proxy_url.to_string();
        drop(applied);

        tracing::info!(from = %previous.target, to = %target, "proxy target replaced");
        Ok(())
    }

    fn change_balance(&self, routes: &RouteSet) -> Result<()> {
        routes.validate().map_err(|e| {
            tracing::warn!(error = %e, "rejected route weights");
            e
        })?;
        if routes.is_empty() {
            tracing::debug!("empty route set, keeping current routes");
            return Ok(());
        }

        let mut applied = self.lock_applied();
        match self.selector.load_full() {
            Some(selector) => selector.on_change(routes),
            None => {
                let selector = S::default();
                selector.on_change(routes);
                self.selector.store(Some(Arc::new(selector)));
            }
        }
        applied.balance = Some(routes.clone());
        drop(applied);

        tracing::info!(routes = routes.items.len(), "route weights updated");
        Ok(())
    }

    fn change_breaker(&self, config: BreakerConfig) -> Result<()> {
        let breaker = B::from_config(config.clone()).map_err(|e| {
            tracing::warn!(error = %e, "rejected circuit breaker config");
            e
        })?;
        let name = config.name.clone();

        let mut applied = self.lock_applied();
        self.breaker.store(Some(Arc::new(breaker)));
        applied.breaker = Some(config);
        drop(applied);

        tracing::info!(breaker = %name, "circuit breaker replaced");
        Ok(())
    }

    fn remove_breaker(&self) {
        let mut applied = self.lock_applied();
        self.breaker.store(None);
        applied.breaker = None;
        drop(applied);

        tracing::info!("circuit breaker removed, proxy disabled");
    }

    /// Apply a whole config, touching only the sections that differ from the
    /// one in effect.
    ///
    /// Transport settings are fixed at construction; changes to them are
    /// logged and skipped. A failing proxy change is reported after the other
    /// sections have been applied.
    pub async fn apply_config(&self, config: &ProxyConfig) -> Result<ConfigChanges> {
        config.validate()?;
        let _serial = self.reconfigure.lock().await;
        let current = self.applied_config();
        let mut changes = ConfigChanges::default();

        if config.transport != current.transport {
            tracing::warn!("transport settings changed, they take effect on restart");
        }

        if config.direct_on_denial != current.direct_on_denial {
            self.set_direct_on_denial(config.direct_on_denial);
            changes.direct_on_denial = true;
        }

        if config.breaker != current.breaker {
            match &config.breaker {
                Some(breaker) => self.change_breaker(breaker.clone())?,
                None => self.remove_breaker(),
            }
            changes.breaker = true;
        }

        if config.balance != current.balance {
            if let Some(routes) = config.balance.as_ref().filter(|r| !r.is_empty()) {
                self.change_balance(routes)?;
                changes.balance = true;
            }
        }

        if config.proxy_url != current.proxy_url {
            self.change_proxy(&config.proxy_url).await?;
            changes.proxy = true;
        }

        tracing::debug!(?changes, "config applied");
        Ok(changes)
    }

    /// Apply every config received on `updates` until the sender goes away.
    pub async fn follow(&self, mut updates: mpsc::UnboundedReceiver<ProxyConfig>) {
        while let Some(config) = updates.recv().await {
            if let Err(e) = self.apply_config(&config).await {
                tracing::warn!(error = %e, "config update not fully applied");
            }
        }
    }
}
