use super::core::{Dispatcher, ProxyBinding};
use super::signals::Counters;
use crate::balance::WeightedSelector;
use crate::config::ProxyConfig;
use crate::resilience::Breaker;
use crate::transport::{ReqwestFactory, TransportFactory};
use crate::Result;
use arc_swap::{ArcSwap, ArcSwapOption};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

/// Builder for a [`Dispatcher`].
///
/// Construction is strict: the config must validate and the proxy target must
/// answer a reachability check.
pub struct DispatcherBuilder {
    config: ProxyConfig,
    factory: Option<Arc<dyn TransportFactory>>,
}

impl DispatcherBuilder {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config,
            factory: None,
        }
    }

    /// Use a custom transport factory instead of `reqwest` clients built from
    /// the config's transport section.
    pub fn with_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Build with the default selector and breaker.
    pub async fn build(self) -> Result<Dispatcher> {
        self.build_with().await
    }

    /// Build with custom selector and breaker implementations.
    pub async fn build_with<S, B>(self) -> Result<Dispatcher<S, B>>
    where
        S: WeightedSelector + Default + 'static,
        B: Breaker + 'static,
    {
        let config = self.config;
        config.validate()?;

        let factory = self.factory.unwrap_or_else(|| {
            Arc::new(ReqwestFactory::new(config.transport.clone())) as Arc<dyn TransportFactory>
        });

        let target = config.proxy_target()?;
        factory.check_reachable(&target).await?;
        let direct = factory.direct()?;
        let proxied = factory.proxied(&target)?;

        let breaker = config
            .breaker
            .clone()
            .map(B::from_config)
            .transpose()?
            .map(Arc::new);

        let selector = match &config.balance {
            Some(routes) if !routes.is_empty() => {
                let selector = S::default();
                selector.on_change(routes);
                Some(Arc::new(selector))
            }
            _ => None,
        };

        tracing::info!(
            proxy = %target,
            breaker = breaker.is_some(),
            routes = config.balance.as_ref().map(|b| b.items.len()).unwrap_or(0),
            "dispatcher ready"
        );

        Ok(Dispatcher {
            factory,
            direct,
            proxy: ArcSwap::from_pointee(ProxyBinding {
                target,
                transport: proxied,
            }),
            breaker: ArcSwapOption::new(breaker),
            selector: ArcSwapOption::new(selector),
            direct_on_denial: AtomicBool::new(config.direct_on_denial),
            applied: Mutex::new(config),
            reconfigure: tokio::sync::Mutex::new(()),
            counters: Counters::default(),
        })
    }
}
