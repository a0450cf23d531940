//! # egress-dispatch
//!
//! Adaptive routing for outbound HTTP traffic: every request goes either
//! directly to its upstream or through a configured proxy.
//!
//! ## Overview
//!
//! Two mechanisms decide the route:
//!
//! - A **weighted selector** spreads traffic over named routes (`direct`,
//!   `proxy`) in proportion to their weights, interleaving them smoothly
//! - A **circuit breaker** watches proxied calls and stops using the proxy while
//!   it looks unreachable, probing it again after a sleep window
//!
//! Both, along with the proxy target itself, can be replaced at runtime without
//! interrupting requests in flight.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use egress_dispatch::{BreakerConfig, Dispatcher, ProxyConfig, RouteSet};
//!
//! #[tokio::main]
//! async fn main() -> egress_dispatch::Result<()> {
//!     let config = ProxyConfig::new("http://10.0.0.8:3128")
//!         .with_breaker(BreakerConfig::new("proxy"))
//!         .with_balance(RouteSet::from_pairs([("direct", 1), ("proxy", 3)]));
//!
//!     let dispatcher = Dispatcher::new(config).await?;
//!     let url = url::Url::parse("https://api.example.com/v1/receipts").unwrap();
//!     let resp = dispatcher.get(url).await?;
//!     println!("{}", resp.status());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`balance`] | Weighted route selection |
//! | [`resilience`] | Circuit breaker and guarded execution |
//! | [`transport`] | HTTP transports, transport factory, reachability checks |
//! | [`dispatch`] | The dispatcher, routing decisions, reconfiguration, signals |
//! | [`config`] | Configuration schema, loading and file watching |

pub mod balance;
pub mod config;
pub mod dispatch;
pub mod resilience;
pub mod transport;

// Re-export main types for convenience
pub use balance::{RouteItem, RouteSet, SmoothWeighted, WeightedSelector};
pub use config::{load_config, ConfigWatcher, ProxyConfig, TransportConfig};
pub use dispatch::{
    ClientKind, ConfigChanges, DispatchSignals, Dispatcher, DispatcherBuilder, RoutingDecision,
};
pub use resilience::{Breaker, BreakerConfig, BreakerError, BreakerState, CircuitBreaker};
pub use transport::{ReqwestFactory, Transport, TransportError, TransportFactory};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
