//! Per-request routing between a direct and a proxied HTTP transport.
//!
//! The public surface is the [`Dispatcher`]: verbs (`get`, `post`, `post_form`,
//! `execute` and their `_with_cancel` forms), reconfiguration hooks and a
//! [`DispatchSignals`] snapshot. Implementation details are split into
//! submodules under `src/dispatch/`.

pub mod builder;
pub mod core;
pub mod route;
pub mod signals;
mod watch;

pub use self::builder::DispatcherBuilder;
pub use self::core::{Dispatcher, ProxyBinding};
pub use self::route::{ClientKind, DecisionReason, RoutingDecision};
pub use self::signals::{CountersSnapshot, DispatchSignals};
pub use self::watch::ConfigChanges;
