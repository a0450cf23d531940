//! Circuit breaking for the proxied route.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Rolling-window breaker with half-open probing and a concurrency cap |
//! | [`guard`] | Guarded execution (`call` / `call_with_cancel`) and outcome classification |
//! | [`window`] | Bucketed outcome counters |
//!
//! ## States
//!
//! - **Closed**: calls pass through, outcomes are counted
//! - **Open**: enough traffic failed; calls are rejected until the sleep window elapses
//! - **Half-Open**: a single trial call decides whether to close again
//!
//! Only deadline expiry and cancellation count as failures. The breaker answers
//! "is the proxy reachable", not "did the upstream like the request".
//!
//! ```rust
//! use egress_dispatch::resilience::{guard, Breaker, BreakerConfig, CircuitBreaker};
//! use std::time::Duration;
//!
//! # async fn demo() -> egress_dispatch::Result<()> {
//! let breaker = CircuitBreaker::new(
//!     BreakerConfig::new("proxy")
//!         .with_timeout(Duration::from_millis(500))
//!         .with_volume_threshold(10),
//! )?;
//!
//! let value: Result<u32, guard::GuardError<std::io::Error>> =
//!     guard::call(&breaker, async { Ok(1) }, None).await;
//! assert_eq!(value.unwrap(), 1);
//! assert!(!breaker.is_open());
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod guard;
pub mod window;

pub use circuit_breaker::{
    Breaker, BreakerConfig, BreakerError, BreakerSnapshot, BreakerState, CircuitBreaker, Ticket,
};
pub use guard::{call, call_with_cancel, Classify, Fallback, GuardError, Outcome};
