//! Guarded execution on top of a [`Breaker`].
//!
//! `call` and `call_with_cancel` admit the operation through the breaker, bound
//! it by the breaker timeout, classify the result and report it back.

use super::circuit_breaker::{Breaker, BreakerError, Ticket};
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// How a finished call is reported to the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

/// Maps an operation error onto a breaker outcome.
///
/// The breaker tracks reachability: only deadline expiry and cancellation are
/// failures. Everything else an operation can return counts as a success.
pub trait Classify {
    fn outcome(&self) -> Outcome;
}

impl Classify for tokio::time::error::Elapsed {
    fn outcome(&self) -> Outcome {
        Outcome::Failure
    }
}

impl Classify for std::io::Error {
    fn outcome(&self) -> Outcome {
        match self.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted => Outcome::Failure,
            _ => Outcome::Success,
        }
    }
}

/// Error returned by guarded execution.
#[derive(Debug)]
pub enum GuardError<E> {
    /// The breaker refused, timed out or cancelled the call.
    Breaker(BreakerError),
    /// The operation itself returned an error.
    Run(E),
}

impl<E> GuardError<E> {
    pub fn breaker(&self) -> Option<&BreakerError> {
        match self {
            GuardError::Breaker(e) => Some(e),
            GuardError::Run(_) => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for GuardError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuardError::Breaker(e) => write!(f, "{}", e),
            GuardError::Run(e) => write!(f, "{}", e),
        }
    }
}

impl<E> std::error::Error for GuardError<E>
where
    E: std::error::Error + 'static,
{
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GuardError::Breaker(e) => Some(e),
            GuardError::Run(e) => Some(e),
        }
    }
}

/// Replacement result producer invoked when the guarded call does not succeed.
pub type Fallback<T, E> = Box<dyn FnOnce(GuardError<E>) -> Result<T, GuardError<E>> + Send>;

/// Run `run` under `breaker`.
///
/// On denial or error, `fallback` decides the result; without one the error is
/// returned unchanged.
pub async fn call<B, T, E, Fut>(
    breaker: &B,
    run: Fut,
    fallback: Option<Fallback<T, E>>,
) -> Result<T, GuardError<E>>
where
    B: Breaker + ?Sized,
    E: Classify,
    Fut: Future<Output = Result<T, E>>,
{
    let result = guarded(breaker, None, run).await;
    apply_fallback(result, fallback)
}

/// Like [`call`], but gives up as soon as `cancel` fires.
///
/// A token that is already cancelled stops the call before `run` is polled;
/// either way the cancellation is recorded as a breaker failure.
pub async fn call_with_cancel<B, T, E, Fut>(
    breaker: &B,
    cancel: &CancellationToken,
    run: Fut,
    fallback: Option<Fallback<T, E>>,
) -> Result<T, GuardError<E>>
where
    B: Breaker + ?Sized,
    E: Classify,
    Fut: Future<Output = Result<T, E>>,
{
    let result = guarded(breaker, Some(cancel), run).await;
    apply_fallback(result, fallback)
}

fn apply_fallback<T, E>(
    result: Result<T, GuardError<E>>,
    fallback: Option<Fallback<T, E>>,
) -> Result<T, GuardError<E>> {
    match (result, fallback) {
        (Err(err), Some(fallback)) => fallback(err),
        (result, _) => result,
    }
}

/// An admitted call that still owes the breaker an outcome.
///
/// If the guarded future is dropped before the call finishes, the ticket is
/// recorded as a failure so a half-open trial cannot stay in flight forever.
struct Admission<'a, B: Breaker + ?Sized> {
    breaker: &'a B,
    ticket: Option<Ticket>,
}

impl<'a, B: Breaker + ?Sized> Admission<'a, B> {
    fn new(breaker: &'a B, ticket: Ticket) -> Self {
        Self {
            breaker,
            ticket: Some(ticket),
        }
    }

    fn finish(mut self, outcome: Outcome) {
        if let Some(ticket) = self.ticket.take() {
            self.breaker.record(ticket, outcome);
        }
    }
}

impl<B: Breaker + ?Sized> Drop for Admission<'_, B> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            tracing::debug!(
                breaker = %self.breaker.name(),
                trial = ticket.is_trial(),
                "guarded call abandoned, recording failure"
            );
            self.breaker.record(ticket, Outcome::Failure);
        }
    }
}

async fn guarded<B, T, E, Fut>(
    breaker: &B,
    cancel: Option<&CancellationToken>,
    run: Fut,
) -> Result<T, GuardError<E>>
where
    B: Breaker + ?Sized,
    E: Classify,
    Fut: Future<Output = Result<T, E>>,
{
    let admission = Admission::new(breaker, breaker.acquire().map_err(GuardError::Breaker)?);
    let name = breaker.name().to_string();

    if cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
        admission.finish(Outcome::Failure);
        return Err(GuardError::Breaker(BreakerError::Cancelled { name }));
    }

    let timeout = breaker.timeout();
    let cancelled = async {
        match cancel {
            Some(token) => token.cancelled().await,
            None => std::future::pending::<()>().await,
        }
    };

    let (result, outcome) = tokio::select! {
        res = tokio::time::timeout(timeout, run) => match res {
            Ok(Ok(value)) => (Ok(value), Outcome::Success),
            Ok(Err(err)) => {
                let outcome = err.outcome();
                (Err(GuardError::Run(err)), outcome)
            }
            Err(_) => (
                Err(GuardError::Breaker(BreakerError::Timeout {
                    name,
                    timeout_ms: timeout.as_millis() as u64,
                })),
                Outcome::Failure,
            ),
        },
        _ = cancelled => (
            Err(GuardError::Breaker(BreakerError::Cancelled { name })),
            Outcome::Failure,
        ),
    };

    admission.finish(outcome);
    result
}
