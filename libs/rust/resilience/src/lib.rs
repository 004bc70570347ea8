//! Containment for untrusted calls: a deadline, a host-wide bulkhead and panic capture.
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use futures::{Future, FutureExt};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{warn, debug};
use opentelemetry::{global, metrics::Counter, KeyValue};
use once_cell::sync::Lazy;

static CONTAINED: Lazy<Counter<u64>> = Lazy::new(|| {
    global::meter("modelhost-resilience")
        .u64_counter("modelhost_contained_failures_total")
        .with_description("Calls stopped by containment (timeout, panic, no free slot)")
        .build()
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ContainmentError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("panicked: {0}")]
    Panicked(String),
    #[error("no execution slot free within {0:?}")]
    Saturated(Duration),
    #[error("containment closed")]
    Closed,
}

/// Bulkhead plus deadline. Clone shares the same permit pool.
#[derive(Debug, Clone)]
pub struct Containment {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl Containment {
    pub fn new(max_concurrent: usize) -> Self {
        let capacity = max_concurrent.max(1);
        Self { permits: Arc::new(Semaphore::new(capacity)), capacity }
    }

    pub fn capacity(&self) -> usize { self.capacity }
    pub fn available(&self) -> usize { self.permits.available_permits() }

    /// Reject every future `run`; in-flight calls finish normally.
    pub fn close(&self) { self.permits.close(); }

    /// Wait at most `wait` for an execution slot. Running out of slots is a host condition,
    /// reported as `Saturated` and never as a timeout of the call that was waiting.
    pub async fn acquire(&self, wait: Duration) -> Result<Slot<'_>, ContainmentError> {
        match tokio::time::timeout(wait, self.permits.acquire()).await {
            Ok(Ok(permit)) => Ok(Slot { _permit: permit }),
            Ok(Err(_)) => Err(ContainmentError::Closed),
            Err(_) => {
                CONTAINED.add(1, &[KeyValue::new("reason", "saturated")]);
                warn!(?wait, "no execution slot before deadline");
                Err(ContainmentError::Saturated(wait))
            }
        }
    }

    /// One-shot form: wait up to `deadline` for a slot, then give `fut` the whole `deadline`.
    pub async fn run<F, T>(&self, deadline: Duration, fut: F) -> Result<T, ContainmentError>
    where F: Future<Output = T> {
        let slot = self.acquire(deadline).await?;
        slot.run(deadline, fut).await
    }
}

/// A held execution slot. Several calls may run under it in sequence; dropping it frees the slot.
#[derive(Debug)]
pub struct Slot<'a> {
    _permit: SemaphorePermit<'a>,
}

impl Slot<'_> {
    /// Run `fut` under `deadline`, measured from now, capturing panics.
    pub async fn run<F, T>(&self, deadline: Duration, fut: F) -> Result<T, ContainmentError>
    where F: Future<Output = T> {
        let started = Instant::now();
        match tokio::time::timeout(deadline, AssertUnwindSafe(fut).catch_unwind()).await {
            Ok(Ok(v)) => {
                debug!(elapsed = ?started.elapsed(), "contained call finished");
                Ok(v)
            }
            Ok(Err(payload)) => {
                let msg = panic_message(payload);
                CONTAINED.add(1, &[KeyValue::new("reason", "panic")]);
                warn!(panic = %msg, "contained panic");
                Err(ContainmentError::Panicked(msg))
            }
            Err(_) => {
                CONTAINED.add(1, &[KeyValue::new("reason", "timeout")]);
                warn!(?deadline, "contained call exceeded deadline");
                Err(ContainmentError::Timeout(deadline))
            }
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() { return s.to_string(); }
    if let Some(s) = payload.downcast_ref::<String>() { return s.clone(); }
    "non-string panic payload".into()
}
