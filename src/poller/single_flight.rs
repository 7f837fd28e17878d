//! Single-flight execution of the device fetch
//!
//! Concurrent triggers share one execution: the first caller starts the work
//! on a spawned task, every caller (first included) parks a `oneshot` sender,
//! and the finished result is cloned out to all of them. The work runs on its
//! own task, so a caller that gives up waiting does not cancel the fetch the
//! others are waiting on.

use crate::error::{GruenbeckError, Result};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::debug;

/// Counters for coalesced triggers
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CoalescingMetrics {
    /// Executions actually started
    pub flights_started: u64,
    /// Triggers that joined an execution already in flight
    pub requests_coalesced: u64,
}

struct FlightState<T> {
    in_flight: bool,
    waiters: Vec<oneshot::Sender<T>>,
    metrics: CoalescingMetrics,
}

/// Coalesces concurrent runs of one operation
pub struct SingleFlight<T> {
    state: Arc<Mutex<FlightState<T>>>,
}

impl<T> SingleFlight<T>
where
    T: Clone + Send + 'static,
{
    /// Create an idle single-flight group
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FlightState {
                in_flight: false,
                waiters: Vec::new(),
                metrics: CoalescingMetrics::default(),
            })),
        }
    }

    /// Run `work`, or join the execution already in flight
    ///
    /// `work` is only called when no execution is in flight. Fails with
    /// [`GruenbeckError::Stopped`] if the execution was torn down (task
    /// aborted or runtime shutting down) before producing a result.
    pub async fn run<F, Fut>(&self, work: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let leader = {
            let mut state = lock(&self.state);
            state.waiters.push(tx);
            if state.in_flight {
                state.metrics.requests_coalesced += 1;
                debug!("Joining fetch already in flight ({} waiting)", state.waiters.len());
                false
            } else {
                state.in_flight = true;
                state.metrics.flights_started += 1;
                true
            }
        };

        if leader {
            let fut = work();
            let guard = FlightGuard {
                state: self.state.clone(),
                finished: false,
            };
            tokio::spawn(async move {
                let result = fut.await;
                for waiter in guard.finish() {
                    let _ = waiter.send(result.clone());
                }
            });
        }

        rx.await.map_err(|_| GruenbeckError::Stopped)
    }

    /// True while an execution is running
    pub fn in_flight(&self) -> bool {
        lock(&self.state).in_flight
    }

    /// Snapshot of the coalescing counters
    pub fn metrics(&self) -> CoalescingMetrics {
        lock(&self.state).metrics.clone()
    }
}

impl<T> Default for SingleFlight<T>
where
    T: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(state: &Mutex<FlightState<T>>) -> MutexGuard<'_, FlightState<T>> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Clears the in-flight marker even if the execution never completes
struct FlightGuard<T> {
    state: Arc<Mutex<FlightState<T>>>,
    finished: bool,
}

impl<T> FlightGuard<T> {
    fn finish(mut self) -> Vec<oneshot::Sender<T>> {
        self.finished = true;
        let mut state = lock(&self.state);
        state.in_flight = false;
        std::mem::take(&mut state.waiters)
    }
}

impl<T> Drop for FlightGuard<T> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        // Dropping the senders wakes every waiter with an error.
        let mut state = lock(&self.state);
        state.in_flight = false;
        state.waiters.clear();
    }
}
