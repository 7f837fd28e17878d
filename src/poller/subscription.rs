//! Subscriber registration and snapshot notifications

use crate::client::Register;
use crate::error::Result;
use crate::poller::PollerInner;
use crate::services::Snapshot;
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Identifier handed out by [`TelemetryPoller::register`](crate::poller::TelemetryPoller::register)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(pub(crate) u64);

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Registry entry for one subscriber
#[derive(Debug, Clone)]
pub(crate) struct SubscriberEntry {
    pub context: String,
    pub cancel: CancellationToken,
}

/// A registered consumer of snapshots
///
/// Dropping the subscription unregisters it.
pub struct Subscription {
    handle: SubscriptionHandle,
    context: String,
    receiver: broadcast::Receiver<Arc<Snapshot>>,
    cancel: CancellationToken,
    poller: Arc<PollerInner>,
}

impl Subscription {
    pub(crate) fn new(
        handle: SubscriptionHandle,
        context: String,
        receiver: broadcast::Receiver<Arc<Snapshot>>,
        cancel: CancellationToken,
        poller: Arc<PollerInner>,
    ) -> Self {
        Self {
            handle,
            context,
            receiver,
            cancel,
            poller,
        }
    }

    /// Handle identifying this subscription
    pub fn handle(&self) -> SubscriptionHandle {
        self.handle
    }

    /// Context supplied at registration
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Wait for the next successful fetch
    ///
    /// Returns `None` once the subscription is unregistered or the poller
    /// stops. A subscriber that fell behind skips straight to the newest
    /// snapshots it still has buffered.
    pub async fn recv(&mut self) -> Option<Arc<Snapshot>> {
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return None,
                received = self.receiver.recv() => match received {
                    Ok(snapshot) => return Some(snapshot),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!("Subscriber {} skipped {skipped} snapshots", self.handle);
                    }
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    }

    /// Current value of a register
    pub fn get(&self, register: Register) -> Result<String> {
        self.poller.store.get(register)
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.poller.store.snapshot()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("handle", &self.handle)
            .field("context", &self.context)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.poller.remove_subscriber(self.handle);
    }
}
