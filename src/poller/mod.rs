//! Telemetry poller: periodic fetch, shared snapshot, subscriber fan-out
//!
//! One poller drives one softener. A repeating timer (and any on-demand
//! [`TelemetryPoller::refresh`]) triggers a fetch; concurrent triggers are
//! coalesced so at most one request is ever in flight. A successful fetch
//! replaces the [`ReadingStore`] snapshot in one swap and is broadcast to
//! every subscriber. Empty responses and failures leave the snapshot alone
//! and the next tick simply tries again.
//!
//! ```text
//! Idle ──start──▶ Scheduled ──tick/refresh──▶ Fetching ──done──▶ Scheduled
//!   └────────────────────┴────── stop ─────────────┴──────────▶ Stopped
//! ```

pub mod single_flight;
pub mod subscription;

use crate::client::{parse_payload, FetchRequest, Register, RegisterTable, SoftenerClient};
use crate::config::{PollerConfig, MAX_INTERVAL_SECS};
use crate::error::{ErrorSeverity, FailureKind, GruenbeckError, Result};
use crate::services::{ReadingStore, Snapshot};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use single_flight::{CoalescingMetrics, SingleFlight};
pub use subscription::{Subscription, SubscriptionHandle};

use subscription::SubscriberEntry;

/// Buffered snapshots per subscriber before the oldest are skipped
const NOTIFY_CAPACITY: usize = 16;

/// Lifecycle state of a poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerState {
    /// Created, timer not armed
    Idle,
    /// Timer armed, waiting for the next tick
    Scheduled,
    /// One fetch in flight
    Fetching,
    /// Timer cancelled; terminal
    Stopped,
}

/// Result of one fetch cycle
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Complete table for the requested registers
    Success(RegisterTable),
    /// Device has no data yet
    EmptyResponse,
    /// Network, status or timeout failure
    TransportError(String),
    /// Malformed or incomplete payload
    ParseError(String),
}

impl FetchOutcome {
    fn from_error(error: &GruenbeckError) -> Self {
        match error.failure_kind() {
            FailureKind::EmptyResponse => FetchOutcome::EmptyResponse,
            FailureKind::Parse => FetchOutcome::ParseError(error.to_string()),
            FailureKind::Transport => FetchOutcome::TransportError(error.to_string()),
        }
    }

    /// Outcome class
    pub fn kind(&self) -> OutcomeKind {
        match self {
            FetchOutcome::Success(_) => OutcomeKind::Success,
            FetchOutcome::EmptyResponse => OutcomeKind::EmptyResponse,
            FetchOutcome::TransportError(_) => OutcomeKind::TransportError,
            FetchOutcome::ParseError(_) => OutcomeKind::ParseError,
        }
    }

    /// True for [`FetchOutcome::Success`]
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }

    /// True for the outcomes that signal "update failed"
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            FetchOutcome::TransportError(_) | FetchOutcome::ParseError(_)
        )
    }
}

/// Outcome class without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Success,
    EmptyResponse,
    TransportError,
    ParseError,
}

impl fmt::Display for OutcomeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutcomeKind::Success => "success",
            OutcomeKind::EmptyResponse => "empty response",
            OutcomeKind::TransportError => "transport error",
            OutcomeKind::ParseError => "parse error",
        };
        f.write_str(name)
    }
}

/// Availability signal for the hosting layer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateStatus {
    /// False after a failed tick, until the next success
    pub available: bool,
    /// Class of the most recent completed fetch
    pub last_outcome: Option<OutcomeKind>,
    /// Failed ticks since the last success
    pub consecutive_failures: u32,
    /// Empty responses since the last non-empty outcome
    pub consecutive_empty: u32,
    /// Completion time of the last successful fetch
    pub last_success: Option<DateTime<Utc>>,
    /// Message of the most recent failure
    pub last_error: Option<String>,
}

#[derive(Debug)]
struct Lifecycle {
    state: PollerState,
    started: bool,
}

impl Lifecycle {
    fn resting_state(&self) -> PollerState {
        if self.started {
            PollerState::Scheduled
        } else {
            PollerState::Idle
        }
    }
}

pub(crate) struct PollerInner {
    client: Arc<dyn SoftenerClient>,
    request: FetchRequest,
    timeout: Duration,
    poll_without_subscribers: bool,
    degrade_after_empty: Option<u32>,
    pub(crate) store: ReadingStore,
    lifecycle: Mutex<Lifecycle>,
    flight: SingleFlight<Option<FetchOutcome>>,
    subscribers: Mutex<HashMap<SubscriptionHandle, SubscriberEntry>>,
    next_handle: AtomicU64,
    notify_tx: broadcast::Sender<Arc<Snapshot>>,
    status_tx: watch::Sender<UpdateStatus>,
    interval_tx: watch::Sender<Duration>,
    cancel: CancellationToken,
    timer: Mutex<Option<JoinHandle<()>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl PollerInner {
    fn state(&self) -> PollerState {
        lock(&self.lifecycle).state
    }

    fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }

    pub(crate) fn remove_subscriber(&self, handle: SubscriptionHandle) -> bool {
        match lock(&self.subscribers).remove(&handle) {
            Some(entry) => {
                entry.cancel.cancel();
                debug!("Unregistered subscriber {handle} ({})", entry.context);
                true
            }
            None => false,
        }
    }

    /// Run or join a fetch; `Stopped` if its result was discarded
    async fn trigger(self: &Arc<Self>) -> Result<FetchOutcome> {
        let inner = self.clone();
        self.flight
            .run(move || inner.execute_fetch())
            .await?
            .ok_or(GruenbeckError::Stopped)
    }

    fn log_failure(&self, error: &GruenbeckError) {
        let endpoint = self.client.endpoint();
        let message = match error.failure_kind() {
            FailureKind::EmptyResponse => {
                format!("Empty response from {endpoint}, keeping last snapshot")
            }
            _ if error.is_retryable() => {
                format!("Update failed for {endpoint}, retrying next tick: {error}")
            }
            _ => format!("Update failed for {endpoint}: {error}"),
        };
        match error.severity() {
            ErrorSeverity::Error => error!("{message}"),
            ErrorSeverity::Warning => warn!("{message}"),
            ErrorSeverity::Info => info!("{message}"),
        }
    }

    fn outcome_from_error(&self, error: GruenbeckError) -> FetchOutcome {
        self.log_failure(&error);
        FetchOutcome::from_error(&error)
    }

    async fn execute_fetch(self: Arc<Self>) -> Option<FetchOutcome> {
        {
            let mut lifecycle = lock(&self.lifecycle);
            if lifecycle.state != PollerState::Stopped {
                lifecycle.state = PollerState::Fetching;
            }
        }

        debug!("Fetching {} registers from {}", self.request.registers().len(), self.client.endpoint());
        let outcome = match tokio::time::timeout(self.timeout, self.client.fetch(&self.request)).await
        {
            Err(_) => self.outcome_from_error(GruenbeckError::timeout(format!(
                "fetch exceeded {:?}",
                self.timeout
            ))),
            Ok(Err(e)) => self.outcome_from_error(e),
            Ok(Ok(raw)) => match parse_payload(&raw, &self.request) {
                Ok(table) => FetchOutcome::Success(table),
                Err(e) => self.outcome_from_error(e),
            },
        };

        self.complete(&outcome).then_some(outcome)
    }

    /// Apply a finished fetch; returns false if it was discarded after stop
    fn complete(&self, outcome: &FetchOutcome) -> bool {
        let mut lifecycle = lock(&self.lifecycle);
        if lifecycle.state == PollerState::Stopped {
            debug!("Discarding {} from fetch finished after stop", outcome.kind());
            return false;
        }
        lifecycle.state = lifecycle.resting_state();

        match outcome {
            FetchOutcome::Success(table) => {
                let snapshot = self.store.replace(table.clone());
                debug!(
                    "Snapshot #{} with {} registers",
                    snapshot.sequence,
                    snapshot.table.len()
                );
                let fetched_at = snapshot.fetched_at;
                // No receivers is not an error.
                let _ = self.notify_tx.send(snapshot);
                self.status_tx.send_modify(|status| {
                    status.available = true;
                    status.last_outcome = Some(OutcomeKind::Success);
                    status.consecutive_failures = 0;
                    status.consecutive_empty = 0;
                    status.last_success = fetched_at;
                });
            }
            FetchOutcome::EmptyResponse => {
                let threshold = self.degrade_after_empty;
                self.status_tx.send_modify(|status| {
                    status.last_outcome = Some(OutcomeKind::EmptyResponse);
                    status.consecutive_empty = status.consecutive_empty.saturating_add(1);
                    if threshold.is_some_and(|limit| status.consecutive_empty >= limit) {
                        status.available = false;
                    }
                });
            }
            FetchOutcome::TransportError(cause) | FetchOutcome::ParseError(cause) => {
                let kind = outcome.kind();
                self.status_tx.send_modify(|status| {
                    status.available = false;
                    status.last_outcome = Some(kind);
                    status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                    status.consecutive_empty = 0;
                    status.last_error = Some(cause.clone());
                });
            }
        }
        true
    }
}

/// Periodic poller for one softener
///
/// Cloning yields another handle to the same poller.
#[derive(Clone)]
pub struct TelemetryPoller {
    inner: Arc<PollerInner>,
}

impl TelemetryPoller {
    /// Create a poller using the operational register set
    pub fn new(config: &PollerConfig, client: Arc<dyn SoftenerClient>) -> Result<Self> {
        Self::with_request(config, client, FetchRequest::operational(config.device_id))
    }

    /// Create a poller for an explicit register set
    pub fn with_request(
        config: &PollerConfig,
        client: Arc<dyn SoftenerClient>,
        request: FetchRequest,
    ) -> Result<Self> {
        config.validate()?;

        let (notify_tx, _) = broadcast::channel(NOTIFY_CAPACITY);
        let (status_tx, _) = watch::channel(UpdateStatus::default());
        let (interval_tx, _) = watch::channel(config.interval());

        Ok(Self {
            inner: Arc::new(PollerInner {
                client,
                request,
                timeout: config.timeout,
                poll_without_subscribers: config.poll_without_subscribers,
                degrade_after_empty: config.degrade_after_empty,
                store: ReadingStore::new(),
                lifecycle: Mutex::new(Lifecycle {
                    state: PollerState::Idle,
                    started: false,
                }),
                flight: SingleFlight::new(),
                subscribers: Mutex::new(HashMap::new()),
                next_handle: AtomicU64::new(1),
                notify_tx,
                status_tx,
                interval_tx,
                cancel: CancellationToken::new(),
                timer: Mutex::new(None),
            }),
        })
    }

    /// Arm the repeating timer
    ///
    /// The first tick fires one interval after start. Must be called from
    /// within a Tokio runtime.
    pub fn start(&self) -> Result<()> {
        {
            let mut lifecycle = lock(&self.inner.lifecycle);
            match lifecycle.state {
                PollerState::Stopped => return Err(GruenbeckError::Stopped),
                _ if lifecycle.started => {
                    debug!("Poller already started");
                    return Ok(());
                }
                PollerState::Idle => lifecycle.state = PollerState::Scheduled,
                // An on-demand fetch is running; it settles into Scheduled.
                PollerState::Fetching | PollerState::Scheduled => {}
            }
            lifecycle.started = true;
        }

        let interval_rx = self.inner.interval_tx.subscribe();
        let handle = tokio::spawn(run_timer(
            Arc::downgrade(&self.inner),
            self.inner.cancel.clone(),
            interval_rx,
        ));
        *lock(&self.inner.timer) = Some(handle);

        info!(
            "Polling {} every {:?}",
            self.inner.client.endpoint(),
            *self.inner.interval_tx.borrow()
        );
        Ok(())
    }

    /// Stop polling
    ///
    /// A fetch still in flight completes in the background, but its result is
    /// neither stored nor broadcast. Subscriptions end.
    pub fn stop(&self) {
        {
            let mut lifecycle = lock(&self.inner.lifecycle);
            if lifecycle.state == PollerState::Stopped {
                return;
            }
            lifecycle.state = PollerState::Stopped;
        }

        self.inner.cancel.cancel();
        if let Some(timer) = lock(&self.inner.timer).take() {
            timer.abort();
        }
        lock(&self.inner.subscribers).clear();
        info!("Stopped polling {}", self.inner.client.endpoint());
    }

    /// Fetch now, or join the fetch already in flight
    ///
    /// Every caller of a coalesced fetch observes the same outcome. Fails
    /// with [`GruenbeckError::Stopped`] when the poller is stopped, including
    /// when it stops while the fetch is in flight.
    pub async fn refresh(&self) -> Result<FetchOutcome> {
        if self.state() == PollerState::Stopped {
            return Err(GruenbeckError::Stopped);
        }
        self.inner.trigger().await
    }

    /// Change the polling interval
    ///
    /// The timer is re-armed with the new period; no fetch is forced.
    pub fn set_interval(&self, secs: u64) -> Result<()> {
        if secs == 0 {
            return Err(GruenbeckError::invalid_input(
                "Polling interval must be at least 1 second",
            ));
        }
        if secs > MAX_INTERVAL_SECS {
            return Err(GruenbeckError::invalid_input(format!(
                "Polling interval must not exceed {MAX_INTERVAL_SECS} seconds"
            )));
        }
        if self.state() == PollerState::Stopped {
            return Err(GruenbeckError::Stopped);
        }

        self.inner.interval_tx.send_replace(Duration::from_secs(secs));
        Ok(())
    }

    /// Current polling interval
    pub fn interval(&self) -> Duration {
        *self.inner.interval_tx.borrow()
    }

    /// Current lifecycle state
    pub fn state(&self) -> PollerState {
        self.inner.state()
    }

    /// Registers fetched on every tick
    pub fn request(&self) -> &FetchRequest {
        &self.inner.request
    }

    /// Latest snapshot
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.store.snapshot()
    }

    /// Snapshot store
    pub fn store(&self) -> &ReadingStore {
        &self.inner.store
    }

    /// Register interest; the returned subscription receives each new snapshot
    pub fn register(&self, context: impl Into<String>) -> Result<Subscription> {
        if self.state() == PollerState::Stopped {
            return Err(GruenbeckError::Stopped);
        }

        let context = context.into();
        let handle = SubscriptionHandle(self.inner.next_handle.fetch_add(1, Ordering::Relaxed));
        let cancel = self.inner.cancel.child_token();
        let receiver = self.inner.notify_tx.subscribe();

        lock(&self.inner.subscribers).insert(
            handle,
            SubscriberEntry {
                context: context.clone(),
                cancel: cancel.clone(),
            },
        );
        debug!("Registered subscriber {handle} ({context})");

        Ok(Subscription::new(
            handle,
            context,
            receiver,
            cancel,
            self.inner.clone(),
        ))
    }

    /// Register a callback run after every successful fetch
    ///
    /// Each callback runs on its own task, so a slow callback never delays
    /// the poller or other subscribers.
    pub fn on_update<F>(&self, context: impl Into<String>, callback: F) -> Result<SubscriptionHandle>
    where
        F: Fn(Arc<Snapshot>) + Send + Sync + 'static,
    {
        let mut subscription = self.register(context)?;
        let handle = subscription.handle();
        tokio::spawn(async move {
            while let Some(snapshot) = subscription.recv().await {
                callback(snapshot);
            }
        });
        Ok(handle)
    }

    /// Remove a subscriber; returns false if the handle was unknown
    pub fn unregister(&self, handle: SubscriptionHandle) -> bool {
        self.inner.remove_subscriber(handle)
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriber_count()
    }

    /// Contexts of all registered subscribers
    pub fn contexts(&self) -> Vec<String> {
        let subscribers = lock(&self.inner.subscribers);
        let mut entries: Vec<_> = subscribers.iter().collect();
        entries.sort_by_key(|(handle, _)| **handle);
        entries
            .into_iter()
            .map(|(_, entry)| entry.context.clone())
            .collect()
    }

    /// Value of a register for a registered subscriber
    pub fn get_value(&self, handle: SubscriptionHandle, register: Register) -> Result<String> {
        if !lock(&self.inner.subscribers).contains_key(&handle) {
            return Err(GruenbeckError::not_found(format!(
                "Unknown subscription {handle}"
            )));
        }
        self.inner.store.get(register)
    }

    /// Value of a register for the subscriber registered under `context`
    pub fn get_value_for_context(&self, context: &str, register: Register) -> Result<String> {
        let known = lock(&self.inner.subscribers)
            .values()
            .any(|entry| entry.context == context);
        if !known {
            return Err(GruenbeckError::not_found(format!(
                "No subscriber registered as {context}"
            )));
        }
        self.inner.store.get(register)
    }

    /// Watch the availability signal
    pub fn status(&self) -> watch::Receiver<UpdateStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Current availability signal
    pub fn current_status(&self) -> UpdateStatus {
        self.inner.status_tx.borrow().clone()
    }

    /// Coalescing counters
    pub fn coalescing_metrics(&self) -> CoalescingMetrics {
        self.inner.flight.metrics()
    }
}

impl fmt::Debug for TelemetryPoller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TelemetryPoller")
            .field("endpoint", &self.inner.client.endpoint())
            .field("state", &self.state())
            .field("interval", &self.interval())
            .finish()
    }
}

fn new_ticker(period: Duration) -> tokio::time::Interval {
    let period = period.clamp(
        Duration::from_secs(1),
        Duration::from_secs(MAX_INTERVAL_SECS),
    );
    let now = Instant::now();
    let first = now
        .checked_add(period)
        .unwrap_or_else(|| now + Duration::from_secs(1));
    let mut ticker = interval_at(first, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// Timer loop; holds only a weak reference so dropped pollers wind down
async fn run_timer(
    inner: Weak<PollerInner>,
    cancel: CancellationToken,
    mut interval_rx: watch::Receiver<Duration>,
) {
    let mut ticker = new_ticker(*interval_rx.borrow_and_update());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = interval_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let period = *interval_rx.borrow_and_update();
                info!("Polling interval changed to {period:?}");
                ticker = new_ticker(period);
            }
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };

                if !inner.poll_without_subscribers && inner.subscriber_count() == 0 {
                    debug!("No subscribers, skipping tick");
                    continue;
                }

                tokio::select! {
                    _ = cancel.cancelled() => break,
                    result = inner.trigger() => {
                        if let Err(e) = result {
                            debug!("Tick ended without outcome: {e}");
                        }
                    }
                }
            }
        }
    }

    debug!("Poll timer exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSoftenerClient;
    use pretty_assertions::assert_eq;

    const TICK_ONE: &str = "<data><code>ok</code><D_Y_5>1</D_Y_5><D_A_1_2>1.86</D_A_1_2></data>";
    const TICK_THREE: &str = "<data><code>ok</code><D_Y_5>0</D_Y_5><D_A_1_2>1.75</D_A_1_2></data>";

    fn request() -> FetchRequest {
        FetchRequest::new(626, [Register::DY5, Register::DA1_2]).unwrap()
    }

    fn table(pairs: &[(Register, &str)]) -> RegisterTable {
        pairs.iter().map(|(r, v)| (*r, v.to_string())).collect()
    }

    fn poller(client: Arc<MockSoftenerClient>) -> TelemetryPoller {
        let config = PollerConfig::new("softener.test").with_interval(45);
        TelemetryPoller::with_request(&config, client, request()).unwrap()
    }

    #[tokio::test]
    async fn test_successful_refresh_replaces_store() {
        let client = Arc::new(MockSoftenerClient::new().with_body(TICK_ONE));
        let poller = poller(client.clone());

        let outcome = poller.refresh().await.unwrap();

        let expected = table(&[(Register::DY5, "1"), (Register::DA1_2, "1.86")]);
        assert_eq!(outcome, FetchOutcome::Success(expected.clone()));
        assert_eq!(poller.snapshot().table, expected);
        assert_eq!(client.requests()[0].query(), "id=626&show=D_Y_5|D_A_1_2~");
        assert!(poller.current_status().available);
    }

    #[tokio::test]
    async fn test_failures_leave_store_untouched() {
        let client = Arc::new(
            MockSoftenerClient::new()
                .with_body(TICK_ONE)
                .with_empty()
                .with_connection_error("connection refused")
                .with_body("<data><code>ok</code><D_Y_5>2</D_Y_5></data>")
                .with_body("<data><D_Y_5>2</D_Y_6></data>"),
        );
        let poller = poller(client);

        assert!(poller.refresh().await.unwrap().is_success());
        let before = poller.snapshot();

        assert_eq!(poller.refresh().await.unwrap(), FetchOutcome::EmptyResponse);
        assert!(matches!(
            poller.refresh().await.unwrap(),
            FetchOutcome::TransportError(_)
        ));
        assert!(matches!(
            poller.refresh().await.unwrap(),
            FetchOutcome::ParseError(_)
        ));
        assert!(matches!(
            poller.refresh().await.unwrap(),
            FetchOutcome::ParseError(_)
        ));

        assert_eq!(poller.snapshot(), before);
        let status = poller.current_status();
        assert!(!status.available);
        assert_eq!(status.consecutive_failures, 3);
        assert_eq!(status.last_outcome, Some(OutcomeKind::ParseError));
    }

    #[tokio::test]
    async fn test_empty_response_does_not_degrade_by_default() {
        let client = Arc::new(MockSoftenerClient::new().with_body(TICK_ONE).with_empty());
        let poller = poller(client);

        poller.refresh().await.unwrap();
        for _ in 0..5 {
            poller.refresh().await.unwrap();
        }

        let status = poller.current_status();
        assert!(status.available);
        assert_eq!(status.consecutive_empty, 5);
        assert_eq!(status.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_empty_responses_degrade_past_threshold() {
        let client = Arc::new(MockSoftenerClient::new().with_body(TICK_ONE).with_empty());
        let mut config = PollerConfig::new("softener.test");
        config.degrade_after_empty = Some(2);
        let poller = TelemetryPoller::with_request(&config, client, request()).unwrap();

        poller.refresh().await.unwrap();
        poller.refresh().await.unwrap();
        assert!(poller.current_status().available);
        poller.refresh().await.unwrap();
        assert!(!poller.current_status().available);
    }

    #[tokio::test]
    async fn test_concurrent_refreshes_share_one_fetch() {
        let (client, gate) = MockSoftenerClient::new().with_body(TICK_ONE).gated();
        let client = Arc::new(client);
        let poller = poller(client.clone());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let poller = poller.clone();
            handles.push(tokio::spawn(async move { poller.refresh().await }));
        }

        client.wait_for_calls(1).await;
        while poller.coalescing_metrics().requests_coalesced < 7 {
            tokio::task::yield_now().await;
        }
        assert_eq!(poller.state(), PollerState::Fetching);
        gate.add_permits(1);

        let outcomes: Vec<FetchOutcome> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(client.call_count(), 1);
        assert!(outcomes.windows(2).all(|pair| pair[0] == pair[1]));
        assert!(outcomes[0].is_success());
        assert_eq!(poller.state(), PollerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_follow_interval() {
        let client = Arc::new(
            MockSoftenerClient::new()
                .with_body(TICK_ONE)
                .with_empty()
                .with_body(TICK_THREE),
        );
        let poller = poller(client.clone());
        let mut subscription = poller.register("sensor.remaining_capacity").unwrap();
        poller.start().unwrap();
        assert_eq!(poller.state(), PollerState::Scheduled);

        tokio::time::sleep(Duration::from_secs(44)).await;
        assert_eq!(client.call_count(), 0);

        let first = subscription.recv().await.unwrap();
        assert_eq!(first.get(Register::DA1_2), Some("1.86"));

        // Tick two: empty response, store keeps tick one.
        client.wait_for_calls(2).await;
        tokio::task::yield_now().await;
        assert_eq!(poller.store().get(Register::DA1_2).unwrap(), "1.86");

        let third = subscription.recv().await.unwrap();
        assert_eq!(third.get(Register::DA1_2), Some("1.75"));
        assert_eq!(third.sequence, 2);
        assert_eq!(client.call_count(), 3);

        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticks_skipped_without_subscribers() {
        let client = Arc::new(MockSoftenerClient::new().with_body(TICK_ONE));
        let poller = poller(client.clone());
        poller.start().unwrap();

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert_eq!(client.call_count(), 0);

        // On-demand refresh still fetches.
        assert!(poller.refresh().await.unwrap().is_success());
        assert_eq!(client.call_count(), 1);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_result() {
        let (client, gate) = MockSoftenerClient::new().with_body(TICK_ONE).gated();
        let client = Arc::new(client);
        let poller = poller(client.clone());
        let mut subscription = poller.register("sensor.actual_flow").unwrap();
        poller.start().unwrap();

        client.wait_for_calls(1).await;
        assert_eq!(poller.state(), PollerState::Fetching);

        poller.stop();
        gate.add_permits(1);
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(poller.state(), PollerState::Stopped);
        assert!(poller.snapshot().is_empty());
        assert!(subscription.recv().await.is_none());
        assert_eq!(poller.subscriber_count(), 0);
        assert!(matches!(poller.refresh().await, Err(GruenbeckError::Stopped)));
    }

    async fn refresh_then_stop(client: MockSoftenerClient) -> (TelemetryPoller, Result<FetchOutcome>) {
        let (client, gate) = client.gated();
        let client = Arc::new(client);
        let poller = poller(client.clone());

        let pending = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.refresh().await })
        };
        client.wait_for_calls(1).await;
        poller.stop();
        gate.add_permits(1);

        let result = pending.await.unwrap();
        (poller, result)
    }

    #[tokio::test]
    async fn test_refresh_fails_when_stop_discards_success() {
        let (poller, result) = refresh_then_stop(MockSoftenerClient::new().with_body(TICK_ONE)).await;

        assert!(matches!(result, Err(GruenbeckError::Stopped)));
        assert!(poller.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_fails_when_stop_discards_failure() {
        let (poller, result) =
            refresh_then_stop(MockSoftenerClient::new().with_connection_error("refused")).await;

        assert!(matches!(result, Err(GruenbeckError::Stopped)));
        assert_eq!(poller.current_status(), UpdateStatus::default());
    }

    fn slow_poller(client: Arc<MockSoftenerClient>) -> TelemetryPoller {
        let config = PollerConfig::new("softener.test")
            .with_interval(45)
            .with_timeout(Duration::from_secs(120));
        TelemetryPoller::with_request(&config, client, request()).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_tick_joins_refresh_in_flight() {
        let (client, gate) = MockSoftenerClient::new().with_body(TICK_ONE).gated();
        let client = Arc::new(client);
        let poller = slow_poller(client.clone());
        let mut subscription = poller.register("sensor.remaining_capacity").unwrap();
        poller.start().unwrap();

        let pending = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.refresh().await })
        };
        client.wait_for_calls(1).await;

        // The tick at 45s lands while the refresh is still waiting on the device.
        tokio::time::sleep(Duration::from_secs(46)).await;
        assert_eq!(poller.coalescing_metrics().requests_coalesced, 1);
        gate.add_permits(1);

        assert!(pending.await.unwrap().unwrap().is_success());
        assert_eq!(subscription.recv().await.unwrap().sequence, 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(client.call_count(), 1);
        assert_eq!(poller.snapshot().sequence, 1);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_joins_tick_in_flight() {
        let (client, gate) = MockSoftenerClient::new().with_body(TICK_ONE).gated();
        let client = Arc::new(client);
        let poller = slow_poller(client.clone());
        let mut subscription = poller.register("sensor.remaining_capacity").unwrap();
        poller.start().unwrap();

        client.wait_for_calls(1).await;
        let pending = {
            let poller = poller.clone();
            tokio::spawn(async move { poller.refresh().await })
        };
        while poller.coalescing_metrics().requests_coalesced < 1 {
            tokio::task::yield_now().await;
        }
        gate.add_permits(1);

        assert!(pending.await.unwrap().unwrap().is_success());
        assert_eq!(subscription.recv().await.unwrap().sequence, 1);
        assert_eq!(client.call_count(), 1);
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_interval_rejected_and_timer_survives() {
        let client = Arc::new(MockSoftenerClient::new().with_body(TICK_ONE));
        let poller = poller(client.clone());
        let _subscription = poller.register("sensor.actual_flow").unwrap();
        poller.start().unwrap();

        assert!(matches!(
            poller.set_interval(u64::MAX),
            Err(GruenbeckError::InvalidInput(_))
        ));
        poller.set_interval(MAX_INTERVAL_SECS).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        poller.set_interval(1).unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(client.call_count() >= 2);
        assert_eq!(poller.state(), PollerState::Scheduled);

        let config = PollerConfig::new("softener.test").with_interval(u64::MAX);
        assert!(TelemetryPoller::new(&config, client).is_err());
        poller.stop();
    }

    #[tokio::test]
    async fn test_ticker_never_overflows() {
        let ticker = new_ticker(Duration::MAX);
        assert_eq!(ticker.period(), Duration::from_secs(MAX_INTERVAL_SECS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_interval_rearms_without_fetching() {
        let client = Arc::new(MockSoftenerClient::new().with_body(TICK_ONE));
        let poller = poller(client.clone());
        let _subscription = poller.register("sensor.regeneration_step").unwrap();
        poller.start().unwrap();

        tokio::time::sleep(Duration::from_secs(30)).await;
        poller.set_interval(10).unwrap();
        assert_eq!(poller.interval(), Duration::from_secs(10));

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(client.call_count(), 0);

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(client.call_count(), 1);

        assert!(poller.set_interval(0).is_err());
        poller.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_is_transport_error() {
        let client = Arc::new(
            MockSoftenerClient::new()
                .with_body(TICK_ONE)
                .with_delay(Duration::from_secs(60)),
        );
        let config = PollerConfig::new("softener.test").with_timeout(Duration::from_secs(30));
        let poller = TelemetryPoller::with_request(&config, client, request()).unwrap();

        match poller.refresh().await.unwrap() {
            FetchOutcome::TransportError(cause) => assert!(cause.contains("timed out")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(poller.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_subscriptions_and_values() {
        let client = Arc::new(MockSoftenerClient::new().with_body(TICK_ONE));
        let poller = poller(client);

        let subscription = poller.register("sensor.remaining_capacity").unwrap();
        let handle = subscription.handle();
        assert_eq!(poller.contexts(), vec!["sensor.remaining_capacity".to_string()]);

        assert!(matches!(
            poller.get_value(handle, Register::DA1_2),
            Err(GruenbeckError::NotFound(_))
        ));
        poller.refresh().await.unwrap();
        assert_eq!(poller.get_value(handle, Register::DA1_2).unwrap(), "1.86");
        assert_eq!(subscription.get(Register::DY5).unwrap(), "1");
        assert_eq!(
            poller
                .get_value_for_context("sensor.remaining_capacity", Register::DA1_2)
                .unwrap(),
            "1.86"
        );
        assert!(poller
            .get_value_for_context("sensor.unknown", Register::DA1_2)
            .is_err());

        assert!(poller.unregister(handle));
        assert!(!poller.unregister(handle));
        assert!(poller.get_value(handle, Register::DA1_2).is_err());

        let second = poller.register("sensor.actual_flow").unwrap();
        drop(second);
        assert_eq!(poller.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_callbacks_receive_each_success() {
        let client = Arc::new(MockSoftenerClient::new().with_body(TICK_ONE).with_body(TICK_THREE));
        let poller = poller(client);

        let (first_tx, mut first_rx) = tokio::sync::mpsc::unbounded_channel();
        let (second_tx, mut second_rx) = tokio::sync::mpsc::unbounded_channel();
        let first = poller
            .on_update("sensor.remaining_capacity", move |snapshot| {
                let _ = first_tx.send(snapshot.sequence);
            })
            .unwrap();
        poller
            .on_update("sensor.regeneration_step", move |snapshot| {
                let _ = second_tx.send(snapshot.get(Register::DY5).map(str::to_string));
            })
            .unwrap();
        assert_eq!(poller.subscriber_count(), 2);

        poller.refresh().await.unwrap();
        assert_eq!(first_rx.recv().await, Some(1));
        assert_eq!(second_rx.recv().await, Some(Some("1".to_string())));

        assert!(poller.unregister(first));
        poller.refresh().await.unwrap();
        assert_eq!(second_rx.recv().await, Some(Some("0".to_string())));
        // The callback task ended and dropped its sender.
        assert_eq!(first_rx.recv().await, None);
    }
}
