//! Mock implementations for testing
//!
//! [`MockSoftenerClient`] replays a script of replies, records every request
//! and can hold fetches in flight until the test releases them.

use crate::client::{FetchRequest, SoftenerClient};
use crate::error::{GruenbeckError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Semaphore};

/// One scripted reply
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Raw response body
    Body(String),
    /// Empty body
    Empty,
    /// Connection failure with message
    ConnectionError(String),
}

impl MockReply {
    fn into_result(self) -> Result<String> {
        match self {
            MockReply::Body(body) if body.is_empty() => Err(GruenbeckError::EmptyResponse),
            MockReply::Body(body) => Ok(body),
            MockReply::Empty => Err(GruenbeckError::EmptyResponse),
            MockReply::ConnectionError(msg) => Err(GruenbeckError::connection(msg)),
        }
    }
}

/// Scripted softener client
///
/// Replies are consumed in order; once the script runs out the last reply
/// repeats. Without any reply every fetch returns an empty response.
pub struct MockSoftenerClient {
    script: Mutex<VecDeque<MockReply>>,
    last: Mutex<Option<MockReply>>,
    requests: Mutex<Vec<FetchRequest>>,
    calls: watch::Sender<usize>,
    gate: Option<Arc<Semaphore>>,
    delay: Option<Duration>,
}

impl MockSoftenerClient {
    /// Create new mock client
    pub fn new() -> Self {
        let (calls, _) = watch::channel(0);
        Self {
            script: Mutex::new(VecDeque::new()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            calls,
            gate: None,
            delay: None,
        }
    }

    /// Append a reply to the script
    pub fn reply(self, reply: MockReply) -> Self {
        self.script.lock().unwrap().push_back(reply);
        self
    }

    /// Append a body reply
    pub fn with_body(self, body: impl Into<String>) -> Self {
        self.reply(MockReply::Body(body.into()))
    }

    /// Append an empty reply
    pub fn with_empty(self) -> Self {
        self.reply(MockReply::Empty)
    }

    /// Append a connection failure
    pub fn with_connection_error(self, msg: impl Into<String>) -> Self {
        self.reply(MockReply::ConnectionError(msg.into()))
    }

    /// Sleep this long before replying
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hold every fetch until a permit is added to the returned semaphore
    pub fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(gate.clone());
        (self, gate)
    }

    /// Number of fetches started so far
    pub fn call_count(&self) -> usize {
        *self.calls.borrow()
    }

    /// Wait until at least `n` fetches have started
    pub async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.calls.subscribe();
        let _ = rx.wait_for(|count| *count >= n).await;
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<FetchRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_reply(&self) -> MockReply {
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        match next {
            Some(reply) => {
                *last = Some(reply.clone());
                reply
            }
            None => last.clone().unwrap_or(MockReply::Empty),
        }
    }
}

impl Default for MockSoftenerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SoftenerClient for MockSoftenerClient {
    async fn fetch(&self, request: &FetchRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        let reply = self.next_reply();
        self.calls.send_modify(|count| *count += 1);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        reply.into_result()
    }

    fn endpoint(&self) -> String {
        "mock://softener/mux_http".to_string()
    }
}
