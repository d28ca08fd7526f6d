//! In-memory [`Transport`] for deterministic session tests.
//!
//! Subscriptions are real [`Subscription`] streams fed through [`Routes`],
//! so consumers see the same end-of-stream behaviour as with the WebSocket
//! transport when the connection drops.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use tandem_transport::{
    ChannelStatus, Frame, Routes, Subscription, SubscriptionId, Transport, TransportError,
};

/// A frame captured from [`Transport::publish`].
#[derive(Debug, Clone, PartialEq)]
pub struct Published {
    pub destination: String,
    pub payload: serde_json::Value,
}

#[derive(Default)]
struct State {
    connected: bool,
    /// Upcoming connect calls that fail before one succeeds.
    failing_connects: u32,
    /// Every connect call fails while set.
    refuse_connects: bool,
    /// Connect calls never complete while set.
    hang_connects: bool,
    /// Subscribe calls for these topics never complete.
    hang_topics: Vec<String>,
    fail_publish: bool,
    connect_attempts: Vec<Instant>,
    subscriptions: HashMap<SubscriptionId, String>,
    published: Vec<Published>,
    disconnects: usize,
}

/// A pub/sub broker and client in one.
///
/// Tests push server frames with [`MemoryTransport::emit`], inspect what the
/// client published with [`MemoryTransport::published`], and script failures
/// with the `fail_*`/`refuse_*` knobs.
pub struct MemoryTransport {
    state: Mutex<State>,
    routes: Routes,
    status_tx: watch::Sender<ChannelStatus>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(ChannelStatus::Disconnected);
        Self {
            state: Mutex::new(State::default()),
            routes: Routes::new(),
            status_tx,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("memory transport lock poisoned")
    }

    /// Fail the next `n` connect calls.
    pub fn fail_next_connects(&self, n: u32) {
        self.state().failing_connects = n;
    }

    pub fn refuse_connects(&self, refuse: bool) {
        self.state().refuse_connects = refuse;
    }

    pub fn hang_connects(&self, hang: bool) {
        self.state().hang_connects = hang;
    }

    pub fn hang_subscribes_to(&self, topic: &str) {
        self.state().hang_topics.push(topic.to_string());
    }

    pub fn fail_publish(&self, fail: bool) {
        self.state().fail_publish = fail;
    }

    /// Deliver `payload` to every subscription on `topic`. Returns how many
    /// subscriptions received it.
    pub fn emit(&self, topic: &str, payload: serde_json::Value) -> usize {
        let targets: Vec<SubscriptionId> = self
            .state()
            .subscriptions
            .iter()
            .filter(|(_, t)| t.as_str() == topic)
            .map(|(id, _)| *id)
            .collect();

        let mut delivered = 0;
        for id in targets {
            let frame = Frame {
                destination: topic.to_string(),
                payload: payload.clone(),
            };
            if self.routes.deliver(id, frame) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Simulate the server or network dropping the connection. Every open
    /// subscription stream ends.
    pub fn drop_connection(&self) {
        self.reset_connection();
    }

    fn reset_connection(&self) {
        {
            let mut state = self.state();
            state.connected = false;
            state.subscriptions.clear();
        }
        self.routes.clear();
        self.status_tx.send_replace(ChannelStatus::Disconnected);
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn published(&self) -> Vec<Published> {
        self.state().published.clone()
    }

    pub fn published_to(&self, destination: &str) -> Vec<serde_json::Value> {
        self.state()
            .published
            .iter()
            .filter(|p| p.destination == destination)
            .map(|p| p.payload.clone())
            .collect()
    }

    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.state().connect_attempts.clone()
    }

    /// Topics with a live subscription, sorted.
    pub fn subscribed_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.state().subscriptions.values().cloned().collect();
        topics.sort();
        topics
    }

    pub fn disconnect_count(&self) -> usize {
        self.state().disconnects
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let hang = {
            let mut state = self.state();
            state.connect_attempts.push(Instant::now());
            if state.connected {
                return Ok(());
            }
            if state.refuse_connects {
                return Err(TransportError::Connection("connection refused".into()));
            }
            if state.failing_connects > 0 {
                state.failing_connects -= 1;
                return Err(TransportError::Connection("connection refused".into()));
            }
            state.hang_connects
        };
        if hang {
            std::future::pending::<()>().await;
        }

        self.state().connected = true;
        self.status_tx.send_replace(ChannelStatus::Connected);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        let hang = {
            let state = self.state();
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            state.hang_topics.iter().any(|t| t == topic)
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let id = Uuid::new_v4();
        self.state().subscriptions.insert(id, topic.to_string());
        let frames = self.routes.register(id);
        Ok(Subscription::new(id, topic, frames))
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        self.state().subscriptions.remove(&id);
        self.routes.remove(id);
    }

    async fn publish(&self, destination: &str, payload: serde_json::Value) -> Result<(), TransportError> {
        let mut state = self.state();
        if !state.connected || state.fail_publish {
            return Err(TransportError::Publish {
                destination: destination.to_string(),
                reason: "not connected".into(),
            });
        }
        state.published.push(Published {
            destination: destination.to_string(),
            payload,
        });
        Ok(())
    }

    async fn disconnect(&self) {
        self.state().disconnects += 1;
        self.reset_connection();
    }

    fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status_tx.subscribe()
    }
}
