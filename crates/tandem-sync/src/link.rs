use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tandem_api::MessageHistoryService;
use tandem_transport::{ChannelLease, SharedChannel, Subscription, Transport, TransportError};
use tandem_types::events::{Destinations, TopicKind};
use tandem_types::models::{Message, MessageDraft};

use crate::backoff::Backoff;
use crate::config::SyncConfig;
use crate::delivery::{
    Acknowledged, Delivered, DeliveryError, DeliveryPath, DeliveryPolicy, FallbackDelivery,
    LiveDelivery,
};

/// ```text
/// Idle -> Connecting -> Connected -> Disconnected -> Connecting (retry) ... -> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

/// Everything the link reports to its owner, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Connecting { attempt: u32 },
    Connected,
    /// `retry_in` is `None` once the retry budget is spent; the link stays
    /// disconnected until closed.
    ConnectionLost {
        failures: u32,
        retry_in: Option<Duration>,
    },
    MessageCreated(Message),
    MessageUpdated(Message),
}

/// Binds one conversation to the live channel (two topic subscriptions) and
/// to the HTTP fallback.
///
/// The link itself is driven by its owner: a background supervisor connects,
/// subscribes, and retries, reporting [`LinkEvent`]s; the owner feeds those
/// back through [`ConversationLink::apply`], so state is only ever written by
/// one task.
pub struct ConversationLink {
    conversation_id: Uuid,
    destinations: Destinations,
    channel: SharedChannel,
    lease: Option<ChannelLease>,
    live: LiveDelivery,
    fallback: FallbackDelivery,
    state: LinkState,
    backoff: Backoff,
    max_attempts: u32,
    connect_timeout: Duration,
    cancel: CancellationToken,
    supervisor: Option<JoinHandle<()>>,
}

impl ConversationLink {
    pub fn new(
        conversation_id: Uuid,
        channel: SharedChannel,
        history: Arc<dyn MessageHistoryService>,
        config: &SyncConfig,
        cancel: CancellationToken,
    ) -> Self {
        let destinations = Destinations::for_conversation(conversation_id);
        Self {
            conversation_id,
            live: LiveDelivery::new(channel.transport().clone(), destinations.clone()),
            fallback: FallbackDelivery::new(history),
            destinations,
            channel,
            lease: None,
            state: LinkState::Idle,
            backoff: config.backoff(),
            max_attempts: config.max_reconnect_attempts,
            connect_timeout: config.connect_timeout,
            cancel,
            supervisor: None,
        }
    }

    pub fn conversation_id(&self) -> Uuid {
        self.conversation_id
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Start connecting. Events are delivered to `events` until
    /// [`ConversationLink::close`] returns.
    pub async fn open<E>(&mut self, events: mpsc::UnboundedSender<E>)
    where
        E: From<LinkEvent> + Send + 'static,
    {
        if self.state != LinkState::Idle {
            warn!("Link for {} already opened", self.conversation_id);
            return;
        }

        let lease = self.channel.acquire().await;
        let supervisor = Supervisor {
            conversation_id: self.conversation_id,
            transport: lease.transport().clone(),
            destinations: self.destinations.clone(),
            backoff: self.backoff.clone(),
            max_attempts: self.max_attempts,
            connect_timeout: self.connect_timeout,
            cancel: self.cancel.clone(),
        };
        self.lease = Some(lease);
        self.state = LinkState::Connecting;
        self.supervisor = Some(tokio::spawn(supervisor.run(events)));
        info!("Opening live link for conversation {}", self.conversation_id);
    }

    /// Fold a supervisor event into the link state.
    pub fn apply(&mut self, event: &LinkEvent) {
        if self.state == LinkState::Closed {
            return;
        }
        let next = match event {
            LinkEvent::Connecting { .. } => LinkState::Connecting,
            LinkEvent::Connected => LinkState::Connected,
            LinkEvent::ConnectionLost { .. } => LinkState::Disconnected,
            LinkEvent::MessageCreated(_) | LinkEvent::MessageUpdated(_) => return,
        };
        if next != self.state {
            debug!("Link {} {:?} -> {:?}", self.conversation_id, self.state, next);
            self.state = next;
        }
    }

    /// The policy matching the current state.
    pub fn delivery(&self) -> &dyn DeliveryPolicy {
        match self.state {
            LinkState::Connected => &self.live,
            _ => &self.fallback,
        }
    }

    /// Send over the current path. A failed live publish is retried once
    /// over HTTP; otherwise exactly one path is used.
    pub async fn send(&self, draft: &MessageDraft) -> Result<Delivered, DeliveryError> {
        let policy = self.delivery();
        match policy.send(draft).await {
            Err(DeliveryError::Transport(e)) if policy.path() == DeliveryPath::Live => {
                warn!("Live send failed ({}), falling back to HTTP", e);
                self.fallback.send(draft).await
            }
            other => other,
        }
    }

    pub async fn mark_read(&self, message: &Message, reader_id: Uuid) -> Result<Acknowledged, DeliveryError> {
        let policy = self.delivery();
        match policy.mark_read(message, reader_id).await {
            Err(DeliveryError::Transport(e)) if policy.path() == DeliveryPath::Live => {
                warn!("Live read ack failed ({}), falling back to HTTP", e);
                self.fallback.mark_read(message, reader_id).await
            }
            other => other,
        }
    }

    /// Stop retrying, drop both subscriptions and release the shared channel.
    /// No event is emitted after this returns.
    pub async fn close(&mut self) {
        if self.state == LinkState::Closed {
            return;
        }
        self.cancel.cancel();
        if let Some(supervisor) = self.supervisor.take() {
            if let Err(e) = supervisor.await {
                warn!("Link supervisor for {} ended abnormally: {}", self.conversation_id, e);
            }
        }
        if let Some(lease) = self.lease.take() {
            lease.release().await;
        }
        self.state = LinkState::Closed;
        info!("Closed live link for conversation {}", self.conversation_id);
    }
}

/// Background connect/subscribe/retry loop for one link.
struct Supervisor {
    conversation_id: Uuid,
    transport: Arc<dyn Transport>,
    destinations: Destinations,
    backoff: Backoff,
    max_attempts: u32,
    connect_timeout: Duration,
    cancel: CancellationToken,
}

enum PumpEnd {
    Lost,
    Cancelled,
}

impl Supervisor {
    async fn run<E>(self, events: mpsc::UnboundedSender<E>)
    where
        E: From<LinkEvent> + Send + 'static,
    {
        let emit = |event: LinkEvent| events.send(E::from(event)).is_ok();
        let mut failures: u32 = 0;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if !emit(LinkEvent::Connecting { attempt }) {
                return;
            }

            let mut partial = None;
            let established = tokio::select! {
                _ = self.cancel.cancelled() => None,
                result = tokio::time::timeout(self.connect_timeout, self.establish(&mut partial)) => Some(result),
            };
            // A failed or cut-short attempt can leave the first subscription
            // registered.
            if let Some(orphan) = partial.take() {
                self.transport.unsubscribe(orphan.id()).await;
            }
            let Some(established) = established else {
                return;
            };

            match established {
                Ok(Ok((mut created, mut updated))) => {
                    failures = 0;
                    info!("Conversation {} live (attempt {})", self.conversation_id, attempt);
                    if !emit(LinkEvent::Connected) {
                        self.unsubscribe(&created, &updated).await;
                        return;
                    }

                    let end = self.pump(&mut created, &mut updated, &emit).await;
                    self.unsubscribe(&created, &updated).await;
                    if let PumpEnd::Cancelled = end {
                        return;
                    }
                    warn!("Conversation {} lost its live channel", self.conversation_id);
                }
                Ok(Err(e)) => {
                    warn!("Conversation {} connect attempt {} failed: {}", self.conversation_id, attempt, e);
                }
                Err(_) => {
                    warn!(
                        "Conversation {} connect attempt {} timed out after {:?}",
                        self.conversation_id, attempt, self.connect_timeout
                    );
                }
            }

            failures += 1;
            if self.max_attempts != 0 && failures >= self.max_attempts {
                warn!(
                    "Conversation {} giving up on live channel after {} failures, using HTTP only",
                    self.conversation_id, failures
                );
                emit(LinkEvent::ConnectionLost {
                    failures,
                    retry_in: None,
                });
                return;
            }

            let delay = self.backoff.delay(failures - 1);
            if !emit(LinkEvent::ConnectionLost {
                failures,
                retry_in: Some(delay),
            }) {
                return;
            }
            debug!("Conversation {} retrying in {:?}", self.conversation_id, delay);

            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Connect and subscribe to both topics. The first subscription is parked
    /// in `partial` until the second one succeeds, so the caller can release
    /// it when this future errors or is dropped midway.
    async fn establish(
        &self,
        partial: &mut Option<Subscription>,
    ) -> Result<(Subscription, Subscription), TransportError> {
        self.transport.connect().await?;
        *partial = Some(
            self.transport
                .subscribe(self.destinations.topic(TopicKind::NewMessage))
                .await?,
        );
        let updated = self
            .transport
            .subscribe(self.destinations.topic(TopicKind::MessageUpdate))
            .await?;
        let created = partial.take().ok_or(TransportError::NotConnected)?;
        Ok((created, updated))
    }

    /// Forward frames until either subscription ends or the link is cancelled.
    async fn pump(
        &self,
        created: &mut Subscription,
        updated: &mut Subscription,
        emit: &impl Fn(LinkEvent) -> bool,
    ) -> PumpEnd {
        loop {
            let (kind, frame) = tokio::select! {
                _ = self.cancel.cancelled() => return PumpEnd::Cancelled,
                frame = created.next() => (TopicKind::NewMessage, frame),
                frame = updated.next() => (TopicKind::MessageUpdate, frame),
            };

            let Some(frame) = frame else {
                debug!("Conversation {} {} stream ended", self.conversation_id, kind);
                return PumpEnd::Lost;
            };

            let message = match serde_json::from_value::<Message>(frame.payload) {
                Ok(message) => message,
                Err(e) => {
                    warn!("Conversation {} bad {} payload: {}", self.conversation_id, kind, e);
                    continue;
                }
            };

            let event = match kind {
                TopicKind::NewMessage => LinkEvent::MessageCreated(message),
                TopicKind::MessageUpdate => LinkEvent::MessageUpdated(message),
            };
            if !emit(event) {
                return PumpEnd::Cancelled;
            }
        }
    }

    async fn unsubscribe(&self, created: &Subscription, updated: &Subscription) {
        self.transport.unsubscribe(created.id()).await;
        self.transport.unsubscribe(updated.id()).await;
    }
}
