use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use tandem_api::{ConversationService, MessageHistoryService};
use tandem_transport::SharedChannel;
use tandem_types::models::{Conversation, CurrentUser, Message, MessageDraft};

use crate::config::SyncConfig;
use crate::delivery::Delivered;
use crate::error::SyncError;
use crate::link::{ConversationLink, LinkEvent};
use crate::receipts::ReadReceiptTracker;
use crate::store::{AppendOutcome, MessageStore, UpdateOutcome};

/// External collaborators a session needs.
#[derive(Clone)]
pub struct SessionDeps {
    pub conversations: Arc<dyn ConversationService>,
    pub history: Arc<dyn MessageHistoryService>,
    pub channel: SharedChannel,
    pub config: SyncConfig,
}

/// What the UI shows as the connection indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnected => f.write_str("disconnected"),
        }
    }
}

/// Outcome of [`ChatSession::send`].
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    /// Published live; the message shows up in the store once echoed back.
    Published,
    /// Created over HTTP and already in the store.
    Stored(Message),
}

/// Everything the session actor reacts to, in arrival order.
enum SessionEvent {
    Link(LinkEvent),
    Send {
        text: String,
        reply: oneshot::Sender<Result<Sent, SyncError>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

impl From<LinkEvent> for SessionEvent {
    fn from(event: LinkEvent) -> Self {
        SessionEvent::Link(event)
    }
}

/// One open conversation.
///
/// All state lives in a background actor; this handle only enqueues
/// commands and exposes `watch` views of what the actor publishes.
pub struct ChatSession {
    conversation: Conversation,
    user: CurrentUser,
    other_participant: Uuid,
    events: mpsc::UnboundedSender<SessionEvent>,
    messages: watch::Receiver<Arc<Vec<Message>>>,
    status: watch::Receiver<ConnectionStatus>,
    unread: watch::Receiver<usize>,
    cancel: CancellationToken,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl ChatSession {
    /// Resolve the conversation, load its history, acknowledge what is
    /// unread, then go live. Waits up to `connect_timeout` for the live
    /// channel; past that the session runs over HTTP while the link keeps
    /// retrying.
    pub async fn open(deps: SessionDeps, conversation_id: Uuid, user: CurrentUser) -> Result<Self, SyncError> {
        let conversation = deps
            .conversations
            .get_conversation(conversation_id)
            .await
            .map_err(SyncError::ConversationLookup)?
            .ok_or(SyncError::ConversationNotFound(conversation_id))?;

        let Some(other_participant) = conversation.other_participant(user.id) else {
            warn!("User {} is not part of conversation {}", user.id, conversation_id);
            return Err(SyncError::ConversationNotFound(conversation_id));
        };

        let history = deps
            .history
            .list_messages(conversation_id)
            .await
            .map_err(SyncError::HistoryLoad)?;
        info!("Loaded {} messages for conversation {}", history.len(), conversation_id);

        let mut store = MessageStore::new();
        store.initialize(history);

        let cancel = CancellationToken::new();
        // Tears down the link and actor if this future is dropped before a
        // session handle exists to own them.
        let abandon = cancel.clone().drop_guard();
        let mut link = ConversationLink::new(
            conversation_id,
            deps.channel.clone(),
            deps.history.clone(),
            &deps.config,
            cancel.child_token(),
        );

        let mut tracker = ReadReceiptTracker::new(user.id);
        let acked = tracker.reconcile(&mut store, &link).await;
        if acked > 0 {
            info!("Acknowledged {} unread messages on open", acked);
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        link.open(events_tx.clone()).await;

        let (messages_tx, messages) = watch::channel(Arc::new(store.snapshot()));
        let (status_tx, status) = watch::channel(ConnectionStatus::Connecting);
        let (unread_tx, unread) = watch::channel(tracker.unread_count(&store));

        let actor = SessionActor {
            conversation_id,
            user_id: user.id,
            other_participant,
            store,
            tracker,
            link,
            history: deps.history.clone(),
            cancel: cancel.clone(),
            messages_tx,
            status_tx,
            unread_tx,
            connected_before: false,
        };
        let handle = tokio::spawn(actor.run(events_rx));

        let mut first_status = status.clone();
        let settled = tokio::time::timeout(
            deps.config.connect_timeout,
            first_status.wait_for(|s| *s != ConnectionStatus::Connecting),
        )
        .await
        .is_ok();
        if !settled {
            warn!(
                "Conversation {} not live after {:?}, continuing over HTTP",
                conversation_id, deps.config.connect_timeout
            );
        }

        abandon.disarm();
        Ok(Self {
            conversation,
            user,
            other_participant,
            events: events_tx,
            messages,
            status,
            unread,
            cancel,
            actor: Mutex::new(Some(handle)),
        })
    }

    /// Send a text message over whichever path is currently usable.
    pub async fn send(&self, text: &str) -> Result<Sent, SyncError> {
        if text.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        if self.cancel.is_cancelled() {
            return Err(SyncError::Closed);
        }

        let (reply, response) = oneshot::channel();
        self.events
            .send(SessionEvent::Send {
                text: text.to_string(),
                reply,
            })
            .map_err(|_| SyncError::Closed)?;
        response.await.map_err(|_| SyncError::Closed)?
    }

    /// Tear down the live link and freeze the store. Nothing observable
    /// changes after this returns. Safe to call more than once.
    pub async fn close(&self) {
        self.cancel.cancel();
        let Some(actor) = self.actor.lock().await.take() else {
            return;
        };

        let (reply, done) = oneshot::channel();
        if self.events.send(SessionEvent::Close { reply }).is_ok() {
            let _ = done.await;
        }
        if let Err(e) = actor.await {
            warn!("Session actor for {} ended abnormally: {}", self.conversation.id, e);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Current ordered messages.
    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.borrow().as_ref().clone()
    }

    /// Ordered snapshot, republished after every change.
    pub fn messages(&self) -> watch::Receiver<Arc<Vec<Message>>> {
        self.messages.clone()
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.clone()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Inbound messages not yet marked read.
    pub fn unread_count(&self) -> usize {
        *self.unread.borrow()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn other_participant(&self) -> Uuid {
        self.other_participant
    }

    pub fn current_user(&self) -> &CurrentUser {
        &self.user
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        // The actor notices once every sender is gone and releases the link.
        self.cancel.cancel();
    }
}

struct SessionActor {
    conversation_id: Uuid,
    user_id: Uuid,
    other_participant: Uuid,
    store: MessageStore,
    tracker: ReadReceiptTracker,
    link: ConversationLink,
    history: Arc<dyn MessageHistoryService>,
    cancel: CancellationToken,
    messages_tx: watch::Sender<Arc<Vec<Message>>>,
    status_tx: watch::Sender<ConnectionStatus>,
    unread_tx: watch::Sender<usize>,
    /// Set after the first successful connect; later connects resync.
    connected_before: bool,
}

impl SessionActor {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<SessionEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Link(event) => {
                    if !self.cancel.is_cancelled() {
                        self.on_link_event(event).await;
                    }
                }
                SessionEvent::Send { text, reply } => {
                    let result = if self.cancel.is_cancelled() {
                        Err(SyncError::Closed)
                    } else {
                        self.send(text).await
                    };
                    let _ = reply.send(result);
                }
                SessionEvent::Close { reply } => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    return;
                }
            }
        }
        self.shutdown().await;
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        self.link.apply(&event);

        match event {
            LinkEvent::Connecting { attempt } => {
                debug!("Conversation {} connecting (attempt {})", self.conversation_id, attempt);
                self.set_status(ConnectionStatus::Connecting);
            }
            LinkEvent::Connected => {
                self.set_status(ConnectionStatus::Connected);
                if self.connected_before {
                    self.resync().await;
                }
                self.connected_before = true;
                self.reconcile().await;
            }
            LinkEvent::ConnectionLost { failures, retry_in } => {
                match retry_in {
                    Some(delay) => debug!(
                        "Conversation {} offline after {} failures, retry in {:?}",
                        self.conversation_id, failures, delay
                    ),
                    None => warn!(
                        "Conversation {} stays offline after {} failures",
                        self.conversation_id, failures
                    ),
                }
                self.set_status(ConnectionStatus::Disconnected);
                // Live acks without an echo may be lost; redo them over HTTP.
                self.tracker.reset_in_flight();
                self.reconcile().await;
            }
            LinkEvent::MessageCreated(message) => {
                let outcome = self.store.append(message.clone());
                if outcome == AppendOutcome::Inserted {
                    debug!("New message {} in {}", message.id, self.conversation_id);
                    self.acknowledge(&message).await;
                }
                self.publish();
            }
            LinkEvent::MessageUpdated(message) => {
                let outcome = self.store.apply_update(message.clone());
                self.tracker.observe(&message);
                if outcome == UpdateOutcome::Applied {
                    self.publish();
                }
            }
        }
    }

    async fn send(&mut self, text: String) -> Result<Sent, SyncError> {
        let content = text.trim();
        if content.is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let draft = MessageDraft {
            conversation_id: self.conversation_id,
            sender_id: self.user_id,
            receiver_id: self.other_participant,
            content: content.to_string(),
        };

        let delivered = tokio::select! {
            _ = self.cancel.cancelled() => return Err(SyncError::Closed),
            delivered = self.link.send(&draft) => delivered?,
        };

        match delivered {
            Delivered::Published => Ok(Sent::Published),
            Delivered::Created(message) => {
                self.store.append(message.clone());
                self.publish();
                Ok(Sent::Stored(message))
            }
        }
    }

    async fn acknowledge(&mut self, message: &Message) {
        let updated = tokio::select! {
            _ = self.cancel.cancelled() => return,
            updated = self.tracker.acknowledge(message, &self.link) => updated,
        };
        if let Some(updated) = updated {
            self.store.apply_update(updated);
        }
    }

    async fn reconcile(&mut self) {
        let acked = tokio::select! {
            _ = self.cancel.cancelled() => return,
            acked = self.tracker.reconcile(&mut self.store, &self.link) => acked,
        };
        if acked > 0 {
            debug!("Re-acknowledged {} messages in {}", acked, self.conversation_id);
            self.publish();
        }
    }

    /// Merge anything published while the live channel was down.
    async fn resync(&mut self) {
        let history = tokio::select! {
            _ = self.cancel.cancelled() => return,
            history = self.history.list_messages(self.conversation_id) => history,
        };
        let history = match history {
            Ok(history) => history,
            Err(e) => {
                warn!("Resync of {} failed: {}", self.conversation_id, e);
                return;
            }
        };

        let mut added = 0;
        for message in history {
            if self.store.contains(message.id) {
                if message.read {
                    self.store.apply_update(message);
                }
            } else if self.store.append(message) == AppendOutcome::Inserted {
                added += 1;
            }
        }
        if added > 0 {
            info!("Resync picked up {} missed messages in {}", added, self.conversation_id);
        }
        self.publish();
    }

    fn set_status(&self, next: ConnectionStatus) {
        if self.cancel.is_cancelled() {
            return;
        }
        let changed = self.status_tx.send_if_modified(|status| {
            if *status == next {
                return false;
            }
            *status = next;
            true
        });
        if changed {
            info!("Conversation {} is {}", self.conversation_id, next);
        }
    }

    fn publish(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.messages_tx.send_replace(Arc::new(self.store.snapshot()));
        self.unread_tx.send_replace(self.tracker.unread_count(&self.store));
    }

    async fn shutdown(&mut self) {
        self.link.close().await;
        self.store.freeze();
        info!("Session for conversation {} closed", self.conversation_id);
    }
}
