//! ChatSession against the in-memory transport and scripted API.

use std::sync::Arc;
use std::time::Duration;

use tandem_sync::{ChatSession, ConnectionStatus, Sent, SessionDeps, SyncConfig, SyncError};
use tandem_test_utils::{MemoryTransport, MockApi, eventually, fixtures};
use tandem_transport::SharedChannel;
use tandem_types::events::Destinations;
use tandem_types::models::{Conversation, CurrentUser, Message};

fn config() -> SyncConfig {
    SyncConfig {
        connect_timeout: Duration::from_secs(2),
        reconnect_base_delay: Duration::from_millis(50),
        reconnect_max_delay: Duration::from_secs(1),
        reconnect_jitter: 0.0,
        max_reconnect_attempts: 10,
        heartbeat_interval: Duration::from_secs(15),
    }
}

struct Harness {
    api: Arc<MockApi>,
    transport: Arc<MemoryTransport>,
    channel: SharedChannel,
    me: CurrentUser,
    them: CurrentUser,
    conversation: Conversation,
}

impl Harness {
    fn new() -> Self {
        let api = Arc::new(MockApi::new());
        let transport = Arc::new(MemoryTransport::new());
        let channel = SharedChannel::new(transport.clone());
        let me = fixtures::user("ana");
        let them = fixtures::user("ben");
        let conversation = fixtures::conversation(me.id, them.id);
        api.add_conversation(conversation.clone());
        Self {
            api,
            transport,
            channel,
            me,
            them,
            conversation,
        }
    }

    fn deps(&self) -> SessionDeps {
        SessionDeps {
            conversations: self.api.clone(),
            history: self.api.clone(),
            channel: self.channel.clone(),
            config: config(),
        }
    }

    fn destinations(&self) -> Destinations {
        Destinations::for_conversation(self.conversation.id)
    }

    async fn open(&self) -> ChatSession {
        ChatSession::open(self.deps(), self.conversation.id, self.me.clone())
            .await
            .unwrap()
    }

    fn inbound(&self, content: &str, secs: i64) -> Message {
        fixtures::message(&self.conversation, self.them.id, self.me.id, content, secs)
    }

    fn outbound(&self, content: &str, secs: i64) -> Message {
        fixtures::message(&self.conversation, self.me.id, self.them.id, content, secs)
    }
}

fn ids(messages: &[Message]) -> Vec<uuid::Uuid> {
    messages.iter().map(|m| m.id).collect()
}

#[tokio::test]
async fn open_acknowledges_each_unread_inbound_message_once() {
    let h = Harness::new();
    let unread = h.inbound("are you there?", 10);
    let mine = h.outbound("yes", 20);
    let seen = fixtures::read(&h.inbound("old news", 0));
    for m in [&unread, &mine, &seen] {
        h.api.add_message(m.clone());
    }

    let session = h.open().await;

    assert_eq!(h.api.read_updates(), vec![unread.id]);
    assert_eq!(ids(&session.snapshot()), vec![seen.id, unread.id, mine.id]);
    assert!(session.snapshot()[1].read);
    assert_eq!(session.unread_count(), 0);
    assert_eq!(session.connection_status(), ConnectionStatus::Connected);
    assert_eq!(session.other_participant(), h.them.id);

    // Nothing left to acknowledge once the channel is up.
    assert!(h.transport.published_to(&h.destinations().read).is_empty());
    session.close().await;
}

#[tokio::test]
async fn disconnected_send_goes_over_http_and_is_stored_once() {
    let h = Harness::new();
    h.transport.refuse_connects(true);

    let session = h.open().await;
    assert_eq!(session.connection_status(), ConnectionStatus::Disconnected);

    let sent = session.send("  hello over http ").await.unwrap();
    let stored = match sent {
        Sent::Stored(stored) => stored,
        other => panic!("expected an HTTP-created message, got {:?}", other),
    };
    assert_eq!(stored.content, "hello over http");

    let created = h.api.created();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].receiver_id, h.them.id);
    assert_eq!(ids(&session.snapshot()), vec![stored.id]);
    assert!(h.transport.published().is_empty());
    session.close().await;
}

#[tokio::test]
async fn connected_send_publishes_and_waits_for_the_echo() {
    let h = Harness::new();
    let session = h.open().await;
    let d = h.destinations();

    assert_eq!(session.send("hi there").await.unwrap(), Sent::Published);
    let published = h.transport.published_to(&d.send);
    assert_eq!(published.len(), 1);
    assert_eq!(published[0]["content"], "hi there");
    assert!(h.api.created().is_empty());
    assert!(session.snapshot().is_empty());

    let echo = h.outbound("hi there", 5);
    assert_eq!(h.transport.emit(&d.new_messages, fixtures::payload(&echo)), 1);
    assert!(eventually(|| session.snapshot().len() == 1).await);

    // A redelivered echo changes nothing.
    h.transport.emit(&d.new_messages, fixtures::payload(&echo));
    let marker = h.outbound("after", 6);
    h.transport.emit(&d.new_messages, fixtures::payload(&marker));
    assert!(eventually(|| session.snapshot().len() == 2).await);
    assert_eq!(ids(&session.snapshot()), vec![echo.id, marker.id]);
    session.close().await;
}

#[tokio::test]
async fn inbound_live_message_is_acknowledged_live() {
    let h = Harness::new();
    let session = h.open().await;
    let d = h.destinations();

    let incoming = h.inbound("ping", 3);
    h.transport.emit(&d.new_messages, fixtures::payload(&incoming));

    assert!(eventually(|| h.transport.published_to(&d.read).len() == 1).await);
    let ack = &h.transport.published_to(&d.read)[0];
    assert_eq!(ack["message_id"], incoming.id.to_string());
    assert_eq!(ack["reader_id"], h.me.id.to_string());
    assert!(eventually(|| session.unread_count() == 1).await);

    h.transport
        .emit(&d.updates, fixtures::payload(&fixtures::read(&incoming)));
    assert!(eventually(|| session.unread_count() == 0).await);
    assert!(session.snapshot()[0].read);
    assert!(h.api.read_updates().is_empty());

    // The echo of the update does not trigger another ack.
    assert_eq!(h.transport.published_to(&d.read).len(), 1);
    session.close().await;
}

#[tokio::test]
async fn outbound_live_message_is_not_acknowledged() {
    let h = Harness::new();
    let session = h.open().await;
    let d = h.destinations();

    let mine = h.outbound("from me", 1);
    h.transport.emit(&d.new_messages, fixtures::payload(&mine));
    assert!(eventually(|| session.snapshot().len() == 1).await);
    assert!(h.transport.published_to(&d.read).is_empty());
    session.close().await;
}

#[tokio::test]
async fn update_for_unknown_message_is_dropped() {
    let h = Harness::new();
    let known = h.inbound("known", 1);
    h.api.add_message(fixtures::read(&known));
    let session = h.open().await;
    let d = h.destinations();

    let stranger = fixtures::read(&h.inbound("never seen", 2));
    h.transport.emit(&d.updates, fixtures::payload(&stranger));
    let marker = h.outbound("marker", 3);
    h.transport.emit(&d.new_messages, fixtures::payload(&marker));

    assert!(eventually(|| session.snapshot().len() == 2).await);
    assert_eq!(ids(&session.snapshot()), vec![known.id, marker.id]);
    session.close().await;
}

#[tokio::test]
async fn live_publish_failure_falls_back_to_http() {
    let h = Harness::new();
    let session = h.open().await;
    h.transport.fail_publish(true);

    let sent = session.send("still works").await.unwrap();
    assert!(matches!(sent, Sent::Stored(_)));
    assert_eq!(h.api.created().len(), 1);
    assert_eq!(session.snapshot().len(), 1);
    session.close().await;
}

#[tokio::test]
async fn two_sessions_share_one_connection() {
    let h = Harness::new();
    let second_conversation = fixtures::conversation(h.me.id, fixtures::user("cy").id);
    h.api.add_conversation(second_conversation.clone());

    let first = h.open().await;
    let second = ChatSession::open(h.deps(), second_conversation.id, h.me.clone())
        .await
        .unwrap();
    assert_eq!(h.channel.holders().await, 2);
    assert_eq!(h.transport.subscribed_topics().len(), 4);

    first.close().await;
    assert_eq!(h.transport.disconnect_count(), 0);
    assert!(h.transport.is_connected());
    let second_topics = Destinations::for_conversation(second_conversation.id);
    let mut expected = vec![second_topics.new_messages, second_topics.updates];
    expected.sort();
    assert_eq!(h.transport.subscribed_topics(), expected);

    second.close().await;
    assert_eq!(h.transport.disconnect_count(), 1);
    assert_eq!(h.channel.holders().await, 0);
}

#[tokio::test]
async fn missing_conversation_is_not_found() {
    let h = Harness::new();
    let missing = uuid::Uuid::new_v4();
    let err = ChatSession::open(h.deps(), missing, h.me.clone())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SyncError::ConversationNotFound(id) if id == missing));
    assert!(h.transport.connect_attempts().is_empty());
}

#[tokio::test]
async fn outsider_cannot_open_the_conversation() {
    let h = Harness::new();
    let outsider = fixtures::user("eve");
    let err = ChatSession::open(h.deps(), h.conversation.id, outsider)
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SyncError::ConversationNotFound(_)));
    assert_eq!(h.api.list_calls(), 0);
}

#[tokio::test]
async fn history_failure_aborts_open() {
    let h = Harness::new();
    h.api.fail_history(true);
    let err = ChatSession::open(h.deps(), h.conversation.id, h.me.clone())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SyncError::HistoryLoad(_)));
    assert_eq!(h.channel.holders().await, 0);
    assert!(h.transport.connect_attempts().is_empty());
}

#[tokio::test]
async fn blank_messages_are_rejected_without_network_calls() {
    let h = Harness::new();
    let session = h.open().await;

    assert!(matches!(session.send("").await, Err(SyncError::EmptyMessage)));
    assert!(matches!(session.send("   ").await, Err(SyncError::EmptyMessage)));
    assert!(h.transport.published().is_empty());
    assert!(h.api.created().is_empty());
    session.close().await;
}

#[tokio::test]
async fn nothing_changes_after_close() {
    let h = Harness::new();
    let session = h.open().await;
    let d = h.destinations();

    let first = h.inbound("before close", 1);
    h.transport.emit(&d.new_messages, fixtures::payload(&first));
    assert!(eventually(|| session.snapshot().len() == 1).await);

    session.close().await;
    session.close().await;
    assert!(session.is_closed());

    let late = h.inbound("after close", 2);
    assert_eq!(h.transport.emit(&d.new_messages, fixtures::payload(&late)), 0);
    assert!(matches!(session.send("too late").await, Err(SyncError::Closed)));
    assert_eq!(ids(&session.snapshot()), vec![first.id]);
    assert_eq!(h.channel.holders().await, 0);
}

#[tokio::test(start_paused = true)]
async fn open_gives_up_waiting_and_runs_over_http() {
    let h = Harness::new();
    h.transport.hang_connects(true);

    let session = h.open().await;
    assert_ne!(session.connection_status(), ConnectionStatus::Connected);

    assert!(matches!(session.send("offline").await.unwrap(), Sent::Stored(_)));
    assert_eq!(h.api.created().len(), 1);
    session.close().await;
}

#[tokio::test]
async fn reconnect_picks_up_messages_missed_while_offline() {
    let h = Harness::new();
    let session = h.open().await;
    let d = h.destinations();

    let missed = h.inbound("sent while you were away", 7);
    h.api.add_message(missed.clone());
    h.transport.drop_connection();

    assert!(
        eventually(|| session.connection_status() == ConnectionStatus::Connected
            && session.snapshot().iter().any(|m| m.id == missed.id))
        .await
    );
    assert_eq!(h.api.list_calls(), 2);

    // Acknowledged live now that the channel is back.
    assert!(eventually(|| h.transport.published_to(&d.read).len() == 1).await);
    assert!(h.api.read_updates().is_empty());
    session.close().await;
}

#[tokio::test]
async fn failed_acknowledgements_stay_pending_until_a_later_pass() {
    let h = Harness::new();
    h.transport.refuse_connects(true);
    h.api.fail_writes(true);
    let first = h.inbound("one", 1);
    let second = h.inbound("two", 2);
    h.api.add_message(first.clone());
    h.api.add_message(second.clone());

    let session = h.open().await;
    assert_eq!(session.unread_count(), 2);
    assert!(h.api.read_updates().is_empty());
    assert_eq!(ids(&session.snapshot()), vec![first.id, second.id]);
    assert!(session.snapshot().iter().all(|m| !m.read));

    // Every failed reconnect runs another pass over HTTP.
    h.api.fail_writes(false);
    assert!(eventually(|| session.unread_count() == 0).await);
    let mut acked = h.api.read_updates();
    acked.sort();
    let mut expected = vec![first.id, second.id];
    expected.sort();
    assert_eq!(acked, expected);
    assert!(h.api.stored(h.conversation.id).iter().all(|m| m.read));
    assert!(session.snapshot().iter().all(|m| m.read));
    session.close().await;
}

#[tokio::test]
async fn lookup_failure_is_not_reported_as_missing() {
    let h = Harness::new();
    h.api.fail_lookup(true);
    let err = ChatSession::open(h.deps(), h.conversation.id, h.me.clone())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, SyncError::ConversationLookup(_)));
    assert_eq!(h.api.list_calls(), 0);
    assert!(h.transport.connect_attempts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn abandoned_open_stops_retrying_and_releases_the_channel() {
    let h = Harness::new();
    h.transport.hang_connects(true);

    let opening = ChatSession::open(h.deps(), h.conversation.id, h.me.clone());
    assert!(tokio::time::timeout(Duration::from_millis(500), opening).await.is_err());

    for _ in 0..100 {
        if h.channel.holders().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.channel.holders().await, 0);

    let attempts = h.transport.connect_attempts().len();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(h.transport.connect_attempts().len(), attempts);
}
