use std::collections::HashSet;

use tracing::{debug, warn};
use uuid::Uuid;

use tandem_types::models::Message;

use crate::delivery::Acknowledged;
use crate::link::ConversationLink;
use crate::store::MessageStore;

/// Tracks which inbound messages the current user still has to acknowledge.
///
/// An ack is issued at most once per message while it is in flight. A failed
/// ack leaves the message unread and pending, so the next reconcile picks it
/// up again.
#[derive(Debug)]
pub struct ReadReceiptTracker {
    user_id: Uuid,
    in_flight: HashSet<Uuid>,
}

impl ReadReceiptTracker {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            in_flight: HashSet::new(),
        }
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    /// Inbound, unread and not already being acknowledged.
    pub fn needs_ack(&self, message: &Message) -> bool {
        message.is_unread_for(self.user_id) && !self.in_flight.contains(&message.id)
    }

    pub fn pending_acks<'a>(&self, store: &'a MessageStore) -> Vec<&'a Message> {
        store.iter().filter(|m| self.needs_ack(m)).collect()
    }

    pub fn unread_count(&self, store: &MessageStore) -> usize {
        store.unread_for(self.user_id).len()
    }

    /// Drop in-flight bookkeeping once the store shows the message as read.
    pub fn observe(&mut self, message: &Message) {
        if message.read && self.in_flight.remove(&message.id) {
            debug!("Read ack for {} confirmed", message.id);
        }
    }

    /// Acknowledge one message. Returns the updated record when the server
    /// answered synchronously (HTTP path); live acks are confirmed later by
    /// an update frame.
    pub async fn acknowledge(&mut self, message: &Message, link: &ConversationLink) -> Option<Message> {
        if !self.needs_ack(message) {
            return None;
        }
        self.in_flight.insert(message.id);

        match link.mark_read(message, self.user_id).await {
            Ok(Acknowledged::Published) => None,
            Ok(Acknowledged::Updated(updated)) => {
                self.in_flight.remove(&message.id);
                Some(updated)
            }
            Err(e) => {
                warn!("Read ack for {} failed, will retry: {}", message.id, e);
                self.in_flight.remove(&message.id);
                None
            }
        }
    }

    /// Acknowledge every pending inbound message, applying synchronous
    /// results to `store`. Returns how many acks were issued.
    pub async fn reconcile(&mut self, store: &mut MessageStore, link: &ConversationLink) -> usize {
        let pending: Vec<Message> = self.pending_acks(store).into_iter().cloned().collect();
        if pending.is_empty() {
            return 0;
        }
        debug!("Reconciling {} unread messages", pending.len());

        let mut issued = 0;
        for message in pending {
            issued += 1;
            if let Some(updated) = self.acknowledge(&message, link).await {
                store.apply_update(updated);
            }
        }
        issued
    }

    /// Forget acks that never got confirmed, e.g. after the live channel
    /// dropped before the update frame arrived.
    pub fn reset_in_flight(&mut self) {
        if !self.in_flight.is_empty() {
            debug!("Clearing {} unconfirmed read acks", self.in_flight.len());
            self.in_flight.clear();
        }
    }
}
