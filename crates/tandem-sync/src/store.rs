use std::collections::HashSet;

use tracing::{debug, trace, warn};
use uuid::Uuid;

use tandem_types::models::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// The id is already stored; the store is unchanged.
    DuplicateIgnored,
    /// Held until `initialize` runs.
    Buffered,
    /// The store is frozen.
    Inert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The stored record was already read.
    Unchanged,
    /// No stored record has this id; the update was dropped.
    Unknown,
    Buffered,
    Inert,
}

#[derive(Debug)]
struct Entry {
    message: Message,
    /// Arrival order, breaks timestamp ties.
    seq: u64,
}

#[derive(Debug)]
enum Pending {
    Append(Message),
    Update(Message),
}

/// Ordered, deduplicated messages of one conversation.
///
/// Ordering is `created_at` ascending, ties broken by arrival. Records are
/// never removed; the only mutation after insert is the read flag going
/// from false to true.
#[derive(Debug, Default)]
pub struct MessageStore {
    entries: Vec<Entry>,
    ids: HashSet<Uuid>,
    next_seq: u64,
    pending: Vec<Pending>,
    initialized: bool,
    frozen: bool,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the loaded history, then replay anything that arrived early.
    /// Only the first call has an effect.
    pub fn initialize(&mut self, history: Vec<Message>) {
        if self.frozen {
            return;
        }
        if self.initialized {
            warn!("Message store already initialized, ignoring {} messages", history.len());
            return;
        }

        self.entries.clear();
        self.ids.clear();
        for message in history {
            if self.ids.contains(&message.id) {
                debug!("History contains message {} twice, keeping the first", message.id);
                continue;
            }
            self.insert(message);
        }
        self.initialized = true;

        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            debug!("Replaying {} events buffered before history load", pending.len());
        }
        for event in pending {
            match event {
                Pending::Append(message) => {
                    self.append(message);
                }
                Pending::Update(message) => {
                    self.apply_update(message);
                }
            }
        }
    }

    pub fn append(&mut self, message: Message) -> AppendOutcome {
        if self.frozen {
            trace!("Store frozen, dropping message {}", message.id);
            return AppendOutcome::Inert;
        }
        if !self.initialized {
            self.pending.push(Pending::Append(message));
            return AppendOutcome::Buffered;
        }

        if let Some(existing) = self.get(message.id) {
            if existing.same_content(&message) {
                debug!("Duplicate message {} ignored", message.id);
            } else {
                warn!("Message {} redelivered with different content, keeping stored copy", message.id);
            }
            return AppendOutcome::DuplicateIgnored;
        }

        self.insert(message);
        AppendOutcome::Inserted
    }

    /// Apply a read-state update to an existing record.
    pub fn apply_update(&mut self, message: Message) -> UpdateOutcome {
        if self.frozen {
            trace!("Store frozen, dropping update for {}", message.id);
            return UpdateOutcome::Inert;
        }
        if !self.initialized {
            self.pending.push(Pending::Update(message));
            return UpdateOutcome::Buffered;
        }

        let Some(entry) = self.entries.iter_mut().find(|e| e.message.id == message.id) else {
            warn!("Update for unknown message {} dropped", message.id);
            return UpdateOutcome::Unknown;
        };

        if !entry.message.same_content(&message) {
            warn!("Update for {} changes more than the read flag, applying read flag only", message.id);
        }
        if entry.message.read || !message.read {
            return UpdateOutcome::Unchanged;
        }
        entry.message.read = true;
        UpdateOutcome::Applied
    }

    fn insert(&mut self, message: Message) {
        let seq = self.next_seq;
        self.next_seq += 1;
        // New arrivals carry the highest seq, so they go after every entry
        // with the same or an earlier timestamp.
        let pos = self
            .entries
            .partition_point(|e| e.message.created_at <= message.created_at);
        self.ids.insert(message.id);
        self.entries.insert(pos, Entry { message, seq });
    }

    pub fn get(&self, id: Uuid) -> Option<&Message> {
        if !self.ids.contains(&id) {
            return None;
        }
        self.entries
            .iter()
            .find(|e| e.message.id == id)
            .map(|e| &e.message)
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ids.contains(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|e| &e.message)
    }

    /// Read-only ordered copy for rendering.
    pub fn snapshot(&self) -> Vec<Message> {
        self.iter().cloned().collect()
    }

    /// Inbound messages for `user_id` that are still unread.
    pub fn unread_for(&self, user_id: Uuid) -> Vec<&Message> {
        self.iter().filter(|m| m.is_unread_for(user_id)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Stop accepting mutations. The snapshot stays readable.
    pub fn freeze(&mut self) {
        self.frozen = true;
        self.pending.clear();
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Tie-break order of the stored entries, exposed for ordering checks.
    #[cfg(test)]
    fn seqs(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.seq).collect()
    }
}
