use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;

use crate::channel::{Frame, SubscriptionId};

/// Per-subscription delivery queues: subscription_id -> sender.
///
/// Dropping a sender (via [`Routes::remove`] or [`Routes::clear`]) ends the
/// matching [`Subscription`](crate::Subscription) stream.
#[derive(Default)]
pub struct Routes {
    senders: RwLock<HashMap<SubscriptionId, mpsc::UnboundedSender<Frame>>>,
}

impl Routes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: SubscriptionId) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders
            .write()
            .expect("route lock poisoned")
            .insert(id, tx);
        rx
    }

    pub fn remove(&self, id: SubscriptionId) -> bool {
        self.senders
            .write()
            .expect("route lock poisoned")
            .remove(&id)
            .is_some()
    }

    /// Returns false when no live subscription with this id exists.
    pub fn deliver(&self, id: SubscriptionId, frame: Frame) -> bool {
        let senders = self.senders.read().expect("route lock poisoned");
        match senders.get(&id) {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    pub fn clear(&self) {
        self.senders.write().expect("route lock poisoned").clear();
    }

    pub fn len(&self) -> usize {
        self.senders.read().expect("route lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn frame(n: i64) -> Frame {
        Frame {
            destination: "/topic/t".into(),
            payload: serde_json::json!(n),
        }
    }

    #[tokio::test]
    async fn delivers_in_order_to_registered_id() {
        let routes = Routes::new();
        let id = Uuid::new_v4();
        let mut rx = routes.register(id);

        assert!(routes.deliver(id, frame(1)));
        assert!(routes.deliver(id, frame(2)));
        assert!(!routes.deliver(Uuid::new_v4(), frame(3)));

        assert_eq!(rx.recv().await.unwrap().payload, 1);
        assert_eq!(rx.recv().await.unwrap().payload, 2);
    }

    #[tokio::test]
    async fn clear_ends_streams() {
        let routes = Routes::new();
        let mut rx = routes.register(Uuid::new_v4());
        routes.clear();
        assert!(routes.is_empty());
        assert!(rx.recv().await.is_none());
    }
}
