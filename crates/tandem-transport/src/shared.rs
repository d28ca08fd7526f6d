use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::channel::Transport;

/// One physical channel shared by every open conversation.
///
/// Each conversation holds a [`ChannelLease`]; the connection is torn down
/// only when the last lease is released.
#[derive(Clone)]
pub struct SharedChannel {
    transport: Arc<dyn Transport>,
    holders: Arc<Mutex<usize>>,
}

impl SharedChannel {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            holders: Arc::new(Mutex::new(0)),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub async fn acquire(&self) -> ChannelLease {
        let mut holders = self.holders.lock().await;
        *holders += 1;
        debug!("Channel lease acquired ({} holders)", *holders);
        ChannelLease {
            channel: self.clone(),
            released: false,
        }
    }

    pub async fn holders(&self) -> usize {
        *self.holders.lock().await
    }

    async fn release_one(&self) {
        let mut holders = self.holders.lock().await;
        *holders = holders.saturating_sub(1);
        debug!("Channel lease released ({} holders)", *holders);
        if *holders == 0 {
            info!("Last channel holder released, disconnecting");
            // Disconnect under the lock so a concurrent acquire cannot
            // observe a connection that is about to go away.
            self.transport.disconnect().await;
        }
    }
}

/// A counted claim on a [`SharedChannel`].
pub struct ChannelLease {
    channel: SharedChannel,
    released: bool,
}

impl ChannelLease {
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.channel.transport
    }

    pub async fn release(mut self) {
        self.released = true;
        self.channel.release_one().await;
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let channel = self.channel.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move { channel.release_one().await });
        }
    }
}
