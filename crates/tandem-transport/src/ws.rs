use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use tandem_types::events::{ClientFrame, ServerFrame};

use crate::channel::{ChannelStatus, Frame, Subscription, SubscriptionId, Transport};
use crate::error::TransportError;
use crate::routes::Routes;

/// Heartbeat interval: the client sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`Transport`] over a single WebSocket speaking JSON [`ClientFrame`] /
/// [`ServerFrame`] messages.
#[derive(Clone)]
pub struct WsTransport {
    inner: Arc<WsInner>,
}

struct WsInner {
    url: String,
    heartbeat_interval: Duration,
    connection: Mutex<Option<Connection>>,
    /// Bumped on every connect and disconnect so a dying connection task
    /// can tell whether it still owns the shared state.
    generation: AtomicU64,
    routes: Routes,
    status_tx: watch::Sender<ChannelStatus>,
}

struct Connection {
    generation: u64,
    outbound: mpsc::UnboundedSender<WsMessage>,
}

impl Connection {
    fn is_live(&self, inner: &WsInner) -> bool {
        self.generation == inner.generation.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_heartbeat(url, HEARTBEAT_INTERVAL)
    }

    pub fn with_heartbeat(url: impl Into<String>, heartbeat_interval: Duration) -> Self {
        let (status_tx, _) = watch::channel(ChannelStatus::Disconnected);
        Self {
            inner: Arc::new(WsInner {
                url: url.into(),
                heartbeat_interval,
                connection: Mutex::new(None),
                generation: AtomicU64::new(0),
                routes: Routes::new(),
                status_tx,
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    async fn outbound(&self) -> Option<mpsc::UnboundedSender<WsMessage>> {
        let guard = self.inner.connection.lock().await;
        guard
            .as_ref()
            .filter(|conn| conn.is_live(&self.inner))
            .map(|conn| conn.outbound.clone())
    }
}

fn encode(frame: &ClientFrame) -> Result<WsMessage, TransportError> {
    let text = serde_json::to_string(frame)?;
    Ok(WsMessage::Text(text.into()))
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let mut guard = self.inner.connection.lock().await;
        if guard.as_ref().is_some_and(|conn| conn.is_live(&self.inner)) {
            return Ok(());
        }
        *guard = None;

        self.inner.status_tx.send_replace(ChannelStatus::Connecting);
        debug!("Connecting to {}", self.inner.url);

        let (socket, _) = match tokio_tungstenite::connect_async(self.inner.url.as_str()).await {
            Ok(ok) => ok,
            Err(e) => {
                self.inner.status_tx.send_replace(ChannelStatus::Disconnected);
                return Err(TransportError::Connection(e.to_string()));
            }
        };

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (sink, stream) = socket.split();

        tokio::spawn(run_connection(
            self.inner.clone(),
            generation,
            sink,
            stream,
            outbound_rx,
        ));

        *guard = Some(Connection {
            generation,
            outbound: outbound_tx,
        });
        self.inner.status_tx.send_replace(ChannelStatus::Connected);
        info!("Live channel connected to {}", self.inner.url);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<Subscription, TransportError> {
        // Held until the route is registered, so a connection task tearing
        // down cannot clear routes between the liveness check and the insert.
        let guard = self.inner.connection.lock().await;
        let outbound = match guard.as_ref() {
            Some(conn) if conn.is_live(&self.inner) => &conn.outbound,
            _ => return Err(TransportError::NotConnected),
        };

        let id = Uuid::new_v4();
        let frame = encode(&ClientFrame::Subscribe {
            id,
            destination: topic.to_string(),
        })?;
        let frames = self.inner.routes.register(id);

        if outbound.send(frame).is_err() {
            self.inner.routes.remove(id);
            return Err(TransportError::NotConnected);
        }

        debug!("Subscribed {} to {}", id, topic);
        Ok(Subscription::new(id, topic, frames))
    }

    async fn unsubscribe(&self, id: SubscriptionId) {
        if !self.inner.routes.remove(id) {
            return;
        }
        if let Some(outbound) = self.outbound().await {
            if let Ok(frame) = encode(&ClientFrame::Unsubscribe { id }) {
                let _ = outbound.send(frame);
            }
        }
        debug!("Unsubscribed {}", id);
    }

    async fn publish(&self, destination: &str, payload: serde_json::Value) -> Result<(), TransportError> {
        let publish_error = |reason: &str| TransportError::Publish {
            destination: destination.to_string(),
            reason: reason.to_string(),
        };

        let outbound = self
            .outbound()
            .await
            .ok_or_else(|| publish_error("not connected"))?;

        let frame = encode(&ClientFrame::Send {
            destination: destination.to_string(),
            payload,
        })?;

        outbound
            .send(frame)
            .map_err(|_| publish_error("connection closed"))?;
        trace!("Published to {}", destination);
        Ok(())
    }

    async fn disconnect(&self) {
        let mut guard = self.inner.connection.lock().await;
        // Invalidate the running connection task before tearing down, so its
        // exit path leaves routes and status alone.
        self.inner.generation.fetch_add(1, Ordering::SeqCst);

        if let Some(conn) = guard.take() {
            let _ = conn.outbound.send(WsMessage::Close(None));
            info!("Live channel disconnected from {}", self.inner.url);
        }
        self.inner.routes.clear();
        self.inner.status_tx.send_replace(ChannelStatus::Disconnected);
    }

    fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.status_tx.subscribe()
    }
}

/// Runs the read and write halves of one connection; whichever finishes
/// first takes the other down with it.
async fn run_connection(
    inner: Arc<WsInner>,
    generation: u64,
    sink: SplitSink<WsStream, WsMessage>,
    stream: SplitStream<WsStream>,
    outbound_rx: mpsc::UnboundedReceiver<WsMessage>,
) {
    let pong_received = Arc::new(AtomicBool::new(true));

    let mut write_task = tokio::spawn(run_writer(
        sink,
        outbound_rx,
        pong_received.clone(),
        inner.heartbeat_interval,
    ));
    let mut read_task = tokio::spawn(run_reader(stream, inner.clone(), pong_received));

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    // connect and disconnect bump the generation under this lock, so the
    // check below cannot race a newer connection being installed.
    let mut guard = inner.connection.lock().await;
    if inner.generation.load(Ordering::SeqCst) == generation {
        warn!("Live channel to {} lost", inner.url);
        guard.take();
        inner.routes.clear();
        inner.status_tx.send_replace(ChannelStatus::Disconnected);
    }
}

async fn run_writer(
    mut sink: SplitSink<WsStream, WsMessage>,
    mut outbound_rx: mpsc::UnboundedReceiver<WsMessage>,
    pong_received: Arc<AtomicBool>,
    heartbeat_interval: Duration,
) {
    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.tick().await;
    let mut missed_heartbeats: u8 = 0;

    loop {
        tokio::select! {
            msg = outbound_rx.recv() => {
                let Some(msg) = msg else { break };
                let closing = matches!(msg, WsMessage::Close(_));
                if sink.send(msg).await.is_err() || closing {
                    break;
                }
            }
            _ = heartbeat.tick() => {
                if pong_received.swap(false, Ordering::Acquire) {
                    missed_heartbeats = 0;
                } else {
                    missed_heartbeats += 1;
                    if missed_heartbeats >= 2 {
                        warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                        break;
                    }
                }
                if sink.send(WsMessage::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn run_reader(
    mut stream: SplitStream<WsStream>,
    inner: Arc<WsInner>,
    pong_received: Arc<AtomicBool>,
) {
    while let Some(msg) = stream.next().await {
        match msg {
            Ok(WsMessage::Text(text)) => match serde_json::from_str::<ServerFrame>(text.as_str()) {
                Ok(ServerFrame::Message {
                    subscription,
                    destination,
                    payload,
                }) => {
                    if !inner.routes.deliver(subscription, Frame { destination, payload }) {
                        trace!("Dropping frame for inactive subscription {}", subscription);
                    }
                }
                Ok(ServerFrame::Error { message }) => {
                    warn!("Server rejected frame: {}", message);
                }
                Err(e) => {
                    let raw: String = text.as_str().chars().take(200).collect();
                    warn!("Bad frame: {} -- raw: {}", e, raw);
                }
            },
            Ok(WsMessage::Pong(_)) => {
                pong_received.store(true, Ordering::Release);
            }
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket read error: {}", e);
                break;
            }
        }
    }
}
