use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, WebSocketError};
use crate::websocket::pool::SubscriberPool;
use crate::websocket::protocol::RosbridgeOp;

const EVENT_CAPACITY: usize = 64;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Lifecycle events, mirroring the `connection`/`error`/`close` events of a
/// browser websocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosEvent {
    Connection,
    Error(String),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Closed,
}

/// The raw fields of a `service_response`.
#[derive(Debug, Clone)]
pub struct ServiceReply {
    pub values: Option<Value>,
    pub result: Option<bool>,
}

/// A connection to one rosbridge server. Clones share the same socket.
#[derive(Clone)]
pub struct Ros {
    inner: Arc<RosInner>,
}

struct RosInner {
    id: Uuid,
    url: String,
    outgoing: mpsc::UnboundedSender<Message>,
    outgoing_rx: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    events: broadcast::Sender<RosEvent>,
    state: RwLock<ConnectionState>,
    subscribers: SubscriberPool,
    pending_calls: RwLock<HashMap<String, oneshot::Sender<ServiceReply>>>,
    counter: AtomicU64,
    close_emitted: AtomicBool,
    io_task: Mutex<Option<JoinHandle<()>>>,
}

impl Ros {
    pub fn new(url: &str) -> Result<Self, AppError> {
        let parsed = url::Url::parse(url)
            .map_err(|e| WebSocketError::InvalidUrl(format!("{}: {}", url, e)))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(WebSocketError::InvalidUrl(format!("{}: expected ws or wss", url)).into());
        }

        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Ok(Self {
            inner: Arc::new(RosInner {
                id: Uuid::new_v4(),
                url: url.to_string(),
                outgoing,
                outgoing_rx: Mutex::new(Some(outgoing_rx)),
                events,
                state: RwLock::new(ConnectionState::Idle),
                subscribers: SubscriberPool::new(),
                pending_calls: RwLock::new(HashMap::new()),
                counter: AtomicU64::new(0),
                close_emitted: AtomicBool::new(false),
                io_task: Mutex::new(None),
            }),
        })
    }

    /// Subscribe before `connect` to observe every lifecycle event.
    pub fn events(&self) -> broadcast::Receiver<RosEvent> {
        self.inner.events.subscribe()
    }

    /// Starts the socket. A closed connection stays closed.
    pub async fn connect(&self) -> Result<(), AppError> {
        let rx = {
            let mut state = self.inner.state.write().await;
            if *state == ConnectionState::Closed {
                return Err(WebSocketError::Closed.into());
            }
            let rx = self
                .inner
                .outgoing_rx
                .lock()
                .await
                .take()
                .ok_or(WebSocketError::AlreadyStarted)?;
            *state = ConnectionState::Connecting;
            rx
        };
        info!("Connecting {} to {}", self.inner.id, self.inner.url);

        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.run(rx).await });
        *self.inner.io_task.lock().await = Some(handle);
        Ok(())
    }

    /// Queues `op`. Anything queued before the socket opens is flushed on open.
    pub async fn send(&self, op: &RosbridgeOp) -> Result<(), AppError> {
        if *self.inner.state.read().await == ConnectionState::Closed {
            return Err(WebSocketError::Closed.into());
        }

        let message = op.encode()?;
        debug!("Queueing {} on connection {}", op.name(), self.inner.id);
        self.inner
            .outgoing
            .send(message)
            .map_err(|e| WebSocketError::SendError(e.to_string()))?;
        Ok(())
    }

    pub fn next_id(&self, prefix: &str) -> String {
        let n = self.inner.counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}:{}", prefix, n)
    }

    pub async fn close(&self) {
        let previous = {
            let mut state = self.inner.state.write().await;
            std::mem::replace(&mut *state, ConnectionState::Closed)
        };
        // Nothing queued from here on is ever sent.
        self.inner.outgoing_rx.lock().await.take();
        let io_task = self.inner.io_task.lock().await.take();

        if let Some(mut handle) = io_task {
            if previous == ConnectionState::Connected {
                let _ = self.inner.outgoing.send(Message::Close(None));
                if timeout(CLOSE_TIMEOUT, &mut handle).await.is_err() {
                    warn!("Connection {} did not close in time, aborting", self.inner.id);
                    handle.abort();
                }
            } else {
                handle.abort();
            }
        }

        self.inner.finish().await;
        info!("Connection {} closed", self.inner.id);
    }

    pub fn subscribers(&self) -> &SubscriberPool {
        &self.inner.subscribers
    }

    /// Registers a pending call. The receiver fails once the connection closes.
    pub(crate) async fn register_call(&self, id: &str) -> oneshot::Receiver<ServiceReply> {
        let (tx, rx) = oneshot::channel();
        self.inner.pending_calls.write().await.insert(id.to_string(), tx);
        rx
    }

    pub(crate) async fn forget_call(&self, id: &str) {
        self.inner.pending_calls.write().await.remove(id);
    }

    pub async fn pending_call_count(&self) -> usize {
        self.inner.pending_calls.read().await.len()
    }

    pub async fn state(&self) -> ConnectionState {
        *self.inner.state.read().await
    }

    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }
}

impl RosInner {
    async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<Message>) {
        let ws_stream = match connect_async(self.url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                error!("Error connecting {} to {}: {}", self.id, self.url, e);
                self.emit(RosEvent::Error(e.to_string()));
                self.finish().await;
                return;
            }
        };

        {
            let mut state = self.state.write().await;
            if *state == ConnectionState::Closed {
                drop(state);
                let mut ws_stream = ws_stream;
                let _ = ws_stream.close(None).await;
                return;
            }
            *state = ConnectionState::Connected;
        }
        info!("Connection {} established with {}", self.id, self.url);
        self.emit(RosEvent::Connection);

        let (mut ws_sink, mut ws_stream) = ws_stream.split();

        let send_task = async {
            while let Some(message) = rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = ws_sink.send(message).await {
                    error!("Error sending WebSocket message on {}: {}", self.id, e);
                    break;
                }
                if closing {
                    break;
                }
            }
            if let Err(e) = ws_sink.close().await {
                debug!("Error closing WebSocket sink on {}: {}", self.id, e);
            }
        };

        let receive_task = async {
            while let Some(message) = ws_stream.next().await {
                match message {
                    Ok(Message::Text(text)) => self.handle_text(&text).await,
                    Ok(Message::Ping(data)) => {
                        let _ = self.outgoing.send(Message::Pong(data));
                    }
                    Ok(Message::Close(frame)) => {
                        info!("Server closed connection {}: {:?}", self.id, frame);
                        break;
                    }
                    Ok(Message::Binary(bin)) => {
                        warn!("Dropping {} byte binary frame on {}", bin.len(), self.id);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Error receiving WebSocket message on {}: {}", self.id, e);
                        self.emit(RosEvent::Error(e.to_string()));
                        break;
                    }
                }
            }
        };

        tokio::select! {
            _ = send_task => {
                debug!("Send task completed for connection {}", self.id);
            }
            _ = receive_task => {
                debug!("Receive task completed for connection {}", self.id);
            }
        }

        self.finish().await;
    }

    async fn handle_text(&self, text: &str) {
        let op = match RosbridgeOp::decode(text) {
            Ok(op) => op,
            Err(e) => {
                warn!("Dropping frame on {}: {}", self.id, e);
                return;
            }
        };

        match op {
            RosbridgeOp::Publish { topic, msg } => {
                self.subscribers.dispatch(&topic, msg).await;
            }
            RosbridgeOp::ServiceResponse { id, service, values, result } => {
                let Some(id) = id else {
                    warn!("Service response from {} without an id", service);
                    return;
                };
                match self.pending_calls.write().await.remove(&id) {
                    Some(reply) => {
                        let _ = reply.send(ServiceReply { values, result });
                    }
                    None => warn!("Service response for unknown call {}", id),
                }
            }
            RosbridgeOp::Status { level, msg, .. } => match level.as_str() {
                "error" => error!("rosbridge: {}", msg),
                "warning" => warn!("rosbridge: {}", msg),
                "info" => info!("rosbridge: {}", msg),
                _ => debug!("rosbridge: {}", msg),
            },
            other => warn!("Ignoring unexpected {} op on {}", other.name(), self.id),
        }
    }

    fn emit(&self, event: RosEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    async fn finish(&self) {
        *self.state.write().await = ConnectionState::Closed;
        // Dropping the senders fails every waiting call.
        self.pending_calls.write().await.clear();
        if !self.close_emitted.swap(true, Ordering::SeqCst) {
            self.emit(RosEvent::Close);
        }
    }
}
