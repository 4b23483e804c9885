#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rosbridge_shim::{ConnectionTarget, StoreAction};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, Mutex, Notify};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;

pub const WAIT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Replies the fake server sends back for one client frame.
pub type Responder = Arc<dyn Fn(&Value) -> Vec<Value> + Send + Sync>;

pub fn no_replies() -> Responder {
    Arc::new(|_| Vec::new())
}

/// Answers every `call_service` with `values`, succeeding unless the service
/// name contains "fail".
pub fn service_replies() -> Responder {
    Arc::new(|op| {
        if op["op"] != "call_service" {
            return Vec::new();
        }
        let service = op["service"].as_str().unwrap_or_default();
        if service.contains("fail") {
            vec![json!({
                "op": "service_response",
                "id": op["id"],
                "service": service,
                "values": "service raised an exception",
                "result": false
            })]
        } else {
            vec![json!({
                "op": "service_response",
                "id": op["id"],
                "service": service,
                "values": {"echo": op["args"]},
                "result": true
            })]
        }
    })
}

/// Plays an action server under `server`: one feedback then a result for
/// every goal published.
pub fn action_replies(server: &'static str) -> Responder {
    Arc::new(move |op| {
        if op["op"] != "publish" || op["topic"] != format!("{}/goal", server) {
            return Vec::new();
        }
        let id = op["msg"]["goal_id"]["id"].clone();
        let order = op["msg"]["goal"]["order"].clone();
        vec![
            json!({
                "op": "publish",
                "topic": format!("{}/feedback", server),
                "msg": {"status": {"goal_id": {"id": id}, "status": 1}, "feedback": {"sequence": [0, 1]}}
            }),
            json!({
                "op": "publish",
                "topic": format!("{}/result", server),
                "msg": {"status": {"goal_id": {"id": id}, "status": 3}, "result": {"order": order}}
            }),
        ]
    })
}

enum Outbound {
    Frame(Message),
    /// Drop the TCP stream without a closing handshake.
    Reset,
}

/// A rosbridge stand-in that records every frame it receives.
pub struct FakeRosbridge {
    pub port: u16,
    received: Mutex<mpsc::UnboundedReceiver<Value>>,
    pongs: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    client: Arc<Mutex<Option<mpsc::UnboundedSender<Outbound>>>>,
    connections: Arc<AtomicUsize>,
}

impl FakeRosbridge {
    pub async fn start(responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (received_tx, received_rx) = mpsc::unbounded_channel();
        let (pongs_tx, pongs_rx) = mpsc::unbounded_channel();
        let client = Arc::new(Mutex::new(None));
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_client = client.clone();
        let accept_connections = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let ws_stream = match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => continue,
                };
                accept_connections.fetch_add(1, Ordering::SeqCst);

                let (mut sink, mut stream) = ws_stream.split();
                let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
                *accept_client.lock().await = Some(tx.clone());
                let reset = Arc::new(Notify::new());

                let writer_reset = reset.clone();
                tokio::spawn(async move {
                    while let Some(outbound) = rx.recv().await {
                        let message = match outbound {
                            Outbound::Frame(message) => message,
                            Outbound::Reset => {
                                writer_reset.notify_one();
                                break;
                            }
                        };
                        let closing = matches!(message, Message::Close(_));
                        if sink.send(message).await.is_err() || closing {
                            break;
                        }
                    }
                });

                let received_tx = received_tx.clone();
                let pongs_tx = pongs_tx.clone();
                let responder = responder.clone();
                let client = accept_client.clone();
                tokio::spawn(async move {
                    loop {
                        // Both halves must drop for the socket to go away.
                        let message = tokio::select! {
                            _ = reset.notified() => break,
                            message = stream.next() => match message {
                                Some(Ok(message)) => message,
                                _ => break,
                            },
                        };
                        match message {
                            Message::Text(text) => {
                                let value: Value = serde_json::from_str(&text).unwrap();
                                for reply in responder(&value) {
                                    let _ = tx.send(Outbound::Frame(Message::Text(reply.to_string())));
                                }
                                let _ = received_tx.send(value);
                            }
                            Message::Pong(data) => {
                                let _ = pongs_tx.send(data);
                            }
                            Message::Close(_) => break,
                            _ => {}
                        }
                    }
                    let mut client = client.lock().await;
                    if client.as_ref().map_or(false, |current| current.same_channel(&tx)) {
                        *client = None;
                    }
                });
            }
        });

        Self {
            port,
            received: Mutex::new(received_rx),
            pongs: Mutex::new(pongs_rx),
            client,
            connections,
        }
    }

    pub fn target(&self) -> ConnectionTarget {
        ConnectionTarget::new("127.0.0.1", self.port.to_string())
    }

    pub fn url(&self) -> String {
        self.target().url()
    }

    /// The next received frame whose `op` is `op`; other frames are skipped.
    pub async fn next_op(&self, op: &str) -> Value {
        let mut received = self.received.lock().await;
        timeout(WAIT, async {
            loop {
                let value = received.recv().await.expect("server stopped");
                if value["op"] == op {
                    return value;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no {} op received", op))
    }

    /// Sends `value` to the most recent client once one is connected.
    pub async fn push(&self, value: Value) {
        self.push_raw(&value.to_string()).await;
    }

    /// Sends `text` as is, whether or not it is valid JSON.
    pub async fn push_raw(&self, text: &str) {
        self.send(Outbound::Frame(Message::Text(text.to_string()))).await;
    }

    pub async fn ping(&self, data: &[u8]) {
        self.send(Outbound::Frame(Message::Ping(data.to_vec()))).await;
    }

    /// The payload of the next pong the client sent back.
    pub async fn next_pong(&self) -> Vec<u8> {
        let mut pongs = self.pongs.lock().await;
        timeout(WAIT, pongs.recv())
            .await
            .expect("no pong received")
            .expect("server stopped")
    }

    pub async fn close_client(&self) {
        self.send(Outbound::Frame(Message::Close(None))).await;
    }

    /// Drops the client's socket without a closing handshake.
    pub async fn reset_client(&self) {
        self.send(Outbound::Reset).await;
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    async fn send(&self, outbound: Outbound) {
        let tx = timeout(WAIT, async {
            loop {
                if let Some(tx) = self.client.lock().await.clone() {
                    return tx;
                }
                sleep(POLL_INTERVAL).await;
            }
        })
        .await
        .expect("no client connected");
        let _ = tx.send(outbound);
    }
}

/// A port nothing listens on.
pub async fn refused_target() -> ConnectionTarget {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    ConnectionTarget::new("127.0.0.1", port.to_string())
}

/// Waits for the first store action matching `pred`.
pub async fn wait_for<F>(updates: &mut broadcast::Receiver<StoreAction>, pred: F) -> StoreAction
where
    F: Fn(&StoreAction) -> bool,
{
    timeout(WAIT, async {
        loop {
            let action = updates.recv().await.expect("store dropped");
            if pred(&action) {
                return action;
            }
        }
    })
    .await
    .expect("store action never arrived")
}
