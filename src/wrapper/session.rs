use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ConnectionTarget;
use crate::ros::{ActionClient, Service, Topic};
use crate::store::{Alert, RosStore, RosStoreExt, StoreAction};
use crate::websocket::{Ros, RosEvent};

/// One live connection and the handles built on it.
pub(crate) struct Session {
    pub ros: Ros,
    pub target: ConnectionTarget,
    pub topic_refs: BTreeMap<String, Topic>,
    pub service_refs: BTreeMap<String, Service>,
    pub action_refs: BTreeMap<String, ActionClient>,
    pub forwarder: JoinHandle<()>,
}

impl Session {
    /// Closes the connection and waits until its close has reached the store.
    pub async fn close(self) {
        self.ros.close().await;
        if let Err(e) = self.forwarder.await {
            debug!("Event forwarder for {} ended abnormally: {}", self.ros.id(), e);
        }
    }
}

/// Mirrors one lifecycle event into the store.
pub(crate) async fn forward_event(store: &dyn RosStore, event: RosEvent) {
    match event {
        RosEvent::Connection => {
            store.connected(true).await;
            store.add_alert(Alert::success("Connected to websocket server")).await;
        }
        RosEvent::Error(reason) => {
            debug!("Websocket error: {}", reason);
            store.connected(false).await;
            store
                .add_alert(Alert::error("Unable to connect to websocket server"))
                .await;
        }
        RosEvent::Close => {
            store.connected(false).await;
            store
                .add_alert(Alert::warning("Connection to websocket server closed"))
                .await;
        }
    }
}

/// Feeds lifecycle events and default-routed topic messages to the store, in
/// arrival order, until the connection closes. Messages queued before the
/// close reach the store ahead of it.
pub(crate) fn spawn_forwarder(
    store: Arc<dyn RosStore>,
    mut events: broadcast::Receiver<RosEvent>,
    mut topic_messages: mpsc::UnboundedReceiver<(String, Value)>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                event = events.recv() => match event {
                    Ok(RosEvent::Close) => {
                        while let Ok((topic, message)) = topic_messages.try_recv() {
                            store.dispatch(StoreAction::TopicMessage { topic, message }).await;
                        }
                        forward_event(store.as_ref(), RosEvent::Close).await;
                        break;
                    }
                    Ok(event) => forward_event(store.as_ref(), event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Event forwarder skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                Some((topic, message)) = topic_messages.recv() => {
                    store.dispatch(StoreAction::TopicMessage { topic, message }).await;
                }
            }
        }
    })
}
