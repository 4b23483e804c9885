//! Application state fed by the ROS wrapper
//!
//! The wrapper never touches application state directly; it dispatches
//! [`StoreAction`]s to a [`RosStore`]. [`MemoryStore`] is the in-process
//! implementation used by the binary and the tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

const UPDATE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertVariant {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alert {
    pub variant: AlertVariant,
    pub message: String,
}

impl Alert {
    pub fn new(variant: AlertVariant, message: impl Into<String>) -> Self {
        Self {
            variant,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(AlertVariant::Info, message)
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self::new(AlertVariant::Success, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(AlertVariant::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(AlertVariant::Error, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionMetaKind {
    Feedback,
    Result,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionMeta {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ActionMetaKind,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StoreAction {
    #[serde(rename = "WS_CONNECTED")]
    WsConnected { connected: bool },
    #[serde(rename = "ADD_ALERT")]
    AddAlert { alert: Alert },
    #[serde(rename = "UPDATE_ACTION_META")]
    UpdateActionMeta { data: ActionMeta },
    #[serde(rename = "TOPIC_MESSAGE")]
    TopicMessage { topic: String, message: Value },
}

/// Receives everything the wrapper reports.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RosStore: Send + Sync {
    async fn dispatch(&self, action: StoreAction);
}

#[async_trait]
pub trait RosStoreExt: RosStore {
    async fn connected(&self, connected: bool) {
        self.dispatch(StoreAction::WsConnected { connected }).await;
    }

    async fn add_alert(&self, alert: Alert) {
        self.dispatch(StoreAction::AddAlert { alert }).await;
    }

    async fn update_action_meta(&self, data: ActionMeta) {
        self.dispatch(StoreAction::UpdateActionMeta { data }).await;
    }
}

impl<T: RosStore + ?Sized> RosStoreExt for T {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRecord {
    pub alert: Alert,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ActionMetaState {
    pub feedback: Option<Value>,
    pub result: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreState {
    pub connected: bool,
    pub alerts: Vec<AlertRecord>,
    pub action_meta: BTreeMap<String, ActionMetaState>,
    pub topic_messages: BTreeMap<String, Value>,
}

impl StoreState {
    pub fn apply(&mut self, action: StoreAction) {
        match action {
            StoreAction::WsConnected { connected } => self.connected = connected,
            StoreAction::AddAlert { alert } => self.alerts.push(AlertRecord {
                alert,
                raised_at: Utc::now(),
            }),
            StoreAction::UpdateActionMeta { data } => {
                let meta = self.action_meta.entry(data.name).or_default();
                match data.kind {
                    ActionMetaKind::Feedback => meta.feedback = Some(data.data),
                    ActionMetaKind::Result => meta.result = Some(data.data),
                }
            }
            StoreAction::TopicMessage { topic, message } => {
                self.topic_messages.insert(topic, message);
            }
        }
    }
}

pub struct MemoryStore {
    state: RwLock<StoreState>,
    updates: broadcast::Sender<StoreAction>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            state: RwLock::new(StoreState::default()),
            updates,
        }
    }

    pub async fn snapshot(&self) -> StoreState {
        self.state.read().await.clone()
    }

    /// Every action applied after this call, in order.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreAction> {
        self.updates.subscribe()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RosStore for MemoryStore {
    async fn dispatch(&self, action: StoreAction) {
        match &action {
            StoreAction::AddAlert { alert } => match alert.variant {
                AlertVariant::Info => info!("{}", alert.message),
                AlertVariant::Success => info!("{}", alert.message),
                AlertVariant::Warning => warn!("{}", alert.message),
                AlertVariant::Error => error!("{}", alert.message),
            },
            other => debug!("Store action: {:?}", other),
        }

        self.state.write().await.apply(action.clone());
        let _ = self.updates.send(action);
    }
}
