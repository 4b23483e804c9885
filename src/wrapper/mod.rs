//! Connection lifecycle and handle registry
//!
//! [`RosWrapper`] owns at most one rosbridge connection at a time. For every
//! declared topic, service and action it keeps a live handle on that
//! connection, rebuilt wholesale whenever the connection is (re)opened, and it
//! reports lifecycle events, calls and action progress to a [`RosStore`].

mod session;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{ActionDecl, ConnectionTarget, ServiceDecl, Settings, TopicDecl};
use crate::error::{AppError, RegistryError, ServiceError};
use crate::ros::{ActionClient, GoalEvent, Service, Topic};
use crate::store::{ActionMeta, ActionMetaKind, Alert, RosStore, RosStoreExt};
use crate::websocket::{Ros, TopicCallback};

use session::{spawn_forwarder, Session};

/// Runs with the values of a successful service call.
pub type ServiceCallback = Box<dyn FnOnce(&Value) + Send>;

/// Runs with an action's result; the returned alerts are added to the store.
pub type ActionCallback = Box<dyn FnOnce(&Value) -> Vec<Alert> + Send>;

pub struct RosWrapper {
    store: Arc<dyn RosStore>,
    default_target: ConnectionTarget,
    topics: BTreeMap<String, TopicDecl>,
    services: BTreeMap<String, ServiceDecl>,
    actions: BTreeMap<String, ActionDecl>,
    topic_callbacks: HashMap<String, TopicCallback>,
    session: RwLock<Option<Session>>,
}

impl RosWrapper {
    pub fn builder(store: Arc<dyn RosStore>) -> RosWrapperBuilder {
        RosWrapperBuilder {
            store,
            target: ConnectionTarget::new("localhost", "9090"),
            topics: BTreeMap::new(),
            services: BTreeMap::new(),
            actions: BTreeMap::new(),
            topic_callbacks: HashMap::new(),
        }
    }

    pub fn from_settings(settings: &Settings, store: Arc<dyn RosStore>) -> Self {
        let mut builder = Self::builder(store).target(settings.connection_target());
        builder.topics = settings.topics.clone();
        builder.services = settings.services.clone();
        builder.actions = settings.actions.clone();
        builder.build()
    }

    /// Opens the connection at the configured target.
    pub async fn connect(&self) -> Result<(), AppError> {
        let mut session = self.session.write().await;
        self.store
            .add_alert(Alert::info("Connecting to websocket server"))
            .await;

        if let Some(old) = session.take() {
            old.close().await;
        }
        *session = Some(self.open_or_alert(self.default_target.clone()).await?);
        Ok(())
    }

    /// Drops the current connection, if any, and opens one at `target`.
    pub async fn reconnect(&self, target: ConnectionTarget) -> Result<(), AppError> {
        let mut session = self.session.write().await;

        match session.take() {
            Some(old) => {
                self.store
                    .add_alert(Alert::info("Reconnecting to websocket server"))
                    .await;
                // Actions are left to die with the connection.
                for topic in old.topic_refs.values() {
                    topic.unsubscribe().await;
                }
                old.close().await;
            }
            None => {
                self.store
                    .add_alert(Alert::info("Connecting to websocket server"))
                    .await;
            }
        }

        *session = Some(self.open_or_alert(target).await?);
        Ok(())
    }

    pub async fn call_service(
        &self,
        service: &str,
        message: Value,
        callback: Option<ServiceCallback>,
    ) -> Result<Value, AppError> {
        self.store
            .add_alert(Alert::info(format!("Calling service: {}", service)))
            .await;
        let handle = self.service(service).await?;

        match handle.call(message).await {
            Ok(result) => {
                self.store
                    .add_alert(Alert::success("Service successfully called"))
                    .await;
                if let Some(callback) = callback {
                    callback(&result);
                }
                Ok(result)
            }
            Err(e) => {
                self.store.add_alert(Alert::error(alert_text(&e))).await;
                Err(e)
            }
        }
    }

    /// Sends a goal to a declared action. Feedback and the result are
    /// recorded as action meta under `action`. The returned task resolves to
    /// the result, or `None` if the connection closed first.
    pub async fn call_action(
        &self,
        action: &str,
        data: Value,
        callback: Option<ActionCallback>,
    ) -> Result<JoinHandle<Option<Value>>, AppError> {
        self.store
            .add_alert(Alert::info(format!("Calling action: {}", action)))
            .await;
        let client = self.action(action).await?;

        let mut goal = client.goal(data).send().await?;
        let store = self.store.clone();
        let name = action.to_string();

        Ok(tokio::spawn(async move {
            while let Some(event) = goal.next().await {
                match event {
                    GoalEvent::Feedback(feedback) => {
                        store
                            .update_action_meta(ActionMeta {
                                name: name.clone(),
                                kind: ActionMetaKind::Feedback,
                                data: feedback,
                            })
                            .await;
                    }
                    GoalEvent::Result(result) => {
                        store
                            .update_action_meta(ActionMeta {
                                name: name.clone(),
                                kind: ActionMetaKind::Result,
                                data: result.clone(),
                            })
                            .await;
                        // The result may describe a failure; the callback decides.
                        if let Some(callback) = callback {
                            for alert in callback(&result) {
                                store.add_alert(alert).await;
                            }
                        }
                        return Some(result);
                    }
                    GoalEvent::Status(status) => {
                        debug!("Goal {} status: {}", goal.id(), status);
                    }
                }
            }
            None
        }))
    }

    /// Closes the connection, if any.
    pub async fn shutdown(&self) {
        if let Some(session) = self.session.write().await.take() {
            info!("Shutting down connection to {}", session.target.url());
            session.close().await;
        }
    }

    /// Where the wrapper is, or will be, connected.
    pub async fn current_target(&self) -> ConnectionTarget {
        match self.session.read().await.as_ref() {
            Some(session) => session.target.clone(),
            None => self.default_target.clone(),
        }
    }

    pub async fn ros(&self) -> Option<Ros> {
        self.session.read().await.as_ref().map(|s| s.ros.clone())
    }

    pub async fn topic(&self, key: &str) -> Result<Topic, AppError> {
        let session = self.session.read().await;
        let session = session.as_ref().ok_or(RegistryError::NotConnected)?;
        session
            .topic_refs
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownTopic(key.to_string()).into())
    }

    pub async fn service(&self, key: &str) -> Result<Service, AppError> {
        let session = self.session.read().await;
        let session = session.as_ref().ok_or(RegistryError::NotConnected)?;
        session
            .service_refs
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownService(key.to_string()).into())
    }

    pub async fn action(&self, key: &str) -> Result<ActionClient, AppError> {
        let session = self.session.read().await;
        let session = session.as_ref().ok_or(RegistryError::NotConnected)?;
        session
            .action_refs
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownAction(key.to_string()).into())
    }

    pub fn store(&self) -> &Arc<dyn RosStore> {
        &self.store
    }

    /// A connection that never got as far as its socket has no events to
    /// forward, so its failure is reported here.
    async fn open_or_alert(&self, target: ConnectionTarget) -> Result<Session, AppError> {
        match self.open(target.clone()).await {
            Ok(session) => Ok(session),
            Err(e) => {
                warn!("Unable to open {}: {}", target.url(), e);
                self.store.connected(false).await;
                self.store
                    .add_alert(Alert::error("Unable to connect to websocket server"))
                    .await;
                Err(e)
            }
        }
    }

    async fn open(&self, target: ConnectionTarget) -> Result<Session, AppError> {
        let ros = Ros::new(&target.url())?;
        let (topic_tx, topic_rx) = mpsc::unbounded_channel();
        let forwarder = spawn_forwarder(self.store.clone(), ros.events(), topic_rx);

        let mut topic_refs = BTreeMap::new();
        for (key, decl) in &self.topics {
            let topic = Topic::new(&ros, decl.name.clone(), decl.message_type.clone());
            let callback = match self.topic_callbacks.get(key) {
                Some(callback) => callback.clone(),
                None => {
                    let topic_tx = topic_tx.clone();
                    let key = key.clone();
                    Arc::new(move |message: Value| {
                        let _ = topic_tx.send((key.clone(), message));
                    }) as TopicCallback
                }
            };
            topic.subscribe(callback).await?;
            topic_refs.insert(key.clone(), topic);
        }

        let service_refs = self
            .services
            .iter()
            .map(|(key, decl)| {
                (
                    key.clone(),
                    Service::new(&ros, decl.name.clone(), decl.service_type.clone()),
                )
            })
            .collect();

        let mut action_refs = BTreeMap::new();
        for (key, decl) in &self.actions {
            let client =
                ActionClient::new(&ros, decl.server_name.clone(), decl.action_name.clone()).await?;
            action_refs.insert(key.clone(), client);
        }

        ros.connect().await?;
        info!(
            "Opened {} with {} topics, {} services, {} actions",
            target.url(),
            topic_refs.len(),
            self.services.len(),
            action_refs.len()
        );

        Ok(Session {
            ros,
            target,
            topic_refs,
            service_refs,
            action_refs,
            forwarder,
        })
    }
}

pub struct RosWrapperBuilder {
    store: Arc<dyn RosStore>,
    target: ConnectionTarget,
    topics: BTreeMap<String, TopicDecl>,
    services: BTreeMap<String, ServiceDecl>,
    actions: BTreeMap<String, ActionDecl>,
    topic_callbacks: HashMap<String, TopicCallback>,
}

impl RosWrapperBuilder {
    pub fn target(mut self, target: ConnectionTarget) -> Self {
        self.target = target;
        self
    }

    /// Declares a topic whose messages are recorded in the store under `key`.
    pub fn topic(mut self, key: impl Into<String>, decl: TopicDecl) -> Self {
        self.topics.insert(key.into(), decl);
        self
    }

    pub fn topic_with_callback(
        mut self,
        key: impl Into<String>,
        decl: TopicDecl,
        callback: TopicCallback,
    ) -> Self {
        let key = key.into();
        self.topic_callbacks.insert(key.clone(), callback);
        self.topics.insert(key, decl);
        self
    }

    pub fn service(mut self, key: impl Into<String>, decl: ServiceDecl) -> Self {
        self.services.insert(key.into(), decl);
        self
    }

    pub fn action(mut self, key: impl Into<String>, decl: ActionDecl) -> Self {
        self.actions.insert(key.into(), decl);
        self
    }

    pub fn build(self) -> RosWrapper {
        RosWrapper {
            store: self.store,
            default_target: self.target,
            topics: self.topics,
            services: self.services,
            actions: self.actions,
            topic_callbacks: self.topic_callbacks,
            session: RwLock::new(None),
        }
    }
}

fn alert_text(err: &AppError) -> String {
    match err {
        AppError::ServiceError(ServiceError::Failed(text)) => text.clone(),
        other => other.to_string(),
    }
}
