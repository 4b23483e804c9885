use std::sync::Arc;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::AppError;
use crate::websocket::{Ros, RosbridgeOp, TopicCallback};

/// A named topic on one connection. Clones share subscription state.
#[derive(Clone)]
pub struct Topic {
    ros: Ros,
    name: String,
    message_type: String,
    subscription_ids: Arc<Mutex<Vec<String>>>,
    advertise_id: Arc<Mutex<Option<String>>>,
}

impl Topic {
    pub fn new(ros: &Ros, name: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            ros: ros.clone(),
            name: name.into(),
            message_type: message_type.into(),
            subscription_ids: Arc::new(Mutex::new(Vec::new())),
            advertise_id: Arc::new(Mutex::new(None)),
        }
    }

    /// Registers `callback` and asks the server for the topic's messages.
    /// Returns the subscription id.
    pub async fn subscribe(&self, callback: TopicCallback) -> Result<String, AppError> {
        let id = self.ros.next_id(&format!("subscribe:{}", self.name));
        self.ros.subscribers().add(&self.name, id.clone(), callback).await;

        let op = RosbridgeOp::Subscribe {
            id: id.clone(),
            topic: self.name.clone(),
            message_type: self.message_type.clone(),
        };
        if let Err(e) = self.ros.send(&op).await {
            self.ros.subscribers().remove(&self.name, &id).await;
            return Err(e);
        }

        self.subscription_ids.lock().await.push(id.clone());
        Ok(id)
    }

    /// Drops every callback this handle registered. Failures to tell the
    /// server are logged only.
    pub async fn unsubscribe(&self) {
        let ids = std::mem::take(&mut *self.subscription_ids.lock().await);
        for id in ids {
            self.ros.subscribers().remove(&self.name, &id).await;
            let op = RosbridgeOp::Unsubscribe {
                id: id.clone(),
                topic: self.name.clone(),
            };
            if let Err(e) = self.ros.send(&op).await {
                debug!("Could not send unsubscribe {} for {}: {}", id, self.name, e);
            }
        }
    }

    pub async fn advertise(&self) -> Result<(), AppError> {
        let mut advertise_id = self.advertise_id.lock().await;
        if advertise_id.is_some() {
            return Ok(());
        }

        let id = self.ros.next_id(&format!("advertise:{}", self.name));
        self.ros
            .send(&RosbridgeOp::Advertise {
                id: id.clone(),
                topic: self.name.clone(),
                message_type: self.message_type.clone(),
            })
            .await?;
        info!("Advertised {} as {}", self.name, self.message_type);
        *advertise_id = Some(id);
        Ok(())
    }

    pub async fn unadvertise(&self) {
        if let Some(id) = self.advertise_id.lock().await.take() {
            let op = RosbridgeOp::Unadvertise {
                id: id.clone(),
                topic: self.name.clone(),
            };
            if let Err(e) = self.ros.send(&op).await {
                debug!("Could not send unadvertise {} for {}: {}", id, self.name, e);
            }
        }
    }

    /// Publishes `msg`, advertising the topic first if needed.
    pub async fn publish(&self, msg: Value) -> Result<(), AppError> {
        self.advertise().await?;
        self.ros
            .send(&RosbridgeOp::Publish {
                topic: self.name.clone(),
                msg,
            })
            .await
    }

    pub async fn is_subscribed(&self) -> bool {
        !self.subscription_ids.lock().await.is_empty()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn message_type(&self) -> &str {
        &self.message_type
    }
}
