//! actionlib over rosbridge
//!
//! An action server is reached through five plain topics under its name:
//! `goal` and `cancel` are published, `status`, `feedback` and `result` are
//! subscribed. Goals are told apart by the id stamped into every message.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use crate::error::AppError;
use crate::ros::Topic;
use crate::websocket::{Ros, RosEvent};

#[derive(Debug, Clone, PartialEq)]
pub enum GoalEvent {
    Status(Value),
    Feedback(Value),
    Result(Value),
}

type GoalRoutes = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<GoalEvent>>>>;

#[derive(Clone)]
pub struct ActionClient {
    server_name: String,
    action_name: String,
    goal_topic: Topic,
    cancel_topic: Topic,
    status_topic: Topic,
    feedback_topic: Topic,
    result_topic: Topic,
    goals: GoalRoutes,
}

impl ActionClient {
    pub async fn new(
        ros: &Ros,
        server_name: impl Into<String>,
        action_name: impl Into<String>,
    ) -> Result<Self, AppError> {
        let server_name = server_name.into();
        let action_name = action_name.into();
        let goals: GoalRoutes = Arc::new(RwLock::new(HashMap::new()));

        // Goals in flight end with the connection.
        spawn_close_watch(ros.events(), goals.clone());

        let client = Self {
            goal_topic: Topic::new(ros, format!("{}/goal", server_name), format!("{}Goal", action_name)),
            cancel_topic: Topic::new(ros, format!("{}/cancel", server_name), "actionlib_msgs/GoalID"),
            status_topic: Topic::new(ros, format!("{}/status", server_name), "actionlib_msgs/GoalStatusArray"),
            feedback_topic: Topic::new(ros, format!("{}/feedback", server_name), format!("{}Feedback", action_name)),
            result_topic: Topic::new(ros, format!("{}/result", server_name), format!("{}Result", action_name)),
            server_name,
            action_name,
            goals,
        };

        client.goal_topic.advertise().await?;
        client.cancel_topic.advertise().await?;

        let routes = client.goals.clone();
        client
            .status_topic
            .subscribe(Arc::new(move |msg| route_status(&routes, msg)))
            .await?;
        let routes = client.goals.clone();
        client
            .feedback_topic
            .subscribe(Arc::new(move |msg| route_feedback(&routes, msg)))
            .await?;
        let routes = client.goals.clone();
        client
            .result_topic
            .subscribe(Arc::new(move |msg| route_result(&routes, msg)))
            .await?;

        info!("Action client ready for {} ({})", client.server_name, client.action_name);
        Ok(client)
    }

    pub fn goal(&self, message: Value) -> Goal {
        let goal_id = format!(
            "goal_{}_{}",
            rand::random::<u32>(),
            chrono::Utc::now().timestamp_millis()
        );
        let message = json!({
            "goal_id": {
                "stamp": { "secs": 0, "nsecs": 0 },
                "id": goal_id,
            },
            "goal": message,
        });

        Goal {
            client: self.clone(),
            goal_id,
            message,
        }
    }

    pub async fn dispose(&self) {
        self.status_topic.unsubscribe().await;
        self.feedback_topic.unsubscribe().await;
        self.result_topic.unsubscribe().await;
        self.goal_topic.unadvertise().await;
        self.cancel_topic.unadvertise().await;
        write_routes(&self.goals).clear();
    }

    pub fn active_goal_count(&self) -> usize {
        read_routes(&self.goals).len()
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn action_name(&self) -> &str {
        &self.action_name
    }
}

pub struct Goal {
    client: ActionClient,
    goal_id: String,
    message: Value,
}

impl Goal {
    /// Publishes the goal. Events for it arrive on the returned handle.
    pub async fn send(&self) -> Result<GoalHandle, AppError> {
        let (tx, rx) = mpsc::unbounded_channel();
        write_routes(&self.client.goals).insert(self.goal_id.clone(), tx);

        if let Err(e) = self.client.goal_topic.publish(self.message.clone()).await {
            write_routes(&self.client.goals).remove(&self.goal_id);
            return Err(e);
        }
        debug!("Sent goal {} to {}", self.goal_id, self.client.server_name);

        Ok(GoalHandle {
            goal_id: self.goal_id.clone(),
            events: rx,
        })
    }

    pub async fn cancel(&self) -> Result<(), AppError> {
        self.client
            .cancel_topic
            .publish(json!({ "id": self.goal_id }))
            .await
    }

    pub fn id(&self) -> &str {
        &self.goal_id
    }

    pub fn message(&self) -> &Value {
        &self.message
    }
}

/// Ends after the goal's result, or when the connection closes.
pub struct GoalHandle {
    goal_id: String,
    events: mpsc::UnboundedReceiver<GoalEvent>,
}

impl GoalHandle {
    pub async fn next(&mut self) -> Option<GoalEvent> {
        self.events.recv().await
    }

    pub fn id(&self) -> &str {
        &self.goal_id
    }
}

fn spawn_close_watch(mut events: broadcast::Receiver<RosEvent>, goals: GoalRoutes) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(RosEvent::Close) | Err(broadcast::error::RecvError::Closed) => break,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
            }
        }
        write_routes(&goals).clear();
    });
}

fn read_routes(
    goals: &GoalRoutes,
) -> std::sync::RwLockReadGuard<'_, HashMap<String, mpsc::UnboundedSender<GoalEvent>>> {
    goals.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write_routes(
    goals: &GoalRoutes,
) -> std::sync::RwLockWriteGuard<'_, HashMap<String, mpsc::UnboundedSender<GoalEvent>>> {
    goals.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn goal_id_of(status: &Value) -> Option<&str> {
    status.get("goal_id")?.get("id")?.as_str()
}

fn route_status(goals: &GoalRoutes, msg: Value) {
    let Some(list) = msg.get("status_list").and_then(Value::as_array) else {
        return;
    };
    let routes = read_routes(goals);
    for status in list {
        if let Some(tx) = goal_id_of(status).and_then(|id| routes.get(id)) {
            let _ = tx.send(GoalEvent::Status(status.clone()));
        }
    }
}

fn route_feedback(goals: &GoalRoutes, msg: Value) {
    let Some(id) = msg.get("status").and_then(goal_id_of) else {
        return;
    };
    if let Some(tx) = read_routes(goals).get(id) {
        let feedback = msg.get("feedback").cloned().unwrap_or(Value::Null);
        let _ = tx.send(GoalEvent::Feedback(feedback));
    }
}

fn route_result(goals: &GoalRoutes, msg: Value) {
    let Some(id) = msg.get("status").and_then(goal_id_of) else {
        return;
    };
    // Dropping the sender ends the goal's stream after the result.
    if let Some(tx) = write_routes(goals).remove(id) {
        let result = msg.get("result").cloned().unwrap_or(Value::Null);
        let _ = tx.send(GoalEvent::Result(result));
    }
}
