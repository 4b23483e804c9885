use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use crate::error::AppError;

/// The subset of rosbridge v2 operations a client sends or receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RosbridgeOp {
    Publish {
        topic: String,
        msg: Value,
    },
    Subscribe {
        id: String,
        topic: String,
        #[serde(rename = "type")]
        message_type: String,
    },
    Unsubscribe {
        id: String,
        topic: String,
    },
    Advertise {
        id: String,
        topic: String,
        #[serde(rename = "type")]
        message_type: String,
    },
    Unadvertise {
        id: String,
        topic: String,
    },
    CallService {
        id: String,
        service: String,
        #[serde(default)]
        args: Value,
    },
    ServiceResponse {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        service: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        values: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<bool>,
    },
    Status {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        level: String,
        msg: String,
    },
}

impl RosbridgeOp {
    pub fn encode(&self) -> Result<Message, AppError> {
        Ok(Message::Text(serde_json::to_string(self)?))
    }

    pub fn decode(text: &str) -> Result<Self, AppError> {
        serde_json::from_str(text)
            .map_err(|e| AppError::ProtocolError(format!("Invalid rosbridge message: {}", e)))
    }

    pub fn name(&self) -> &'static str {
        match self {
            RosbridgeOp::Publish { .. } => "publish",
            RosbridgeOp::Subscribe { .. } => "subscribe",
            RosbridgeOp::Unsubscribe { .. } => "unsubscribe",
            RosbridgeOp::Advertise { .. } => "advertise",
            RosbridgeOp::Unadvertise { .. } => "unadvertise",
            RosbridgeOp::CallService { .. } => "call_service",
            RosbridgeOp::ServiceResponse { .. } => "service_response",
            RosbridgeOp::Status { .. } => "status",
        }
    }
}
