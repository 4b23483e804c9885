use serde_json::{json, Value};
use tracing::debug;

use crate::error::{AppError, ServiceError};
use crate::websocket::{Ros, RosbridgeOp};

#[derive(Clone)]
pub struct Service {
    ros: Ros,
    name: String,
    service_type: String,
}

impl Service {
    pub fn new(ros: &Ros, name: impl Into<String>, service_type: impl Into<String>) -> Self {
        Self {
            ros: ros.clone(),
            name: name.into(),
            service_type: service_type.into(),
        }
    }

    /// Calls the service and waits for its response values.
    pub async fn call(&self, request: Value) -> Result<Value, AppError> {
        let id = self.ros.next_id(&format!("call_service:{}", self.name));
        let reply = self.ros.register_call(&id).await;

        let op = RosbridgeOp::CallService {
            id: id.clone(),
            service: self.name.clone(),
            args: request,
        };
        if let Err(e) = self.ros.send(&op).await {
            self.ros.forget_call(&id).await;
            return Err(e);
        }
        debug!("Waiting on {} ({})", id, self.service_type);

        let reply = reply.await.map_err(|_| ServiceError::ConnectionClosed)?;
        match reply.result {
            Some(false) => Err(ServiceError::Failed(failure_text(reply.values)).into()),
            _ => Ok(reply.values.unwrap_or_else(|| json!({}))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }
}

// rosbridge puts the failure reason in `values`, usually as a bare string.
fn failure_text(values: Option<Value>) -> String {
    match values {
        Some(Value::String(text)) => text,
        Some(other) => other.to_string(),
        None => "Service call failed".to_string(),
    }
}
