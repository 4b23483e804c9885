use thiserror::Error;
use tokio_tungstenite::tungstenite;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("WebSocket error: {0}")]
    WebSocketError(#[from] WebSocketError),

    #[error("Service error: {0}")]
    ServiceError(#[from] ServiceError),

    #[error("Registry error: {0}")]
    RegistryError(#[from] RegistryError),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ProtocolError(err.to_string())
    }
}

impl From<tungstenite::Error> for AppError {
    fn from(err: tungstenite::Error) -> Self {
        match err {
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                AppError::WebSocketError(WebSocketError::Closed)
            }
            _ => AppError::WebSocketError(WebSocketError::ConnectionError(err.to_string())),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::InternalError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum WebSocketError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Message sending failed: {0}")]
    SendError(String),

    #[error("Invalid url: {0}")]
    InvalidUrl(String),

    #[error("Connection already started")]
    AlreadyStarted,

    #[error("Connection closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{0}")]
    Failed(String),

    #[error("Connection closed before the service responded")]
    ConnectionClosed,
}

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Unknown topic: {0}")]
    UnknownTopic(String),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error("Not connected to a websocket server")]
    NotConnected,
}
