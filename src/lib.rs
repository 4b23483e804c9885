pub mod config;
pub mod error;
pub mod ros;
pub mod store;
pub mod websocket;
pub mod wrapper;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::{ActionDecl, ConnectionTarget, ServiceDecl, Settings, TopicDecl};

pub use ros::{ActionClient, Goal, GoalEvent, GoalHandle, Service, Topic};
pub use store::{Alert, AlertVariant, MemoryStore, RosStore, RosStoreExt, StoreAction};
pub use websocket::{Ros, RosEvent};
pub use wrapper::{ActionCallback, RosWrapper, ServiceCallback};
