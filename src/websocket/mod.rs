//! WebSocket side of the rosbridge client
//!
//! This module owns the socket to the rosbridge server, the JSON operations
//! exchanged over it, and the routing of incoming messages to subscribers.

mod connection;
mod pool;
mod protocol;

pub use connection::{ConnectionState, Ros, RosEvent, ServiceReply};
pub use pool::{SubscriberPool, TopicCallback};
pub use protocol::RosbridgeOp;
