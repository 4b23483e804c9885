//! Client-side handles for ROS primitives
//!
//! Thin wrappers over a [`Ros`](crate::websocket::Ros) connection that speak
//! the rosbridge operations for topics, services and actionlib actions.

mod action;
mod service;
mod topic;

pub use action::{ActionClient, Goal, GoalEvent, GoalHandle};
pub use service::Service;
pub use topic::Topic;
