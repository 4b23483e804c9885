use std::collections::HashMap;
use std::sync::Arc;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Invoked with the `msg` field of every `publish` received on a topic.
pub type TopicCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Callbacks keyed by topic name, then by subscription id.
#[derive(Clone, Default)]
pub struct SubscriberPool {
    subscribers: Arc<RwLock<HashMap<String, HashMap<String, TopicCallback>>>>,
}

impl SubscriberPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add(&self, topic: &str, id: String, callback: TopicCallback) {
        info!("Added subscription {} on {}", id, topic);
        self.subscribers
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .insert(id, callback);
    }

    pub async fn remove(&self, topic: &str, id: &str) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let removed = match subscribers.get_mut(topic) {
            Some(callbacks) => {
                let removed = callbacks.remove(id).is_some();
                if callbacks.is_empty() {
                    subscribers.remove(topic);
                }
                removed
            }
            None => false,
        };
        if removed {
            info!("Removed subscription {} on {}", id, topic);
        }
        removed
    }

    pub async fn remove_topic(&self, topic: &str) -> usize {
        self.subscribers
            .write()
            .await
            .remove(topic)
            .map(|callbacks| callbacks.len())
            .unwrap_or(0)
    }

    /// Hands `msg` to every callback on `topic`, returning how many ran.
    pub async fn dispatch(&self, topic: &str, msg: Value) -> usize {
        // Callbacks run outside the lock so they may (un)subscribe.
        let callbacks: Vec<TopicCallback> = match self.subscribers.read().await.get(topic) {
            Some(callbacks) => callbacks.values().cloned().collect(),
            None => {
                debug!("No subscribers for message on {}", topic);
                return 0;
            }
        };

        for callback in &callbacks {
            callback(msg.clone());
        }
        callbacks.len()
    }

    pub async fn subscription_count(&self) -> usize {
        self.subscribers.read().await.values().map(HashMap::len).sum()
    }

    pub async fn topics(&self) -> Vec<String> {
        self.subscribers.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_callback(counter: Arc<AtomicUsize>) -> TopicCallback {
        Arc::new(move |_msg: Value| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn test_subscriber_pool() {
        let pool = SubscriberPool::new();
        let hits = Arc::new(AtomicUsize::new(0));

        pool.add("/odom", "subscribe:/odom:1".to_string(), counting_callback(hits.clone())).await;
        pool.add("/odom", "subscribe:/odom:2".to_string(), counting_callback(hits.clone())).await;
        pool.add("/scan", "subscribe:/scan:3".to_string(), counting_callback(hits.clone())).await;
        assert_eq!(pool.subscription_count().await, 3);

        assert_eq!(pool.dispatch("/odom", json!({"x": 1})).await, 2);
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        assert!(pool.remove("/odom", "subscribe:/odom:1").await);
        assert!(!pool.remove("/odom", "subscribe:/odom:1").await);
        assert_eq!(pool.dispatch("/odom", json!({"x": 2})).await, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 3);

        assert_eq!(pool.remove_topic("/scan").await, 1);
        assert_eq!(pool.topics().await, vec!["/odom".to_string()]);
    }

    #[tokio::test]
    async fn test_dispatch_without_subscribers() {
        let pool = SubscriberPool::new();
        assert_eq!(pool.dispatch("/nobody", json!(null)).await, 0);
    }

    #[tokio::test]
    async fn test_last_removal_drops_topic() {
        let pool = SubscriberPool::new();
        pool.add("/odom", "a".to_string(), Arc::new(|_: Value| {})).await;
        assert!(pool.remove("/odom", "a").await);
        assert!(pool.topics().await.is_empty());
    }
}
