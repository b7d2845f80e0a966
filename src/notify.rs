//! Change notification bridge
//!
//! Fan-out of row-change signals to interested subscribers, keyed by topic.
//! Payloads are invalidation signals only; subscribers refetch through the
//! store. Delivery is at-least-once: a lagged receiver observes
//! `RecvError::Lagged`, which means the same thing as a signal (refetch).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

/// What kind of change occurred on the topic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Insert,
    Update,
}

/// An invalidation signal; never carries row content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub topic: String,
    pub kind: ChangeKind,
}

/// A live subscription to one topic; dropping it cancels the subscription
pub struct Subscription {
    pub topic: String,
    pub receiver: broadcast::Receiver<ChangeEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Result<ChangeEvent, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Adapt the subscription into a `Stream` for select-style consumers
    pub fn into_stream(self) -> BroadcastStream<ChangeEvent> {
        BroadcastStream::new(self.receiver)
    }
}

/// Topic-keyed broadcast fan-out
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<ChangeEvent>>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Topic for one task's row
    pub fn task_topic(task_id: Uuid) -> String {
        format!("task:{}", task_id)
    }

    /// Topic for one task's activity log
    pub fn task_comments_topic(task_id: Uuid) -> String {
        format!("task_comments:{}", task_id)
    }

    /// Topic for a customer's whole board
    pub fn customer_tasks_topic(customer_id: Uuid) -> String {
        format!("customer:{}:tasks", customer_id)
    }

    pub fn subscribe(&self, topic: impl Into<String>) -> Subscription {
        let topic = topic.into();
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let sender = channels
            .entry(topic.clone())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        Subscription {
            topic,
            receiver: sender.subscribe(),
        }
    }

    /// Publish an invalidation signal. No-op when nobody listens; stale
    /// topics are pruned as they are encountered.
    pub fn publish(&self, topic: impl Into<String>, kind: ChangeKind) {
        let topic = topic.into();
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(sender) = channels.get(&topic) {
            if sender.receiver_count() == 0 {
                channels.remove(&topic);
                return;
            }
            let _ = sender.send(ChangeEvent {
                topic: topic.clone(),
                kind,
            });
        }
    }

    #[cfg(test)]
    fn topic_count(&self) -> usize {
        self.channels.lock().unwrap().len()
    }
}
