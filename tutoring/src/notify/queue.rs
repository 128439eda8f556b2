//! Notification queue and delivery worker.

use super::templates::ClassroomEvent;
use crate::{
    accounts::UserId,
    providers::{Email, Mailer},
};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};

/// How long a delivered key is remembered
const DEDUPE_WINDOW: Duration = Duration::from_secs(6 * 60 * 60);

/// Most delivered keys remembered at once
const DEDUPE_CAPACITY: usize = 100_000;

/// Identifies one delivery: the same key is never delivered twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NotificationKey {
    pub entity_id: i64,
    pub event: ClassroomEvent,
    pub recipient: UserId,
}

/// Message waiting for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub key: NotificationKey,
    pub email: Email,
}

/// Sending half, shared by the workflow managers
#[derive(Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<Notification>,
}

impl NotificationQueue {
    /// Create a bounded queue and the receiver to hand to a [`NotificationWorker`]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Queue a notification without waiting
    ///
    /// A full or closed queue drops the message with a warning; the
    /// workflow step that produced it has already committed.
    pub fn enqueue(&self, notification: Notification) {
        match self.sender.try_send(notification) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => {
                metrics::counter!("notifications_dropped_total").increment(1);
                tracing::warn!(
                    entity_id = n.key.entity_id,
                    event = %n.key.event,
                    recipient = n.key.recipient,
                    "Notification queue full, dropping message"
                );
            }
            Err(TrySendError::Closed(n)) => {
                metrics::counter!("notifications_dropped_total").increment(1);
                tracing::warn!(
                    entity_id = n.key.entity_id,
                    event = %n.key.event,
                    "Notification queue closed, dropping message"
                );
            }
        }
    }
}

/// Retry schedule for a single delivery
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// Recently delivered keys, forgotten after `window` or beyond `capacity`
#[derive(Debug)]
struct DeliveredKeys {
    keys: HashSet<NotificationKey>,
    /// Insertion order, oldest first
    order: VecDeque<(Instant, NotificationKey)>,
    window: Duration,
    capacity: usize,
}

impl DeliveredKeys {
    fn new(window: Duration, capacity: usize) -> Self {
        Self {
            keys: HashSet::new(),
            order: VecDeque::new(),
            window,
            capacity: capacity.max(1),
        }
    }

    fn contains(&mut self, key: &NotificationKey, now: Instant) -> bool {
        self.prune(now);
        self.keys.contains(key)
    }

    fn insert(&mut self, key: NotificationKey, now: Instant) {
        if self.keys.insert(key) {
            self.order.push_back((now, key));
        }
        self.prune(now);
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&(at, key)) = self.order.front() {
            let expired = now.saturating_duration_since(at) >= self.window;
            if !expired && self.order.len() <= self.capacity {
                break;
            }
            self.order.pop_front();
            self.keys.remove(&key);
        }
    }

    fn len(&self) -> usize {
        self.keys.len()
    }
}

/// Result of handling one notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent { attempts: u32 },
    /// Key already delivered
    Duplicate,
    /// Retries exhausted
    Failed { attempts: u32 },
}

/// Delivers queued notifications with bounded retries
pub struct NotificationWorker {
    receiver: mpsc::Receiver<Notification>,
    mailer: Arc<dyn Mailer>,
    policy: RetryPolicy,
    delivered: DeliveredKeys,
}

impl NotificationWorker {
    pub fn new(
        receiver: mpsc::Receiver<Notification>,
        mailer: Arc<dyn Mailer>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            receiver,
            mailer,
            policy,
            delivered: DeliveredKeys::new(DEDUPE_WINDOW, DEDUPE_CAPACITY),
        }
    }

    /// Deliver until every queue handle has been dropped
    pub async fn run(mut self) {
        tracing::info!("Notification worker started");
        while let Some(notification) = self.receiver.recv().await {
            self.deliver(&notification).await;
        }
        tracing::info!("Notification worker stopped");
    }

    /// Deliver everything queued right now, then return
    pub async fn drain(&mut self) -> Vec<Delivery> {
        let mut results = Vec::new();
        while let Ok(notification) = self.receiver.try_recv() {
            results.push(self.deliver(&notification).await);
        }
        results
    }

    /// Deliver one notification, retrying with exponential backoff
    pub async fn deliver(&mut self, notification: &Notification) -> Delivery {
        if self.delivered.contains(&notification.key, Instant::now()) {
            tracing::debug!(
                entity_id = notification.key.entity_id,
                event = %notification.key.event,
                recipient = notification.key.recipient,
                "Notification already delivered, skipping"
            );
            return Delivery::Duplicate;
        }

        let max_attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.mailer.send(&notification.email).await {
                Ok(()) => {
                    self.delivered.insert(notification.key, Instant::now());
                    metrics::counter!("notifications_delivered_total").increment(1);
                    return Delivery::Sent { attempts: attempt };
                }
                Err(e) if attempt < max_attempts => {
                    let delay = self.policy.backoff(attempt);
                    tracing::warn!(
                        entity_id = notification.key.entity_id,
                        event = %notification.key.event,
                        attempt,
                        ?delay,
                        error = %e,
                        "Notification delivery failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        entity_id = notification.key.entity_id,
                        event = %notification.key.event,
                        recipient = notification.key.recipient,
                        attempts = attempt,
                        error = %e,
                        "Notification delivery failed, giving up"
                    );
                }
            }
        }

        metrics::counter!("notifications_failed_total").increment(1);
        Delivery::Failed {
            attempts: max_attempts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::fake::RecordingMailer;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    fn notification(recipient: UserId) -> Notification {
        Notification {
            key: NotificationKey {
                entity_id: 11,
                event: ClassroomEvent::Accepted,
                recipient,
            },
            email: Email {
                to: format!("user{recipient}@example.com"),
                subject: "Class confirmed".to_string(),
                body: "Hi".to_string(),
            },
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(3), Duration::from_millis(800));
        assert_eq!(policy.backoff(20), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_retries_until_delivered() {
        let mailer = Arc::new(RecordingMailer::failing_first(2));
        let (queue, receiver) = NotificationQueue::channel(8);
        let mut worker = NotificationWorker::new(receiver, mailer.clone(), fast_policy(5));

        queue.enqueue(notification(2));
        let results = worker.drain().await;

        assert_eq!(results, vec![Delivery::Sent { attempts: 3 }]);
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let mailer = Arc::new(RecordingMailer::failing_first(10));
        let mut worker = NotificationWorker::new(
            NotificationQueue::channel(1).1,
            mailer.clone(),
            fast_policy(3),
        );

        let result = worker.deliver(&notification(2)).await;
        assert_eq!(result, Delivery::Failed { attempts: 3 });
        assert_eq!(mailer.attempts(), 3);
        assert!(mailer.sent().is_empty());
    }

    #[tokio::test]
    async fn test_same_key_is_delivered_once() {
        let mailer = Arc::new(RecordingMailer::new());
        let (queue, receiver) = NotificationQueue::channel(8);
        let mut worker = NotificationWorker::new(receiver, mailer.clone(), fast_policy(3));

        queue.enqueue(notification(2));
        queue.enqueue(notification(2));
        queue.enqueue(notification(3));
        let results = worker.drain().await;

        assert_eq!(
            results,
            vec![
                Delivery::Sent { attempts: 1 },
                Delivery::Duplicate,
                Delivery::Sent { attempts: 1 },
            ]
        );
        assert_eq!(mailer.sent().len(), 2);
    }

    #[test]
    fn test_delivered_keys_expire_after_window() {
        let mut delivered = DeliveredKeys::new(Duration::from_secs(60), 100);
        let start = Instant::now();
        let key = notification(2).key;

        delivered.insert(key, start);
        assert!(delivered.contains(&key, start + Duration::from_secs(59)));
        assert!(!delivered.contains(&key, start + Duration::from_secs(60)));
        assert_eq!(delivered.len(), 0);
    }

    #[test]
    fn test_delivered_keys_are_capped() {
        let mut delivered = DeliveredKeys::new(Duration::from_secs(60), 2);
        let now = Instant::now();
        for recipient in 1..=3 {
            delivered.insert(notification(recipient).key, now);
        }

        assert_eq!(delivered.len(), 2);
        assert!(!delivered.contains(&notification(1).key, now));
        assert!(delivered.contains(&notification(3).key, now));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let (queue, mut receiver) = NotificationQueue::channel(1);
        queue.enqueue(notification(2));
        queue.enqueue(notification(3));

        assert!(receiver.try_recv().is_ok());
        assert!(receiver.try_recv().is_err());
    }
}
