//! Queued notifications for workflow transitions.
//!
//! Managers push [`Notification`]s into a [`NotificationQueue`] after their
//! commit and never wait on delivery. A [`NotificationWorker`] drains the
//! queue with at-least-once delivery: failed sends are retried with
//! exponential backoff, and a delivery key (entity, event, recipient) is
//! only sent once per worker within its dedupe window.

pub mod queue;
pub mod templates;

pub use queue::{
    Delivery, Notification, NotificationKey, NotificationQueue, NotificationWorker, RetryPolicy,
};
pub use templates::{ClassroomEvent, render};
