//! At-least-once message queue adapters.
//!
//! The consumer only sees [`MessageQueue`]: pull a batch, then settle each
//! message with `ack` (done), `nack` (redeliver later) or `reject` (drop, never
//! retried). Dead-lettering after too many deliveries is the broker's job.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_streams;

pub use in_memory::{DeadLetter, InMemoryQueue};
#[cfg(feature = "redis")]
pub use redis_streams::RedisStreamsQueue;

/// Default delivery attempts before a message is dead-lettered.
pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 5;

/// A delivered message awaiting settlement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Handle used to settle this delivery.
    pub ack_id: String,
    pub message_id: String,
    pub data: Vec<u8>,
    /// 1 on first delivery.
    pub delivery_attempt: u32,
}

#[derive(Debug, Clone, Error)]
pub enum QueueError {
    #[error("queue connection error: {0}")]
    Connection(String),

    #[error("queue command error: {0}")]
    Command(String),

    #[error("queue error: {0}")]
    Internal(String),
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Up to `max` messages; empty when nothing is available.
    async fn pull(&self, max: usize) -> Result<Vec<ReceivedMessage>, QueueError>;

    async fn ack(&self, ack_ids: &[String]) -> Result<(), QueueError>;

    async fn nack(&self, ack_ids: &[String]) -> Result<(), QueueError>;

    async fn reject(&self, ack_ids: &[String]) -> Result<(), QueueError>;

    /// Returns the new message id.
    async fn publish(&self, data: Vec<u8>) -> Result<String, QueueError>;

    async fn ping(&self) -> Result<(), QueueError>;
}

#[async_trait]
impl<Q> MessageQueue for Arc<Q>
where
    Q: MessageQueue + ?Sized,
{
    async fn pull(&self, max: usize) -> Result<Vec<ReceivedMessage>, QueueError> {
        (**self).pull(max).await
    }

    async fn ack(&self, ack_ids: &[String]) -> Result<(), QueueError> {
        (**self).ack(ack_ids).await
    }

    async fn nack(&self, ack_ids: &[String]) -> Result<(), QueueError> {
        (**self).nack(ack_ids).await
    }

    async fn reject(&self, ack_ids: &[String]) -> Result<(), QueueError> {
        (**self).reject(ack_ids).await
    }

    async fn publish(&self, data: Vec<u8>) -> Result<String, QueueError> {
        (**self).publish(data).await
    }

    async fn ping(&self) -> Result<(), QueueError> {
        (**self).ping().await
    }
}
