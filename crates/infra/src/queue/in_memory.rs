//! In-process broker emulation for tests/dev.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::{DEFAULT_MAX_DELIVERY_ATTEMPTS, MessageQueue, QueueError, ReceivedMessage};

#[derive(Debug, Clone)]
struct Entry {
    message_id: String,
    data: Vec<u8>,
    deliveries: u32,
}

/// A message that exhausted its delivery attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeadLetter {
    pub message_id: String,
    pub data: Vec<u8>,
    pub delivery_attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    ready: VecDeque<Entry>,
    in_flight: HashMap<String, Entry>,
    dead_letters: Vec<DeadLetter>,
    acked: usize,
    rejected: usize,
    next_id: u64,
}

/// Nacked messages go back to the tail until `max_delivery_attempts` is
/// reached, then to the dead-letter list.
#[derive(Debug)]
pub struct InMemoryQueue {
    max_delivery_attempts: u32,
    state: Mutex<QueueState>,
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DELIVERY_ATTEMPTS)
    }
}

impl InMemoryQueue {
    pub fn new(max_delivery_attempts: u32) -> Self {
        Self {
            max_delivery_attempts: max_delivery_attempts.max(1),
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn arc(max_delivery_attempts: u32) -> Arc<Self> {
        Arc::new(Self::new(max_delivery_attempts))
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Internal("queue lock poisoned".to_string()))
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().map(|s| s.dead_letters.clone()).unwrap_or_default()
    }

    /// Messages waiting for delivery.
    pub fn ready_len(&self) -> usize {
        self.lock().map(|s| s.ready.len()).unwrap_or(0)
    }

    pub fn in_flight_len(&self) -> usize {
        self.lock().map(|s| s.in_flight.len()).unwrap_or(0)
    }

    pub fn acked(&self) -> usize {
        self.lock().map(|s| s.acked).unwrap_or(0)
    }

    pub fn rejected(&self) -> usize {
        self.lock().map(|s| s.rejected).unwrap_or(0)
    }
}

#[async_trait]
impl MessageQueue for InMemoryQueue {
    async fn pull(&self, max: usize) -> Result<Vec<ReceivedMessage>, QueueError> {
        let mut state = self.lock()?;
        let mut batch = Vec::new();

        while batch.len() < max {
            let Some(mut entry) = state.ready.pop_front() else {
                break;
            };
            entry.deliveries += 1;
            let ack_id = format!("{}:{}", entry.message_id, entry.deliveries);
            batch.push(ReceivedMessage {
                ack_id: ack_id.clone(),
                message_id: entry.message_id.clone(),
                data: entry.data.clone(),
                delivery_attempt: entry.deliveries,
            });
            state.in_flight.insert(ack_id, entry);
        }
        Ok(batch)
    }

    async fn ack(&self, ack_ids: &[String]) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        for id in ack_ids {
            if state.in_flight.remove(id).is_some() {
                state.acked += 1;
            }
        }
        Ok(())
    }

    async fn nack(&self, ack_ids: &[String]) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        for id in ack_ids {
            let Some(entry) = state.in_flight.remove(id) else {
                continue;
            };
            if entry.deliveries >= self.max_delivery_attempts {
                warn!(
                    message_id = %entry.message_id,
                    delivery_attempts = entry.deliveries,
                    "Message sent to dead-letter queue"
                );
                state.dead_letters.push(DeadLetter {
                    message_id: entry.message_id,
                    data: entry.data,
                    delivery_attempts: entry.deliveries,
                    dead_lettered_at: Utc::now(),
                });
            } else {
                debug!(message_id = %entry.message_id, "message requeued");
                state.ready.push_back(entry);
            }
        }
        Ok(())
    }

    async fn reject(&self, ack_ids: &[String]) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        for id in ack_ids {
            if state.in_flight.remove(id).is_some() {
                state.rejected += 1;
            }
        }
        Ok(())
    }

    async fn publish(&self, data: Vec<u8>) -> Result<String, QueueError> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let message_id = state.next_id.to_string();
        state.ready.push_back(Entry {
            message_id: message_id.clone(),
            data,
            deliveries: 0,
        });
        Ok(message_id)
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.lock().map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pull_respects_batch_size_and_order() {
        let q = InMemoryQueue::default();
        for i in 0..3 {
            q.publish(vec![i]).await.unwrap();
        }
        let batch = q.pull(2).await.unwrap();
        assert_eq!(batch.iter().map(|m| m.data[0]).collect::<Vec<_>>(), vec![0, 1]);
        assert!(batch.iter().all(|m| m.delivery_attempt == 1));
        assert_eq!(q.ready_len(), 1);
        assert_eq!(q.in_flight_len(), 2);
    }

    #[tokio::test]
    async fn nack_redelivers_with_incremented_attempt_then_dead_letters() {
        let q = InMemoryQueue::new(2);
        q.publish(b"x".to_vec()).await.unwrap();

        let first = q.pull(1).await.unwrap().remove(0);
        q.nack(&[first.ack_id]).await.unwrap();

        let second = q.pull(1).await.unwrap().remove(0);
        assert_eq!(second.delivery_attempt, 2);
        q.nack(&[second.ack_id]).await.unwrap();

        assert!(q.pull(1).await.unwrap().is_empty());
        let dls = q.dead_letters();
        assert_eq!(dls.len(), 1);
        assert_eq!(dls[0].delivery_attempts, 2);
    }

    #[tokio::test]
    async fn ack_and_reject_settle_for_good() {
        let q = InMemoryQueue::default();
        q.publish(b"a".to_vec()).await.unwrap();
        q.publish(b"b".to_vec()).await.unwrap();
        let batch = q.pull(10).await.unwrap();

        q.ack(&[batch[0].ack_id.clone()]).await.unwrap();
        q.reject(&[batch[1].ack_id.clone()]).await.unwrap();

        assert_eq!((q.acked(), q.rejected()), (1, 1));
        assert_eq!(q.in_flight_len(), 0);
        assert!(q.pull(10).await.unwrap().is_empty());
        assert!(q.dead_letters().is_empty());
    }
}
