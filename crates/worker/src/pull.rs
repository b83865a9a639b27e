//! Bounded pull job: drain the queue in batches until the runtime budget is
//! spent or the queue has been idle long enough.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use edugen_infra::{ContentConsumer, Disposition, MessageQueue, OutcomeKind, ReceivedMessage};

use crate::config::PullConfig;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    MaxRuntime,
    IdleTimeout,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub processed: u64,
    pub acked: u64,
    pub nacked: u64,
    pub rejected: u64,
    /// Acked without reprocessing; also counted in `acked`.
    pub duplicates: u64,
    /// Pull or settle calls the queue refused.
    pub queue_errors: u64,
    pub exit_reason: ExitReason,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    processed: u64,
    acked: u64,
    nacked: u64,
    rejected: u64,
    duplicates: u64,
    queue_errors: u64,
}

impl Counters {
    fn finish(self, exit_reason: ExitReason, elapsed: Duration) -> RunSummary {
        RunSummary {
            processed: self.processed,
            acked: self.acked,
            nacked: self.nacked,
            rejected: self.rejected,
            duplicates: self.duplicates,
            queue_errors: self.queue_errors,
            exit_reason,
            elapsed,
        }
    }
}

pub struct PullRunner {
    consumer: ContentConsumer,
    queue: Arc<dyn MessageQueue>,
    config: PullConfig,
}

impl PullRunner {
    pub fn new(consumer: ContentConsumer, queue: Arc<dyn MessageQueue>, config: PullConfig) -> Self {
        Self {
            consumer,
            queue,
            config,
        }
    }

    /// Messages are processed one at a time; the budget is checked between
    /// batches so a started batch is always settled.
    pub async fn run(&self) -> RunSummary {
        let started = Instant::now();
        let mut last_activity = started;
        let mut counters = Counters::default();

        info!(
            batch_size = self.config.batch_size,
            max_runtime_secs = self.config.max_runtime.as_secs(),
            idle_timeout_secs = self.config.idle_timeout.as_secs(),
            "pull worker started"
        );

        let exit_reason = loop {
            if started.elapsed() >= self.config.max_runtime {
                break ExitReason::MaxRuntime;
            }

            let batch = match self.queue.pull(self.config.batch_size).await {
                Ok(batch) => batch,
                Err(err) => {
                    warn!(error = %err, "pull failed");
                    counters.queue_errors += 1;
                    Vec::new()
                }
            };

            if batch.is_empty() {
                if last_activity.elapsed() >= self.config.idle_timeout {
                    break ExitReason::IdleTimeout;
                }
                tokio::time::sleep(self.config.poll_interval).await;
                continue;
            }

            debug!(count = batch.len(), "pulled batch");
            for message in batch {
                self.handle(message, &mut counters).await;
            }
            last_activity = Instant::now();
        };

        let summary = counters.finish(exit_reason, started.elapsed());
        info!(
            processed = summary.processed,
            acked = summary.acked,
            nacked = summary.nacked,
            rejected = summary.rejected,
            duplicates = summary.duplicates,
            queue_errors = summary.queue_errors,
            exit_reason = ?summary.exit_reason,
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "pull worker finished"
        );
        summary
    }

    async fn handle(&self, message: ReceivedMessage, counters: &mut Counters) {
        let outcome = self
            .consumer
            .process(&message.data, message.delivery_attempt)
            .await;
        counters.processed += 1;
        if outcome.kind == OutcomeKind::Duplicate {
            counters.duplicates += 1;
        }

        let ids = [message.ack_id];
        let disposition = outcome.disposition();
        let settled = match disposition {
            Disposition::Ack => {
                counters.acked += 1;
                self.queue.ack(&ids).await
            }
            Disposition::Nack => {
                counters.nacked += 1;
                self.queue.nack(&ids).await
            }
            Disposition::Reject => {
                counters.rejected += 1;
                self.queue.reject(&ids).await
            }
        };

        if let Err(err) = settled {
            // Unsettled messages come back after the broker's redelivery delay.
            warn!(
                message_id = %message.message_id,
                disposition = ?disposition,
                error = %err,
                "failed to settle message"
            );
            counters.queue_errors += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use edugen_ai::{GeneratedContent, GenerationOutcome, ScriptedOrchestrator};
    use edugen_core::RequestId;
    use edugen_infra::InMemoryQueue;

    use super::*;
    use crate::config::WorkerConfig;
    use crate::services::WorkerServices;

    fn payload(id: RequestId) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "request_id": id.to_string(),
            "student_id": "stu-1",
            "student_query": "Why is the sky blue?",
            "grade_level": 6
        }))
        .unwrap()
    }

    fn consumer(orchestrator: ScriptedOrchestrator) -> ContentConsumer {
        WorkerServices::in_memory(Arc::new(orchestrator), &WorkerConfig::default()).consumer
    }

    fn done() -> GenerationOutcome {
        GenerationOutcome::Completed(GeneratedContent {
            video_url: "https://cdn.example/sky.mp4".into(),
            script_text: None,
            thumbnail_url: None,
        })
    }

    fn config() -> PullConfig {
        PullConfig::default()
            .with_idle_timeout(Duration::from_secs(5))
            .with_poll_interval(Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn drains_queue_then_exits_when_idle() {
        let queue = InMemoryQueue::arc(5);
        let first = RequestId::new();
        queue.publish(payload(first)).await.unwrap();
        queue.publish(b"not json".to_vec()).await.unwrap();
        queue.publish(payload(first)).await.unwrap();

        let runner = PullRunner::new(
            consumer(ScriptedOrchestrator::always(done())),
            queue.clone(),
            config(),
        );
        let summary = runner.run().await;

        assert_eq!(summary.exit_reason, ExitReason::IdleTimeout);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.acked, 2);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.rejected, 1);
        assert_eq!(queue.ready_len(), 0);
        assert_eq!(queue.in_flight_len(), 0);
        assert_eq!(queue.rejected(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_message_is_nacked_and_its_redelivery_acked() {
        let queue = InMemoryQueue::arc(5);
        queue.publish(payload(RequestId::new())).await.unwrap();

        let runner = PullRunner::new(
            consumer(ScriptedOrchestrator::failing("render farm down")),
            queue.clone(),
            config().with_batch_size(1),
        );
        let summary = runner.run().await;

        assert_eq!(summary.nacked, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.processed, 2);
        assert!(queue.dead_letters().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_max_runtime() {
        let queue = InMemoryQueue::arc(5);
        let runner = PullRunner::new(
            consumer(ScriptedOrchestrator::always(done())),
            queue,
            config()
                .with_max_runtime(Duration::from_secs(3))
                .with_idle_timeout(Duration::from_secs(60)),
        );

        let summary = runner.run().await;
        assert_eq!(summary.exit_reason, ExitReason::MaxRuntime);
        assert_eq!(summary.processed, 0);
        assert!(summary.elapsed >= Duration::from_secs(3));
    }
}
