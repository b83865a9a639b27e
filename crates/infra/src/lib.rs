//! Infrastructure layer: storage, queues, circuit breaking, external services
//! and the message consumer that ties them together.

pub mod circuit_breaker;
pub mod consumer;
pub mod db;
pub mod external;
pub mod notify;
pub mod queue;
pub mod store;
pub mod tracker;

pub use circuit_breaker::{
    BreakerError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry,
    CircuitBreakerStats, CircuitState,
};
pub use consumer::{ConsumerConfig, ContentConsumer, Disposition, OutcomeKind, ProcessOutcome};
pub use notify::{NoopNotifier, Notification, NotificationPublisher, TracingNotifier};
pub use queue::{InMemoryQueue, MessageQueue, QueueError, ReceivedMessage};
pub use store::{InMemoryRequestStore, PostgresRequestStore, RequestStore, StoreError};
pub use tracker::{RequestTracker, TrackingError};
