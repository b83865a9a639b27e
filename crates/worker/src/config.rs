//! Environment-driven worker configuration.
//!
//! Read once at start-up. Every setting has a default except
//! `ORCHESTRATOR_URL`; malformed values are errors, never silently replaced.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use edugen_infra::CircuitBreakerConfig;
use edugen_infra::consumer::ConsumerConfig;
use edugen_infra::db::PoolConfig;
use edugen_infra::queue::DEFAULT_MAX_DELIVERY_ATTEMPTS;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value '{value}' for {key}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn var(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<String> {
    env(key).filter(|v| !v.trim().is_empty())
}

fn parse_or<T>(
    env: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(env, key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        }),
    }
}

fn secs_or(
    env: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parse_or(env, key, default.as_secs()).map(Duration::from_secs)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// `None` selects the in-memory queue.
    pub redis_url: Option<String>,
    pub stream: Option<String>,
    pub group: Option<String>,
    pub consumer: String,
    pub max_delivery_attempts: u32,
    pub redelivery_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            stream: None,
            group: None,
            consumer: "edugen-worker".to_string(),
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            redelivery_delay: Duration::from_secs(60),
        }
    }
}

/// Settings shared by both worker variants.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// `None` selects the in-memory store.
    pub database: Option<PoolConfig>,
    pub queue: QueueConfig,
    pub orchestrator_url: Option<String>,
    pub breaker: CircuitBreakerConfig,
    pub consumer: ConsumerConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database: None,
            queue: QueueConfig::default(),
            orchestrator_url: None,
            breaker: CircuitBreakerConfig::default(),
            consumer: ConsumerConfig::default(),
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(env: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database = match var(env, "DATABASE_URL") {
            None => None,
            Some(url) => {
                let defaults = PoolConfig::new(url);
                Some(
                    defaults
                        .clone()
                        .with_pool_size(parse_or(env, "DB_POOL_SIZE", defaults.pool_size)?)
                        .with_max_overflow(parse_or(env, "DB_MAX_OVERFLOW", defaults.max_overflow)?)
                        .with_acquire_timeout(secs_or(
                            env,
                            "DB_ACQUIRE_TIMEOUT_SECS",
                            defaults.acquire_timeout,
                        )?),
                )
            }
        };

        let q = QueueConfig::default();
        let queue = QueueConfig {
            redis_url: var(env, "REDIS_URL"),
            stream: var(env, "QUEUE_STREAM"),
            group: var(env, "QUEUE_GROUP"),
            consumer: var(env, "QUEUE_CONSUMER").unwrap_or(q.consumer),
            max_delivery_attempts: parse_or(
                env,
                "QUEUE_MAX_DELIVERY_ATTEMPTS",
                q.max_delivery_attempts,
            )?,
            redelivery_delay: secs_or(env, "QUEUE_REDELIVERY_DELAY_SECS", q.redelivery_delay)?,
        };

        let b = CircuitBreakerConfig::default();
        let breaker = b
            .clone()
            .with_failure_threshold(parse_or(env, "BREAKER_FAILURE_THRESHOLD", b.failure_threshold)?)
            .with_failure_timeout(secs_or(env, "BREAKER_FAILURE_TIMEOUT_SECS", b.failure_timeout)?)
            .with_recovery_timeout(secs_or(env, "BREAKER_RECOVERY_TIMEOUT_SECS", b.recovery_timeout)?)
            .with_success_threshold(parse_or(env, "BREAKER_SUCCESS_THRESHOLD", b.success_threshold)?)
            .with_call_timeout(secs_or(env, "BREAKER_CALL_TIMEOUT_SECS", b.call_timeout)?);

        let c = ConsumerConfig::default();
        let consumer = c.clone().with_poison_warning_threshold(parse_or(
            env,
            "POISON_WARNING_THRESHOLD",
            c.poison_warning_threshold,
        )?);

        Ok(Self {
            database,
            queue,
            orchestrator_url: var(env, "ORCHESTRATOR_URL"),
            breaker,
            consumer,
        })
    }

    pub fn orchestrator_url(&self) -> Result<&str, ConfigError> {
        self.orchestrator_url
            .as_deref()
            .ok_or(ConfigError::Missing("ORCHESTRATOR_URL"))
    }

    pub fn with_database(mut self, database: PoolConfig) -> Self {
        self.database = Some(database);
        self
    }

    pub fn with_orchestrator_url(mut self, url: impl Into<String>) -> Self {
        self.orchestrator_url = Some(url.into());
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }
}

/// Bounded pull job settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullConfig {
    pub batch_size: usize,
    pub max_runtime: Duration,
    pub idle_timeout: Duration,
    pub poll_interval: Duration,
    pub health_port: u16,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_runtime: Duration::from_secs(3300),
            idle_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(1000),
            health_port: 8081,
        }
    }
}

impl PullConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(env: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Self::default();
        let batch_size = parse_or(env, "PULL_BATCH_SIZE", d.batch_size)?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "PULL_BATCH_SIZE",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(Self {
            batch_size,
            max_runtime: secs_or(env, "PULL_MAX_RUNTIME_SECS", d.max_runtime)?,
            idle_timeout: secs_or(env, "PULL_IDLE_TIMEOUT_SECS", d.idle_timeout)?,
            poll_interval: Duration::from_millis(parse_or(
                env,
                "PULL_POLL_INTERVAL_MS",
                d.poll_interval.as_millis() as u64,
            )?),
            health_port: parse_or(env, "HEALTH_PORT", d.health_port)?,
        })
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_runtime(mut self, max_runtime: Duration) -> Self {
        self.max_runtime = max_runtime;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConfig {
    pub port: u16,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

impl PushConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(&process_env)
    }

    pub fn from_lookup(env: &impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        Ok(Self {
            port: parse_or(env, "PORT", Self::default().port)?,
        })
    }
}
