use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Hard ceiling on concurrent batches regardless of configuration.
pub const MAX_CONCURRENT_BATCHES: usize = 16;

/// Batching parameters for one migration run. Selected once at start time and
/// never mutated while the run is in progress. Fields omitted from a config
/// file fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub concurrent_batches: usize,
    pub streaming: bool,
    pub advanced_concurrency: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 200,
            concurrent_batches: 4,
            streaming: false,
            advanced_concurrency: false,
        }
    }
}

impl BatchConfig {
    /// Preset for large runs against destinations with generous rate limits.
    pub fn high_performance() -> Self {
        Self {
            batch_size: 500,
            concurrent_batches: 8,
            streaming: true,
            advanced_concurrency: true,
        }
    }

    /// Concurrency clamped to the hard ceiling and never zero.
    pub fn effective_concurrency(&self) -> usize {
        self.concurrent_batches.clamp(1, MAX_CONCURRENT_BATCHES)
    }

    pub fn effective_batch_size(&self) -> usize {
        self.batch_size.max(1)
    }
}

/// Retry/backoff parameters applied to retryable connector failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts for a retryable operation, first try included.
    pub max_attempts: u32,
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

/// Complete configuration for one migration run, passed into the orchestrator
/// at start. There is deliberately no global instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
