use serde::Deserialize;
use std::time::Duration;

/// Fusing controller knobs.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct FusingConfig {
    pub check_interval_secs: u64,
    /// Fill percentage that counts as stacked.
    pub threshold_percent: u8,
    /// Share of the stacked messages discarded per fusing round.
    pub percent: u8,
}

impl Default for FusingConfig {
    fn default() -> Self {
        FusingConfig {
            check_interval_secs: 30,
            threshold_percent: 90,
            percent: 50,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct PubSubConfig {
    pub queue_size: usize,
    pub enqueue_timeout_ms: u64,
    pub resubscribe_wait_ms: u64,
    /// Analyze workers. Defaults to the number of available cores.
    pub workers: Option<usize>,
    /// Logs a stats line every `debug_interval_secs` when set.
    pub debug: bool,
    pub debug_interval_secs: u64,
    pub fusing: FusingConfig,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        PubSubConfig {
            queue_size: 5000,
            enqueue_timeout_ms: 1000,
            resubscribe_wait_ms: 1000,
            workers: None,
            debug: false,
            debug_interval_secs: 10,
            fusing: FusingConfig::default(),
        }
    }
}

impl PubSubConfig {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }

    pub fn resubscribe_wait(&self) -> Duration {
        Duration::from_millis(self.resubscribe_wait_ms)
    }

    pub fn worker_count(&self) -> usize {
        self.workers
            .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
            .unwrap_or(1)
            .max(1)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ConsumerGroupConfig {
    pub batch_size: usize,
    pub batch_window_ms: u64,
    pub concurrency: usize,
    pub retry_wait_ms: u64,
}

impl Default for ConsumerGroupConfig {
    fn default() -> Self {
        ConsumerGroupConfig {
            batch_size: 500,
            batch_window_ms: 1000,
            concurrency: 32,
            retry_wait_ms: 1000,
        }
    }
}

impl ConsumerGroupConfig {
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    pub fn retry_wait(&self) -> Duration {
        Duration::from_millis(self.retry_wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pubsub_defaults() {
        let config: PubSubConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, PubSubConfig::default());
        assert_eq!(config.queue_size, 5000);
        assert_eq!(config.enqueue_timeout(), Duration::from_secs(1));
        assert_eq!(config.fusing.threshold_percent, 90);
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn partial_fusing_override() {
        let yaml = r#"
queue_size: 100
workers: 2
fusing:
    percent: 25
"#;
        let config: PubSubConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.queue_size, 100);
        assert_eq!(config.worker_count(), 2);
        assert_eq!(config.fusing.percent, 25);
        assert_eq!(config.fusing.check_interval_secs, 30);
    }

    #[test]
    fn consumer_group_defaults() {
        let config = ConsumerGroupConfig::default();
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.batch_window(), Duration::from_secs(1));
        assert_eq!(config.concurrency, 32);
    }
}
