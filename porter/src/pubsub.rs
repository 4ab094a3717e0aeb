use crate::analyzer::{AnalyzeError, Analyzer};
use crate::config::PubSubConfig;
use crate::errors::PorterError;
use crate::message::{sharding_fields, unwrap_payload};
use crate::stats::{PorterStats, StatsSnapshot};
use crate::transport::Subscriber;
use crate::{Ownership, Porter};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Result of one fusing check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusingDecision {
    BelowThreshold,
    /// Over the threshold for the first time in a row; nothing dropped yet.
    Stacked,
    /// Over the threshold twice in a row; this many messages were dropped.
    Fused(usize),
}

/// Porter for broadcast transports.
///
/// Every collector process receives every message. Messages whose sharding
/// key is owned by another node are dropped before queueing. Owned messages
/// go through a bounded queue drained by a fixed pool of analyze workers.
/// Delivery is at-most-once: analyze failures are logged and counted, never
/// retried.
#[derive(Clone)]
pub struct PubSubPorter {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    analyzer: Arc<dyn Analyzer>,
    ownership: Arc<dyn Ownership>,
    subscriber: Arc<dyn Subscriber>,
    topics: Vec<String>,
    config: PubSubConfig,
    capacity: usize,
    queue_tx: flume::Sender<String>,
    queue_rx: flume::Receiver<String>,
    stats: PorterStats,
}

impl PubSubPorter {
    pub fn new(
        name: &str,
        analyzer: Arc<dyn Analyzer>,
        ownership: Arc<dyn Ownership>,
        subscriber: Arc<dyn Subscriber>,
        topics: Vec<String>,
        config: PubSubConfig,
    ) -> Self {
        let capacity = config.queue_size.max(1);
        let (queue_tx, queue_rx) = flume::bounded(capacity);

        PubSubPorter {
            inner: Arc::new(Inner {
                name: name.to_string(),
                analyzer,
                ownership,
                subscriber,
                topics,
                config,
                capacity,
                queue_tx,
                queue_rx,
                stats: PorterStats::new(name),
            }),
        }
    }

    /// Queues a message for the analyze workers, waiting at most the
    /// configured enqueue timeout for room.
    pub async fn add_message(&self, message: String) -> Result<(), PorterError> {
        self.inner.add_message(message).await
    }

    pub fn queue_len(&self) -> usize {
        self.inner.queue_rx.len()
    }

    /// Runs one fusing check against the current queue.
    pub fn fuse(&self, stacked_in_last_check: bool) -> FusingDecision {
        self.inner.fuse(stacked_in_last_check)
    }
}

#[async_trait]
impl Porter for PubSubPorter {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn run(&self, shutdown: CancellationToken) {
        let workers = self.inner.config.worker_count();
        tracing::info!(
            porter = %self.inner.name,
            analyzer = %self.inner.analyzer.name(),
            workers,
            topics = ?self.inner.topics,
            "starting pub/sub porter"
        );

        let mut tasks = JoinSet::new();
        for worker in 0..workers {
            let inner = self.inner.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move { inner.analyze_loop(worker, shutdown).await });
        }

        let inner = self.inner.clone();
        let token = shutdown.clone();
        tasks.spawn(async move { inner.fusing_loop(token).await });

        if self.inner.config.debug {
            let inner = self.inner.clone();
            let token = shutdown.clone();
            tasks.spawn(async move { inner.debug_loop(token).await });
        }

        self.inner.collect_loop(&shutdown).await;

        tasks.shutdown().await;
        tracing::info!(porter = %self.inner.name, "pub/sub porter stopped");
    }

    async fn mock(&self, message: &str) -> Result<(), PorterError> {
        let message = if message.trim().is_empty() {
            self.inner.analyzer.mock()
        } else {
            message.to_string()
        };
        self.inner.analyzer.analyze(&message).await?;
        Ok(())
    }

    fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }
}

impl Inner {
    async fn add_message(&self, message: String) -> Result<(), PorterError> {
        let sent = tokio::time::timeout(
            self.config.enqueue_timeout(),
            self.queue_tx.send_async(message),
        )
        .await;

        match sent {
            Ok(Ok(())) => {
                self.stats.set_queue_len(self.queue_rx.len());
                Ok(())
            }
            Ok(Err(_)) => Err(PorterError::QueueClosed),
            Err(_) => Err(PorterError::QueueTimeout),
        }
    }

    fn sharding_key(&self, payload: &str) -> Result<String, AnalyzeError> {
        let doc =
            unwrap_payload(payload).map_err(|e| AnalyzeError::MalformedMessage(e.to_string()))?;
        let (cloud_id, ip) = sharding_fields(&doc);
        self.analyzer.hash(&cloud_id, &ip)
    }

    async fn handle_message(&self, payload: String) {
        self.stats.record_received();

        if payload.is_empty() {
            tracing::warn!(porter = %self.name, "received a message with empty payload");
            self.stats.record_invalid();
            return;
        }

        let key = match self.sharding_key(&payload) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(porter = %self.name, error = %e, "cannot compute sharding key");
                self.stats.record_invalid();
                return;
            }
        };

        if !self.ownership.is_owner(&key) {
            return;
        }
        self.stats.record_sharded();

        if let Err(e) = self.add_message(payload).await {
            tracing::warn!(porter = %self.name, key = %key, error = %e, "dropping message");
            self.stats.record_timeout();
        }
    }

    async fn collect_loop(&self, shutdown: &CancellationToken) {
        loop {
            match self.subscriber.subscribe(&self.topics).await {
                Ok(mut subscription) => {
                    tracing::info!(porter = %self.name, topics = ?self.topics, "subscribed");
                    loop {
                        let received = tokio::select! {
                            _ = shutdown.cancelled() => None,
                            received = subscription.receive() => Some(received),
                        };

                        match received {
                            None => {
                                let _ = subscription.unsubscribe().await;
                                subscription.close().await;
                                return;
                            }
                            Some(Ok(payload)) => self.handle_message(payload).await,
                            Some(Err(e)) => {
                                tracing::error!(
                                    porter = %self.name,
                                    topics = ?self.topics,
                                    error = %e,
                                    "receive failed, resubscribing"
                                );
                                if let Err(e) = subscription.unsubscribe().await {
                                    tracing::debug!(porter = %self.name, error = %e, "unsubscribe failed");
                                }
                                subscription.close().await;
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!(porter = %self.name, error = %e, "subscribe failed");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(self.config.resubscribe_wait()) => {}
            }
        }
    }

    async fn analyze_loop(&self, worker: usize, shutdown: CancellationToken) {
        tracing::debug!(porter = %self.name, worker, "analyze worker started");
        loop {
            let message = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                message = self.queue_rx.recv_async() => match message {
                    Ok(message) => message,
                    Err(_) => return,
                },
            };
            self.stats.set_queue_len(self.queue_rx.len());

            let start = Instant::now();
            let result = self.analyzer.analyze(&message).await;
            if let Err(e) = &result {
                tracing::warn!(porter = %self.name, error = %e, "analyze message failed");
            }
            self.stats.record_analyze(result.is_ok(), start.elapsed());
        }
    }

    fn fuse(&self, stacked_in_last_check: bool) -> FusingDecision {
        let stacked = self.queue_rx.len();
        let percent = stacked * 100 / self.capacity;
        let fusing = &self.config.fusing;

        if percent < usize::from(fusing.threshold_percent) {
            return FusingDecision::BelowThreshold;
        }

        if !stacked_in_last_check {
            tracing::info!(
                porter = %self.name,
                percent,
                threshold = fusing.threshold_percent,
                "analyze queue over threshold"
            );
            return FusingDecision::Stacked;
        }

        let max = (stacked * usize::from(fusing.percent) / 100).max(1);
        let mut fused = 0;
        while fused < max {
            if self.queue_rx.try_recv().is_err() {
                break;
            }
            fused += 1;
        }

        self.stats.record_fused(fused as u64);
        self.stats.set_queue_len(self.queue_rx.len());
        tracing::warn!(
            porter = %self.name,
            stacked,
            capacity = self.capacity,
            fused,
            "fused stacked analyze queue"
        );
        FusingDecision::Fused(fused)
    }

    async fn fusing_loop(&self, shutdown: CancellationToken) {
        let period = Duration::from_secs(self.config.fusing.check_interval_secs.max(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut stacked_in_last_check = false;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            stacked_in_last_check = self.fuse(stacked_in_last_check) == FusingDecision::Stacked;
        }
    }

    async fn debug_loop(&self, shutdown: CancellationToken) {
        let period = Duration::from_secs(self.config.debug_interval_secs.max(1));
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let stats = self.stats.snapshot();
            tracing::info!(
                porter = %self.name,
                queue = self.queue_rx.len(),
                received = stats.received,
                invalid = stats.invalid,
                sharded = stats.sharded,
                timed_out = stats.timed_out,
                analyze_failed = stats.analyze_failed,
                analyze_success = stats.analyze_success,
                analyze_mean_secs = stats.mean_analyze_seconds(),
                fused = stats.fused,
                "porter stats"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutils::{OwnKeys, RecordingAnalyzer, payload, wait_until};
    use crate::transport::MemoryBus;

    const TOPIC: &str = "snapshot";

    fn config(queue_size: usize) -> PubSubConfig {
        PubSubConfig {
            queue_size,
            workers: Some(2),
            ..Default::default()
        }
    }

    fn porter(
        analyzer: Arc<RecordingAnalyzer>,
        ownership: Arc<OwnKeys>,
        bus: &MemoryBus,
        config: PubSubConfig,
    ) -> PubSubPorter {
        PubSubPorter::new(
            "hostsnap",
            analyzer,
            ownership,
            Arc::new(bus.clone()),
            vec![TOPIC.to_string()],
            config,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn analyzes_only_owned_messages() {
        let analyzer = RecordingAnalyzer::new();
        let bus = MemoryBus::new(64);
        let porter = porter(
            analyzer.clone(),
            OwnKeys::new(&["0:10.0.0.5"]),
            &bus,
            config(16),
        );

        let shutdown = CancellationToken::new();
        let task = {
            let porter = porter.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { porter.run(shutdown).await })
        };
        wait_until(|| bus.subscriber_count() == 1).await;

        bus.publish(TOPIC, payload(0, "10.0.0.5", 1));
        bus.publish(TOPIC, payload(0, "10.0.0.6", 1));
        bus.publish(TOPIC, "");
        bus.publish(TOPIC, r#"{"cloudid": 0}"#);
        bus.publish(TOPIC, "garbage");

        wait_until(|| porter.stats().received == 5).await;
        wait_until(|| analyzer.call_count() == 1).await;

        let stats = porter.stats();
        assert_eq!(stats.invalid, 3);
        assert_eq!(stats.sharded, 1);
        assert_eq!(stats.timed_out, 0);
        assert!(analyzer.calls()[0].contains("10.0.0.5"));

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn enqueue_times_out_on_full_queue() {
        let bus = MemoryBus::new(4);
        let porter = porter(
            RecordingAnalyzer::new(),
            OwnKeys::new(&[]),
            &bus,
            config(1),
        );

        porter.add_message("first".into()).await.unwrap();

        let start = tokio::time::Instant::now();
        let err = porter.add_message("second".into()).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, PorterError::QueueTimeout));
        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_millis(1100));
        assert_eq!(porter.queue_len(), 1);
    }

    #[tokio::test]
    async fn fusing_needs_two_consecutive_checks() {
        let bus = MemoryBus::new(4);
        let porter = porter(
            RecordingAnalyzer::new(),
            OwnKeys::new(&[]),
            &bus,
            config(10),
        );

        assert_eq!(porter.fuse(false), FusingDecision::BelowThreshold);
        for i in 0..10 {
            porter.add_message(format!("m{i}")).await.unwrap();
        }

        assert_eq!(porter.fuse(false), FusingDecision::Stacked);
        assert_eq!(porter.queue_len(), 10);

        assert_eq!(porter.fuse(true), FusingDecision::Fused(5));
        assert_eq!(porter.queue_len(), 5);
        assert_eq!(porter.stats().fused, 5);

        // Half full is below the threshold again.
        assert_eq!(porter.fuse(false), FusingDecision::BelowThreshold);
    }

    #[tokio::test(start_paused = true)]
    async fn fusing_loop_drains_stacked_queue() {
        let bus = MemoryBus::new(4);
        let mut config = config(10);
        config.workers = Some(1);
        let porter = porter(RecordingAnalyzer::new(), OwnKeys::new(&[]), &bus, config);

        for i in 0..10 {
            porter.add_message(format!("m{i}")).await.unwrap();
        }

        // No workers: drive only the fusing loop.
        let shutdown = CancellationToken::new();
        let inner = porter.inner.clone();
        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { inner.fusing_loop(shutdown).await })
        };

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(porter.queue_len(), 10);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(porter.queue_len(), 5);

        // A drain resets the stacked state: refilled, the next check only
        // marks the queue stacked again.
        for i in 0..5 {
            porter.add_message(format!("r{i}")).await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(porter.queue_len(), 10);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(porter.queue_len(), 5);
        assert_eq!(porter.stats().fused, 10);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribes_after_transport_error() {
        let analyzer = RecordingAnalyzer::new();
        let bus = MemoryBus::new(64);
        let porter = porter(
            analyzer.clone(),
            OwnKeys::new(&["0:10.0.0.5"]),
            &bus,
            config(16),
        );

        let shutdown = CancellationToken::new();
        let task = {
            let porter = porter.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { porter.run(shutdown).await })
        };
        wait_until(|| bus.subscribe_count() == 1 && bus.subscriber_count() == 1).await;

        bus.disconnect_all();
        wait_until(|| bus.subscribe_count() == 2 && bus.subscriber_count() == 1).await;

        bus.publish(TOPIC, payload(0, "10.0.0.5", 2));
        wait_until(|| analyzer.call_count() == 1).await;

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn analyze_failures_are_not_retried() {
        let analyzer = RecordingAnalyzer::new();
        analyzer.fail_when("10.0.0.5", AnalyzeError::Collaborator("down".into()), 10);
        let bus = MemoryBus::new(64);
        let porter = porter(
            analyzer.clone(),
            OwnKeys::new(&["0:10.0.0.5"]),
            &bus,
            config(16),
        );

        let shutdown = CancellationToken::new();
        let task = {
            let porter = porter.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { porter.run(shutdown).await })
        };
        wait_until(|| bus.subscriber_count() == 1).await;

        bus.publish(TOPIC, payload(0, "10.0.0.5", 1));
        wait_until(|| porter.stats().analyze_failed == 1).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(analyzer.call_count(), 1);
        assert_eq!(porter.stats().analyze_success, 0);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn mock_runs_analyzer_inline() {
        let analyzer = RecordingAnalyzer::new();
        let bus = MemoryBus::new(4);
        let porter = porter(analyzer.clone(), OwnKeys::new(&[]), &bus, config(4));

        porter.mock("").await.unwrap();
        assert_eq!(analyzer.calls(), vec![analyzer.mock()]);

        analyzer.fail_when("bad", AnalyzeError::MalformedMessage("bad".into()), 1);
        let err = porter.mock("bad").await.unwrap_err();
        assert!(matches!(err, PorterError::Analyze(AnalyzeError::MalformedMessage(_))));
        assert_eq!(porter.queue_len(), 0);
    }
}
