use crate::analyzer::{AnalyzeError, Analyzer};
use crate::config::ConsumerGroupConfig;
use crate::errors::PorterError;
use crate::message::{sharding_fields, timestamp, unwrap_payload};
use crate::stats::{PorterStats, StatsSnapshot};
use crate::transport::{ClaimedMessage, PartitionClaim};
use crate::Porter;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Messages collected from one claim within one window.
#[derive(Debug, Default)]
struct Batch {
    // sharding key -> (timestamp, payload)
    latest: HashMap<String, (i64, String)>,
    last_offset: Option<i64>,
    read: usize,
    /// The claim ended while collecting.
    claim_ended: bool,
}

/// Porter for partitioned, replayable transports.
///
/// Each claimed partition is consumed in batches bounded by count and time.
/// Within a batch only the freshest message per sharding key is analyzed.
/// A batch is committed only once no analysis asked for a retry; otherwise the
/// whole batch is analyzed again after a pause. Delivery is at-least-once.
pub struct ConsumerGroupPorter {
    inner: Arc<Inner>,
    claims: Mutex<Option<mpsc::UnboundedReceiver<Box<dyn PartitionClaim>>>>,
}

struct Inner {
    name: String,
    analyzer: Arc<dyn Analyzer>,
    config: ConsumerGroupConfig,
    stats: PorterStats,
}

impl ConsumerGroupPorter {
    /// `claims` delivers partitions as the group assigns them to this member.
    pub fn new(
        name: &str,
        analyzer: Arc<dyn Analyzer>,
        config: ConsumerGroupConfig,
        claims: mpsc::UnboundedReceiver<Box<dyn PartitionClaim>>,
    ) -> Self {
        ConsumerGroupPorter {
            inner: Arc::new(Inner {
                name: name.to_string(),
                analyzer,
                config,
                stats: PorterStats::new(name),
            }),
            claims: Mutex::new(Some(claims)),
        }
    }

    /// Consumes one claim until it ends or `shutdown` is cancelled.
    pub async fn consume_claim(&self, claim: &mut dyn PartitionClaim, shutdown: &CancellationToken) {
        self.inner.consume_claim(claim, shutdown).await
    }
}

#[async_trait]
impl Porter for ConsumerGroupPorter {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn run(&self, shutdown: CancellationToken) {
        let Some(mut claims) = self.claims.lock().await.take() else {
            tracing::warn!(porter = %self.inner.name, "consumer group porter already running");
            return;
        };
        tracing::info!(porter = %self.inner.name, "starting consumer group porter");

        let mut tasks = JoinSet::new();
        loop {
            let claim = tokio::select! {
                _ = shutdown.cancelled() => break,
                claim = claims.recv() => claim,
            };
            let Some(mut claim) = claim else { break };

            let inner = self.inner.clone();
            let shutdown = shutdown.clone();
            tasks.spawn(async move { inner.consume_claim(&mut *claim, &shutdown).await });
        }

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(porter = %self.inner.name, error = %e, "claim task panicked");
            }
        }
        tracing::info!(porter = %self.inner.name, "consumer group porter stopped");
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
    async fn consume_claim(&self, claim: &mut dyn PartitionClaim, shutdown: &CancellationToken) {
        loop {
            let Some(batch) = self.collect_batch(claim, shutdown).await else {
                return;
            };

            let messages: Vec<String> = batch.latest.into_values().map(|(_, m)| m).collect();
            loop {
                if !self.analyze_batch(&messages).await {
                    break;
                }
                tracing::warn!(
                    porter = %self.name,
                    messages = messages.len(),
                    "batch needs retry, offset not committed"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = tokio::time::sleep(self.config.retry_wait()) => {}
                }
            }

            if let Some(offset) = batch.last_offset {
                if let Err(e) = claim.mark(offset).await {
                    tracing::error!(porter = %self.name, offset, error = %e, "commit failed");
                }
            }

            if batch.claim_ended {
                return;
            }
        }
    }

    /// Reads until the batch is full, the window elapses or the claim ends.
    /// Returns None on shutdown or when the claim ended with nothing read.
    async fn collect_batch(
        &self,
        claim: &mut dyn PartitionClaim,
        shutdown: &CancellationToken,
    ) -> Option<Batch> {
        let window = tokio::time::sleep(self.config.batch_window());
        tokio::pin!(window);

        let mut batch = Batch::default();
        while batch.read < self.config.batch_size.max(1) {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return None,
                _ = &mut window => break,
                next = claim.recv() => next,
            };

            match next {
                Some(message) => {
                    batch.read += 1;
                    batch.last_offset = Some(message.offset);
                    self.add_to_batch(&mut batch, message);
                }
                None => {
                    batch.claim_ended = true;
                    break;
                }
            }
        }

        if batch.claim_ended && batch.read == 0 {
            return None;
        }
        Some(batch)
    }

    fn add_to_batch(&self, batch: &mut Batch, message: ClaimedMessage) {
        self.stats.record_received();

        let keyed = unwrap_payload(&message.payload)
            .map_err(|e| AnalyzeError::MalformedMessage(e.to_string()))
            .and_then(|doc| {
                let (cloud_id, ip) = sharding_fields(&doc);
                let key = self.analyzer.hash(&cloud_id, &ip)?;
                Ok((key, timestamp(&doc)))
            });

        let (key, ts) = match keyed {
            Ok(keyed) => keyed,
            Err(e) => {
                tracing::warn!(
                    porter = %self.name,
                    offset = message.offset,
                    error = %e,
                    "skipping invalid message"
                );
                self.stats.record_invalid();
                return;
            }
        };
        self.stats.record_sharded();

        match batch.latest.get(&key) {
            Some((current, _)) if *current > ts => {}
            _ => {
                batch.latest.insert(key, (ts, message.payload));
            }
        }
    }

    /// Analyzes every message with bounded concurrency. Returns true if any
    /// analysis asked for a retry.
    async fn analyze_batch(&self, messages: &[String]) -> bool {
        let permits = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut tasks = JoinSet::new();

        for message in messages {
            let analyzer = self.analyzer.clone();
            let permits = permits.clone();
            let message = message.clone();
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let start = Instant::now();
                let result = analyzer.analyze(&message).await;
                (result, start.elapsed())
            });
        }

        let mut needs_retry = false;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((result, elapsed)) => {
                    self.stats.record_analyze(result.is_ok(), elapsed);
                    if let Err(e) = result {
                        tracing::warn!(
                            porter = %self.name,
                            error = %e,
                            retry = e.needs_retry(),
                            "analyze message failed"
                        );
                        needs_retry |= e.needs_retry();
                    }
                }
                Err(e) => {
                    tracing::error!(porter = %self.name, error = %e, "analyze task panicked");
                }
            }
        }
        needs_retry
    }
}
