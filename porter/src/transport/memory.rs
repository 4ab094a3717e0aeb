use super::{ClaimedMessage, PartitionClaim, Subscriber, Subscription, TransportError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use tokio::sync::{broadcast, mpsc};

#[derive(Clone, Debug)]
enum BusEvent {
    Message { topic: String, payload: String },
    Disconnect,
}

/// In-process broadcast bus. Every live subscription sees every message
/// published on one of its topics.
#[derive(Clone)]
pub struct MemoryBus {
    tx: broadcast::Sender<BusEvent>,
    subscribes: Arc<AtomicUsize>,
}

impl MemoryBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        MemoryBus {
            tx,
            subscribes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Publishes to all current subscribers. Returns how many received it.
    pub fn publish(&self, topic: &str, payload: impl Into<String>) -> usize {
        self.tx
            .send(BusEvent::Message {
                topic: topic.to_string(),
                payload: payload.into(),
            })
            .unwrap_or(0)
    }

    /// Fails the next receive on every live subscription.
    pub fn disconnect_all(&self) {
        let _ = self.tx.send(BusEvent::Disconnect);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total successful `subscribe` calls, including resubscribes.
    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Subscriber for MemoryBus {
    async fn subscribe(&self, topics: &[String]) -> Result<Box<dyn Subscription>, TransportError> {
        if topics.is_empty() {
            return Err(TransportError::Subscribe("no topics".into()));
        }
        self.subscribes.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemorySubscription {
            rx: Some(self.tx.subscribe()),
            topics: topics.iter().cloned().collect(),
        }))
    }
}

struct MemorySubscription {
    rx: Option<broadcast::Receiver<BusEvent>>,
    topics: HashSet<String>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn receive(&mut self) -> Result<String, TransportError> {
        let rx = self.rx.as_mut().ok_or(TransportError::Closed)?;
        loop {
            match rx.recv().await {
                Ok(BusEvent::Message { topic, payload }) if self.topics.contains(&topic) => {
                    return Ok(payload);
                }
                Ok(BusEvent::Message { .. }) => continue,
                Ok(BusEvent::Disconnect) => {
                    return Err(TransportError::Connection("bus disconnected".into()));
                }
                Err(broadcast::error::RecvError::Lagged(n)) => return Err(TransportError::Lagged(n)),
                Err(broadcast::error::RecvError::Closed) => return Err(TransportError::Closed),
            }
        }
    }

    async fn unsubscribe(&mut self) -> Result<(), TransportError> {
        self.topics.clear();
        Ok(())
    }

    async fn close(&mut self) {
        self.rx = None;
    }
}

/// In-process partition with a single claim. Offsets start at 0.
pub struct MemoryPartition {
    tx: Mutex<Option<mpsc::UnboundedSender<ClaimedMessage>>>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<ClaimedMessage>>>,
    next_offset: AtomicI64,
    marks: Arc<Mutex<Vec<i64>>>,
}

impl Default for MemoryPartition {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryPartition {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        MemoryPartition {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
            next_offset: AtomicI64::new(0),
            marks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Appends a message and returns its offset, or None once revoked.
    pub fn push(&self, payload: impl Into<String>) -> Option<i64> {
        let tx = self.tx.lock();
        let tx = tx.as_ref()?;
        let offset = self.next_offset.fetch_add(1, Ordering::Relaxed);
        tx.send(ClaimedMessage {
            offset,
            payload: payload.into(),
        })
        .ok()?;
        Some(offset)
    }

    /// Hands out the claim. Only the first call returns one.
    pub fn claim(&self) -> Option<MemoryClaim> {
        let rx = self.rx.lock().take()?;
        Some(MemoryClaim {
            rx,
            marks: self.marks.clone(),
        })
    }

    /// Ends the claim once already pushed messages are drained.
    pub fn revoke(&self) {
        self.tx.lock().take();
    }

    /// Every offset passed to `mark`, in call order.
    pub fn marks(&self) -> Vec<i64> {
        self.marks.lock().clone()
    }

    pub fn committed(&self) -> Option<i64> {
        self.marks.lock().last().copied()
    }
}

pub struct MemoryClaim {
    rx: mpsc::UnboundedReceiver<ClaimedMessage>,
    marks: Arc<Mutex<Vec<i64>>>,
}

#[async_trait]
impl PartitionClaim for MemoryClaim {
    async fn recv(&mut self) -> Option<ClaimedMessage> {
        self.rx.recv().await
    }

    async fn mark(&mut self, offset: i64) -> Result<(), TransportError> {
        self.marks.lock().push(offset);
        Ok(())
    }
}
