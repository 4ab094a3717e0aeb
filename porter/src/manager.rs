use crate::Porter;
use crate::errors::PorterError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const HANDOFF_CAPACITY: usize = 16;

struct Registration {
    porter: Arc<dyn Porter>,
    started: oneshot::Sender<bool>,
}

/// Registry of the porters running in this process.
///
/// Registrations are handed to a single coordinating task that owns starting
/// porters, so a porter name is started at most once however many callers
/// race to add it.
#[derive(Clone)]
pub struct PorterManager {
    porters: Arc<RwLock<HashMap<String, Arc<dyn Porter>>>>,
    handoff: mpsc::Sender<Registration>,
}

impl PorterManager {
    /// Returns the manager and the coordinating future. The future must be
    /// spawned; it completes once `shutdown` is cancelled and every started
    /// porter has returned.
    pub fn new(shutdown: CancellationToken) -> (Self, impl Future<Output = ()> + Send + 'static) {
        let porters = Arc::new(RwLock::new(HashMap::new()));
        let (handoff, registrations) = mpsc::channel(HANDOFF_CAPACITY);

        let manager = PorterManager {
            porters: porters.clone(),
            handoff,
        };
        (manager, coordinate(porters, registrations, shutdown))
    }

    /// Registers and starts `porter`. Returns false if a porter with the same
    /// name is already registered, in which case `porter` is dropped.
    pub async fn add_porter(&self, porter: Arc<dyn Porter>) -> Result<bool, PorterError> {
        let (started, result) = oneshot::channel();
        self.handoff
            .send(Registration { porter, started })
            .await
            .map_err(|_| PorterError::ManagerStopped)?;
        result.await.map_err(|_| PorterError::ManagerStopped)
    }

    pub fn porter(&self, name: &str) -> Option<Arc<dyn Porter>> {
        self.porters.read().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.porters.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Runs `message` through the named porter's self-test path.
    pub async fn mock(&self, name: &str, message: &str) -> Result<(), PorterError> {
        let porter = self
            .porter(name)
            .ok_or_else(|| PorterError::UnknownPorter(name.to_string()))?;
        porter.mock(message).await
    }
}

async fn coordinate(
    porters: Arc<RwLock<HashMap<String, Arc<dyn Porter>>>>,
    mut registrations: mpsc::Receiver<Registration>,
    shutdown: CancellationToken,
) {
    let mut running = JoinSet::new();
    let mut accepting = true;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            registration = registrations.recv(), if accepting => {
                let Some(Registration { porter, started }) = registration else {
                    accepting = false;
                    continue;
                };

                let name = porter.name().to_string();
                let is_new = {
                    let mut porters = porters.write();
                    if porters.contains_key(&name) {
                        false
                    } else {
                        porters.insert(name.clone(), porter.clone());
                        true
                    }
                };

                if is_new {
                    tracing::info!(porter = %name, "starting porter");
                    let token = shutdown.clone();
                    running.spawn(async move {
                        porter.run(token).await;
                        name
                    });
                } else {
                    tracing::warn!(porter = %name, "porter already registered");
                }
                let _ = started.send(is_new);
            }
            Some(finished) = running.join_next() => match finished {
                Ok(name) => tracing::warn!(porter = %name, "porter exited"),
                Err(e) => tracing::error!(error = %e, "porter task panicked"),
            },
        }
    }

    registrations.close();
    while let Some(finished) = running.join_next().await {
        if let Err(e) = finished {
            tracing::error!(error = %e, "porter task panicked");
        }
    }
    tracing::info!("porter manager stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::StatsSnapshot;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct IdlePorter {
        name: String,
        runs: Arc<AtomicUsize>,
    }

    impl IdlePorter {
        fn new(name: &str, runs: &Arc<AtomicUsize>) -> Arc<Self> {
            Arc::new(IdlePorter {
                name: name.to_string(),
                runs: runs.clone(),
            })
        }
    }

    #[async_trait]
    impl Porter for IdlePorter {
        fn name(&self) -> &str {
            &self.name
        }

        async fn run(&self, shutdown: CancellationToken) {
            self.runs.fetch_add(1, Ordering::SeqCst);
            shutdown.cancelled().await;
        }

        async fn mock(&self, message: &str) -> Result<(), PorterError> {
            if message == "bad" {
                return Err(PorterError::Analyze(crate::AnalyzeError::MalformedMessage(
                    "bad".into(),
                )));
            }
            Ok(())
        }

        fn stats(&self) -> StatsSnapshot {
            StatsSnapshot::default()
        }
    }

    #[tokio::test]
    async fn add_porter_is_idempotent_by_name() {
        let shutdown = CancellationToken::new();
        let (manager, coordinator) = PorterManager::new(shutdown.clone());
        let coordinator = tokio::spawn(coordinator);

        let runs = Arc::new(AtomicUsize::new(0));
        assert!(manager.add_porter(IdlePorter::new("hostsnap", &runs)).await.unwrap());
        assert!(!manager.add_porter(IdlePorter::new("hostsnap", &runs)).await.unwrap());
        assert!(manager.add_porter(IdlePorter::new("netdevice", &runs)).await.unwrap());

        assert_eq!(manager.names(), vec!["hostsnap", "netdevice"]);
        assert!(manager.porter("hostsnap").is_some());
        assert!(manager.porter("missing").is_none());

        shutdown.cancel();
        coordinator.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_registration_starts_once() {
        let shutdown = CancellationToken::new();
        let (manager, coordinator) = PorterManager::new(shutdown.clone());
        let coordinator = tokio::spawn(coordinator);
        let runs = Arc::new(AtomicUsize::new(0));

        let mut adds = JoinSet::new();
        for _ in 0..20 {
            let manager = manager.clone();
            let porter = IdlePorter::new("hostsnap", &runs);
            adds.spawn(async move { manager.add_porter(porter).await.unwrap() });
        }

        let mut started = 0;
        while let Some(result) = adds.join_next().await {
            if result.unwrap() {
                started += 1;
            }
        }
        assert_eq!(started, 1);

        shutdown.cancel();
        coordinator.await.unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mock_routes_by_name() {
        let shutdown = CancellationToken::new();
        let (manager, coordinator) = PorterManager::new(shutdown.clone());
        let coordinator = tokio::spawn(coordinator);
        let runs = Arc::new(AtomicUsize::new(0));
        manager.add_porter(IdlePorter::new("hostsnap", &runs)).await.unwrap();

        manager.mock("hostsnap", "").await.unwrap();
        assert!(matches!(
            manager.mock("hostsnap", "bad").await,
            Err(PorterError::Analyze(_))
        ));
        assert!(matches!(
            manager.mock("nope", "").await,
            Err(PorterError::UnknownPorter(name)) if name == "nope"
        ));

        shutdown.cancel();
        coordinator.await.unwrap();
    }

    #[tokio::test]
    async fn add_after_shutdown_fails() {
        let shutdown = CancellationToken::new();
        let (manager, coordinator) = PorterManager::new(shutdown.clone());
        shutdown.cancel();
        coordinator.await;

        let runs = Arc::new(AtomicUsize::new(0));
        assert!(matches!(
            manager.add_porter(IdlePorter::new("hostsnap", &runs)).await,
            Err(PorterError::ManagerStopped)
        ));
    }
}
