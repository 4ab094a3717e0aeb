use crate::config::{AnalyzerKind, Config, Listener};
use hostsnap::{HostSnapAnalyzer, HttpAuditLog, HttpInventory};
use hyper::Request;
use hyper::body::Incoming;
use hyper::service::Service;
use membership::config::DiscoveryConfig;
use membership::{HttpDiscovery, Membership, MembershipError, ServiceDiscovery, StaticDiscovery};
use porter::debug_service::DebugService;
use porter::transport::{MqttSubscriber, Subscriber};
use porter::{Analyzer, Ownership, PorterError, PorterManager, PubSubPorter};
use shared::admin_service::AdminService;
use shared::http::{BoxedResponse, run_http_service};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error("membership: {0}")]
    Membership(#[from] MembershipError),
    #[error("porter: {0}")]
    Porter(#[from] PorterError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn build_discovery(config: &DiscoveryConfig) -> Arc<dyn ServiceDiscovery> {
    match config {
        DiscoveryConfig::Static { servers } => Arc::new(StaticDiscovery::new(servers.clone())),
        DiscoveryConfig::Http { url } => Arc::new(HttpDiscovery::new(url.clone())),
    }
}

fn build_analyzer(kind: AnalyzerKind, config: &Config) -> Arc<dyn Analyzer> {
    match kind {
        AnalyzerKind::Hostsnap => Arc::new(HostSnapAnalyzer::new(
            Arc::new(HttpInventory::new(&config.inventory.url)),
            Arc::new(HttpAuditLog::new(&config.inventory.url)),
            &config.hostsnap,
        )),
    }
}

fn spawn_listener<S>(name: &'static str, listener: Listener, service: S)
where
    S: Service<Request<Incoming>, Response = BoxedResponse, Error = Infallible>
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = run_http_service(&listener.host, listener.port, service).await {
            tracing::error!(listener = name, error = %e, "listener stopped");
        }
    });
}

/// Runs the collector until ctrl-c.
pub async fn run(config: Config) -> Result<(), RunError> {
    let membership = Membership::new(
        &config.membership.local_address,
        build_discovery(&config.membership.discovery),
        Duration::from_secs(config.membership.refresh_interval_secs),
    )?;
    let refresher = membership.spawn_refresher();

    let shutdown = CancellationToken::new();
    let (manager, coordinator) = PorterManager::new(shutdown.clone());
    let coordinator = tokio::spawn(coordinator);

    let subscriber: Arc<dyn Subscriber> = Arc::new(MqttSubscriber::new(config.mqtt.clone()));
    let ownership: Arc<dyn Ownership> = Arc::new(membership.clone());
    for entry in &config.porters {
        let porter = PubSubPorter::new(
            &entry.name,
            build_analyzer(entry.analyzer, &config),
            ownership.clone(),
            subscriber.clone(),
            entry.topics.clone(),
            entry.settings.clone(),
        );
        manager.add_porter(Arc::new(porter)).await?;
    }

    let probe = membership.clone();
    spawn_listener(
        "admin",
        config.admin_listener.clone(),
        AdminService::new(move || probe.is_ready()),
    );

    if config.debug_listener_enabled() {
        if let Some(listener) = config.debug_listener.clone() {
            spawn_listener("debug", listener, DebugService::new(manager.clone()));
        }
    }

    tracing::info!(
        porters = ?manager.names(),
        node = %membership.local_node().hash_value,
        "collector started"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down");

    shutdown.cancel();
    refresher.abort();
    if let Err(e) = coordinator.await {
        tracing::error!(error = %e, "porter manager panicked");
    }
    Ok(())
}
