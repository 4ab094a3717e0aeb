use crate::config::{Config, LoggingConfig, MetricsConfig};
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics_defs::describe_all;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Installs logging, error reporting and the metrics recorder. The returned
/// guard flushes pending Sentry events when dropped.
pub fn init(config: &Config) -> Option<sentry::ClientInitGuard> {
    let guard = init_sentry(&config.logging);
    init_logging(&config.logging, guard.is_some());

    if let Some(metrics) = &config.metrics {
        init_metrics(metrics);
    }
    describe_all(membership::metrics_defs::ALL_METRICS);
    describe_all(hostsnap::metrics_defs::ALL_METRICS);
    for porter in &config.porters {
        porter::metrics_defs::describe_porter(&porter.name);
    }

    guard
}

fn init_sentry(logging: &LoggingConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = logging.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

fn init_logging(logging: &LoggingConfig, with_sentry: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));
    let sentry_layer = with_sentry.then(sentry::integrations::tracing::layer);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(sentry_layer)
        .init();
}

fn init_metrics(config: &MetricsConfig) {
    let recorder = match StatsdBuilder::from(config.statsd_host.clone(), config.statsd_port)
        .build(config.prefix.as_deref())
    {
        Ok(recorder) => recorder,
        Err(e) => {
            tracing::error!(error = %e, "failed to build statsd recorder, metrics disabled");
            return;
        }
    };

    if let Err(e) = metrics::set_global_recorder(recorder) {
        tracing::error!(error = %e, "metrics recorder already installed");
    }
}
