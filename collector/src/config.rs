use hostsnap::HostSnapConfig;
use membership::config::Config as MembershipConfig;
use porter::config::PubSubConfig;
use porter::transport::MqttConfig;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Production,
    #[default]
    Development,
    Testing,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Used when `RUST_LOG` is not set.
    pub level: String,
    pub sentry_dsn: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".into(),
            sentry_dsn: None,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    pub prefix: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Base URL of the core service that serves host and audit records.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct InventoryConfig {
    pub url: String,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AnalyzerKind {
    Hostsnap,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct PorterEntry {
    pub name: String,
    pub analyzer: AnalyzerKind,
    pub topics: Vec<String>,
    #[serde(flatten)]
    pub settings: PubSubConfig,
}

impl PorterEntry {
    fn validate(&self) -> Result<(), ValidationError> {
        if self.topics.is_empty() {
            return Err(ValidationError::NoTopics(self.name.clone()));
        }
        if self.settings.queue_size == 0 {
            return Err(ValidationError::EmptyQueue(self.name.clone()));
        }
        if self.settings.workers == Some(0) {
            return Err(ValidationError::NoWorkers(self.name.clone()));
        }

        let fusing = &self.settings.fusing;
        for (field, value) in [
            ("threshold_percent", fusing.threshold_percent),
            ("percent", fusing.percent),
        ] {
            if !(1..=100).contains(&value) {
                return Err(ValidationError::InvalidPercent {
                    porter: self.name.clone(),
                    field,
                });
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub environment: Environment,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub metrics: Option<MetricsConfig>,
    pub admin_listener: Listener,
    /// Only bound outside production.
    pub debug_listener: Option<Listener>,
    pub membership: MembershipConfig,
    pub mqtt: MqttConfig,
    pub inventory: InventoryConfig,
    pub porters: Vec<PorterEntry>,
    #[serde(default)]
    pub hostsnap: HostSnapConfig,
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Reads and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.admin_listener.validate()?;
        if let Some(listener) = &self.debug_listener {
            listener.validate()?;
        }
        if self.mqtt.port == 0 {
            return Err(ValidationError::InvalidPort);
        }

        if self.membership.local_address.trim().is_empty() {
            return Err(ValidationError::EmptyLocalAddress);
        }

        let mut names = HashSet::new();
        for porter in &self.porters {
            if porter.name.is_empty() {
                return Err(ValidationError::EmptyPorterName);
            }
            if !names.insert(&porter.name) {
                return Err(ValidationError::DuplicatePorter(porter.name.clone()));
            }
            porter.validate()?;
        }

        Ok(())
    }

    pub fn debug_listener_enabled(&self) -> bool {
        self.environment != Environment::Production && self.debug_listener.is_some()
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    ValidationError(#[from] ValidationError),
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Empty porter name")]
    EmptyPorterName,

    #[error("Duplicate porter name: {0}")]
    DuplicatePorter(String),

    #[error("Porter {0} has no topics")]
    NoTopics(String),

    #[error("Porter {0} has a zero queue size")]
    EmptyQueue(String),

    #[error("Porter {0} has zero analyze workers")]
    NoWorkers(String),

    #[error("Porter {porter}: fusing {field} must be within 1..=100")]
    InvalidPercent { porter: String, field: &'static str },

    #[error("Empty membership local_address")]
    EmptyLocalAddress,
}
