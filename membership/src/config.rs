use serde::Deserialize;

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum DiscoveryConfig {
    Static { servers: Vec<String> },
    Http { url: String },
}

fn default_refresh_interval_secs() -> u64 {
    3
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    /// Address this process is registered under in discovery.
    pub local_address: String,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    pub discovery: DiscoveryConfig,
}
