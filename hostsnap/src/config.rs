use serde::Deserialize;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct HostSnapConfig {
    /// Maximum number of `cloudid:ip` pairs remembered as unknown.
    pub negative_cache_size: u64,
    pub negative_cache_ttl_secs: u64,
}

impl HostSnapConfig {
    pub fn negative_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.negative_cache_ttl_secs)
    }
}

impl Default for HostSnapConfig {
    fn default() -> Self {
        HostSnapConfig {
            negative_cache_size: 1000,
            negative_cache_ttl_secs: 300,
        }
    }
}
