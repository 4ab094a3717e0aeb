use crate::config::HostSnapConfig;
use crate::metrics_defs::{NEGATIVE_CACHE_HIT, NEGATIVE_CACHE_MISS};
use moka::sync::Cache;
use shared::counter;

/// Addresses the inventory recently failed to resolve, keyed `cloudid:ip`.
///
/// A host that keeps reporting an address the inventory does not know is
/// looked up once per TTL instead of once per snapshot. Entries expire after
/// `negative_cache_ttl_secs` and the cache holds at most
/// `negative_cache_size` of them.
pub struct NegativeCache {
    misses: Cache<String, ()>,
}

impl NegativeCache {
    pub fn new(config: &HostSnapConfig) -> Self {
        NegativeCache {
            misses: Cache::builder()
                .max_capacity(config.negative_cache_size)
                .time_to_live(config.negative_cache_ttl())
                .build(),
        }
    }

    pub fn remember_miss(&self, cloud_id: i64, ip: &str) {
        self.misses.insert(miss_key(cloud_id, ip), ());
    }

    /// Whether `ip` in `cloud_id` missed recently. Counts a cache hit or miss.
    pub fn is_known_miss(&self, cloud_id: i64, ip: &str) -> bool {
        let known = self.misses.contains_key(&miss_key(cloud_id, ip));
        if known {
            counter!(NEGATIVE_CACHE_HIT).increment(1);
        } else {
            counter!(NEGATIVE_CACHE_MISS).increment(1);
        }
        known
    }
}

fn miss_key(cloud_id: i64, ip: &str) -> String {
    format!("{cloud_id}:{ip}")
}
