use crate::Ownership;
use crate::analyzer::{AnalyzeError, Analyzer};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

pub const MOCK_MESSAGE: &str = r#"{"cloudid":0,"ip":"127.0.0.1","data":{}}"#;

/// Records every analyzed message and fails on demand.
#[derive(Default)]
pub struct RecordingAnalyzer {
    calls: Mutex<Vec<String>>,
    // (substring, error, remaining failures)
    failures: Mutex<Vec<(String, AnalyzeError, usize)>>,
}

impl RecordingAnalyzer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fails the next `times` analyses of messages containing `pattern`.
    pub fn fail_when(&self, pattern: &str, error: AnalyzeError, times: usize) {
        self.failures.lock().push((pattern.to_string(), error, times));
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Analyzer for RecordingAnalyzer {
    fn name(&self) -> &str {
        "recording"
    }

    fn hash(&self, cloud_id: &str, ip: &str) -> Result<String, AnalyzeError> {
        if cloud_id.is_empty() || ip.is_empty() {
            return Err(AnalyzeError::InvalidShardingKey(format!(
                "cloudid={cloud_id:?} ip={ip:?}"
            )));
        }
        Ok(format!("{cloud_id}:{ip}"))
    }

    async fn analyze(&self, message: &str) -> Result<(), AnalyzeError> {
        self.calls.lock().push(message.to_string());

        let mut failures = self.failures.lock();
        for (pattern, error, remaining) in failures.iter_mut() {
            if *remaining > 0 && message.contains(pattern.as_str()) {
                *remaining -= 1;
                return Err(error.clone());
            }
        }
        Ok(())
    }

    fn mock(&self) -> String {
        MOCK_MESSAGE.to_string()
    }
}

/// Owns exactly the listed keys.
pub struct OwnKeys(pub HashSet<String>);

impl OwnKeys {
    pub fn new(keys: &[&str]) -> Arc<Self> {
        Arc::new(OwnKeys(keys.iter().map(|k| k.to_string()).collect()))
    }
}

impl Ownership for OwnKeys {
    fn is_owner(&self, key: &str) -> bool {
        self.0.contains(key)
    }
}

pub fn payload(cloud_id: i64, ip: &str, timestamp: i64) -> String {
    serde_json::json!({
        "cloudid": cloud_id,
        "ip": ip,
        "data": {"timestamp": timestamp},
    })
    .to_string()
}

/// Polls `condition` until it holds, panicking after five (virtual) seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..5000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not met in time");
}
