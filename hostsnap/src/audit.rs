use crate::inventory::InventoryError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Before/after record of one host update. `before` and `after` carry only
/// the fields that changed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub resource_type: String,
    pub resource_id: i64,
    pub action: String,
    pub operate_from: String,
    pub operator: String,
    pub biz_id: i64,
    pub before: Map<String, Value>,
    pub after: Map<String, Value>,
}

impl AuditEntry {
    pub fn host_update(
        host_id: i64,
        biz_id: i64,
        before: Map<String, Value>,
        after: Map<String, Value>,
    ) -> Self {
        AuditEntry {
            resource_type: "host".to_string(),
            resource_id: host_id,
            action: "update".to_string(),
            operate_from: "data_collection".to_string(),
            operator: "cc_system".to_string(),
            biz_id,
            before,
            after,
        }
    }
}

/// Append-only audit store.
#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn save(&self, entry: &AuditEntry) -> Result<(), InventoryError>;
}

#[derive(Clone)]
pub struct HttpAuditLog {
    client: reqwest::Client,
    url: String,
}

impl HttpAuditLog {
    pub fn new(base_url: &str) -> Self {
        HttpAuditLog {
            client: reqwest::Client::new(),
            url: format!("{}/audit", base_url.trim_end_matches('/')),
        }
    }
}

#[async_trait]
impl AuditLog for HttpAuditLog {
    async fn save(&self, entry: &AuditEntry) -> Result<(), InventoryError> {
        let response = self.client.post(&self.url).json(entry).send().await?;
        if !response.status().is_success() {
            return Err(InventoryError::Status {
                status: response.status(),
                url: self.url.clone(),
            });
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl AuditLog for MemoryAuditLog {
    async fn save(&self, entry: &AuditEntry) -> Result<(), InventoryError> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}
