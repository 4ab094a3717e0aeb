//! Host inventory collaborator.
//!
//! The analyzer never touches storage directly. It looks hosts up, reads
//! them back and writes selective updates through [`Inventory`].

use async_trait::async_trait;
use parking_lot::Mutex;
use porter::AnalyzeError;
use porter::message::scalar_string;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

pub const HOST_ID_FIELD: &str = "bk_host_id";
pub const CLOUD_ID_FIELD: &str = "bk_cloud_id";
pub const INNER_IP_FIELD: &str = "bk_host_innerip";
pub const OUTER_IP_FIELD: &str = "bk_host_outerip";

#[derive(Error, Debug)]
pub enum InventoryError {
    #[error("HTTP client error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("unexpected status {status} from {url}")]
    Status { status: StatusCode, url: String },

    #[error("inventory unavailable: {0}")]
    Unavailable(String),
}

impl From<InventoryError> for AnalyzeError {
    fn from(err: InventoryError) -> Self {
        AnalyzeError::Collaborator(err.to_string())
    }
}

/// A stored host record: a flat field map keyed by inventory field name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Host(pub Map<String, Value>);

impl Host {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Positive host id, if the record carries one.
    pub fn id(&self) -> Option<i64> {
        scalar_string(self.get(HOST_ID_FIELD))
            .parse()
            .ok()
            .filter(|id| *id > 0)
    }

    pub fn cloud_id(&self) -> i64 {
        scalar_string(self.get(CLOUD_ID_FIELD)).parse().unwrap_or(0)
    }

    pub fn inner_ips(&self) -> Vec<String> {
        split_ips(self.get(INNER_IP_FIELD))
    }

    pub fn outer_ips(&self) -> Vec<String> {
        split_ips(self.get(OUTER_IP_FIELD))
    }
}

fn split_ips(value: Option<&Value>) -> Vec<String> {
    scalar_string(value)
        .split(',')
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .map(String::from)
        .collect()
}

/// Business topology a host belongs to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostRelation {
    pub bk_biz_id: i64,
    #[serde(default)]
    pub bk_set_id: i64,
    #[serde(default)]
    pub bk_module_id: i64,
}

#[async_trait]
pub trait Inventory: Send + Sync {
    /// Host whose inner IP list contains `ip` in cloud area `cloud_id`.
    async fn search_host_by_inner_ip(
        &self,
        cloud_id: i64,
        ip: &str,
    ) -> Result<Option<Host>, InventoryError>;

    async fn get_host(&self, host_id: i64) -> Result<Option<Host>, InventoryError>;

    /// Overwrites only the given fields.
    async fn update_host(&self, host_id: i64, fields: &Map<String, Value>)
    -> Result<(), InventoryError>;

    async fn host_relation(&self, host_id: i64) -> Result<Option<HostRelation>, InventoryError>;
}

/// Inventory backed by the core service's host API.
#[derive(Clone)]
pub struct HttpInventory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpInventory {
    pub fn new(base_url: &str) -> Self {
        HttpInventory {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get_optional<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        url: String,
    ) -> Result<Option<T>, InventoryError> {
        let response = request.send().await?;
        match response.status() {
            StatusCode::OK => Ok(Some(response.json::<T>().await?)),
            StatusCode::NOT_FOUND => Ok(None),
            status => Err(InventoryError::Status { status, url }),
        }
    }
}

#[async_trait]
impl Inventory for HttpInventory {
    async fn search_host_by_inner_ip(
        &self,
        cloud_id: i64,
        ip: &str,
    ) -> Result<Option<Host>, InventoryError> {
        let url = format!("{}/hosts", self.base_url);
        let cloud_id = cloud_id.to_string();
        let request = self
            .client
            .get(&url)
            .query(&[("bk_cloud_id", cloud_id.as_str()), ("ip", ip)]);
        self.get_optional(request, url).await
    }

    async fn get_host(&self, host_id: i64) -> Result<Option<Host>, InventoryError> {
        let url = format!("{}/hosts/{host_id}", self.base_url);
        let request = self.client.get(&url);
        self.get_optional(request, url).await
    }

    async fn update_host(
        &self,
        host_id: i64,
        fields: &Map<String, Value>,
    ) -> Result<(), InventoryError> {
        let url = format!("{}/hosts/{host_id}", self.base_url);
        let response = self.client.put(&url).json(fields).send().await?;
        if !response.status().is_success() {
            return Err(InventoryError::Status {
                status: response.status(),
                url,
            });
        }
        Ok(())
    }

    async fn host_relation(&self, host_id: i64) -> Result<Option<HostRelation>, InventoryError> {
        let url = format!("{}/hosts/{host_id}/relation", self.base_url);
        let request = self.client.get(&url);
        self.get_optional(request, url).await
    }
}

/// In-process inventory for local runs and tests.
#[derive(Default)]
pub struct MemoryInventory {
    hosts: Mutex<HashMap<i64, Host>>,
    relations: Mutex<HashMap<i64, HostRelation>>,
    updates: Mutex<Vec<(i64, Map<String, Value>)>>,
    searches: AtomicUsize,
    failing_updates: AtomicUsize,
}

impl MemoryInventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `host`, which must carry a positive `bk_host_id`.
    pub fn insert_host(&self, host: Host) -> Option<i64> {
        let id = host.id()?;
        self.hosts.lock().insert(id, host);
        Some(id)
    }

    pub fn set_relation(&self, host_id: i64, relation: HostRelation) {
        self.relations.lock().insert(host_id, relation);
    }

    /// Makes the next `times` updates fail.
    pub fn fail_updates(&self, times: usize) {
        self.failing_updates.store(times, Ordering::SeqCst);
    }

    pub fn host(&self, host_id: i64) -> Option<Host> {
        self.hosts.lock().get(&host_id).cloned()
    }

    pub fn updates(&self) -> Vec<(i64, Map<String, Value>)> {
        self.updates.lock().clone()
    }

    pub fn search_count(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Inventory for MemoryInventory {
    async fn search_host_by_inner_ip(
        &self,
        cloud_id: i64,
        ip: &str,
    ) -> Result<Option<Host>, InventoryError> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let hosts = self.hosts.lock();
        Ok(hosts
            .values()
            .find(|host| host.cloud_id() == cloud_id && host.inner_ips().iter().any(|i| i == ip))
            .cloned())
    }

    async fn get_host(&self, host_id: i64) -> Result<Option<Host>, InventoryError> {
        Ok(self.host(host_id))
    }

    async fn update_host(
        &self,
        host_id: i64,
        fields: &Map<String, Value>,
    ) -> Result<(), InventoryError> {
        let failing = self
            .failing_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(InventoryError::Unavailable(format!("update of host {host_id}")));
        }

        let mut hosts = self.hosts.lock();
        let host = hosts
            .get_mut(&host_id)
            .ok_or_else(|| InventoryError::Unavailable(format!("host {host_id} does not exist")))?;
        for (field, value) in fields {
            host.0.insert(field.clone(), value.clone());
        }
        self.updates.lock().push((host_id, fields.clone()));
        Ok(())
    }

    async fn host_relation(&self, host_id: i64) -> Result<Option<HostRelation>, InventoryError> {
        Ok(self.relations.lock().get(&host_id).copied())
    }
}
