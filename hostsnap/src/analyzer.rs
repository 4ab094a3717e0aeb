use crate::audit::{AuditEntry, AuditLog};
use crate::config::HostSnapConfig;
use crate::diff::{FieldChanges, diff};
use crate::inventory::{HOST_ID_FIELD, Host, INNER_IP_FIELD, Inventory, InventoryError};
use crate::metrics_defs::{HOST_NOT_FOUND, HOST_UNCHANGED, HOST_UPDATED};
use crate::negative_cache::NegativeCache;
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use porter::{AnalyzeError, Analyzer};
use serde_json::{Map, Value};
use shared::counter;
use std::sync::Arc;

/// A legacy-dialect snapshot wrapped in the collector envelope.
pub const MOCK_MESSAGE: &str = concat!(
    r#"{"localTime":"2017-09-19 16:57:00","data":"{\"ip\":\"192.168.1.7\",\"bizid\":0,"#,
    r#"\"cloudid\":0,\"data\":{\"timezone\":8,\"datetime\":\"2017-09-19 16:57:07\","#,
    r#"\"cpu\":{\"cpuinfo\":[{\"cpu\":0,\"vendorID\":\"GenuineIntel\",\"cores\":1,"#,
    r#"\"modelName\":\"Intel(R) Xeon(R) CPU E5-26xx v3\",\"mhz\":2294.01}]},\"disk\":{\"usage\":[{\"path\":\"/\","#,
    r#"\"fstype\":\"ext3\",\"total\":52843638784}]},\"mem\":{\"meminfo\":{\"total\":1044832256}},"#,
    r#"\"net\":{\"interface\":[{\"name\":\"lo\",\"hardwareaddr\":\"28:31:52:1d:c6:0a\","#,
    r#"\"addrs\":[{\"addr\":\"127.0.0.1/8\"}]},{\"name\":\"eth0\",\"hardwareaddr\":\"52:54:00:19:2e:e8\","#,
    r#"\"addrs\":[{\"addr\":\"127.0.0.1/24\"}]}]},\"system\":{\"info\":{\"hostname\":\"VM_0_31_centos\","#,
    r#"\"os\":\"linux\",\"platform\":\"centos\",\"platformVersion\":\"6.2\",\"systemtype\":\"64-bit\"}}}}","#,
    r#""timestamp":1505811427}"#,
);

/// Refreshes inventory hosts from agent snapshots.
///
/// A snapshot is resolved to a stored host through its reported addresses,
/// diffed against the stored record, and only when a tracked field changed
/// is the host updated and an audit entry written.
pub struct HostSnapAnalyzer {
    inventory: Arc<dyn Inventory>,
    audit: Arc<dyn AuditLog>,
    negative_cache: NegativeCache,
}

impl HostSnapAnalyzer {
    pub fn new(
        inventory: Arc<dyn Inventory>,
        audit: Arc<dyn AuditLog>,
        config: &HostSnapConfig,
    ) -> Self {
        HostSnapAnalyzer {
            inventory,
            audit,
            negative_cache: NegativeCache::new(config),
        }
    }

    /// First stored host matching one of the snapshot's candidate IPs.
    async fn resolve_host(&self, snapshot: &Snapshot) -> Result<Host, AnalyzeError> {
        let cloud_id = snapshot.cloud_id;
        let mut last_error: Option<InventoryError> = None;

        for ip in snapshot.candidate_ips() {
            if self.negative_cache.is_known_miss(cloud_id, &ip) {
                continue;
            }
            match self.inventory.search_host_by_inner_ip(cloud_id, &ip).await {
                Ok(Some(host)) => return Ok(host),
                Ok(None) => self.negative_cache.remember_miss(cloud_id, &ip),
                Err(e) => {
                    tracing::warn!(cloud_id, ip = %ip, error = %e, "host lookup failed");
                    last_error = Some(e);
                }
            }
        }

        if let Some(e) = last_error {
            return Err(e.into());
        }
        counter!(HOST_NOT_FOUND).increment(1);
        Err(AnalyzeError::HostNotFound(format!(
            "{cloud_id}:{}",
            snapshot.ip
        )))
    }

    async fn apply(&self, host_id: i64, changes: FieldChanges) -> Result<(), AnalyzeError> {
        let pre_image = self
            .inventory
            .get_host(host_id)
            .await?
            .ok_or_else(|| AnalyzeError::HostNotFound(format!("host {host_id}")))?;

        self.inventory.update_host(host_id, &changes.after).await?;

        let biz_id = self
            .inventory
            .host_relation(host_id)
            .await?
            .map(|relation| relation.bk_biz_id)
            .unwrap_or_default();

        let before: Map<String, Value> = changes
            .fields()
            .map(|field| {
                let value = pre_image.get(field).cloned().unwrap_or(Value::Null);
                (field.to_string(), value)
            })
            .collect();
        let fields: Vec<String> = before.keys().cloned().collect();
        let entry = AuditEntry::host_update(host_id, biz_id, before, changes.after);
        self.audit.save(&entry).await?;

        counter!(HOST_UPDATED).increment(1);
        tracing::info!(host_id, biz_id, fields = ?fields, "host updated from snapshot");
        Ok(())
    }
}

#[async_trait]
impl Analyzer for HostSnapAnalyzer {
    fn name(&self) -> &str {
        "hostsnap"
    }

    fn hash(&self, cloud_id: &str, ip: &str) -> Result<String, AnalyzeError> {
        if cloud_id.is_empty() {
            return Err(AnalyzeError::InvalidShardingKey("cloudid is empty".into()));
        }
        if ip.is_empty() {
            return Err(AnalyzeError::InvalidShardingKey("ip is empty".into()));
        }
        Ok(format!("{cloud_id}:{ip}"))
    }

    async fn analyze(&self, message: &str) -> Result<(), AnalyzeError> {
        let snapshot = Snapshot::parse(message)?;
        let host = self.resolve_host(&snapshot).await?;

        let host_id = host.id().ok_or_else(|| {
            AnalyzeError::IncompleteHost(format!(
                "{}:{} resolved to a host without {HOST_ID_FIELD}",
                snapshot.cloud_id, snapshot.ip
            ))
        })?;
        if host.inner_ips().is_empty() {
            return Err(AnalyzeError::IncompleteHost(format!(
                "host {host_id} has no {INNER_IP_FIELD}"
            )));
        }

        let changes = diff(&snapshot.fields_for(&host), &host);
        if changes.is_empty() {
            counter!(HOST_UNCHANGED).increment(1);
            tracing::debug!(host_id, "snapshot matches stored host");
            return Ok(());
        }

        self.apply(host_id, changes).await
    }

    fn mock(&self) -> String {
        MOCK_MESSAGE.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditLog;
    use crate::inventory::{HostRelation, MemoryInventory};
    use serde_json::json;

    struct Fixture {
        analyzer: HostSnapAnalyzer,
        inventory: Arc<MemoryInventory>,
        audit: Arc<MemoryAuditLog>,
    }

    fn fixture(hosts: Vec<Value>) -> Fixture {
        let inventory = Arc::new(MemoryInventory::new());
        for host in hosts {
            inventory.insert_host(serde_json::from_value(host).unwrap());
        }
        let audit = Arc::new(MemoryAuditLog::new());
        let analyzer = HostSnapAnalyzer::new(
            inventory.clone(),
            audit.clone(),
            &HostSnapConfig::default(),
        );
        Fixture {
            analyzer,
            inventory,
            audit,
        }
    }

    fn mem_payload(ip: &str, bytes: u64) -> String {
        json!({
            "cloudid": 0,
            "ip": ip,
            "data": {"mem": {"meminfo": {"total": bytes}}},
        })
        .to_string()
    }

    #[test]
    fn hash_requires_both_parts() {
        let f = fixture(vec![]);
        assert_eq!(f.analyzer.hash("0", "10.0.0.5").unwrap(), "0:10.0.0.5");
        assert!(matches!(
            f.analyzer.hash("", "10.0.0.5"),
            Err(AnalyzeError::InvalidShardingKey(_))
        ));
        assert!(matches!(
            f.analyzer.hash("0", ""),
            Err(AnalyzeError::InvalidShardingKey(_))
        ));
    }

    #[tokio::test]
    async fn changed_memory_updates_once_with_audit() {
        let f = fixture(vec![json!({
            "bk_host_id": 1,
            "bk_cloud_id": 0,
            "bk_host_innerip": "10.0.0.5",
            "bk_mem": 512,
        })]);
        f.inventory.set_relation(
            1,
            HostRelation {
                bk_biz_id: 3,
                ..Default::default()
            },
        );

        let payload = mem_payload("10.0.0.5", 1_073_741_824);
        f.analyzer.analyze(&payload).await.unwrap();

        let updates = f.inventory.updates();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, 1);
        assert_eq!(Value::Object(updates[0].1.clone()), json!({"bk_mem": 1024}));

        let entries = f.audit.entries();
        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.resource_type, "host");
        assert_eq!(entry.resource_id, 1);
        assert_eq!(entry.action, "update");
        assert_eq!(entry.operate_from, "data_collection");
        assert_eq!(entry.operator, "cc_system");
        assert_eq!(entry.biz_id, 3);
        assert_eq!(Value::Object(entry.before.clone()), json!({"bk_mem": 512}));
        assert_eq!(Value::Object(entry.after.clone()), json!({"bk_mem": 1024}));

        // The stored host now matches, so the same snapshot is a no-op.
        f.analyzer.analyze(&payload).await.unwrap();
        assert_eq!(f.inventory.updates().len(), 1);
        assert_eq!(f.audit.entries().len(), 1);
    }

    #[tokio::test]
    async fn identical_snapshot_has_no_side_effects() {
        let f = fixture(vec![json!({
            "bk_host_id": 1,
            "bk_host_innerip": "10.0.0.5",
            "bk_mem": "1024",
        })]);

        f.analyzer
            .analyze(&mem_payload("10.0.0.5", 1_073_741_824))
            .await
            .unwrap();
        assert!(f.inventory.updates().is_empty());
        assert!(f.audit.entries().is_empty());
    }

    #[tokio::test]
    async fn cpu_mhz_drift_band() {
        let f = fixture(vec![json!({
            "bk_host_id": 1,
            "bk_host_innerip": "10.0.0.5",
            "bk_cpu_mhz": 2000,
        })]);
        let payload = |mhz: f64| {
            json!({
                "cloudid": 0,
                "ip": "10.0.0.5",
                "data": {"cpu": {"cpuinfo": [{"mhz": mhz}]}},
            })
            .to_string()
        };

        f.analyzer.analyze(&payload(2099.9)).await.unwrap();
        assert!(f.inventory.updates().is_empty());

        f.analyzer.analyze(&payload(2100.0)).await.unwrap();
        assert_eq!(f.inventory.updates().len(), 1);
        assert_eq!(f.audit.entries().len(), 1);
    }

    #[tokio::test]
    async fn resolves_through_interface_addresses() {
        let f = fixture(vec![json!({
            "bk_host_id": 4,
            "bk_host_innerip": "10.0.0.6",
            "bk_host_name": "old",
        })]);
        let payload = json!({
            "cloudid": 0,
            "ip": "10.0.0.5",
            "data": {
                "system": {"info": {"hostname": "new"}},
                "net": {"interface": [
                    {"hardwareaddr": "52:54:00:19:2e:e8", "addrs": [{"addr": "10.0.0.6/24"}]},
                ]},
            },
        });

        f.analyzer.analyze(&payload.to_string()).await.unwrap();

        let host = f.inventory.host(4).unwrap();
        assert_eq!(host.get("bk_host_name"), Some(&json!("new")));
        assert_eq!(host.get("bk_mac"), Some(&json!("52:54:00:19:2e:e8")));
        assert_eq!(f.inventory.search_count(), 2);
    }

    #[tokio::test]
    async fn unknown_addresses_are_remembered() {
        let f = fixture(vec![]);
        let payload = mem_payload("10.0.0.9", 1_073_741_824);

        let err = f.analyzer.analyze(&payload).await.unwrap_err();
        assert_eq!(err, AnalyzeError::HostNotFound("0:10.0.0.9".into()));
        assert!(!err.needs_retry());
        assert_eq!(f.inventory.search_count(), 1);

        let err = f.analyzer.analyze(&payload).await.unwrap_err();
        assert!(matches!(err, AnalyzeError::HostNotFound(_)));
        assert_eq!(f.inventory.search_count(), 1);
    }

    #[tokio::test]
    async fn failed_update_signals_retry_without_audit() {
        let f = fixture(vec![json!({
            "bk_host_id": 1,
            "bk_host_innerip": "10.0.0.5",
            "bk_mem": 512,
        })]);
        f.inventory.fail_updates(1);
        let payload = mem_payload("10.0.0.5", 1_073_741_824);

        let err = f.analyzer.analyze(&payload).await.unwrap_err();
        assert!(err.needs_retry());
        assert!(f.audit.entries().is_empty());

        f.analyzer.analyze(&payload).await.unwrap();
        assert_eq!(f.audit.entries().len(), 1);
    }

    #[tokio::test]
    async fn malformed_snapshot() {
        let f = fixture(vec![]);
        let err = f.analyzer.analyze("{").await.unwrap_err();
        assert!(matches!(err, AnalyzeError::MalformedMessage(_)));
        assert!(!err.needs_retry());
    }

    #[tokio::test]
    async fn mock_message_refreshes_matching_host() {
        let f = fixture(vec![json!({
            "bk_host_id": 9,
            "bk_cloud_id": 0,
            "bk_host_innerip": "192.168.1.7",
            "bk_os_type": "1",
            "bk_cpu": 1,
        })]);

        f.analyzer.analyze(&f.analyzer.mock()).await.unwrap();

        let entries = f.audit.entries();
        assert_eq!(entries.len(), 1);
        let after = &entries[0].after;
        assert_eq!(after["bk_os_name"], json!("linux centos"));
        assert_eq!(after["bk_mem"], json!(996));
        assert!(!after.contains_key("bk_os_type"));
        assert!(!after.contains_key("bk_cpu"));
        assert_eq!(entries[0].before["bk_mem"], Value::Null);
    }
}
