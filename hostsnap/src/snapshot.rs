//! Snapshot payload parsing.
//!
//! Agents report in one of two dialects. Legacy agents nest host facts
//! under `data.cpu.cpuinfo`, `data.system.info` and friends; agents that
//! set `data.apiVer` to `v1.0` or later use a flatter layout. Both are
//! reduced to the same set of inventory fields here.

use crate::inventory::Host;
use porter::AnalyzeError;
use porter::message::{scalar_string, unwrap_payload};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::net::IpAddr;

/// Inventory fields a snapshot can refresh, in comparison order.
pub const TRACKED_FIELDS: &[&str] = &[
    "bk_cpu",
    "bk_cpu_module",
    "bk_cpu_mhz",
    "bk_disk",
    "bk_mem",
    "bk_os_type",
    "bk_os_name",
    "bk_os_version",
    "bk_os_bit",
    "bk_cpu_architecture",
    "bk_host_name",
    "bk_mac",
    "bk_outer_mac",
    "docker_client_version",
    "docker_server_version",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Dialect {
    Legacy,
    V1,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OsType {
    Linux = 1,
    Windows = 2,
    Aix = 3,
    Unix = 4,
    Solaris = 5,
    HpUx = 6,
    FreeBsd = 7,
    MacOs = 8,
}

impl OsType {
    pub fn from_name(name: &str) -> Option<Self> {
        let os = match name.to_ascii_lowercase().as_str() {
            "linux" => OsType::Linux,
            "windows" => OsType::Windows,
            "aix" => OsType::Aix,
            "unix" => OsType::Unix,
            "solaris" => OsType::Solaris,
            "hp-ux" => OsType::HpUx,
            "freebsd" => OsType::FreeBsd,
            "macos" | "darwin" => OsType::MacOs,
            _ => return None,
        };
        Some(os)
    }

    /// Inventory enum code, stored as a string.
    pub fn code(self) -> String {
        (self as u8).to_string()
    }
}

/// `(type code, name, version)` as stored in the inventory.
pub fn normalize_os(
    os: &str,
    platform: &str,
    version: &str,
) -> (Option<OsType>, String, String) {
    let os = os.trim();
    let platform = platform.trim();
    let os_type = OsType::from_name(os);

    let (name, version) = match os_type {
        Some(OsType::Linux) => (
            format!("{os} {platform}"),
            version.replacen(".x86_64", "", 1).replacen(".i386", "", 1),
        ),
        Some(OsType::Windows) => (
            platform.replacen("Microsoft ", "", 1),
            version.replacen("Microsoft ", "", 1),
        ),
        _ => (platform.to_string(), version.to_string()),
    };
    (os_type, name.trim().to_string(), version.trim().to_string())
}

#[derive(Clone, Debug, Default, PartialEq)]
struct Interface {
    mac: String,
    addrs: Vec<IpAddr>,
}

/// A parsed snapshot. Holds the fields derived from the payload alone;
/// MAC fields depend on the stored host and come from [`Snapshot::fields_for`].
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub cloud_id: i64,
    pub ip: String,
    pub dialect: Dialect,
    fields: Map<String, Value>,
    interfaces: Vec<Interface>,
}

impl Snapshot {
    pub fn parse(payload: &str) -> Result<Snapshot, AnalyzeError> {
        let doc = unwrap_payload(payload)
            .map_err(|e| AnalyzeError::MalformedMessage(e.to_string()))?;

        let cloud_id = scalar_string(doc.get("cloudid"));
        let cloud_id = cloud_id
            .trim()
            .parse::<i64>()
            .map_err(|_| AnalyzeError::MalformedMessage(format!("invalid cloudid {cloud_id:?}")))?;
        let ip = scalar_string(doc.get("ip")).trim().to_string();

        let is_v1 = doc
            .pointer("/data/apiVer")
            .and_then(Value::as_str)
            .is_some_and(|version| version >= "v1.0");

        let (dialect, fields, interfaces) = if is_v1 {
            (Dialect::V1, v1_fields(&doc), interfaces(&doc, "mac"))
        } else {
            (Dialect::Legacy, legacy_fields(&doc), interfaces(&doc, "hardwareaddr"))
        };

        Ok(Snapshot {
            cloud_id,
            ip,
            dialect,
            fields,
            interfaces,
        })
    }

    /// Addresses to try when resolving the snapshot to a host: the declared
    /// IP first, then interface addresses. Loopback, link-local and
    /// unparseable addresses are skipped.
    pub fn candidate_ips(&self) -> Vec<String> {
        let declared = parse_ip(&self.ip);
        let mut candidates: Vec<String> = Vec::new();
        for ip in declared
            .into_iter()
            .chain(self.interfaces.iter().flat_map(|i| i.addrs.iter().copied()))
        {
            if !is_routable(&ip) {
                continue;
            }
            let ip = ip.to_string();
            if !candidates.contains(&ip) {
                candidates.push(ip);
            }
        }
        candidates
    }

    /// Fields this snapshot reports for `host`. MACs are matched against
    /// the host's stored inner and outer IPs.
    pub fn fields_for(&self, host: &Host) -> Map<String, Value> {
        let mut fields = self.fields.clone();
        if let Some(mac) = self.macs_for(&host.inner_ips()) {
            fields.insert("bk_mac".into(), Value::String(mac));
        }
        if let Some(mac) = self.macs_for(&host.outer_ips()) {
            fields.insert("bk_outer_mac".into(), Value::String(mac));
        }
        fields
    }

    /// Comma-joined MACs positionally aligned with `ips`, or `None` when no
    /// interface carries any of them.
    fn macs_for(&self, ips: &[String]) -> Option<String> {
        let positions: HashMap<IpAddr, usize> = ips
            .iter()
            .enumerate()
            .filter_map(|(index, ip)| parse_ip(ip).map(|ip| (ip, index)))
            .collect();

        let mut macs = vec![String::new(); ips.len()];
        let mut matched = false;
        for interface in &self.interfaces {
            for addr in &interface.addrs {
                if let Some(&index) = positions.get(addr) {
                    if macs[index].is_empty() {
                        macs[index] = interface.mac.clone();
                        matched = true;
                    }
                }
            }
        }
        matched.then(|| macs.join(","))
    }
}

fn legacy_fields(doc: &Value) -> Map<String, Value> {
    let mut fields = Map::new();

    if let Some(cpus) = doc.pointer("/data/cpu/cpuinfo").and_then(Value::as_array) {
        let cores: i64 = cpus.iter().filter_map(|cpu| number(cpu.get("cores"))).map(|c| c as i64).sum();
        insert_positive(&mut fields, "bk_cpu", cores);
        if let Some(first) = cpus.first() {
            insert_text(&mut fields, "bk_cpu_module", &text(first.get("modelName")));
            if let Some(mhz) = number(first.get("mhz")) {
                insert_positive(&mut fields, "bk_cpu_mhz", mhz as i64);
            }
        }
    }

    if let Some(usage) = doc.pointer("/data/disk/usage").and_then(Value::as_array) {
        let bytes: u64 = usage
            .iter()
            .filter_map(|disk| number(disk.get("total")))
            .map(|total| total as u64)
            .sum();
        insert_positive(&mut fields, "bk_disk", (bytes >> 30) as i64);
    }

    if let Some(bytes) = number(doc.pointer("/data/mem/meminfo/total")) {
        insert_positive(&mut fields, "bk_mem", ((bytes as u64) >> 20) as i64);
    }

    if let Some(info) = doc.pointer("/data/system/info") {
        insert_text(&mut fields, "bk_host_name", &text(info.get("hostname")));
        insert_os(
            &mut fields,
            &text(info.get("os")),
            &text(info.get("platform")),
            &text(info.get("platformVersion")),
        );
        insert_text(&mut fields, "bk_os_bit", &text(info.get("systemtype")));
    }

    if let Some(docker) = doc.pointer("/data/system/docker") {
        insert_text(
            &mut fields,
            "docker_client_version",
            &text(docker.pointer("/Client/Version")),
        );
        insert_text(
            &mut fields,
            "docker_server_version",
            &text(docker.pointer("/Server/Version")),
        );
    }

    fields
}

fn v1_fields(doc: &Value) -> Map<String, Value> {
    let mut fields = Map::new();

    if let Some(cores) = number(doc.pointer("/data/cpu/total")) {
        insert_positive(&mut fields, "bk_cpu", cores as i64);
    }
    insert_text(&mut fields, "bk_cpu_module", &text(doc.pointer("/data/cpu/model")));

    if let Some(bytes) = number(doc.pointer("/data/disk/total")) {
        insert_positive(&mut fields, "bk_disk", ((bytes as u64) >> 30) as i64);
    }
    if let Some(bytes) = number(doc.pointer("/data/mem/total")) {
        insert_positive(&mut fields, "bk_mem", ((bytes as u64) >> 20) as i64);
    }

    if let Some(system) = doc.pointer("/data/system") {
        insert_text(&mut fields, "bk_host_name", &text(system.get("hostname")));
        insert_os(
            &mut fields,
            &text(system.get("os")),
            &text(system.get("platform")),
            &text(system.get("platVer")),
        );
        insert_text(&mut fields, "bk_cpu_architecture", &text(system.get("arch")));
        insert_text(&mut fields, "bk_os_bit", &text(system.get("sysType")));
    }

    fields
}

fn insert_os(fields: &mut Map<String, Value>, os: &str, platform: &str, version: &str) {
    let (os_type, name, version) = normalize_os(os, platform, version);
    if let Some(os_type) = os_type {
        fields.insert("bk_os_type".into(), Value::String(os_type.code()));
    }
    insert_text(fields, "bk_os_name", &name);
    insert_text(fields, "bk_os_version", &version);
}

/// Interfaces from either dialect: legacy addresses are `{"addr": "ip/len"}`
/// objects, v1.0 addresses are plain `"ip/len"` strings.
fn interfaces(doc: &Value, mac_field: &str) -> Vec<Interface> {
    let Some(list) = doc.pointer("/data/net/interface").and_then(Value::as_array) else {
        return Vec::new();
    };

    list.iter()
        .map(|interface| {
            let addrs = interface
                .get("addrs")
                .and_then(Value::as_array)
                .map(|addrs| {
                    addrs
                        .iter()
                        .filter_map(|addr| match addr {
                            Value::String(s) => Some(s.as_str()),
                            other => other.get("addr").and_then(Value::as_str),
                        })
                        .filter_map(|addr| addr.split('/').next())
                        .filter_map(parse_ip)
                        .collect()
                })
                .unwrap_or_default();
            Interface {
                mac: text(interface.get(mac_field)),
                addrs,
            }
        })
        .collect()
}

/// Parses an address, unwrapping IPv4-mapped IPv6.
fn parse_ip(raw: &str) -> Option<IpAddr> {
    let ip: IpAddr = raw.trim().parse().ok()?;
    Some(match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    })
}

fn is_routable(ip: &IpAddr) -> bool {
    if ip.is_loopback() || ip.is_unspecified() {
        return false;
    }
    match ip {
        IpAddr::V4(v4) => !v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) != 0xfe80,
    }
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn text(value: Option<&Value>) -> String {
    scalar_string(value).trim().to_string()
}

fn insert_text(fields: &mut Map<String, Value>, field: &str, value: &str) {
    if !value.is_empty() {
        fields.insert(field.to_string(), Value::String(value.to_string()));
    }
}

fn insert_positive(fields: &mut Map<String, Value>, field: &str, value: i64) {
    if value > 0 {
        fields.insert(field.to_string(), Value::from(value));
    }
}
