use crate::inventory::Host;
use crate::snapshot::TRACKED_FIELDS;
use porter::message::scalar_string;
use serde_json::{Map, Value};

/// CPU frequency drift below this many MHz is noise, not a change.
pub const CPU_MHZ_TOLERANCE: f64 = 100.0;

/// Tracked fields whose reported value differs from the stored host.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldChanges {
    /// Stored values, `null` when the host did not have the field.
    pub before: Map<String, Value>,
    pub after: Map<String, Value>,
}

impl FieldChanges {
    pub fn is_empty(&self) -> bool {
        self.after.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.after.keys().map(String::as_str)
    }
}

/// Compares `reported` against `stored`, field by field, as strings.
/// Fields the snapshot did not report never count as changed.
pub fn diff(reported: &Map<String, Value>, stored: &Host) -> FieldChanges {
    let mut changes = FieldChanges::default();

    for &field in TRACKED_FIELDS {
        let Some(new) = reported.get(field) else {
            continue;
        };
        let old = stored.get(field);
        if scalar_string(Some(new)) == scalar_string(old) {
            continue;
        }
        if field == "bk_cpu_mhz" && within_tolerance(new, old) {
            continue;
        }

        changes
            .before
            .insert(field.to_string(), old.cloned().unwrap_or(Value::Null));
        changes.after.insert(field.to_string(), new.clone());
    }

    changes
}

fn within_tolerance(new: &Value, old: Option<&Value>) -> bool {
    let parse = |value: Option<&Value>| scalar_string(value).trim().parse::<f64>().ok();
    match (parse(Some(new)), parse(old)) {
        (Some(new), Some(old)) => (new - old).abs() < CPU_MHZ_TOLERANCE,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn compares_as_strings() {
        let stored = Host(map(json!({"bk_cpu": "4", "bk_mem": 512, "bk_os_type": 1})));
        let reported = map(json!({"bk_cpu": 4, "bk_mem": 1024, "bk_os_type": "1"}));

        let changes = diff(&reported, &stored);
        assert_eq!(changes.fields().collect::<Vec<_>>(), vec!["bk_mem"]);
        assert_eq!(changes.before["bk_mem"], json!(512));
        assert_eq!(changes.after["bk_mem"], json!(1024));
    }

    #[test]
    fn unreported_fields_are_ignored() {
        let stored = Host(map(json!({"bk_host_name": "old", "bk_mac": "m1"})));
        let reported = map(json!({"bk_host_name": "old"}));
        assert!(diff(&reported, &stored).is_empty());
    }

    #[test]
    fn missing_stored_field_is_a_change() {
        let stored = Host::default();
        let reported = map(json!({"bk_host_name": "web-1"}));

        let changes = diff(&reported, &stored);
        assert_eq!(changes.before["bk_host_name"], Value::Null);
        assert_eq!(changes.after["bk_host_name"], json!("web-1"));
    }

    #[test]
    fn cpu_mhz_tolerance() {
        let stored = Host(map(json!({"bk_cpu_mhz": 2294})));

        assert!(diff(&map(json!({"bk_cpu_mhz": 2393})), &stored).is_empty());
        assert!(diff(&map(json!({"bk_cpu_mhz": 2195})), &stored).is_empty());
        assert!(!diff(&map(json!({"bk_cpu_mhz": 2394})), &stored).is_empty());
        assert!(!diff(&map(json!({"bk_cpu_mhz": 2000})), &stored).is_empty());

        let unset = Host::default();
        assert!(!diff(&map(json!({"bk_cpu_mhz": 2294})), &unset).is_empty());
    }
}
