//! Field access on raw collector payloads.
//!
//! Agents publish JSON documents carrying `cloudid` and `ip` at the top
//! level. Older agents instead publish an envelope whose `data` member is the
//! real document encoded as a string.

use serde_json::Value;

/// Parses `payload`, unwrapping the string-encoded envelope when present.
///
/// The envelope's `timestamp` is copied onto the inner document when the
/// inner document carries none of its own.
pub fn unwrap_payload(payload: &str) -> Result<Value, serde_json::Error> {
    let doc: Value = serde_json::from_str(payload)?;
    if doc.get("cloudid").is_some() {
        return Ok(doc);
    }

    let Some(inner) = doc.get("data").and_then(Value::as_str) else {
        return Ok(doc);
    };
    let mut inner: Value = serde_json::from_str(inner)?;

    if let Some(ts) = doc.get("timestamp").filter(|_| embedded_timestamp(&inner).is_none()) {
        if let Value::Object(fields) = &mut inner {
            fields.insert("timestamp".to_string(), ts.clone());
        }
    }
    Ok(inner)
}

/// Renders a scalar as the string an analyzer expects. Missing or
/// non-scalar values become empty.
pub fn scalar_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// `(cloudid, ip)` used to compute the sharding key.
pub fn sharding_fields(doc: &Value) -> (String, String) {
    (
        scalar_string(doc.get("cloudid")),
        scalar_string(doc.get("ip")),
    )
}

/// Embedded sequence timestamp: `data.timestamp`, else top-level
/// `timestamp`, else 0.
pub fn timestamp(doc: &Value) -> i64 {
    embedded_timestamp(doc).unwrap_or(0)
}

fn embedded_timestamp(doc: &Value) -> Option<i64> {
    doc.pointer("/data/timestamp")
        .and_then(as_i64)
        .or_else(|| doc.get("timestamp").and_then(as_i64))
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
