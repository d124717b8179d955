//! Feature-flag parsing: telemetry metadata enrichment and the
//! allocation-id digest used for experimentation telemetry.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::setting::Setting;

/// Parse a feature-flag setting's JSON value, splicing in telemetry
/// metadata (`etag`, `featureFlagReference`, and, when applicable,
/// `allocationId`) when `telemetry.enabled` is true.
pub fn parse_feature_flag(setting: &Setting, store_origin: &str) -> Result<Value> {
    let raw = setting.value.as_deref().unwrap_or_default();
    let mut flag: Value = serde_json::from_str(raw).map_err(|e| {
        Error::InvalidOperation(format!(
            "feature flag '{}' is not valid JSON: {e}",
            setting.key
        ))
    })?;

    let telemetry_enabled = flag
        .get("telemetry")
        .and_then(|t| t.get("enabled"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if telemetry_enabled {
        splice_telemetry_metadata(&mut flag, setting, store_origin);
    }

    Ok(flag)
}

fn splice_telemetry_metadata(flag: &mut Value, setting: &Setting, store_origin: &str) {
    let mut reference = format!("{store_origin}/kv/{}", setting.key);
    if let Some(label) = &setting.label {
        reference.push_str("?label=");
        reference.push_str(label);
    }

    let allocation_id = flag.get("allocation").and_then(compute_allocation_id);

    let Some(Value::Object(flag_obj)) = Some(flag) else {
        return;
    };
    let telemetry = flag_obj
        .entry("telemetry")
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(telemetry_obj) = telemetry else {
        return;
    };
    let metadata = telemetry_obj
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(metadata_obj) = metadata else {
        return;
    };

    metadata_obj.insert("etag".to_string(), Value::String(setting.etag.clone()));
    metadata_obj.insert(
        "featureFlagReference".to_string(),
        Value::String(reference),
    );
    if let Some(id) = allocation_id {
        metadata_obj.insert("allocationId".to_string(), Value::String(id));
    }
}

/// Compute the allocation-id digest from an `allocation` object, or `None`
/// if neither a seed nor percentile allocation is present.
fn compute_allocation_id(allocation: &Value) -> Option<String> {
    let seed = allocation.get("seed").and_then(Value::as_str);
    let default_when_enabled = allocation.get("default_when_enabled").and_then(Value::as_str);

    let mut percentiles: Vec<(f64, String, f64)> = allocation
        .get("percentile")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|p| {
                    let from = p.get("from").and_then(Value::as_f64)?;
                    let to = p.get("to").and_then(Value::as_f64)?;
                    let variant = p.get("variant").and_then(Value::as_str)?;
                    Some((from, variant.to_string(), to))
                })
                .collect()
        })
        .unwrap_or_default();

    if seed.is_none() && percentiles.is_empty() {
        return None;
    }

    percentiles.retain(|(from, _, to)| from != to);
    percentiles.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

    let mut referenced_variants: std::collections::BTreeSet<String> = percentiles
        .iter()
        .map(|(_, variant, _)| variant.clone())
        .collect();
    if let Some(d) = default_when_enabled {
        referenced_variants.insert(d.to_string());
    }

    let variants_in_allocation: Map<String, Value> = allocation
        .get("variant")
        .or_else(|| allocation.get("variants"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|v| {
                    let name = v.get("name").and_then(Value::as_str)?;
                    let config_value = v.get("configuration_value").or_else(|| v.get("config_value"));
                    Some((name.to_string(), config_value.cloned().unwrap_or(Value::Null)))
                })
                .collect()
        })
        .unwrap_or_default();

    let mut canonical = String::new();
    canonical.push_str("seed=");
    canonical.push_str(seed.unwrap_or(""));
    canonical.push('\n');
    canonical.push_str("default_when_enabled=");
    canonical.push_str(default_when_enabled.unwrap_or(""));
    canonical.push('\n');
    canonical.push_str("percentiles=");
    canonical.push_str(
        &percentiles
            .iter()
            .map(|(from, variant, to)| {
                format!(
                    "{},{},{}",
                    format_number(*from),
                    STANDARD.encode(variant.as_bytes()),
                    format_number(*to)
                )
            })
            .collect::<Vec<_>>()
            .join(";"),
    );
    canonical.push('\n');
    canonical.push_str("variants=");
    canonical.push_str(
        &referenced_variants
            .iter()
            .map(|name| {
                let config_value = variants_in_allocation
                    .get(name)
                    .cloned()
                    .unwrap_or(Value::Null);
                format!(
                    "{},{}",
                    STANDARD.encode(name.as_bytes()),
                    canonical_json(&config_value)
                )
            })
            .collect::<Vec<_>>()
            .join(";"),
    );

    let digest = Sha256::digest(canonical.as_bytes());
    Some(URL_SAFE_NO_PAD.encode(&digest[..15]))
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 {
        format!("{}", n as i64)
    } else {
        n.to_string()
    }
}

/// Canonical JSON encoding: object keys sorted alphabetically; arrays
/// preserve order; null preserved.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body = keys
                .iter()
                .map(|k| format!("{:?}:{}", k.as_str(), canonical_json(&map[*k])))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{body}}}")
        }
        Value::Array(items) => {
            let body = items.iter().map(canonical_json).collect::<Vec<_>>().join(",");
            format!("[{body}]")
        }
        other => other.to_string(),
    }
}
