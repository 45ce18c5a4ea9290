// src/manifest/fingerprint.rs

//! Content-addressed task fingerprints for the cross-run ledger.
//!
//! A fingerprint is a blake3 digest over:
//! 1. the canonical JSON rendering of the task manifest, and
//! 2. the task's spec document bytes with `\r\n` normalized to `\n`.
//!
//! Canonical JSON orders object keys lexicographically at every nesting
//! level and uses compact separators, so two manifests that differ only in
//! key order fingerprint identically.

use blake3::Hasher;
use serde_json::Value;

use crate::errors::Result;
use crate::manifest::model::TaskManifest;

/// Canonical JSON rendering of a manifest.
pub fn canonical_manifest_json(manifest: &TaskManifest) -> Result<String> {
    let value = serde_json::to_value(manifest)?;
    let canonical = canonicalize(value);
    Ok(serde_json::to_string(&canonical)?)
}

/// Normalize spec bytes: convert CRLF line endings to LF.
pub fn normalize_spec_bytes(spec: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(spec.len());
    let mut i = 0;
    while i < spec.len() {
        if spec[i] == b'\r' && spec.get(i + 1) == Some(&b'\n') {
            out.push(b'\n');
            i += 2;
        } else {
            out.push(spec[i]);
            i += 1;
        }
    }
    out
}

/// Compute the ledger fingerprint for a manifest + spec document pair.
pub fn fingerprint_manifest(manifest: &TaskManifest, spec: &[u8]) -> Result<String> {
    let canonical = canonical_manifest_json(manifest)?;
    let normalized = normalize_spec_bytes(spec);

    let mut hasher = Hasher::new();
    hasher.update(canonical.as_bytes());
    hasher.update(&normalized);
    Ok(hasher.finalize().to_hex().to_string())
}

/// Recursively sort object keys.
///
/// `serde_json::Map` preserves insertion order, so rebuilding each map from
/// sorted keys yields a deterministic rendering.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = serde_json::Map::with_capacity(entries.len());
            for (key, val) in entries {
                sorted.insert(key, canonicalize(val));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest(id: &str) -> TaskManifest {
        let raw = format!(
            r#"
            id = "{id}"
            name = "demo"
            dependencies = ["a", "b"]

            [locks]
            writes = ["r1"]
            "#
        );
        toml::from_str(&raw).unwrap()
    }

    #[test]
    fn newline_normalization_is_fingerprint_neutral() {
        let m = manifest("t");
        let unix = fingerprint_manifest(&m, b"line one\nline two\n").unwrap();
        let dos = fingerprint_manifest(&m, b"line one\r\nline two\r\n").unwrap();
        assert_eq!(unix, dos);
    }

    #[test]
    fn lone_carriage_returns_are_preserved() {
        assert_eq!(normalize_spec_bytes(b"a\rb"), b"a\rb".to_vec());
        assert_eq!(normalize_spec_bytes(b"a\r\nb"), b"a\nb".to_vec());
    }

    #[test]
    fn key_order_is_fingerprint_neutral() {
        let a: Value =
            serde_json::from_str(r#"{"z": 1, "a": {"y": 2, "b": 3}, "list": [{"q": 1, "p": 2}]}"#)
                .unwrap();
        let b: Value =
            serde_json::from_str(r#"{"a": {"b": 3, "y": 2}, "list": [{"p": 2, "q": 1}], "z": 1}"#)
                .unwrap();
        assert_eq!(
            serde_json::to_string(&canonicalize(a)).unwrap(),
            serde_json::to_string(&canonicalize(b)).unwrap()
        );
    }

    #[test]
    fn different_manifests_fingerprint_differently() {
        let a = fingerprint_manifest(&manifest("t1"), b"spec").unwrap();
        let b = fingerprint_manifest(&manifest("t2"), b"spec").unwrap();
        assert_ne!(a, b);
    }
}
