//! JSON file reading and canonicalisation helpers.

use std::{fmt::Write, path::Path};

use serde::de::DeserializeOwned;

use crate::metadata::strip_bom;

/// Reads and parses a JSON document from disk.
///
/// A leading UTF-8 BOM is stripped before parsing. When `ignore_missing` is
/// set, a missing file is treated as an absent document rather than an
/// error.
pub fn read_json_file<T: DeserializeOwned>(
    path: &Path,
    ignore_missing: bool,
) -> std::io::Result<Option<T>> {
    let bytes = match fs_err::read(path) {
        Ok(bytes) => bytes,
        Err(e) if ignore_missing && e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let value = serde_json::from_slice(strip_bom(&bytes))?;
    Ok(Some(value))
}

/// Renders a JSON value in canonical form: keys sorted lexicographically at
/// every level, no insignificant whitespace.
///
/// Two documents that differ only in key order or formatting canonicalise to
/// the same string, which is what makes the lockfile digest in the package
/// map stable across rewrites.
pub fn canonical_json(value: &serde_json::Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &serde_json::Value, out: &mut String) {
    match value {
        serde_json::Value::Null => out.push_str("null"),
        serde_json::Value::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        serde_json::Value::Number(n) => {
            let _ = write!(out, "{n}");
        }
        serde_json::Value::String(s) => {
            out.push_str(
                &serde_json::to_string(s).expect("serializing a JSON string cannot fail"),
            );
        }
        serde_json::Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(
                    &serde_json::to_string(key).expect("serializing a JSON string cannot fail"),
                );
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
    }
}
