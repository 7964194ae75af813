//! Manifest decoding using yaml-rust2
//!
//! Desired-state manifests arrive as one text blob with documents separated
//! by a literal `---` line. Each document is decoded on its own into a
//! `serde_json::Value`; a single bad document fails the whole batch.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

use crate::{Error, Result};

/// Literal line separating documents in a manifest
pub const DOCUMENT_SEPARATOR: &str = "---";

/// Split a manifest into its raw documents.
///
/// A line whose trimmed content is exactly `---` starts a new document.
/// Documents that are empty or only whitespace/comments are dropped.
pub fn split_documents(input: &str) -> Vec<String> {
    let mut docs = Vec::new();
    let mut current = String::new();

    for line in input.lines() {
        if line.trim() == DOCUMENT_SEPARATOR {
            push_document(&mut docs, std::mem::take(&mut current));
            continue;
        }
        current.push_str(line);
        current.push('\n');
    }
    push_document(&mut docs, current);

    docs
}

fn push_document(docs: &mut Vec<String>, doc: String) {
    let meaningful = doc
        .lines()
        .any(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'));
    if meaningful {
        docs.push(doc);
    }
}

/// Decode every document of a manifest.
///
/// Returns `Error::Decode` naming the first document that fails to parse or
/// that is not a mapping. Nothing is returned for a partially valid batch.
pub fn decode_documents(input: &str) -> Result<Vec<Value>> {
    split_documents(input)
        .iter()
        .enumerate()
        .map(|(idx, doc)| {
            let value = parse_yaml(doc).map_err(|e| Error::decode(idx, e.to_string()))?;
            if !value.is_object() {
                return Err(Error::decode(idx, "document is not a mapping"));
            }
            Ok(value)
        })
        .collect()
}

/// Parse a YAML string into a serde_json::Value.
///
/// For multi-document YAML, returns only the first document.
/// Returns `Value::Null` for empty input.
pub fn parse_yaml(input: &str) -> Result<Value> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| Error::serialization(e.to_string()))?;
    match docs.into_iter().next() {
        Some(doc) => yaml_to_json(doc),
        None => Ok(Value::Null),
    }
}

/// Convert a yaml_rust2::Yaml value to serde_json::Value
fn yaml_to_json(yaml: Yaml) -> Result<Value> {
    match yaml {
        Yaml::Null => Ok(Value::Null),
        Yaml::Boolean(b) => Ok(Value::Bool(b)),
        Yaml::Integer(i) => Ok(Value::Number(i.into())),
        Yaml::Real(s) => {
            let f: f64 = s
                .parse()
                .map_err(|e: std::num::ParseFloatError| Error::serialization(e.to_string()))?;
            Ok(Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or(Value::Null))
        }
        Yaml::String(s) => Ok(Value::String(s)),
        Yaml::Array(arr) => arr
            .into_iter()
            .map(yaml_to_json)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Yaml::Hash(map) => map
            .into_iter()
            .map(|(k, v)| {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Integer(i) => i.to_string(),
                    Yaml::Real(r) => r,
                    Yaml::Boolean(b) => b.to_string(),
                    Yaml::Null => "null".to_string(),
                    _ => return Err(Error::serialization("unsupported YAML key type")),
                };
                yaml_to_json(v).map(|v| (key, v))
            })
            .collect::<Result<Map<String, Value>>>()
            .map(Value::Object),
        Yaml::Alias(_) => Err(Error::serialization("YAML aliases not supported")),
        Yaml::BadValue => Err(Error::serialization("bad YAML value")),
    }
}
