// src/core/codecs.rs

use crate::core::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("malformed toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("toml serialization failed: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("malformed {format} at line {line}: {message}")]
    Malformed {
        format: &'static str,
        line: usize,
        message: String,
    },
}

/// A config file format: decodes text into dotted key/value pairs, and
/// serializes pairs back for write-back. The registry is open; callers may
/// register additional codecs for extensions this crate does not know.
pub trait Codec: Send + Sync {
    fn name(&self) -> &'static str;
    fn decode(&self, text: &str) -> Result<Vec<(String, Value)>, CodecError>;
    fn encode(&self, entries: &[(String, Value)]) -> Result<String, CodecError>;
}

impl fmt::Debug for dyn Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Codec({})", self.name())
    }
}

/// Maps file extensions (lowercase, no dot; `""` for extension-less files)
/// to codecs.
#[derive(Clone)]
pub struct CodecRegistry {
    by_extension: HashMap<String, Arc<dyn Codec>>,
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut exts: Vec<&str> = self.by_extension.keys().map(String::as_str).collect();
        exts.sort_unstable();
        f.debug_struct("CodecRegistry").field("extensions", &exts).finish()
    }
}

impl Default for CodecRegistry {
    /// The stock registry: toml, json, yaml/yml, a line-based `conf`/`txt`
    /// codec, and toml as the fallback for extension-less files.
    fn default() -> Self {
        let mut registry = Self {
            by_extension: HashMap::new(),
        };
        let toml_codec: Arc<dyn Codec> = Arc::new(TomlCodec);
        registry.register("toml", toml_codec.clone());
        registry.register("", toml_codec);
        registry.register("json", Arc::new(JsonCodec));
        let yaml: Arc<dyn Codec> = Arc::new(YamlCodec);
        registry.register("yaml", yaml.clone());
        registry.register("yml", yaml);
        let conf: Arc<dyn Codec> = Arc::new(ConfCodec);
        registry.register("conf", conf.clone());
        registry.register("txt", conf);
        registry
    }
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, extension: &str, codec: Arc<dyn Codec>) {
        self.by_extension
            .insert(extension.to_ascii_lowercase(), codec);
    }

    pub fn get(&self, extension: &str) -> Option<Arc<dyn Codec>> {
        self.by_extension
            .get(&extension.to_ascii_lowercase())
            .cloned()
    }

    pub fn knows(&self, extension: &str) -> bool {
        self.by_extension
            .contains_key(&extension.to_ascii_lowercase())
    }
}

// --- JSON-TREE BRIDGE ---
// All structured codecs funnel through `serde_json::Value` so flattening and
// un-flattening live in one place.

fn flatten_into(prefix: &str, node: &serde_json::Value, out: &mut Vec<(String, Value)>) {
    match node {
        serde_json::Value::Object(map) => {
            for (k, v) in map {
                let key = if prefix.is_empty() {
                    k.clone()
                } else {
                    format!("{}.{}", prefix, k)
                };
                flatten_into(&key, v, out);
            }
        }
        serde_json::Value::Null => {}
        leaf => {
            if let Some(value) = json_leaf_to_value(leaf) {
                out.push((prefix.to_string(), value));
            }
        }
    }
}

fn json_leaf_to_value(node: &serde_json::Value) -> Option<Value> {
    match node {
        serde_json::Value::Bool(b) => Some(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Value::Int(i))
            } else if let Some(u) = n.as_u64() {
                Some(Value::Uint(u))
            } else {
                n.as_f64().map(Value::Float)
            }
        }
        serde_json::Value::String(s) => Some(Value::Str(s.clone())),
        serde_json::Value::Array(items) => Some(Value::StrList(
            items
                .iter()
                .map(|item| match item {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect(),
        )),
        _ => None,
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Uint(u) => serde_json::Value::from(*u),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        Value::Str(s) => serde_json::Value::String(s.clone()),
        Value::StrList(l) => serde_json::Value::Array(
            l.iter().cloned().map(serde_json::Value::String).collect(),
        ),
        Value::Duration(_) => serde_json::Value::String(value.to_string()),
    }
}

/// Rebuilds a nested object tree from dotted keys.
/// A key that is both a leaf and a branch resolves in favor of the branch.
fn unflatten(entries: &[(String, Value)]) -> serde_json::Value {
    let mut root = serde_json::Map::new();
    for (key, value) in entries {
        let parts: Vec<&str> = key.split('.').collect();
        let mut cursor = &mut root;
        for part in &parts[..parts.len().saturating_sub(1)] {
            let slot = cursor
                .entry((*part).to_string())
                .or_insert_with(|| serde_json::Value::Object(serde_json::Map::new()));
            if !slot.is_object() {
                *slot = serde_json::Value::Object(serde_json::Map::new());
            }
            cursor = slot
                .as_object_mut()
                .expect("slot was just made an object");
        }
        if let Some(last) = parts.last()
            && !cursor
                .get(*last)
                .map(serde_json::Value::is_object)
                .unwrap_or(false)
        {
            cursor.insert((*last).to_string(), value_to_json(value));
        }
    }
    serde_json::Value::Object(root)
}

// --- BUILT-IN CODECS ---

struct TomlCodec;

impl Codec for TomlCodec {
    fn name(&self) -> &'static str {
        "toml"
    }

    fn decode(&self, text: &str) -> Result<Vec<(String, Value)>, CodecError> {
        let table: toml::Table = toml::from_str(text)?;
        let tree = serde_json::to_value(&table)?;
        let mut out = Vec::new();
        flatten_into("", &tree, &mut out);
        Ok(out)
    }

    fn encode(&self, entries: &[(String, Value)]) -> Result<String, CodecError> {
        Ok(toml::to_string_pretty(&unflatten(entries))?)
    }
}

struct JsonCodec;

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn decode(&self, text: &str) -> Result<Vec<(String, Value)>, CodecError> {
        let tree: serde_json::Value = serde_json::from_str(text)?;
        let mut out = Vec::new();
        flatten_into("", &tree, &mut out);
        Ok(out)
    }

    fn encode(&self, entries: &[(String, Value)]) -> Result<String, CodecError> {
        Ok(serde_json::to_string_pretty(&unflatten(entries))?)
    }
}

struct YamlCodec;

impl Codec for YamlCodec {
    fn name(&self) -> &'static str {
        "yaml"
    }

    fn decode(&self, text: &str) -> Result<Vec<(String, Value)>, CodecError> {
        let tree: serde_yaml::Value = serde_yaml::from_str(text)?;
        let tree = serde_json::to_value(&tree)?;
        let mut out = Vec::new();
        flatten_into("", &tree, &mut out);
        Ok(out)
    }

    fn encode(&self, entries: &[(String, Value)]) -> Result<String, CodecError> {
        Ok(serde_yaml::to_string(&unflatten(entries))?)
    }
}

/// Line-based `key = value` files (`.conf` / `.txt`). Keys may already be
/// dotted; values are stored as strings and coerced on read.
struct ConfCodec;

impl Codec for ConfCodec {
    fn name(&self) -> &'static str {
        "conf"
    }

    fn decode(&self, text: &str) -> Result<Vec<(String, Value)>, CodecError> {
        let mut out = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            let Some((key, raw)) = line.split_once('=') else {
                return Err(CodecError::Malformed {
                    format: "conf",
                    line: idx + 1,
                    message: format!("expected 'key = value', got '{}'", line),
                });
            };
            let key = key.trim();
            if key.is_empty() {
                return Err(CodecError::Malformed {
                    format: "conf",
                    line: idx + 1,
                    message: "empty key".to_string(),
                });
            }
            out.push((key.to_string(), Value::Str(raw.trim().to_string())));
        }
        Ok(out)
    }

    fn encode(&self, entries: &[(String, Value)]) -> Result<String, CodecError> {
        let mut out = String::new();
        for (key, value) in entries {
            out.push_str(key);
            out.push_str(" = ");
            out.push_str(&value.to_string());
            out.push('\n');
        }
        Ok(out)
    }
}

// MARK: --- UNIT TESTS ---

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_decode_flattens_tables() {
        let registry = CodecRegistry::default();
        let codec = registry.get("toml").unwrap();
        let entries = codec
            .decode("debug = true\n[server]\nport = 8080\nname = \"api\"\n")
            .unwrap();
        let lookup: std::collections::HashMap<_, _> = entries.into_iter().collect();
        assert_eq!(lookup.get("debug"), Some(&Value::Bool(true)));
        assert_eq!(lookup.get("server.port"), Some(&Value::Int(8080)));
        assert_eq!(
            lookup.get("server.name"),
            Some(&Value::Str("api".to_string()))
        );
    }

    #[test]
    fn test_json_and_yaml_agree() {
        let registry = CodecRegistry::default();
        let json = registry
            .get("json")
            .unwrap()
            .decode(r#"{"a": {"b": [1, "two"]}}"#)
            .unwrap();
        let yaml = registry
            .get("yml")
            .unwrap()
            .decode("a:\n  b:\n    - 1\n    - two\n")
            .unwrap();
        assert_eq!(json, yaml);
        assert_eq!(
            json[0],
            (
                "a.b".to_string(),
                Value::StrList(vec!["1".to_string(), "two".to_string()])
            )
        );
    }

    #[test]
    fn test_conf_codec_lines() {
        let registry = CodecRegistry::default();
        let codec = registry.get("conf").unwrap();
        let entries = codec
            .decode("# comment\napp.debug = on\napp.name = demo\n")
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "app.debug");

        let err = codec.decode("no equals here").unwrap_err();
        assert!(matches!(err, CodecError::Malformed { line: 1, .. }));
    }

    #[test]
    fn test_malformed_toml_is_a_typed_error() {
        let registry = CodecRegistry::default();
        let err = registry.get("toml").unwrap().decode("= bad").unwrap_err();
        assert!(matches!(err, CodecError::Toml(_)));
    }

    #[test]
    fn test_unknown_extension_is_absent() {
        let registry = CodecRegistry::default();
        assert!(registry.get("hcl").is_none());
        assert!(!registry.knows("ini"));
        // Extension-less files fall back to the toml codec.
        assert!(registry.knows(""));
    }

    #[test]
    fn test_encode_rebuilds_nesting() {
        let registry = CodecRegistry::default();
        let entries = vec![
            ("server.port".to_string(), Value::Uint(8080)),
            ("server.tls.enabled".to_string(), Value::Bool(false)),
            ("title".to_string(), Value::Str("demo".to_string())),
        ];
        let text = registry.get("toml").unwrap().encode(&entries).unwrap();
        let reparsed = registry.get("toml").unwrap().decode(&text).unwrap();
        let lookup: std::collections::HashMap<_, _> = reparsed.into_iter().collect();
        assert_eq!(lookup.get("server.port"), Some(&Value::Int(8080)));
        assert_eq!(lookup.get("server.tls.enabled"), Some(&Value::Bool(false)));
    }
}
