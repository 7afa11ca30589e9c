//! Runtime configuration for series and backends.
//!
//! Configuration reaches the library as a JSON (or TOML) document, either
//! inline or as `@filename`. This crate parses it, canonicalizes key casing,
//! merges user values over defaults, traces which keys were actually
//! consulted so unused ones can be reported, and resolves per-dataset
//! pattern entries.
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr
)]

mod matcher;

pub use matcher::DatasetMatcher;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu};
use std::sync::Arc;
use tracing::warn;

/// Config keys that select a backend's own subtree. Anything else at the
/// root is a global option.
pub const BACKEND_KEYS: &[&str] = &["adios1", "adios2", "hdf5", "json", "toml"];

/// Placeholder path component used when descending into arrays. Chosen to be
/// unspellable as a real key.
const ARRAY_COMPONENT: &str = "\u{000B}num";

/// Paths whose object keys keep their original casing. These hold
/// engine-defined parameter names that are case-sensitive.
const CASE_PROTECTED_PATHS: &[&[&str]] = &[
    &["adios2", "engine", "parameters"],
    &["adios2", "dataset", "operators", ARRAY_COMPONENT, "parameters"],
];

#[derive(Debug, Snafu)]
#[allow(missing_docs)]
pub enum Error {
    #[snafu(display("config at /{}: {}", path.join("/"), message))]
    BackendConfigSchema { path: Vec<String>, message: String },

    #[snafu(display("failed reading config from file {}: {}", filename, source))]
    ConfigFile {
        filename: String,
        source: std::io::Error,
    },

    #[snafu(display("malformed JSON config: {}", source))]
    JsonSyntax { source: serde_json::Error },

    #[snafu(display("malformed TOML config: {}", source))]
    TomlSyntax { source: toml::de::Error },

    #[snafu(display("config value is not representable as TOML: {}", message))]
    TomlValue { message: String },

    #[snafu(display("invalid dataset pattern \"{}\": {}", pattern, source))]
    DatasetPattern {
        pattern: String,
        source: regex::Error,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Parse an options string into canonical JSON.
///
/// A leading `@` (after trimming) makes the rest a filename to read the
/// document from; the file's extension decides between JSON and TOML. Inline
/// documents are JSON. Object keys are lower-cased except below
/// case-protected paths.
pub fn parse_options(options: &str, consider_files: bool) -> Result<Value> {
    let trimmed = options.trim();
    if consider_files {
        if let Some(filename) = trimmed.strip_prefix('@') {
            let filename = filename.trim();
            let content = std::fs::read_to_string(filename).context(ConfigFileSnafu {
                filename: filename.to_owned(),
            })?;
            let mut value = if filename.ends_with(".toml") {
                toml_to_json(content.parse::<toml::Value>().context(TomlSyntaxSnafu)?)
            } else {
                serde_json::from_str(&content).context(JsonSyntaxSnafu)?
            };
            lower_case(&mut value, &mut Vec::new())?;
            return Ok(value);
        }
    }
    let mut value: Value = if trimmed.is_empty() {
        Value::Object(Map::new())
    } else {
        serde_json::from_str(trimmed).context(JsonSyntaxSnafu)?
    };
    lower_case(&mut value, &mut Vec::new())?;
    Ok(value)
}

/// Merge `overwrite` into `default` in place.
///
/// Objects merge key-wise, recursing on shared keys; keys mapped to null
/// after the merge are pruned. Any other pairing (including arrays) is a
/// full replacement by `overwrite`.
pub fn merge(default: &mut Value, overwrite: &Value) {
    match (default, overwrite) {
        (Value::Object(default_map), Value::Object(overwrite_map)) => {
            let mut pruned = Vec::new();
            for (key, value) in overwrite_map {
                let slot = default_map.entry(key.clone()).or_insert(Value::Null);
                merge(slot, value);
                if slot.is_null() {
                    pruned.push(key.clone());
                }
            }
            for key in pruned {
                default_map.remove(&key);
            }
        }
        (default_slot, _) => {
            *default_slot = overwrite.clone();
        }
    }
}

/// Merge two option documents given as strings, returning the merged JSON
/// rendering.
pub fn merge_strings(default: &str, overwrite: &str) -> Result<String> {
    let mut result = parse_options(default, false)?;
    merge(&mut result, &parse_options(overwrite, false)?);
    Ok(result.to_string())
}

fn lower_case(value: &mut Value, current_path: &mut Vec<String>) -> Result<()> {
    match value {
        Value::Object(map) => {
            let protected = CASE_PROTECTED_PATHS.iter().any(|path| {
                path.len() == current_path.len()
                    && path
                        .iter()
                        .zip(current_path.iter())
                        .all(|(a, b)| *a == b.as_str())
            });
            if !protected {
                let mut lowered = Map::new();
                for (key, entry) in std::mem::take(map) {
                    let lower = key.to_lowercase();
                    if lowered.insert(lower.clone(), entry).is_some() {
                        let mut path = current_path.clone();
                        path.push(lower);
                        return Err(Error::BackendConfigSchema {
                            path,
                            message: "duplicate keys".to_owned(),
                        });
                    }
                }
                *map = lowered;
            }
            for (key, entry) in map.iter_mut() {
                current_path.push(key.to_lowercase());
                lower_case(entry, current_path)?;
                current_path.pop();
            }
        }
        Value::Array(entries) => {
            for entry in entries {
                current_path.push(ARRAY_COMPONENT.to_owned());
                lower_case(entry, current_path)?;
                current_path.pop();
            }
        }
        _ => {}
    }
    Ok(())
}

/// Render a JSON value as a string where possible: strings pass through,
/// numbers and booleans are stringified. `None` for anything structured.
pub fn as_string_dynamic(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(if *b { "1" } else { "0" }.to_owned()),
        _ => None,
    }
}

/// Like [`as_string_dynamic`], additionally lower-casing the result.
pub fn as_lower_case_string_dynamic(value: &Value) -> Option<String> {
    as_string_dynamic(value).map(|s| s.to_lowercase())
}

/// A config document plus a shadow tree recording every key that has been
/// consulted. Cloning shares both trees, so readers in different subsystems
/// contribute to one usage record.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    original: Arc<Value>,
    shadow: Arc<Mutex<Value>>,
    position: Vec<String>,
}

impl ConfigSource {
    pub fn new(value: Value) -> Self {
        Self {
            original: Arc::new(value),
            shadow: Arc::new(Mutex::new(Value::Object(Map::new()))),
            position: Vec::new(),
        }
    }

    /// Parse an options string, see [`parse_options`].
    pub fn parse(options: &str, consider_files: bool) -> Result<Self> {
        Ok(Self::new(parse_options(options, consider_files)?))
    }

    pub fn empty() -> Self {
        Self::new(Value::Object(Map::new()))
    }

    /// The whole original document, untraced. Used for wiring that owns
    /// its own usage reporting, like the dataset matcher.
    pub fn document(&self) -> &Value {
        self.original.as_ref()
    }

    /// The subtree this handle points at, if present.
    pub fn value(&self) -> Option<&Value> {
        let mut current = self.original.as_ref();
        for key in &self.position {
            current = current.get(key)?;
        }
        Some(current)
    }

    /// Descend into `key`, recording the visit in the shadow tree.
    pub fn enter(&self, key: &str) -> Self {
        self.shadow_node(|node| {
            if let Value::Object(map) = node {
                map.entry(key.to_owned())
                    .or_insert_with(|| Value::Object(Map::new()));
            }
        });
        let mut child = self.clone();
        child.position.push(key.to_owned());
        child
    }

    /// Read a leaf at `key`, marking it (and only it) as consumed.
    pub fn get(&self, key: &str) -> Option<Value> {
        let value = self.value()?.get(key)?.clone();
        self.shadow_node(|node| {
            if let Value::Object(map) = node {
                map.insert(key.to_owned(), value.clone());
            }
        });
        Some(value)
    }

    /// Whether the subtree contains `key`, without marking it consumed.
    pub fn contains(&self, key: &str) -> bool {
        self.value().map_or(false, |v| v.get(key).is_some())
    }

    /// Mark the entire subtree at the current position as consumed.
    pub fn declare_fully_read(&self) {
        let value = self.value().cloned().unwrap_or(Value::Null);
        let mut shadow = self.shadow.lock();
        let node = position_mut(&mut shadow, &self.position);
        *node = value;
    }

    /// The complement of the shadow: every part of the original document
    /// that was never consulted.
    pub fn invert_shadow(&self) -> Value {
        let mut result = self.original.as_ref().clone();
        invert(&mut result, &self.shadow.lock());
        result
    }

    /// Warn about unused *global* options. Backend subtrees are the
    /// responsibility of their backends and are skipped here.
    pub fn warn_unused_global(&self) {
        let mut unused = self.invert_shadow();
        if let Value::Object(map) = &mut unused {
            for backend in BACKEND_KEYS {
                map.remove(*backend);
            }
            if !map.is_empty() {
                let unused_value = Value::Object(map.clone());
                warn!(
                    unused = %unused_value,
                    "parts of the global config remain unused"
                );
            }
        }
    }

    fn shadow_node(&self, f: impl FnOnce(&mut Value)) {
        let mut shadow = self.shadow.lock();
        f(position_mut(&mut shadow, &self.position));
    }
}

fn position_mut<'v>(root: &'v mut Value, position: &[String]) -> &'v mut Value {
    let mut current = root;
    for key in position {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        current = current
            .as_object_mut()
            .expect("just ensured an object")
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
    }
    current
}

fn invert(result: &mut Value, shadow: &Value) {
    let shadow_map = match shadow {
        Value::Object(map) => map,
        // non-object shadow marks the subtree fully read
        _ => return,
    };
    let result_map = match result {
        Value::Object(map) => map,
        _ => return,
    };
    let mut to_remove = Vec::new();
    for (key, shadow_value) in shadow_map {
        match result_map.get_mut(key) {
            Some(partial @ Value::Object(_)) => {
                invert(partial, shadow_value);
                if partial.as_object().map_or(false, Map::is_empty) {
                    to_remove.push(key.clone());
                }
            }
            Some(_) => to_remove.push(key.clone()),
            None => {}
        }
    }
    for key in to_remove {
        result_map.remove(&key);
    }
}

/// Convert a parsed TOML document into JSON.
pub fn toml_to_json(value: toml::Value) -> Value {
    match value {
        toml::Value::String(s) => Value::String(s),
        toml::Value::Integer(i) => Value::from(i),
        toml::Value::Float(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        toml::Value::Boolean(b) => Value::Bool(b),
        toml::Value::Datetime(dt) => Value::String(dt.to_string()),
        toml::Value::Array(entries) => Value::Array(entries.into_iter().map(toml_to_json).collect()),
        toml::Value::Table(table) => Value::Object(
            table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect(),
        ),
    }
}

/// Convert a JSON value into TOML. Nulls are not representable and error.
pub fn json_to_toml(value: &Value) -> Result<toml::Value> {
    match value {
        Value::Null => Err(Error::TomlValue {
            message: "null has no TOML equivalent".to_owned(),
        }),
        Value::Bool(b) => Ok(toml::Value::Boolean(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(toml::Value::Integer(i))
            } else if let Some(u) = n.as_u64() {
                i64::try_from(u)
                    .map(toml::Value::Integer)
                    .map_err(|_| Error::TomlValue {
                        message: format!("integer {u} exceeds the TOML integer range"),
                    })
            } else {
                Ok(toml::Value::Float(n.as_f64().expect("checked numeric")))
            }
        }
        Value::String(s) => Ok(toml::Value::String(s.clone())),
        Value::Array(entries) => Ok(toml::Value::Array(
            entries.iter().map(json_to_toml).collect::<Result<_>>()?,
        )),
        Value::Object(map) => Ok(toml::Value::Table(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), json_to_toml(v)?)))
                .collect::<Result<_>>()?,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn merge_objects_keywise() {
        let mut a = json!({"x": {"y": 1, "z": 2}, "keep": true});
        merge(&mut a, &json!({"x": {"y": 10}, "new": "v"}));
        assert_eq!(a, json!({"x": {"y": 10, "z": 2}, "keep": true, "new": "v"}));
    }

    #[test]
    fn merge_prunes_nulls_and_replaces_arrays() {
        let mut a = json!({"x": 1, "arr": [1, 2, 3]});
        merge(&mut a, &json!({"x": null, "arr": [9]}));
        assert_eq!(a, json!({"arr": [9]}));
    }

    #[test]
    fn merge_is_idempotent_on_examples() {
        let a = json!({"adios2": {"engine": {"type": "bp4"}}, "n": 3});
        let b = json!({"adios2": {"engine": {"type": "bp5"}}});
        let mut once = a.clone();
        merge(&mut once, &b);
        let mut twice = once.clone();
        merge(&mut twice, &b);
        assert_eq!(once, twice);

        let mut self_merge = a.clone();
        merge(&mut self_merge, &a);
        assert_eq!(self_merge, a);
    }

    proptest! {
        #[test]
        fn merge_self_is_identity(keys in proptest::collection::vec("[a-z]{1,4}", 0..6)) {
            let mut value = serde_json::Map::new();
            for (i, k) in keys.iter().enumerate() {
                value.insert(k.clone(), json!(i));
            }
            let value = Value::Object(value);
            let mut merged = value.clone();
            merge(&mut merged, &value);
            prop_assert_eq!(merged, value);
        }
    }

    #[test]
    fn keys_are_lower_cased_except_protected_paths() {
        let parsed = parse_options(
            r#"{
                "ADIOS2": {
                    "Engine": {
                        "Type": "bp4",
                        "Parameters": {"BufferGrowthFactor": "2"}
                    }
                },
                "Defer_Iteration_Parsing": true
            }"#,
            false,
        )
        .unwrap();
        assert_eq!(parsed["adios2"]["engine"]["type"], json!("bp4"));
        assert_eq!(
            parsed["adios2"]["engine"]["parameters"]["BufferGrowthFactor"],
            json!("2")
        );
        assert_eq!(parsed["defer_iteration_parsing"], json!(true));
    }

    #[test]
    fn duplicate_keys_after_lower_casing_error() {
        let err = parse_options(r#"{"Backend": 1, "backend": 2}"#, false).unwrap_err();
        assert!(matches!(err, Error::BackendConfigSchema { .. }));
    }

    #[test]
    fn operator_parameters_in_arrays_keep_case() {
        let parsed = parse_options(
            r#"{"adios2": {"dataset": {"operators": [
                {"Type": "zlib", "parameters": {"CompressionLevel": "9"}}
            ]}}}"#,
            false,
        )
        .unwrap();
        let op = &parsed["adios2"]["dataset"]["operators"][0];
        assert_eq!(op["type"], json!("zlib"));
        assert_eq!(op["parameters"]["CompressionLevel"], json!("9"));
    }

    #[test]
    fn shadow_tracks_reads() {
        let config = ConfigSource::new(json!({
            "backend": "json",
            "json": {"dataset": {"mode": "template"}},
            "stray": 1
        }));
        assert_eq!(config.get("backend"), Some(json!("json")));
        config.enter("json").declare_fully_read();

        let unused = config.invert_shadow();
        assert_eq!(unused, json!({"stray": 1}));
    }

    #[test]
    fn untouched_document_is_fully_unused() {
        let config = ConfigSource::new(json!({"a": {"b": 1}}));
        assert_eq!(config.invert_shadow(), json!({"a": {"b": 1}}));
    }

    #[test]
    fn toml_round_trip() {
        let json = json!({"backend": "toml", "n": 3, "nested": {"f": 1.5, "flags": [true, false]}});
        let toml_value = json_to_toml(&json).unwrap();
        assert_eq!(toml_to_json(toml_value), json);
    }

    #[test]
    fn file_indirection() {
        let dir = tempdir();
        let path = dir.join("cfg.json");
        std::fs::write(&path, r#"{"Backend": "json"}"#).unwrap();
        let parsed = parse_options(&format!("  @{} ", path.display()), true).unwrap();
        assert_eq!(parsed["backend"], json!("json"));

        let toml_path = dir.join("cfg.toml");
        std::fs::write(&toml_path, "backend = \"toml\"\n").unwrap();
        let parsed = parse_options(&format!("@{}", toml_path.display()), true).unwrap();
        assert_eq!(parsed["backend"], json!("toml"));
    }

    fn tempdir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "pmd_config_test_{}_{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
