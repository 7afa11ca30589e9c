//! Per-dataset backend options selected by regex patterns.
//!
//! A backend's `dataset` option is either a plain object (one configuration
//! for every dataset) or an array of `{"select": <regex or [regex]>, "cfg":
//! <object>}` entries plus at most one entry without `select` that acts as
//! the default. The first matching pattern wins.

use crate::{Error, Result, BACKEND_KEYS};
use regex::Regex;
use serde_json::{Map, Value};
use snafu::ResultExt;

const PATTERN_SHAPE_MSG: &str = "each pattern entry must be an object with keys \
     'select' (a string or array of strings, optional for the default entry) and 'cfg'";

#[derive(Debug)]
struct Pattern {
    select: Regex,
    config: Value,
}

/// Pattern list for one backend's `dataset` key.
#[derive(Debug, Default)]
pub struct MatcherPerBackend {
    patterns: Vec<Pattern>,
    default: Value,
}

impl MatcherPerBackend {
    /// Build from the value found under `<backend>.dataset`.
    fn new(backend: &str, dataset_config: &Value) -> Result<Self> {
        match dataset_config {
            Value::Object(_) => Ok(Self {
                patterns: Vec::new(),
                default: dataset_config.clone(),
            }),
            Value::Array(entries) => {
                let mut patterns = Vec::new();
                let mut default = None;
                for entry in entries {
                    read_pattern(backend, entry, &mut patterns, &mut default)?;
                }
                Ok(Self {
                    patterns,
                    default: default.unwrap_or_else(|| Value::Object(Map::new())),
                })
            }
            _ => Err(Error::BackendConfigSchema {
                path: vec![backend.to_owned(), "dataset".to_owned()],
                message: "expected an object or an array".to_owned(),
            }),
        }
    }

    /// The configuration for a dataset at the given backend path.
    fn get(&self, dataset_path: &str) -> &Value {
        self.patterns
            .iter()
            .find(|pattern| pattern.select.is_match(dataset_path))
            .map(|pattern| &pattern.config)
            .unwrap_or(&self.default)
    }
}

fn read_pattern(
    backend: &str,
    entry: &Value,
    patterns: &mut Vec<Pattern>,
    default: &mut Option<Value>,
) -> Result<()> {
    let schema_error = |message: String| Error::BackendConfigSchema {
        path: vec![backend.to_owned(), "dataset".to_owned()],
        message,
    };
    let object = entry
        .as_object()
        .ok_or_else(|| schema_error(PATTERN_SHAPE_MSG.to_owned()))?;
    let config = object
        .get("cfg")
        .ok_or_else(|| schema_error(PATTERN_SHAPE_MSG.to_owned()))?
        .clone();
    let Some(select) = object.get("select") else {
        if default.is_some() {
            return Err(schema_error(
                "specified more than one default configuration".to_owned(),
            ));
        }
        *default = Some(config);
        return Ok(());
    };
    let pattern_str = match select {
        Value::String(s) => s.clone(),
        Value::Array(alternatives) => {
            let mut combined = String::from("($^)");
            for alternative in alternatives {
                let s = alternative
                    .as_str()
                    .ok_or_else(|| schema_error(PATTERN_SHAPE_MSG.to_owned()))?;
                combined.push_str(&format!("|({s})"));
            }
            combined
        }
        _ => return Err(schema_error(PATTERN_SHAPE_MSG.to_owned())),
    };
    let select = Regex::new(&pattern_str).context(crate::DatasetPatternSnafu {
        pattern: pattern_str.clone(),
    })?;
    patterns.push(Pattern { select, config });
    Ok(())
}

/// Resolves dataset-specific configuration across every known backend.
#[derive(Debug, Default)]
pub struct DatasetMatcher {
    per_backend: Vec<(String, MatcherPerBackend)>,
}

impl DatasetMatcher {
    /// Scan a full config document for `<backend>.dataset` entries.
    pub fn new(config: &Value) -> Result<Self> {
        let root = match config {
            Value::Object(map) => map,
            _ => {
                return Err(Error::BackendConfigSchema {
                    path: vec![],
                    message: "expected an object for the configuration".to_owned(),
                })
            }
        };
        let mut per_backend = Vec::new();
        for (backend, backend_config) in root {
            if !BACKEND_KEYS.contains(&backend.as_str()) {
                continue;
            }
            let map = backend_config
                .as_object()
                .ok_or_else(|| Error::BackendConfigSchema {
                    path: vec![backend.clone()],
                    message: "each backend's configuration must be an object".to_owned(),
                })?;
            if let Some(dataset_config) = map.get("dataset") {
                per_backend.push((
                    backend.clone(),
                    MatcherPerBackend::new(backend, dataset_config)?,
                ));
            }
        }
        Ok(Self { per_backend })
    }

    /// The merged per-backend dataset configuration for one dataset path,
    /// e.g. `/data/100/meshes/E/x`.
    pub fn get(&self, dataset_path: &str) -> Value {
        let mut result = Map::new();
        for (backend, matcher) in &self.per_backend {
            let config = matcher.get(dataset_path);
            if config.as_object().map_or(true, Map::is_empty) {
                continue;
            }
            let mut backend_obj = Map::new();
            backend_obj.insert("dataset".to_owned(), config.clone());
            result.insert(backend.clone(), Value::Object(backend_obj));
        }
        Value::Object(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn matcher(config: Value) -> DatasetMatcher {
        DatasetMatcher::new(&config).unwrap()
    }

    #[test]
    fn plain_object_applies_to_all() {
        let m = matcher(json!({"json": {"dataset": {"mode": "template"}}}));
        assert_eq!(
            m.get("/data/1/meshes/E/x"),
            json!({"json": {"dataset": {"mode": "template"}}})
        );
    }

    #[test]
    fn first_matching_pattern_wins() {
        let m = matcher(json!({"json": {"dataset": [
            {"select": ".*/meshes/.*", "cfg": {"mode": "mesh"}},
            {"select": ".*", "cfg": {"mode": "any"}},
            {"cfg": {"mode": "default"}}
        ]}}));
        assert_eq!(
            m.get("/data/1/meshes/E/x"),
            json!({"json": {"dataset": {"mode": "mesh"}}})
        );
        assert_eq!(
            m.get("/data/1/particles/e/position/x"),
            json!({"json": {"dataset": {"mode": "any"}}})
        );
    }

    #[test]
    fn no_match_falls_back_to_default() {
        let m = matcher(json!({"json": {"dataset": [
            {"select": ".*/B/.*", "cfg": {"mode": "b-field"}},
            {"cfg": {"mode": "default"}}
        ]}}));
        assert_eq!(
            m.get("/data/1/meshes/E/x"),
            json!({"json": {"dataset": {"mode": "default"}}})
        );
    }

    #[test]
    fn select_may_be_an_array_of_alternatives() {
        let m = matcher(json!({"json": {"dataset": [
            {"select": [".*/E/.*", ".*/B/.*"], "cfg": {"mode": "field"}},
            {"cfg": {}}
        ]}}));
        assert_eq!(
            m.get("/data/1/meshes/B/z"),
            json!({"json": {"dataset": {"mode": "field"}}})
        );
        assert_eq!(m.get("/data/1/meshes/rho"), json!({}));
    }

    #[test]
    fn two_defaults_are_rejected() {
        let err = DatasetMatcher::new(&json!({"json": {"dataset": [
            {"cfg": {}},
            {"cfg": {}}
        ]}}))
        .unwrap_err();
        assert!(matches!(err, Error::BackendConfigSchema { .. }));
    }

    #[test]
    fn non_backend_keys_are_ignored() {
        let m = matcher(json!({
            "defer_iteration_parsing": true,
            "hdf5": {"dataset": {"chunks": "auto"}}
        }));
        assert_eq!(
            m.get("/data/1/meshes/E/x"),
            json!({"hdf5": {"dataset": {"chunks": "auto"}}})
        );
    }
}
