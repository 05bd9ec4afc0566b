//! YAML decoding via yaml-rust2 into serde_json values
//!
//! Everything downstream (DynamicObject decoding, transforms, hashing) works on
//! `serde_json::Value`, so YAML only ever appears at the edges.

use serde_json::{Map, Number, Value};
use yaml_rust2::{Yaml, YamlLoader};

use crate::Error;

/// Decode a single YAML document into a JSON value.
///
/// Multi-document input yields only the first document; empty input is `Null`.
pub fn parse_yaml(input: &str) -> Result<Value, Error> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| Error::serialization(e.to_string()))?;
    match docs.into_iter().next() {
        Some(doc) => yaml_to_json(doc),
        None => Ok(Value::Null),
    }
}

/// Decode every document of a multi-document YAML string.
pub fn parse_yaml_multi(input: &str) -> Result<Vec<Value>, Error> {
    let docs = YamlLoader::load_from_str(input).map_err(|e| Error::serialization(e.to_string()))?;
    docs.into_iter().map(yaml_to_json).collect()
}

/// Decode a YAML file from disk.
pub fn read_yaml_file(path: &std::path::Path) -> Result<Value, Error> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::serialization(format!("reading {}: {}", path.display(), e))
    })?;
    parse_yaml(&content)
        .map_err(|e| Error::serialization(format!("decoding {}: {}", path.display(), e)))
}

fn yaml_to_json(yaml: Yaml) -> Result<Value, Error> {
    Ok(match yaml {
        Yaml::Null => Value::Null,
        Yaml::Boolean(b) => Value::Bool(b),
        Yaml::Integer(i) => Value::Number(i.into()),
        Yaml::Real(s) => real_to_json(&s)?,
        Yaml::String(s) => Value::String(s),
        Yaml::Array(items) => Value::Array(
            items
                .into_iter()
                .map(yaml_to_json)
                .collect::<Result<_, _>>()?,
        ),
        Yaml::Hash(entries) => {
            let mut map = Map::with_capacity(entries.len());
            for (key, value) in entries {
                map.insert(mapping_key(key)?, yaml_to_json(value)?);
            }
            Value::Object(map)
        }
        Yaml::Alias(_) => return Err(Error::serialization("YAML aliases are not supported")),
        Yaml::BadValue => return Err(Error::serialization("invalid YAML value")),
    })
}

/// YAML floats include `.inf` and `.nan`, which JSON cannot carry; they decode to null
fn real_to_json(raw: &str) -> Result<Value, Error> {
    let parsed = match raw.trim_start_matches(['+', '-']) {
        ".inf" | ".Inf" | ".INF" | ".nan" | ".NaN" | ".NAN" => return Ok(Value::Null),
        _ => raw.parse::<f64>(),
    };
    let f = parsed.map_err(|e| Error::serialization(format!("invalid float {raw:?}: {e}")))?;
    Ok(Number::from_f64(f).map_or(Value::Null, Value::Number))
}

/// Scalar mapping keys become strings, as they would in a JSON object
fn mapping_key(key: Yaml) -> Result<String, Error> {
    match key {
        Yaml::String(s) | Yaml::Real(s) => Ok(s),
        Yaml::Integer(i) => Ok(i.to_string()),
        Yaml::Boolean(b) => Ok(b.to_string()),
        Yaml::Null => Ok("null".to_string()),
        _ => Err(Error::serialization("YAML mapping keys must be scalars")),
    }
}
