// Shared deserialization helpers for the provider schemas.

use serde::{Deserialize, Deserializer};
use std::collections::HashMap;

/// A field that accepts either one value or a list of values.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T: Clone> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(v) => vec![v],
            OneOrMany::Many(v) => v,
        }
    }
}

impl OneOrMany<String> {
    pub fn first(self) -> String {
        match self {
            OneOrMany::One(v) => v,
            OneOrMany::Many(v) => v.into_iter().next().unwrap_or_default(),
        }
    }
}

/// YAML scalars that should land as strings: numbers and booleans are
/// rendered rather than rejected.
pub fn scalar_to_string(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Deserialize a mapping whose values may be strings, numbers, or
/// booleans into `HashMap<String, String>`.
pub fn string_map<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: HashMap<String, serde_yaml::Value> = HashMap::deserialize(deserializer)?;
    let mut out = HashMap::with_capacity(raw.len());
    for (key, value) in raw {
        match scalar_to_string(&value) {
            Some(text) => {
                out.insert(key, text);
            }
            None => {
                return Err(serde::de::Error::custom(format!(
                    "value for '{key}' must be a scalar"
                )))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Doc {
        #[serde(deserialize_with = "string_map")]
        env: HashMap<String, String>,
    }

    #[test]
    fn test_string_map_accepts_scalars() {
        let doc: Doc = serde_yaml::from_str("env:\n  A: text\n  B: 42\n  C: true\n").unwrap();
        assert_eq!(doc.env.get("A").map(String::as_str), Some("text"));
        assert_eq!(doc.env.get("B").map(String::as_str), Some("42"));
        assert_eq!(doc.env.get("C").map(String::as_str), Some("true"));
    }

    #[test]
    fn test_one_or_many() {
        let one: OneOrMany<String> = serde_yaml::from_str("build").unwrap();
        assert_eq!(one.into_vec(), vec!["build"]);
        let many: OneOrMany<String> = serde_yaml::from_str("[a, b]").unwrap();
        assert_eq!(many.into_vec(), vec!["a", "b"]);
    }
}
