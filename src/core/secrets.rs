//! Stripping of secret material from stage configuration before persistence

use regex::Regex;
use serde_json::{Map, Value};

/// Matched anywhere in a key once separators are removed, so `db_password`,
/// `ftpPassword` and `AWS_SECRET_ACCESS_KEY` all count
const DEFAULT_SECRET_PATTERN: &str =
    r"(?i)(credential|password|passphrase|secret|token|privatekey|apikey)";

/// Removes config keys that hold credentials
#[derive(Debug, Clone)]
pub struct SecretFilter {
    default: Regex,
    extra: Vec<Regex>,
}

impl SecretFilter {
    /// Create a filter from the default key pattern plus extra patterns
    ///
    /// Extra patterns are matched case-insensitively against whole keys.
    pub fn new(extra_patterns: &[String]) -> Result<Self, regex::Error> {
        let extra = extra_patterns
            .iter()
            .map(|pattern| Regex::new(&format!("(?i)^(?:{})$", pattern)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            default: Regex::new(DEFAULT_SECRET_PATTERN)?,
            extra,
        })
    }

    /// Whether a config key names secret material
    pub fn is_secret(&self, key: &str) -> bool {
        let squashed: String = key
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | '.' | ' '))
            .collect();
        self.default.is_match(&squashed) || self.extra.iter().any(|p| p.is_match(key))
    }

    /// Copy of `config` with every secret key removed, at any depth
    pub fn strip(&self, config: &Map<String, Value>) -> Map<String, Value> {
        config
            .iter()
            .filter(|(key, _)| !self.is_secret(key))
            .map(|(key, value)| (key.clone(), self.strip_value(value)))
            .collect()
    }

    fn strip_value(&self, value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(self.strip(map)),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.strip_value(v)).collect()),
            other => other.clone(),
        }
    }
}
