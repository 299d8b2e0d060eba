use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use super::traits::PluginError;

/// Value type of a plugin option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionKind {
    String,
    Bool,
    Int,
}

impl fmt::Display for OptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OptionKind::String => "string",
            OptionKind::Bool => "bool",
            OptionKind::Int => "int",
        };
        f.write_str(name)
    }
}

/// Declared plugin option
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionSpec {
    pub key: String,
    pub kind: OptionKind,
    pub default: Option<Value>,
    pub required: bool,
    pub comment: Option<String>,
}

impl OptionSpec {
    pub fn string(key: impl Into<String>) -> Self {
        Self::new(key, OptionKind::String)
    }

    pub fn bool(key: impl Into<String>, default: bool) -> Self {
        Self::new(key, OptionKind::Bool).with_default(Value::Bool(default))
    }

    pub fn int(key: impl Into<String>, default: i64) -> Self {
        Self::new(key, OptionKind::Int).with_default(Value::from(default))
    }

    fn new(key: impl Into<String>, kind: OptionKind) -> Self {
        Self {
            key: key.into(),
            kind,
            default: None,
            required: false,
            comment: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Check `value` against this option's kind, coercing CLI strings
    fn coerce(&self, value: Value) -> Result<Value, PluginError> {
        let invalid = |reason: String| PluginError::InvalidOption {
            key: self.key.clone(),
            reason,
        };

        match (self.kind, value) {
            (OptionKind::String, Value::String(s)) => Ok(Value::String(s)),
            (OptionKind::Bool, Value::Bool(b)) => Ok(Value::Bool(b)),
            (OptionKind::Bool, Value::String(s)) => s
                .trim()
                .parse::<bool>()
                .map(Value::Bool)
                .map_err(|_| invalid(format!("expected bool, got '{}'", s))),
            (OptionKind::Int, Value::Number(n)) if n.is_i64() => Ok(Value::Number(n)),
            (OptionKind::Int, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| invalid(format!("expected int, got '{}'", s))),
            (kind, other) => Err(invalid(format!("expected {}, got {}", kind, other))),
        }
    }
}

/// Option values resolved against a plugin's [`OptionSpec`]s
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginOptions {
    values: Map<String, Value>,
}

impl PluginOptions {
    /// Apply defaults, overlay `provided` and validate the result
    ///
    /// Keys match case-insensitively. Unknown keys and missing required
    /// options are rejected.
    pub fn resolve(specs: &[OptionSpec], provided: &Map<String, Value>) -> Result<Self, PluginError> {
        if let Some(unknown) = provided
            .keys()
            .find(|key| !specs.iter().any(|spec| spec.key.eq_ignore_ascii_case(key)))
        {
            return Err(PluginError::InvalidOption {
                key: unknown.clone(),
                reason: "unknown option".to_string(),
            });
        }

        let mut values = Map::new();
        for spec in specs {
            let given = provided
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(&spec.key))
                .map(|(_, value)| value);

            match given.or(spec.default.as_ref()) {
                Some(value) => {
                    values.insert(spec.key.clone(), spec.coerce(value.clone())?);
                }
                None if spec.required => {
                    return Err(PluginError::MissingOption(spec.key.clone()));
                }
                None => {}
            }
        }

        Ok(Self { values })
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.values.get(key).and_then(Value::as_bool)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.values.get(key).and_then(Value::as_i64)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
