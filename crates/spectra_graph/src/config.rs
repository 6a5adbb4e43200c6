// SPDX-License-Identifier: MIT OR Apache-2.0
//! Stage configuration values and their per-type schemas.
//!
//! A stage type declares its options once as a [`ConfigSchema`]. Any
//! [`StageConfig`] handed to the registry is checked against it: unknown
//! names, wrong value kinds and out-of-range values are rejected, and
//! missing options are filled with their defaults.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single configuration value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OptionValue {
    /// Boolean flag
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Enumerant name
    Enum(String),
}

impl OptionValue {
    /// Short name of the value kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Enum(_) => "enum",
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Enum(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for OptionValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for OptionValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<f32> for OptionValue {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        Self::Enum(value.to_string())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        Self::Enum(value)
    }
}

/// Declared kind and valid range of an option
#[derive(Debug, Clone, PartialEq)]
pub enum OptionKind {
    /// Boolean flag
    Bool,
    /// Integer within an inclusive range
    Int {
        /// Smallest accepted value
        min: i64,
        /// Largest accepted value
        max: i64,
    },
    /// Float within an inclusive range
    Float {
        /// Smallest accepted value
        min: f64,
        /// Largest accepted value
        max: f64,
    },
    /// One of a fixed set of names
    Enum(&'static [&'static str]),
}

/// Declaration of one option of a stage type
#[derive(Debug, Clone)]
pub struct OptionSpec {
    /// Option name as used in configurations
    pub name: &'static str,
    /// Kind and range
    pub kind: OptionKind,
    /// Value used when the option is not given
    pub default: OptionValue,
    /// Description
    pub description: &'static str,
}

impl OptionSpec {
    /// Declare a boolean option
    pub fn bool(name: &'static str, default: bool) -> Self {
        Self {
            name,
            kind: OptionKind::Bool,
            default: OptionValue::Bool(default),
            description: "",
        }
    }

    /// Declare an integer option with an inclusive range
    pub fn int(name: &'static str, default: i64, min: i64, max: i64) -> Self {
        Self {
            name,
            kind: OptionKind::Int { min, max },
            default: OptionValue::Int(default),
            description: "",
        }
    }

    /// Declare a float option with an inclusive range
    pub fn float(name: &'static str, default: f64, min: f64, max: f64) -> Self {
        Self {
            name,
            kind: OptionKind::Float { min, max },
            default: OptionValue::Float(default),
            description: "",
        }
    }

    /// Declare an enumerated option
    pub fn choice(
        name: &'static str,
        variants: &'static [&'static str],
        default: &'static str,
    ) -> Self {
        Self {
            name,
            kind: OptionKind::Enum(variants),
            default: OptionValue::Enum(default.to_string()),
            description: "",
        }
    }

    /// Set the description
    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Check a value against this declaration, returning the normalized value.
    ///
    /// Integers are accepted for float options; everything else must match
    /// the declared kind exactly.
    pub fn check(&self, value: &OptionValue) -> Result<OptionValue, String> {
        match (&self.kind, value) {
            (OptionKind::Bool, OptionValue::Bool(_)) => Ok(value.clone()),
            (OptionKind::Int { min, max }, OptionValue::Int(v)) => {
                if v < min || v > max {
                    Err(format!("{v} is outside [{min}, {max}]"))
                } else {
                    Ok(value.clone())
                }
            }
            (OptionKind::Float { min, max }, OptionValue::Float(v)) => check_float(*v, *min, *max),
            (OptionKind::Float { min, max }, OptionValue::Int(v)) => {
                check_float(*v as f64, *min, *max)
            }
            (OptionKind::Enum(variants), OptionValue::Enum(name)) => {
                if variants.contains(&name.as_str()) {
                    Ok(value.clone())
                } else {
                    Err(format!(
                        "'{name}' is not one of [{}]",
                        variants.join(", ")
                    ))
                }
            }
            (kind, value) => Err(format!(
                "expected {}, got {}",
                kind_name(kind),
                value.kind()
            )),
        }
    }
}

fn check_float(v: f64, min: f64, max: f64) -> Result<OptionValue, String> {
    if !v.is_finite() || v < min || v > max {
        Err(format!("{v} is outside [{min}, {max}]"))
    } else {
        Ok(OptionValue::Float(v))
    }
}

fn kind_name(kind: &OptionKind) -> &'static str {
    match kind {
        OptionKind::Bool => "bool",
        OptionKind::Int { .. } => "int",
        OptionKind::Float { .. } => "float",
        OptionKind::Enum(_) => "enum",
    }
}

/// The declared option set of a stage type
#[derive(Debug, Clone, Default)]
pub struct ConfigSchema {
    options: Vec<OptionSpec>,
}

impl ConfigSchema {
    /// Create an empty schema
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an option declaration
    pub fn option(mut self, spec: OptionSpec) -> Self {
        self.options.push(spec);
        self
    }

    /// Look up an option declaration
    pub fn get(&self, name: &str) -> Option<&OptionSpec> {
        self.options.iter().find(|o| o.name == name)
    }

    /// All declared options, in declaration order
    pub fn options(&self) -> impl Iterator<Item = &OptionSpec> {
        self.options.iter()
    }

    /// Validate `config` and fill in defaults.
    ///
    /// The result lists every declared option in declaration order.
    pub fn resolve(&self, stage_type: &str, config: &StageConfig) -> Result<StageConfig, ConfigError> {
        self.merge(stage_type, &StageConfig::new(), config)
    }

    /// Validate `update` and apply it on top of `current`.
    pub fn merge(
        &self,
        stage_type: &str,
        current: &StageConfig,
        update: &StageConfig,
    ) -> Result<StageConfig, ConfigError> {
        for (name, value) in update.iter() {
            let spec = self.get(name).ok_or_else(|| ConfigError::UnknownOption {
                stage_type: stage_type.to_string(),
                option: name.to_string(),
            })?;
            spec.check(value)
                .map_err(|reason| ConfigError::InvalidOptionValue {
                    stage_type: stage_type.to_string(),
                    option: name.to_string(),
                    reason,
                })?;
        }

        let mut resolved = StageConfig::new();
        for spec in &self.options {
            let value = update
                .get(spec.name)
                .or_else(|| current.get(spec.name))
                .unwrap_or(&spec.default);
            // Values taken from `current` were checked when it was resolved.
            let value = spec.check(value).unwrap_or_else(|_| spec.default.clone());
            resolved.set(spec.name, value);
        }
        Ok(resolved)
    }
}

/// Option name to value mapping for one stage
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageConfig {
    values: IndexMap<String, OptionValue>,
}

impl StageConfig {
    /// Create an empty configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter
    pub fn with(mut self, name: impl Into<String>, value: impl Into<OptionValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Set an option
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<OptionValue>) {
        self.values.insert(name.into(), value.into());
    }

    /// Get an option
    pub fn get(&self, name: &str) -> Option<&OptionValue> {
        self.values.get(name)
    }

    /// Get a boolean option
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.get(name)? {
            OptionValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Get an integer option
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.get(name)? {
            OptionValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Get a float option
    pub fn get_float(&self, name: &str) -> Option<f64> {
        match self.get(name)? {
            OptionValue::Float(v) => Some(*v),
            OptionValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Get an enumerated option
    pub fn get_enum(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            OptionValue::Enum(v) => Some(v.as_str()),
            _ => None,
        }
    }

    /// Iterate over options in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &OptionValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of options set
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no options are set
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>, V: Into<OptionValue>> FromIterator<(K, V)> for StageConfig {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut config = Self::new();
        for (name, value) in iter {
            config.set(name, value);
        }
        config
    }
}

/// Error raised while creating or reconfiguring a stage
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// No stage type with this name is registered
    #[error("Unknown stage type: {0}")]
    UnknownStageType(String),

    /// The option is not declared by the stage type
    #[error("Unknown option '{option}' for stage type {stage_type}")]
    UnknownOption {
        /// Stage type name
        stage_type: String,
        /// Offending option name
        option: String,
    },

    /// The value has the wrong kind or is out of range
    #[error("Invalid value for option '{option}' of stage type {stage_type}: {reason}")]
    InvalidOptionValue {
        /// Stage type name
        stage_type: String,
        /// Offending option name
        option: String,
        /// What is wrong with the value
        reason: String,
    },

    /// The configuration makes the stage type declare a port name twice
    #[error("Stage type {stage_type} declares port '{port}' twice for this configuration")]
    DuplicatePort {
        /// Stage type name
        stage_type: String,
        /// Repeated port name
        port: String,
    },

    /// A configuration update would change the stage's ports
    #[error("Configuration update would change the ports of stage '{stage}'")]
    PortLayoutChanged {
        /// Stage instance name
        stage: String,
    },
}
