//! [`Configuration`] – immutable, hierarchical key/value tree.
//!
//! A unit receives its configuration exactly once, in its initialization
//! hook.  Entries are scalars (string, integer, float, boolean), nested
//! configurations, or ordered lists of nested configurations.
//!
//! Trees are assembled with a [`ConfigurationBuilder`] (programmatically or
//! by the definition parser) and never mutated afterwards.
//!
//! # Accessors
//!
//! | Accessor | Missing key | Wrong kind |
//! |---|---|---|
//! | `get_*` | default value | default value |
//! | `require_*` | [`ConfigError::MissingKey`] | [`ConfigError::WrongKind`] |
//!
//! # Example
//!
//! ```rust
//! use robokit_types::Configuration;
//!
//! let config = Configuration::builder()
//!     .with_string("target", "consumer")
//!     .with_i64("address", 0x20)
//!     .build();
//!
//! assert_eq!(config.get_string("target", "none"), "consumer");
//! assert_eq!(config.get_i64("bus", 1), 1);
//! assert!(config.require_string("missing").is_err());
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// A single configuration entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<Configuration>),
    Config(Configuration),
}

impl ConfigValue {
    /// Human-readable kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ConfigValue::Boolean(_) => "boolean",
            ConfigValue::Integer(_) => "integer",
            ConfigValue::Float(_) => "float",
            ConfigValue::String(_) => "string",
            ConfigValue::List(_) => "list",
            ConfigValue::Config(_) => "configuration",
        }
    }
}

/// Read-only tree of named entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration {
    entries: BTreeMap<String, ConfigValue>,
}

impl Configuration {
    /// A configuration without any entries.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> ConfigurationBuilder {
        ConfigurationBuilder::default()
    }

    pub fn value(&self, key: &str) -> Option<&ConfigValue> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Entry names in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // -----------------------------------------------------------------------
    // Lenient accessors
    // -----------------------------------------------------------------------

    pub fn get_string<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        match self.entries.get(key) {
            Some(ConfigValue::String(s)) => s,
            _ => default,
        }
    }

    pub fn get_i64(&self, key: &str, default: i64) -> i64 {
        match self.entries.get(key) {
            Some(ConfigValue::Integer(i)) => *i,
            _ => default,
        }
    }

    /// Integers are widened, so `speed = 3` reads as `3.0`.
    pub fn get_f64(&self, key: &str, default: f64) -> f64 {
        match self.entries.get(key) {
            Some(ConfigValue::Float(f)) => *f,
            Some(ConfigValue::Integer(i)) => *i as f64,
            _ => default,
        }
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.entries.get(key) {
            Some(ConfigValue::Boolean(b)) => *b,
            _ => default,
        }
    }

    /// Nested configuration stored under `key`, if any.
    pub fn child(&self, key: &str) -> Option<&Configuration> {
        match self.entries.get(key) {
            Some(ConfigValue::Config(c)) => Some(c),
            _ => None,
        }
    }

    /// List of nested configurations stored under `key`; empty when absent.
    pub fn children(&self, key: &str) -> &[Configuration] {
        match self.entries.get(key) {
            Some(ConfigValue::List(list)) => list,
            _ => &[],
        }
    }

    // -----------------------------------------------------------------------
    // Strict accessors
    // -----------------------------------------------------------------------

    /// # Errors
    ///
    /// [`ConfigError::MissingKey`] when absent, [`ConfigError::WrongKind`]
    /// when the entry is not a string.
    pub fn require_string(&self, key: &str) -> Result<&str, ConfigError> {
        match self.require(key)? {
            ConfigValue::String(s) => Ok(s),
            other => Err(wrong_kind(key, "string", other)),
        }
    }

    pub fn require_i64(&self, key: &str) -> Result<i64, ConfigError> {
        match self.require(key)? {
            ConfigValue::Integer(i) => Ok(*i),
            other => Err(wrong_kind(key, "integer", other)),
        }
    }

    pub fn require_f64(&self, key: &str) -> Result<f64, ConfigError> {
        match self.require(key)? {
            ConfigValue::Float(f) => Ok(*f),
            ConfigValue::Integer(i) => Ok(*i as f64),
            other => Err(wrong_kind(key, "float", other)),
        }
    }

    pub fn require_bool(&self, key: &str) -> Result<bool, ConfigError> {
        match self.require(key)? {
            ConfigValue::Boolean(b) => Ok(*b),
            other => Err(wrong_kind(key, "boolean", other)),
        }
    }

    pub fn require_child(&self, key: &str) -> Result<&Configuration, ConfigError> {
        match self.require(key)? {
            ConfigValue::Config(c) => Ok(c),
            other => Err(wrong_kind(key, "configuration", other)),
        }
    }

    fn require(&self, key: &str) -> Result<&ConfigValue, ConfigError> {
        self.entries.get(key).ok_or_else(|| ConfigError::missing(key))
    }
}

fn wrong_kind(key: &str, expected: &'static str, found: &ConfigValue) -> ConfigError {
    ConfigError::WrongKind {
        key: key.to_string(),
        expected,
        found: found.kind(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Mutable accumulator that produces an immutable [`Configuration`].
///
/// Inserting an existing key replaces the previous entry.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationBuilder {
    entries: BTreeMap<String, ConfigValue>,
}

impl ConfigurationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: ConfigValue) -> &mut Self {
        self.entries.insert(key.into(), value);
        self
    }

    /// Append `config` to the list stored under `key`, creating the list when
    /// needed.  A non-list entry under `key` is replaced.
    pub fn push_child(&mut self, key: impl Into<String>, config: Configuration) -> &mut Self {
        let entry = self
            .entries
            .entry(key.into())
            .or_insert_with(|| ConfigValue::List(Vec::new()));
        match entry {
            ConfigValue::List(list) => list.push(config),
            other => *other = ConfigValue::List(vec![config]),
        }
        self
    }

    pub fn with_string(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, ConfigValue::String(value.into()));
        self
    }

    pub fn with_i64(mut self, key: impl Into<String>, value: i64) -> Self {
        self.insert(key, ConfigValue::Integer(value));
        self
    }

    pub fn with_f64(mut self, key: impl Into<String>, value: f64) -> Self {
        self.insert(key, ConfigValue::Float(value));
        self
    }

    pub fn with_bool(mut self, key: impl Into<String>, value: bool) -> Self {
        self.insert(key, ConfigValue::Boolean(value));
        self
    }

    pub fn with_child(mut self, key: impl Into<String>, child: Configuration) -> Self {
        self.insert(key, ConfigValue::Config(child));
        self
    }

    pub fn with_list(mut self, key: impl Into<String>, list: Vec<Configuration>) -> Self {
        self.insert(key, ConfigValue::List(list));
        self
    }

    pub fn build(self) -> Configuration {
        Configuration {
            entries: self.entries,
        }
    }
}
