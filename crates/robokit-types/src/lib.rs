//! `robokit-types` – shared vocabulary of the unit runtime.
//!
//! Leaf crate used by every other crate in the workspace.
//!
//! # Modules
//!
//! - [`config`] – [`Configuration`][config::Configuration]: the immutable,
//!   hierarchical key/value tree handed to a unit exactly once, at
//!   initialization.
//!
//! The crate root holds the [`LifecycleState`] enumeration and the error
//! enums shared by the builder, the context, and unit implementations.

pub mod config;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use config::{ConfigValue, Configuration, ConfigurationBuilder};

// ─────────────────────────────────────────────────────────────────────────────
// LifecycleState
// ─────────────────────────────────────────────────────────────────────────────

/// Operational phase of a unit, or of a whole context.
///
/// The normal progression is
/// `Uninitialized → Initialized → Starting → Started → Stopping → Stopped → ShutDown`.
/// [`LifecycleState::Failed`] is reachable from every state and absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Starting,
    Started,
    Stopping,
    /// Stopped and waiting for (or in the middle of) shutdown.
    Stopped,
    ShutDown,
    Failed,
}

impl LifecycleState {
    /// `true` for states no further lifecycle command can leave.
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::ShutDown | LifecycleState::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Starting => "starting",
            LifecycleState::Started => "started",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
            LifecycleState::ShutDown => "shut_down",
            LifecycleState::Failed => "failed",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<LifecycleState> for u8 {
    fn from(state: LifecycleState) -> u8 {
        match state {
            LifecycleState::Uninitialized => 0,
            LifecycleState::Initialized => 1,
            LifecycleState::Starting => 2,
            LifecycleState::Started => 3,
            LifecycleState::Stopping => 4,
            LifecycleState::Stopped => 5,
            LifecycleState::ShutDown => 6,
            LifecycleState::Failed => 7,
        }
    }
}

impl TryFrom<u8> for LifecycleState {
    type Error = u8;

    fn try_from(raw: u8) -> Result<Self, u8> {
        Ok(match raw {
            0 => LifecycleState::Uninitialized,
            1 => LifecycleState::Initialized,
            2 => LifecycleState::Starting,
            3 => LifecycleState::Started,
            4 => LifecycleState::Stopping,
            5 => LifecycleState::Stopped,
            6 => LifecycleState::ShutDown,
            7 => LifecycleState::Failed,
            other => return Err(other),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Raised by a unit's initialization hook, or by the typed
/// [`Configuration`] accessors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("missing required configuration key '{key}'")]
    MissingKey { key: String },

    #[error("configuration key '{key}' holds a {found}, expected {expected}")]
    WrongKind {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("unit '{id}' is already initialized")]
    AlreadyInitialized { id: String },

    #[error("invalid value for '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    /// Shorthand for the most common failure of an initialization hook.
    pub fn missing(key: impl Into<String>) -> Self {
        ConfigError::MissingKey { key: key.into() }
    }
}

/// Runtime failure of a unit hook (start, stop, shutdown, message handling).
///
/// The runtime never propagates it past the unit boundary: the unit moves to
/// [`LifecycleState::Failed`] and the error is logged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UnitError {
    #[error("hardware fault on {component}: {details}")]
    Hardware { component: String, details: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Failed(String),
}

/// Malformed declarative unit definition.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DefinitionError {
    #[error("malformed definition: {0}")]
    Malformed(String),

    #[error("unexpected <{element}> inside <{parent}>")]
    UnexpectedElement { element: String, parent: String },

    #[error("value '{name}' has unknown type '{kind}'")]
    UnknownValueType { name: String, kind: String },

    #[error("value '{name}' of type {kind} cannot hold '{value}'")]
    InvalidValue {
        name: String,
        kind: String,
        value: String,
    },
}

/// Raised while assembling a context. A failed build leaves no usable context.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("only one unit with the id '{0}' can be registered")]
    DuplicateId(String),

    #[error("no unit type registered under '{0}'")]
    UnknownType(String),

    #[error("could not construct unit '{id}' of type '{type_name}': {reason}")]
    Construction {
        type_name: String,
        id: String,
        reason: String,
    },

    #[error("error initializing unit '{id}': {source}")]
    Initialization {
        id: String,
        #[source]
        source: ConfigError,
    },

    #[error("could not load unit definitions: {0}")]
    Definition(#[from] DefinitionError),

    #[error("could not read unit definitions: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors of the context's own operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    #[error("no unit registered with the id '{id}'")]
    NotFound { id: String },

    #[error("unit '{id}' does not accept messages of type {expected}")]
    MessageTypeMismatch { id: String, expected: &'static str },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_state_u8_roundtrip() {
        for state in [
            LifecycleState::Uninitialized,
            LifecycleState::Initialized,
            LifecycleState::Starting,
            LifecycleState::Started,
            LifecycleState::Stopping,
            LifecycleState::Stopped,
            LifecycleState::ShutDown,
            LifecycleState::Failed,
        ] {
            let raw: u8 = state.into();
            assert_eq!(LifecycleState::try_from(raw), Ok(state));
        }
        assert_eq!(LifecycleState::try_from(42), Err(42));
    }

    #[test]
    fn terminal_states() {
        assert!(LifecycleState::ShutDown.is_terminal());
        assert!(LifecycleState::Failed.is_terminal());
        assert!(!LifecycleState::Stopped.is_terminal());
        assert!(!LifecycleState::Uninitialized.is_terminal());
    }

    #[test]
    fn lifecycle_state_serializes_snake_case() {
        let json = serde_json::to_string(&LifecycleState::ShutDown).unwrap();
        assert_eq!(json, "\"shut_down\"");
        assert_eq!(LifecycleState::ShutDown.to_string(), "shut_down");
    }

    #[test]
    fn build_error_display_names_the_unit() {
        let err = BuildError::Initialization {
            id: "lcd".to_string(),
            source: ConfigError::missing("target"),
        };
        let text = err.to_string();
        assert!(text.contains("lcd"));
        assert!(text.contains("target"));

        let dup = BuildError::DuplicateId("consumer".to_string());
        assert!(dup.to_string().contains("consumer"));
    }

    #[test]
    fn unit_error_wraps_config_error() {
        let err: UnitError = ConfigError::missing("address").into();
        assert!(matches!(err, UnitError::Config(ConfigError::MissingKey { .. })));
    }
}
