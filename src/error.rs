//! Error types and utilities for settings resolution.

/// Result type alias for settings operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Error returned by user supplied hooks.
///
/// Anything that converts into a boxed error works, including `String` and
/// `&str`, so hooks can simply `return Err("port must be positive".into())`.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// Comprehensive error types for settings operations.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The settings schema could not be turned into an item tree
    #[error("Construction error: {0}")]
    Construction(String),

    /// Two items normalize to the same canonical name
    #[error("Duplicate item name: {name}")]
    DuplicateName { name: String },

    /// A leaf cannot be registered as a flag
    #[error("Value type '{type_name}' is not supported by flag")]
    UnsupportedType { type_name: String },

    /// Requested key does not name an item
    #[error("Key not found: '{key}'")]
    KeyNotFound { key: String },

    /// The flag registry reported a flag the manager never registered
    #[error("Unknown flag found: '{flag}'")]
    UnknownFlag { flag: String },

    /// The item exists but has no writable storage (groups)
    #[error("Cannot set: '{key}'")]
    CannotSet { key: String },

    /// Value type does not match the destination type
    #[error("Not assignable: {expected} - {found}")]
    NotAssignable { expected: String, found: String },

    /// A resolved hook could not be called with the value at hand
    #[error("Method not found: {hook} ({reason})")]
    HookContract { hook: String, reason: String },

    /// A user hook returned an error
    #[error("{source}")]
    Hook {
        #[source]
        source: HookError,
    },

    /// An environment value cannot be parsed without a hook
    #[error("Failed to parse env value: type '{type_name}' is not supported")]
    EnvParse { type_name: String },

    /// Configuration parsing failed
    #[error("Parse error in {source_name}: {message}")]
    Parse {
        source_name: String,
        message: String,
    },

    /// Serialization operation failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Unsupported configuration file format
    #[error("Unsupported configuration format: '{0}'")]
    UnsupportedFormat(String),

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Command line arguments could not be parsed
    #[error("Flag error: {0}")]
    Flags(String),
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Serialization(err.to_string())
    }
}

impl ConfigError {
    /// Creates a new parse error with context.
    pub fn parse_error(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Creates a new key not found error.
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    /// Creates a new type mismatch error.
    pub fn not_assignable(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::NotAssignable {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Creates a new hook contract error.
    pub fn hook_contract(hook: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::HookContract {
            hook: hook.into(),
            reason: reason.into(),
        }
    }

    /// Wraps an error returned by a user hook.
    pub fn hook(source: HookError) -> Self {
        Self::Hook { source }
    }

    /// Returns true if this error is related to a missing key.
    pub fn is_key_not_found(&self) -> bool {
        matches!(self, ConfigError::KeyNotFound { .. })
    }

    /// Returns true if the value did not fit the destination type.
    pub fn is_not_assignable(&self) -> bool {
        matches!(self, ConfigError::NotAssignable { .. })
    }

    /// Returns true if this error came out of a user hook.
    pub fn is_hook(&self) -> bool {
        matches!(self, ConfigError::Hook { .. })
    }
}

/// The resolution stage that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Environment variables
    Env,
    /// Registered configuration files
    Config,
    /// Command line flags
    Flags,
    /// Post-order merge and validation hooks
    Validate,
}

/// Failure of [`Manager::merge`](crate::Manager::merge) and its phases.
///
/// Carries the offending location: the environment variable name, the config
/// key, the flag name or the canonical item path, depending on the phase.
#[derive(Debug, thiserror::Error)]
#[error("{}: {source}", failed_at(.phase, .location))]
pub struct MergeError {
    pub phase: Phase,
    pub location: String,
    #[source]
    pub source: ConfigError,
}

impl MergeError {
    pub fn new(phase: Phase, location: impl Into<String>, source: ConfigError) -> Self {
        Self {
            phase,
            location: location.into(),
            source,
        }
    }

    /// The environment name, config key, flag name or item path that failed.
    pub fn location(&self) -> &str {
        &self.location
    }
}

fn failed_at(phase: &Phase, location: &str) -> String {
    match phase {
        Phase::Env => format!("failed to parse env, '{location}'"),
        Phase::Config => format!("failed to parse config, '{location}'"),
        Phase::Flags => format!("failed to parse flag, '--{location}'"),
        Phase::Validate => format!("failed to validate, '{location}'"),
    }
}
