//! Error taxonomy for the plugin boundary.
//!
//! Nothing here is fatal to the host: every variant describes a plugin that
//! failed to load or a command that could not be served.

use std::time::Duration;

/// Errors produced while decoding an `EncodedList`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("encoded list truncated at byte {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("entry {index} is not valid UTF-8")]
    InvalidEncoding { index: usize },
}

/// Errors produced while loading a plugin library.
///
/// A load that fails never leaves a registered handle behind.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to open plugin library {path}: {reason}")]
    OpenFailed { path: String, reason: String },
    #[error("plugin is missing required entry point `{0}`")]
    SymbolMissing(String),
    #[error("plugin `{name}` failed to initialize: {reason}")]
    InitFailed { name: String, reason: String },
    #[error("incompatible plugin ABI version: host supports {expected}, plugin targets {found}")]
    IncompatibleVersion { expected: String, found: String },
    #[error("malformed plugin version `{0}` (expected major.minor.patch)")]
    InvalidVersionFormat(String),
    #[error("invalid plugin descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("command `{command}` is already provided by plugin `{existing}`")]
    CommandConflict { command: String, existing: String },
}

/// Errors produced while dispatching a command to a plugin.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("command `{command}` expects {expected} argument(s), got {found}")]
    ArityMismatch {
        command: String,
        expected: String,
        found: usize,
    },
    #[error("plugin error: {0}")]
    PluginError(String),
    #[error("command `{command}` did not return within {after:?}")]
    Timeout { command: String, after: Duration },
}

impl From<DecodeError> for DispatchError {
    fn from(err: DecodeError) -> Self {
        Self::PluginError(format!("malformed result buffer: {err}"))
    }
}
