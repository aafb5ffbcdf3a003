//! Error handling for proto-sandbox
//!
//! This module defines the crate error type and a Result alias for use
//! throughout the runtime.
//!
//! Structural errors (`SchemaLookup`, `InvalidOperation`, `UnknownDatatype`)
//! are programmer errors and propagate to the caller. Script errors are
//! captured into the execution output log instead, and plugin errors are
//! isolated per plugin by the loader.

use crate::types::Operation;
use thiserror::Error;

/// Main error type for proto-sandbox operations
#[derive(Error, Debug)]
pub enum SandboxError {
    /// A signal path has no corresponding schema node
    #[error("Schema lookup error: '{parent}' has no child named '{child}'")]
    SchemaLookup { parent: String, child: String },

    /// get/set/subscribe invoked where it is not permitted
    #[error("Invalid operation: cannot call {operation}() on '{path}': {reason}")]
    InvalidOperation {
        operation: Operation,
        path: String,
        reason: String,
    },

    /// A leaf datatype with no default value mapping
    #[error("Unknown datatype '{datatype}' for signal '{path}'")]
    UnknownDatatype { path: String, datatype: String },

    /// Malformed signal schema document
    #[error("Schema error: {0}")]
    Schema(String),

    /// Script failed to translate into an executable form
    #[error("Translation error: {0}")]
    Translation(String),

    /// Errors related to Rhai script execution
    #[error("Script error: {0}")]
    Script(String),

    /// A plugin module could not be imported
    #[error("Plugin '{plugin}' failed to import: {message}")]
    PluginImport { plugin: String, message: String },

    /// A plugin factory, hook or transform failed
    #[error("Plugin '{plugin}' failed: {message}")]
    PluginExecution { plugin: String, message: String },

    /// Widget registration or activation failed
    #[error("Widget error: {0}")]
    Widget(String),

    /// Interpreter or library loading failed
    #[error("Bootstrap error: {0}")]
    Bootstrap(String),

    /// The sandbox worker is no longer running
    #[error("Sandbox is closed")]
    SandboxClosed,

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Timeout errors
    #[error("Timeout: {0}")]
    Timeout(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<SandboxError>,
    },
}

impl SandboxError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        SandboxError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a script error from a Rhai error
    pub fn from_rhai_error(err: Box<rhai::EvalAltResult>) -> Self {
        SandboxError::Script(err.to_string())
    }

    /// Convert into a Rhai runtime error so it can cross into script code
    pub fn into_rhai(self) -> Box<rhai::EvalAltResult> {
        self.to_string().into()
    }

    /// Shorthand for an `InvalidOperation` error
    pub fn invalid_operation(
        operation: Operation,
        path: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        SandboxError::InvalidOperation {
            operation,
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for SandboxError {
    fn from(err: serde_json::Error) -> Self {
        SandboxError::Serialization(err.to_string())
    }
}

/// Result type alias for proto-sandbox operations
pub type Result<T> = std::result::Result<T, SandboxError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, Box<rhai::EvalAltResult>> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| SandboxError::from_rhai_error(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| SandboxError::from_rhai_error(e).with_context(f()))
    }
}
