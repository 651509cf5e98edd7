//! Error handling for the flashlog node
//!
//! This module defines the node error type and a Result alias used
//! throughout the crate. Every failure in the storage and export paths
//! degrades to one of these values; none of them terminate the process.

use thiserror::Error;

/// Main error type for node operations
#[derive(Error, Debug)]
pub enum NodeError {
    /// The flash filesystem could not be mounted or the log could not be opened
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// An export session is already running
    #[error("Export already in progress")]
    ExportBusy,

    /// The wireless notify transport rejected a message
    #[error("Link error: {0}")]
    Link(String),

    /// The config file could not be loaded or saved
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Another error plus what was being attempted
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<NodeError>,
    },
}

impl NodeError {
    /// Wrap this error with a description of the failed step
    pub fn with_context(self, context: impl Into<String>) -> Self {
        NodeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error (or the error it wraps) means storage is unusable
    pub fn is_storage_unavailable(&self) -> bool {
        match self {
            NodeError::StorageUnavailable(_) | NodeError::Io(_) => true,
            NodeError::WithContext { source, .. } => source.is_storage_unavailable(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for NodeError {
    fn from(err: serde_json::Error) -> Self {
        NodeError::Serialization(err.to_string())
    }
}

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Attach context to failing results
pub trait ResultExt<T> {
    /// Wrap the error with `context`
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Wrap the error with a message built only on failure
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

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| NodeError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| NodeError::Io(e).with_context(f()))
    }
}
