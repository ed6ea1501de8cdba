//! Error handling for mlpipe-rs
//!
//! `MlPipeError` covers the ambient layer (configuration, logging setup, IO,
//! serialization) and wraps [`RegistryError`] for callers that want a single
//! error type.

use crate::pipeline::RegistryError;
use thiserror::Error;

/// Main error type for mlpipe-rs operations
#[derive(Error, Debug)]
pub enum MlPipeError {
    /// Errors from the pipeline registry and handles
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// Errors installing the tracing subscriber
    #[error("Logging error: {0}")]
    Logging(String),

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
        source: Box<MlPipeError>,
    },
}

impl MlPipeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        MlPipeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for MlPipeError {
    fn from(err: serde_json::Error) -> Self {
        MlPipeError::Serialization(err.to_string())
    }
}

/// Result type alias for mlpipe-rs operations
pub type Result<T> = std::result::Result<T, MlPipeError>;

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

impl<T> ResultExt<T> for std::result::Result<T, RegistryError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| MlPipeError::from(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| MlPipeError::from(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MlPipeError::Config("queue_capacity must be at least 1".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: queue_capacity must be at least 1"
        );
    }

    #[test]
    fn test_error_with_context() {
        let err = MlPipeError::Serialization("bad".to_string());
        let with_ctx = err.with_context("Failed to write snapshot");
        assert!(with_ctx.to_string().contains("Failed to write snapshot"));
    }

    #[test]
    fn test_registry_result_context() {
        let result: std::result::Result<(), RegistryError> =
            Err(RegistryError::ElementNotFound("sink".to_string()));
        let err = result.context("Attaching listener").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Attaching listener: Registry error: Element not found: sink"
        );
    }
}
