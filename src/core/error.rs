//! # Error Handling Module
//!
//! This module provides the error type shared by every part of the sync engine,
//! built with the `thiserror` crate.
//!
//! ## Error Taxonomy
//! - `NotFound` is a distinguished value used everywhere to mean "absent in this
//!   container" or "the remote answered 404". It drives create-vs-update decisions,
//!   so callers test for it with [`SyncError::is_not_found`], never by matching strings.
//! - `Validation`, `AlreadyExists` and `Reference` are precondition failures on the
//!   data itself. They are reported immediately and never retried.
//! - `Api` and `HttpClient` come from the admin API and are propagated as-is.
//! - `Operation` wraps any of the above with the entity type and friendly name of the
//!   entity the orchestrator was working on when the run aborted.
//!
//! ## Rust Concepts Used
//! - Enum-based errors: every failure mode is a variant, pattern matching is exhaustive
//! - `From` impls let `?` convert library errors at the call site
//! - `Box<SyncError>` in `Operation` keeps the enum size bounded while nesting

use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::entities::EntityType;

/// Main result type used throughout the engine
pub type SyncResult<T> = Result<T, SyncError>;

/// The kind of change an event applies to the remote system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Create => write!(f, "create"),
            Op::Update => write!(f, "update"),
            Op::Delete => write!(f, "delete"),
        }
    }
}

/// Every error the sync engine can produce
#[derive(Debug, Error)]
pub enum SyncError {
    /// Entity absent from a state container, or a 404 from the admin API
    #[error("{entity_type} '{key}' not found")]
    NotFound { entity_type: String, key: String },

    /// Insert collided with an existing ID or natural key
    #[error("{entity_type} '{key}' already exists")]
    AlreadyExists { entity_type: String, key: String },

    /// A foreign reference could not be resolved, or a delete would orphan children
    #[error("reference error: {message}")]
    Reference { message: String },

    /// Data failed a precondition (missing natural key, unregistered type, ...)
    #[error("validation failed: {message}")]
    Validation { message: String },

    /// Non-2xx response from the admin API, body surfaced verbatim
    #[error("HTTP status {status} (method: {method}, url: {url}): {message}")]
    Api {
        status: u16,
        method: String,
        url: String,
        message: String,
    },

    /// Transport failures talking to the admin API
    #[error("HTTP client error: {message}")]
    HttpClient { message: String },

    /// Invalid tool configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The run was cancelled before completing
    #[error("sync cancelled")]
    Cancelled,

    /// I/O errors while reading state or config files
    #[error("I/O error: {message}")]
    Io { message: String },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {message}")]
    Json { message: String },

    /// YAML parsing errors for state and config files
    #[error("YAML error: {message}")]
    Yaml { message: String },

    /// Context added by the orchestrator around the first fatal error
    #[error("{op} {entity_type} {name}: {source}")]
    Operation {
        op: Op,
        entity_type: EntityType,
        name: String,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    /// Create a not found error for an entity type and lookup key
    pub fn not_found<S: Into<String>>(entity_type: EntityType, key: S) -> Self {
        Self::NotFound {
            entity_type: entity_type.to_string(),
            key: key.into(),
        }
    }

    /// Create an already-exists error for an entity type and key
    pub fn already_exists<S: Into<String>>(entity_type: EntityType, key: S) -> Self {
        Self::AlreadyExists {
            entity_type: entity_type.to_string(),
            key: key.into(),
        }
    }

    /// Create a reference error with a custom message
    pub fn reference<S: Into<String>>(message: S) -> Self {
        Self::Reference {
            message: message.into(),
        }
    }

    /// Create a validation error with a custom message
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a configuration error with a custom message
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Wrap an error with the operation and entity it happened on
    pub fn in_operation(self, op: Op, entity_type: EntityType, name: impl Into<String>) -> Self {
        Self::Operation {
            op,
            entity_type,
            name: name.into(),
            source: Box::new(self),
        }
    }

    /// True for the distinguished "absent" condition, looking through context wrappers
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Operation { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check if retrying the same call could succeed
    ///
    /// The engine itself never retries; this is information for callers that wrap it.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::HttpClient { .. } => true,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::Operation { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// Short machine-readable name of the error kind, used in log fields
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::Reference { .. } => "reference_error",
            Self::Validation { .. } => "validation_error",
            Self::Api { .. } => "api_error",
            Self::HttpClient { .. } => "http_client_error",
            Self::Configuration { .. } => "configuration_error",
            Self::Cancelled => "cancelled",
            Self::Io { .. } => "io_error",
            Self::Json { .. } => "json_error",
            Self::Yaml { .. } => "yaml_error",
            Self::Operation { source, .. } => source.error_type(),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

impl From<serde_yaml::Error> for SyncError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml {
            message: err.to_string(),
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        Self::HttpClient {
            message: err.to_string(),
        }
    }
}

impl From<url::ParseError> for SyncError {
    fn from(err: url::ParseError) -> Self {
        Self::Configuration {
            message: format!("invalid URL: {}", err),
        }
    }
}

/// Convenience macro for creating validation errors
///
/// Usage: `validation_error!("route {} has neither id nor name", idx)`
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::core::error::SyncError::validation(format!($($arg)*))
    };
}

/// Convenience macro for creating configuration errors
///
/// Usage: `config_error!("invalid page size: {}", size)`
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::core::error::SyncError::config(format!($($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_distinguished() {
        let err = SyncError::not_found(EntityType::Service, "svc1");
        assert!(err.is_not_found());
        assert!(!SyncError::validation("missing name").is_not_found());
        assert!(!SyncError::Api {
            status: 400,
            method: "POST".to_string(),
            url: "http://localhost:8001/services".to_string(),
            message: "schema violation".to_string(),
        }
        .is_not_found());
    }

    #[test]
    fn test_not_found_through_operation_context() {
        let err = SyncError::not_found(EntityType::Route, "r1").in_operation(
            Op::Delete,
            EntityType::Route,
            "r1",
        );
        assert!(err.is_not_found());
        assert_eq!(err.error_type(), "not_found");
        assert_eq!(err.to_string(), "delete route r1: route 'r1' not found");
    }

    #[test]
    fn test_retryable_errors() {
        let server_error = SyncError::Api {
            status: 503,
            method: "GET".to_string(),
            url: "http://localhost:8001/services".to_string(),
            message: "unavailable".to_string(),
        };
        assert!(server_error.is_retryable());
        assert!(SyncError::HttpClient { message: "connection refused".to_string() }.is_retryable());
        assert!(!SyncError::validation("bad").is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
    }

    #[test]
    fn test_error_macros() {
        let err = validation_error!("route {} has neither id nor name", 3);
        assert_eq!(err.to_string(), "validation failed: route 3 has neither id nor name");
        let err = config_error!("invalid page size: {}", 0);
        assert!(matches!(err, SyncError::Configuration { .. }));
    }
}
