//! # Application Error Types
//!
//! This module defines common error types used throughout the keywords-reply
//! application. It provides structured error handling for the matcher, the
//! entry store and the admin console.

use std::fmt;

/// General application error type for consistent error handling
#[derive(Debug, Clone, PartialEq)]
pub enum AppError {
    /// Configuration validation errors
    Config(String),
    /// Validation errors (keywords, patterns, selectors, reply content)
    Validation(String),
    /// Selector or index matched nothing
    NotFound(String),
    /// Persistence-file and image-file errors
    Storage(String),
    /// Admin HTTP request errors
    Http(String),
    /// Network/communication errors
    Network(String),
    /// Internal application errors
    Internal(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Config(msg) => write!(f, "[CONFIG] {}", msg),
            AppError::Validation(msg) => write!(f, "[VALIDATION] {}", msg),
            AppError::NotFound(msg) => write!(f, "[NOT_FOUND] {}", msg),
            AppError::Storage(msg) => write!(f, "[STORAGE] {}", msg),
            AppError::Http(msg) => write!(f, "[HTTP] {}", msg),
            AppError::Network(msg) => write!(f, "[NETWORK] {}", msg),
            AppError::Internal(msg) => write!(f, "[INTERNAL] {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::Network(err.to_string())
    }
}

impl From<regex::Error> for AppError {
    fn from(err: regex::Error) -> Self {
        AppError::Validation(format!("invalid regular expression: {}", err))
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// Standardized error logging utilities for consistent error reporting across the application
pub mod error_logging {
    use tracing::error;

    /// Log entry-store persistence errors with contextual information
    pub fn log_storage_error(error: &impl std::fmt::Display, operation: &str, path: Option<&str>) {
        error!(
            error = %error,
            operation = %operation,
            path = ?path,
            "Storage operation failed"
        );
    }

    /// Log validation errors with input context
    pub fn log_validation_error(
        error: &impl std::fmt::Display,
        operation: &str,
        input_value: Option<&str>,
    ) {
        error!(
            error = %error,
            operation = %operation,
            input_value = ?input_value.map(|v| if v.len() > 100 { format!("{}...", &v[..100]) } else { v.to_string() }),
            "Validation failed"
        );
    }

    /// Log network/communication errors with connection context
    pub fn log_network_error(error: &impl std::fmt::Display, operation: &str, endpoint: Option<&str>) {
        error!(
            error = %error,
            operation = %operation,
            endpoint = ?endpoint,
            "Network operation failed"
        );
    }

    /// Log admin-console request errors with request context
    pub fn log_http_error(
        error: &impl std::fmt::Display,
        method: &str,
        path: &str,
        client_ip: Option<&str>,
    ) {
        error!(
            error = %error,
            method = %method,
            path = %path,
            client_ip = ?client_ip,
            "Admin request failed"
        );
    }
}
