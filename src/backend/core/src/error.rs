//! Error handling for Castellan Core.
//!
//! This module provides:
//! - A single error type carrying a machine-readable code and context
//! - HTTP status code mapping for API responses
//! - User-facing messages kept apart from internal detail
//! - Severity-based logging and an error counter
//!
//! # Usage
//!
//! ```rust,ignore
//! use castellan_core::error::{CastellanError, Result, ErrorContext};
//!
//! fn load() -> Result<()> {
//!     std::fs::read_to_string("seed.json").context("Failed to read seed file")?;
//!     Ok(())
//! }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{error, warn};

// ═══════════════════════════════════════════════════════════════════════════════
// Result Type Alias
// ═══════════════════════════════════════════════════════════════════════════════

/// A specialized Result type for Castellan operations.
pub type Result<T> = std::result::Result<T, CastellanError>;

// ═══════════════════════════════════════════════════════════════════════════════
// Error Codes
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes for API responses.
///
/// These codes are stable and can be used by clients for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Identity Errors (1000-1099)
    DuplicateUsername,
    UserNotFound,
    OrganizationNotFound,
    RecordNotFound,

    // Database Errors (2000-2099)
    DatabaseError,
    DatabaseQueryFailed,

    // Availability Errors (2100-2199)
    Unavailable,

    // Serialization Errors (2200-2299)
    SerializationError,
    DeserializationError,

    // Authentication/Authorization (4000-4099)
    Unauthenticated,
    Unauthorized,
    InvalidToken,
    TokenExpired,

    // Validation Errors (4100-4199)
    ValidationError,

    // Configuration Errors (5000-5099)
    ConfigurationError,
    MissingConfiguration,
    InvalidConfiguration,

    // Internal Errors (9000-9099)
    InternalError,
}

impl ErrorCode {
    /// Get the numeric code for this error.
    pub const fn numeric_code(&self) -> u32 {
        match self {
            Self::DuplicateUsername => 1000,
            Self::UserNotFound => 1001,
            Self::OrganizationNotFound => 1002,
            Self::RecordNotFound => 1003,

            Self::DatabaseError => 2000,
            Self::DatabaseQueryFailed => 2001,

            Self::Unavailable => 2100,

            Self::SerializationError => 2200,
            Self::DeserializationError => 2201,

            Self::Unauthenticated => 4000,
            Self::Unauthorized => 4001,
            Self::InvalidToken => 4002,
            Self::TokenExpired => 4003,

            Self::ValidationError => 4100,

            Self::ConfigurationError => 5000,
            Self::MissingConfiguration => 5001,
            Self::InvalidConfiguration => 5002,

            Self::InternalError => 9000,
        }
    }

    /// Get the HTTP status code for this error.
    pub const fn http_status(&self) -> StatusCode {
        match self {
            // Not Found (404)
            Self::UserNotFound | Self::OrganizationNotFound | Self::RecordNotFound => {
                StatusCode::NOT_FOUND
            }

            // Conflict (409)
            Self::DuplicateUsername => StatusCode::CONFLICT,

            // Unprocessable Entity (422)
            Self::ValidationError => StatusCode::UNPROCESSABLE_ENTITY,

            // Unauthorized (401)
            Self::Unauthenticated | Self::InvalidToken | Self::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }

            // Forbidden (403)
            Self::Unauthorized => StatusCode::FORBIDDEN,

            // Service Unavailable (503)
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,

            // Internal Server Error (500)
            Self::DatabaseError
            | Self::DatabaseQueryFailed
            | Self::SerializationError
            | Self::DeserializationError
            | Self::ConfigurationError
            | Self::MissingConfiguration
            | Self::InvalidConfiguration
            | Self::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Check if the caller may retry the whole operation.
    ///
    /// Nothing is retried inside the core; this only informs clients.
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable)
    }

    /// Get the error category for grouping.
    pub const fn category(&self) -> &'static str {
        match self.numeric_code() {
            1000..=1099 => "identity",
            2000..=2099 => "database",
            2100..=2199 => "availability",
            2200..=2299 => "serialization",
            4000..=4099 => "authentication",
            4100..=4199 => "validation",
            5000..=5099 => "configuration",
            9000..=9099 => "internal",
            _ => "unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Severity
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity level for errors (affects logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    /// Caller errors (bad input, missing entities)
    Low,
    /// Access denials and transient unavailability
    Medium,
    /// System errors (database failures)
    High,
    /// Critical errors requiring immediate attention
    Critical,
}

impl ErrorSeverity {
    /// Get severity based on error code.
    pub const fn from_code(code: &ErrorCode) -> Self {
        match code {
            ErrorCode::ValidationError
            | ErrorCode::DuplicateUsername
            | ErrorCode::UserNotFound
            | ErrorCode::OrganizationNotFound
            | ErrorCode::RecordNotFound => Self::Low,

            ErrorCode::Unauthenticated
            | ErrorCode::Unauthorized
            | ErrorCode::InvalidToken
            | ErrorCode::TokenExpired
            | ErrorCode::Unavailable => Self::Medium,

            ErrorCode::DatabaseError
            | ErrorCode::DatabaseQueryFailed
            | ErrorCode::SerializationError
            | ErrorCode::DeserializationError
            | ErrorCode::ConfigurationError
            | ErrorCode::MissingConfiguration
            | ErrorCode::InvalidConfiguration => Self::High,

            ErrorCode::InternalError => Self::Critical,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Details
// ═══════════════════════════════════════════════════════════════════════════════

/// Additional structured details about an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDetails {
    /// Additional context key-value pairs
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, serde_json::Value>,

    /// Offending input field, for validation failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    /// Related entity ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// Related entity type
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

impl ErrorDetails {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.context.insert(key.into(), v);
        }
        self
    }

    fn is_empty(&self) -> bool {
        self.context.is_empty()
            && self.field.is_none()
            && self.entity_id.is_none()
            && self.entity_type.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Main Error Type
// ═══════════════════════════════════════════════════════════════════════════════

/// The main error type for Castellan Core.
#[derive(Error, Debug)]
pub struct CastellanError {
    /// Machine-readable error code
    code: ErrorCode,

    /// User-friendly error message (safe to expose to clients)
    user_message: Cow<'static, str>,

    /// Detailed internal message (for logging only)
    internal_message: Option<String>,

    /// Additional structured details
    details: ErrorDetails,

    /// The source error that caused this error
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl fmt::Display for CastellanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.user_message)?;
        if let Some(ref internal) = self.internal_message {
            write!(f, " (internal: {})", internal)?;
        }
        Ok(())
    }
}

impl CastellanError {
    // ─────────────────────────────────────────────────────────────────────────
    // Constructors
    // ─────────────────────────────────────────────────────────────────────────

    /// Create a new error with code and user message.
    pub fn new(code: ErrorCode, user_message: impl Into<Cow<'static, str>>) -> Self {
        let error = Self {
            code,
            user_message: user_message.into(),
            internal_message: None,
            details: ErrorDetails::default(),
            source: None,
        };
        error.record_metrics();
        error
    }

    /// Create an error with both user and internal messages.
    pub fn with_internal(
        code: ErrorCode,
        user_message: impl Into<Cow<'static, str>>,
        internal_message: impl Into<String>,
    ) -> Self {
        let mut error = Self::new(code, user_message);
        error.internal_message = Some(internal_message.into());
        error
    }

    /// Create an internal error (500).
    pub fn internal(message: impl Into<String>) -> Self {
        Self::with_internal(ErrorCode::InternalError, "An internal error occurred", message)
    }

    /// Create a generic not found error.
    pub fn not_found(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        let entity_type = entity_type.into();
        let entity_id = entity_id.into();
        Self::new(
            ErrorCode::RecordNotFound,
            format!("{} not found: {}", entity_type, entity_id),
        )
        .with_details(ErrorDetails::new().with_entity(&entity_type, &entity_id))
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::ValidationError, message)
    }

    /// Create a validation error naming the offending field.
    pub fn invalid_field(field: &str, message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ValidationError,
            format!("{}: {}", field, message.into()),
        )
        .with_details(ErrorDetails::new().with_field(field))
    }

    /// Create an authorization denial (403).
    pub fn unauthorized(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    /// Create an authentication failure (401).
    pub fn unauthenticated(message: impl Into<Cow<'static, str>>) -> Self {
        Self::new(ErrorCode::Unauthenticated, message)
    }

    /// Create a storage availability error.
    pub fn unavailable(operation: impl Into<String>) -> Self {
        let operation = operation.into();
        Self::with_internal(
            ErrorCode::Unavailable,
            "The identity store is temporarily unavailable",
            format!("operation timed out: {}", operation),
        )
        .with_context("operation", operation)
    }

    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message.into())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Builder Methods
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a source error.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Add error details.
    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = details;
        self
    }

    /// Add internal message.
    pub fn with_internal_message(mut self, message: impl Into<String>) -> Self {
        self.internal_message = Some(message.into());
        self
    }

    /// Add context to details.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.details.context.insert(key.into(), v);
        }
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn internal_message(&self) -> Option<&str> {
        self.internal_message.as_deref()
    }

    pub fn details(&self) -> &ErrorDetails {
        &self.details
    }

    pub fn http_status(&self) -> StatusCode {
        self.code.http_status()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::from_code(&self.code)
    }

    /// True for any of the entity-not-found codes.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::UserNotFound | ErrorCode::OrganizationNotFound | ErrorCode::RecordNotFound
        )
    }

    pub fn is_validation(&self) -> bool {
        self.code == ErrorCode::ValidationError
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Logging
    // ─────────────────────────────────────────────────────────────────────────

    /// Log this error with appropriate severity.
    pub fn log(&self) {
        let code = self.code.to_string();
        let category = self.code.category();
        let status = self.http_status().as_u16();

        match self.severity() {
            ErrorSeverity::Critical => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    details = ?self.details,
                    source = ?self.source,
                    "CRITICAL ERROR"
                );
            }
            ErrorSeverity::High => {
                error!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    internal_message = ?self.internal_message,
                    "High severity error"
                );
            }
            ErrorSeverity::Medium => {
                warn!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Medium severity error"
                );
            }
            ErrorSeverity::Low => {
                tracing::debug!(
                    error_code = %code,
                    category = category,
                    http_status = status,
                    user_message = %self.user_message,
                    "Low severity error"
                );
            }
        }
    }

    fn record_metrics(&self) {
        counter!(
            "castellan_errors_total",
            "code" => self.code.to_string(),
            "category" => self.code.category().to_string(),
            "severity" => format!("{:?}", self.severity()),
        )
        .increment(1);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// API Response
// ═══════════════════════════════════════════════════════════════════════════════

/// Error response for API clients.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always false for errors
    pub success: bool,

    /// Error information
    pub error: ErrorInfo,
}

/// Detailed error information for API responses.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub numeric_code: u32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ErrorDetails>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl From<&CastellanError> for ErrorResponse {
    fn from(error: &CastellanError) -> Self {
        Self {
            success: false,
            error: ErrorInfo {
                code: error.code,
                numeric_code: error.code.numeric_code(),
                message: error.user_message.to_string(),
                details: if error.details.is_empty() {
                    None
                } else {
                    Some(error.details.clone())
                },
                timestamp: chrono::Utc::now(),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Axum Integration
// ═══════════════════════════════════════════════════════════════════════════════

impl IntoResponse for CastellanError {
    fn into_response(self) -> Response {
        self.log();

        let status = self.http_status();
        let response = ErrorResponse::from(&self);

        (status, Json(response)).into_response()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Context Extension Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Extension trait for adding context to errors.
pub trait ErrorContext<T> {
    /// Add context to an error.
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with error code.
    fn with_error_code(self, code: ErrorCode) -> Result<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| CastellanError::internal(message.into()).with_source(e))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.map_err(|e| CastellanError::new(code, e.to_string()).with_source(e))
    }
}

impl<T> ErrorContext<T> for Option<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.ok_or_else(|| CastellanError::new(ErrorCode::RecordNotFound, message.into()))
    }

    fn with_error_code(self, code: ErrorCode) -> Result<T> {
        self.ok_or_else(|| CastellanError::new(code, "Resource not found"))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// From Implementations for Common Error Types
// ═══════════════════════════════════════════════════════════════════════════════

impl From<sqlx::Error> for CastellanError {
    fn from(error: sqlx::Error) -> Self {
        let (code, user_msg) = match &error {
            sqlx::Error::RowNotFound => (
                ErrorCode::RecordNotFound,
                "The requested record was not found",
            ),
            sqlx::Error::Database(db_err) => {
                if let Some(constraint) = db_err.constraint() {
                    if constraint.contains("username") {
                        return Self::with_internal(
                            ErrorCode::DuplicateUsername,
                            "A user with this username already exists",
                            format!("Constraint violation: {}", constraint),
                        )
                        .with_source(error);
                    }
                    if constraint.contains("slug") {
                        return Self::with_internal(
                            ErrorCode::ValidationError,
                            "slug: already in use by another organization",
                            format!("Constraint violation: {}", constraint),
                        )
                        .with_details(ErrorDetails::new().with_field("slug"))
                        .with_source(error);
                    }
                }
                (ErrorCode::DatabaseQueryFailed, "A database error occurred")
            }
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => (
                ErrorCode::Unavailable,
                "The identity store is temporarily unavailable",
            ),
            _ => (ErrorCode::DatabaseError, "A database error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<serde_json::Error> for CastellanError {
    fn from(error: serde_json::Error) -> Self {
        let code = if error.is_syntax() || error.is_data() || error.is_eof() {
            ErrorCode::DeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::with_internal(code, "Failed to process JSON data", error.to_string())
            .with_source(error)
    }
}

impl From<tokio::time::error::Elapsed> for CastellanError {
    fn from(error: tokio::time::error::Elapsed) -> Self {
        Self::with_internal(
            ErrorCode::Unavailable,
            "The identity store is temporarily unavailable",
            error.to_string(),
        )
        .with_source(error)
    }
}

impl From<jsonwebtoken::errors::Error> for CastellanError {
    fn from(error: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        let code = match error.kind() {
            ErrorKind::ExpiredSignature => ErrorCode::TokenExpired,
            _ => ErrorCode::InvalidToken,
        };

        Self::with_internal(code, "Authentication required", error.to_string())
            .with_source(error)
    }
}

impl From<std::io::Error> for CastellanError {
    fn from(error: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let (code, user_msg) = match error.kind() {
            ErrorKind::NotFound => (ErrorCode::RecordNotFound, "File or resource not found"),
            ErrorKind::TimedOut => (ErrorCode::Unavailable, "Operation timed out"),
            _ => (ErrorCode::InternalError, "An I/O error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string()).with_source(error)
    }
}

impl From<anyhow::Error> for CastellanError {
    fn from(error: anyhow::Error) -> Self {
        match error.downcast::<CastellanError>() {
            Ok(inner) => inner,
            Err(error) => Self::with_internal(
                ErrorCode::InternalError,
                "An internal error occurred",
                error.to_string(),
            ),
        }
    }
}

impl From<config::ConfigError> for CastellanError {
    fn from(error: config::ConfigError) -> Self {
        let (code, user_msg) = match &error {
            config::ConfigError::NotFound(_) => (
                ErrorCode::MissingConfiguration,
                "Required configuration not found",
            ),
            config::ConfigError::PathParse(_) | config::ConfigError::FileParse { .. } => (
                ErrorCode::InvalidConfiguration,
                "Configuration file is invalid",
            ),
            _ => (ErrorCode::ConfigurationError, "Configuration error occurred"),
        };

        Self::with_internal(code, user_msg, error.to_string())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Convenience Constructors for Domain Errors
// ═══════════════════════════════════════════════════════════════════════════════

impl CastellanError {
    /// Username already taken by another user of any type.
    pub fn duplicate_username(username: &str) -> Self {
        Self::new(
            ErrorCode::DuplicateUsername,
            format!("Username already exists: {}", username),
        )
        .with_details(
            ErrorDetails::new()
                .with_field("username")
                .with_entity("user", username),
        )
    }

    pub fn user_not_found(id: impl fmt::Display) -> Self {
        Self::new(ErrorCode::UserNotFound, format!("User not found: {}", id))
            .with_details(ErrorDetails::new().with_entity("user", id.to_string()))
    }

    pub fn organization_not_found(id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::OrganizationNotFound,
            format!("Organization not found: {}", id),
        )
        .with_details(ErrorDetails::new().with_entity("organization", id.to_string()))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_http_status() {
        assert_eq!(ErrorCode::UserNotFound.http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::DuplicateUsername.http_status(), StatusCode::CONFLICT);
        assert_eq!(
            ErrorCode::ValidationError.http_status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ErrorCode::Unauthorized.http_status(), StatusCode::FORBIDDEN);
        assert_eq!(ErrorCode::Unauthenticated.http_status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ErrorCode::Unavailable.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_every_code_has_a_category() {
        use ErrorCode::*;
        let codes = [
            DuplicateUsername,
            UserNotFound,
            OrganizationNotFound,
            RecordNotFound,
            DatabaseError,
            DatabaseQueryFailed,
            Unavailable,
            SerializationError,
            DeserializationError,
            Unauthenticated,
            Unauthorized,
            InvalidToken,
            TokenExpired,
            ValidationError,
            ConfigurationError,
            MissingConfiguration,
            InvalidConfiguration,
            InternalError,
        ];
        for code in codes {
            assert_ne!(code.category(), "unknown", "{code}");
        }
        let validation: Vec<_> = codes.iter().filter(|c| c.category() == "validation").collect();
        assert_eq!(validation, vec![&ValidationError]);
    }

    #[test]
    fn test_only_unavailable_is_retryable() {
        assert!(ErrorCode::Unavailable.is_retryable());
        assert!(!ErrorCode::ValidationError.is_retryable());
        assert!(!ErrorCode::DuplicateUsername.is_retryable());
        assert!(!ErrorCode::UserNotFound.is_retryable());
    }

    #[test]
    fn test_denial_is_distinct_from_not_found() {
        let denied = CastellanError::unauthorized("Access denied");
        let missing = CastellanError::user_not_found(7);
        assert!(!denied.is_not_found());
        assert!(missing.is_not_found());
        assert_ne!(denied.http_status(), missing.http_status());
    }

    #[test]
    fn test_invalid_field_details() {
        let error = CastellanError::invalid_field("emailAddress", "is required");
        assert!(error.is_validation());
        assert_eq!(error.details().field.as_deref(), Some("emailAddress"));
        assert_eq!(error.user_message(), "emailAddress: is required");
    }

    #[test]
    fn test_error_response_serialization() {
        let error = CastellanError::duplicate_username("alice");
        let response = ErrorResponse::from(&error);

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "DUPLICATE_USERNAME");
        assert_eq!(json["error"]["numericCode"], 1000);
        assert_eq!(json["error"]["details"]["field"], "username");
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::ValidationError),
            ErrorSeverity::Low
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::Unavailable),
            ErrorSeverity::Medium
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::DatabaseError),
            ErrorSeverity::High
        );
        assert_eq!(
            ErrorSeverity::from_code(&ErrorCode::InternalError),
            ErrorSeverity::Critical
        );
    }

    #[test]
    fn test_unavailable_carries_operation() {
        let error = CastellanError::unavailable("create_user");
        assert_eq!(error.code(), ErrorCode::Unavailable);
        assert_eq!(error.details().context["operation"], "create_user");
        assert!(error.internal_message().unwrap().contains("create_user"));
    }

    #[test]
    fn test_error_display() {
        let error = CastellanError::with_internal(
            ErrorCode::DatabaseError,
            "Database connection failed",
            "Connection refused: localhost:5432",
        );

        let display = format!("{}", error);
        assert!(display.contains("DatabaseError"));
        assert!(display.contains("Database connection failed"));
        assert!(display.contains("Connection refused"));
    }
}
