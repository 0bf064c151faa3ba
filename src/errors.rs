//! Structured error types with machine-readable codes
//!
//! Every error carries a stable code for client handling and maps to an
//! HTTP status. Per-backend failures never surface here directly: they
//! degrade the request instead (see the port registry). The only errors
//! that abort a whole request are validation failures, compliance blocks,
//! strict-coverage gaps, and permission denials.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error response for API clients
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,

    /// Human-readable error message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Application error taxonomy
#[derive(Debug)]
pub enum FabricError {
    // Validation (400) - rejected before any I/O
    Validation { field: String, reason: String },
    InvalidUserId(String),
    InvalidMemoryId(String),

    // Content refused outright (422) - no partial persistence
    ComplianceBlocked { reasons: Vec<String> },

    // Optimistic-concurrency conflict (409) - retried internally, surfaced
    // only when the retry budget is exhausted
    Conflict { resource: String, detail: String },

    // Not found (404)
    AtomNotFound(String),

    // Access control (403)
    PermissionDenied(String),

    // A required capability has no healthy provider in strict mode (503)
    StrictCoverageUnmet { missing: Vec<String> },

    // A single backend is down or circuit-open (degrades, but surfaced
    // when a caller targets that backend directly)
    BackendUnavailable { backend: String },

    // Adapter-local timeout, counted against the breaker
    Timeout { backend: String, elapsed_ms: u64 },

    // Internal (500)
    Storage(String),
    Serialization(String),
    Internal(anyhow::Error),
}

impl FabricError {
    /// Stable code for client identification
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::InvalidUserId(_) => "INVALID_USER_ID",
            Self::InvalidMemoryId(_) => "INVALID_MEMORY_ID",
            Self::ComplianceBlocked { .. } => "COMPLIANCE_BLOCKED",
            Self::Conflict { .. } => "CONFLICT",
            Self::AtomNotFound(_) => "ATOM_NOT_FOUND",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::StrictCoverageUnmet { .. } => "STRICT_COVERAGE_UNMET",
            Self::BackendUnavailable { .. } => "BACKEND_UNAVAILABLE",
            Self::Timeout { .. } => "BACKEND_TIMEOUT",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::InvalidUserId(_) | Self::InvalidMemoryId(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::ComplianceBlocked { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Conflict { .. } => StatusCode::CONFLICT,
            Self::AtomNotFound(_) => StatusCode::NOT_FOUND,
            Self::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Self::StrictCoverageUnmet { .. } | Self::BackendUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Storage(_) | Self::Serialization(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::Validation { field, reason } => {
                format!("Invalid input for field '{field}': {reason}")
            }
            Self::InvalidUserId(msg) => format!("Invalid user ID: {msg}"),
            Self::InvalidMemoryId(msg) => format!("Invalid memory ID: {msg}"),
            Self::ComplianceBlocked { reasons } => {
                format!("Content refused by compliance policy: {}", reasons.join(", "))
            }
            Self::Conflict { resource, detail } => {
                format!("Concurrent update conflict on '{resource}': {detail}")
            }
            Self::AtomNotFound(id) => format!("Memory atom not found: {id}"),
            Self::PermissionDenied(msg) => format!("Permission denied: {msg}"),
            Self::StrictCoverageUnmet { missing } => format!(
                "Strict mode: required capabilities without a healthy provider: {}",
                missing.join(", ")
            ),
            Self::BackendUnavailable { backend } => {
                format!("Backend unavailable: {backend}")
            }
            Self::Timeout { backend, elapsed_ms } => {
                format!("Backend '{backend}' timed out after {elapsed_ms}ms")
            }
            Self::Storage(msg) => format!("Storage error: {msg}"),
            Self::Serialization(msg) => format!("Serialization error: {msg}"),
            Self::Internal(err) => format!("Internal error: {err}"),
        }
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            code: self.code().to_string(),
            message: self.message(),
            details: None,
        }
    }
}

impl fmt::Display for FabricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for FabricError {}

impl From<anyhow::Error> for FabricError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl IntoResponse for FabricError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = self.to_response();
        (status, Json(body)).into_response()
    }
}

/// Helper trait to convert validation errors into typed 400s
pub trait ValidationErrorExt<T> {
    fn map_validation_err(self, field: &str) -> Result<T>;
}

impl<T> ValidationErrorExt<T> for anyhow::Result<T> {
    fn map_validation_err(self, field: &str) -> Result<T> {
        self.map_err(|e| FabricError::Validation {
            field: field.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Type alias for Results using FabricError
pub type Result<T> = std::result::Result<T, FabricError>;
