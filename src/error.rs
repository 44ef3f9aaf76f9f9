//! Domain-specific error types for proofandfit

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

use crate::clients::GenerationError;
use crate::store::PersistenceError;

/// Main error type for the challenge generation service
#[derive(Error, Debug)]
pub enum ProofAndFitError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Generation provider error: {message}")]
    Generation { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Timeout error: {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Invalid parameters: {message}")]
    InvalidParams { message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error(
        "No unique challenges generated ({requested} requested, {duplicates_rejected} duplicates rejected, {generation_failures} generation failures, {save_failures} save failures, {cancelled} slots cancelled)"
    )]
    NothingGenerated {
        requested: usize,
        duplicates_rejected: usize,
        generation_failures: usize,
        save_failures: usize,
        cancelled: usize,
    },
}

/// What left a batch empty, in order of precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyBatchCause {
    Duplicates,
    ProviderUnavailable,
    StorageFailed,
    Cancelled,
}

impl EmptyBatchCause {
    pub fn status_code(self) -> StatusCode {
        match self {
            EmptyBatchCause::Duplicates => StatusCode::BAD_REQUEST,
            EmptyBatchCause::ProviderUnavailable => StatusCode::BAD_GATEWAY,
            EmptyBatchCause::StorageFailed => StatusCode::INTERNAL_SERVER_ERROR,
            EmptyBatchCause::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            EmptyBatchCause::Duplicates => {
                "All generated challenges already exist. Please try again for unique content."
            }
            EmptyBatchCause::ProviderUnavailable => {
                "Generation service unavailable. No challenges could be generated, please try again later."
            }
            EmptyBatchCause::StorageFailed => "Generated challenges could not be saved.",
            EmptyBatchCause::Cancelled => {
                "Generation was cancelled before any challenge was produced."
            }
        }
    }
}

impl ProofAndFitError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        ProofAndFitError::InvalidParams {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        ProofAndFitError::Config {
            message: message.into(),
        }
    }

    /// Cause of an empty batch; `None` for every other error
    pub fn empty_batch_cause(&self) -> Option<EmptyBatchCause> {
        let ProofAndFitError::NothingGenerated {
            duplicates_rejected,
            generation_failures,
            save_failures,
            ..
        } = self
        else {
            return None;
        };
        Some(if *duplicates_rejected > 0 {
            EmptyBatchCause::Duplicates
        } else if *generation_failures > 0 {
            EmptyBatchCause::ProviderUnavailable
        } else if *save_failures > 0 {
            EmptyBatchCause::StorageFailed
        } else {
            EmptyBatchCause::Cancelled
        })
    }

    /// HTTP status used when the error crosses the HTTP surface
    pub fn status_code(&self) -> StatusCode {
        if let Some(cause) = self.empty_batch_cause() {
            return cause.status_code();
        }
        match self {
            ProofAndFitError::InvalidParams { .. } => StatusCode::BAD_REQUEST,
            ProofAndFitError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ProofAndFitError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProofAndFitError::Generation { .. } => StatusCode::BAD_GATEWAY,
            ProofAndFitError::Config { .. }
            | ProofAndFitError::Persistence { .. }
            | ProofAndFitError::Serialization { .. }
            | ProofAndFitError::Internal { .. }
            | ProofAndFitError::NothingGenerated { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<anyhow::Error> for ProofAndFitError {
    fn from(err: anyhow::Error) -> Self {
        ProofAndFitError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for ProofAndFitError {
    fn from(err: serde_json::Error) -> Self {
        ProofAndFitError::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for ProofAndFitError {
    fn from(err: toml::de::Error) -> Self {
        ProofAndFitError::Config {
            message: format!("Invalid config file: {}", err),
        }
    }
}

impl From<reqwest::Error> for ProofAndFitError {
    fn from(err: reqwest::Error) -> Self {
        ProofAndFitError::Generation {
            message: format!("HTTP request failed: {}", err),
        }
    }
}

impl From<rusqlite::Error> for ProofAndFitError {
    fn from(err: rusqlite::Error) -> Self {
        ProofAndFitError::Persistence {
            message: err.to_string(),
        }
    }
}

impl From<GenerationError> for ProofAndFitError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Timeout { timeout_ms } => ProofAndFitError::Timeout {
                operation: "challenge generation".to_string(),
                timeout_ms,
            },
            other => ProofAndFitError::Generation {
                message: other.to_string(),
            },
        }
    }
}

impl From<PersistenceError> for ProofAndFitError {
    fn from(err: PersistenceError) -> Self {
        ProofAndFitError::Persistence {
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ProofAndFitError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match self.empty_batch_cause() {
            Some(cause) => cause.message().to_string(),
            None => self.to_string(),
        };
        let details = match &self {
            ProofAndFitError::NothingGenerated {
                requested,
                duplicates_rejected,
                generation_failures,
                save_failures,
                cancelled,
            } => json!({
                "requested": requested,
                "duplicates_rejected": duplicates_rejected,
                "generation_failures": generation_failures,
                "save_failures": save_failures,
                "cancelled": cancelled,
            }),
            _ => serde_json::Value::Null,
        };
        (status, Json(json!({ "error": message, "details": details }))).into_response()
    }
}

/// Result type alias for proofandfit operations
pub type Result<T> = std::result::Result<T, ProofAndFitError>;
