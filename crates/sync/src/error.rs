// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error codes shared by the REST client, the hub connections and the
/// notice layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Validation,
    Unauthorized,
    Forbidden,
    NotFound,
    Conflict,
    Server,
    Network,
    Disconnected,
    Protocol,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::Unauthorized => 401,
            Self::Forbidden => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Server => 500,
            Self::Network => 502,
            Self::Disconnected => 503,
            Self::Protocol => 502,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::Conflict => "CONFLICT",
            Self::Server => "SERVER",
            Self::Network => "NETWORK",
            Self::Disconnected => "DISCONNECTED",
            Self::Protocol => "PROTOCOL",
            Self::Internal => "INTERNAL",
        }
    }

    /// Classify an HTTP status returned by the backend.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            409 => Self::Conflict,
            400..=499 => Self::Validation,
            _ => Self::Server,
        }
    }

    /// Whether this error ends the signed-in session.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::Forbidden)
    }

    /// Fallback user-facing text when the backend gave no message.
    pub fn toast_message(&self) -> &'static str {
        match self {
            Self::Validation => "Please check the submitted data.",
            Self::Unauthorized => "Your session has expired. Please sign in again.",
            Self::Forbidden => "You do not have permission to do that.",
            Self::NotFound => "The requested resource was not found.",
            Self::Conflict => "The resource was changed by someone else.",
            Self::Server | Self::Internal | Self::Protocol => {
                "Something went wrong. Please try again later."
            }
            Self::Network => "Unable to reach the server.",
            Self::Disconnected => "Not connected to the realtime service.",
        }
    }

    pub fn to_error_body(&self, message: impl Into<String>) -> ErrorBody {
        ErrorBody { code: self.as_str().to_owned(), message: message.into() }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error body with machine-readable code and human-readable message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// A classified failure, carried inside `anyhow::Error` and recovered with
/// `downcast_ref` where callers need the code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    /// HTTP status when the error came from a REST response.
    pub status: Option<u16>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), status: None }
    }

    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::from_http_status(status),
            message: message.into(),
            status: Some(status),
        }
    }

    pub fn disconnected(hub: &str) -> Self {
        Self::new(ErrorCode::Disconnected, format!("hub {hub} is not connected"))
    }

    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse { error: self.code.to_error_body(self.message.clone()) }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

/// Extract the error code from an `anyhow::Error`, if it wraps an [`ApiError`].
pub fn code_of(err: &anyhow::Error) -> Option<ErrorCode> {
    err.downcast_ref::<ApiError>().map(|e| e.code)
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
