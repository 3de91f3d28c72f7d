//! Authentication and authorization errors.
//!
//! Every variant maps to a fixed HTTP status, application code and a generic
//! client message. The client never sees more than that: tenant-lookup
//! failures look exactly like bad signatures, and unknown roles surface as a
//! plain internal error.

use std::fmt;

use axum::Json;
use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde_json::{Value, json};

pub const CODE_MISSING_HEADERS: u32 = 40101;
pub const CODE_INVALID_SIGNATURE: u32 = 40102;
pub const CODE_EXPIRED_TIMESTAMP: u32 = 40103;
pub const CODE_SESSION_INVALID: u32 = 40104;
pub const CODE_FORBIDDEN: u32 = 40301;
pub const CODE_INTERNAL: u32 = 50001;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Required signing or session headers are absent (names listed).
    MissingHeaders(Vec<String>),
    /// Recomputed HMAC does not match the supplied signature.
    InvalidSignature,
    /// Request timestamp is outside the freshness window.
    ExpiredTimestamp,
    /// API key does not resolve to a live tenant.
    TenantNotFound,
    /// External session lookup returned no usable account.
    SessionInvalid,
    /// Role/endpoint/method combination is not permitted.
    Forbidden,
    /// Role classification outside the closed set. Fatal configuration error.
    UnknownRole(i64),
}

impl AuthError {
    /// Short machine name, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingHeaders(_) => "missing_headers",
            Self::InvalidSignature => "invalid_signature",
            Self::ExpiredTimestamp => "expired_timestamp",
            Self::TenantNotFound => "tenant_not_found",
            Self::SessionInvalid => "session_invalid",
            Self::Forbidden => "forbidden",
            Self::UnknownRole(_) => "unknown_role",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingHeaders(_)
            | Self::InvalidSignature
            | Self::ExpiredTimestamp
            | Self::TenantNotFound
            | Self::SessionInvalid => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::UnknownRole(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Self::MissingHeaders(_) => CODE_MISSING_HEADERS,
            Self::InvalidSignature | Self::TenantNotFound => CODE_INVALID_SIGNATURE,
            Self::ExpiredTimestamp => CODE_EXPIRED_TIMESTAMP,
            Self::SessionInvalid => CODE_SESSION_INVALID,
            Self::Forbidden => CODE_FORBIDDEN,
            Self::UnknownRole(_) => CODE_INTERNAL,
        }
    }

    /// Message safe to return verbatim to the client.
    pub fn client_message(&self) -> &'static str {
        match self {
            Self::MissingHeaders(_) => "Required authentication headers are missing",
            Self::InvalidSignature | Self::TenantNotFound => "Invalid signature",
            Self::ExpiredTimestamp => "Request timestamp is outside the allowed window",
            Self::SessionInvalid => "Session is invalid or expired",
            Self::Forbidden => "Access to this endpoint is not permitted",
            Self::UnknownRole(_) => "Internal server error",
        }
    }

    /// Whether this is a fatal configuration error rather than a denial.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnknownRole(_))
    }

    /// Response body: `{ success: false, code, errors: { message, ... } }`.
    pub fn to_body(&self) -> Value {
        let mut errors = json!({ "message": self.client_message() });
        if let Self::MissingHeaders(names) = self {
            errors["missing"] = json!(names);
        }

        json!({
            "success": false,
            "code": self.code(),
            "errors": errors,
        })
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHeaders(names) => write!(f, "Missing headers: {}", names.join(", ")),
            Self::InvalidSignature => write!(f, "Invalid signature"),
            Self::ExpiredTimestamp => write!(f, "Request timestamp expired"),
            Self::TenantNotFound => write!(f, "Tenant not found"),
            Self::SessionInvalid => write!(f, "Session invalid"),
            Self::Forbidden => write!(f, "Forbidden"),
            Self::UnknownRole(value) => write!(f, "Unknown role value: {}", value),
        }
    }
}

impl std::error::Error for AuthError {}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_body())).into_response()
    }
}
