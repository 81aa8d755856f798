pub mod analytics;
pub mod auth;
pub mod cache_warm;
pub mod listings;
pub mod security;
pub mod webhooks;

use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        FromRequest, FromRequestParts,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, warn};

use crate::metrics::HOUR_MS;
use crate::middleware::current_request;

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("invalid webhook signature")]
    InvalidSignature,

    #[error("{message}")]
    Forbidden { code: &'static str, message: String },

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Config(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Unauthorized(_) | Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::Forbidden { .. } => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    /// Stable machine-readable code, independent of the message text.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::InvalidSignature => "INVALID_SIGNATURE",
            Self::Forbidden { code, .. } => *code,
            Self::NotFound(_) => "NOT_FOUND",
            Self::BadRequest(_) => "BAD_REQUEST",
            Self::Conflict(_) => "CONFLICT",
            Self::Upstream(_) => "UPSTREAM_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let ctx = current_request();
        let request_id = ctx.as_ref().map(|c| c.request_id.clone());
        let expose = ctx.as_ref().map_or(false, |c| c.expose_details);

        // Server-side faults are logged in full and only shown in full
        // outside production
        let message = if status.is_server_error() {
            error!(request_id = ?request_id, code = self.code(), error = %self, "request failed");
            if expose {
                self.to_string()
            } else {
                "An internal error occurred".to_owned()
            }
        } else {
            warn!(request_id = ?request_id, code = self.code(), error = %self, "request rejected");
            self.to_string()
        };

        let body = serde_json::json!({
            "error":      message,
            "code":       self.code(),
            "status":     status.as_u16(),
            "request_id": request_id,
        });

        (status, Json(body)).into_response()
    }
}

// ─── Extractors ──────────────────────────────────────────────────
// axum's own extractors reject with plain text; these route the rejection
// through AppError so clients always get the JSON error body.

#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(AppError))]
pub struct ApiQuery<T>(pub T);

#[derive(Debug, FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(AppError))]
pub struct ApiPath<T>(pub T);

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

// ─── Shared query parameters ─────────────────────────────────────

/// Longest window the dashboards may ask for, in hours.
const MAX_PERIOD_HOURS: f64 = 24.0 * 30.0;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeriodQuery {
    /// Window length in hours, default 24
    pub period: Option<f64>,
}

impl PeriodQuery {
    pub fn period_ms(&self) -> Result<i64, AppError> {
        let hours = self.period.unwrap_or(24.0);
        if !hours.is_finite() || hours <= 0.0 || hours > MAX_PERIOD_HOURS {
            return Err(AppError::BadRequest(format!(
                "period must be between 0 and {MAX_PERIOD_HOURS} hours"
            )));
        }
        Ok((hours * HOUR_MS as f64) as i64)
    }
}

// ─── Helpers ─────────────────────────────────────────────────────

/// Caller's address as seen by the proxy in front of us.
///
/// Only the right-most `X-Forwarded-For` hop is taken: it is the one our
/// proxy appended, while anything to its left is whatever the client sent.
pub fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
        })
        .unwrap_or("unknown")
        .to_owned()
}
