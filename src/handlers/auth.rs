use axum::http::{header, HeaderMap};

use crate::metrics::security::{NewSecurityEvent, SecurityCategory, Severity};
use crate::signature::constant_time_eq;
use crate::AppState;

use super::{client_ip, AppError};

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Check a bearer token against `expected`.
///
/// With no expected token the check passes in development and is a
/// configuration error in production.
pub fn check_bearer(
    state: &AppState,
    headers: &HeaderMap,
    expected: Option<&str>,
    setting: &str,
) -> Result<(), AppError> {
    let Some(expected) = expected else {
        if state.config.is_production() {
            return Err(AppError::Config(format!("{setting} is not set")));
        }
        return Ok(());
    };

    match bearer_token(headers) {
        Some(token) if constant_time_eq(token, expected) => Ok(()),
        presented => {
            let reason = if presented.is_some() {
                "invalid bearer token"
            } else {
                "missing bearer token"
            };
            state.security.record_event(
                NewSecurityEvent::new(
                    SecurityCategory::SuspiciousActivity,
                    Severity::Medium,
                    client_ip(headers),
                    format!("{reason} for protected endpoint"),
                )
                .with_metadata("setting", setting),
            );
            Err(AppError::Unauthorized(reason.to_owned()))
        }
    }
}

/// Gate for every `/api/admin` route.
pub fn authorize_admin(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    check_bearer(
        state,
        headers,
        state.config.admin_api_token.as_deref(),
        "ADMIN_API_TOKEN",
    )
}

/// Audit trail entry for an admin action that changes state.
pub fn audit_admin_action(state: &AppState, headers: &HeaderMap, action: &str) {
    state.security.record_event(
        NewSecurityEvent::new(
            SecurityCategory::AdminAccess,
            Severity::Low,
            client_ip(headers),
            format!("admin action: {action}"),
        )
        .with_metadata("action", action),
    );
}
