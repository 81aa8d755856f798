use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::metrics::security::{NewSecurityEvent, ResolveError};
use crate::metrics::SecurityEvent;
use crate::AppState;

use super::{auth, client_ip, ApiJson, ApiPath, AppError};

impl From<ResolveError> for AppError {
    fn from(e: ResolveError) -> Self {
        match e {
            ResolveError::NotFound(_) => AppError::NotFound(e.to_string()),
            ResolveError::AlreadyResolved(_) => AppError::Conflict(e.to_string()),
        }
    }
}

// ─── POST /api/admin/security/events ─────────────────────────────

pub async fn record_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(mut event): ApiJson<NewSecurityEvent>,
) -> Result<(StatusCode, Json<SecurityEvent>), AppError> {
    auth::authorize_admin(&state, &headers)?;

    if event.description.trim().is_empty() {
        return Err(AppError::BadRequest("description must not be empty".into()));
    }
    if event.source_ip.trim().is_empty() {
        event.source_ip = client_ip(&headers);
    }

    let stored = state.security.record_event(event);
    Ok((StatusCode::CREATED, Json(stored)))
}

// ─── POST /api/admin/security/events/:id/resolve ─────────────────

pub async fn resolve_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiPath(id): ApiPath<Uuid>,
) -> Result<Json<SecurityEvent>, AppError> {
    auth::authorize_admin(&state, &headers)?;
    let event = state.security.resolve(id)?;
    auth::audit_admin_action(&state, &headers, &format!("resolve security event {id}"));
    Ok(Json(event))
}

// ─── Blocked IPs ─────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct BlockedIps {
    pub count: usize,
    pub ips: Vec<String>,
}

/// GET /api/admin/security/blocked-ips
pub async fn blocked_ips(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<BlockedIps>, AppError> {
    auth::authorize_admin(&state, &headers)?;
    let ips = state.security.blocked_ips();
    Ok(Json(BlockedIps {
        count: ips.len(),
        ips,
    }))
}

/// DELETE /api/admin/security/blocked-ips/:ip
pub async fn unblock_ip(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiPath(ip): ApiPath<String>,
) -> Result<StatusCode, AppError> {
    auth::authorize_admin(&state, &headers)?;
    if !state.security.unblock(&ip) {
        return Err(AppError::NotFound(format!("{ip} is not blocked")));
    }
    auth::audit_admin_action(&state, &headers, &format!("unblock {ip}"));
    Ok(StatusCode::NO_CONTENT)
}
