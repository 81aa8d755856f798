use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::CacheCounters;
use crate::metrics::health::HealthReport;
use crate::metrics::performance::{PerformanceDetail, PerformanceStats};
use crate::metrics::security::{SecurityCategory, SecurityDetail, SecurityStats};
use crate::metrics::{ExportError, ExportFormat, HOUR_MS};
use crate::AppState;

use super::{auth, ApiQuery, AppError, PeriodQuery};

// ─── Query types ─────────────────────────────────────────────────
// Flattening PeriodQuery would make serde_urlencoded hand `period` over as
// a string, so the export queries repeat its fields.

#[derive(Debug, Deserialize)]
pub struct PerformanceQuery {
    pub period: Option<f64>,
    pub format: Option<ExportFormat>,
    /// Restrict an export to one route template
    pub route: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SecurityQuery {
    pub period: Option<f64>,
    pub format: Option<ExportFormat>,
    /// Restrict an export to one category
    pub category: Option<SecurityCategory>,
}

fn window_ms(period: Option<f64>) -> Result<i64, AppError> {
    PeriodQuery { period }.period_ms()
}

#[derive(Debug, Serialize)]
pub struct ServiceHealth {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub store_backend: &'static str,
    pub cache: CacheCounters,
    pub performance: HealthReport,
}

// ─── GET /api/health ─────────────────────────────────────────────

pub async fn service_health(State(state): State<Arc<AppState>>) -> Json<ServiceHealth> {
    Json(ServiceHealth {
        status: "ok",
        uptime_secs: state.started_at.elapsed().as_secs(),
        store_backend: state.cache.backend(),
        cache: state.cache.counters(),
        performance: state.performance.health(HOUR_MS),
    })
}

// ─── Performance ─────────────────────────────────────────────────

/// GET /api/admin/analytics/performance — stats, or an export with `format`.
pub async fn performance_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<PerformanceQuery>,
) -> Result<Response, AppError> {
    auth::authorize_admin(&state, &headers)?;
    let period_ms = window_ms(query.period)?;

    match query.format {
        Some(format) => {
            let body = state
                .performance
                .export(format, period_ms, |m| {
                    query.route.as_deref().map_or(true, |r| m.route == r)
                })
                .map_err(export_failed)?;
            Ok(export_response("performance", format, body))
        }
        None => {
            let stats: PerformanceStats = state.performance.stats(period_ms);
            Ok(Json(stats).into_response())
        }
    }
}

/// GET /api/admin/analytics/performance/detailed
pub async fn performance_detailed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<PeriodQuery>,
) -> Result<Json<PerformanceDetail>, AppError> {
    auth::authorize_admin(&state, &headers)?;
    Ok(Json(state.performance.detailed(query.period_ms()?)))
}

/// GET /api/admin/analytics/performance/health
pub async fn performance_health(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<PeriodQuery>,
) -> Result<Json<HealthReport>, AppError> {
    auth::authorize_admin(&state, &headers)?;
    Ok(Json(state.performance.health(query.period_ms()?)))
}

// ─── Security ────────────────────────────────────────────────────

/// GET /api/admin/analytics/security — stats, or an export with `format`.
pub async fn security_stats(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<SecurityQuery>,
) -> Result<Response, AppError> {
    auth::authorize_admin(&state, &headers)?;
    let period_ms = window_ms(query.period)?;
    let analytics = state.security.analytics();

    match query.format {
        Some(format) => {
            let body = analytics
                .export(format, period_ms, |e| {
                    query.category.map_or(true, |c| e.category == c)
                })
                .map_err(export_failed)?;
            Ok(export_response("security", format, body))
        }
        None => {
            let stats: SecurityStats = analytics.stats(period_ms);
            Ok(Json(stats).into_response())
        }
    }
}

/// GET /api/admin/analytics/security/detailed
pub async fn security_detailed(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<PeriodQuery>,
) -> Result<Json<SecurityDetail>, AppError> {
    auth::authorize_admin(&state, &headers)?;
    Ok(Json(state.security.analytics().detailed(query.period_ms()?)))
}

/// GET /api/admin/analytics/security/health
pub async fn security_health(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<PeriodQuery>,
) -> Result<Json<HealthReport>, AppError> {
    auth::authorize_admin(&state, &headers)?;
    Ok(Json(state.security.analytics().health(query.period_ms()?)))
}

// ─── Helpers ─────────────────────────────────────────────────────

fn export_response(kind: &str, format: ExportFormat, body: String) -> Response {
    let filename = format!(
        "attachment; filename=\"{kind}-{}.{}\"",
        chrono::Utc::now().format("%Y%m%d-%H%M%S"),
        format.extension()
    );
    (
        [
            (header::CONTENT_TYPE, format.content_type().to_owned()),
            (header::CONTENT_DISPOSITION, filename),
        ],
        body,
    )
        .into_response()
}

fn export_failed(e: ExportError) -> AppError {
    AppError::Internal(e.to_string())
}
