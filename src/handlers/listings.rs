use axum::{
    extract::State,
    http::HeaderValue,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use std::time::Instant;

use crate::middleware::QueryTiming;
use crate::AppState;

use super::cache_warm::warm_targets;
use super::{ApiPath, AppError};

// ─── GET /api/listings/:key ──────────────────────────────────────
/// Serves one of the warmed listings read-through: a cache hit answers
/// directly, a miss queries the data source and fills the cache.
pub async fn listing(
    State(state): State<Arc<AppState>>,
    ApiPath(key): ApiPath<String>,
) -> Result<Response, AppError> {
    let Some(target) = warm_targets().into_iter().find(|t| t.key == key) else {
        return Err(AppError::NotFound(format!("no listing named '{key}'")));
    };

    let started = Instant::now();
    let (rows, outcome) = state
        .cache
        .get_or_load(target.key, target.policy, || {
            state.data_source.select(&target.query)
        })
        .await
        .map_err(|e| AppError::Upstream(e.to_string()))?;
    let hit = outcome.is_hit();

    let mut response = Json(rows).into_response();
    response.headers_mut().insert(
        "X-Cache",
        HeaderValue::from_static(if hit { "HIT" } else { "MISS" }),
    );
    response.extensions_mut().insert(QueryTiming {
        db_ms: (!hit).then(|| started.elapsed().as_secs_f64() * 1000.0),
        cache_hit: Some(hit),
    });
    Ok(response)
}
