use axum::{
    extract::{MatchedPath, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::metrics::performance::RequestSample;
use crate::AppState;

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

/// Per-request facts visible to anything running inside the handler.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    /// Whether error bodies may carry internal detail
    pub expose_details: bool,
}

/// Context of the request currently being handled, if any.
pub fn current_request() -> Option<RequestContext> {
    REQUEST_CONTEXT.try_with(|ctx| ctx.clone()).ok()
}

/// Upstream timing a handler reports about itself, attached as a response
/// extension and folded into the recorded metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryTiming {
    pub db_ms: Option<f64>,
    pub cache_hit: Option<bool>,
}

/// Route label for requests that matched nothing, so 404 probes cannot
/// inflate the route breakdown.
const UNMATCHED_ROUTE: &str = "<unmatched>";

/// Times every request, tags it with a request id and records it in the
/// performance ledger. Adds three response headers:
///
///   X-Request-Id        — echoed from the request or freshly generated
///   X-Response-Time-Ms  — total handler wall time in milliseconds
///   Server-Timing       — same value in the standard Server-Timing format
pub async fn timing_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|m| m.as_str().to_owned())
        .unwrap_or_else(|| UNMATCHED_ROUTE.to_owned());

    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|id| !id.is_empty() && id.len() <= 128)
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let ctx = RequestContext {
        request_id: request_id.clone(),
        expose_details: !state.config.is_production(),
    };

    let start = Instant::now();
    let mut response = REQUEST_CONTEXT.scope(ctx, next.run(req)).await;
    let elapsed = start.elapsed();
    let ms = elapsed.as_secs_f64() * 1000.0;

    // ── Inject response headers ─────────────────────────────────
    if let Ok(val) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("X-Request-Id", val);
    }
    if let Ok(val) = HeaderValue::from_str(&format!("{ms:.3}")) {
        response.headers_mut().insert("X-Response-Time-Ms", val);
    }
    if let Ok(val) = HeaderValue::from_str(&format!("total;dur={ms:.3}")) {
        response.headers_mut().insert("Server-Timing", val);
    }

    let status = response.status().as_u16();
    let query = response
        .extensions()
        .get::<QueryTiming>()
        .copied()
        .unwrap_or_default();

    // Long-lived SSE connections would only skew the averages
    if !path.ends_with("/stream") {
        state.performance.record_request(RequestSample {
            route,
            method: method.to_string(),
            response_time_ms: ms,
            status_code: status,
            db_query_time_ms: query.db_ms,
            cache_hit: query.cache_hit,
            ..Default::default()
        });
    }

    // ── Log ─────────────────────────────────────────────────────
    if status >= 500 {
        warn!(%request_id, %method, %path, status, elapsed_ms = ms, "request failed");
    } else if path.starts_with("/api/") {
        info!(%request_id, %method, %path, status, elapsed_ms = ms, "request");
    }

    response
}
