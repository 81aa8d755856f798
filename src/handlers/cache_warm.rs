use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::cache::TtlPolicy;
use crate::datasource::TableQuery;
use crate::metrics::now_ms;
use crate::middleware::QueryTiming;
use crate::AppState;

use super::{auth, AppError};

// ─── Targets ─────────────────────────────────────────────────────

/// One query whose result is primed into the cache.
pub struct WarmTarget {
    pub key: &'static str,
    pub query: TableQuery,
    pub policy: TtlPolicy,
}

/// The public listings the site reads on almost every page view.
pub fn warm_targets() -> Vec<WarmTarget> {
    vec![
        WarmTarget {
            key: "events:upcoming",
            query: TableQuery::new("events")
                .select("id,title,slug,start_date,end_date,location,banner_url")
                .filter("status", "eq.published")
                .order("start_date.asc")
                .limit(50),
            policy: TtlPolicy::Medium,
        },
        WarmTarget {
            key: "hackathons:active",
            query: TableQuery::new("hackathons")
                .select("id,title,slug,start_date,end_date,prize_pool")
                .filter("status", "in.(upcoming,ongoing)")
                .order("start_date.asc")
                .limit(50),
            policy: TtlPolicy::Medium,
        },
        WarmTarget {
            key: "companies:featured",
            query: TableQuery::new("companies")
                .select("id,name,slug,logo_url")
                .filter("is_featured", "eq.true")
                .order("name.asc"),
            policy: TtlPolicy::Long,
        },
        WarmTarget {
            key: "blog:recent",
            query: TableQuery::new("blog_posts")
                .select("id,title,slug,excerpt,published_at")
                .filter("status", "eq.published")
                .order("published_at.desc")
                .limit(20),
            policy: TtlPolicy::Long,
        },
        WarmTarget {
            key: "membership:plans",
            query: TableQuery::new("membership_plans")
                .select("id,name,price,currency,features")
                .filter("is_active", "eq.true")
                .order("price.asc"),
            policy: TtlPolicy::Day,
        },
    ]
}

// ─── Report ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct WarmResult {
    pub key: String,
    pub table: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WarmReport {
    pub started_at: i64,
    pub duration_ms: f64,
    pub succeeded: usize,
    pub failed: usize,
    pub targets: Vec<WarmResult>,
}

#[derive(Debug, Serialize)]
pub struct WarmStatus {
    pub running: bool,
    pub last_report: Option<WarmReport>,
}

/// Clears the running flag however the run ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Prime every target in order. Failures are recorded per target.
pub async fn run_warmup(state: &AppState, targets: &[WarmTarget]) -> WarmReport {
    let started_at = now_ms();
    let start = Instant::now();
    let mut results = Vec::with_capacity(targets.len());

    for target in targets {
        let t = Instant::now();
        let result = match state.data_source.select(&target.query).await {
            Ok(rows) => {
                let count = rows.as_array().map(Vec::len);
                let cached = state.cache.set_json(target.key, &rows, target.policy).await;
                WarmResult {
                    key: target.key.to_owned(),
                    table: target.query.table.clone(),
                    ok: cached,
                    rows: count,
                    error: (!cached).then(|| "cache write failed".to_owned()),
                    duration_ms: t.elapsed().as_secs_f64() * 1000.0,
                }
            }
            Err(e) => {
                warn!(key = target.key, error = %e, "cache warm target failed");
                WarmResult {
                    key: target.key.to_owned(),
                    table: target.query.table.clone(),
                    ok: false,
                    rows: None,
                    error: Some(e.to_string()),
                    duration_ms: t.elapsed().as_secs_f64() * 1000.0,
                }
            }
        };
        results.push(result);
    }

    let succeeded = results.iter().filter(|r| r.ok).count();
    WarmReport {
        started_at,
        duration_ms: start.elapsed().as_secs_f64() * 1000.0,
        succeeded,
        failed: results.len() - succeeded,
        targets: results,
    }
}

// ─── Handlers ────────────────────────────────────────────────────

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    if !state.config.cache_warming_enabled {
        return Err(AppError::Forbidden {
            code: "CACHE_WARMING_DISABLED",
            message: "cache warming is disabled".into(),
        });
    }
    if state.config.is_production() {
        auth::check_bearer(
            state,
            headers,
            state.config.cache_warm_token.as_deref(),
            "CACHE_WARM_TOKEN",
        )?;
    }
    Ok(())
}

/// POST /api/cache-warm — run every target now.
pub async fn trigger(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    authorize(&state, &headers)?;

    if state
        .warming
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(AppError::Conflict("cache warming is already running".into()));
    }
    let _guard = RunGuard(&state.warming);

    let report = run_warmup(&state, &warm_targets()).await;
    info!(
        succeeded = report.succeeded,
        failed = report.failed,
        elapsed_ms = report.duration_ms,
        "cache warming finished"
    );
    *state.warm_report.lock() = Some(report.clone());

    let db_ms = report.duration_ms;
    let mut response = Json(report).into_response();
    response.extensions_mut().insert(QueryTiming {
        db_ms: Some(db_ms),
        cache_hit: None,
    });
    Ok(response)
}

/// GET /api/cache-warm — the most recent report.
pub async fn status(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<WarmStatus>, AppError> {
    authorize(&state, &headers)?;
    Ok(Json(WarmStatus {
        running: state.warming.load(Ordering::SeqCst),
        last_report: state.warm_report.lock().clone(),
    }))
}
