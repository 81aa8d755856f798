use axum::{
    extract::State,
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use crate::handlers::{auth, ApiQuery, AppError, PeriodQuery};
use crate::AppState;

// ─── GET /api/admin/analytics/performance/stream ─────────────────
/// Server-Sent Events endpoint.
/// Pushes the performance stats for the requested window as JSON on every
/// tick of the configured stream interval.

pub async fn performance_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiQuery(query): ApiQuery<PeriodQuery>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, AppError> {
    auth::authorize_admin(&state, &headers)?;
    let period_ms = query.period_ms()?;

    let interval = tokio::time::interval(state.config.stream_interval);

    let stream = IntervalStream::new(interval).map(move |_| {
        let stats = state.performance.stats(period_ms);
        let json = serde_json::to_string(&stats).unwrap_or_default();
        Ok(Event::default().event("stats").data(json))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}
