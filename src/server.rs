use axum::{
    middleware as axum_mw,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::handlers::{analytics, cache_warm, listings, security, webhooks};
use crate::metrics::stream;
use crate::middleware::timing;
use crate::AppState;

/// Builds the full Axum `Router` with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── Public ──────────────────────────────────────────────
        .route("/api/health", get(analytics::service_health))
        .route(
            "/api/cache-warm",
            get(cache_warm::status).post(cache_warm::trigger),
        )
        .route("/api/listings/:key", get(listings::listing))
        .route("/api/webhooks/razorpay", post(webhooks::razorpay_webhook))
        // ── Performance analytics ───────────────────────────────
        .route(
            "/api/admin/analytics/performance",
            get(analytics::performance_stats),
        )
        .route(
            "/api/admin/analytics/performance/detailed",
            get(analytics::performance_detailed),
        )
        .route(
            "/api/admin/analytics/performance/health",
            get(analytics::performance_health),
        )
        .route(
            "/api/admin/analytics/performance/stream",
            get(stream::performance_stream),
        )
        // ── Security analytics ──────────────────────────────────
        .route(
            "/api/admin/analytics/security",
            get(analytics::security_stats),
        )
        .route(
            "/api/admin/analytics/security/detailed",
            get(analytics::security_detailed),
        )
        .route(
            "/api/admin/analytics/security/health",
            get(analytics::security_health),
        )
        // ── Security administration ─────────────────────────────
        .route("/api/admin/security/events", post(security::record_event))
        .route(
            "/api/admin/security/events/:id/resolve",
            post(security::resolve_event),
        )
        .route(
            "/api/admin/security/blocked-ips",
            get(security::blocked_ips),
        )
        .route(
            "/api/admin/security/blocked-ips/:ip",
            delete(security::unblock_ip),
        )
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn_with_state(
            state.clone(),
            timing::timing_middleware,
        ))
        .layer(CorsLayer::permissive())
        // ── Provide shared state to all routes above ────────────
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Environment};
    use crate::datasource::StaticDataSource;
    use crate::metrics::HOUR_MS;
    use crate::metrics::security::{SecurityCategory, Severity};
    use crate::payments::PaymentStatus;
    use crate::signature;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use axum::response::Response;
    use serde_json::Value;
    use tower::ServiceExt;

    const SECRET: &str = "whsec_router_test";
    const ADMIN: &str = "admin-token";

    fn app(config: Config) -> (Router, Arc<AppState>) {
        let state = Arc::new(AppState::for_tests(config));
        (create_router(state.clone()), state)
    }

    fn dev_config() -> Config {
        let mut config = Config::for_tests();
        config.razorpay_webhook_secret = Some(SECRET.into());
        config.admin_api_token = Some(ADMIN.into());
        config
    }

    async fn send(router: &Router, req: Request<Body>) -> Response {
        router.clone().oneshot(req).await.unwrap()
    }

    async fn json_body(resp: Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn captured_body() -> String {
        r#"{"event":"payment.captured","payload":{"payment":{"entity":{
            "id":"pay_1","order_id":"order_1","amount":49900,"currency":"INR",
            "email":"buyer@example.org"}}}}"#
            .to_owned()
    }

    fn webhook(body: &str, signature: &str, event_id: Option<&str>) -> Request<Body> {
        let mut builder = Request::post("/api/webhooks/razorpay")
            .header(header::CONTENT_TYPE, "application/json")
            .header("x-razorpay-signature", signature);
        if let Some(id) = event_id {
            builder = builder.header("x-razorpay-event-id", id);
        }
        builder.body(Body::from(body.to_owned())).unwrap()
    }

    fn admin_get(uri: &str) -> Request<Body> {
        Request::get(uri)
            .header(header::AUTHORIZATION, format!("Bearer {ADMIN}"))
            .body(Body::empty())
            .unwrap()
    }

    // ─── Webhook ─────────────────────────────────────────────────

    #[tokio::test]
    async fn signed_capture_is_processed() {
        let (router, state) = app(dev_config());
        let body = captured_body();
        let sig = signature::sign(SECRET, body.as_bytes()).unwrap();

        let resp = send(&router, webhook(&body, &sig, Some("evt_1"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["status"], "processed");
        assert_eq!(json["transition"]["result"], "applied");
        // LogMailer never sends, which must not affect the outcome
        assert_eq!(json["email"]["sent"], false);

        let record = state.payments.get("pay_1").await.unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Captured);
    }

    #[tokio::test]
    async fn tampered_body_is_rejected_and_recorded() {
        let (router, state) = app(dev_config());
        let body = captured_body();
        let sig = signature::sign(SECRET, body.as_bytes()).unwrap();
        let tampered = body.replace("49900", "100");

        let resp = send(&router, webhook(&tampered, &sig, None)).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(resp).await["code"], "INVALID_SIGNATURE");

        let events = state.security.analytics().ledger().snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, SecurityCategory::SuspiciousActivity);
        assert_eq!(events[0].severity, Severity::High);
        assert!(state.payments.get("pay_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_secret_is_a_config_error() {
        let mut config = dev_config();
        config.razorpay_webhook_secret = None;
        let (router, _) = app(config);

        let resp = send(&router, webhook(&captured_body(), "00", None)).await;
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_body(resp).await;
        assert_eq!(json["code"], "CONFIG_ERROR");
        assert!(json["request_id"].is_string());
    }

    #[tokio::test]
    async fn redelivered_event_id_is_a_duplicate() {
        let (router, _) = app(dev_config());
        let body = captured_body();
        let sig = signature::sign(SECRET, body.as_bytes()).unwrap();

        let first = send(&router, webhook(&body, &sig, Some("evt_dup"))).await;
        assert_eq!(json_body(first).await["status"], "processed");
        let second = send(&router, webhook(&body, &sig, Some("evt_dup"))).await;
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(json_body(second).await["status"], "duplicate");
    }

    #[tokio::test]
    async fn terminal_payment_does_not_move_back() {
        let (router, state) = app(dev_config());
        let body = captured_body();
        let sig = signature::sign(SECRET, body.as_bytes()).unwrap();
        send(&router, webhook(&body, &sig, None)).await;

        let failed = body.replace("payment.captured", "payment.failed");
        let sig = signature::sign(SECRET, failed.as_bytes()).unwrap();
        let resp = send(&router, webhook(&failed, &sig, None)).await;
        assert_eq!(json_body(resp).await["status"], "stale");

        let record = state.payments.get("pay_1").await.unwrap().unwrap();
        assert_eq!(record.status, PaymentStatus::Captured);
    }

    #[tokio::test]
    async fn unknown_event_and_bad_json_are_acknowledged() {
        let (router, _) = app(dev_config());

        let body = r#"{"event":"refund.created","payload":{}}"#;
        let sig = signature::sign(SECRET, body.as_bytes()).unwrap();
        let resp = send(&router, webhook(body, &sig, None)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "ignored");

        let body = "not json";
        let sig = signature::sign(SECRET, body.as_bytes()).unwrap();
        let resp = send(&router, webhook(body, &sig, None)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["status"], "invalid_payload");
    }

    // ─── Cache warming ───────────────────────────────────────────

    #[tokio::test]
    async fn cache_warm_disabled_is_forbidden() {
        let (router, _) = app(dev_config());
        let resp = send(
            &router,
            Request::post("/api/cache-warm").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(json_body(resp).await["code"], "CACHE_WARMING_DISABLED");
    }

    #[tokio::test]
    async fn cache_warm_in_production_needs_the_token() {
        let mut config = dev_config();
        config.environment = Environment::Production;
        config.cache_warming_enabled = true;

        let (router, _) = app(config.clone());
        let resp = send(
            &router,
            Request::post("/api/cache-warm").body(Body::empty()).unwrap(),
        )
        .await;
        // Token unset in production
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_body(resp).await;
        assert_eq!(json["error"], "An internal error occurred");

        config.cache_warm_token = Some("warm-secret".into());
        let (router, _) = app(config);
        let resp = send(
            &router,
            Request::post("/api/cache-warm")
                .header(header::AUTHORIZATION, "Bearer wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = send(
            &router,
            Request::post("/api/cache-warm")
                .header(header::AUTHORIZATION, "Bearer warm-secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = json_body(resp).await;
        assert_eq!(json["succeeded"], 0);
        assert!(json["failed"].as_u64().unwrap() > 0);
    }

    #[tokio::test]
    async fn cache_warm_report_is_kept() {
        let mut config = dev_config();
        config.cache_warming_enabled = true;
        let (router, _) = app(config);

        let resp = send(&router, Request::get("/api/cache-warm").body(Body::empty()).unwrap()).await;
        assert!(json_body(resp).await["last_report"].is_null());

        send(&router, Request::post("/api/cache-warm").body(Body::empty()).unwrap()).await;
        let resp = send(&router, Request::get("/api/cache-warm").body(Body::empty()).unwrap()).await;
        let json = json_body(resp).await;
        assert_eq!(json["running"], false);
        assert!(json["last_report"]["targets"].is_array());
    }

    // ─── Admin analytics ─────────────────────────────────────────

    #[tokio::test]
    async fn admin_routes_require_the_bearer_token() {
        let (router, state) = app(dev_config());
        let resp = send(
            &router,
            Request::get("/api/admin/analytics/performance")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(state.security.analytics().ledger().len(), 1);

        let resp = send(&router, admin_get("/api/admin/analytics/performance")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn requests_are_recorded_by_route_template() {
        let (router, state) = app(dev_config());
        send(&router, Request::get("/api/health").body(Body::empty()).unwrap()).await;
        send(&router, Request::get("/nope").body(Body::empty()).unwrap()).await;

        let metrics = state.performance.ledger().snapshot();
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics[0].route, "/api/health");
        assert_eq!(metrics[0].method, "GET");
        assert_eq!(metrics[0].status_code, 200);
        assert_eq!(metrics[1].route, "<unmatched>");
        assert_eq!(metrics[1].status_code, 404);
    }

    #[tokio::test]
    async fn performance_csv_export_filters_by_route() {
        let (router, _) = app(dev_config());
        send(&router, Request::get("/api/health").body(Body::empty()).unwrap()).await;
        send(&router, admin_get("/api/admin/analytics/performance")).await;

        let resp = send(
            &router,
            admin_get("/api/admin/analytics/performance?format=csv&period=1&route=/api/health"),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "text/csv; charset=utf-8"
        );
        assert!(resp.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .unwrap()
            .ends_with(".csv\""));

        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let csv = String::from_utf8(bytes.to_vec()).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("timestamp,route,method"));
        assert!(lines[1].contains(",/api/health,GET,"));
    }

    #[tokio::test]
    async fn invalid_period_is_a_bad_request() {
        let (router, _) = app(dev_config());
        let resp = send(&router, admin_get("/api/admin/analytics/security?period=0")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["code"], "BAD_REQUEST");
    }

    // ─── Security administration ─────────────────────────────────

    #[tokio::test]
    async fn event_can_be_resolved_once() {
        let (router, _) = app(dev_config());
        let resp = send(
            &router,
            Request::post("/api/admin/security/events")
                .header(header::AUTHORIZATION, format!("Bearer {ADMIN}"))
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-forwarded-for", "198.51.100.4")
                .body(Body::from(
                    r#"{"category":"failed_login","severity":"medium","description":"bad password"}"#,
                ))
                .unwrap(),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let event = json_body(resp).await;
        assert_eq!(event["source_ip"], "198.51.100.4");
        let id = event["id"].as_str().unwrap().to_owned();

        let resolve = || {
            Request::post(format!("/api/admin/security/events/{id}/resolve"))
                .header(header::AUTHORIZATION, format!("Bearer {ADMIN}"))
                .body(Body::empty())
                .unwrap()
        };
        let resp = send(&router, resolve()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json_body(resp).await["resolved"], true);

        let resp = send(&router, resolve()).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn auto_blocked_ip_can_be_unblocked() {
        let (router, state) = app(dev_config());
        for _ in 0..5 {
            state.security.record_event(crate::metrics::security::NewSecurityEvent::new(
                SecurityCategory::SqlInjectionAttempt,
                Severity::Critical,
                "203.0.113.9",
                "union select",
            ));
        }
        assert!(state.security.is_blocked("203.0.113.9"));

        let resp = send(&router, admin_get("/api/admin/security/blocked-ips")).await;
        let json = json_body(resp).await;
        assert_eq!(json["ips"][0], "203.0.113.9");

        let unblock = || {
            Request::delete("/api/admin/security/blocked-ips/203.0.113.9")
                .header(header::AUTHORIZATION, format!("Bearer {ADMIN}"))
                .body(Body::empty())
                .unwrap()
        };
        assert_eq!(send(&router, unblock()).await.status(), StatusCode::NO_CONTENT);
        assert_eq!(send(&router, unblock()).await.status(), StatusCode::NOT_FOUND);
        assert!(!state.security.is_blocked("203.0.113.9"));
    }

    // ─── Listings ────────────────────────────────────────────────

    fn listing_app(source: Arc<StaticDataSource>) -> (Router, Arc<AppState>) {
        let mut config = dev_config();
        config.cache_warming_enabled = true;
        let state = Arc::new(AppState::for_tests_with(config, source));
        (create_router(state.clone()), state)
    }

    fn public_get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn warmed_listing_is_served_from_cache() {
        let source = Arc::new(StaticDataSource::new(
            serde_json::json!([{"id": 1, "title": "RustConf"}]),
        ));
        let (router, state) = listing_app(source.clone());

        let resp = send(
            &router,
            Request::post("/api/cache-warm").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(json_body(resp).await["failed"], 0);
        let calls_after_warm = source.calls();

        let resp = send(&router, public_get("/api/listings/events:upcoming")).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()["x-cache"], "HIT");
        assert_eq!(json_body(resp).await[0]["title"], "RustConf");
        assert_eq!(source.calls(), calls_after_warm);

        let metric = state
            .performance
            .ledger()
            .snapshot()
            .into_iter()
            .find(|m| m.route == "/api/listings/:key")
            .unwrap();
        assert_eq!(metric.cache_hit, Some(true));
        assert_eq!(metric.db_query_time_ms, None);
        assert_eq!(state.performance.stats(HOUR_MS).cache_hit_rate, 1.0);
    }

    #[tokio::test]
    async fn cold_listing_loads_once_then_hits() {
        let source = Arc::new(StaticDataSource::new(serde_json::json!([])));
        let (router, state) = listing_app(source.clone());

        let first = send(&router, public_get("/api/listings/blog:recent")).await;
        assert_eq!(first.headers()["x-cache"], "MISS");
        let second = send(&router, public_get("/api/listings/blog:recent")).await;
        assert_eq!(second.headers()["x-cache"], "HIT");
        assert_eq!(source.calls(), 1);

        let hits: Vec<Option<bool>> = state
            .performance
            .ledger()
            .snapshot()
            .iter()
            .map(|m| m.cache_hit)
            .collect();
        assert_eq!(hits, vec![Some(false), Some(true)]);
        assert_eq!(state.performance.stats(HOUR_MS).cache_hit_rate, 0.5);
    }

    #[tokio::test]
    async fn unknown_listing_and_missing_source() {
        let (router, _) = app(dev_config());
        let resp = send(&router, public_get("/api/listings/nope")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(resp).await["code"], "NOT_FOUND");

        let resp = send(&router, public_get("/api/listings/events:upcoming")).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(json_body(resp).await["code"], "UPSTREAM_ERROR");
    }

    // ─── Malformed requests ──────────────────────────────────────

    async fn assert_bad_request(resp: Response) {
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = json_body(resp).await;
        assert_eq!(json["code"], "BAD_REQUEST");
        assert_eq!(json["status"], 400);
        assert!(json["request_id"].is_string());
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn bad_path_uuid_gets_json_error() {
        let (router, _) = app(dev_config());
        let resp = send(
            &router,
            Request::post("/api/admin/security/events/not-a-uuid/resolve")
                .header(header::AUTHORIZATION, format!("Bearer {ADMIN}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_bad_request(resp).await;
    }

    #[tokio::test]
    async fn bad_query_gets_json_error() {
        let (router, _) = app(dev_config());
        let resp = send(
            &router,
            admin_get("/api/admin/analytics/performance/detailed?period=abc"),
        )
        .await;
        assert_bad_request(resp).await;

        let resp = send(&router, admin_get("/api/admin/analytics/security?format=xml")).await;
        assert_bad_request(resp).await;
    }

    #[tokio::test]
    async fn bad_json_body_gets_json_error() {
        let (router, state) = app(dev_config());
        let resp = send(
            &router,
            Request::post("/api/admin/security/events")
                .header(header::AUTHORIZATION, format!("Bearer {ADMIN}"))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    r#"{"category":"nope","severity":"low","description":"x"}"#,
                ))
                .unwrap(),
        )
        .await;
        assert_bad_request(resp).await;
        assert_eq!(state.security.analytics().ledger().len(), 0);
    }
}
