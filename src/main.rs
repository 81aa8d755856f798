use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{error, info, warn};

mod alerts;
mod cache;
mod config;
mod datasource;
mod email;
mod handlers;
mod logging;
mod metrics;
mod middleware;
mod payments;
mod server;
mod signature;
mod store;

use crate::cache::Cache;
use crate::config::Config;
use crate::datasource::{DataSource, RestDataSource, UnconfiguredDataSource};
use crate::email::{EmailSender, LogMailer, ResendMailer};
use crate::handlers::cache_warm::WarmReport;
use crate::metrics::performance::PerformanceStrategy;
use crate::metrics::system::{SysinfoProbe, SystemProbe};
use crate::metrics::{PerformanceAnalytics, SecurityMonitor};
use crate::payments::PaymentLedger;
use crate::store::{KvStore, MemoryStore, RedisStore};

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    pub config: Config,

    /// Request ledger. The timing middleware pushes, dashboards read.
    pub performance: Arc<PerformanceAnalytics>,

    /// Security ledger with auto-block set and alert forwarding.
    pub security: Arc<SecurityMonitor>,

    pub cache: Cache,
    pub payments: PaymentLedger,
    pub data_source: Arc<dyn DataSource>,
    pub mailer: Arc<dyn EmailSender>,

    /// Outcome of the most recent cache warming run.
    pub warm_report: Mutex<Option<WarmReport>>,
    /// Set while a warming run is in flight.
    pub warming: AtomicBool,

    pub started_at: Instant,
}

/// Everything `AppState` is assembled from.
pub struct Dependencies {
    pub store: Arc<dyn KvStore>,
    pub data_source: Arc<dyn DataSource>,
    pub mailer: Arc<dyn EmailSender>,
    pub probe: Arc<dyn SystemProbe>,
    pub alerts: Option<alerts::AlertSender>,
}

impl AppState {
    pub fn new(config: Config, deps: Dependencies) -> Self {
        let performance = PerformanceAnalytics::new(
            PerformanceStrategy::new(deps.probe),
            config.performance_capacity,
        );
        let security = SecurityMonitor::new(config.security_capacity, deps.alerts);

        Self {
            performance: Arc::new(performance),
            security: Arc::new(security),
            cache: Cache::new(deps.store.clone(), "cache"),
            payments: PaymentLedger::new(deps.store),
            data_source: deps.data_source,
            mailer: deps.mailer,
            warm_report: Mutex::new(None),
            warming: AtomicBool::new(false),
            started_at: Instant::now(),
            config,
        }
    }

    /// In-memory state with no external services.
    #[cfg(test)]
    pub fn for_tests(config: Config) -> Self {
        Self::for_tests_with(config, Arc::new(UnconfiguredDataSource))
    }

    /// In-memory state reading listings from `data_source`.
    #[cfg(test)]
    pub fn for_tests_with(config: Config, data_source: Arc<dyn DataSource>) -> Self {
        let mailer = Arc::new(LogMailer::new(&config.email_from));
        Self::new(
            config,
            Dependencies {
                store: Arc::new(MemoryStore::new()),
                data_source,
                mailer,
                probe: Arc::new(metrics::system::FixedProbe::idle()),
                alerts: None,
            },
        )
    }
}

#[tokio::main]
async fn main() {
    // ── 1. Configuration & logging ───────────────────────────────
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };
    logging::init(&config);
    info!(environment = ?config.environment, "starting community telemetry service");

    // ── 2. Key-value store ───────────────────────────────────────
    let store: Arc<dyn KvStore> = match RedisStore::connect(&config.redis_url).await {
        Ok(store) => {
            info!(url = %config.redis_url, "connected to redis");
            Arc::new(store)
        }
        Err(e) => {
            warn!(url = %config.redis_url, error = %e, "redis unavailable, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    // ── 3. Outbound integrations ─────────────────────────────────
    let client = reqwest::Client::new();

    let data_source: Arc<dyn DataSource> =
        match (&config.supabase_url, &config.supabase_service_key) {
            (Some(url), Some(key)) => Arc::new(RestDataSource::new(client.clone(), url, key)),
            _ => {
                warn!("SUPABASE_URL/SUPABASE_SERVICE_KEY not set, cache warming will fail");
                Arc::new(UnconfiguredDataSource)
            }
        };

    let mailer: Arc<dyn EmailSender> = match &config.resend_api_key {
        Some(key) => Arc::new(ResendMailer::new(client.clone(), key, &config.email_from)),
        None => {
            warn!("RESEND_API_KEY not set, emails will only be logged");
            Arc::new(LogMailer::new(&config.email_from))
        }
    };

    let alerts = config.security_alert_webhook_url.clone().map(|url| {
        info!(%url, "forwarding high-severity security events");
        let (sender, _handle) = alerts::spawn_forwarder(url, client.clone());
        sender
    });

    // ── 4. Shared state & router ─────────────────────────────────
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(
        config,
        Dependencies {
            store,
            data_source,
            mailer,
            probe: Arc::new(SysinfoProbe::new()),
            alerts,
        },
    ));
    let app = server::create_router(state);

    // ── 5. Bind & serve ──────────────────────────────────────────
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(addr = %bind_addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(addr = %bind_addr, "listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server exited with error");
        std::process::exit(1);
    }
    info!("shut down cleanly");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "cannot listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
