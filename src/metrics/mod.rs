pub mod export;
pub mod health;
pub mod ledger;
pub mod percentiles;
pub mod performance;
pub mod security;
pub mod stream;
pub mod system;

use serde::Serialize;

pub use export::{CsvRow, ExportError, ExportFormat};
pub use health::HealthReport;
pub use ledger::{EventLedger, Timestamped, Window};
pub use performance::PerformanceAnalytics;
pub use security::{SecurityEvent, SecurityMonitor};

pub const HOUR_MS: i64 = 3_600_000;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// `sum / count`, or 0 for an empty set.
pub(crate) fn mean(sum: f64, count: usize) -> f64 {
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

// ─── Strategy seam ───────────────────────────────────────────────

/// Record-specific aggregation and scoring plugged into [`Analytics`].
///
/// Every method is a pure function of the records it is handed (plus
/// whatever the strategy itself samples, such as the process snapshot).
pub trait AnalyticsStrategy: Send + Sync {
    type Record: Timestamped + Clone + Serialize + CsvRow + Send;
    type Stats: Serialize;
    type Detail: Serialize;

    fn summarize(&self, records: &[Self::Record]) -> Self::Stats;

    fn detail(&self, records: &[Self::Record], window: Window) -> Self::Detail;

    fn score(&self, records: &[Self::Record]) -> HealthReport;
}

/// A bounded ledger plus the strategy that knows how to read it.
pub struct Analytics<S: AnalyticsStrategy> {
    ledger: EventLedger<S::Record>,
    strategy: S,
}

impl<S: AnalyticsStrategy> Analytics<S> {
    pub fn new(strategy: S, capacity: usize) -> Self {
        Self {
            ledger: EventLedger::with_capacity(capacity),
            strategy,
        }
    }

    /// Append a fully-formed record. Never fails.
    pub fn record(&self, record: S::Record) {
        self.ledger.push(record);
    }

    pub fn ledger(&self) -> &EventLedger<S::Record> {
        &self.ledger
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn stats(&self, period_ms: i64) -> S::Stats {
        self.stats_at(Window::trailing(period_ms, now_ms()))
    }

    pub fn stats_at(&self, window: Window) -> S::Stats {
        self.strategy.summarize(&self.ledger.window_at(window))
    }

    pub fn detailed(&self, period_ms: i64) -> S::Detail {
        self.detailed_at(Window::trailing(period_ms, now_ms()))
    }

    pub fn detailed_at(&self, window: Window) -> S::Detail {
        self.strategy.detail(&self.ledger.window_at(window), window)
    }

    pub fn health(&self, period_ms: i64) -> HealthReport {
        self.health_at(Window::trailing(period_ms, now_ms()))
    }

    pub fn health_at(&self, window: Window) -> HealthReport {
        self.strategy.score(&self.ledger.window_at(window))
    }

    /// Export the window, keeping only records `filter` accepts.
    pub fn export(
        &self,
        format: ExportFormat,
        period_ms: i64,
        filter: impl Fn(&S::Record) -> bool,
    ) -> Result<String, ExportError> {
        self.export_at(format, Window::trailing(period_ms, now_ms()), filter)
    }

    pub fn export_at(
        &self,
        format: ExportFormat,
        window: Window,
        filter: impl Fn(&S::Record) -> bool,
    ) -> Result<String, ExportError> {
        let records: Vec<S::Record> = self
            .ledger
            .window_at(window)
            .into_iter()
            .filter(|r| filter(r))
            .collect();
        export::render(&records, format)
    }
}

/// Start of the hour bucket containing `timestamp_ms`.
pub(crate) fn hour_bucket(timestamp_ms: i64) -> i64 {
    timestamp_ms - timestamp_ms.rem_euclid(HOUR_MS)
}
