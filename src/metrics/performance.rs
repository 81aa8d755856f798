use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::export::{opt, CsvRow};
use super::health::{HealthIssue, HealthReport, HealthStatus, IssueSeverity, Scorecard};
use super::ledger::{Timestamped, Window};
use super::percentiles::PercentileSet;
use super::system::{SystemProbe, SystemSnapshot};
use super::{hour_bucket, mean, now_ms, Analytics, AnalyticsStrategy};

// ─── Configuration ───────────────────────────────────────────────

/// Requests (and db queries) slower than this count as slow.
pub const SLOW_THRESHOLD_MS: f64 = 1000.0;

/// How many routes the detailed view keeps.
const TOP_ROUTES: usize = 20;

/// How many individual slow requests the detailed view lists.
const TOP_SLOWEST: usize = 10;

const MB: f64 = 1024.0 * 1024.0;

// ─── Records ─────────────────────────────────────────────────────

/// One observed HTTP request. Stamped when it is recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub timestamp: i64,
    /// Matched route template when known, e.g. "/api/webhooks/razorpay"
    pub route: String,
    pub method: String,
    pub response_time_ms: f64,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_query_time_ms: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_usage_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_usage_percent: Option<f32>,
}

impl PerformanceMetric {
    pub fn is_error(&self) -> bool {
        self.status_code >= 400
    }
}

impl Timestamped for PerformanceMetric {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp
    }
}

impl CsvRow for PerformanceMetric {
    const HEADERS: &'static [&'static str] = &[
        "timestamp",
        "route",
        "method",
        "response_time_ms",
        "status_code",
        "db_query_time_ms",
        "cache_hit",
        "memory_usage_bytes",
        "cpu_usage_percent",
    ];

    fn csv_fields(&self) -> Vec<String> {
        vec![
            self.timestamp.to_string(),
            self.route.clone(),
            self.method.clone(),
            self.response_time_ms.to_string(),
            self.status_code.to_string(),
            opt(self.db_query_time_ms),
            opt(self.cache_hit),
            opt(self.memory_usage_bytes),
            opt(self.cpu_usage_percent),
        ]
    }
}

/// Write side: everything about a request except when it happened.
#[derive(Debug, Clone, Default)]
pub struct RequestSample {
    pub route: String,
    pub method: String,
    pub response_time_ms: f64,
    pub status_code: u16,
    pub db_query_time_ms: Option<f64>,
    pub cache_hit: Option<bool>,
    pub memory_usage_bytes: Option<u64>,
    pub cpu_usage_percent: Option<f32>,
}

impl RequestSample {
    pub fn stamp(self, timestamp: i64) -> PerformanceMetric {
        PerformanceMetric {
            timestamp,
            route: self.route,
            method: self.method,
            response_time_ms: self.response_time_ms,
            status_code: self.status_code,
            db_query_time_ms: self.db_query_time_ms,
            cache_hit: self.cache_hit,
            memory_usage_bytes: self.memory_usage_bytes,
            cpu_usage_percent: self.cpu_usage_percent,
        }
    }
}

// ─── Aggregates ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceStats {
    pub total_requests: usize,
    pub error_count: usize,
    /// Fraction of requests with status ≥ 400, 0..1
    pub error_rate: f64,
    pub average_response_time: f64,
    pub average_db_query_time: f64,
    pub slow_requests: usize,
    pub slow_queries: usize,
    /// Fraction of cache-aware requests that hit, 0..1
    pub cache_hit_rate: f64,
    pub memory_usage_bytes: u64,
    pub cpu_usage_percent: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteStats {
    pub route: String,
    pub method: String,
    pub count: usize,
    pub average_response_time: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    pub error_count: usize,
    pub error_rate: f64,
}

/// One hour of traffic on the timeline chart.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceBucket {
    pub hour_start_ms: i64,
    pub count: usize,
    pub average_response_time: f64,
    pub error_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceDetail {
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub stats: PerformanceStats,
    pub percentiles: PercentileSet,
    pub routes: Vec<RouteStats>,
    pub status_codes: BTreeMap<u16, usize>,
    pub slowest: Vec<PerformanceMetric>,
    pub timeline: Vec<PerformanceBucket>,
}

// ─── Strategy ────────────────────────────────────────────────────

/// Aggregation and scoring for request timings.
pub struct PerformanceStrategy {
    probe: Arc<dyn SystemProbe>,
}

impl PerformanceStrategy {
    pub fn new(probe: Arc<dyn SystemProbe>) -> Self {
        Self { probe }
    }
}

impl AnalyticsStrategy for PerformanceStrategy {
    type Record = PerformanceMetric;
    type Stats = PerformanceStats;
    type Detail = PerformanceDetail;

    fn summarize(&self, records: &[PerformanceMetric]) -> PerformanceStats {
        summarize(records, self.probe.sample())
    }

    fn detail(&self, records: &[PerformanceMetric], window: Window) -> PerformanceDetail {
        PerformanceDetail {
            window_start_ms: window.start_ms,
            window_end_ms: window.end_ms,
            stats: self.summarize(records),
            percentiles: PercentileSet::from_millis(records.iter().map(|m| m.response_time_ms)),
            routes: route_breakdown(records),
            status_codes: status_breakdown(records),
            slowest: slowest(records),
            timeline: timeline(records),
        }
    }

    fn score(&self, records: &[PerformanceMetric]) -> HealthReport {
        assess_performance(&self.summarize(records))
    }
}

pub type PerformanceAnalytics = Analytics<PerformanceStrategy>;

impl Analytics<PerformanceStrategy> {
    /// Stamp and record one request observation. Called from the timing
    /// middleware on every response.
    pub fn record_request(&self, sample: RequestSample) {
        self.record(sample.stamp(now_ms()));
    }
}

// ─── Pure aggregation ────────────────────────────────────────────

pub fn summarize(records: &[PerformanceMetric], system: SystemSnapshot) -> PerformanceStats {
    let total = records.len();
    let error_count = records.iter().filter(|m| m.is_error()).count();
    let response_sum: f64 = records.iter().map(|m| m.response_time_ms).sum();

    let db_times: Vec<f64> = records.iter().filter_map(|m| m.db_query_time_ms).collect();
    let cache_flags: Vec<bool> = records.iter().filter_map(|m| m.cache_hit).collect();
    let cache_hits = cache_flags.iter().filter(|hit| **hit).count();

    PerformanceStats {
        total_requests: total,
        error_count,
        error_rate: mean(error_count as f64, total),
        average_response_time: mean(response_sum, total),
        average_db_query_time: mean(db_times.iter().sum(), db_times.len()),
        slow_requests: records
            .iter()
            .filter(|m| m.response_time_ms > SLOW_THRESHOLD_MS)
            .count(),
        slow_queries: db_times.iter().filter(|t| **t > SLOW_THRESHOLD_MS).count(),
        cache_hit_rate: mean(cache_hits as f64, cache_flags.len()),
        memory_usage_bytes: system.memory_bytes,
        cpu_usage_percent: system.cpu_percent,
    }
}

fn route_breakdown(records: &[PerformanceMetric]) -> Vec<RouteStats> {
    struct Acc {
        count: usize,
        sum: f64,
        min: f64,
        max: f64,
        errors: usize,
    }

    let mut groups: HashMap<(&str, &str), Acc> = HashMap::new();
    for m in records {
        let acc = groups
            .entry((m.route.as_str(), m.method.as_str()))
            .or_insert(Acc {
                count: 0,
                sum: 0.0,
                min: f64::MAX,
                max: 0.0,
                errors: 0,
            });
        acc.count += 1;
        acc.sum += m.response_time_ms;
        acc.min = acc.min.min(m.response_time_ms);
        acc.max = acc.max.max(m.response_time_ms);
        if m.is_error() {
            acc.errors += 1;
        }
    }

    let mut routes: Vec<RouteStats> = groups
        .into_iter()
        .map(|((route, method), acc)| RouteStats {
            route: route.to_owned(),
            method: method.to_owned(),
            count: acc.count,
            average_response_time: mean(acc.sum, acc.count),
            min_response_time: acc.min,
            max_response_time: acc.max,
            error_count: acc.errors,
            error_rate: mean(acc.errors as f64, acc.count),
        })
        .collect();

    // Ties broken by name so the output is stable
    routes.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.route.cmp(&b.route))
            .then_with(|| a.method.cmp(&b.method))
    });
    routes.truncate(TOP_ROUTES);
    routes
}

fn status_breakdown(records: &[PerformanceMetric]) -> BTreeMap<u16, usize> {
    let mut codes = BTreeMap::new();
    for m in records {
        *codes.entry(m.status_code).or_insert(0) += 1;
    }
    codes
}

fn slowest(records: &[PerformanceMetric]) -> Vec<PerformanceMetric> {
    let mut sorted: Vec<PerformanceMetric> = records.to_vec();
    sorted.sort_by(|a, b| b.response_time_ms.total_cmp(&a.response_time_ms));
    sorted.truncate(TOP_SLOWEST);
    sorted
}

fn timeline(records: &[PerformanceMetric]) -> Vec<PerformanceBucket> {
    let mut buckets: BTreeMap<i64, (usize, f64, usize)> = BTreeMap::new();
    for m in records {
        let b = buckets.entry(hour_bucket(m.timestamp)).or_insert((0, 0.0, 0));
        b.0 += 1;
        b.1 += m.response_time_ms;
        if m.is_error() {
            b.2 += 1;
        }
    }
    buckets
        .into_iter()
        .map(|(hour_start_ms, (count, sum, errors))| PerformanceBucket {
            hour_start_ms,
            count,
            average_response_time: mean(sum, count),
            error_count: errors,
        })
        .collect()
}

// ─── Health ──────────────────────────────────────────────────────

/// Score a window of request stats. Pure: same stats, same report.
pub fn assess_performance(stats: &PerformanceStats) -> HealthReport {
    let mut card = Scorecard::new();

    let rt = stats.average_response_time;
    if rt > 2000.0 {
        card.flag(HealthIssue {
            metric: "average_response_time",
            severity: IssueSeverity::High,
            message: format!("average response time is {rt:.0}ms"),
            value: rt,
            threshold: 2000.0,
            penalty: 20,
            recommendation: Some("Profile the slowest routes and add caching where reads dominate".into()),
        });
    } else if rt > 1000.0 {
        card.flag(HealthIssue {
            metric: "average_response_time",
            severity: IssueSeverity::Medium,
            message: format!("average response time is {rt:.0}ms"),
            value: rt,
            threshold: 1000.0,
            penalty: 10,
            recommendation: Some("Review the slowest routes in the detailed view".into()),
        });
    }

    let er = stats.error_rate;
    if er > 0.05 {
        card.flag(HealthIssue {
            metric: "error_rate",
            severity: IssueSeverity::High,
            message: format!("error rate is {:.2}%", er * 100.0),
            value: er,
            threshold: 0.05,
            penalty: 25,
            recommendation: Some("Inspect failing routes and upstream dependencies".into()),
        });
    } else if er > 0.01 {
        card.flag(HealthIssue {
            metric: "error_rate",
            severity: IssueSeverity::Medium,
            message: format!("error rate is {:.2}%", er * 100.0),
            value: er,
            threshold: 0.01,
            penalty: 10,
            recommendation: Some("Check recent 4xx/5xx responses for a common cause".into()),
        });
    }

    let mem_mb = stats.memory_usage_bytes as f64 / MB;
    if mem_mb > 500.0 {
        card.flag(HealthIssue {
            metric: "memory_usage",
            severity: IssueSeverity::High,
            message: format!("process memory is {mem_mb:.0}MB"),
            value: mem_mb,
            threshold: 500.0,
            penalty: 15,
            recommendation: Some("Lower ledger capacities or look for a leak".into()),
        });
    } else if mem_mb > 300.0 {
        card.flag(HealthIssue {
            metric: "memory_usage",
            severity: IssueSeverity::Medium,
            message: format!("process memory is {mem_mb:.0}MB"),
            value: mem_mb,
            threshold: 300.0,
            penalty: 8,
            recommendation: Some("Watch memory growth over the next windows".into()),
        });
    }

    let db = stats.average_db_query_time;
    if db > 1000.0 {
        card.flag(HealthIssue {
            metric: "average_db_query_time",
            severity: IssueSeverity::High,
            message: format!("average db query time is {db:.0}ms"),
            value: db,
            threshold: 1000.0,
            penalty: 20,
            recommendation: Some("Add indexes or cache the heaviest queries".into()),
        });
    }

    card.finish(HealthStatus::Healthy)
}
