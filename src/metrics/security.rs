use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use super::export::{opt, CsvRow};
use super::health::{HealthIssue, HealthReport, HealthStatus, IssueSeverity, Scorecard};
use super::ledger::{Timestamped, Window};
use super::{hour_bucket, now_ms, Analytics, AnalyticsStrategy, HOUR_MS};
use crate::alerts::AlertSender;

// ─── Configuration ───────────────────────────────────────────────

/// High-or-critical events from one IP within an hour that trigger a block.
pub const AUTO_BLOCK_THRESHOLD: usize = 5;

const TOP_THREATS: usize = 10;
const TOP_SOURCES: usize = 10;
const RECENT_CRITICAL: usize = 10;

/// Newer-half / older-half ratios that mark a trend.
const TREND_UP: f64 = 1.2;
const TREND_DOWN: f64 = 0.8;

// ─── Records ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityCategory {
    AuthAttempt,
    FailedLogin,
    SuspiciousActivity,
    RateLimitViolation,
    CsrfViolation,
    SqlInjectionAttempt,
    XssAttempt,
    AdminAccess,
    PasswordChange,
    AccountLockout,
}

impl SecurityCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthAttempt => "auth_attempt",
            Self::FailedLogin => "failed_login",
            Self::SuspiciousActivity => "suspicious_activity",
            Self::RateLimitViolation => "rate_limit_violation",
            Self::CsrfViolation => "csrf_violation",
            Self::SqlInjectionAttempt => "sql_injection_attempt",
            Self::XssAttempt => "xss_attempt",
            Self::AdminAccess => "admin_access",
            Self::PasswordChange => "password_change",
            Self::AccountLockout => "account_lockout",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn is_high_or_worse(self) -> bool {
        self >= Self::High
    }
}

/// One security incident. Only `resolved` ever changes after recording.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: Uuid,
    pub timestamp: i64,
    pub category: SecurityCategory,
    pub severity: Severity,
    pub source_ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub description: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub resolved: bool,
}

impl Timestamped for SecurityEvent {
    fn timestamp_ms(&self) -> i64 {
        self.timestamp
    }
}

impl CsvRow for SecurityEvent {
    const HEADERS: &'static [&'static str] = &[
        "timestamp",
        "id",
        "category",
        "severity",
        "source_ip",
        "user_id",
        "description",
        "resolved",
        "metadata",
    ];

    fn csv_fields(&self) -> Vec<String> {
        vec![
            self.timestamp.to_string(),
            self.id.to_string(),
            self.category.as_str().to_owned(),
            self.severity.as_str().to_owned(),
            self.source_ip.clone(),
            opt(self.user_id.as_deref()),
            self.description.clone(),
            self.resolved.to_string(),
            serde_json::Value::Object(self.metadata.clone()).to_string(),
        ]
    }
}

/// Write side: everything the caller knows about an incident.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSecurityEvent {
    pub category: SecurityCategory,
    pub severity: Severity,
    /// Filled from proxy headers when the caller leaves it empty
    #[serde(default)]
    pub source_ip: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub description: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl NewSecurityEvent {
    pub fn new(
        category: SecurityCategory,
        severity: Severity,
        source_ip: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            category,
            severity,
            source_ip: source_ip.into(),
            user_id: None,
            description: description.into(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_owned(), value.into());
        self
    }

    fn stamp(self, timestamp: i64) -> SecurityEvent {
        SecurityEvent {
            id: Uuid::new_v4(),
            timestamp,
            category: self.category,
            severity: self.severity,
            source_ip: self.source_ip,
            user_id: self.user_id,
            description: self.description,
            metadata: self.metadata,
            resolved: false,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("security event {0} not found")]
    NotFound(Uuid),
    #[error("security event {0} is already resolved")]
    AlreadyResolved(Uuid),
}

// ─── Aggregates ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityStats {
    pub total_events: usize,
    pub by_category: BTreeMap<SecurityCategory, usize>,
    pub by_severity: BTreeMap<Severity, usize>,
    pub unresolved_events: usize,
    pub critical_events: usize,
    pub unresolved_critical: usize,
    pub unique_source_ips: usize,
    pub blocked_ips: usize,
    pub recent_critical: Vec<SecurityEvent>,
}

impl SecurityStats {
    pub fn category_count(&self, category: SecurityCategory) -> usize {
        self.by_category.get(&category).copied().unwrap_or(0)
    }

    pub fn severity_count(&self, severity: Severity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreatTypeStats {
    pub category: SecurityCategory,
    pub count: usize,
    pub unresolved: usize,
    pub by_severity: BTreeMap<Severity, usize>,
    pub trend: Trend,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceIpStats {
    pub ip: String,
    pub count: usize,
    pub max_severity: Severity,
    pub blocked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityBucket {
    pub hour_start_ms: i64,
    pub count: usize,
    pub critical: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SecurityDetail {
    pub window_start_ms: i64,
    pub window_end_ms: i64,
    pub stats: SecurityStats,
    pub threat_types: Vec<ThreatTypeStats>,
    pub top_source_ips: Vec<SourceIpStats>,
    pub timeline: Vec<SecurityBucket>,
}

// ─── Strategy ────────────────────────────────────────────────────

/// Aggregation and scoring for security incidents. Holds the advisory
/// block set so stats can report on it.
#[derive(Default)]
pub struct SecurityStrategy {
    blocked: RwLock<HashSet<String>>,
}

impl AnalyticsStrategy for SecurityStrategy {
    type Record = SecurityEvent;
    type Stats = SecurityStats;
    type Detail = SecurityDetail;

    fn summarize(&self, records: &[SecurityEvent]) -> SecurityStats {
        summarize(records, self.blocked.read().len())
    }

    fn detail(&self, records: &[SecurityEvent], window: Window) -> SecurityDetail {
        let blocked = self.blocked.read();
        SecurityDetail {
            window_start_ms: window.start_ms,
            window_end_ms: window.end_ms,
            stats: summarize(records, blocked.len()),
            threat_types: threat_breakdown(records, window),
            top_source_ips: source_breakdown(records, &blocked),
            timeline: timeline(records),
        }
    }

    fn score(&self, records: &[SecurityEvent]) -> HealthReport {
        assess_security(&self.summarize(records))
    }
}

pub type SecurityAnalytics = Analytics<SecurityStrategy>;

// ─── Monitor ─────────────────────────────────────────────────────

/// Security ledger plus the side effects of recording: auto-blocking and
/// alert forwarding.
pub struct SecurityMonitor {
    analytics: SecurityAnalytics,
    alerts: Option<AlertSender>,
}

impl SecurityMonitor {
    pub fn new(capacity: usize, alerts: Option<AlertSender>) -> Self {
        Self {
            analytics: SecurityAnalytics::new(SecurityStrategy::default(), capacity),
            alerts,
        }
    }

    pub fn analytics(&self) -> &SecurityAnalytics {
        &self.analytics
    }

    /// Record an incident. Never fails; returns the stored event.
    pub fn record_event(&self, event: NewSecurityEvent) -> SecurityEvent {
        self.record_event_at(event, now_ms())
    }

    pub fn record_event_at(&self, event: NewSecurityEvent, now: i64) -> SecurityEvent {
        let event = event.stamp(now);

        if event.severity.is_high_or_worse() {
            warn!(
                id = %event.id,
                category = event.category.as_str(),
                severity = event.severity.as_str(),
                ip = %event.source_ip,
                "{}",
                event.description
            );
        } else {
            info!(
                id = %event.id,
                category = event.category.as_str(),
                severity = event.severity.as_str(),
                ip = %event.source_ip,
                "{}",
                event.description
            );
        }

        self.analytics.record(event.clone());

        if event.severity == Severity::Critical {
            self.evaluate_auto_block(&event.source_ip, now);
        }

        if event.severity.is_high_or_worse() {
            if let Some(alerts) = &self.alerts {
                alerts.forward(&event);
            }
        }

        event
    }

    fn evaluate_auto_block(&self, ip: &str, now: i64) {
        let serious = self
            .analytics
            .ledger()
            .window_at(Window::trailing(HOUR_MS, now))
            .iter()
            .filter(|e| e.source_ip == ip && e.severity.is_high_or_worse())
            .count();

        if serious >= AUTO_BLOCK_THRESHOLD
            && self.analytics.strategy().blocked.write().insert(ip.to_owned())
        {
            warn!(ip, serious, "auto-blocked source ip");
        }
    }

    /// Flip an event's `resolved` flag. Allowed exactly once per event.
    pub fn resolve(&self, id: Uuid) -> Result<SecurityEvent, ResolveError> {
        self.analytics
            .ledger()
            .update_latest(
                |e| e.id == id,
                |e| {
                    if e.resolved {
                        Err(ResolveError::AlreadyResolved(id))
                    } else {
                        e.resolved = true;
                        Ok(e.clone())
                    }
                },
            )
            .unwrap_or(Err(ResolveError::NotFound(id)))
    }

    pub fn is_blocked(&self, ip: &str) -> bool {
        self.analytics.strategy().blocked.read().contains(ip)
    }

    pub fn blocked_ips(&self) -> Vec<String> {
        let mut ips: Vec<String> = self.analytics.strategy().blocked.read().iter().cloned().collect();
        ips.sort();
        ips
    }

    /// Returns whether the ip was blocked.
    pub fn unblock(&self, ip: &str) -> bool {
        let removed = self.analytics.strategy().blocked.write().remove(ip);
        if removed {
            info!(ip, "unblocked source ip");
        }
        removed
    }
}

// ─── Pure aggregation ────────────────────────────────────────────

pub fn summarize(records: &[SecurityEvent], blocked_ips: usize) -> SecurityStats {
    let mut by_category = BTreeMap::new();
    let mut by_severity = BTreeMap::new();
    let mut ips = HashSet::new();
    let mut unresolved = 0;
    let mut unresolved_critical = 0;

    for e in records {
        *by_category.entry(e.category).or_insert(0) += 1;
        *by_severity.entry(e.severity).or_insert(0) += 1;
        ips.insert(e.source_ip.as_str());
        if !e.resolved {
            unresolved += 1;
            if e.severity == Severity::Critical {
                unresolved_critical += 1;
            }
        }
    }

    let recent_critical = records
        .iter()
        .rev()
        .filter(|e| e.severity == Severity::Critical)
        .take(RECENT_CRITICAL)
        .cloned()
        .collect();

    SecurityStats {
        total_events: records.len(),
        critical_events: by_severity.get(&Severity::Critical).copied().unwrap_or(0),
        by_category,
        by_severity,
        unresolved_events: unresolved,
        unresolved_critical,
        unique_source_ips: ips.len(),
        blocked_ips,
        recent_critical,
    }
}

/// Compare the newer half of a window against the older half.
pub fn classify_trend(recent: usize, older: usize) -> Trend {
    let (recent, older) = (recent as f64, older as f64);
    if recent > older * TREND_UP {
        Trend::Increasing
    } else if recent < older * TREND_DOWN {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

fn threat_breakdown(records: &[SecurityEvent], window: Window) -> Vec<ThreatTypeStats> {
    struct Acc {
        count: usize,
        unresolved: usize,
        by_severity: BTreeMap<Severity, usize>,
        recent: usize,
        older: usize,
    }

    let midpoint = window.midpoint();
    let mut groups: HashMap<SecurityCategory, Acc> = HashMap::new();
    for e in records {
        let acc = groups.entry(e.category).or_insert(Acc {
            count: 0,
            unresolved: 0,
            by_severity: BTreeMap::new(),
            recent: 0,
            older: 0,
        });
        acc.count += 1;
        if !e.resolved {
            acc.unresolved += 1;
        }
        *acc.by_severity.entry(e.severity).or_insert(0) += 1;
        if e.timestamp > midpoint {
            acc.recent += 1;
        } else {
            acc.older += 1;
        }
    }

    let mut threats: Vec<ThreatTypeStats> = groups
        .into_iter()
        .map(|(category, acc)| ThreatTypeStats {
            category,
            count: acc.count,
            unresolved: acc.unresolved,
            by_severity: acc.by_severity,
            trend: classify_trend(acc.recent, acc.older),
        })
        .collect();
    threats.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.category.cmp(&b.category)));
    threats.truncate(TOP_THREATS);
    threats
}

fn source_breakdown(records: &[SecurityEvent], blocked: &HashSet<String>) -> Vec<SourceIpStats> {
    let mut groups: HashMap<&str, (usize, Severity)> = HashMap::new();
    for e in records {
        let g = groups.entry(e.source_ip.as_str()).or_insert((0, Severity::Low));
        g.0 += 1;
        g.1 = g.1.max(e.severity);
    }

    let mut sources: Vec<SourceIpStats> = groups
        .into_iter()
        .map(|(ip, (count, max_severity))| SourceIpStats {
            blocked: blocked.contains(ip),
            ip: ip.to_owned(),
            count,
            max_severity,
        })
        .collect();
    sources.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.ip.cmp(&b.ip)));
    sources.truncate(TOP_SOURCES);
    sources
}

fn timeline(records: &[SecurityEvent]) -> Vec<SecurityBucket> {
    let mut buckets: BTreeMap<i64, (usize, usize)> = BTreeMap::new();
    for e in records {
        let b = buckets.entry(hour_bucket(e.timestamp)).or_insert((0, 0));
        b.0 += 1;
        if e.severity == Severity::Critical {
            b.1 += 1;
        }
    }
    buckets
        .into_iter()
        .map(|(hour_start_ms, (count, critical))| SecurityBucket {
            hour_start_ms,
            count,
            critical,
        })
        .collect()
}

// ─── Health ──────────────────────────────────────────────────────

/// Score a window of security stats. Pure: same stats, same report.
pub fn assess_security(stats: &SecurityStats) -> HealthReport {
    let mut card = Scorecard::new();

    if stats.unresolved_critical > 0 {
        card.flag(HealthIssue {
            metric: "unresolved_critical_events",
            severity: IssueSeverity::Critical,
            message: format!("{} unresolved critical security events", stats.unresolved_critical),
            value: stats.unresolved_critical as f64,
            threshold: 0.0,
            penalty: 30,
            recommendation: Some("Investigate and resolve critical security events immediately".into()),
        });
    }

    let high = stats.severity_count(Severity::High);
    if high > 5 {
        card.flag(HealthIssue {
            metric: "high_severity_events",
            severity: IssueSeverity::High,
            message: format!("{high} high severity security events"),
            value: high as f64,
            threshold: 5.0,
            penalty: 15,
            recommendation: Some("Review high severity events and their source addresses".into()),
        });
    }

    let injection = stats.category_count(SecurityCategory::SqlInjectionAttempt);
    if injection > 0 {
        card.flag(HealthIssue {
            metric: "sql_injection_attempts",
            severity: IssueSeverity::High,
            message: format!("{injection} SQL injection attempts detected"),
            value: injection as f64,
            threshold: 0.0,
            penalty: 20,
            recommendation: Some("Audit input validation and make sure every query is parameterized".into()),
        });
    }

    let xss = stats.category_count(SecurityCategory::XssAttempt);
    if xss > 0 {
        card.flag(HealthIssue {
            metric: "xss_attempts",
            severity: IssueSeverity::High,
            message: format!("{xss} XSS attempts detected"),
            value: xss as f64,
            threshold: 0.0,
            penalty: 15,
            recommendation: Some("Tighten output encoding and the Content-Security-Policy".into()),
        });
    }

    let failed = stats.category_count(SecurityCategory::FailedLogin);
    if failed > 50 {
        card.flag(HealthIssue {
            metric: "failed_logins",
            severity: IssueSeverity::Medium,
            message: format!("{failed} failed login attempts"),
            value: failed as f64,
            threshold: 50.0,
            penalty: 10,
            recommendation: Some("Enable account lockout or CAPTCHA after repeated failures".into()),
        });
    }

    let limited = stats.category_count(SecurityCategory::RateLimitViolation);
    if limited > 100 {
        card.flag(HealthIssue {
            metric: "rate_limit_violations",
            severity: IssueSeverity::Medium,
            message: format!("{limited} rate limit violations"),
            value: limited as f64,
            threshold: 100.0,
            penalty: 5,
            recommendation: Some("Check whether the offending clients need stricter limits".into()),
        });
    }

    card.finish(HealthStatus::Secure)
}
