use serde::Serialize;

/// How loudly a flagged issue should be surfaced on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Coarse label derived from the numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Secure,
    Warning,
    Critical,
}

/// One threshold that was crossed.
#[derive(Debug, Clone, Serialize)]
pub struct HealthIssue {
    /// Which aggregate tripped, e.g. "error_rate"
    pub metric: &'static str,
    pub severity: IssueSeverity,
    pub message: String,
    pub value: f64,
    pub threshold: f64,
    pub penalty: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

/// Outcome of a health assessment over one window.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// 0–100, higher is better
    pub score: u32,
    pub issues: Vec<HealthIssue>,
    pub recommendations: Vec<String>,
}

/// Score at or above which a window counts as fine.
pub const GOOD_SCORE: u32 = 80;
/// Score at or above which a window is only a warning.
pub const WARNING_SCORE: u32 = 60;

pub fn status_for(score: u32, good: HealthStatus) -> HealthStatus {
    if score >= GOOD_SCORE {
        good
    } else if score >= WARNING_SCORE {
        HealthStatus::Warning
    } else {
        HealthStatus::Critical
    }
}

/// Accumulates penalties starting from a perfect 100.
pub(crate) struct Scorecard {
    score: i64,
    issues: Vec<HealthIssue>,
}

impl Scorecard {
    pub(crate) fn new() -> Self {
        Self {
            score: 100,
            issues: Vec::new(),
        }
    }

    pub(crate) fn flag(&mut self, issue: HealthIssue) {
        self.score -= issue.penalty as i64;
        self.issues.push(issue);
    }

    /// Clamp at zero and map to a status, `good` being the top label.
    pub(crate) fn finish(self, good: HealthStatus) -> HealthReport {
        let score = self.score.clamp(0, 100) as u32;
        let recommendations = self
            .issues
            .iter()
            .filter_map(|i| i.recommendation.clone())
            .collect();
        HealthReport {
            status: status_for(score, good),
            score,
            issues: self.issues,
            recommendations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn issue(penalty: u32) -> HealthIssue {
        HealthIssue {
            metric: "test",
            severity: IssueSeverity::High,
            message: "x".into(),
            value: 0.0,
            threshold: 0.0,
            penalty,
            recommendation: Some("fix it".into()),
        }
    }

    #[test]
    fn status_boundaries() {
        assert_eq!(status_for(100, HealthStatus::Healthy), HealthStatus::Healthy);
        assert_eq!(status_for(80, HealthStatus::Secure), HealthStatus::Secure);
        assert_eq!(status_for(79, HealthStatus::Healthy), HealthStatus::Warning);
        assert_eq!(status_for(60, HealthStatus::Healthy), HealthStatus::Warning);
        assert_eq!(status_for(59, HealthStatus::Healthy), HealthStatus::Critical);
    }

    #[test]
    fn score_never_drops_below_zero() {
        let mut card = Scorecard::new();
        for _ in 0..10 {
            card.flag(issue(25));
        }
        let report = card.finish(HealthStatus::Healthy);
        assert_eq!(report.score, 0);
        assert_eq!(report.status, HealthStatus::Critical);
        assert_eq!(report.issues.len(), 10);
        assert_eq!(report.recommendations.len(), 10);
    }
}
