use hdrhistogram::Histogram;
use serde::Serialize;

/// HdrHistogram range: 1 μs → 1 h, 3 significant figures
const HIST_LOW: u64 = 1;
const HIST_HIGH: u64 = 3_600_000_000;
const HIST_SIGFIG: u8 = 3;

/// Response time percentile breakdown, in milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct PercentileSet {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
    pub p999: f64,
    pub count: u64,
}

impl PercentileSet {
    /// Build a percentile set from raw millisecond samples.
    /// Returns zeroed values if there are none.
    pub fn from_millis(samples: impl IntoIterator<Item = f64>) -> Self {
        let Ok(mut hist) = Histogram::<u64>::new_with_bounds(HIST_LOW, HIST_HIGH, HIST_SIGFIG)
        else {
            return Self::empty();
        };
        for ms in samples {
            // Clamp to the histogram range; negative or NaN inputs land on 1 μs
            let us = (ms * 1000.0).clamp(HIST_LOW as f64, HIST_HIGH as f64) as u64;
            let _ = hist.record(us.max(HIST_LOW));
        }
        Self::from_histogram(&hist)
    }

    /// Extract a full percentile set from a microsecond HdrHistogram.
    pub fn from_histogram(hist: &Histogram<u64>) -> Self {
        if hist.len() == 0 {
            return Self::empty();
        }

        let ms = |us: u64| us as f64 / 1000.0;
        Self {
            min: ms(hist.min()),
            max: ms(hist.max()),
            mean: hist.mean() / 1000.0,
            p50: ms(hist.value_at_percentile(50.0)),
            p95: ms(hist.value_at_percentile(95.0)),
            p99: ms(hist.value_at_percentile(99.0)),
            p999: ms(hist.value_at_percentile(99.9)),
            count: hist.len(),
        }
    }

    /// All-zero placeholder used for an empty window.
    pub fn empty() -> Self {
        Self {
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            p50: 0.0,
            p95: 0.0,
            p99: 0.0,
            p999: 0.0,
            count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_all_zero() {
        let set = PercentileSet::from_millis(std::iter::empty());
        assert_eq!(set.count, 0);
        assert_eq!(set.p99, 0.0);
        assert_eq!(set.mean, 0.0);
    }

    #[test]
    fn percentiles_track_the_distribution() {
        let set = PercentileSet::from_millis((1..=100).map(|v| v as f64));
        assert_eq!(set.count, 100);
        // 3 significant figures → within 0.1 %
        assert!((set.p50 - 50.0).abs() < 0.1, "p50 = {}", set.p50);
        assert!((set.p95 - 95.0).abs() < 0.1, "p95 = {}", set.p95);
        assert!((set.min - 1.0).abs() < 0.01);
        assert!((set.max - 100.0).abs() < 0.1);
    }
}
