//! Summary statistics over outcome distributions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::Outcomes;

/// Relative slack applied when comparing accumulated mass to a percentile
/// threshold, so `0.99` of a unit mass is reached by a `0.99` bucket.
const PERCENTILE_SLACK: f64 = 1e-12;

/// Closed set of metrics an analysis can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Success mass over total mass.
    Availability,
    /// Weighted mean of the latency track.
    #[serde(rename = "mean")]
    MeanLatency,
    /// Median latency.
    P50,
    /// 90th percentile latency.
    P90,
    /// 95th percentile latency.
    P95,
    /// 99th percentile latency.
    P99,
    /// 99.9th percentile latency.
    P999,
}

impl Metric {
    /// All metrics in report order.
    pub const ALL: [Metric; 7] = [
        Metric::Availability,
        Metric::MeanLatency,
        Metric::P50,
        Metric::P90,
        Metric::P95,
        Metric::P99,
        Metric::P999,
    ];

    /// Canonical lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Metric::Availability => "availability",
            Metric::MeanLatency => "mean",
            Metric::P50 => "p50",
            Metric::P90 => "p90",
            Metric::P95 => "p95",
            Metric::P99 => "p99",
            Metric::P999 => "p999",
        }
    }

    /// Percentile rank in `(0, 1)` for percentile metrics.
    pub fn rank(self) -> Option<f64> {
        match self {
            Metric::P50 => Some(0.5),
            Metric::P90 => Some(0.9),
            Metric::P95 => Some(0.95),
            Metric::P99 => Some(0.99),
            Metric::P999 => Some(0.999),
            Metric::Availability | Metric::MeanLatency => None,
        }
    }

    /// Whether the metric is read from the latency track.
    pub fn is_latency(self) -> bool {
        !matches!(self, Metric::Availability)
    }

    /// Case-insensitive lookup, accepting `meanlatency` and `latency` as
    /// aliases of `mean`.
    pub fn lookup(name: &str) -> Option<Metric> {
        match name.to_ascii_lowercase().as_str() {
            "availability" => Some(Metric::Availability),
            "mean" | "meanlatency" | "latency" => Some(Metric::MeanLatency),
            "p50" | "median" => Some(Metric::P50),
            "p90" => Some(Metric::P90),
            "p95" => Some(Metric::P95),
            "p99" => Some(Metric::P99),
            "p999" => Some(Metric::P999),
            _ => None,
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown metric name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown metric '{0}'")]
pub struct UnknownMetric(pub String);

impl FromStr for Metric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::lookup(s).ok_or_else(|| UnknownMetric(s.to_string()))
    }
}

/// Weighted mean `Σ w·v / Σ w`. `None` for a massless distribution.
pub fn mean(outcomes: &Outcomes<f64>) -> Option<f64> {
    let total = outcomes.total_weight();
    if total <= 0.0 {
        return None;
    }
    let sum: f64 = outcomes.iter().map(|b| b.weight * b.value).sum();
    Some(sum / total)
}

/// Value of the first bucket (in sorted order) whose accumulated weight
/// reaches `p · total`. `None` for a massless distribution.
pub fn percentile(outcomes: &Outcomes<f64>, p: f64) -> Option<f64> {
    let total = outcomes.total_weight();
    if total <= 0.0 {
        return None;
    }
    let mut sorted: Vec<(f64, f64)> = outcomes.iter().map(|b| (b.weight, b.value)).collect();
    sorted.sort_by(|a, b| a.1.total_cmp(&b.1));

    let threshold = p.clamp(0.0, 1.0) * total * (1.0 - PERCENTILE_SLACK);
    let mut accumulated = 0.0;
    for (weight, value) in &sorted {
        accumulated += weight;
        if accumulated >= threshold {
            return Some(*value);
        }
    }
    sorted.last().map(|(_, v)| *v)
}

/// Mass of buckets accepted by `is_success` over the total mass.
pub fn availability<T>(outcomes: &Outcomes<T>, mut is_success: impl FnMut(&T) -> bool) -> Option<f64> {
    let total = outcomes.total_weight();
    if total <= 0.0 {
        return None;
    }
    let ok: f64 = outcomes
        .iter()
        .filter(|b| is_success(&b.value))
        .map(|b| b.weight)
        .sum();
    Some(ok / total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_picks_first_bucket_reaching_rank() {
        let o = Outcomes::from_pairs([(0.01, 10.0), (0.99, 0.010)]);
        assert_eq!(percentile(&o, 0.5), Some(0.010));
        assert_eq!(percentile(&o, 0.99), Some(0.010));
        assert_eq!(percentile(&o, 0.999), Some(10.0));
    }

    #[test]
    fn mean_ignores_normalization() {
        let a = Outcomes::from_pairs([(1.0, 2.0), (3.0, 6.0)]);
        let b = a.scaled(0.1);
        assert!((mean(&a).unwrap() - 5.0).abs() < 1e-12);
        assert!((mean(&b).unwrap() - 5.0).abs() < 1e-12);
        assert_eq!(mean(&Outcomes::new()), None);
    }

    #[test]
    fn availability_counts_success_mass() {
        let o = Outcomes::from_pairs([(0.9, true), (0.1, false)]);
        assert!((availability(&o, |v| *v).unwrap() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn metric_names_are_case_insensitive() {
        assert_eq!("P99".parse::<Metric>(), Ok(Metric::P99));
        assert_eq!("MeanLatency".parse::<Metric>(), Ok(Metric::MeanLatency));
        assert!("p42".parse::<Metric>().is_err());
        assert_eq!(Metric::P999.to_string(), "p999");
    }
}
