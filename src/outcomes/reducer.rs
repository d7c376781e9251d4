//! Length-bounding reducers
//!
//! Every sequential join multiplies bucket counts, so a chain of `k` joins over
//! distributions of size `n` yields `n^k` buckets. Reducers cap that growth:
//! a distribution at or below the high-water mark is returned unchanged,
//! anything longer is merged down to the low-water mark.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Outcomes;

/// High/low water marks for a reduction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceTarget {
    /// Lengths at or below this are left untouched.
    pub high: usize,
    /// Length a reduced distribution is merged down to.
    pub low: usize,
}

impl ReduceTarget {
    /// Construct a target, validating `1 <= low <= high`.
    pub fn new(high: usize, low: usize) -> Result<Self, ReduceError> {
        let target = Self { high, low };
        target.validate()?;
        Ok(target)
    }

    fn validate(&self) -> Result<(), ReduceError> {
        if self.low == 0 || self.low > self.high {
            return Err(ReduceError::InvalidTarget {
                high: self.high,
                low: self.low,
            });
        }
        Ok(())
    }
}

/// Errors raised while reducing a distribution.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReduceError {
    /// Merging produced a non-finite weight or value.
    #[error("non-finite intermediate while merging a {0}-bucket distribution")]
    Overflow(usize),

    /// The water marks are inconsistent.
    #[error("invalid reduction target: high={high}, low={low}")]
    InvalidTarget {
        /// High-water mark
        high: usize,
        /// Low-water mark
        low: usize,
    },
}

/// A strategy that bounds the length of a distribution.
pub trait Reducer<T> {
    /// Reduce `input` to fit `target`. Must be idempotent on inputs already
    /// within the high-water mark.
    fn reduce(&self, input: &Outcomes<T>, target: ReduceTarget) -> Result<Outcomes<T>, ReduceError>;
}

/// Sorts by value and merges adjacent buckets into their weighted mean.
///
/// The pair merged at each step is the one whose merge loses the least
/// within-group variance, so dense regions collapse before sparse tails and
/// both the total mass and the mean are preserved exactly.
#[derive(Debug, Clone, Copy, Default)]
pub struct HistogramReducer;

impl Reducer<f64> for HistogramReducer {
    fn reduce(&self, input: &Outcomes<f64>, target: ReduceTarget) -> Result<Outcomes<f64>, ReduceError> {
        target.validate()?;
        if input.len() <= target.high {
            return Ok(input.clone());
        }

        let mut items: Vec<(f64, f64)> = input.iter().map(|b| (b.weight, b.value)).collect();
        items.sort_by(|a, b| a.1.total_cmp(&b.1));

        while items.len() > target.low {
            let mut best = 0;
            let mut best_cost = f64::INFINITY;
            for i in 0..items.len() - 1 {
                let (w1, v1) = items[i];
                let (w2, v2) = items[i + 1];
                let gap = v2 - v1;
                let cost = w1 * w2 / (w1 + w2) * gap * gap;
                if cost < best_cost {
                    best_cost = cost;
                    best = i;
                }
            }

            let (w1, v1) = items[best];
            let (w2, v2) = items[best + 1];
            let weight = w1 + w2;
            let value = (w1 * v1 + w2 * v2) / weight;
            if !weight.is_finite() || !value.is_finite() {
                return Err(ReduceError::Overflow(input.len()));
            }
            items[best] = (weight, value);
            items.remove(best + 1);
        }

        Ok(Outcomes::from_pairs(items))
    }
}

/// Merges buckets with equal values. Exact, but gives no length guarantee for
/// distributions with a large support.
#[derive(Debug, Clone, Copy, Default)]
pub struct CoalesceReducer;

impl<T: Clone + PartialEq> Reducer<T> for CoalesceReducer {
    fn reduce(&self, input: &Outcomes<T>, target: ReduceTarget) -> Result<Outcomes<T>, ReduceError> {
        target.validate()?;
        if input.len() <= target.high {
            return Ok(input.clone());
        }
        Ok(input.coalesce())
    }
}

/// Partitions on a binary predicate, trims each side with `inner`, then
/// concatenates matching buckets before non-matching ones.
///
/// The low-water mark is shared between the partitions in proportion to
/// their lengths, each non-empty side keeping at least one bucket, so the
/// result exceeds `low` only when `low` is 1 and both sides are populated.
#[derive(Debug, Clone)]
pub struct SplitTrimReducer<P, R> {
    predicate: P,
    inner: R,
}

impl<P, R> SplitTrimReducer<P, R> {
    /// Combine a partition predicate with a per-partition reducer.
    pub fn new(predicate: P, inner: R) -> Self {
        Self { predicate, inner }
    }
}

/// Split `low` between partitions of `matched` and `unmatched` buckets.
fn shares(low: usize, matched: usize, unmatched: usize) -> (usize, usize) {
    match (matched, unmatched) {
        (_, 0) => (low, 0),
        (0, _) => (0, low),
        _ if low < 2 => (1, 1),
        _ => {
            let total = matched + unmatched;
            let share = ((low * matched + total / 2) / total).clamp(1, low - 1);
            (share, low - share)
        }
    }
}

impl<T, P, R> Reducer<T> for SplitTrimReducer<P, R>
where
    T: Clone,
    P: Fn(&T) -> bool,
    R: Reducer<T>,
{
    fn reduce(&self, input: &Outcomes<T>, target: ReduceTarget) -> Result<Outcomes<T>, ReduceError> {
        target.validate()?;
        if input.len() <= target.high {
            return Ok(input.clone());
        }
        let (matched, unmatched) = input.split(|v| (self.predicate)(v));
        let (matched_share, unmatched_share) = shares(target.low, matched.len(), unmatched.len());
        let trim = |part: Outcomes<T>, share: usize| -> Result<Outcomes<T>, ReduceError> {
            if part.is_empty() {
                return Ok(part);
            }
            self.inner.reduce(&part, ReduceTarget { high: share, low: share })
        };
        let matched = trim(matched, matched_share)?;
        let unmatched = trim(unmatched, unmatched_share)?;
        Ok(matched.append(unmatched))
    }
}

/// Run `reducer`, retrying once on a mass-normalized copy if the first pass
/// overflows. The retry result is scaled back to the input mass.
pub fn reduce_or_retry<T, R>(
    reducer: &R,
    input: &Outcomes<T>,
    target: ReduceTarget,
) -> Result<Outcomes<T>, ReduceError>
where
    T: Clone,
    R: Reducer<T>,
{
    match reducer.reduce(input, target) {
        Err(ReduceError::Overflow(len)) => {
            let mass = input.total_weight();
            if !mass.is_finite() || mass <= 0.0 {
                return Err(ReduceError::Overflow(len));
            }
            tracing::warn!(buckets = len, mass, "reduction overflowed; retrying on normalized copy");
            let normalized = input.scaled(1.0 / mass);
            Ok(reducer.reduce(&normalized, target)?.scaled(mass))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ReduceTarget {
        ReduceTarget::new(15, 10).unwrap()
    }

    #[test]
    fn small_distributions_pass_through() {
        let o = Outcomes::from_pairs((0..15).map(|i| (1.0, i as f64)));
        let reduced = HistogramReducer.reduce(&o, target()).unwrap();
        assert_eq!(reduced, o);
    }

    #[test]
    fn histogram_preserves_mass_and_mean() {
        let o = Outcomes::from_pairs((0..100).map(|i| (0.01 * (1.0 + (i % 3) as f64), i as f64 * 0.001)));
        let reduced = HistogramReducer.reduce(&o, target()).unwrap();
        assert_eq!(reduced.len(), 10);
        assert!((reduced.total_weight() - o.total_weight()).abs() < 1e-9);
        let mean_before = crate::outcomes::mean(&o).unwrap();
        let mean_after = crate::outcomes::mean(&reduced).unwrap();
        assert!((mean_before - mean_after).abs() < 1e-12);
    }

    #[test]
    fn histogram_output_is_sorted() {
        let o = Outcomes::from_pairs((0..40).rev().map(|i| (1.0, i as f64)));
        let reduced = HistogramReducer.reduce(&o, target()).unwrap();
        let values: Vec<f64> = reduced.iter().map(|b| b.value).collect();
        let mut sorted = values.clone();
        sorted.sort_by(f64::total_cmp);
        assert_eq!(values, sorted);
    }

    #[test]
    fn split_trim_keeps_partitions_apart() {
        let mut o = Outcomes::new();
        for i in 0..20 {
            o.add(1.0, (i % 2 == 0, i));
        }
        let reducer = SplitTrimReducer::new(|v: &(bool, i32)| v.0, TakeFirst);
        let reduced = reducer.reduce(&o, ReduceTarget::new(4, 2).unwrap()).unwrap();
        assert_eq!(reduced.len(), 2);
        assert!(reduced.buckets()[0].value.0);
        assert!(!reduced.buckets()[1].value.0);
    }

    #[test]
    fn split_trim_shares_the_low_water_mark() {
        let mut o = Outcomes::new();
        for i in 0..30 {
            o.add(1.0, (i < 15, i));
        }
        let reducer = SplitTrimReducer::new(|v: &(bool, i32)| v.0, TakeFirst);
        let reduced = reducer.reduce(&o, target()).unwrap();
        assert_eq!(reduced.len(), 10);
        assert_eq!(reduced.iter().filter(|b| b.value.0).count(), 5);

        let lopsided = Outcomes::from_pairs((0..30).map(|i| (1.0, (i < 3, i))));
        let reduced = reducer.reduce(&lopsided, target()).unwrap();
        assert_eq!(reduced.len(), 10);
        assert_eq!(reduced.iter().filter(|b| b.value.0).count(), 1);
    }

    #[test]
    fn invalid_target_is_rejected() {
        assert!(matches!(
            ReduceTarget::new(3, 5),
            Err(ReduceError::InvalidTarget { high: 3, low: 5 })
        ));
    }

    #[test]
    fn overflow_is_retried_on_normalized_copy() {
        let o = Outcomes::from_pairs((0..30).map(|i| (f64::MAX / 4.0, i as f64)));
        assert!(matches!(
            HistogramReducer.reduce(&o, target()),
            Err(ReduceError::Overflow(30))
        ));
        let reduced = reduce_or_retry(&HistogramReducer, &o, target());
        // The restored mass itself overflows, so the retry also fails cleanly.
        assert!(reduced.is_err());

        let heavy = Outcomes::from_pairs((0..30).map(|i| (5e306, i as f64)));
        assert!(HistogramReducer.reduce(&heavy, target()).is_err());
        let reduced = reduce_or_retry(&HistogramReducer, &heavy, target()).unwrap();
        assert_eq!(reduced.len(), 10);
        let ratio = reduced.total_weight() / heavy.total_weight();
        assert!((ratio - 1.0).abs() < 1e-9);
    }

    struct TakeFirst;

    impl<T: Clone> Reducer<T> for TakeFirst {
        fn reduce(&self, input: &Outcomes<T>, target: ReduceTarget) -> Result<Outcomes<T>, ReduceError> {
            Ok(Outcomes::from_pairs(
                input.iter().take(target.low).map(|b| (b.weight, b.value.clone())),
            ))
        }
    }
}
