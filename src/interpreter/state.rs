//! Joint value/latency states.
//!
//! Every expression carries two parallel tracks: a discrete value
//! distribution and a latency distribution in seconds. They compose by
//! different rules (the value follows the last step, latency convolves), so
//! they are never paired bucket by bucket.

use serde::{Deserialize, Serialize};

use super::aggregator::AggregatorKind;
use super::value::Value;
use crate::outcomes::{
    HistogramReducer, Outcomes, ReduceError, ReduceTarget, Reducer, SplitTrimReducer,
    reduce_or_retry,
};

/// Value and latency distributions of one expression.
///
/// When a value track is present its mass equals the latency track's mass.
/// `value == None` marks a statement-shaped result with no value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointState {
    /// Discrete value distribution.
    pub value: Option<Outcomes<Value>>,
    /// Latency distribution in seconds.
    pub latency: Outcomes<f64>,
}

impl JointState {
    /// Build a state from both tracks.
    pub fn new(value: Option<Outcomes<Value>>, latency: Outcomes<f64>) -> Self {
        Self { value, latency }
    }

    /// `(true, 0s)` with unit mass.
    pub fn identity() -> Self {
        Self::constant(Value::Bool(true))
    }

    /// No value, zero latency, unit mass.
    pub fn nil() -> Self {
        Self {
            value: None,
            latency: Outcomes::scalar(0.0),
        }
    }

    /// A deterministic value available immediately.
    pub fn constant(value: impl Into<Value>) -> Self {
        Self {
            value: Some(Outcomes::scalar(value.into())),
            latency: Outcomes::scalar(0.0),
        }
    }

    /// Total probability mass.
    pub fn mass(&self) -> f64 {
        self.latency.total_weight()
    }

    /// Value track, reading a missing value as success with the state's mass.
    pub fn value_or_success(&self) -> Outcomes<Value> {
        match &self.value {
            Some(value) => value.clone(),
            None => Outcomes::from_pairs([(self.mass(), Value::Bool(true))]),
        }
    }

    /// The single value of a deterministic state.
    pub fn scalar_value(&self) -> Option<&Value> {
        self.value.as_ref()?.scalar_value()
    }

    /// Whether the state has one value and one latency of zero.
    pub fn is_constant(&self) -> bool {
        self.scalar_value().is_some() && self.latency.scalar_value() == Some(&0.0)
    }

    /// Multiply both tracks by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            value: self.value.as_ref().map(|v| v.scaled(factor)),
            latency: self.latency.scaled(factor),
        }
    }

    /// Sequential composition `self ⨟ next`: latencies convolve under `+`,
    /// the value follows `next`, re-weighted by this state's mass.
    pub fn then(&self, next: &JointState) -> JointState {
        let mass = self.mass();
        JointState {
            value: next.value.as_ref().map(|v| v.scaled(mass)),
            latency: self.latency.and(&next.latency, |a, b| a + b),
        }
    }

    /// Probabilistic union of two already-scaled branches.
    pub fn merge(self, other: JointState) -> JointState {
        let value = match (&self.value, &other.value) {
            (None, None) => None,
            _ => Some(self.value_or_success().append(other.value_or_success())),
        };
        JointState {
            value,
            latency: self.latency.append(other.latency),
        }
    }

    /// Parallel join: latency is the later completion, values fold through
    /// `aggregator`.
    pub fn parallel(&self, other: &JointState, aggregator: AggregatorKind) -> JointState {
        let value = self
            .value_or_success()
            .and(&other.value_or_success(), |a, b| aggregator.combine(a, b));
        JointState {
            value: Some(value),
            latency: self.latency.and(&other.latency, |a, b| a.max(*b)),
        }
    }

    /// The value with its latency discarded, keeping the mass.
    pub fn settled(&self) -> JointState {
        JointState {
            value: self.value.clone(),
            latency: Outcomes::from_pairs([(self.mass(), 0.0)]),
        }
    }

    /// Bound both tracks according to `policy`.
    pub fn reduced(&self, policy: &ReductionPolicy) -> Result<JointState, ReduceError> {
        let latency = reduce_or_retry(&HistogramReducer, &self.latency, policy.latency)?;
        let value = match &self.value {
            Some(value) if value.len() > policy.value_bound => {
                let target = policy.value_target()?;
                let reducer = SplitTrimReducer::new(
                    |v: &Value| v.is_success() == Some(true),
                    DiscreteValueReducer,
                );
                Some(reducer.reduce(value, target)?)
            }
            other => other.clone(),
        };
        if latency.len() < self.latency.len() {
            tracing::trace!(from = self.latency.len(), to = latency.len(), "reduced latency track");
        }
        Ok(JointState { value, latency })
    }
}

impl Default for JointState {
    fn default() -> Self {
        Self::identity()
    }
}

/// Bucket bounds applied after every composition step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReductionPolicy {
    /// Water marks for the latency track.
    pub latency: ReduceTarget,
    /// Maximum support of a value track before it is reduced.
    pub value_bound: usize,
}

impl ReductionPolicy {
    fn value_target(&self) -> Result<ReduceTarget, ReduceError> {
        ReduceTarget::new(self.value_bound, self.value_bound)
    }
}

impl Default for ReductionPolicy {
    fn default() -> Self {
        Self {
            latency: ReduceTarget { high: 15, low: 10 },
            value_bound: 16,
        }
    }
}

/// Value-track reducer: merges equal values exactly, then folds the lightest
/// numeric buckets into their nearest neighbour until the bound holds. Only
/// values already present survive, so an `int` track stays integral.
/// Non-numeric tracks are left coalesced.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscreteValueReducer;

impl Reducer<Value> for DiscreteValueReducer {
    fn reduce(&self, input: &Outcomes<Value>, target: ReduceTarget) -> Result<Outcomes<Value>, ReduceError> {
        if input.len() <= target.high {
            return Ok(input.clone());
        }
        let merged = input.coalesce();
        if merged.len() <= target.high {
            return Ok(merged);
        }

        let mut points: Vec<(f64, f64, Value)> = Vec::with_capacity(merged.len());
        for bucket in &merged {
            match bucket.value.as_f64() {
                Some(x) => points.push((bucket.weight, x, bucket.value.clone())),
                None => return Ok(merged),
            }
        }
        points.sort_by(|a, b| a.1.total_cmp(&b.1));

        while points.len() > target.low {
            let Some(lightest) = (0..points.len()).min_by(|&i, &j| points[i].0.total_cmp(&points[j].0)) else {
                break;
            };
            let (weight, at) = (points[lightest].0, points[lightest].1);
            let left = lightest.checked_sub(1);
            let right = Some(lightest + 1).filter(|&r| r < points.len());
            let into = match (left, right) {
                (Some(l), Some(r)) => {
                    let (dl, dr) = (at - points[l].1, points[r].1 - at);
                    if dl < dr || (dl == dr && points[l].0 >= points[r].0) { l } else { r }
                }
                (Some(l), None) => l,
                (None, Some(r)) => r,
                (None, None) => break,
            };
            points[into].0 += weight;
            points.remove(lightest);
        }
        Ok(Outcomes::from_pairs(points.into_iter().map(|(w, _, v)| (w, v))))
    }
}
