//! Outcome kernel
//!
//! Weighted-bucket distributions over an arbitrary value type. Weights are
//! unnormalized probability mass; the kernel never normalizes, consumers do so
//! only when presenting metrics.

use serde::{Deserialize, Serialize};

pub mod metrics;
pub mod reducer;

pub use metrics::{Metric, UnknownMetric, availability, mean, percentile};
pub use reducer::{
    CoalesceReducer, HistogramReducer, ReduceError, ReduceTarget, Reducer, SplitTrimReducer,
    reduce_or_retry,
};

/// A single `(weight, value)` pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket<T> {
    /// Unnormalized probability mass (strictly positive).
    pub weight: f64,
    /// Value carried by the bucket.
    pub value: T,
}

/// Ordered sequence of weighted buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcomes<T> {
    buckets: Vec<Bucket<T>>,
}

impl<T> Default for Outcomes<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Outcomes<T> {
    /// Create an empty distribution.
    pub fn new() -> Self {
        Self {
            buckets: Vec::new(),
        }
    }

    /// Create a single-bucket distribution with weight 1.
    pub fn scalar(value: T) -> Self {
        let mut out = Self::new();
        out.add(1.0, value);
        out
    }

    /// Build a distribution from `(weight, value)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (f64, T)>) -> Self {
        let mut out = Self::new();
        for (weight, value) in pairs {
            out.add(weight, value);
        }
        out
    }

    /// Append a bucket. Non-positive and non-finite weights carry no mass and
    /// are dropped.
    pub fn add(&mut self, weight: f64, value: T) -> &mut Self {
        if weight > 0.0 && weight.is_finite() {
            self.buckets.push(Bucket { weight, value });
        }
        self
    }

    /// Number of buckets.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether the distribution has no buckets.
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Iterate over buckets in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Bucket<T>> {
        self.buckets.iter()
    }

    /// Bucket slice in order.
    pub fn buckets(&self) -> &[Bucket<T>] {
        &self.buckets
    }

    /// Consume the distribution, yielding its buckets.
    pub fn into_buckets(self) -> Vec<Bucket<T>> {
        self.buckets
    }

    /// Sum of all bucket weights.
    pub fn total_weight(&self) -> f64 {
        self.buckets.iter().map(|b| b.weight).sum()
    }

    /// The value of a one-bucket distribution.
    pub fn scalar_value(&self) -> Option<&T> {
        match self.buckets.as_slice() {
            [only] => Some(&only.value),
            _ => None,
        }
    }

    /// Cartesian product: every `(a, b)` pair yields `{w_a·w_b, f(a, b)}`.
    pub fn and<U, Z>(&self, other: &Outcomes<U>, mut f: impl FnMut(&T, &U) -> Z) -> Outcomes<Z> {
        let mut out = Outcomes {
            buckets: Vec::with_capacity(self.len() * other.len()),
        };
        for a in &self.buckets {
            for b in &other.buckets {
                out.add(a.weight * b.weight, f(&a.value, &b.value));
            }
        }
        out
    }

    /// Fallible Cartesian product; stops at the first error.
    pub fn try_and<U, Z, E>(
        &self,
        other: &Outcomes<U>,
        mut f: impl FnMut(&T, &U) -> Result<Z, E>,
    ) -> Result<Outcomes<Z>, E> {
        let mut out = Outcomes {
            buckets: Vec::with_capacity(self.len() * other.len()),
        };
        for a in &self.buckets {
            for b in &other.buckets {
                out.add(a.weight * b.weight, f(&a.value, &b.value)?);
            }
        }
        Ok(out)
    }

    /// Transform values pointwise, preserving weights.
    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> Outcomes<U> {
        Outcomes {
            buckets: self
                .buckets
                .iter()
                .map(|b| Bucket {
                    weight: b.weight,
                    value: f(&b.value),
                })
                .collect(),
        }
    }

    /// Fallible pointwise transform.
    pub fn try_map<U, E>(&self, mut f: impl FnMut(&T) -> Result<U, E>) -> Result<Outcomes<U>, E> {
        let mut buckets = Vec::with_capacity(self.len());
        for b in &self.buckets {
            buckets.push(Bucket {
                weight: b.weight,
                value: f(&b.value)?,
            });
        }
        Ok(Outcomes { buckets })
    }

    /// Multiply every weight by `factor`. A non-positive factor empties the
    /// distribution.
    pub fn scaled(&self, factor: f64) -> Self
    where
        T: Clone,
    {
        let mut out = Self::new();
        for b in &self.buckets {
            out.add(b.weight * factor, b.value.clone());
        }
        out
    }

    /// Concatenate another distribution's buckets onto this one.
    pub fn append(mut self, other: Outcomes<T>) -> Self {
        self.buckets.extend(other.buckets);
        self
    }

    /// Sort buckets by a comparison on values (stable).
    pub fn sort_by(&mut self, mut cmp: impl FnMut(&T, &T) -> std::cmp::Ordering) {
        self.buckets.sort_by(|a, b| cmp(&a.value, &b.value));
    }
}

impl<T: Clone> Outcomes<T> {
    /// Partition into `(matching, non_matching)`.
    pub fn split(&self, mut pred: impl FnMut(&T) -> bool) -> (Outcomes<T>, Outcomes<T>) {
        let mut matched = Outcomes::new();
        let mut unmatched = Outcomes::new();
        for b in &self.buckets {
            if pred(&b.value) {
                matched.add(b.weight, b.value.clone());
            } else {
                unmatched.add(b.weight, b.value.clone());
            }
        }
        (matched, unmatched)
    }
}

impl<T: Clone + PartialEq> Outcomes<T> {
    /// Merge buckets holding equal values, keeping first-occurrence order.
    pub fn coalesce(&self) -> Outcomes<T> {
        let mut out: Vec<Bucket<T>> = Vec::with_capacity(self.len());
        for b in &self.buckets {
            match out.iter_mut().find(|existing| existing.value == b.value) {
                Some(existing) => existing.weight += b.weight,
                None => out.push(b.clone()),
            }
        }
        Outcomes { buckets: out }
    }
}

impl<'a, T> IntoIterator for &'a Outcomes<T> {
    type Item = &'a Bucket<T>;
    type IntoIter = std::slice::Iter<'a, Bucket<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.buckets.iter()
    }
}

impl<T> FromIterator<(f64, T)> for Outcomes<T> {
    fn from_iter<I: IntoIterator<Item = (f64, T)>>(iter: I) -> Self {
        Self::from_pairs(iter)
    }
}
