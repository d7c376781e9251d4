//! Engine-provided components
//!
//! A native component exposes named parameters through a [`ParamTable`] and
//! methods that take evaluated joint states and return one. Arguments arrive
//! as full distributions, so a native never has to assume its inputs are
//! deterministic.

use std::fmt;
use thiserror::Error;

use crate::interpreter::{JointState, Value};
use crate::outcomes::Outcomes;

/// Errors raised by native implementations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NativeError {
    /// Parameter name not declared by the native.
    #[error("unknown parameter '{0}'")]
    UnknownParam(String),

    /// Parameter assigned a value of the wrong type.
    #[error("parameter '{name}' expects {expected}, got {found}")]
    TypeMismatch {
        /// Parameter name
        name: String,
        /// Expected type
        expected: String,
        /// Offending type
        found: String,
    },

    /// Parameter assigned a probabilistic value.
    #[error("parameter '{0}' requires a deterministic value")]
    NotDeterministic(String),

    /// Parameter value out of range.
    #[error("parameter '{name}': {reason}")]
    InvalidValue {
        /// Parameter name
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// Method name not provided by the native.
    #[error("unknown method '{0}'")]
    UnknownMethod(String),

    /// Argument unusable by the method.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Behaviour supplied by an engine-provided component.
pub trait NativeComponent: Send + Sync + fmt::Debug {
    /// Component type name.
    fn type_name(&self) -> &str;

    /// Current value of a parameter.
    fn get_param(&self, name: &str) -> Option<Value>;

    /// Assign a parameter from an evaluated joint state.
    fn set_param(&mut self, name: &str, state: &JointState) -> Result<(), NativeError>;

    /// Argument count of a method, if provided.
    fn method_arity(&self, method: &str) -> Option<usize>;

    /// Run a method on evaluated arguments.
    fn invoke(&self, method: &str, args: &[JointState]) -> Result<JointState, NativeError>;
}

/// Ordered named parameters with type-checked assignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamTable {
    entries: Vec<(String, Value)>,
}

impl ParamTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a parameter with its default; the default fixes its type.
    pub fn with(mut self, name: &str, default: impl Into<Value>) -> Self {
        self.entries.push((name.to_string(), default.into()));
        self
    }

    /// Parameter names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }

    /// Current value.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Numeric parameter as a float.
    pub fn float(&self, name: &str) -> Result<f64, NativeError> {
        self.get(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| NativeError::UnknownParam(name.to_string()))
    }

    /// Integer parameter.
    pub fn int(&self, name: &str) -> Result<i64, NativeError> {
        self.get(name)
            .and_then(Value::as_int)
            .ok_or_else(|| NativeError::UnknownParam(name.to_string()))
    }

    /// Assign from a joint state whose value track holds a single value.
    /// Ints widen into float parameters.
    pub fn set(&mut self, name: &str, state: &JointState) -> Result<(), NativeError> {
        let value = state
            .scalar_value()
            .ok_or_else(|| NativeError::NotDeterministic(name.to_string()))?;
        let slot = self
            .entries
            .iter_mut()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
            .ok_or_else(|| NativeError::UnknownParam(name.to_string()))?;
        let coerced = match (&*slot, value) {
            (Value::Float(_), Value::Int(n)) => Value::Float(*n as f64),
            (current, new) if std::mem::discriminant(current) == std::mem::discriminant(new) => new.clone(),
            (current, new) => {
                return Err(NativeError::TypeMismatch {
                    name: name.to_string(),
                    expected: current.type_name(),
                    found: new.type_name(),
                });
            }
        };
        *slot = coerced;
        Ok(())
    }
}

/// Latency/failure model built from a handful of latency percentiles.
///
/// `Call()` fails with probability `FailureProb` after `FailureLatency`;
/// successes are spread over `Buckets` equal-mass buckets placed at the
/// midpoints of their percentile ranges, interpolated linearly between
/// `P50`, `P90` and `P99`, with `P0` and `P100` pinned to the smallest and
/// largest of them.
/// `CallWithin(timeout)` additionally turns successes slower than the
/// timeout into failures observed at the timeout.
#[derive(Debug, Clone)]
pub struct Profile {
    params: ParamTable,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            params: ParamTable::new()
                .with("FailureProb", 0.0)
                .with("FailureLatency", 0.0)
                .with("P50", 0.010)
                .with("P90", 0.020)
                .with("P99", 0.050)
                .with("Buckets", 10i64),
        }
    }
}

impl Profile {
    /// Registered type name.
    pub const TYPE_NAME: &'static str = "Profile";

    fn validate(&self, name: &str) -> Result<(), NativeError> {
        let invalid = |reason: &str| NativeError::InvalidValue {
            name: name.to_string(),
            reason: reason.to_string(),
        };
        match name {
            "FailureProb" => {
                let p = self.params.float(name)?;
                if !(0.0..=1.0).contains(&p) {
                    return Err(invalid("must lie in [0, 1]"));
                }
            }
            "Buckets" => {
                if self.params.int(name)? < 1 {
                    return Err(invalid("must be at least 1"));
                }
            }
            other => {
                if self.params.float(other)? < 0.0 {
                    return Err(invalid("must not be negative"));
                }
            }
        }
        Ok(())
    }

    /// Percentile points, sorted and made monotone.
    fn points(&self) -> Result<Vec<(f64, f64)>, NativeError> {
        let mut points = vec![
            (0.5, self.params.float("P50")?),
            (0.9, self.params.float("P90")?),
            (0.99, self.params.float("P99")?),
        ];
        let min = points.iter().map(|p| p.1).fold(f64::INFINITY, f64::min);
        let max = points.iter().map(|p| p.1).fold(f64::NEG_INFINITY, f64::max);
        points.insert(0, (0.0, min));
        points.push((1.0, max));
        for i in 1..points.len() {
            if points[i].1 < points[i - 1].1 {
                tracing::warn!(percentile = points[i].0, "percentile latencies not monotone; clamping");
                points[i].1 = points[i - 1].1;
            }
        }
        Ok(points)
    }

    /// `(weight, success, latency)` buckets of one call, failures first.
    fn call_buckets(&self) -> Result<Vec<(f64, bool, f64)>, NativeError> {
        let failure = self.params.float("FailureProb")?;
        let failure_latency = self.params.float("FailureLatency")?;
        let buckets = self.params.int("Buckets")?.max(1) as usize;

        let mut out = Vec::with_capacity(buckets + 1);
        if failure > 0.0 {
            out.push((failure, false, failure_latency));
        }
        let success = 1.0 - failure;
        if success > 0.0 {
            let points = self.points()?;
            let weight = success / buckets as f64;
            let mut idx = 0;
            for i in 0..buckets {
                let target = (i as f64 + 0.5) / buckets as f64;
                while idx < points.len() - 2 && points[idx + 1].0 < target {
                    idx += 1;
                }
                let (p_lo, l_lo) = points[idx];
                let (p_hi, l_hi) = points[idx + 1];
                let at = if p_hi > p_lo {
                    l_lo + (l_hi - l_lo) * (target - p_lo) / (p_hi - p_lo)
                } else {
                    l_lo
                };
                out.push((weight, true, at));
            }
        }
        Ok(out)
    }

    fn assemble(buckets: impl IntoIterator<Item = (f64, bool, f64)>) -> JointState {
        let mut value = Outcomes::new();
        let mut latency = Outcomes::new();
        for (weight, success, at) in buckets {
            value.add(weight, Value::Bool(success));
            latency.add(weight, at);
        }
        JointState::new(Some(value.coalesce()), latency)
    }

    /// Joint state of one call.
    pub fn call(&self) -> Result<JointState, NativeError> {
        Ok(Self::assemble(self.call_buckets()?))
    }

    fn call_within(&self, timeout: &JointState) -> Result<JointState, NativeError> {
        let limits = timeout
            .value
            .as_ref()
            .ok_or_else(|| NativeError::InvalidArgument("timeout has no value".into()))?;
        let limit_mass = limits.total_weight();
        let base = self.call_buckets()?;

        let mut buckets = Vec::with_capacity(base.len() * limits.len());
        for limit in limits {
            let seconds = limit.value.as_f64().ok_or_else(|| {
                NativeError::InvalidArgument(format!("timeout must be a number, got {}", limit.value))
            })?;
            let share = limit.weight / limit_mass;
            for &(weight, success, at) in &base {
                if at > seconds {
                    buckets.push((weight * share, false, seconds));
                } else {
                    buckets.push((weight * share, success, at));
                }
            }
        }
        Ok(JointState::new(None, timeout.latency.clone()).then(&Self::assemble(buckets)))
    }
}

impl NativeComponent for Profile {
    fn type_name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn get_param(&self, name: &str) -> Option<Value> {
        self.params.get(name).cloned()
    }

    fn set_param(&mut self, name: &str, state: &JointState) -> Result<(), NativeError> {
        let previous = self.params.clone();
        self.params.set(name, state)?;
        if let Err(err) = self.validate(name) {
            self.params = previous;
            return Err(err);
        }
        Ok(())
    }

    fn method_arity(&self, method: &str) -> Option<usize> {
        match method {
            "Call" => Some(0),
            "CallWithin" => Some(1),
            _ => None,
        }
    }

    fn invoke(&self, method: &str, args: &[JointState]) -> Result<JointState, NativeError> {
        match (method, args) {
            ("Call", []) => self.call(),
            ("CallWithin", [timeout]) => self.call_within(timeout),
            _ => Err(NativeError::UnknownMethod(method.to_string())),
        }
    }
}
