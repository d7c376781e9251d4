//! Analysis layer
//!
//! Runs `analyze` targets through both evaluation stages, reads metrics off
//! the resulting joint state and checks `expect` clauses against them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::error::{EvalError, EvalResult};
use super::system::SystemInstance;
use crate::interpreter::ast::{BinaryOp, ExpectClause, Expr};
use crate::interpreter::state::JointState;
use crate::interpreter::{Pos, Vm};
use crate::outcomes::{Metric, availability, mean, percentile};

/// Relative tolerance used by `==` and `!=` expectations.
const EQ_TOLERANCE: f64 = 1e-9;

/// Read one metric off a joint state.
///
/// Availability needs a boolean value track; a state without a value counts
/// as always successful.
pub fn metric_value(state: &JointState, metric: Metric) -> EvalResult<f64> {
    let value = match metric {
        Metric::Availability => match &state.value {
            None => availability(&state.latency, |_| true),
            Some(values) => {
                if let Some(other) = values.iter().find(|b| b.value.is_success().is_none()) {
                    return Err(EvalError::analysis(
                        Pos::default(),
                        metric.name(),
                        format!("availability needs a bool result, found {}", other.value.type_name()),
                    ));
                }
                availability(values, |v| v.is_success() == Some(true))
            }
        },
        Metric::MeanLatency => mean(&state.latency),
        percentile_metric => percentile_metric
            .rank()
            .and_then(|rank| percentile(&state.latency, rank)),
    };
    value.ok_or_else(|| EvalError::analysis(Pos::default(), metric.name(), "distribution has no mass"))
}

/// Comparison used by an expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOp {
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `==`
    Eq,
    /// `!=`
    Ne,
}

impl CompareOp {
    /// Comparison for a binary operator, if it is one.
    pub fn from_binary(op: BinaryOp) -> Option<Self> {
        Some(match op {
            BinaryOp::Lt => CompareOp::Lt,
            BinaryOp::Le => CompareOp::Le,
            BinaryOp::Gt => CompareOp::Gt,
            BinaryOp::Ge => CompareOp::Ge,
            BinaryOp::Eq => CompareOp::Eq,
            BinaryOp::Ne => CompareOp::Ne,
            _ => return None,
        })
    }

    /// Whether `actual op threshold` holds.
    pub fn holds(self, actual: f64, threshold: f64) -> bool {
        let close = (actual - threshold).abs() <= EQ_TOLERANCE * actual.abs().max(threshold.abs()).max(1.0);
        match self {
            CompareOp::Lt => actual < threshold,
            CompareOp::Le => actual <= threshold || close,
            CompareOp::Gt => actual > threshold,
            CompareOp::Ge => actual >= threshold || close,
            CompareOp::Eq => close,
            CompareOp::Ne => !close,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        })
    }
}

/// Joint state of an analyzed target plus the metrics it supports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// Analysis name.
    pub name: String,
    /// Target expression as written.
    pub target: String,
    /// Collapsed joint state.
    pub state: JointState,
    /// Computable metrics keyed by canonical name.
    pub metrics: BTreeMap<String, f64>,
}

impl AnalysisResult {
    /// Wrap a state, computing every metric it supports.
    pub fn new(name: impl Into<String>, target: impl Into<String>, state: JointState) -> Self {
        let metrics = Metric::ALL
            .iter()
            .filter_map(|&metric| {
                metric_value(&state, metric)
                    .ok()
                    .map(|value| (metric.name().to_string(), value))
            })
            .collect();
        Self {
            name: name.into(),
            target: target.into(),
            state,
            metrics,
        }
    }

    /// Value of one metric.
    pub fn metric(&self, metric: Metric) -> EvalResult<f64> {
        metric_value(&self.state, metric)
    }
}

/// Outcome of one `expect` clause.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectationOutcome {
    /// Clause as written.
    pub clause: String,
    /// Computed metric value.
    pub actual: Option<f64>,
    /// Threshold value.
    pub threshold: Option<f64>,
    /// Whether the clause holds.
    pub passed: bool,
    /// Why the clause could not be checked.
    pub error: Option<String>,
}

impl ExpectationOutcome {
    fn failed(clause: &ExpectClause, err: &EvalError) -> Self {
        Self {
            clause: clause.to_string(),
            actual: None,
            threshold: None,
            passed: false,
            error: Some(err.to_string()),
        }
    }
}

/// Everything one `analyze` produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Analysis name.
    pub name: String,
    /// Result, if evaluation succeeded.
    pub result: Option<AnalysisResult>,
    /// Checked expectations.
    pub expectations: Vec<ExpectationOutcome>,
    /// Evaluation error, if any.
    pub error: Option<String>,
}

impl AnalysisReport {
    /// Whether the target evaluated and every expectation held.
    pub fn passed(&self) -> bool {
        self.error.is_none() && self.expectations.iter().all(|e| e.passed)
    }
}

/// Lower and collapse `target` in the system's frame.
pub fn analyze(vm: &Vm, system: &SystemInstance, name: &str, target: &Expr) -> EvalResult<AnalysisResult> {
    let node = system.lower(vm, target)?;
    let state = vm.evaluate(&node)?;
    let result = AnalysisResult::new(name, target.to_string(), state);
    tracing::info!(
        analysis = name,
        target = %result.target,
        metrics = ?result.metrics,
        "analysis complete"
    );
    Ok(result)
}

/// Check one clause against a result.
pub fn check_expectation(
    vm: &Vm,
    system: &SystemInstance,
    result: &AnalysisResult,
    clause: &ExpectClause,
) -> ExpectationOutcome {
    match try_check(vm, system, result, clause) {
        Ok(outcome) => outcome,
        Err(err) => ExpectationOutcome::failed(clause, &err),
    }
}

fn try_check(
    vm: &Vm,
    system: &SystemInstance,
    result: &AnalysisResult,
    clause: &ExpectClause,
) -> EvalResult<ExpectationOutcome> {
    if let Some(subject) = &clause.subject {
        if subject != &result.name {
            return Err(EvalError::analysis(
                clause.pos,
                subject,
                format!("expectation does not belong to analysis '{}'", result.name),
            ));
        }
    }
    let metric = Metric::lookup(&clause.metric)
        .ok_or_else(|| EvalError::resolution(clause.pos, &clause.metric, "unknown metric"))?;
    let op = CompareOp::from_binary(clause.op).ok_or_else(|| {
        EvalError::type_error(clause.pos, clause.to_string(), "expectation needs a comparison")
    })?;
    let threshold = {
        let node = system.lower(vm, &clause.threshold)?;
        let state = vm.evaluate(&node)?;
        state.scalar_value().and_then(|v| v.as_f64()).ok_or_else(|| {
            EvalError::evaluation(
                clause.threshold.pos,
                clause.threshold.to_string(),
                "threshold must be a deterministic number",
            )
        })?
    };
    let actual = result.metric(metric)?;
    let passed = op.holds(actual, threshold);
    if passed {
        tracing::debug!(clause = %clause, actual, "expectation held");
    } else {
        tracing::warn!(clause = %clause, actual, threshold, "expectation failed");
    }
    Ok(ExpectationOutcome {
        clause: clause.to_string(),
        actual: Some(actual),
        threshold: Some(threshold),
        passed,
        error: None,
    })
}

/// Run one `analyze` item and its expectations. Errors are captured in the
/// report.
pub fn run_analysis(vm: &Vm, system: &SystemInstance, name: &str, target: &Expr, clauses: &[ExpectClause]) -> AnalysisReport {
    match analyze(vm, system, name, target) {
        Ok(result) => {
            let expectations = clauses
                .iter()
                .map(|clause| check_expectation(vm, system, &result, clause))
                .collect();
            AnalysisReport {
                name: name.to_string(),
                result: Some(result),
                expectations,
                error: None,
            }
        }
        Err(err) => {
            tracing::warn!(analysis = name, error = %err, "analysis failed");
            AnalysisReport {
                name: name.to_string(),
                result: None,
                expectations: clauses
                    .iter()
                    .map(|clause| ExpectationOutcome::failed(clause, &err))
                    .collect(),
                error: Some(err.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Value;
    use crate::outcomes::Outcomes;

    fn state(pairs: &[(f64, bool, f64)]) -> JointState {
        JointState::new(
            Some(pairs.iter().map(|&(w, ok, _)| (w, Value::Bool(ok))).collect()),
            pairs.iter().map(|&(w, _, l)| (w, l)).collect(),
        )
    }

    #[test]
    fn metrics_of_a_two_outcome_state() {
        let s = state(&[(0.99, true, 0.010), (0.01, false, 10.0)]);
        assert!((metric_value(&s, Metric::Availability).unwrap() - 0.99).abs() < 1e-12);
        assert!((metric_value(&s, Metric::MeanLatency).unwrap() - 0.1099).abs() < 1e-9);
        assert_eq!(metric_value(&s, Metric::P50).unwrap(), 0.010);
        assert_eq!(metric_value(&s, Metric::P99).unwrap(), 0.010);
        assert_eq!(metric_value(&s, Metric::P999).unwrap(), 10.0);
    }

    #[test]
    fn availability_rejects_non_boolean_results() {
        let s = JointState::constant(3i64);
        let err = metric_value(&s, Metric::Availability).unwrap_err();
        assert_eq!(err.kind(), "analysis");
        let result = AnalysisResult::new("n", "x", s);
        assert!(!result.metrics.contains_key("availability"));
        assert!(result.metrics.contains_key("mean"));
    }

    #[test]
    fn valueless_states_are_available() {
        let s = JointState::new(None, Outcomes::from_pairs([(1.0, 0.5)]));
        assert_eq!(metric_value(&s, Metric::Availability).unwrap(), 1.0);
    }

    #[test]
    fn comparisons_tolerate_rounding() {
        assert!(CompareOp::Ge.holds(0.1 + 0.2, 0.3));
        assert!(CompareOp::Eq.holds(0.1 + 0.2, 0.3));
        assert!(!CompareOp::Lt.holds(0.3, 0.3));
        assert!(CompareOp::Ne.holds(0.31, 0.3));
    }

    #[test]
    fn reports_serialize_to_json() {
        let report = AnalysisReport {
            name: "read".into(),
            result: Some(AnalysisResult::new("read", "d.Read()", state(&[(1.0, true, 0.01)]))),
            expectations: vec![],
            error: None,
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["name"], "read");
        assert_eq!(json["result"]["metrics"]["availability"], 1.0);
        assert!(report.passed());
    }
}
