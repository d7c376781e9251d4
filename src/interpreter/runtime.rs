//! Stage 2: collapsing operator trees into joint states.

use std::cell::Cell;
use std::collections::HashMap;

use super::Pos;
use super::ast;
use super::ir::{OpNode, UnaryOp};
use super::state::{JointState, ReductionPolicy};
use super::value::Value;
use crate::outcomes::Outcomes;
use crate::runtime::EngineConfig;
use crate::runtime::analysis::metric_value;
use crate::runtime::error::{EvalError, EvalResult};
use crate::runtime::registry::NativeRegistry;

/// Relative mass below which a residual `distribute` weight is treated as
/// zero.
const RESIDUAL_EPSILON: f64 = 1e-12;

/// Longest rendering of a node used as an error subject.
const SUBJECT_WIDTH: usize = 80;

/// Evaluation context shared by both stages: engine settings, the native
/// registry snapshot and the method-call depth counter.
#[derive(Debug)]
pub struct Vm {
    natives: NativeRegistry,
    config: EngineConfig,
    policy: ReductionPolicy,
    depth: Cell<usize>,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(NativeRegistry::default(), EngineConfig::default())
    }
}

impl Vm {
    /// Create a context.
    pub fn new(natives: NativeRegistry, config: EngineConfig) -> Self {
        Self {
            natives,
            policy: config.reduction_policy(),
            config,
            depth: Cell::new(0),
        }
    }

    /// Native registry snapshot.
    pub fn natives(&self) -> &NativeRegistry {
        &self.natives
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Reduction bounds.
    pub fn policy(&self) -> &ReductionPolicy {
        &self.policy
    }

    /// Collapse `node` in a fresh future scope.
    pub fn evaluate(&self, node: &OpNode) -> EvalResult<JointState> {
        TreeEvaluator::new(self).eval(node)
    }

    fn enter_call(&self, subject: &str) -> EvalResult<CallGuard<'_>> {
        let depth = self.depth.get();
        if depth >= self.config.max_call_depth {
            return Err(EvalError::evaluation(
                Pos::default(),
                subject,
                format!("call depth exceeded {}", self.config.max_call_depth),
            ));
        }
        self.depth.set(depth + 1);
        Ok(CallGuard(&self.depth))
    }
}

struct CallGuard<'a>(&'a Cell<usize>);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

fn subject(node: &OpNode) -> String {
    let text = node.to_string();
    if text.chars().count() <= SUBJECT_WIDTH {
        text
    } else {
        let mut cut: String = text.chars().take(SUBJECT_WIDTH).collect();
        cut.push_str("...");
        cut
    }
}

fn fail(node: &OpNode, message: impl Into<String>) -> EvalError {
    EvalError::evaluation(Pos::default(), subject(node), message)
}

/// Walks one operator tree. Futures registered by `go` live for the walk.
pub struct TreeEvaluator<'a> {
    vm: &'a Vm,
    futures: HashMap<String, OpNode>,
}

impl<'a> TreeEvaluator<'a> {
    /// Evaluator with an empty future table.
    pub fn new(vm: &'a Vm) -> Self {
        Self {
            vm,
            futures: HashMap::new(),
        }
    }

    fn reduce(&self, state: JointState) -> EvalResult<JointState> {
        Ok(state.reduced(self.vm.policy())?)
    }

    /// Collapse a node into a joint state.
    pub fn eval(&mut self, node: &OpNode) -> EvalResult<JointState> {
        match node {
            OpNode::Leaf(state) => Ok(state.clone()),
            OpNode::Nil => Ok(JointState::identity()),
            OpNode::Sequence(steps) => {
                let mut acc: Option<JointState> = None;
                for step in steps.iter().filter(|s| !s.is_nil()) {
                    let next = self.eval(step)?;
                    acc = Some(match acc {
                        None => next,
                        Some(prev) => self.reduce(prev.then(&next))?,
                    });
                }
                Ok(acc.unwrap_or_else(JointState::identity))
            }
            OpNode::BinaryOp { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                let (Some(lv), Some(rv)) = (&l.value, &r.value) else {
                    return Err(fail(node, format!("operator '{op}' applied to a statement with no value")));
                };
                let value = lv
                    .try_and(rv, |a, b| a.apply_binary(*op, b))
                    .map_err(|message| fail(node, message))?;
                let latency = l.latency.and(&r.latency, |a, b| a + b);
                self.reduce(JointState::new(Some(value.coalesce()), latency))
            }
            OpNode::UnaryOp { op, operand } => self.eval_unary(node, *op, operand),
            OpNode::IfChoice {
                condition,
                then_branch,
                else_branch,
            } => self.eval_if(node, condition, then_branch, else_branch),
            OpNode::Distribute {
                total,
                cases,
                default,
            } => self.eval_distribute(node, total.as_deref(), cases, default.as_deref()),
            OpNode::Switch {
                subject,
                cases,
                default,
            } => self.eval_switch(node, subject, cases, default.as_deref()),
            OpNode::MethodCall {
                receiver,
                method,
                args,
            } => {
                let name = format!("{}.{}", receiver.instance_name(), method);
                let _guard = self.vm.enter_call(&name)?;
                tracing::debug!(call = %name, "invoking method");
                let body = receiver.clone().invoke_method(method, args, self.vm)?;
                let state = self.vm.evaluate(&body)?;
                self.reduce(state)
            }
            OpNode::Delay(duration) => self.eval_delay(node, duration),
            OpNode::Go { future, body } => {
                self.futures.insert(future.clone(), (**body).clone());
                Ok(JointState::identity())
            }
            OpNode::Wait { futures, aggregator } => {
                let aggregator = aggregator.unwrap_or(self.vm.config().default_aggregator);
                let mut joined: Option<JointState> = None;
                for name in futures {
                    let body = self
                        .futures
                        .get(name)
                        .cloned()
                        .ok_or_else(|| fail(node, format!("future '{name}' was never started")))?;
                    let state = self.eval(&body)?;
                    joined = Some(match joined {
                        None => state,
                        Some(acc) => self.reduce(acc.parallel(&state, aggregator))?,
                    });
                }
                joined.ok_or_else(|| fail(node, "wait names no futures"))
            }
            OpNode::Settled(body) => Ok(self.eval(body)?.settled()),
            OpNode::InstanceRef(instance) => Err(fail(
                node,
                format!("component instance '{}' used as a value", instance.instance_name()),
            )),
        }
    }

    fn eval_unary(&mut self, node: &OpNode, op: UnaryOp, operand: &OpNode) -> EvalResult<JointState> {
        let state = self.eval(operand)?;
        let ast_op = match op {
            UnaryOp::Not => ast::UnaryOp::Not,
            UnaryOp::Neg => ast::UnaryOp::Neg,
            UnaryOp::Len => {
                let len = state.value.as_ref().map(Outcomes::len).unwrap_or(0);
                return Ok(JointState::constant(Value::Int(len as i64)));
            }
            UnaryOp::Metric(metric) => {
                return Ok(JointState::constant(metric_value(&state, metric)?));
            }
        };
        let Some(value) = &state.value else {
            return Err(fail(node, format!("operator '{op}' applied to a statement with no value")));
        };
        let value = value
            .try_map(|v| v.apply_unary(ast_op))
            .map_err(|message| fail(node, message))?;
        Ok(JointState::new(Some(value), state.latency))
    }

    fn eval_if(
        &mut self,
        node: &OpNode,
        condition: &OpNode,
        then_branch: &OpNode,
        else_branch: &OpNode,
    ) -> EvalResult<JointState> {
        let cond = self.eval(condition)?;
        let Some(value) = &cond.value else {
            return Err(fail(node, "condition has no value"));
        };
        let mut truthy = 0.0;
        let mut total = 0.0;
        for bucket in value {
            match bucket.value {
                Value::Bool(true) => truthy += bucket.weight,
                Value::Bool(false) => {}
                ref other => {
                    return Err(fail(
                        node,
                        format!("condition must be bool, found {}", other.type_name()),
                    ));
                }
            }
            total += bucket.weight;
        }
        if total <= 0.0 {
            return Err(fail(node, "condition has no probability mass"));
        }
        let p_true = truthy / total;
        let p_false = (total - truthy) / total;

        let mut merged: Option<JointState> = None;
        if p_true > 0.0 {
            merged = Some(self.eval(then_branch)?.scaled(p_true));
        }
        if p_false > 0.0 {
            let other = self.eval(else_branch)?.scaled(p_false);
            merged = Some(match merged {
                Some(m) => m.merge(other),
                None => other,
            });
        }
        let merged = merged.ok_or_else(|| fail(node, "no branch reachable"))?;
        self.reduce(cond.then(&merged))
    }

    fn number(&mut self, node: &OpNode, what: &str) -> EvalResult<f64> {
        let state = self.eval(node)?;
        state
            .scalar_value()
            .and_then(Value::as_f64)
            .ok_or_else(|| fail(node, format!("{what} must be a deterministic number")))
    }

    fn eval_distribute(
        &mut self,
        node: &OpNode,
        total: Option<&OpNode>,
        cases: &[(OpNode, OpNode)],
        default: Option<&OpNode>,
    ) -> EvalResult<JointState> {
        let mut weights = Vec::with_capacity(cases.len());
        let mut sum = 0.0;
        for (weight, _) in cases {
            let w = self.number(weight, "distribute weight")?;
            if w < 0.0 || !w.is_finite() {
                return Err(fail(weight, format!("distribute weight {w} is not a non-negative number")));
            }
            sum += w;
            weights.push(w);
        }
        let total = match total {
            Some(total) => {
                let t = self.number(total, "distribute total")?;
                if sum > t * (1.0 + RESIDUAL_EPSILON) {
                    return Err(fail(node, format!("weights sum to {sum}, above the declared total {t}")));
                }
                t
            }
            None if default.is_some() => sum.max(1.0),
            None => sum,
        };
        if total <= 0.0 {
            return Err(fail(node, "no branch has positive weight"));
        }

        let mut merged: Option<JointState> = None;
        for ((_, body), w) in cases.iter().zip(&weights) {
            if *w > 0.0 {
                let branch = self.eval(body)?.scaled(w / total);
                merged = Some(match merged {
                    Some(m) => m.merge(branch),
                    None => branch,
                });
            }
        }
        if let Some(default) = default {
            let residual = total - sum;
            if residual > total * RESIDUAL_EPSILON {
                let branch = self.eval(default)?.scaled(residual / total);
                merged = Some(match merged {
                    Some(m) => m.merge(branch),
                    None => branch,
                });
            }
        }
        let merged = merged.ok_or_else(|| fail(node, "no branch has positive weight"))?;
        self.reduce(merged)
    }

    fn eval_switch(
        &mut self,
        node: &OpNode,
        subject: &OpNode,
        cases: &[(OpNode, OpNode)],
        default: Option<&OpNode>,
    ) -> EvalResult<JointState> {
        let scrutinee = self.eval(subject)?;
        let Some(value) = scrutinee.value.clone() else {
            return Err(fail(node, "switch subject has no value"));
        };
        let total = value.total_weight();
        if total <= 0.0 {
            return Err(fail(node, "switch subject has no probability mass"));
        }

        let mut remaining = value;
        let mut merged: Option<JointState> = None;
        for (case, body) in cases {
            let case_value = self
                .eval(case)?
                .scalar_value()
                .cloned()
                .ok_or_else(|| fail(case, "case value must be deterministic"))?;
            let (matched, rest) = remaining.split(|v| v.loosely_equals(&case_value));
            remaining = rest;
            let p = matched.total_weight() / total;
            if p > 0.0 {
                let branch = self.eval(body)?.scaled(p);
                merged = Some(match merged {
                    Some(m) => m.merge(branch),
                    None => branch,
                });
            }
        }
        let p_rest = remaining.total_weight() / total;
        if p_rest > 0.0 {
            let branch = match default {
                Some(default) => self.eval(default)?,
                None => JointState::nil(),
            }
            .scaled(p_rest);
            merged = Some(match merged {
                Some(m) => m.merge(branch),
                None => branch,
            });
        }
        let merged = merged.ok_or_else(|| fail(node, "no case reachable"))?;
        self.reduce(scrutinee.then(&merged))
    }

    fn eval_delay(&mut self, node: &OpNode, duration: &OpNode) -> EvalResult<JointState> {
        let d = self.eval(duration)?;
        let Some(value) = &d.value else {
            return Err(fail(node, "delay duration has no value"));
        };
        let value_mass = value.total_weight();
        if value_mass <= 0.0 {
            return Err(fail(node, "delay duration has no probability mass"));
        }
        let seconds = value
            .try_map(|v| match v.as_f64() {
                Some(x) if x >= 0.0 => Ok(x),
                Some(x) => Err(format!("negative delay {x}")),
                None => Err(format!("delay expects a number, found {}", v.type_name())),
            })
            .map_err(|message| fail(node, message))?
            .scaled(1.0 / value_mass);
        let latency = d.latency.and(&seconds, |a, b| a + b);
        let mass = latency.total_weight();
        self.reduce(JointState::new(
            Some(Outcomes::from_pairs([(mass, Value::Bool(true))])),
            latency,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::aggregator::AggregatorKind;
    use crate::outcomes::{Metric, mean};

    fn coin(p: f64) -> OpNode {
        OpNode::Leaf(JointState::new(
            Some(Outcomes::from_pairs([(p, Value::Bool(true)), (1.0 - p, Value::Bool(false))])),
            Outcomes::from_pairs([(p, 0.0), (1.0 - p, 0.0)]),
        ))
    }

    fn delay(seconds: f64) -> OpNode {
        OpNode::Delay(Box::new(OpNode::constant(seconds)))
    }

    #[test]
    fn nil_is_identity_and_skipped_in_sequences() {
        let vm = Vm::default();
        assert_eq!(vm.evaluate(&OpNode::Nil).unwrap(), JointState::identity());
        let seq = OpNode::Sequence(vec![OpNode::Nil, delay(0.5), OpNode::Nil]);
        let state = vm.evaluate(&seq).unwrap();
        assert_eq!(state.latency.buckets()[0].value, 0.5);
    }

    #[test]
    fn if_on_constants_picks_a_branch() {
        let vm = Vm::default();
        let node = OpNode::IfChoice {
            condition: Box::new(OpNode::constant(true)),
            then_branch: Box::new(delay(1.0)),
            else_branch: Box::new(OpNode::InstanceRef(std::sync::Arc::new(Unreachable))),
        };
        let state = vm.evaluate(&node).unwrap();
        assert_eq!(state, vm.evaluate(&delay(1.0)).unwrap());
    }

    #[test]
    fn if_rejects_non_boolean_conditions() {
        let vm = Vm::default();
        let node = OpNode::IfChoice {
            condition: Box::new(OpNode::constant(3i64)),
            then_branch: Box::new(OpNode::Nil),
            else_branch: Box::new(OpNode::Nil),
        };
        assert_eq!(vm.evaluate(&node).unwrap_err().kind(), "evaluation");
    }

    #[test]
    fn distribute_scales_by_weight_over_total() {
        let vm = Vm::default();
        let node = OpNode::Distribute {
            total: None,
            cases: vec![(OpNode::constant(1i64), delay(1.0)), (OpNode::constant(3i64), delay(2.0))],
            default: None,
        };
        let state = vm.evaluate(&node).unwrap();
        assert!((state.mass() - 1.0).abs() < 1e-12);
        assert!((mean(&state.latency).unwrap() - 1.75).abs() < 1e-12);
    }

    #[test]
    fn distribute_default_takes_the_residual() {
        let vm = Vm::default();
        let node = OpNode::Distribute {
            total: None,
            cases: vec![(OpNode::constant(0.25), OpNode::constant(false))],
            default: Some(Box::new(OpNode::constant(true))),
        };
        let state = vm.evaluate(&node).unwrap();
        let value = state.value.unwrap();
        assert!((value.buckets()[1].weight - 0.75).abs() < 1e-12);
    }

    #[test]
    fn distribute_without_reachable_branch_fails() {
        let vm = Vm::default();
        let node = OpNode::Distribute {
            total: None,
            cases: vec![(OpNode::constant(0i64), OpNode::Nil)],
            default: None,
        };
        assert!(vm.evaluate(&node).is_err());
    }

    #[test]
    fn switch_partitions_the_subject_once() {
        let vm = Vm::default();
        let node = OpNode::Switch {
            subject: Box::new(coin(0.25)),
            cases: vec![(OpNode::constant(true), delay(1.0))],
            default: Some(Box::new(delay(2.0))),
        };
        let state = vm.evaluate(&node).unwrap();
        assert!((mean(&state.latency).unwrap() - 1.75).abs() < 1e-12);
    }

    #[test]
    fn wait_joins_under_max() {
        let vm = Vm::default();
        let node = OpNode::Sequence(vec![
            OpNode::Go {
                future: "a".into(),
                body: Box::new(delay(1.0)),
            },
            OpNode::Go {
                future: "b".into(),
                body: Box::new(delay(3.0)),
            },
            OpNode::Wait {
                futures: vec!["a".into(), "b".into()],
                aggregator: Some(AggregatorKind::WaitAll),
            },
        ]);
        let state = vm.evaluate(&node).unwrap();
        assert_eq!(state.latency.buckets()[0].value, 3.0);
        assert_eq!(state.scalar_value(), Some(&Value::Bool(true)));
    }

    #[test]
    fn delay_rejects_negative_durations() {
        let vm = Vm::default();
        assert!(vm.evaluate(&delay(-1.0)).is_err());
    }

    #[test]
    fn metrics_read_from_operand() {
        let vm = Vm::default();
        let node = OpNode::UnaryOp {
            op: UnaryOp::Metric(Metric::Availability),
            operand: Box::new(coin(0.8)),
        };
        let state = vm.evaluate(&node).unwrap();
        let Some(Value::Float(avail)) = state.scalar_value() else {
            panic!("expected float");
        };
        assert!((avail - 0.8).abs() < 1e-12);
    }

    #[derive(Debug)]
    struct Unreachable;

    impl crate::runtime::component::ComponentInstance for Unreachable {
        fn instance_name(&self) -> &str {
            "unreachable"
        }
        fn type_name(&self) -> &str {
            "Unreachable"
        }
        fn is_native(&self) -> bool {
            true
        }
        fn get_param(&self, _: &str) -> Option<OpNode> {
            None
        }
        fn set_param(&self, _: &str, _: OpNode, _: &Vm) -> EvalResult<()> {
            Ok(())
        }
        fn get_dependency(&self, _: &str) -> Option<crate::runtime::component::InstanceHandle> {
            None
        }
        fn set_dependency(&self, _: &str, _: crate::runtime::component::InstanceHandle) -> EvalResult<()> {
            Ok(())
        }
        fn method_arity(&self, _: &str) -> Option<usize> {
            None
        }
        fn invoke_method(
            self: std::sync::Arc<Self>,
            _: &str,
            _: &[OpNode],
            _: &Vm,
        ) -> EvalResult<OpNode> {
            panic!("never invoked")
        }
    }
}
