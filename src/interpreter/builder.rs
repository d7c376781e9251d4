//! Stage 1: lowering from AST to operator tree.
//!
//! Lowering resolves names, unrolls bounded loops and folds constant
//! arithmetic, but never collapses probability structure: sequences, choice
//! points and parallel joins all survive as nodes for Stage 2.

use std::sync::Arc;

use super::Pos;
use super::aggregator::AggregatorKind;
use super::ast::{BinaryOp, DistributeCase, Expr, ExprKind, Stmt, StmtKind, SwitchCase};
use super::frame::{Binding, Frame};
use super::ir::{OpNode, UnaryOp};
use super::runtime::Vm;
use super::scope::FileEnv;
use super::state::JointState;
use super::value::Value;
use crate::outcomes::Metric;
use crate::runtime::component::InstanceHandle;
use crate::runtime::error::{EvalError, EvalResult};

/// Stage-1 evaluator over one lexical frame.
pub struct Lowerer<'a> {
    vm: &'a Vm,
    env: Arc<FileEnv>,
    frame: Frame,
}

impl<'a> Lowerer<'a> {
    /// Lowerer with an empty frame.
    pub fn new(vm: &'a Vm, env: Arc<FileEnv>) -> Self {
        Self::with_frame(vm, env, Frame::new())
    }

    /// Lowerer continuing in an existing frame.
    pub fn with_frame(vm: &'a Vm, env: Arc<FileEnv>, frame: Frame) -> Self {
        Self { vm, env, frame }
    }

    /// Current frame.
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    /// Current frame, mutably.
    pub fn frame_mut(&mut self) -> &mut Frame {
        &mut self.frame
    }

    /// Give the frame back to the caller.
    pub fn into_frame(self) -> Frame {
        self.frame
    }

    /// File names are resolved in.
    pub fn env(&self) -> &Arc<FileEnv> {
        &self.env
    }

    /// Evaluation context.
    pub fn vm(&self) -> &'a Vm {
        self.vm
    }

    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> EvalResult<T>) -> EvalResult<T> {
        self.frame.push();
        let result = f(self);
        self.frame.pop();
        result
    }

    /// Lower a branch body; rebinding inside it does not leak out.
    fn isolated<T>(&mut self, f: impl FnOnce(&mut Self) -> EvalResult<T>) -> EvalResult<T> {
        let saved = self.frame.clone();
        let result = self.scoped(f);
        self.frame = saved;
        result
    }

    /// Lower a block in a pushed scope.
    pub fn lower_block(&mut self, stmts: &[Stmt]) -> EvalResult<OpNode> {
        let refs: Vec<&Stmt> = stmts.iter().collect();
        self.scoped(|l| l.lower_stmts(&refs))
    }

    /// Lower statements in the current scope. A `return` ends the list; an
    /// `if` or `switch` that may return takes the remaining statements as
    /// the continuation of each branch that falls through.
    pub fn lower_stmts(&mut self, stmts: &[&Stmt]) -> EvalResult<OpNode> {
        let mut nodes = Vec::with_capacity(stmts.len());
        for (i, stmt) in stmts.iter().enumerate() {
            let rest = &stmts[i + 1..];
            match &stmt.kind {
                StmtKind::Return(value) => {
                    if let Some(value) = value {
                        nodes.push(self.lower_expr(value)?);
                    }
                    return Ok(OpNode::sequence(nodes));
                }
                StmtKind::If {
                    condition,
                    then_branch,
                    else_branch,
                } if !rest.is_empty() && may_return(stmt) => {
                    let condition = self.lower_expr(condition)?;
                    let then_branch = self.lower_continuation(then_branch, rest)?;
                    let else_branch = self.lower_continuation(else_branch.as_deref().unwrap_or(&[]), rest)?;
                    nodes.push(OpNode::IfChoice {
                        condition: Box::new(condition),
                        then_branch: Box::new(then_branch),
                        else_branch: Box::new(else_branch),
                    });
                    return Ok(OpNode::sequence(nodes));
                }
                StmtKind::Switch {
                    subject,
                    cases,
                    default,
                } if !rest.is_empty() && may_return(stmt) => {
                    let subject = self.lower_expr(subject)?;
                    let mut lowered = Vec::with_capacity(cases.len());
                    for case in cases {
                        let value = self.lower_expr(&case.value)?;
                        lowered.push((value, self.lower_continuation(&case.body, rest)?));
                    }
                    let default = self.lower_continuation(default.as_deref().unwrap_or(&[]), rest)?;
                    nodes.push(OpNode::Switch {
                        subject: Box::new(subject),
                        cases: lowered,
                        default: Some(Box::new(default)),
                    });
                    return Ok(OpNode::sequence(nodes));
                }
                _ => nodes.push(self.lower_stmt(stmt)?),
            }
        }
        Ok(OpNode::sequence(nodes))
    }

    fn lower_continuation(&mut self, branch: &[Stmt], rest: &[&Stmt]) -> EvalResult<OpNode> {
        let mut stmts: Vec<&Stmt> = branch.iter().collect();
        if !terminates(branch) {
            stmts.extend_from_slice(rest);
        }
        self.isolated(|l| l.lower_stmts(&stmts))
    }

    fn lower_branch(&mut self, stmts: &[Stmt]) -> EvalResult<OpNode> {
        let refs: Vec<&Stmt> = stmts.iter().collect();
        self.isolated(|l| l.lower_stmts(&refs))
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> EvalResult<OpNode> {
        match &stmt.kind {
            StmtKind::Let { name, value } => {
                let node = self.lower_expr(value)?;
                self.frame.define(name.clone(), Binding::from_node(node));
                Ok(OpNode::Nil)
            }
            StmtKind::Set { name, value } => {
                let node = self.lower_expr(value)?;
                if self.frame.assign(name, Binding::from_node(node)) {
                    Ok(OpNode::Nil)
                } else {
                    Err(EvalError::resolution(stmt.pos, name, "assignment to an undeclared name"))
                }
            }
            StmtKind::Expr(expr) | StmtKind::Return(Some(expr)) => self.lower_expr(expr),
            StmtKind::Return(None) => Ok(OpNode::Nil),
            StmtKind::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = self.lower_expr(condition)?;
                let then_branch = self.lower_branch(then_branch)?;
                let else_branch = match else_branch {
                    Some(stmts) => self.lower_branch(stmts)?,
                    None => OpNode::Nil,
                };
                Ok(OpNode::IfChoice {
                    condition: Box::new(condition),
                    then_branch: Box::new(then_branch),
                    else_branch: Box::new(else_branch),
                })
            }
            StmtKind::For { count, body } => self.lower_for(count, body, stmt.pos),
            StmtKind::Switch {
                subject,
                cases,
                default,
            } => self.lower_switch(subject, cases, default.as_deref()),
            StmtKind::Delay(duration) => Ok(OpNode::Delay(Box::new(self.lower_expr(duration)?))),
            StmtKind::Go { name, body } => {
                let body = self.lower_expr(body)?;
                self.frame.go(name.clone(), body.clone());
                Ok(OpNode::Go {
                    future: name.clone(),
                    body: Box::new(body),
                })
            }
            StmtKind::Wait { names, aggregator } => {
                for name in names {
                    if !self.frame.await_future(name) {
                        return Err(EvalError::evaluation(stmt.pos, name, "not a future started by 'go'"));
                    }
                }
                let aggregator = match aggregator {
                    Some(name) => Some(AggregatorKind::lookup(name).ok_or_else(|| {
                        EvalError::resolution(stmt.pos, name, "unknown aggregator")
                    })?),
                    None => None,
                };
                Ok(OpNode::Wait {
                    futures: names.clone(),
                    aggregator,
                })
            }
            StmtKind::Log(args) => {
                let mut parts = Vec::with_capacity(args.len());
                for arg in args {
                    let node = self.lower_expr(arg)?;
                    parts.push(match node.as_constant().and_then(JointState::scalar_value) {
                        Some(Value::Str(text)) => text.clone(),
                        Some(value) => value.to_string(),
                        None => node.to_string(),
                    });
                }
                tracing::info!(target: "sdl::log", at = %stmt.pos, "{}", parts.join(" "));
                Ok(OpNode::Nil)
            }
            StmtKind::Block(stmts) => self.lower_block(stmts),
        }
    }

    fn lower_for(&mut self, count: &Expr, body: &[Stmt], pos: Pos) -> EvalResult<OpNode> {
        let n = match self.deterministic(count)? {
            Value::Int(n) => n,
            other => {
                return Err(EvalError::type_error(
                    count.pos,
                    count.to_string(),
                    format!("loop count must be an int, found {}", other.type_name()),
                ));
            }
        };
        let limit = self.vm.config().max_unroll;
        if n < 0 || n as u64 > limit as u64 {
            return Err(EvalError::evaluation(
                pos,
                count.to_string(),
                format!("loop count {n} outside 0..={limit}"),
            ));
        }
        let mut steps = Vec::with_capacity(n as usize);
        for _ in 0..n {
            steps.push(self.lower_block(body)?);
        }
        Ok(OpNode::sequence(steps))
    }

    fn lower_switch(
        &mut self,
        subject: &Expr,
        cases: &[SwitchCase],
        default: Option<&[Stmt]>,
    ) -> EvalResult<OpNode> {
        let subject = self.lower_expr(subject)?;
        let mut lowered = Vec::with_capacity(cases.len());
        for case in cases {
            let value = self.lower_expr(&case.value)?;
            lowered.push((value, self.lower_branch(&case.body)?));
        }
        let default = match default {
            Some(stmts) => Some(Box::new(self.lower_branch(stmts)?)),
            None => None,
        };
        Ok(OpNode::Switch {
            subject: Box::new(subject),
            cases: lowered,
            default,
        })
    }

    /// Lower an expression.
    pub fn lower_expr(&mut self, expr: &Expr) -> EvalResult<OpNode> {
        match &expr.kind {
            ExprKind::Literal(value) => Ok(OpNode::constant(value.clone())),
            ExprKind::Ident(name) => self.lower_ident(name, expr.pos),
            ExprKind::Member { receiver, field } => self.lower_member(receiver, field, expr),
            ExprKind::Index { target, index } => {
                let target = self.lower_expr(target)?;
                let index = self.lower_expr(index)?;
                fold_binary(BinaryOp::Index, target, index, expr)
            }
            ExprKind::Call { callee, args } => self.lower_call(callee, args, expr),
            ExprKind::Unary { op, operand } => {
                let operand = self.lower_expr(operand)?;
                fold_unary((*op).into(), operand, expr)
            }
            ExprKind::Binary { op, left, right } => {
                let left = self.lower_expr(left)?;
                let right = self.lower_expr(right)?;
                match op {
                    BinaryOp::And => Ok(short_circuit(left, right, OpNode::constant(false))),
                    BinaryOp::Or => Ok(short_circuit(left, OpNode::constant(true), right)),
                    _ => fold_binary(*op, left, right, expr),
                }
            }
            ExprKind::Tuple(items) => Ok(OpNode::constant(Value::Tuple(self.deterministic_all(items)?))),
            ExprKind::List(items) => Ok(OpNode::constant(Value::List(self.deterministic_all(items)?))),
            ExprKind::Distribute {
                total,
                cases,
                default,
            } => self.lower_distribute(total.as_deref(), cases, default.as_deref()),
            ExprKind::Sample(inner) => self.lower_expr(inner),
            ExprKind::Block(stmts) => self.lower_block(stmts),
        }
    }

    fn lower_distribute(
        &mut self,
        total: Option<&Expr>,
        cases: &[DistributeCase],
        default: Option<&Expr>,
    ) -> EvalResult<OpNode> {
        let total = match total {
            Some(total) => Some(Box::new(self.lower_expr(total)?)),
            None => None,
        };
        let mut lowered = Vec::with_capacity(cases.len());
        for case in cases {
            let weight = self.lower_expr(&case.weight)?;
            let body = self.isolated(|l| l.lower_expr(&case.body))?;
            lowered.push((weight, body));
        }
        let default = match default {
            Some(body) => Some(Box::new(self.isolated(|l| l.lower_expr(body))?)),
            None => None,
        };
        Ok(OpNode::Distribute {
            total,
            cases: lowered,
            default,
        })
    }

    fn lower_ident(&mut self, name: &str, pos: Pos) -> EvalResult<OpNode> {
        if let Some(binding) = self.frame.lookup(name) {
            return Ok(match binding {
                Binding::Node(node) => node.clone(),
                Binding::Instance(instance) => OpNode::InstanceRef(instance.clone()),
            });
        }
        if let Some(future) = self.frame.future(name) {
            return if future.awaited {
                Ok(OpNode::Settled(Box::new(future.node.clone())))
            } else {
                Err(EvalError::evaluation(pos, name, "future read before 'wait'"))
            };
        }
        Err(EvalError::resolution(pos, name, "unknown identifier"))
    }

    fn lower_member(&mut self, receiver: &Expr, field: &str, expr: &Expr) -> EvalResult<OpNode> {
        if let ExprKind::Ident(name) = &receiver.kind {
            if self.frame.lookup(name).is_none() {
                if let Some(decl) = self.env.enum_decl(name) {
                    return if decl.variants.iter().any(|v| v == field) {
                        Ok(OpNode::constant(Value::Enum {
                            ty: decl.name.clone(),
                            variant: field.to_string(),
                        }))
                    } else {
                        Err(EvalError::resolution(
                            expr.pos,
                            expr.to_string(),
                            format!("enum {} has no variant '{}'", decl.name, field),
                        ))
                    };
                }
            }
        }

        match self.lower_expr(receiver)? {
            OpNode::InstanceRef(instance) => {
                if let Some(node) = instance.get_param(field) {
                    return Ok(node);
                }
                if let Some(dependency) = instance.get_dependency(field) {
                    return Ok(OpNode::InstanceRef(dependency));
                }
                if instance.method_arity(field).is_some() {
                    return Err(EvalError::method(expr.pos, expr.to_string(), "method must be called"));
                }
                Err(EvalError::resolution(
                    expr.pos,
                    expr.to_string(),
                    format!("{} has no member '{}'", instance.type_name(), field),
                ))
            }
            operand => {
                let op = if field == "Len" {
                    UnaryOp::Len
                } else if let Some(metric) = Metric::lookup(field) {
                    UnaryOp::Metric(metric)
                } else {
                    return Err(EvalError::resolution(
                        expr.pos,
                        expr.to_string(),
                        format!("unknown member '{field}'"),
                    ));
                };
                Ok(OpNode::UnaryOp {
                    op,
                    operand: Box::new(operand),
                })
            }
        }
    }

    fn lower_call(&mut self, callee: &Expr, args: &[Expr], expr: &Expr) -> EvalResult<OpNode> {
        let (receiver, method): (InstanceHandle, String) = match &callee.kind {
            ExprKind::Member { receiver, field } => match self.lower_expr(receiver)? {
                OpNode::InstanceRef(instance) => (instance, field.clone()),
                _ => {
                    return Err(EvalError::method(
                        expr.pos,
                        callee.to_string(),
                        "receiver is not a component instance",
                    ));
                }
            },
            ExprKind::Ident(name) => match self.frame.lookup("self") {
                Some(Binding::Instance(this)) if this.method_arity(name).is_some() => (this.clone(), name.clone()),
                _ => return Err(EvalError::resolution(expr.pos, name, "unknown method")),
            },
            _ => {
                return Err(EvalError::method(
                    expr.pos,
                    callee.to_string(),
                    "only component methods can be called",
                ));
            }
        };

        match receiver.method_arity(&method) {
            None => {
                return Err(EvalError::method(
                    expr.pos,
                    callee.to_string(),
                    format!("{} has no method '{}'", receiver.type_name(), method),
                ));
            }
            Some(expected) if expected != args.len() => {
                return Err(EvalError::type_error(
                    expr.pos,
                    expr.to_string(),
                    format!("expected {} argument(s), got {}", expected, args.len()),
                ));
            }
            Some(_) => {}
        }

        let args = args
            .iter()
            .map(|arg| self.lower_expr(arg))
            .collect::<EvalResult<Vec<_>>>()?;
        tracing::debug!(instance = receiver.instance_name(), %method, "lowered method call");
        Ok(OpNode::MethodCall {
            receiver,
            method,
            args,
        })
    }

    /// Lower `expr` and require a single value, evaluating it if needed.
    pub fn deterministic(&mut self, expr: &Expr) -> EvalResult<Value> {
        let node = self.lower_expr(expr)?;
        let state = match node.as_constant() {
            Some(state) => state.clone(),
            None => self.vm.evaluate(&node)?,
        };
        state.scalar_value().cloned().ok_or_else(|| {
            EvalError::evaluation(expr.pos, expr.to_string(), "requires a deterministic value")
        })
    }

    fn deterministic_all(&mut self, items: &[Expr]) -> EvalResult<Vec<Value>> {
        items.iter().map(|item| self.deterministic(item)).collect()
    }
}

fn short_circuit(condition: OpNode, then_branch: OpNode, else_branch: OpNode) -> OpNode {
    match condition.as_constant().and_then(JointState::scalar_value).and_then(Value::as_bool) {
        Some(true) => then_branch,
        Some(false) => else_branch,
        None => OpNode::IfChoice {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        },
    }
}

fn fold_binary(op: BinaryOp, left: OpNode, right: OpNode, expr: &Expr) -> EvalResult<OpNode> {
    if let (Some(l), Some(r)) = (
        left.as_constant().and_then(JointState::scalar_value),
        right.as_constant().and_then(JointState::scalar_value),
    ) {
        return l
            .apply_binary(op, r)
            .map(OpNode::constant)
            .map_err(|message| EvalError::evaluation(expr.pos, expr.to_string(), message));
    }
    Ok(OpNode::BinaryOp {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

fn fold_unary(op: UnaryOp, operand: OpNode, expr: &Expr) -> EvalResult<OpNode> {
    let ast_op = match op {
        UnaryOp::Not => Some(super::ast::UnaryOp::Not),
        UnaryOp::Neg => Some(super::ast::UnaryOp::Neg),
        UnaryOp::Len | UnaryOp::Metric(_) => None,
    };
    if let (Some(ast_op), Some(value)) = (ast_op, operand.as_constant().and_then(JointState::scalar_value)) {
        return value
            .apply_unary(ast_op)
            .map(OpNode::constant)
            .map_err(|message| EvalError::evaluation(expr.pos, expr.to_string(), message));
    }
    Ok(OpNode::UnaryOp {
        op,
        operand: Box::new(operand),
    })
}

/// Whether control cannot fall off the end of `stmts`.
pub fn terminates(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|stmt| match &stmt.kind {
        StmtKind::Return(_) => true,
        StmtKind::If {
            then_branch,
            else_branch: Some(else_branch),
            ..
        } => terminates(then_branch) && terminates(else_branch),
        StmtKind::Switch {
            cases,
            default: Some(default),
            ..
        } => cases.iter().all(|c| terminates(&c.body)) && terminates(default),
        StmtKind::Block(inner) => terminates(inner),
        _ => false,
    })
}

/// Whether a `return` is reachable inside `stmt`.
pub fn may_return(stmt: &Stmt) -> bool {
    match &stmt.kind {
        StmtKind::Return(_) => true,
        StmtKind::If {
            then_branch,
            else_branch,
            ..
        } => then_branch.iter().any(may_return) || else_branch.iter().flatten().any(may_return),
        StmtKind::Switch { cases, default, .. } => {
            cases.iter().any(|c| c.body.iter().any(may_return)) || default.iter().flatten().any(may_return)
        }
        StmtKind::Block(inner) | StmtKind::For { body: inner, .. } => inner.iter().any(may_return),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::{parse_expr, parse_file};
    use std::collections::HashMap;

    fn env() -> Arc<FileEnv> {
        let file = parse_file("t.sdl", "enum Color { Red, Green }").unwrap();
        Arc::new(FileEnv::build(file, &HashMap::new()).unwrap())
    }

    fn lower(src: &str) -> EvalResult<OpNode> {
        let vm = Vm::default();
        let mut lowerer = Lowerer::new(&vm, env());
        lowerer.lower_expr(&parse_expr("t", src).unwrap())
    }

    #[test]
    fn constant_arithmetic_folds() {
        assert_eq!(lower("1 + 2 * 3").unwrap().to_string(), "7");
        assert_eq!(lower("Color.Green").unwrap().to_string(), "Color.Green");
    }

    #[test]
    fn blocks_bind_by_name_and_return_early() {
        let node = lower("{ let x = 2; let y = x * 5; return y; delay 1s }").unwrap();
        assert_eq!(node.to_string(), "10");
    }

    #[test]
    fn if_with_early_return_takes_continuation() {
        let src = "{ if c { return 1 } delay 1ms; return 2 }";
        let vm = Vm::default();
        let mut lowerer = Lowerer::new(&vm, env());
        let coin = OpNode::Leaf(JointState::new(
            Some(crate::outcomes::Outcomes::from_pairs([(0.5, Value::Bool(true)), (0.5, Value::Bool(false))])),
            crate::outcomes::Outcomes::from_pairs([(0.5, 0.0), (0.5, 0.0)]),
        ));
        lowerer.frame_mut().define("c", Binding::Node(coin));
        let node = lowerer.lower_expr(&parse_expr("t", src).unwrap()).unwrap();
        let OpNode::IfChoice { then_branch, else_branch, .. } = node else {
            panic!("expected IfChoice, got {node}");
        };
        assert_eq!(then_branch.to_string(), "1");
        assert!(matches!(*else_branch, OpNode::Sequence(ref steps) if steps.len() == 2));
    }

    #[test]
    fn for_loops_unroll() {
        let node = lower("{ for 3 { delay 1ms } }").unwrap();
        assert!(matches!(node, OpNode::Sequence(ref steps) if steps.len() == 3));
        assert!(lower("{ for 0 { delay 1ms } }").unwrap().is_nil());
    }

    #[test]
    fn short_circuit_lowers_to_choice() {
        assert_eq!(lower("false && 1 < 2").unwrap().to_string(), "false");
        let vm = Vm::default();
        let mut lowerer = Lowerer::new(&vm, env());
        lowerer.frame_mut().define("b", Binding::Node(OpNode::Delay(Box::new(OpNode::constant(0.001)))));
        let node = lowerer.lower_expr(&parse_expr("t", "b || false").unwrap()).unwrap();
        assert!(matches!(node, OpNode::IfChoice { .. }));
    }

    #[test]
    fn resolution_errors_carry_position_and_subject() {
        let err = lower("1 + missing").unwrap_err();
        assert_eq!(err.kind(), "resolution");
        assert_eq!(err.located().subject, "missing");
        assert_eq!(err.located().pos, Pos::new(1, 5));
        assert_eq!(lower("Color.Blue").unwrap_err().kind(), "resolution");
    }

    #[test]
    fn futures_must_be_awaited_before_use() {
        let err = lower("{ go a = 1; return a }").unwrap_err();
        assert_eq!(err.kind(), "evaluation");
        let node = lower("{ go a = 1; wait a; return a }").unwrap();
        let OpNode::Sequence(steps) = node else {
            panic!("expected sequence");
        };
        assert!(matches!(steps.last(), Some(OpNode::Settled(_))));
    }

    #[test]
    fn tuples_require_deterministic_elements() {
        assert_eq!(lower("(1, \"a\")").unwrap().to_string(), "(1, \"a\")");
        let err = lower("[distribute { 1 => 1, 1 => 2 }]").unwrap_err();
        assert_eq!(err.kind(), "evaluation");
    }
}
