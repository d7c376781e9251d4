use std::fmt;

use super::aggregator::AggregatorKind;
use super::ast::BinaryOp;
use super::state::JointState;
use crate::outcomes::Metric;
use crate::runtime::component::InstanceHandle;

/// Prefix operators of the operator tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// Boolean negation.
    Not,
    /// Arithmetic negation.
    Neg,
    /// Bucket count of the operand's value track.
    Len,
    /// Metric of the operand's joint state.
    Metric(Metric),
}

impl From<super::ast::UnaryOp> for UnaryOp {
    fn from(op: super::ast::UnaryOp) -> Self {
        match op {
            super::ast::UnaryOp::Not => UnaryOp::Not,
            super::ast::UnaryOp::Neg => UnaryOp::Neg,
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnaryOp::Not => f.write_str("!"),
            UnaryOp::Neg => f.write_str("-"),
            UnaryOp::Len => f.write_str("len"),
            UnaryOp::Metric(metric) => write!(f, "{metric}"),
        }
    }
}

/// Symbolic intermediate between the AST and a collapsed joint state.
///
/// Stage 1 produces these without touching probability structure: every
/// sequence, choice point and parallel join stays a node until Stage 2.
#[derive(Debug, Clone)]
pub enum OpNode {
    /// Already-collapsed joint state.
    Leaf(JointState),
    /// No value, no latency.
    Nil,
    /// Steps composed left to right.
    Sequence(Vec<OpNode>),
    /// Pointwise binary operator; operands compose sequentially.
    BinaryOp {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        left: Box<OpNode>,
        /// Right operand.
        right: Box<OpNode>,
    },
    /// Pointwise unary operator or metric extraction.
    UnaryOp {
        /// Operator.
        op: UnaryOp,
        /// Operand.
        operand: Box<OpNode>,
    },
    /// Boolean-conditioned choice.
    IfChoice {
        /// Boolean condition.
        condition: Box<OpNode>,
        /// Taken with the condition's true mass.
        then_branch: Box<OpNode>,
        /// Taken with the condition's false mass.
        else_branch: Box<OpNode>,
    },
    /// Weighted choice.
    Distribute {
        /// Explicit total weight.
        total: Option<Box<OpNode>>,
        /// `(weight, body)` pairs.
        cases: Vec<(OpNode, OpNode)>,
        /// Branch receiving the residual weight.
        default: Option<Box<OpNode>>,
    },
    /// Value-partitioning multiway choice; the subject is evaluated once.
    Switch {
        /// Scrutinee.
        subject: Box<OpNode>,
        /// `(case value, body)` pairs in order.
        cases: Vec<(OpNode, OpNode)>,
        /// Branch for unmatched mass.
        default: Option<Box<OpNode>>,
    },
    /// Deferred method dispatch.
    MethodCall {
        /// Target instance.
        receiver: InstanceHandle,
        /// Method name.
        method: String,
        /// Symbolic arguments.
        args: Vec<OpNode>,
    },
    /// Wait for a duration distribution; value is `true`.
    Delay(Box<OpNode>),
    /// Register a future; collapses to identity.
    Go {
        /// Future name.
        future: String,
        /// Future body.
        body: Box<OpNode>,
    },
    /// Join registered futures.
    Wait {
        /// Futures in `wait` order.
        futures: Vec<String>,
        /// Value aggregator; engine default when absent.
        aggregator: Option<AggregatorKind>,
    },
    /// Value of an already-awaited future with latency zeroed.
    Settled(Box<OpNode>),
    /// Component instance used as a value.
    InstanceRef(InstanceHandle),
}

impl OpNode {
    /// Deterministic constant leaf.
    pub fn constant(value: impl Into<super::value::Value>) -> Self {
        OpNode::Leaf(JointState::constant(value))
    }

    /// Whether the node is `Nil`.
    pub fn is_nil(&self) -> bool {
        matches!(self, OpNode::Nil)
    }

    /// Collapse a statement list: `Nil` entries dropped, a single survivor
    /// returned as-is, several wrapped in a `Sequence`.
    pub fn sequence(nodes: Vec<OpNode>) -> OpNode {
        let mut nodes: Vec<OpNode> = nodes.into_iter().filter(|n| !n.is_nil()).collect();
        match nodes.len() {
            0 => OpNode::Nil,
            1 => nodes.remove(0),
            _ => OpNode::Sequence(nodes),
        }
    }

    /// Joint state of a `Leaf` with a single value and zero latency.
    pub fn as_constant(&self) -> Option<&JointState> {
        match self {
            OpNode::Leaf(state) if state.is_constant() => Some(state),
            _ => None,
        }
    }
}

impl fmt::Display for OpNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpNode::Leaf(state) => match state.scalar_value() {
                Some(value) if state.is_constant() => write!(f, "{value}"),
                _ => write!(f, "<leaf {} buckets>", state.latency.len()),
            },
            OpNode::Nil => f.write_str("nil"),
            OpNode::Sequence(steps) => {
                f.write_str("seq(")?;
                for (i, step) in steps.iter().enumerate() {
                    if i > 0 {
                        f.write_str("; ")?;
                    }
                    write!(f, "{step}")?;
                }
                f.write_str(")")
            }
            OpNode::BinaryOp { op, left, right } => write!(f, "({left} {op} {right})"),
            OpNode::UnaryOp { op, operand } => write!(f, "{op}({operand})"),
            OpNode::IfChoice {
                condition,
                then_branch,
                else_branch,
            } => write!(f, "if({condition}, {then_branch}, {else_branch})"),
            OpNode::Distribute { cases, default, .. } => {
                f.write_str("distribute(")?;
                for (i, (weight, body)) in cases.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{weight} => {body}")?;
                }
                if let Some(default) = default {
                    write!(f, ", default => {default}")?;
                }
                f.write_str(")")
            }
            OpNode::Switch { subject, cases, .. } => {
                write!(f, "switch({subject}, {} cases)", cases.len())
            }
            OpNode::MethodCall { receiver, method, args } => {
                write!(f, "{}.{}(", receiver.instance_name(), method)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            OpNode::Delay(duration) => write!(f, "delay({duration})"),
            OpNode::Go { future, body } => write!(f, "go {future} = {body}"),
            OpNode::Wait { futures, .. } => write!(f, "wait {}", futures.join(", ")),
            OpNode::Settled(body) => write!(f, "settled({body})"),
            OpNode::InstanceRef(instance) => write!(f, "&{}", instance.instance_name()),
        }
    }
}
