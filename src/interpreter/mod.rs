//! SDL front end and evaluators.
//!
//! Source text is tokenized and parsed into an AST, declarations are
//! registered per file and type-checked, and evaluation runs in two stages:
//! Stage 1 lowers the AST into an operator tree that keeps every choice point,
//! sequence and parallel join symbolic; Stage 2 collapses that tree into one
//! joint state, bounding distribution sizes as it goes.

/// Value aggregators applied when joining futures.
pub mod aggregator;
/// Abstract syntax tree definitions.
pub mod ast;
/// Stage-1 lowering from AST to operator tree.
pub mod builder;
/// Lexical runtime scopes.
pub mod frame;
/// Bidirectional type inference.
pub mod infer;
/// Operator-tree intermediate representation.
pub mod ir;
/// Tokenizer.
pub mod lexer;
/// Recursive-descent parser.
pub mod parser;
/// Stage-2 evaluation of operator trees.
pub mod runtime;
/// File-scope declaration registry and type scopes.
pub mod scope;
/// Joint value/latency states and their composition rules.
pub mod state;
/// Static types.
pub mod types;
/// Runtime values.
pub mod value;

pub use aggregator::AggregatorKind;
pub use ast::{BinaryOp, Expr, File, UnaryOp};
pub use builder::Lowerer;
pub use frame::{Binding, Frame};
pub use infer::check_file;
pub use ir::OpNode;
pub use parser::{parse_expect_clause, parse_expr, parse_file};
pub use runtime::{TreeEvaluator, Vm};
pub use scope::{FileEnv, Symbol};
pub use state::{JointState, ReductionPolicy};
pub use types::Type;
pub use value::Value;

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One-based line/column source position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pos {
    /// Line number (1-based; 0 when unknown).
    pub line: u32,
    /// Column number (1-based; 0 when unknown).
    pub col: u32,
}

impl Pos {
    /// Construct a position.
    pub const fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// Syntax error with its location.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{file}:{pos}: {message}")]
pub struct ParseError {
    /// File the error occurred in.
    pub file: String,
    /// Offending position.
    pub pos: Pos,
    /// One-line description.
    pub message: String,
}

impl ParseError {
    /// Construct a parse error.
    pub fn new(file: &str, pos: Pos, message: impl Into<String>) -> Self {
        Self {
            file: file.to_string(),
            pos,
            message: message.into(),
        }
    }
}
