//! Error types for the SDL engine
//!
//! Library errors are `thiserror` enums grouped by concern; binaries convert
//! them to `anyhow` at the edge.

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::interpreter::{ParseError, Pos};
use crate::outcomes::ReduceError;

/// Location and subject shared by every evaluation-time error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    /// Source position (`0:0` when the error has no source anchor).
    pub pos: Pos,
    /// Offending identifier or expression text.
    pub subject: String,
    /// One-sentence cause.
    pub message: String,
}

impl fmt::Display for Located {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pos)?;
        if !self.subject.is_empty() {
            write!(f, ": '{}'", self.subject)?;
        }
        write!(f, ": {}", self.message)
    }
}

/// Errors raised by name resolution, type checking, instantiation and both
/// evaluation stages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// Duplicate definition, unknown type or unknown identifier
    #[error("resolution error at {0}")]
    Resolution(Located),

    /// Declared/inferred mismatch, incompatible operands, wrong arity
    #[error("type error at {0}")]
    Type(Located),

    /// Missing parameter or dependency, unknown override target, shadowing
    #[error("instantiation error at {0}")]
    Instantiation(Located),

    /// Probabilistic value where a deterministic one is required, nil access,
    /// unsupported operation on a joint state
    #[error("evaluation error at {0}")]
    Evaluation(Located),

    /// Method not found or malformed
    #[error("method error at {0}")]
    Method(Located),

    /// Metric not computable from the target's value type
    #[error("analysis error at {0}")]
    Analysis(Located),
}

fn located(pos: Pos, subject: impl Into<String>, message: impl Into<String>) -> Located {
    Located {
        pos,
        subject: subject.into(),
        message: message.into(),
    }
}

impl EvalError {
    /// Construct a resolution error.
    pub fn resolution(pos: Pos, subject: impl Into<String>, message: impl Into<String>) -> Self {
        EvalError::Resolution(located(pos, subject, message))
    }

    /// Construct a type error.
    pub fn type_error(pos: Pos, subject: impl Into<String>, message: impl Into<String>) -> Self {
        EvalError::Type(located(pos, subject, message))
    }

    /// Construct an instantiation error.
    pub fn instantiation(pos: Pos, subject: impl Into<String>, message: impl Into<String>) -> Self {
        EvalError::Instantiation(located(pos, subject, message))
    }

    /// Construct an evaluation error.
    pub fn evaluation(pos: Pos, subject: impl Into<String>, message: impl Into<String>) -> Self {
        EvalError::Evaluation(located(pos, subject, message))
    }

    /// Construct a method error.
    pub fn method(pos: Pos, subject: impl Into<String>, message: impl Into<String>) -> Self {
        EvalError::Method(located(pos, subject, message))
    }

    /// Construct an analysis error.
    pub fn analysis(pos: Pos, subject: impl Into<String>, message: impl Into<String>) -> Self {
        EvalError::Analysis(located(pos, subject, message))
    }

    /// Location details.
    pub fn located(&self) -> &Located {
        match self {
            EvalError::Resolution(l)
            | EvalError::Type(l)
            | EvalError::Instantiation(l)
            | EvalError::Evaluation(l)
            | EvalError::Method(l)
            | EvalError::Analysis(l) => l,
        }
    }

    /// Short kind label.
    pub fn kind(&self) -> &'static str {
        match self {
            EvalError::Resolution(_) => "resolution",
            EvalError::Type(_) => "type",
            EvalError::Instantiation(_) => "instantiation",
            EvalError::Evaluation(_) => "evaluation",
            EvalError::Method(_) => "method",
            EvalError::Analysis(_) => "analysis",
        }
    }
}

impl From<ReduceError> for EvalError {
    fn from(err: ReduceError) -> Self {
        EvalError::evaluation(Pos::default(), "", format!("reduction failed: {err}"))
    }
}

/// Result alias for evaluation.
pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// Errors raised while reading files and resolving imports.
#[derive(Debug, Error)]
pub enum LoadError {
    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// Offending path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },

    /// Import graph contains a cycle
    #[error("import cycle: {0}")]
    ImportCycle(String),

    /// Import path does not name a readable file
    #[error("{file}: cannot resolve import \"{path}\"")]
    MissingImport {
        /// Importing file
        file: String,
        /// Import path as written
        path: String,
    },

    /// Configuration file is not valid JSON
    #[error("invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
}

/// Top-level error
#[derive(Debug, Error)]
pub enum SdlError {
    /// Syntax errors
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// File and import errors
    #[error("load error: {0}")]
    Load(#[from] LoadError),

    /// Evaluation-time errors
    #[error("{0}")]
    Eval(#[from] EvalError),

    /// All errors collected by one type-checking pass
    #[error("{} type error(s): {}", .0.len(), join_errors(.0))]
    TypeCheck(Vec<EvalError>),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Session command misuse (no file loaded, no system selected, ...)
    #[error("session error: {0}")]
    Session(String),
}

fn join_errors(errors: &[EvalError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result alias for top-level operations.
pub type Result<T> = std::result::Result<T, SdlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn located_errors_render_position_subject_and_cause() {
        let err = EvalError::resolution(Pos::new(3, 7), "cach", "unknown identifier");
        assert_eq!(err.to_string(), "resolution error at 3:7: 'cach': unknown identifier");
        assert_eq!(err.kind(), "resolution");
    }

    #[test]
    fn type_check_lists_every_error() {
        let err = SdlError::TypeCheck(vec![
            EvalError::type_error(Pos::new(1, 1), "x", "expected bool"),
            EvalError::type_error(Pos::new(2, 1), "y", "expected int"),
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 type error(s)"));
        assert!(text.contains("2:1"));
    }
}
