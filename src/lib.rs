//! SDL – an analytic engine for the System Design Language
//!
//! SDL files declare components with parameters, dependencies and methods,
//! and systems that instantiate and wire them. This crate answers questions
//! about those systems (availability, mean latency, tail percentiles) in
//! closed form by composing value and latency distributions:
//! - `outcomes`: weighted distributions, reducers and summary metrics
//! - `interpreter`: parser, type inference and the two evaluation stages
//! - `runtime`: component instances, instantiation, loading, analysis and
//!   the session API

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// SDL front end and evaluators
pub mod interpreter;
/// Outcome distributions, reduction and metrics
pub mod outcomes;
/// Component runtime, loader, analysis and sessions
pub mod runtime;

// Re-export key types for convenience
pub use runtime::{EngineConfig, Session};

/// Current version of the engine
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
