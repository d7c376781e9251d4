//! Engine runtime and public API
//!
//! Component instances, system instantiation, the file loader, the analysis
//! layer and the session that ties them together.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::interpreter::aggregator::AggregatorKind;
use crate::interpreter::state::ReductionPolicy;
use crate::outcomes::ReduceTarget;

// Submodules
pub mod analysis;
pub mod component;
pub mod error;
pub mod native;
pub mod registry;
pub mod session;
pub mod storage;
pub mod system;

pub use analysis::{AnalysisReport, AnalysisResult, ExpectationOutcome};
pub use component::{ComponentInstance, InstanceHandle, NativeInstance, UserDefinedInstance};
pub use error::{EvalError, EvalResult, LoadError, Result, SdlError};
pub use native::{NativeComponent, NativeError, ParamTable, Profile};
pub use registry::{NativeCatalog, NativeRegistry};
pub use session::Session;
pub use storage::{LoadedFile, Loader};
pub use system::SystemInstance;

/// Engine settings
///
/// Every field has a default, so a JSON file only needs to name the values
/// it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Latency tracks longer than this are reduced
    pub latency_high: usize,

    /// Length a reduced latency track is merged down to
    pub latency_low: usize,

    /// Value tracks with more distinct buckets than this are reduced
    pub value_bound: usize,

    /// Nested method calls allowed before evaluation fails
    pub max_call_depth: usize,

    /// Largest `for` count that is unrolled
    pub max_unroll: usize,

    /// Aggregator used by `wait` without a `using` clause
    pub default_aggregator: AggregatorKind,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            latency_high: 15,
            latency_low: 10,
            value_bound: 16,
            max_call_depth: 64,
            max_unroll: 1024,
            default_aggregator: AggregatorKind::default(),
        }
    }
}

impl EngineConfig {
    /// Read a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig = serde_json::from_slice(&data).map_err(LoadError::Json)?;
        config.validate()?;
        tracing::debug!(path = %path.display(), "loaded engine configuration");
        Ok(config)
    }

    /// Check that the settings are usable
    pub fn validate(&self) -> Result<()> {
        ReduceTarget::new(self.latency_high, self.latency_low)
            .map_err(|err| SdlError::Config(err.to_string()))?;
        if self.value_bound == 0 {
            return Err(SdlError::Config("value_bound must be at least 1".into()));
        }
        if self.max_call_depth == 0 {
            return Err(SdlError::Config("max_call_depth must be at least 1".into()));
        }
        Ok(())
    }

    /// Reduction bounds derived from the water marks.
    ///
    /// Out-of-range marks are clamped; [`EngineConfig::validate`] reports
    /// them.
    pub fn reduction_policy(&self) -> ReductionPolicy {
        let high = self.latency_high.max(1);
        ReductionPolicy {
            latency: ReduceTarget {
                high,
                low: self.latency_low.clamp(1, high),
            },
            value_bound: self.value_bound.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_match_reduction_policy_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.reduction_policy(), ReductionPolicy::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("engine.json");
        fs::write(&path, r#"{ "latency_high": 40, "latency_low": 20, "default_aggregator": "WaitAll" }"#)
            .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.latency_high, 40);
        assert_eq!(config.latency_low, 20);
        assert_eq!(config.max_call_depth, 64);
        assert_eq!(config.default_aggregator, AggregatorKind::WaitAll);
    }

    #[test]
    fn inverted_water_marks_are_rejected() {
        let config = EngineConfig {
            latency_high: 5,
            latency_low: 10,
            ..EngineConfig::default()
        };
        assert!(matches!(config.validate(), Err(SdlError::Config(_))));
        assert_eq!(config.reduction_policy().latency.low, 5);
    }

    #[test]
    fn missing_file_is_a_load_error() {
        let temp = TempDir::new().unwrap();
        let err = EngineConfig::load(&temp.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, SdlError::Load(LoadError::Io { .. })));
    }
}
