//! System-level commands
//!
//! A [`Session`] owns one evaluation context: it loads a file, selects a
//! system, and answers `analyze`/`expect`/`set`/`get` against it.

use std::path::Path;
use std::sync::Arc;

use super::EngineConfig;
use super::analysis::{self, AnalysisReport, AnalysisResult, ExpectationOutcome};
use super::error::{Result, SdlError};
use super::registry::NativeRegistry;
use super::storage::{LoadedFile, Loader};
use super::system::SystemInstance;
use crate::interpreter::state::JointState;
use crate::interpreter::infer::check_param_update;
use crate::interpreter::{Vm, parse_expect_clause, parse_expr};

/// Name used for expressions typed at the command level.
const COMMAND_SOURCE: &str = "<command>";

/// An interactive analysis session
pub struct Session {
    vm: Vm,
    loader: Loader,
    file: Option<Arc<LoadedFile>>,
    system: Option<SystemInstance>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Session {
    /// Session over the global native catalog
    pub fn new(config: EngineConfig) -> Self {
        Self::with_natives(config, NativeRegistry::default())
    }

    /// Session over an explicit native registry
    pub fn with_natives(config: EngineConfig, natives: NativeRegistry) -> Self {
        Self {
            vm: Vm::new(natives, config),
            loader: Loader::new(),
            file: None,
            system: None,
        }
    }

    /// Evaluation context
    pub fn vm(&self) -> &Vm {
        &self.vm
    }

    /// Currently loaded file
    pub fn file(&self) -> Option<&Arc<LoadedFile>> {
        self.file.as_ref()
    }

    /// Currently selected system
    pub fn system(&self) -> Option<&SystemInstance> {
        self.system.as_ref()
    }

    /// Load a file, replacing the current one and clearing the selected
    /// system
    pub fn load(&mut self, path: &Path) -> Result<Arc<LoadedFile>> {
        let loaded = self.loader.load(path)?;
        self.replace_file(loaded.clone());
        Ok(loaded)
    }

    /// Load source text under a name
    pub fn load_source(&mut self, name: &str, source: &str) -> Result<Arc<LoadedFile>> {
        let loaded = self.loader.load_source(name, source)?;
        self.replace_file(loaded.clone());
        Ok(loaded)
    }

    fn replace_file(&mut self, loaded: Arc<LoadedFile>) {
        tracing::info!(file = %loaded.path().display(), systems = ?loaded.system_names(), "file loaded");
        self.file = Some(loaded);
        self.system = None;
    }

    /// Build a system of the loaded file and make it current
    pub fn use_system(&mut self, name: &str) -> Result<&SystemInstance> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| SdlError::Session("no file loaded".into()))?;
        let env = file.env().clone();
        let decl = env
            .system(name)
            .cloned()
            .ok_or_else(|| SdlError::Session(format!("no system named '{name}'")))?;
        let system = SystemInstance::build(&self.vm, &env, &decl)?;
        Ok(self.system.insert(system))
    }

    fn current(&self) -> Result<&SystemInstance> {
        self.system
            .as_ref()
            .ok_or_else(|| SdlError::Session("no system selected".into()))
    }

    /// Evaluate an expression against the current system
    pub fn analyze(&self, target: &str) -> Result<AnalysisResult> {
        let system = self.current()?;
        let expr = parse_expr(COMMAND_SOURCE, target)?;
        Ok(analysis::analyze(&self.vm, system, target, &expr)?)
    }

    /// Run every `analyze` item of the current system
    pub fn run_analyses(&self) -> Result<Vec<AnalysisReport>> {
        let system = self.current()?;
        Ok(system
            .analyses()
            .map(|item| analysis::run_analysis(&self.vm, system, &item.name, &item.target, &item.expectations))
            .collect())
    }

    /// Check a predicate such as `p99 < 50ms` against a result
    pub fn expect(&self, result: &AnalysisResult, predicate: &str) -> Result<ExpectationOutcome> {
        let system = self.current()?;
        let clause = parse_expect_clause(COMMAND_SOURCE, predicate)?;
        Ok(analysis::check_expectation(&self.vm, system, result, &clause))
    }

    /// Replace `instance.param` with the value of `source`
    ///
    /// The value must be assignable to the parameter's type. Parameters
    /// still on their defaults are re-derived, so a default reading the
    /// updated parameter follows it.
    pub fn set(&mut self, path: &str, source: &str) -> Result<()> {
        let system = self.current()?;
        let (instance_name, param) = split_path(path)?;
        let instance = system
            .instance(instance_name)
            .ok_or_else(|| SdlError::Session(format!("no instance named '{instance_name}'")))?;
        let expr = parse_expr(COMMAND_SOURCE, source)?;
        check_param_update(system.env(), system.decl(), instance_name, param, &expr)?;
        let node = system.lower(&self.vm, &expr)?;
        instance.set_param(param, node, &self.vm)?;
        tracing::info!(instance = instance_name, param, value = source, "parameter set");
        Ok(())
    }

    /// Current value of `instance.param`
    pub fn get(&self, path: &str) -> Result<JointState> {
        let system = self.current()?;
        let (instance_name, param) = split_path(path)?;
        let instance = system
            .instance(instance_name)
            .ok_or_else(|| SdlError::Session(format!("no instance named '{instance_name}'")))?;
        let node = instance
            .get_param(param)
            .ok_or_else(|| SdlError::Session(format!("{instance_name} has no parameter '{param}'")))?;
        Ok(self.vm.evaluate(&node)?)
    }
}

fn split_path(path: &str) -> Result<(&str, &str)> {
    path.split_once('.')
        .filter(|(instance, param)| !instance.is_empty() && !param.is_empty())
        .ok_or_else(|| SdlError::Session(format!("expected 'instance.param', got '{path}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interpreter::Value;

    const SOURCE: &str = r#"
        component Disk {
            param FailureProb: float = 0.01;
            method Read(): bool {
                distribute {
                    FailureProb => { delay 10s; return false }
                    default => { delay 10ms; return true }
                }
            }
        }
        system Demo {
            instance disk: Disk;
            analyze read = disk.Read() expect { availability >= 0.98; p50 < 20ms; };
            analyze bad = disk.Read() expect { p99 < 1ms; };
        }
    "#;

    fn session() -> Session {
        let mut session = Session::default();
        session.load_source("demo.sdl", SOURCE).unwrap();
        session.use_system("Demo").unwrap();
        session
    }

    #[test]
    fn commands_need_a_selected_system() {
        let session = Session::default();
        assert!(matches!(session.analyze("1"), Err(SdlError::Session(_))));
    }

    #[test]
    fn run_analyses_reports_each_item() {
        let reports = session().run_analyses().unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports[0].passed(), "{:?}", reports[0]);
        assert!(!reports[1].passed());
        assert!(reports[1].error.is_none());
    }

    #[test]
    fn set_changes_later_analyses() {
        let mut session = session();
        session.set("disk.FailureProb", "0.5").unwrap();
        assert_eq!(session.get("disk.FailureProb").unwrap().scalar_value(), Some(&Value::Float(0.5)));
        let result = session.analyze("disk.Read()").unwrap();
        let outcome = session.expect(&result, "availability == 0.5").unwrap();
        assert!(outcome.passed, "{outcome:?}");
    }

    #[test]
    fn set_rejects_values_of_the_wrong_type() {
        let mut session = session();
        let err = session.set("disk.FailureProb", "\"oops\"").unwrap_err();
        let SdlError::Eval(err) = err else {
            panic!("expected an evaluation error, got {err}");
        };
        assert_eq!(err.kind(), "type");
        assert_eq!(err.located().subject, "disk.FailureProb");
        assert_eq!(session.get("disk.FailureProb").unwrap().scalar_value(), Some(&Value::Float(0.01)));

        // Ints widen into float parameters.
        session.set("disk.FailureProb", "1").unwrap();
        assert!(session.set("disk.FailureProb", "disk").is_err());
    }

    #[test]
    fn defaults_follow_the_parameters_they_read() {
        let mut session = Session::default();
        session
            .load_source(
                "derived.sdl",
                r#"
                component Disk {
                    param FailureProb: float = 0.01;
                    param Slow = FailureProb * 2;
                    param Pinned = FailureProb * 3;
                }
                system Demo { instance disk: Disk = { Pinned = 0.5 }; }
                "#,
            )
            .unwrap();
        session.use_system("Demo").unwrap();
        let value = |session: &Session, path: &str| session.get(path).unwrap().scalar_value().cloned();
        assert_eq!(value(&session, "disk.Slow"), Some(Value::Float(0.02)));

        session.set("disk.FailureProb", "0.25").unwrap();
        assert_eq!(value(&session, "disk.Slow"), Some(Value::Float(0.5)));
        assert_eq!(value(&session, "disk.Pinned"), Some(Value::Float(0.5)));

        session.set("disk.Slow", "0.125").unwrap();
        session.set("disk.FailureProb", "0.375").unwrap();
        assert_eq!(value(&session, "disk.Slow"), Some(Value::Float(0.125)));
    }

    #[test]
    fn malformed_paths_are_session_errors() {
        let mut session = session();
        assert!(matches!(session.set("disk", "1"), Err(SdlError::Session(_))));
        assert!(matches!(session.get("nobody.X"), Err(SdlError::Session(_))));
    }

    #[test]
    fn unknown_systems_are_session_errors() {
        let mut session = session();
        assert!(matches!(session.use_system("Other"), Err(SdlError::Session(_))));
    }
}
