//! Loading systems and engine settings from disk.

use std::fs;
use std::path::{Path, PathBuf};

use sdl::runtime::{EngineConfig, LoadError, SdlError, Session};
use tempfile::TempDir;

fn write(dir: &Path, name: &str, text: &str) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, text).unwrap();
    path
}

const DISK: &str = r#"
    component Disk {
        param FailureProb: float = 0.01;
        method Read(): bool {
            distribute {
                FailureProb => { delay 10s; return false }
                default => { delay 10ms; return true }
            }
        }
    }
"#;

#[test]
fn systems_run_their_analyses_across_imports() {
    let temp = TempDir::new().unwrap();
    write(temp.path(), "components/disk.sdl", DISK);
    let main = write(
        temp.path(),
        "main.sdl",
        r#"
        import Disk from "components/disk";
        system Storage {
            instance disk: Disk;
            analyze read = disk.Read() expect { availability >= 0.98; read.p50 <= 10ms; };
        }
        "#,
    );

    let mut session = Session::default();
    let loaded = session.load(&main).unwrap();
    assert_eq!(loaded.system_names(), vec!["Storage".to_string()]);
    assert_eq!(loaded.imports().len(), 1);

    session.use_system("Storage").unwrap();
    let reports = session.run_analyses().unwrap();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].passed(), "{:?}", reports[0]);
    assert_eq!(reports[0].expectations.len(), 2);
}

#[test]
fn reloading_replaces_the_selected_system() {
    let temp = TempDir::new().unwrap();
    let main = write(temp.path(), "main.sdl", &format!("{DISK} system A {{ instance d: Disk; }}"));
    let mut session = Session::default();
    session.load(&main).unwrap();
    session.use_system("A").unwrap();
    assert!(session.system().is_some());

    session.load(&main).unwrap();
    assert!(session.system().is_none());
    assert!(matches!(session.analyze("d.Read()"), Err(SdlError::Session(_))));
}

#[test]
fn missing_files_are_load_errors() {
    let temp = TempDir::new().unwrap();
    let err = Session::default().load(&temp.path().join("absent.sdl")).unwrap_err();
    assert!(matches!(err, SdlError::Load(LoadError::Io { .. })), "{err}");
}

#[test]
fn engine_settings_load_from_json() {
    let temp = TempDir::new().unwrap();
    let path = write(temp.path(), "engine.json", r#"{ "latency_high": 40, "latency_low": 20 }"#);
    let config = EngineConfig::load(&path).unwrap();
    assert_eq!(config.latency_high, 40);
    assert_eq!(config.latency_low, 20);
    assert_eq!(config.max_call_depth, EngineConfig::default().max_call_depth);

    let policy = config.reduction_policy();
    assert_eq!(policy.latency.high, 40);
    assert_eq!(policy.latency.low, 20);
}

#[test]
fn inverted_water_marks_are_rejected() {
    let temp = TempDir::new().unwrap();
    let path = write(temp.path(), "engine.json", r#"{ "latency_high": 4, "latency_low": 8 }"#);
    let err = EngineConfig::load(&path).unwrap_err();
    assert!(matches!(err, SdlError::Config(_)), "{err}");
}
