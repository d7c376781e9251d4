//! Degenerate shapes: empty bodies, constant branches, single cases and
//! single futures.

use sdl::interpreter::Value;
use sdl::outcomes::Metric;
use sdl::runtime::{AnalysisResult, EngineConfig, SdlError, Session};

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
    component Shapes {
        uses disk: Disk;
        method Nothing() { }
        method Always(): bool {
            if true { delay 5ms; return true } else { delay 9ms; return false }
        }
        method Never(): bool {
            if false { delay 5ms; return true } else { delay 9ms; return false }
        }
        method OneCase(): bool {
            distribute { 3 => disk.Read() }
        }
        method OneFuture(): bool {
            go a = disk.Read();
            wait a;
            return true
        }
        method Unrolled(): bool {
            for 0 { delay 1s; }
            return true
        }
    }
    system S {
        instance d: Disk;
        instance shapes: Shapes = { disk = d };
    }
"#;

fn session() -> Session {
    let mut session = Session::default();
    session.load_source("shapes.sdl", SOURCE).unwrap();
    session.use_system("S").unwrap();
    session
}

fn metric(result: &AnalysisResult, metric: Metric) -> f64 {
    result.metric(metric).unwrap()
}

#[test]
fn empty_bodies_are_instantaneous() {
    let result = session().analyze("shapes.Nothing()").unwrap();
    assert_eq!(metric(&result, Metric::MeanLatency), 0.0);
    assert_eq!(result.state.mass(), 1.0);
}

#[test]
fn constant_conditions_take_one_branch() {
    let session = session();
    let always = session.analyze("shapes.Always()").unwrap();
    assert_eq!(metric(&always, Metric::Availability), 1.0);
    assert!((metric(&always, Metric::MeanLatency) - 0.005).abs() < 1e-12);

    let never = session.analyze("shapes.Never()").unwrap();
    assert_eq!(metric(&never, Metric::Availability), 0.0);
    assert!((metric(&never, Metric::MeanLatency) - 0.009).abs() < 1e-12);
}

#[test]
fn a_single_distribute_case_is_the_case_itself() {
    let session = session();
    let direct = session.analyze("d.Read()").unwrap();
    let wrapped = session.analyze("shapes.OneCase()").unwrap();
    assert_eq!(direct.state, wrapped.state);
}

#[test]
fn waiting_on_one_future_is_a_call() {
    let session = session();
    let direct = session.analyze("d.Read()").unwrap();
    let waited = session.analyze("shapes.OneFuture()").unwrap();
    assert_eq!(direct.state.latency, waited.state.latency);
    assert_eq!(metric(&waited, Metric::Availability), 1.0);
}

#[test]
fn zero_iterations_add_nothing() {
    let result = session().analyze("shapes.Unrolled()").unwrap();
    assert_eq!(metric(&result, Metric::MeanLatency), 0.0);
}

#[test]
fn evaluation_is_deterministic() {
    let first = session().analyze("shapes.OneFuture()").unwrap();
    let second = session().analyze("shapes.OneFuture()").unwrap();
    assert_eq!(first, second);

    let session = session();
    assert_eq!(session.analyze("d.Read()").unwrap(), session.analyze("d.Read()").unwrap());
}

#[test]
fn expressions_analyze_without_methods() {
    let session = session();
    let result = session.analyze("sample distribute { 1 => 2ms; 3 => 4ms }").unwrap();
    assert_eq!(metric(&result, Metric::MeanLatency), 0.0);
    let expected = 0.25 * 0.002 + 0.75 * 0.004;
    let mean: f64 = result
        .state
        .value
        .as_ref()
        .unwrap()
        .iter()
        .map(|b| b.weight * b.value.as_f64().unwrap())
        .sum();
    assert!((mean - expected).abs() < 1e-12);
}

#[test]
fn deep_recursion_hits_the_call_limit() {
    let source = r#"
        component Loop { method Spin(): bool { return self.Spin() } }
        system S { instance l: Loop; }
    "#;
    let config = EngineConfig {
        max_call_depth: 8,
        ..EngineConfig::default()
    };
    let mut session = Session::new(config);
    session.load_source("loop.sdl", source).unwrap();
    session.use_system("S").unwrap();
    let err = session.analyze("l.Spin()").unwrap_err();
    assert!(matches!(err, SdlError::Eval(_)), "{err}");
}

#[test]
fn type_errors_are_collected_at_load() {
    let source = r#"
        component C {
            param N: int = "three";
            method M(): bool { return 1 }
        }
    "#;
    let err = Session::default().load_source("bad.sdl", source).unwrap_err();
    let SdlError::TypeCheck(errors) = err else {
        panic!("expected type errors, got {err}");
    };
    let kinds: Vec<&str> = errors.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["type", "method"]);
}

#[test]
fn wide_integer_results_stay_integers() {
    let cases: Vec<String> = (1..=20).map(|i| format!("1 => {i}")).collect();
    let source = format!(
        "component Wide {{ method Pick(): int {{ return distribute {{ {} }} }} }} system S {{ instance w: Wide; }}",
        cases.join("; ")
    );
    let mut session = Session::default();
    session.load_source("wide.sdl", &source).unwrap();
    session.use_system("S").unwrap();

    let result = session.analyze("w.Pick()").unwrap();
    let value = result.state.value.as_ref().unwrap();
    assert!(value.len() <= 16, "{} buckets", value.len());
    assert!((value.total_weight() - 1.0).abs() < 1e-12);
    for bucket in value {
        assert!(
            matches!(bucket.value, Value::Int(n) if (1..=20).contains(&n)),
            "{:?}",
            bucket.value
        );
    }
}
