//! End-to-end analyses of small systems, checked against closed-form values.

use sdl::outcomes::Metric;
use sdl::runtime::{AnalysisResult, EngineConfig, Session};

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

fn session(source: &str, system: &str) -> Session {
    let mut session = Session::default();
    session.load_source("scenario.sdl", source).unwrap();
    session.use_system(system).unwrap();
    session
}

fn metric(result: &AnalysisResult, metric: Metric) -> f64 {
    result.metric(metric).unwrap()
}

fn assert_close(actual: f64, expected: f64, tolerance: f64) {
    assert!(
        (actual - expected).abs() <= tolerance,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn single_disk_read() {
    let source = format!("{DISK} system S {{ instance disk: Disk; }}");
    let session = session(&source, "S");
    let result = session.analyze("disk.Read()").unwrap();

    assert_close(metric(&result, Metric::Availability), 0.99, 1e-12);
    assert_close(metric(&result, Metric::MeanLatency), 0.1099, 1e-9);
    assert_close(metric(&result, Metric::P50), 0.010, 1e-12);
    assert_close(metric(&result, Metric::P999), 10.0, 1e-12);
}

#[test]
fn cache_in_front_of_a_disk() {
    let source = format!(
        r#"{DISK}
        component Cache {{
            param HitRate: float = 0.9;
            method Hit(): bool {{
                distribute {{
                    HitRate => {{ delay 1ms; return true }}
                    default => {{ delay 1ms; return false }}
                }}
            }}
        }}
        component CachedDisk {{
            uses cache: Cache;
            uses disk: Disk;
            method Read(): bool {{
                if cache.Hit() {{
                    return true
                }} else {{
                    return disk.Read()
                }}
            }}
        }}
        system S {{
            instance c: Cache;
            instance d: Disk = {{ FailureProb = 0.01 }};
            instance front: CachedDisk = {{ cache = c, disk = d }};
        }}"#
    );
    let session = session(&source, "S");
    let result = session.analyze("front.Read()").unwrap();

    // 0.9 + 0.1 * 0.99
    assert_close(metric(&result, Metric::Availability), 0.999, 1e-12);
    // 1ms for the cache lookup, plus 0.1 * (0.99 * 10ms + 0.01 * 10s)
    assert_close(metric(&result, Metric::MeanLatency), 0.001 + 0.1 * 0.1099, 1e-9);
}

const STORE: &str = r#"
    component Store {
        method Read(): bool {
            distribute {
                1 => { delay 9ms; return true }
                2 => { delay 10ms; return true }
                1 => { delay 12ms; return true }
            }
        }
    }
    component Pair {
        uses store: Store;
        method Both(): bool {
            go a = store.Read();
            go b = store.Read();
            wait a, b;
            return true
        }
    }
"#;

#[test]
fn parallel_reads_wait_for_the_slower() {
    let source = format!(
        "{STORE} system S {{ instance s: Store; instance pair: Pair = {{ store = s }}; }}"
    );
    let session = session(&source, "S");
    let single = session.analyze("s.Read()").unwrap();
    let both = session.analyze("pair.Both()").unwrap();

    assert_close(metric(&single, Metric::MeanLatency), 0.01025, 1e-12);
    // max of two: P(9) = 1/16, P(10) = 9/16 - 1/16, P(12) = 7/16
    let expected = 0.009 * 0.0625 + 0.010 * 0.5 + 0.012 * 0.4375;
    assert_close(metric(&both, Metric::MeanLatency), expected, 1e-12);
    assert!(metric(&both, Metric::MeanLatency) >= metric(&single, Metric::MeanLatency));
    assert!(metric(&both, Metric::P99) <= 2.0 * metric(&single, Metric::P99));
    assert_close(metric(&both, Metric::Availability), 1.0, 1e-12);
}

#[test]
fn retry_after_failure() {
    let source = r#"
        component Store {
            method Write(): bool {
                distribute {
                    9 => { delay 5ms; return true }
                    1 => { delay 5ms; return false }
                }
            }
        }
        component Retrying {
            uses store: Store;
            method Write(): bool {
                let r = store.Write();
                if !r {
                    delay 20ms;
                    let second = store.Write();
                    return second
                } else {
                    return true
                }
            }
        }
        system S {
            instance s: Store;
            instance client: Retrying = { store = s };
        }
    "#;
    let session = session(source, "S");
    let result = session.analyze("client.Write()").unwrap();

    // 1 - 0.1 * 0.1
    assert_close(metric(&result, Metric::Availability), 0.99, 1e-12);
    // 5ms always, plus 0.1 * (20ms + 5ms)
    assert_close(metric(&result, Metric::MeanLatency), 0.0075, 1e-12);
}

#[test]
fn overrides_give_instances_their_own_parameters() {
    let source = format!(
        r#"{DISK}
        system S {{
            instance solid: Disk = {{ FailureProb = 0.0 }};
            instance flaky: Disk = {{ FailureProb = 0.5 }};
            analyze solidRead = solid.Read() expect {{ availability == 1.0; }};
            analyze flakyRead = flaky.Read() expect {{ availability == 0.5; }};
        }}"#
    );
    let session = session(&source, "S");

    let solid = session.analyze("solid.Read()").unwrap();
    let flaky = session.analyze("flaky.Read()").unwrap();
    assert_close(metric(&solid, Metric::Availability), 1.0, 1e-12);
    assert_close(metric(&flaky, Metric::Availability), 0.5, 1e-12);

    let reports = session.run_analyses().unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.passed()), "{reports:?}");
}

/// Exact distribution of the sum of `steps` draws, in whole milliseconds.
fn exact_sum(step: &[(f64, usize)], steps: usize) -> Vec<f64> {
    let max = step.iter().map(|s| s.1).max().unwrap() * steps;
    let mut dist = vec![0.0; max + 1];
    dist[0] = 1.0;
    for _ in 0..steps {
        let mut next = vec![0.0; max + 1];
        for (at, &weight) in dist.iter().enumerate() {
            if weight > 0.0 {
                for &(p, ms) in step {
                    next[at + ms] += weight * p;
                }
            }
        }
        dist = next;
    }
    dist
}

#[test]
fn reduction_keeps_long_chains_accurate() {
    let source = r#"
        component Step {
            method Op(): bool {
                distribute {
                    5 => { delay 1ms; return true }
                    3 => { delay 2ms; return true }
                    2 => { delay 5ms; return true }
                }
            }
        }
        component Chain {
            uses step: Step;
            method Run(): bool {
                for 20 {
                    step.Op();
                }
                return true
            }
        }
        system S {
            instance st: Step;
            instance chain: Chain = { step = st };
        }
    "#;
    let session = session(source, "S");
    let result = session.analyze("chain.Run()").unwrap();
    let config = EngineConfig::default();
    assert!(result.state.latency.len() <= config.latency_high);

    let exact = exact_sum(&[(0.5, 1), (0.3, 2), (0.2, 5)], 20);
    let exact_mean: f64 = exact.iter().enumerate().map(|(ms, w)| ms as f64 * w).sum::<f64>() / 1000.0;
    let mut accumulated = 0.0;
    let exact_p99 = exact
        .iter()
        .enumerate()
        .find_map(|(ms, w)| {
            accumulated += w;
            (accumulated >= 0.99).then_some(ms as f64 / 1000.0)
        })
        .unwrap();

    let mean = metric(&result, Metric::MeanLatency);
    let p99 = metric(&result, Metric::P99);
    assert!((mean - exact_mean).abs() / exact_mean < 0.01, "mean {mean} vs {exact_mean}");
    assert!((p99 - exact_p99).abs() / exact_p99 < 0.05, "p99 {p99} vs {exact_p99}");
}
