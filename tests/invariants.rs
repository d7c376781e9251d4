//! Property tests for the distribution kernel and distribute normalization.

use proptest::prelude::*;
use sdl::interpreter::{JointState, ReductionPolicy, Value};
use sdl::outcomes::{HistogramReducer, Outcomes, ReduceTarget, Reducer, mean};
use sdl::runtime::Session;

fn latency_strategy(max: usize) -> impl Strategy<Value = Outcomes<f64>> {
    prop::collection::vec((0.001f64..1.0, 0.0f64..2.0), 1..max).prop_map(Outcomes::from_pairs)
}

fn state_strategy() -> impl Strategy<Value = JointState> {
    prop::collection::vec((0.001f64..1.0, any::<bool>(), 0.0f64..2.0), 1..24).prop_map(|buckets| {
        let value = buckets.iter().map(|&(w, ok, _)| (w, Value::Bool(ok))).collect();
        let latency = buckets.iter().map(|&(w, _, l)| (w, l)).collect();
        JointState::new(Some(value), latency)
    })
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-9 * a.abs().max(b.abs()).max(1.0)
}

proptest! {
    #[test]
    fn sequencing_multiplies_mass(a in state_strategy(), b in state_strategy()) {
        let joined = a.then(&b);
        prop_assert!(close(joined.mass(), a.mass() * b.mass()));
        let value_mass = joined.value.as_ref().map(Outcomes::total_weight).unwrap();
        prop_assert!(close(value_mass, joined.mass()));
    }

    #[test]
    fn merging_adds_mass(a in state_strategy(), b in state_strategy()) {
        let (ma, mb) = (a.mass(), b.mass());
        let merged = a.merge(b);
        prop_assert!(close(merged.mass(), ma + mb));
    }

    #[test]
    fn identity_is_neutral_on_the_left(s in state_strategy()) {
        prop_assert_eq!(JointState::identity().then(&s), s);
    }

    #[test]
    fn reduction_preserves_mass_and_mean(s in state_strategy(), t in state_strategy()) {
        let joined = s.then(&t);
        let policy = ReductionPolicy::default();
        let reduced = joined.reduced(&policy).unwrap();
        prop_assert!(reduced.latency.len() <= policy.latency.high);
        prop_assert!(close(reduced.mass(), joined.mass()));
        prop_assert!(close(mean(&reduced.latency).unwrap(), mean(&joined.latency).unwrap()));
    }

    #[test]
    fn histogram_reduction_is_idempotent(o in latency_strategy(80)) {
        let target = ReduceTarget::new(15, 10).unwrap();
        let once = HistogramReducer.reduce(&o, target).unwrap();
        let twice = HistogramReducer.reduce(&once, target).unwrap();
        prop_assert_eq!(once, twice);
    }
}

fn weighted_disk(weights: &[u32]) -> String {
    let cases: Vec<String> = weights
        .iter()
        .enumerate()
        .map(|(i, w)| format!("{w} => {{ delay {}ms; return {} }}", i + 1, i % 2 == 0))
        .collect();
    format!(
        "component C {{ method M(): bool {{ distribute {{ {} }} }} }} system S {{ instance c: C; }}",
        cases.join(" ")
    )
}

fn analyze(source: &str) -> JointState {
    let mut session = Session::default();
    session.load_source("weights.sdl", source).unwrap();
    session.use_system("S").unwrap();
    session.analyze("c.M()").unwrap().state
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn distribute_normalizes_and_ignores_uniform_scaling(
        weights in prop::collection::vec(1u32..100, 1..6),
        factor in 2u32..10,
    ) {
        let base = analyze(&weighted_disk(&weights));
        prop_assert!(close(base.mass(), 1.0));

        let scaled_weights: Vec<u32> = weights.iter().map(|w| w * factor).collect();
        let scaled = analyze(&weighted_disk(&scaled_weights));
        prop_assert!(close(scaled.mass(), 1.0));
        prop_assert!(close(mean(&scaled.latency).unwrap(), mean(&base.latency).unwrap()));

        let successes = |s: &JointState| -> f64 {
            s.value
                .as_ref()
                .unwrap()
                .iter()
                .filter(|b| b.value == Value::Bool(true))
                .map(|b| b.weight)
                .sum()
        };
        prop_assert!(close(successes(&scaled), successes(&base)));
    }
}
