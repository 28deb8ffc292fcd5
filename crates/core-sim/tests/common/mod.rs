#![allow(dead_code)]

use core_sim::dynamics::Dynamics;
use core_sim::{INVALID_HANDLE, ModelId, Simulation};

/// Opt-in tracing for debugging a failing scenario:
/// `RUST_LOG=sim.driver=debug cargo test`.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Structural invariants that must hold after every step:
/// `tl <= t <= tn` for every live model, and each heap node keyed either at
/// the model's `tn` or at the current time (a message re-wake).
pub fn check_invariants(sim: &Simulation) {
    let t = sim.current_time();
    if !t.is_finite() {
        return;
    }

    for (id, model) in sim.models.iter() {
        assert!(
            model.tl <= t + 1e-9,
            "tl {} must not exceed t {} for {id:?}",
            model.tl,
            t
        );
        assert!(
            model.tn >= t - 1e-9,
            "tn {} must not precede t {} for {id:?}",
            model.tn,
            t
        );

        if model.handle != INVALID_HANDLE && sim.sched.is_in_tree(model.handle) {
            let heap_tn = sim.sched.tn_of(model.handle);
            assert!(
                heap_tn == model.tn || heap_tn == t,
                "heap key {heap_tn} out of sync with tn {} for {id:?}",
                model.tn
            );
        }
    }
}

/// Drive the simulation to its time limit, checking invariants per step.
pub fn run_to_end(sim: &mut Simulation) -> anyhow::Result<()> {
    sim.initialize()?;
    check_invariants(sim);

    while sim.current_time() < sim.limits.end() {
        sim.run()?;
        check_invariants(sim);
        if !sim.current_time().is_finite() {
            break;
        }
    }
    Ok(())
}

pub fn counter_state(sim: &Simulation, id: ModelId) -> (i64, f64) {
    match &sim.models.get(id).expect("counter model").dynamics {
        Dynamics::Counter(counter) => (counter.number, counter.last_value),
        other => panic!("expected a counter, found {:?}", other.kind()),
    }
}
