//! Zero-crossing detection: an alternating signal must pulse the down and
//! up ports of a cross detector at exactly the event times.

mod common;

use common::counter_state;
use core_sim::Simulation;
use core_sim::dynamics::DynamicsKind;
use core_sim::source::{ConstantSource, SourceSpec};

// Small local extension to keep the test bodies focused on behavior.
trait SimulationExt {
    fn constant_provider(&mut self, data: Vec<f64>) -> SourceSpec;
}

impl SimulationExt for Simulation {
    fn constant_provider(&mut self, data: Vec<f64>) -> SourceSpec {
        let id = self
            .env
            .srcs
            .constants
            .alloc(ConstantSource::new("seq", data))
            .expect("provider arena");
        SourceSpec::constant(id)
    }
}

#[test]
fn alternating_signal_pulses_both_sides() -> anyhow::Result<()> {
    let mut sim = Simulation::default();
    sim.limits.set_bound(0.0, 5.0);

    // Values -1, +1, -1 delivered at t = 1, 2, 3.
    let values = sim.constant_provider(vec![-1.0, 1.0, -1.0, 0.0]);
    let delays = sim.constant_provider(vec![1.0, 1.0, 1.0, 100.0]);

    let generator = sim.alloc(DynamicsKind::Generator)?;
    sim.parameter_mut(generator)
        .unwrap()
        .set_generator_value_source(Some(values))
        .set_generator_ta_source(Some(delays));

    let cross = sim.alloc(DynamicsKind::Qss1Cross)?;
    sim.parameter_mut(cross).unwrap().set_cross(0.0, 1.0, 1.0);

    let ups = sim.alloc(DynamicsKind::Counter)?;
    let downs = sim.alloc(DynamicsKind::Counter)?;

    sim.connect(generator, 0, cross, 0)?;
    sim.connect(cross, 0, ups, 0)?;
    sim.connect(cross, 1, downs, 0)?;

    sim.env.srcs.prepare()?;
    sim.initialize()?;

    // Track at which times the counters move.
    let mut pulses: Vec<(f64, char)> = Vec::new();
    let (mut last_up, mut last_down) = (0, 0);

    while sim.current_time() < sim.limits.end() {
        sim.run()?;
        common::check_invariants(&sim);
        if !sim.current_time().is_finite() {
            break;
        }

        let (up, _) = counter_state(&sim, ups);
        let (down, _) = counter_state(&sim, downs);
        if up > last_up {
            pulses.push((sim.current_time(), 'u'));
            last_up = up;
        }
        if down > last_down {
            pulses.push((sim.current_time(), 'd'));
            last_down = down;
        }
    }

    assert_eq!(
        pulses,
        vec![(1.0, 'd'), (2.0, 'u'), (3.0, 'd')],
        "down, up, down at exactly t = 1, 2, 3"
    );

    sim.finalize()?;
    Ok(())
}
