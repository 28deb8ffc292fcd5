//! A two-state state machine behind the DEVS wrapper: every message on
//! input line 0 toggles it and emits the new level on output line 0.

mod common;

use common::{check_invariants, counter_state};
use core_sim::Simulation;
use core_sim::dynamics::DynamicsKind;
use core_sim::hsm::{
    Action, Condition, INVALID_STATE, Operand, StateMachine, Variable,
};
use core_sim::source::{ConstantSource, SourceSpec};

/// root(0) { A(1), B(2) }; both children guard on port 0 and toggle,
/// clearing the consumed port bit on entry.
fn toggle_machine() -> StateMachine {
    let mut machine = StateMachine::new();
    machine.set_state(0, INVALID_STATE, 1);
    machine.set_state(1, 0, INVALID_STATE);
    machine.set_state(2, 0, INVALID_STATE);

    let a = machine.state_mut(1);
    a.enter_action = Action::unset_port(Variable::Port0);
    a.condition = Condition::port(0x1, 0x1);
    a.if_action = Action::output(Variable::Port0, Operand::Int(1));
    a.if_transition = 2;

    let b = machine.state_mut(2);
    b.enter_action = Action::unset_port(Variable::Port0);
    b.condition = Condition::port(0x1, 0x1);
    b.if_action = Action::output(Variable::Port0, Operand::Int(0));
    b.if_transition = 1;

    machine
}

#[test]
fn wrapper_toggles_on_each_input_event() -> anyhow::Result<()> {
    let mut sim = Simulation::default();
    sim.limits.set_bound(0.0, 5.0);

    let machine_id = sim.env.hsms.alloc(toggle_machine()).expect("hsm arena");

    let wrapper = sim.alloc(DynamicsKind::HsmWrapper)?;
    sim.parameter_mut(wrapper).unwrap().set_hsm_wrapper(machine_id);

    // Pulses on input line 0 at t = 1, 2, 3.
    let values = {
        let id = sim
            .env
            .srcs
            .constants
            .alloc(ConstantSource::new("ones", vec![1.0]))
            .expect("provider arena");
        SourceSpec::constant(id)
    };
    let delays = {
        let id = sim
            .env
            .srcs
            .constants
            .alloc(ConstantSource::new("delays", vec![1.0, 1.0, 1.0, 100.0]))
            .expect("provider arena");
        SourceSpec::constant(id)
    };

    let generator = sim.alloc(DynamicsKind::Generator)?;
    sim.parameter_mut(generator)
        .unwrap()
        .set_generator_value_source(Some(values))
        .set_generator_ta_source(Some(delays));

    let sink = sim.alloc(DynamicsKind::Counter)?;

    sim.connect(generator, 0, wrapper, 0)?;
    sim.connect(wrapper, 0, sink, 0)?;

    sim.env.srcs.prepare()?;
    sim.initialize()?;

    let mut emissions: Vec<(f64, f64)> = Vec::new();
    let mut seen = 0;
    while sim.current_time() < sim.limits.end() {
        sim.run()?;
        check_invariants(&sim);
        if !sim.current_time().is_finite() {
            break;
        }

        let (count, value) = counter_state(&sim, sink);
        if count > seen {
            emissions.push((sim.current_time(), value));
            seen = count;
        }
    }

    assert_eq!(
        emissions,
        vec![(1.0, 1.0), (2.0, 0.0), (3.0, 1.0)],
        "levels 1, 0, 1 at t = 1, 2, 3"
    );

    sim.finalize()?;
    Ok(())
}

#[test]
fn wrapper_without_machine_fails_to_initialize() {
    let mut sim = Simulation::default();
    let _wrapper = sim.alloc(DynamicsKind::HsmWrapper).unwrap();

    assert!(sim.initialize().is_err(), "dangling machine id must surface");
}
