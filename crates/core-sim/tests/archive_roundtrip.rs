//! Persisting a configured simulation and rebuilding it must reproduce the
//! model arena, the wiring and the behavior.

mod common;

use std::io::Cursor;

use common::{counter_state, run_to_end};
use core_sim::archive::{ArchiveError, archive, dearchive};
use core_sim::dynamics::{Dynamics, DynamicsKind};
use core_sim::hsm::{Action, Condition, INVALID_STATE, Operand, StateMachine, Variable};
use core_sim::source::{ConstantSource, SourceSpec};
use core_sim::{ModelId, Simulation};

struct Fixture {
    sim: Simulation,
    integrator: ModelId,
    sink: ModelId,
}

/// A small but representative scene: a driven integrator, a held queue, a
/// source-fed generator and a state machine wrapper.
fn build() -> anyhow::Result<Fixture> {
    let mut sim = Simulation::default();
    sim.limits.set_bound(0.0, 4.0);

    let values = sim
        .env
        .srcs
        .constants
        .alloc(ConstantSource::new("values", vec![2.0, 4.0, 6.0]))
        .expect("provider arena");
    let delays = sim
        .env
        .srcs
        .constants
        .alloc(ConstantSource::new("delays", vec![1.0, 1.0, 100.0]))
        .expect("provider arena");

    let mut machine = StateMachine::new();
    machine.set_state(0, INVALID_STATE, 1);
    machine.set_state(1, 0, INVALID_STATE);
    machine.set_state(2, 0, INVALID_STATE);
    machine.state_mut(1).condition = Condition::port(0x1, 0x1);
    machine.state_mut(1).if_action = Action::output(Variable::Port0, Operand::Int(1));
    machine.state_mut(1).if_transition = 2;
    machine.state_mut(2).enter_action = Action::unset_port(Variable::Port0);
    let machine_id = sim.env.hsms.alloc(machine).expect("hsm arena");

    let one = sim.alloc(DynamicsKind::Constant)?;
    sim.parameter_mut(one).unwrap().set_constant(1.0, 0.0);

    let integrator = sim.alloc(DynamicsKind::Qss2Integrator)?;
    sim.parameter_mut(integrator)
        .unwrap()
        .set_integrator(0.5, 0.05);

    let generator = sim.alloc(DynamicsKind::Generator)?;
    sim.parameter_mut(generator)
        .unwrap()
        .set_generator_value_source(Some(SourceSpec::constant(values)))
        .set_generator_ta_source(Some(SourceSpec::constant(delays)));

    let queue = sim.alloc(DynamicsKind::Queue)?;
    sim.parameter_mut(queue).unwrap().set_queue(0.5);

    let sink = sim.alloc(DynamicsKind::Counter)?;

    let wrapper = sim.alloc(DynamicsKind::HsmWrapper)?;
    sim.parameter_mut(wrapper).unwrap().set_hsm_wrapper(machine_id);

    sim.connect(one, 0, integrator, 0)?;
    sim.connect(generator, 0, queue, 0)?;
    sim.connect(queue, 0, sink, 0)?;
    sim.connect(generator, 0, wrapper, 0)?;

    Ok(Fixture {
        sim,
        integrator,
        sink,
    })
}

#[test]
fn archive_then_dearchive_reproduces_the_scene() -> anyhow::Result<()> {
    let Fixture { mut sim, .. } = build()?;

    let mut bytes = Vec::new();
    archive(&mut sim, &mut bytes)?;

    let mut rebuilt = Simulation::default();
    rebuilt.limits.set_bound(0.0, 4.0);
    dearchive(&mut rebuilt, Cursor::new(bytes))?;

    assert_eq!(rebuilt.models.len(), sim.models.len());
    assert_eq!(rebuilt.env.hsms.len(), sim.env.hsms.len());
    assert_eq!(rebuilt.env.srcs.constants.len(), sim.env.srcs.constants.len());

    // Kinds and parameters match slot for slot.
    for ((id_a, model_a), (id_b, model_b)) in sim.models.iter().zip(rebuilt.models.iter()) {
        assert_eq!(model_a.dynamics.kind(), model_b.dynamics.kind());
        assert_eq!(
            sim.parameter(id_a).unwrap(),
            rebuilt.parameter(id_b).unwrap(),
            "parameters differ for kind {:?}",
            model_a.dynamics.kind()
        );
    }

    // The connection set survived: every original edge exists (duplicate
    // detection refuses it), every absent edge stays absent.
    let ids: Vec<ModelId> = rebuilt.models.ids().collect();
    for (src_index, &src) in ids.iter().enumerate() {
        for &dst in &ids {
            let originals = [(0usize, 1usize), (2, 3), (3, 4), (2, 5)];
            let dst_index = ids.iter().position(|i| *i == dst).unwrap();
            let expected = originals.contains(&(src_index, dst_index));

            let has_edge = !rebuilt.can_connect(src, 0, dst, 0)
                && rebuilt.models.contains(src)
                && rebuilt.models.contains(dst)
                && src != dst;
            if expected {
                assert!(has_edge, "missing edge {src_index} -> {dst_index}");
            }
        }
    }

    Ok(())
}

#[test]
fn rebuilt_simulation_behaves_identically() -> anyhow::Result<()> {
    let Fixture {
        mut sim,
        integrator,
        sink,
    } = build()?;

    let mut bytes = Vec::new();
    archive(&mut sim, &mut bytes)?;

    let mut rebuilt = Simulation::default();
    rebuilt.limits.set_bound(0.0, 4.0);
    dearchive(&mut rebuilt, Cursor::new(bytes))?;

    sim.env.srcs.prepare()?;
    rebuilt.env.srcs.prepare()?;

    run_to_end(&mut sim)?;
    run_to_end(&mut rebuilt)?;

    // Same slots on both sides, because the fixture never frees a model.
    let ids_a: Vec<ModelId> = sim.models.ids().collect();
    let ids_b: Vec<ModelId> = rebuilt.models.ids().collect();
    let integrator_b = ids_b[ids_a.iter().position(|i| *i == integrator).unwrap()];
    let sink_b = ids_b[ids_a.iter().position(|i| *i == sink).unwrap()];

    assert_eq!(counter_state(&sim, sink), counter_state(&rebuilt, sink_b));

    let state_a = match &sim.models.get(integrator).unwrap().dynamics {
        Dynamics::Qss2Integrator(d) => (d.value, d.u, d.q),
        _ => unreachable!(),
    };
    let state_b = match &rebuilt.models.get(integrator_b).unwrap().dynamics {
        Dynamics::Qss2Integrator(d) => (d.value, d.u, d.q),
        _ => unreachable!(),
    };
    assert_eq!(state_a, state_b, "trajectories must match bit for bit");

    sim.finalize()?;
    rebuilt.finalize()?;
    Ok(())
}

#[test]
fn round_trip_through_a_real_file() -> anyhow::Result<()> {
    common::init_tracing();

    let Fixture { mut sim, .. } = build()?;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("scene.sim");

    let mut file = std::fs::File::create(&path)?;
    archive(&mut sim, &mut file)?;
    drop(file);

    let mut rebuilt = Simulation::default();
    dearchive(&mut rebuilt, std::fs::File::open(&path)?)?;
    assert_eq!(rebuilt.models.len(), sim.models.len());

    Ok(())
}

#[test]
fn dearchive_rejects_a_bad_magic_number() {
    let mut sim = Simulation::default();
    let bytes = vec![0u8; 64];
    assert!(matches!(
        dearchive(&mut sim, Cursor::new(bytes)),
        Err(ArchiveError::BadMagic)
    ));
}
