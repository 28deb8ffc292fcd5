//! Queue family end-to-end: fixed-delay FIFO holding, and wakeup-ordered
//! delivery when per-entry delays come from an external source.

mod common;

use common::{check_invariants, counter_state};
use core_sim::Simulation;
use core_sim::dynamics::DynamicsKind;
use core_sim::source::{ConstantSource, SourceSpec};

fn constant_provider(sim: &mut Simulation, data: Vec<f64>) -> SourceSpec {
    let id = sim
        .env
        .srcs
        .constants
        .alloc(ConstantSource::new("seq", data))
        .expect("provider arena");
    SourceSpec::constant(id)
}

#[test]
fn queue_holds_for_its_fixed_delay() -> anyhow::Result<()> {
    let mut sim = Simulation::default();
    sim.limits.set_bound(0.0, 10.0);

    let source = sim.alloc(DynamicsKind::Constant)?;
    sim.parameter_mut(source).unwrap().set_constant(5.0, 0.0);

    let queue = sim.alloc(DynamicsKind::Queue)?;
    sim.parameter_mut(queue).unwrap().set_queue(2.0);

    let sink = sim.alloc(DynamicsKind::Counter)?;

    sim.connect(source, 0, queue, 0)?;
    sim.connect(queue, 0, sink, 0)?;

    sim.initialize()?;

    let mut delivery_time = None;
    while sim.current_time() < sim.limits.end() {
        sim.run()?;
        check_invariants(&sim);
        if !sim.current_time().is_finite() {
            break;
        }

        let (count, value) = counter_state(&sim, sink);
        if count > 0 && delivery_time.is_none() {
            delivery_time = Some((sim.current_time(), value));
        }
    }

    assert_eq!(
        delivery_time,
        Some((2.0, 5.0)),
        "the value emitted at t = 0 must surface at t = 2"
    );
    let (count, _) = counter_state(&sim, sink);
    assert_eq!(count, 1, "and stay delivered exactly once");

    sim.finalize()?;
    Ok(())
}

#[test]
fn priority_queue_reorders_by_pulled_delay() -> anyhow::Result<()> {
    let mut sim = Simulation::default();
    sim.limits.set_bound(0.0, 5.0);

    // Values 1, 2, 3 arrive at t = 0.1, 0.2, 0.3 and pull delays 3, 1, 2:
    // wakeups 3.1, 1.2, 2.3, so delivery order is 2, 3, 1.
    let values = constant_provider(&mut sim, vec![1.0, 2.0, 3.0, 9.0]);
    let arrivals = constant_provider(&mut sim, vec![0.1, 0.1, 0.1, 100.0]);
    let delays = constant_provider(&mut sim, vec![3.0, 1.0, 2.0]);

    let generator = sim.alloc(DynamicsKind::Generator)?;
    sim.parameter_mut(generator)
        .unwrap()
        .set_generator_value_source(Some(values))
        .set_generator_ta_source(Some(arrivals));

    let queue = sim.alloc(DynamicsKind::PriorityQueue)?;
    sim.parameter_mut(queue)
        .unwrap()
        .set_priority_queue_ta_source(Some(delays));

    let sink = sim.alloc(DynamicsKind::Counter)?;

    sim.connect(generator, 0, queue, 0)?;
    sim.connect(queue, 0, sink, 0)?;

    sim.env.srcs.prepare()?;
    sim.initialize()?;

    let mut deliveries: Vec<(f64, f64)> = Vec::new();
    let mut seen = 0;

    while sim.current_time() < sim.limits.end() {
        sim.run()?;
        check_invariants(&sim);
        if !sim.current_time().is_finite() {
            break;
        }

        let (count, value) = counter_state(&sim, sink);
        if count > seen {
            deliveries.push((sim.current_time(), value));
            seen = count;
        }
    }

    let order: Vec<f64> = deliveries.iter().map(|(_, v)| *v).collect();
    assert_eq!(order, vec![2.0, 3.0, 1.0], "wakeup order, not arrival order");

    let times: Vec<f64> = deliveries.iter().map(|(t, _)| *t).collect();
    assert!((times[0] - 1.2).abs() < 1e-9, "first at 0.2 + 1.0");
    assert!((times[1] - 2.3).abs() < 1e-9, "second at 0.3 + 2.0");
    assert!((times[2] - 3.1).abs() < 1e-9, "third at 0.1 + 3.0");

    sim.finalize()?;
    Ok(())
}

#[test]
fn dynamic_queue_pulls_every_delay() -> anyhow::Result<()> {
    let mut sim = Simulation::default();
    sim.limits.set_bound(0.0, 10.0);

    // Two events at t = 1 and t = 2, each held for the next pulled delay
    // (2.0 then 0.5): deliveries at 3.0 and 2.5, out of arrival order but
    // FIFO within the ring discipline.
    let values = constant_provider(&mut sim, vec![10.0, 20.0, 0.0]);
    let arrivals = constant_provider(&mut sim, vec![1.0, 1.0, 100.0]);
    let delays = constant_provider(&mut sim, vec![2.0, 0.5]);

    let generator = sim.alloc(DynamicsKind::Generator)?;
    sim.parameter_mut(generator)
        .unwrap()
        .set_generator_value_source(Some(values))
        .set_generator_ta_source(Some(arrivals));

    let queue = sim.alloc(DynamicsKind::DynamicQueue)?;
    sim.parameter_mut(queue)
        .unwrap()
        .set_dynamic_queue_ta_source(Some(delays));

    let sink = sim.alloc(DynamicsKind::Counter)?;

    sim.connect(generator, 0, queue, 0)?;
    sim.connect(queue, 0, sink, 0)?;

    sim.env.srcs.prepare()?;
    sim.initialize()?;

    let mut deliveries: Vec<(f64, f64)> = Vec::new();
    let mut seen = 0;
    while sim.current_time() < sim.limits.end() {
        sim.run()?;
        check_invariants(&sim);
        if !sim.current_time().is_finite() {
            break;
        }
        let (count, value) = counter_state(&sim, sink);
        if count > seen {
            deliveries.push((sim.current_time(), value));
            seen = count;
        }
    }

    assert_eq!(deliveries.len(), 2);
    assert!((deliveries[0].0 - 2.5).abs() < 1e-9);
    assert_eq!(deliveries[0].1, 20.0);
    assert!((deliveries[1].0 - 3.0).abs() < 1e-9);
    assert_eq!(deliveries[1].1, 10.0);

    sim.finalize()?;
    Ok(())
}
