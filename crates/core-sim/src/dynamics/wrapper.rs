//! Bridges a shared [`StateMachine`] table into the DEVS world: four
//! inbound event lines, four outbound message lines, and a per-model
//! [`Execution`] record.

use core_arena::ArenaId;
use core_hsm::{
    ConditionKind, Event, Execution, HsmError, INVALID_STATE, MachineOptions, PORT_COUNT,
};

use crate::archive::{ArchiveError, Codec, persist_source};
use crate::dynamics::Atom;
use crate::env::Env;
use crate::error::{SimulationError, Status};
use crate::message::{ObservationMessage, Time};
use crate::port::InputPort;
use crate::{HsmId, OutputPortId};

#[derive(Debug, Clone)]
pub struct HsmWrapper {
    pub x: [InputPort; PORT_COUNT],
    pub y: [OutputPortId; PORT_COUNT],

    pub exec: Execution,
    pub sigma: Time,
    pub id: HsmId,
}

impl Default for HsmWrapper {
    fn default() -> Self {
        Self {
            x: Default::default(),
            y: Default::default(),
            exec: Execution::default(),
            sigma: f64::INFINITY,
            id: HsmId::INVALID,
        }
    }
}

impl HsmWrapper {
    /// The wrapper's time advance after a dispatch round: immediate when
    /// outputs are queued, the remaining timer for `sigma`-conditions,
    /// forever for port waits and terminal states.
    fn compute_sigma(exec: &Execution, machine: &core_hsm::StateMachine) -> Time {
        if !exec.outputs.is_empty() {
            return 0.0;
        }
        if exec.current_state == INVALID_STATE {
            return f64::INFINITY;
        }

        let state = &machine.states[exec.current_state as usize];
        if state.is_terminal() {
            return f64::INFINITY;
        }

        match state.condition.kind {
            ConditionKind::Sigma => exec.timer,
            ConditionKind::Port => f64::INFINITY,
            _ => 0.0,
        }
    }
}

impl Atom for HsmWrapper {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, env: &mut Env) -> Status {
        // Keep the parameterized initial variables across the reset.
        let (i1, i2, r1, r2, timer) = (
            self.exec.i1,
            self.exec.i2,
            self.exec.r1,
            self.exec.r2,
            self.exec.timer,
        );
        self.exec.clear();
        self.exec.i1 = i1;
        self.exec.i2 = i2;
        self.exec.r1 = r1;
        self.exec.r2 = r2;
        self.exec.timer = timer;

        let Env { hsms, srcs, .. } = env;
        let machine = hsms.get(self.id).ok_or(SimulationError::HsmUnknown)?;

        if machine.flags.contains(MachineOptions::USE_SOURCE) {
            if self.exec.source_value.spec.is_some() {
                srcs.initialize(&mut self.exec.source_value)?;
            } else if !machine.flags.contains(MachineOptions::LENIENT_SOURCE) {
                return Err(SimulationError::Hsm(HsmError::SourceUnconfigured));
            }
        }

        machine.start(&mut self.exec, srcs)?;
        self.sigma = Self::compute_sigma(&self.exec, machine);
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, _e: Time, r: Time) -> Status {
        let Env {
            hsms,
            srcs,
            message_buffer,
            ..
        } = env;
        let machine = hsms.get(self.id).ok_or(SimulationError::HsmUnknown)?;

        for (index, port) in self.x.iter().enumerate() {
            if port.is_empty() {
                continue;
            }
            let start = port.position as usize;
            for msg in &message_buffer[start..start + port.len()] {
                self.exec.set_port(index, msg.value());
            }
        }

        self.exec.outputs.clear();

        // Chain through internal conditions until the machine settles on a
        // timer wait, a port wait or a terminal state.
        loop {
            self.exec.previous_state = self.exec.current_state;
            if self.exec.current_state == INVALID_STATE {
                break;
            }

            let condition = machine.states[self.exec.current_state as usize]
                .condition
                .kind;
            match condition {
                ConditionKind::Sigma => {
                    self.exec.timer = r;
                    if r == 0.0 {
                        machine.dispatch(Event::WakeUp, &mut self.exec, srcs)?;
                    } else {
                        debug_assert!(self.exec.any_port(), "early wake without input");
                        machine.dispatch(Event::InputChanged, &mut self.exec, srcs)?;
                    }
                }
                ConditionKind::Port => {
                    if self.exec.any_port() {
                        machine.dispatch(Event::InputChanged, &mut self.exec, srcs)?;
                    }
                }
                _ => {
                    machine.dispatch(Event::Internal, &mut self.exec, srcs)?;
                }
            }

            debug_assert!(self.exec.current_state != INVALID_STATE);
            let state = &machine.states[self.exec.current_state as usize];
            let settled = state.is_terminal()
                || matches!(
                    state.condition.kind,
                    ConditionKind::Sigma | ConditionKind::Port
                );
            if settled {
                break;
            }

            // A round that went nowhere (guard refused, or a degenerate
            // self-loop) must not spin inside one transition; with an
            // internal condition sigma stays zero, so the chart resumes in
            // the next step instead.
            if self.exec.current_state == self.exec.previous_state {
                break;
            }
        }

        self.sigma = Self::compute_sigma(&self.exec, machine);
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        let outputs = std::mem::take(&mut self.exec.outputs);
        for output in &outputs {
            env.send(self.y[output.port as usize], output.value)?;
        }
        self.exec.outputs = outputs;
        Ok(())
    }

    fn finalize(&mut self, env: &mut Env) -> Status {
        let Env { hsms, srcs, .. } = env;
        let machine = hsms.get(self.id).ok_or(SimulationError::HsmUnknown)?;

        if machine.flags.contains(MachineOptions::USE_SOURCE)
            && self.exec.source_value.spec.is_some()
        {
            srcs.finalize_handle(&mut self.exec.source_value)?;
        }
        Ok(())
    }

    fn observation(&self, t: Time, _e: Time) -> ObservationMessage {
        ObservationMessage([
            t,
            self.exec.current_state as f64,
            self.exec.r1,
            self.exec.r2,
            self.exec.timer,
        ])
    }

    fn input_ports(&self) -> &[InputPort] {
        &self.x
    }

    fn input_ports_mut(&mut self) -> &mut [InputPort] {
        &mut self.x
    }

    fn output_ports(&self) -> &[OutputPortId] {
        &self.y
    }

    fn output_ports_mut(&mut self) -> &mut [OutputPortId] {
        &mut self.y
    }

    fn persist(&mut self, io: &mut dyn Codec) -> Result<(), ArchiveError> {
        let mut raw = self.id.raw();
        io.u32(&mut raw)?;
        self.id = HsmId::from_raw(raw);

        io.i32(&mut self.exec.i1)?;
        io.i32(&mut self.exec.i2)?;
        io.f64(&mut self.exec.r1)?;
        io.f64(&mut self.exec.r2)?;
        io.f64(&mut self.exec.timer)?;
        persist_source(&mut self.exec.source_value, io)?;
        io.f64(&mut self.sigma)
    }
}
