//! The simulation driver: arenas, wiring, and the initialize / run /
//! finalize loop.

use core_arena::{ArenaId, DataArray};

use crate::compat::is_ports_compatible;
use crate::dynamics::{Dynamics, DynamicsKind};
use crate::env::Env;
use crate::error::{SimulationError, Status};
use crate::message::{Message, Time};
use crate::observer::{self, InterpolateKind, Observer};
use crate::parameter::Parameter;
use crate::port::{BlockNode, Edge, OutputPort};
use crate::scheduler::Scheduler;
use crate::{BlockNodeId, Handle, INVALID_HANDLE, ModelId, ObserverId, OutputPortId};

/// Simulation window `[begin, end)`. `begin < end` is maintained by
/// construction; `expired(t)` is true once `t` reaches `end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeLimit {
    begin: Time,
    end: Time,
}

impl Default for TimeLimit {
    fn default() -> Self {
        Self {
            begin: 0.0,
            end: 100.0,
        }
    }
}

impl TimeLimit {
    pub fn set_bound(&mut self, begin: Time, end: Time) {
        if begin < end {
            if !begin.is_infinite() {
                self.begin = begin;
            }
            if !end.is_nan() {
                self.end = end;
            }
        }
    }

    pub fn set_duration(&mut self, begin: Time, duration: Time) {
        if duration > 0.0 && !begin.is_infinite() {
            self.begin = begin;
            self.end = begin + duration;
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn expired(&self, value: Time) -> bool {
        !(value < self.end)
    }

    pub fn duration(&self) -> Time {
        if self.end.is_infinite() {
            f64::INFINITY
        } else {
            self.end - self.begin
        }
    }

    pub fn begin(&self) -> Time {
        self.begin
    }

    pub fn end(&self) -> Time {
        self.end
    }
}

/// Initial arena capacities.
#[derive(Debug, Clone, Copy)]
pub struct ReserveDefinition {
    pub models: usize,
    pub connections: usize,
    pub hsms: usize,
    pub dated_messages: usize,
}

impl Default for ReserveDefinition {
    fn default() -> Self {
        Self {
            models: 512,
            connections: 1024,
            hsms: 16,
            dated_messages: 256,
        }
    }
}

/// One simulated entity: event bookkeeping, the scheduler handle, an
/// optional observer link, and the inline dynamics payload.
pub struct Model {
    /// Time of the last event.
    pub tl: Time,
    /// Next scheduled event time.
    pub tn: Time,
    pub handle: Handle,
    pub obs: ObserverId,
    pub dynamics: Dynamics,
}

pub struct Simulation {
    pub immediate_models: Vec<ModelId>,
    pub immediate_observers: Vec<ObserverId>,

    pub models: DataArray<Model, ModelId>,
    pub observers: DataArray<Observer, ObserverId>,
    /// Per-slot parameters, indexed by the model's arena index.
    pub parameters: Vec<Parameter>,

    pub sched: Scheduler,
    pub env: Env,
    pub limits: TimeLimit,

    t: Time,
    last_valid_t: Time,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new(ReserveDefinition::default())
    }
}

impl Simulation {
    pub fn new(reserve: ReserveDefinition) -> Self {
        let mut env = Env::new();
        env.output_ports.reserve(reserve.connections);
        env.blocks.reserve(reserve.connections);
        env.dated_messages.reserve(reserve.dated_messages);
        env.hsms.reserve(reserve.hsms);

        let mut models = DataArray::new();
        models.reserve(reserve.models);
        let mut observers = DataArray::new();
        observers.reserve(reserve.models);

        Self {
            immediate_models: Vec::with_capacity(reserve.models),
            immediate_observers: Vec::with_capacity(reserve.models),
            models,
            observers,
            parameters: vec![Parameter::default(); reserve.models],
            sched: Scheduler::with_capacity(reserve.models),
            env,
            limits: TimeLimit::default(),
            t: f64::INFINITY,
            last_valid_t: 0.0,
        }
    }

    pub fn current_time(&self) -> Time {
        self.t
    }

    /// The latest finite simulation time.
    pub fn last_time(&self) -> Time {
        self.last_valid_t
    }

    pub fn set_current_time(&mut self, new_t: Time) {
        if self.limits.begin() <= new_t && new_t < self.limits.end() {
            self.t = new_t;
        }
    }

    // ------------------------------------------------------------------
    // Model lifecycle
    // ------------------------------------------------------------------

    pub fn can_alloc(&self, additional: usize) -> bool {
        self.models.can_alloc(additional)
    }

    /// Allocate a model of `kind` with default parameters.
    pub fn alloc(&mut self, kind: DynamicsKind) -> Result<ModelId, SimulationError> {
        let model = Model {
            tl: 0.0,
            tn: f64::INFINITY,
            handle: INVALID_HANDLE,
            obs: ObserverId::INVALID,
            dynamics: Dynamics::new(kind),
        };

        let id = self
            .models
            .alloc(model)
            .ok_or(SimulationError::ModelsContainerFull)?;

        let index = id.index() as usize;
        if self.parameters.len() <= index {
            self.parameters.resize(index + 1, Parameter::default());
        }
        self.parameters[index].init_from(kind);

        Ok(id)
    }

    /// Duplicate a model's payload and parameters. Connections, the heap
    /// node and the observer link are not copied.
    pub fn clone_model(&mut self, id: ModelId) -> Result<ModelId, SimulationError> {
        let source = self.models.get(id).ok_or(SimulationError::ModelUnknown)?;
        let mut dynamics = source.dynamics.clone();
        let parameter = self.parameters[id.index() as usize];

        for port in dynamics.input_ports_mut() {
            port.reset();
        }
        for port in dynamics.output_ports_mut() {
            *port = OutputPortId::INVALID;
        }

        let model = Model {
            tl: 0.0,
            tn: f64::INFINITY,
            handle: INVALID_HANDLE,
            obs: ObserverId::INVALID,
            dynamics,
        };

        let new_id = self
            .models
            .alloc(model)
            .ok_or(SimulationError::ModelsContainerFull)?;

        let index = new_id.index() as usize;
        if self.parameters.len() <= index {
            self.parameters.resize(index + 1, Parameter::default());
        }
        self.parameters[index] = parameter;

        Ok(new_id)
    }

    /// Remove a model: detach its observer, release its output ports and
    /// overflow blocks, free its heap node and its arena slot. Edges held
    /// by other models towards it go stale and are swept during the next
    /// fan-out that visits them.
    pub fn deallocate(&mut self, id: ModelId) -> Status {
        self.unobserve(id);

        let Some(model) = self.models.get_mut(id) else {
            return Err(SimulationError::ModelUnknown);
        };

        for index in 0..model.dynamics.output_ports().len() {
            let y_id = model.dynamics.output_ports()[index];
            if let Some(port) = self.env.output_ports.free(y_id) {
                let mut block_id = port.next;
                while let Some(block) = self.env.blocks.free(block_id) {
                    block_id = block.next;
                }
            }
            model.dynamics.output_ports_mut()[index] = OutputPortId::INVALID;
        }

        // The queue family owns a dated-message ring.
        match &mut model.dynamics {
            Dynamics::Queue(queue) => {
                self.env.dated_messages.free(queue.fifo);
            }
            Dynamics::DynamicQueue(queue) => {
                self.env.dated_messages.free(queue.fifo);
            }
            Dynamics::PriorityQueue(queue) => {
                self.env.dated_messages.free(queue.fifo);
            }
            _ => {}
        }

        self.sched.free(model);
        self.models.free(id);
        Ok(())
    }

    pub fn parameter(&self, id: ModelId) -> Option<&Parameter> {
        self.models.get(id)?;
        self.parameters.get(id.index() as usize)
    }

    pub fn parameter_mut(&mut self, id: ModelId) -> Option<&mut Parameter> {
        self.models.get(id)?;
        self.parameters.get_mut(id.index() as usize)
    }

    pub fn set_parameter(&mut self, id: ModelId, parameter: Parameter) {
        if self.models.contains(id) {
            let index = id.index() as usize;
            if self.parameters.len() <= index {
                self.parameters.resize(index + 1, Parameter::default());
            }
            self.parameters[index] = parameter;
        }
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Attach a fresh observer sampling at `time_step`, replacing any
    /// observer already watching the model. The interpolation order follows
    /// the model's QSS level.
    pub fn observe(&mut self, id: ModelId, time_step: f64) -> Result<ObserverId, SimulationError> {
        let kind = {
            let model = self.models.get(id).ok_or(SimulationError::ModelUnknown)?;
            InterpolateKind::from_qss_level(model.dynamics.qss_level())
        };
        self.unobserve(id);

        let obs_id = self
            .observers
            .alloc(Observer::new(id, kind, time_step))
            .ok_or(SimulationError::ObserversContainerFull)?;

        let model = self.models.get_mut(id).expect("checked above");
        model.obs = obs_id;
        Ok(obs_id)
    }

    pub fn unobserve(&mut self, id: ModelId) {
        if let Some(model) = self.models.get_mut(id) {
            if model.obs.is_defined() {
                self.observers.free(model.obs);
                model.obs = ObserverId::INVALID;
            }
        }
    }

    // ------------------------------------------------------------------
    // Wiring
    // ------------------------------------------------------------------

    /// Whether `connect` with the same arguments would succeed.
    pub fn can_connect(&self, src: ModelId, src_port: u8, dst: ModelId, dst_port: u8) -> bool {
        self.check_connection(src, src_port, dst, dst_port).is_ok()
    }

    fn check_connection(
        &self,
        src: ModelId,
        src_port: u8,
        dst: ModelId,
        dst_port: u8,
    ) -> Status {
        if src == dst {
            return Err(SimulationError::ConnectionIncompatible);
        }

        let src_model = self.models.get(src).ok_or(SimulationError::ModelUnknown)?;
        let dst_model = self.models.get(dst).ok_or(SimulationError::ModelUnknown)?;

        if src_port as usize >= src_model.dynamics.output_ports().len() {
            return Err(SimulationError::OutputPortUnknown);
        }
        if dst_port as usize >= dst_model.dynamics.input_ports().len() {
            return Err(SimulationError::InputPortUnknown);
        }

        if !is_ports_compatible(
            src_model.dynamics.kind(),
            src_port,
            dst_model.dynamics.kind(),
            dst_port,
        ) {
            return Err(SimulationError::ConnectionIncompatible);
        }

        let edge = Edge {
            model: dst,
            port: dst_port,
        };
        let y_id = src_model.dynamics.output_ports()[src_port as usize];
        if let Some(port) = self.env.output_ports.get(y_id) {
            if port.edges.contains(&edge) {
                return Err(SimulationError::ConnectionAlreadyExists);
            }
            let mut block_id = port.next;
            while let Some(block) = self.env.blocks.get(block_id) {
                if block.edges.contains(&edge) {
                    return Err(SimulationError::ConnectionAlreadyExists);
                }
                block_id = block.next;
            }
        }

        Ok(())
    }

    /// Create the edge `src.y[src_port] -> dst.x[dst_port]`.
    pub fn connect(&mut self, src: ModelId, src_port: u8, dst: ModelId, dst_port: u8) -> Status {
        self.check_connection(src, src_port, dst, dst_port)?;

        // Materialize the output port on first use.
        let y_id = {
            let src_model = self.models.get(src).expect("checked");
            src_model.dynamics.output_ports()[src_port as usize]
        };
        let y_id = if self.env.output_ports.get(y_id).is_some() {
            y_id
        } else {
            let new_id = self
                .env
                .output_ports
                .alloc(OutputPort::default())
                .ok_or(SimulationError::ConnectionContainerFull)?;
            let src_model = self.models.get_mut(src).expect("checked");
            src_model.dynamics.output_ports_mut()[src_port as usize] = new_id;
            new_id
        };

        let edge = Edge {
            model: dst,
            port: dst_port,
        };

        let port = self.env.output_ports.get_mut(y_id).expect("just ensured");
        if port.edges.push(edge) {
            tracing::trace!(target: "sim.wiring", ?src, src_port, ?dst, dst_port, "connect");
            return Ok(());
        }

        // Inline array full: find room in the overflow chain.
        let mut last = None;
        let mut block_id = port.next;
        while let Some(block) = self.env.blocks.get_mut(block_id) {
            if block.edges.push(edge) {
                tracing::trace!(target: "sim.wiring", ?src, src_port, ?dst, dst_port, "connect");
                return Ok(());
            }
            last = Some(block_id);
            block_id = block.next;
        }

        // Every block is full (or none exists): append a new one.
        let mut new_block = BlockNode::default();
        new_block.edges.push(edge);
        let new_id = self
            .env
            .blocks
            .alloc(new_block)
            .ok_or(SimulationError::ConnectionContainerFull)?;

        match last {
            Some(last_id) => {
                self.env.blocks.get_mut(last_id).expect("walked above").next = new_id;
            }
            None => {
                self.env.output_ports.get_mut(y_id).expect("ensured").next = new_id;
            }
        }

        tracing::trace!(target: "sim.wiring", ?src, src_port, ?dst, dst_port, "connect");
        Ok(())
    }

    /// Remove the first matching edge; empty overflow blocks are freed and
    /// the chain is compacted. Removing an absent edge is a no-op.
    pub fn disconnect(&mut self, src: ModelId, src_port: u8, dst: ModelId, dst_port: u8) -> Status {
        let src_model = self.models.get(src).ok_or(SimulationError::ModelUnknown)?;
        if src_port as usize >= src_model.dynamics.output_ports().len() {
            return Err(SimulationError::OutputPortUnknown);
        }

        let y_id = src_model.dynamics.output_ports()[src_port as usize];
        let Some(port) = self.env.output_ports.get_mut(y_id) else {
            return Ok(());
        };

        let edge = Edge {
            model: dst,
            port: dst_port,
        };

        for i in 0..port.edges.len() {
            if port.edges.get(i) == Some(edge) {
                port.edges.swap_remove(i);
                tracing::trace!(target: "sim.wiring", ?src, src_port, ?dst, dst_port, "disconnect");
                return Ok(());
            }
        }

        let mut prev: Option<BlockNodeId> = None;
        let mut cur = port.next;
        loop {
            let Some(block) = self.env.blocks.get_mut(cur) else {
                break;
            };

            let mut removed = false;
            for i in 0..block.edges.len() {
                if block.edges.get(i) == Some(edge) {
                    block.edges.swap_remove(i);
                    removed = true;
                    break;
                }
            }

            let next = block.next;
            let emptied = removed && block.edges.is_empty();

            if emptied {
                match prev {
                    Some(prev_id) => {
                        self.env.blocks.get_mut(prev_id).expect("walked").next = next;
                    }
                    None => {
                        self.env
                            .output_ports
                            .get_mut(y_id)
                            .expect("held above")
                            .next = next;
                    }
                }
                self.env.blocks.free(cur);
            }

            if removed {
                tracing::trace!(target: "sim.wiring", ?src, src_port, ?dst, dst_port, "disconnect");
                return Ok(());
            }

            prev = Some(cur);
            cur = next;
        }

        Ok(())
    }

    // ------------------------------------------------------------------
    // Driving
    // ------------------------------------------------------------------

    /// Reset every transient container, recompute HSM source-usage flags,
    /// run every model's `initialize`, schedule them, and prime observers
    /// with an initial snapshot.
    pub fn initialize(&mut self) -> Status {
        self.t = self.limits.begin();
        self.last_valid_t = self.t;

        self.sched.clear();
        self.immediate_models.clear();
        self.immediate_observers.clear();
        self.env.active_output_ports.clear();
        self.env.message_buffer.clear();
        self.env.dated_messages.clear();

        for (_, machine) in self.env.hsms.iter_mut() {
            let uses = machine.compute_is_using_source();
            machine
                .flags
                .set(core_hsm::MachineOptions::USE_SOURCE, uses);
        }

        tracing::debug!(
            target: "sim.driver",
            models = self.models.len(),
            begin = self.limits.begin(),
            end = self.limits.end(),
            "initialize"
        );

        let ids: Vec<ModelId> = self.models.ids().collect();
        for id in ids {
            self.make_initialize(id)?;
        }

        let t = self.t;
        let Simulation {
            models, observers, ..
        } = self;
        for (_, obs) in observers.iter_mut() {
            obs.reset();
            if let Some(model) = models.get(obs.model) {
                obs.update(model.dynamics.observation(t, t - model.tl));
            }
        }

        Ok(())
    }

    fn make_initialize(&mut self, id: ModelId) -> Status {
        let t = self.t;
        let Simulation {
            models,
            parameters,
            sched,
            env,
            ..
        } = self;

        let model = models.get_mut(id).ok_or(SimulationError::ModelUnknown)?;

        for port in model.dynamics.input_ports_mut() {
            port.reset();
        }

        parameters[id.index() as usize].copy_to(model);
        model.dynamics.initialize(env)?;

        model.tl = t;
        model.tn = t + model.dynamics.sigma();
        model.handle = INVALID_HANDLE;
        sched.alloc(model, id, model.tn);
        Ok(())
    }

    /// One step: advance to the earliest event time, transition every model
    /// tied there, then fan their staged messages out. Returns with
    /// `t = +inf` on an empty schedule and clamps to the limit end without
    /// transitioning when the window is exhausted.
    pub fn run(&mut self) -> Status {
        debug_assert!(self.t.is_finite());

        self.immediate_models.clear();
        self.immediate_observers.clear();

        if self.sched.is_empty() {
            self.t = f64::INFINITY;
            return Ok(());
        }

        self.last_valid_t = self.t;
        self.t = self.sched.tn();

        if self.limits.expired(self.t) {
            self.t = self.limits.end();
            return Ok(());
        }

        let t = self.t;
        self.sched.pop(&mut self.immediate_models);
        self.env.active_output_ports.clear();

        for index in 0..self.immediate_models.len() {
            let id = self.immediate_models[index];
            self.make_transition(id, t)?;
        }

        self.fan_out(t)?;

        // Full observers are linearized eagerly so the raw rings never
        // drop data between steps.
        for index in 0..self.immediate_observers.len() {
            let id = self.immediate_observers[index];
            if let Some(obs) = self.observers.get_mut(id) {
                observer::write_interpolated(obs);
            }
        }

        Ok(())
    }

    fn make_transition(&mut self, id: ModelId, t: Time) -> Status {
        let Simulation {
            models,
            observers,
            immediate_observers,
            sched,
            env,
            ..
        } = self;

        let Some(model) = models.get_mut(id) else {
            return Ok(());
        };

        if model.obs.is_defined() {
            match observers.get_mut(model.obs) {
                Some(obs) => {
                    obs.update(model.dynamics.observation(t, t - model.tl));
                    if obs.full() {
                        immediate_observers.push(model.obs);
                    }
                }
                None => model.obs = ObserverId::INVALID,
            }
        }

        // λ only when the model is due; a model woken purely by incoming
        // messages was decreased in the heap without touching its tn.
        if model.tn == sched.tn_of(model.handle) {
            model.dynamics.lambda(env)?;
        }

        model.dynamics.transition(env, t, t - model.tl, model.tn - t)?;

        for port in model.dynamics.input_ports_mut() {
            port.reset();
        }

        debug_assert!(model.tn >= t);
        model.tl = t;

        let sigma = model.dynamics.sigma();
        model.tn = t + sigma;
        // A tiny non-zero sigma can round tn onto t; nudge forward so the
        // scheduler keeps strictly advancing for non-immediate models.
        if sigma != 0.0 && model.tn == t {
            model.tn = t.next_up();
        }

        debug_assert!(!sched.is_in_tree(model.handle));
        sched.reintegrate(model, model.tn);
        Ok(())
    }

    /// Deliver staged output messages. Sub-pass A sizes each target input
    /// port's capacity; sub-pass B assigns contiguous buffer slots, copies
    /// the messages in and re-wakes each touched target at `t`.
    fn fan_out(&mut self, t: Time) -> Status {
        let Simulation {
            models, sched, env, ..
        } = self;
        let Env {
            message_buffer,
            output_ports,
            blocks,
            active_output_ports,
            ..
        } = env;

        let mut total: u32 = 0;
        for index in 0..active_output_ports.len() {
            let y_id = active_output_ports[index];
            let Some(port) = output_ports.get_mut(y_id) else {
                continue;
            };

            sweep_edges(port, blocks, models, |model, port_index| {
                if let Some(x) = model
                    .dynamics
                    .input_ports_mut()
                    .get_mut(port_index as usize)
                {
                    x.capacity += 1;
                    x.position = 0;
                    x.size = 0;
                    total += 1;
                }
            });
        }

        message_buffer.clear();
        if message_buffer.try_reserve(total as usize).is_err() {
            return Err(SimulationError::MessagesContainerFull);
        }
        message_buffer.resize(total as usize, Message::default());

        let mut position: u32 = 0;
        for index in 0..active_output_ports.len() {
            let y_id = active_output_ports[index];
            let Some(port) = output_ports.get_mut(y_id) else {
                continue;
            };
            let msg = port.msg;

            sweep_edges(port, blocks, models, |model, port_index| {
                let slot;
                let mut wake = false;
                {
                    let Some(x) = model
                        .dynamics
                        .input_ports_mut()
                        .get_mut(port_index as usize)
                    else {
                        return;
                    };

                    if x.size == 0 {
                        x.position = position;
                        position += x.capacity as u32;
                        wake = true;
                    }
                    slot = (x.position + x.size as u32) as usize;
                    x.size += 1;
                }

                if wake {
                    sched.update(model, t);
                }
                message_buffer[slot] = msg;
            });
        }

        Ok(())
    }

    /// Sample every observed model one last time, run the dynamics
    /// `finalize` hooks (queues drop their rings, sources release their
    /// chunks), flush every observer through the interpolation path and
    /// close provider files.
    pub fn finalize(&mut self) -> Status {
        let t = if self.t.is_finite() {
            self.t
        } else {
            self.last_valid_t
        };

        let ids: Vec<ModelId> = self.models.ids().collect();
        for id in ids {
            let Simulation {
                models,
                observers,
                env,
                ..
            } = self;
            let Some(model) = models.get_mut(id) else {
                continue;
            };

            if model.obs.is_defined() {
                if let Some(obs) = observers.get_mut(model.obs) {
                    obs.update(model.dynamics.observation(t, t - model.tl));
                }
            }

            model.dynamics.finalize(env)?;
        }

        for (_, obs) in self.observers.iter_mut() {
            observer::flush_interpolated(obs);
        }

        self.env.srcs.finalize();

        tracing::debug!(target: "sim.driver", t, "finalize");
        Ok(())
    }
}

/// Visit every live edge of `port` exactly once, sweeping stale targets
/// and freeing emptied overflow blocks along the way. Edges freed from a
/// block refill the inline array when room opened up.
fn sweep_edges(
    port: &mut OutputPort,
    blocks: &mut DataArray<BlockNode, BlockNodeId>,
    models: &mut DataArray<Model, ModelId>,
    mut visit: impl FnMut(&mut Model, u8),
) {
    let mut i = 0;
    while i < port.edges.len() {
        let edge = port.edges.get(i).expect("index in range");
        match models.get_mut(edge.model) {
            Some(model) => {
                visit(model, edge.port);
                i += 1;
            }
            None => port.edges.swap_remove(i),
        }
    }

    let mut prev: Option<BlockNodeId> = None;
    let mut cur = port.next;
    loop {
        let Some(block) = blocks.get_mut(cur) else {
            break;
        };

        let mut i = 0;
        while i < block.edges.len() {
            let edge = block.edges.get(i).expect("index in range");
            match models.get_mut(edge.model) {
                Some(model) => {
                    visit(model, edge.port);
                    i += 1;
                }
                None => block.edges.swap_remove(i),
            }
        }

        // Promote overflow edges into freed inline slots.
        while !block.edges.is_empty() && !port.edges.is_full() {
            if let Some(edge) = block.edges.pop() {
                port.edges.push(edge);
            }
        }

        let next = block.next;
        let emptied = block.edges.is_empty();

        if emptied {
            match prev {
                Some(prev_id) => {
                    if let Some(prev_block) = blocks.get_mut(prev_id) {
                        prev_block.next = next;
                    }
                }
                None => port.next = next,
            }
            blocks.free(cur);
        } else {
            prev = Some(cur);
        }

        cur = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_limit_guards_bounds() {
        let mut limits = TimeLimit::default();
        limits.set_bound(5.0, 2.0); // ignored, begin >= end
        assert_eq!(limits.begin(), 0.0);
        assert_eq!(limits.end(), 100.0);

        limits.set_bound(1.0, 9.0);
        assert_eq!(limits.begin(), 1.0);
        assert_eq!(limits.end(), 9.0);
        assert!(limits.expired(9.0));
        assert!(!limits.expired(8.999));
        assert_eq!(limits.duration(), 8.0);

        limits.set_duration(2.0, 3.0);
        assert_eq!(limits.end(), 5.0);
    }

    #[test]
    fn alloc_assigns_default_parameters() {
        let mut sim = Simulation::default();
        let id = sim.alloc(DynamicsKind::Qss1Wsum2).unwrap();
        assert_eq!(sim.parameter(id).unwrap().reals[0], 1.0);

        let id = sim.alloc(DynamicsKind::Queue).unwrap();
        assert_eq!(sim.parameter(id).unwrap().reals[0], 1.0);
    }

    #[test]
    fn connect_rejects_self_and_bad_ports() {
        let mut sim = Simulation::default();
        let a = sim.alloc(DynamicsKind::Constant).unwrap();
        let b = sim.alloc(DynamicsKind::Counter).unwrap();

        assert!(matches!(
            sim.connect(a, 0, a, 0),
            Err(SimulationError::ConnectionIncompatible)
        ));
        assert!(matches!(
            sim.connect(a, 3, b, 0),
            Err(SimulationError::OutputPortUnknown)
        ));
        assert!(matches!(
            sim.connect(a, 0, b, 5),
            Err(SimulationError::InputPortUnknown)
        ));

        sim.connect(a, 0, b, 0).unwrap();
        assert!(matches!(
            sim.connect(a, 0, b, 0),
            Err(SimulationError::ConnectionAlreadyExists)
        ));
    }

    #[test]
    fn connect_then_disconnect_restores_prior_state() {
        let mut sim = Simulation::default();
        let src = sim.alloc(DynamicsKind::Constant).unwrap();
        let sinks: Vec<ModelId> = (0..7)
            .map(|_| sim.alloc(DynamicsKind::Counter).unwrap())
            .collect();

        // Fill the inline array and two overflow blocks.
        for sink in &sinks {
            sim.connect(src, 0, *sink, 0).unwrap();
        }
        for sink in &sinks {
            assert!(!sim.can_connect(src, 0, *sink, 0), "duplicate must be seen");
        }

        for sink in &sinks {
            sim.disconnect(src, 0, *sink, 0).unwrap();
        }
        for sink in &sinks {
            assert!(sim.can_connect(src, 0, *sink, 0));
        }

        // All overflow blocks are gone.
        assert_eq!(sim.env.blocks.len(), 0);
    }

    #[test]
    fn deallocate_releases_ports_and_blocks() {
        let mut sim = Simulation::default();
        let src = sim.alloc(DynamicsKind::Constant).unwrap();
        let sinks: Vec<ModelId> = (0..6)
            .map(|_| sim.alloc(DynamicsKind::Counter).unwrap())
            .collect();
        for sink in &sinks {
            sim.connect(src, 0, *sink, 0).unwrap();
        }

        assert!(sim.env.output_ports.len() == 1);
        sim.deallocate(src).unwrap();
        assert_eq!(sim.env.output_ports.len(), 0);
        assert_eq!(sim.env.blocks.len(), 0);
        assert!(!sim.models.contains(src));
    }

    #[test]
    fn empty_schedule_runs_to_infinity() {
        let mut sim = Simulation::default();
        sim.initialize().unwrap();
        sim.run().unwrap();
        assert!(sim.current_time().is_infinite());
    }
}
