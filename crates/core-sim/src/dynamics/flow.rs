//! Discrete-event atoms: counting, gated accumulation, constants,
//! generators, time samplers, the queue family and the logical gates.

use core_arena::{ArenaId, RingBuffer};
use core_source::Source;

use crate::archive::{ArchiveError, Codec, persist_source};
use crate::dynamics::{Atom, DATED_RING_CAPACITY};
use crate::env::Env;
use crate::error::{SimulationError, Status};
use crate::message::{DatedMessage, ObservationMessage, Time};
use crate::port::InputPort;
use crate::{DatedMessageId, OutputPortId};

/// Counts incoming messages; saturates instead of wrapping.
#[derive(Debug, Clone)]
pub struct Counter {
    pub x: [InputPort; 1],

    pub number: i64,
    pub last_value: f64,
    pub sigma: Time,
}

impl Default for Counter {
    fn default() -> Self {
        Self {
            x: Default::default(),
            number: 0,
            last_value: 0.0,
            sigma: f64::INFINITY,
        }
    }
}

impl Atom for Counter {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        self.number = 0;
        self.last_value = 0.0;
        self.sigma = f64::INFINITY;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, _e: Time, _r: Time) -> Status {
        let port = self.x[0];
        if !port.is_empty() {
            self.number = self.number.saturating_add(port.len() as i64);
            if let Some(msg) = env.qss_message(port, 1) {
                self.last_value = msg.value();
            }
        }
        Ok(())
    }

    fn observation(&self, t: Time, _e: Time) -> ObservationMessage {
        ObservationMessage::time_value(t, self.number as f64)
    }

    fn input_ports(&self) -> &[InputPort] {
        &self.x
    }

    fn input_ports_mut(&mut self) -> &mut [InputPort] {
        &mut self.x
    }

    fn persist(&mut self, io: &mut dyn Codec) -> Result<(), ArchiveError> {
        io.i64(&mut self.number)?;
        io.f64(&mut self.last_value)?;
        io.f64(&mut self.sigma)
    }
}

/// Gated adder: ports 0/1 trigger, ports 2/3 carry the value added when the
/// matching trigger is non-zero.
#[derive(Debug, Clone)]
pub struct Accumulator2 {
    pub x: [InputPort; 4],

    pub number: f64,
    pub numbers: [f64; 2],
    pub sigma: Time,
}

impl Default for Accumulator2 {
    fn default() -> Self {
        Self {
            x: Default::default(),
            number: 0.0,
            numbers: [0.0; 2],
            sigma: f64::INFINITY,
        }
    }
}

impl Atom for Accumulator2 {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        self.number = 0.0;
        self.numbers = [0.0; 2];
        self.sigma = f64::INFINITY;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, _e: Time, _r: Time) -> Status {
        for i in 0..2 {
            let port = self.x[i + 2];
            if !port.is_empty() {
                self.numbers[i] = env.message(port, 0).value();
            }
        }

        for i in 0..2 {
            let port = self.x[i];
            if !port.is_empty() && env.message(port, 0).value() != 0.0 {
                self.number += self.numbers[i];
            }
        }
        Ok(())
    }

    fn observation(&self, t: Time, _e: Time) -> ObservationMessage {
        ObservationMessage::time_value(t, self.number)
    }

    fn input_ports(&self) -> &[InputPort] {
        &self.x
    }

    fn input_ports_mut(&mut self) -> &mut [InputPort] {
        &mut self.x
    }

    fn persist(&mut self, io: &mut dyn Codec) -> Result<(), ArchiveError> {
        io.f64(&mut self.number)?;
        io.f64s(&mut self.numbers)?;
        io.f64(&mut self.sigma)
    }
}

/// Emits `value` once at `offset`, then sleeps forever.
#[derive(Debug, Clone)]
pub struct Constant {
    pub y: [OutputPortId; 1],

    pub value: f64,
    pub offset: Time,
    pub sigma: Time,
}

impl Default for Constant {
    fn default() -> Self {
        Self {
            y: Default::default(),
            value: 0.0,
            offset: 0.0,
            sigma: f64::INFINITY,
        }
    }
}

impl Atom for Constant {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        if !self.value.is_finite() {
            return Err(SimulationError::ConstantValue);
        }
        if !self.offset.is_finite() || self.offset < 0.0 {
            return Err(SimulationError::ConstantOffset);
        }

        self.sigma = self.offset;
        Ok(())
    }

    fn transition(&mut self, _env: &mut Env, _t: Time, _e: Time, _r: Time) -> Status {
        self.sigma = f64::INFINITY;
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        env.send(self.y[0], self.value)
    }

    fn observation(&self, t: Time, _e: Time) -> ObservationMessage {
        ObservationMessage::time_value(t, self.value)
    }

    fn output_ports(&self) -> &[OutputPortId] {
        &self.y
    }

    fn output_ports_mut(&mut self) -> &mut [OutputPortId] {
        &mut self.y
    }

    fn persist(&mut self, io: &mut dyn Codec) -> Result<(), ArchiveError> {
        io.f64(&mut self.value)?;
        io.f64(&mut self.offset)?;
        io.f64(&mut self.sigma)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum TimeFuncKind {
    Sine = 0,
    Square = 1,
    #[default]
    Linear = 2,
}

impl TimeFuncKind {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => TimeFuncKind::Sine,
            1 => TimeFuncKind::Square,
            _ => TimeFuncKind::Linear,
        }
    }
}

/// Samples a function of simulation time on a fixed timestep.
#[derive(Debug, Clone)]
pub struct TimeFunc {
    pub y: [OutputPortId; 1],

    pub offset: Time,
    pub timestep: Time,
    pub value: f64,
    pub sigma: Time,
    pub function: TimeFuncKind,
}

impl Default for TimeFunc {
    fn default() -> Self {
        Self {
            y: Default::default(),
            offset: 0.0,
            timestep: 0.01,
            value: 0.0,
            sigma: f64::INFINITY,
            function: TimeFuncKind::Linear,
        }
    }
}

impl TimeFunc {
    fn call(&self, t: Time) -> f64 {
        match self.function {
            TimeFuncKind::Sine => (2.0 * 0.1 * core::f64::consts::PI * t).sin(),
            TimeFuncKind::Square => t * t,
            TimeFuncKind::Linear => t,
        }
    }
}

impl Atom for TimeFunc {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        if !self.offset.is_finite() || self.offset < 0.0 {
            return Err(SimulationError::TimeFuncOffset);
        }
        if !self.timestep.is_finite() || self.timestep <= 0.0 {
            return Err(SimulationError::TimeFuncTimestep);
        }

        self.sigma = self.offset;
        self.value = 0.0;
        Ok(())
    }

    fn transition(&mut self, _env: &mut Env, t: Time, _e: Time, _r: Time) -> Status {
        self.value = self.call(t);
        self.sigma = self.timestep;
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        env.send(self.y[0], self.value)
    }

    fn observation(&self, t: Time, _e: Time) -> ObservationMessage {
        ObservationMessage::time_value(t, self.value)
    }

    fn output_ports(&self) -> &[OutputPortId] {
        &self.y
    }

    fn output_ports_mut(&mut self) -> &mut [OutputPortId] {
        &mut self.y
    }

    fn persist(&mut self, io: &mut dyn Codec) -> Result<(), ArchiveError> {
        io.f64(&mut self.offset)?;
        io.f64(&mut self.timestep)?;
        io.f64(&mut self.value)?;
        io.f64(&mut self.sigma)?;

        let mut kind = self.function as u8;
        io.u8(&mut kind)?;
        self.function = TimeFuncKind::from_u8(kind);
        Ok(())
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct GeneratorOptions: u8 {
        /// Pull the time advance from the mounted `source_ta`.
        const TA_USE_SOURCE = 0b0000_0001;
        /// Pull emitted values from the mounted `source_value`.
        const VALUE_USE_SOURCE = 0b0000_0010;
    }
}

/// Event generator. The emitted value and the inter-event delay each come
/// either from an external source or from the configured constants. Input
/// ports can override the value (port 0), force the next emission time
/// (port 1), or stretch the remaining delay additively (port 2) or
/// multiplicatively (port 3).
#[derive(Debug, Clone)]
pub struct Generator {
    pub x: [InputPort; 4],
    pub y: [OutputPortId; 1],

    pub sigma: Time,
    pub value: f64,
    pub default_ta: Time,
    pub default_value: f64,

    pub source_ta: Source,
    pub source_value: Source,
    pub flags: GeneratorOptions,
}

pub(crate) const GENERATOR_PORT_VALUE: usize = 0;
pub(crate) const GENERATOR_PORT_T: usize = 1;
pub(crate) const GENERATOR_PORT_ADD_TR: usize = 2;
pub(crate) const GENERATOR_PORT_MULT_TR: usize = 3;

impl Default for Generator {
    fn default() -> Self {
        Self {
            x: Default::default(),
            y: Default::default(),
            sigma: f64::INFINITY,
            value: 0.0,
            default_ta: f64::INFINITY,
            default_value: 0.0,
            source_ta: Source::default(),
            source_value: Source::default(),
            flags: GeneratorOptions::empty(),
        }
    }
}

fn check_ta(ta: Time) -> Status {
    if ta.is_nan() || ta.is_sign_negative() {
        return Err(SimulationError::TaAbnormal);
    }
    Ok(())
}

impl Atom for Generator {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, env: &mut Env) -> Status {
        if self.flags.contains(GeneratorOptions::TA_USE_SOURCE) {
            env.srcs
                .initialize(&mut self.source_ta)
                .map_err(|_| SimulationError::GeneratorTaInit)?;
            self.sigma = self.source_ta.next();
            if !self.sigma.is_finite() || self.sigma.is_sign_negative() {
                return Err(SimulationError::TaAbnormal);
            }
        } else {
            check_ta(self.default_ta)?;
            self.sigma = self.default_ta;
        }

        if self.flags.contains(GeneratorOptions::VALUE_USE_SOURCE) {
            env.srcs
                .initialize(&mut self.source_value)
                .map_err(|_| SimulationError::GeneratorValueInit)?;
            self.value = self.source_value.next();
        } else {
            self.value = self.default_value;
        }

        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, _e: Time, r: Time) -> Status {
        let mut value_overridden = false;

        let port_value = self.x[GENERATOR_PORT_VALUE];
        if !port_value.is_empty() {
            // The last override wins.
            self.value = env.message(port_value, port_value.len() - 1).value();
            self.sigma = r;
            value_overridden = true;
        }

        if r == 0.0 {
            // Internal event: refresh value and delay for the next emission.
            if self.flags.contains(GeneratorOptions::VALUE_USE_SOURCE) && !value_overridden {
                self.value = env.srcs.update(&mut self.source_value)?;
            }

            if self.flags.contains(GeneratorOptions::TA_USE_SOURCE) {
                self.sigma = env.srcs.update(&mut self.source_ta)?;
                if !self.sigma.is_finite() || self.sigma.is_sign_negative() {
                    return Err(SimulationError::TaAbnormal);
                }
            } else {
                self.sigma = self.default_ta;
            }
        }

        let port_t = self.x[GENERATOR_PORT_T];
        let mut forced_t = f64::INFINITY;
        for i in 0..port_t.len() {
            forced_t = env.message(port_t, i).value().min(forced_t);
        }

        let port_add = self.x[GENERATOR_PORT_ADD_TR];
        let mut add_tr = f64::INFINITY;
        for i in 0..port_add.len() {
            add_tr = env.message(port_add, i).value().min(add_tr);
        }

        let port_mult = self.x[GENERATOR_PORT_MULT_TR];
        let mut mult_tr = 0.0f64;
        for i in 0..port_mult.len() {
            mult_tr = env.message(port_mult, i).value().max(mult_tr);
        }

        if !(port_t.is_empty() && port_add.is_empty() && port_mult.is_empty()) {
            if !port_t.is_empty() && forced_t.is_finite() && forced_t >= 0.0 {
                self.sigma = forced_t;
            } else {
                if add_tr.is_finite() {
                    self.sigma = r + add_tr;
                }
                if mult_tr.is_normal() {
                    self.sigma = r * mult_tr;
                }
            }
        }

        if self.sigma < 0.0 {
            self.sigma = 0.0;
        }
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        env.send(self.y[0], self.value)
    }

    fn observation(&self, t: Time, _e: Time) -> ObservationMessage {
        ObservationMessage::time_value(t, self.value)
    }

    fn finalize(&mut self, env: &mut Env) -> Status {
        if self.flags.contains(GeneratorOptions::TA_USE_SOURCE) {
            env.srcs.finalize_handle(&mut self.source_ta)?;
        }
        if self.flags.contains(GeneratorOptions::VALUE_USE_SOURCE) {
            env.srcs.finalize_handle(&mut self.source_value)?;
        }
        Ok(())
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
        io.f64(&mut self.sigma)?;
        io.f64(&mut self.value)?;
        io.f64(&mut self.default_ta)?;
        io.f64(&mut self.default_value)?;

        let mut flags = self.flags.bits();
        io.u8(&mut flags)?;
        self.flags = GeneratorOptions::from_bits_truncate(flags);

        persist_source(&mut self.source_ta, io)?;
        persist_source(&mut self.source_value, io)
    }
}

/// Get the ring for `fifo`, allocating it on first use.
fn ensure_ring(
    env: &mut Env,
    fifo: &mut DatedMessageId,
) -> Result<(), SimulationError> {
    if env.dated_messages.get(*fifo).is_some() {
        return Ok(());
    }

    *fifo = env
        .dated_messages
        .alloc(RingBuffer::new(DATED_RING_CAPACITY))
        .ok_or(SimulationError::DatedMessagesFull)?;
    Ok(())
}

fn release_ring(env: &mut Env, fifo: &mut DatedMessageId) {
    if env.dated_messages.get(*fifo).is_some() {
        env.dated_messages.free(*fifo);
    }
    *fifo = DatedMessageId::INVALID;
}

/// Drop entries due at or before `t`; they were emitted by the λ of this
/// step. The ring is not necessarily wakeup-sorted (the dynamic queue keeps
/// arrival order), so the whole ring is filtered.
fn drain_due(env: &mut Env, fifo: DatedMessageId, t: Time) {
    if let Some(ring) = env.dated_messages.get_mut(fifo) {
        ring.retain(|m| m.wakeup() > t);
    }
}

/// Time until the earliest queued wakeup, clamped non-negative.
fn next_wakeup_delta(env: &Env, fifo: DatedMessageId, t: Time) -> Time {
    let Some(ring) = env.dated_messages.get(fifo) else {
        return f64::INFINITY;
    };

    ring.iter()
        .map(|m| (m.wakeup() - t).max(0.0))
        .fold(f64::INFINITY, f64::min)
}

/// Emit every entry sharing the earliest wakeup time, in ring order.
fn emit_due(env: &mut Env, fifo: DatedMessageId, y: OutputPortId) -> Status {
    let Env {
        dated_messages,
        output_ports,
        active_output_ports,
        ..
    } = env;

    let Some(ring) = dated_messages.get(fifo) else {
        return Ok(());
    };

    let due_until = ring
        .iter()
        .map(DatedMessage::wakeup)
        .fold(f64::INFINITY, f64::min);
    if due_until.is_infinite() {
        return Ok(());
    }

    for entry in ring.iter() {
        if entry.wakeup() <= due_until {
            Env::send_parts(output_ports, active_output_ports, y, entry.message())?;
        }
    }
    Ok(())
}

/// FIFO with a fixed hold delay.
#[derive(Debug, Clone)]
pub struct Queue {
    pub x: [InputPort; 1],
    pub y: [OutputPortId; 1],

    pub sigma: Time,
    pub fifo: DatedMessageId,
    pub ta: Time,
}

impl Default for Queue {
    fn default() -> Self {
        Self {
            x: Default::default(),
            y: Default::default(),
            sigma: f64::INFINITY,
            fifo: DatedMessageId::INVALID,
            ta: 1.0,
        }
    }
}

impl Atom for Queue {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        if self.ta <= 0.0 {
            return Err(SimulationError::QueueTa);
        }

        self.sigma = f64::INFINITY;
        self.fifo = DatedMessageId::INVALID;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, t: Time, _e: Time, _r: Time) -> Status {
        drain_due(env, self.fifo, t);

        let port = self.x[0];
        if !port.is_empty() {
            ensure_ring(env, &mut self.fifo)?;
            for i in 0..port.len() {
                let msg = env.message(port, i);
                let ring = env.dated_messages.get_mut(self.fifo).expect("ring exists");
                if !ring.push(DatedMessage::new(t + self.ta, msg)) {
                    return Err(SimulationError::DatedMessagesFull);
                }
            }
        }

        self.sigma = next_wakeup_delta(env, self.fifo, t);
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        emit_due(env, self.fifo, self.y[0])
    }

    fn finalize(&mut self, env: &mut Env) -> Status {
        release_ring(env, &mut self.fifo);
        Ok(())
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
        io.f64(&mut self.sigma)?;
        io.f64(&mut self.ta)
    }
}

/// FIFO whose hold delay is pulled from an external source per enqueue.
#[derive(Debug, Clone)]
pub struct DynamicQueue {
    pub x: [InputPort; 1],
    pub y: [OutputPortId; 1],

    pub sigma: Time,
    pub fifo: DatedMessageId,
    pub source_ta: Source,
}

impl Default for DynamicQueue {
    fn default() -> Self {
        Self {
            x: Default::default(),
            y: Default::default(),
            sigma: f64::INFINITY,
            fifo: DatedMessageId::INVALID,
            source_ta: Source::default(),
        }
    }
}

impl Atom for DynamicQueue {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, env: &mut Env) -> Status {
        self.sigma = f64::INFINITY;
        self.fifo = DatedMessageId::INVALID;
        env.srcs.initialize(&mut self.source_ta)?;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, t: Time, _e: Time, _r: Time) -> Status {
        drain_due(env, self.fifo, t);

        let port = self.x[0];
        if !port.is_empty() {
            ensure_ring(env, &mut self.fifo)?;
            for i in 0..port.len() {
                let msg = env.message(port, i);
                let ta = env.srcs.update(&mut self.source_ta)?;
                check_ta(ta)?;

                let ring = env.dated_messages.get_mut(self.fifo).expect("ring exists");
                if !ring.push(DatedMessage::new(t + ta, msg)) {
                    return Err(SimulationError::DatedMessagesFull);
                }
            }
        }

        self.sigma = next_wakeup_delta(env, self.fifo, t);
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        emit_due(env, self.fifo, self.y[0])
    }

    fn finalize(&mut self, env: &mut Env) -> Status {
        release_ring(env, &mut self.fifo);
        env.srcs.finalize_handle(&mut self.source_ta)?;
        Ok(())
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
        io.f64(&mut self.sigma)?;
        persist_source(&mut self.source_ta, io)
    }
}

/// Queue ordered by wakeup time rather than arrival: each enqueue pulls its
/// own delay and the ring is kept sorted.
#[derive(Debug, Clone)]
pub struct PriorityQueue {
    pub x: [InputPort; 1],
    pub y: [OutputPortId; 1],

    pub sigma: Time,
    pub fifo: DatedMessageId,
    pub ta: Time,
    pub source_ta: Source,
}

impl Default for PriorityQueue {
    fn default() -> Self {
        Self {
            x: Default::default(),
            y: Default::default(),
            sigma: f64::INFINITY,
            fifo: DatedMessageId::INVALID,
            ta: 1.0,
            source_ta: Source::default(),
        }
    }
}

impl Atom for PriorityQueue {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, env: &mut Env) -> Status {
        env.srcs.initialize(&mut self.source_ta)?;
        self.sigma = f64::INFINITY;
        self.fifo = DatedMessageId::INVALID;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, t: Time, _e: Time, _r: Time) -> Status {
        drain_due(env, self.fifo, t);

        let port = self.x[0];
        if !port.is_empty() {
            ensure_ring(env, &mut self.fifo)?;
            for i in 0..port.len() {
                let msg = env.message(port, i);
                let ta = env.srcs.update(&mut self.source_ta)?;
                check_ta(ta)?;

                let ring = env.dated_messages.get_mut(self.fifo).expect("ring exists");
                if !ring.push(DatedMessage::new(t + ta, msg)) {
                    return Err(SimulationError::DatedMessagesFull);
                }
            }

            let ring = env.dated_messages.get_mut(self.fifo).expect("ring exists");
            ring.sort_by(|a, b| {
                a.wakeup()
                    .partial_cmp(&b.wakeup())
                    .unwrap_or(core::cmp::Ordering::Equal)
            });
        }

        self.sigma = next_wakeup_delta(env, self.fifo, t);
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        emit_due(env, self.fifo, self.y[0])
    }

    fn finalize(&mut self, env: &mut Env) -> Status {
        release_ring(env, &mut self.fifo);
        env.srcs.finalize_handle(&mut self.source_ta)?;
        Ok(())
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
        io.f64(&mut self.sigma)?;
        io.f64(&mut self.ta)?;
        persist_source(&mut self.source_ta, io)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LogicalOp {
    #[default]
    And = 0,
    Or = 1,
}

impl LogicalOp {
    pub(crate) fn from_u8(value: u8) -> Self {
        if value == 1 { LogicalOp::Or } else { LogicalOp::And }
    }
}

/// N-input gate. Each port latches a boolean from the last zero/non-zero
/// message; the gate fires immediately on any change of its truth value.
#[derive(Debug, Clone)]
pub struct Logical<const N: usize> {
    pub x: [InputPort; N],
    pub y: [OutputPortId; 1],

    pub values: [bool; N],
    pub op: LogicalOp,
    pub sigma: Time,
    pub is_valid: bool,
    pub value_changed: bool,
}

impl<const N: usize> Default for Logical<N> {
    fn default() -> Self {
        Self {
            x: [InputPort::default(); N],
            y: Default::default(),
            values: [false; N],
            op: LogicalOp::And,
            sigma: f64::INFINITY,
            is_valid: false,
            value_changed: false,
        }
    }
}

impl<const N: usize> Atom for Logical<N> {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        self.values = [false; N];
        self.sigma = f64::INFINITY;
        self.is_valid = false;
        self.value_changed = false;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, _e: Time, _r: Time) -> Status {
        let was_valid = self.is_valid;

        for i in 0..N {
            let port = self.x[i];
            if !port.is_empty() {
                self.values[i] = env.message(port, 0).value() != 0.0;
            }
        }

        self.is_valid = match self.op {
            LogicalOp::And => self.values.iter().all(|&v| v),
            LogicalOp::Or => self.values.iter().any(|&v| v),
        };

        if self.is_valid != was_valid {
            self.value_changed = true;
            self.sigma = 0.0;
        } else {
            self.value_changed = false;
            self.sigma = f64::INFINITY;
        }
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        if self.value_changed {
            return env.send(self.y[0], if self.is_valid { 1.0 } else { 0.0 });
        }
        Ok(())
    }

    fn observation(&self, t: Time, _e: Time) -> ObservationMessage {
        ObservationMessage::time_value(t, if self.is_valid { 1.0 } else { 0.0 })
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
        for value in &mut self.values {
            io.bool(value)?;
        }

        let mut op = self.op as u8;
        io.u8(&mut op)?;
        self.op = LogicalOp::from_u8(op);

        io.bool(&mut self.is_valid)?;
        io.bool(&mut self.value_changed)?;
        io.f64(&mut self.sigma)
    }
}

/// Boolean inverter; fires only when the inverted value would change.
#[derive(Debug, Clone)]
pub struct LogicalInvert {
    pub x: [InputPort; 1],
    pub y: [OutputPortId; 1],

    pub value: bool,
    pub value_changed: bool,
    pub sigma: Time,
}

impl Default for LogicalInvert {
    fn default() -> Self {
        Self {
            x: Default::default(),
            y: Default::default(),
            value: false,
            value_changed: false,
            sigma: f64::INFINITY,
        }
    }
}

impl Atom for LogicalInvert {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        self.sigma = f64::INFINITY;
        self.value_changed = false;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, _e: Time, _r: Time) -> Status {
        self.value_changed = false;

        let port = self.x[0];
        if !port.is_empty() {
            let incoming = env.message(port, 0).value() != 0.0;
            if incoming != self.value {
                self.value = incoming;
                self.value_changed = true;
            }
        }

        self.sigma = if self.value_changed {
            0.0
        } else {
            f64::INFINITY
        };
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        if self.value_changed {
            return env.send(self.y[0], if self.value { 0.0 } else { 1.0 });
        }
        Ok(())
    }

    fn observation(&self, t: Time, _e: Time) -> ObservationMessage {
        ObservationMessage::time_value(t, if self.value { 0.0 } else { 1.0 })
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
        io.bool(&mut self.value)?;
        io.bool(&mut self.value_changed)?;
        io.f64(&mut self.sigma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_saturates_at_i64_max() {
        let mut counter = Counter::default();
        counter.number = i64::MAX - 1;
        counter.number = counter.number.saturating_add(5);
        assert_eq!(counter.number, i64::MAX);
    }

    #[test]
    fn constant_validates_offset_and_value() {
        let mut env = Env::new();

        let mut constant = Constant {
            value: f64::NAN,
            ..Constant::default()
        };
        assert!(matches!(
            constant.initialize(&mut env),
            Err(SimulationError::ConstantValue)
        ));

        let mut constant = Constant {
            offset: -1.0,
            ..Constant::default()
        };
        assert!(matches!(
            constant.initialize(&mut env),
            Err(SimulationError::ConstantOffset)
        ));

        let mut constant = Constant {
            value: 3.0,
            offset: 0.5,
            ..Constant::default()
        };
        constant.initialize(&mut env).unwrap();
        assert_eq!(constant.sigma, 0.5);
    }

    #[test]
    fn time_func_samples_its_function() {
        let mut func = TimeFunc {
            function: TimeFuncKind::Square,
            ..TimeFunc::default()
        };
        let mut env = Env::new();

        func.initialize(&mut env).unwrap();
        func.transition(&mut env, 3.0, 0.0, 0.0).unwrap();
        assert_eq!(func.value, 9.0);
        assert_eq!(func.sigma, func.timestep);
    }

    #[test]
    fn time_func_rejects_bad_timestep() {
        let mut func = TimeFunc {
            timestep: 0.0,
            ..TimeFunc::default()
        };
        let mut env = Env::new();
        assert!(matches!(
            func.initialize(&mut env),
            Err(SimulationError::TimeFuncTimestep)
        ));
    }

    #[test]
    fn queue_requires_positive_ta() {
        let mut queue = Queue {
            ta: 0.0,
            ..Queue::default()
        };
        let mut env = Env::new();
        assert!(matches!(
            queue.initialize(&mut env),
            Err(SimulationError::QueueTa)
        ));
    }

    #[test]
    fn generator_constant_mode_uses_defaults() {
        let mut generator = Generator {
            default_ta: 2.0,
            default_value: 7.0,
            ..Generator::default()
        };
        let mut env = Env::new();

        generator.initialize(&mut env).unwrap();
        assert_eq!(generator.sigma, 2.0);
        assert_eq!(generator.value, 7.0);

        // Internal event refreshes the delay from the same constant.
        generator.transition(&mut env, 2.0, 2.0, 0.0).unwrap();
        assert_eq!(generator.sigma, 2.0);
    }

    #[test]
    fn generator_rejects_negative_ta() {
        let mut generator = Generator {
            default_ta: -1.0,
            ..Generator::default()
        };
        let mut env = Env::new();
        assert!(matches!(
            generator.initialize(&mut env),
            Err(SimulationError::TaAbnormal)
        ));
    }

    #[test]
    fn logical_gates_fire_only_on_change() {
        let mut gate: Logical<2> = Logical::default();
        let mut env = Env::new();
        gate.initialize(&mut env).unwrap();

        // No inputs, no change.
        gate.transition(&mut env, 0.0, 0.0, 0.0).unwrap();
        assert!(!gate.value_changed);
        assert_eq!(gate.sigma, f64::INFINITY);

        // Flip both stored values by hand: and-gate becomes true.
        gate.values = [true, true];
        let was = gate.is_valid;
        gate.is_valid = match gate.op {
            LogicalOp::And => gate.values.iter().all(|&v| v),
            LogicalOp::Or => gate.values.iter().any(|&v| v),
        };
        assert!(!was && gate.is_valid);
    }
}
