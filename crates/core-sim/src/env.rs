//! The kernel state an atom may touch from inside its contract functions.
//!
//! Atoms receive `&mut Env` instead of the whole simulation so the model
//! arena (which owns the atom being called) and the rest of the kernel
//! split-borrow cleanly. Everything here is disjoint from model storage:
//! the per-step message buffer, the output-port fabric, the dated-message
//! rings, the external sources and the state machine tables.

use core_arena::{DataArray, RingBuffer};
use core_hsm::StateMachine;
use core_source::ExternalSource;

use crate::error::{SimulationError, Status};
use crate::message::{DatedMessage, Message};
use crate::port::{BlockNode, InputPort, OutputPort};
use crate::qss;
use crate::{BlockNodeId, DatedMessageId, HsmId, OutputPortId};

pub struct Env {
    /// Per-step shared message store indexed by input-port views.
    pub message_buffer: Vec<Message>,
    pub output_ports: DataArray<OutputPort, OutputPortId>,
    pub blocks: DataArray<BlockNode, BlockNodeId>,
    pub dated_messages: DataArray<RingBuffer<DatedMessage>, DatedMessageId>,
    /// Ports staged by λ calls this step, drained by the fan-out passes.
    pub active_output_ports: Vec<OutputPortId>,
    pub srcs: ExternalSource,
    pub hsms: DataArray<StateMachine, HsmId>,
}

impl Env {
    pub(crate) fn new() -> Self {
        Self {
            message_buffer: Vec::new(),
            output_ports: DataArray::new(),
            blocks: DataArray::new(),
            dated_messages: DataArray::new(),
            active_output_ports: Vec::new(),
            srcs: ExternalSource::new(),
            hsms: DataArray::new(),
        }
    }

    /// The messages delivered to `port` this step.
    pub fn messages(&self, port: InputPort) -> &[Message] {
        let start = port.position as usize;
        let end = start + port.size as usize;
        debug_assert!(
            port.size == port.capacity && end <= self.message_buffer.len(),
            "input port view out of sync with the message buffer"
        );
        &self.message_buffer[start..end]
    }

    /// Copy out one delivered message; lets callers interleave reads with
    /// mutations of other `Env` fields.
    pub fn message(&self, port: InputPort, index: usize) -> Message {
        self.messages(port)[index]
    }

    /// The message an atom of QSS level `level` consumes from `port`:
    /// the lexicographic maximum over `(value, slope, derivative)`.
    pub fn qss_message(&self, port: InputPort, level: usize) -> Option<Message> {
        qss::preferred_message(self.messages(port), level)
    }

    /// Stage `msg` on an output port. A port that was never wired is
    /// silently skipped, so λ is free to run on unconnected models.
    pub fn send(&mut self, port: OutputPortId, msg: impl Into<Message>) -> Status {
        Self::send_parts(
            &mut self.output_ports,
            &mut self.active_output_ports,
            port,
            msg.into(),
        )
    }

    /// [`Env::send`] over split borrows, for call sites already holding
    /// other pieces of the environment (the queue family's λ).
    pub(crate) fn send_parts(
        output_ports: &mut DataArray<OutputPort, OutputPortId>,
        active_output_ports: &mut Vec<OutputPortId>,
        port: OutputPortId,
        msg: Message,
    ) -> Status {
        let Some(y) = output_ports.get_mut(port) else {
            return Ok(());
        };

        y.msg = msg;

        if active_output_ports.len() == active_output_ports.capacity() {
            let grow = active_output_ports.capacity().max(8);
            if active_output_ports.try_reserve(grow).is_err() {
                return Err(SimulationError::EmittingOutputPortsFull);
            }
        }
        active_output_ports.push(port);
        Ok(())
    }
}
