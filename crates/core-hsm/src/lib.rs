//! Hierarchical state machine tables and their execution engine.
//!
//! A [`StateMachine`] is a flat table of up to 254 states. Each state carries
//! an enter and an exit action, a single guard [`Condition`], an `if` and an
//! `else` action with their target states, plus `super_id` / `sub_id` links
//! that form the hierarchy. The table is shared and immutable during a run;
//! all mutable state lives in the per-wrapper [`Execution`] record, so many
//! models can run the same machine.
//!
//! Standard HSM restrictions apply:
//! 1. no transition from inside an enter or exit action (these exist for
//!    construction / destruction work), enforced through
//!    `Execution::disallow_transition`;
//! 2. no recursive event dispatch; queue outputs instead, the wrapper drains
//!    them through its λ.
//!
//! Arithmetic actions run in `f64` and write back through the variable's own
//! width. Division and modulus by zero store an infinity rather than fail;
//! the machine is a modeling tool, not a calculator.

use core_source::{ExternalSource, Source, SourceError};

pub type StateId = u8;

pub const MAX_STATES: usize = 254;
pub const INVALID_STATE: StateId = 255;
pub const MAX_CONSTANTS: usize = 8;

/// Input/output line count of a wrapped machine.
pub const PORT_COUNT: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum HsmError {
    #[error("machine has no top state")]
    TopStateUnset,
    #[error("transition requested from an enter or exit action")]
    TransitionDisallowed,
    #[error("states {0} and {1} share no ancestor")]
    MalformedHierarchy(StateId, StateId),
    #[error("machine reads the external source but none is mounted")]
    SourceUnconfigured,
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// Events the wrapper feeds into a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// A state is being entered; runs its enter action.
    Enter,
    /// A state is being left; runs its exit action.
    Exit,
    /// An input port delivered a message.
    InputChanged,
    /// The state's condition is neither port- nor timer-based.
    Internal,
    /// The state's timer elapsed.
    WakeUp,
}

/// Everything an action or condition can read; a subset can be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Variable {
    #[default]
    None,
    Port0,
    Port1,
    Port2,
    Port3,
    I1,
    I2,
    R1,
    R2,
    Timer,
    /// Integer literal carried by the action/condition itself.
    ConstantI,
    /// Real literal carried by the action/condition itself.
    ConstantR,
    /// One of the eight per-machine constants.
    MachineConstant(u8),
    /// Next value pulled from the mounted external source.
    Source,
}

impl Variable {
    fn port_index(self) -> Option<usize> {
        match self {
            Variable::Port0 => Some(0),
            Variable::Port1 => Some(1),
            Variable::Port2 => Some(2),
            Variable::Port3 => Some(3),
            _ => None,
        }
    }
}

/// Second operand of an action or comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Var(Variable),
    Int(i32),
    Real(f32),
}

impl Default for Operand {
    fn default() -> Self {
        Operand::Var(Variable::None)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActionKind {
    #[default]
    None,
    /// Latch an input-port bit.
    SetPort,
    /// Clear an input-port bit and its stored value.
    UnsetPort,
    /// Clear every input-port bit.
    ResetPorts,
    /// Queue an output message on a port.
    Output,
    Affect,
    Plus,
    Minus,
    Negate,
    Multiplies,
    Divides,
    Modulus,
    BitAnd,
    BitOr,
    BitNot,
    BitXor,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Action {
    pub kind: ActionKind,
    pub var: Variable,
    pub operand: Operand,
}

impl Action {
    pub const NONE: Self = Self {
        kind: ActionKind::None,
        var: Variable::None,
        operand: Operand::Var(Variable::None),
    };

    pub fn set_port(port: Variable) -> Self {
        debug_assert!(port.port_index().is_some());
        Self {
            kind: ActionKind::SetPort,
            var: port,
            ..Self::NONE
        }
    }

    pub fn unset_port(port: Variable) -> Self {
        debug_assert!(port.port_index().is_some());
        Self {
            kind: ActionKind::UnsetPort,
            var: port,
            ..Self::NONE
        }
    }

    pub fn reset_ports() -> Self {
        Self {
            kind: ActionKind::ResetPorts,
            ..Self::NONE
        }
    }

    /// Queue `operand` as an output message on `port`.
    pub fn output(port: Variable, operand: Operand) -> Self {
        debug_assert!(port.port_index().is_some());
        Self {
            kind: ActionKind::Output,
            var: port,
            operand,
        }
    }

    pub fn affect(var: Variable, operand: Operand) -> Self {
        Self {
            kind: ActionKind::Affect,
            var,
            operand,
        }
    }

    pub fn arithmetic(kind: ActionKind, var: Variable, operand: Operand) -> Self {
        Self { kind, var, operand }
    }

    pub fn is_none(&self) -> bool {
        self.kind == ActionKind::None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConditionKind {
    /// Always true.
    #[default]
    None,
    /// True when the latched input bits match `value` under `mask`.
    Port,
    /// True when the state's timer elapsed.
    Sigma,
    Equal,
    NotEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Condition {
    pub kind: ConditionKind,
    pub var: Variable,
    pub operand: Operand,
    /// Expected port bits (bit k is port k); only for `ConditionKind::Port`.
    pub port_value: u8,
    /// Bits of `port_value` that matter; `0` means always true.
    pub port_mask: u8,
}

impl Condition {
    pub const NONE: Self = Self {
        kind: ConditionKind::None,
        var: Variable::None,
        operand: Operand::Var(Variable::None),
        port_value: 0,
        port_mask: 0,
    };

    pub fn port(value: u8, mask: u8) -> Self {
        Self {
            kind: ConditionKind::Port,
            port_value: value,
            port_mask: mask,
            ..Self::NONE
        }
    }

    /// Wait for the wrapper timer (`var_timer` holds the delay).
    pub fn timer() -> Self {
        Self {
            kind: ConditionKind::Sigma,
            ..Self::NONE
        }
    }

    pub fn compare(kind: ConditionKind, var: Variable, operand: Operand) -> Self {
        debug_assert!(matches!(
            kind,
            ConditionKind::Equal
                | ConditionKind::NotEqual
                | ConditionKind::Greater
                | ConditionKind::GreaterEqual
                | ConditionKind::Less
                | ConditionKind::LessEqual
        ));
        Self {
            kind,
            var,
            operand,
            ..Self::NONE
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct State {
    pub enter_action: Action,
    pub exit_action: Action,
    pub if_action: Action,
    pub else_action: Action,
    pub condition: Condition,

    pub if_transition: StateId,
    pub else_transition: StateId,

    pub super_id: StateId,
    pub sub_id: StateId,
}

impl State {
    pub const DEFAULT: Self = Self {
        enter_action: Action::NONE,
        exit_action: Action::NONE,
        if_action: Action::NONE,
        else_action: Action::NONE,
        condition: Condition::NONE,
        if_transition: INVALID_STATE,
        else_transition: INVALID_STATE,
        super_id: INVALID_STATE,
        sub_id: INVALID_STATE,
    };

    /// A state with no outgoing transition never leaves.
    pub fn is_terminal(&self) -> bool {
        self.if_transition == INVALID_STATE && self.else_transition == INVALID_STATE
    }

    fn is_default(&self) -> bool {
        *self == Self::DEFAULT
    }
}

impl Default for State {
    fn default() -> Self {
        Self::DEFAULT
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MachineOptions: u8 {
        /// Some action or condition reads `Variable::Source`; computed by
        /// static analysis before the simulation starts.
        const USE_SOURCE = 0b0000_0001;
        /// Read zero instead of failing when the source is unmounted.
        const LENIENT_SOURCE = 0b0000_0010;
    }
}

/// Queued output message of one dispatch round.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputMessage {
    pub port: u8,
    pub value: f64,
}

/// Per-wrapper mutable record: variables, latched inputs, queued outputs and
/// the position inside the state chart.
#[derive(Debug, Clone)]
pub struct Execution {
    pub i1: i32,
    pub i2: i32,
    pub r1: f64,
    pub r2: f64,
    pub timer: f64,

    /// Last value seen on each input port.
    pub ports: [f64; PORT_COUNT],
    /// Bit k set when input port k currently holds a value.
    pub port_bits: u8,

    /// Messages staged by `Output` actions, drained by the wrapper's λ.
    pub outputs: Vec<OutputMessage>,

    pub source_value: Source,

    pub current_state: StateId,
    pub next_state: StateId,
    pub source_state: StateId,
    pub previous_state: StateId,
    pub disallow_transition: bool,
}

impl Default for Execution {
    fn default() -> Self {
        Self {
            i1: 0,
            i2: 0,
            r1: 0.0,
            r2: 0.0,
            timer: f64::INFINITY,
            ports: [0.0; PORT_COUNT],
            port_bits: 0,
            outputs: Vec::new(),
            source_value: Source::default(),
            current_state: INVALID_STATE,
            next_state: INVALID_STATE,
            source_state: INVALID_STATE,
            previous_state: INVALID_STATE,
            disallow_transition: false,
        }
    }
}

impl Execution {
    pub fn clear(&mut self) {
        let source = std::mem::take(&mut self.source_value);
        *self = Self {
            source_value: source,
            ..Self::default()
        };
    }

    pub fn set_port(&mut self, index: usize, value: f64) {
        debug_assert!(index < PORT_COUNT);
        self.ports[index] = value;
        self.port_bits |= 1 << index;
    }

    pub fn unset_port(&mut self, index: usize) {
        debug_assert!(index < PORT_COUNT);
        self.port_bits &= !(1 << index);
    }

    pub fn any_port(&self) -> bool {
        self.port_bits != 0
    }

    pub fn push_message(&mut self, port: u8, value: f64) {
        debug_assert!((port as usize) < PORT_COUNT);
        if self.outputs.len() < PORT_COUNT {
            self.outputs.push(OutputMessage { port, value });
        }
    }
}

pub struct StateMachine {
    pub states: Box<[State; MAX_STATES]>,
    /// Machine-level constants addressable as `Variable::MachineConstant`.
    pub constants: [f64; MAX_CONSTANTS],
    pub top_state: StateId,
    pub flags: MachineOptions,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for StateMachine {
    fn clone(&self) -> Self {
        Self {
            states: self.states.clone(),
            constants: self.constants,
            top_state: self.top_state,
            flags: self.flags,
        }
    }
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            states: Box::new([State::DEFAULT; MAX_STATES]),
            constants: [0.0; MAX_CONSTANTS],
            top_state: INVALID_STATE,
            flags: MachineOptions::empty(),
        }
    }

    pub fn clear(&mut self) {
        *self.states = [State::DEFAULT; MAX_STATES];
        self.top_state = INVALID_STATE;
    }

    /// Register `id` under `super_id` (or as the top state) with an optional
    /// initial child `sub_id`.
    pub fn set_state(&mut self, id: StateId, super_id: StateId, sub_id: StateId) {
        debug_assert!((id as usize) < MAX_STATES);

        self.states[id as usize].super_id = super_id;
        self.states[id as usize].sub_id = sub_id;

        if super_id == INVALID_STATE {
            self.top_state = id;
        }
    }

    pub fn clear_state(&mut self, id: StateId) {
        self.states[id as usize] = State::DEFAULT;
        if self.top_state == id {
            self.top_state = INVALID_STATE;
        }
    }

    pub fn state_mut(&mut self, id: StateId) -> &mut State {
        &mut self.states[id as usize]
    }

    pub fn is_in_state(&self, exec: &Execution, id: StateId) -> bool {
        let mut sid = exec.current_state;
        while sid != INVALID_STATE {
            if sid == id {
                return true;
            }
            sid = self.states[sid as usize].super_id;
        }
        false
    }

    /// Highest state index in use, for bounded serialization.
    pub fn compute_max_state_used(&self) -> usize {
        self.states
            .iter()
            .rposition(|s| !s.is_default())
            .map_or(0, |i| i + 1)
    }

    /// True when any action or condition reads the external source.
    pub fn compute_is_using_source(&self) -> bool {
        fn action_reads_source(a: &Action) -> bool {
            a.var == Variable::Source || a.operand == Operand::Var(Variable::Source)
        }

        self.states.iter().any(|s| {
            action_reads_source(&s.enter_action)
                || action_reads_source(&s.exit_action)
                || action_reads_source(&s.if_action)
                || action_reads_source(&s.else_action)
                || s.condition.var == Variable::Source
                || s.condition.operand == Operand::Var(Variable::Source)
        })
    }

    /// Enter the top state and descend the initial `sub_id` chain.
    pub fn start(
        &self,
        exec: &mut Execution,
        srcs: &mut ExternalSource,
    ) -> Result<(), HsmError> {
        if self.top_state == INVALID_STATE {
            return Err(HsmError::TopStateUnset);
        }

        exec.current_state = self.top_state;
        exec.next_state = INVALID_STATE;

        self.run_guarded(self.top_state, Event::Enter, exec, srcs)?;
        self.enter_sub_chain(exec, srcs)
    }

    /// Run `event` at the current state, bubbling up the `super_id` chain
    /// until some state handles it. Returns whether it was handled.
    pub fn dispatch(
        &self,
        event: Event,
        exec: &mut Execution,
        srcs: &mut ExternalSource,
    ) -> Result<bool, HsmError> {
        debug_assert!(
            !matches!(event, Event::Enter | Event::Exit),
            "enter/exit are driven by transitions, not dispatched"
        );

        if exec.current_state == INVALID_STATE {
            return Err(HsmError::TopStateUnset);
        }

        let mut sid = exec.current_state;
        while sid != INVALID_STATE {
            exec.source_state = sid;
            if self.handle(sid, event, exec, srcs)? {
                return Ok(true);
            }
            sid = self.states[sid as usize].super_id;
        }

        Ok(false)
    }

    /// Exit up to the common ancestor of the current and target states, then
    /// enter down to the target and its initial sub-chain.
    pub fn transition(
        &self,
        target: StateId,
        exec: &mut Execution,
        srcs: &mut ExternalSource,
    ) -> Result<(), HsmError> {
        if exec.disallow_transition {
            return Err(HsmError::TransitionDisallowed);
        }
        debug_assert!((target as usize) < MAX_STATES);

        exec.next_state = target;

        let ancestor = self
            .common_ancestor(exec.current_state, target)
            .ok_or(HsmError::MalformedHierarchy(exec.current_state, target))?;

        // Exit path: current up to (excluding) the ancestor.
        let mut sid = exec.current_state;
        while sid != ancestor {
            self.run_guarded(sid, Event::Exit, exec, srcs)?;
            sid = self.states[sid as usize].super_id;
        }

        // Enter path: below the ancestor down to the target.
        let mut chain: Vec<StateId> = Vec::new();
        let mut sid = target;
        while sid != ancestor {
            chain.push(sid);
            sid = self.states[sid as usize].super_id;
        }
        for &sid in chain.iter().rev() {
            self.run_guarded(sid, Event::Enter, exec, srcs)?;
        }

        exec.current_state = target;
        exec.next_state = INVALID_STATE;
        self.enter_sub_chain(exec, srcs)
    }

    /// Handle one event at one state: enter/exit run the matching action;
    /// the condition events evaluate the guard and take the `if` or `else`
    /// branch. An unhandled event (guard false, no else branch) bubbles up.
    fn handle(
        &self,
        state: StateId,
        event: Event,
        exec: &mut Execution,
        srcs: &mut ExternalSource,
    ) -> Result<bool, HsmError> {
        let st = self.states[state as usize];

        match event {
            Event::Enter | Event::Exit => {
                unreachable!("enter/exit run through transitions")
            }
            Event::InputChanged | Event::Internal | Event::WakeUp => {
                if self.check(&st.condition, exec, srcs)? {
                    self.run_action(&st.if_action, exec, srcs)?;
                    if st.if_transition != INVALID_STATE {
                        self.transition(st.if_transition, exec, srcs)?;
                        return Ok(true);
                    }
                    // A passive container (guard true, nothing to do) lets
                    // the event keep bubbling.
                    Ok(!st.if_action.is_none())
                } else if !st.else_action.is_none() || st.else_transition != INVALID_STATE {
                    self.run_action(&st.else_action, exec, srcs)?;
                    if st.else_transition != INVALID_STATE {
                        self.transition(st.else_transition, exec, srcs)?;
                    }
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Run an enter or exit action with transitions locked out.
    fn run_guarded(
        &self,
        state: StateId,
        event: Event,
        exec: &mut Execution,
        srcs: &mut ExternalSource,
    ) -> Result<(), HsmError> {
        let action = match event {
            Event::Enter => self.states[state as usize].enter_action,
            Event::Exit => self.states[state as usize].exit_action,
            _ => unreachable!("only enter/exit actions are guarded"),
        };

        if matches!(event, Event::Enter) {
            tracing::trace!(target: "hsm.exec", state, "enter");
        }

        exec.disallow_transition = true;
        let outcome = self.run_action(&action, exec, srcs);
        exec.disallow_transition = false;
        outcome
    }

    fn enter_sub_chain(
        &self,
        exec: &mut Execution,
        srcs: &mut ExternalSource,
    ) -> Result<(), HsmError> {
        while self.states[exec.current_state as usize].sub_id != INVALID_STATE {
            let sub = self.states[exec.current_state as usize].sub_id;
            self.run_guarded(sub, Event::Enter, exec, srcs)?;
            exec.current_state = sub;
        }
        Ok(())
    }

    fn common_ancestor(&self, a: StateId, b: StateId) -> Option<StateId> {
        let mut on_a_path = [false; MAX_STATES + 1];
        let mut sid = a;
        while sid != INVALID_STATE {
            on_a_path[sid as usize] = true;
            sid = self.states[sid as usize].super_id;
        }

        let mut sid = b;
        while sid != INVALID_STATE {
            if on_a_path[sid as usize] {
                return Some(sid);
            }
            sid = self.states[sid as usize].super_id;
        }
        None
    }

    fn run_action(
        &self,
        action: &Action,
        exec: &mut Execution,
        srcs: &mut ExternalSource,
    ) -> Result<(), HsmError> {
        use ActionKind::*;

        match action.kind {
            None => Ok(()),
            SetPort => {
                if let Some(index) = action.var.port_index() {
                    let value = self.operand_value(&action.operand, exec, srcs)?;
                    exec.set_port(index, value);
                }
                Ok(())
            }
            UnsetPort => {
                if let Some(index) = action.var.port_index() {
                    exec.unset_port(index);
                }
                Ok(())
            }
            ResetPorts => {
                exec.port_bits = 0;
                Ok(())
            }
            Output => {
                if let Some(index) = action.var.port_index() {
                    let value = self.operand_value(&action.operand, exec, srcs)?;
                    exec.push_message(index as u8, value);
                }
                Ok(())
            }
            Affect => {
                let value = self.operand_value(&action.operand, exec, srcs)?;
                Self::store(exec, action.var, value);
                Ok(())
            }
            Plus | Minus | Multiplies | Divides | Modulus => {
                let left = self.load(action.var, exec, srcs)?;
                let right = self.operand_value(&action.operand, exec, srcs)?;
                let value = match action.kind {
                    Plus => left + right,
                    Minus => left - right,
                    Multiplies => left * right,
                    // IEEE semantics already produce the documented infinity
                    // for x/0 with x != 0; pin the 0/0 and x%0 cases too.
                    Divides => {
                        if right == 0.0 {
                            f64::INFINITY.copysign(if left == 0.0 { 1.0 } else { left })
                        } else {
                            left / right
                        }
                    }
                    Modulus => {
                        if right == 0.0 {
                            f64::INFINITY
                        } else {
                            left % right
                        }
                    }
                    _ => unreachable!(),
                };
                Self::store(exec, action.var, value);
                Ok(())
            }
            Negate => {
                let value = self.operand_value(&action.operand, exec, srcs)?;
                Self::store(exec, action.var, -value);
                Ok(())
            }
            BitAnd | BitOr | BitXor => {
                let left = self.load(action.var, exec, srcs)? as i64;
                let right = self.operand_value(&action.operand, exec, srcs)? as i64;
                let value = match action.kind {
                    BitAnd => left & right,
                    BitOr => left | right,
                    BitXor => left ^ right,
                    _ => unreachable!(),
                };
                Self::store(exec, action.var, value as f64);
                Ok(())
            }
            BitNot => {
                let value = self.operand_value(&action.operand, exec, srcs)? as i64;
                Self::store(exec, action.var, !value as f64);
                Ok(())
            }
        }
    }

    fn check(
        &self,
        condition: &Condition,
        exec: &mut Execution,
        srcs: &mut ExternalSource,
    ) -> Result<bool, HsmError> {
        use ConditionKind::*;

        match condition.kind {
            None => Ok(true),
            Port => {
                // An empty mask is an unconditional guard.
                Ok((exec.port_bits & condition.port_mask)
                    == (condition.port_value & condition.port_mask))
            }
            Sigma => Ok(exec.timer <= 0.0),
            Equal | NotEqual | Greater | GreaterEqual | Less | LessEqual => {
                let left = self.load(condition.var, exec, srcs)?;
                let right = self.operand_value(&condition.operand, exec, srcs)?;
                Ok(match condition.kind {
                    Equal => left == right,
                    NotEqual => left != right,
                    Greater => left > right,
                    GreaterEqual => left >= right,
                    Less => left < right,
                    LessEqual => left <= right,
                    _ => unreachable!(),
                })
            }
        }
    }

    fn operand_value(
        &self,
        operand: &Operand,
        exec: &mut Execution,
        srcs: &mut ExternalSource,
    ) -> Result<f64, HsmError> {
        match operand {
            Operand::Var(var) => self.load(*var, exec, srcs),
            Operand::Int(value) => Ok(*value as f64),
            Operand::Real(value) => Ok(*value as f64),
        }
    }

    fn load(
        &self,
        var: Variable,
        exec: &mut Execution,
        srcs: &mut ExternalSource,
    ) -> Result<f64, HsmError> {
        Ok(match var {
            Variable::None => 0.0,
            Variable::Port0 => exec.ports[0],
            Variable::Port1 => exec.ports[1],
            Variable::Port2 => exec.ports[2],
            Variable::Port3 => exec.ports[3],
            Variable::I1 => exec.i1 as f64,
            Variable::I2 => exec.i2 as f64,
            Variable::R1 => exec.r1,
            Variable::R2 => exec.r2,
            Variable::Timer => exec.timer,
            Variable::ConstantI | Variable::ConstantR => 0.0,
            Variable::MachineConstant(index) => {
                self.constants[(index as usize).min(MAX_CONSTANTS - 1)]
            }
            Variable::Source => {
                if exec.source_value.spec.is_none() {
                    if self.flags.contains(MachineOptions::LENIENT_SOURCE) {
                        0.0
                    } else {
                        return Err(HsmError::SourceUnconfigured);
                    }
                } else {
                    srcs.update(&mut exec.source_value)?
                }
            }
        })
    }

    fn store(exec: &mut Execution, var: Variable, value: f64) {
        match var {
            Variable::Port0 | Variable::Port1 | Variable::Port2 | Variable::Port3 => {
                let index = var.port_index().expect("port variable");
                exec.ports[index] = value;
            }
            Variable::I1 => exec.i1 = value as i32,
            Variable::I2 => exec.i2 = value as i32,
            Variable::R1 => exec.r1 = value,
            Variable::R2 => exec.r2 = value,
            Variable::Timer => exec.timer = value,
            Variable::None
            | Variable::ConstantI
            | Variable::ConstantR
            | Variable::MachineConstant(_)
            | Variable::Source => {
                debug_assert!(false, "store into a read-only variable");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine_and_exec() -> (StateMachine, Execution, ExternalSource) {
        (StateMachine::new(), Execution::default(), ExternalSource::new())
    }

    /// Two sibling states under a root; both guard on port 0 and toggle.
    fn toggle_machine() -> StateMachine {
        let mut m = StateMachine::new();
        m.set_state(0, INVALID_STATE, 1); // root, initial child A
        m.set_state(1, 0, INVALID_STATE); // A
        m.set_state(2, 0, INVALID_STATE); // B

        let a = m.state_mut(1);
        a.condition = Condition::port(0x1, 0x1);
        a.if_action = Action::output(Variable::Port0, Operand::Int(1));
        a.if_transition = 2;

        let b = m.state_mut(2);
        b.condition = Condition::port(0x1, 0x1);
        b.if_action = Action::output(Variable::Port0, Operand::Int(0));
        b.if_transition = 1;

        m
    }

    #[test]
    fn start_without_top_state_fails() {
        let (m, mut exec, mut srcs) = machine_and_exec();
        assert!(matches!(
            m.start(&mut exec, &mut srcs),
            Err(HsmError::TopStateUnset)
        ));
    }

    #[test]
    fn start_descends_initial_chain() {
        let (_, mut exec, mut srcs) = machine_and_exec();
        let m = toggle_machine();

        m.start(&mut exec, &mut srcs).unwrap();
        assert_eq!(exec.current_state, 1);
    }

    #[test]
    fn toggle_emits_alternating_messages() {
        let (_, mut exec, mut srcs) = machine_and_exec();
        let m = toggle_machine();
        m.start(&mut exec, &mut srcs).unwrap();

        let mut seen = Vec::new();
        for _ in 0..3 {
            exec.set_port(0, 1.0);
            let handled = m.dispatch(Event::InputChanged, &mut exec, &mut srcs).unwrap();
            assert!(handled);
            seen.extend(exec.outputs.drain(..).map(|o| o.value));
            exec.unset_port(0);
        }

        assert_eq!(seen, vec![1.0, 0.0, 1.0]);
        assert_eq!(exec.current_state, 2);
    }

    #[test]
    fn unmatched_port_event_bubbles_and_is_unhandled() {
        let (_, mut exec, mut srcs) = machine_and_exec();
        let m = toggle_machine();
        m.start(&mut exec, &mut srcs).unwrap();

        // Wrong port bit: the guard fails and there is no else branch.
        exec.set_port(1, 1.0);
        let handled = m.dispatch(Event::InputChanged, &mut exec, &mut srcs).unwrap();
        assert!(!handled);
        assert_eq!(exec.current_state, 1);
    }

    #[test]
    fn enter_and_exit_actions_run_in_hierarchy_order() {
        let (_, mut exec, mut srcs) = machine_and_exec();
        let mut m = StateMachine::new();

        // root(0) { left(1) { leaf(2) }, right(3) }
        m.set_state(0, INVALID_STATE, 1);
        m.set_state(1, 0, 2);
        m.set_state(2, 1, INVALID_STATE);
        m.set_state(3, 0, INVALID_STATE);

        // Count enters in r1, exits in r2.
        for id in [0u8, 1, 2, 3] {
            let s = m.state_mut(id);
            s.enter_action = Action::arithmetic(ActionKind::Plus, Variable::R1, Operand::Int(1));
            s.exit_action = Action::arithmetic(ActionKind::Plus, Variable::R2, Operand::Int(1));
        }
        m.state_mut(2).condition = Condition::NONE;
        m.state_mut(2).if_transition = 3;

        m.start(&mut exec, &mut srcs).unwrap();
        assert_eq!(exec.current_state, 2);
        assert_eq!(exec.r1, 3.0, "root, left, leaf entered");

        m.dispatch(Event::Internal, &mut exec, &mut srcs).unwrap();
        assert_eq!(exec.current_state, 3);
        assert_eq!(exec.r2, 2.0, "leaf and left exited to the common root");
        assert_eq!(exec.r1, 4.0, "right entered once");
    }

    #[test]
    fn transition_is_refused_inside_enter_action() {
        // An enter action cannot transition; the engine locks it out. We
        // model this with an if-branch on the entered state instead, so the
        // guard flag itself is what we assert.
        let (_, mut exec, mut srcs) = machine_and_exec();
        let m = toggle_machine();
        m.start(&mut exec, &mut srcs).unwrap();

        exec.disallow_transition = true;
        assert!(matches!(
            m.transition(2, &mut exec, &mut srcs),
            Err(HsmError::TransitionDisallowed)
        ));
        exec.disallow_transition = false;
    }

    #[test]
    fn division_by_zero_stores_infinity() {
        let (_, mut exec, mut srcs) = machine_and_exec();
        let mut m = StateMachine::new();
        m.set_state(0, INVALID_STATE, INVALID_STATE);

        let s = m.state_mut(0);
        s.enter_action =
            Action::arithmetic(ActionKind::Divides, Variable::R1, Operand::Int(0));
        m.start(&mut exec, &mut srcs).unwrap();

        assert!(exec.r1.is_infinite());

        exec.r2 = 5.0;
        let modulus = Action::arithmetic(ActionKind::Modulus, Variable::R2, Operand::Int(0));
        m.run_action(&modulus, &mut exec, &mut srcs).unwrap();
        assert!(exec.r2.is_infinite());
    }

    #[test]
    fn source_variable_detection_and_strictness() {
        let (_, mut exec, mut srcs) = machine_and_exec();
        let mut m = StateMachine::new();
        m.set_state(0, INVALID_STATE, INVALID_STATE);
        m.state_mut(0).enter_action =
            Action::affect(Variable::R1, Operand::Var(Variable::Source));

        assert!(m.compute_is_using_source());

        // Strict by default: starting with no mounted source fails.
        assert!(matches!(
            m.start(&mut exec, &mut srcs),
            Err(HsmError::SourceUnconfigured)
        ));

        // Lenient mode reads zero.
        m.flags |= MachineOptions::LENIENT_SOURCE;
        exec.clear();
        m.start(&mut exec, &mut srcs).unwrap();
        assert_eq!(exec.r1, 0.0);
    }

    #[test]
    fn machine_constants_are_addressable() {
        let (_, mut exec, mut srcs) = machine_and_exec();
        let mut m = StateMachine::new();
        m.constants[3] = 2.5;
        m.set_state(0, INVALID_STATE, INVALID_STATE);
        m.state_mut(0).enter_action = Action::affect(
            Variable::R1,
            Operand::Var(Variable::MachineConstant(3)),
        );

        m.start(&mut exec, &mut srcs).unwrap();
        assert_eq!(exec.r1, 2.5);
    }
}
