//! The atomic model family.
//!
//! Every atom implements the DEVS contract ([`Atom`]): `initialize` sets the
//! time advance `sigma` and validates parameters, `transition` is the
//! δ-function (internal when due with empty inputs, external when messages
//! arrived, confluent when both), `lambda` stages output messages,
//! `observation` is a pure state snapshot, `finalize` releases runtime
//! resources. All payloads live inline in [`Dynamics`], a sealed sum type;
//! the per-kind dispatch is a plain `match`, no virtual calls on the step
//! path.

mod arith;
mod discrete;
mod flow;
mod integrator;
mod wrapper;

pub use arith::{Cos, Exp, Gain, Inverse, Log, Multiplier, Power, Sin, Square, Sum, WSum};
pub use discrete::{Compare, Cross, CrossZone, Filter, Flipflop, Integer};
pub use flow::{
    Accumulator2, Constant, Counter, DynamicQueue, Generator, GeneratorOptions, Logical,
    LogicalInvert, LogicalOp, PriorityQueue, Queue, TimeFunc, TimeFuncKind,
};
pub use integrator::{Integrator1, Integrator2, Integrator3};
pub use wrapper::HsmWrapper;

use crate::OutputPortId;
use crate::archive::{ArchiveError, Codec};
use crate::env::Env;
use crate::error::Status;
use crate::message::{ObservationMessage, Time};
use crate::port::InputPort;

/// Capacity of one dated-message ring, shared by the queue family.
pub(crate) const DATED_RING_CAPACITY: usize = 256;

/// The DEVS contract every atom fulfils. Defaults cover atoms without the
/// corresponding feature (no inputs, no λ, nothing to persist).
pub(crate) trait Atom: Default {
    /// Time until the next internal event.
    fn sigma(&self) -> Time;

    fn initialize(&mut self, _env: &mut Env) -> Status {
        Ok(())
    }

    fn transition(&mut self, _env: &mut Env, _t: Time, _e: Time, _r: Time) -> Status {
        Ok(())
    }

    fn lambda(&mut self, _env: &mut Env) -> Status {
        Ok(())
    }

    fn observation(&self, t: Time, _e: Time) -> ObservationMessage {
        ObservationMessage::time_value(t, 0.0)
    }

    fn finalize(&mut self, _env: &mut Env) -> Status {
        Ok(())
    }

    fn input_ports(&self) -> &[InputPort] {
        &[]
    }

    fn input_ports_mut(&mut self) -> &mut [InputPort] {
        &mut []
    }

    fn output_ports(&self) -> &[OutputPortId] {
        &[]
    }

    fn output_ports_mut(&mut self) -> &mut [OutputPortId] {
        &mut []
    }

    fn persist(&mut self, _io: &mut dyn Codec) -> Result<(), ArchiveError> {
        Ok(())
    }
}

/// The single variant table; every enum, constructor and dispatch method is
/// generated from it so archive ordinals, tags and payloads cannot drift
/// apart.
macro_rules! dynamics_table {
    ($apply:ident) => {
        $apply! {
            (Qss1Integrator, integrator::Integrator1),
            (Qss1Multiplier, Multiplier<1>),
            (Qss1Cross, Cross<1>),
            (Qss1Flipflop, Flipflop<1>),
            (Qss1Filter, Filter<1>),
            (Qss1Power, Power<1>),
            (Qss1Square, Square<1>),
            (Qss1Sum2, Sum<1, 2>),
            (Qss1Sum3, Sum<1, 3>),
            (Qss1Sum4, Sum<1, 4>),
            (Qss1Wsum2, WSum<1, 2>),
            (Qss1Wsum3, WSum<1, 3>),
            (Qss1Wsum4, WSum<1, 4>),
            (Qss1Inverse, Inverse<1>),
            (Qss1Integer, Integer<1>),
            (Qss1Compare, Compare<1>),
            (Qss1Gain, Gain<1>),
            (Qss1Sin, Sin<1>),
            (Qss1Cos, Cos<1>),
            (Qss1Log, Log<1>),
            (Qss1Exp, Exp<1>),
            (Qss2Integrator, integrator::Integrator2),
            (Qss2Multiplier, Multiplier<2>),
            (Qss2Cross, Cross<2>),
            (Qss2Flipflop, Flipflop<2>),
            (Qss2Filter, Filter<2>),
            (Qss2Power, Power<2>),
            (Qss2Square, Square<2>),
            (Qss2Sum2, Sum<2, 2>),
            (Qss2Sum3, Sum<2, 3>),
            (Qss2Sum4, Sum<2, 4>),
            (Qss2Wsum2, WSum<2, 2>),
            (Qss2Wsum3, WSum<2, 3>),
            (Qss2Wsum4, WSum<2, 4>),
            (Qss2Inverse, Inverse<2>),
            (Qss2Integer, Integer<2>),
            (Qss2Compare, Compare<2>),
            (Qss2Gain, Gain<2>),
            (Qss2Sin, Sin<2>),
            (Qss2Cos, Cos<2>),
            (Qss2Log, Log<2>),
            (Qss2Exp, Exp<2>),
            (Qss3Integrator, integrator::Integrator3),
            (Qss3Multiplier, Multiplier<3>),
            (Qss3Cross, Cross<3>),
            (Qss3Flipflop, Flipflop<3>),
            (Qss3Filter, Filter<3>),
            (Qss3Power, Power<3>),
            (Qss3Square, Square<3>),
            (Qss3Sum2, Sum<3, 2>),
            (Qss3Sum3, Sum<3, 3>),
            (Qss3Sum4, Sum<3, 4>),
            (Qss3Wsum2, WSum<3, 2>),
            (Qss3Wsum3, WSum<3, 3>),
            (Qss3Wsum4, WSum<3, 4>),
            (Qss3Inverse, Inverse<3>),
            (Qss3Integer, Integer<3>),
            (Qss3Compare, Compare<3>),
            (Qss3Gain, Gain<3>),
            (Qss3Sin, Sin<3>),
            (Qss3Cos, Cos<3>),
            (Qss3Log, Log<3>),
            (Qss3Exp, Exp<3>),
            (Counter, Counter),
            (Queue, Queue),
            (DynamicQueue, DynamicQueue),
            (PriorityQueue, PriorityQueue),
            (Generator, Generator),
            (Constant, Constant),
            (TimeFunc, TimeFunc),
            (Accumulator2, Accumulator2),
            (LogicalAnd2, Logical<2>),
            (LogicalAnd3, Logical<3>),
            (LogicalOr2, Logical<2>),
            (LogicalOr3, Logical<3>),
            (LogicalInvert, LogicalInvert),
            (HsmWrapper, HsmWrapper),
        }
    };
}

macro_rules! declare_dynamics {
    ($(($variant:ident, $ty:ty)),+ $(,)?) => {
        /// Inline dynamics payload, one variant per atom kind.
        #[derive(Clone)]
        pub enum Dynamics {
            $($variant($ty),)+
        }

        /// Fieldless tag for [`Dynamics`]. The archive format stores the
        /// declaration-order ordinal.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum DynamicsKind {
            $($variant,)+
        }

        impl DynamicsKind {
            pub const ALL: &'static [DynamicsKind] = &[$(DynamicsKind::$variant,)+];

            pub fn ordinal(self) -> u8 {
                self as u8
            }

            pub fn from_ordinal(value: u8) -> Option<Self> {
                Self::ALL.get(value as usize).copied()
            }
        }

        impl Dynamics {
            fn new_default(kind: DynamicsKind) -> Self {
                match kind {
                    $(DynamicsKind::$variant => Dynamics::$variant(<$ty>::default()),)+
                }
            }

            pub fn kind(&self) -> DynamicsKind {
                match self {
                    $(Dynamics::$variant(_) => DynamicsKind::$variant,)+
                }
            }

            pub fn sigma(&self) -> Time {
                match self {
                    $(Dynamics::$variant(d) => d.sigma(),)+
                }
            }

            pub(crate) fn initialize(&mut self, env: &mut Env) -> Status {
                match self {
                    $(Dynamics::$variant(d) => d.initialize(env),)+
                }
            }

            pub(crate) fn transition(
                &mut self,
                env: &mut Env,
                t: Time,
                e: Time,
                r: Time,
            ) -> Status {
                match self {
                    $(Dynamics::$variant(d) => d.transition(env, t, e, r),)+
                }
            }

            pub(crate) fn lambda(&mut self, env: &mut Env) -> Status {
                match self {
                    $(Dynamics::$variant(d) => d.lambda(env),)+
                }
            }

            pub fn observation(&self, t: Time, e: Time) -> ObservationMessage {
                match self {
                    $(Dynamics::$variant(d) => d.observation(t, e),)+
                }
            }

            pub(crate) fn finalize(&mut self, env: &mut Env) -> Status {
                match self {
                    $(Dynamics::$variant(d) => d.finalize(env),)+
                }
            }

            pub fn input_ports(&self) -> &[InputPort] {
                match self {
                    $(Dynamics::$variant(d) => d.input_ports(),)+
                }
            }

            pub fn input_ports_mut(&mut self) -> &mut [InputPort] {
                match self {
                    $(Dynamics::$variant(d) => d.input_ports_mut(),)+
                }
            }

            pub fn output_ports(&self) -> &[OutputPortId] {
                match self {
                    $(Dynamics::$variant(d) => d.output_ports(),)+
                }
            }

            pub fn output_ports_mut(&mut self) -> &mut [OutputPortId] {
                match self {
                    $(Dynamics::$variant(d) => d.output_ports_mut(),)+
                }
            }

            pub(crate) fn persist(
                &mut self,
                io: &mut dyn Codec,
            ) -> Result<(), ArchiveError> {
                match self {
                    $(Dynamics::$variant(d) => d.persist(io),)+
                }
            }
        }
    };
}

dynamics_table!(declare_dynamics);

impl Dynamics {
    /// Build a default payload for `kind`. The or-gates share the and-gate
    /// payload type, so their operator is fixed up here.
    pub fn new(kind: DynamicsKind) -> Self {
        let mut dynamics = Self::new_default(kind);
        match &mut dynamics {
            Dynamics::LogicalOr2(gate) => gate.op = LogicalOp::Or,
            Dynamics::LogicalOr3(gate) => gate.op = LogicalOp::Or,
            _ => {}
        }
        dynamics
    }

    /// The QSS level of the atom, `None` for the discrete-event kinds.
    /// Drives observer interpolation.
    pub fn qss_level(&self) -> Option<u8> {
        let ordinal = self.kind().ordinal();
        match ordinal {
            0..=20 => Some(1),
            21..=41 => Some(2),
            42..=62 => Some(3),
            _ => None,
        }
    }
}
