//! Discrete-event simulation kernel: QSS1/2/3 integrators, the classical
//! DEVS atom family, hierarchical state machine wrappers, and the
//! event-driven driver that binds them together.
//!
//! The kernel is single-threaded with respect to one [`Simulation`]. The
//! host owns the loop: [`Simulation::initialize`] once, then
//! [`Simulation::run`] per step until the time limit expires, then
//! [`Simulation::finalize`]. One step pops every model tied at the earliest
//! next-event time, runs their output functions, fans the staged messages
//! out to connected input ports, runs the state transitions and puts each
//! model back into the scheduler at its new event time.
//!
//! Ownership is strictly tree-shaped: the simulation owns all arenas; models
//! own their inline dynamics payload; the scheduler owns one heap node per
//! live model (the model keeps only the `u32` handle); output ports own
//! their fan-out edge blocks; observers own their two ring buffers. Nothing
//! in the kernel is reference-counted and nothing on the per-step path
//! allocates when capacities are warm.

mod compat;
mod env;
mod error;
mod message;
mod observer;
mod parameter;
mod port;
mod qss;
mod scheduler;
mod simulation;

pub mod archive;
pub mod dynamics;

pub use compat::is_ports_compatible;
pub use env::Env;
pub use error::{SimulationError, Status};
pub use message::{DatedMessage, Message, ObservationMessage, Time};
pub use observer::{InterpolateKind, Observation, Observer, ObserverFlags};
pub use parameter::Parameter;
pub use port::{BlockNode, Edge, EdgeList, InputPort, OutputPort};
pub use scheduler::Scheduler;
pub use simulation::{Model, ReserveDefinition, Simulation, TimeLimit};

/// Re-exports of the collaborating crates, so hosts wire sources and state
/// machine tables without naming the member crates directly.
pub use core_hsm as hsm;
pub use core_source as source;

use core_arena::{define_id32, define_id64};

define_id64!(pub struct ModelId);
define_id64!(pub struct OutputPortId);
define_id64!(pub struct BlockNodeId);
define_id64!(pub struct ObserverId);
define_id64!(pub struct DatedMessageId);
define_id32!(pub struct HsmId);

/// Heap handle sentinel stored in models that are not scheduled.
pub use core_sched::{Handle, INVALID_HANDLE};
