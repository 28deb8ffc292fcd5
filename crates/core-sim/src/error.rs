//! The kernel error surface.
//!
//! Every mutating kernel call returns [`Status`]. The kernel never panics in
//! release builds and leaves state unchanged on the failure paths where that
//! is possible; contract violations (stale ids handed to infallible entry
//! points, popping an empty scheduler) are `debug_assert!`ed instead.

use core_hsm::HsmError;
use core_source::SourceError;

pub type Status = Result<(), SimulationError>;

#[derive(Debug, thiserror::Error)]
pub enum SimulationError {
    #[error("integrator initial value must be finite")]
    IntegratorValue,
    #[error("integrator quantum must be finite and positive")]
    IntegratorQuantum,
    #[error("weighted sum coefficient must be finite")]
    WsumCoefficient,
    #[error("power exponent must be finite")]
    PowerExponent,
    #[error("logarithm input must be strictly positive")]
    LogDomain,
    #[error("inverse input must be non-zero")]
    InverseDomain,
    #[error("compare output values must be finite")]
    CompareOutput,
    #[error("filter thresholds must satisfy lower < upper")]
    FilterThresholds,
    #[error("generator time-advance source failed to initialize")]
    GeneratorTaInit,
    #[error("generator value source failed to initialize")]
    GeneratorValueInit,
    #[error("time advance must be finite and non-negative")]
    TaAbnormal,
    #[error("constant value must be finite")]
    ConstantValue,
    #[error("constant offset must be finite and non-negative")]
    ConstantOffset,
    #[error("time function offset must be finite and non-negative")]
    TimeFuncOffset,
    #[error("time function timestep must be finite and positive")]
    TimeFuncTimestep,
    #[error("queue time advance must be positive")]
    QueueTa,

    #[error("emitting output port list cannot grow")]
    EmittingOutputPortsFull,
    #[error("message buffer cannot grow")]
    MessagesContainerFull,
    #[error("dated message containers cannot grow")]
    DatedMessagesFull,
    #[error("connection containers cannot grow")]
    ConnectionContainerFull,
    #[error("models container cannot grow")]
    ModelsContainerFull,
    #[error("observers container cannot grow")]
    ObserversContainerFull,

    #[error("connection endpoints are incompatible")]
    ConnectionIncompatible,
    #[error("connection already exists")]
    ConnectionAlreadyExists,
    #[error("model id does not resolve")]
    ModelUnknown,
    #[error("input port index out of range")]
    InputPortUnknown,
    #[error("output port index out of range")]
    OutputPortUnknown,
    #[error("state machine id does not resolve")]
    HsmUnknown,

    #[error(transparent)]
    Hsm(#[from] HsmError),
    #[error(transparent)]
    Source(#[from] SourceError),
}
