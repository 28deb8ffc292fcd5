//! Stateless QSS function atoms: each one re-emits a transform of its
//! input polynomial(s), propagated through the chain rule up to the QSS
//! level, and wakes immediately (`sigma = 0`) whenever any input port
//! delivered a message.

use crate::OutputPortId;
use crate::archive::{ArchiveError, Codec};
use crate::dynamics::Atom;
use crate::env::Env;
use crate::error::{SimulationError, Status};
use crate::message::{Message, ObservationMessage, Time};
use crate::port::InputPort;
use crate::qss;

/// Shared single-input transition: latch the preferred message and re-emit,
/// or go idle.
fn single_input_transition<const L: usize>(
    env: &Env,
    port: InputPort,
    value: &mut [f64; L],
    sigma: &mut Time,
) {
    if let Some(msg) = env.qss_message(port, L) {
        qss::assign(value, &msg);
        *sigma = 0.0;
    } else {
        *sigma = f64::INFINITY;
    }
}

/// `x^n` with exponent parameter `n`.
#[derive(Debug, Clone)]
pub struct Power<const L: usize> {
    pub x: [InputPort; 1],
    pub y: [OutputPortId; 1],
    pub value: [f64; L],
    pub n: f64,
    pub sigma: Time,
}

impl<const L: usize> Default for Power<L> {
    fn default() -> Self {
        Self {
            x: Default::default(),
            y: Default::default(),
            value: [0.0; L],
            n: 1.0,
            sigma: f64::INFINITY,
        }
    }
}

impl<const L: usize> Power<L> {
    fn outputs(&self) -> (f64, f64, f64) {
        let v = &self.value;
        match L {
            1 => (v[0].powf(self.n), 0.0, 0.0),
            2 => (
                v[0].powf(self.n),
                self.n * v[0].powf(self.n - 1.0) * v[1],
                0.0,
            ),
            _ => (
                v[0].powf(self.n),
                self.n * v[0].powf(self.n - 1.0) * v[1],
                self.n * (self.n - 1.0) * v[0].powf(self.n - 2.0) * (v[1] * v[1])
                    + self.n * v[0].powf(self.n - 1.0) * v[2],
            ),
        }
    }
}

impl<const L: usize> Atom for Power<L> {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        if !self.n.is_finite() {
            return Err(SimulationError::PowerExponent);
        }
        self.value = [0.0; L];
        self.sigma = f64::INFINITY;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, _e: Time, _r: Time) -> Status {
        single_input_transition(env, self.x[0], &mut self.value, &mut self.sigma);
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        let (value, slope, derivative) = self.outputs();
        match L {
            1 => env.send(self.y[0], value),
            2 => env.send(self.y[0], (value, slope)),
            _ => env.send(self.y[0], (value, slope, derivative)),
        }
    }

    fn observation(&self, t: Time, e: Time) -> ObservationMessage {
        let (value, slope, derivative) = self.outputs();
        match L {
            1 => ObservationMessage::time_value(t, value),
            2 => qss::observe1(value, slope, t, e),
            _ => qss::observe2(value, slope, derivative, t, e),
        }
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
        io.f64s(&mut self.value)?;
        io.f64(&mut self.n)?;
        io.f64(&mut self.sigma)
    }
}

/// `x^2`, cheaper than `Power` with `n = 2`.
#[derive(Debug, Clone)]
pub struct Square<const L: usize> {
    pub x: [InputPort; 1],
    pub y: [OutputPortId; 1],
    pub value: [f64; L],
    pub sigma: Time,
}

impl<const L: usize> Default for Square<L> {
    fn default() -> Self {
        Self {
            x: Default::default(),
            y: Default::default(),
            value: [0.0; L],
            sigma: f64::INFINITY,
        }
    }
}

impl<const L: usize> Square<L> {
    fn outputs(&self) -> (f64, f64, f64) {
        let v = &self.value;
        match L {
            1 => (v[0] * v[0], 0.0, 0.0),
            2 => (v[0] * v[0], 2.0 * v[0] * v[1], 0.0),
            _ => (
                v[0] * v[0],
                2.0 * v[0] * v[1],
                2.0 * v[0] * v[2] + v[1] * v[1],
            ),
        }
    }
}

impl<const L: usize> Atom for Square<L> {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        self.value = [0.0; L];
        self.sigma = f64::INFINITY;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, _e: Time, _r: Time) -> Status {
        single_input_transition(env, self.x[0], &mut self.value, &mut self.sigma);
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        let (value, slope, derivative) = self.outputs();
        match L {
            1 => env.send(self.y[0], value),
            2 => env.send(self.y[0], (value, slope)),
            _ => env.send(self.y[0], (value, slope, derivative)),
        }
    }

    fn observation(&self, t: Time, e: Time) -> ObservationMessage {
        let (value, slope, derivative) = self.outputs();
        match L {
            1 => ObservationMessage::time_value(t, value),
            2 => qss::observe1(value, slope, t, e),
            _ => qss::observe2(value, slope, derivative, t, e),
        }
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
        io.f64s(&mut self.value)?;
        io.f64(&mut self.sigma)
    }
}

/// N-ary sum. Ports without a fresh message are advanced by their stored
/// slope/curvature so the emitted sum stays consistent across partial
/// updates.
#[derive(Debug, Clone)]
pub struct Sum<const L: usize, const N: usize> {
    pub x: [InputPort; N],
    pub y: [OutputPortId; 1],
    pub values: [[f64; L]; N],
    pub sigma: Time,
}

impl<const L: usize, const N: usize> Default for Sum<L, N> {
    fn default() -> Self {
        Self {
            x: [InputPort::default(); N],
            y: Default::default(),
            values: [[0.0; L]; N],
            sigma: f64::INFINITY,
        }
    }
}

impl<const L: usize, const N: usize> Sum<L, N> {
    fn components(&self) -> [f64; 3] {
        let mut out = [0.0; 3];
        for values in &self.values {
            for (k, value) in values.iter().enumerate() {
                out[k] += value;
            }
        }
        out
    }
}

impl<const L: usize, const N: usize> Atom for Sum<L, N> {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        self.values = [[0.0; L]; N];
        self.sigma = f64::INFINITY;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, e: Time, _r: Time) -> Status {
        let mut message = false;

        for i in 0..N {
            if let Some(msg) = env.qss_message(self.x[i], L) {
                qss::assign(&mut self.values[i], &msg);
                message = true;
            } else {
                qss::advance(&mut self.values[i], e);
            }
        }

        self.sigma = if message { 0.0 } else { f64::INFINITY };
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        env.send(self.y[0], Message(self.components()))
    }

    fn observation(&self, t: Time, e: Time) -> ObservationMessage {
        let [value, slope, derivative] = self.components();
        match L {
            1 => ObservationMessage::time_value(t, value),
            2 => qss::observe1(value, slope, t, e),
            _ => qss::observe2(value, slope, derivative, t, e),
        }
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
        for values in &mut self.values {
            io.f64s(values)?;
        }
        io.f64(&mut self.sigma)
    }
}

/// N-ary weighted sum with per-port coefficients.
#[derive(Debug, Clone)]
pub struct WSum<const L: usize, const N: usize> {
    pub x: [InputPort; N],
    pub y: [OutputPortId; 1],
    pub coeffs: [f64; N],
    pub values: [[f64; L]; N],
    pub sigma: Time,
}

impl<const L: usize, const N: usize> Default for WSum<L, N> {
    fn default() -> Self {
        Self {
            x: [InputPort::default(); N],
            y: Default::default(),
            coeffs: [1.0; N],
            values: [[0.0; L]; N],
            sigma: f64::INFINITY,
        }
    }
}

impl<const L: usize, const N: usize> WSum<L, N> {
    fn components(&self) -> [f64; 3] {
        let mut out = [0.0; 3];
        for (coeff, values) in self.coeffs.iter().zip(&self.values) {
            for (k, value) in values.iter().enumerate() {
                out[k] += coeff * value;
            }
        }
        out
    }
}

impl<const L: usize, const N: usize> Atom for WSum<L, N> {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        if self.coeffs.iter().any(|c| !c.is_finite()) {
            return Err(SimulationError::WsumCoefficient);
        }
        self.values = [[0.0; L]; N];
        self.sigma = f64::INFINITY;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, e: Time, _r: Time) -> Status {
        let mut message = false;

        for i in 0..N {
            if let Some(msg) = env.qss_message(self.x[i], L) {
                qss::assign(&mut self.values[i], &msg);
                message = true;
            } else {
                qss::advance(&mut self.values[i], e);
            }
        }

        self.sigma = if message { 0.0 } else { f64::INFINITY };
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        env.send(self.y[0], Message(self.components()))
    }

    fn observation(&self, t: Time, e: Time) -> ObservationMessage {
        let [value, slope, derivative] = self.components();
        match L {
            1 => ObservationMessage::time_value(t, value),
            2 => qss::observe1(value, slope, t, e),
            _ => qss::observe2(value, slope, derivative, t, e),
        }
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
        io.f64s(&mut self.coeffs)?;
        for values in &mut self.values {
            io.f64s(values)?;
        }
        io.f64(&mut self.sigma)
    }
}

/// Product of two input polynomials, expanded to the level order.
#[derive(Debug, Clone)]
pub struct Multiplier<const L: usize> {
    pub x: [InputPort; 2],
    pub y: [OutputPortId; 1],
    pub values: [[f64; L]; 2],
    pub sigma: Time,
}

impl<const L: usize> Default for Multiplier<L> {
    fn default() -> Self {
        Self {
            x: Default::default(),
            y: Default::default(),
            values: [[0.0; L]; 2],
            sigma: f64::INFINITY,
        }
    }
}

impl<const L: usize> Multiplier<L> {
    fn outputs(&self) -> (f64, f64, f64) {
        let [a, b] = &self.values;
        match L {
            1 => (a[0] * b[0], 0.0, 0.0),
            2 => (a[0] * b[0], a[1] * b[0] + b[1] * a[0], 0.0),
            _ => (
                a[0] * b[0],
                a[1] * b[0] + b[1] * a[0],
                a[0] * b[2] + 2.0 * a[1] * b[1] + a[2] * b[0],
            ),
        }
    }
}

impl<const L: usize> Atom for Multiplier<L> {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        self.values = [[0.0; L]; 2];
        self.sigma = f64::INFINITY;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, _e: Time, _r: Time) -> Status {
        self.sigma = f64::INFINITY;

        for i in 0..2 {
            if let Some(msg) = env.qss_message(self.x[i], L) {
                qss::assign(&mut self.values[i], &msg);
                self.sigma = 0.0;
            }
        }
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        let (value, slope, derivative) = self.outputs();
        match L {
            1 => env.send(self.y[0], value),
            2 => env.send(self.y[0], (value, slope)),
            _ => env.send(self.y[0], (value, slope, derivative)),
        }
    }

    fn observation(&self, t: Time, e: Time) -> ObservationMessage {
        let (value, slope, derivative) = self.outputs();
        match L {
            1 => ObservationMessage::time_value(t, value),
            2 => qss::observe1(value, slope, t, e),
            _ => qss::observe2(value, slope, derivative, t, e),
        }
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
        for values in &mut self.values {
            io.f64s(values)?;
        }
        io.f64(&mut self.sigma)
    }
}

/// `1 / x`; a zero input at emission time is a domain error.
#[derive(Debug, Clone)]
pub struct Inverse<const L: usize> {
    pub x: [InputPort; 1],
    pub y: [OutputPortId; 1],
    pub value: [f64; L],
    pub sigma: Time,
}

impl<const L: usize> Default for Inverse<L> {
    fn default() -> Self {
        Self {
            x: Default::default(),
            y: Default::default(),
            value: [0.0; L],
            sigma: f64::INFINITY,
        }
    }
}

impl<const L: usize> Inverse<L> {
    fn outputs(&self) -> (f64, f64, f64) {
        let v = &self.value;
        match L {
            1 => (1.0 / v[0], 0.0, 0.0),
            2 => (1.0 / v[0], -v[1] / (v[0] * v[0]), 0.0),
            _ => (
                1.0 / v[0],
                -v[1] / (v[0] * v[0]),
                -(v[2] / (v[0] * v[0])) + (2.0 * v[1] * v[1]) / (v[0] * v[0] * v[0]),
            ),
        }
    }
}

impl<const L: usize> Atom for Inverse<L> {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        self.value = [0.0; L];
        self.sigma = f64::INFINITY;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, _e: Time, _r: Time) -> Status {
        single_input_transition(env, self.x[0], &mut self.value, &mut self.sigma);
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        if self.value[0] == 0.0 {
            return Err(SimulationError::InverseDomain);
        }

        let (value, slope, derivative) = self.outputs();
        match L {
            1 => env.send(self.y[0], value),
            2 => env.send(self.y[0], (value, slope)),
            _ => env.send(self.y[0], (value, slope, derivative)),
        }
    }

    fn observation(&self, t: Time, e: Time) -> ObservationMessage {
        if self.value[0] == 0.0 {
            return ObservationMessage([t, f64::INFINITY, f64::INFINITY, f64::INFINITY, 0.0]);
        }

        let (value, slope, derivative) = self.outputs();
        match L {
            1 => ObservationMessage::time_value(t, value),
            2 => qss::observe1(value, slope, t, e),
            _ => qss::observe2(value, slope, derivative, t, e),
        }
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
        io.f64s(&mut self.value)?;
        io.f64(&mut self.sigma)
    }
}

/// `k * x`.
#[derive(Debug, Clone)]
pub struct Gain<const L: usize> {
    pub x: [InputPort; 1],
    pub y: [OutputPortId; 1],
    pub value: [f64; L],
    pub k: f64,
    pub sigma: Time,
}

impl<const L: usize> Default for Gain<L> {
    fn default() -> Self {
        Self {
            x: Default::default(),
            y: Default::default(),
            value: [0.0; L],
            k: 1.0,
            sigma: f64::INFINITY,
        }
    }
}

impl<const L: usize> Atom for Gain<L> {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        self.value = [0.0; L];
        self.sigma = f64::INFINITY;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, _e: Time, _r: Time) -> Status {
        single_input_transition(env, self.x[0], &mut self.value, &mut self.sigma);
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        let v = &self.value;
        match L {
            1 => env.send(self.y[0], self.k * v[0]),
            2 => env.send(self.y[0], (self.k * v[0], self.k * v[1])),
            _ => env.send(self.y[0], (self.k * v[0], self.k * v[1], self.k * v[2])),
        }
    }

    fn observation(&self, t: Time, e: Time) -> ObservationMessage {
        let v = &self.value;
        match L {
            1 => ObservationMessage::time_value(t, self.k * v[0]),
            2 => qss::observe1(self.k * v[0], self.k * v[1], t, e),
            _ => qss::observe2(self.k * v[0], self.k * v[1], self.k * v[2], t, e),
        }
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
        io.f64s(&mut self.value)?;
        io.f64(&mut self.k)?;
        io.f64(&mut self.sigma)
    }
}

macro_rules! chain_rule_atom {
    (
        $(#[$meta:meta])*
        $name:ident,
        |$v:ident| ($value:expr, $slope:expr, $derivative:expr),
        guard: |$g:ident| $guard:expr
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name<const L: usize> {
            pub x: [InputPort; 1],
            pub y: [OutputPortId; 1],
            pub value: [f64; L],
            pub sigma: Time,
        }

        impl<const L: usize> Default for $name<L> {
            fn default() -> Self {
                Self {
                    x: Default::default(),
                    y: Default::default(),
                    value: [0.0; L],
                    sigma: f64::INFINITY,
                }
            }
        }

        impl<const L: usize> $name<L> {
            fn outputs(&self) -> (f64, f64, f64) {
                let $v = &self.value;
                match L {
                    1 => ($value, 0.0, 0.0),
                    2 => ($value, $slope, 0.0),
                    _ => ($value, $slope, $derivative),
                }
            }
        }

        impl<const L: usize> Atom for $name<L> {
            fn sigma(&self) -> Time {
                self.sigma
            }

            fn initialize(&mut self, _env: &mut Env) -> Status {
                self.value = [0.0; L];
                self.sigma = f64::INFINITY;
                Ok(())
            }

            fn transition(&mut self, env: &mut Env, _t: Time, _e: Time, _r: Time) -> Status {
                single_input_transition(env, self.x[0], &mut self.value, &mut self.sigma);
                Ok(())
            }

            fn lambda(&mut self, env: &mut Env) -> Status {
                {
                    let $g = &self.value;
                    $guard
                }

                let (value, slope, derivative) = self.outputs();
                match L {
                    1 => env.send(self.y[0], value),
                    2 => env.send(self.y[0], (value, slope)),
                    _ => env.send(self.y[0], (value, slope, derivative)),
                }
            }

            fn observation(&self, t: Time, e: Time) -> ObservationMessage {
                let (value, slope, derivative) = self.outputs();
                match L {
                    1 => ObservationMessage::time_value(t, value),
                    2 => qss::observe1(value, slope, t, e),
                    _ => qss::observe2(value, slope, derivative, t, e),
                }
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
                io.f64s(&mut self.value)?;
                io.f64(&mut self.sigma)
            }
        }
    };
}

chain_rule_atom!(
    /// `exp(x)`.
    Exp,
    |v| (
        v[0].exp(),
        v[0].exp() * v[1],
        v[0].exp() * (v[1] * v[1] + v[2])
    ),
    guard: |_v| {}
);

chain_rule_atom!(
    /// `ln(x)`; non-positive input at emission time is a domain error.
    Log,
    |v| (
        v[0].ln(),
        v[1] / v[0],
        -(v[1] * v[1]) / (v[0] * v[0]) + v[2] / v[0]
    ),
    guard: |v| if v[0] <= 0.0 {
        return Err(SimulationError::LogDomain);
    }
);

chain_rule_atom!(
    /// `sin(x)`.
    Sin,
    |v| (
        v[0].sin(),
        v[0].cos() * v[1],
        -v[0].sin() * v[1] * v[1] + v[0].cos() * v[2]
    ),
    guard: |_v| {}
);

chain_rule_atom!(
    /// `cos(x)`.
    Cos,
    |v| (
        v[0].cos(),
        -v[0].sin() * v[1],
        -v[0].cos() * v[1] * v[1] - v[0].sin() * v[2]
    ),
    guard: |_v| {}
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_components_accumulate_per_level() {
        let mut sum: Sum<2, 3> = Sum::default();
        sum.values = [[1.0, 0.5], [2.0, 0.25], [3.0, 0.25]];

        let [value, slope, derivative] = sum.components();
        assert_eq!(value, 6.0);
        assert_eq!(slope, 1.0);
        assert_eq!(derivative, 0.0);
    }

    #[test]
    fn wsum_applies_coefficients() {
        let mut wsum: WSum<1, 2> = WSum::default();
        wsum.coeffs = [2.0, -1.0];
        wsum.values = [[3.0], [1.0]];

        assert_eq!(wsum.components()[0], 5.0);
    }

    #[test]
    fn wsum_rejects_non_finite_coefficients() {
        let mut wsum: WSum<1, 2> = WSum::default();
        wsum.coeffs = [f64::NAN, 1.0];

        let mut env = Env::new();
        assert!(matches!(
            wsum.initialize(&mut env),
            Err(SimulationError::WsumCoefficient)
        ));
    }

    #[test]
    fn multiplier_product_rule() {
        let mut product: Multiplier<3> = Multiplier::default();
        product.values = [[2.0, 3.0, 1.0], [5.0, 7.0, 2.0]];

        let (value, slope, derivative) = product.outputs();
        assert_eq!(value, 10.0);
        assert_eq!(slope, 3.0 * 5.0 + 7.0 * 2.0);
        assert_eq!(derivative, 2.0 * 2.0 + 2.0 * 3.0 * 7.0 + 1.0 * 5.0);
    }

    #[test]
    fn power_exponent_must_be_finite() {
        let mut power: Power<1> = Power::default();
        power.n = f64::INFINITY;

        let mut env = Env::new();
        assert!(matches!(
            power.initialize(&mut env),
            Err(SimulationError::PowerExponent)
        ));
    }

    #[test]
    fn chain_rule_outputs_match_derivatives() {
        let mut exp: Exp<3> = Exp::default();
        exp.value = [1.0, 2.0, 0.5];
        let (value, slope, derivative) = exp.outputs();
        assert!((value - 1.0f64.exp()).abs() < 1e-12);
        assert!((slope - 1.0f64.exp() * 2.0).abs() < 1e-12);
        assert!((derivative - 1.0f64.exp() * (4.0 + 0.5)).abs() < 1e-12);

        let mut log: Log<2> = Log::default();
        log.value = [2.0, 4.0];
        let (value, slope, _) = log.outputs();
        assert!((value - 2.0f64.ln()).abs() < 1e-12);
        assert!((slope - 2.0).abs() < 1e-12);
    }

    #[test]
    fn inverse_emits_domain_error_on_zero() {
        let mut inverse: Inverse<1> = Inverse::default();
        let mut env = Env::new();
        assert!(matches!(
            inverse.lambda(&mut env),
            Err(SimulationError::InverseDomain)
        ));
    }
}
