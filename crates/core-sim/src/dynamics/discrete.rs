//! Threshold- and event-driven QSS atoms: rounding, comparison, zero
//! crossing, band filtering and latching.

use crate::OutputPortId;
use crate::archive::{ArchiveError, Codec};
use crate::dynamics::Atom;
use crate::env::Env;
use crate::error::{SimulationError, Status};
use crate::message::{ObservationMessage, Time};
use crate::port::InputPort;
use crate::qss;

/// Near-threshold tolerance (2^-30). Exact float comparison against the
/// threshold chatters; inside this band the crossing direction is decided by
/// the slope sign (QSS2/3) or the previous sample (QSS1).
pub const NEAR_THRESHOLD: f64 = 9.313_225_746_154_785e-10;

/// Wake-up delay until a level-`L` polynomial crosses `threshold`.
fn threshold_wake_up<const L: usize>(threshold: f64, value: &[f64; L]) -> Time {
    match L {
        1 => f64::INFINITY,
        2 => qss::wake_up_linear(threshold, value[0], value[1]),
        _ => qss::wake_up_quadratic(threshold, value[0], value[1], value[2]),
    }
}

/// Emits the integer part of its input, waking itself up for the next
/// integer-line crossing.
#[derive(Debug, Clone)]
pub struct Integer<const L: usize> {
    pub x: [InputPort; 1],
    pub y: [OutputPortId; 1],

    pub value: [f64; L],
    pub sigma: Time,
    pub upper: f64,
    pub lower: f64,
    pub to_send: f64,
    pub last_sent: f64,
}

impl<const L: usize> Default for Integer<L> {
    fn default() -> Self {
        Self {
            x: Default::default(),
            y: Default::default(),
            value: [0.0; L],
            sigma: f64::INFINITY,
            upper: f64::INFINITY,
            lower: f64::NEG_INFINITY,
            to_send: 0.0,
            last_sent: f64::INFINITY,
        }
    }
}

impl<const L: usize> Integer<L> {
    fn compute_next_cross(&mut self) {
        if self.value[0] < 0.0 {
            self.upper = self.value[0].trunc();
            self.lower = self.upper - 1.0;
        } else {
            self.lower = self.value[0].trunc();
            self.upper = self.lower + 1.0;
        }
    }
}

impl<const L: usize> Atom for Integer<L> {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        *self = Self {
            x: self.x,
            y: self.y,
            ..Self::default()
        };
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, e: Time, _r: Time) -> Status {
        let mut external_cross = false;

        match env.qss_message(self.x[0], L) {
            None => {
                self.last_sent = self.to_send;
                qss::advance(&mut self.value, e);
            }
            Some(msg) => {
                if self.last_sent != msg.value().trunc() {
                    external_cross = true;
                }
                qss::assign(&mut self.value, &msg);
            }
        }

        self.compute_next_cross();

        if external_cross {
            self.to_send = self.value[0];
            self.sigma = 0.0;
        } else {
            match L {
                1 => {
                    self.sigma = f64::INFINITY;
                    self.to_send = self.value[0];
                }
                2 => {
                    self.sigma = qss::wake_up_linear(self.upper, self.value[0], self.value[1])
                        .min(qss::wake_up_linear(self.lower, self.value[0], self.value[1]));
                    self.to_send = self.value[0] + self.value[1] * self.sigma;
                }
                _ => {
                    self.sigma = qss::wake_up_quadratic(
                        self.upper,
                        self.value[0],
                        self.value[1],
                        self.value[2],
                    )
                    .min(qss::wake_up_quadratic(
                        self.lower,
                        self.value[0],
                        self.value[1],
                        self.value[2],
                    ));
                    self.to_send = self.value[0]
                        + self.value[1] * self.sigma
                        + self.value[2] * self.sigma * self.sigma;
                }
            }
        }

        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        env.send(self.y[0], self.to_send.trunc())
    }

    fn observation(&self, t: Time, e: Time) -> ObservationMessage {
        let projected = match L {
            1 => self.value[0],
            2 => self.value[0] + self.value[1] * e,
            _ => self.value[0] + self.value[1] * e + self.value[2] * e * e,
        };
        ObservationMessage::time_value(t, projected.trunc())
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
        io.f64(&mut self.sigma)?;
        io.f64(&mut self.upper)?;
        io.f64(&mut self.lower)?;
        io.f64(&mut self.to_send)?;
        io.f64(&mut self.last_sent)
    }
}

/// Emits one of two configured values depending on the sign of `a - b`,
/// waking itself up at the projected sign change of the difference
/// polynomial.
#[derive(Debug, Clone)]
pub struct Compare<const L: usize> {
    pub x: [InputPort; 2],
    pub y: [OutputPortId; 1],

    pub a: [f64; L],
    pub b: [f64; L],
    /// `output[0]` when `a >= b`, `output[1]` when `a < b`.
    pub output: [f64; 2],
    pub sigma: Time,
    pub is_a_less_b: bool,
}

impl<const L: usize> Default for Compare<L> {
    fn default() -> Self {
        Self {
            x: Default::default(),
            y: Default::default(),
            a: [0.0; L],
            b: [0.0; L],
            output: [0.0, 1.0],
            sigma: f64::INFINITY,
            is_a_less_b: false,
        }
    }
}

impl<const L: usize> Compare<L> {
    fn compute_next_cross(&self) -> Time {
        match L {
            1 => f64::INFINITY,
            2 => {
                let dv = self.a[1] - self.b[1];
                let dx = self.a[0] - self.b[0];
                if dv == 0.0 {
                    return f64::INFINITY;
                }
                let s = -dx / dv;
                if s > 0.0 { s } else { f64::INFINITY }
            }
            _ => qss::smallest_positive_quadratic(
                self.a[2] - self.b[2],
                self.a[1] - self.b[1],
                self.a[0] - self.b[0],
            ),
        }
    }

    fn current(&self) -> f64 {
        self.output[usize::from(self.is_a_less_b)]
    }
}

impl<const L: usize> Atom for Compare<L> {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        if !self.output[0].is_finite() || !self.output[1].is_finite() {
            return Err(SimulationError::CompareOutput);
        }

        self.a = [0.0; L];
        self.b = [0.0; L];
        self.sigma = f64::INFINITY;
        self.is_a_less_b = false;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, e: Time, _r: Time) -> Status {
        let msg_a = env.qss_message(self.x[0], L);
        let msg_b = env.qss_message(self.x[1], L);

        match msg_a {
            Some(msg) => qss::assign(&mut self.a, &msg),
            None => qss::advance(&mut self.a, e),
        }
        match msg_b {
            Some(msg) => qss::assign(&mut self.b, &msg),
            None => qss::advance(&mut self.b, e),
        }

        let cross = self.compute_next_cross();
        let diff = self.a[0] - self.b[0];
        if diff > 0.0 && self.is_a_less_b {
            self.is_a_less_b = false;
            self.sigma = 0.0;
        } else if diff < 0.0 && !self.is_a_less_b {
            self.is_a_less_b = true;
            self.sigma = 0.0;
        } else {
            self.sigma = cross;
        }

        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        env.send(self.y[0], self.current())
    }

    fn observation(&self, t: Time, _e: Time) -> ObservationMessage {
        ObservationMessage::time_value(t, self.current())
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
        io.f64s(&mut self.a)?;
        io.f64s(&mut self.b)?;
        io.f64s(&mut self.output)?;
        io.f64(&mut self.sigma)?;
        io.bool(&mut self.is_a_less_b)
    }
}

/// Which side of the threshold the crossed value sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CrossZone {
    #[default]
    Undefined = 0,
    Up = 1,
    Down = 2,
}

impl CrossZone {
    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => CrossZone::Up,
            2 => CrossZone::Down,
            _ => CrossZone::Undefined,
        }
    }
}

/// Threshold-crossing detector with two output ports, one per direction.
/// The zone is sticky: the atom emits only when the polynomial actually
/// crosses, with the [`NEAR_THRESHOLD`] band resolved by slope sign (or the
/// previous sample at level 1).
#[derive(Debug, Clone)]
pub struct Cross<const L: usize> {
    pub x: [InputPort; 2],
    pub y: [OutputPortId; 2],

    /// `[0]` emitted on the up port, `[1]` on the down port.
    pub output_values: [f64; 2],
    pub value: [f64; L],
    pub threshold: f64,
    pub sigma: Time,
    pub zone: CrossZone,
}

pub(crate) const CROSS_PORT_VALUE: usize = 0;
pub(crate) const CROSS_PORT_THRESHOLD: usize = 1;
pub(crate) const CROSS_OUT_UP: usize = 0;
pub(crate) const CROSS_OUT_DOWN: usize = 1;

impl<const L: usize> Default for Cross<L> {
    fn default() -> Self {
        Self {
            x: Default::default(),
            y: Default::default(),
            output_values: [1.0, 1.0],
            value: [0.0; L],
            threshold: 0.0,
            sigma: f64::INFINITY,
            zone: CrossZone::Undefined,
        }
    }
}

impl<const L: usize> Cross<L> {
    fn compute_zone(&self, old_value: f64) -> CrossZone {
        if (self.value[0] - self.threshold).abs() < NEAR_THRESHOLD {
            if L == 1 {
                if old_value > self.value[0] {
                    CrossZone::Down
                } else {
                    CrossZone::Up
                }
            } else if self.value[1] >= 0.0 {
                CrossZone::Up
            } else {
                CrossZone::Down
            }
        } else if self.value[0] >= self.threshold {
            CrossZone::Up
        } else {
            CrossZone::Down
        }
    }
}

impl<const L: usize> Atom for Cross<L> {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        self.value = [0.0; L];
        self.sigma = f64::INFINITY;
        self.zone = CrossZone::Undefined;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, e: Time, _r: Time) -> Status {
        if let Some(msg) = env.qss_message(self.x[CROSS_PORT_THRESHOLD], L) {
            self.threshold = msg.value();
        }

        let old_value = self.value[0];
        match env.qss_message(self.x[CROSS_PORT_VALUE], L) {
            Some(msg) => qss::assign(&mut self.value, &msg),
            None => qss::advance(&mut self.value, e),
        }

        let new_zone = self.compute_zone(old_value);
        if new_zone != self.zone {
            self.zone = new_zone;
            self.sigma = 0.0;
        } else {
            self.sigma = threshold_wake_up(self.threshold, &self.value);
        }

        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        match self.zone {
            CrossZone::Up => env.send(self.y[CROSS_OUT_UP], self.output_values[0]),
            _ => env.send(self.y[CROSS_OUT_DOWN], self.output_values[1]),
        }
    }

    fn observation(&self, t: Time, e: Time) -> ObservationMessage {
        match L {
            1 => ObservationMessage::time_value(t, self.value[0]),
            2 => qss::observe1(self.value[0], self.value[1], t, e),
            _ => qss::observe2(self.value[0], self.value[1], self.value[2], t, e),
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
        io.f64s(&mut self.output_values)?;
        io.f64s(&mut self.value)?;
        io.f64(&mut self.threshold)?;
        io.f64(&mut self.sigma)?;

        let mut zone = self.zone as u8;
        io.u8(&mut zone)?;
        self.zone = CrossZone::from_u8(zone);
        Ok(())
    }
}

/// Clamps its input into `[lower, upper]` on port 0 and pulses ports 1/2
/// when the band edges are hit.
#[derive(Debug, Clone)]
pub struct Filter<const L: usize> {
    pub x: [InputPort; 1],
    pub y: [OutputPortId; 3],

    pub sigma: Time,
    pub lower: f64,
    pub upper: f64,
    pub value: [f64; L],
    pub reach_lower: bool,
    pub reach_upper: bool,
}

pub(crate) const FILTER_OUT_VALUE: usize = 0;
pub(crate) const FILTER_OUT_UPPER: usize = 1;
pub(crate) const FILTER_OUT_LOWER: usize = 2;

impl<const L: usize> Default for Filter<L> {
    fn default() -> Self {
        Self {
            x: Default::default(),
            y: Default::default(),
            sigma: f64::INFINITY,
            lower: f64::NEG_INFINITY,
            upper: f64::INFINITY,
            value: [0.0; L],
            reach_lower: false,
            reach_upper: false,
        }
    }
}

impl<const L: usize> Atom for Filter<L> {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        if !(self.lower < self.upper) {
            return Err(SimulationError::FilterThresholds);
        }

        self.reach_lower = false;
        self.reach_upper = false;
        self.value = [0.0; L];
        self.sigma = f64::INFINITY;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, e: Time, _r: Time) -> Status {
        match env.qss_message(self.x[0], L) {
            Some(msg) => qss::assign(&mut self.value, &msg),
            None => qss::advance(&mut self.value, e),
        }

        self.reach_lower = false;
        self.reach_upper = false;

        if self.value[0] >= self.upper {
            self.reach_upper = true;
            self.sigma = 0.0;
        } else if self.value[0] <= self.lower {
            self.reach_lower = true;
            self.sigma = 0.0;
        } else {
            self.sigma = threshold_wake_up(self.upper, &self.value)
                .min(threshold_wake_up(self.lower, &self.value));
        }

        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        let value = qss::emit(&self.value);

        if self.reach_upper {
            env.send(self.y[FILTER_OUT_VALUE], self.upper)?;
            env.send(self.y[FILTER_OUT_UPPER], 1.0)?;
        } else {
            env.send(self.y[FILTER_OUT_VALUE], value)?;
            env.send(self.y[FILTER_OUT_UPPER], 0.0)?;
        }

        if self.reach_lower {
            env.send(self.y[FILTER_OUT_VALUE], self.lower)?;
            env.send(self.y[FILTER_OUT_LOWER], 1.0)?;
        } else {
            env.send(self.y[FILTER_OUT_VALUE], value)?;
            env.send(self.y[FILTER_OUT_LOWER], 0.0)?;
        }

        Ok(())
    }

    fn observation(&self, t: Time, e: Time) -> ObservationMessage {
        if self.reach_upper {
            return ObservationMessage::time_value(t, self.upper);
        }
        if self.reach_lower {
            return ObservationMessage::time_value(t, self.lower);
        }

        match L {
            1 => ObservationMessage::time_value(t, self.value[0]),
            2 => qss::observe1(self.value[0], self.value[1], t, e),
            _ => qss::observe2(self.value[0], self.value[1], self.value[2], t, e),
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
        io.f64(&mut self.sigma)?;
        io.f64(&mut self.lower)?;
        io.f64(&mut self.upper)?;
        io.f64s(&mut self.value)?;
        io.bool(&mut self.reach_lower)?;
        io.bool(&mut self.reach_upper)
    }
}

/// Latches the polynomial on its input port and re-emits it only when the
/// event port fires.
#[derive(Debug, Clone)]
pub struct Flipflop<const L: usize> {
    pub x: [InputPort; 2],
    pub y: [OutputPortId; 1],

    pub value: [f64; L],
    pub sigma: Time,
}

pub(crate) const FLIPFLOP_PORT_IN: usize = 0;
pub(crate) const FLIPFLOP_PORT_EVENT: usize = 1;

impl<const L: usize> Default for Flipflop<L> {
    fn default() -> Self {
        let mut value = [0.0; L];
        value[0] = f64::INFINITY;
        Self {
            x: Default::default(),
            y: Default::default(),
            value,
            sigma: f64::INFINITY,
        }
    }
}

impl<const L: usize> Atom for Flipflop<L> {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        self.value = [0.0; L];
        // The latch starts empty; an infinite value marks "nothing seen".
        self.value[0] = f64::INFINITY;
        self.sigma = f64::INFINITY;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, e: Time, _r: Time) -> Status {
        match env.qss_message(self.x[FLIPFLOP_PORT_IN], L) {
            Some(msg) => qss::assign(&mut self.value, &msg),
            None => qss::advance(&mut self.value, e),
        }

        self.sigma = if self.x[FLIPFLOP_PORT_EVENT].is_empty() {
            f64::INFINITY
        } else {
            0.0
        };
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        if self.value[0] != f64::INFINITY {
            return env.send(self.y[0], qss::emit(&self.value));
        }
        Ok(())
    }

    fn observation(&self, t: Time, e: Time) -> ObservationMessage {
        match L {
            1 => ObservationMessage::time_value(t, self.value[0]),
            2 => qss::observe1(self.value[0], self.value[1], t, e),
            _ => qss::observe2(self.value[0], self.value[1], self.value[2], t, e),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_threshold_constant_is_two_to_minus_thirty() {
        assert_eq!(NEAR_THRESHOLD, (2.0f64).powi(-30));
    }

    #[test]
    fn cross_zone_uses_slope_in_the_tolerance_band() {
        let mut cross: Cross<2> = Cross::default();
        cross.threshold = 1.0;

        cross.value = [1.0 + NEAR_THRESHOLD / 2.0, 2.0];
        assert_eq!(cross.compute_zone(0.0), CrossZone::Up);

        cross.value = [1.0 - NEAR_THRESHOLD / 2.0, -2.0];
        assert_eq!(cross.compute_zone(0.0), CrossZone::Down);
    }

    #[test]
    fn cross_zone_level1_uses_previous_sample_in_the_band() {
        let mut cross: Cross<1> = Cross::default();
        cross.threshold = 0.0;
        cross.value = [NEAR_THRESHOLD / 4.0];

        assert_eq!(cross.compute_zone(1.0), CrossZone::Down);
        assert_eq!(cross.compute_zone(-1.0), CrossZone::Up);
    }

    #[test]
    fn cross_zone_clear_of_the_band_compares_directly() {
        let mut cross: Cross<3> = Cross::default();
        cross.threshold = 0.5;

        cross.value = [2.0, -1.0, 0.0];
        assert_eq!(cross.compute_zone(0.0), CrossZone::Up);

        cross.value = [-2.0, 1.0, 0.0];
        assert_eq!(cross.compute_zone(0.0), CrossZone::Down);
    }

    #[test]
    fn compare_cross_time_solves_difference_polynomial() {
        let mut compare: Compare<2> = Compare::default();
        compare.a = [0.0, 1.0];
        compare.b = [1.0, 0.0];

        // a - b = -1 + s: sign change at s = 1.
        let s = compare.compute_next_cross();
        assert!((s - 1.0).abs() < 1e-12);
    }

    #[test]
    fn compare_outputs_must_be_finite() {
        let mut compare: Compare<1> = Compare::default();
        compare.output = [f64::NAN, 0.0];

        let mut env = Env::new();
        assert!(matches!(
            compare.initialize(&mut env),
            Err(SimulationError::CompareOutput)
        ));
    }

    #[test]
    fn filter_requires_ordered_thresholds() {
        let mut filter: Filter<1> = Filter::default();
        filter.lower = 1.0;
        filter.upper = 1.0;

        let mut env = Env::new();
        assert!(matches!(
            filter.initialize(&mut env),
            Err(SimulationError::FilterThresholds)
        ));
    }

    #[test]
    fn integer_brackets_negative_values() {
        let mut integer: Integer<1> = Integer::default();
        integer.value = [-2.5];
        integer.compute_next_cross();

        assert_eq!(integer.upper, -2.0);
        assert_eq!(integer.lower, -3.0);

        integer.value = [2.5];
        integer.compute_next_cross();
        assert_eq!(integer.lower, 2.0);
        assert_eq!(integer.upper, 3.0);
    }
}
