//! The QSS integrator family.
//!
//! A level-`n` integrator carries its state `X` as a degree-`n` polynomial
//! fed by the `x_dot` input port and re-quantizes whenever
//! `|X - q| = dQ`. The internal transition advances the polynomial and
//! re-solves the crossing delay; the external transition folds a new
//! derivative in and re-solves against both quanta `q ± dQ`; a message on
//! the `reset` port hard-sets `X` and re-emits immediately.

use crate::OutputPortId;
use crate::archive::{ArchiveError, Codec};
use crate::dynamics::Atom;
use crate::env::Env;
use crate::error::{SimulationError, Status};
use crate::message::{Message, ObservationMessage, Time};
use crate::port::InputPort;
use crate::qss;

pub(crate) const PORT_X_DOT: usize = 0;
pub(crate) const PORT_RESET: usize = 1;

fn check_quantizer(value: f64, dq: f64) -> Status {
    if !value.is_finite() {
        return Err(SimulationError::IntegratorValue);
    }
    if !(dq.is_finite() && dq > 0.0) {
        return Err(SimulationError::IntegratorQuantum);
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Integrator1 {
    pub x: [InputPort; 2],
    pub y: [OutputPortId; 1],

    pub dq: f64,
    pub value: f64,
    pub q: f64,
    pub u: f64,
    pub sigma: Time,
}

impl Default for Integrator1 {
    fn default() -> Self {
        Self {
            x: Default::default(),
            y: Default::default(),
            dq: 0.01,
            value: 0.0,
            q: 0.0,
            u: 0.0,
            sigma: 0.0,
        }
    }
}

impl Integrator1 {
    fn internal(&mut self) {
        self.value += self.sigma * self.u;
        self.q = self.value;
        self.sigma = if self.u == 0.0 {
            f64::INFINITY
        } else {
            self.dq / self.u.abs()
        };
    }

    fn external(&mut self, e: Time, msg: &Message) {
        self.value += e * self.u;
        self.u = msg.value();

        if self.sigma != 0.0 {
            self.sigma = if self.u == 0.0 {
                f64::INFINITY
            } else if self.u > 0.0 {
                (self.q + self.dq - self.value) / self.u
            } else {
                (self.q - self.dq - self.value) / self.u
            };
        }
    }

    fn reset(&mut self, msg: &Message) {
        self.value = msg.value();
        self.q = (self.value / self.dq).floor() * self.dq;
        self.u = 0.0;
        self.sigma = 0.0;
    }
}

impl Atom for Integrator1 {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        check_quantizer(self.value, self.dq)?;

        self.q = (self.value / self.dq).floor() * self.dq;
        self.u = 0.0;
        self.sigma = 0.0;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, e: Time, _r: Time) -> Status {
        let x_dot = self.x[PORT_X_DOT];
        let reset = self.x[PORT_RESET];

        if x_dot.is_empty() && reset.is_empty() {
            self.internal();
        } else if let Some(msg) = env.qss_message(reset, 1) {
            self.reset(&msg);
        } else if let Some(msg) = env.qss_message(x_dot, 1) {
            self.external(e, &msg);
        }
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        let value = if self.u == 0.0 {
            self.q
        } else {
            self.q + self.dq * self.u.signum()
        };
        env.send(self.y[0], value)
    }

    fn observation(&self, t: Time, e: Time) -> ObservationMessage {
        qss::observe1(self.value, self.u, t, e)
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
        io.f64(&mut self.dq)?;
        io.f64(&mut self.value)?;
        io.f64(&mut self.q)?;
        io.f64(&mut self.u)?;
        io.f64(&mut self.sigma)
    }
}

#[derive(Debug, Clone)]
pub struct Integrator2 {
    pub x: [InputPort; 2],
    pub y: [OutputPortId; 1],

    pub dq: f64,
    pub value: f64,
    pub u: f64,
    pub mu: f64,
    pub q: f64,
    pub mq: f64,
    pub sigma: Time,
}

impl Default for Integrator2 {
    fn default() -> Self {
        Self {
            x: Default::default(),
            y: Default::default(),
            dq: 0.01,
            value: 0.0,
            u: 0.0,
            mu: 0.0,
            q: 0.0,
            mq: 0.0,
            sigma: 0.0,
        }
    }
}

impl Integrator2 {
    fn internal(&mut self) {
        self.value += self.u * self.sigma + self.mu / 2.0 * self.sigma * self.sigma;
        self.q = self.value;
        self.u += self.mu * self.sigma;
        self.mq = self.u;

        self.sigma = if self.mu == 0.0 {
            f64::INFINITY
        } else {
            (2.0 * self.dq / self.mu.abs()).sqrt()
        };
    }

    fn external(&mut self, e: Time, msg: &Message) {
        self.value += self.u * e + self.mu / 2.0 * e * e;
        self.u = msg.value();
        self.mu = msg.slope();

        if self.sigma != 0.0 {
            self.q += self.mq * e;
            let a = self.mu / 2.0;
            let b = self.u - self.mq;
            let upper = self.value - self.q + self.dq;
            let lower = self.value - self.q - self.dq;

            self.sigma = f64::INFINITY;

            if a == 0.0 {
                if b != 0.0 {
                    let s = -upper / b;
                    if s > 0.0 {
                        self.sigma = s;
                    }
                    let s = -lower / b;
                    if s > 0.0 && s < self.sigma {
                        self.sigma = s;
                    }
                }
            } else {
                // A negative discriminant yields NaN roots; every NaN
                // comparison below is false, leaving sigma untouched.
                for c in [upper, lower] {
                    let sq = (b * b - 4.0 * a * c).sqrt();
                    let s = (-b + sq) / (2.0 * a);
                    if s > 0.0 && s < self.sigma {
                        self.sigma = s;
                    }
                    let s = (-b - sq) / (2.0 * a);
                    if s > 0.0 && s < self.sigma {
                        self.sigma = s;
                    }
                }
            }

            if (self.value - self.q).abs() > self.dq {
                self.sigma = 0.0;
            }
        }
    }

    fn reset(&mut self, msg: &Message) {
        self.value = msg.value();
        self.u = 0.0;
        self.mu = 0.0;
        self.q = self.value;
        self.mq = 0.0;
        self.sigma = 0.0;
    }
}

impl Atom for Integrator2 {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        check_quantizer(self.value, self.dq)?;

        self.u = 0.0;
        self.mu = 0.0;
        self.q = self.value;
        self.mq = 0.0;
        self.sigma = 0.0;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, e: Time, _r: Time) -> Status {
        let x_dot = self.x[PORT_X_DOT];
        let reset = self.x[PORT_RESET];

        if x_dot.is_empty() && reset.is_empty() {
            self.internal();
        } else if let Some(msg) = env.qss_message(reset, 2) {
            self.reset(&msg);
        } else if let Some(msg) = env.qss_message(x_dot, 2) {
            self.external(e, &msg);
        }
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        env.send(
            self.y[0],
            (
                self.value + self.u * self.sigma + self.mu * self.sigma * self.sigma / 2.0,
                self.u + self.mu * self.sigma,
            ),
        )
    }

    fn observation(&self, t: Time, e: Time) -> ObservationMessage {
        qss::observe2(self.value, self.u, self.mu, t, e)
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
        io.f64(&mut self.dq)?;
        io.f64(&mut self.value)?;
        io.f64(&mut self.u)?;
        io.f64(&mut self.mu)?;
        io.f64(&mut self.q)?;
        io.f64(&mut self.mq)?;
        io.f64(&mut self.sigma)
    }
}

#[derive(Debug, Clone)]
pub struct Integrator3 {
    pub x: [InputPort; 2],
    pub y: [OutputPortId; 1],

    pub dq: f64,
    pub value: f64,
    pub u: f64,
    pub mu: f64,
    pub pu: f64,
    pub q: f64,
    pub mq: f64,
    pub pq: f64,
    pub sigma: Time,
}

impl Default for Integrator3 {
    fn default() -> Self {
        Self {
            x: Default::default(),
            y: Default::default(),
            dq: 0.01,
            value: 0.0,
            u: 0.0,
            mu: 0.0,
            pu: 0.0,
            q: 0.0,
            mq: 0.0,
            pq: 0.0,
            sigma: 0.0,
        }
    }
}

impl Integrator3 {
    fn internal(&mut self) {
        let s = self.sigma;
        let s2 = s * s;
        let s3 = s2 * s;

        self.value += self.u * s + self.mu * s2 / 2.0 + self.pu * s3 / 3.0;
        self.q = self.value;
        self.u += self.mu * s + self.pu * s2;
        self.mq = self.u;
        self.mu += 2.0 * self.pu * s;
        self.pq = self.mu / 2.0;

        self.sigma = if self.pu == 0.0 {
            f64::INFINITY
        } else {
            (3.0 * self.dq / self.pu).abs().cbrt()
        };
    }

    /// Re-solve the crossing of `q - dQ` and `q + dQ` after folding in a new
    /// derivative polynomial. The difference `X(s) - q(s) ∓ dQ` is cubic in
    /// `s`; the quadratic and linear fallbacks take over as the leading
    /// coefficients vanish.
    fn external(&mut self, e: Time, msg: &Message) {
        let e2 = e * e;
        let e3 = e2 * e;

        self.value += self.u * e + self.mu * e2 / 2.0 + self.pu * e3 / 3.0;
        self.u = msg.value();
        self.mu = msg.slope();
        self.pu = msg.derivative();

        if self.sigma != 0.0 {
            self.q += self.mq * e + self.pq * e2;
            self.mq += 2.0 * self.pq * e;

            let a = self.mu / 2.0 - self.pq;
            let b = self.u - self.mq;
            let c = self.value - self.q;
            let lower = c - self.dq;
            let upper = c + self.dq;

            self.sigma = if self.pu != 0.0 {
                let scale = 3.0 / self.pu;
                let an = a * scale;
                let bn = b * scale;
                qss::smallest_positive_cubic(an, bn, lower * scale)
                    .min(qss::smallest_positive_cubic(an, bn, upper * scale))
            } else if a != 0.0 {
                qss::smallest_positive_quadratic(a, b, lower)
                    .min(qss::smallest_positive_quadratic(a, b, upper))
            } else if b != 0.0 {
                let mut best = f64::INFINITY;
                for c in [lower, upper] {
                    let s = -c / b;
                    if s > 0.0 && s < best {
                        best = s;
                    }
                }
                best
            } else {
                f64::INFINITY
            };

            if (self.value - self.q).abs() > self.dq {
                self.sigma = 0.0;
            }
        }
    }

    fn reset(&mut self, msg: &Message) {
        self.value = msg.value();
        self.u = 0.0;
        self.mu = 0.0;
        self.pu = 0.0;
        self.q = self.value;
        self.mq = 0.0;
        self.pq = 0.0;
        self.sigma = 0.0;
    }
}

impl Atom for Integrator3 {
    fn sigma(&self) -> Time {
        self.sigma
    }

    fn initialize(&mut self, _env: &mut Env) -> Status {
        check_quantizer(self.value, self.dq)?;

        self.u = 0.0;
        self.mu = 0.0;
        self.pu = 0.0;
        self.q = self.value;
        self.mq = 0.0;
        self.pq = 0.0;
        self.sigma = 0.0;
        Ok(())
    }

    fn transition(&mut self, env: &mut Env, _t: Time, e: Time, _r: Time) -> Status {
        let x_dot = self.x[PORT_X_DOT];
        let reset = self.x[PORT_RESET];

        if x_dot.is_empty() && reset.is_empty() {
            self.internal();
        } else if let Some(msg) = env.qss_message(reset, 3) {
            self.reset(&msg);
        } else if let Some(msg) = env.qss_message(x_dot, 3) {
            self.external(e, &msg);
        }
        Ok(())
    }

    fn lambda(&mut self, env: &mut Env) -> Status {
        let s = self.sigma;
        let s2 = s * s;
        let s3 = s2 * s;

        env.send(
            self.y[0],
            (
                self.value + self.u * s + self.mu * s2 / 2.0 + self.pu * s3 / 3.0,
                self.u + self.mu * s + self.pu * s2,
                self.mu / 2.0 + self.pu * s,
            ),
        )
    }

    fn observation(&self, t: Time, e: Time) -> ObservationMessage {
        qss::observe3(self.value, self.u, self.mu, self.pu, t, e)
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
        io.f64(&mut self.dq)?;
        io.f64(&mut self.value)?;
        io.f64(&mut self.u)?;
        io.f64(&mut self.mu)?;
        io.f64(&mut self.pu)?;
        io.f64(&mut self.q)?;
        io.f64(&mut self.mq)?;
        io.f64(&mut self.pq)?;
        io.f64(&mut self.sigma)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantizer_validation() {
        assert!(check_quantizer(0.0, 0.1).is_ok());
        assert!(matches!(
            check_quantizer(f64::NAN, 0.1),
            Err(SimulationError::IntegratorValue)
        ));
        assert!(matches!(
            check_quantizer(0.0, 0.0),
            Err(SimulationError::IntegratorQuantum)
        ));
        assert!(matches!(
            check_quantizer(0.0, -1.0),
            Err(SimulationError::IntegratorQuantum)
        ));
    }

    #[test]
    fn qss1_internal_advances_one_quantum() {
        let mut integrator = Integrator1 {
            dq: 0.1,
            value: 0.0,
            q: 0.0,
            u: 1.0,
            sigma: 0.1,
            ..Integrator1::default()
        };

        integrator.internal();
        assert!((integrator.value - 0.1).abs() < 1e-12);
        assert_eq!(integrator.q, integrator.value);
        assert!((integrator.sigma - 0.1).abs() < 1e-12, "dq / |u|");
    }

    #[test]
    fn qss1_external_targets_nearest_quantum() {
        let mut integrator = Integrator1 {
            dq: 0.1,
            value: 0.0,
            q: 0.0,
            u: 0.0,
            sigma: f64::INFINITY,
            ..Integrator1::default()
        };

        integrator.external(0.0, &Message::from(2.0));
        assert!((integrator.sigma - 0.05).abs() < 1e-12, "(q + dq - x) / u");

        integrator.external(0.0, &Message::from(-2.0));
        // value advanced to 0 between calls; crossing q - dq going down.
        assert!(integrator.sigma > 0.0 && integrator.sigma.is_finite());
    }

    #[test]
    fn qss2_internal_uses_curvature_for_sigma() {
        let mut integrator = Integrator2 {
            dq: 0.08,
            value: 0.0,
            u: 0.0,
            mu: 4.0,
            q: 0.0,
            mq: 0.0,
            sigma: 0.0,
            ..Integrator2::default()
        };

        integrator.internal();
        let expected = (2.0 * 0.08 / 4.0_f64).sqrt();
        assert!((integrator.sigma - expected).abs() < 1e-12);
    }

    #[test]
    fn qss3_external_solves_the_cubic() {
        let mut integrator = Integrator3 {
            dq: 1.0 / 3.0,
            sigma: f64::INFINITY,
            ..Integrator3::default()
        };

        // Pure curvature input: X(s) = s^3 / 3 crosses dq at s = 1.
        integrator.external(0.0, &Message::from((0.0, 0.0, 1.0)));
        assert!((integrator.sigma - 1.0).abs() < 1e-9);
    }

    #[test]
    fn reset_hard_sets_state() {
        let mut integrator = Integrator3 {
            dq: 0.1,
            value: 5.0,
            u: 1.0,
            mu: 2.0,
            pu: 3.0,
            ..Integrator3::default()
        };

        integrator.reset(&Message::from(-1.0));
        assert_eq!(integrator.value, -1.0);
        assert_eq!(integrator.q, -1.0);
        assert_eq!((integrator.u, integrator.mu, integrator.pu), (0.0, 0.0, 0.0));
        assert_eq!(integrator.sigma, 0.0);
    }
}
