//! Model parameterization.
//!
//! A [`Parameter`] is four reals and four integers whose meaning depends on
//! the dynamics kind; `copy_to` projects the slots into a model's payload
//! before its `initialize` runs, `from_model` lifts them back out (the
//! archiver uses this). The `set_*` builders document the slot assignment
//! for each kind.

use core_arena::ArenaId;
use core_source::SourceSpec;

use crate::HsmId;
use crate::dynamics::{Dynamics, DynamicsKind, GeneratorOptions, TimeFuncKind};
use crate::simulation::Model;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Parameter {
    pub reals: [f64; 4],
    pub integers: [i64; 4],
}

/// Expand one body over the three QSS levels of a family; the payloads
/// share field names, so the body type-checks per level.
macro_rules! per_level {
    ($value:expr, { $($v1:ident | $v2:ident | $v3:ident => |$d:ident| $body:expr;)+ }) => {
        match $value {
            $(
                Dynamics::$v1($d) => $body,
                Dynamics::$v2($d) => $body,
                Dynamics::$v3($d) => $body,
            )+
            _ => {}
        }
    };
}

impl Parameter {
    /// Default slots for a freshly allocated model of `kind`.
    pub fn init_from(&mut self, kind: DynamicsKind) {
        use DynamicsKind as K;

        *self = Self::default();
        match kind {
            K::Qss1Integrator | K::Qss2Integrator | K::Qss3Integrator => {
                self.reals = [0.0, 0.01, 0.0, 0.0];
            }
            K::Qss1Power | K::Qss2Power | K::Qss3Power => self.reals[0] = 1.0,
            K::Qss1Gain | K::Qss2Gain | K::Qss3Gain => self.reals[0] = 1.0,
            K::Qss1Wsum2 | K::Qss2Wsum2 | K::Qss3Wsum2 => {
                self.reals = [1.0, 1.0, 0.0, 0.0];
            }
            K::Qss1Wsum3 | K::Qss2Wsum3 | K::Qss3Wsum3 => {
                self.reals = [1.0, 1.0, 1.0, 0.0];
            }
            K::Qss1Wsum4 | K::Qss2Wsum4 | K::Qss3Wsum4 => {
                self.reals = [1.0, 1.0, 1.0, 1.0];
            }
            K::Qss1Compare | K::Qss2Compare | K::Qss3Compare => {
                self.reals = [0.0, 1.0, 0.0, 0.0];
            }
            K::Qss1Cross | K::Qss2Cross | K::Qss3Cross => {
                self.reals = [0.0, 1.0, 1.0, 0.0];
            }
            K::Qss1Filter | K::Qss2Filter | K::Qss3Filter => {
                self.reals = [f64::NEG_INFINITY, f64::INFINITY, 0.0, 0.0];
            }
            K::TimeFunc => {
                self.reals = [0.0, 0.01, 0.0, 0.0];
                self.integers[0] = TimeFuncKind::Linear as i64;
            }
            K::Queue => self.reals[0] = 1.0,
            K::PriorityQueue => {
                self.reals[0] = 1.0;
                self.integers[0] = -1;
            }
            K::DynamicQueue => self.integers[0] = -1,
            K::Generator => {
                self.reals = [f64::INFINITY, 0.0, 0.0, 0.0];
                self.integers[0] = -1;
                self.integers[1] = -1;
            }
            K::HsmWrapper => self.integers[0] = HsmId::INVALID.raw() as i64,
            _ => {}
        }
    }

    /// Apply the slots to a model's payload. Called by the driver just
    /// before `initialize`, which must not overwrite these fields.
    pub fn copy_to(&self, model: &mut Model) {
        let p = self;

        per_level!(&mut model.dynamics, {
            Qss1Integrator | Qss2Integrator | Qss3Integrator => |d| {
                d.value = p.reals[0];
                d.dq = p.reals[1];
            };
            Qss1Power | Qss2Power | Qss3Power => |d| d.n = p.reals[0];
            Qss1Gain | Qss2Gain | Qss3Gain => |d| d.k = p.reals[0];
            Qss1Wsum2 | Qss2Wsum2 | Qss3Wsum2 => |d| {
                d.coeffs = [p.reals[0], p.reals[1]];
            };
            Qss1Wsum3 | Qss2Wsum3 | Qss3Wsum3 => |d| {
                d.coeffs = [p.reals[0], p.reals[1], p.reals[2]];
            };
            Qss1Wsum4 | Qss2Wsum4 | Qss3Wsum4 => |d| {
                d.coeffs = [p.reals[0], p.reals[1], p.reals[2], p.reals[3]];
            };
            Qss1Compare | Qss2Compare | Qss3Compare => |d| {
                d.output = [p.reals[0], p.reals[1]];
            };
            Qss1Cross | Qss2Cross | Qss3Cross => |d| {
                d.threshold = p.reals[0];
                d.output_values = [p.reals[1], p.reals[2]];
            };
            Qss1Filter | Qss2Filter | Qss3Filter => |d| {
                d.lower = p.reals[0];
                d.upper = p.reals[1];
            };
        });

        match &mut model.dynamics {
            Dynamics::Constant(d) => {
                d.value = p.reals[0];
                d.offset = p.reals[1];
            }
            Dynamics::TimeFunc(d) => {
                d.offset = p.reals[0];
                d.timestep = p.reals[1];
                d.function = TimeFuncKind::from_u8(p.integers[0] as u8);
            }
            Dynamics::Queue(d) => d.ta = p.reals[0],
            Dynamics::PriorityQueue(d) => {
                d.ta = p.reals[0];
                match SourceSpec::decode(p.integers[0]) {
                    Some(spec) => d.source_ta.mount(spec),
                    None => d.source_ta.clear(),
                }
            }
            Dynamics::DynamicQueue(d) => match SourceSpec::decode(p.integers[0]) {
                Some(spec) => d.source_ta.mount(spec),
                None => d.source_ta.clear(),
            },
            Dynamics::Generator(d) => {
                d.default_ta = p.reals[0];
                d.default_value = p.reals[1];

                match SourceSpec::decode(p.integers[0]) {
                    Some(spec) => {
                        d.source_ta.mount(spec);
                        d.flags |= GeneratorOptions::TA_USE_SOURCE;
                    }
                    None => {
                        d.source_ta.clear();
                        d.flags -= GeneratorOptions::TA_USE_SOURCE;
                    }
                }
                match SourceSpec::decode(p.integers[1]) {
                    Some(spec) => {
                        d.source_value.mount(spec);
                        d.flags |= GeneratorOptions::VALUE_USE_SOURCE;
                    }
                    None => {
                        d.source_value.clear();
                        d.flags -= GeneratorOptions::VALUE_USE_SOURCE;
                    }
                }
            }
            Dynamics::HsmWrapper(d) => {
                d.id = HsmId::from_raw(p.integers[0] as u32);
                d.exec.i1 = p.integers[1] as i32;
                d.exec.i2 = p.integers[2] as i32;
                d.exec.r1 = p.reals[0];
                d.exec.r2 = p.reals[1];
                d.exec.timer = p.reals[2];
            }
            _ => {}
        }
    }

    /// Lift the configured slots back out of a model.
    pub fn from_model(model: &Model) -> Self {
        let mut p = Self::default();
        p.init_from(model.dynamics.kind());

        per_level!(&model.dynamics, {
            Qss1Integrator | Qss2Integrator | Qss3Integrator => |d| {
                p.reals[0] = d.value;
                p.reals[1] = d.dq;
            };
            Qss1Power | Qss2Power | Qss3Power => |d| p.reals[0] = d.n;
            Qss1Gain | Qss2Gain | Qss3Gain => |d| p.reals[0] = d.k;
            Qss1Wsum2 | Qss2Wsum2 | Qss3Wsum2 => |d| {
                [p.reals[0], p.reals[1]] = d.coeffs;
            };
            Qss1Wsum3 | Qss2Wsum3 | Qss3Wsum3 => |d| {
                [p.reals[0], p.reals[1], p.reals[2]] = d.coeffs;
            };
            Qss1Wsum4 | Qss2Wsum4 | Qss3Wsum4 => |d| {
                p.reals = d.coeffs;
            };
            Qss1Compare | Qss2Compare | Qss3Compare => |d| {
                [p.reals[0], p.reals[1]] = d.output;
            };
            Qss1Cross | Qss2Cross | Qss3Cross => |d| {
                p.reals[0] = d.threshold;
                [p.reals[1], p.reals[2]] = d.output_values;
            };
            Qss1Filter | Qss2Filter | Qss3Filter => |d| {
                p.reals[0] = d.lower;
                p.reals[1] = d.upper;
            };
        });

        match &model.dynamics {
            Dynamics::Constant(d) => {
                p.reals[0] = d.value;
                p.reals[1] = d.offset;
            }
            Dynamics::TimeFunc(d) => {
                p.reals[0] = d.offset;
                p.reals[1] = d.timestep;
                p.integers[0] = d.function as i64;
            }
            Dynamics::Queue(d) => p.reals[0] = d.ta,
            Dynamics::PriorityQueue(d) => {
                p.reals[0] = d.ta;
                p.integers[0] = SourceSpec::encode(d.source_ta.spec);
            }
            Dynamics::DynamicQueue(d) => {
                p.integers[0] = SourceSpec::encode(d.source_ta.spec);
            }
            Dynamics::Generator(d) => {
                p.reals[0] = d.default_ta;
                p.reals[1] = d.default_value;
                p.integers[0] = SourceSpec::encode(d.source_ta.spec);
                p.integers[1] = SourceSpec::encode(d.source_value.spec);
            }
            Dynamics::HsmWrapper(d) => {
                p.integers[0] = d.id.raw() as i64;
                p.integers[1] = d.exec.i1 as i64;
                p.integers[2] = d.exec.i2 as i64;
                p.reals[0] = d.exec.r1;
                p.reals[1] = d.exec.r2;
                p.reals[2] = d.exec.timer;
            }
            _ => {}
        }

        p
    }

    pub fn clear(&mut self) -> &mut Self {
        *self = Self::default();
        self
    }

    pub fn set_constant(&mut self, value: f64, offset: f64) -> &mut Self {
        self.reals[0] = value;
        self.reals[1] = offset;
        self
    }

    pub fn set_cross(&mut self, threshold: f64, up_value: f64, down_value: f64) -> &mut Self {
        self.reals[0] = threshold;
        self.reals[1] = up_value;
        self.reals[2] = down_value;
        self
    }

    pub fn set_filter(&mut self, lower: f64, upper: f64) -> &mut Self {
        self.reals[0] = lower;
        self.reals[1] = upper;
        self
    }

    pub fn set_compare(&mut self, greater_equal: f64, less: f64) -> &mut Self {
        self.reals[0] = greater_equal;
        self.reals[1] = less;
        self
    }

    pub fn set_gain(&mut self, k: f64) -> &mut Self {
        self.reals[0] = k;
        self
    }

    pub fn set_power(&mut self, n: f64) -> &mut Self {
        self.reals[0] = n;
        self
    }

    pub fn set_integrator(&mut self, value: f64, dq: f64) -> &mut Self {
        self.reals[0] = value;
        self.reals[1] = dq;
        self
    }

    pub fn set_time_func(&mut self, offset: f64, timestep: f64, kind: TimeFuncKind) -> &mut Self {
        self.reals[0] = offset;
        self.reals[1] = timestep;
        self.integers[0] = kind as i64;
        self
    }

    pub fn set_wsum2(&mut self, c0: f64, c1: f64) -> &mut Self {
        self.reals[0] = c0;
        self.reals[1] = c1;
        self
    }

    pub fn set_wsum3(&mut self, c0: f64, c1: f64, c2: f64) -> &mut Self {
        self.reals[0] = c0;
        self.reals[1] = c1;
        self.reals[2] = c2;
        self
    }

    pub fn set_wsum4(&mut self, c0: f64, c1: f64, c2: f64, c3: f64) -> &mut Self {
        self.reals = [c0, c1, c2, c3];
        self
    }

    pub fn set_queue(&mut self, ta: f64) -> &mut Self {
        self.reals[0] = ta;
        self
    }

    pub fn set_priority_queue(&mut self, ta: f64) -> &mut Self {
        self.reals[0] = ta;
        self
    }

    /// Fixed-period generator: one event every `ta`, emitting `value`.
    pub fn set_generator(&mut self, ta: f64, value: f64) -> &mut Self {
        self.reals[0] = ta;
        self.reals[1] = value;
        self
    }

    pub fn set_generator_ta_source(&mut self, spec: Option<SourceSpec>) -> &mut Self {
        self.integers[0] = SourceSpec::encode(spec);
        self
    }

    pub fn set_generator_value_source(&mut self, spec: Option<SourceSpec>) -> &mut Self {
        self.integers[1] = SourceSpec::encode(spec);
        self
    }

    pub fn set_dynamic_queue_ta_source(&mut self, spec: Option<SourceSpec>) -> &mut Self {
        self.integers[0] = SourceSpec::encode(spec);
        self
    }

    pub fn set_priority_queue_ta_source(&mut self, spec: Option<SourceSpec>) -> &mut Self {
        self.integers[0] = SourceSpec::encode(spec);
        self
    }

    pub fn set_hsm_wrapper(&mut self, id: HsmId) -> &mut Self {
        self.integers[0] = id.raw() as i64;
        self
    }

    pub fn set_hsm_state(&mut self, i1: i32, i2: i32, r1: f64, r2: f64, timer: f64) -> &mut Self {
        self.integers[1] = i1 as i64;
        self.integers[2] = i2 as i64;
        self.reals[0] = r1;
        self.reals[1] = r2;
        self.reals[2] = timer;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{INVALID_HANDLE, ObserverId};

    fn model_of(kind: DynamicsKind) -> Model {
        Model {
            tl: 0.0,
            tn: f64::INFINITY,
            handle: INVALID_HANDLE,
            obs: ObserverId::INVALID,
            dynamics: Dynamics::new(kind),
        }
    }

    #[test]
    fn integrator_round_trip() {
        let mut model = model_of(DynamicsKind::Qss2Integrator);
        let mut p = Parameter::default();
        p.set_integrator(3.5, 0.25);
        p.copy_to(&mut model);

        let Dynamics::Qss2Integrator(d) = &model.dynamics else {
            panic!("wrong payload");
        };
        assert_eq!(d.value, 3.5);
        assert_eq!(d.dq, 0.25);

        let lifted = Parameter::from_model(&model);
        assert_eq!(lifted.reals[0], 3.5);
        assert_eq!(lifted.reals[1], 0.25);
    }

    #[test]
    fn generator_source_slots_toggle_flags() {
        let mut model = model_of(DynamicsKind::Generator);

        let mut p = Parameter::default();
        p.init_from(DynamicsKind::Generator);
        p.set_generator(2.0, 7.0);
        p.copy_to(&mut model);

        let Dynamics::Generator(d) = &model.dynamics else {
            panic!("wrong payload");
        };
        assert!(d.flags.is_empty());
        assert_eq!(d.default_ta, 2.0);

        let spec = SourceSpec::constant(core_source::ConstantSourceId::new(0, 0));
        let mut p = Parameter::default();
        p.init_from(DynamicsKind::Generator);
        p.set_generator_ta_source(Some(spec));
        p.copy_to(&mut model);

        let Dynamics::Generator(d) = &model.dynamics else {
            panic!("wrong payload");
        };
        assert!(d.flags.contains(GeneratorOptions::TA_USE_SOURCE));
        assert_eq!(d.source_ta.spec, Some(spec));
    }

    #[test]
    fn wsum_defaults_are_unit_coefficients() {
        let mut p = Parameter::default();
        p.init_from(DynamicsKind::Qss1Wsum3);
        assert_eq!(p.reals, [1.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn hsm_wrapper_slots() {
        let mut model = model_of(DynamicsKind::HsmWrapper);
        let id = HsmId::new(4, 0);

        let mut p = Parameter::default();
        p.set_hsm_wrapper(id);
        p.set_hsm_state(10, -3, 1.5, 2.5, 9.0);
        p.copy_to(&mut model);

        let Dynamics::HsmWrapper(d) = &model.dynamics else {
            panic!("wrong payload");
        };
        assert_eq!(d.id, id);
        assert_eq!(d.exec.i1, 10);
        assert_eq!(d.exec.i2, -3);
        assert_eq!(d.exec.timer, 9.0);
    }
}
