//! The observation pipeline.
//!
//! Each observer owns two rings: the raw ring collects
//! [`ObservationMessage`] snapshots pushed by the driver after λ, the
//! linearized ring receives `(t, x)` samples produced by QSS-aware
//! interpolation at a fixed `time_step`. The raw ring overwrites its oldest
//! entry when full and latches `DATA_LOST`; two snapshots at the same
//! timestamp collapse into the newer one.

use core_arena::RingBuffer;

use crate::ModelId;
use crate::message::{ObservationMessage, Time};

pub const DEFAULT_RAW_CAPACITY: usize = 64;
pub const DEFAULT_LINEARIZED_CAPACITY: usize = 4096;

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ObserverFlags: u8 {
        const BUFFER_FULL = 0b0000_0001;
        const DATA_LOST = 0b0000_0010;
        const USE_LINEAR_BUFFER = 0b0000_0100;
    }
}

/// Interpolation polynomial order used between raw snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolateKind {
    #[default]
    None,
    Qss1,
    Qss2,
    Qss3,
}

impl InterpolateKind {
    pub fn from_qss_level(level: Option<u8>) -> Self {
        match level {
            Some(1) => InterpolateKind::Qss1,
            Some(2) => InterpolateKind::Qss2,
            Some(3) => InterpolateKind::Qss3,
            _ => InterpolateKind::None,
        }
    }
}

/// One linearized sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Observation {
    pub x: Time,
    pub y: f64,
}

pub struct Observer {
    pub buffer: RingBuffer<ObservationMessage>,
    pub linearized: RingBuffer<Observation>,

    pub model: ModelId,
    pub kind: InterpolateKind,
    pub time_step: f64,
    pub flags: ObserverFlags,
}

impl Observer {
    pub fn new(model: ModelId, kind: InterpolateKind, time_step: f64) -> Self {
        Self::with_capacities(
            model,
            kind,
            time_step,
            DEFAULT_RAW_CAPACITY,
            DEFAULT_LINEARIZED_CAPACITY,
        )
    }

    pub fn with_capacities(
        model: ModelId,
        kind: InterpolateKind,
        time_step: f64,
        raw_capacity: usize,
        linearized_capacity: usize,
    ) -> Self {
        Self {
            buffer: RingBuffer::new(raw_capacity.max(4)),
            linearized: RingBuffer::new(linearized_capacity.max(64)),
            model,
            kind,
            time_step: if time_step > 0.0 { time_step } else { 1e-2 },
            flags: ObserverFlags::USE_LINEAR_BUFFER,
        }
    }

    /// Drop all samples and all state flags.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.linearized.clear();
        self.flags &= ObserverFlags::USE_LINEAR_BUFFER;
    }

    /// Drop samples but remember that data was lost before.
    pub fn clear(&mut self) {
        let lost = self.flags.contains(ObserverFlags::DATA_LOST);
        self.reset();
        self.flags.set(ObserverFlags::DATA_LOST, lost);
    }

    /// Push a raw snapshot. A snapshot at the timestamp of the newest entry
    /// overwrites it in place (several transitions can share one instant).
    pub fn update(&mut self, msg: ObservationMessage) {
        let was_full = self.flags.contains(ObserverFlags::BUFFER_FULL);
        self.flags.set(ObserverFlags::DATA_LOST, was_full);

        match self.buffer.back_mut() {
            Some(newest) if newest.time() == msg.time() => *newest = msg,
            _ => {
                self.buffer.force_push(msg);
            }
        }

        self.flags
            .set(ObserverFlags::BUFFER_FULL, self.buffer.available() <= 1);
    }

    pub fn full(&self) -> bool {
        self.flags.contains(ObserverFlags::BUFFER_FULL)
    }
}

/// Evaluate the snapshot polynomial `elapsed` after its timestamp.
pub fn compute_value(kind: InterpolateKind, msg: &ObservationMessage, elapsed: Time) -> f64 {
    match kind {
        InterpolateKind::None => msg[1],
        InterpolateKind::Qss1 => msg[1] + msg[2] * elapsed,
        InterpolateKind::Qss2 => msg[1] + msg[2] * elapsed + msg[3] * elapsed * elapsed / 2.0,
        InterpolateKind::Qss3 => {
            msg[1]
                + msg[2] * elapsed
                + msg[3] * elapsed * elapsed / 2.0
                + msg[4] * elapsed * elapsed * elapsed / 3.0
        }
    }
}

/// Interpolate one snapshot up to (exclusive) `until`, stepping
/// `time_step`, into the linearized ring.
fn interpolate_into(
    kind: InterpolateKind,
    msg: &ObservationMessage,
    until: Time,
    time_step: Time,
    out: &mut RingBuffer<Observation>,
) {
    out.force_push(Observation {
        x: msg.time(),
        y: compute_value(kind, msg, 0.0),
    });

    let duration = until - msg.time() - time_step;
    if duration > 0.0 {
        let mut elapsed = time_step;
        while elapsed < duration {
            out.force_push(Observation {
                x: msg.time() + elapsed,
                y: compute_value(kind, msg, elapsed),
            });
            elapsed += time_step;
        }

        if duration < elapsed {
            let limit = duration - f64::EPSILON;
            out.force_push(Observation {
                x: msg.time() + limit,
                y: compute_value(kind, msg, limit),
            });
        }
    }
}

/// Consume raw pairs into linearized samples. Keeps the newest snapshot in
/// the raw ring as the starting point of the next segment.
pub fn write_interpolated(obs: &mut Observer) {
    while obs.buffer.len() >= 2 {
        let head = *obs.buffer.front().expect("two entries");
        let until = obs
            .buffer
            .iter()
            .nth(1)
            .map(|next| next.time())
            .expect("two entries");

        interpolate_into(obs.kind, &head, until, obs.time_step, &mut obs.linearized);
        obs.buffer.pop_front();
    }

    obs.flags.remove(ObserverFlags::BUFFER_FULL);
}

/// Drain everything, including the trailing snapshot that has no successor
/// yet. Call at simulation finalize.
pub fn flush_interpolated(obs: &mut Observer) {
    write_interpolated(obs);

    if let Some(last) = obs.buffer.front().copied() {
        obs.linearized.force_push(Observation {
            x: last.time(),
            y: compute_value(obs.kind, &last, 0.0),
        });
    }

    obs.buffer.clear();
    obs.flags.remove(ObserverFlags::BUFFER_FULL);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_arena::ArenaId;

    fn observer(kind: InterpolateKind, time_step: f64) -> Observer {
        Observer::with_capacities(ModelId::INVALID, kind, time_step, 8, 256)
    }

    #[test]
    fn same_timestamp_overwrites_newest() {
        let mut obs = observer(InterpolateKind::None, 0.1);
        obs.update(ObservationMessage::time_value(1.0, 10.0));
        obs.update(ObservationMessage::time_value(1.0, 20.0));

        assert_eq!(obs.buffer.len(), 1);
        assert_eq!(obs.buffer.front().unwrap().value(), 20.0);
    }

    #[test]
    fn overflow_latches_data_lost() {
        let mut obs = observer(InterpolateKind::None, 0.1);
        for i in 0..20 {
            obs.update(ObservationMessage::time_value(i as f64, 0.0));
        }
        assert!(obs.flags.contains(ObserverFlags::DATA_LOST));

        obs.clear();
        assert!(
            obs.flags.contains(ObserverFlags::DATA_LOST),
            "clear keeps the data-lost latch"
        );

        obs.reset();
        assert!(!obs.flags.contains(ObserverFlags::DATA_LOST));
    }

    #[test]
    fn qss1_interpolation_is_linear() {
        // x(t) = 2 + 3 e at t = 1.
        let msg = ObservationMessage([1.0, 2.0, 3.0, 0.0, 0.0]);
        assert_eq!(compute_value(InterpolateKind::Qss1, &msg, 0.0), 2.0);
        assert_eq!(compute_value(InterpolateKind::Qss1, &msg, 0.5), 3.5);
        assert_eq!(compute_value(InterpolateKind::None, &msg, 0.5), 2.0);
    }

    #[test]
    fn qss3_interpolation_includes_cubic_term() {
        let msg = ObservationMessage([0.0, 0.0, 0.0, 0.0, 3.0]);
        let v = compute_value(InterpolateKind::Qss3, &msg, 2.0);
        assert!((v - 8.0).abs() < 1e-12, "pu e^3 / 3 with pu = 3, e = 2");
    }

    #[test]
    fn linearized_samples_are_time_monotone() {
        let mut obs = observer(InterpolateKind::Qss1, 0.25);
        obs.update(ObservationMessage([0.0, 0.0, 1.0, 0.0, 0.0]));
        obs.update(ObservationMessage([1.0, 1.0, 1.0, 0.0, 0.0]));
        obs.update(ObservationMessage([2.5, 2.5, 0.0, 0.0, 0.0]));
        flush_interpolated(&mut obs);

        let xs: Vec<f64> = obs.linearized.iter().map(|o| o.x).collect();
        assert!(!xs.is_empty());
        for pair in xs.windows(2) {
            assert!(pair[0] <= pair[1], "timestamps must be monotone: {xs:?}");
        }
    }

    #[test]
    fn flush_emits_the_trailing_snapshot() {
        let mut obs = observer(InterpolateKind::Qss1, 0.1);
        obs.update(ObservationMessage([4.0, 7.0, 0.0, 0.0, 0.0]));
        flush_interpolated(&mut obs);

        assert_eq!(obs.buffer.len(), 0);
        let last = obs.linearized.iter().last().unwrap();
        assert_eq!((last.x, last.y), (4.0, 7.0));
    }
}
