//! Shared QSS polynomial arithmetic: state advancement, quantum-crossing
//! root finding and observation snapshots.
//!
//! Throughout, a level-`L` state is the coefficient array
//! `[value, slope, derivative][..L]` of the local Taylor polynomial around
//! the atom's last event. Root finders return the *delay* until the next
//! crossing, `+inf` when the polynomial never reaches the threshold.

use crate::message::{Message, ObservationMessage, Time};

/// Advance a local polynomial by the elapsed time `e`.
pub(crate) fn advance<const L: usize>(values: &mut [f64; L], e: Time) {
    if L == 2 {
        values[0] += values[1] * e;
    }
    if L == 3 {
        values[0] += values[1] * e + values[2] * e * e;
        values[1] += 2.0 * values[2] * e;
    }
}

/// Overwrite a local polynomial from an incoming message.
pub(crate) fn assign<const L: usize>(values: &mut [f64; L], msg: &Message) {
    values[0] = msg.0[0];
    if L >= 2 {
        values[1] = msg.0[1];
    }
    if L == 3 {
        values[2] = msg.0[2];
    }
}

/// Build an outgoing message from a local polynomial, truncated to `L`.
pub(crate) fn emit<const L: usize>(values: &[f64; L]) -> Message {
    debug_assert!(L <= 3);
    let mut out = [0.0; 3];
    out[..L].copy_from_slice(values);
    Message(out)
}

/// Delay until `value0 + value1 * s` crosses `threshold`.
pub(crate) fn wake_up_linear(threshold: f64, value0: f64, value1: f64) -> Time {
    if value1 != 0.0 {
        let delay = -(value0 - threshold) * value1;
        if delay > 0.0 {
            return delay / (value1 * value1);
        }
    }
    f64::INFINITY
}

/// Delay until `value0 + value1 * s + value2 * s^2` crosses `threshold`.
pub(crate) fn wake_up_quadratic(threshold: f64, value0: f64, value1: f64, value2: f64) -> Time {
    if value1 == 0.0 && value2 == 0.0 {
        return f64::INFINITY;
    }

    if value2 == 0.0 {
        return wake_up_linear(threshold, value0, value1);
    }

    smallest_positive_quadratic(value2, value1, value0 - threshold)
}

/// Smallest strictly positive root of `a s^2 + b s + c = 0`, `+inf` when
/// there is none. Tolerates a negative discriminant through NaN comparisons.
pub(crate) fn smallest_positive_quadratic(a: f64, b: f64, c: f64) -> Time {
    if a == 0.0 {
        if b == 0.0 {
            return f64::INFINITY;
        }
        let s = -c / b;
        return if s > 0.0 { s } else { f64::INFINITY };
    }

    let d = b * b - 4.0 * a * c;
    if d < 0.0 {
        return f64::INFINITY;
    }

    let sq = d.sqrt();
    let s1 = (-b + sq) / (2.0 * a);
    let s2 = (-b - sq) / (2.0 * a);

    let mut best = f64::INFINITY;
    if s1 > 0.0 {
        best = s1;
    }
    if s2 > 0.0 && s2 < best {
        best = s2;
    }
    best
}

/// Smallest strictly positive real root of `s^3 + a s^2 + b s + c = 0`,
/// `+inf` when there is none. Cardano with the trigonometric branch for the
/// three-real-roots case.
pub(crate) fn smallest_positive_cubic(a: f64, b: f64, c: f64) -> Time {
    let v = b - a * a / 3.0;
    let w = c - b * a / 3.0 + 2.0 * a * a * a / 27.0;
    let half_w = -w / 2.0;
    let discriminant = half_w * half_w + v * v * v / 27.0;

    let mut best = f64::INFINITY;
    let mut consider = |root: f64| {
        if root > 0.0 && root < best {
            best = root;
        }
    };

    if discriminant > 0.0 {
        let sq = discriminant.sqrt();
        let root = (half_w + sq).cbrt() + (half_w - sq).cbrt() - a / 3.0;
        consider(root);
    } else if discriminant == 0.0 {
        let fold = half_w.cbrt();
        consider(2.0 * fold - a / 3.0);
        consider(-(fold + a / 3.0));
    } else {
        // Three real roots.
        let arg = (w * (27.0 / -v).sqrt() / (2.0 * v)).acos() / 3.0;
        let radius = 2.0 * (-v / 3.0).sqrt();
        const PI_DIV_3: f64 = core::f64::consts::FRAC_PI_3;

        consider(radius * arg.cos() - a / 3.0);
        consider(-radius * (PI_DIV_3 - arg).cos() - a / 3.0);
        consider(-radius * (PI_DIV_3 + arg).cos() - a / 3.0);
    }

    best
}

/// Pick the message an atom consumes when several arrived on the same port
/// in one step: the lexicographic maximum over the first `level` components.
pub(crate) fn preferred_message(msgs: &[Message], level: usize) -> Option<Message> {
    if msgs.len() <= 1 {
        return msgs.first().copied();
    }

    msgs.iter()
        .copied()
        .max_by(|a, b| {
            for k in 0..level.min(3) {
                match a.0[k].partial_cmp(&b.0[k]) {
                    Some(core::cmp::Ordering::Equal) | None => continue,
                    Some(order) => return order,
                }
            }
            core::cmp::Ordering::Equal
        })
}

/// Level-1 observation snapshot at `t`, `e` after the last event.
pub(crate) fn observe1(x: f64, u: f64, t: Time, e: Time) -> ObservationMessage {
    ObservationMessage([t, x + u * e, u, 0.0, 0.0])
}

/// Level-2 observation snapshot.
pub(crate) fn observe2(x: f64, u: f64, mu: f64, t: Time, e: Time) -> ObservationMessage {
    ObservationMessage([t, x + u * e + mu * e * e / 2.0, u + mu * e, mu, 0.0])
}

/// Level-3 observation snapshot. The stored coefficients are the Taylor
/// coefficients *at the observation instant*, so interpolation continues the
/// same polynomial.
pub(crate) fn observe3(x: f64, u: f64, mu: f64, pu: f64, t: Time, e: Time) -> ObservationMessage {
    ObservationMessage([
        t,
        x + u * e + mu * e * e / 2.0 + pu * e * e * e / 3.0,
        u + mu * e + pu * e * e,
        mu + 2.0 * pu * e,
        pu,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_matches_polynomial() {
        let mut v2 = [1.0, 2.0];
        advance(&mut v2, 0.5);
        assert_eq!(v2, [2.0, 2.0]);

        let mut v3 = [1.0, 2.0, 3.0];
        advance(&mut v3, 0.5);
        assert_eq!(v3[0], 1.0 + 2.0 * 0.5 + 3.0 * 0.25);
        assert_eq!(v3[1], 2.0 + 2.0 * 3.0 * 0.5);
    }

    #[test]
    fn linear_wake_up_finds_crossing() {
        // x(s) = 0 + 2s crosses 1 at s = 0.5.
        let s = wake_up_linear(1.0, 0.0, 2.0);
        assert!((s - 0.5).abs() < 1e-12);

        // Moving away from the threshold: never.
        assert_eq!(wake_up_linear(1.0, 0.0, -2.0), f64::INFINITY);
        assert_eq!(wake_up_linear(1.0, 0.0, 0.0), f64::INFINITY);
    }

    #[test]
    fn quadratic_wake_up_picks_smallest_positive() {
        // x(s) = -1 + s^2 crosses 0 at s = 1.
        let s = wake_up_quadratic(0.0, -1.0, 0.0, 1.0);
        assert!((s - 1.0).abs() < 1e-12);

        // Concave polynomial that never reaches the threshold.
        assert_eq!(wake_up_quadratic(10.0, 0.0, 0.0, -1.0), f64::INFINITY);
    }

    #[test]
    fn cubic_smallest_positive_root() {
        // (s - 1)(s - 2)(s - 3) = s^3 - 6 s^2 + 11 s - 6
        let s = smallest_positive_cubic(-6.0, 11.0, -6.0);
        assert!((s - 1.0).abs() < 1e-9);

        // (s + 1)(s^2 + 1): only root is negative.
        let s = smallest_positive_cubic(1.0, 1.0, 1.0);
        assert_eq!(s, f64::INFINITY);

        // One real positive root: s^3 - 8 = 0.
        let s = smallest_positive_cubic(0.0, 0.0, -8.0);
        assert!((s - 2.0).abs() < 1e-9);
    }

    #[test]
    fn preferred_message_is_lexicographic_max() {
        let msgs = [
            Message([1.0, 9.0, 0.0]),
            Message([2.0, 0.0, 0.0]),
            Message([2.0, 1.0, 0.0]),
        ];

        assert_eq!(preferred_message(&msgs, 1).unwrap().value(), 2.0);
        assert_eq!(preferred_message(&msgs, 2).unwrap(), Message([2.0, 1.0, 0.0]));
        assert_eq!(preferred_message(&[], 1), None);
    }

    #[test]
    fn observation_snapshots_advance_to_now() {
        let obs = observe2(1.0, 2.0, 4.0, 10.0, 0.5);
        assert_eq!(obs.time(), 10.0);
        assert_eq!(obs.value(), 1.0 + 2.0 * 0.5 + 4.0 * 0.125);
        assert_eq!(obs[2], 2.0 + 4.0 * 0.5);
        assert_eq!(obs[3], 4.0);
    }
}
