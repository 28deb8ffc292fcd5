//! The port compatibility decision table.
//!
//! Continuous QSS signals and the boolean world do not mix: the logical
//! gates only accept event-shaped inputs (counters, state machines, other
//! gates, and the side ports of cross/filter), while everything else
//! accepts continuous values. The side ports (index ≥ 1) of cross and
//! filter are event lines, not values, and are restricted accordingly.

use crate::dynamics::DynamicsKind;

fn is_logical(kind: DynamicsKind) -> bool {
    use DynamicsKind as K;
    matches!(
        kind,
        K::LogicalAnd2 | K::LogicalAnd3 | K::LogicalOr2 | K::LogicalOr3 | K::LogicalInvert
    )
}

fn is_continuous_only_producer(kind: DynamicsKind) -> bool {
    use DynamicsKind as K;
    matches!(
        kind,
        K::Qss1Integrator
            | K::Qss2Integrator
            | K::Qss3Integrator
            | K::Qss1Multiplier
            | K::Qss2Multiplier
            | K::Qss3Multiplier
            | K::Qss1Power
            | K::Qss2Power
            | K::Qss3Power
            | K::Qss1Flipflop
            | K::Qss2Flipflop
            | K::Qss3Flipflop
            | K::Qss1Square
            | K::Qss2Square
            | K::Qss3Square
            | K::Qss1Sum2
            | K::Qss2Sum2
            | K::Qss3Sum2
            | K::Qss1Sum3
            | K::Qss2Sum3
            | K::Qss3Sum3
            | K::Qss1Sum4
            | K::Qss2Sum4
            | K::Qss3Sum4
            | K::Qss1Wsum2
            | K::Qss2Wsum2
            | K::Qss3Wsum2
            | K::Qss1Wsum3
            | K::Qss2Wsum3
            | K::Qss3Wsum3
            | K::Qss1Wsum4
            | K::Qss2Wsum4
            | K::Qss3Wsum4
            | K::Qss1Inverse
            | K::Qss2Inverse
            | K::Qss3Inverse
    )
}

fn is_cross(kind: DynamicsKind) -> bool {
    use DynamicsKind as K;
    matches!(kind, K::Qss1Cross | K::Qss2Cross | K::Qss3Cross)
}

fn is_filter(kind: DynamicsKind) -> bool {
    use DynamicsKind as K;
    matches!(kind, K::Qss1Filter | K::Qss2Filter | K::Qss3Filter)
}

/// Whether an edge from `src`'s output `src_port` into `dst` is allowed.
/// Port *indices* are validated separately against the endpoint arities;
/// this table only rules on the type pairing.
pub fn is_ports_compatible(
    src: DynamicsKind,
    src_port: u8,
    dst: DynamicsKind,
    _dst_port: u8,
) -> bool {
    use DynamicsKind as K;

    if is_continuous_only_producer(src) {
        return !is_logical(dst);
    }

    if is_cross(src) {
        // Index 0 carries the crossed value; the side ports are event
        // pulses for counters, machines and gates.
        return if src_port >= 1 {
            matches!(dst, K::Counter | K::HsmWrapper) || is_logical(dst)
        } else {
            !is_logical(dst)
        };
    }

    if is_filter(src) {
        return if src_port >= 1 {
            dst == K::Counter || is_logical(dst)
        } else {
            !is_logical(dst)
        };
    }

    if is_logical(src) {
        return dst == K::Counter || is_logical(dst);
    }

    // Everything else (rounded/compared/sampled signals, constants,
    // queues, generators, machines, accumulators) connects anywhere.
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use DynamicsKind as K;

    #[test]
    fn qss_values_may_not_enter_gates() {
        assert!(!is_ports_compatible(K::Qss1Integrator, 0, K::LogicalAnd2, 0));
        assert!(!is_ports_compatible(K::Qss3Wsum4, 0, K::LogicalInvert, 0));
        assert!(is_ports_compatible(K::Qss1Integrator, 0, K::Qss1Integrator, 0));
        assert!(is_ports_compatible(K::Qss2Multiplier, 0, K::Counter, 0));
    }

    #[test]
    fn cross_side_ports_are_event_only() {
        assert!(is_ports_compatible(K::Qss1Cross, 1, K::Counter, 0));
        assert!(is_ports_compatible(K::Qss1Cross, 1, K::HsmWrapper, 0));
        assert!(is_ports_compatible(K::Qss1Cross, 1, K::LogicalOr2, 0));
        assert!(!is_ports_compatible(K::Qss1Cross, 1, K::Qss1Integrator, 0));

        assert!(is_ports_compatible(K::Qss1Cross, 0, K::Qss1Integrator, 0));
        assert!(!is_ports_compatible(K::Qss1Cross, 0, K::LogicalAnd3, 0));
    }

    #[test]
    fn filter_side_ports_are_event_only() {
        assert!(is_ports_compatible(K::Qss2Filter, 2, K::Counter, 0));
        assert!(is_ports_compatible(K::Qss2Filter, 1, K::LogicalAnd2, 0));
        assert!(!is_ports_compatible(K::Qss2Filter, 1, K::Qss2Sum2, 0));
        assert!(is_ports_compatible(K::Qss2Filter, 0, K::Qss2Sum2, 0));
    }

    #[test]
    fn gates_feed_gates_and_counters_only() {
        assert!(is_ports_compatible(K::LogicalAnd2, 0, K::LogicalOr3, 0));
        assert!(is_ports_compatible(K::LogicalInvert, 0, K::Counter, 0));
        assert!(!is_ports_compatible(K::LogicalAnd2, 0, K::Qss1Integrator, 0));
    }

    #[test]
    fn event_sources_connect_anywhere() {
        assert!(is_ports_compatible(K::Constant, 0, K::LogicalAnd2, 0));
        assert!(is_ports_compatible(K::Generator, 0, K::Qss1Integrator, 0));
        assert!(is_ports_compatible(K::HsmWrapper, 0, K::LogicalOr2, 0));
        assert!(is_ports_compatible(K::Queue, 0, K::Counter, 0));
    }
}
