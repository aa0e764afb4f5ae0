//! Slippage tolerance adaptation across resubmission attempts.

/// Next slippage tolerance after a slippage rejection.
///
/// Doubles but never decreases, always advances by at least 1 bp, and
/// is clamped at `cap_bps`. From `current=2, cap=120` the sequence is
/// `4, 8, 16, ..., 120, 120`.
#[must_use]
pub const fn widen_slippage_bps(current_bps: u32, cap_bps: u32) -> u32 {
    let next = if current_bps + 1 > current_bps * 2 {
        current_bps + 1
    } else {
        current_bps * 2
    };
    if next > cap_bps {
        cap_bps
    } else {
        next
    }
}

/// Entry-side slippage for a given attempt: the configured baseline
/// nudged up by half a bp per preceding slippage failure, rounded
/// down. Entries resubmit fresh quotes rather than chasing the market,
/// so adaptation is deliberately slow.
#[must_use]
pub const fn entry_slippage_bps(base_bps: u32, consecutive_slippage_failures: u32) -> u32 {
    base_bps + consecutive_slippage_failures / 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn widening_sequence_from_two_doubles_to_cap() {
        let mut current = 2;
        let mut sequence = Vec::new();
        for _ in 0..8 {
            current = widen_slippage_bps(current, 120);
            sequence.push(current);
        }
        assert_eq!(sequence, vec![4, 8, 16, 32, 64, 120, 120, 120]);
    }

    #[test_case(0, 120, 1; "zero advances by one")]
    #[test_case(1, 120, 2; "one doubles")]
    #[test_case(119, 120, 120; "clamps at cap")]
    #[test_case(120, 120, 120; "stays at cap")]
    fn widening_is_monotonic_and_capped(current: u32, cap: u32, expected: u32) {
        assert_eq!(widen_slippage_bps(current, cap), expected);
    }

    #[test]
    fn entry_slippage_advances_every_other_failure() {
        assert_eq!(entry_slippage_bps(50, 0), 50);
        assert_eq!(entry_slippage_bps(50, 1), 50);
        assert_eq!(entry_slippage_bps(50, 2), 51);
        assert_eq!(entry_slippage_bps(50, 3), 51);
    }

    proptest::proptest! {
        #[test]
        fn widening_never_decreases_and_never_exceeds_cap(
            current in 0u32..=10_000,
            cap in 1u32..=10_000,
        ) {
            let next = widen_slippage_bps(current, cap);
            proptest::prop_assert!(next >= current.min(cap));
            proptest::prop_assert!(next <= cap);
        }
    }
}
