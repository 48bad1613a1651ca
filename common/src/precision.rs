//! Deterministic one-sided rounding applied to every stored or returned rate.

use rust_decimal::{Decimal, RoundingStrategy};

/// Number of decimal places kept by [`to_precise`].
pub const PRECISION_DP: u32 = 6;

/// Round `value` up (towards positive infinity) to six decimal places.
///
/// Equal to `ceil(value * 10^6) / 10^6` without forming the scaled
/// product, so it is defined over the whole `Decimal` range. This is not
/// round-half-up: any non-zero remainder moves the value up one unit, and
/// negative values move towards zero.
pub fn to_precise(value: Decimal) -> Decimal {
    value
        .round_dp_with_strategy(PRECISION_DP, RoundingStrategy::ToPositiveInfinity)
        .normalize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_rounds_up() {
        assert_eq!(to_precise(dec!(0.1000001)), dec!(0.100001));
        assert_eq!(to_precise(dec!(0.8640776699)), dec!(0.864078));
    }

    #[test]
    fn test_exact_values_unchanged() {
        assert_eq!(to_precise(dec!(1.0)), dec!(1));
        assert_eq!(to_precise(dec!(0.123456)), dec!(0.123456));
        assert_eq!(to_precise(Decimal::ZERO), Decimal::ZERO);
    }

    #[test]
    fn test_extreme_magnitudes() {
        let huge = Decimal::from_i128_with_scale(10i128.pow(23), 0);
        assert_eq!(to_precise(huge), huge);
        assert_eq!(to_precise(Decimal::MAX), Decimal::MAX);
        assert_eq!(to_precise(Decimal::MIN), Decimal::MIN);
        assert_eq!(
            to_precise(Decimal::ONE / Decimal::new(1, 28)),
            Decimal::from_i128_with_scale(10i128.pow(28), 0)
        );
        assert_eq!(to_precise(Decimal::new(1, 28)), dec!(0.000001));
    }

    #[test]
    fn test_negative_rounds_towards_zero() {
        assert_eq!(to_precise(dec!(-0.1000001)), dec!(-0.1));
        assert_eq!(to_precise(dec!(-2.5000009)), dec!(-2.5));
    }

    proptest! {
        #[test]
        fn never_rounds_down(mantissa in -1_000_000_000_000i64..1_000_000_000_000i64, scale in 0u32..12) {
            let value = Decimal::new(mantissa, scale);
            let rounded = to_precise(value);
            prop_assert!(rounded >= value);
            prop_assert!(rounded - value < dec!(0.000001));
            prop_assert!(rounded.scale() <= PRECISION_DP);
        }

        #[test]
        fn idempotent(mantissa in -1_000_000_000i64..1_000_000_000i64, scale in 0u32..10) {
            let once = to_precise(Decimal::new(mantissa, scale));
            prop_assert_eq!(to_precise(once), once);
        }
    }
}
