use alloy::primitives::U256;
use num_bigfloat::BigFloat;
use uniswap_v3_math::{full_math, tick_math};

use crate::errors::EngineError;

pub const Q64: U256 = U256::from_limbs([0, 1, 0, 0]);
pub const Q96: U256 = U256::from_limbs([0, 4294967296, 0, 0]);
pub const Q128: U256 = U256::from_limbs([0, 0, 1, 0]);
pub const Q192: U256 = U256::from_limbs([0, 0, 0, 1]);

/// Converts a pool tick into a quote amount for `base_amount` of the base
/// token, using exact Q96/Q192 fixed-point arithmetic. The multiply-divide
/// rounds up on any remainder so the quote is never below the true value.
///
/// `base_amount` is denominated in the base token's smallest unit; the
/// result is denominated in the quote token's smallest unit.
pub fn quote_at_tick(
    tick: i32,
    base_amount: U256,
    base_is_token0: bool,
) -> Result<U256, EngineError> {
    let sqrt_ratio_x96 = tick_math::get_sqrt_ratio_at_tick(tick)?;

    // Squaring the Q96 sqrt ratio only fits in 256 bits while the sqrt
    // ratio fits in 128; above that, work in Q128 instead of Q192.
    let quote = if sqrt_ratio_x96 <= U256::from(u128::MAX) {
        let ratio_x192 = sqrt_ratio_x96 * sqrt_ratio_x96;
        if base_is_token0 {
            full_math::mul_div_rounding_up(ratio_x192, base_amount, Q192)?
        } else {
            full_math::mul_div_rounding_up(Q192, base_amount, ratio_x192)?
        }
    } else {
        let ratio_x128 = full_math::mul_div(sqrt_ratio_x96, sqrt_ratio_x96, Q64)?;
        if base_is_token0 {
            full_math::mul_div_rounding_up(ratio_x128, base_amount, Q128)?
        } else {
            full_math::mul_div_rounding_up(Q128, base_amount, ratio_x128)?
        }
    };

    Ok(quote)
}

/// Scales a whole-unit amount into the token's smallest unit,
/// i.e. `amount * 10^decimals`.
pub fn to_base_units(amount: U256, decimals: u8) -> Result<U256, EngineError> {
    let scale = U256::from(10u8).pow(U256::from(decimals));
    amount.checked_mul(scale).ok_or(EngineError::AmountOverflow)
}

/// Interprets a raw amount through a decimals exponent as an `f64`. Display
/// only; the quote path itself never leaves integer arithmetic.
pub fn units_to_f64(amount: U256, decimals: u8) -> f64 {
    let scale = BigFloat::from(10u8).pow(&BigFloat::from(decimals));
    (u256_to_bigfloat(amount) / scale).to_f64()
}

fn u256_to_bigfloat(value: U256) -> BigFloat {
    BigFloat::parse(&value.to_string()).unwrap_or_else(|| BigFloat::from(0u8))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_quote_at_tick_zero_is_identity() {
        // tick 0 => sqrt ratio 2^96 => price ratio exactly 1
        assert_eq!(tick_math::get_sqrt_ratio_at_tick(0).unwrap(), Q96);

        let one_token = U256::from(10u8).pow(U256::from(18u8));
        let quote = quote_at_tick(0, one_token, true).unwrap();
        assert_eq!(quote, one_token);

        let inverse = quote_at_tick(0, one_token, false).unwrap();
        assert_eq!(inverse, one_token);
    }

    #[test]
    fn test_quote_matches_tick_definition() {
        // price ratio must equal 1.0001^tick within fixed-point tolerance
        let one_token = U256::from(10u8).pow(U256::from(18u8));

        for tick in [-50000, -1000, -1, 1, 1000, 50000] {
            let quote = quote_at_tick(tick, one_token, true).unwrap();
            let got = units_to_f64(quote, 18);
            let expected = 1.0001f64.powi(tick);
            let relative = (got - expected).abs() / expected;
            assert!(
                relative < 1e-6,
                "tick {tick}: got {got}, expected {expected}"
            );
        }
    }

    #[test]
    fn test_quote_rounds_up_never_down() {
        // At tick -1 the ratio is just under 1; a single wei must still
        // quote to 1, not truncate to 0.
        let quote = quote_at_tick(-1, U256::from(1u8), true).unwrap();
        assert_eq!(quote, U256::from(1u8));

        // Round-up keeps the quote at or above the true value.
        let one_token = U256::from(10u8).pow(U256::from(18u8));
        for tick in [-100, -7, 3, 99] {
            let quote = quote_at_tick(tick, one_token, true).unwrap();
            let true_value = 1.0001f64.powi(tick) * 1e18;
            assert!(units_to_f64(quote, 0) >= true_value * (1.0 - 1e-9));
        }
    }

    #[test]
    fn test_quote_is_monotonic_in_amount() {
        let one_token = U256::from(10u8).pow(U256::from(18u8));
        let two_tokens = one_token * U256::from(2u8);

        for tick in [-30000, -200, 0, 200, 30000] {
            let smaller = quote_at_tick(tick, one_token, true).unwrap();
            let larger = quote_at_tick(tick, two_tokens, true).unwrap();
            assert!(larger > smaller, "tick {tick}");
        }
    }

    #[test]
    fn test_quote_near_max_tick_uses_wide_path() {
        // sqrt ratio above u128::MAX exercises the Q128 branch.
        let quote = quote_at_tick(tick_math::MAX_TICK - 1, U256::from(1u8), true).unwrap();
        assert!(quote > U256::ZERO);

        let inverse =
            quote_at_tick(tick_math::MAX_TICK - 1, U256::from(10u8).pow(U256::from(36u8)), false)
                .unwrap();
        assert!(inverse > U256::ZERO);
    }

    #[test]
    fn test_to_base_units() {
        assert_eq!(
            to_base_units(U256::from(3u8), 6).unwrap(),
            U256::from(3_000_000u64)
        );
        assert!(matches!(
            to_base_units(U256::MAX, 18).unwrap_err(),
            EngineError::AmountOverflow
        ));
    }

    #[test]
    fn test_units_to_f64() {
        let value = U256::from(1_234_500_000_000_000_000u128);
        assert!((units_to_f64(value, 18) - 1.2345).abs() < 1e-12);
    }
}
