//! Rebalancing incentive: a minted bonus for deposits and withdrawals that
//! move a pool's allocation toward its target weights.
//!
//! The bonus is proportional to the deviation improvement caused by the
//! single operation, normalized by the deviation snapshot taken right after
//! the last weight update, and scaled by the pool's USD-value weight among
//! all pools and a clamped TVL multiplier. Operations that leave deviation
//! unchanged or make it worse earn nothing; there is no penalty.

use weir_core::constants::{
    MAX_TVL_MULTIPLIER, MIN_TVL_MULTIPLIER, REBALANCE_TVL_DENOM_USD, WAD,
};
use weir_core::error::MathError;
use weir_core::fixed::{clamp_wad, mul_div, scale_amount, wad_div, wad_mul};
use weir_core::types::{Amount, UsdValue, Wad};

/// TVL multiplier: `tvl / REBALANCE_TVL_DENOM_USD`, clamped.
pub fn tvl_multiplier(tvl_usd: UsdValue) -> Result<Wad, MathError> {
    let raw = mul_div(tvl_usd as u128, WAD, REBALANCE_TVL_DENOM_USD as u128)?;
    Ok(clamp_wad(raw, MIN_TVL_MULTIPLIER, MAX_TVL_MULTIPLIER))
}

/// Bonus for one deposit/withdrawal.
///
/// `base_rate` is the current emission rate in base units per second;
/// `pool_usd_share` is this pool's WAD-scaled share of total protocol USD
/// value. The improvement ratio is capped at one WAD so an operation can
/// never mint more than the full inter-update budget.
pub fn bonus(
    base_rate: Amount,
    deviation_before: Amount,
    deviation_after: Amount,
    deviation_after_last_update: Amount,
    secs_since_update: u64,
    pool_usd_share: Wad,
    tvl_usd: UsdValue,
) -> Result<Amount, MathError> {
    if deviation_after >= deviation_before || deviation_after_last_update == 0 {
        return Ok(0);
    }
    let improvement = wad_div(
        (deviation_before - deviation_after) as u128,
        deviation_after_last_update as u128,
    )?
    .min(WAD);

    let rate = scale_amount(
        base_rate,
        wad_mul(pool_usd_share, tvl_multiplier(tvl_usd)?)?,
    )?;
    let budget = rate
        .checked_mul(secs_since_update)
        .ok_or(MathError::ArithmeticOverflow)?;
    scale_amount(budget, improvement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const RATE: Amount = 1_000; // units per second

    // --- tvl_multiplier ---

    #[test]
    fn tvl_multiplier_clamps_low() {
        assert_eq!(tvl_multiplier(0).unwrap(), MIN_TVL_MULTIPLIER);
        assert_eq!(tvl_multiplier(1).unwrap(), MIN_TVL_MULTIPLIER);
    }

    #[test]
    fn tvl_multiplier_linear_in_range() {
        let one_and_half = REBALANCE_TVL_DENOM_USD + REBALANCE_TVL_DENOM_USD / 2;
        assert_eq!(tvl_multiplier(one_and_half).unwrap(), WAD + WAD / 2);
    }

    #[test]
    fn tvl_multiplier_clamps_high() {
        assert_eq!(
            tvl_multiplier(100 * REBALANCE_TVL_DENOM_USD).unwrap(),
            MAX_TVL_MULTIPLIER
        );
    }

    // --- bonus ---

    #[test]
    fn no_bonus_when_deviation_worsens() {
        assert_eq!(bonus(RATE, 100, 150, 1_000, 60, WAD, 0).unwrap(), 0);
    }

    #[test]
    fn no_bonus_when_deviation_unchanged() {
        assert_eq!(bonus(RATE, 100, 100, 1_000, 60, WAD, 0).unwrap(), 0);
    }

    #[test]
    fn no_bonus_when_snapshot_zero() {
        // The pool was perfectly balanced at the last weight update; there
        // is nothing to improve on.
        assert_eq!(bonus(RATE, 100, 0, 0, 60, WAD, 0).unwrap(), 0);
    }

    #[test]
    fn full_improvement_earns_full_budget() {
        // Deviation erased entirely, snapshot matched exactly: the bonus is
        // rate × seconds at minimum TVL multiplier and full pool share.
        let b = bonus(RATE, 1_000, 0, 1_000, 60, WAD, 0).unwrap();
        assert_eq!(b, RATE * 60);
    }

    #[test]
    fn half_improvement_earns_half_budget() {
        let b = bonus(RATE, 1_000, 500, 1_000, 60, WAD, 0).unwrap();
        assert_eq!(b, RATE * 60 / 2);
    }

    #[test]
    fn pool_share_scales_bonus() {
        let full = bonus(RATE, 1_000, 0, 1_000, 60, WAD, 0).unwrap();
        let quarter = bonus(RATE, 1_000, 0, 1_000, 60, WAD / 4, 0).unwrap();
        assert_eq!(quarter, full / 4);
    }

    #[test]
    fn tvl_doubles_bonus_at_cap() {
        let small = bonus(RATE, 1_000, 0, 1_000, 60, WAD, 0).unwrap();
        let large = bonus(RATE, 1_000, 0, 1_000, 60, WAD, 100 * REBALANCE_TVL_DENOM_USD).unwrap();
        assert_eq!(large, 2 * small);
    }

    #[test]
    fn improvement_ratio_capped_at_one() {
        // Deviation grew after the update, then one operation fixed more
        // than the snapshot: the ratio caps at 1.0.
        let capped = bonus(RATE, 5_000, 0, 1_000, 60, WAD, 0).unwrap();
        let exact = bonus(RATE, 1_000, 0, 1_000, 60, WAD, 0).unwrap();
        assert_eq!(capped, exact);
    }

    // --- proptest ---

    proptest! {
        #[test]
        fn bonus_bounded_by_budget(
            before in 0u64..=1_000_000,
            after in 0u64..=1_000_000,
            snapshot in 0u64..=1_000_000,
            secs in 0u64..=10_000_000,
            share in 0u128..=WAD,
        ) {
            let b = bonus(RATE, before, after, snapshot, secs, share, 0).unwrap();
            prop_assert!(b <= RATE * secs, "bonus {b} exceeds budget");
        }

        #[test]
        fn bonus_monotone_in_improvement(
            after_hi in 0u64..=1_000,
            after_lo in 0u64..=1_000,
            secs in 1u64..=1_000_000,
        ) {
            let (worse, better) = if after_hi >= after_lo {
                (after_hi, after_lo)
            } else {
                (after_lo, after_hi)
            };
            let before = 2_000u64;
            let b_worse = bonus(RATE, before, worse, 10_000, secs, WAD, 0).unwrap();
            let b_better = bonus(RATE, before, better, 10_000, secs, WAD, 0).unwrap();
            prop_assert!(b_better >= b_worse);
        }
    }
}
