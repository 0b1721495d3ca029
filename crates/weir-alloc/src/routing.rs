//! Greedy deposit/withdrawal routing.
//!
//! Pure planning over a snapshot of venue weights and live allocated
//! balances: callers compute the post-operation total, ask for a plan, then
//! execute it through the venue adapter. Venues are selected by distance
//! from the tolerance band edge, but each fill stops at the target itself,
//! so routed flow never overshoots and deviation cannot increase. Rounding
//! residue that remains once every venue sits at its target is absorbed
//! into the tolerance band.

use weir_core::constants::ALLOCATION_TOLERANCE_BPS;
use weir_core::error::{AllocationError, MathError};
use weir_core::fixed::{bps_of, scale_amount};
use weir_core::types::{Amount, Wad};

/// One venue as the router sees it: target weight plus what the adapter
/// currently reports allocated there.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VenueState {
    pub weight: Wad,
    pub allocated: Amount,
}

struct Band {
    target: Amount,
    upper: Amount,
    lower: Amount,
}

fn band(total: Amount, weight: Wad) -> Result<Band, AllocationError> {
    let target = scale_amount(total, weight)?;
    // tol <= target, so only the upper edge can overflow.
    let tol = bps_of(target, ALLOCATION_TOLERANCE_BPS)?;
    let upper = target.checked_add(tol).ok_or(MathError::ArithmeticOverflow)?;
    Ok(Band { target, upper, lower: target - tol })
}

/// Plan a deposit of `amount` given the post-deposit total `total_after`.
///
/// Rounds pick the venue with the most room below its upper band edge
/// `target + target*tolerance` among venues strictly below target, filling
/// each up to its target. A leftover that remains once all venues are at
/// target is routed into the band, largest headroom first. Returns
/// per-venue amounts in input order; errors with
/// [`AllocationError::NoVenueBelowTarget`] if funds remain but every venue
/// sits at or above its upper band edge.
pub fn deposit_plan(
    venues: &[VenueState],
    total_after: Amount,
    amount: Amount,
) -> Result<Vec<Amount>, AllocationError> {
    let mut plan = vec![0u64; venues.len()];
    let mut remaining = amount;

    while remaining > 0 {
        let mut best: Option<(usize, Amount, Amount)> = None;
        for (i, v) in venues.iter().enumerate() {
            let b = band(total_after, v.weight)?;
            let now_allocated = v.allocated + plan[i];
            if now_allocated >= b.target {
                continue;
            }
            let headroom = b.upper - now_allocated;
            if best.map_or(true, |(_, h, _)| headroom > h) {
                best = Some((i, headroom, b.target - now_allocated));
            }
        }
        let Some((i, _, gap)) = best else { break };
        // gap >= 1, so each round strictly decreases remaining or brings a
        // venue up to its target.
        let step = gap.min(remaining);
        plan[i] += step;
        remaining -= step;
    }

    // Rounding residue: every venue is at or above target. Fill into the
    // tolerance band, largest headroom first.
    while remaining > 0 {
        let mut best: Option<(usize, Amount)> = None;
        for (i, v) in venues.iter().enumerate() {
            let b = band(total_after, v.weight)?;
            let now_allocated = v.allocated + plan[i];
            if now_allocated >= b.upper {
                continue;
            }
            let headroom = b.upper - now_allocated;
            if best.map_or(true, |(_, h)| headroom > h) {
                best = Some((i, headroom));
            }
        }
        let (i, headroom) = best.ok_or(AllocationError::NoVenueBelowTarget)?;
        let step = headroom.min(remaining);
        plan[i] += step;
        remaining -= step;
    }

    Ok(plan)
}

/// Plan a withdrawal of `amount` given the post-withdrawal total
/// `total_after`.
///
/// Symmetric to [`deposit_plan`]: rounds drain the venue furthest above its
/// lower band edge `target - target*tolerance` among venues strictly above
/// target, down to the target. Residue comes out of the band, then a final
/// sweep drains venues in order (full exits). Whatever is still unfreed is
/// [`AllocationError::InsufficientLiquidity`].
pub fn withdraw_plan(
    venues: &[VenueState],
    total_after: Amount,
    amount: Amount,
) -> Result<Vec<Amount>, AllocationError> {
    let mut plan = vec![0u64; venues.len()];
    let mut remaining = amount;

    while remaining > 0 {
        let mut best: Option<(usize, Amount, Amount)> = None;
        for (i, v) in venues.iter().enumerate() {
            let b = band(total_after, v.weight)?;
            let now_allocated = v.allocated - plan[i];
            if now_allocated <= b.target {
                continue;
            }
            let excess = now_allocated - b.lower;
            if best.map_or(true, |(_, e, _)| excess > e) {
                best = Some((i, excess, now_allocated - b.target));
            }
        }
        let Some((i, _, surplus)) = best else { break };
        let step = surplus.min(remaining);
        plan[i] += step;
        remaining -= step;
    }

    // Residue out of the tolerance band, largest excess first.
    while remaining > 0 {
        let mut best: Option<(usize, Amount)> = None;
        for (i, v) in venues.iter().enumerate() {
            let b = band(total_after, v.weight)?;
            let now_allocated = v.allocated - plan[i];
            if now_allocated <= b.lower {
                continue;
            }
            let excess = now_allocated - b.lower;
            if best.map_or(true, |(_, e)| excess > e) {
                best = Some((i, excess));
            }
        }
        let Some((i, excess)) = best else { break };
        let step = excess.min(remaining);
        plan[i] += step;
        remaining -= step;
    }

    // Final sweep: the request exceeds the routable excess, e.g. a full
    // exit. Drain in order.
    if remaining > 0 {
        for (i, v) in venues.iter().enumerate() {
            let available = v.allocated - plan[i];
            let step = available.min(remaining);
            plan[i] += step;
            remaining -= step;
            if remaining == 0 {
                break;
            }
        }
    }

    if remaining > 0 {
        return Err(AllocationError::InsufficientLiquidity { remaining });
    }
    Ok(plan)
}

/// `Σ |target_i − allocated_i|` against the given total.
pub fn total_deviation(
    venues: &[VenueState],
    total: Amount,
) -> Result<Amount, AllocationError> {
    let mut sum: Amount = 0;
    for v in venues {
        let tgt = scale_amount(total, v.weight)?;
        sum = sum
            .checked_add(tgt.abs_diff(v.allocated))
            .ok_or(MathError::ArithmeticOverflow)?;
    }
    Ok(sum)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use weir_core::constants::WAD;

    fn vs(weight: Wad, allocated: Amount) -> VenueState {
        VenueState { weight, allocated }
    }

    // --- deposit_plan ---

    #[test]
    fn empty_pool_splits_by_weight() {
        // 10_000 into a fresh 60/40 pool lands exactly 6_000 / 4_000.
        let venues = [vs(6 * WAD / 10, 0), vs(4 * WAD / 10, 0)];
        let plan = deposit_plan(&venues, 10_000, 10_000).unwrap();
        assert_eq!(plan, vec![6_000, 4_000]);
    }

    #[test]
    fn deposit_prefers_underweight_venue() {
        // 80/20 targets, all liquidity currently in the second venue: the
        // whole deposit routes to the first.
        let venues = [vs(8 * WAD / 10, 0), vs(2 * WAD / 10, 10_000)];
        let plan = deposit_plan(&venues, 12_000, 2_000).unwrap();
        assert_eq!(plan, vec![2_000, 0]);
    }

    #[test]
    fn rounding_residue_lands_in_band() {
        // Targets floor to 6_000/4_000 against a total of 10_001; the spare
        // unit goes to the venue with the wider band.
        let venues = [vs(6 * WAD / 10, 0), vs(4 * WAD / 10, 0)];
        let plan = deposit_plan(&venues, 10_001, 10_001).unwrap();
        assert_eq!(plan, vec![6_001, 4_000]);
    }

    #[test]
    fn deposit_rejected_when_no_headroom_anywhere() {
        // A stale total makes the sole venue look over-allocated past its
        // band: nothing is routable.
        let venues = [vs(WAD, 100)];
        assert!(matches!(
            deposit_plan(&venues, 50, 5),
            Err(AllocationError::NoVenueBelowTarget)
        ));
    }

    #[test]
    fn deposit_of_zero_is_empty_plan() {
        let venues = [vs(WAD, 1_000)];
        assert_eq!(deposit_plan(&venues, 1_000, 0).unwrap(), vec![0]);
    }

    #[test]
    fn band_edge_overflow_is_an_error() {
        // A full-weight venue against a near-max total pushes the upper
        // band edge past u64::MAX.
        let venues = [vs(WAD, 0)];
        assert!(matches!(
            deposit_plan(&venues, u64::MAX, 1),
            Err(AllocationError::Math(MathError::ArithmeticOverflow))
        ));
    }

    // --- withdraw_plan ---

    #[test]
    fn withdraw_drains_overweight_venue_first() {
        // 50/50 targets, first venue holds everything.
        let venues = [vs(WAD / 2, 10_000), vs(WAD / 2, 0)];
        let plan = withdraw_plan(&venues, 8_000, 2_000).unwrap();
        assert_eq!(plan, vec![2_000, 0]);
    }

    #[test]
    fn withdraw_sweep_handles_full_exit() {
        let venues = [vs(6 * WAD / 10, 6_000), vs(4 * WAD / 10, 4_000)];
        let plan = withdraw_plan(&venues, 0, 10_000).unwrap();
        assert_eq!(plan, vec![6_000, 4_000]);
    }

    #[test]
    fn withdraw_more_than_allocated_rejected() {
        let venues = [vs(WAD, 5_000)];
        assert!(matches!(
            withdraw_plan(&venues, 0, 6_000),
            Err(AllocationError::InsufficientLiquidity { remaining: 1_000 })
        ));
    }

    #[test]
    fn withdraw_never_overdraws_a_venue() {
        let venues = [vs(WAD / 2, 3_000), vs(WAD / 2, 7_000)];
        let plan = withdraw_plan(&venues, 4_000, 6_000).unwrap();
        assert_eq!(plan.iter().sum::<u64>(), 6_000);
        for (p, v) in plan.iter().zip(&venues) {
            assert!(*p <= v.allocated);
        }
    }

    // --- deviation ---

    #[test]
    fn deviation_zero_at_target() {
        let venues = [vs(6 * WAD / 10, 6_000), vs(4 * WAD / 10, 4_000)];
        assert_eq!(total_deviation(&venues, 10_000).unwrap(), 0);
    }

    #[test]
    fn deviation_counts_both_sides() {
        let venues = [vs(WAD / 2, 7_000), vs(WAD / 2, 3_000)];
        assert_eq!(total_deviation(&venues, 10_000).unwrap(), 4_000);
    }

    #[test]
    fn deviation_sum_overflow_is_an_error() {
        // Two zero-weight venues each maximally over-allocated overflow the
        // absolute sum.
        let venues = [vs(0, u64::MAX), vs(0, u64::MAX)];
        assert!(matches!(
            total_deviation(&venues, 1_000),
            Err(AllocationError::Math(MathError::ArithmeticOverflow))
        ));
    }

    #[test]
    fn routed_deposit_shrinks_deviation() {
        // The 0.6/0.4 -> 0.8/0.2 re-weight scenario: a deposit while the
        // pool is out of band routes entirely to the underweight venue and
        // reduces deviation against the new total.
        let venues = [vs(8 * WAD / 10, 6_000), vs(2 * WAD / 10, 4_000)];
        let plan = deposit_plan(&venues, 12_000, 2_000).unwrap();
        assert_eq!(plan, vec![2_000, 0]);
        let before = total_deviation(&venues, 12_000).unwrap();
        let after = [
            vs(8 * WAD / 10, 6_000 + plan[0]),
            vs(2 * WAD / 10, 4_000 + plan[1]),
        ];
        assert!(total_deviation(&after, 12_000).unwrap() < before);
    }

    // --- proptest ---

    fn arb_venues() -> impl Strategy<Value = Vec<VenueState>> {
        (1usize..=6).prop_flat_map(|n| {
            prop::collection::vec(0u64..=1_000_000, n).prop_flat_map(move |allocs| {
                // Integer weights summing exactly to one WAD.
                prop::collection::vec(1u128..=100, n).prop_map(move |raw| {
                    let sum: u128 = raw.iter().sum();
                    let mut weights: Vec<u128> =
                        raw.iter().map(|r| r * WAD / sum).collect();
                    let assigned: u128 = weights.iter().sum();
                    weights[0] += WAD - assigned;
                    weights
                        .into_iter()
                        .zip(allocs.clone())
                        .map(|(weight, allocated)| VenueState { weight, allocated })
                        .collect::<Vec<_>>()
                })
            })
        })
    }

    proptest! {
        #[test]
        fn deposit_plan_conserves_amount(
            venues in arb_venues(),
            amount in 10_000u64..=1_000_000,
        ) {
            let total_before: u64 = venues.iter().map(|v| v.allocated).sum();
            let total_after = total_before + amount;
            let plan = deposit_plan(&venues, total_after, amount).unwrap();
            prop_assert_eq!(plan.iter().sum::<u64>(), amount);
        }

        #[test]
        fn withdraw_plan_conserves_amount(
            venues in arb_venues(),
            frac in 0u64..=100,
        ) {
            let total_before: u64 = venues.iter().map(|v| v.allocated).sum();
            let amount = total_before * frac / 100;
            let total_after = total_before - amount;
            let plan = withdraw_plan(&venues, total_after, amount).unwrap();
            prop_assert_eq!(plan.iter().sum::<u64>(), amount);
            for (p, v) in plan.iter().zip(&venues) {
                prop_assert!(*p <= v.allocated);
            }
        }

        #[test]
        fn deposit_never_lifts_a_venue_past_its_band(
            venues in arb_venues(),
            amount in 10_000u64..=1_000_000,
        ) {
            let total_before: u64 = venues.iter().map(|v| v.allocated).sum();
            let total_after = total_before + amount;
            let plan = deposit_plan(&venues, total_after, amount).unwrap();
            for (p, v) in plan.iter().zip(&venues) {
                if *p == 0 { continue; }
                let tgt = scale_amount(total_after, v.weight).unwrap();
                let upper = tgt + bps_of(tgt, ALLOCATION_TOLERANCE_BPS).unwrap();
                prop_assert!(v.allocated + p <= upper);
            }
        }

        #[test]
        fn deposit_routing_terminates_within_round_bound(
            venues in arb_venues(),
            amount in 1u64..=1_000_000,
        ) {
            // Reproduce the to-target loop, counting rounds: each round
            // either exhausts the remaining amount or lifts one venue to
            // its target.
            let total_before: u64 = venues.iter().map(|v| v.allocated).sum();
            let total_after = total_before + amount;
            let mut plan = vec![0u64; venues.len()];
            let mut remaining = amount;
            let mut rounds = 0usize;
            while remaining > 0 {
                rounds += 1;
                prop_assert!(rounds <= venues.len() + 1, "routing exceeded round bound");
                let mut best: Option<(usize, u64, u64)> = None;
                for (i, v) in venues.iter().enumerate() {
                    let tgt = scale_amount(total_after, v.weight).unwrap();
                    let now_allocated = v.allocated + plan[i];
                    if now_allocated >= tgt { continue; }
                    let upper = tgt + bps_of(tgt, ALLOCATION_TOLERANCE_BPS).unwrap();
                    let headroom = upper - now_allocated;
                    if best.map_or(true, |(_, h, _)| headroom > h) {
                        best = Some((i, headroom, tgt - now_allocated));
                    }
                }
                let Some((i, _, gap)) = best else { break };
                let step = gap.min(remaining);
                plan[i] += step;
                remaining -= step;
            }
        }
    }
}
