//! Stake and time boost computation.
//!
//! An account's effective (boosted) stake is its raw stake scaled by
//! `clamp(stake_boost × time_boost, MIN_BOOST, MAX_BOOST)`:
//! - the time boost starts at [`TIME_STARTING_FACTOR`] on first stake and
//!   grows linearly to 1.0 over [`TIME_BOOST_RAMP_SECS`];
//! - adding stake blends the ramped factor back toward the starting factor,
//!   weighted by existing vs. added stake, so a large late deposit cannot
//!   inherit a mature boost;
//! - the stake boost rewards relative share: `1 + share × TVL_FACTOR`.

use serde::{Deserialize, Serialize};

use weir_core::constants::{
    MAX_BOOST, MIN_BOOST, TIME_BOOST_RAMP_SECS, TIME_STARTING_FACTOR, TVL_FACTOR, WAD,
};
use weir_core::error::MathError;
use weir_core::fixed::{clamp_wad, mul_div, wad_mul};
use weir_core::types::{Amount, Timestamp, Wad};

/// Per-account time-boost state.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct BoostRecord {
    /// Time-boost factor at `updated_at`, in `[TIME_STARTING_FACTOR, WAD]`.
    pub time_factor: Wad,
    pub updated_at: Timestamp,
}

impl BoostRecord {
    /// Record for a first-time staker.
    pub fn new(now: Timestamp) -> Self {
        Self { time_factor: TIME_STARTING_FACTOR, updated_at: now }
    }

    /// The time-boost factor ramped forward to `now`: linear growth from the
    /// stored factor to one WAD over the ramp period, clamped at one WAD.
    pub fn ramped(&self, now: Timestamp) -> Wad {
        if self.time_factor >= WAD {
            return WAD;
        }
        let elapsed = now.saturating_sub(self.updated_at).min(TIME_BOOST_RAMP_SECS);
        let gain = (WAD - self.time_factor) * elapsed as u128 / TIME_BOOST_RAMP_SECS as u128;
        (self.time_factor + gain).min(WAD)
    }

    /// Blend the record for added stake at `now`.
    ///
    /// The factor first ramps to `now`, then is averaged with the starting
    /// factor weighted by existing vs. added stake:
    /// `new = ramped × old/(old+added) + STARTING × added/(old+added)`.
    pub fn blended(&self, old_stake: Amount, added: Amount, now: Timestamp)
        -> Result<BoostRecord, MathError>
    {
        if old_stake == 0 {
            return Ok(BoostRecord::new(now));
        }
        let total = (old_stake as u128)
            .checked_add(added as u128)
            .ok_or(MathError::ArithmeticOverflow)?;
        let ramped = self.ramped(now);
        let kept = mul_div(ramped, old_stake as u128, total)?;
        let diluted = mul_div(TIME_STARTING_FACTOR, added as u128, total)?;
        Ok(BoostRecord { time_factor: kept + diluted, updated_at: now })
    }
}

/// Stake boost: `1 + (account_stake / total_stake) × TVL_FACTOR`, WAD-scaled.
///
/// One WAD when nothing is staked.
pub fn stake_boost(account_stake: Amount, total_stake: Amount) -> Result<Wad, MathError> {
    if total_stake == 0 {
        return Ok(WAD);
    }
    let share = mul_div(account_stake as u128, WAD, total_stake as u128)?;
    share
        .checked_mul(TVL_FACTOR)
        .and_then(|s| s.checked_add(WAD))
        .ok_or(MathError::ArithmeticOverflow)
}

/// Total boost: product of stake and time boosts, clamped to
/// `[MIN_BOOST, MAX_BOOST]`.
pub fn total_boost(stake_boost: Wad, time_factor: Wad) -> Result<Wad, MathError> {
    Ok(clamp_wad(wad_mul(stake_boost, time_factor)?, MIN_BOOST, MAX_BOOST))
}
