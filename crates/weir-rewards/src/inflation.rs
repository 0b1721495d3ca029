//! Decaying emission schedule.
//!
//! Emission follows piecewise-constant epochs: the rate starts at
//! [`INITIAL_INFLATION_RATE`](weir_core::constants::INITIAL_INFLATION_RATE)
//! and is multiplied by
//! [`INFLATION_DECAY_FACTOR`](weir_core::constants::INFLATION_DECAY_FACTOR)
//! (0.6) at every epoch boundary.
//!
//! Epochs:
//! - Epoch 0 (first year): full rate
//! - Epoch 1: 0.6 × rate
//! - Epoch 2: 0.36 × rate
//! - …
//! - Epoch ≥ [`MAX_INFLATION_EPOCHS`](weir_core::constants::MAX_INFLATION_EPOCHS): 0
//!
//! `emitted_between` integrates the rate exactly across epoch boundaries in
//! O(epochs), so cumulative emission is additive over adjacent intervals.

use serde::{Deserialize, Serialize};

use weir_core::constants::{
    INFLATION_DECAY_FACTOR, INFLATION_EPOCH_SECS, INITIAL_INFLATION_RATE, MAX_INFLATION_EPOCHS,
    WAD,
};
use weir_core::error::MathError;
use weir_core::fixed::{fixed_pow, scale_amount};
use weir_core::traits::EmissionSchedule;
use weir_core::types::{Amount, Timestamp, Wad};

/// Piecewise-constant decaying emission schedule.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct InflationSchedule {
    /// Unix time emission starts; the rate is zero before this.
    pub start: Timestamp,
    /// Epoch-0 rate in base units per second.
    pub initial_rate: Amount,
    /// Per-epoch geometric decay factor, WAD-scaled.
    pub decay_factor: Wad,
    /// Epoch length in seconds.
    pub epoch_secs: u64,
}

impl InflationSchedule {
    /// Schedule with protocol-default parameters starting at `start`.
    pub fn new(start: Timestamp) -> Self {
        Self {
            start,
            initial_rate: INITIAL_INFLATION_RATE,
            decay_factor: INFLATION_DECAY_FACTOR,
            epoch_secs: INFLATION_EPOCH_SECS,
        }
    }

    /// Epoch a timestamp falls in. Times before `start` map to epoch 0.
    pub fn epoch_of(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.start) / self.epoch_secs
    }

    /// First timestamp of a given epoch.
    pub fn epoch_start(&self, epoch: u64) -> Timestamp {
        self.start.saturating_add(epoch.saturating_mul(self.epoch_secs))
    }

    /// Emission rate during a given epoch, in base units per second.
    ///
    /// `rate(e) = initial_rate × decay_factor^e`, exactly zero from
    /// [`MAX_INFLATION_EPOCHS`] onward.
    pub fn epoch_rate(&self, epoch: u64) -> Result<Amount, MathError> {
        if epoch >= MAX_INFLATION_EPOCHS {
            return Ok(0);
        }
        let factor = fixed_pow(self.decay_factor, epoch, WAD)?;
        scale_amount(self.initial_rate, factor)
    }

    /// The next timestamp at which the rate drops, if the rate is still
    /// non-zero at `now`.
    pub fn next_rate_drop(&self, now: Timestamp) -> Option<Timestamp> {
        let epoch = self.epoch_of(now);
        match self.epoch_rate(epoch) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(self.epoch_start(epoch + 1)),
        }
    }
}

impl EmissionSchedule for InflationSchedule {
    fn rate_at(&self, now: Timestamp) -> Amount {
        if now < self.start {
            return 0;
        }
        self.epoch_rate(self.epoch_of(now)).unwrap_or(0)
    }

    fn emitted_between(&self, from: Timestamp, to: Timestamp) -> Result<Amount, MathError> {
        if to <= from {
            return Ok(0);
        }
        let from = from.max(self.start);
        if to <= from {
            return Ok(0);
        }

        let first = self.epoch_of(from);
        let last = self.epoch_of(to.saturating_sub(1));
        let mut total: u128 = 0;

        for epoch in first..=last {
            let rate = self.epoch_rate(epoch)?;
            if rate == 0 {
                break;
            }
            let seg_start = from.max(self.epoch_start(epoch));
            let seg_end = to.min(self.epoch_start(epoch + 1));
            let secs = seg_end.saturating_sub(seg_start);
            total = total
                .checked_add((rate as u128).checked_mul(secs as u128).ok_or(MathError::ArithmeticOverflow)?)
                .ok_or(MathError::ArithmeticOverflow)?;
        }

        u64::try_from(total).map_err(|_| MathError::ArithmeticOverflow)
    }
}
