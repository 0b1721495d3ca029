//! Protocol constants. All monetary values are in base units (1 token =
//! 10^8 units); all ratios, weights, boosts, and USD prices are WAD-scaled
//! 18-decimal fixed point carried in `u128`.

/// One whole token in base units.
pub const UNIT: u64 = 100_000_000;

/// 18-decimal fixed-point scale for weights, boosts, prices, and rates.
pub const WAD: u128 = 1_000_000_000_000_000_000;

/// Basis-point precision (1 bps = 0.01%).
pub const BPS_PRECISION: u128 = 10_000;

pub const DAY_SECS: u64 = 86_400;

// --- Allocation ---

/// Half-width of the per-venue allocation band, relative to the target
/// allocation: a venue is "in band" within `target ± target × 2%`.
pub const ALLOCATION_TOLERANCE_BPS: u128 = 200;

/// Deviation ratio above which a pool enters rebalancing mode after a
/// weight update (and below which an improving operation clears it).
pub const MAX_DEVIATION_BPS: u128 = 200;

/// Price move (relative to the cached snapshot) beyond which a venue's
/// representative token counts as de-pegged. The threshold is doubled when
/// checking the pool's own underlying asset: a whole-pool de-peg is not
/// grounds for zeroing a single venue.
pub const DEPEG_THRESHOLD_BPS: u128 = 300;

pub const MIN_WEIGHT_UPDATE_DELAY_SECS: u64 = DAY_SECS;
pub const MAX_WEIGHT_UPDATE_DELAY_SECS: u64 = 32 * DAY_SECS;
pub const DEFAULT_WEIGHT_UPDATE_DELAY_SECS: u64 = 14 * DAY_SECS;

/// How long the cached total-underlying value may serve reads before a
/// live recomputation is forced.
pub const TOTAL_VALUE_CACHE_EXPIRY_SECS: u64 = 1800;

// --- Staking boost ---

/// Time-boost factor assigned on first stake (0.1 in WAD).
pub const TIME_STARTING_FACTOR: u128 = WAD / 10;

/// Ramp period over which the time-boost factor grows linearly to 1.0.
pub const TIME_BOOST_RAMP_SECS: u64 = 30 * DAY_SECS;

/// Multiplier applied to an account's relative stake share in the stake
/// boost: `stake_boost = 1 + share × TVL_FACTOR`.
pub const TVL_FACTOR: u128 = 10;

pub const MIN_BOOST: u128 = WAD;
pub const MAX_BOOST: u128 = 10 * WAD;

// --- Vote locks ---

pub const MIN_LOCK_SECS: u64 = 120 * DAY_SECS;
pub const MAX_LOCK_SECS: u64 = 240 * DAY_SECS;
pub const MIN_LOCK_BOOST: u128 = WAD;
pub const MAX_LOCK_BOOST: u128 = WAD + WAD / 2;

/// Grace period after expiry before a third party may kick a lock.
pub const KICK_GRACE_SECS: u64 = 28 * DAY_SECS;

/// Share of a kicked lock's amount paid to the kicker.
pub const KICK_PENALTY_BPS: u128 = 100;

// --- Inflation ---

pub const INFLATION_EPOCH_SECS: u64 = 365 * DAY_SECS;

/// Emission rate during epoch 0, in base units per second
/// (10,000,000 tokens over the first epoch).
pub const INITIAL_INFLATION_RATE: u64 =
    10_000_000 * UNIT / INFLATION_EPOCH_SECS;

/// Per-epoch geometric decay factor applied to the emission rate (0.6 WAD).
pub const INFLATION_DECAY_FACTOR: u128 = 600_000_000_000_000_000;

/// Epochs after which the emission rate is treated as exactly zero.
pub const MAX_INFLATION_EPOCHS: u64 = 64;

// --- Rebalancing incentive ---

/// USD TVL (WAD-scaled) that maps to a 1.0 TVL multiplier.
pub const REBALANCE_TVL_DENOM_USD: u64 = 1_000_000 * UNIT;
pub const MIN_TVL_MULTIPLIER: u128 = WAD;
pub const MAX_TVL_MULTIPLIER: u128 = 2 * WAD;

// --- Reward ledger fees ---

/// Default skim taken from externally earned yield before distribution.
pub const PLATFORM_FEE_BPS: u128 = 1_000;
pub const MAX_PLATFORM_FEE_BPS: u128 = 3_000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wad_is_18_decimals() {
        assert_eq!(WAD, 10u128.pow(18));
    }

    #[test]
    fn tolerance_is_two_percent() {
        assert_eq!(ALLOCATION_TOLERANCE_BPS * 100 / BPS_PRECISION, 2);
    }

    #[test]
    fn update_delay_bounds_ordered() {
        assert!(MIN_WEIGHT_UPDATE_DELAY_SECS < DEFAULT_WEIGHT_UPDATE_DELAY_SECS);
        assert!(DEFAULT_WEIGHT_UPDATE_DELAY_SECS < MAX_WEIGHT_UPDATE_DELAY_SECS);
        assert_eq!(MAX_WEIGHT_UPDATE_DELAY_SECS, 32 * DAY_SECS);
    }

    #[test]
    fn boost_bounds_ordered() {
        assert!(TIME_STARTING_FACTOR < WAD);
        assert!(MIN_BOOST < MAX_BOOST);
        assert!(MIN_LOCK_BOOST < MAX_LOCK_BOOST);
    }

    #[test]
    fn lock_window_ordered() {
        assert!(MIN_LOCK_SECS < MAX_LOCK_SECS);
        assert_eq!(MAX_LOCK_SECS, 2 * MIN_LOCK_SECS);
    }

    #[test]
    fn initial_inflation_covers_first_epoch() {
        // Integer truncation loses less than one unit per second.
        let emitted = INITIAL_INFLATION_RATE * INFLATION_EPOCH_SECS;
        let target = 10_000_000 * UNIT;
        assert!(emitted <= target);
        assert!(target - emitted < INFLATION_EPOCH_SECS);
    }

    #[test]
    fn fee_default_within_cap() {
        assert!(PLATFORM_FEE_BPS <= MAX_PLATFORM_FEE_BPS);
        assert!(MAX_PLATFORM_FEE_BPS < BPS_PRECISION);
    }

    #[test]
    fn tvl_multiplier_bounds_ordered() {
        assert!(MIN_TVL_MULTIPLIER < MAX_TVL_MULTIPLIER);
    }
}
