//! Error types for the Weir protocol.
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MathError {
    #[error("arithmetic overflow")] ArithmeticOverflow,
    #[error("division by zero")] DivisionByZero,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("unsupported asset: {0}")] UnsupportedAsset(String),
    #[error("price unavailable for {0}")] PriceUnavailable(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VenueError {
    #[error("venue not registered: {0}")] NotRegistered(String),
    #[error("adapter deposit into {venue} failed: {reason}")] AdapterDeposit { venue: String, reason: String },
    #[error("adapter withdrawal from {venue} failed: {reason}")] AdapterWithdraw { venue: String, reason: String },
    #[error("venue shut down: {0}")] ShutDown(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    #[error("pool not found: {0}")] PoolNotFound(String),
    #[error("duplicate pool: {0}")] DuplicatePool(String),
    #[error("pool is shut down: {0}")] PoolShutdown(String),
    #[error("no yield source attached to pool: {0}")] NoYieldSource(String),
    #[error("zero amount")] ZeroAmount,
    #[error("unknown venue: {0}")] UnknownVenue(String),
    #[error("duplicate venue: {0}")] DuplicateVenue(String),
    #[error("venue still has weight: {0}")] VenueHasWeight(String),
    #[error("venue still has an allocated balance: {0}")] VenueHasBalance(String),
    #[error("cannot remove or zero the sole remaining venue: {0}")] SoleVenue(String),
    #[error("weights sum to {sum}, expected exactly one WAD")] WeightSumMismatch { sum: u128 },
    #[error("weight set covers {got} venues, pool has {expected}")] WeightSetIncomplete { expected: usize, got: usize },
    #[error("weight update delay out of range: {secs}s")] DelayOutOfRange { secs: u64 },
    #[error("weight update rate-limited: retry in {remaining_secs}s")] UpdateTooSoon { remaining_secs: u64 },
    #[error("slippage: received {received}, minimum {min_received}")] Slippage { received: u64, min_received: u64 },
    #[error("insufficient shares: have {have}, need {need}")] InsufficientShares { have: u64, need: u64 },
    #[error("insufficient staked balance: have {have}, need {need}")] InsufficientStake { have: u64, need: u64 },
    #[error("no venue below its target allocation while routing a deposit")] NoVenueBelowTarget,
    #[error("insufficient venue liquidity: {remaining} units unfreed")] InsufficientLiquidity { remaining: u64 },
    #[error("venue is not de-pegged or shut down: {0}")] NotDepegged(String),
    #[error("venue already has zero weight: {0}")] ZeroWeightVenue(String),
    #[error(transparent)] Math(#[from] MathError),
    #[error(transparent)] Oracle(#[from] OracleError),
    #[error(transparent)] Venue(#[from] VenueError),
    #[error(transparent)] Ledger(#[from] LedgerError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("unknown reward kind: {0}")] UnknownRewardKind(String),
    #[error("reward source regressed for {kind}: reports {reported}, recorded {recorded}")]
    EarnedRegression { kind: String, reported: u64, recorded: u64 },
    #[error("insufficient reward balance for {kind}: have {have}, need {need}")]
    InsufficientRewardBalance { kind: String, have: u64, need: u64 },
    #[error("fee out of range: {bps} bps")] FeeOutOfRange { bps: u128 },
    #[error("source failure: {0}")] Source(String),
    #[error(transparent)] Math(#[from] MathError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("zero amount")] ZeroAmount,
    #[error("lock duration out of range: {secs}s")] DurationOutOfRange { secs: u64 },
    #[error("lock not found at index {index}")] LockNotFound { index: usize },
    #[error("lock not expired until {unlock_time}")] LockNotExpired { unlock_time: u64 },
    #[error("kick grace period runs until {kickable_at}")] GraceNotElapsed { kickable_at: u64 },
    #[error("relock may not shorten the lock: current unlock at {current}")] CannotShorten { current: u64 },
    #[error("airdrop boost already granted")] BoostAlreadyGranted,
    #[error("invalid airdrop proof")] InvalidProof,
    #[error(transparent)] Math(#[from] MathError),
}

#[derive(Error, Debug)]
pub enum WeirError {
    #[error(transparent)] Math(#[from] MathError),
    #[error(transparent)] Oracle(#[from] OracleError),
    #[error(transparent)] Venue(#[from] VenueError),
    #[error(transparent)] Allocation(#[from] AllocationError),
    #[error(transparent)] Ledger(#[from] LedgerError),
    #[error(transparent)] Lock(#[from] LockError),
    #[error("storage: {0}")] Storage(String),
}
