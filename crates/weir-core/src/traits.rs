//! Trait interfaces for the Weir protocol.
//!
//! These traits define the contracts between crates and toward external
//! collaborators:
//! - [`PriceOracle`]: USD pricing for assets (external)
//! - [`VenueAdapter`]: single-sided liquidity moves into/out of venues (external)
//! - [`VenueRegistry`]: venue metadata and shutdown status (external)
//! - [`RewardSource`]: externally earned yield feeding a reward ledger (external)
//! - [`EmissionSchedule`]: decaying token emission (weir-rewards implements)
//! - [`ProofVerifier`]: opaque one-time-claim proof verification (external)

use crate::error::{LedgerError, MathError, OracleError, VenueError};
use crate::types::{AccountId, Amount, AssetId, Timestamp, VenueId, Wad};

/// USD price lookups for assets.
///
/// A failed lookup is a hard failure of the enclosing operation; the engine
/// never substitutes a fallback price.
pub trait PriceOracle: Send + Sync {
    /// Whether the oracle can price this asset at all.
    fn is_supported(&self, asset: &AssetId) -> bool;

    /// Current USD price of one whole token, WAD-scaled.
    fn usd_price(&self, asset: &AssetId) -> Result<Wad, OracleError>;
}

/// Black-box single-sided liquidity operations against an external venue.
///
/// Implementations may fail on slippage or invalid venue state; such
/// failures propagate as failure of the enclosing deposit/withdrawal.
/// Implementations use interior mutability; the engine only ever holds
/// shared references.
pub trait VenueAdapter: Send + Sync {
    /// Move `amount` of `asset` into the venue.
    fn deposit(&self, venue: &VenueId, asset: &AssetId, amount: Amount) -> Result<(), VenueError>;

    /// Free up to `amount` of `asset` from the venue; returns the amount
    /// actually received.
    fn withdraw(&self, venue: &VenueId, asset: &AssetId, amount: Amount)
        -> Result<Amount, VenueError>;

    /// Current value allocated to the venue, in units of `asset`.
    fn allocated_value(&self, venue: &VenueId, asset: &AssetId) -> Result<Amount, VenueError>;
}

/// Read-only venue metadata. Venues must be registered here before a pool
/// may add them.
pub trait VenueRegistry: Send + Sync {
    fn is_registered(&self, venue: &VenueId) -> bool;

    /// The venue's representative token, used for de-peg price checks.
    fn representative_token(&self, venue: &VenueId) -> Result<AssetId, VenueError>;

    /// Whether the venue's upstream integration reports itself shut down.
    fn is_shut_down(&self, venue: &VenueId) -> bool;
}

/// A source of externally earned reward tokens feeding a streaming ledger.
///
/// `cumulative_earned` must be monotone per kind; the ledger checkpoints
/// against it and distributes only the delta since the last checkpoint.
pub trait RewardSource: Send + Sync {
    /// Total reward of `kind` ever earned by the ledger, in base units.
    fn cumulative_earned(&self, kind: &AssetId) -> Result<Amount, LedgerError>;

    /// Reward of `kind` currently held and available to pay out.
    fn balance(&self, kind: &AssetId) -> Result<Amount, LedgerError>;

    /// Pull in any earned-but-unclaimed reward of `kind`. Idempotent; safe
    /// to call redundantly.
    fn harvest(&self, kind: &AssetId) -> Result<(), LedgerError>;

    /// Transfer `amount` of `kind` to `to`.
    fn pay_out(&self, kind: &AssetId, to: &AccountId, amount: Amount) -> Result<(), LedgerError>;
}

/// A time-varying token emission rate.
pub trait EmissionSchedule: Send + Sync {
    /// Emission rate at `now`, in base units per second.
    fn rate_at(&self, now: Timestamp) -> Amount;

    /// Exact total emitted over `[from, to)`. Zero when `to <= from`.
    fn emitted_between(&self, from: Timestamp, to: Timestamp) -> Result<Amount, MathError>;
}

/// Opaque proof verification for one-time claims (airdropped boost
/// multipliers). The proof scheme itself is out of scope.
pub trait ProofVerifier: Send + Sync {
    fn verify(&self, proof: &[u8], leaf: &[u8]) -> bool;
}
