//! Pool state: venue set, weights, shares, and cached aggregates.
//!
//! A pool tracks venues in insertion order with unique membership. Weights
//! sum to exactly one WAD whenever they are mutated; per-venue allocated
//! balances are never stored (they are recomputed from the venue adapter),
//! but the total underlying value is cached with a timestamp as a fallback
//! for reads where a live recomputation is too expensive.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use weir_core::constants::{DEFAULT_WEIGHT_UPDATE_DELAY_SECS, WAD};
use weir_core::error::{AllocationError, MathError};
use weir_core::types::{
    AccountId, Amount, AssetId, CachedValue, PoolId, Timestamp, Venue, VenueId, Wad,
};

/// A pool of a single underlying asset spread across yield venues.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Pool {
    pub id: PoolId,
    pub asset: AssetId,
    /// Venues in insertion order; membership unique by id.
    pub venues: Vec<Venue>,
    pub total_shares: Amount,
    pub shares: BTreeMap<AccountId, Amount>,
    /// Cached total underlying value with its computation timestamp.
    pub cached_total: CachedValue,
    pub rebalancing_active: bool,
    /// Absolute deviation snapshot taken immediately after the last weight
    /// change; normalizes the rebalancing incentive.
    pub deviation_after_last_weight_update: Amount,
    pub last_weight_update: Timestamp,
    pub weight_update_delay_secs: u64,
    /// Terminal: once set, deposits are permanently refused. Withdrawals
    /// remain permitted.
    pub is_shutdown: bool,
    /// USD price snapshots (venue representative tokens + the pool asset)
    /// refreshed at every weight update; reference for de-peg checks.
    pub price_snapshots: BTreeMap<AssetId, Wad>,
}

impl Pool {
    pub fn new(id: PoolId, asset: AssetId) -> Self {
        Self {
            id,
            asset,
            venues: Vec::new(),
            total_shares: 0,
            shares: BTreeMap::new(),
            cached_total: CachedValue::default(),
            rebalancing_active: false,
            deviation_after_last_weight_update: 0,
            last_weight_update: 0,
            weight_update_delay_secs: DEFAULT_WEIGHT_UPDATE_DELAY_SECS,
            is_shutdown: false,
            price_snapshots: BTreeMap::new(),
        }
    }

    pub fn venue(&self, id: &VenueId) -> Option<&Venue> {
        self.venues.iter().find(|v| &v.id == id)
    }

    pub fn venue_index(&self, id: &VenueId) -> Option<usize> {
        self.venues.iter().position(|v| &v.id == id)
    }

    pub fn has_venue(&self, id: &VenueId) -> bool {
        self.venue(id).is_some()
    }

    pub fn weights_sum(&self) -> Wad {
        self.venues.iter().map(|v| v.weight).sum()
    }

    /// Enforce the weight invariant after a mutation.
    pub fn assert_weights_sum_to_one(&self) -> Result<(), AllocationError> {
        let sum = self.weights_sum();
        if sum != WAD {
            return Err(AllocationError::WeightSumMismatch { sum });
        }
        Ok(())
    }

    pub fn share_balance(&self, account: &AccountId) -> Amount {
        self.shares.get(account).copied().unwrap_or(0)
    }

    pub fn mint_shares(
        &mut self,
        account: &AccountId,
        amount: Amount,
    ) -> Result<(), AllocationError> {
        // Total first: it overflows no later than any single balance, and a
        // failure must leave both untouched.
        self.total_shares = self
            .total_shares
            .checked_add(amount)
            .ok_or(MathError::ArithmeticOverflow)?;
        let balance = self.shares.entry(account.clone()).or_insert(0);
        *balance = balance
            .checked_add(amount)
            .ok_or(MathError::ArithmeticOverflow)?;
        Ok(())
    }

    pub fn burn_shares(
        &mut self,
        account: &AccountId,
        amount: Amount,
    ) -> Result<(), AllocationError> {
        let have = self.share_balance(account);
        if have < amount {
            return Err(AllocationError::InsufficientShares { have, need: amount });
        }
        if have == amount {
            self.shares.remove(account);
        } else {
            self.shares.insert(account.clone(), have - amount);
        }
        self.total_shares -= amount;
        Ok(())
    }
}
