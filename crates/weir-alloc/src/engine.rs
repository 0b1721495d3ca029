//! The allocation engine.
//!
//! Owns every pool, the per-pool staking ledgers, the protocol-wide
//! inflation ledger, the vote-lock ledger and the fee ledger over it.
//! External collaborators (price oracle, venue registry, venue adapter)
//! come in as trait objects; the engine never reads a wall clock: every
//! time-dependent operation takes `now` from the caller, which serializes
//! all calls.
//!
//! Ordering discipline: every stake-mutating operation checkpoints and
//! settles the affected reward ledgers for the account before touching any
//! balance, and all validation plus external reads happen before the first
//! balance mutation. A failed operation leaves shares, stakes and locks
//! unchanged; reward checkpoints folded along the way stand, since they
//! record external earnings that accrued either way. Venue legs already
//! executed through the adapter (a deposit rejected on slippage, for
//! example) are the host transaction's to unwind.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use weir_core::constants::{
    BPS_PRECISION, DEPEG_THRESHOLD_BPS, MAX_DEVIATION_BPS, MAX_WEIGHT_UPDATE_DELAY_SECS,
    MIN_WEIGHT_UPDATE_DELAY_SECS, PLATFORM_FEE_BPS, TOTAL_VALUE_CACHE_EXPIRY_SECS, WAD,
};
use weir_core::error::{AllocationError, MathError, WeirError};
use weir_core::fixed::{mul_div, scale_amount, wad_div};
use weir_core::traits::{
    EmissionSchedule, PriceOracle, ProofVerifier, RewardSource, VenueAdapter, VenueRegistry,
};
use weir_core::types::{
    AccountId, Amount, AssetId, CachedValue, PoolId, Timestamp, UsdValue, Venue, VenueId, Wad,
};
use weir_rewards::boost::{self, BoostRecord};
use weir_rewards::incentive;
use weir_rewards::inflation::InflationSchedule;
use weir_rewards::ledger::StreamingLedger;
use weir_rewards::votelock::LockLedger;

use crate::pool::Pool;
use crate::routing::{self, VenueState};

/// Per-pool staking state: the yield ledger plus raw stakes and boost
/// records.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct PoolStaking {
    /// External-yield ledger over boosted stakes, with the platform fee skim.
    pub ledger: StreamingLedger,
    pub staked: BTreeMap<AccountId, Amount>,
    pub total_staked: Amount,
    pub boosts: BTreeMap<AccountId, BoostRecord>,
}

impl PoolStaking {
    fn new() -> Result<Self, AllocationError> {
        Ok(Self {
            ledger: StreamingLedger::with_fee([], PLATFORM_FEE_BPS)?,
            staked: BTreeMap::new(),
            total_staked: 0,
            boosts: BTreeMap::new(),
        })
    }

    pub fn staked_balance(&self, account: &AccountId) -> Amount {
        self.staked.get(account).copied().unwrap_or(0)
    }
}

/// Everything the engine persists; collaborators are re-attached on load.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct EngineState {
    pub pools: BTreeMap<PoolId, Pool>,
    pub staking: BTreeMap<PoolId, PoolStaking>,
    pub inflation_ledger: StreamingLedger,
    pub schedule: InflationSchedule,
    pub locks: LockLedger,
    pub fee_ledger: StreamingLedger,
    /// Monotone counter of all platform fees ever skimmed, per kind; drives
    /// the fee ledger's checkpoints.
    pub cumulative_fees: BTreeMap<AssetId, Amount>,
}

pub struct AllocationEngine {
    oracle: Arc<dyn PriceOracle>,
    registry: Arc<dyn VenueRegistry>,
    adapter: Arc<dyn VenueAdapter>,
    /// Per-pool external-yield sources; checkpointed before every
    /// stake-mutating operation on the pool.
    yield_sources: BTreeMap<PoolId, Arc<dyn RewardSource>>,
    /// Reward kind minted by the inflation schedule.
    reward_token: AssetId,

    pools: BTreeMap<PoolId, Pool>,
    staking: BTreeMap<PoolId, PoolStaking>,
    inflation_ledger: StreamingLedger,
    schedule: InflationSchedule,
    locks: LockLedger,
    fee_ledger: StreamingLedger,
    cumulative_fees: BTreeMap<AssetId, Amount>,
}

impl AllocationEngine {
    pub fn new(
        oracle: Arc<dyn PriceOracle>,
        registry: Arc<dyn VenueRegistry>,
        adapter: Arc<dyn VenueAdapter>,
        reward_token: AssetId,
        genesis: Timestamp,
    ) -> Self {
        Self {
            oracle,
            registry,
            adapter,
            yield_sources: BTreeMap::new(),
            inflation_ledger: StreamingLedger::new([reward_token.clone()]),
            reward_token,
            pools: BTreeMap::new(),
            staking: BTreeMap::new(),
            schedule: InflationSchedule::new(genesis),
            locks: LockLedger::new(),
            fee_ledger: StreamingLedger::new([]),
            cumulative_fees: BTreeMap::new(),
        }
    }

    /// Rebuild an engine from persisted state. Yield sources are
    /// collaborators, not state: re-attach them with [`set_yield_source`]
    /// after loading.
    ///
    /// [`set_yield_source`]: AllocationEngine::set_yield_source
    pub fn from_state(
        state: EngineState,
        oracle: Arc<dyn PriceOracle>,
        registry: Arc<dyn VenueRegistry>,
        adapter: Arc<dyn VenueAdapter>,
        reward_token: AssetId,
    ) -> Self {
        Self {
            oracle,
            registry,
            adapter,
            yield_sources: BTreeMap::new(),
            reward_token,
            pools: state.pools,
            staking: state.staking,
            inflation_ledger: state.inflation_ledger,
            schedule: state.schedule,
            locks: state.locks,
            fee_ledger: state.fee_ledger,
            cumulative_fees: state.cumulative_fees,
        }
    }

    /// Snapshot of everything persistable.
    pub fn state(&self) -> EngineState {
        EngineState {
            pools: self.pools.clone(),
            staking: self.staking.clone(),
            inflation_ledger: self.inflation_ledger.clone(),
            schedule: self.schedule.clone(),
            locks: self.locks.clone(),
            fee_ledger: self.fee_ledger.clone(),
            cumulative_fees: self.cumulative_fees.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn pool(&self, id: &PoolId) -> Option<&Pool> {
        self.pools.get(id)
    }

    pub fn staking(&self, id: &PoolId) -> Option<&PoolStaking> {
        self.staking.get(id)
    }

    pub fn inflation_ledger(&self) -> &StreamingLedger {
        &self.inflation_ledger
    }

    pub fn fee_ledger(&self) -> &StreamingLedger {
        &self.fee_ledger
    }

    pub fn locks(&self) -> &LockLedger {
        &self.locks
    }

    pub fn schedule(&self) -> &InflationSchedule {
        &self.schedule
    }

    // ------------------------------------------------------------------
    // Pool and venue administration
    // ------------------------------------------------------------------

    pub fn create_pool(&mut self, id: PoolId, asset: AssetId) -> Result<(), AllocationError> {
        if self.pools.contains_key(&id) {
            return Err(AllocationError::DuplicatePool(id.to_string()));
        }
        // Snapshot the underlying's price at creation; reference for the
        // doubled-threshold de-peg check.
        let price = self.oracle.usd_price(&asset)?;
        let mut pool = Pool::new(id.clone(), asset.clone());
        pool.price_snapshots.insert(asset, price);

        self.pools.insert(id.clone(), pool);
        self.staking.insert(id.clone(), PoolStaking::new()?);
        info!(pool = %id, "pool created");
        Ok(())
    }

    /// Register an external-yield reward kind for a pool's staking ledger.
    /// The fee ledger learns the kind too, since fees are skimmed in it.
    pub fn add_pool_reward_kind(
        &mut self,
        pool_id: &PoolId,
        kind: AssetId,
    ) -> Result<(), AllocationError> {
        let st = self
            .staking
            .get_mut(pool_id)
            .ok_or_else(|| AllocationError::PoolNotFound(pool_id.to_string()))?;
        st.ledger.add_reward_kind(kind.clone());
        self.fee_ledger.add_reward_kind(kind);
        Ok(())
    }

    /// Attach the external-yield source for a pool's staking ledger. Every
    /// stake-mutating operation checkpoints the ledger against it before any
    /// boosted balance changes, so yield earned up to that point settles on
    /// the balances that earned it.
    pub fn set_yield_source(
        &mut self,
        pool_id: &PoolId,
        source: Arc<dyn RewardSource>,
    ) -> Result<(), AllocationError> {
        if !self.staking.contains_key(pool_id) {
            return Err(AllocationError::PoolNotFound(pool_id.to_string()));
        }
        self.yield_sources.insert(pool_id.clone(), source);
        Ok(())
    }

    /// Add a venue with zero weight. It takes no deposits until a weight
    /// update assigns it one.
    pub fn add_venue(&mut self, pool_id: &PoolId, venue: VenueId) -> Result<(), AllocationError> {
        let pool = self
            .pools
            .get(pool_id)
            .ok_or_else(|| AllocationError::PoolNotFound(pool_id.to_string()))?;
        if pool.has_venue(&venue) {
            return Err(AllocationError::DuplicateVenue(venue.to_string()));
        }
        if !self.registry.is_registered(&venue) {
            return Err(weir_core::error::VenueError::NotRegistered(venue.to_string()).into());
        }
        let token = self.registry.representative_token(&venue)?;
        let price = self.oracle.usd_price(&token)?;

        let pool = self.pools.get_mut(pool_id).expect("pool checked");
        pool.price_snapshots.insert(token, price);
        pool.venues.push(Venue { id: venue.clone(), weight: 0 });
        info!(pool = %pool_id, %venue, "venue added");
        Ok(())
    }

    /// Remove a venue that carries no weight and no allocated balance.
    pub fn remove_venue(
        &mut self,
        pool_id: &PoolId,
        venue: &VenueId,
    ) -> Result<(), AllocationError> {
        let pool = self
            .pools
            .get(pool_id)
            .ok_or_else(|| AllocationError::PoolNotFound(pool_id.to_string()))?;
        let idx = pool
            .venue_index(venue)
            .ok_or_else(|| AllocationError::UnknownVenue(venue.to_string()))?;
        if pool.venues[idx].weight != 0 {
            return Err(AllocationError::VenueHasWeight(venue.to_string()));
        }
        if pool.venues.len() == 1 {
            return Err(AllocationError::SoleVenue(venue.to_string()));
        }
        if self.adapter.allocated_value(venue, &pool.asset)? != 0 {
            return Err(AllocationError::VenueHasBalance(venue.to_string()));
        }

        let pool = self.pools.get_mut(pool_id).expect("pool checked");
        pool.venues.remove(idx);
        info!(pool = %pool_id, %venue, "venue removed");
        Ok(())
    }

    /// Replace the full weight vector. Rate-limited per pool; re-snapshots
    /// deviation and every reference price.
    pub fn update_weights(
        &mut self,
        pool_id: &PoolId,
        weights: &[(VenueId, Wad)],
        now: Timestamp,
    ) -> Result<(), AllocationError> {
        let pool = self
            .pools
            .get(pool_id)
            .ok_or_else(|| AllocationError::PoolNotFound(pool_id.to_string()))?;

        if pool.last_weight_update > 0 {
            let next_allowed = pool.last_weight_update + pool.weight_update_delay_secs;
            if now < next_allowed {
                return Err(AllocationError::UpdateTooSoon {
                    remaining_secs: next_allowed - now,
                });
            }
        }
        if weights.len() != pool.venues.len() {
            return Err(AllocationError::WeightSetIncomplete {
                expected: pool.venues.len(),
                got: weights.len(),
            });
        }
        let sum: u128 = weights.iter().map(|(_, w)| *w).sum();
        if sum != WAD {
            return Err(AllocationError::WeightSumMismatch { sum });
        }
        let mut resolved = vec![None; pool.venues.len()];
        for (venue, weight) in weights {
            let idx = pool
                .venue_index(venue)
                .ok_or_else(|| AllocationError::UnknownVenue(venue.to_string()))?;
            if resolved[idx].replace(*weight).is_some() {
                return Err(AllocationError::DuplicateVenue(venue.to_string()));
            }
        }

        // External reads before any mutation.
        let snapshots = self.reference_prices(pool)?;
        let allocated: Vec<Amount> = pool
            .venues
            .iter()
            .map(|v| self.adapter.allocated_value(&v.id, &pool.asset))
            .collect::<Result<_, _>>()?;
        let total = checked_total(&allocated)?;

        let pool = self.pools.get_mut(pool_id).expect("pool checked");
        for (venue, weight) in pool.venues.iter_mut().zip(resolved) {
            venue.weight = weight.expect("full coverage checked");
        }
        let states: Vec<VenueState> = pool
            .venues
            .iter()
            .zip(&allocated)
            .map(|(v, a)| VenueState { weight: v.weight, allocated: *a })
            .collect();
        let deviation = routing::total_deviation(&states, total)?;
        let ratio = deviation_ratio_bps(deviation, total);

        pool.deviation_after_last_weight_update = deviation;
        pool.last_weight_update = now;
        pool.rebalancing_active = ratio > MAX_DEVIATION_BPS;
        pool.price_snapshots = snapshots;
        pool.cached_total = CachedValue { value: total, updated_at: now };
        info!(
            pool = %pool_id,
            deviation,
            ratio_bps = ratio,
            rebalancing = pool.rebalancing_active,
            "weights updated"
        );
        Ok(())
    }

    pub fn set_weight_update_delay(
        &mut self,
        pool_id: &PoolId,
        secs: u64,
    ) -> Result<(), AllocationError> {
        if !(MIN_WEIGHT_UPDATE_DELAY_SECS..=MAX_WEIGHT_UPDATE_DELAY_SECS).contains(&secs) {
            return Err(AllocationError::DelayOutOfRange { secs });
        }
        let pool = self
            .pools
            .get_mut(pool_id)
            .ok_or_else(|| AllocationError::PoolNotFound(pool_id.to_string()))?;
        pool.weight_update_delay_secs = secs;
        Ok(())
    }

    /// Permissionless zero-forcing of a de-pegged or shut-down venue.
    ///
    /// Allowed iff the registry reports the venue shut down, or its
    /// representative token moved past the de-peg threshold from the cached
    /// snapshot while the pool's own underlying has not moved past twice the
    /// threshold (a whole-pool de-peg is not this operation's business).
    pub fn handle_depeg(
        &mut self,
        pool_id: &PoolId,
        venue: &VenueId,
        now: Timestamp,
    ) -> Result<(), AllocationError> {
        let pool = self
            .pools
            .get(pool_id)
            .ok_or_else(|| AllocationError::PoolNotFound(pool_id.to_string()))?;
        let idx = pool
            .venue_index(venue)
            .ok_or_else(|| AllocationError::UnknownVenue(venue.to_string()))?;
        let old_weight = pool.venues[idx].weight;
        if old_weight == 0 {
            return Err(AllocationError::ZeroWeightVenue(venue.to_string()));
        }
        if pool.venues.len() == 1 {
            return Err(AllocationError::SoleVenue(venue.to_string()));
        }

        if !self.registry.is_shut_down(venue) {
            let token = self.registry.representative_token(venue)?;
            let reference = pool
                .price_snapshots
                .get(&token)
                .copied()
                .ok_or_else(|| AllocationError::NotDepegged(venue.to_string()))?;
            let current = self.oracle.usd_price(&token)?;
            if price_move_bps(reference, current)? < DEPEG_THRESHOLD_BPS {
                return Err(AllocationError::NotDepegged(venue.to_string()));
            }

            let asset_reference = pool
                .price_snapshots
                .get(&pool.asset)
                .copied()
                .ok_or_else(|| AllocationError::NotDepegged(venue.to_string()))?;
            let asset_current = self.oracle.usd_price(&pool.asset)?;
            if price_move_bps(asset_reference, asset_current)? >= 2 * DEPEG_THRESHOLD_BPS {
                return Err(AllocationError::NotDepegged(venue.to_string()));
            }
        }

        let snapshots = self.reference_prices(pool)?;
        let allocated: Vec<Amount> = pool
            .venues
            .iter()
            .map(|v| self.adapter.allocated_value(&v.id, &pool.asset))
            .collect::<Result<_, _>>()?;
        let total = checked_total(&allocated)?;

        let pool = self.pools.get_mut(pool_id).expect("pool checked");
        let remainder = WAD - old_weight;
        pool.venues[idx].weight = 0;
        for (i, v) in pool.venues.iter_mut().enumerate() {
            if i != idx {
                // remainder == 0 means the forced venue held all the weight;
                // the residual branch below reassigns it.
                v.weight = if remainder == 0 { 0 } else { mul_div(v.weight, WAD, remainder)? };
            }
        }
        // Scaling truncates; park the residual on the heaviest survivor so
        // the sum is exactly one WAD again.
        let residual = WAD - pool.weights_sum();
        if residual > 0 {
            let heaviest = pool
                .venues
                .iter_mut()
                .max_by_key(|v| v.weight)
                .expect("more than one venue checked");
            heaviest.weight += residual;
        }
        pool.assert_weights_sum_to_one()?;

        let states: Vec<VenueState> = pool
            .venues
            .iter()
            .zip(&allocated)
            .map(|(v, a)| VenueState { weight: v.weight, allocated: *a })
            .collect();
        let deviation = routing::total_deviation(&states, total)?;
        pool.deviation_after_last_weight_update = deviation;
        pool.last_weight_update = now;
        pool.rebalancing_active = true;
        pool.price_snapshots = snapshots;
        pool.cached_total = CachedValue { value: total, updated_at: now };
        warn!(pool = %pool_id, %venue, old_weight, "venue zero-forced");
        Ok(())
    }

    /// Terminal. Deposits are refused from here on; withdrawals still work.
    pub fn shutdown_pool(&mut self, pool_id: &PoolId) -> Result<(), AllocationError> {
        let pool = self
            .pools
            .get_mut(pool_id)
            .ok_or_else(|| AllocationError::PoolNotFound(pool_id.to_string()))?;
        pool.is_shutdown = true;
        warn!(pool = %pool_id, "pool shut down");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Deposit / withdraw
    // ------------------------------------------------------------------

    /// Deposit `amount` of the pool asset; mints shares at the current
    /// exchange rate. Optionally stakes the minted shares in the same call.
    /// Returns the shares minted.
    ///
    /// The venue legs execute before the `min_shares` check: a `Slippage`
    /// rejection leaves the engine's state untouched, but the host
    /// transaction must unwind the adapter deposits.
    pub fn deposit(
        &mut self,
        pool_id: &PoolId,
        account: &AccountId,
        amount: Amount,
        min_shares: Amount,
        stake: bool,
        now: Timestamp,
    ) -> Result<Amount, AllocationError> {
        let pool = self
            .pools
            .get(pool_id)
            .ok_or_else(|| AllocationError::PoolNotFound(pool_id.to_string()))?;
        if pool.is_shutdown {
            return Err(AllocationError::PoolShutdown(pool_id.to_string()));
        }
        if amount == 0 {
            return Err(AllocationError::ZeroAmount);
        }
        pool.assert_weights_sum_to_one()?;

        self.settle_pool_ledgers(pool_id, account, now)?;

        let pool = self.pools.get(pool_id).expect("pool checked");
        let asset = pool.asset.clone();
        let (states, total_before) = self.venue_states(pool)?;
        let deviation_before = routing::total_deviation(&states, total_before)?;
        let rate = exchange_rate(total_before, pool.total_shares)?;

        let total_target = total_before
            .checked_add(amount)
            .ok_or(MathError::ArithmeticOverflow)?;
        let plan = routing::deposit_plan(&states, total_target, amount)?;
        let venue_ids: Vec<VenueId> = pool.venues.iter().map(|v| v.id.clone()).collect();
        for (venue, step) in venue_ids.iter().zip(&plan) {
            if *step > 0 {
                self.adapter.deposit(venue, &asset, *step)?;
            }
        }

        let pool = self.pools.get(pool_id).expect("pool checked");
        let (states_after, total_after) = self.venue_states(pool)?;
        let credited = amount.min(total_after.saturating_sub(total_before));
        let shares = u64::try_from(mul_div(credited as u128, WAD, rate)?)
            .map_err(|_| MathError::ArithmeticOverflow)?;
        if shares < min_shares {
            return Err(AllocationError::Slippage {
                received: shares,
                min_received: min_shares,
            });
        }
        let deviation_after = routing::total_deviation(&states_after, total_after)?;

        let bonus = if pool.rebalancing_active {
            self.rebalance_bonus(pool_id, deviation_before, deviation_after, total_after, now)?
        } else {
            0
        };

        let pool = self.pools.get_mut(pool_id).expect("pool checked");
        pool.mint_shares(account, shares)?;
        if pool.rebalancing_active
            && deviation_ratio_bps(deviation_after, total_after) <= MAX_DEVIATION_BPS
        {
            pool.rebalancing_active = false;
            info!(pool = %pool_id, "rebalancing complete");
        }
        pool.cached_total = CachedValue { value: total_after, updated_at: now };

        if bonus > 0 {
            self.inflation_ledger.credit(account, &self.reward_token, bonus)?;
            debug!(pool = %pool_id, %account, bonus, "rebalancing bonus granted");
        }
        if stake {
            self.stake(pool_id, account, shares, now)?;
        }
        debug!(pool = %pool_id, %account, amount, shares, "deposit");
        Ok(shares)
    }

    /// Burn `shares` and pay out the freed underlying. Permitted after
    /// shutdown. Returns the amount paid.
    ///
    /// As with [`deposit`], a `Slippage` rejection fires after the venue
    /// legs ran; unwinding them is on the host transaction.
    ///
    /// [`deposit`]: AllocationEngine::deposit
    pub fn withdraw(
        &mut self,
        pool_id: &PoolId,
        account: &AccountId,
        shares: Amount,
        min_amount: Amount,
        now: Timestamp,
    ) -> Result<Amount, AllocationError> {
        let pool = self
            .pools
            .get(pool_id)
            .ok_or_else(|| AllocationError::PoolNotFound(pool_id.to_string()))?;
        if shares == 0 {
            return Err(AllocationError::ZeroAmount);
        }
        let staked = self
            .staking
            .get(pool_id)
            .map(|s| s.staked_balance(account))
            .unwrap_or(0);
        let available = pool.share_balance(account).saturating_sub(staked);
        if available < shares {
            return Err(AllocationError::InsufficientShares { have: available, need: shares });
        }

        self.settle_pool_ledgers(pool_id, account, now)?;

        let pool = self.pools.get(pool_id).expect("pool checked");
        let asset = pool.asset.clone();
        let (states, total_before) = self.venue_states(pool)?;
        let deviation_before = routing::total_deviation(&states, total_before)?;
        let rate = exchange_rate(total_before, pool.total_shares)?;
        let owed = scale_amount(shares, rate)?.min(total_before);

        let plan = routing::withdraw_plan(&states, total_before - owed, owed)?;
        let venue_ids: Vec<VenueId> = pool.venues.iter().map(|v| v.id.clone()).collect();
        let mut freed: Amount = 0;
        for (venue, step) in venue_ids.iter().zip(&plan) {
            if *step > 0 {
                freed = freed
                    .checked_add(self.adapter.withdraw(venue, &asset, *step)?)
                    .ok_or(MathError::ArithmeticOverflow)?;
            }
        }

        let paid = freed.min(owed);
        if paid < min_amount {
            return Err(AllocationError::Slippage { received: paid, min_received: min_amount });
        }

        let pool = self.pools.get(pool_id).expect("pool checked");
        let (states_after, total_after) = self.venue_states(pool)?;
        let deviation_after = routing::total_deviation(&states_after, total_after)?;
        let bonus = if pool.rebalancing_active {
            self.rebalance_bonus(pool_id, deviation_before, deviation_after, total_after, now)?
        } else {
            0
        };

        let pool = self.pools.get_mut(pool_id).expect("pool checked");
        pool.burn_shares(account, shares)?;
        if pool.rebalancing_active
            && deviation_ratio_bps(deviation_after, total_after) <= MAX_DEVIATION_BPS
        {
            pool.rebalancing_active = false;
            info!(pool = %pool_id, "rebalancing complete");
        }
        pool.cached_total = CachedValue { value: total_after, updated_at: now };

        if bonus > 0 {
            self.inflation_ledger.credit(account, &self.reward_token, bonus)?;
            debug!(pool = %pool_id, %account, bonus, "rebalancing bonus granted");
        }
        debug!(pool = %pool_id, %account, shares, paid, "withdrawal");
        Ok(paid)
    }

    // ------------------------------------------------------------------
    // Staking
    // ------------------------------------------------------------------

    /// Stake pool shares. Settles the yield and inflation ledgers first,
    /// blends the time boost, then re-derives the boosted balance.
    pub fn stake(
        &mut self,
        pool_id: &PoolId,
        account: &AccountId,
        amount: Amount,
        now: Timestamp,
    ) -> Result<(), AllocationError> {
        if amount == 0 {
            return Err(AllocationError::ZeroAmount);
        }
        let pool = self
            .pools
            .get(pool_id)
            .ok_or_else(|| AllocationError::PoolNotFound(pool_id.to_string()))?;
        let st = self
            .staking
            .get(pool_id)
            .ok_or_else(|| AllocationError::PoolNotFound(pool_id.to_string()))?;
        let available = pool.share_balance(account).saturating_sub(st.staked_balance(account));
        if available < amount {
            return Err(AllocationError::InsufficientShares { have: available, need: amount });
        }

        self.settle_pool_ledgers(pool_id, account, now)?;

        let st = self.staking.get_mut(pool_id).expect("pool checked");
        let old = st.staked_balance(account);
        let record = st.boosts.get(account).copied().unwrap_or_else(|| BoostRecord::new(now));
        let record = record.blended(old, amount, now)?;
        st.boosts.insert(account.clone(), record);

        let staked = old
            .checked_add(amount)
            .ok_or(MathError::ArithmeticOverflow)?;
        st.staked.insert(account.clone(), staked);
        st.total_staked = st
            .total_staked
            .checked_add(amount)
            .ok_or(MathError::ArithmeticOverflow)?;

        self.apply_boosted_balance(pool_id, account)?;
        debug!(pool = %pool_id, %account, amount, staked, "stake");
        Ok(())
    }

    /// Unstake pool shares, ramping the time boost forward first.
    pub fn unstake(
        &mut self,
        pool_id: &PoolId,
        account: &AccountId,
        amount: Amount,
        now: Timestamp,
    ) -> Result<(), AllocationError> {
        if amount == 0 {
            return Err(AllocationError::ZeroAmount);
        }
        let st = self
            .staking
            .get(pool_id)
            .ok_or_else(|| AllocationError::PoolNotFound(pool_id.to_string()))?;
        let have = st.staked_balance(account);
        if have < amount {
            return Err(AllocationError::InsufficientStake { have, need: amount });
        }

        self.settle_pool_ledgers(pool_id, account, now)?;

        let st = self.staking.get_mut(pool_id).expect("pool checked");
        let staked = have - amount;
        st.total_staked -= amount;
        if staked == 0 {
            st.staked.remove(account);
            st.boosts.remove(account);
        } else {
            st.staked.insert(account.clone(), staked);
            if let Some(record) = st.boosts.get_mut(account) {
                *record = BoostRecord { time_factor: record.ramped(now), updated_at: now };
            }
        }

        self.apply_boosted_balance(pool_id, account)?;
        debug!(pool = %pool_id, %account, amount, staked, "unstake");
        Ok(())
    }

    /// Claim external yield from a pool's staking ledger, then sweep the
    /// skimmed platform fees into the fee ledger.
    pub fn claim_yield(
        &mut self,
        pool_id: &PoolId,
        account: &AccountId,
    ) -> Result<BTreeMap<AssetId, Amount>, AllocationError> {
        let source = self.yield_source(pool_id)?;
        let st = self.staking.get_mut(pool_id).expect("pool checked");
        let paid = st.ledger.claim(account, source.as_ref())?;
        self.sweep_fees(pool_id)?;
        Ok(paid)
    }

    /// Read-only view of what `claim_yield` would pay.
    pub fn claimable_yield(
        &self,
        pool_id: &PoolId,
        account: &AccountId,
    ) -> Result<BTreeMap<AssetId, Amount>, AllocationError> {
        let source = self.yield_source(pool_id)?;
        let st = self.staking.get(pool_id).expect("pool checked");
        Ok(st.ledger.claimable(account, source.as_ref())?)
    }

    /// Fold a pool's external earnings into its staking ledger and sweep
    /// the skimmed fees.
    pub fn checkpoint_yield(&mut self, pool_id: &PoolId) -> Result<(), AllocationError> {
        let source = self.yield_source(pool_id)?;
        let st = self.staking.get_mut(pool_id).expect("pool checked");
        st.ledger.checkpoint(source.as_ref())?;
        self.sweep_fees(pool_id)
    }

    /// Claim the account's accrued share of protocol inflation, including
    /// any rebalancing bonuses. `source` mints/pays the reward token.
    pub fn claim_inflation(
        &mut self,
        account: &AccountId,
        source: &dyn RewardSource,
        now: Timestamp,
    ) -> Result<Amount, AllocationError> {
        self.checkpoint_inflation(now)?;
        self.inflation_ledger.settle_account(account)?;
        let paid = self.inflation_ledger.claim_settled(account, source)?;
        Ok(paid.get(&self.reward_token).copied().unwrap_or(0))
    }

    // ------------------------------------------------------------------
    // Vote-locks and the fee ledger
    // ------------------------------------------------------------------

    /// Create a vote-lock. Returns the boost assigned to the entry.
    pub fn lock(
        &mut self,
        account: &AccountId,
        amount: Amount,
        duration_secs: u64,
        now: Timestamp,
    ) -> Result<Wad, WeirError> {
        self.fee_ledger.settle_account(account)?;
        let boost = self.locks.lock(account, amount, duration_secs, now)?;
        self.refresh_lock_balance(account)?;
        Ok(boost)
    }

    /// Merge additional tokens into an existing lock under a new duration.
    pub fn relock(
        &mut self,
        account: &AccountId,
        index: usize,
        added: Amount,
        duration_secs: u64,
        now: Timestamp,
    ) -> Result<Wad, WeirError> {
        self.fee_ledger.settle_account(account)?;
        let boost = self.locks.relock(account, index, added, duration_secs, now)?;
        self.refresh_lock_balance(account)?;
        Ok(boost)
    }

    /// Remove an expired lock, returning its amount.
    pub fn unlock(
        &mut self,
        account: &AccountId,
        index: usize,
        now: Timestamp,
    ) -> Result<Amount, WeirError> {
        self.fee_ledger.settle_account(account)?;
        let amount = self.locks.unlock(account, index, now)?;
        self.refresh_lock_balance(account)?;
        Ok(amount)
    }

    /// Kick an expired lock past its grace period. Returns
    /// `(returned_to_owner, penalty_to_kicker)`.
    pub fn kick(
        &mut self,
        account: &AccountId,
        index: usize,
        now: Timestamp,
    ) -> Result<(Amount, Amount), WeirError> {
        self.fee_ledger.settle_account(account)?;
        let out = self.locks.kick(account, index, now)?;
        self.refresh_lock_balance(account)?;
        Ok(out)
    }

    /// Grant a one-time airdrop boost multiplier, gated by an opaque proof.
    pub fn grant_airdrop_boost(
        &mut self,
        account: &AccountId,
        multiplier: Wad,
        proof: &[u8],
        verifier: &dyn ProofVerifier,
    ) -> Result<(), WeirError> {
        Ok(self.locks.grant_airdrop_boost(account, multiplier, proof, verifier)?)
    }

    /// Claim the account's share of swept platform fees. `source` is the
    /// fee pot holding the skimmed tokens.
    pub fn claim_fees(
        &mut self,
        account: &AccountId,
        source: &dyn RewardSource,
    ) -> Result<BTreeMap<AssetId, Amount>, WeirError> {
        self.fee_ledger.settle_account(account)?;
        Ok(self.fee_ledger.claim_settled(account, source)?)
    }

    // ------------------------------------------------------------------
    // Views
    // ------------------------------------------------------------------

    /// Live total underlying value across venues.
    pub fn total_underlying(&self, pool_id: &PoolId) -> Result<Amount, AllocationError> {
        let pool = self
            .pools
            .get(pool_id)
            .ok_or_else(|| AllocationError::PoolNotFound(pool_id.to_string()))?;
        self.venue_states(pool).map(|(_, total)| total)
    }

    /// Total underlying value, served from the cache while fresh.
    pub fn total_underlying_cached(
        &mut self,
        pool_id: &PoolId,
        now: Timestamp,
    ) -> Result<Amount, AllocationError> {
        let pool = self
            .pools
            .get(pool_id)
            .ok_or_else(|| AllocationError::PoolNotFound(pool_id.to_string()))?;
        if pool.cached_total.is_fresh(now, TOTAL_VALUE_CACHE_EXPIRY_SECS) {
            return Ok(pool.cached_total.value);
        }
        let (_, total) = self.venue_states(pool)?;
        let pool = self.pools.get_mut(pool_id).expect("pool checked");
        pool.cached_total = CachedValue { value: total, updated_at: now };
        Ok(total)
    }

    /// Current absolute deviation and its ratio in basis points.
    pub fn compute_deviation(
        &self,
        pool_id: &PoolId,
    ) -> Result<(Amount, u128), AllocationError> {
        let pool = self
            .pools
            .get(pool_id)
            .ok_or_else(|| AllocationError::PoolNotFound(pool_id.to_string()))?;
        let (states, total) = self.venue_states(pool)?;
        let deviation = routing::total_deviation(&states, total)?;
        Ok((deviation, deviation_ratio_bps(deviation, total)))
    }

    /// Advance the inflation ledger to `now`.
    pub fn checkpoint_inflation(&mut self, now: Timestamp) -> Result<(), AllocationError> {
        let emitted = self.schedule.emitted_between(self.schedule.start, now)?;
        self.inflation_ledger
            .checkpoint_from_total(&self.reward_token, emitted)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn venue_states(&self, pool: &Pool) -> Result<(Vec<VenueState>, Amount), AllocationError> {
        let mut states = Vec::with_capacity(pool.venues.len());
        let mut total: Amount = 0;
        for v in &pool.venues {
            let allocated = self.adapter.allocated_value(&v.id, &pool.asset)?;
            total = total
                .checked_add(allocated)
                .ok_or(MathError::ArithmeticOverflow)?;
            states.push(VenueState { weight: v.weight, allocated });
        }
        Ok((states, total))
    }

    /// Current reference prices: every venue's representative token plus the
    /// pool asset.
    fn reference_prices(&self, pool: &Pool) -> Result<BTreeMap<AssetId, Wad>, AllocationError> {
        let mut out = BTreeMap::new();
        for v in &pool.venues {
            let token = self.registry.representative_token(&v.id)?;
            let price = self.oracle.usd_price(&token)?;
            out.insert(token, price);
        }
        out.insert(pool.asset.clone(), self.oracle.usd_price(&pool.asset)?);
        Ok(out)
    }

    /// Attached yield source for a pool. Pool existence is checked first so
    /// an unknown pool reports as such, not as a missing source.
    fn yield_source(&self, pool_id: &PoolId) -> Result<Arc<dyn RewardSource>, AllocationError> {
        if !self.staking.contains_key(pool_id) {
            return Err(AllocationError::PoolNotFound(pool_id.to_string()));
        }
        self.yield_sources
            .get(pool_id)
            .cloned()
            .ok_or_else(|| AllocationError::NoYieldSource(pool_id.to_string()))
    }

    /// Checkpoint and settle the inflation and staking ledgers for `account`
    /// ahead of a balance-affecting operation on the pool. The staking
    /// ledger is checkpointed against the attached yield source so accrual
    /// up to `now` lands on the pre-mutation balances.
    fn settle_pool_ledgers(
        &mut self,
        pool_id: &PoolId,
        account: &AccountId,
        now: Timestamp,
    ) -> Result<(), AllocationError> {
        self.checkpoint_inflation(now)?;
        self.inflation_ledger.settle_account(account)?;
        if let Some(source) = self.yield_sources.get(pool_id).cloned() {
            let st = self.staking.get_mut(pool_id).expect("source attached to live pool");
            st.ledger.checkpoint(source.as_ref())?;
            self.sweep_fees(pool_id)?;
        }
        if let Some(st) = self.staking.get_mut(pool_id) {
            st.ledger.settle_account(account)?;
        }
        Ok(())
    }

    /// Re-derive the account's boosted balance in the pool's staking ledger
    /// and its protocol-wide sum in the inflation ledger. Caller must have
    /// settled both ledgers.
    fn apply_boosted_balance(
        &mut self,
        pool_id: &PoolId,
        account: &AccountId,
    ) -> Result<(), AllocationError> {
        let st = self.staking.get_mut(pool_id).expect("pool checked");
        let staked = st.staked_balance(account);
        let boosted = if staked == 0 {
            0
        } else {
            let record = st.boosts.get(account).expect("record exists while staked");
            let stake_boost = boost::stake_boost(staked, st.total_staked)?;
            let total = boost::total_boost(stake_boost, record.time_factor)?;
            scale_amount(staked, total)?
        };
        st.ledger.set_boosted_balance(account, boosted)?;

        let protocol_wide: Amount = self
            .staking
            .values()
            .map(|s| s.ledger.boosted_balance(account))
            .sum();
        self.inflation_ledger.set_boosted_balance(account, protocol_wide)?;
        Ok(())
    }

    /// Move skimmed fees from a pool's staking ledger into the fee ledger.
    fn sweep_fees(&mut self, pool_id: &PoolId) -> Result<(), AllocationError> {
        let st = self.staking.get_mut(pool_id).expect("pool checked");
        let kinds: Vec<AssetId> = st.ledger.reward_kinds().cloned().collect();
        for kind in kinds {
            let amount = st.ledger.take_fee_owed(&kind);
            if amount == 0 {
                continue;
            }
            let cumulative = self.cumulative_fees.entry(kind.clone()).or_insert(0);
            *cumulative = cumulative
                .checked_add(amount)
                .ok_or(MathError::ArithmeticOverflow)?;
            let cumulative = *cumulative;
            self.fee_ledger.add_reward_kind(kind.clone());
            self.fee_ledger.checkpoint_from_total(&kind, cumulative)?;
            debug!(pool = %pool_id, kind = %kind, amount, "fees swept");
        }
        Ok(())
    }

    /// Push the account's lock-boosted amount into the fee ledger. Caller
    /// must have settled the account first.
    fn refresh_lock_balance(&mut self, account: &AccountId) -> Result<(), WeirError> {
        let boosted = self.locks.boosted_amount(account)?;
        self.fee_ledger.set_boosted_balance(account, boosted)?;
        Ok(())
    }

    /// Rebalancing bonus for one operation, against the pool's snapshot.
    fn rebalance_bonus(
        &self,
        pool_id: &PoolId,
        deviation_before: Amount,
        deviation_after: Amount,
        pool_total: Amount,
        now: Timestamp,
    ) -> Result<Amount, AllocationError> {
        let pool = self.pools.get(pool_id).expect("pool checked");
        let pool_usd = self.usd_value(&pool.asset, pool_total)?;
        let mut protocol_usd = pool_usd;
        for (id, other) in &self.pools {
            if id == pool_id {
                continue;
            }
            let total = if other.cached_total.is_fresh(now, TOTAL_VALUE_CACHE_EXPIRY_SECS) {
                other.cached_total.value
            } else {
                self.venue_states(other)?.1
            };
            protocol_usd = protocol_usd
                .checked_add(self.usd_value(&other.asset, total)?)
                .ok_or(MathError::ArithmeticOverflow)?;
        }
        let share = if protocol_usd == 0 {
            0
        } else {
            wad_div(pool_usd as u128, protocol_usd as u128)?
        };

        Ok(incentive::bonus(
            self.schedule.rate_at(now),
            deviation_before,
            deviation_after,
            pool.deviation_after_last_weight_update,
            now.saturating_sub(pool.last_weight_update),
            share,
            protocol_usd,
        )?)
    }

    fn usd_value(&self, asset: &AssetId, amount: Amount) -> Result<UsdValue, AllocationError> {
        let price = self.oracle.usd_price(asset)?;
        Ok(scale_amount(amount, price)?)
    }
}

fn exchange_rate(total_value: Amount, total_shares: Amount) -> Result<Wad, MathError> {
    if total_value == 0 || total_shares == 0 {
        return Ok(WAD);
    }
    wad_div(total_value as u128, total_shares as u128)
}

fn deviation_ratio_bps(deviation: Amount, total: Amount) -> u128 {
    if total == 0 {
        return 0;
    }
    deviation as u128 * BPS_PRECISION / total as u128
}

fn price_move_bps(reference: Wad, current: Wad) -> Result<u128, MathError> {
    mul_div(reference.abs_diff(current), BPS_PRECISION, reference)
}

fn checked_total(allocated: &[Amount]) -> Result<Amount, MathError> {
    allocated
        .iter()
        .try_fold(0u64, |acc, a| acc.checked_add(*a))
        .ok_or(MathError::ArithmeticOverflow)
}
