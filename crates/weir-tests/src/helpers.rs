//! Shared test helpers: trait-object mocks and engine harness builders.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use weir_alloc::engine::AllocationEngine;
use weir_core::constants::WAD;
use weir_core::error::{LedgerError, OracleError, VenueError};
use weir_core::traits::{PriceOracle, ProofVerifier, RewardSource, VenueAdapter, VenueRegistry};
use weir_core::types::{AccountId, Amount, AssetId, PoolId, Timestamp, VenueId, Wad};

pub const NOW: Timestamp = 1_700_000_000;

pub fn pid() -> PoolId {
    PoolId::from("pool")
}

pub fn asset() -> AssetId {
    AssetId::from("usdw")
}

pub fn reward() -> AssetId {
    AssetId::from("weir")
}

pub fn acct(s: &str) -> AccountId {
    AccountId::from(s)
}

pub fn vid(s: &str) -> VenueId {
    VenueId::from(s)
}

/// Representative token id for a venue, as registered by the harness.
pub fn lp_token(venue: &str) -> AssetId {
    AssetId::new(format!("lp-{venue}"))
}

// ----------------------------------------------------------------------
// Mocks
// ----------------------------------------------------------------------

pub struct MockOracle {
    prices: Mutex<HashMap<AssetId, Wad>>,
}

impl MockOracle {
    pub fn new() -> Self {
        Self { prices: Mutex::new(HashMap::new()) }
    }

    pub fn set(&self, asset: &AssetId, price: Wad) {
        self.prices.lock().unwrap().insert(asset.clone(), price);
    }
}

impl Default for MockOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl PriceOracle for MockOracle {
    fn is_supported(&self, asset: &AssetId) -> bool {
        self.prices.lock().unwrap().contains_key(asset)
    }

    fn usd_price(&self, asset: &AssetId) -> Result<Wad, OracleError> {
        self.prices
            .lock()
            .unwrap()
            .get(asset)
            .copied()
            .ok_or_else(|| OracleError::UnsupportedAsset(asset.to_string()))
    }
}

pub struct MockRegistry {
    registered: Mutex<HashMap<VenueId, AssetId>>,
    shut_down: Mutex<Vec<VenueId>>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self {
            registered: Mutex::new(HashMap::new()),
            shut_down: Mutex::new(Vec::new()),
        }
    }

    pub fn register(&self, venue: &VenueId, token: &AssetId) {
        self.registered.lock().unwrap().insert(venue.clone(), token.clone());
    }

    pub fn shut_down(&self, venue: &VenueId) {
        self.shut_down.lock().unwrap().push(venue.clone());
    }
}

impl Default for MockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl VenueRegistry for MockRegistry {
    fn is_registered(&self, venue: &VenueId) -> bool {
        self.registered.lock().unwrap().contains_key(venue)
    }

    fn representative_token(&self, venue: &VenueId) -> Result<AssetId, VenueError> {
        self.registered
            .lock()
            .unwrap()
            .get(venue)
            .cloned()
            .ok_or_else(|| VenueError::NotRegistered(venue.to_string()))
    }

    fn is_shut_down(&self, venue: &VenueId) -> bool {
        self.shut_down.lock().unwrap().contains(venue)
    }
}

/// In-memory venue balances, keyed per venue and asset so one venue can
/// serve several pools. `credit` simulates yield accruing inside a venue
/// without going through the engine.
pub struct MockAdapter {
    balances: Mutex<HashMap<(VenueId, AssetId), Amount>>,
}

impl MockAdapter {
    pub fn new() -> Self {
        Self { balances: Mutex::new(HashMap::new()) }
    }

    /// Venue balance summed over assets.
    pub fn balance(&self, venue: &VenueId) -> Amount {
        self.balances
            .lock()
            .unwrap()
            .iter()
            .filter(|((v, _), _)| v == venue)
            .map(|(_, amount)| amount)
            .sum()
    }

    pub fn credit(&self, venue: &VenueId, asset: &AssetId, amount: Amount) {
        *self
            .balances
            .lock()
            .unwrap()
            .entry((venue.clone(), asset.clone()))
            .or_insert(0) += amount;
    }
}

impl Default for MockAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl VenueAdapter for MockAdapter {
    fn deposit(&self, venue: &VenueId, asset: &AssetId, amount: Amount) -> Result<(), VenueError> {
        self.credit(venue, asset, amount);
        Ok(())
    }

    fn withdraw(
        &self,
        venue: &VenueId,
        asset: &AssetId,
        amount: Amount,
    ) -> Result<Amount, VenueError> {
        let mut balances = self.balances.lock().unwrap();
        let bal = balances.entry((venue.clone(), asset.clone())).or_insert(0);
        let freed = amount.min(*bal);
        *bal -= freed;
        Ok(freed)
    }

    fn allocated_value(&self, venue: &VenueId, asset: &AssetId) -> Result<Amount, VenueError> {
        Ok(*self
            .balances
            .lock()
            .unwrap()
            .get(&(venue.clone(), asset.clone()))
            .unwrap_or(&0))
    }
}

/// Minting reward source: always holds enough to pay, records every payout.
/// Used where the payer is the protocol itself (inflation, fee pot).
pub struct MintSource {
    held: Mutex<HashMap<AssetId, Amount>>,
    paid: Mutex<Vec<(AssetId, AccountId, Amount)>>,
}

impl MintSource {
    pub fn new() -> Self {
        Self { held: Mutex::new(HashMap::new()), paid: Mutex::new(Vec::new()) }
    }

    pub fn paid_to(&self, kind: &AssetId, account: &AccountId) -> Amount {
        self.paid
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, a, _)| k == kind && a == account)
            .map(|(_, _, amount)| amount)
            .sum()
    }
}

impl Default for MintSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RewardSource for MintSource {
    fn cumulative_earned(&self, _kind: &AssetId) -> Result<Amount, LedgerError> {
        Ok(0)
    }

    fn balance(&self, kind: &AssetId) -> Result<Amount, LedgerError> {
        Ok(*self.held.lock().unwrap().get(kind).unwrap_or(&0))
    }

    fn harvest(&self, kind: &AssetId) -> Result<(), LedgerError> {
        self.held.lock().unwrap().insert(kind.clone(), u64::MAX / 4);
        Ok(())
    }

    fn pay_out(&self, kind: &AssetId, to: &AccountId, amount: Amount) -> Result<(), LedgerError> {
        let mut held = self.held.lock().unwrap();
        let bal = held.entry(kind.clone()).or_insert(0);
        *bal = bal.checked_sub(amount).ok_or_else(|| LedgerError::InsufficientRewardBalance {
            kind: kind.to_string(),
            have: *bal,
            need: amount,
        })?;
        self.paid.lock().unwrap().push((kind.clone(), to.clone(), amount));
        Ok(())
    }
}

/// External-yield source with an explicitly driven cumulative counter.
pub struct FeedSource {
    earned: Mutex<HashMap<AssetId, Amount>>,
    paid: Mutex<Vec<(AssetId, AccountId, Amount)>>,
}

impl FeedSource {
    pub fn new() -> Self {
        Self { earned: Mutex::new(HashMap::new()), paid: Mutex::new(Vec::new()) }
    }

    /// Grow the cumulative earnings of `kind` by `amount`.
    pub fn earn(&self, kind: &AssetId, amount: Amount) {
        *self.earned.lock().unwrap().entry(kind.clone()).or_insert(0) += amount;
    }

    pub fn paid_to(&self, kind: &AssetId, account: &AccountId) -> Amount {
        self.paid
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, a, _)| k == kind && a == account)
            .map(|(_, _, amount)| amount)
            .sum()
    }

    pub fn total_paid(&self, kind: &AssetId) -> Amount {
        self.paid
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _, _)| k == kind)
            .map(|(_, _, amount)| amount)
            .sum()
    }
}

impl Default for FeedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl RewardSource for FeedSource {
    fn cumulative_earned(&self, kind: &AssetId) -> Result<Amount, LedgerError> {
        Ok(*self.earned.lock().unwrap().get(kind).unwrap_or(&0))
    }

    fn balance(&self, kind: &AssetId) -> Result<Amount, LedgerError> {
        let earned = *self.earned.lock().unwrap().get(kind).unwrap_or(&0);
        Ok(earned - self.total_paid(kind))
    }

    fn harvest(&self, _kind: &AssetId) -> Result<(), LedgerError> {
        Ok(())
    }

    fn pay_out(&self, kind: &AssetId, to: &AccountId, amount: Amount) -> Result<(), LedgerError> {
        let have = self.balance(kind)?;
        if have < amount {
            return Err(LedgerError::InsufficientRewardBalance {
                kind: kind.to_string(),
                have,
                need: amount,
            });
        }
        self.paid.lock().unwrap().push((kind.clone(), to.clone(), amount));
        Ok(())
    }
}

pub struct AcceptAllProofs;

impl ProofVerifier for AcceptAllProofs {
    fn verify(&self, _proof: &[u8], _leaf: &[u8]) -> bool {
        true
    }
}

pub struct RejectAllProofs;

impl ProofVerifier for RejectAllProofs {
    fn verify(&self, _proof: &[u8], _leaf: &[u8]) -> bool {
        false
    }
}

// ----------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------

pub struct Harness {
    pub oracle: Arc<MockOracle>,
    pub registry: Arc<MockRegistry>,
    pub adapter: Arc<MockAdapter>,
    pub engine: AllocationEngine,
}

impl Harness {
    /// Assign a full weight vector by venue name.
    pub fn set_weights(&mut self, weights: &[(&str, Wad)], now: Timestamp) {
        let resolved: Vec<(VenueId, Wad)> =
            weights.iter().map(|(name, w)| (vid(name), *w)).collect();
        self.engine.update_weights(&pid(), &resolved, now).unwrap();
    }
}

/// Engine with one pool and the named venues registered (weights unset).
/// Every price starts pinned at one USD.
pub fn harness_with_venues(names: &[&str]) -> Harness {
    let oracle = Arc::new(MockOracle::new());
    let registry = Arc::new(MockRegistry::new());
    let adapter = Arc::new(MockAdapter::new());

    oracle.set(&asset(), WAD);
    let mut engine = AllocationEngine::new(
        oracle.clone(),
        registry.clone(),
        adapter.clone(),
        reward(),
        NOW,
    );
    engine.create_pool(pid(), asset()).unwrap();
    for name in names {
        let token = lp_token(name);
        oracle.set(&token, WAD);
        registry.register(&vid(name), &token);
        engine.add_venue(&pid(), vid(name)).unwrap();
    }
    Harness { oracle, registry, adapter, engine }
}

/// Two-venue harness, the common case.
pub fn harness() -> Harness {
    harness_with_venues(&["a", "b"])
}
