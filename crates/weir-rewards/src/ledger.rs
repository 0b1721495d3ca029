//! The streaming reward ledger.
//!
//! One ledger instance distributes one or more reward kinds over a set of
//! boosted balances. Per kind it keeps a monotone accumulator (cumulative
//! reward per boosted unit, WAD-scaled) and per account a snapshot of the
//! accumulator at last settlement plus an accrued-but-unclaimed amount.
//!
//! Discipline: the accumulator must be advanced and the account settled
//! *before* any change to that account's boosted balance. Skipping the
//! settlement would retroactively re-attribute past earnings to the new
//! balance. The allocation engine enforces this ordering on every
//! stake-mutating operation.
//!
//! Earned reward that arrives while nothing is staked is not lost: the
//! ledger leaves `last_recorded_earned` untouched until a staker exists,
//! so the pending delta simply waits.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use weir_core::constants::{BPS_PRECISION, MAX_PLATFORM_FEE_BPS, WAD};
use weir_core::error::{LedgerError, MathError};
use weir_core::fixed::mul_div;
use weir_core::traits::RewardSource;
use weir_core::types::{AccountId, Amount, AssetId, Wad};

/// Global per-kind accrual state.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct RewardStream {
    /// Cumulative reward per boosted unit ever distributed, WAD-scaled.
    /// Only ever increases.
    pub accumulator: Wad,
    /// Cumulative externally earned amount already folded into the
    /// accumulator (gross of fee).
    pub last_recorded_earned: Amount,
}

/// Per-account accrual state, created lazily on first settlement.
#[derive(
    Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct AccountPosition {
    /// Accumulator value at last settlement, per reward kind.
    pub snapshots: BTreeMap<AssetId, Wad>,
    /// Settled but unclaimed reward, per kind.
    pub owed: BTreeMap<AssetId, Amount>,
}

impl AccountPosition {
    fn has_owed(&self) -> bool {
        self.owed.values().any(|v| *v > 0)
    }
}

/// A streaming reward ledger over boosted balances.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct StreamingLedger {
    streams: BTreeMap<AssetId, RewardStream>,
    accounts: BTreeMap<AccountId, AccountPosition>,
    boosted: BTreeMap<AccountId, Amount>,
    total_boosted: Amount,
    /// Skim taken off every earned delta before distribution; zero disables.
    fee_bps: u128,
    /// Skimmed fees awaiting collection by the beneficiary.
    fee_owed: BTreeMap<AssetId, Amount>,
}

impl StreamingLedger {
    /// Ledger distributing the given reward kinds, no fee.
    pub fn new(kinds: impl IntoIterator<Item = AssetId>) -> Self {
        Self {
            streams: kinds.into_iter().map(|k| (k, RewardStream::default())).collect(),
            accounts: BTreeMap::new(),
            boosted: BTreeMap::new(),
            total_boosted: 0,
            fee_bps: 0,
            fee_owed: BTreeMap::new(),
        }
    }

    /// Ledger with a fee skim in basis points.
    pub fn with_fee(
        kinds: impl IntoIterator<Item = AssetId>,
        fee_bps: u128,
    ) -> Result<Self, LedgerError> {
        if fee_bps > MAX_PLATFORM_FEE_BPS {
            return Err(LedgerError::FeeOutOfRange { bps: fee_bps });
        }
        let mut ledger = Self::new(kinds);
        ledger.fee_bps = fee_bps;
        Ok(ledger)
    }

    /// Register an additional reward kind. No-op if already tracked.
    pub fn add_reward_kind(&mut self, kind: AssetId) {
        self.streams.entry(kind).or_default();
    }

    pub fn reward_kinds(&self) -> impl Iterator<Item = &AssetId> {
        self.streams.keys()
    }

    pub fn total_boosted(&self) -> Amount {
        self.total_boosted
    }

    pub fn boosted_balance(&self, account: &AccountId) -> Amount {
        self.boosted.get(account).copied().unwrap_or(0)
    }

    pub fn accumulator(&self, kind: &AssetId) -> Result<Wad, LedgerError> {
        self.streams
            .get(kind)
            .map(|s| s.accumulator)
            .ok_or_else(|| LedgerError::UnknownRewardKind(kind.to_string()))
    }

    /// Settled-but-unclaimed amount for an account and kind.
    pub fn owed(&self, account: &AccountId, kind: &AssetId) -> Amount {
        self.accounts
            .get(account)
            .and_then(|p| p.owed.get(kind))
            .copied()
            .unwrap_or(0)
    }

    /// Fold a new cumulative-earned total for one kind into the accumulator.
    ///
    /// The delta since the last checkpoint is skimmed by the fee (if any)
    /// and distributed per boosted unit. With zero total boosted balance the
    /// delta is left pending and `last_recorded_earned` does not advance.
    pub fn checkpoint_from_total(
        &mut self,
        kind: &AssetId,
        cumulative_earned: Amount,
    ) -> Result<(), LedgerError> {
        let total_boosted = self.total_boosted;
        let fee_bps = self.fee_bps;
        let stream = self
            .streams
            .get_mut(kind)
            .ok_or_else(|| LedgerError::UnknownRewardKind(kind.to_string()))?;

        if cumulative_earned < stream.last_recorded_earned {
            return Err(LedgerError::EarnedRegression {
                kind: kind.to_string(),
                reported: cumulative_earned,
                recorded: stream.last_recorded_earned,
            });
        }
        let delta = cumulative_earned - stream.last_recorded_earned;
        if delta == 0 || total_boosted == 0 {
            return Ok(());
        }

        let fee = u64::try_from(mul_div(delta as u128, fee_bps, BPS_PRECISION)?)
            .map_err(|_| MathError::ArithmeticOverflow)?;
        let net = delta - fee;

        stream.accumulator = stream
            .accumulator
            .checked_add(mul_div(net as u128, WAD, total_boosted as u128)?)
            .ok_or(MathError::ArithmeticOverflow)?;
        stream.last_recorded_earned = cumulative_earned;

        if fee > 0 {
            let bucket = self.fee_owed.entry(kind.clone()).or_insert(0);
            *bucket = bucket.checked_add(fee).ok_or(MathError::ArithmeticOverflow)?;
        }
        Ok(())
    }

    /// Checkpoint every reward kind against an external source.
    pub fn checkpoint(&mut self, source: &dyn RewardSource) -> Result<(), LedgerError> {
        let kinds: Vec<AssetId> = self.streams.keys().cloned().collect();
        for kind in kinds {
            let earned = source.cumulative_earned(&kind)?;
            self.checkpoint_from_total(&kind, earned)?;
        }
        Ok(())
    }

    /// Settle an account against the current accumulators: move the accrued
    /// share into `owed` and advance the snapshots. Creates the position
    /// lazily. Must precede any boosted-balance change for the account.
    pub fn settle_account(&mut self, account: &AccountId) -> Result<(), LedgerError> {
        let balance = self.boosted_balance(account);
        let position = self.accounts.entry(account.clone()).or_default();
        for (kind, stream) in &self.streams {
            let snapshot = position.snapshots.entry(kind.clone()).or_insert(0);
            if stream.accumulator > *snapshot && balance > 0 {
                let accrued =
                    u64::try_from(mul_div(balance as u128, stream.accumulator - *snapshot, WAD)?)
                        .map_err(|_| MathError::ArithmeticOverflow)?;
                let owed = position.owed.entry(kind.clone()).or_insert(0);
                *owed = owed.checked_add(accrued).ok_or(MathError::ArithmeticOverflow)?;
            }
            *snapshot = stream.accumulator;
        }
        Ok(())
    }

    /// Checkpoint against `source`, then settle `account`.
    pub fn checkpoint_account(
        &mut self,
        account: &AccountId,
        source: &dyn RewardSource,
    ) -> Result<(), LedgerError> {
        self.checkpoint(source)?;
        self.settle_account(account)
    }

    /// Set an account's boosted balance.
    ///
    /// The caller must have settled the account first; the position is
    /// snapshot-initialized here as a backstop so a missed settlement can
    /// never credit pre-existing accrual to a fresh balance.
    pub fn set_boosted_balance(
        &mut self,
        account: &AccountId,
        new_balance: Amount,
    ) -> Result<(), LedgerError> {
        let position = self.accounts.entry(account.clone()).or_default();
        for (kind, stream) in &self.streams {
            position.snapshots.entry(kind.clone()).or_insert(stream.accumulator);
        }

        let old = self.boosted.get(account).copied().unwrap_or(0);
        self.total_boosted = self
            .total_boosted
            .checked_sub(old)
            .and_then(|t| t.checked_add(new_balance))
            .ok_or(MathError::ArithmeticOverflow)?;
        if new_balance == 0 {
            self.boosted.remove(account);
        } else {
            self.boosted.insert(account.clone(), new_balance);
        }
        self.prune(account);
        Ok(())
    }

    /// Credit an amount directly to an account's owed bucket (e.g. a minted
    /// rebalancing bonus that bypasses the accumulator).
    pub fn credit(
        &mut self,
        account: &AccountId,
        kind: &AssetId,
        amount: Amount,
    ) -> Result<(), LedgerError> {
        if !self.streams.contains_key(kind) {
            return Err(LedgerError::UnknownRewardKind(kind.to_string()));
        }
        if amount == 0 {
            return Ok(());
        }
        let position = self.accounts.entry(account.clone()).or_default();
        let owed = position.owed.entry(kind.clone()).or_insert(0);
        *owed = owed.checked_add(amount).ok_or(MathError::ArithmeticOverflow)?;
        Ok(())
    }

    /// Read-only projection of what `claim` would pay, including the not yet
    /// checkpointed delta reported by `source`.
    pub fn claimable(
        &self,
        account: &AccountId,
        source: &dyn RewardSource,
    ) -> Result<BTreeMap<AssetId, Amount>, LedgerError> {
        let balance = self.boosted_balance(account);
        let position = self.accounts.get(account);
        let mut out = BTreeMap::new();

        for (kind, stream) in &self.streams {
            let mut accumulator = stream.accumulator;
            let earned = source.cumulative_earned(kind)?;
            if earned > stream.last_recorded_earned && self.total_boosted > 0 {
                let delta = earned - stream.last_recorded_earned;
                let fee = mul_div(delta as u128, self.fee_bps, BPS_PRECISION)?;
                let net = delta as u128 - fee;
                accumulator = accumulator
                    .checked_add(mul_div(net, WAD, self.total_boosted as u128)?)
                    .ok_or(MathError::ArithmeticOverflow)?;
            }

            let mut amount = position.and_then(|p| p.owed.get(kind)).copied().unwrap_or(0);
            if balance > 0 {
                let snapshot = position
                    .and_then(|p| p.snapshots.get(kind))
                    .copied()
                    .unwrap_or(0);
                if accumulator > snapshot {
                    let accrued =
                        u64::try_from(mul_div(balance as u128, accumulator - snapshot, WAD)?)
                            .map_err(|_| MathError::ArithmeticOverflow)?;
                    amount = amount.checked_add(accrued).ok_or(MathError::ArithmeticOverflow)?;
                }
            }
            if amount > 0 {
                out.insert(kind.clone(), amount);
            }
        }
        Ok(out)
    }

    /// Pay out everything owed to `account`, assuming the caller has already
    /// checkpointed and settled. Harvests the source at most once per kind
    /// if its held balance is short; fails before any payout if still short.
    pub fn claim_settled(
        &mut self,
        account: &AccountId,
        source: &dyn RewardSource,
    ) -> Result<BTreeMap<AssetId, Amount>, LedgerError> {
        let owed: BTreeMap<AssetId, Amount> = match self.accounts.get(account) {
            Some(p) => p.owed.iter().filter(|(_, v)| **v > 0).map(|(k, v)| (k.clone(), *v)).collect(),
            None => return Ok(BTreeMap::new()),
        };

        // Verify every kind is payable before mutating anything.
        for (kind, amount) in &owed {
            if source.balance(kind)? < *amount {
                source.harvest(kind)?;
                let have = source.balance(kind)?;
                if have < *amount {
                    return Err(LedgerError::InsufficientRewardBalance {
                        kind: kind.to_string(),
                        have,
                        need: *amount,
                    });
                }
            }
        }

        for (kind, amount) in &owed {
            source.pay_out(kind, account, *amount)?;
        }
        if let Some(position) = self.accounts.get_mut(account) {
            position.owed.clear();
        }
        self.prune(account);
        Ok(owed)
    }

    /// Checkpoint, settle, and pay out in one step.
    pub fn claim(
        &mut self,
        account: &AccountId,
        source: &dyn RewardSource,
    ) -> Result<BTreeMap<AssetId, Amount>, LedgerError> {
        self.checkpoint_account(account, source)?;
        self.claim_settled(account, source)
    }

    /// Skimmed fees awaiting collection for a kind.
    pub fn fee_owed(&self, kind: &AssetId) -> Amount {
        self.fee_owed.get(kind).copied().unwrap_or(0)
    }

    /// Withdraw the fee bucket for a kind.
    pub fn take_fee_owed(&mut self, kind: &AssetId) -> Amount {
        self.fee_owed.remove(kind).unwrap_or(0)
    }

    /// Drop the position once the account has neither balance nor owed
    /// rewards. A zero-balance position with owed rewards stays claimable.
    fn prune(&mut self, account: &AccountId) {
        let empty = self
            .accounts
            .get(account)
            .map(|p| !p.has_owed())
            .unwrap_or(false);
        if empty && self.boosted_balance(account) == 0 {
            self.accounts.remove(account);
        }
    }
}
