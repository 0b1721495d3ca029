//! Vote-locks: fixed-term token locks with a boost frozen at lock time.
//!
//! Each account holds an unordered list of lock entries. The boost is a
//! linear interpolation between [`MIN_LOCK_BOOST`] and [`MAX_LOCK_BOOST`]
//! by lock duration within `[MIN_LOCK_SECS, MAX_LOCK_SECS]`, optionally
//! multiplied once by an airdrop-granted multiplier (consumed on first
//! lock). Entries disappear on unlock, on a third-party kick after the
//! grace period, or by being merged into a relock.
//!
//! The fee ledger distributing rewards over lock-boosted amounts must be
//! settled for an account before any of these operations; the engine owns
//! that ordering.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use weir_core::constants::{
    KICK_GRACE_SECS, KICK_PENALTY_BPS, MAX_LOCK_BOOST, MAX_LOCK_SECS, MIN_LOCK_BOOST,
    MIN_LOCK_SECS,
};
use weir_core::error::{LockError, MathError};
use weir_core::fixed::{bps_of, scale_amount, wad_mul};
use weir_core::traits::ProofVerifier;
use weir_core::types::{AccountId, Amount, Timestamp, Wad};

/// A single lock entry. The boost never changes after creation.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct VoteLock {
    pub amount: Amount,
    pub unlock_time: Timestamp,
    /// WAD-scaled boost fixed at lock time.
    pub boost: Wad,
}

impl VoteLock {
    /// Lock-boosted amount of this entry.
    pub fn boosted(&self) -> Result<Amount, MathError> {
        scale_amount(self.amount, self.boost)
    }
}

/// Boost for a lock of the given duration: linear between
/// [`MIN_LOCK_BOOST`] and [`MAX_LOCK_BOOST`] over the allowed window.
pub fn lock_boost(duration_secs: u64) -> Result<Wad, LockError> {
    if !(MIN_LOCK_SECS..=MAX_LOCK_SECS).contains(&duration_secs) {
        return Err(LockError::DurationOutOfRange { secs: duration_secs });
    }
    let span = (MAX_LOCK_SECS - MIN_LOCK_SECS) as u128;
    let extra = (duration_secs - MIN_LOCK_SECS) as u128;
    Ok(MIN_LOCK_BOOST + (MAX_LOCK_BOOST - MIN_LOCK_BOOST) * extra / span)
}

/// All vote-locks plus pending one-time airdrop multipliers.
#[derive(
    Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct LockLedger {
    locks: BTreeMap<AccountId, Vec<VoteLock>>,
    /// Granted but not yet consumed airdrop multipliers (WAD-scaled).
    airdrop_boosts: BTreeMap<AccountId, Wad>,
    /// Cached Σ boosted amounts over all live locks.
    total_boosted: Amount,
}

impl LockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locks(&self, account: &AccountId) -> &[VoteLock] {
        self.locks.get(account).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn locked_amount(&self, account: &AccountId) -> Amount {
        self.locks(account).iter().map(|l| l.amount).sum()
    }

    /// Σ amount × boost over the account's locks.
    pub fn boosted_amount(&self, account: &AccountId) -> Result<Amount, MathError> {
        let mut total = 0u64;
        for lock in self.locks(account) {
            total = total
                .checked_add(lock.boosted()?)
                .ok_or(MathError::ArithmeticOverflow)?;
        }
        Ok(total)
    }

    pub fn total_boosted(&self) -> Amount {
        self.total_boosted
    }

    /// Grant a one-time airdrop boost multiplier, gated by an opaque proof.
    ///
    /// The leaf binds the account to the multiplier; an account may hold at
    /// most one ungranted multiplier at a time.
    pub fn grant_airdrop_boost(
        &mut self,
        account: &AccountId,
        multiplier: Wad,
        proof: &[u8],
        verifier: &dyn ProofVerifier,
    ) -> Result<(), LockError> {
        if self.airdrop_boosts.contains_key(account) {
            return Err(LockError::BoostAlreadyGranted);
        }
        let mut leaf = account.as_str().as_bytes().to_vec();
        leaf.extend_from_slice(&multiplier.to_le_bytes());
        if !verifier.verify(proof, &leaf) {
            return Err(LockError::InvalidProof);
        }
        self.airdrop_boosts.insert(account.clone(), multiplier);
        Ok(())
    }

    /// Create a new lock. Returns the boost assigned to the entry.
    ///
    /// A pending airdrop multiplier is applied and consumed here.
    pub fn lock(
        &mut self,
        account: &AccountId,
        amount: Amount,
        duration_secs: u64,
        now: Timestamp,
    ) -> Result<Wad, LockError> {
        if amount == 0 {
            return Err(LockError::ZeroAmount);
        }
        let mut boost = lock_boost(duration_secs)?;
        if let Some(multiplier) = self.airdrop_boosts.remove(account) {
            boost = wad_mul(boost, multiplier)?;
        }

        let entry = VoteLock { amount, unlock_time: now + duration_secs, boost };
        self.total_boosted = self
            .total_boosted
            .checked_add(entry.boosted()?)
            .ok_or(MathError::ArithmeticOverflow)?;
        self.locks.entry(account.clone()).or_default().push(entry);
        tracing::debug!(%account, amount, duration_secs, "vote-lock created");
        Ok(boost)
    }

    /// Merge additional tokens into an existing entry under a new duration.
    ///
    /// The merged boost is the amount-weighted average of the old entry's
    /// boost and the fresh boost for `duration_secs`, so it lands strictly
    /// between the two whenever they differ. The new unlock time may not
    /// come before the old one.
    pub fn relock(
        &mut self,
        account: &AccountId,
        index: usize,
        added: Amount,
        duration_secs: u64,
        now: Timestamp,
    ) -> Result<Wad, LockError> {
        let fresh_boost = lock_boost(duration_secs)?;
        let entry = self.entry(account, index)?;
        if now + duration_secs < entry.unlock_time {
            return Err(LockError::CannotShorten { current: entry.unlock_time });
        }

        let old = *entry;
        let total = old
            .amount
            .checked_add(added)
            .ok_or(MathError::ArithmeticOverflow)?;
        let merged_boost = (old.boost * old.amount as u128 + fresh_boost * added as u128)
            / total as u128;

        let merged = VoteLock {
            amount: total,
            unlock_time: now + duration_secs,
            boost: merged_boost,
        };
        self.total_boosted = self
            .total_boosted
            .checked_sub(old.boosted()?)
            .and_then(|t| t.checked_add(merged.boosted().ok()?))
            .ok_or(MathError::ArithmeticOverflow)?;
        self.locks.get_mut(account).expect("entry checked")[index] = merged;
        Ok(merged_boost)
    }

    /// Remove an expired entry, returning its amount to the owner.
    pub fn unlock(
        &mut self,
        account: &AccountId,
        index: usize,
        now: Timestamp,
    ) -> Result<Amount, LockError> {
        let entry = *self.entry(account, index)?;
        if now < entry.unlock_time {
            return Err(LockError::LockNotExpired { unlock_time: entry.unlock_time });
        }
        self.remove(account, index, &entry)?;
        Ok(entry.amount)
    }

    /// Force out an entry whose grace period has elapsed. Returns
    /// `(returned_to_owner, penalty_to_kicker)`.
    pub fn kick(
        &mut self,
        account: &AccountId,
        index: usize,
        now: Timestamp,
    ) -> Result<(Amount, Amount), LockError> {
        let entry = *self.entry(account, index)?;
        let kickable_at = entry.unlock_time + KICK_GRACE_SECS;
        if now < kickable_at {
            return Err(LockError::GraceNotElapsed { kickable_at });
        }
        self.remove(account, index, &entry)?;
        let penalty = bps_of(entry.amount, KICK_PENALTY_BPS)?;
        tracing::info!(%account, index, penalty, "expired vote-lock kicked");
        Ok((entry.amount - penalty, penalty))
    }

    fn entry(&self, account: &AccountId, index: usize) -> Result<&VoteLock, LockError> {
        self.locks
            .get(account)
            .and_then(|locks| locks.get(index))
            .ok_or(LockError::LockNotFound { index })
    }

    fn remove(
        &mut self,
        account: &AccountId,
        index: usize,
        entry: &VoteLock,
    ) -> Result<(), LockError> {
        self.total_boosted = self
            .total_boosted
            .checked_sub(entry.boosted()?)
            .ok_or(MathError::ArithmeticOverflow)?;
        let locks = self.locks.get_mut(account).expect("entry checked");
        // The list is unordered; swap_remove is fine.
        locks.swap_remove(index);
        if locks.is_empty() {
            self.locks.remove(account);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weir_core::constants::{DAY_SECS, UNIT, WAD};

    const NOW: Timestamp = 1_000_000;

    fn acct() -> AccountId {
        AccountId::from("alice")
    }

    struct AcceptAll;
    impl ProofVerifier for AcceptAll {
        fn verify(&self, _proof: &[u8], _leaf: &[u8]) -> bool {
            true
        }
    }

    struct RejectAll;
    impl ProofVerifier for RejectAll {
        fn verify(&self, _proof: &[u8], _leaf: &[u8]) -> bool {
            false
        }
    }

    // --- lock_boost ---

    #[test]
    fn boost_at_min_duration() {
        assert_eq!(lock_boost(MIN_LOCK_SECS).unwrap(), MIN_LOCK_BOOST);
    }

    #[test]
    fn boost_at_max_duration() {
        assert_eq!(lock_boost(MAX_LOCK_SECS).unwrap(), MAX_LOCK_BOOST);
    }

    #[test]
    fn boost_midpoint() {
        let mid = (MIN_LOCK_SECS + MAX_LOCK_SECS) / 2;
        assert_eq!(lock_boost(mid).unwrap(), (MIN_LOCK_BOOST + MAX_LOCK_BOOST) / 2);
    }

    #[test]
    fn boost_rejects_out_of_window() {
        assert!(lock_boost(MIN_LOCK_SECS - 1).is_err());
        assert!(lock_boost(MAX_LOCK_SECS + 1).is_err());
        assert!(lock_boost(0).is_err());
    }

    // --- lock / unlock ---

    #[test]
    fn lock_and_unlock_roundtrip() {
        let mut ledger = LockLedger::new();
        ledger.lock(&acct(), 1_000 * UNIT, MIN_LOCK_SECS, NOW).unwrap();
        assert_eq!(ledger.locked_amount(&acct()), 1_000 * UNIT);
        assert_eq!(ledger.boosted_amount(&acct()).unwrap(), 1_000 * UNIT);

        let err = ledger.unlock(&acct(), 0, NOW + MIN_LOCK_SECS - 1).unwrap_err();
        assert!(matches!(err, LockError::LockNotExpired { .. }));

        let amount = ledger.unlock(&acct(), 0, NOW + MIN_LOCK_SECS).unwrap();
        assert_eq!(amount, 1_000 * UNIT);
        assert_eq!(ledger.locked_amount(&acct()), 0);
        assert_eq!(ledger.total_boosted(), 0);
    }

    #[test]
    fn zero_amount_rejected() {
        let mut ledger = LockLedger::new();
        assert!(matches!(
            ledger.lock(&acct(), 0, MIN_LOCK_SECS, NOW),
            Err(LockError::ZeroAmount)
        ));
    }

    #[test]
    fn multiple_entries_tracked_independently() {
        let mut ledger = LockLedger::new();
        ledger.lock(&acct(), 100, MIN_LOCK_SECS, NOW).unwrap();
        ledger.lock(&acct(), 200, MAX_LOCK_SECS, NOW).unwrap();
        assert_eq!(ledger.locks(&acct()).len(), 2);
        assert_eq!(ledger.locked_amount(&acct()), 300);

        let boosted = ledger.boosted_amount(&acct()).unwrap();
        assert_eq!(boosted, 100 + 300); // 100×1.0 + 200×1.5
        assert_eq!(ledger.total_boosted(), boosted);
    }

    #[test]
    fn unlock_missing_index() {
        let mut ledger = LockLedger::new();
        assert!(matches!(
            ledger.unlock(&acct(), 3, NOW),
            Err(LockError::LockNotFound { index: 3 })
        ));
    }

    // --- kick ---

    #[test]
    fn kick_requires_grace_elapsed() {
        let mut ledger = LockLedger::new();
        ledger.lock(&acct(), 10_000, MIN_LOCK_SECS, NOW).unwrap();
        let expiry = NOW + MIN_LOCK_SECS;

        let err = ledger.kick(&acct(), 0, expiry + KICK_GRACE_SECS - 1).unwrap_err();
        assert!(matches!(err, LockError::GraceNotElapsed { .. }));

        let (returned, penalty) = ledger.kick(&acct(), 0, expiry + KICK_GRACE_SECS).unwrap();
        assert_eq!(penalty, 100); // 1% of 10_000
        assert_eq!(returned, 9_900);
        assert_eq!(ledger.locked_amount(&acct()), 0);
    }

    // --- relock ---

    #[test]
    fn relock_blends_boost_between_components() {
        // 1,000 @ 120d, then 1,000 more @ 240d: the merged boost must land
        // strictly between the two single-duration boosts.
        let mut ledger = LockLedger::new();
        ledger.lock(&acct(), 1_000, 120 * DAY_SECS, NOW).unwrap();
        let short = lock_boost(120 * DAY_SECS).unwrap();
        let long = lock_boost(240 * DAY_SECS).unwrap();

        let merged = ledger
            .relock(&acct(), 0, 1_000, 240 * DAY_SECS, NOW + 10 * DAY_SECS)
            .unwrap();
        assert!(merged > short && merged < long, "merged {merged} not between");
        assert_eq!(merged, (short + long) / 2);

        let locks = ledger.locks(&acct());
        assert_eq!(locks.len(), 1);
        assert_eq!(locks[0].amount, 2_000);
        assert_eq!(locks[0].unlock_time, NOW + 10 * DAY_SECS + 240 * DAY_SECS);
    }

    #[test]
    fn relock_cannot_shorten() {
        let mut ledger = LockLedger::new();
        ledger.lock(&acct(), 1_000, MAX_LOCK_SECS, NOW).unwrap();
        let err = ledger.relock(&acct(), 0, 0, MIN_LOCK_SECS, NOW).unwrap_err();
        assert!(matches!(err, LockError::CannotShorten { .. }));
    }

    #[test]
    fn relock_updates_total_boosted() {
        let mut ledger = LockLedger::new();
        ledger.lock(&acct(), 1_000, MIN_LOCK_SECS, NOW).unwrap();
        ledger.relock(&acct(), 0, 1_000, MAX_LOCK_SECS, NOW).unwrap();
        assert_eq!(ledger.total_boosted(), ledger.boosted_amount(&acct()).unwrap());
    }

    // --- airdrop boost ---

    #[test]
    fn airdrop_boost_applied_once() {
        let mut ledger = LockLedger::new();
        ledger
            .grant_airdrop_boost(&acct(), 2 * WAD, b"proof", &AcceptAll)
            .unwrap();

        ledger.lock(&acct(), 100, MIN_LOCK_SECS, NOW).unwrap();
        assert_eq!(ledger.locks(&acct())[0].boost, 2 * MIN_LOCK_BOOST);

        // Consumed: the next lock gets the plain boost.
        ledger.lock(&acct(), 100, MIN_LOCK_SECS, NOW).unwrap();
        assert_eq!(ledger.locks(&acct())[1].boost, MIN_LOCK_BOOST);
    }

    #[test]
    fn airdrop_boost_rejects_bad_proof() {
        let mut ledger = LockLedger::new();
        assert!(matches!(
            ledger.grant_airdrop_boost(&acct(), 2 * WAD, b"proof", &RejectAll),
            Err(LockError::InvalidProof)
        ));
    }

    #[test]
    fn airdrop_boost_single_pending_grant() {
        let mut ledger = LockLedger::new();
        ledger.grant_airdrop_boost(&acct(), 2 * WAD, b"p", &AcceptAll).unwrap();
        assert!(matches!(
            ledger.grant_airdrop_boost(&acct(), 3 * WAD, b"p", &AcceptAll),
            Err(LockError::BoostAlreadyGranted)
        ));
    }
}
