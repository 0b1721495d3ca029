//! Adversarial tests: every path an attacker could use to mint shares,
//! drain venues, or collect rewards they did not earn must fail cleanly
//! and leave the engine unchanged.

use weir_core::constants::{DAY_SECS, KICK_GRACE_SECS, MIN_LOCK_SECS, UNIT, WAD};
use weir_core::error::{AllocationError, LockError, WeirError};
use weir_tests::helpers::*;

fn sixty_forty(h: &mut Harness) {
    h.set_weights(&[("a", 6 * WAD / 10), ("b", 4 * WAD / 10)], NOW);
}

#[test]
fn staked_shares_cannot_be_withdrawn() {
    let mut h = harness();
    sixty_forty(&mut h);
    h.engine.deposit(&pid(), &acct("alice"), 10_000, 0, true, NOW).unwrap();

    assert!(matches!(
        h.engine.withdraw(&pid(), &acct("alice"), 1, 0, NOW),
        Err(AllocationError::InsufficientShares { have: 0, need: 1 })
    ));

    // Unstaking releases them.
    h.engine.unstake(&pid(), &acct("alice"), 10_000, NOW).unwrap();
    h.engine.withdraw(&pid(), &acct("alice"), 10_000, 0, NOW).unwrap();
}

#[test]
fn deposit_slippage_guard_blocks_short_mints() {
    let mut h = harness();
    sixty_forty(&mut h);
    let res = h.engine.deposit(&pid(), &acct("alice"), 10_000, 10_001, false, NOW);
    assert!(matches!(res, Err(AllocationError::Slippage { received: 10_000, min_received: 10_001 })));
    assert_eq!(h.engine.pool(&pid()).unwrap().total_shares, 0);
}

#[test]
fn withdraw_slippage_guard_blocks_short_payouts() {
    let mut h = harness();
    sixty_forty(&mut h);
    h.engine.deposit(&pid(), &acct("alice"), 10_000, 0, false, NOW).unwrap();
    let res = h.engine.withdraw(&pid(), &acct("alice"), 5_000, 5_001, NOW);
    assert!(matches!(res, Err(AllocationError::Slippage { .. })));
}

#[test]
fn overdrawn_withdrawal_rejected() {
    let mut h = harness();
    sixty_forty(&mut h);
    h.engine.deposit(&pid(), &acct("alice"), 10_000, 0, false, NOW).unwrap();
    assert!(matches!(
        h.engine.withdraw(&pid(), &acct("alice"), 10_001, 0, NOW),
        Err(AllocationError::InsufficientShares { have: 10_000, need: 10_001 })
    ));
    // Someone else's shares are not reachable either.
    assert!(matches!(
        h.engine.withdraw(&pid(), &acct("mallory"), 1, 0, NOW),
        Err(AllocationError::InsufficientShares { have: 0, need: 1 })
    ));
}

#[test]
fn zero_amount_operations_rejected() {
    let mut h = harness();
    sixty_forty(&mut h);
    assert!(matches!(
        h.engine.deposit(&pid(), &acct("alice"), 0, 0, false, NOW),
        Err(AllocationError::ZeroAmount)
    ));
    assert!(matches!(
        h.engine.withdraw(&pid(), &acct("alice"), 0, 0, NOW),
        Err(AllocationError::ZeroAmount)
    ));
    assert!(matches!(
        h.engine.stake(&pid(), &acct("alice"), 0, NOW),
        Err(AllocationError::ZeroAmount)
    ));
    assert!(matches!(
        h.engine.lock(&acct("alice"), 0, MIN_LOCK_SECS, NOW),
        Err(WeirError::Lock(LockError::ZeroAmount))
    ));
}

#[test]
fn stranger_collects_nothing() {
    let mut h = harness();
    sixty_forty(&mut h);
    h.engine.deposit(&pid(), &acct("alice"), 10_000, 0, true, NOW).unwrap();

    let source = MintSource::new();
    let paid = h
        .engine
        .claim_inflation(&acct("mallory"), &source, NOW + DAY_SECS)
        .unwrap();
    assert_eq!(paid, 0);

    let feed = std::sync::Arc::new(FeedSource::new());
    h.engine.set_yield_source(&pid(), feed).unwrap();
    let yields = h.engine.claim_yield(&pid(), &acct("mallory")).unwrap();
    assert!(yields.values().all(|v| *v == 0));

    let fees = h.engine.claim_fees(&acct("mallory"), &source).unwrap();
    assert!(fees.values().all(|v| *v == 0));
}

#[test]
fn weight_update_rate_limit_not_skippable() {
    let mut h = harness();
    sixty_forty(&mut h);
    // One second short of the default delay.
    let res = h.engine.update_weights(
        &pid(),
        &[(vid("a"), WAD / 2), (vid("b"), WAD / 2)],
        NOW + 14 * DAY_SECS - 1,
    );
    assert!(matches!(res, Err(AllocationError::UpdateTooSoon { remaining_secs: 1 })));
}

#[test]
fn depeg_cannot_fire_twice() {
    let mut h = harness_with_venues(&["a", "b", "c"]);
    h.set_weights(&[("a", WAD / 2), ("b", 3 * WAD / 10), ("c", 2 * WAD / 10)], NOW);
    h.oracle.set(&lp_token("a"), WAD - WAD * 500 / 10_000);
    h.engine.handle_depeg(&pid(), &vid("a"), NOW + 60).unwrap();

    assert!(matches!(
        h.engine.handle_depeg(&pid(), &vid("a"), NOW + 120),
        Err(AllocationError::ZeroWeightVenue(_))
    ));
}

#[test]
fn depeg_cannot_zero_the_sole_venue() {
    let mut h = harness_with_venues(&["a"]);
    h.set_weights(&[("a", WAD)], NOW);
    h.oracle.set(&lp_token("a"), WAD / 2);
    assert!(matches!(
        h.engine.handle_depeg(&pid(), &vid("a"), NOW + 60),
        Err(AllocationError::SoleVenue(_))
    ));
}

#[test]
fn depeg_does_not_rearm_on_the_new_snapshot() {
    let mut h = harness_with_venues(&["a", "b", "c"]);
    h.set_weights(&[("a", WAD / 2), ("b", 3 * WAD / 10), ("c", 2 * WAD / 10)], NOW);
    // A 5% drop justifies zero-forcing venue a and re-snapshots every price;
    // venue b's unchanged price cannot then be called a de-peg.
    h.oracle.set(&lp_token("a"), WAD - WAD * 500 / 10_000);
    h.engine.handle_depeg(&pid(), &vid("a"), NOW + 60).unwrap();
    assert!(matches!(
        h.engine.handle_depeg(&pid(), &vid("b"), NOW + 120),
        Err(AllocationError::NotDepegged(_))
    ));
}

#[test]
fn airdrop_grant_replay_rejected() {
    let mut h = harness();
    h.engine
        .grant_airdrop_boost(&acct("alice"), 12 * WAD / 10, b"proof", &AcceptAllProofs)
        .unwrap();
    assert!(matches!(
        h.engine.grant_airdrop_boost(&acct("alice"), 15 * WAD / 10, b"proof", &AcceptAllProofs),
        Err(WeirError::Lock(LockError::BoostAlreadyGranted))
    ));
}

#[test]
fn airdrop_invalid_proof_rejected() {
    let mut h = harness();
    assert!(matches!(
        h.engine.grant_airdrop_boost(&acct("mallory"), 15 * WAD / 10, b"forged", &RejectAllProofs),
        Err(WeirError::Lock(LockError::InvalidProof))
    ));
}

#[test]
fn unlock_before_expiry_rejected() {
    let mut h = harness();
    h.engine.lock(&acct("alice"), 100 * UNIT, MIN_LOCK_SECS, NOW).unwrap();
    assert!(matches!(
        h.engine.unlock(&acct("alice"), 0, NOW + MIN_LOCK_SECS - 1),
        Err(WeirError::Lock(LockError::LockNotExpired { .. }))
    ));
}

#[test]
fn kick_before_grace_rejected() {
    let mut h = harness();
    h.engine.lock(&acct("alice"), 100 * UNIT, MIN_LOCK_SECS, NOW).unwrap();
    assert!(matches!(
        h.engine.kick(&acct("alice"), 0, NOW + MIN_LOCK_SECS + KICK_GRACE_SECS - 1),
        Err(WeirError::Lock(LockError::GraceNotElapsed { .. }))
    ));
}

#[test]
fn double_unlock_rejected() {
    let mut h = harness();
    h.engine.lock(&acct("alice"), 100 * UNIT, MIN_LOCK_SECS, NOW).unwrap();
    h.engine.unlock(&acct("alice"), 0, NOW + MIN_LOCK_SECS).unwrap();
    assert!(matches!(
        h.engine.unlock(&acct("alice"), 0, NOW + MIN_LOCK_SECS),
        Err(WeirError::Lock(LockError::LockNotFound { index: 0 }))
    ));
}

#[test]
fn relock_cannot_shorten() {
    let mut h = harness();
    h.engine.lock(&acct("alice"), 100 * UNIT, 200 * DAY_SECS, NOW).unwrap();
    assert!(matches!(
        h.engine.relock(&acct("alice"), 0, 0, MIN_LOCK_SECS, NOW),
        Err(WeirError::Lock(LockError::CannotShorten { .. }))
    ));
}

#[test]
fn lock_duration_bounds_enforced() {
    let mut h = harness();
    assert!(matches!(
        h.engine.lock(&acct("alice"), 100 * UNIT, MIN_LOCK_SECS - 1, NOW),
        Err(WeirError::Lock(LockError::DurationOutOfRange { .. }))
    ));
    assert!(matches!(
        h.engine.lock(&acct("alice"), 100 * UNIT, 241 * DAY_SECS, NOW),
        Err(WeirError::Lock(LockError::DurationOutOfRange { .. }))
    ));
}
