//! # weir-rewards
//! Reward accrual engines for the Weir protocol: the decaying inflation
//! schedule, stake/time boosts, the streaming reward ledger pattern,
//! vote-locks, and the rebalancing incentive.

pub mod boost;
pub mod incentive;
pub mod inflation;
pub mod ledger;
pub mod votelock;
