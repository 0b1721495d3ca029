//! # weir-alloc
//! The allocation engine: pools fan a single asset out across yield venues
//! according to target weights, routing every deposit and withdrawal toward
//! the venue furthest out of band, and settling the streaming reward
//! ledgers before any stake-mutating step.

pub mod engine;
pub mod pool;
pub mod routing;
