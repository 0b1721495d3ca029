//! Integration test suite for Weir.
//!
//! This crate contains end-to-end tests that drive the allocation engine
//! through full pool lifecycles, plus adversarial tests that attempt to
//! break its accounting invariants from an attacker's perspective.

pub mod helpers;
