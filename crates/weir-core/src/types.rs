//! Core protocol types: identifiers, amounts, venues.
//!
//! Monetary amounts are `u64` base units (1 token = 10^8 units). Weights,
//! boosts, and prices are WAD-scaled `u128` (see [`crate::constants::WAD`]).

use std::fmt;

use serde::{Deserialize, Serialize};

/// A monetary amount in base units.
pub type Amount = u64;

/// A USD value in base units (10^8 = one dollar).
pub type UsdValue = u64;

/// A WAD-scaled (18-decimal) fixed-point ratio, weight, boost, or price.
pub type Wad = u128;

/// Unix timestamp in seconds.
pub type Timestamp = u64;

macro_rules! id_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
            bincode::Encode, bincode::Decode,
        )]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

id_newtype! {
    /// Identifies a pool.
    PoolId
}

id_newtype! {
    /// Identifies an external yield venue.
    VenueId
}

id_newtype! {
    /// Identifies a depositor or staker account.
    AccountId
}

id_newtype! {
    /// Identifies an asset (pool underlying, venue token, reward token).
    AssetId
}

/// A yield venue tracked by a pool: an identifier plus its target weight.
///
/// The weight is the WAD-scaled fraction of the pool's total value that
/// should reside in this venue; all weights of a pool sum to exactly one
/// WAD after any weight mutation. Allocated balances are never stored here,
/// they are recomputed from the venue adapter.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Venue {
    pub id: VenueId,
    pub weight: Wad,
}

/// A cached value with the timestamp it was computed at.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct CachedValue {
    pub value: Amount,
    pub updated_at: Timestamp,
}

impl CachedValue {
    /// Whether the cache is still fresh at `now` given an expiry window.
    pub fn is_fresh(&self, now: Timestamp, expiry_secs: u64) -> bool {
        now.saturating_sub(self.updated_at) < expiry_secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_display_roundtrip() {
        let id = VenueId::from("venue-a");
        assert_eq!(id.to_string(), "venue-a");
        assert_eq!(id.as_str(), "venue-a");
    }

    #[test]
    fn ids_of_different_kinds_are_distinct_types() {
        // Compile-time property; just exercise construction.
        let _ = PoolId::new("p");
        let _ = AccountId::new("a");
        let _ = AssetId::new("t");
    }

    #[test]
    fn cache_freshness_window() {
        let c = CachedValue { value: 1, updated_at: 1_000 };
        assert!(c.is_fresh(1_000, 60));
        assert!(c.is_fresh(1_059, 60));
        assert!(!c.is_fresh(1_060, 60));
    }

    #[test]
    fn cache_fresh_when_clock_behind() {
        // A clock that went backwards must not force a recompute loop.
        let c = CachedValue { value: 1, updated_at: 1_000 };
        assert!(c.is_fresh(900, 60));
    }
}
