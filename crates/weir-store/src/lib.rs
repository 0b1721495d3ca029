//! # weir-store
//! RocksDB-backed durable state: pool records, reward ledgers and
//! vote-locks in separate column families, bincode-encoded, written
//! atomically per snapshot.

pub mod store;

pub use store::RocksStore;
