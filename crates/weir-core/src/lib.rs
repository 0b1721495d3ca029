//! # weir-core
//! Foundation types and traits for the Weir protocol.

pub mod constants;
pub mod error;
pub mod fixed;
pub mod traits;
pub mod types;
