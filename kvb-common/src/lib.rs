// kvb-common - Shared value types for KVBridge
//
// This crate defines the status object handed to callers of the store facade

pub mod status;

// Re-export for convenience
pub use status::*;
