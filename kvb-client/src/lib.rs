//! # KVBridge Store Client
//!
//! Purpose: Provide a blocking, pooled client facade for a Redis-compatible
//! store where every command is atomic on the store side and contained on the
//! caller side.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Reuse TCP connections; each command leases one
//!    and the lease guard returns it on every exit path.
//! 2. **Typed Outcomes**: Commands return `CommandResult`, which logs failures
//!    and keeps them inspectable while offering sentinel fallbacks.
//! 3. **Protocol Clarity**: Encode/parse RESP2 explicitly for correctness.
//! 4. **Explicit Lifetimes**: No global pool; the client owns it and the
//!    subscription loop stops through a `ShutdownSignal`.

mod client;
mod command;
mod error;
mod pool;
mod pubsub;
mod resp;
mod script;
mod settings;
mod transaction;

pub use client::{ClientConfig, KeyTtl, StoreClient, RECONNECT_BACKOFF, SOFT_DELETE_DELAY};
pub use command::{CommandResult, Sentinel};
pub use error::{ClientError, ClientResult};
pub use pool::{ExhaustedPolicy, PoolStatus};
pub use pubsub::{Message, MessageHandler, ShutdownSignal, SubscriptionReport, SubscriptionState};
pub use resp::RespValue;
pub use settings::{SettingsError, StoreSettings};
pub use transaction::Transaction;
