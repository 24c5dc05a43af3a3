//! Notification sources for the transaction tracker.
//!
//! A notification source tells the tracker, once per subscription, whether a
//! signature succeeded or failed on chain.
//!
//! Available implementations:
//! - `rpc`: polls a JSON-RPC node with `getSignatureStatuses`
//! - `manual`: in-process source where outcomes are pushed by the caller

pub mod implementations;
pub mod types;

pub use implementations::*;
pub use types::*;
