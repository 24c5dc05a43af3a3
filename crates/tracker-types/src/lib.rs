//! Shared types for the transaction tracker.
//!
//! This crate holds the data model persisted and broadcast by the tracker,
//! along with the collaborator trait implemented by notification sources.
//! It has no runtime behaviour of its own.

pub mod effects;
pub mod events;
pub mod notifier;
pub mod snapshot;
pub mod transaction;

pub use effects::*;
pub use events::*;
pub use notifier::*;
pub use snapshot::*;
pub use transaction::*;
