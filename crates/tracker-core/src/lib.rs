//! Transaction lifecycle tracking.
//!
//! [`TransactionTracker`] keeps the set of submitted transactions, mirrors it
//! to shared storage, watches each pending signature through a pluggable
//! notification source and broadcasts batched follow-up effects once
//! transactions confirm.

pub mod batcher;
pub mod error;
pub mod event_bus;
pub mod mirror;
pub mod tracker;
pub mod watcher;

pub use batcher::{EffectBatcher, DEFAULT_DEBOUNCE};
pub use error::TrackerError;
pub use event_bus::EventBus;
pub use mirror::DurableMirror;
pub use tracker_types::DEFAULT_STORAGE_KEY;
pub use tracker::{TrackerBuilder, TransactionTracker, DEFAULT_EVENT_CAPACITY};
pub use watcher::{ConfirmationWatcher, SharedSource, WatchOutcome};
