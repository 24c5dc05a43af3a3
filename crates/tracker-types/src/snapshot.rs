//! Persisted snapshot of the tracked collection.

use crate::transaction::TrackedTransaction;
use serde::{Deserialize, Serialize};

/// Storage key the snapshot is kept under when none is configured.
pub const DEFAULT_STORAGE_KEY: &str = "tx-tracker:transactions";

/// Full state of the tracked collection plus the logical time it was written.
///
/// Snapshots are reconciled by whole replacement: a reader adopts one only
/// when its `last_updated` is strictly greater than what it last adopted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageSnapshot {
	#[serde(default)]
	pub transactions: Vec<TrackedTransaction>,
	#[serde(default)]
	pub last_updated: u64,
}

impl StorageSnapshot {
	pub fn new(transactions: Vec<TrackedTransaction>, last_updated: u64) -> Self {
		Self {
			transactions,
			last_updated,
		}
	}

	/// Whether this snapshot should replace state adopted at `last_adopted`.
	pub fn is_newer_than(&self, last_adopted: u64) -> bool {
		self.last_updated > last_adopted
	}
}
