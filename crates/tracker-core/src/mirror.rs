//! Durable mirror of the tracked collection.
//!
//! Every mutation writes the whole collection under one storage key, stamped
//! with a logical time. Reads hand back the stored snapshot and leave the
//! adoption decision to the tracker. Storage failures never propagate: the
//! in-memory collection stays authoritative and the failure is logged.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use tracker_storage::{StorageChange, StorageInterface, StorageService};
use tracker_types::{StorageSnapshot, TrackedTransaction};
use uuid::Uuid;

pub struct DurableMirror {
	storage: Option<StorageService>,
	key: String,
}

impl DurableMirror {
	pub fn new(storage: Option<Arc<dyn StorageInterface>>, key: impl Into<String>) -> Self {
		Self {
			storage: storage.map(StorageService::new),
			key: key.into(),
		}
	}

	/// Whether a storage backend is attached.
	pub fn is_durable(&self) -> bool {
		self.storage.is_some()
	}

	pub fn key(&self) -> &str {
		&self.key
	}

	/// Next logical time after `last_adopted`.
	///
	/// Wall-clock milliseconds, bumped past `last_adopted` so a local write
	/// always outranks the snapshot it was derived from, even when the clock
	/// stalls or another context wrote with a clock running ahead.
	pub fn next_stamp(last_adopted: u64) -> u64 {
		let now = u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0);
		now.max(last_adopted.saturating_add(1))
	}

	/// Writes `transactions` as a new snapshot and returns its stamp.
	///
	/// The stamp is returned even if the write failed, so the caller's
	/// logical clock keeps moving forward.
	pub async fn save(&self, transactions: &[TrackedTransaction], last_adopted: u64) -> u64 {
		let stamp = Self::next_stamp(last_adopted);

		let Some(storage) = &self.storage else {
			return stamp;
		};

		let snapshot = StorageSnapshot::new(transactions.to_vec(), stamp);
		match storage.store(&self.key, &snapshot).await {
			Ok(()) => debug!(
				"Persisted {} transaction(s) under {} at {}",
				transactions.len(),
				self.key,
				stamp
			),
			Err(e) => warn!("Failed to persist transactions under {}: {}", self.key, e),
		}

		stamp
	}

	/// Reads the stored snapshot.
	///
	/// Missing, unreadable and corrupt snapshots all yield `None`.
	pub async fn load(&self) -> Option<StorageSnapshot> {
		let storage = self.storage.as_ref()?;

		match storage.retrieve::<StorageSnapshot>(&self.key).await {
			Ok(snapshot) => snapshot,
			Err(e) => {
				warn!("Ignoring unreadable snapshot under {}: {}", self.key, e);
				None
			}
		}
	}

	/// Change notifications from other contexts plus this context's id.
	pub fn changes(&self) -> Option<(broadcast::Receiver<StorageChange>, Uuid)> {
		let storage = self.storage.as_ref()?;
		let receiver = storage.watch()?;
		Some((receiver, storage.context_id()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tracker_storage::MemoryStorage;
	use tracker_types::{Signature, DEFAULT_STORAGE_KEY};

	#[test]
	fn test_next_stamp_is_strictly_increasing() {
		let far_future = u64::MAX / 2;
		assert_eq!(DurableMirror::next_stamp(far_future), far_future + 1);

		let stamp = DurableMirror::next_stamp(0);
		assert!(stamp > 0);
		assert!(DurableMirror::next_stamp(stamp) > stamp);
	}

	#[tokio::test]
	async fn test_save_then_load() {
		let mirror = DurableMirror::new(Some(Arc::new(MemoryStorage::new())), DEFAULT_STORAGE_KEY);
		let transactions = vec![TrackedTransaction::new(Signature::from("sig1"), "Deposit", [])];

		let stamp = mirror.save(&transactions, 0).await;
		let snapshot = mirror.load().await.unwrap();

		assert_eq!(snapshot.last_updated, stamp);
		assert_eq!(snapshot.transactions, transactions);
	}

	#[tokio::test]
	async fn test_corrupt_snapshot_loads_as_none() {
		let backend = Arc::new(MemoryStorage::new());
		backend
			.set(DEFAULT_STORAGE_KEY, "[1, 2".to_string())
			.await
			.unwrap();

		let mirror = DurableMirror::new(Some(backend), DEFAULT_STORAGE_KEY);
		assert!(mirror.load().await.is_none());
	}

	#[tokio::test]
	async fn test_without_storage() {
		let mirror = DurableMirror::new(None, DEFAULT_STORAGE_KEY);

		assert!(!mirror.is_durable());
		assert!(mirror.save(&[], 5).await > 5);
		assert!(mirror.load().await.is_none());
		assert!(mirror.changes().is_none());
	}
}
