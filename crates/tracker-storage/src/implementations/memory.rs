//! In-memory storage shared between execution contexts.
//!
//! Every [`MemoryStorage::handle`] is a separate context over the same map,
//! which is how two trackers in one process model two browser tabs.

use crate::{StorageChange, StorageError, StorageInterface};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;
use uuid::Uuid;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

struct SharedMap {
	data: RwLock<HashMap<String, String>>,
	changes: broadcast::Sender<StorageChange>,
}

/// In-memory storage backend.
pub struct MemoryStorage {
	shared: Arc<SharedMap>,
	context: Uuid,
}

impl MemoryStorage {
	pub fn new() -> Self {
		let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
		Self {
			shared: Arc::new(SharedMap {
				data: RwLock::new(HashMap::new()),
				changes,
			}),
			context: Uuid::new_v4(),
		}
	}

	/// Opens another execution context over the same data.
	pub fn handle(&self) -> Self {
		Self {
			shared: self.shared.clone(),
			context: Uuid::new_v4(),
		}
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
		Ok(self.shared.data.read().await.get(key).cloned())
	}

	async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
		self.shared
			.data
			.write()
			.await
			.insert(key.to_string(), value);

		// No receivers is fine
		let _ = self.shared.changes.send(StorageChange {
			key: key.to_string(),
			origin: self.context,
		});
		debug!("Memory storage context {} wrote {}", self.context, key);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let removed = self.shared.data.write().await.remove(key).is_some();
		if removed {
			let _ = self.shared.changes.send(StorageChange {
				key: key.to_string(),
				origin: self.context,
			});
		}
		Ok(())
	}

	fn context_id(&self) -> Uuid {
		self.context
	}

	fn watch(&self) -> Option<broadcast::Receiver<StorageChange>> {
		Some(self.shared.changes.subscribe())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_handles_share_data() {
		let first = MemoryStorage::new();
		let second = first.handle();

		first.set("key", "value".to_string()).await.unwrap();
		assert_eq!(second.get("key").await.unwrap().as_deref(), Some("value"));
		assert_ne!(first.context_id(), second.context_id());
	}

	#[tokio::test]
	async fn test_changes_carry_writer_context() {
		let first = MemoryStorage::new();
		let second = first.handle();
		let mut changes = second.watch().unwrap();

		first.set("key", "value".to_string()).await.unwrap();

		let change = changes.recv().await.unwrap();
		assert_eq!(change.key, "key");
		assert_eq!(change.origin, first.context_id());
	}

	#[tokio::test]
	async fn test_delete_missing_is_silent() {
		let storage = MemoryStorage::new();
		let mut changes = storage.watch().unwrap();

		storage.delete("absent").await.unwrap();
		assert!(changes.try_recv().is_err());
	}
}
