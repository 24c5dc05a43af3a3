//! File-based storage implementation.
//!
//! Each key is stored as a text file under a base directory. Writes go
//! through a temp file and a rename so readers in other processes never see
//! a torn value. Changes made by other processes are detected by polling the
//! modification time of the keys this instance has touched.

use crate::{StorageChange, StorageError, StorageInterface};
use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);
const CHANGE_CHANNEL_CAPACITY: usize = 64;

struct FileInner {
	/// Base directory path for storing files.
	base_path: PathBuf,
	poll_interval: Duration,
	/// Keys seen by this instance and the modification time last observed.
	seen: DashMap<String, Option<SystemTime>>,
	changes: broadcast::Sender<StorageChange>,
	poller_started: AtomicBool,
	/// Held across a write and its mtime bookkeeping, and by the poller while
	/// it scans.
	write_lock: Mutex<()>,
	context: Uuid,
}

/// File-based storage backend.
pub struct FileStorage {
	inner: Arc<FileInner>,
}

impl FileStorage {
	/// Creates a new FileStorage instance with the specified base path.
	pub fn new(base_path: PathBuf) -> Self {
		let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
		Self {
			inner: Arc::new(FileInner {
				base_path,
				poll_interval: DEFAULT_POLL_INTERVAL,
				seen: DashMap::new(),
				changes,
				poller_started: AtomicBool::new(false),
				write_lock: Mutex::new(()),
				context: Uuid::new_v4(),
			}),
		}
	}

	/// Sets how often watched keys are checked for external modification.
	///
	/// Must be called before the storage is shared.
	pub fn with_poll_interval(self, poll_interval: Duration) -> Self {
		match Arc::try_unwrap(self.inner) {
			Ok(mut inner) => {
				inner.poll_interval = poll_interval;
				Self {
					inner: Arc::new(inner),
				}
			}
			Err(inner) => Self { inner },
		}
	}

	pub fn base_path(&self) -> &Path {
		&self.inner.base_path
	}

	fn start_poller(&self) {
		if self.inner.poller_started.swap(true, Ordering::SeqCst) {
			return;
		}

		let handle = match tokio::runtime::Handle::try_current() {
			Ok(handle) => handle,
			Err(_) => {
				warn!("No async runtime available; file change polling disabled");
				self.inner.poller_started.store(false, Ordering::SeqCst);
				return;
			}
		};

		let weak = Arc::downgrade(&self.inner);
		let poll_interval = self.inner.poll_interval;
		handle.spawn(poll_changes(weak, poll_interval));
	}
}

impl FileInner {
	/// Converts a storage key to a filesystem-safe file path.
	fn file_path(&self, key: &str) -> PathBuf {
		// Sanitize key to be filesystem-safe
		let safe_key = key.replace(['/', ':', '\\'], "_");
		self.base_path.join(format!("{}.json", safe_key))
	}

	async fn record_mtime(&self, key: &str) {
		let modified = modified_time(&self.file_path(key)).await;
		self.seen.insert(key.to_string(), modified);
	}
}

async fn modified_time(path: &Path) -> Option<SystemTime> {
	fs::metadata(path)
		.await
		.ok()
		.and_then(|meta| meta.modified().ok())
}

/// Polls the modification time of every seen key until the storage is dropped.
async fn poll_changes(inner: Weak<FileInner>, poll_interval: Duration) {
	let mut ticker = tokio::time::interval(poll_interval);
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

	loop {
		ticker.tick().await;

		let Some(inner) = inner.upgrade() else {
			debug!("File storage dropped, stopping change poller");
			return;
		};

		let _guard = inner.write_lock.lock().await;
		let keys: Vec<(String, Option<SystemTime>)> = inner
			.seen
			.iter()
			.map(|entry| (entry.key().clone(), *entry.value()))
			.collect();

		for (key, last_seen) in keys {
			let current = modified_time(&inner.file_path(&key)).await;
			if current != last_seen {
				inner.seen.insert(key.clone(), current);
				debug!("Detected external change to {}", key);
				let _ = inner.changes.send(StorageChange {
					key,
					origin: Uuid::nil(),
				});
			}
		}
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
		let path = self.inner.file_path(key);

		// First read of a key: the mtime is taken before the content, so a
		// write landing in between still shows up to the poller.
		let _guard = if self.inner.seen.contains_key(key) {
			None
		} else {
			let guard = self.inner.write_lock.lock().await;
			if !self.inner.seen.contains_key(key) {
				self.inner.record_mtime(key).await;
			}
			Some(guard)
		};

		match fs::read_to_string(&path).await {
			Ok(data) => Ok(Some(data)),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
		let path = self.inner.file_path(key);
		let _guard = self.inner.write_lock.lock().await;

		// Create parent directory if it doesn't exist
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		// Write atomically by writing to temp file then renaming
		let temp_path = path.with_extension(format!("{}.tmp", self.inner.context.simple()));
		fs::write(&temp_path, value)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		// Own writes must not look like external changes to the poller
		self.inner.record_mtime(key).await;

		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.inner.file_path(key);
		let _guard = self.inner.write_lock.lock().await;

		let result = match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		};

		if self.inner.seen.contains_key(key) {
			self.inner.seen.insert(key.to_string(), None);
		}

		result
	}

	fn context_id(&self) -> Uuid {
		self.inner.context
	}

	fn watch(&self) -> Option<broadcast::Receiver<StorageChange>> {
		let receiver = self.inner.changes.subscribe();
		self.start_poller();
		Some(receiver)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[tokio::test]
	async fn test_round_trip_and_missing_key() {
		let dir = tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());

		assert!(storage.get("tx-tracker:transactions").await.unwrap().is_none());

		storage
			.set("tx-tracker:transactions", "{\"lastUpdated\":1}".to_string())
			.await
			.unwrap();
		assert_eq!(
			storage
				.get("tx-tracker:transactions")
				.await
				.unwrap()
				.as_deref(),
			Some("{\"lastUpdated\":1}")
		);
		assert!(dir.path().join("tx-tracker_transactions.json").exists());

		storage.delete("tx-tracker:transactions").await.unwrap();
		storage.delete("tx-tracker:transactions").await.unwrap();
		assert!(storage.get("tx-tracker:transactions").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn test_detects_writes_from_other_instances() {
		let dir = tempdir().unwrap();
		let reader =
			FileStorage::new(dir.path().to_path_buf()).with_poll_interval(Duration::from_millis(20));
		let writer = FileStorage::new(dir.path().to_path_buf());

		// Register the key with the reader, then start watching
		assert!(reader.get("shared").await.unwrap().is_none());
		let mut changes = reader.watch().unwrap();

		writer.set("shared", "v1".to_string()).await.unwrap();

		let change = tokio::time::timeout(Duration::from_secs(5), changes.recv())
			.await
			.expect("change not detected")
			.unwrap();
		assert_eq!(change.key, "shared");
		assert_eq!(change.origin, Uuid::nil());
	}

	#[tokio::test]
	async fn test_detects_overwrite_of_a_key_first_read_with_content() {
		let dir = tempdir().unwrap();
		let reader =
			FileStorage::new(dir.path().to_path_buf()).with_poll_interval(Duration::from_millis(20));
		let writer = FileStorage::new(dir.path().to_path_buf());

		writer.set("shared", "v1".to_string()).await.unwrap();
		assert_eq!(reader.get("shared").await.unwrap().as_deref(), Some("v1"));
		assert!(reader.inner.seen.get("shared").unwrap().is_some());
		let mut changes = reader.watch().unwrap();

		// Coarse filesystem clocks need a visible gap between the two writes
		tokio::time::sleep(Duration::from_millis(1100)).await;
		writer.set("shared", "v2".to_string()).await.unwrap();

		let change = tokio::time::timeout(Duration::from_secs(5), changes.recv())
			.await
			.expect("change not detected")
			.unwrap();
		assert_eq!(change.key, "shared");
		assert_eq!(reader.get("shared").await.unwrap().as_deref(), Some("v2"));
	}

	#[tokio::test]
	async fn test_own_writes_are_not_reported() {
		let dir = tempdir().unwrap();
		let storage =
			FileStorage::new(dir.path().to_path_buf()).with_poll_interval(Duration::from_millis(20));
		let mut changes = storage.watch().unwrap();

		storage.set("own", "v1".to_string()).await.unwrap();
		tokio::time::sleep(Duration::from_millis(100)).await;

		assert!(changes.try_recv().is_err());
	}
}
