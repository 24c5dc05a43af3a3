//! Storage module for the transaction tracker.
//!
//! This module provides abstractions for durable key-value storage of tracker
//! snapshots, supporting an in-memory backend (several execution contexts
//! sharing one map) and a file-based backend (several processes sharing one
//! directory). Both can notify other contexts when a key is written.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

pub use implementations::file::FileStorage;
pub use implementations::memory::MemoryStorage;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
}

/// Notification that a key was written by some execution context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
	/// The key that changed.
	pub key: String,
	/// Context id of the writer, `Uuid::nil()` when the writer is unknown
	/// (for example another process).
	pub origin: Uuid,
}

/// Trait defining the low-level interface for storage backends.
///
/// Values are text. Every handle has a context id so that change
/// notifications can be attributed and a context can skip its own writes.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves the value stored under `key`, if any.
	async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

	/// Stores `value` under `key`, replacing any previous value.
	async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Identifier of this execution context.
	fn context_id(&self) -> Uuid;

	/// Subscribes to cross-context change notifications.
	///
	/// Returns `None` when the backend cannot observe other writers.
	fn watch(&self) -> Option<broadcast::Receiver<StorageChange>>;
}

/// High-level storage service that provides typed operations.
///
/// The StorageService wraps a low-level storage backend and provides
/// convenient methods for storing and retrieving typed data with
/// automatic JSON serialization.
#[derive(Clone)]
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Arc<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Arc<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Serializes `data` to JSON and stores it under `key`.
	pub async fn store<T: Serialize>(&self, key: &str, data: &T) -> Result<(), StorageError> {
		let text =
			serde_json::to_string(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.set(key, text).await
	}

	/// Retrieves and deserializes a value from storage.
	///
	/// A missing key yields `Ok(None)`.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		key: &str,
	) -> Result<Option<T>, StorageError> {
		match self.backend.get(key).await? {
			Some(text) => serde_json::from_str(&text)
				.map(Some)
				.map_err(|e| StorageError::Serialization(e.to_string())),
			None => Ok(None),
		}
	}

	/// Removes a value from storage.
	pub async fn remove(&self, key: &str) -> Result<(), StorageError> {
		self.backend.delete(key).await
	}

	pub fn context_id(&self) -> Uuid {
		self.backend.context_id()
	}

	pub fn watch(&self) -> Option<broadcast::Receiver<StorageChange>> {
		self.backend.watch()
	}
}

/// Storage backend selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
	/// No durable storage; the tracker keeps state in memory only.
	None,
	/// Process-local shared map.
	Memory,
	/// One file per key under `path`, polled for external changes.
	File {
		path: PathBuf,
		poll_interval: Duration,
	},
}

/// Factory function to create a storage backend from configuration.
///
/// Returns `None` for [`StorageBackend::None`].
pub fn create_storage(backend: &StorageBackend) -> Option<Arc<dyn StorageInterface>> {
	match backend {
		StorageBackend::None => None,
		StorageBackend::Memory => Some(Arc::new(MemoryStorage::new())),
		StorageBackend::File {
			path,
			poll_interval,
		} => Some(Arc::new(
			FileStorage::new(path.clone()).with_poll_interval(*poll_interval),
		)),
	}
}
