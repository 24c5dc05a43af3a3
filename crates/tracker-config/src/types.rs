//! Configuration types for the tracker service.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub use tracker_types::DEFAULT_STORAGE_KEY;

/// Storage backends understood by the service.
pub const STORAGE_BACKENDS: [&str; 3] = ["memory", "file", "none"];

/// Commitment levels understood by the RPC notifier.
pub const COMMITMENTS: [&str; 3] = ["processed", "confirmed", "finalized"];

/// Complete tracker configuration
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerConfig {
	/// Core tracker settings
	pub tracker: TrackerSettings,
	/// Durable storage settings
	pub storage: StorageConfig,
	/// Notification source settings
	pub notifier: NotifierConfig,
	/// HTTP API settings
	pub api: ApiConfig,
}

/// Core tracker settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TrackerSettings {
	/// Key the transaction snapshot is stored under
	pub storage_key: String,
	/// Effect debounce window in milliseconds
	pub debounce_ms: u64,
	/// Events buffered per subscriber
	pub event_capacity: usize,
	/// Log level
	pub log_level: String,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
	/// Storage backend: "memory", "file" or "none"
	pub backend: String,
	/// Directory for the file backend
	pub path: Option<PathBuf>,
	/// How often the file backend checks for external writes
	pub poll_interval_ms: u64,
}

/// Notification source configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct NotifierConfig {
	/// JSON-RPC endpoint; outcomes are pushed over the API when unset
	pub rpc_url: Option<String>,
	/// Commitment level a signature must reach
	pub commitment: String,
	/// Interval between status polls per signature
	pub poll_interval_ms: u64,
	/// Retry budget for a single status request
	pub request_timeout_ms: u64,
}

/// HTTP API configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
	pub host: String,
	pub port: u16,
}

impl Default for TrackerSettings {
	fn default() -> Self {
		Self {
			storage_key: DEFAULT_STORAGE_KEY.to_string(),
			debounce_ms: 500,
			event_capacity: 256,
			log_level: "info".to_string(),
		}
	}
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			backend: "memory".to_string(),
			path: None,
			poll_interval_ms: 1000,
		}
	}
}

impl Default for NotifierConfig {
	fn default() -> Self {
		Self {
			rpc_url: None,
			commitment: "confirmed".to_string(),
			poll_interval_ms: 1000,
			request_timeout_ms: 10_000,
		}
	}
}

impl Default for ApiConfig {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".to_string(),
			port: 3000,
		}
	}
}

impl TrackerSettings {
	pub fn debounce(&self) -> Duration {
		Duration::from_millis(self.debounce_ms)
	}
}

impl StorageConfig {
	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}
}

impl NotifierConfig {
	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_millis(self.request_timeout_ms)
	}
}

impl ApiConfig {
	pub fn bind_address(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}
}
