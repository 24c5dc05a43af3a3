//! Notifier configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Commitment level a signature must reach before it is reported.
///
/// Levels are ordered: `Processed < Confirmed < Finalized`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
	Processed,
	Confirmed,
	Finalized,
}

impl Commitment {
	pub fn parse(value: &str) -> Option<Self> {
		match value {
			"processed" => Some(Self::Processed),
			"confirmed" => Some(Self::Confirmed),
			"finalized" => Some(Self::Finalized),
			_ => None,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Processed => "processed",
			Self::Confirmed => "confirmed",
			Self::Finalized => "finalized",
		}
	}
}

/// Configuration for the JSON-RPC signature poller.
#[derive(Debug, Clone)]
pub struct RpcNotifierConfig {
	/// JSON-RPC endpoint URL.
	pub rpc_url: String,
	/// Level a signature must reach before its outcome is reported.
	pub commitment: Commitment,
	/// Delay between two status checks of one signature.
	pub poll_interval: Duration,
	/// Upper bound on retrying a single status request.
	pub request_timeout: Duration,
}

impl RpcNotifierConfig {
	pub fn new(rpc_url: impl Into<String>) -> Self {
		Self {
			rpc_url: rpc_url.into(),
			commitment: Commitment::Confirmed,
			poll_interval: Duration::from_secs(1),
			request_timeout: Duration::from_secs(10),
		}
	}

	pub fn with_commitment(mut self, commitment: Commitment) -> Self {
		self.commitment = commitment;
		self
	}

	pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
		self.poll_interval = poll_interval;
		self
	}

	pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
		self.request_timeout = request_timeout;
		self
	}
}
