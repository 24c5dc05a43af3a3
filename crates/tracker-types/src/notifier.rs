//! Notification source collaborator.
//!
//! A notification source reports, at most once per subscription, whether a
//! submitted signature succeeded or failed. The tracker never polls chains
//! itself; it hands a one-shot sender to the source and waits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::Signature;

/// Outcome of a signature as reported by a notification source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureOutcome {
	/// Chain-reported failure, absent on success.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl SignatureOutcome {
	pub fn success() -> Self {
		Self { error: None }
	}

	pub fn failure(error: impl Into<String>) -> Self {
		Self {
			error: Some(error.into()),
		}
	}

	pub fn is_success(&self) -> bool {
		self.error.is_none()
	}
}

/// Handle identifying one live subscription at a notification source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for SubscriptionId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for SubscriptionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Sender half used by sources to deliver an outcome.
pub type OutcomeSender = oneshot::Sender<SignatureOutcome>;

/// Errors raised by notification sources.
#[derive(Debug, Error)]
pub enum NotifierError {
	/// The source cannot accept subscriptions right now.
	#[error("Notification source unavailable: {0}")]
	Unavailable(String),
	/// Registering the subscription failed.
	#[error("Subscribe failed: {0}")]
	Subscribe(String),
	/// The remote endpoint returned an error or an unreadable response.
	#[error("RPC error: {0}")]
	Rpc(String),
}

/// Trait implemented by anything able to report signature outcomes.
#[async_trait]
pub trait NotificationSource: Send + Sync {
	/// Short name used in logs.
	fn name(&self) -> &str;

	/// Registers interest in `signature`.
	///
	/// The source sends at most one outcome through `sender`. Dropping the
	/// sender without sending means the outcome will never be reported.
	async fn subscribe(
		&self,
		signature: &Signature,
		sender: OutcomeSender,
	) -> Result<SubscriptionId, NotifierError>;

	/// Releases a subscription. Unknown ids are ignored.
	async fn unsubscribe(&self, id: SubscriptionId);
}
