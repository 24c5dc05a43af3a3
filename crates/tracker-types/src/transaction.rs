//! Tracked transaction types.
//!
//! A tracked transaction is the bookkeeping record kept for one submitted
//! signature. Its status only moves forward: once confirmed or failed it is
//! never rewritten, only removed.

use crate::effects::EffectKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Externally issued identifier of one submitted transaction.
///
/// Signatures are opaque to the tracker and only compared for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(pub String);

impl Signature {
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Signature {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for Signature {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

impl From<String> for Signature {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// Resolution status of a tracked transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
	/// Submitted, outcome not yet known.
	Processing,
	/// Reported successful by the notification source.
	Confirmed,
	/// Reported failed by the notification source.
	Failed,
}

impl TransactionStatus {
	/// Returns true for statuses that never change again.
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Confirmed | Self::Failed)
	}

	/// Checks whether moving from `self` to `next` is a legal forward step.
	pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
		use TransactionStatus::*;

		matches!((self, next), (Processing, Confirmed) | (Processing, Failed))
	}
}

impl fmt::Display for TransactionStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Processing => write!(f, "processing"),
			Self::Confirmed => write!(f, "confirmed"),
			Self::Failed => write!(f, "failed"),
		}
	}
}

/// Bookkeeping record for one submitted transaction.
///
/// Serialized in camelCase so the persisted layout stays readable by other
/// clients sharing the same storage key. Unknown fields are ignored on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedTransaction {
	/// Primary key, immutable once created.
	pub signature: Signature,
	/// Current resolution status.
	pub status: TransactionStatus,
	/// Creation time in milliseconds since the Unix epoch.
	pub timestamp: i64,
	/// Human readable summary shown to the user.
	pub description: String,
	/// Failure reason, present only when `status` is failed.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	/// Effects to run once when the transaction confirms.
	#[serde(default)]
	pub success_actions: Vec<EffectKind>,
}

impl TrackedTransaction {
	/// Creates a new processing record stamped with the current time.
	///
	/// Duplicate effect kinds are collapsed, keeping first-seen order.
	pub fn new(
		signature: Signature,
		description: impl Into<String>,
		success_actions: impl IntoIterator<Item = EffectKind>,
	) -> Self {
		let mut actions: Vec<EffectKind> = Vec::new();
		for kind in success_actions {
			if !actions.contains(&kind) {
				actions.push(kind);
			}
		}

		Self {
			signature,
			status: TransactionStatus::Processing,
			timestamp: chrono::Utc::now().timestamp_millis(),
			description: description.into(),
			error: None,
			success_actions: actions,
		}
	}

	/// Applies a status transition.
	///
	/// Returns false and leaves the record untouched when the transition is
	/// not a legal forward step. The error is kept only for failures.
	pub fn apply_status(&mut self, status: TransactionStatus, error: Option<String>) -> bool {
		if !self.status.can_transition_to(status) {
			return false;
		}

		self.status = status;
		self.error = match status {
			TransactionStatus::Failed => error,
			_ => None,
		};
		true
	}
}
