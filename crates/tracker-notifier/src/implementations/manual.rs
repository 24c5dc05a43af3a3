//! In-process notification source.
//!
//! Outcomes are pushed explicitly with [`ManualNotifier::resolve`]. Used when
//! no RPC endpoint is configured, and by tests that need to control exactly
//! when and how often a signature resolves.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};
use tracker_types::{
	NotificationSource, NotifierError, OutcomeSender, Signature, SignatureOutcome, SubscriptionId,
};

/// Notification source driven by explicit `resolve` calls.
#[derive(Default)]
pub struct ManualNotifier {
	subscriptions: DashMap<SubscriptionId, (Signature, OutcomeSender)>,
	failing: AtomicBool,
}

impl ManualNotifier {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes every following `subscribe` call fail until switched back.
	pub fn set_failing(&self, failing: bool) {
		self.failing.store(failing, Ordering::SeqCst);
	}

	/// Delivers `outcome` to every live subscription for `signature`.
	///
	/// Returns how many subscriptions received it. Delivered subscriptions
	/// are consumed, so a second call for the same signature returns 0.
	pub fn resolve(&self, signature: &Signature, outcome: SignatureOutcome) -> usize {
		let ids: Vec<SubscriptionId> = self
			.subscriptions
			.iter()
			.filter(|entry| &entry.value().0 == signature)
			.map(|entry| *entry.key())
			.collect();

		let mut delivered = 0;
		for id in ids {
			if let Some((_, (_, sender))) = self.subscriptions.remove(&id) {
				if sender.send(outcome.clone()).is_ok() {
					delivered += 1;
				}
			}
		}

		info!(
			"Resolved {} with {} subscriber(s), success={}",
			signature,
			delivered,
			outcome.is_success()
		);
		delivered
	}

	/// Number of subscriptions not yet resolved or released.
	pub fn active_subscriptions(&self) -> usize {
		self.subscriptions.len()
	}

	/// Whether any live subscription exists for `signature`.
	pub fn is_subscribed(&self, signature: &Signature) -> bool {
		self.subscriptions
			.iter()
			.any(|entry| &entry.value().0 == signature)
	}
}

#[async_trait]
impl NotificationSource for ManualNotifier {
	fn name(&self) -> &str {
		"manual"
	}

	async fn subscribe(
		&self,
		signature: &Signature,
		sender: OutcomeSender,
	) -> Result<SubscriptionId, NotifierError> {
		if self.failing.load(Ordering::SeqCst) {
			return Err(NotifierError::Unavailable(
				"manual notifier is in failing mode".to_string(),
			));
		}

		let id = SubscriptionId::new();
		self.subscriptions.insert(id, (signature.clone(), sender));
		debug!("Subscribed {} as {}", signature, id);
		Ok(id)
	}

	async fn unsubscribe(&self, id: SubscriptionId) {
		if self.subscriptions.remove(&id).is_some() {
			debug!("Released subscription {}", id);
		}
	}
}
