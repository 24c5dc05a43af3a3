//! Confirmation watcher.
//!
//! Holds at most one live subscription per signature against the installed
//! notification source. Each subscription gets a small task that forwards
//! the outcome, once, to the tracker's outcome channel. Entries remember the
//! source they were opened on so that releasing them still reaches the right
//! source after a swap.

use crate::error::TrackerError;
use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use tracker_types::{NotificationSource, Signature, SignatureOutcome, SubscriptionId};

pub type SharedSource = Arc<dyn NotificationSource>;

/// Outcome forwarded from a watch task to the tracker.
#[derive(Debug, Clone)]
pub struct WatchOutcome {
	pub signature: Signature,
	pub outcome: SignatureOutcome,
}

struct WatchEntry {
	id: SubscriptionId,
	source: SharedSource,
	task: JoinHandle<()>,
}

pub struct ConfirmationWatcher {
	source: ArcSwapOption<SharedSource>,
	entries: DashMap<Signature, WatchEntry>,
	outcomes: mpsc::UnboundedSender<WatchOutcome>,
}

impl ConfirmationWatcher {
	pub fn new(outcomes: mpsc::UnboundedSender<WatchOutcome>) -> Self {
		Self {
			source: ArcSwapOption::empty(),
			entries: DashMap::new(),
			outcomes,
		}
	}

	/// Installs the notification source used by following `watch` calls.
	///
	/// Existing subscriptions stay on the source they were opened with.
	pub fn set_source(&self, source: SharedSource) {
		info!("Installing notification source: {}", source.name());
		self.source.store(Some(Arc::new(source)));
	}

	pub fn clear_source(&self) {
		self.source.store(None);
	}

	pub fn has_source(&self) -> bool {
		self.source.load().is_some()
	}

	fn current_source(&self) -> Option<SharedSource> {
		self.source.load_full().map(|slot| Arc::clone(&*slot))
	}

	/// Opens a subscription for `signature`, replacing any existing one.
	pub async fn watch(&self, signature: &Signature) -> Result<(), TrackerError> {
		let source = self
			.current_source()
			.ok_or(TrackerError::NoNotificationSource)?;

		self.unwatch(signature).await;

		let (sender, receiver) = oneshot::channel();
		let id = source.subscribe(signature, sender).await?;

		let outcomes = self.outcomes.clone();
		let watched = signature.clone();
		let task = tokio::spawn(async move {
			match receiver.await {
				Ok(outcome) => {
					if outcomes
						.send(WatchOutcome {
							signature: watched.clone(),
							outcome,
						})
						.is_err()
					{
						warn!("Dropped outcome for {}, nothing is applying outcomes", watched);
					}
				}
				Err(_) => debug!("Subscription for {} closed without an outcome", watched),
			}
		});

		self.entries
			.insert(signature.clone(), WatchEntry { id, source, task });
		debug!("Watching {} as subscription {}", signature, id);
		Ok(())
	}

	/// Releases the subscription for `signature`. No-op when none exists.
	pub async fn unwatch(&self, signature: &Signature) {
		if let Some((_, entry)) = self.entries.remove(signature) {
			entry.task.abort();
			entry.source.unsubscribe(entry.id).await;
			debug!("Released subscription {} for {}", entry.id, signature);
		}
	}

	pub async fn unwatch_all(&self) {
		for signature in self.watched() {
			self.unwatch(&signature).await;
		}
	}

	pub fn is_watching(&self, signature: &Signature) -> bool {
		self.entries.contains_key(signature)
	}

	pub fn watched(&self) -> Vec<Signature> {
		self.entries.iter().map(|entry| entry.key().clone()).collect()
	}

	pub fn watch_count(&self) -> usize {
		self.entries.len()
	}
}

impl Drop for ConfirmationWatcher {
	fn drop(&mut self) {
		for entry in self.entries.iter() {
			entry.value().task.abort();
		}
	}
}
