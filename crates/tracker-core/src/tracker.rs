//! Transaction store.
//!
//! The tracker owns the collection of tracked transactions. Every mutation
//! runs under one async lock together with its persistence and its watch
//! bookkeeping, so mutations issued from API handlers, watch outcomes and
//! storage reloads are applied one at a time in arrival order.

use crate::batcher::{EffectBatcher, DEFAULT_DEBOUNCE};
use crate::error::TrackerError;
use crate::event_bus::EventBus;
use crate::mirror::DurableMirror;
use crate::watcher::{ConfirmationWatcher, SharedSource, WatchOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tracing::{debug, info, instrument, warn};
use tracker_storage::{StorageChange, StorageInterface};
use tracker_types::{
	EffectKind, Signature, TrackedTransaction, TrackerEvent, TransactionStatus,
	DEFAULT_STORAGE_KEY,
};
use uuid::Uuid;

/// Event buffer per subscriber when none is configured.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Default)]
struct TrackerState {
	transactions: Vec<TrackedTransaction>,
	/// Logical time of the last snapshot written or adopted.
	last_adopted: u64,
}

impl TrackerState {
	fn find(&self, signature: &Signature) -> Option<&TrackedTransaction> {
		self.transactions.iter().find(|t| &t.signature == signature)
	}

	fn find_mut(&mut self, signature: &Signature) -> Option<&mut TrackedTransaction> {
		self.transactions
			.iter_mut()
			.find(|t| &t.signature == signature)
	}

	fn processing(&self) -> Vec<Signature> {
		self.transactions
			.iter()
			.filter(|t| t.status == TransactionStatus::Processing)
			.map(|t| t.signature.clone())
			.collect()
	}
}

struct TrackerInner {
	state: Mutex<TrackerState>,
	mirror: DurableMirror,
	watcher: ConfirmationWatcher,
	batcher: EffectBatcher,
	bus: EventBus,
	tasks: Mutex<Vec<JoinHandle<()>>>,
	/// Set by `dispose`; the outcome loop is gone from then on.
	disposed: AtomicBool,
}

impl TrackerInner {
	/// Persists the collection and announces it.
	async fn commit(&self, state: &mut TrackerState) {
		state.last_adopted = self.mirror.save(&state.transactions, state.last_adopted).await;
		self.bus
			.publish(TrackerEvent::Updated {
				transactions: state.transactions.clone(),
			})
			.ok();
	}

	/// Watches every processing signature not yet watched, if a source is
	/// installed. Subscription failures are logged and skipped.
	async fn watch_processing(&self, state: &TrackerState) {
		if !self.watcher.has_source() {
			return;
		}

		for signature in state.processing() {
			if self.watcher.is_watching(&signature) {
				continue;
			}
			if let Err(e) = self.watcher.watch(&signature).await {
				warn!("Failed to watch {}: {}", signature, e);
			}
		}
	}
}

impl Drop for TrackerInner {
	fn drop(&mut self) {
		for task in self.tasks.get_mut().drain(..) {
			task.abort();
		}
	}
}

/// Tracks submitted transactions until they resolve.
///
/// Cheap to clone; all clones share one collection.
#[derive(Clone)]
pub struct TransactionTracker {
	inner: Arc<TrackerInner>,
}

impl TransactionTracker {
	pub fn builder() -> TrackerBuilder {
		TrackerBuilder::new()
	}

	/// Starts tracking `signature`.
	///
	/// Returns the existing record unchanged when the signature is already
	/// tracked. Otherwise the new processing record is persisted, announced
	/// and, when a notification source is installed, watched.
	#[instrument(skip_all, fields(signature = %signature))]
	pub async fn track(
		&self,
		signature: Signature,
		description: impl Into<String>,
		success_actions: impl IntoIterator<Item = EffectKind>,
	) -> TrackedTransaction {
		let mut state = self.inner.state.lock().await;

		if let Some(existing) = state.find(&signature) {
			debug!("Already tracking {}", signature);
			return existing.clone();
		}

		let record = TrackedTransaction::new(signature.clone(), description, success_actions);
		state.transactions.push(record.clone());
		self.inner.commit(&mut state).await;

		if self.inner.watcher.has_source() {
			if let Err(e) = self.inner.watcher.watch(&signature).await {
				warn!("Tracking {} without a watch: {}", signature, e);
			}
		}

		info!("Tracking {} ({})", signature, record.description);
		record
	}

	/// Moves `signature` to `status`.
	///
	/// A terminal status always releases the signature's subscription. The
	/// update itself is ignored for unknown signatures and for transitions
	/// that are not a forward step; nothing is persisted or announced then.
	/// A confirmation queues the record's success actions.
	#[instrument(skip_all, fields(signature = %signature, status = %status))]
	pub async fn update_status(
		&self,
		signature: &Signature,
		status: TransactionStatus,
		error: Option<String>,
	) {
		let mut state = self.inner.state.lock().await;

		if status.is_terminal() {
			self.inner.watcher.unwatch(signature).await;
		}

		let Some(record) = state.find_mut(signature) else {
			debug!("Ignoring status update for unknown signature {}", signature);
			return;
		};

		let previous = record.status;
		if !record.apply_status(status, error) {
			debug!(
				"Ignoring transition of {} from {} to {}",
				signature, previous, status
			);
			return;
		}

		let updated = record.clone();
		self.inner.commit(&mut state).await;
		self.inner
			.bus
			.publish(TrackerEvent::Resolved {
				transaction: updated.clone(),
			})
			.ok();

		if updated.status == TransactionStatus::Confirmed {
			self.inner.batcher.enqueue(&updated.success_actions).await;
		}

		match &updated.error {
			Some(reason) => warn!("Transaction {} failed: {}", signature, reason),
			None => info!("Transaction {} is {}", signature, updated.status),
		}
	}

	/// Snapshot of the collection in insertion order.
	pub async fn list(&self) -> Vec<TrackedTransaction> {
		self.inner.state.lock().await.transactions.clone()
	}

	pub async fn get(&self, signature: &Signature) -> Option<TrackedTransaction> {
		self.inner.state.lock().await.find(signature).cloned()
	}

	/// Stops tracking `signature`. Returns whether a record was removed.
	pub async fn remove(&self, signature: &Signature) -> bool {
		let mut state = self.inner.state.lock().await;
		self.inner.watcher.unwatch(signature).await;

		let before = state.transactions.len();
		state.transactions.retain(|t| &t.signature != signature);
		if state.transactions.len() == before {
			debug!("Nothing to remove for {}", signature);
			return false;
		}

		self.inner.commit(&mut state).await;
		info!("Removed {}", signature);
		true
	}

	/// Drops every record and releases every subscription.
	pub async fn clear(&self) {
		let mut state = self.inner.state.lock().await;
		self.inner.watcher.unwatch_all().await;

		let cleared = state.transactions.len();
		state.transactions.clear();
		self.inner.commit(&mut state).await;
		info!("Cleared {} transaction(s)", cleared);
	}

	/// Explicitly (re)watches `signature`.
	///
	/// Fails when no notification source is installed. Signatures that are
	/// unknown or already resolved are left alone.
	pub async fn watch(&self, signature: &Signature) -> Result<(), TrackerError> {
		let state = self.inner.state.lock().await;

		if self.is_disposed() {
			return Err(TrackerError::Disposed);
		}
		if !self.inner.watcher.has_source() {
			return Err(TrackerError::NoNotificationSource);
		}

		match state.find(signature) {
			Some(record) if record.status == TransactionStatus::Processing => {
				self.inner.watcher.watch(signature).await
			}
			_ => Ok(()),
		}
	}

	/// Installs the notification source and watches every processing record.
	///
	/// Refused once the tracker is disposed.
	pub async fn initialize(&self, source: SharedSource) {
		let state = self.inner.state.lock().await;
		if self.is_disposed() {
			warn!("Ignoring notification source, tracker is disposed");
			return;
		}
		self.inner.watcher.set_source(source);
		self.inner.watch_processing(&state).await;
		info!(
			"Watching {} processing transaction(s)",
			self.inner.watcher.watch_count()
		);
	}

	/// Adopts the stored snapshot if it is newer than the local state.
	///
	/// Watches are reconciled with the adopted collection: signatures that
	/// are gone or resolved are released, new processing ones are watched.
	/// Returns whether the snapshot was adopted.
	pub async fn reload(&self) -> bool {
		let mut state = self.inner.state.lock().await;

		let Some(snapshot) = self.inner.mirror.load().await else {
			return false;
		};

		if !snapshot.is_newer_than(state.last_adopted) {
			debug!(
				"Skipping snapshot at {}, already at {}",
				snapshot.last_updated, state.last_adopted
			);
			return false;
		}

		state.transactions = snapshot.transactions;
		state.last_adopted = snapshot.last_updated;

		let processing = state.processing();
		for signature in self.inner.watcher.watched() {
			if !processing.contains(&signature) {
				self.inner.watcher.unwatch(&signature).await;
			}
		}
		self.inner.watch_processing(&state).await;

		self.inner
			.bus
			.publish(TrackerEvent::Updated {
				transactions: state.transactions.clone(),
			})
			.ok();
		info!(
			"Adopted snapshot at {} with {} transaction(s)",
			state.last_adopted,
			state.transactions.len()
		);
		true
	}

	/// Stops background work and releases every subscription.
	///
	/// Pending effects are broadcast immediately. The collection and its
	/// persisted copy are left as they are, but no source can be installed
	/// afterwards.
	pub async fn dispose(&self) {
		self.inner.disposed.store(true, Ordering::SeqCst);
		for task in self.inner.tasks.lock().await.drain(..) {
			task.abort();
		}

		let _state = self.inner.state.lock().await;
		self.inner.watcher.unwatch_all().await;
		self.inner.watcher.clear_source();
		self.inner.batcher.flush_now().await;
		info!("Tracker disposed");
	}

	pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
		self.inner.bus.subscribe()
	}

	/// Stream yielding `signature`'s record each time it resolves.
	pub fn subscribe_resolution(
		&self,
		signature: Signature,
	) -> impl Stream<Item = TrackedTransaction> + Send + Unpin + 'static {
		self.inner.bus.subscribe_resolution(signature)
	}

	pub fn subscribe_effects(&self) -> impl Stream<Item = EffectKind> + Send + Unpin + 'static {
		self.inner.bus.subscribe_effects()
	}

	pub fn is_disposed(&self) -> bool {
		self.inner.disposed.load(Ordering::SeqCst)
	}

	pub fn has_notification_source(&self) -> bool {
		self.inner.watcher.has_source()
	}

	pub fn is_watching(&self, signature: &Signature) -> bool {
		self.inner.watcher.is_watching(signature)
	}

	pub fn is_durable(&self) -> bool {
		self.inner.mirror.is_durable()
	}

	/// Effect kinds queued for the open window.
	pub async fn pending_effects(&self) -> Vec<EffectKind> {
		self.inner.batcher.pending().await
	}
}

/// Applies forwarded watch outcomes until the tracker is gone.
async fn run_outcome_loop(
	inner: Weak<TrackerInner>,
	mut outcomes: mpsc::UnboundedReceiver<WatchOutcome>,
) {
	while let Some(WatchOutcome { signature, outcome }) = outcomes.recv().await {
		let Some(inner) = inner.upgrade() else {
			break;
		};

		let tracker = TransactionTracker { inner };
		let status = if outcome.is_success() {
			TransactionStatus::Confirmed
		} else {
			TransactionStatus::Failed
		};
		tracker
			.update_status(&signature, status, outcome.error)
			.await;
	}
	debug!("Outcome loop stopped");
}

/// Reloads whenever another context writes the tracker's key.
async fn run_change_listener(
	inner: Weak<TrackerInner>,
	mut changes: broadcast::Receiver<StorageChange>,
	key: String,
	context: Uuid,
) {
	loop {
		match changes.recv().await {
			Ok(change) if change.key != key || change.origin == context => continue,
			Ok(_) => {}
			Err(broadcast::error::RecvError::Lagged(missed)) => {
				warn!("Missed {} storage change(s), reloading", missed);
			}
			Err(broadcast::error::RecvError::Closed) => break,
		}

		let Some(inner) = inner.upgrade() else {
			break;
		};
		TransactionTracker { inner }.reload().await;
	}
	debug!("Storage change listener stopped");
}

/// Builder for [`TransactionTracker`].
pub struct TrackerBuilder {
	storage: Option<Arc<dyn StorageInterface>>,
	storage_key: String,
	debounce: Duration,
	event_capacity: usize,
	source: Option<SharedSource>,
}

impl Default for TrackerBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl TrackerBuilder {
	pub fn new() -> Self {
		Self {
			storage: None,
			storage_key: DEFAULT_STORAGE_KEY.to_string(),
			debounce: DEFAULT_DEBOUNCE,
			event_capacity: DEFAULT_EVENT_CAPACITY,
			source: None,
		}
	}

	pub fn with_storage(mut self, storage: Arc<dyn StorageInterface>) -> Self {
		self.storage = Some(storage);
		self
	}

	/// Sets the storage backend from an optional value, `None` keeping the
	/// tracker memory-only.
	pub fn with_optional_storage(mut self, storage: Option<Arc<dyn StorageInterface>>) -> Self {
		self.storage = storage;
		self
	}

	pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
		self.storage_key = key.into();
		self
	}

	pub fn with_debounce(mut self, window: Duration) -> Self {
		self.debounce = window;
		self
	}

	pub fn with_event_capacity(mut self, capacity: usize) -> Self {
		self.event_capacity = capacity.max(1);
		self
	}

	/// Source installed right after the initial load, as by `initialize`.
	pub fn with_notifier(mut self, source: SharedSource) -> Self {
		self.source = Some(source);
		self
	}

	/// Builds the tracker, adopting any stored snapshot and starting the
	/// background loops. Must be called within a tokio runtime.
	pub async fn build(self) -> TransactionTracker {
		let bus = EventBus::new(self.event_capacity);
		let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
		let mirror = DurableMirror::new(self.storage, self.storage_key);
		// Subscribe before the first load so no write slips between them
		let changes = mirror.changes();
		let key = mirror.key().to_string();

		let inner = Arc::new(TrackerInner {
			state: Mutex::new(TrackerState::default()),
			mirror,
			watcher: ConfirmationWatcher::new(outcome_tx),
			batcher: EffectBatcher::new(bus.clone(), self.debounce),
			bus,
			tasks: Mutex::new(Vec::new()),
			disposed: AtomicBool::new(false),
		});
		let tracker = TransactionTracker { inner };

		tracker.reload().await;

		let weak = Arc::downgrade(&tracker.inner);
		let mut tasks = vec![tokio::spawn(run_outcome_loop(weak.clone(), outcome_rx))];
		if let Some((receiver, context)) = changes {
			tasks.push(tokio::spawn(run_change_listener(
				weak, receiver, key, context,
			)));
		}
		*tracker.inner.tasks.lock().await = tasks;

		if let Some(source) = self.source {
			tracker.initialize(source).await;
		}

		tracker
	}
}
