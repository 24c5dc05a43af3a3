//! Effect batcher.
//!
//! Post-confirmation effects are collected into a set and broadcast together
//! once the debounce window opened by the first pending kind expires. Later
//! enqueues join the open window without extending it. When `UPDATE_ALL` is
//! pending it subsumes every other kind and is broadcast alone.

use crate::event_bus::EventBus;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use tracker_types::{EffectKind, TrackerEvent};

/// Debounce window applied when none is configured.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Default)]
struct BatchState {
	pending: BTreeSet<EffectKind>,
	scheduled: Option<JoinHandle<()>>,
}

struct BatchShared {
	state: Mutex<BatchState>,
	bus: EventBus,
}

impl BatchShared {
	async fn flush(&self) {
		let kinds = {
			let mut state = self.state.lock().await;
			state.scheduled = None;
			std::mem::take(&mut state.pending)
		};
		broadcast(&self.bus, kinds);
	}
}

pub struct EffectBatcher {
	shared: Arc<BatchShared>,
	window: Duration,
}

impl EffectBatcher {
	pub fn new(bus: EventBus, window: Duration) -> Self {
		Self {
			shared: Arc::new(BatchShared {
				state: Mutex::new(BatchState::default()),
				bus,
			}),
			window,
		}
	}

	pub fn window(&self) -> Duration {
		self.window
	}

	/// Adds `kinds` to the pending set, opening a window if none is open.
	pub async fn enqueue(&self, kinds: &[EffectKind]) {
		if kinds.is_empty() {
			return;
		}

		let mut state = self.shared.state.lock().await;
		state.pending.extend(kinds.iter().copied());

		if state.scheduled.is_none() {
			debug!("Opening {:?} effect window", self.window);
			let shared = Arc::clone(&self.shared);
			let window = self.window;

			state.scheduled = Some(tokio::spawn(async move {
				tokio::time::sleep(window).await;
				shared.flush().await;
			}));
		}
	}

	/// Broadcasts the pending set and forgets the window handle.
	///
	/// This is what the window timer runs when it expires.
	pub async fn flush(&self) {
		self.shared.flush().await;
	}

	/// Cancels the open window and broadcasts whatever is pending.
	pub async fn flush_now(&self) {
		let kinds = {
			let mut state = self.shared.state.lock().await;
			if let Some(handle) = state.scheduled.take() {
				handle.abort();
			}
			std::mem::take(&mut state.pending)
		};
		broadcast(&self.shared.bus, kinds);
	}

	/// Kinds waiting for the current window, in stable order.
	pub async fn pending(&self) -> Vec<EffectKind> {
		self.shared.state.lock().await.pending.iter().copied().collect()
	}
}

/// Reduces a pending set to the kinds that are actually broadcast.
pub fn consolidate(pending: BTreeSet<EffectKind>) -> Vec<EffectKind> {
	if pending.iter().any(EffectKind::subsumes_all) {
		return vec![EffectKind::UpdateAll];
	}
	pending.into_iter().collect()
}

fn broadcast(bus: &EventBus, pending: BTreeSet<EffectKind>) {
	let kinds = consolidate(pending);
	if kinds.is_empty() {
		return;
	}

	info!(
		"Flushing effects: {}",
		kinds
			.iter()
			.map(EffectKind::as_str)
			.collect::<Vec<_>>()
			.join(", ")
	);
	for kind in kinds {
		bus.publish(TrackerEvent::Effect { kind }).ok();
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tokio::sync::broadcast::error::TryRecvError;

	fn drain(receiver: &mut tokio::sync::broadcast::Receiver<TrackerEvent>) -> Vec<EffectKind> {
		let mut kinds = Vec::new();
		loop {
			match receiver.try_recv() {
				Ok(TrackerEvent::Effect { kind }) => kinds.push(kind),
				Ok(_) => {}
				Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return kinds,
				Err(TryRecvError::Lagged(_)) => {}
			}
		}
	}

	#[test]
	fn test_consolidate_update_all_wins() {
		let pending: BTreeSet<_> = [EffectKind::UpdateOrders, EffectKind::UpdateAll].into();
		assert_eq!(consolidate(pending), vec![EffectKind::UpdateAll]);

		let pending: BTreeSet<_> = [EffectKind::UpdateOrders, EffectKind::UpdatePositions].into();
		assert_eq!(consolidate(pending).len(), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn test_kinds_within_window_are_merged() {
		let bus = EventBus::new(16);
		let mut receiver = bus.subscribe();
		let batcher = EffectBatcher::new(bus, DEFAULT_DEBOUNCE);

		batcher.enqueue(&[EffectKind::UpdateUserAccount]).await;
		tokio::time::sleep(Duration::from_millis(200)).await;
		batcher
			.enqueue(&[EffectKind::UpdateUserAccount, EffectKind::UpdatePositions])
			.await;
		assert!(drain(&mut receiver).is_empty());

		tokio::time::sleep(Duration::from_millis(400)).await;
		let mut flushed = drain(&mut receiver);
		flushed.sort();
		assert_eq!(
			flushed,
			vec![EffectKind::UpdateUserAccount, EffectKind::UpdatePositions]
		);
		assert!(batcher.pending().await.is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_window_is_not_extended() {
		let bus = EventBus::new(16);
		let mut receiver = bus.subscribe();
		let batcher = EffectBatcher::new(bus, DEFAULT_DEBOUNCE);

		batcher.enqueue(&[EffectKind::UpdateOrders]).await;
		tokio::time::sleep(Duration::from_millis(450)).await;
		batcher.enqueue(&[EffectKind::UpdatePositions]).await;

		// First window closes 500ms after the first enqueue
		tokio::time::sleep(Duration::from_millis(100)).await;
		assert_eq!(drain(&mut receiver).len(), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn test_flush_now_cancels_window() {
		let bus = EventBus::new(16);
		let mut receiver = bus.subscribe();
		let batcher = EffectBatcher::new(bus, DEFAULT_DEBOUNCE);

		batcher
			.enqueue(&[EffectKind::UpdatePositions, EffectKind::UpdateAll])
			.await;
		batcher.flush_now().await;
		assert_eq!(drain(&mut receiver), vec![EffectKind::UpdateAll]);

		tokio::time::sleep(Duration::from_secs(1)).await;
		assert!(drain(&mut receiver).is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn test_empty_enqueue_opens_no_window() {
		let bus = EventBus::new(16);
		let mut receiver = bus.subscribe();
		let batcher = EffectBatcher::new(bus, DEFAULT_DEBOUNCE);

		batcher.enqueue(&[]).await;
		tokio::time::sleep(Duration::from_secs(1)).await;
		assert!(drain(&mut receiver).is_empty());
	}
}
