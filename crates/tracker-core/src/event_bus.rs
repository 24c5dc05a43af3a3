//! Event bus implementation for tracker observers.
//!
//! This module provides a broadcast-based event bus that lets observers
//! follow collection updates, single-transaction resolution and batched
//! effect broadcasts.

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};
use tracker_types::{EffectKind, Signature, TrackedTransaction, TrackerEvent};

/// Event bus for broadcasting tracker events to multiple subscribers.
///
/// Subscribing returns an owned receiver or stream; dropping it is the
/// unsubscription, so every subscription is released exactly once.
pub struct EventBus {
	/// The broadcast sender used to publish events.
	sender: broadcast::Sender<TrackerEvent>,
}

impl EventBus {
	/// Creates a new EventBus with the specified channel capacity.
	///
	/// The capacity determines how many events can be buffered per
	/// subscriber before the slowest one starts lagging.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	/// Creates a new subscriber receiving every event published after now.
	pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
		self.sender.subscribe()
	}

	/// Stream of resolution events for one signature.
	pub fn subscribe_resolution(
		&self,
		signature: Signature,
	) -> impl Stream<Item = TrackedTransaction> + Send + Unpin + 'static {
		BroadcastStream::new(self.sender.subscribe()).filter_map(move |event| match event {
			Ok(TrackerEvent::Resolved { transaction }) if transaction.signature == signature => {
				Some(transaction)
			}
			_ => None,
		})
	}

	/// Stream of flushed effect kinds.
	pub fn subscribe_effects(&self) -> impl Stream<Item = EffectKind> + Send + Unpin + 'static {
		BroadcastStream::new(self.sender.subscribe()).filter_map(|event| match event {
			Ok(TrackerEvent::Effect { kind }) => Some(kind),
			_ => None,
		})
	}

	/// Publishes an event to all current subscribers.
	///
	/// Returns an error if there are no active subscribers, which callers
	/// in the tracker treat as non-critical.
	pub fn publish(
		&self,
		event: TrackerEvent,
	) -> Result<usize, broadcast::error::SendError<TrackerEvent>> {
		self.sender.send(event)
	}

	pub fn subscriber_count(&self) -> usize {
		self.sender.receiver_count()
	}
}

/// Cloning an EventBus creates a new handle to the same underlying
/// broadcast channel.
impl Clone for EventBus {
	fn clone(&self) -> Self {
		Self {
			sender: self.sender.clone(),
		}
	}
}
