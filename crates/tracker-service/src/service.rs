//! Tracker service wiring.
//!
//! Turns a [`TrackerConfig`] into a running tracker: storage backend,
//! notification source and the tracker itself, plus a task that logs every
//! effect broadcast.

use anyhow::{anyhow, bail, Context, Result};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};
use tracker_config::{NotifierConfig, StorageConfig, TrackerConfig};
use tracker_core::{SharedSource, TransactionTracker};
use tracker_notifier::{Commitment, ManualNotifier, RpcNotifierConfig, RpcSignatureNotifier};
use tracker_storage::{create_storage, StorageBackend, StorageService};
use tracker_types::{StorageSnapshot, TrackerEvent};

/// Maps the storage section onto a backend selection.
pub fn storage_backend(config: &StorageConfig) -> Result<StorageBackend> {
	match config.backend.as_str() {
		"none" => Ok(StorageBackend::None),
		"memory" => Ok(StorageBackend::Memory),
		"file" => {
			let path = config
				.path
				.clone()
				.ok_or_else(|| anyhow!("File storage requires a path"))?;
			Ok(StorageBackend::File {
				path,
				poll_interval: config.poll_interval(),
			})
		}
		other => Err(anyhow!("Unknown storage backend: {}", other)),
	}
}

/// RPC notifier settings, `None` when no endpoint is configured.
pub fn rpc_notifier_config(config: &NotifierConfig) -> Result<Option<RpcNotifierConfig>> {
	let Some(url) = &config.rpc_url else {
		return Ok(None);
	};

	let commitment = Commitment::parse(&config.commitment)
		.ok_or_else(|| anyhow!("Unknown commitment: {}", config.commitment))?;

	Ok(Some(
		RpcNotifierConfig::new(url.clone())
			.with_commitment(commitment)
			.with_poll_interval(config.poll_interval())
			.with_request_timeout(config.request_timeout()),
	))
}

/// Tracker plus the collaborators the API needs direct access to.
pub struct TrackerService {
	tracker: TransactionTracker,
	/// Present when outcomes are pushed over the API instead of polled.
	manual: Option<Arc<ManualNotifier>>,
	effect_logger: Mutex<Option<EffectLogger>>,
}

impl TrackerService {
	#[instrument(skip_all)]
	pub async fn new(config: &TrackerConfig) -> Result<Self> {
		let storage = create_storage(&storage_backend(&config.storage)?);

		let (source, manual): (SharedSource, Option<Arc<ManualNotifier>>) =
			match rpc_notifier_config(&config.notifier)? {
				Some(rpc) => {
					info!(
						"Polling {} for {} signatures",
						rpc.rpc_url,
						rpc.commitment.as_str()
					);
					let notifier: SharedSource = Arc::new(
						RpcSignatureNotifier::new(rpc).context("Failed to create RPC notifier")?,
					);
					(notifier, None)
				}
				None => {
					info!("No RPC endpoint configured, accepting outcomes over the API");
					let notifier = Arc::new(ManualNotifier::new());
					let source: SharedSource = notifier.clone();
					(source, Some(notifier))
				}
			};

		let tracker = TransactionTracker::builder()
			.with_optional_storage(storage)
			.with_storage_key(config.tracker.storage_key.clone())
			.with_debounce(config.tracker.debounce())
			.with_event_capacity(config.tracker.event_capacity)
			.with_notifier(source)
			.build()
			.await;

		let effect_logger = spawn_effect_logger(&tracker);

		info!(
			"Tracker ready with {} transaction(s), durable={}",
			tracker.list().await.len(),
			tracker.is_durable()
		);

		Ok(Self {
			tracker,
			manual,
			effect_logger: Mutex::new(Some(effect_logger)),
		})
	}

	pub fn tracker(&self) -> &TransactionTracker {
		&self.tracker
	}

	pub fn manual_notifier(&self) -> Option<&Arc<ManualNotifier>> {
		self.manual.as_ref()
	}

	/// Disposes the tracker, then waits for the logger to write out every
	/// effect the dispose flushed. Later calls only repeat the dispose.
	pub async fn shutdown(&self) {
		self.tracker.dispose().await;

		let Some(logger) = self.effect_logger.lock().await.take() else {
			return;
		};
		logger.stop.send(()).ok();
		if let Err(e) = logger.task.await {
			warn!("Effect logger failed: {}", e);
		}
	}
}

struct EffectLogger {
	stop: oneshot::Sender<()>,
	task: JoinHandle<usize>,
}

/// Logs every effect broadcast. Stands in for the UI refreshes the effects
/// are meant to trigger. Once stopped, it drains what is already queued and
/// returns the number of effects logged.
fn spawn_effect_logger(tracker: &TransactionTracker) -> EffectLogger {
	let mut events = tracker.subscribe();
	let (stop, mut stopped) = oneshot::channel();

	let task = tokio::spawn(async move {
		let mut logged = 0;
		loop {
			tokio::select! {
				biased;
				event = events.recv() => match event {
					Ok(event) => logged += log_effect(&event),
					Err(broadcast::error::RecvError::Lagged(missed)) => {
						warn!("Effect logger missed {} event(s)", missed);
					}
					Err(broadcast::error::RecvError::Closed) => return logged,
				},
				_ = &mut stopped => break,
			}
		}

		loop {
			match events.try_recv() {
				Ok(event) => logged += log_effect(&event),
				Err(TryRecvError::Lagged(missed)) => {
					warn!("Effect logger missed {} event(s)", missed);
				}
				Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return logged,
			}
		}
	});

	EffectLogger { stop, task }
}

fn log_effect(event: &TrackerEvent) -> usize {
	match event {
		TrackerEvent::Effect { kind } => {
			info!(effect = %kind, "Effect broadcast");
			1
		}
		_ => 0,
	}
}

/// Reads the persisted snapshot without starting a tracker.
///
/// Only file storage outlives the process that wrote it, so any other
/// backend is an error.
pub async fn read_snapshot(config: &TrackerConfig) -> Result<Option<StorageSnapshot>> {
	let backend = storage_backend(&config.storage)?;
	if !matches!(backend, StorageBackend::File { .. }) {
		bail!(
			"The {} storage backend is not persisted across processes, configure file storage to list transactions",
			config.storage.backend
		);
	}
	let Some(backend) = create_storage(&backend) else {
		return Ok(None);
	};

	StorageService::new(backend)
		.retrieve(&config.tracker.storage_key)
		.await
		.context("Failed to read persisted transactions")
}
