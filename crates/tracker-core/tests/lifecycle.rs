use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracker_core::{TrackerError, TransactionTracker, DEFAULT_STORAGE_KEY};
use tracker_notifier::ManualNotifier;
use tracker_storage::{FileStorage, MemoryStorage, StorageInterface};
use tracker_types::{EffectKind, Signature, SignatureOutcome, TrackerEvent, TransactionStatus};

/// Lets spawned tasks run; with paused time the clock only moves once
/// everything else is idle.
async fn settle() {
	tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Sleeps past the default debounce window.
async fn past_window() {
	tokio::time::sleep(Duration::from_millis(600)).await;
}

fn drain_effects(events: &mut broadcast::Receiver<TrackerEvent>) -> Vec<EffectKind> {
	let mut kinds = Vec::new();
	loop {
		match events.try_recv() {
			Ok(TrackerEvent::Effect { kind }) => kinds.push(kind),
			Ok(_) | Err(TryRecvError::Lagged(_)) => {}
			Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return kinds,
		}
	}
}

#[tokio::test(start_paused = true)]
async fn test_confirmed_deposit_broadcasts_its_effect_once() {
	let notifier = Arc::new(ManualNotifier::new());
	let tracker = TransactionTracker::builder()
		.with_notifier(notifier.clone())
		.build()
		.await;
	let mut events = tracker.subscribe();
	let signature = Signature::from("sig1");

	tracker
		.track(
			signature.clone(),
			"Deposit 10 USDC",
			[EffectKind::UpdateUserAccount],
		)
		.await;
	assert_eq!(notifier.resolve(&signature, SignatureOutcome::success()), 1);

	past_window().await;

	let list = tracker.list().await;
	assert_eq!(list.len(), 1);
	assert_eq!(list[0].status, TransactionStatus::Confirmed);
	assert_eq!(list[0].description, "Deposit 10 USDC");
	assert_eq!(drain_effects(&mut events), vec![EffectKind::UpdateUserAccount]);
}

#[tokio::test(start_paused = true)]
async fn test_without_source_record_stays_processing_until_removed() {
	let tracker = TransactionTracker::builder().build().await;
	let signature = Signature::from("sig2");

	tracker.track(signature.clone(), "Withdraw", []).await;
	tokio::time::sleep(Duration::from_secs(5)).await;

	assert_eq!(
		tracker.get(&signature).await.unwrap().status,
		TransactionStatus::Processing
	);
	assert!(!tracker.has_notification_source());
	assert!(matches!(
		tracker.watch(&signature).await,
		Err(TrackerError::NoNotificationSource)
	));

	assert!(tracker.remove(&signature).await);
	assert!(tracker.list().await.is_empty());
	assert!(!tracker.remove(&signature).await);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_confirmation_runs_effects_once() {
	let tracker = TransactionTracker::builder().build().await;
	let mut events = tracker.subscribe();
	let signature = Signature::from("sig1");

	tracker
		.track(signature.clone(), "Deposit", [EffectKind::UpdateUserAccount])
		.await;
	tracker
		.update_status(&signature, TransactionStatus::Confirmed, None)
		.await;
	tracker
		.update_status(&signature, TransactionStatus::Confirmed, None)
		.await;
	past_window().await;

	// A late duplicate after the window closed opens no new one
	tracker
		.update_status(&signature, TransactionStatus::Confirmed, None)
		.await;
	past_window().await;

	assert_eq!(drain_effects(&mut events), vec![EffectKind::UpdateUserAccount]);
}

#[tokio::test(start_paused = true)]
async fn test_update_all_subsumes_other_effects_in_window() {
	let tracker = TransactionTracker::builder().build().await;
	let mut events = tracker.subscribe();

	let batch = [
		("a", EffectKind::UpdateOrders),
		("b", EffectKind::UpdateAll),
		("c", EffectKind::UpdatePositions),
	];
	for (signature, kind) in batch {
		tracker
			.track(Signature::from(signature), "Batch", [kind])
			.await;
	}
	for (signature, _) in batch {
		tracker
			.update_status(
				&Signature::from(signature),
				TransactionStatus::Confirmed,
				None,
			)
			.await;
	}
	past_window().await;

	assert_eq!(drain_effects(&mut events), vec![EffectKind::UpdateAll]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_effects_are_not_run() {
	let notifier = Arc::new(ManualNotifier::new());
	let tracker = TransactionTracker::builder()
		.with_notifier(notifier.clone())
		.build()
		.await;
	let mut events = tracker.subscribe();
	let signature = Signature::from("sig1");

	tracker
		.track(signature.clone(), "Swap", [EffectKind::UpdatePositions])
		.await;
	notifier.resolve(
		&signature,
		SignatureOutcome::failure("InstructionError"),
	);
	past_window().await;

	let record = tracker.get(&signature).await.unwrap();
	assert_eq!(record.status, TransactionStatus::Failed);
	assert!(record.error.unwrap().contains("InstructionError"));
	assert!(drain_effects(&mut events).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_notification_after_failure_has_no_effect() {
	let notifier = Arc::new(ManualNotifier::new());
	let tracker = TransactionTracker::builder()
		.with_notifier(notifier.clone())
		.build()
		.await;
	let signature = Signature::from("sig1");

	tracker
		.track(signature.clone(), "Swap", [EffectKind::UpdateOrders])
		.await;
	notifier.resolve(&signature, SignatureOutcome::failure("expired"));
	settle().await;

	assert!(!tracker.is_watching(&signature));
	assert_eq!(notifier.active_subscriptions(), 0);

	let mut events = tracker.subscribe();
	assert_eq!(notifier.resolve(&signature, SignatureOutcome::success()), 0);
	tracker
		.update_status(&signature, TransactionStatus::Confirmed, None)
		.await;
	past_window().await;

	assert_eq!(
		tracker.get(&signature).await.unwrap().status,
		TransactionStatus::Failed
	);
	assert!(matches!(events.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn test_initialize_watches_existing_processing_records() {
	let tracker = TransactionTracker::builder().build().await;
	let pending = Signature::from("pending");
	let done = Signature::from("done");

	tracker.track(pending.clone(), "Deposit", []).await;
	tracker.track(done.clone(), "Withdraw", []).await;
	tracker
		.update_status(&done, TransactionStatus::Confirmed, None)
		.await;

	let notifier = Arc::new(ManualNotifier::new());
	tracker.initialize(notifier.clone()).await;

	assert!(tracker.is_watching(&pending));
	assert!(!tracker.is_watching(&done));
	assert_eq!(notifier.active_subscriptions(), 1);

	notifier.resolve(&pending, SignatureOutcome::success());
	settle().await;
	assert_eq!(
		tracker.get(&pending).await.unwrap().status,
		TransactionStatus::Confirmed
	);
}

#[tokio::test(start_paused = true)]
async fn test_failed_subscription_can_be_retried() {
	let notifier = Arc::new(ManualNotifier::new());
	notifier.set_failing(true);
	let tracker = TransactionTracker::builder()
		.with_notifier(notifier.clone())
		.build()
		.await;
	let signature = Signature::from("sig1");

	let record = tracker.track(signature.clone(), "Deposit", []).await;
	assert_eq!(record.status, TransactionStatus::Processing);
	assert!(!tracker.is_watching(&signature));
	assert!(matches!(
		tracker.watch(&signature).await,
		Err(TrackerError::Subscribe(_))
	));

	notifier.set_failing(false);
	tracker.watch(&signature).await.unwrap();
	assert!(tracker.is_watching(&signature));
}

#[tokio::test(start_paused = true)]
async fn test_dispose_flushes_effects_and_releases_subscriptions() {
	let notifier = Arc::new(ManualNotifier::new());
	let tracker = TransactionTracker::builder()
		.with_notifier(notifier.clone())
		.build()
		.await;
	let mut events = tracker.subscribe();
	let confirmed = Signature::from("confirmed");

	tracker
		.track(confirmed.clone(), "Deposit", [EffectKind::UpdatePositions])
		.await;
	tracker
		.track(Signature::from("waiting"), "Withdraw", [])
		.await;
	tracker
		.update_status(&confirmed, TransactionStatus::Confirmed, None)
		.await;
	assert_eq!(notifier.active_subscriptions(), 1);

	tracker.dispose().await;

	assert_eq!(drain_effects(&mut events), vec![EffectKind::UpdatePositions]);
	assert_eq!(notifier.active_subscriptions(), 0);
	assert!(!tracker.has_notification_source());
	assert_eq!(tracker.list().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_disposed_tracker_refuses_a_new_source() {
	let tracker = TransactionTracker::builder().build().await;
	tracker.dispose().await;
	assert!(tracker.is_disposed());

	let notifier = Arc::new(ManualNotifier::new());
	tracker.initialize(notifier.clone()).await;
	assert!(!tracker.has_notification_source());

	let signature = Signature::from("sig1");
	tracker.track(signature.clone(), "Deposit", []).await;
	assert!(!tracker.is_watching(&signature));
	assert_eq!(notifier.active_subscriptions(), 0);
	assert!(matches!(
		tracker.watch(&signature).await,
		Err(TrackerError::Disposed)
	));

	assert_eq!(notifier.resolve(&signature, SignatureOutcome::success()), 0);
	settle().await;
	assert_eq!(
		tracker.get(&signature).await.unwrap().status,
		TransactionStatus::Processing
	);
}

#[tokio::test(start_paused = true)]
async fn test_instances_converge_through_shared_storage() {
	let storage = MemoryStorage::new();
	let first = TransactionTracker::builder()
		.with_storage(Arc::new(storage.handle()))
		.build()
		.await;
	let second = TransactionTracker::builder()
		.with_storage(Arc::new(storage.handle()))
		.build()
		.await;
	let signature = Signature::from("sig1");

	first.track(signature.clone(), "Deposit", []).await;
	settle().await;
	assert_eq!(second.list().await, first.list().await);

	second
		.update_status(&signature, TransactionStatus::Failed, Some("expired".into()))
		.await;
	settle().await;
	assert_eq!(
		first.get(&signature).await.unwrap().status,
		TransactionStatus::Failed
	);
}

#[tokio::test(start_paused = true)]
async fn test_stale_snapshot_is_not_adopted() {
	let storage = Arc::new(MemoryStorage::new());
	let tracker = TransactionTracker::builder()
		.with_storage(Arc::new(storage.handle()))
		.build()
		.await;
	tracker.track(Signature::from("sig1"), "Deposit", []).await;

	let stale = json!({ "transactions": [], "lastUpdated": 1 });
	storage
		.set(DEFAULT_STORAGE_KEY, stale.to_string())
		.await
		.unwrap();
	settle().await;

	assert_eq!(tracker.list().await.len(), 1);
	assert!(!tracker.reload().await);
}

#[tokio::test(start_paused = true)]
async fn test_newer_snapshot_replaces_whole_collection() {
	let storage = Arc::new(MemoryStorage::new());
	let tracker = TransactionTracker::builder()
		.with_storage(Arc::new(storage.handle()))
		.build()
		.await;
	tracker.track(Signature::from("local"), "Deposit", []).await;

	let far_future: u64 = 32_503_680_000_000;
	let newer = json!({
		"transactions": [{
			"signature": "remote",
			"status": "confirmed",
			"timestamp": 1,
			"description": "Withdraw",
			"successActions": []
		}],
		"lastUpdated": far_future
	});
	storage
		.set(DEFAULT_STORAGE_KEY, newer.to_string())
		.await
		.unwrap();
	settle().await;

	let list = tracker.list().await;
	assert_eq!(list.len(), 1);
	assert_eq!(list[0].signature.as_str(), "remote");

	// Local writes keep outranking what was adopted
	tracker.track(Signature::from("next"), "Swap", []).await;
	let stored = storage.get(DEFAULT_STORAGE_KEY).await.unwrap().unwrap();
	let stored: serde_json::Value = serde_json::from_str(&stored).unwrap();
	assert!(stored["lastUpdated"].as_u64().unwrap() > far_future);
}

#[tokio::test(start_paused = true)]
async fn test_adopted_changes_reconcile_watches() {
	let storage = MemoryStorage::new();
	let notifier = Arc::new(ManualNotifier::new());
	let writer = TransactionTracker::builder()
		.with_storage(Arc::new(storage.handle()))
		.build()
		.await;
	let watcher = TransactionTracker::builder()
		.with_storage(Arc::new(storage.handle()))
		.with_notifier(notifier.clone())
		.build()
		.await;
	let signature = Signature::from("sig1");

	writer.track(signature.clone(), "Deposit", []).await;
	settle().await;
	assert!(watcher.is_watching(&signature));
	assert_eq!(notifier.active_subscriptions(), 1);

	writer.remove(&signature).await;
	settle().await;
	assert!(!watcher.is_watching(&signature));
	assert_eq!(notifier.active_subscriptions(), 0);
}

#[tokio::test]
async fn test_file_storage_instances_converge() {
	let dir = tempfile::tempdir().unwrap();
	let open = || {
		Arc::new(
			FileStorage::new(dir.path().to_path_buf())
				.with_poll_interval(Duration::from_millis(20)),
		)
	};
	let first = TransactionTracker::builder()
		.with_storage(open())
		.build()
		.await;
	let second = TransactionTracker::builder()
		.with_storage(open())
		.build()
		.await;
	let signature = Signature::from("sig1");

	first.track(signature.clone(), "Deposit", []).await;

	tokio::time::timeout(Duration::from_secs(5), async {
		while second.get(&signature).await.is_none() {
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
	})
	.await
	.expect("second instance never adopted the write");
}
