// tracker-core/src/error.rs

use thiserror::Error;
use tracker_types::NotifierError;

#[derive(Error, Debug)]
pub enum TrackerError {
	#[error("No notification source installed")]
	NoNotificationSource,

	#[error("Tracker is disposed")]
	Disposed,

	#[error("Subscription error: {0}")]
	Subscribe(#[from] NotifierError),
}
