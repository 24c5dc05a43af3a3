use serde::{Deserialize, Serialize};

use crate::{EffectKind, TrackedTransaction};

/// Events published on the tracker's event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrackerEvent {
	/// The collection changed; carries the full current list.
	Updated {
		transactions: Vec<TrackedTransaction>,
	},
	/// One transaction reached a new status.
	Resolved { transaction: TrackedTransaction },
	/// A batched post-confirmation effect is due.
	Effect { kind: EffectKind },
}
