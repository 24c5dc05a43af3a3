//! Post-confirmation effect kinds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A class of downstream refresh to run after a transaction confirms.
///
/// `UpdateAll` subsumes every other kind when effects are batched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EffectKind {
	UpdateUserAccount,
	UpdatePositions,
	UpdateOrders,
	UpdateAll,
}

impl EffectKind {
	pub const ALL: [EffectKind; 4] = [
		EffectKind::UpdateUserAccount,
		EffectKind::UpdatePositions,
		EffectKind::UpdateOrders,
		EffectKind::UpdateAll,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			Self::UpdateUserAccount => "UPDATE_USER_ACCOUNT",
			Self::UpdatePositions => "UPDATE_POSITIONS",
			Self::UpdateOrders => "UPDATE_ORDERS",
			Self::UpdateAll => "UPDATE_ALL",
		}
	}

	/// True for the kind that replaces all others in a flushed batch.
	pub fn subsumes_all(&self) -> bool {
		matches!(self, Self::UpdateAll)
	}
}

impl fmt::Display for EffectKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_wire_names_match_display() {
		for kind in EffectKind::ALL {
			let json = serde_json::to_string(&kind).unwrap();
			assert_eq!(json, format!("\"{}\"", kind));
		}
	}

	#[test]
	fn test_only_update_all_subsumes() {
		let subsuming: Vec<_> = EffectKind::ALL
			.into_iter()
			.filter(EffectKind::subsumes_all)
			.collect();
		assert_eq!(subsuming, vec![EffectKind::UpdateAll]);
	}
}
