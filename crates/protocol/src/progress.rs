//! Progress records streamed over the side channel during long-running
//! transfers.
//!
//! Each record is one JSON line:
//!
//! ```json
//! {"item": "/home/me/a.txt", "percent": 40, "phase": "copying"}
//! ```

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
	Preparing,
	Copying,
	Moving,
	Deleting,
	Completed,
	Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
	/// Item currently being processed; empty for aggregate records.
	#[serde(default)]
	pub item: String,
	/// Overall completion, `0..=100`.
	pub percent: u8,
	pub phase: ProgressPhase,
}

impl ProgressRecord {
	/// Builds a record, clamping `percent` to 100.
	pub fn new(item: impl Into<String>, percent: u8, phase: ProgressPhase) -> Self {
		Self {
			item: item.into(),
			percent: percent.min(100),
			phase,
		}
	}

	/// Percentage of `done` over `total`; zero totals count as complete.
	pub fn percent_of(done: usize, total: usize) -> u8 {
		if total == 0 {
			return 100;
		}
		((done.min(total) * 100) / total) as u8
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn record_wire_shape() {
		let record = ProgressRecord::new("/a", 40, ProgressPhase::Copying);
		assert_eq!(serde_json::to_string(&record).unwrap(), r#"{"item":"/a","percent":40,"phase":"copying"}"#);
	}

	#[test]
	fn percent_is_clamped() {
		assert_eq!(ProgressRecord::new("", 250, ProgressPhase::Completed).percent, 100);
		assert_eq!(ProgressRecord::percent_of(1, 4), 25);
		assert_eq!(ProgressRecord::percent_of(9, 4), 100);
		assert_eq!(ProgressRecord::percent_of(0, 0), 100);
	}
}
