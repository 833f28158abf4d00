//! Undo history of completed operations.
//!
//! Every entry is the batch of records one operation produced, each of the
//! form `source||Verb||target`. The newest batch is undone first.

use std::fmt;

use parking_lot::Mutex;
use tracing::debug;

/// Verbs an undo record can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordVerb {
	Copy,
	Move,
	Delete,
	Rename,
}

impl RecordVerb {
	fn as_str(self) -> &'static str {
		match self {
			RecordVerb::Copy => "Copy",
			RecordVerb::Move => "Move",
			RecordVerb::Delete => "Delete",
			RecordVerb::Rename => "Rename",
		}
	}
}

impl fmt::Display for RecordVerb {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One parsed `source||Verb||target` record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRecord {
	pub source: String,
	pub verb: RecordVerb,
	pub target: String,
}

impl OperationRecord {
	pub fn new(source: impl Into<String>, verb: RecordVerb, target: impl Into<String>) -> Self {
		Self {
			source: source.into(),
			verb,
			target: target.into(),
		}
	}

	/// `None` for an unknown verb or a record without three fields.
	pub fn parse(record: &str) -> Option<Self> {
		let mut fields = record.split("||");
		let source = fields.next()?;
		let verb = match fields.next()? {
			"Copy" => RecordVerb::Copy,
			"Move" => RecordVerb::Move,
			"Delete" => RecordVerb::Delete,
			"Rename" => RecordVerb::Rename,
			_ => return None,
		};
		let target = fields.next()?;
		if fields.next().is_some() {
			return None;
		}
		Some(Self::new(source, verb, target))
	}
}

impl fmt::Display for OperationRecord {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}||{}||{}", self.source, self.verb, self.target)
	}
}

/// Stack of record batches shared by every controller of a pool.
#[derive(Debug, Default)]
pub struct OperationRecorder {
	batches: Mutex<Vec<Vec<String>>>,
}

impl OperationRecorder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Empty batches are ignored.
	pub fn push(&self, records: Vec<String>) {
		if records.is_empty() {
			return;
		}
		let mut batches = self.batches.lock();
		batches.push(records);
		debug!(target = "trustbridge.pool", depth = batches.len(), "operation recorded");
	}

	pub fn pop(&self) -> Option<Vec<String>> {
		self.batches.lock().pop()
	}

	pub fn peek(&self) -> Option<Vec<String>> {
		self.batches.lock().last().cloned()
	}

	pub fn len(&self) -> usize {
		self.batches.lock().len()
	}

	pub fn is_empty(&self) -> bool {
		self.batches.lock().is_empty()
	}

	pub fn clear(&self) {
		self.batches.lock().clear();
	}
}
