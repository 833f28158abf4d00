//! Reply keys and reply classification.
//!
//! A reply is a [`ValueSet`] whose keys carry the outcome: a success key
//! (optionally holding a value) or exactly one error key holding a
//! human-readable message.

use std::fmt;

use serde_json::Value;

use crate::types::Role;
use crate::value_set::{ValueSet, ValueSetExt};

pub const SUCCESS: &str = "Success";
pub const OPERATION_RECORD: &str = "OperationRecord";
pub const IDENTITY: &str = "Identity";
pub const TEST_CONNECTION: &str = "Execute_Test_Connection";

/// Error discriminators a worker may answer with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKey {
	Occupied,
	Failure,
	NotFound,
	Capture,
	NotOccupy,
	NotFoundOrNotFile,
	/// Plain `Error`, used for everything without a dedicated key.
	Generic,
}

impl ErrorKey {
	pub const ALL: [ErrorKey; 7] = [
		ErrorKey::Occupied,
		ErrorKey::Failure,
		ErrorKey::NotFound,
		ErrorKey::Capture,
		ErrorKey::NotOccupy,
		ErrorKey::NotFoundOrNotFile,
		ErrorKey::Generic,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			ErrorKey::Occupied => "Error_Occupied",
			ErrorKey::Failure => "Error_Failure",
			ErrorKey::NotFound => "Error_NotFound",
			ErrorKey::Capture => "Error_Capture",
			ErrorKey::NotOccupy => "Error_NotOccupy",
			ErrorKey::NotFoundOrNotFile => "Error_NotFoundOrNotFile",
			ErrorKey::Generic => "Error",
		}
	}
}

impl fmt::Display for ErrorKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Outcome of a reply, classified against the keys one operation expects.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
	/// One of the expected success keys was present; the whole message is kept
	/// so callers can pull the value out.
	Success(ValueSet),
	Error { key: ErrorKey, message: String },
	/// Neither an expected success key nor an expected error key.
	Missing,
}

impl Reply {
	/// Classifies `message`. Error keys are consulted first, in the order given;
	/// keys outside `error_keys` are ignored.
	pub fn classify(message: ValueSet, success_keys: &[&str], error_keys: &[ErrorKey]) -> Reply {
		for key in error_keys {
			if let Some(text) = message.text(key.as_str()) {
				return Reply::Error { key: *key, message: text };
			}
		}
		if success_keys.iter().any(|key| message.contains_key(*key)) {
			return Reply::Success(message);
		}
		Reply::Missing
	}

	pub fn is_success(&self) -> bool {
		matches!(self, Reply::Success(_))
	}
}

/// `{"Success": ""}`
pub fn success() -> ValueSet {
	ValueSet::single(SUCCESS, "")
}

/// `{"Success": value}`
pub fn success_with(value: impl Into<Value>) -> ValueSet {
	ValueSet::single(SUCCESS, value)
}

/// Success reply of a transfer, with its undo records JSON-encoded.
pub fn operation_record(records: &[String]) -> ValueSet {
	let mut message = success();
	let encoded = serde_json::to_string(records).unwrap_or_else(|_| "[]".to_string());
	message.insert(OPERATION_RECORD.to_string(), Value::String(encoded));
	message
}

pub fn error(key: ErrorKey, message: impl Into<String>) -> ValueSet {
	ValueSet::single(key.as_str(), message.into())
}

/// Handshake answer declaring `role`.
pub fn identity(role: Role) -> ValueSet {
	ValueSet::single(IDENTITY, role.as_str())
}
