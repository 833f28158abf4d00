//! Operation implementations. Everything here is synchronous filesystem work
//! meant to run on the blocking pool.

pub(crate) mod associate;
pub(crate) mod recycle;
pub(crate) mod shell;
pub(crate) mod transfer;

use std::io;
use std::path::Path;

use trustbridge_protocol::ErrorKey;
use trustbridge_protocol::ValueSet;
use trustbridge_protocol::reply;

/// A refusal sent back to the client under one of the reply error keys.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{key}: {message}")]
pub(crate) struct OpError {
	pub key: ErrorKey,
	pub message: String,
}

impl OpError {
	pub fn new(key: ErrorKey, message: impl Into<String>) -> Self {
		Self { key, message: message.into() }
	}

	pub fn generic(message: impl Into<String>) -> Self {
		Self::new(ErrorKey::Generic, message)
	}

	/// Classifies an I/O failure on `path` for transfer-style operations.
	pub fn from_io(path: &Path, err: &io::Error) -> Self {
		let key = match err.kind() {
			io::ErrorKind::NotFound => ErrorKey::NotFound,
			io::ErrorKind::ResourceBusy => ErrorKey::Capture,
			_ => ErrorKey::Failure,
		};
		Self::new(key, format!("{}: {err}", path.display()))
	}

	pub fn into_reply(self) -> ValueSet {
		reply::error(self.key, self.message)
	}
}

pub(crate) type OpResult<T> = Result<T, OpError>;

/// Encodes `value` as the JSON text carried under `Success`.
pub(crate) fn success_json<T: serde::Serialize>(value: &T) -> OpResult<ValueSet> {
	serde_json::to_string(value).map(reply::success_with).map_err(|err| OpError::generic(err.to_string()))
}
