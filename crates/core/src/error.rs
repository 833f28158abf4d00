use thiserror::Error;
use trustbridge_protocol::ErrorKey;

/// Failures surfaced by the pool and by operations on a leased controller.
#[derive(Debug, Error)]
pub enum Error {
	/// The worker could not be reached: socket open, launch or liveness
	/// handshake failed within the attempt budget.
	#[error("worker unreachable after {attempts} attempt(s)")]
	Connectivity { attempts: u32 },

	/// Transport failure, non-success status, or a reply without any expected key.
	#[error("no valid response from worker for {operation}")]
	NoResponse { operation: &'static str },

	#[error("not found: {0}")]
	NotFound(String),

	#[error("item is in use: {0}")]
	Occupied(String),

	#[error("operation failed: {0}")]
	Failure(String),

	#[error("item is held open by another process: {0}")]
	Captured(String),

	#[error("item is not held by any process: {0}")]
	NotOccupied(String),

	#[error("path does not exist or is not a file: {0}")]
	NotFoundOrNotFile(String),

	/// Generic `Error` reply from the worker.
	#[error("worker error: {0}")]
	Remote(String),

	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	#[error("worker pool is shut down")]
	PoolShutDown,

	#[error("failed to launch worker: {0}")]
	Launch(#[source] std::io::Error),

	#[error("invalid configuration {path}: {message}")]
	Config { path: String, message: String },

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error(transparent)]
	Transport(#[from] trustbridge_runtime::Error),
}

impl Error {
	/// Maps a worker error key onto the taxonomy.
	pub fn from_worker(key: ErrorKey, message: String) -> Self {
		match key {
			ErrorKey::Occupied => Error::Occupied(message),
			ErrorKey::Failure => Error::Failure(message),
			ErrorKey::NotFound => Error::NotFound(message),
			ErrorKey::Capture => Error::Captured(message),
			ErrorKey::NotOccupy => Error::NotOccupied(message),
			ErrorKey::NotFoundOrNotFile => Error::NotFoundOrNotFile(message),
			ErrorKey::Generic => Error::Remote(message),
		}
	}

	/// `true` for failures reported by the worker itself, as opposed to
	/// transport or pool failures.
	pub fn is_domain(&self) -> bool {
		matches!(
			self,
			Error::NotFound(_) | Error::Occupied(_) | Error::Failure(_) | Error::Captured(_) | Error::NotOccupied(_) | Error::NotFoundOrNotFile(_) | Error::Remote(_)
		)
	}
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn every_worker_key_maps_to_a_domain_error() {
		for key in ErrorKey::ALL {
			let err = Error::from_worker(key, "x".into());
			assert!(err.is_domain(), "{key} mapped to {err:?}");
		}
		assert!(matches!(Error::from_worker(ErrorKey::Capture, "x".into()), Error::Captured(_)));
		assert!(!Error::PoolShutDown.is_domain());
	}
}
