use std::time::Duration;

use thiserror::Error;

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum Error {
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// The connection closed before a response arrived, or was already closed.
	#[error("channel closed")]
	ChannelClosed,

	#[error("timed out after {0:?}")]
	Timeout(Duration),

	/// A request handler could not produce a reply.
	#[error("handler failed: {0}")]
	Handler(String),
}

pub type Result<T> = std::result::Result<T, Error>;
