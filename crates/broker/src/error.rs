use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("failed to bind broker socket {path}: {source}")]
	Bind {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Transport(#[from] trustbridge_runtime::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
