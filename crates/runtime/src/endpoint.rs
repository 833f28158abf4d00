//! Unix socket endpoints for the broker and progress channels.

use std::io;
use std::path::Path;

use tokio::net::{UnixListener, UnixStream};

/// Connects to the socket at `path`.
pub async fn connect(path: &Path) -> io::Result<UnixStream> {
	UnixStream::connect(path).await
}

/// Binds a listener at `path`, creating the parent directory and replacing a
/// stale socket file left by a previous run.
pub fn bind(path: &Path) -> io::Result<UnixListener> {
	if let Some(parent) = path.parent() {
		if !parent.as_os_str().is_empty() {
			std::fs::create_dir_all(parent)?;
		}
	}
	remove_socket(path)?;
	UnixListener::bind(path)
}

/// Removes a socket file; a missing file is not an error.
pub fn remove_socket(path: &Path) -> io::Result<()> {
	match std::fs::remove_file(path) {
		Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
		_ => Ok(()),
	}
}

/// `true` when a connect error means nothing is listening at the path.
pub fn is_not_running(err: &io::Error) -> bool {
	matches!(err.kind(), io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused)
}
