//! Token-correlated side channel for transfer progress.
//!
//! The requesting side opens a [`ProgressChannel`], which binds
//! `<dir>/progress-<token>.sock`, and puts the token into the request's
//! `Guid` field. The worker connects a [`ProgressReporter`] to the same path
//! and writes one [`ProgressRecord`] per line, closing the stream when the
//! operation finishes.
//!
//! Progress is best effort on both ends: a reporter that fails to connect
//! becomes a no-op, and a channel that never sees a connection simply
//! delivers nothing.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};
use trustbridge_protocol::ProgressRecord;
use uuid::Uuid;

use crate::{Result, endpoint};

/// How long [`ProgressChannel::listen`] keeps reading after the paired
/// request has completed.
pub const DRAIN_WINDOW: Duration = Duration::from_millis(500);

/// Socket path of the progress endpoint for `token` under `dir`.
pub fn endpoint_path(dir: &Path, token: &str) -> PathBuf {
	dir.join(format!("progress-{token}.sock"))
}

/// Tokens are UUIDs; anything else never reaches the filesystem.
pub fn is_valid_token(token: &str) -> bool {
	Uuid::parse_str(token).is_ok()
}

/// Listening end of a progress session.
#[derive(Debug)]
pub struct ProgressChannel {
	token: String,
	path: PathBuf,
	listener: Option<UnixListener>,
}

impl ProgressChannel {
	/// Allocates a fresh token and binds its endpoint under `dir`.
	pub fn open(dir: &Path) -> Result<Self> {
		let token = Uuid::new_v4().to_string();
		let path = endpoint_path(dir, &token);
		let listener = endpoint::bind(&path)?;
		debug!(target = "trustbridge.progress", %token, path = %path.display(), "progress channel opened");
		Ok(Self {
			token,
			path,
			listener: Some(listener),
		})
	}

	pub fn token(&self) -> &str {
		&self.token
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Delivers records to `on_progress` until the reporter closes its stream.
	///
	/// `done` signals that the paired request has completed. After it fires
	/// the channel keeps reading for at most [`DRAIN_WINDOW`] per record, then
	/// gives up. Returns the number of records delivered. The channel is
	/// closed on every exit path.
	pub async fn listen<D, F>(mut self, done: D, mut on_progress: F) -> Result<usize>
	where
		D: Future<Output = ()>,
		F: FnMut(ProgressRecord),
	{
		let Some(listener) = self.listener.take() else {
			return Ok(0);
		};
		tokio::pin!(done);
		let mut done_fired = false;

		let stream = tokio::select! {
			biased;
			accepted = listener.accept() => Some(accepted?.0),
			() = &mut done => {
				done_fired = true;
				match tokio::time::timeout(DRAIN_WINDOW, listener.accept()).await {
					Ok(Ok((stream, _))) => Some(stream),
					_ => None,
				}
			}
		};
		drop(listener);

		let Some(stream) = stream else {
			debug!(target = "trustbridge.progress", token = %self.token, "no reporter connected");
			self.close();
			return Ok(0);
		};

		let mut lines = BufReader::new(stream).lines();
		let mut delivered = 0;

		loop {
			let line = if done_fired {
				match tokio::time::timeout(DRAIN_WINDOW, lines.next_line()).await {
					Ok(line) => line,
					Err(_) => break,
				}
			} else {
				tokio::select! {
					biased;
					line = lines.next_line() => line,
					() = &mut done => {
						done_fired = true;
						continue;
					}
				}
			};

			let line = match line {
				Ok(Some(line)) => line,
				Ok(None) => break,
				Err(err) => {
					warn!(target = "trustbridge.progress", token = %self.token, error = %err, "progress stream failed");
					break;
				}
			};
			if line.trim().is_empty() {
				continue;
			}

			match serde_json::from_str::<ProgressRecord>(&line) {
				Ok(record) => {
					delivered += 1;
					on_progress(record);
				}
				Err(err) => warn!(target = "trustbridge.progress", token = %self.token, error = %err, "skipping malformed progress record"),
			}
		}

		self.close();
		Ok(delivered)
	}

	/// Drops the listener and removes the socket file. Idempotent.
	pub fn close(&mut self) {
		self.listener = None;
		if let Err(err) = endpoint::remove_socket(&self.path) {
			debug!(target = "trustbridge.progress", path = %self.path.display(), error = %err, "failed to remove progress socket");
		}
	}
}

impl Drop for ProgressChannel {
	fn drop(&mut self) {
		self.close();
	}
}

/// Writing end of a progress session, held by the worker.
#[derive(Debug, Default)]
pub struct ProgressReporter {
	stream: Option<BufWriter<UnixStream>>,
}

impl ProgressReporter {
	/// Connects to the channel for `token`. Any failure yields a disabled
	/// reporter.
	pub async fn connect(dir: &Path, token: &str) -> Self {
		if !is_valid_token(token) {
			debug!(target = "trustbridge.progress", %token, "progress disabled: invalid token");
			return Self::disabled();
		}

		match endpoint::connect(&endpoint_path(dir, token)).await {
			Ok(stream) => Self {
				stream: Some(BufWriter::new(stream)),
			},
			Err(err) => {
				warn!(target = "trustbridge.progress", %token, error = %err, "progress disabled: connect failed");
				Self::disabled()
			}
		}
	}

	pub fn disabled() -> Self {
		Self { stream: None }
	}

	pub fn is_enabled(&self) -> bool {
		self.stream.is_some()
	}

	/// Sends one record. A write failure disables the reporter.
	pub async fn report(&mut self, record: &ProgressRecord) {
		let Some(stream) = self.stream.as_mut() else {
			return;
		};

		let mut line = match serde_json::to_string(record) {
			Ok(line) => line,
			Err(err) => {
				warn!(target = "trustbridge.progress", error = %err, "failed to encode progress record");
				return;
			}
		};
		line.push('\n');

		let written = async {
			stream.write_all(line.as_bytes()).await?;
			stream.flush().await
		};
		if let Err(err) = written.await {
			debug!(target = "trustbridge.progress", error = %err, "progress stream closed by listener");
			self.stream = None;
		}
	}

	/// Closes the stream, ending the listener's read loop.
	pub async fn finish(mut self) {
		if let Some(mut stream) = self.stream.take() {
			let _ = stream.shutdown().await;
		}
	}
}
