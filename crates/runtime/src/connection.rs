//! Request/response correlation over a framed duplex stream.
//!
//! A [`Connection`] owns the write half of a stream and a background task
//! reading the other half. It handles:
//! - Generating unique request ids
//! - Correlating responses with pending requests
//! - Answering inbound requests through a [`RequestHandler`]
//! - Failing every outstanding request once the stream closes
//!
//! # Message Flow
//!
//! 1. Caller invokes [`Connection::send_message`] with a [`ValueSet`]
//! 2. Connection allocates an id and parks a oneshot sender under it
//! 3. The request frame is written to the stream
//! 4. The read loop receives the response frame and resolves the oneshot
//!
//! Inbound request frames are dispatched to the handler on their own task, so
//! a slow handler never stalls response correlation on the same stream.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use tokio::sync::{oneshot, watch};
use tracing::{debug, trace, warn};
use trustbridge_protocol::ValueSet;
use trustbridge_protocol::reply::ErrorKey;

use crate::frame::{Frame, Response, ResponseStatus};
use crate::{Error, Result};

/// Answers requests initiated by the peer.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
	/// Produces the reply message. An `Err` is sent back with
	/// [`ResponseStatus::Failure`] and the error text under `Error`.
	async fn handle(&self, message: ValueSet) -> Result<ValueSet>;
}

type BoxedWriter = BufWriter<Box<dyn AsyncWrite + Send + Unpin>>;

/// Duplex framed connection to one peer.
///
/// Cloned as `Arc<Connection>`; all methods take `&self`.
pub struct Connection {
	label: String,
	last_id: AtomicU64,
	pending: Mutex<HashMap<u64, oneshot::Sender<Response>>>,
	writer: tokio::sync::Mutex<Option<BoxedWriter>>,
	closed: watch::Sender<bool>,
}

impl Connection {
	/// Splits `stream`, spawns the read loop and returns the shared handle.
	///
	/// `label` only appears in logs.
	pub fn spawn<S>(stream: S, label: impl Into<String>, handler: Arc<dyn RequestHandler>) -> Arc<Self>
	where
		S: AsyncRead + AsyncWrite + Send + 'static,
	{
		let (reader, writer) = tokio::io::split(stream);
		let writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
		let (closed, _) = watch::channel(false);

		let connection = Arc::new(Self {
			label: label.into(),
			last_id: AtomicU64::new(1),
			pending: Mutex::new(HashMap::new()),
			writer: tokio::sync::Mutex::new(Some(BufWriter::new(writer))),
			closed,
		});

		tokio::spawn(Arc::clone(&connection).read_loop(BufReader::new(reader), handler));
		connection
	}

	pub fn label(&self) -> &str {
		&self.label
	}

	pub fn is_closed(&self) -> bool {
		*self.closed.borrow()
	}

	/// Resolves once the connection is closed, locally or by the peer.
	pub async fn closed(&self) {
		let mut rx = self.closed.subscribe();
		let _ = rx.wait_for(|closed| *closed).await;
	}

	/// Sends `message` and waits for the correlated response.
	pub async fn send_message(&self, message: ValueSet) -> Result<Response> {
		self.call(message, None).await
	}

	/// Like [`send_message`](Self::send_message), giving up after `limit`.
	pub async fn send_message_timeout(&self, message: ValueSet, limit: Duration) -> Result<Response> {
		self.call(message, Some(limit)).await
	}

	async fn call(&self, message: ValueSet, limit: Option<Duration>) -> Result<Response> {
		let id = self.last_id.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = oneshot::channel();
		self.pending.lock().insert(id, tx);

		// close() flips the flag before draining `pending`, so an insert that
		// races it is either drained or observed here.
		if self.is_closed() {
			self.pending.lock().remove(&id);
			return Err(Error::ChannelClosed);
		}

		if let Err(err) = self.write_frame(&Frame::Request { id, message }).await {
			self.pending.lock().remove(&id);
			return Err(err);
		}

		match limit {
			None => rx.await.map_err(|_| Error::ChannelClosed),
			Some(limit) => match tokio::time::timeout(limit, rx).await {
				Ok(result) => result.map_err(|_| Error::ChannelClosed),
				Err(_) => {
					self.pending.lock().remove(&id);
					Err(Error::Timeout(limit))
				}
			},
		}
	}

	/// Closes the connection. Idempotent.
	///
	/// Outstanding requests fail with [`Error::ChannelClosed`] and the read
	/// loop stops.
	pub async fn close(&self) {
		self.mark_closed();
		if let Some(mut writer) = self.writer.lock().await.take() {
			let _ = writer.shutdown().await;
		}
	}

	fn mark_closed(&self) {
		let was_closed = self.closed.send_replace(true);
		let abandoned = {
			let mut pending = self.pending.lock();
			let count = pending.len();
			pending.clear();
			count
		};
		if !was_closed {
			debug!(target = "trustbridge.connection", label = %self.label, abandoned, "connection closed");
		}
	}

	async fn write_frame(&self, frame: &Frame) -> Result<()> {
		let line = frame.encode()?;
		let mut guard = self.writer.lock().await;
		let writer = guard.as_mut().ok_or(Error::ChannelClosed)?;
		writer.write_all(line.as_bytes()).await?;
		writer.flush().await?;
		Ok(())
	}

	async fn read_loop<R>(self: Arc<Self>, reader: BufReader<R>, handler: Arc<dyn RequestHandler>)
	where
		R: AsyncRead + Unpin + Send + 'static,
	{
		let mut lines = reader.lines();

		loop {
			let line = tokio::select! {
				line = lines.next_line() => line,
				() = self.closed() => break,
			};

			let line = match line {
				Ok(Some(line)) => line,
				Ok(None) => break,
				Err(err) => {
					debug!(target = "trustbridge.connection", label = %self.label, error = %err, "read failed");
					break;
				}
			};
			if line.trim().is_empty() {
				continue;
			}

			match Frame::decode(&line) {
				Ok(Frame::Response { id, status, message }) => self.dispatch_response(id, Response { status, message }),
				Ok(Frame::Request { id, message }) => {
					let connection = Arc::clone(&self);
					let handler = Arc::clone(&handler);
					tokio::spawn(async move { connection.answer(id, message, handler).await });
				}
				Err(err) => {
					warn!(target = "trustbridge.connection", label = %self.label, error = %err, "dropping malformed frame");
				}
			}
		}

		self.close().await;
	}

	fn dispatch_response(&self, id: u64, response: Response) {
		match self.pending.lock().remove(&id) {
			Some(tx) => {
				let _ = tx.send(response);
			}
			None => trace!(target = "trustbridge.connection", label = %self.label, id, "response for unknown request"),
		}
	}

	async fn answer(&self, id: u64, message: ValueSet, handler: Arc<dyn RequestHandler>) {
		let (status, message) = match handler.handle(message).await {
			Ok(reply) => (ResponseStatus::Success, reply),
			Err(err) => {
				let mut reply = ValueSet::new();
				reply.insert(ErrorKey::Generic.as_str().to_string(), Value::String(err.to_string()));
				(ResponseStatus::Failure, reply)
			}
		};

		if let Err(err) = self.write_frame(&Frame::Response { id, status, message }).await {
			debug!(target = "trustbridge.connection", label = %self.label, id, error = %err, "failed to write response");
		}
	}
}

impl std::fmt::Debug for Connection {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Connection")
			.field("label", &self.label)
			.field("closed", &self.is_closed())
			.finish_non_exhaustive()
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;
	use tokio::io::duplex;

	use super::*;

	struct Echo;

	#[async_trait]
	impl RequestHandler for Echo {
		async fn handle(&self, message: ValueSet) -> Result<ValueSet> {
			Ok(message)
		}
	}

	struct Refuse;

	#[async_trait]
	impl RequestHandler for Refuse {
		async fn handle(&self, _message: ValueSet) -> Result<ValueSet> {
			Err(Error::Handler("not today".into()))
		}
	}

	fn message(value: Value) -> ValueSet {
		match value {
			Value::Object(map) => map,
			_ => unreachable!(),
		}
	}

	#[tokio::test]
	async fn request_is_answered_by_peer_handler() {
		let (a, b) = duplex(4096);
		let client = Connection::spawn(a, "client", Arc::new(Refuse));
		let _server = Connection::spawn(b, "server", Arc::new(Echo));

		let response = client.send_message(message(json!({"ExecuteType": "Ping", "N": 1}))).await.unwrap();
		assert!(response.is_success());
		assert_eq!(response.message.get("N"), Some(&json!(1)));
	}

	#[tokio::test]
	async fn both_sides_can_initiate() {
		let (a, b) = duplex(4096);
		let left = Connection::spawn(a, "left", Arc::new(Echo));
		let right = Connection::spawn(b, "right", Arc::new(Echo));

		let (l, r) = tokio::join!(
			left.send_message(message(json!({"From": "left"}))),
			right.send_message(message(json!({"From": "right"})))
		);
		assert_eq!(l.unwrap().message.get("From"), Some(&json!("left")));
		assert_eq!(r.unwrap().message.get("From"), Some(&json!("right")));
	}

	#[tokio::test]
	async fn handler_error_becomes_failure_status() {
		let (a, b) = duplex(4096);
		let client = Connection::spawn(a, "client", Arc::new(Echo));
		let _server = Connection::spawn(b, "server", Arc::new(Refuse));

		let response = client.send_message(ValueSet::new()).await.unwrap();
		assert_eq!(response.status, ResponseStatus::Failure);
		assert_eq!(response.message.get("Error"), Some(&json!("handler failed: not today")));
	}

	#[tokio::test]
	async fn peer_eof_fails_outstanding_requests() {
		let (a, b) = duplex(4096);
		let client = Connection::spawn(a, "client", Arc::new(Echo));

		let pending = tokio::spawn({
			let client = Arc::clone(&client);
			async move { client.send_message(ValueSet::new()).await }
		});
		tokio::time::sleep(Duration::from_millis(20)).await;
		drop(b);

		assert!(matches!(pending.await.unwrap(), Err(Error::ChannelClosed)));
		client.closed().await;
		assert!(client.is_closed());
	}

	#[tokio::test]
	async fn send_after_close_fails_fast() {
		let (a, _b) = duplex(4096);
		let client = Connection::spawn(a, "client", Arc::new(Echo));
		client.close().await;
		client.close().await;

		assert!(matches!(client.send_message(ValueSet::new()).await, Err(Error::ChannelClosed)));
	}

	#[tokio::test]
	async fn timeout_forgets_the_request() {
		let (a, _b) = duplex(4096);
		let client = Connection::spawn(a, "client", Arc::new(Echo));

		let result = client.send_message_timeout(ValueSet::new(), Duration::from_millis(30)).await;
		assert!(matches!(result, Err(Error::Timeout(_))));
		assert!(client.pending.lock().is_empty());
	}
}
