//! One elevated worker bound to the pool.
//!
//! A controller owns a lazily (re)opened [`Connection`] to the broker. Each
//! operation first re-validates the worker with the liveness handshake,
//! reconnecting and relaunching when the previous connection is gone.
//!
//! State machine: `Disconnected -> Connecting -> Connected -> {Busy <-> Idle}
//! -> Disconnected`. Disposal is terminal.

pub mod ops;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};
use trustbridge_protocol::reply::{self, ErrorKey, Reply, SUCCESS, TEST_CONNECTION};
use trustbridge_protocol::{ProgressRecord, Request, Role, ValueSet, ValueSetExt};
use trustbridge_runtime::{Connection, ProgressChannel, RequestHandler, endpoint};

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::launcher::WorkerLauncher;
use crate::recorder::OperationRecorder;

/// State shared by every controller of one pool.
pub(crate) struct ControllerContext {
	pub(crate) config: PoolConfig,
	pub(crate) launcher: Arc<dyn WorkerLauncher>,
	pub(crate) recorder: OperationRecorder,
	live: AtomicUsize,
	registry: DashMap<u64, Weak<WorkerController>>,
	next_id: AtomicU64,
}

impl ControllerContext {
	pub(crate) fn new(config: PoolConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
		Self {
			config,
			launcher,
			recorder: OperationRecorder::new(),
			live: AtomicUsize::new(0),
			registry: DashMap::new(),
			next_id: AtomicU64::new(1),
		}
	}

	/// Controllers created and not yet disposed.
	pub(crate) fn live(&self) -> usize {
		self.live.load(Ordering::SeqCst)
	}

	pub(crate) fn any_busy(&self) -> bool {
		// Upgrading may hand out the last strong reference, whose drop removes
		// the entry; never do that while a registry shard is locked.
		let controllers: Vec<_> = self.registry.iter().map(|entry| entry.value().clone()).collect();
		controllers.iter().any(|controller| controller.upgrade().is_some_and(|controller| controller.is_busy()))
	}
}

pub struct WorkerController {
	id: u64,
	context: Arc<ControllerContext>,
	me: Weak<WorkerController>,
	connection: Mutex<Option<Arc<Connection>>>,
	connect_lock: tokio::sync::Mutex<()>,
	connected: AtomicBool,
	busy: AtomicBool,
	disposed: AtomicBool,
}

/// Clears `busy` on every exit path of an operation.
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::SeqCst);
	}
}

impl WorkerController {
	/// Creates a disconnected controller and counts it as live.
	pub(crate) fn create(context: &Arc<ControllerContext>) -> Arc<Self> {
		let id = context.next_id.fetch_add(1, Ordering::Relaxed);
		let controller = Arc::new_cyclic(|me| Self {
			id,
			context: Arc::clone(context),
			me: me.clone(),
			connection: Mutex::new(None),
			connect_lock: tokio::sync::Mutex::new(()),
			connected: AtomicBool::new(false),
			busy: AtomicBool::new(false),
			disposed: AtomicBool::new(false),
		});

		context.live.fetch_add(1, Ordering::SeqCst);
		context.registry.insert(id, Arc::downgrade(&controller));
		debug!(target = "trustbridge.pool", controller = id, "controller created");
		controller
	}

	pub fn id(&self) -> u64 {
		self.id
	}

	/// Undo history shared with every other controller of the pool.
	pub fn recorder(&self) -> &OperationRecorder {
		&self.context.recorder
	}

	pub fn is_connected(&self) -> bool {
		self.connected.load(Ordering::SeqCst)
	}

	pub fn is_busy(&self) -> bool {
		self.busy.load(Ordering::SeqCst)
	}

	pub fn is_disposed(&self) -> bool {
		self.disposed.load(Ordering::SeqCst)
	}

	fn current_connection(&self) -> Option<Arc<Connection>> {
		self.connection.lock().clone()
	}

	fn mark_busy(&self) -> BusyGuard<'_> {
		self.busy.store(true, Ordering::SeqCst);
		BusyGuard(&self.busy)
	}

	/// Connects (or re-validates) the worker. Returns `false` when the worker
	/// could not be reached; the controller then stays disconnected.
	pub async fn connect(&self) -> bool {
		let _guard = self.connect_lock.lock().await;
		if self.is_disposed() {
			return false;
		}

		match self.connect_locked().await {
			Ok(()) => {
				self.connected.store(true, Ordering::SeqCst);
				true
			}
			Err(err) => {
				warn!(target = "trustbridge.pool", controller = self.id, error = %err, "failed to connect worker");
				self.connected.store(false, Ordering::SeqCst);
				false
			}
		}
	}

	async fn connect_locked(&self) -> Result<()> {
		let current = self.current_connection();
		let connection = match current {
			Some(connection) if self.is_connected() && !connection.is_closed() => connection,
			_ => self.open().await?,
		};
		self.handshake(&connection).await
	}

	/// Replaces any stale connection with a fresh one and launches a worker to
	/// pair with it.
	async fn open(&self) -> Result<Arc<Connection>> {
		let stale = self.connection.lock().take();
		if let Some(stale) = stale {
			stale.close().await;
		}

		let stream = endpoint::connect(&self.context.config.broker_socket).await?;
		let handler = Arc::new(ControllerHandler { controller: self.me.clone() });
		let connection = Connection::spawn(stream, format!("controller#{}", self.id), handler);
		*self.connection.lock() = Some(Arc::clone(&connection));

		self.context.launcher.launch(&self.context.config.broker_socket).await?;
		Ok(connection)
	}

	/// Sends `Execute_Test_Connection` until the worker echoes the key back.
	async fn handshake(&self, connection: &Connection) -> Result<()> {
		let attempts = self.context.config.connect_attempts.max(1);
		let liveness = Request::TestConnection {
			process_id: self.context.config.owner_pid,
		}
		.to_value_set()?;

		for attempt in 1..=attempts {
			let response = connection.send_message(liveness.clone()).await?;
			if !response.is_success() {
				return Err(Error::Connectivity { attempts: attempt });
			}
			if response.message.contains_key(TEST_CONNECTION) {
				return Ok(());
			}

			let reason = response.message.text(ErrorKey::Generic.as_str()).unwrap_or_default();
			debug!(target = "trustbridge.pool", controller = self.id, attempt, %reason, "worker not ready; retrying");
			if attempt < attempts {
				tokio::time::sleep(self.context.config.connect_backoff).await;
			}
		}

		Err(Error::Connectivity { attempts })
	}

	/// Returns a validated connection, reconnecting if needed.
	pub(crate) async fn ensure_connected(&self) -> Result<Arc<Connection>> {
		if self.connect().await {
			if let Some(connection) = self.current_connection() {
				return Ok(connection);
			}
		}
		Err(Error::Connectivity {
			attempts: self.context.config.connect_attempts,
		})
	}

	/// Sends `request` and classifies the reply against the expected keys.
	pub(crate) async fn invoke(&self, request: Request, success_keys: &[&str], error_keys: &[ErrorKey]) -> Result<ValueSet> {
		let _busy = self.mark_busy();
		let connection = self.ensure_connected().await?;
		let operation = request.kind();
		let message = request.to_value_set()?;
		self.exchange(&connection, operation, message, success_keys, error_keys).await
	}

	/// Like [`invoke`](Self::invoke), streaming progress to `on_progress`
	/// while the request is outstanding.
	///
	/// `build` receives the progress token to place in the request's `Guid`.
	/// When no progress channel can be opened the request still goes out with
	/// an empty token and no progress is reported.
	pub(crate) async fn invoke_with_progress<B, F>(&self, build: B, error_keys: &[ErrorKey], on_progress: F) -> Result<ValueSet>
	where
		B: FnOnce(String) -> Request,
		F: FnMut(ProgressRecord) + Send,
	{
		let _busy = self.mark_busy();
		let connection = self.ensure_connected().await?;

		let channel = match ProgressChannel::open(&self.context.config.progress_dir) {
			Ok(channel) => Some(channel),
			Err(err) => {
				warn!(target = "trustbridge.progress", controller = self.id, error = %err, "progress unavailable; continuing without it");
				None
			}
		};

		let token = channel.as_ref().map(|channel| channel.token().to_string()).unwrap_or_default();
		let request = build(token);
		let operation = request.kind();
		let message = request.to_value_set()?;

		let Some(channel) = channel else {
			return self.exchange(&connection, operation, message, &[SUCCESS], error_keys).await;
		};

		let (done_tx, done_rx) = oneshot::channel::<()>();
		let send = async {
			let result = self.exchange(&connection, operation, message, &[SUCCESS], error_keys).await;
			let _ = done_tx.send(());
			result
		};
		let listen = channel.listen(
			async {
				let _ = done_rx.await;
			},
			on_progress,
		);

		let (result, delivered) = tokio::join!(send, listen);
		match delivered {
			Ok(count) => debug!(target = "trustbridge.progress", controller = self.id, operation, records = count, "progress finished"),
			Err(err) => warn!(target = "trustbridge.progress", controller = self.id, operation, error = %err, "progress channel failed"),
		}
		result
	}

	async fn exchange(&self, connection: &Connection, operation: &'static str, message: ValueSet, success_keys: &[&str], error_keys: &[ErrorKey]) -> Result<ValueSet> {
		let response = match connection.send_message(message).await {
			Ok(response) => response,
			Err(err) => {
				warn!(target = "trustbridge.pool", controller = self.id, operation, error = %err, "request failed");
				return Err(Error::NoResponse { operation });
			}
		};

		if !response.is_success() {
			warn!(target = "trustbridge.pool", controller = self.id, operation, status = ?response.status, "request not delivered");
			return Err(Error::NoResponse { operation });
		}

		match Reply::classify(response.message, success_keys, error_keys) {
			Reply::Success(message) => Ok(message),
			Reply::Error { key, message } => {
				warn!(target = "trustbridge.pool", controller = self.id, operation, %key, %message, "worker reported an error");
				Err(Error::from_worker(key, message))
			}
			Reply::Missing => {
				warn!(target = "trustbridge.pool", controller = self.id, operation, "reply carried no expected key");
				Err(Error::NoResponse { operation })
			}
		}
	}

	/// Disposes the controller. Idempotent.
	///
	/// Marks it disconnected and disposed, drops it from the live count and
	/// closes its connection, which makes the broker tell the worker to exit.
	pub fn dispose(&self) {
		if self.disposed.swap(true, Ordering::SeqCst) {
			return;
		}
		self.connected.store(false, Ordering::SeqCst);
		let connection = self.connection.lock().take();

		let _ = self.context.live.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |live| live.checked_sub(1));
		self.context.registry.remove(&self.id);
		info!(target = "trustbridge.pool", controller = self.id, live = self.context.live(), "controller disposed");

		if let Some(connection) = connection {
			if let Ok(runtime) = tokio::runtime::Handle::try_current() {
				runtime.spawn(async move { connection.close().await });
			}
		}
	}
}

impl Drop for WorkerController {
	fn drop(&mut self) {
		self.dispose();
	}
}

impl std::fmt::Debug for WorkerController {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WorkerController")
			.field("id", &self.id)
			.field("connected", &self.is_connected())
			.field("busy", &self.is_busy())
			.field("disposed", &self.is_disposed())
			.finish()
	}
}

/// Answers requests the broker sends to the client side.
struct ControllerHandler {
	controller: Weak<WorkerController>,
}

#[async_trait]
impl RequestHandler for ControllerHandler {
	async fn handle(&self, message: ValueSet) -> trustbridge_runtime::Result<ValueSet> {
		match Request::from_value_set(message) {
			Ok(Request::Identity) => Ok(reply::identity(Role::Client)),
			Ok(Request::WorkerExited) => {
				if let Some(controller) = self.controller.upgrade() {
					info!(target = "trustbridge.pool", controller = controller.id, "worker exited; disposing controller");
					controller.dispose();
				}
				Ok(reply::success())
			}
			Ok(other) => Ok(reply::error(ErrorKey::Generic, format!("unsupported request {}", other.kind()))),
			Err(err) => Ok(reply::error(ErrorKey::Generic, err.to_string())),
		}
	}
}
