use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use trustbridge_protocol::reply::{self, ErrorKey, IDENTITY};
use trustbridge_protocol::{Request, Role, ValueSet, ValueSetExt};
use trustbridge_runtime::{Connection, RequestHandler, endpoint};

use crate::state::{Arrival, ConnectionId, Departure, Rendezvous, Snapshot};
use crate::{Error, Result};

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_FORWARD_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// Reply text when a request arrives and no partner shows up in time.
pub const NO_PARTNER_MESSAGE: &str = "Failed to wait a partner connection within the specified time";

#[derive(Debug, Clone)]
pub struct BrokerConfig {
	pub socket: PathBuf,
	/// Bound on the identity request sent to every new connection.
	pub handshake_timeout: Duration,
	/// How long a request from an unpaired connection waits for a partner.
	pub forward_timeout: Duration,
	/// Bound on the exit notice sent to the survivor of a broken pair.
	pub notify_timeout: Duration,
}

impl BrokerConfig {
	pub fn new(socket: impl Into<PathBuf>) -> Self {
		Self {
			socket: socket.into(),
			handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
			forward_timeout: DEFAULT_FORWARD_TIMEOUT,
			notify_timeout: DEFAULT_NOTIFY_TIMEOUT,
		}
	}
}

struct Shared {
	config: BrokerConfig,
	rendezvous: Rendezvous,
	connections: DashMap<ConnectionId, Arc<Connection>>,
	/// Woken whenever a new pair forms.
	paired: Notify,
	next_id: AtomicU64,
}

/// Bound, not yet running broker.
pub struct Broker {
	listener: UnixListener,
	shared: Arc<Shared>,
}

/// Cheap handle for inspecting a running broker.
#[derive(Clone)]
pub struct BrokerHandle {
	shared: Arc<Shared>,
}

impl BrokerHandle {
	pub fn snapshot(&self) -> Snapshot {
		self.shared.rendezvous.snapshot()
	}

	/// Number of open connections, identified or not.
	pub fn connection_count(&self) -> usize {
		self.shared.connections.len()
	}

	pub fn socket_path(&self) -> &Path {
		&self.shared.config.socket
	}
}

impl Broker {
	/// Binds the broker socket, replacing a stale socket file.
	pub fn bind(config: BrokerConfig) -> Result<Self> {
		let listener = endpoint::bind(&config.socket).map_err(|source| Error::Bind {
			path: config.socket.display().to_string(),
			source,
		})?;

		Ok(Self {
			listener,
			shared: Arc::new(Shared {
				config,
				rendezvous: Rendezvous::new(),
				connections: DashMap::new(),
				paired: Notify::new(),
				next_id: AtomicU64::new(1),
			}),
		})
	}

	pub fn handle(&self) -> BrokerHandle {
		BrokerHandle {
			shared: Arc::clone(&self.shared),
		}
	}

	pub fn socket_path(&self) -> &Path {
		&self.shared.config.socket
	}

	/// Accepts connections forever.
	pub async fn run(self) -> Result<()> {
		self.run_until(std::future::pending()).await
	}

	/// Accepts connections until `shutdown` resolves, then closes every
	/// connection and removes the socket file.
	pub async fn run_until<F>(self, shutdown: F) -> Result<()>
	where
		F: Future<Output = ()>,
	{
		info!(target = "trustbridge.broker", socket = %self.socket_path().display(), "broker listening");
		tokio::pin!(shutdown);

		loop {
			tokio::select! {
				biased;
				() = &mut shutdown => break,
				accepted = self.listener.accept() => match accepted {
					Ok((stream, _)) => self.accept(stream),
					Err(err) => warn!(target = "trustbridge.broker", error = %err, "accept failed"),
				},
			}
		}

		self.shutdown().await
	}

	fn accept(&self, stream: UnixStream) {
		let id = ConnectionId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
		let handler = Arc::new(ForwardingHandler {
			id,
			shared: Arc::clone(&self.shared),
		});
		let connection = Connection::spawn(stream, format!("broker{id}"), handler);
		self.shared.connections.insert(id, Arc::clone(&connection));
		debug!(target = "trustbridge.broker", connection = %id, "connection accepted");

		tokio::spawn(Arc::clone(&self.shared).serve(id, connection));
	}

	async fn shutdown(self) -> Result<()> {
		let open: Vec<_> = self.shared.connections.iter().map(|entry| Arc::clone(entry.value())).collect();
		info!(target = "trustbridge.broker", connections = open.len(), "broker shutting down");

		futures::future::join_all(open.iter().map(|connection| connection.close())).await;
		drop(self.listener);
		endpoint::remove_socket(&self.shared.config.socket)?;
		Ok(())
	}
}

impl Shared {
	/// Lifecycle of one accepted connection: identify, rendezvous, wait for
	/// the connection to close, clean up.
	async fn serve(self: Arc<Self>, id: ConnectionId, connection: Arc<Connection>) {
		match self.identify(&connection).await {
			Some(role) => match self.rendezvous.arrive(id, role) {
				Arrival::Paired { client, worker } => {
					info!(target = "trustbridge.broker", %client, %worker, "paired");
					self.paired.notify_waiters();
				}
				Arrival::Queued => debug!(target = "trustbridge.broker", connection = %id, %role, "queued"),
			},
			None => warn!(target = "trustbridge.broker", connection = %id, "unidentified connection left unpaired"),
		}

		connection.closed().await;
		self.on_disconnect(id).await;
	}

	async fn identify(&self, connection: &Connection) -> Option<Role> {
		let identity = Request::Identity.to_value_set().ok()?;
		match connection.send_message_timeout(identity, self.config.handshake_timeout).await {
			Ok(response) if response.is_success() => {
				let declared = response.message.text(IDENTITY)?;
				match declared.parse::<Role>() {
					Ok(role) => Some(role),
					Err(err) => {
						debug!(target = "trustbridge.broker", label = connection.label(), error = %err, "rejected identity");
						None
					}
				}
			}
			Ok(response) => {
				debug!(target = "trustbridge.broker", label = connection.label(), status = ?response.status, "identity request failed");
				None
			}
			Err(err) => {
				debug!(target = "trustbridge.broker", label = connection.label(), error = %err, "identity request failed");
				None
			}
		}
	}

	async fn on_disconnect(&self, id: ConnectionId) {
		self.connections.remove(&id);
		match self.rendezvous.depart(id) {
			Departure::Worker { client } => {
				info!(target = "trustbridge.broker", worker = %id, %client, "worker disconnected");
				self.notify_and_close(client, Request::WorkerExited).await;
			}
			Departure::Client { worker } => {
				info!(target = "trustbridge.broker", client = %id, %worker, "client disconnected");
				self.notify_and_close(worker, Request::Exit).await;
			}
			Departure::Unpaired => debug!(target = "trustbridge.broker", connection = %id, "unpaired connection closed"),
		}
	}

	/// Tells the survivor of a broken pair, then closes it. The survivor is
	/// never queued again.
	async fn notify_and_close(&self, survivor: ConnectionId, notice: Request) {
		let Some(connection) = self.connections.get(&survivor).map(|entry| Arc::clone(entry.value())) else {
			return;
		};

		let kind = notice.kind();
		match notice.to_value_set() {
			Ok(message) => {
				if let Err(err) = connection.send_message_timeout(message, self.config.notify_timeout).await {
					debug!(target = "trustbridge.broker", connection = %survivor, notice = kind, error = %err, "exit notice not acknowledged");
				}
			}
			Err(err) => warn!(target = "trustbridge.broker", notice = kind, error = %err, "failed to encode exit notice"),
		}
		connection.close().await;
	}

	/// Returns the partner of `id`, waiting up to `forward_timeout` for a pair
	/// to form.
	async fn wait_for_partner(&self, id: ConnectionId) -> Option<Arc<Connection>> {
		let deadline = tokio::time::Instant::now() + self.config.forward_timeout;
		loop {
			let notified = self.paired.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();

			if let Some(partner) = self.rendezvous.partner(id) {
				if let Some(connection) = self.connections.get(&partner) {
					return Some(Arc::clone(connection.value()));
				}
			}

			if tokio::time::timeout_at(deadline, notified).await.is_err() {
				return None;
			}
		}
	}
}

/// Forwards every inbound request to the connection's partner.
struct ForwardingHandler {
	id: ConnectionId,
	shared: Arc<Shared>,
}

#[async_trait]
impl RequestHandler for ForwardingHandler {
	async fn handle(&self, message: ValueSet) -> trustbridge_runtime::Result<ValueSet> {
		let kind = message.execute_type().unwrap_or_default().to_string();

		let Some(partner) = self.shared.wait_for_partner(self.id).await else {
			warn!(target = "trustbridge.broker", connection = %self.id, request = %kind, "no partner within forward timeout");
			return Ok(reply::error(ErrorKey::Generic, NO_PARTNER_MESSAGE));
		};

		match partner.send_message(message).await {
			Ok(response) if response.is_success() => Ok(response.message),
			Ok(response) => {
				let detail = response
					.message
					.text(ErrorKey::Generic.as_str())
					.unwrap_or_else(|| format!("partner answered {:?}", response.status));
				Ok(reply::error(ErrorKey::Generic, detail))
			}
			Err(err) => {
				debug!(target = "trustbridge.broker", connection = %self.id, request = %kind, error = %err, "forwarding failed");
				Ok(reply::error(ErrorKey::Generic, format!("Can't send message to partner: {err}")))
			}
		}
	}
}
