use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::{mpsc, oneshot};
use trustbridge_broker::{Broker, BrokerConfig, BrokerHandle, NO_PARTNER_MESSAGE, Snapshot};
use trustbridge_protocol::reply::{self, IDENTITY};
use trustbridge_protocol::{ValueSet, ValueSetExt};
use trustbridge_runtime::{Connection, RequestHandler, endpoint};

/// Test peer: answers the identity request with a fixed role and records every
/// other request it receives.
struct Peer {
	identity: &'static str,
	seen: mpsc::UnboundedSender<ValueSet>,
}

#[async_trait]
impl RequestHandler for Peer {
	async fn handle(&self, message: ValueSet) -> trustbridge_runtime::Result<ValueSet> {
		if message.execute_type() == Some(IDENTITY) {
			return Ok(ValueSet::single(IDENTITY, self.identity));
		}
		let kind = message.execute_type().unwrap_or_default().to_string();
		let _ = self.seen.send(message);
		Ok(reply::success_with(format!("{} handled {kind}", self.identity)))
	}
}

struct Running {
	_dir: tempfile::TempDir,
	socket: PathBuf,
	handle: BrokerHandle,
	stop: Option<oneshot::Sender<()>>,
	task: tokio::task::JoinHandle<trustbridge_broker::Result<()>>,
}

impl Running {
	async fn stop(mut self) {
		if let Some(stop) = self.stop.take() {
			let _ = stop.send(());
		}
		self.task.await.unwrap().unwrap();
	}
}

async fn start_broker(forward_timeout: Duration) -> Running {
	let dir = tempfile::tempdir().unwrap();
	let socket = dir.path().join("broker.sock");
	let mut config = BrokerConfig::new(&socket);
	config.forward_timeout = forward_timeout;
	config.handshake_timeout = Duration::from_secs(2);

	let broker = Broker::bind(config).unwrap();
	let handle = broker.handle();
	let (stop, stopped) = oneshot::channel::<()>();
	let task = tokio::spawn(broker.run_until(async {
		let _ = stopped.await;
	}));

	Running {
		_dir: dir,
		socket,
		handle,
		stop: Some(stop),
		task,
	}
}

async fn join(socket: &Path, identity: &'static str) -> (Arc<Connection>, mpsc::UnboundedReceiver<ValueSet>) {
	let stream = endpoint::connect(socket).await.unwrap();
	let (seen, rx) = mpsc::unbounded_channel();
	let connection = Connection::spawn(stream, identity, Arc::new(Peer { identity, seen }));
	(connection, rx)
}

async fn eventually<F>(handle: &BrokerHandle, mut check: F) -> Snapshot
where
	F: FnMut(&Snapshot) -> bool,
{
	for _ in 0..200 {
		let snapshot = handle.snapshot();
		if check(&snapshot) {
			return snapshot;
		}
		tokio::time::sleep(Duration::from_millis(10)).await;
	}
	panic!("broker never reached expected state: {:?}", handle.snapshot());
}

fn message(value: Value) -> ValueSet {
	match value {
		Value::Object(map) => map,
		_ => unreachable!(),
	}
}

#[tokio::test]
async fn client_waits_then_pairs_with_worker() {
	let broker = start_broker(Duration::from_secs(3)).await;

	let (_client, _client_rx) = join(&broker.socket, "Client").await;
	let snapshot = eventually(&broker.handle, |s| s.waiting_clients.len() == 1).await;
	assert!(snapshot.pairs.is_empty());

	let (_worker, _worker_rx) = join(&broker.socket, "Worker").await;
	let snapshot = eventually(&broker.handle, |s| s.pairs.len() == 1).await;
	assert!(snapshot.waiting_clients.is_empty());
	assert!(snapshot.waiting_workers.is_empty());

	broker.stop().await;
}

#[tokio::test]
async fn requests_are_forwarded_verbatim_in_both_directions() {
	let broker = start_broker(Duration::from_secs(3)).await;
	let (client, _client_rx) = join(&broker.socket, "Client").await;
	let (worker, mut worker_rx) = join(&broker.socket, "Worker").await;

	let response = client
		.send_message(message(json!({"ExecuteType": "Execute_GetVariable_Path", "Variable": "HOME"})))
		.await
		.unwrap();
	assert_eq!(response.message.text("Success").as_deref(), Some("Worker handled Execute_GetVariable_Path"));

	let forwarded = worker_rx.recv().await.unwrap();
	assert_eq!(forwarded.text("Variable").as_deref(), Some("HOME"));

	let response = worker.send_message(message(json!({"ExecuteType": "Ping"}))).await.unwrap();
	assert_eq!(response.message.text("Success").as_deref(), Some("Client handled Ping"));

	broker.stop().await;
}

#[tokio::test]
async fn request_before_pairing_waits_for_partner() {
	let broker = start_broker(Duration::from_secs(3)).await;
	let (client, _client_rx) = join(&broker.socket, "Client").await;

	let pending = tokio::spawn({
		let client = Arc::clone(&client);
		async move { client.send_message(message(json!({"ExecuteType": "Execute_Test_Connection", "ProcessId": 1}))).await }
	});
	tokio::time::sleep(Duration::from_millis(100)).await;
	let (_worker, _worker_rx) = join(&broker.socket, "Worker").await;

	let response = pending.await.unwrap().unwrap();
	assert!(response.message.contains_key("Success"));

	broker.stop().await;
}

#[tokio::test]
async fn unpaired_request_times_out_with_error() {
	let broker = start_broker(Duration::from_millis(200)).await;
	let (client, _client_rx) = join(&broker.socket, "Client").await;

	let response = client.send_message(message(json!({"ExecuteType": "Execute_Rename"}))).await.unwrap();
	assert_eq!(response.message.text("Error").as_deref(), Some(NO_PARTNER_MESSAGE));

	broker.stop().await;
}

#[tokio::test]
async fn worker_exit_notifies_client_and_closes_it() {
	let broker = start_broker(Duration::from_secs(3)).await;
	let (client, mut client_rx) = join(&broker.socket, "Client").await;
	let (worker, _worker_rx) = join(&broker.socket, "Worker").await;
	eventually(&broker.handle, |s| s.pairs.len() == 1).await;

	worker.close().await;

	let notice = tokio::time::timeout(Duration::from_secs(2), client_rx.recv()).await.unwrap().unwrap();
	assert_eq!(notice.execute_type(), Some("FullTrustProcessExited"));
	tokio::time::timeout(Duration::from_secs(2), client.closed()).await.unwrap();

	let snapshot = eventually(&broker.handle, |s| s.pairs.is_empty()).await;
	assert!(snapshot.waiting_clients.is_empty());

	broker.stop().await;
}

#[tokio::test]
async fn client_exit_tells_worker_to_exit() {
	let broker = start_broker(Duration::from_secs(3)).await;
	let (worker, mut worker_rx) = join(&broker.socket, "Worker").await;
	let (client, _client_rx) = join(&broker.socket, "Client").await;
	eventually(&broker.handle, |s| s.pairs.len() == 1).await;

	client.close().await;

	let notice = tokio::time::timeout(Duration::from_secs(2), worker_rx.recv()).await.unwrap().unwrap();
	assert_eq!(notice.execute_type(), Some("Execute_Exit"));
	tokio::time::timeout(Duration::from_secs(2), worker.closed()).await.unwrap();
	eventually(&broker.handle, |s| *s == Snapshot::default()).await;

	broker.stop().await;
}

#[tokio::test]
async fn unknown_identity_is_never_queued() {
	let broker = start_broker(Duration::from_millis(100)).await;
	let (_odd, _odd_rx) = join(&broker.socket, "FullTrustProcess").await;
	tokio::time::sleep(Duration::from_millis(100)).await;

	assert_eq!(broker.handle.connection_count(), 1);
	assert_eq!(broker.handle.snapshot(), Snapshot::default());

	broker.stop().await;
}

#[tokio::test]
async fn shutdown_removes_socket() {
	let broker = start_broker(Duration::from_secs(3)).await;
	let socket = broker.socket.clone();
	let (client, _rx) = join(&socket, "Client").await;
	broker.stop().await;

	assert!(!socket.exists());
	tokio::time::timeout(Duration::from_secs(2), client.closed()).await.unwrap();
}
