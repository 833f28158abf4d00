//! Reference elevated worker.
//!
//! Connects to the broker as `Worker`, waits to be paired with a client and
//! then executes the filesystem requests that client forwards. The worker
//! exits when the broker asks it to, when the broker connection drops, or
//! when the client process that validated it dies.

mod error;
mod handler;
mod ops;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::info;
use trustbridge_runtime::{Connection, endpoint};

pub use error::{Error, Result};
pub use ops::associate::{default_application_dirs, default_mimeapps_lists};
pub use ops::recycle::RecycleBin;

use crate::handler::WorkerHandler;

const APP_DIR: &str = "trustbridge";
/// GNOME's file previewer.
pub const DEFAULT_PREVIEWER: &str = "sushi";

#[derive(Debug, Clone)]
pub struct WorkerConfig {
	pub broker_socket: PathBuf,
	/// Directory holding client progress sockets.
	pub progress_dir: PathBuf,
	pub recycle_dir: PathBuf,
	/// Poll interval of the owner watchdog.
	pub owner_poll: Duration,
	/// Searched for `.desktop` entries, earliest first.
	pub application_dirs: Vec<PathBuf>,
	pub mimeapps_lists: Vec<PathBuf>,
	/// Program that opens the quick-look preview of a file.
	pub previewer: String,
}

impl WorkerConfig {
	pub fn new(broker_socket: impl Into<PathBuf>, progress_dir: impl Into<PathBuf>) -> Self {
		let application_dirs = default_application_dirs();
		Self {
			broker_socket: broker_socket.into(),
			progress_dir: progress_dir.into(),
			recycle_dir: default_recycle_dir(),
			owner_poll: Duration::from_secs(1),
			mimeapps_lists: default_mimeapps_lists(&application_dirs),
			application_dirs,
			previewer: DEFAULT_PREVIEWER.to_string(),
		}
	}
}

/// Local data dir, else the temp dir.
pub fn default_recycle_dir() -> PathBuf {
	dirs::data_local_dir().unwrap_or_else(std::env::temp_dir).join(APP_DIR).join("recycle")
}

/// Why [`serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
	/// The broker sent `Execute_Exit`.
	Requested,
	BrokerClosed,
	/// The client process that validated this worker is gone.
	OwnerExited(u32),
}

/// Serves one broker connection until it ends.
pub async fn serve(config: WorkerConfig) -> Result<ExitReason> {
	let stream = endpoint::connect(&config.broker_socket).await.map_err(|source| Error::Connect {
		path: config.broker_socket.clone(),
		source,
	})?;

	let (exit_tx, mut exit_rx) = mpsc::unbounded_channel();
	let handler = Arc::new(WorkerHandler::new(config.clone(), exit_tx));
	let connection = Connection::spawn(stream, format!("worker#{}", std::process::id()), handler);
	info!(target = "trustbridge.worker", broker = %config.broker_socket.display(), "worker connected to broker");

	let reason = tokio::select! {
		() = connection.closed() => ExitReason::BrokerClosed,
		Some(reason) = exit_rx.recv() => reason,
	};

	connection.close().await;
	info!(target = "trustbridge.worker", ?reason, "worker exiting");
	Ok(reason)
}
