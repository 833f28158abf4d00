//! Bridge configuration.
//!
//! Loaded from `config_dir()/trustbridge/config.json`; every field has a
//! default so a missing file, or a file naming only a few fields, is fine.
//!
//! ```json
//! {
//!   "broker_socket": "/run/user/1000/trustbridge/broker.sock",
//!   "worker": { "program": "/usr/libexec/tbridge", "args": ["worker"] },
//!   "pool": { "backup_margin": 2 }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const APP_DIR: &str = "trustbridge";
const CONFIG_FILE: &str = "config.json";

/// Directory for sockets: the user runtime dir, else the temp dir.
pub fn default_runtime_dir() -> PathBuf {
	dirs::runtime_dir().unwrap_or_else(std::env::temp_dir).join(APP_DIR)
}

/// Default config file location, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
	dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
	pub broker_socket: PathBuf,
	pub progress_dir: PathBuf,
	pub worker: WorkerCommand,
	pub pool: PoolSettings,
	pub broker: BrokerSettings,
}

impl Default for BridgeConfig {
	fn default() -> Self {
		let runtime = default_runtime_dir();
		Self {
			broker_socket: runtime.join("broker.sock"),
			progress_dir: runtime.join("progress"),
			worker: WorkerCommand::default(),
			pool: PoolSettings::default(),
			broker: BrokerSettings::default(),
		}
	}
}

/// How the pool starts a worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerCommand {
	pub program: PathBuf,
	pub args: Vec<String>,
}

impl Default for WorkerCommand {
	fn default() -> Self {
		Self {
			program: PathBuf::from("tbridge"),
			args: vec!["worker".to_string()],
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolSettings {
	/// Extra idle workers kept on top of every resize target.
	pub backup_margin: usize,
	pub connect_attempts: u32,
	pub connect_backoff_ms: u64,
	/// How long a shrink waits for a leased controller to come back.
	pub resize_wait_ms: u64,
	/// Re-check interval while `acquire` waits for a returned controller.
	pub acquire_recheck_ms: u64,
}

impl Default for PoolSettings {
	fn default() -> Self {
		Self {
			backup_margin: 1,
			connect_attempts: 3,
			connect_backoff_ms: 500,
			resize_wait_ms: 5_000,
			acquire_recheck_ms: 1_000,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
	pub forward_timeout_ms: u64,
	pub notify_timeout_ms: u64,
	pub handshake_timeout_ms: u64,
}

impl Default for BrokerSettings {
	fn default() -> Self {
		Self {
			forward_timeout_ms: 3_000,
			notify_timeout_ms: 2_000,
			handshake_timeout_ms: 10_000,
		}
	}
}

impl BridgeConfig {
	/// Loads `path`, or the default location when `None`. A missing file
	/// yields defaults; a malformed file is an error.
	pub fn load(path: Option<&Path>) -> Result<Self> {
		let path = match path {
			Some(path) => path.to_path_buf(),
			None => match default_config_path() {
				Some(path) => path,
				None => return Ok(Self::default()),
			},
		};

		let content = match fs::read_to_string(&path) {
			Ok(content) => content,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
			Err(err) => return Err(err.into()),
		};

		serde_json::from_str(&content).map_err(|err| Error::Config {
			path: path.display().to_string(),
			message: err.to_string(),
		})
	}

	/// Settings the pool runs with, owned by the calling process.
	pub fn pool_config(&self) -> PoolConfig {
		PoolConfig {
			broker_socket: self.broker_socket.clone(),
			progress_dir: self.progress_dir.clone(),
			backup_margin: self.pool.backup_margin,
			connect_attempts: self.pool.connect_attempts.max(1),
			connect_backoff: Duration::from_millis(self.pool.connect_backoff_ms),
			resize_wait: Duration::from_millis(self.pool.resize_wait_ms),
			acquire_recheck: Duration::from_millis(self.pool.acquire_recheck_ms.max(1)),
			owner_pid: std::process::id(),
		}
	}
}

/// Resolved pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
	pub broker_socket: PathBuf,
	/// Where progress channel sockets are bound.
	pub progress_dir: PathBuf,
	pub backup_margin: usize,
	pub connect_attempts: u32,
	pub connect_backoff: Duration,
	pub resize_wait: Duration,
	pub acquire_recheck: Duration,
	/// Process id sent in the liveness handshake; workers exit once it dies.
	pub owner_pid: u32,
}

impl PoolConfig {
	/// Defaults for a broker at `broker_socket`, with progress sockets next to it.
	pub fn new(broker_socket: impl Into<PathBuf>) -> Self {
		let broker_socket = broker_socket.into();
		let progress_dir = broker_socket.parent().map(|dir| dir.join("progress")).unwrap_or_else(|| default_runtime_dir().join("progress"));
		BridgeConfig {
			broker_socket,
			progress_dir,
			..BridgeConfig::default()
		}
		.pool_config()
	}
}
