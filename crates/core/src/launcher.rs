//! Starting worker processes.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::error::{Error, Result};

/// Starts one worker that will connect to the broker at `broker_socket`.
///
/// `launch` returns once the worker is started, not once it has connected;
/// the controller's liveness handshake covers the rest.
#[async_trait]
pub trait WorkerLauncher: Send + Sync + 'static {
	async fn launch(&self, broker_socket: &Path) -> Result<()>;
}

/// Launches the worker as a detached child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
	program: PathBuf,
	args: Vec<String>,
	progress_dir: PathBuf,
}

impl ProcessLauncher {
	pub fn new(program: impl Into<PathBuf>, args: Vec<String>, progress_dir: impl Into<PathBuf>) -> Self {
		Self {
			program: program.into(),
			args,
			progress_dir: progress_dir.into(),
		}
	}

	pub fn from_config(config: &BridgeConfig) -> Self {
		Self::new(&config.worker.program, config.worker.args.clone(), &config.progress_dir)
	}
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
	async fn launch(&self, broker_socket: &Path) -> Result<()> {
		let mut child = tokio::process::Command::new(&self.program)
			.args(&self.args)
			.arg("--broker")
			.arg(broker_socket)
			.arg("--progress-dir")
			.arg(&self.progress_dir)
			.stdin(Stdio::null())
			.stdout(Stdio::null())
			.kill_on_drop(false)
			.spawn()
			.map_err(Error::Launch)?;

		let pid = child.id();
		info!(target = "trustbridge.pool", program = %self.program.display(), pid, "worker launched");

		tokio::spawn(async move {
			match child.wait().await {
				Ok(status) => debug!(target = "trustbridge.pool", pid, %status, "worker exited"),
				Err(err) => warn!(target = "trustbridge.pool", pid, error = %err, "failed to reap worker"),
			}
		});
		Ok(())
	}
}
