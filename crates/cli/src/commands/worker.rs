use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use trustbridge::BridgeConfig;
use trustbridge_worker::WorkerConfig;

pub async fn execute(
	config: &BridgeConfig,
	broker: Option<PathBuf>,
	progress_dir: Option<PathBuf>,
	recycle_dir: Option<PathBuf>,
	previewer: Option<String>,
) -> Result<Value> {
	let mut worker_config = WorkerConfig::new(
		broker.unwrap_or_else(|| config.broker_socket.clone()),
		progress_dir.unwrap_or_else(|| config.progress_dir.clone()),
	);
	if let Some(recycle_dir) = recycle_dir {
		worker_config.recycle_dir = recycle_dir;
	}
	if let Some(previewer) = previewer {
		worker_config.previewer = previewer;
	}

	let reason = trustbridge_worker::serve(worker_config).await.context("worker failed")?;
	Ok(json!({ "exit": format!("{reason:?}") }))
}
