mod broker;
mod client;
mod worker;

use std::path::Path;

use anyhow::Result;
use serde_json::Value;
use trustbridge::BridgeConfig;

use crate::cli::Commands;

/// Runs `command` and returns the value for the result envelope.
pub async fn dispatch(command: Commands, config_path: Option<&Path>) -> Result<Value> {
	let config = BridgeConfig::load(config_path)?;
	match command {
		Commands::Broker { socket } => broker::execute(&config, socket).await,
		Commands::Worker {
			broker,
			progress_dir,
			recycle_dir,
			previewer,
		} => worker::execute(&config, broker, progress_dir, recycle_dir, previewer).await,
		other => client::execute(&config, other).await,
	}
}
