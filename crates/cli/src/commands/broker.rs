use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::{Value, json};
use tracing::info;
use trustbridge::BridgeConfig;
use trustbridge_broker::{Broker, BrokerConfig};

pub async fn execute(config: &BridgeConfig, socket: Option<PathBuf>) -> Result<Value> {
	let socket = socket.unwrap_or_else(|| config.broker_socket.clone());
	let mut broker_config = BrokerConfig::new(&socket);
	broker_config.handshake_timeout = Duration::from_millis(config.broker.handshake_timeout_ms);
	broker_config.forward_timeout = Duration::from_millis(config.broker.forward_timeout_ms);
	broker_config.notify_timeout = Duration::from_millis(config.broker.notify_timeout_ms);

	let broker = Broker::bind(broker_config).with_context(|| format!("failed to start broker on {}", socket.display()))?;
	info!(target = "trustbridge.broker", socket = %socket.display(), "broker running; Ctrl-C to stop");

	broker
		.run_until(async {
			let _ = tokio::signal::ctrl_c().await;
		})
		.await
		.context("broker stopped with an error")?;

	Ok(json!({ "socket": socket, "stopped": true }))
}
