//! Process liveness helpers shared by the pool and workers.

use std::path::PathBuf;
use std::time::Duration;

/// Returns `true` when a process with `pid` appears alive on this platform.
pub fn pid_is_alive(pid: u32) -> bool {
	if pid == 0 {
		return false;
	}
	if pid == std::process::id() {
		return true;
	}

	if PathBuf::from("/proc").join(pid.to_string()).exists() {
		return true;
	}

	std::process::Command::new("kill")
		.arg("-0")
		.arg(pid.to_string())
		.stdout(std::process::Stdio::null())
		.stderr(std::process::Stdio::null())
		.status()
		.map(|status| status.success())
		.unwrap_or(false)
}

pub fn current_pid() -> u32 {
	std::process::id()
}

/// Resolves once `pid` is no longer alive, polling every `interval`.
///
/// Each check may shell out to `kill -0`, so it runs on the blocking pool.
pub async fn wait_for_exit(pid: u32, interval: Duration) {
	let mut ticker = tokio::time::interval(interval);
	ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
	loop {
		ticker.tick().await;
		let alive = tokio::task::spawn_blocking(move || pid_is_alive(pid)).await.unwrap_or(true);
		if !alive {
			return;
		}
	}
}
