use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use trustbridge::protocol::{ExecuteAuthority, ProgressRecord};
use trustbridge::{BridgeConfig, CollisionResolver, KeepBoth, MergeIntoExisting, ProcessLauncher, RunOptions, WorkerPool};

use crate::cli::{Commands, Conflict, RecycleAction, TransferArgs};
use crate::prompt::AskResolver;

pub async fn execute(config: &BridgeConfig, command: Commands) -> Result<Value> {
	let pool = WorkerPool::new(config.pool_config(), Arc::new(ProcessLauncher::from_config(config)));
	let result = run(&pool, command).await;
	pool.shutdown();
	result
}

fn resolver(conflict: Conflict) -> Box<dyn CollisionResolver> {
	match conflict {
		Conflict::Merge => Box::new(MergeIntoExisting),
		Conflict::KeepBoth => Box::new(KeepBoth),
		Conflict::Ask => Box::new(AskResolver),
	}
}

fn print_progress(record: ProgressRecord) {
	match serde_json::to_string(&record) {
		Ok(line) => eprintln!("{line}"),
		Err(_) => eprintln!("{:>3}% {}", record.percent, record.item),
	}
}

async fn run(pool: &WorkerPool, command: Commands) -> Result<Value> {
	let name = command.name();
	let lease = pool.acquire().await.context("no worker available")?;

	let value = match command {
		Commands::Ping => {
			if !lease.connect().await {
				return Err(trustbridge::Error::Connectivity {
					attempts: pool.config().connect_attempts,
				})
				.context("worker did not answer the liveness check");
			}
			json!({ "controller": lease.id(), "connected": true })
		}
		Commands::Run {
			program,
			args,
			wait,
			admin,
			no_window,
		} => {
			let options = RunOptions {
				path: program.clone(),
				parameters: args,
				authority: if admin { ExecuteAuthority::Administrator } else { ExecuteAuthority::Normal },
				create_no_window: no_window,
				wait_for_exit: wait,
			};
			lease.run(options).await.with_context(|| format!("failed to run {program}"))?;
			json!({ "program": program, "waited": wait })
		}
		Commands::Rename { path, name } => {
			lease.rename(&path, &name).await.with_context(|| format!("failed to rename {path}"))?;
			json!({ "path": path, "name": name })
		}
		Commands::Copy { transfer } => transfer_items(&lease, transfer, false).await?,
		Commands::Move { transfer } => transfer_items(&lease, transfer, true).await?,
		Commands::Delete { paths, permanent, undo } => {
			let records = lease.delete(&paths, permanent, undo, print_progress).await.context("delete failed")?;
			json!({ "records": records })
		}
		Commands::Mime { path } => json!(lease.mime_type(&path).await?),
		Commands::OpenWith { path } => serde_json::to_value(lease.associations(&path).await?)?,
		Commands::Preview { path } => {
			if !lease.quicklook_available().await? {
				bail!("the worker has no previewer installed");
			}
			lease.view_with_quicklook(&path).await.with_context(|| format!("failed to preview {path}"))?;
			json!({ "path": path })
		}
		Commands::Recycle { action } => match action {
			RecycleAction::List => serde_json::to_value(lease.recycle_bin_items().await?)?,
			RecycleAction::Empty => json!({ "emptied": lease.empty_recycle_bin().await? }),
			RecycleAction::Restore { path } => json!({ "restored": lease.restore_recycle_item(&path).await? }),
			RecycleAction::Delete { path } => json!({ "deleted": lease.delete_recycle_item(&path).await? }),
		},
		Commands::Broker { .. } | Commands::Worker { .. } => bail!("{name} is not a client command"),
	};
	Ok(value)
}

async fn transfer_items(lease: &trustbridge::Lease, transfer: TransferArgs, moving: bool) -> Result<Value> {
	let resolver = resolver(transfer.on_conflict);
	let records = if moving {
		lease
			.move_items(&transfer.sources, &transfer.to, resolver.as_ref(), transfer.undo, print_progress)
			.await
			.context("move failed")?
	} else {
		lease
			.copy_items(&transfer.sources, &transfer.to, resolver.as_ref(), transfer.undo, print_progress)
			.await
			.context("copy failed")?
	};
	Ok(json!({ "records": records }))
}
