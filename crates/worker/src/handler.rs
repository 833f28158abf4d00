use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use trustbridge_protocol::reply::{self, TEST_CONNECTION};
use trustbridge_protocol::{ErrorKey, ProgressRecord, Request, Role, ValueSet, ValueSetExt};
use trustbridge_runtime::{ProgressReporter, RequestHandler, process};

use crate::ExitReason;
use crate::WorkerConfig;
use crate::ops::recycle::RecycleBin;
use crate::ops::transfer::{self, Verb};
use crate::ops::{OpError, OpResult, associate, shell, success_json};

pub(crate) struct WorkerHandler {
	config: WorkerConfig,
	bin: RecycleBin,
	exit: mpsc::UnboundedSender<ExitReason>,
	watchdog_started: AtomicBool,
}

impl WorkerHandler {
	pub(crate) fn new(config: WorkerConfig, exit: mpsc::UnboundedSender<ExitReason>) -> Self {
		Self {
			bin: RecycleBin::new(&config.recycle_dir),
			config,
			exit,
			watchdog_started: AtomicBool::new(false),
		}
	}

	/// Watches the validating client once; the worker exits when it dies.
	fn watch_owner(&self, pid: u32) {
		if pid == 0 || self.watchdog_started.swap(true, Ordering::SeqCst) {
			return;
		}
		let exit = self.exit.clone();
		let interval = self.config.owner_poll;
		tokio::spawn(async move {
			process::wait_for_exit(pid, interval).await;
			info!(target = "trustbridge.worker", pid, "owner process exited");
			let _ = exit.send(ExitReason::OwnerExited(pid));
		});
		debug!(target = "trustbridge.worker", pid, "owner watchdog started");
	}

	/// Runs blocking `work` while forwarding its progress to the client's
	/// channel for `token`.
	async fn with_progress<T, W>(&self, token: &str, work: W) -> OpResult<T>
	where
		T: Send + 'static,
		W: FnOnce(&mut dyn FnMut(ProgressRecord)) -> OpResult<T> + Send + 'static,
	{
		let mut reporter = ProgressReporter::connect(&self.config.progress_dir, token).await;
		let (records, mut received) = mpsc::unbounded_channel();
		let task = tokio::task::spawn_blocking(move || {
			work(&mut |record| {
				let _ = records.send(record);
			})
		});

		while let Some(record) = received.recv().await {
			reporter.report(&record).await;
		}
		reporter.finish().await;

		task.await.map_err(|err| OpError::generic(format!("operation aborted: {err}")))?
	}

	async fn blocking<T, W>(work: W) -> OpResult<T>
	where
		T: Send + 'static,
		W: FnOnce() -> OpResult<T> + Send + 'static,
	{
		tokio::task::spawn_blocking(work)
			.await
			.map_err(|err| OpError::generic(format!("operation aborted: {err}")))?
	}

	async fn execute(&self, request: Request) -> OpResult<ValueSet> {
		match request {
			Request::Identity => Ok(reply::identity(Role::Worker)),
			Request::TestConnection { process_id } => {
				self.watch_owner(process_id);
				Ok(ValueSet::single(TEST_CONNECTION, process::current_pid()))
			}
			Request::Exit => {
				info!(target = "trustbridge.worker", "exit requested by broker");
				let _ = self.exit.send(ExitReason::Requested);
				Ok(reply::success())
			}
			Request::WorkerExited => Err(OpError::generic("unexpected notification for a client")),

			Request::RunExe {
				path,
				parameter,
				authority,
				should_wait_for_exit,
				..
			} => {
				debug!(target = "trustbridge.worker", %path, ?authority, "run requested");
				shell::run(&path, &parameter, should_wait_for_exit).await
			}
			Request::Rename { path, desired_name } => Self::blocking(move || rename(&path, &desired_name)).await,
			Request::Delete {
				paths,
				permanent,
				progress_token,
				undo,
			} => {
				let bin = self.bin.clone();
				let records = self
					.with_progress(&progress_token, move |progress| transfer::delete(&paths, permanent, undo, &bin, progress))
					.await?;
				Ok(reply::operation_record(&records))
			}
			Request::Move {
				sources,
				destination,
				progress_token,
				undo,
			} => {
				let records = self
					.with_progress(&progress_token, move |progress| transfer::transfer(Verb::Move, &sources, &destination, undo, progress))
					.await?;
				Ok(reply::operation_record(&records))
			}
			Request::Copy {
				sources,
				destination,
				progress_token,
				undo,
			} => {
				let records = self
					.with_progress(&progress_token, move |progress| transfer::transfer(Verb::Copy, &sources, &destination, undo, progress))
					.await?;
				Ok(reply::operation_record(&records))
			}
			Request::UnlockOccupy { path } => shell::unlock_occupy(&path),

			Request::GetContextMenuItems { .. } => Ok(reply::success_with("[]")),
			Request::InvokeContextMenuItem { verb, .. } => Err(OpError::generic(format!("context menu verb {verb:?} is not supported"))),

			Request::CreateLink { package } => shell::create_link(&package),
			Request::GetHyperlinkInfo { path } => shell::hyperlink_info(&path),
			Request::GetVariablePath { variable } => shell::variable_path(&variable),
			Request::GetMimeContentType { path } => Ok(shell::mime_type(&path)),
			Request::GetHiddenItemInfo { path } => shell::hidden_item_info(&path),

			Request::CheckEverythingAvailable => Ok(reply::success_with(true)),
			Request::SearchByEverything {
				base_location,
				search_word,
				search_as_regex,
				ignore_case,
				max_count,
			} => {
				let found = Self::blocking(move || shell::search(&base_location, &search_word, search_as_regex, ignore_case, max_count)).await?;
				success_json(&found)
			}

			Request::GetRecycleBinItems => {
				let bin = self.bin.clone();
				let items = Self::blocking(move || bin.items().map_err(|err| OpError::generic(err.to_string()))).await?;
				success_json(&items)
			}
			Request::EmptyRecycleBin => {
				let bin = self.bin.clone();
				Self::blocking(move || bin.empty().map(|()| reply::success()).map_err(|err| OpError::generic(err.to_string()))).await
			}
			Request::RestoreRecycleItem { path } => {
				let bin = self.bin.clone();
				Self::blocking(move || {
					bin.restore(&path)
						.map(|restored| reply::success_with(restored.display().to_string()))
						.map_err(|err| OpError::generic(format!("{path}: {err}")))
				})
				.await
			}
			Request::DeleteRecycleItem { path } => {
				let bin = self.bin.clone();
				Self::blocking(move || bin.delete(&path).map(|()| reply::success()).map_err(|err| OpError::generic(format!("{path}: {err}")))).await
			}
			Request::EjectDevice { path } => shell::eject(&path).await,

			Request::GetAssociate { path } => {
				let dirs = self.config.application_dirs.clone();
				let lists = self.config.mimeapps_lists.clone();
				let found = Self::blocking(move || Ok(associate::associations(&path, &dirs, &lists))).await?;
				success_json(&found)
			}
			Request::CheckQuicklook => Ok(reply::success_with(shell::previewer_available(&self.config.previewer))),
			Request::Quicklook { path } => shell::quicklook(&self.config.previewer, &path),
		}
	}
}

/// Renames within the parent directory.
fn rename(path: &str, desired_name: &str) -> OpResult<ValueSet> {
	let source = std::path::Path::new(path);
	if desired_name.contains('/') {
		return Err(OpError::new(ErrorKey::Failure, format!("{desired_name:?} is not a plain name")));
	}
	let target = source.with_file_name(desired_name);
	if std::fs::symlink_metadata(&target).is_ok() {
		return Err(OpError::new(ErrorKey::Failure, format!("{} already exists", target.display())));
	}
	std::fs::rename(source, &target).map_err(|err| {
		let key = if err.kind() == std::io::ErrorKind::ResourceBusy {
			ErrorKey::Occupied
		} else {
			ErrorKey::Failure
		};
		OpError::new(key, format!("{path}: {err}"))
	})?;
	Ok(reply::success_with(target.display().to_string()))
}

#[async_trait]
impl RequestHandler for WorkerHandler {
	async fn handle(&self, message: ValueSet) -> trustbridge_runtime::Result<ValueSet> {
		let kind = message.execute_type().unwrap_or_default().to_string();
		let request = match Request::from_value_set(message) {
			Ok(request) => request,
			Err(err) => {
				warn!(target = "trustbridge.worker", %kind, error = %err, "undecodable request");
				return Ok(reply::error(ErrorKey::Generic, format!("unsupported request {kind:?}: {err}")));
			}
		};

		match self.execute(request).await {
			Ok(reply) => Ok(reply),
			Err(err) => {
				warn!(target = "trustbridge.worker", %kind, error = %err, "request refused");
				Ok(err.into_reply())
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use std::fs;
	use std::time::Duration;

	use serde_json::json;
	use trustbridge_protocol::reply::{OPERATION_RECORD, SUCCESS};

	use super::*;

	fn handler(dir: &std::path::Path) -> (Arc<WorkerHandler>, mpsc::UnboundedReceiver<ExitReason>) {
		let mut config = WorkerConfig::new(dir.join("broker.sock"), dir.join("progress"));
		config.recycle_dir = dir.join("bin");
		config.owner_poll = Duration::from_millis(20);
		config.application_dirs = vec![dir.join("applications")];
		config.mimeapps_lists = vec![dir.join("mimeapps.list")];
		config.previewer = "true".into();
		let (exit, exits) = mpsc::unbounded_channel();
		(Arc::new(WorkerHandler::new(config, exit)), exits)
	}

	fn message(value: serde_json::Value) -> ValueSet {
		match value {
			serde_json::Value::Object(map) => map,
			_ => unreachable!(),
		}
	}

	#[tokio::test]
	async fn answers_identity_and_liveness() {
		let dir = tempfile::tempdir().unwrap();
		let (handler, _exits) = handler(dir.path());

		let reply = handler.handle(message(json!({"ExecuteType": "Identity"}))).await.unwrap();
		assert_eq!(reply.text("Identity").as_deref(), Some("Worker"));

		let reply = handler
			.handle(message(json!({"ExecuteType": "Execute_Test_Connection", "ProcessId": std::process::id()})))
			.await
			.unwrap();
		assert!(reply.contains_key(TEST_CONNECTION));
	}

	#[tokio::test]
	async fn exit_request_is_signalled() {
		let dir = tempfile::tempdir().unwrap();
		let (handler, mut exits) = handler(dir.path());

		handler.handle(message(json!({"ExecuteType": "Execute_Exit"}))).await.unwrap();
		assert_eq!(exits.recv().await, Some(ExitReason::Requested));
	}

	#[tokio::test]
	async fn owner_death_is_signalled() {
		let dir = tempfile::tempdir().unwrap();
		let (handler, mut exits) = handler(dir.path());

		let mut child = std::process::Command::new("sleep").arg("0.1").spawn().unwrap();
		let pid = child.id();
		handler
			.handle(message(json!({"ExecuteType": "Execute_Test_Connection", "ProcessId": pid})))
			.await
			.unwrap();
		child.wait().unwrap();

		let reason = tokio::time::timeout(Duration::from_secs(2), exits.recv()).await.unwrap();
		assert_eq!(reason, Some(ExitReason::OwnerExited(pid)));
	}

	#[tokio::test]
	async fn unknown_type_is_a_generic_error() {
		let dir = tempfile::tempdir().unwrap();
		let (handler, _exits) = handler(dir.path());

		let reply = handler.handle(message(json!({"ExecuteType": "Execute_Format_Disk"}))).await.unwrap();
		assert!(reply.text("Error").unwrap().contains("Execute_Format_Disk"));
	}

	#[tokio::test]
	async fn rename_refuses_existing_target() {
		let dir = tempfile::tempdir().unwrap();
		let (handler, _exits) = handler(dir.path());
		let a = dir.path().join("a.txt");
		fs::write(&a, "a").unwrap();
		fs::write(dir.path().join("b.txt"), "b").unwrap();

		let reply = handler
			.handle(message(json!({"ExecuteType": "Execute_Rename", "ExecutePath": a, "DesireName": "b.txt"})))
			.await
			.unwrap();
		assert!(reply.contains_key("Error_Failure"));

		let reply = handler
			.handle(message(json!({"ExecuteType": "Execute_Rename", "ExecutePath": a, "DesireName": "c.txt"})))
			.await
			.unwrap();
		assert!(reply.contains_key(SUCCESS));
		assert!(dir.path().join("c.txt").exists());
	}

	#[tokio::test]
	async fn delete_without_progress_channel_still_runs() {
		let dir = tempfile::tempdir().unwrap();
		let (handler, _exits) = handler(dir.path());
		let file = dir.path().join("x");
		fs::write(&file, "").unwrap();

		let request = Request::Delete {
			paths: vec![file.display().to_string()],
			permanent: false,
			progress_token: String::new(),
			undo: false,
		};
		let reply = handler.handle(request.to_value_set().unwrap()).await.unwrap();

		assert!(reply.contains_key(SUCCESS));
		let records: Vec<String> = serde_json::from_str(&reply.text(OPERATION_RECORD).unwrap()).unwrap();
		assert_eq!(records.len(), 1);
		assert!(!file.exists());

		let reply = handler.handle(Request::GetRecycleBinItems.to_value_set().unwrap()).await.unwrap();
		let items: Vec<trustbridge_protocol::RecycleBinItem> = serde_json::from_str(&reply.text(SUCCESS).unwrap()).unwrap();
		assert_eq!(items.len(), 1);
	}

	#[tokio::test]
	async fn associations_come_from_desktop_entries() {
		let dir = tempfile::tempdir().unwrap();
		let (handler, _exits) = handler(dir.path());
		fs::create_dir_all(dir.path().join("applications")).unwrap();
		fs::write(
			dir.path().join("applications/viewer.desktop"),
			"[Desktop Entry]\nType=Application\nName=Viewer\nExec=/opt/viewer %f\nMimeType=image/png;\n",
		)
		.unwrap();
		fs::write(dir.path().join("mimeapps.list"), "[Default Applications]\nimage/png=viewer.desktop\n").unwrap();

		let reply = handler.handle(Request::GetAssociate { path: "/pics/a.png".into() }.to_value_set().unwrap()).await.unwrap();
		let found: Vec<trustbridge_protocol::AssociationPackage> = serde_json::from_str(&reply.text(SUCCESS).unwrap()).unwrap();
		assert_eq!(found.len(), 1);
		assert_eq!(found[0].executable_path, "/opt/viewer");
		assert!(found[0].is_recommended);

		let reply = handler.handle(Request::GetAssociate { path: "/docs/a.txt".into() }.to_value_set().unwrap()).await.unwrap();
		assert_eq!(reply.text(SUCCESS).as_deref(), Some("[]"));
	}

	#[tokio::test]
	async fn quicklook_follows_the_configured_previewer() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("a.txt");
		fs::write(&file, "").unwrap();
		let (handler, _exits) = handler(dir.path());

		let reply = handler.handle(Request::CheckQuicklook.to_value_set().unwrap()).await.unwrap();
		assert_eq!(reply.flag(SUCCESS), Some(true));

		let reply = handler
			.handle(Request::Quicklook { path: file.display().to_string() }.to_value_set().unwrap())
			.await
			.unwrap();
		assert!(reply.contains_key(SUCCESS));

		let reply = handler.handle(Request::Quicklook { path: "/no/such/file".into() }.to_value_set().unwrap()).await.unwrap();
		assert!(reply.contains_key("Error"));
	}
}
