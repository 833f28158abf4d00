//! Privileged operations available on a leased controller.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use trustbridge_protocol::reply::{ErrorKey, OPERATION_RECORD, SUCCESS};
use trustbridge_protocol::{
	AssociationPackage, ContextMenuPackage, ExecuteAuthority, HiddenItemPackage, HyperlinkPackage, ProgressRecord, RecycleBinItem, Request, SourceItem,
	ValueSet, ValueSetExt,
};

use super::WorkerController;
use crate::collision::{CollisionResolver, plan_transfer};
use crate::error::{Error, Result};
use crate::recorder::{OperationRecord, RecordVerb};

const GENERIC: &[ErrorKey] = &[ErrorKey::Generic];
const RUN_ERRORS: &[ErrorKey] = &[ErrorKey::Failure, ErrorKey::Generic];
const RENAME_ERRORS: &[ErrorKey] = &[ErrorKey::Occupied, ErrorKey::Failure, ErrorKey::Generic];
const TRANSFER_ERRORS: &[ErrorKey] = &[ErrorKey::NotFound, ErrorKey::Failure, ErrorKey::Capture, ErrorKey::Generic];
const UNLOCK_ERRORS: &[ErrorKey] = &[ErrorKey::Failure, ErrorKey::NotOccupy, ErrorKey::NotFoundOrNotFile, ErrorKey::Generic];

/// Arguments for [`WorkerController::run`].
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
	pub path: String,
	pub parameters: Vec<String>,
	pub authority: ExecuteAuthority,
	pub create_no_window: bool,
	pub wait_for_exit: bool,
}

impl RunOptions {
	pub fn new(path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			..Self::default()
		}
	}

	pub fn args<I, S>(mut self, parameters: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.parameters = parameters.into_iter().map(Into::into).collect();
		self
	}

	pub fn wait(mut self) -> Self {
		self.wait_for_exit = true;
		self
	}
}

/// Arguments for [`WorkerController::search`].
#[derive(Debug, Clone)]
pub struct SearchOptions {
	pub base_location: String,
	pub search_word: String,
	pub as_regex: bool,
	pub ignore_case: bool,
	pub max_count: u32,
}

impl SearchOptions {
	pub fn new(base_location: impl Into<String>, search_word: impl Into<String>) -> Self {
		Self {
			base_location: base_location.into(),
			search_word: search_word.into(),
			as_regex: false,
			ignore_case: true,
			max_count: 100,
		}
	}
}

/// Joins parameters into one command line, quoting those with spaces that
/// are not quoted already.
pub fn join_parameters(parameters: &[String]) -> String {
	parameters
		.iter()
		.map(|parameter| {
			let quoted = parameter.len() >= 2 && parameter.starts_with('"') && parameter.ends_with('"');
			if parameter.contains(' ') && !quoted {
				format!("\"{parameter}\"")
			} else {
				parameter.clone()
			}
		})
		.collect::<Vec<_>>()
		.join(" ")
}

fn require_path(operation: &str, path: &str) -> Result<()> {
	if path.trim().is_empty() {
		return Err(Error::InvalidArgument(format!("{operation}: path must not be empty")));
	}
	Ok(())
}

/// Decodes the JSON text carried under `Success`.
fn success_payload<T: DeserializeOwned>(message: &ValueSet, operation: &'static str) -> Result<T> {
	let text = message.text(SUCCESS).ok_or(Error::NoResponse { operation })?;
	serde_json::from_str(&text).map_err(|err| {
		warn!(target = "trustbridge.pool", operation, error = %err, "undecodable success payload");
		Error::NoResponse { operation }
	})
}

fn operation_records(message: &ValueSet) -> Vec<String> {
	message
		.text(OPERATION_RECORD)
		.and_then(|text| serde_json::from_str(&text).ok())
		.unwrap_or_default()
}

fn display(path: &Path) -> String {
	path.display().to_string()
}

fn file_name(path: &str) -> Result<String> {
	Path::new(path)
		.file_name()
		.map(|name| name.to_string_lossy().into_owned())
		.ok_or_else(|| Error::InvalidArgument(format!("{path} has no file name")))
}

impl WorkerController {
	/// Starts an executable, optionally elevated and optionally waiting for it
	/// to exit.
	pub async fn run(&self, options: RunOptions) -> Result<()> {
		require_path("run", &options.path)?;
		let request = Request::RunExe {
			path: options.path,
			parameter: join_parameters(&options.parameters),
			authority: options.authority,
			create_no_window: options.create_no_window,
			should_wait_for_exit: options.wait_for_exit,
		};
		self.invoke(request, &[SUCCESS], RUN_ERRORS).await.map(drop)
	}

	/// Renames `path` within its parent directory and records the rename.
	pub async fn rename(&self, path: &str, desired_name: &str) -> Result<()> {
		let renamed = self.rename_item(path, desired_name).await?;
		self.context.recorder.push(vec![OperationRecord::new(path, RecordVerb::Rename, renamed).to_string()]);
		Ok(())
	}

	/// Returns the new path.
	async fn rename_item(&self, path: &str, desired_name: &str) -> Result<String> {
		require_path("rename", path)?;
		if desired_name.trim().is_empty() {
			return Err(Error::InvalidArgument("rename: new name must not be empty".into()));
		}
		let request = Request::Rename {
			path: path.to_string(),
			desired_name: desired_name.to_string(),
		};
		let message = self.invoke(request, &[SUCCESS], RENAME_ERRORS).await?;
		Ok(message
			.text(SUCCESS)
			.filter(|renamed| !renamed.is_empty())
			.unwrap_or_else(|| display(&Path::new(path).with_file_name(desired_name))))
	}

	/// Deletes `paths`, into the worker recycle bin unless `permanent`.
	/// Returns the undo records, which are also pushed to the recorder.
	pub async fn delete<F>(&self, paths: &[String], permanent: bool, undo: bool, on_progress: F) -> Result<Vec<String>>
	where
		F: FnMut(ProgressRecord) + Send,
	{
		if paths.is_empty() {
			return Ok(Vec::new());
		}
		let paths = paths.to_vec();
		let message = self
			.invoke_with_progress(
				|progress_token| Request::Delete {
					paths,
					permanent,
					progress_token,
					undo,
				},
				TRANSFER_ERRORS,
				on_progress,
			)
			.await?;
		Ok(self.record(&message))
	}

	/// Moves `sources` into `destination`, asking `resolver` about every folder
	/// name collision before anything is sent.
	pub async fn move_items<F>(&self, sources: &[PathBuf], destination: &Path, resolver: &dyn CollisionResolver, undo: bool, on_progress: F) -> Result<Vec<String>>
	where
		F: FnMut(ProgressRecord) + Send,
	{
		if sources.is_empty() {
			return Ok(Vec::new());
		}
		let sources = plan_transfer(sources, destination, resolver).await?;
		let destination = display(destination);
		let message = self
			.invoke_with_progress(
				|progress_token| Request::Move {
					sources,
					destination,
					progress_token,
					undo,
				},
				TRANSFER_ERRORS,
				on_progress,
			)
			.await?;
		Ok(self.record(&message))
	}

	/// Copies `sources` into `destination`; collisions as for [`move_items`](Self::move_items).
	pub async fn copy_items<F>(&self, sources: &[PathBuf], destination: &Path, resolver: &dyn CollisionResolver, undo: bool, on_progress: F) -> Result<Vec<String>>
	where
		F: FnMut(ProgressRecord) + Send,
	{
		if sources.is_empty() {
			return Ok(Vec::new());
		}
		let sources = plan_transfer(sources, destination, resolver).await?;
		let destination = display(destination);
		let message = self
			.invoke_with_progress(
				|progress_token| Request::Copy {
					sources,
					destination,
					progress_token,
					undo,
				},
				TRANSFER_ERRORS,
				on_progress,
			)
			.await?;
		Ok(self.record(&message))
	}

	/// Reverts the newest recorded operation, last record first. Returns
	/// `false` when there is nothing to undo.
	///
	/// The batch is consumed even when a step fails; the error names the
	/// record that could not be reverted.
	pub async fn undo_last(&self) -> Result<bool> {
		let Some(batch) = self.context.recorder.pop() else {
			return Ok(false);
		};
		for raw in batch.iter().rev() {
			let Some(record) = OperationRecord::parse(raw) else {
				warn!(target = "trustbridge.pool", controller = self.id(), record = %raw, "unreadable undo record skipped");
				continue;
			};
			self.revert(&record).await?;
			debug!(target = "trustbridge.pool", controller = self.id(), %record, "record reverted");
		}
		Ok(true)
	}

	async fn revert(&self, record: &OperationRecord) -> Result<()> {
		match record.verb {
			RecordVerb::Delete => {
				if record.target.is_empty() {
					return Err(Error::InvalidArgument(format!("{} was deleted permanently", record.source)));
				}
				if !self.restore_recycle_item(&record.target).await? {
					return Err(Error::Failure(format!("could not restore {}", record.source)));
				}
			}
			RecordVerb::Copy => {
				self.delete(std::slice::from_ref(&record.target), true, true, |_| {}).await?;
			}
			RecordVerb::Move => {
				let parent = Path::new(&record.source)
					.parent()
					.ok_or_else(|| Error::InvalidArgument(format!("{} has no parent", record.source)))?;
				let sources = vec![SourceItem::renamed(record.target.clone(), file_name(&record.source)?)];
				let destination = display(parent);
				self.invoke_with_progress(
					|progress_token| Request::Move {
						sources,
						destination,
						progress_token,
						undo: true,
					},
					TRANSFER_ERRORS,
					|_| {},
				)
				.await?;
			}
			RecordVerb::Rename => {
				self.rename_item(&record.target, &file_name(&record.source)?).await?;
			}
		}
		Ok(())
	}

	fn record(&self, message: &ValueSet) -> Vec<String> {
		let records = operation_records(message);
		self.context.recorder.push(records.clone());
		records
	}

	/// Asks the worker to release whatever holds `path` open.
	pub async fn unlock_occupy(&self, path: &str) -> Result<()> {
		require_path("unlock", path)?;
		let request = Request::UnlockOccupy { path: path.to_string() };
		self.invoke(request, &[SUCCESS], UNLOCK_ERRORS).await.map(drop)
	}

	pub async fn context_menu_items(&self, path: &str, include_extension_item: bool) -> Result<Vec<ContextMenuPackage>> {
		if path.trim().is_empty() {
			return Ok(Vec::new());
		}
		let request = Request::GetContextMenuItems {
			path: path.to_string(),
			include_extension_item,
		};
		let message = self.invoke(request, &[SUCCESS], GENERIC).await?;
		success_payload(&message, "Execute_GetContextMenuItems")
	}

	pub async fn invoke_context_menu_item(&self, item: &ContextMenuPackage) -> Result<()> {
		let request = Request::InvokeContextMenuItem {
			path: item.belong_to.clone(),
			id: item.id,
			verb: item.verb.clone(),
		};
		self.invoke(request, &[SUCCESS], GENERIC).await.map(drop)
	}

	pub async fn create_link(&self, package: HyperlinkPackage) -> Result<()> {
		require_path("create link", &package.link_path)?;
		self.invoke(Request::CreateLink { package }, &[SUCCESS], GENERIC).await.map(drop)
	}

	pub async fn hyperlink_info(&self, path: &str) -> Result<HyperlinkPackage> {
		require_path("hyperlink info", path)?;
		let request = Request::GetHyperlinkInfo { path: path.to_string() };
		let message = self.invoke(request, &[SUCCESS], GENERIC).await?;
		success_payload(&message, "Execute_GetHyperlinkInfo")
	}

	/// Resolves an environment variable in the worker's environment.
	pub async fn variable_path(&self, variable: &str) -> Result<String> {
		let request = Request::GetVariablePath { variable: variable.to_string() };
		let message = self.invoke(request, &[SUCCESS], GENERIC).await?;
		Ok(message.text(SUCCESS).unwrap_or_default())
	}

	pub async fn mime_type(&self, path: &str) -> Result<String> {
		require_path("mime type", path)?;
		let request = Request::GetMimeContentType { path: path.to_string() };
		let message = self.invoke(request, &[SUCCESS], GENERIC).await?;
		Ok(message.text(SUCCESS).unwrap_or_default())
	}

	/// Metadata for an item the client cannot stat. `None` for an empty path.
	pub async fn hidden_item_info(&self, path: &str) -> Result<Option<HiddenItemPackage>> {
		if path.trim().is_empty() {
			return Ok(None);
		}
		let request = Request::GetHiddenItemInfo { path: path.to_string() };
		let message = self.invoke(request, &[SUCCESS], GENERIC).await?;
		success_payload(&message, "Execute_GetHiddenItemInfo").map(Some)
	}

	/// Applications that can open `path`, default handlers first. Empty when
	/// the worker declines.
	pub async fn associations(&self, path: &str) -> Result<Vec<AssociationPackage>> {
		if path.trim().is_empty() {
			return Ok(Vec::new());
		}
		let request = Request::GetAssociate { path: path.to_string() };
		match self.invoke(request, &[SUCCESS], GENERIC).await {
			Ok(message) => success_payload(&message, "Execute_Get_Associate"),
			Err(Error::Remote(message)) => {
				debug!(target = "trustbridge.pool", controller = self.id(), %path, %message, "no associations");
				Ok(Vec::new())
			}
			Err(err) => Err(err),
		}
	}

	pub async fn quicklook_available(&self) -> Result<bool> {
		match self.invoke(Request::CheckQuicklook, &[SUCCESS], GENERIC).await {
			Ok(message) => Ok(message.flag(SUCCESS).unwrap_or(false)),
			Err(Error::Remote(_)) => Ok(false),
			Err(err) => Err(err),
		}
	}

	/// Opens `path` in the worker's previewer.
	pub async fn view_with_quicklook(&self, path: &str) -> Result<()> {
		require_path("quicklook", path)?;
		self.invoke(Request::Quicklook { path: path.to_string() }, &[SUCCESS], GENERIC).await.map(drop)
	}

	pub async fn everything_available(&self) -> Result<bool> {
		let message = self.invoke(Request::CheckEverythingAvailable, &[SUCCESS], GENERIC).await?;
		Ok(message.flag(SUCCESS).unwrap_or(false))
	}

	pub async fn search(&self, options: SearchOptions) -> Result<Vec<String>> {
		require_path("search", &options.base_location)?;
		let request = Request::SearchByEverything {
			base_location: options.base_location,
			search_word: options.search_word,
			search_as_regex: options.as_regex,
			ignore_case: options.ignore_case,
			max_count: options.max_count,
		};
		let message = self.invoke(request, &[SUCCESS], GENERIC).await?;
		success_payload(&message, "Execute_SearchByEverything")
	}

	pub async fn recycle_bin_items(&self) -> Result<Vec<RecycleBinItem>> {
		let message = self.invoke(Request::GetRecycleBinItems, &[SUCCESS], GENERIC).await?;
		success_payload(&message, "Execute_Get_RecycleBinItems")
	}

	pub async fn empty_recycle_bin(&self) -> Result<bool> {
		self.invoke_flag(Request::EmptyRecycleBin).await
	}

	pub async fn restore_recycle_item(&self, path: &str) -> Result<bool> {
		require_path("restore", path)?;
		self.invoke_flag(Request::RestoreRecycleItem { path: path.to_string() }).await
	}

	pub async fn delete_recycle_item(&self, path: &str) -> Result<bool> {
		require_path("delete recycled item", path)?;
		self.invoke_flag(Request::DeleteRecycleItem { path: path.to_string() }).await
	}

	pub async fn eject_device(&self, path: &str) -> Result<bool> {
		require_path("eject", path)?;
		self.invoke_flag(Request::EjectDevice { path: path.to_string() }).await
	}

	/// Success means `true`; a generic worker error means `false`. Transport
	/// failures still surface as errors.
	async fn invoke_flag(&self, request: Request) -> Result<bool> {
		let operation = request.kind();
		match self.invoke(request, &[SUCCESS], GENERIC).await {
			Ok(_) => Ok(true),
			Err(Error::Remote(message)) => {
				debug!(target = "trustbridge.pool", controller = self.id(), operation, %message, "worker declined");
				Ok(false)
			}
			Err(err) => Err(err),
		}
	}
}
