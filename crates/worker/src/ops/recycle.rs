//! The worker-side recycle bin.
//!
//! Layout under the root:
//!
//! ```text
//! files/<id>/<name>   the recycled item
//! info/<id>.json      its RecycleBinItem
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, warn};
use trustbridge_protocol::RecycleBinItem;
use uuid::Uuid;

use super::transfer::{move_path, remove_path};

#[derive(Debug, Clone)]
pub struct RecycleBin {
	root: PathBuf,
}

fn unix_now() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|elapsed| elapsed.as_secs()).unwrap_or_default()
}

fn remove_if_present(path: &Path) -> io::Result<()> {
	match remove_path(path) {
		Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
		other => other,
	}
}

impl RecycleBin {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	fn files_dir(&self) -> PathBuf {
		self.root.join("files")
	}

	fn info_dir(&self) -> PathBuf {
		self.root.join("info")
	}

	/// Moves `path` into the bin and returns where it went.
	pub fn recycle(&self, path: &Path) -> io::Result<PathBuf> {
		let metadata = fs::symlink_metadata(path)?;
		let original = std::path::absolute(path)?;
		let name = original
			.file_name()
			.ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, format!("{} has no file name", original.display())))?
			.to_os_string();

		let id = Uuid::new_v4().simple().to_string();
		let slot = self.files_dir().join(&id);
		fs::create_dir_all(&slot)?;
		fs::create_dir_all(self.info_dir())?;

		let recycled = slot.join(name);
		if let Err(err) = move_path(&original, &recycled) {
			let _ = fs::remove_dir(&slot);
			return Err(err);
		}

		let item = RecycleBinItem {
			original_path: original.display().to_string(),
			recycled_path: recycled.display().to_string(),
			deleted_at: unix_now(),
			is_directory: metadata.is_dir(),
		};
		let encoded = serde_json::to_vec_pretty(&item).map_err(io::Error::other)?;
		fs::write(self.info_dir().join(format!("{id}.json")), encoded)?;

		debug!(target = "trustbridge.worker", original = %item.original_path, recycled = %item.recycled_path, "item recycled");
		Ok(recycled)
	}

	/// Every recycled item, oldest first. Unreadable entries are skipped.
	pub fn items(&self) -> io::Result<Vec<RecycleBinItem>> {
		Ok(self.entries()?.into_iter().map(|(_, item)| item).collect())
	}

	fn entries(&self) -> io::Result<Vec<(PathBuf, RecycleBinItem)>> {
		let dir = match fs::read_dir(self.info_dir()) {
			Ok(dir) => dir,
			Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(err) => return Err(err),
		};

		let mut entries = Vec::new();
		for entry in dir {
			let path = entry?.path();
			if path.extension().is_none_or(|ext| ext != "json") {
				continue;
			}
			match fs::read(&path).and_then(|bytes| serde_json::from_slice::<RecycleBinItem>(&bytes).map_err(io::Error::other)) {
				Ok(item) => entries.push((path, item)),
				Err(err) => warn!(target = "trustbridge.worker", path = %path.display(), error = %err, "skipping unreadable recycle entry"),
			}
		}
		entries.sort_by(|(_, a), (_, b)| a.deleted_at.cmp(&b.deleted_at).then_with(|| a.original_path.cmp(&b.original_path)));
		Ok(entries)
	}

	fn find(&self, recycled_path: &str) -> io::Result<(PathBuf, RecycleBinItem)> {
		self.entries()?
			.into_iter()
			.find(|(_, item)| item.recycled_path == recycled_path)
			.ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{recycled_path} is not in the recycle bin")))
	}

	/// Drops the bookkeeping for one item once its content is gone.
	fn forget(&self, info: &Path, item: &RecycleBinItem) -> io::Result<()> {
		fs::remove_file(info)?;
		if let Some(slot) = Path::new(&item.recycled_path).parent() {
			let _ = fs::remove_dir(slot);
		}
		Ok(())
	}

	/// Moves a recycled item back to where it came from.
	pub fn restore(&self, recycled_path: &str) -> io::Result<PathBuf> {
		let (info, item) = self.find(recycled_path)?;
		let original = PathBuf::from(&item.original_path);
		if fs::symlink_metadata(&original).is_ok() {
			return Err(io::Error::new(io::ErrorKind::AlreadyExists, format!("{} already exists", original.display())));
		}
		if let Some(parent) = original.parent() {
			fs::create_dir_all(parent)?;
		}
		move_path(Path::new(&item.recycled_path), &original)?;
		self.forget(&info, &item)?;
		Ok(original)
	}

	/// Permanently removes one recycled item.
	pub fn delete(&self, recycled_path: &str) -> io::Result<()> {
		let (info, item) = self.find(recycled_path)?;
		remove_if_present(Path::new(&item.recycled_path))?;
		self.forget(&info, &item)
	}

	/// Permanently removes everything in the bin.
	pub fn empty(&self) -> io::Result<()> {
		remove_if_present(&self.files_dir())?;
		remove_if_present(&self.info_dir())
	}
}
