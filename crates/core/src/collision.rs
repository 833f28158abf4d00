//! Name collision handling for move and copy.
//!
//! Collisions are decided on the client before the request is sent: every
//! source folder whose name already exists in the destination is put to a
//! [`CollisionResolver`], and the answer travels with the source as
//! [`SourceItem::rename_to`]. Files are never put to the resolver; they go
//! out without a rename and replace whatever has their name.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;
use trustbridge_protocol::SourceItem;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionChoice {
	/// Merge into the existing folder.
	UseExisting,
	/// Place the item under a generated `name (n)` instead.
	GenerateUniqueName,
}

/// Decides what happens to a source folder whose name is already taken.
#[async_trait]
pub trait CollisionResolver: Send + Sync {
	async fn resolve(&self, source: &Path, existing: &Path) -> CollisionChoice;
}

/// Always merges or overwrites.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeIntoExisting;

#[async_trait]
impl CollisionResolver for MergeIntoExisting {
	async fn resolve(&self, _source: &Path, _existing: &Path) -> CollisionChoice {
		CollisionChoice::UseExisting
	}
}

/// Always keeps both items.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeepBoth;

#[async_trait]
impl CollisionResolver for KeepBoth {
	async fn resolve(&self, _source: &Path, _existing: &Path) -> CollisionChoice {
		CollisionChoice::GenerateUniqueName
	}
}

/// Returns the first `stem (n).ext` in `dir` that neither exists nor is in
/// `reserved`. Directories keep their whole name as the stem.
pub fn unique_name(dir: &Path, name: &str, is_dir: bool, reserved: &HashSet<String>) -> String {
	let (stem, extension) = match name.rfind('.') {
		Some(dot) if !is_dir && dot > 0 => (&name[..dot], &name[dot..]),
		_ => (name, ""),
	};

	let mut n = 1u32;
	loop {
		let candidate = format!("{stem} ({n}){extension}");
		if !reserved.contains(&candidate) && !dir.join(&candidate).exists() {
			return candidate;
		}
		n += 1;
	}
}

/// Decides a destination name for every source.
///
/// Only folders are put to `resolver`. A missing source is
/// [`Error::NotFound`]. Names generated here are reserved so two sources
/// never end up with the same generated name.
pub async fn plan_transfer(sources: &[PathBuf], destination: &Path, resolver: &dyn CollisionResolver) -> Result<Vec<SourceItem>> {
	let mut reserved = HashSet::new();
	let mut planned = Vec::with_capacity(sources.len());

	for source in sources {
		let metadata = match tokio::fs::symlink_metadata(source).await {
			Ok(metadata) => metadata,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
				return Err(Error::NotFound(source.display().to_string()));
			}
			Err(err) => return Err(err.into()),
		};
		let Some(name) = source.file_name().map(|name| name.to_string_lossy().into_owned()) else {
			return Err(Error::InvalidArgument(format!("{} has no file name", source.display())));
		};

		let existing = destination.join(&name);
		let taken = metadata.is_dir() && (reserved.contains(&name) || tokio::fs::symlink_metadata(&existing).await.is_ok());
		let item = if !taken {
			SourceItem::keep_name(source.display().to_string())
		} else {
			match resolver.resolve(source, &existing).await {
				CollisionChoice::UseExisting => SourceItem::keep_name(source.display().to_string()),
				CollisionChoice::GenerateUniqueName => {
					let renamed = unique_name(destination, &name, true, &reserved);
					debug!(target = "trustbridge.pool", source = %source.display(), %renamed, "folder name collision; keeping both");
					reserved.insert(renamed.clone());
					SourceItem::renamed(source.display().to_string(), renamed)
				}
			}
		};
		if item.rename_to.is_none() {
			reserved.insert(name);
		}
		planned.push(item);
	}

	Ok(planned)
}

#[cfg(test)]
mod tests {
	use std::fs;

	use super::*;

	#[test]
	fn unique_name_skips_existing_and_reserved() {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join("a (1).txt"), "").unwrap();
		let reserved = HashSet::from(["a (2).txt".to_string()]);

		assert_eq!(unique_name(dir.path(), "a.txt", false, &reserved), "a (3).txt");
		assert_eq!(unique_name(dir.path(), "archive.tar.gz", false, &HashSet::new()), "archive.tar (1).gz");
	}

	#[test]
	fn directories_and_dotfiles_keep_whole_name() {
		let dir = tempfile::tempdir().unwrap();
		assert_eq!(unique_name(dir.path(), "photos.2024", true, &HashSet::new()), "photos.2024 (1)");
		assert_eq!(unique_name(dir.path(), ".profile", false, &HashSet::new()), ".profile (1)");
	}

	#[tokio::test]
	async fn plan_leaves_free_names_alone() {
		let src = tempfile::tempdir().unwrap();
		let dst = tempfile::tempdir().unwrap();
		let file = src.path().join("a.txt");
		fs::write(&file, "a").unwrap();

		let plan = plan_transfer(&[file.clone()], dst.path(), &KeepBoth).await.unwrap();
		assert_eq!(plan, vec![SourceItem::keep_name(file.display().to_string())]);
	}

	#[tokio::test]
	async fn plan_asks_resolver_on_folder_collision() {
		let src = tempfile::tempdir().unwrap();
		let dst = tempfile::tempdir().unwrap();
		let album = src.path().join("album");
		fs::create_dir(&album).unwrap();
		fs::create_dir(dst.path().join("album")).unwrap();

		let merged = plan_transfer(&[album.clone()], dst.path(), &MergeIntoExisting).await.unwrap();
		assert_eq!(merged[0].rename_to, None);

		let kept = plan_transfer(&[album.clone()], dst.path(), &KeepBoth).await.unwrap();
		assert_eq!(kept[0].rename_to.as_deref(), Some("album (1)"));
	}

	/// Counts how often it is consulted.
	#[derive(Default)]
	struct Counting(std::sync::atomic::AtomicUsize);

	#[async_trait]
	impl CollisionResolver for Counting {
		async fn resolve(&self, _source: &Path, _existing: &Path) -> CollisionChoice {
			self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
			CollisionChoice::GenerateUniqueName
		}
	}

	#[tokio::test]
	async fn file_collisions_pass_through_unasked() {
		let src = tempfile::tempdir().unwrap();
		let dst = tempfile::tempdir().unwrap();
		let file = src.path().join("a.txt");
		fs::write(&file, "new").unwrap();
		fs::write(dst.path().join("a.txt"), "old").unwrap();

		let resolver = Counting::default();
		let plan = plan_transfer(&[file.clone()], dst.path(), &resolver).await.unwrap();
		assert_eq!(plan, vec![SourceItem::keep_name(file.display().to_string())]);
		assert_eq!(resolver.0.load(std::sync::atomic::Ordering::SeqCst), 0);
	}

	#[tokio::test]
	async fn same_folder_name_from_two_sources_is_renamed() {
		let one = tempfile::tempdir().unwrap();
		let two = tempfile::tempdir().unwrap();
		let dst = tempfile::tempdir().unwrap();
		let first = one.path().join("notes");
		let second = two.path().join("notes");
		fs::create_dir(&first).unwrap();
		fs::create_dir(&second).unwrap();

		let plan = plan_transfer(&[first, second], dst.path(), &KeepBoth).await.unwrap();
		assert_eq!(plan[0].rename_to, None);
		assert_eq!(plan[1].rename_to.as_deref(), Some("notes (1)"));
	}

	#[tokio::test]
	async fn missing_source_is_not_found() {
		let dst = tempfile::tempdir().unwrap();
		let err = plan_transfer(&[dst.path().join("ghost")], dst.path(), &KeepBoth).await.unwrap_err();
		assert!(matches!(err, Error::NotFound(_)));
	}
}
