//! Delete, copy and move.

use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;
use trustbridge_protocol::{ErrorKey, ProgressPhase, ProgressRecord, SourceItem};

use super::recycle::RecycleBin;
use super::{OpError, OpResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verb {
	Copy,
	Move,
}

impl Verb {
	fn phase(self) -> ProgressPhase {
		match self {
			Verb::Copy => ProgressPhase::Copying,
			Verb::Move => ProgressPhase::Moving,
		}
	}
}

impl fmt::Display for Verb {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Verb::Copy => "Copy",
			Verb::Move => "Move",
		})
	}
}

pub(crate) fn remove_path(path: &Path) -> io::Result<()> {
	if fs::symlink_metadata(path)?.is_dir() {
		fs::remove_dir_all(path)
	} else {
		fs::remove_file(path)
	}
}

/// Copies `src` to `dst`. Directories merge into an existing `dst`; files and
/// links overwrite.
pub(crate) fn copy_path(src: &Path, dst: &Path) -> io::Result<()> {
	let metadata = fs::symlink_metadata(src)?;
	if metadata.file_type().is_symlink() {
		let target = fs::read_link(src)?;
		if fs::symlink_metadata(dst).is_ok() {
			remove_path(dst)?;
		}
		return std::os::unix::fs::symlink(target, dst);
	}
	if metadata.is_dir() {
		fs::create_dir_all(dst)?;
		for entry in fs::read_dir(src)? {
			let entry = entry?;
			copy_path(&entry.path(), &dst.join(entry.file_name()))?;
		}
		return Ok(());
	}
	fs::copy(src, dst).map(drop)
}

/// Moves `src` to `dst`, merging directories and falling back to copy and
/// remove when a rename is not possible (for instance across filesystems).
pub(crate) fn move_path(src: &Path, dst: &Path) -> io::Result<()> {
	let src_is_dir = fs::symlink_metadata(src)?.is_dir();
	if let Ok(existing) = fs::symlink_metadata(dst) {
		match (src_is_dir, existing.is_dir()) {
			(true, true) => {
				for entry in fs::read_dir(src)? {
					let entry = entry?;
					move_path(&entry.path(), &dst.join(entry.file_name()))?;
				}
				return fs::remove_dir(src);
			}
			(false, false) => {}
			_ => {
				return Err(io::Error::new(
					io::ErrorKind::AlreadyExists,
					format!("{} exists with a different type", dst.display()),
				));
			}
		}
	}

	match fs::rename(src, dst) {
		Ok(()) => Ok(()),
		Err(err) if err.kind() == io::ErrorKind::NotFound => Err(err),
		Err(err) => {
			debug!(target = "trustbridge.worker", src = %src.display(), error = %err, "rename failed; copying instead");
			copy_path(src, dst)?;
			remove_path(src)
		}
	}
}

/// Deletes every path, into `bin` unless `permanent`. Records are kept only
/// for recycled items of a non-undo delete.
pub(crate) fn delete(paths: &[String], permanent: bool, undo: bool, bin: &RecycleBin, progress: &mut dyn FnMut(ProgressRecord)) -> OpResult<Vec<String>> {
	let mut records = Vec::new();
	for (index, raw) in paths.iter().enumerate() {
		let path = Path::new(raw);
		if permanent {
			remove_path(path).map_err(|err| OpError::from_io(path, &err))?;
		} else {
			let recycled = bin.recycle(path).map_err(|err| OpError::from_io(path, &err))?;
			if !undo {
				records.push(format!("{raw}||Delete||{}", recycled.display()));
			}
		}
		progress(ProgressRecord::new(raw.clone(), ProgressRecord::percent_of(index + 1, paths.len()), ProgressPhase::Deleting));
	}
	Ok(records)
}

/// Copies or moves `sources` into `destination`, honoring each item's
/// `rename_to`.
pub(crate) fn transfer(verb: Verb, sources: &[SourceItem], destination: &str, undo: bool, progress: &mut dyn FnMut(ProgressRecord)) -> OpResult<Vec<String>> {
	let destination = Path::new(destination);
	if !destination.is_dir() {
		return Err(OpError::new(ErrorKey::NotFound, format!("{} is not a directory", destination.display())));
	}

	let mut records = Vec::new();
	for (index, item) in sources.iter().enumerate() {
		let source = Path::new(&item.path);
		let metadata = fs::symlink_metadata(source).map_err(|err| OpError::from_io(source, &err))?;
		let name = match &item.rename_to {
			Some(name) => OsString::from(name),
			None => source
				.file_name()
				.map(OsString::from)
				.ok_or_else(|| OpError::new(ErrorKey::Failure, format!("{} has no file name", item.path)))?,
		};
		let target = destination.join(name);

		if metadata.is_dir() && destination.starts_with(source) && target != source {
			return Err(OpError::new(ErrorKey::Failure, format!("cannot place {} inside itself", item.path)));
		}

		if target == source {
			debug!(target = "trustbridge.worker", %verb, source = %item.path, "source and target are the same; skipping");
		} else {
			let done = match verb {
				Verb::Copy => copy_path(source, &target),
				Verb::Move => move_path(source, &target),
			};
			done.map_err(|err| OpError::from_io(source, &err))?;
		}

		if !undo {
			records.push(format!("{}||{verb}||{}", item.path, target.display()));
		}
		progress(ProgressRecord::new(item.path.clone(), ProgressRecord::percent_of(index + 1, sources.len()), verb.phase()));
	}
	Ok(records)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn path_string(path: &Path) -> String {
		path.display().to_string()
	}

	#[test]
	fn copy_merges_into_existing_directory() {
		let dir = tempfile::tempdir().unwrap();
		let src = dir.path().join("src/photos");
		let dst = dir.path().join("dst");
		fs::create_dir_all(&src).unwrap();
		fs::create_dir_all(dst.join("photos")).unwrap();
		fs::write(src.join("new.jpg"), "new").unwrap();
		fs::write(dst.join("photos/old.jpg"), "old").unwrap();

		let mut seen = Vec::new();
		let sources = [SourceItem::keep_name(path_string(&src))];
		let records = transfer(Verb::Copy, &sources, &path_string(&dst), false, &mut |record| seen.push(record)).unwrap();

		assert!(dst.join("photos/new.jpg").exists());
		assert!(dst.join("photos/old.jpg").exists());
		assert!(src.join("new.jpg").exists());
		assert_eq!(records, vec![format!("{}||Copy||{}", src.display(), dst.join("photos").display())]);
		assert_eq!(seen.len(), 1);
		assert_eq!(seen[0].phase, ProgressPhase::Copying);
		assert_eq!(seen[0].percent, 100);
	}

	#[test]
	fn rename_to_keeps_both() {
		let dir = tempfile::tempdir().unwrap();
		let src = dir.path().join("a.txt");
		let dst = dir.path().join("dst");
		fs::create_dir(&dst).unwrap();
		fs::write(&src, "new").unwrap();
		fs::write(dst.join("a.txt"), "old").unwrap();

		let sources = [SourceItem::renamed(path_string(&src), "a (1).txt")];
		transfer(Verb::Move, &sources, &path_string(&dst), true, &mut |_| {}).unwrap();

		assert_eq!(fs::read_to_string(dst.join("a.txt")).unwrap(), "old");
		assert_eq!(fs::read_to_string(dst.join("a (1).txt")).unwrap(), "new");
		assert!(!src.exists());
	}

	#[test]
	fn move_merges_directories_and_removes_source() {
		let dir = tempfile::tempdir().unwrap();
		let src = dir.path().join("docs");
		let dst = dir.path().join("dst");
		fs::create_dir_all(src.join("nested")).unwrap();
		fs::create_dir_all(dst.join("docs")).unwrap();
		fs::write(src.join("nested/a.md"), "a").unwrap();
		fs::write(dst.join("docs/b.md"), "b").unwrap();

		let sources = [SourceItem::keep_name(path_string(&src))];
		let records = transfer(Verb::Move, &sources, &path_string(&dst), true, &mut |_| {}).unwrap();

		assert!(records.is_empty());
		assert!(!src.exists());
		assert!(dst.join("docs/nested/a.md").exists());
		assert!(dst.join("docs/b.md").exists());
	}

	#[test]
	fn copy_with_merge_is_idempotent() {
		let dir = tempfile::tempdir().unwrap();
		let src = dir.path().join("tree");
		let dst = dir.path().join("dst");
		fs::create_dir_all(src.join("x")).unwrap();
		fs::create_dir(&dst).unwrap();
		fs::write(src.join("x/f"), "f").unwrap();

		let sources = [SourceItem::keep_name(path_string(&src))];
		transfer(Verb::Copy, &sources, &path_string(&dst), false, &mut |_| {}).unwrap();
		transfer(Verb::Copy, &sources, &path_string(&dst), false, &mut |_| {}).unwrap();

		let entries: Vec<_> = fs::read_dir(dst.join("tree/x")).unwrap().collect();
		assert_eq!(entries.len(), 1);
		assert_eq!(fs::read_to_string(dst.join("tree/x/f")).unwrap(), "f");
	}

	#[test]
	fn copy_onto_itself_leaves_file_intact() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("same.txt");
		fs::write(&file, "keep").unwrap();

		let sources = [SourceItem::keep_name(path_string(&file))];
		transfer(Verb::Copy, &sources, &path_string(dir.path()), false, &mut |_| {}).unwrap();
		assert_eq!(fs::read_to_string(&file).unwrap(), "keep");
	}

	#[test]
	fn directory_into_itself_is_refused() {
		let dir = tempfile::tempdir().unwrap();
		let src = dir.path().join("outer");
		fs::create_dir_all(src.join("inner")).unwrap();

		let sources = [SourceItem::keep_name(path_string(&src))];
		let err = transfer(Verb::Copy, &sources, &path_string(&src.join("inner")), false, &mut |_| {}).unwrap_err();
		assert_eq!(err.key, ErrorKey::Failure);
	}

	#[test]
	fn missing_source_and_destination_are_not_found() {
		let dir = tempfile::tempdir().unwrap();
		let sources = [SourceItem::keep_name(path_string(&dir.path().join("ghost")))];

		let err = transfer(Verb::Copy, &sources, &path_string(dir.path()), false, &mut |_| {}).unwrap_err();
		assert_eq!(err.key, ErrorKey::NotFound);

		let err = transfer(Verb::Copy, &[], &path_string(&dir.path().join("nowhere")), false, &mut |_| {}).unwrap_err();
		assert_eq!(err.key, ErrorKey::NotFound);
	}

	#[test]
	fn permanent_delete_keeps_no_records() {
		let dir = tempfile::tempdir().unwrap();
		let bin = RecycleBin::new(dir.path().join("bin"));
		let a = dir.path().join("a");
		let b = dir.path().join("b");
		fs::write(&a, "").unwrap();
		fs::create_dir_all(b.join("c")).unwrap();

		let mut seen = Vec::new();
		let records = delete(&[path_string(&a), path_string(&b)], true, false, &bin, &mut |record| seen.push(record)).unwrap();

		assert!(records.is_empty());
		assert!(!a.exists() && !b.exists());
		assert_eq!(seen.iter().map(|record| record.percent).collect::<Vec<_>>(), vec![50, 100]);
		assert!(bin.items().unwrap().is_empty());
	}

	#[test]
	fn recycled_delete_records_where_items_went() {
		let dir = tempfile::tempdir().unwrap();
		let bin = RecycleBin::new(dir.path().join("bin"));
		let file = dir.path().join("report.txt");
		fs::write(&file, "r").unwrap();

		let records = delete(&[path_string(&file)], false, false, &bin, &mut |_| {}).unwrap();

		let items = bin.items().unwrap();
		assert_eq!(items.len(), 1);
		assert_eq!(records, vec![format!("{}||Delete||{}", file.display(), items[0].recycled_path)]);
		assert!(!file.exists());
	}

	#[test]
	fn deleting_missing_path_is_not_found() {
		let dir = tempfile::tempdir().unwrap();
		let bin = RecycleBin::new(dir.path().join("bin"));
		let err = delete(&[path_string(&dir.path().join("ghost"))], true, false, &bin, &mut |_| {}).unwrap_err();
		assert_eq!(err.key, ErrorKey::NotFound);
	}
}
