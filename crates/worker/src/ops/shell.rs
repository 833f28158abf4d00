//! Process, link, lookup and device operations.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::UNIX_EPOCH;

use tracing::{debug, info};
use trustbridge_protocol::{ErrorKey, HiddenItemPackage, HyperlinkPackage, ValueSet, reply};

use super::{OpError, OpResult, success_json};

/// Splits a command line on whitespace, keeping double-quoted runs together.
pub(crate) fn split_parameters(line: &str) -> Vec<String> {
	let mut parameters = Vec::new();
	let mut current = String::new();
	let mut quoted = false;
	let mut pending = false;

	for ch in line.chars() {
		match ch {
			'"' => {
				quoted = !quoted;
				pending = true;
			}
			ch if ch.is_whitespace() && !quoted => {
				if pending {
					parameters.push(std::mem::take(&mut current));
					pending = false;
				}
			}
			ch => {
				current.push(ch);
				pending = true;
			}
		}
	}
	if pending {
		parameters.push(current);
	}
	parameters
}

pub(crate) async fn run(path: &str, parameter: &str, wait_for_exit: bool) -> OpResult<ValueSet> {
	let args = split_parameters(parameter);
	let mut child = tokio::process::Command::new(path)
		.args(&args)
		.stdin(Stdio::null())
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.spawn()
		.map_err(|err| OpError::new(ErrorKey::Failure, format!("failed to start {path}: {err}")))?;
	info!(target = "trustbridge.worker", %path, pid = child.id(), wait_for_exit, "process started");

	if !wait_for_exit {
		tokio::spawn(async move {
			let _ = child.wait().await;
		});
		return Ok(reply::success());
	}

	let status = child.wait().await.map_err(|err| OpError::new(ErrorKey::Failure, err.to_string()))?;
	debug!(target = "trustbridge.worker", %path, %status, "process exited");
	Ok(reply::success_with(status.code().unwrap_or(-1)))
}

pub(crate) fn create_link(package: &HyperlinkPackage) -> OpResult<ValueSet> {
	let link = Path::new(&package.link_path);
	if fs::symlink_metadata(link).is_ok() {
		return Err(OpError::generic(format!("{} already exists", link.display())));
	}
	std::os::unix::fs::symlink(&package.link_target, link).map_err(|err| OpError::generic(format!("{}: {err}", link.display())))?;
	Ok(reply::success())
}

pub(crate) fn hyperlink_info(path: &str) -> OpResult<ValueSet> {
	let target = fs::read_link(path).map_err(|err| OpError::generic(format!("{path}: {err}")))?;
	success_json(&HyperlinkPackage {
		link_path: path.to_string(),
		link_target: target.display().to_string(),
		..HyperlinkPackage::default()
	})
}

pub(crate) fn variable_path(variable: &str) -> OpResult<ValueSet> {
	let name = variable.trim_matches('%');
	std::env::var_os(name)
		.map(|value| reply::success_with(value.to_string_lossy().into_owned()))
		.ok_or_else(|| OpError::generic(format!("environment variable {name} is not set")))
}

pub(crate) fn mime_type(path: &str) -> ValueSet {
	reply::success_with(mime_guess::from_path(path).first_or_octet_stream().essence_str().to_string())
}

pub(crate) fn hidden_item_info(path: &str) -> OpResult<ValueSet> {
	let metadata = fs::symlink_metadata(path).map_err(|err| OpError::generic(format!("{path}: {err}")))?;
	let display_type = if metadata.is_dir() {
		"Folder".to_string()
	} else {
		mime_guess::from_path(path).first().map(|mime| mime.essence_str().to_string()).unwrap_or_else(|| "File".to_string())
	};
	let modified = metadata
		.modified()
		.ok()
		.and_then(|time| time.duration_since(UNIX_EPOCH).ok())
		.map(|elapsed| elapsed.as_secs());

	success_json(&HiddenItemPackage {
		display_type,
		is_directory: metadata.is_dir(),
		size: if metadata.is_dir() { 0 } else { metadata.len() },
		modified,
	})
}

enum Matcher {
	Regex(regex_lite::Regex),
	Substring { needle: String, ignore_case: bool },
}

impl Matcher {
	fn new(word: &str, as_regex: bool, ignore_case: bool) -> OpResult<Self> {
		if as_regex {
			let pattern = if ignore_case { format!("(?i){word}") } else { word.to_string() };
			let regex = regex_lite::Regex::new(&pattern).map_err(|err| OpError::generic(format!("invalid pattern: {err}")))?;
			return Ok(Matcher::Regex(regex));
		}
		let needle = if ignore_case { word.to_lowercase() } else { word.to_string() };
		Ok(Matcher::Substring { needle, ignore_case })
	}

	fn matches(&self, name: &str) -> bool {
		match self {
			Matcher::Regex(regex) => regex.is_match(name),
			Matcher::Substring { needle, ignore_case: true } => name.to_lowercase().contains(needle.as_str()),
			Matcher::Substring { needle, ignore_case: false } => name.contains(needle.as_str()),
		}
	}
}

/// Walks `base` breadth first and returns paths whose file name matches.
/// `max_count == 0` means no limit. Symlinked directories are not followed.
pub(crate) fn search(base: &str, word: &str, as_regex: bool, ignore_case: bool, max_count: u32) -> OpResult<Vec<String>> {
	let matcher = Matcher::new(word, as_regex, ignore_case)?;
	let limit = if max_count == 0 { usize::MAX } else { max_count as usize };

	let mut found = Vec::new();
	let mut pending = std::collections::VecDeque::from([PathBuf::from(base)]);
	while let Some(dir) = pending.pop_front() {
		let entries = match fs::read_dir(&dir) {
			Ok(entries) => entries,
			Err(err) if dir == Path::new(base) => return Err(OpError::generic(format!("{base}: {err}"))),
			Err(err) => {
				debug!(target = "trustbridge.worker", dir = %dir.display(), error = %err, "skipping unreadable directory");
				continue;
			}
		};

		for entry in entries.flatten() {
			let path = entry.path();
			if entry.file_type().is_ok_and(|kind| kind.is_dir()) {
				pending.push_back(path.clone());
			}
			if matcher.matches(&entry.file_name().to_string_lossy()) {
				found.push(path.display().to_string());
				if found.len() >= limit {
					return Ok(found);
				}
			}
		}
	}
	Ok(found)
}

pub(crate) async fn eject(path: &str) -> OpResult<ValueSet> {
	let output = tokio::process::Command::new("eject")
		.arg(path)
		.stdin(Stdio::null())
		.output()
		.await
		.map_err(|err| OpError::generic(format!("failed to run eject: {err}")))?;
	if output.status.success() {
		info!(target = "trustbridge.worker", %path, "device ejected");
		return Ok(reply::success());
	}
	let stderr = String::from_utf8_lossy(&output.stderr);
	Err(OpError::generic(format!("eject {path} failed: {}", stderr.trim())))
}

/// Nothing on this platform reports which process holds a file, so an
/// existing file is always reported as not occupied.
pub(crate) fn unlock_occupy(path: &str) -> OpResult<ValueSet> {
	match fs::metadata(path) {
		Ok(metadata) if metadata.is_file() => Err(OpError::new(ErrorKey::NotOccupy, format!("no process holds {path}"))),
		Ok(_) => Err(OpError::new(ErrorKey::NotFoundOrNotFile, format!("{path} is not a file"))),
		Err(err) if err.kind() == io::ErrorKind::NotFound => Err(OpError::new(ErrorKey::NotFoundOrNotFile, format!("{path} does not exist"))),
		Err(err) => Err(OpError::new(ErrorKey::Failure, format!("{path}: {err}"))),
	}
}

/// Absolute previewers must exist; bare names are looked up on `PATH`.
pub(crate) fn previewer_available(previewer: &str) -> bool {
	if Path::new(previewer).is_absolute() {
		return Path::new(previewer).is_file();
	}
	which::which(previewer).is_ok()
}

/// Opens `path` in the previewer without waiting for the window to close.
pub(crate) fn quicklook(previewer: &str, path: &str) -> OpResult<ValueSet> {
	if fs::symlink_metadata(path).is_err() {
		return Err(OpError::generic(format!("{path} does not exist")));
	}
	let mut child = tokio::process::Command::new(previewer)
		.arg(path)
		.stdin(Stdio::null())
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.spawn()
		.map_err(|err| OpError::generic(format!("failed to start {previewer}: {err}")))?;
	info!(target = "trustbridge.worker", %path, %previewer, "preview opened");
	tokio::spawn(async move {
		let _ = child.wait().await;
	});
	Ok(reply::success())
}

#[cfg(test)]
mod tests {
	use trustbridge_protocol::ValueSetExt;
	use trustbridge_protocol::reply::SUCCESS;

	use super::*;

	#[test]
	fn split_respects_quotes() {
		assert_eq!(split_parameters(r#"-v "my file.txt" --x=1"#), vec!["-v", "my file.txt", "--x=1"]);
		assert_eq!(split_parameters(r#"  "" a  "#), vec!["", "a"]);
		assert!(split_parameters("   ").is_empty());
	}

	#[test]
	fn link_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let link = dir.path().join("link");
		let package = HyperlinkPackage {
			link_path: link.display().to_string(),
			link_target: "/etc/hosts".into(),
			..HyperlinkPackage::default()
		};

		create_link(&package).unwrap();
		assert!(create_link(&package).is_err());

		let info = hyperlink_info(&package.link_path).unwrap();
		let decoded: HyperlinkPackage = serde_json::from_str(&info.text(SUCCESS).unwrap()).unwrap();
		assert_eq!(decoded.link_target, "/etc/hosts");
	}

	#[test]
	fn mime_by_extension() {
		assert_eq!(mime_type("/a/b.json").text(SUCCESS).as_deref(), Some("application/json"));
		assert_eq!(mime_type("/a/b").text(SUCCESS).as_deref(), Some("application/octet-stream"));
	}

	#[test]
	fn hidden_info_for_directory_and_file() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("a.txt");
		fs::write(&file, "12345").unwrap();

		let info: HiddenItemPackage = serde_json::from_str(&hidden_item_info(&file.display().to_string()).unwrap().text(SUCCESS).unwrap()).unwrap();
		assert_eq!(info.size, 5);
		assert!(!info.is_directory);
		assert_eq!(info.display_type, "text/plain");

		let info: HiddenItemPackage = serde_json::from_str(&hidden_item_info(&dir.path().display().to_string()).unwrap().text(SUCCESS).unwrap()).unwrap();
		assert!(info.is_directory);
		assert_eq!(info.display_type, "Folder");
	}

	#[test]
	fn search_by_substring_and_regex() {
		let dir = tempfile::tempdir().unwrap();
		fs::create_dir_all(dir.path().join("sub")).unwrap();
		fs::write(dir.path().join("Report.txt"), "").unwrap();
		fs::write(dir.path().join("sub/report-2.txt"), "").unwrap();
		fs::write(dir.path().join("sub/other.md"), "").unwrap();
		let base = dir.path().display().to_string();

		assert_eq!(search(&base, "report", false, true, 0).unwrap().len(), 2);
		assert_eq!(search(&base, "report", false, false, 0).unwrap().len(), 1);
		assert_eq!(search(&base, r"^report-\d\.txt$", true, false, 0).unwrap().len(), 1);
		assert_eq!(search(&base, "REPORT", true, true, 1).unwrap().len(), 1);
		assert!(search(&base, "(", true, false, 0).is_err());
		assert!(search(&dir.path().join("nope").display().to_string(), "x", false, true, 0).is_err());
	}

	#[test]
	fn unlock_classifies_paths() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("f");
		fs::write(&file, "").unwrap();

		assert_eq!(unlock_occupy(&file.display().to_string()).unwrap_err().key, ErrorKey::NotOccupy);
		assert_eq!(unlock_occupy(&dir.path().display().to_string()).unwrap_err().key, ErrorKey::NotFoundOrNotFile);
		assert_eq!(unlock_occupy("/definitely/not/here").unwrap_err().key, ErrorKey::NotFoundOrNotFile);
	}

	#[tokio::test]
	async fn run_waits_for_exit_code() {
		let reply = run("sh", r#"-c "exit 3""#, true).await.unwrap();
		assert_eq!(reply.text(SUCCESS).as_deref(), Some("3"));
		assert_eq!(run("/no/such/program", "", false).await.unwrap_err().key, ErrorKey::Failure);
	}

	#[test]
	fn variable_lookup() {
		assert!(variable_path("%TRUSTBRIDGE_SURELY_UNSET%").is_err());
		let path = variable_path("PATH").unwrap();
		assert!(path.text(SUCCESS).is_some());
	}

	#[test]
	fn previewer_lookup() {
		assert!(previewer_available("sh"));
		assert!(!previewer_available("trustbridge-no-such-previewer"));
		assert!(!previewer_available("/no/such/previewer"));
	}

	#[tokio::test]
	async fn quicklook_needs_an_existing_path() {
		let dir = tempfile::tempdir().unwrap();
		let file = dir.path().join("a.txt");
		fs::write(&file, "").unwrap();

		assert!(quicklook("true", &file.display().to_string()).unwrap().contains_key(SUCCESS));
		assert_eq!(quicklook("true", "/no/such/file").unwrap_err().key, ErrorKey::Generic);
		assert!(quicklook("/no/such/previewer", &file.display().to_string()).is_err());
	}
}
