//! Applications registered for a file type, read from XDG desktop entries
//! and `mimeapps.list` defaults.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;
use trustbridge_protocol::AssociationPackage;

use super::shell::split_parameters;

const DEFAULT_DATA_DIRS: &str = "/usr/local/share:/usr/share";

/// `$XDG_DATA_HOME/applications` followed by every `$XDG_DATA_DIRS` entry.
pub fn default_application_dirs() -> Vec<PathBuf> {
	let mut dirs_found = Vec::new();
	if let Some(data) = dirs::data_dir() {
		dirs_found.push(data.join("applications"));
	}
	let system = std::env::var("XDG_DATA_DIRS").ok().filter(|value| !value.is_empty());
	for dir in system.as_deref().unwrap_or(DEFAULT_DATA_DIRS).split(':').filter(|dir| !dir.is_empty()) {
		dirs_found.push(Path::new(dir).join("applications"));
	}
	dirs_found
}

/// The user's `mimeapps.list` first, then one per application dir.
pub fn default_mimeapps_lists(application_dirs: &[PathBuf]) -> Vec<PathBuf> {
	let mut lists: Vec<PathBuf> = dirs::config_dir().map(|dir| dir.join("mimeapps.list")).into_iter().collect();
	lists.extend(application_dirs.iter().map(|dir| dir.join("mimeapps.list")));
	lists
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct DesktopEntry {
	name: String,
	exec: String,
	mime_types: Vec<String>,
}

fn parse_desktop_entry(text: &str) -> Option<DesktopEntry> {
	let mut in_entry = false;
	let mut name = None;
	let mut exec = None;
	let mut mime_types = Vec::new();
	let mut application = true;

	for line in text.lines().map(str::trim) {
		if line.starts_with('[') {
			in_entry = line == "[Desktop Entry]";
			continue;
		}
		if !in_entry || line.starts_with('#') {
			continue;
		}
		let Some((key, value)) = line.split_once('=') else {
			continue;
		};
		let value = value.trim();
		match key.trim() {
			"Name" => name = Some(value.to_string()),
			"Exec" => exec = Some(value.to_string()),
			"MimeType" => mime_types = value.split(';').filter(|mime| !mime.is_empty()).map(str::to_string).collect(),
			"Type" => application = value == "Application",
			"Hidden" if value == "true" => return None,
			_ => {}
		}
	}

	if !application {
		return None;
	}
	let exec = exec.filter(|exec| !exec.is_empty())?;
	Some(DesktopEntry {
		name: name.unwrap_or_default(),
		exec,
		mime_types,
	})
}

/// First real program of an `Exec` line, skipping an `env VAR=..` prefix.
fn exec_program(exec: &str) -> Option<String> {
	split_parameters(exec).into_iter().find(|token| token != "env" && !token.contains('='))
}

fn resolve_program(program: &str) -> String {
	if program.starts_with('/') {
		return program.to_string();
	}
	which::which(program).map(|path| path.display().to_string()).unwrap_or_else(|_| program.to_string())
}

/// Desktop ids listed for `mime` under `[Default Applications]`.
fn default_handlers(text: &str, mime: &str) -> Vec<String> {
	let mut in_defaults = false;
	let mut handlers = Vec::new();
	for line in text.lines().map(str::trim) {
		if line.starts_with('[') {
			in_defaults = line == "[Default Applications]";
			continue;
		}
		if !in_defaults {
			continue;
		}
		if let Some((key, value)) = line.split_once('=') {
			if key.trim() == mime {
				handlers.extend(value.split(';').map(str::trim).filter(|id| !id.is_empty()).map(str::to_string));
			}
		}
	}
	handlers
}

/// Applications that declare the MIME type guessed from `path`. Default
/// handlers come first. Earlier dirs shadow later ones with the same id.
pub(crate) fn associations(path: &str, application_dirs: &[PathBuf], mimeapps_lists: &[PathBuf]) -> Vec<AssociationPackage> {
	let Some(mime) = mime_guess::from_path(path).first() else {
		return Vec::new();
	};
	let mime = mime.essence_str();
	let extension = Path::new(path)
		.extension()
		.map(|extension| format!(".{}", extension.to_string_lossy()))
		.unwrap_or_default();

	let defaults: Vec<String> = mimeapps_lists
		.iter()
		.filter_map(|list| fs::read_to_string(list).ok())
		.flat_map(|text| default_handlers(&text, mime))
		.collect();

	let mut seen = HashSet::new();
	let mut found = Vec::new();
	for dir in application_dirs {
		let Ok(entries) = fs::read_dir(dir) else {
			continue;
		};
		let mut files: Vec<_> = entries.flatten().map(|entry| entry.path()).collect();
		files.sort();

		for file in files {
			let Some(id) = file.file_name().map(|name| name.to_string_lossy().into_owned()) else {
				continue;
			};
			if !id.ends_with(".desktop") || !seen.insert(id.clone()) {
				continue;
			}
			let Some(entry) = fs::read_to_string(&file).ok().as_deref().and_then(parse_desktop_entry) else {
				continue;
			};
			if !entry.mime_types.iter().any(|declared| declared == mime) {
				continue;
			}
			let Some(program) = exec_program(&entry.exec) else {
				continue;
			};
			found.push(AssociationPackage {
				extension: extension.clone(),
				name: if entry.name.is_empty() { id.trim_end_matches(".desktop").to_string() } else { entry.name },
				executable_path: resolve_program(&program),
				is_recommended: defaults.contains(&id),
			});
		}
	}

	found.sort_by_key(|package| !package.is_recommended);
	debug!(target = "trustbridge.worker", %path, %mime, count = found.len(), "associations resolved");
	found
}
