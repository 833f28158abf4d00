//! Payload types shared by requests and replies.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identity declared by a peer during the broker handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
	Worker,
	Client,
}

impl Role {
	pub fn as_str(self) -> &'static str {
		match self {
			Role::Worker => "Worker",
			Role::Client => "Client",
		}
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Error returned when a handshake answer is outside the `{"Worker","Client"}` vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "unknown identity: {:?}", self.0)
	}
}

impl std::error::Error for UnknownRole {}

impl FromStr for Role {
	type Err = UnknownRole;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"Worker" => Ok(Role::Worker),
			"Client" => Ok(Role::Client),
			other => Err(UnknownRole(other.to_string())),
		}
	}
}

/// Privilege level requested for `Execute_RunExe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ExecuteAuthority {
	#[default]
	Normal,
	Administrator,
}

/// One move/copy source together with its collision decision.
///
/// `rename_to == None` means "use the existing destination" (merge into an
/// existing folder, overwrite an existing file); `Some(name)` places the item
/// under that generated unique name instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SourceItem {
	pub path: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub rename_to: Option<String>,
}

impl SourceItem {
	pub fn keep_name(path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			rename_to: None,
		}
	}

	pub fn renamed(path: impl Into<String>, rename_to: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			rename_to: Some(rename_to.into()),
		}
	}
}

/// Link description used by `Execute_CreateLink` and `Execute_GetHyperlinkInfo`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HyperlinkPackage {
	pub link_path: String,
	pub link_target: String,
	#[serde(default)]
	pub arguments: Vec<String>,
	#[serde(default)]
	pub description: String,
	#[serde(default)]
	pub need_run_as_admin: bool,
}

/// Metadata for items the sandboxed client cannot stat itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct HiddenItemPackage {
	pub display_type: String,
	pub is_directory: bool,
	pub size: u64,
	#[serde(default)]
	pub modified: Option<u64>,
}

/// One entry of a shell context menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContextMenuPackage {
	pub name: String,
	pub id: i32,
	pub verb: String,
	/// Path the menu was queried for.
	#[serde(default)]
	pub belong_to: String,
}

/// An application able to open a file type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AssociationPackage {
	/// Extension the lookup was made for, with its leading dot.
	pub extension: String,
	pub name: String,
	pub executable_path: String,
	/// Listed as a default handler for the type.
	#[serde(default)]
	pub is_recommended: bool,
}

/// An item held by the worker's recycle bin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RecycleBinItem {
	pub original_path: String,
	pub recycled_path: String,
	pub deleted_at: u64,
	pub is_directory: bool,
}
