//! Typed request union, one variant per `ExecuteType` discriminator.
//!
//! Requests serialize to a flat [`ValueSet`]: the variant name becomes the
//! `ExecuteType` value and every field becomes a top-level key.
//!
//! ```json
//! {
//!   "ExecuteType": "Execute_Rename",
//!   "ExecutePath": "/home/me/a.txt",
//!   "DesireName": "b.txt"
//! }
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{ExecuteAuthority, HyperlinkPackage, SourceItem};
use crate::value_set::ValueSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ExecuteType")]
pub enum Request {
	/// Broker request asking the peer to declare its role.
	#[serde(rename = "Identity")]
	Identity,

	/// Liveness handshake; the worker echoes the key back.
	#[serde(rename = "Execute_Test_Connection")]
	TestConnection {
		#[serde(rename = "ProcessId")]
		process_id: u32,
	},

	/// Broker → worker: the paired client went away.
	#[serde(rename = "Execute_Exit")]
	Exit,

	/// Broker → client: the paired worker went away.
	#[serde(rename = "FullTrustProcessExited")]
	WorkerExited,

	#[serde(rename = "Execute_RunExe")]
	RunExe {
		#[serde(rename = "ExecutePath")]
		path: String,
		#[serde(rename = "ExecuteParameter", default)]
		parameter: String,
		#[serde(rename = "ExecuteAuthority", default)]
		authority: ExecuteAuthority,
		#[serde(rename = "ExecuteCreateNoWindow", default)]
		create_no_window: bool,
		#[serde(rename = "ExecuteShouldWaitForExit", default)]
		should_wait_for_exit: bool,
	},

	#[serde(rename = "Execute_Rename")]
	Rename {
		#[serde(rename = "ExecutePath")]
		path: String,
		#[serde(rename = "DesireName")]
		desired_name: String,
	},

	#[serde(rename = "Execute_Delete")]
	Delete {
		#[serde(rename = "ExecutePath", with = "crate::json_string")]
		paths: Vec<String>,
		#[serde(rename = "PermanentDelete", default)]
		permanent: bool,
		#[serde(rename = "Guid")]
		progress_token: String,
		#[serde(rename = "Undo", default)]
		undo: bool,
	},

	#[serde(rename = "Execute_Move")]
	Move {
		#[serde(rename = "SourcePath", with = "crate::json_string")]
		sources: Vec<SourceItem>,
		#[serde(rename = "DestinationPath")]
		destination: String,
		#[serde(rename = "Guid")]
		progress_token: String,
		#[serde(rename = "Undo", default)]
		undo: bool,
	},

	#[serde(rename = "Execute_Copy")]
	Copy {
		#[serde(rename = "SourcePath", with = "crate::json_string")]
		sources: Vec<SourceItem>,
		#[serde(rename = "DestinationPath")]
		destination: String,
		#[serde(rename = "Guid")]
		progress_token: String,
		#[serde(rename = "Undo", default)]
		undo: bool,
	},

	#[serde(rename = "Execute_Unlock_Occupy")]
	UnlockOccupy {
		#[serde(rename = "ExecutePath")]
		path: String,
	},

	#[serde(rename = "Execute_GetContextMenuItems")]
	GetContextMenuItems {
		#[serde(rename = "ExecutePath")]
		path: String,
		#[serde(rename = "IncludeExtensionItem", default)]
		include_extension_item: bool,
	},

	#[serde(rename = "Execute_InvokeContextMenuItem")]
	InvokeContextMenuItem {
		#[serde(rename = "ExecutePath")]
		path: String,
		#[serde(rename = "InvokeId")]
		id: i32,
		#[serde(rename = "InvokeVerb", default)]
		verb: String,
	},

	#[serde(rename = "Execute_CreateLink")]
	CreateLink {
		#[serde(rename = "DataPackage", with = "crate::json_string")]
		package: HyperlinkPackage,
	},

	#[serde(rename = "Execute_GetHyperlinkInfo")]
	GetHyperlinkInfo {
		#[serde(rename = "ExecutePath")]
		path: String,
	},

	#[serde(rename = "Execute_GetVariable_Path")]
	GetVariablePath {
		#[serde(rename = "Variable")]
		variable: String,
	},

	#[serde(rename = "Execute_GetMIMEContentType")]
	GetMimeContentType {
		#[serde(rename = "ExecutePath")]
		path: String,
	},

	#[serde(rename = "Execute_GetHiddenItemInfo")]
	GetHiddenItemInfo {
		#[serde(rename = "ExecutePath")]
		path: String,
	},

	/// Applications registered for the type of `path`.
	#[serde(rename = "Execute_Get_Associate")]
	GetAssociate {
		#[serde(rename = "ExecutePath")]
		path: String,
	},

	#[serde(rename = "Execute_Check_QuicklookIsAvaliable")]
	CheckQuicklook,

	/// Opens `path` in the worker's preview tool.
	#[serde(rename = "Execute_Quicklook")]
	Quicklook {
		#[serde(rename = "ExecutePath")]
		path: String,
	},

	#[serde(rename = "Execute_CheckIfEverythingAvailable")]
	CheckEverythingAvailable,

	#[serde(rename = "Execute_SearchByEverything")]
	SearchByEverything {
		#[serde(rename = "BaseLocation")]
		base_location: String,
		#[serde(rename = "SearchWord")]
		search_word: String,
		#[serde(rename = "SearchAsRegex", default)]
		search_as_regex: bool,
		#[serde(rename = "IgnoreCase", default)]
		ignore_case: bool,
		#[serde(rename = "MaxCount")]
		max_count: u32,
	},

	#[serde(rename = "Execute_Get_RecycleBinItems")]
	GetRecycleBinItems,

	#[serde(rename = "Execute_Empty_RecycleBin")]
	EmptyRecycleBin,

	#[serde(rename = "Execute_Restore_RecycleItem")]
	RestoreRecycleItem {
		#[serde(rename = "ExecutePath")]
		path: String,
	},

	#[serde(rename = "Execute_Delete_RecycleItem")]
	DeleteRecycleItem {
		#[serde(rename = "ExecutePath")]
		path: String,
	},

	#[serde(rename = "Execute_EjectUSB")]
	EjectDevice {
		#[serde(rename = "ExecutePath")]
		path: String,
	},
}

impl Request {
	/// Wire discriminator of this request.
	pub fn kind(&self) -> &'static str {
		match self {
			Request::Identity => "Identity",
			Request::TestConnection { .. } => "Execute_Test_Connection",
			Request::Exit => "Execute_Exit",
			Request::WorkerExited => "FullTrustProcessExited",
			Request::RunExe { .. } => "Execute_RunExe",
			Request::Rename { .. } => "Execute_Rename",
			Request::Delete { .. } => "Execute_Delete",
			Request::Move { .. } => "Execute_Move",
			Request::Copy { .. } => "Execute_Copy",
			Request::UnlockOccupy { .. } => "Execute_Unlock_Occupy",
			Request::GetContextMenuItems { .. } => "Execute_GetContextMenuItems",
			Request::InvokeContextMenuItem { .. } => "Execute_InvokeContextMenuItem",
			Request::CreateLink { .. } => "Execute_CreateLink",
			Request::GetHyperlinkInfo { .. } => "Execute_GetHyperlinkInfo",
			Request::GetVariablePath { .. } => "Execute_GetVariable_Path",
			Request::GetMimeContentType { .. } => "Execute_GetMIMEContentType",
			Request::GetHiddenItemInfo { .. } => "Execute_GetHiddenItemInfo",
			Request::GetAssociate { .. } => "Execute_Get_Associate",
			Request::CheckQuicklook => "Execute_Check_QuicklookIsAvaliable",
			Request::Quicklook { .. } => "Execute_Quicklook",
			Request::CheckEverythingAvailable => "Execute_CheckIfEverythingAvailable",
			Request::SearchByEverything { .. } => "Execute_SearchByEverything",
			Request::GetRecycleBinItems => "Execute_Get_RecycleBinItems",
			Request::EmptyRecycleBin => "Execute_Empty_RecycleBin",
			Request::RestoreRecycleItem { .. } => "Execute_Restore_RecycleItem",
			Request::DeleteRecycleItem { .. } => "Execute_Delete_RecycleItem",
			Request::EjectDevice { .. } => "Execute_EjectUSB",
		}
	}

	/// Encodes the request as a flat message.
	pub fn to_value_set(&self) -> Result<ValueSet, serde_json::Error> {
		match serde_json::to_value(self)? {
			Value::Object(map) => Ok(map),
			other => Err(serde::ser::Error::custom(format!("request encoded to non-object {other}"))),
		}
	}

	/// Decodes a flat message. Unknown extra keys are ignored.
	pub fn from_value_set(message: ValueSet) -> Result<Self, serde_json::Error> {
		serde_json::from_value(Value::Object(message))
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::value_set::ValueSetExt;

	#[test]
	fn unit_variant_is_only_the_discriminator() {
		let message = Request::Identity.to_value_set().unwrap();
		assert_eq!(Value::Object(message), json!({"ExecuteType": "Identity"}));
	}

	#[test]
	fn rename_uses_wire_field_names() {
		let message = Request::Rename {
			path: "/tmp/a.txt".into(),
			desired_name: "b.txt".into(),
		}
		.to_value_set()
		.unwrap();

		assert_eq!(
			Value::Object(message),
			json!({"ExecuteType": "Execute_Rename", "ExecutePath": "/tmp/a.txt", "DesireName": "b.txt"})
		);
	}

	#[test]
	fn delete_paths_travel_as_json_text() {
		let message = Request::Delete {
			paths: vec!["/a".into(), "/b".into()],
			permanent: true,
			progress_token: "t".into(),
			undo: false,
		}
		.to_value_set()
		.unwrap();

		assert_eq!(message.text("ExecutePath").as_deref(), Some(r#"["/a","/b"]"#));
		assert_eq!(message.flag("PermanentDelete"), Some(true));
		assert_eq!(message.text("Guid").as_deref(), Some("t"));
	}

	#[test]
	fn move_decodes_collision_list() {
		let message = json!({
			"ExecuteType": "Execute_Move",
			"SourcePath": r#"[{"Path":"/src/dir"},{"Path":"/src/other","RenameTo":"other (1)"}]"#,
			"DestinationPath": "/dst",
			"Guid": "token",
			"Undo": false
		});
		let Value::Object(message) = message else { unreachable!() };

		match Request::from_value_set(message).unwrap() {
			Request::Move { sources, destination, .. } => {
				assert_eq!(destination, "/dst");
				assert_eq!(sources, vec![SourceItem::keep_name("/src/dir"), SourceItem::renamed("/src/other", "other (1)")]);
			}
			other => panic!("expected Move, got {other:?}"),
		}
	}

	#[test]
	fn decoding_ignores_extra_keys_and_defaults_flags() {
		let message = json!({"ExecuteType": "Execute_RunExe", "ExecutePath": "/bin/true", "Extra": 1});
		let Value::Object(message) = message else { unreachable!() };

		let request = Request::from_value_set(message).unwrap();
		assert_eq!(
			request,
			Request::RunExe {
				path: "/bin/true".into(),
				parameter: String::new(),
				authority: ExecuteAuthority::Normal,
				create_no_window: false,
				should_wait_for_exit: false,
			}
		);
	}

	#[test]
	fn unknown_discriminator_is_rejected() {
		let message = json!({"ExecuteType": "Execute_Intercept_Win_E"});
		let Value::Object(message) = message else { unreachable!() };
		assert!(Request::from_value_set(message).is_err());
	}

	#[test]
	fn kind_matches_encoded_discriminator() {
		let requests = [
			Request::TestConnection { process_id: 7 },
			Request::Exit,
			Request::WorkerExited,
			Request::EmptyRecycleBin,
			Request::CheckQuicklook,
			Request::Quicklook { path: "/a.png".into() },
			Request::GetAssociate { path: "/a.png".into() },
			Request::GetVariablePath { variable: "HOME".into() },
			Request::CreateLink {
				package: HyperlinkPackage::default(),
			},
		];
		for request in requests {
			let message = request.to_value_set().unwrap();
			assert_eq!(message.execute_type(), Some(request.kind()));
		}
	}
}
