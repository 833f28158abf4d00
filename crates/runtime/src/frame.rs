//! Line frames exchanged on a [`Connection`](crate::Connection).
//!
//! Every frame is one JSON object followed by `\n`:
//!
//! ```json
//! {"frame":"request","id":3,"message":{"ExecuteType":"Identity"}}
//! {"frame":"response","id":3,"status":"success","message":{"Identity":"Worker"}}
//! ```
//!
//! Ids are chosen by the side that sends the request, so both peers can have
//! requests in flight with overlapping ids.

use serde::{Deserialize, Serialize};
use trustbridge_protocol::ValueSet;

use crate::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum Frame {
	Request {
		id: u64,
		message: ValueSet,
	},
	Response {
		id: u64,
		status: ResponseStatus,
		#[serde(default)]
		message: ValueSet,
	},
}

impl Frame {
	/// Serializes the frame as a single line, trailing newline included.
	pub fn encode(&self) -> Result<String> {
		let mut line = serde_json::to_string(self)?;
		line.push('\n');
		Ok(line)
	}

	pub fn decode(line: &str) -> Result<Self> {
		Ok(serde_json::from_str(line)?)
	}
}

/// Transport-level outcome of a request, independent of the reply keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
	Success,
	Failure,
	RemoteSystemError,
}

/// A correlated response as seen by the requester.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
	pub status: ResponseStatus,
	pub message: ValueSet,
}

impl Response {
	pub fn is_success(&self) -> bool {
		self.status == ResponseStatus::Success
	}
}
