//! Result envelope printed on stdout.

use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult<T: Serialize> {
	pub ok: bool,
	pub command: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub data: Option<T>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<CommandError>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommandError {
	pub code: ErrorCode,
	pub message: String,
}

/// Standardized error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
	Unreachable,
	NoResponse,
	NotFound,
	Occupied,
	Failure,
	Captured,
	NotOccupied,
	NotFoundOrNotFile,
	WorkerError,
	InvalidInput,
	ConfigError,
	IoError,
	InternalError,
}

impl ErrorCode {
	/// Picks the code for the innermost pool error in `err`, if any.
	pub fn for_error(err: &anyhow::Error) -> Self {
		use trustbridge::Error;

		let Some(err) = err.chain().find_map(|cause| cause.downcast_ref::<Error>()) else {
			return if err.chain().any(|cause| cause.is::<std::io::Error>()) {
				ErrorCode::IoError
			} else {
				ErrorCode::InternalError
			};
		};
		match err {
			Error::Connectivity { .. } | Error::Launch(_) => ErrorCode::Unreachable,
			Error::NoResponse { .. } | Error::Transport(_) => ErrorCode::NoResponse,
			Error::NotFound(_) => ErrorCode::NotFound,
			Error::Occupied(_) => ErrorCode::Occupied,
			Error::Failure(_) => ErrorCode::Failure,
			Error::Captured(_) => ErrorCode::Captured,
			Error::NotOccupied(_) => ErrorCode::NotOccupied,
			Error::NotFoundOrNotFile(_) => ErrorCode::NotFoundOrNotFile,
			Error::Remote(_) => ErrorCode::WorkerError,
			Error::InvalidArgument(_) => ErrorCode::InvalidInput,
			Error::Config { .. } => ErrorCode::ConfigError,
			Error::Io(_) => ErrorCode::IoError,
			Error::PoolShutDown | Error::Json(_) => ErrorCode::InternalError,
		}
	}
}

/// Builder for constructing command results.
pub struct ResultBuilder<T: Serialize> {
	command: String,
	data: Option<T>,
	error: Option<CommandError>,
	start_time: Instant,
}

impl<T: Serialize> ResultBuilder<T> {
	pub fn new(command: impl Into<String>) -> Self {
		Self {
			command: command.into(),
			data: None,
			error: None,
			start_time: Instant::now(),
		}
	}

	pub fn data(mut self, data: T) -> Self {
		self.data = Some(data);
		self
	}

	pub fn error(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
		self.error = Some(CommandError {
			code,
			message: message.into(),
		});
		self
	}

	pub fn build(self) -> CommandResult<T> {
		CommandResult {
			ok: self.error.is_none(),
			command: self.command,
			data: if self.error.is_none() { self.data } else { None },
			error: self.error,
			duration_ms: Some(self.start_time.elapsed().as_millis() as u64),
		}
	}
}

pub fn print_result<T: Serialize>(result: &CommandResult<T>) {
	match serde_json::to_string_pretty(result) {
		Ok(json) => println!("{json}"),
		Err(err) => eprintln!("failed to encode result: {err}"),
	}
}

#[cfg(test)]
mod tests {
	use serde_json::{Value, json};

	use super::*;

	#[test]
	fn success_envelope_carries_data() {
		let result = ResultBuilder::new("mime").data(json!("text/plain")).build();
		let value = serde_json::to_value(&result).unwrap();
		assert_eq!(value["ok"], true);
		assert_eq!(value["data"], "text/plain");
		assert!(value.get("error").is_none());
	}

	#[test]
	fn error_envelope_drops_data() {
		let result = ResultBuilder::<Value>::new("rename").data(json!(1)).error(ErrorCode::Occupied, "busy").build();
		let value = serde_json::to_value(&result).unwrap();
		assert_eq!(value["ok"], false);
		assert_eq!(value["error"]["code"], "OCCUPIED");
		assert!(value.get("data").is_none());
	}

	#[test]
	fn pool_errors_map_through_context() {
		let err = anyhow::Error::new(trustbridge::Error::Occupied("/a".into())).context("rename failed");
		assert_eq!(ErrorCode::for_error(&err), ErrorCode::Occupied);

		let err = anyhow::Error::new(trustbridge::Error::Connectivity { attempts: 3 });
		assert_eq!(ErrorCode::for_error(&err), ErrorCode::Unreachable);

		assert_eq!(ErrorCode::for_error(&anyhow::anyhow!("boom")), ErrorCode::InternalError);
	}
}
