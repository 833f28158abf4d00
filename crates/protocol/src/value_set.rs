//! Flat key/value message envelope.

use serde_json::{Map, Value};

/// Discriminator key present on every request.
pub const EXECUTE_TYPE: &str = "ExecuteType";

/// A flat, self-describing message: named strings, integers, booleans or
/// JSON-encoded blobs.
pub type ValueSet = Map<String, Value>;

/// Typed lookups over a [`ValueSet`].
pub trait ValueSetExt {
	/// Returns the `ExecuteType` discriminator if present.
	fn execute_type(&self) -> Option<&str>;

	/// Returns the value at `key` as text. Numbers and booleans are rendered.
	fn text(&self, key: &str) -> Option<String>;

	fn flag(&self, key: &str) -> Option<bool>;

	/// Builds a single-entry message.
	fn single(key: &str, value: impl Into<Value>) -> Self;
}

impl ValueSetExt for ValueSet {
	fn execute_type(&self) -> Option<&str> {
		self.get(EXECUTE_TYPE).and_then(Value::as_str)
	}

	fn text(&self, key: &str) -> Option<String> {
		match self.get(key)? {
			Value::String(text) => Some(text.clone()),
			Value::Null => None,
			other => Some(other.to_string()),
		}
	}

	fn flag(&self, key: &str) -> Option<bool> {
		match self.get(key)? {
			Value::Bool(flag) => Some(*flag),
			Value::String(text) => text.parse().ok(),
			_ => None,
		}
	}

	fn single(key: &str, value: impl Into<Value>) -> Self {
		let mut message = ValueSet::new();
		message.insert(key.to_string(), value.into());
		message
	}
}
