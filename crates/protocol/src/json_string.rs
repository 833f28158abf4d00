//! Serde adapter for fields that travel as JSON-encoded strings.
//!
//! List and structured payloads (`ExecutePath` for delete, `SourcePath` for
//! move/copy, `DataPackage` for links) are nested as text inside the flat
//! message so that every top-level value stays a scalar.

use serde::de::{DeserializeOwned, Error as _};
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub fn serialize<T, S>(value: &T, serializer: S) -> Result<S::Ok, S::Error>
where
	T: Serialize,
	S: Serializer,
{
	let text = serde_json::to_string(value).map_err(S::Error::custom)?;
	serializer.serialize_str(&text)
}

pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
where
	T: DeserializeOwned,
	D: Deserializer<'de>,
{
	let text = String::deserialize(deserializer)?;
	serde_json::from_str(&text).map_err(D::Error::custom)
}
