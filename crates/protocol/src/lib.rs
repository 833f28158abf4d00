//! Wire types for the trustbridge protocol.
//!
//! This crate contains the serde-serializable types exchanged between a
//! sandboxed client, the pairing broker and elevated workers. These types
//! represent the "protocol layer" - the shapes of data as they appear on the
//! wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization
//! * Flat: every message is a single [`ValueSet`] keyed by `ExecuteType`
//! * Closed: [`Request`] has one variant per discriminator, decoded once at the
//!   transport boundary
//!
//! Pool, broker and worker logic is built on top of these types in the other
//! workspace crates.

pub mod json_string;
pub mod progress;
pub mod reply;
pub mod request;
pub mod types;
pub mod value_set;

pub use progress::*;
pub use reply::{ErrorKey, Reply};
pub use request::Request;
pub use types::*;
pub use value_set::{EXECUTE_TYPE, ValueSet, ValueSetExt};
