//! Transport runtime shared by the broker, the pool and workers.
//!
//! * [`Connection`]: newline-delimited JSON frames over any duplex stream, with
//!   request/response correlation in both directions.
//! * [`endpoint`]: Unix socket helpers (bind, connect, "not running" checks).
//! * [`progress`]: the token-correlated side channel used by long transfers.
//! * [`process`]: process liveness helpers.

pub mod connection;
pub mod endpoint;
pub mod error;
pub mod frame;
pub mod process;
pub mod progress;

pub use connection::{Connection, RequestHandler};
pub use error::{Error, Result};
pub use frame::{Frame, Response, ResponseStatus};
pub use progress::{ProgressChannel, ProgressReporter};
