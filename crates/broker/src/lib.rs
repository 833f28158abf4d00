//! Pairing broker.
//!
//! Every inbound connection is asked for its identity (`Worker` or `Client`)
//! and then paired 1:1 with the oldest waiting peer of the opposite role.
//! Requests from either side are forwarded verbatim to the partner. When one
//! side goes away the other is notified and closed.

mod broker;
mod error;
mod state;

pub use broker::{Broker, BrokerConfig, BrokerHandle, DEFAULT_FORWARD_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_NOTIFY_TIMEOUT, NO_PARTNER_MESSAGE};
pub use error::{Error, Result};
pub use state::{Arrival, ConnectionId, Departure, Rendezvous, Snapshot};
