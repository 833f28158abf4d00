//! Rendezvous bookkeeping: the pairing table and the two waiting queues.
//!
//! Invariants:
//! * a connection is in at most one of {pairing table, client queue, worker queue}
//! * pairing is 1:1 (`pairs` and `reverse` mirror each other)
//! * both structures only change together, under the `waiting` lock

use std::collections::VecDeque;
use std::fmt;

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use trustbridge_protocol::Role;

/// Broker-local identifier of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
	Paired { client: ConnectionId, worker: ConnectionId },
	Queued,
}

/// What a departing connection leaves behind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Departure {
	/// A paired client left; its worker must be told to exit.
	Client { worker: ConnectionId },
	/// A paired worker left; its client must be told the worker exited.
	Worker { client: ConnectionId },
	/// The connection was queued or never identified.
	Unpaired,
}

/// Point-in-time view of the rendezvous state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
	/// `(client, worker)` pairs, ordered by client id.
	pub pairs: Vec<(ConnectionId, ConnectionId)>,
	pub waiting_clients: Vec<ConnectionId>,
	pub waiting_workers: Vec<ConnectionId>,
}

#[derive(Debug, Default)]
struct WaitingQueues {
	clients: VecDeque<ConnectionId>,
	workers: VecDeque<ConnectionId>,
}

#[derive(Debug, Default)]
pub struct Rendezvous {
	/// client -> worker
	pairs: DashMap<ConnectionId, ConnectionId>,
	/// worker -> client
	reverse: DashMap<ConnectionId, ConnectionId>,
	waiting: Mutex<WaitingQueues>,
}

impl Rendezvous {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers an identified connection, pairing it with the oldest waiting
	/// peer of the opposite role when there is one.
	pub fn arrive(&self, id: ConnectionId, role: Role) -> Arrival {
		let mut guard = self.waiting.lock();
		let waiting = &mut *guard;
		let (own_queue, other_queue) = match role {
			Role::Worker => (&mut waiting.workers, &mut waiting.clients),
			Role::Client => (&mut waiting.clients, &mut waiting.workers),
		};

		match other_queue.pop_front() {
			Some(peer) => {
				let (client, worker) = match role {
					Role::Worker => (peer, id),
					Role::Client => (id, peer),
				};
				self.pairs.insert(client, worker);
				self.reverse.insert(worker, client);
				Arrival::Paired { client, worker }
			}
			None => {
				own_queue.push_back(id);
				Arrival::Queued
			}
		}
	}

	/// Removes every trace of `id`.
	pub fn depart(&self, id: ConnectionId) -> Departure {
		let mut waiting = self.waiting.lock();

		if let Some((_, worker)) = self.pairs.remove(&id) {
			self.reverse.remove(&worker);
			return Departure::Client { worker };
		}
		if let Some((_, client)) = self.reverse.remove(&id) {
			self.pairs.remove(&client);
			return Departure::Worker { client };
		}

		waiting.clients.retain(|queued| *queued != id);
		waiting.workers.retain(|queued| *queued != id);
		Departure::Unpaired
	}

	/// The connection `id` is currently paired with, on either side.
	pub fn partner(&self, id: ConnectionId) -> Option<ConnectionId> {
		if let Some(worker) = self.pairs.get(&id) {
			return Some(*worker);
		}
		self.reverse.get(&id).map(|client| *client)
	}

	pub fn snapshot(&self) -> Snapshot {
		let waiting = self.waiting.lock();
		let mut pairs: Vec<_> = self.pairs.iter().map(|entry| (*entry.key(), *entry.value())).collect();
		pairs.sort();
		Snapshot {
			pairs,
			waiting_clients: waiting.clients.iter().copied().collect(),
			waiting_workers: waiting.workers.iter().copied().collect(),
		}
	}
}
