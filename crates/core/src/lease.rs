//! Exclusive use of one controller.

use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::controller::WorkerController;
use crate::pool::PoolEvent;

/// Exclusive handle to a pooled [`WorkerController`].
///
/// While a lease is alive no other caller can acquire the same controller.
/// Dropping it hands the controller back to the pool exactly once; if the
/// pool is gone the controller is disposed instead.
pub struct Lease {
	controller: Option<Arc<WorkerController>>,
	returns: UnboundedSender<PoolEvent>,
}

impl Lease {
	pub(crate) fn new(controller: Arc<WorkerController>, returns: UnboundedSender<PoolEvent>) -> Self {
		Self {
			controller: Some(controller),
			returns,
		}
	}

	pub fn controller(&self) -> &WorkerController {
		self
	}
}

impl Deref for Lease {
	type Target = WorkerController;

	fn deref(&self) -> &WorkerController {
		match &self.controller {
			Some(controller) => controller,
			None => unreachable!("lease used after release"),
		}
	}
}

impl Drop for Lease {
	fn drop(&mut self) {
		let Some(controller) = self.controller.take() else {
			return;
		};
		debug!(target = "trustbridge.pool", controller = controller.id(), "lease released");
		if let Err(returned) = self.returns.send(PoolEvent::Returned(controller)) {
			let PoolEvent::Returned(controller) = returned.0;
			controller.dispose();
		}
	}
}

impl std::fmt::Debug for Lease {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_tuple("Lease").field(&self.controller).finish()
	}
}
