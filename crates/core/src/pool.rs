//! The worker pool.
//!
//! Idle controllers sit in an available queue. [`WorkerPool::acquire`] hands
//! one out as a [`Lease`]; dropping the lease sends the controller back to a
//! management loop over a channel, which requeues it, or replaces it when its
//! worker died while leased. A scaling lock serializes growth, shrinkage and
//! the creation of the very first controller; leasing and returning never
//! take it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::controller::{ControllerContext, WorkerController};
use crate::error::{Error, Result};
use crate::launcher::WorkerLauncher;
use crate::lease::Lease;
use crate::recorder::OperationRecorder;

pub(crate) enum PoolEvent {
	Returned(Arc<WorkerController>),
}

struct PoolShared {
	context: Arc<ControllerContext>,
	available: Mutex<VecDeque<Arc<WorkerController>>>,
	available_changed: Notify,
	scaling: tokio::sync::Mutex<()>,
	leased: AtomicUsize,
	shutdown: AtomicBool,
	events: UnboundedSender<PoolEvent>,
}

impl PoolShared {
	fn is_shut_down(&self) -> bool {
		self.shutdown.load(Ordering::SeqCst)
	}

	fn pop(&self) -> Option<Arc<WorkerController>> {
		self.available.lock().pop_front()
	}

	fn push(&self, controller: Arc<WorkerController>) {
		if self.is_shut_down() {
			controller.dispose();
			return;
		}
		self.available.lock().push_back(controller);
		self.available_changed.notify_waiters();
	}

	fn lease(&self, controller: Arc<WorkerController>) -> Lease {
		self.leased.fetch_add(1, Ordering::SeqCst);
		debug!(target = "trustbridge.pool", controller = controller.id(), "controller leased");
		Lease::new(controller, self.events.clone())
	}

	/// Creates a controller and connects it. A failed connect is logged; the
	/// controller retries on its next operation.
	async fn spawn_controller(&self) -> Arc<WorkerController> {
		let controller = WorkerController::create(&self.context);
		if !controller.connect().await {
			warn!(target = "trustbridge.pool", controller = controller.id(), "new controller is not connected yet");
		}
		controller
	}

	fn returned(self: &Arc<Self>, controller: Arc<WorkerController>) {
		let _ = self.leased.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |leased| leased.checked_sub(1));

		if self.is_shut_down() {
			controller.dispose();
			return;
		}
		if !controller.is_disposed() {
			debug!(target = "trustbridge.pool", controller = controller.id(), "controller returned");
			self.push(controller);
			return;
		}

		info!(target = "trustbridge.pool", controller = controller.id(), "returned controller was disposed; replacing");
		let shared = Arc::clone(self);
		tokio::spawn(async move {
			let replacement = shared.spawn_controller().await;
			shared.push(replacement);
		});
	}
}

/// Pool of elevated worker controllers.
///
/// Cheap to clone; every clone drives the same pool.
#[derive(Clone)]
pub struct WorkerPool {
	shared: Arc<PoolShared>,
}

impl WorkerPool {
	/// Creates an empty pool and spawns its management loop. Must be called
	/// inside a tokio runtime.
	pub fn new(config: PoolConfig, launcher: Arc<dyn WorkerLauncher>) -> Self {
		let (events, returns) = mpsc::unbounded_channel();
		let shared = Arc::new(PoolShared {
			context: Arc::new(ControllerContext::new(config, launcher)),
			available: Mutex::new(VecDeque::new()),
			available_changed: Notify::new(),
			scaling: tokio::sync::Mutex::new(()),
			leased: AtomicUsize::new(0),
			shutdown: AtomicBool::new(false),
			events,
		});
		tokio::spawn(manage(Arc::downgrade(&shared), returns));
		Self { shared }
	}

	pub fn config(&self) -> &PoolConfig {
		&self.shared.context.config
	}

	/// Leases an idle controller, waiting for one to be returned if none is
	/// free. Never hands out a disposed controller.
	pub async fn acquire(&self) -> Result<Lease> {
		let shared = &self.shared;
		loop {
			if shared.is_shut_down() {
				return Err(Error::PoolShutDown);
			}

			let notified = shared.available_changed.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();

			if let Some(controller) = shared.pop() {
				if !controller.is_disposed() {
					return Ok(shared.lease(controller));
				}
				debug!(target = "trustbridge.pool", controller = controller.id(), "dequeued a disposed controller; replacing");
				let replacement = shared.spawn_controller().await;
				return Ok(shared.lease(replacement));
			}

			if shared.context.live() == 0 {
				let _scaling = shared.scaling.lock().await;
				if shared.context.live() == 0 && shared.available.lock().is_empty() {
					info!(target = "trustbridge.pool", "pool is empty; creating a controller");
					let controller = shared.spawn_controller().await;
					return Ok(shared.lease(controller));
				}
				continue;
			}

			let _ = tokio::time::timeout(shared.context.config.acquire_recheck, notified).await;
		}
	}

	/// Grows or shrinks the pool to `target` plus the backup margin.
	///
	/// Shrinking disposes idle controllers. When none are idle it waits for
	/// leased ones to come back, at most `resize_wait` in total for the whole
	/// call, and gives up after that.
	pub async fn resize(&self, target: usize) -> Result<()> {
		let shared = &self.shared;
		if shared.is_shut_down() {
			return Err(Error::PoolShutDown);
		}
		let target = target + shared.context.config.backup_margin;
		let _scaling = shared.scaling.lock().await;

		let deadline = tokio::time::Instant::now() + shared.context.config.resize_wait;
		while shared.context.live() > target {
			let notified = shared.available_changed.notified();
			tokio::pin!(notified);
			notified.as_mut().enable();

			if let Some(controller) = shared.pop() {
				controller.dispose();
				continue;
			}
			if tokio::time::timeout_at(deadline, notified).await.is_err() {
				info!(target = "trustbridge.pool", live = shared.context.live(), target, "no controller returned in time; stop shrinking");
				break;
			}
		}

		while shared.context.live() < target && !shared.is_shut_down() {
			let controller = shared.spawn_controller().await;
			shared.push(controller);
		}

		debug!(target = "trustbridge.pool", live = shared.context.live(), target, "resize finished");
		Ok(())
	}

	/// Runs [`resize`](Self::resize) in the background.
	pub fn spawn_resize(&self, target: usize) -> JoinHandle<Result<()>> {
		let pool = self.clone();
		tokio::spawn(async move {
			let result = pool.resize(target).await;
			if let Err(err) = &result {
				warn!(target = "trustbridge.pool", target, error = %err, "background resize failed");
			}
			result
		})
	}

	/// Records of completed operations, newest last.
	pub fn recorder(&self) -> &OperationRecorder {
		&self.shared.context.recorder
	}

	/// Controllers created and not yet disposed.
	pub fn live_count(&self) -> usize {
		self.shared.context.live()
	}

	/// Idle controllers ready to lease.
	pub fn available_count(&self) -> usize {
		self.shared.available.lock().iter().filter(|controller| !controller.is_disposed()).count()
	}

	pub fn leased_count(&self) -> usize {
		self.shared.leased.load(Ordering::SeqCst)
	}

	/// `true` while any controller has a request outstanding.
	pub fn is_any_action_executing(&self) -> bool {
		self.shared.context.any_busy()
	}

	/// Disposes idle controllers and refuses further leases. Leased
	/// controllers are disposed as they come back.
	pub fn shutdown(&self) {
		if self.shared.shutdown.swap(true, Ordering::SeqCst) {
			return;
		}
		let drained: Vec<_> = self.shared.available.lock().drain(..).collect();
		info!(target = "trustbridge.pool", idle = drained.len(), leased = self.leased_count(), "pool shutting down");
		for controller in drained {
			controller.dispose();
		}
		self.shared.available_changed.notify_waiters();
	}
}

impl std::fmt::Debug for WorkerPool {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WorkerPool")
			.field("live", &self.live_count())
			.field("available", &self.available_count())
			.field("leased", &self.leased_count())
			.finish()
	}
}

/// Receives returned controllers until every sender is gone. Controllers
/// returned after the pool itself was dropped are disposed.
async fn manage(shared: Weak<PoolShared>, mut returns: UnboundedReceiver<PoolEvent>) {
	while let Some(event) = returns.recv().await {
		match event {
			PoolEvent::Returned(controller) => match shared.upgrade() {
				Some(shared) => shared.returned(controller),
				None => controller.dispose(),
			},
		}
	}
	debug!(target = "trustbridge.pool", "management loop stopped");
}
