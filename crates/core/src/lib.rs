//! Worker connection pool for trustbridge.
//!
//! A sandboxed client obtains an exclusive [`Lease`] on a [`WorkerController`]
//! from a [`WorkerPool`], invokes privileged filesystem operations through it,
//! and drops the lease to hand the controller back. The pool keeps a small
//! backup of connected workers, replaces workers that die, and grows or
//! shrinks on request.
//!
//! ```ignore
//! let pool = WorkerPool::new(config.pool_config(), Arc::new(ProcessLauncher::from_config(&config)));
//! let lease = pool.acquire().await?;
//! lease.rename("/data/report.txt", "report-2024.txt").await?;
//! ```

pub mod collision;
pub mod config;
pub mod controller;
pub mod error;
pub mod launcher;
pub mod lease;
pub mod pool;
pub mod recorder;

pub use collision::{CollisionChoice, CollisionResolver, KeepBoth, MergeIntoExisting, plan_transfer, unique_name};
pub use config::{BridgeConfig, PoolConfig};
pub use controller::WorkerController;
pub use controller::ops::{RunOptions, SearchOptions};
pub use error::{Error, Result};
pub use launcher::{ProcessLauncher, WorkerLauncher};
pub use lease::Lease;
pub use pool::WorkerPool;
pub use recorder::{OperationRecord, OperationRecorder, RecordVerb};
pub use trustbridge_protocol as protocol;
