//! A bounded, elastic worker-thread pool whose submissions return
//! single-assignment futures that can be waited on, awaited, mapped and
//! joined.

mod combinator;
mod config;
mod controller;
mod error;
mod pool;
mod service;
mod task;
mod task_future;

pub use combinator::{join_all, join_all_with, JoinMode};
pub use config::{ControllerConfig, OverflowPolicy, PoolConfig, ServiceConfig};
pub use controller::{AsyncController, FAN_OUT_KEYS, HEALTH_MESSAGE};
pub use error::{BoxError, Interrupted, PoolError};
pub use pool::{ShutdownMode, WorkerPool};
pub use service::AsyncTaskService;
pub use task::TaskContext;
pub use task_future::{FutureState, Outcome, TaskFuture};
