use thiserror::Error;

/// Boxed error type a task may return from its body.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by the pool, its futures and the combinators.
///
/// The enum is `Clone` because a settled outcome is replayed to every
/// observer of a `TaskFuture`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
  #[error("Future was already resolved")]
  AlreadyResolved,

  #[error("Task failed: {0}")]
  TaskFailed(String),

  #[error("Task panicked during execution: {0}")]
  TaskPanicked(String),

  #[error("Task was cancelled")]
  Cancelled,

  #[error("Timed out waiting for the task result")]
  TimedOut,

  #[error("Submission rejected: pool threads and queue are saturated")]
  RejectedSubmission,

  #[error("Pool is shutting down or already shut down, cannot accept new tasks")]
  PoolShutDown,

  #[error("Failed to spawn worker thread: {0}")]
  WorkerSpawn(String),

  #[error("Invalid pool configuration: {0}")]
  InvalidConfig(String),
}

impl PoolError {
  /// Wraps any displayable cause as `TaskFailed`.
  pub fn task_failed(cause: impl std::fmt::Display) -> Self {
    PoolError::TaskFailed(cause.to_string())
  }
}

/// Returned by `TaskContext::sleep` when the task's cancellation token fires
/// during the wait. Propagating it out of a task settles the future with
/// `PoolError::Cancelled` rather than `TaskFailed`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("task interrupted by cancellation")]
pub struct Interrupted;
