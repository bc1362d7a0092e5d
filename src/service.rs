use crate::config::ServiceConfig;
use crate::error::PoolError;
use crate::pool::WorkerPool;
use crate::task_future::TaskFuture;

use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread;

use tracing::{debug, info};

fn current_thread_name() -> String {
  thread::current().name().unwrap_or("<unnamed>").to_string()
}

/// Caller-facing task API on top of a shared `WorkerPool`.
///
/// The simulated delays stand in for real I/O or computation and are
/// cooperative: cancelling a task interrupts its delay.
#[derive(Clone)]
pub struct AsyncTaskService {
  pool: Arc<WorkerPool>,
  config: ServiceConfig,
  fire_and_forget_completed: Arc<AtomicUsize>,
}

impl AsyncTaskService {
  pub fn new(pool: Arc<WorkerPool>, config: ServiceConfig) -> Self {
    Self {
      pool,
      config,
      fire_and_forget_completed: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn pool(&self) -> &Arc<WorkerPool> {
    &self.pool
  }

  pub fn config(&self) -> &ServiceConfig {
    &self.config
  }

  /// How many fire-and-forget tasks have finished their work.
  pub fn fire_and_forget_completed(&self) -> usize {
    self.fire_and_forget_completed.load(AtomicOrdering::SeqCst)
  }

  /// Submits a delay-then-record task and returns as soon as the pool has
  /// accepted it. The outcome is not observable by the caller.
  pub fn run_fire_and_forget(&self, message: impl Into<String>) -> Result<(), PoolError> {
    let message = message.into();
    let delay = self.config.fire_and_forget_delay;
    let completed = self.fire_and_forget_completed.clone();
    debug!(%message, submitter = %current_thread_name(), "Submitting fire-and-forget task.");

    self.pool.submit(move |ctx| {
      info!(task_id = ctx.task_id(), %message, thread = %current_thread_name(), "Fire-and-forget task started.");
      info!(task_id = ctx.task_id(), ?delay, "Running heavy work.");
      ctx.sleep(delay)?;
      completed.fetch_add(1, AtomicOrdering::SeqCst);
      info!(task_id = ctx.task_id(), %message, thread = %current_thread_name(), "Fire-and-forget task completed.");
      Ok(())
    })?;
    Ok(())
  }

  /// The same work as `run_fire_and_forget`, executed on the calling thread.
  pub fn run_sync(&self, message: &str) {
    let delay = self.config.fire_and_forget_delay;
    info!(%message, thread = %current_thread_name(), "Sync task started.");
    thread::sleep(delay);
    info!(%message, thread = %current_thread_name(), "Sync task completed.");
  }

  /// Doubles `input` after the compute delay.
  ///
  /// The future fails with `TaskFailed` when doubling overflows.
  pub fn compute_async(&self, input: i64) -> Result<TaskFuture<i64>, PoolError> {
    let delay = self.config.compute_delay;
    self.pool.submit(move |ctx| {
      debug!(task_id = ctx.task_id(), input, "Computing.");
      ctx.sleep(delay)?;
      let doubled = input
        .checked_mul(2)
        .ok_or_else(|| format!("doubling {input} overflows a 64-bit integer"))?;
      Ok(doubled)
    })
  }

  /// Simulates fetching the value stored under `key`.
  ///
  /// The future fails with `TaskFailed` for a blank key.
  pub fn fetch_async(&self, key: &str) -> Result<TaskFuture<String>, PoolError> {
    let key = key.to_string();
    let delay = self.config.fetch_delay;
    self.pool.submit(move |ctx| {
      debug!(task_id = ctx.task_id(), %key, thread = %current_thread_name(), "Fetching.");
      ctx.sleep(delay)?;
      if key.trim().is_empty() {
        return Err("fetch key must not be blank".into());
      }
      Ok(format!("data-for-{key}"))
    })
  }
}
