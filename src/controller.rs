use crate::combinator::join_all;
use crate::config::ControllerConfig;
use crate::error::PoolError;
use crate::service::AsyncTaskService;
use crate::task_future::TaskFuture;

use std::sync::Arc;

use tokio::time::Instant;

use tracing::{info, warn};

/// Keys fetched concurrently by `trigger_fan_out`.
pub const FAN_OUT_KEYS: [&str; 3] = ["users", "products", "orders"];

pub const HEALTH_MESSAGE: &str = "Async demo application is running!";

/// Request-facing adapter over `AsyncTaskService`.
///
/// Each method corresponds to one endpoint and always answers with a
/// string; task failures become descriptive error messages.
#[derive(Clone)]
pub struct AsyncController {
  service: Arc<AsyncTaskService>,
  config: ControllerConfig,
}

impl AsyncController {
  pub fn new(service: Arc<AsyncTaskService>, config: ControllerConfig) -> Self {
    Self { service, config }
  }

  pub fn service(&self) -> &Arc<AsyncTaskService> {
    &self.service
  }

  /// Starts a fire-and-forget task and acknowledges without waiting for it.
  pub async fn trigger_async(&self, message: Option<&str>) -> String {
    let message = message.unwrap_or(&self.config.default_message).to_string();
    info!(%message, "Request received: async task.");
    let deadline = Instant::now() + self.config.await_timeout;
    let task_message = message.clone();
    let submitted = self
      .submit_bounded(deadline, move |service| service.run_fire_and_forget(task_message), |()| {})
      .await;
    match submitted {
      Ok(()) => {
        info!(%message, "Responding before the async task completes.");
        format!("Started async task: {message}")
      }
      Err(error) => {
        warn!(%message, %error, "Could not start async task.");
        format!("Failed to start async task: {error}")
      }
    }
  }

  /// Runs the same work synchronously, answering only once it is done.
  /// The work is moved to tokio's blocking pool so the runtime stays free.
  pub async fn trigger_sync(&self, message: Option<&str>) -> String {
    let message = message.unwrap_or(&self.config.default_message).to_string();
    info!(%message, "Request received: sync task.");
    let service = self.service.clone();
    let task_message = message.clone();
    match tokio::task::spawn_blocking(move || service.run_sync(&task_message)).await {
      Ok(()) => format!("Sync task completed: {message}"),
      Err(join_error) => {
        warn!(%message, %join_error, "Sync task did not finish.");
        format!("Sync task failed: {join_error}")
      }
    }
  }

  /// Awaits `compute_async(input)` and formats the doubled value.
  pub async fn trigger_compute(&self, input: i64) -> String {
    info!(input, "Request received: async computation.");
    let deadline = Instant::now() + self.config.await_timeout;
    let submitted = self
      .submit_bounded(
        deadline,
        move |service| service.compute_async(input),
        |late: TaskFuture<i64>| late.cancel(),
      )
      .await;
    let outcome = match submitted {
      Ok(future) => self.await_bounded(deadline, future, || {}).await,
      Err(error) => Err(error),
    };
    match outcome {
      Ok(value) => format!("Computed result: {input} * 2 = {value}"),
      Err(error) => {
        warn!(input, %error, "Computation failed.");
        format!("Computation failed: {error}")
      }
    }
  }

  /// Fetches every key in `FAN_OUT_KEYS` concurrently and joins the values.
  pub async fn trigger_fan_out(&self) -> String {
    info!(keys = ?FAN_OUT_KEYS, "Request received: fan-out fetch.");
    let deadline = Instant::now() + self.config.await_timeout;
    let submitted = self
      .submit_bounded(deadline, submit_fetches, |late: Vec<TaskFuture<String>>| {
        late.iter().for_each(TaskFuture::cancel)
      })
      .await;
    let fetches = match submitted {
      Ok(fetches) => fetches,
      Err(error) => {
        warn!(%error, "Fan-out submission failed.");
        return format!("Fan-out failed: {error}");
      }
    };

    let combined = join_all(fetches.clone());
    let on_timeout = move || fetches.iter().for_each(TaskFuture::cancel);
    match self.await_bounded(deadline, combined, on_timeout).await {
      Ok(values) => format!("Combined result: {}", values.join(", ")),
      Err(error) => {
        warn!(%error, "Fan-out failed.");
        format!("Fan-out failed: {error}")
      }
    }
  }

  pub fn health(&self) -> &'static str {
    HEALTH_MESSAGE
  }

  /// Hands a pool submission to tokio's blocking threads, since `submit`
  /// may block under `OverflowPolicy::Block`. If `deadline` passes first the
  /// request gives up and whatever the submission later yields goes to
  /// `on_late`.
  async fn submit_bounded<T, S, L>(&self, deadline: Instant, submit: S, on_late: L) -> Result<T, PoolError>
  where
    T: Send + 'static,
    S: FnOnce(&AsyncTaskService) -> Result<T, PoolError> + Send + 'static,
    L: FnOnce(T) + Send + 'static,
  {
    let service = self.service.clone();
    let mut submission = tokio::task::spawn_blocking(move || submit(&service));
    match tokio::time::timeout_at(deadline, &mut submission).await {
      Ok(Ok(submitted)) => submitted,
      Ok(Err(join_error)) => Err(PoolError::task_failed(format!("submission did not complete: {join_error}"))),
      Err(_elapsed) => {
        warn!(timeout = ?self.config.await_timeout, "Gave up waiting for the pool to accept work.");
        tokio::spawn(async move {
          if let Ok(Ok(late)) = submission.await {
            on_late(late);
          }
        });
        Err(PoolError::TimedOut)
      }
    }
  }

  /// Awaits `future` until `deadline`. On timeout the future gets a
  /// cancellation request and `on_timeout` runs.
  async fn await_bounded<T, F>(&self, deadline: Instant, future: TaskFuture<T>, on_timeout: F) -> Result<T, PoolError>
  where
    T: Clone + Send + 'static,
    F: FnOnce(),
  {
    let handle = future.clone();
    match tokio::time::timeout_at(deadline, future).await {
      Ok(outcome) => outcome,
      Err(_elapsed) => {
        warn!(task_id = handle.id(), timeout = ?self.config.await_timeout, "Gave up waiting for task result.");
        handle.cancel();
        on_timeout();
        Err(PoolError::TimedOut)
      }
    }
  }
}

/// Submits one fetch per key; a failed submission cancels the ones already started.
fn submit_fetches(service: &AsyncTaskService) -> Result<Vec<TaskFuture<String>>, PoolError> {
  let mut fetches = Vec::with_capacity(FAN_OUT_KEYS.len());
  for key in FAN_OUT_KEYS {
    match service.fetch_async(key) {
      Ok(future) => fetches.push(future),
      Err(error) => {
        fetches.iter().for_each(TaskFuture::cancel);
        warn!(key, %error, "Fan-out submission failed.");
        return Err(error);
      }
    }
  }
  Ok(fetches)
}
