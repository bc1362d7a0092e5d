use crate::error::{BoxError, Interrupted, PoolError};
use crate::task_future::TaskFuture;

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::pin;
use std::sync::Arc;
use std::task::{Context, Wake, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, trace};

/// Execution context handed to every task body.
///
/// Gives the task access to its id and to the cancellation signal it must
/// observe at blocking points.
#[derive(Debug, Clone)]
pub struct TaskContext {
  task_id: u64,
  token: CancellationToken,
}

impl TaskContext {
  pub(crate) fn new(task_id: u64, token: CancellationToken) -> Self {
    Self { task_id, token }
  }

  pub fn task_id(&self) -> u64 {
    self.task_id
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  /// The token backing this task's cancellation. Useful when the body hands
  /// work to async code that wants to `select!` on `cancelled()`.
  pub fn cancellation_token(&self) -> &CancellationToken {
    &self.token
  }

  /// Returns `Err(Interrupted)` if cancellation has been requested.
  pub fn checkpoint(&self) -> Result<(), Interrupted> {
    if self.token.is_cancelled() {
      Err(Interrupted)
    } else {
      Ok(())
    }
  }

  /// Blocks the worker thread for `duration`, waking early with
  /// `Err(Interrupted)` once the task is cancelled.
  pub fn sleep(&self, duration: Duration) -> Result<(), Interrupted> {
    let deadline = Instant::now().checked_add(duration);
    let signal = Arc::new(WakeSignal::default());
    let waker = Waker::from(signal.clone());
    let mut cx = Context::from_waker(&waker);
    let mut cancelled = pin!(self.token.cancelled());
    loop {
      // Registers the waker with the token, so a cancel notifies the condvar.
      if cancelled.as_mut().poll(&mut cx).is_ready() {
        return Err(Interrupted);
      }
      let mut woken = signal.woken.lock();
      while !*woken {
        match deadline {
          Some(deadline) => {
            if signal.condvar.wait_until(&mut woken, deadline).timed_out() {
              return Ok(());
            }
          }
          None => signal.condvar.wait(&mut woken),
        }
      }
      *woken = false;
    }
  }
}

/// Parks a sleeping task until its cancellation future is woken.
#[derive(Default)]
struct WakeSignal {
  woken: Mutex<bool>,
  condvar: Condvar,
}

impl Wake for WakeSignal {
  fn wake(self: Arc<Self>) {
    self.wake_by_ref();
  }

  fn wake_by_ref(self: &Arc<Self>) {
    *self.woken.lock() = true;
    self.condvar.notify_one();
  }
}

/// Type-erased unit of work owned by the pool queue.
///
/// Every submission is wrapped into one of these, so workers deal with a
/// single abstraction regardless of the task's output type.
pub(crate) trait Runnable: Send {
  fn task_id(&self) -> u64;

  fn cancellation_token(&self) -> &CancellationToken;

  /// Executes the body and settles the associated future.
  fn run(self: Box<Self>);

  /// Settles the associated future with `reason` without running the body.
  fn abort(self: Box<Self>, reason: PoolError);
}

pub(crate) struct ManagedTask<T, F> {
  future: TaskFuture<T>,
  body: F,
}

impl<T, F> ManagedTask<T, F> {
  pub(crate) fn new(future: TaskFuture<T>, body: F) -> Self {
    Self { future, body }
  }
}

impl<T, F> Runnable for ManagedTask<T, F>
where
  T: Clone + Send + 'static,
  F: FnOnce(&TaskContext) -> Result<T, BoxError> + Send + 'static,
{
  fn task_id(&self) -> u64 {
    self.future.id()
  }

  fn cancellation_token(&self) -> &CancellationToken {
    self.future.cancellation_token()
  }

  fn run(self: Box<Self>) {
    let ManagedTask { future, body } = *self;
    let task_id = future.id();
    let span = info_span!("managed_task", %task_id);
    let _entered = span.enter();

    let ctx = TaskContext::new(task_id, future.cancellation_token().clone());
    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| body(&ctx))) {
      Ok(Ok(value)) => {
        trace!(%task_id, "Task executed successfully.");
        Ok(value)
      }
      Ok(Err(err)) => {
        let pool_error = classify_task_error(err);
        debug!(%task_id, error = %pool_error, "Task returned an error.");
        Err(pool_error)
      }
      Err(payload) => {
        let message = panic_message(payload.as_ref());
        error!(%task_id, panic = %message, "Task panicked during execution.");
        Err(PoolError::TaskPanicked(message))
      }
    };

    if future.settle(outcome).is_err() {
      debug!(%task_id, "Future was settled before the task finished; outcome discarded.");
    }
  }

  fn abort(self: Box<Self>, reason: PoolError) {
    let task_id = self.future.id();
    debug!(%task_id, %reason, "Aborting task without running it.");
    let _ = self.future.fail(reason);
  }
}

/// Maps the error a task body returned onto the pool taxonomy.
fn classify_task_error(err: BoxError) -> PoolError {
  if err.is::<Interrupted>() {
    return PoolError::Cancelled;
  }
  match err.downcast_ref::<PoolError>() {
    Some(pool_error) => pool_error.clone(),
    None => PoolError::TaskFailed(err.to_string()),
  }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
  if let Some(message) = payload.downcast_ref::<&'static str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sleep_returns_interrupted_once_cancelled() {
    let token = CancellationToken::new();
    let ctx = TaskContext::new(7, token.clone());
    token.cancel();

    let started = Instant::now();
    assert_eq!(ctx.sleep(Duration::from_secs(5)), Err(Interrupted));
    assert!(started.elapsed() < Duration::from_secs(1));
  }

  #[test]
  fn sleep_wakes_promptly_when_cancelled_from_another_thread() {
    let token = CancellationToken::new();
    let ctx = TaskContext::new(8, token.child_token());
    let canceller = std::thread::spawn(move || {
      std::thread::sleep(Duration::from_millis(50));
      let cancelled_at = Instant::now();
      token.cancel();
      cancelled_at
    });

    assert_eq!(ctx.sleep(Duration::from_secs(5)), Err(Interrupted));
    let woke_at = Instant::now();
    let cancelled_at = canceller.join().unwrap();
    assert!(
      woke_at.duration_since(cancelled_at) < Duration::from_millis(10),
      "woke {:?} after cancellation",
      woke_at.duration_since(cancelled_at)
    );
  }

  #[test]
  fn sleep_runs_to_its_deadline_without_cancellation() {
    let ctx = TaskContext::new(9, CancellationToken::new());
    let started = Instant::now();
    assert_eq!(ctx.sleep(Duration::from_millis(30)), Ok(()));
    assert!(started.elapsed() >= Duration::from_millis(30));
    assert_eq!(ctx.sleep(Duration::ZERO), Ok(()));
  }

  #[test]
  fn interrupted_maps_to_cancelled() {
    let err: BoxError = Box::new(Interrupted);
    assert_eq!(classify_task_error(err), PoolError::Cancelled);
  }

  #[test]
  fn nested_pool_errors_are_preserved() {
    let err: BoxError = Box::new(PoolError::TimedOut);
    assert_eq!(classify_task_error(err), PoolError::TimedOut);

    let err: BoxError = "disk on fire".into();
    assert_eq!(classify_task_error(err), PoolError::TaskFailed("disk on fire".to_string()));
  }
}
