use crate::error::PoolError;
use crate::task::panic_message;

use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, trace, warn};

lazy_static::lazy_static! {
  static ref NEXT_TASK_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Observable state of a `TaskFuture`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FutureState {
  Pending,
  Completed,
  Failed,
}

/// The settled result a `TaskFuture` hands to its observers.
pub type Outcome<T> = Result<T, PoolError>;

type Continuation<T> = Box<dyn FnOnce(&Outcome<T>) + Send + 'static>;

struct Slot<T> {
  outcome: Option<Outcome<T>>,
  continuations: Vec<Continuation<T>>,
  wakers: Vec<Waker>,
}

struct Shared<T> {
  task_id: u64,
  slot: Mutex<Slot<T>>,
  settled: Condvar,
  cancellation_token: CancellationToken,
}

/// A single-assignment handle to the eventual result of a task.
///
/// Clones share the same cell: any clone may observe it, and the first
/// `resolve`/`fail` wins. Later attempts return `PoolError::AlreadyResolved`.
///
/// Besides blocking reads (`get`, `get_timeout`) the handle implements
/// `std::future::Future`, so async callers can `.await` it without parking a
/// runtime thread.
pub struct TaskFuture<T> {
  shared: Arc<Shared<T>>,
}

impl<T> Clone for TaskFuture<T> {
  fn clone(&self) -> Self {
    Self {
      shared: self.shared.clone(),
    }
  }
}

impl<T> fmt::Debug for TaskFuture<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = match self.shared.slot.try_lock() {
      Some(slot) => match slot.outcome {
        None => "Pending",
        Some(Ok(_)) => "Completed",
        Some(Err(_)) => "Failed",
      },
      None => "<locked>",
    };
    f.debug_struct("TaskFuture")
      .field("task_id", &self.shared.task_id)
      .field("state", &state)
      .finish()
  }
}

impl<T: Clone + Send + 'static> Default for TaskFuture<T> {
  fn default() -> Self {
    Self::new()
  }
}

impl<T: Clone + Send + 'static> TaskFuture<T> {
  /// Creates a pending future with its own cancellation token.
  pub fn new() -> Self {
    Self::with_token(CancellationToken::new())
  }

  pub(crate) fn with_token(cancellation_token: CancellationToken) -> Self {
    Self {
      shared: Arc::new(Shared {
        task_id: NEXT_TASK_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed),
        slot: Mutex::new(Slot {
          outcome: None,
          continuations: Vec::new(),
          wakers: Vec::new(),
        }),
        settled: Condvar::new(),
        cancellation_token,
      }),
    }
  }

  /// A future that is already `Completed` with `value`.
  pub fn completed(value: T) -> Self {
    let future = Self::new();
    let _ = future.resolve(value);
    future
  }

  /// A future that is already `Failed` with `error`.
  pub fn failed(error: PoolError) -> Self {
    let future = Self::new();
    let _ = future.fail(error);
    future
  }

  /// Unique id of the task this future belongs to.
  pub fn id(&self) -> u64 {
    self.shared.task_id
  }

  pub fn state(&self) -> FutureState {
    match self.shared.slot.lock().outcome {
      None => FutureState::Pending,
      Some(Ok(_)) => FutureState::Completed,
      Some(Err(_)) => FutureState::Failed,
    }
  }

  pub fn is_done(&self) -> bool {
    self.state() != FutureState::Pending
  }

  /// Transitions `Pending -> Completed(value)`.
  pub fn resolve(&self, value: T) -> Result<(), PoolError> {
    self.settle(Ok(value))
  }

  /// Transitions `Pending -> Failed(error)`.
  pub fn fail(&self, error: PoolError) -> Result<(), PoolError> {
    self.settle(Err(error))
  }

  pub(crate) fn settle(&self, outcome: Outcome<T>) -> Result<(), PoolError> {
    let task_id = self.shared.task_id;
    let (continuations, wakers, snapshot) = {
      let mut slot = self.shared.slot.lock();
      if slot.outcome.is_some() {
        warn!(%task_id, "Attempted to settle a future that is already settled.");
        return Err(PoolError::AlreadyResolved);
      }
      let continuations = std::mem::take(&mut slot.continuations);
      let snapshot = (!continuations.is_empty()).then(|| outcome.clone());
      slot.outcome = Some(outcome);
      (continuations, std::mem::take(&mut slot.wakers), snapshot)
    };

    trace!(%task_id, waiters = wakers.len(), continuations = continuations.len(), "Future settled.");
    self.shared.settled.notify_all();
    for waker in wakers {
      waker.wake();
    }
    if let Some(outcome) = snapshot {
      for continuation in continuations {
        run_continuation(task_id, continuation, &outcome);
      }
    }
    Ok(())
  }

  /// Blocks the calling thread until the future settles.
  ///
  /// # Errors
  /// Returns the error the future failed with (`TaskFailed`, `TaskPanicked`,
  /// `Cancelled`, ...).
  pub fn get(&self) -> Outcome<T> {
    let mut slot = self.shared.slot.lock();
    loop {
      if let Some(outcome) = slot.outcome.as_ref() {
        return outcome.clone();
      }
      self.shared.settled.wait(&mut slot);
    }
  }

  /// Like `get`, but gives up with `PoolError::TimedOut` once `timeout`
  /// elapses while the future is still pending.
  pub fn get_timeout(&self, timeout: Duration) -> Outcome<T> {
    let Some(deadline) = Instant::now().checked_add(timeout) else {
      return self.get();
    };
    let mut slot = self.shared.slot.lock();
    loop {
      if let Some(outcome) = slot.outcome.as_ref() {
        return outcome.clone();
      }
      if self.shared.settled.wait_until(&mut slot, deadline).timed_out() {
        return match slot.outcome.as_ref() {
          Some(outcome) => outcome.clone(),
          None => Err(PoolError::TimedOut),
        };
      }
    }
  }

  /// Non-blocking read; `None` while pending.
  pub fn try_get(&self) -> Option<Outcome<T>> {
    self.shared.slot.lock().outcome.clone()
  }

  /// Registers `callback` to run exactly once with the outcome.
  ///
  /// If the future has already settled the callback runs immediately on the
  /// calling thread; otherwise it runs on the thread that settles it.
  pub fn on_complete<F>(&self, callback: F)
  where
    F: FnOnce(&Outcome<T>) + Send + 'static,
  {
    let ready = {
      let mut slot = self.shared.slot.lock();
      match slot.outcome.as_ref() {
        Some(outcome) => outcome.clone(),
        None => {
          slot.continuations.push(Box::new(callback));
          return;
        }
      }
    };
    run_continuation(self.shared.task_id, Box::new(callback), &ready);
  }

  /// Returns a future resolving to `transform(value)` once this one
  /// completes. Failures propagate untouched and `transform` is skipped.
  pub fn map<U, F>(&self, transform: F) -> TaskFuture<U>
  where
    U: Clone + Send + 'static,
    F: FnOnce(T) -> U + Send + 'static,
  {
    let derived = TaskFuture::new();
    let target = derived.clone();
    self.on_complete(move |outcome| {
      let mapped = match outcome {
        Ok(value) => {
          let value = value.clone();
          panic::catch_unwind(AssertUnwindSafe(move || transform(value)))
            .map_err(|payload| PoolError::TaskPanicked(panic_message(payload.as_ref())))
        }
        Err(error) => Err(error.clone()),
      };
      let _ = target.settle(mapped);
    });
    derived
  }

  /// Requests cooperative cancellation of the task behind this future.
  /// A task still in the queue is skipped; a running task observes the
  /// request at its next `TaskContext::sleep` or `checkpoint`.
  pub fn cancel(&self) {
    trace!(task_id = %self.shared.task_id, "Cancellation requested through future handle.");
    self.shared.cancellation_token.cancel();
  }

  pub fn is_cancellation_requested(&self) -> bool {
    self.shared.cancellation_token.is_cancelled()
  }

  pub(crate) fn cancellation_token(&self) -> &CancellationToken {
    &self.shared.cancellation_token
  }
}

impl<T: Clone + Send + 'static> Future for TaskFuture<T> {
  type Output = Outcome<T>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let mut slot = self.shared.slot.lock();
    if let Some(outcome) = slot.outcome.as_ref() {
      return Poll::Ready(outcome.clone());
    }
    if !slot.wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
      slot.wakers.push(cx.waker().clone());
    }
    Poll::Pending
  }
}

fn run_continuation<T>(task_id: u64, continuation: Continuation<T>, outcome: &Outcome<T>) {
  if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| continuation(outcome))) {
    error!(%task_id, panic = %panic_message(payload.as_ref()), "A completion continuation panicked.");
  }
}
