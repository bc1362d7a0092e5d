use crate::config::{OverflowPolicy, PoolConfig};
use crate::error::{BoxError, PoolError};
use crate::task::{ManagedTask, Runnable, TaskContext};
use crate::task_future::TaskFuture;

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, trace, warn};

thread_local! {
  static IN_POOL_WORKER: Cell<bool> = const { Cell::new(false) };
}

/// Defines how the pool should behave upon shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
  /// Stop accepting submissions; queued and running tasks finish normally.
  Drain,
  /// Discard queued tasks and signal cancellation to running ones.
  /// Every affected future settles with `PoolError::Cancelled`.
  Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
  Running,
  Draining,
  Stopped,
}

type Job = Box<dyn Runnable>;

enum Dispatch {
  Accepted,
  RunOnCaller(Job),
}

struct PoolState {
  queue: VecDeque<Job>,
  /// Alive worker threads, including ones still starting up.
  workers: usize,
  /// Spawned workers that have not yet taken the lock for the first time.
  starting: usize,
  /// Workers parked waiting for work.
  idle: usize,
  /// Workers currently executing a task.
  active: usize,
  largest_workers: usize,
  next_worker_index: usize,
  lifecycle: Lifecycle,
}

struct Shared {
  pool_name: Arc<String>,
  config: PoolConfig,
  state: Mutex<PoolState>,
  work_available: Condvar,
  space_available: Condvar,
  terminated: Condvar,
  /// Parent of every task token; cancelled by `ShutdownMode::Cancel`.
  cancel_all: CancellationToken,
  active_tasks: DashMap<u64, (CancellationToken, Instant)>,
  completed: AtomicU64,
}

/// A bounded, elastic pool of worker threads.
///
/// `core_threads` workers are started up front and stay alive. Submissions
/// go to a FIFO queue; once it is full, extra workers are spawned up to
/// `max_threads`, and past that the configured `OverflowPolicy` decides.
/// Extra workers retire after `keep_alive` of idleness.
pub struct WorkerPool {
  shared: Arc<Shared>,
}

impl WorkerPool {
  pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
    config.validate()?;

    let shared = Arc::new(Shared {
      pool_name: Arc::new(config.name.clone()),
      state: Mutex::new(PoolState {
        queue: VecDeque::with_capacity(config.queue_capacity.min(1024)),
        workers: 0,
        starting: 0,
        idle: 0,
        active: 0,
        largest_workers: 0,
        next_worker_index: 0,
        lifecycle: Lifecycle::Running,
      }),
      config,
      work_available: Condvar::new(),
      space_available: Condvar::new(),
      terminated: Condvar::new(),
      cancel_all: CancellationToken::new(),
      active_tasks: DashMap::new(),
      completed: AtomicU64::new(0),
    });

    {
      let mut state = shared.state.lock();
      for _ in 0..shared.config.core_threads {
        if let Err(spawn_error) = Shared::spawn_worker(&shared, &mut state) {
          state.lifecycle = Lifecycle::Stopped;
          drop(state);
          shared.work_available.notify_all();
          return Err(spawn_error);
        }
      }
    }

    info!(
      pool_name = %*shared.pool_name,
      core_threads = shared.config.core_threads,
      max_threads = shared.config.max_threads,
      queue_capacity = shared.config.queue_capacity,
      overflow_policy = ?shared.config.overflow_policy,
      "Worker pool started."
    );
    Ok(Self { shared })
  }

  pub fn name(&self) -> &str {
    &self.shared.pool_name
  }

  pub fn config(&self) -> &PoolConfig {
    &self.shared.config
  }

  /// Number of alive worker threads.
  pub fn worker_count(&self) -> usize {
    self.shared.state.lock().workers
  }

  /// Highest number of workers alive at the same time so far.
  pub fn largest_worker_count(&self) -> usize {
    self.shared.state.lock().largest_workers
  }

  /// Number of workers currently executing a task.
  pub fn active_count(&self) -> usize {
    self.shared.state.lock().active
  }

  /// Returns the current number of tasks waiting for a worker.
  pub fn queued_count(&self) -> usize {
    self.shared.state.lock().queue.len()
  }

  /// Tasks that ran to completion (successfully or not) on any thread.
  pub fn completed_count(&self) -> u64 {
    self.shared.completed.load(AtomicOrdering::SeqCst)
  }

  /// Ids of the tasks executing right now.
  pub fn active_task_ids(&self) -> Vec<u64> {
    self.shared.active_tasks.iter().map(|entry| *entry.key()).collect()
  }

  /// Signals cancellation to a running task by id. Returns `false` when no
  /// task with that id is executing.
  pub fn cancel_task(&self, task_id: u64) -> bool {
    match self.shared.active_tasks.get(&task_id) {
      Some(entry) => {
        let (token, started_at) = entry.value();
        debug!(pool_name = %self.shared.pool_name, %task_id, running_for = ?started_at.elapsed(), "Cancelling active task by id.");
        token.cancel();
        true
      }
      None => false,
    }
  }

  pub fn is_shutdown(&self) -> bool {
    self.shared.state.lock().lifecycle != Lifecycle::Running
  }

  /// Submits `task` and returns a future for its result.
  ///
  /// Never waits for the task to run. It may wait for queue space when the
  /// pool is saturated and the policy is `OverflowPolicy::Block`.
  ///
  /// # Errors
  /// `PoolShutDown` once shutdown has begun, `RejectedSubmission` under the
  /// `Reject` policy, `WorkerSpawn` if the OS refuses a new thread.
  pub fn submit<F, T>(&self, task: F) -> Result<TaskFuture<T>, PoolError>
  where
    F: FnOnce(&TaskContext) -> Result<T, BoxError> + Send + 'static,
    T: Clone + Send + 'static,
  {
    let future = TaskFuture::with_token(self.shared.cancel_all.child_token());
    let task_id = future.id();
    let job: Job = Box::new(ManagedTask::new(future.clone(), task));

    debug!(pool_name = %self.shared.pool_name, %task_id, "Submitting task.");
    match Shared::dispatch(&self.shared, job)? {
      Dispatch::Accepted => {}
      Dispatch::RunOnCaller(job) => {
        debug!(pool_name = %self.shared.pool_name, %task_id, "Pool saturated; running task on the caller's thread.");
        self.shared.execute(job);
      }
    }
    Ok(future)
  }

  /// Begins shutdown and blocks until every worker thread has exited.
  ///
  /// Calling it again escalates `Drain` to `Cancel` but never the reverse.
  /// When invoked from inside a pool task it only signals, since waiting
  /// would deadlock on the calling worker.
  pub fn shutdown(&self, mode: ShutdownMode) {
    let discarded = {
      let mut state = self.shared.state.lock();
      match (state.lifecycle, mode) {
        (Lifecycle::Stopped, _) | (Lifecycle::Draining, ShutdownMode::Drain) => {
          trace!(pool_name = %self.shared.pool_name, "Shutdown already in progress.");
          VecDeque::new()
        }
        (_, ShutdownMode::Drain) => {
          info!(pool_name = %self.shared.pool_name, queued = state.queue.len(), "Draining pool: finishing queued and active tasks.");
          state.lifecycle = Lifecycle::Draining;
          VecDeque::new()
        }
        (_, ShutdownMode::Cancel) => {
          info!(
            pool_name = %self.shared.pool_name,
            queued = state.queue.len(),
            active = state.active,
            "Cancelling pool: discarding queued tasks and interrupting active ones."
          );
          state.lifecycle = Lifecycle::Stopped;
          std::mem::take(&mut state.queue)
        }
      }
    };

    if mode == ShutdownMode::Cancel {
      self.shared.cancel_all.cancel();
    }
    self.shared.work_available.notify_all();
    self.shared.space_available.notify_all();
    for job in discarded {
      job.abort(PoolError::Cancelled);
    }

    if IN_POOL_WORKER.with(Cell::get) {
      warn!(pool_name = %self.shared.pool_name, "Shutdown requested from a pool worker; not waiting for termination.");
      return;
    }
    self.shared.wait_for_workers(None);
    info!(pool_name = %self.shared.pool_name, completed = self.completed_count(), "Pool shutdown completed.");
  }

  /// Waits up to `timeout` for all workers to exit after a shutdown.
  /// Returns whether the pool fully terminated.
  pub fn await_termination(&self, timeout: Duration) -> bool {
    self.shared.wait_for_workers(Instant::now().checked_add(timeout))
  }
}

impl Shared {
  fn dispatch(shared: &Arc<Self>, job: Job) -> Result<Dispatch, PoolError> {
    let mut state = shared.state.lock();
    loop {
      if state.lifecycle != Lifecycle::Running {
        warn!(pool_name = %shared.pool_name, task_id = job.task_id(), "Submit: pool is shutting down or closed.");
        return Err(PoolError::PoolShutDown);
      }

      // Tasks an idle or starting worker is about to claim do not count
      // against the queue capacity.
      let claimable = state.idle + state.starting;
      let has_room = state.queue.len() < shared.config.queue_capacity + claimable;
      if has_room && state.workers > 0 {
        state.queue.push_back(job);
        drop(state);
        shared.work_available.notify_one();
        return Ok(Dispatch::Accepted);
      }

      if state.workers < shared.config.max_threads {
        Self::spawn_worker(shared, &mut state)?;
        debug!(pool_name = %shared.pool_name, workers = state.workers, "Spawned a worker for the submission.");
        state.queue.push_back(job);
        return Ok(Dispatch::Accepted);
      }

      match shared.config.overflow_policy {
        OverflowPolicy::Block => {
          trace!(pool_name = %shared.pool_name, task_id = job.task_id(), "Pool saturated; blocking submitter.");
          shared.space_available.wait(&mut state);
        }
        OverflowPolicy::Reject => {
          warn!(pool_name = %shared.pool_name, task_id = job.task_id(), "Pool saturated; rejecting submission.");
          return Err(PoolError::RejectedSubmission);
        }
        OverflowPolicy::CallerRuns => return Ok(Dispatch::RunOnCaller(job)),
      }
    }
  }

  fn spawn_worker(shared: &Arc<Self>, state: &mut MutexGuard<'_, PoolState>) -> Result<(), PoolError> {
    state.next_worker_index += 1;
    let index = state.next_worker_index;
    let thread_name = format!("{}{}", shared.config.thread_name_prefix, index);
    let worker_shared = shared.clone();

    thread::Builder::new()
      .name(thread_name)
      .spawn(move || Self::run_worker(worker_shared, index))
      .map_err(|io_error| PoolError::WorkerSpawn(io_error.to_string()))?;

    state.workers += 1;
    state.starting += 1;
    state.largest_workers = state.largest_workers.max(state.workers);
    Ok(())
  }

  fn run_worker(shared: Arc<Self>, index: usize) {
    IN_POOL_WORKER.with(|flag| flag.set(true));
    let span = info_span!("pool_worker", pool_name = %*shared.pool_name, worker = index);
    let _entered = span.enter();
    debug!("Worker started.");

    let mut state = shared.state.lock();
    state.starting -= 1;
    while let Some(job) = shared.next_job(&mut state) {
      state.active += 1;
      MutexGuard::unlocked(&mut state, || shared.execute(job));
      state.active -= 1;
    }
    state.workers -= 1;
    let remaining = state.workers;
    drop(state);

    shared.space_available.notify_all();
    shared.terminated.notify_all();
    debug!(remaining, "Worker stopped.");
  }

  /// Blocks until a job is available or the worker should exit.
  fn next_job(&self, state: &mut MutexGuard<'_, PoolState>) -> Option<Job> {
    loop {
      if state.lifecycle == Lifecycle::Stopped {
        return None;
      }
      if let Some(job) = state.queue.pop_front() {
        self.space_available.notify_one();
        return Some(job);
      }
      if state.lifecycle == Lifecycle::Draining {
        return None;
      }

      let is_extra = state.workers > self.config.core_threads;
      state.idle += 1;
      // An idle worker is room for one more handoff; blocked submitters recheck.
      self.space_available.notify_one();
      let timed_out = if is_extra {
        self.work_available.wait_for(state, self.config.keep_alive).timed_out()
      } else {
        self.work_available.wait(state);
        false
      };
      state.idle -= 1;

      if timed_out
        && state.queue.is_empty()
        && state.lifecycle == Lifecycle::Running
        && state.workers > self.config.core_threads
      {
        debug!(keep_alive = ?self.config.keep_alive, "Idle beyond keep-alive; retiring extra worker.");
        return None;
      }
    }
  }

  fn execute(&self, job: Job) {
    let task_id = job.task_id();
    let token = job.cancellation_token().clone();
    if token.is_cancelled() {
      debug!(pool_name = %self.pool_name, %task_id, "Dequeued task already cancelled.");
      job.abort(PoolError::Cancelled);
      return;
    }

    self.active_tasks.insert(task_id, (token, Instant::now()));
    job.run();
    self.active_tasks.remove(&task_id);
    self.completed.fetch_add(1, AtomicOrdering::SeqCst);
  }

  fn wait_for_workers(&self, deadline: Option<Instant>) -> bool {
    let mut state = self.state.lock();
    while state.workers > 0 {
      match deadline {
        Some(deadline) => {
          if self.terminated.wait_until(&mut state, deadline).timed_out() {
            return state.workers == 0;
          }
        }
        None => self.terminated.wait(&mut state),
      }
    }
    true
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    let mut state = self.shared.state.lock();
    if state.lifecycle == Lifecycle::Running {
      info!(
        pool_name = %*self.shared.pool_name,
        "WorkerPool dropped. Initiating implicit drain (workers finish queued tasks, then exit)."
      );
      state.lifecycle = Lifecycle::Draining;
      drop(state);
      self.shared.work_available.notify_all();
      self.shared.space_available.notify_all();
    } else {
      trace!(pool_name = %*self.shared.pool_name, "Drop: shutdown already in progress or completed.");
    }
  }
}
