use crate::error::PoolError;

use std::time::Duration;

/// What `submit` does when every worker is busy, the thread ceiling is
/// reached and the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
  /// Park the submitting thread until a queue slot frees up.
  #[default]
  Block,
  /// Fail the submission with `PoolError::RejectedSubmission`.
  Reject,
  /// Run the task synchronously on the submitting thread.
  CallerRuns,
}

/// Sizing and behaviour of a `WorkerPool`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
  /// Name used in log fields.
  pub name: String,
  /// Workers started up front and never retired.
  pub core_threads: usize,
  /// Ceiling on simultaneously alive workers.
  pub max_threads: usize,
  /// Tasks allowed to wait for a worker.
  pub queue_capacity: usize,
  /// Idle time after which a worker above the core count retires.
  pub keep_alive: Duration,
  pub overflow_policy: OverflowPolicy,
  /// Worker threads are named `{prefix}{n}`, starting at 1.
  pub thread_name_prefix: String,
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self {
      name: "task_executor".to_string(),
      core_threads: 5,
      max_threads: 10,
      queue_capacity: 100,
      keep_alive: Duration::from_secs(60),
      overflow_policy: OverflowPolicy::Block,
      thread_name_prefix: "async-".to_string(),
    }
  }
}

impl PoolConfig {
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn with_core_threads(mut self, core_threads: usize) -> Self {
    self.core_threads = core_threads;
    self
  }

  pub fn with_max_threads(mut self, max_threads: usize) -> Self {
    self.max_threads = max_threads;
    self
  }

  pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
    self.queue_capacity = queue_capacity;
    self
  }

  pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
    self.keep_alive = keep_alive;
    self
  }

  pub fn with_overflow_policy(mut self, overflow_policy: OverflowPolicy) -> Self {
    self.overflow_policy = overflow_policy;
    self
  }

  pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.thread_name_prefix = prefix.into();
    self
  }

  pub(crate) fn validate(&self) -> Result<(), PoolError> {
    if self.max_threads == 0 {
      return Err(PoolError::InvalidConfig("max_threads must be at least 1".to_string()));
    }
    if self.core_threads > self.max_threads {
      return Err(PoolError::InvalidConfig(format!(
        "core_threads ({}) cannot exceed max_threads ({})",
        self.core_threads, self.max_threads
      )));
    }
    Ok(())
  }
}

/// Simulated latencies used by `AsyncTaskService`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
  pub fire_and_forget_delay: Duration,
  pub compute_delay: Duration,
  pub fetch_delay: Duration,
}

impl Default for ServiceConfig {
  fn default() -> Self {
    Self {
      fire_and_forget_delay: Duration::from_secs(3),
      compute_delay: Duration::from_secs(1),
      fetch_delay: Duration::from_millis(1500),
    }
  }
}

impl ServiceConfig {
  /// Uses the same delay for every simulated operation.
  pub fn uniform(delay: Duration) -> Self {
    Self {
      fire_and_forget_delay: delay,
      compute_delay: delay,
      fetch_delay: delay,
    }
  }

  pub fn with_fire_and_forget_delay(mut self, delay: Duration) -> Self {
    self.fire_and_forget_delay = delay;
    self
  }

  pub fn with_compute_delay(mut self, delay: Duration) -> Self {
    self.compute_delay = delay;
    self
  }

  pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
    self.fetch_delay = delay;
    self
  }
}

/// Behaviour of the request-facing `AsyncController`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
  /// Upper bound on how long a request waits for a task result.
  pub await_timeout: Duration,
  /// Message used when a request carries none.
  pub default_message: String,
}

impl Default for ControllerConfig {
  fn default() -> Self {
    Self {
      await_timeout: Duration::from_secs(30),
      default_message: "test message".to_string(),
    }
  }
}

impl ControllerConfig {
  pub fn with_await_timeout(mut self, await_timeout: Duration) -> Self {
    self.await_timeout = await_timeout;
    self
  }

  pub fn with_default_message(mut self, message: impl Into<String>) -> Self {
    self.default_message = message.into();
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_match_demo_executor() {
    let config = PoolConfig::default();
    assert_eq!(config.core_threads, 5);
    assert_eq!(config.max_threads, 10);
    assert_eq!(config.queue_capacity, 100);
    assert_eq!(config.thread_name_prefix, "async-");
    assert_eq!(config.overflow_policy, OverflowPolicy::Block);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn rejects_inverted_thread_bounds() {
    let config = PoolConfig::default().with_core_threads(4).with_max_threads(2);
    assert!(matches!(config.validate(), Err(PoolError::InvalidConfig(_))));

    let config = PoolConfig::default().with_core_threads(0).with_max_threads(0);
    assert!(matches!(config.validate(), Err(PoolError::InvalidConfig(_))));
  }
}
