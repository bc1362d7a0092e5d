use dispatch_pool::{OverflowPolicy, PoolConfig, ShutdownMode, WorkerPool};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

fn saturate(policy: OverflowPolicy) {
  let pool = WorkerPool::new(
    PoolConfig::default()
      .with_name(format!("{:?}_pool", policy).to_lowercase())
      .with_core_threads(1)
      .with_max_threads(2)
      .with_queue_capacity(1)
      .with_overflow_policy(policy),
  )
  .expect("valid pool configuration");

  // Two workers plus one queue slot: the fourth submission overflows.
  for i in 0..4 {
    let started = Instant::now();
    let submitted = pool.submit(move |ctx| {
      ctx.sleep(Duration::from_millis(300))?;
      Ok(thread::current().name().unwrap_or("<unnamed>").to_string())
    });
    match submitted {
      Ok(future) => info!(
        ?policy,
        task = i,
        waited = ?started.elapsed(),
        settled_on_submit = future.is_done(),
        "Submission accepted."
      ),
      Err(error) => info!(?policy, task = i, %error, "Submission refused."),
    }
  }

  pool.shutdown(ShutdownMode::Drain);
  info!(?policy, completed = pool.completed_count(), largest = pool.largest_worker_count(), "Pool drained.");
}

fn main() {
  tracing_subscriber::fmt().with_target(false).init();

  info!("--- Overflow Policy Example ---");
  saturate(OverflowPolicy::Block);
  saturate(OverflowPolicy::Reject);
  saturate(OverflowPolicy::CallerRuns);
  info!("--- Overflow Policy Example End ---");
}
