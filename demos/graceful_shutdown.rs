use dispatch_pool::{PoolConfig, ShutdownMode, TaskFuture, WorkerPool};
use std::thread;
use std::time::Duration;
use tracing::info;

fn submit_batch(pool: &WorkerPool, label: &str) -> Vec<TaskFuture<String>> {
  (0..4)
    .map(|i| {
      let label = label.to_string();
      pool
        .submit(move |ctx| {
          ctx.sleep(Duration::from_millis(400))?;
          Ok(format!("{} task {} done", label, i))
        })
        .expect("pool accepts work before shutdown")
    })
    .collect()
}

fn report(futures: Vec<TaskFuture<String>>) {
  for future in futures {
    match future.get() {
      Ok(value) => info!(task_id = future.id(), "{}", value),
      Err(error) => info!(task_id = future.id(), %error, "Task did not complete."),
    }
  }
}

fn main() {
  tracing_subscriber::fmt().with_target(false).init();
  let config = PoolConfig::default().with_core_threads(2).with_max_threads(2).with_queue_capacity(4);

  info!("--- Drain Shutdown ---");
  let pool = WorkerPool::new(config.clone().with_name("drain_pool")).expect("valid pool configuration");
  let futures = submit_batch(&pool, "drain");
  thread::sleep(Duration::from_millis(100));
  pool.shutdown(ShutdownMode::Drain);
  report(futures);

  info!("--- Cancel Shutdown ---");
  let pool = WorkerPool::new(config.with_name("cancel_pool")).expect("valid pool configuration");
  let futures = submit_batch(&pool, "cancel");
  thread::sleep(Duration::from_millis(100));
  pool.shutdown(ShutdownMode::Cancel);
  report(futures);
}
