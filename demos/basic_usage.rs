use dispatch_pool::{PoolConfig, ShutdownMode, TaskFuture, WorkerPool};
use std::time::Duration;
use tracing::info;

fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let pool = WorkerPool::new(
    PoolConfig::default()
      .with_name("basic_pool")
      .with_core_threads(2)
      .with_max_threads(2)
      .with_queue_capacity(10),
  )
  .expect("valid pool configuration");

  let mut futures: Vec<TaskFuture<String>> = Vec::new();

  for i in 0..5u64 {
    // Alternate sleep times for variety
    let sleep_duration = 500 + (i % 3 * 250);
    let submitted = pool.submit(move |ctx| {
      info!("Task {} starting, will sleep for {}ms", i, sleep_duration);
      ctx.sleep(Duration::from_millis(sleep_duration))?;
      Ok(format!("Task {} finished successfully after {}ms", i, sleep_duration))
    });
    match submitted {
      Ok(future) => {
        info!("Submitted task {} with future id {}", i, future.id());
        futures.push(future);
      }
      Err(e) => tracing::error!("Failed to submit task {}: {:?}", i, e),
    }
  }

  info!("All tasks submitted. Waiting for results...");

  for future in futures {
    let task_id = future.id();
    match future.get() {
      Ok(result) => info!("Result for task {}: {}", task_id, result),
      Err(e) => info!("Error for task {}: {}", task_id, e),
    }
  }

  info!("All task results processed. Shutting down pool.");
  pool.shutdown(ShutdownMode::Drain);
  info!("Pool shutdown complete. Tasks completed: {}", pool.completed_count());
  info!("--- Basic Usage Example End ---");
}
