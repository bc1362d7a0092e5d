use dispatch_pool::{AsyncController, AsyncTaskService, ControllerConfig, PoolConfig, ServiceConfig, WorkerPool};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,dispatch_pool=debug")),
    )
    .init();

  info!("--- Request Layer Example ---");

  let pool = Arc::new(WorkerPool::new(PoolConfig::default()).expect("valid pool configuration"));
  let service = Arc::new(AsyncTaskService::new(pool.clone(), ServiceConfig::default()));
  let controller = AsyncController::new(service.clone(), ControllerConfig::default());

  info!("GET /api/health -> {}", controller.health());

  let started = Instant::now();
  info!("GET /api/async -> {} ({:?})", controller.trigger_async(Some("hello")).await, started.elapsed());

  let started = Instant::now();
  info!("GET /api/sync -> {} ({:?})", controller.trigger_sync(Some("hello")).await, started.elapsed());

  let started = Instant::now();
  info!("GET /api/compute?input=10 -> {} ({:?})", controller.trigger_compute(10).await, started.elapsed());

  let started = Instant::now();
  info!("GET /api/fan-out -> {} ({:?})", controller.trigger_fan_out().await, started.elapsed());

  info!(
    "Fire-and-forget tasks completed so far: {}",
    service.fire_and_forget_completed()
  );
  pool.shutdown(dispatch_pool::ShutdownMode::Drain);
  info!(
    "Pool drained. Fire-and-forget tasks completed: {}",
    service.fire_and_forget_completed()
  );
  info!("--- Request Layer Example End ---");
}
