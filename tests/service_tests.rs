use dispatch_pool::{
  join_all, AsyncController, AsyncTaskService, ControllerConfig, OverflowPolicy, PoolConfig, PoolError,
  ServiceConfig, ShutdownMode, WorkerPool, HEALTH_MESSAGE,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::sleep;

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,dispatch_pool=trace"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

fn service_with(pool_name: &str, service_config: ServiceConfig) -> Arc<AsyncTaskService> {
  let pool = WorkerPool::new(PoolConfig::default().with_name(pool_name)).unwrap();
  Arc::new(AsyncTaskService::new(Arc::new(pool), service_config))
}

#[tokio::test]
async fn test_fire_and_forget_returns_before_delay_elapses() {
  setup_tracing_for_test();
  let service = service_with(
    "test_service_fire_and_forget",
    ServiceConfig::default().with_fire_and_forget_delay(Duration::from_millis(500)),
  );

  let started = Instant::now();
  for i in 0..3 {
    service.run_fire_and_forget(format!("message {}", i)).unwrap();
  }
  assert!(
    started.elapsed() < Duration::from_millis(100),
    "submission must not wait for the task, took {:?}",
    started.elapsed()
  );
  assert_eq!(service.fire_and_forget_completed(), 0);

  sleep(Duration::from_millis(900)).await;
  assert_eq!(service.fire_and_forget_completed(), 3);
}

#[test]
fn test_run_sync_blocks_the_caller() {
  setup_tracing_for_test();
  let service = service_with(
    "test_service_sync",
    ServiceConfig::default().with_fire_and_forget_delay(Duration::from_millis(200)),
  );

  let started = Instant::now();
  service.run_sync("baseline");
  assert!(started.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn test_compute_async_doubles_input_within_delay_window() {
  setup_tracing_for_test();
  let service = service_with(
    "test_service_compute",
    ServiceConfig::default().with_compute_delay(Duration::from_millis(200)),
  );

  let started = Instant::now();
  let future = service.compute_async(10).unwrap();
  assert!(started.elapsed() < Duration::from_millis(100), "compute_async must return immediately");
  assert_eq!(future.clone().await, Ok(20));
  let elapsed = started.elapsed();
  assert!(elapsed >= Duration::from_millis(200));
  assert!(elapsed < Duration::from_millis(1000));

  // Blocking reads see the same settled value.
  assert_eq!(future.get(), Ok(20));
}

#[tokio::test]
async fn test_compute_async_overflow_fails_the_future() {
  setup_tracing_for_test();
  let service = service_with("test_service_overflow", ServiceConfig::uniform(Duration::from_millis(10)));

  match service.compute_async(i64::MAX).unwrap().await {
    Err(PoolError::TaskFailed(message)) => assert!(message.contains("overflows")),
    other => panic!("Expected TaskFailed, got {:?}", other),
  }
}

#[tokio::test]
async fn test_fetch_fan_out_runs_in_parallel() {
  setup_tracing_for_test();
  let service = service_with(
    "test_service_fan_out",
    ServiceConfig::default().with_fetch_delay(Duration::from_millis(1500)),
  );

  let started = Instant::now();
  let futures = vec![
    service.fetch_async("a").unwrap(),
    service.fetch_async("b").unwrap(),
    service.fetch_async("c").unwrap(),
  ];
  let values = join_all(futures).await.unwrap();
  let elapsed = started.elapsed();

  assert_eq!(values, vec!["data-for-a", "data-for-b", "data-for-c"]);
  assert!(elapsed >= Duration::from_millis(1500));
  assert!(
    elapsed < Duration::from_millis(2500),
    "three 1500ms fetches should overlap, took {:?}",
    elapsed
  );
}

#[tokio::test]
async fn test_join_surfaces_failed_fetch() {
  setup_tracing_for_test();
  let service = service_with("test_service_failed_fetch", ServiceConfig::uniform(Duration::from_millis(20)));

  let futures = vec![
    service.fetch_async("ok").unwrap(),
    service.fetch_async("   ").unwrap(),
    service.fetch_async("also-ok").unwrap(),
  ];
  assert_eq!(
    join_all(futures).await,
    Err(PoolError::TaskFailed("fetch key must not be blank".to_string()))
  );
}

#[test]
fn test_cancel_shutdown_interrupts_running_computation() {
  setup_tracing_for_test();
  let service = service_with(
    "test_service_cancel_shutdown",
    ServiceConfig::default().with_compute_delay(Duration::from_secs(10)),
  );

  let future = service.compute_async(1).unwrap();
  std::thread::sleep(Duration::from_millis(50));
  service.pool().shutdown(ShutdownMode::Cancel);

  assert_eq!(future.get_timeout(Duration::from_secs(1)), Err(PoolError::Cancelled));
  assert_eq!(service.compute_async(2).err(), Some(PoolError::PoolShutDown));
}

fn controller_with(pool_name: &str, delay: Duration, await_timeout: Duration) -> AsyncController {
  let service = service_with(pool_name, ServiceConfig::uniform(delay));
  AsyncController::new(service, ControllerConfig::default().with_await_timeout(await_timeout))
}

#[tokio::test]
async fn test_controller_acknowledges_async_request_immediately() {
  setup_tracing_for_test();
  let controller = controller_with("test_controller_async", Duration::from_millis(500), Duration::from_secs(5));

  let started = Instant::now();
  assert_eq!(controller.trigger_async(Some("hello")).await, "Started async task: hello");
  assert_eq!(controller.trigger_async(None).await, "Started async task: test message");
  assert!(started.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn test_controller_sync_request_waits_for_completion() {
  setup_tracing_for_test();
  let controller = controller_with("test_controller_sync", Duration::from_millis(100), Duration::from_secs(5));

  let started = Instant::now();
  assert_eq!(controller.trigger_sync(Some("hello")).await, "Sync task completed: hello");
  assert!(started.elapsed() >= Duration::from_millis(100));
}

#[tokio::test]
async fn test_controller_compute_and_fan_out() {
  setup_tracing_for_test();
  let controller = controller_with("test_controller_compute", Duration::from_millis(50), Duration::from_secs(5));

  assert_eq!(controller.trigger_compute(10).await, "Computed result: 10 * 2 = 20");
  assert_eq!(
    controller.trigger_fan_out().await,
    "Combined result: data-for-users, data-for-products, data-for-orders"
  );
  assert_eq!(controller.health(), HEALTH_MESSAGE);
}

#[tokio::test]
async fn test_controller_turns_failures_into_descriptive_responses() {
  setup_tracing_for_test();
  let controller = controller_with("test_controller_failures", Duration::from_millis(10), Duration::from_secs(5));

  let response = controller.trigger_compute(i64::MAX).await;
  assert!(response.starts_with("Computation failed: Task failed:"), "got {:?}", response);
}

#[tokio::test]
async fn test_controller_times_out_and_cancels_slow_tasks() {
  setup_tracing_for_test();
  let controller = controller_with("test_controller_timeout", Duration::from_secs(10), Duration::from_millis(100));

  assert_eq!(
    controller.trigger_compute(3).await,
    format!("Computation failed: {}", PoolError::TimedOut)
  );
  assert_eq!(
    controller.trigger_fan_out().await,
    format!("Fan-out failed: {}", PoolError::TimedOut)
  );

  // The abandoned tasks observed their cancellation and freed the workers.
  sleep(Duration::from_millis(200)).await;
  assert_eq!(controller.service().pool().active_count(), 0);
}

#[tokio::test]
async fn test_controller_reports_rejected_submission() {
  setup_tracing_for_test();
  let pool = WorkerPool::new(
    PoolConfig::default()
      .with_name("test_controller_rejected")
      .with_core_threads(1)
      .with_max_threads(1)
      .with_queue_capacity(0)
      .with_overflow_policy(OverflowPolicy::Reject),
  )
  .unwrap();
  let service = Arc::new(AsyncTaskService::new(
    Arc::new(pool),
    ServiceConfig::uniform(Duration::from_millis(300)),
  ));
  let controller = AsyncController::new(service, ControllerConfig::default());

  assert_eq!(controller.trigger_async(Some("first")).await, "Started async task: first");
  sleep(Duration::from_millis(50)).await;
  assert_eq!(
    controller.trigger_async(Some("second")).await,
    format!("Failed to start async task: {}", PoolError::RejectedSubmission)
  );
}

#[tokio::test]
async fn test_controller_keeps_runtime_responsive_while_pool_is_saturated() {
  setup_tracing_for_test();
  let pool = WorkerPool::new(
    PoolConfig::default()
      .with_name("test_controller_saturated")
      .with_core_threads(1)
      .with_max_threads(1)
      .with_queue_capacity(1)
      .with_overflow_policy(OverflowPolicy::Block),
  )
  .unwrap();
  let service = Arc::new(AsyncTaskService::new(
    Arc::new(pool),
    ServiceConfig::uniform(Duration::from_millis(10)),
  ));
  let controller = AsyncController::new(service.clone(), ControllerConfig::default());

  // One task running, one queued: the next submission has to wait.
  let running = service.pool().submit(|ctx| ctx.sleep(Duration::from_millis(400)).map_err(Into::into)).unwrap();
  let queued = service.pool().submit(|ctx| ctx.sleep(Duration::from_millis(400)).map_err(Into::into)).unwrap();
  sleep(Duration::from_millis(20)).await;

  let request = controller.clone();
  let pending = tokio::spawn(async move { request.trigger_compute(5).await });

  // The current-thread runtime still runs timers while the submission waits.
  let started = Instant::now();
  sleep(Duration::from_millis(50)).await;
  assert!(
    started.elapsed() < Duration::from_millis(300),
    "runtime stalled for {:?}",
    started.elapsed()
  );
  assert_eq!(controller.health(), HEALTH_MESSAGE);
  assert!(!pending.is_finished());

  assert_eq!(pending.await.unwrap(), "Computed result: 5 * 2 = 10");
  assert_eq!(running.get(), Ok(()));
  assert_eq!(queued.get(), Ok(()));
}

#[tokio::test]
async fn test_controller_timeout_covers_blocked_submission() {
  setup_tracing_for_test();
  let pool = WorkerPool::new(
    PoolConfig::default()
      .with_name("test_controller_blocked_timeout")
      .with_core_threads(1)
      .with_max_threads(1)
      .with_queue_capacity(0)
      .with_overflow_policy(OverflowPolicy::Block),
  )
  .unwrap();
  let service = Arc::new(AsyncTaskService::new(
    Arc::new(pool),
    ServiceConfig::uniform(Duration::from_secs(5)),
  ));
  let controller = AsyncController::new(
    service.clone(),
    ControllerConfig::default().with_await_timeout(Duration::from_millis(150)),
  );

  let busy = service.pool().submit(|ctx| ctx.sleep(Duration::from_millis(400)).map_err(Into::into)).unwrap();
  sleep(Duration::from_millis(20)).await;

  let started = Instant::now();
  assert_eq!(
    controller.trigger_compute(7).await,
    format!("Computation failed: {}", PoolError::TimedOut)
  );
  assert!(started.elapsed() < Duration::from_millis(350));

  // The late submission lands once the worker frees up and is cancelled at once.
  assert_eq!(busy.get(), Ok(()));
  sleep(Duration::from_millis(200)).await;
  assert_eq!(service.pool().active_count(), 0);
  assert_eq!(service.pool().queued_count(), 0);
}
