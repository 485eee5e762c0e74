//! Graceful shutdown integration tests.
//!
//! All service loops watch one shutdown channel; flipping it (or dropping
//! the sender) must stop every loop promptly, even mid-execution.

use relais::api::{ApiConfig, create_api_state, start_server};
use relais::testing::{BlockingStrategy, CountingStrategy, RecordingNotifier};
use relais::{
    Executor, ExecutionStatus, InMemoryQueue, InMemoryStorage, Job, LogNotifier, RetryLoop,
    Scheduler, Storage, StrategyRegistry, TaskQueue, TaskRunner,
};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const STREAM: &str = "tasks";
const GROUP: &str = "workers";

async fn join_all(tasks: Vec<JoinHandle<()>>) {
    for task in tasks {
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("task should stop after shutdown")
            .unwrap();
    }
}

/// Test: One shutdown signal stops the scheduler, workers, and retry loop.
#[tokio::test]
async fn test_all_services_stop_on_shutdown_signal() {
    let storage = Arc::new(InMemoryStorage::new());
    let queue = Arc::new(InMemoryQueue::new());
    queue.ensure_group(STREAM, GROUP).await.unwrap();

    let mut registry = StrategyRegistry::new();
    registry.register(Arc::new(CountingStrategy::new("tick")));

    let scheduler = Scheduler::new(
        storage.clone(),
        queue.clone(),
        Arc::new(LogNotifier::new()),
        STREAM,
    )
    .with_tick_interval(Duration::from_millis(20));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (_handle, scheduler_task) = scheduler.start(shutdown_rx.clone());

    let runner = Arc::new(TaskRunner::new(
        queue,
        storage,
        Arc::new(registry),
        STREAM,
        GROUP,
    ));
    let mut tasks = vec![scheduler_task];
    for index in 0..2 {
        let executor = Executor::new(runner.clone(), format!("worker-{index}"))
            .with_block(Duration::from_millis(20));
        tasks.push(tokio::spawn(executor.run(shutdown_rx.clone())));
    }
    let retry_loop = RetryLoop::new(
        runner,
        Arc::new(RecordingNotifier::new()),
        "worker-reclaim",
    )
    .with_interval(Duration::from_millis(50));
    tasks.push(tokio::spawn(retry_loop.run(shutdown_rx)));

    // Let everything spin up, then stop it all with one signal.
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();

    join_all(tasks).await;
}

/// Test: Dropping the shutdown sender stops every loop too.
#[tokio::test]
async fn test_dropping_shutdown_sender_stops_services() {
    let storage = Arc::new(InMemoryStorage::new());
    let queue = Arc::new(InMemoryQueue::new());
    queue.ensure_group(STREAM, GROUP).await.unwrap();

    let scheduler = Scheduler::new(
        storage.clone(),
        queue.clone(),
        Arc::new(LogNotifier::new()),
        STREAM,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (_handle, scheduler_task) = scheduler.start(shutdown_rx.clone());

    let runner = Arc::new(TaskRunner::new(
        queue,
        storage,
        Arc::new(StrategyRegistry::new()),
        STREAM,
        GROUP,
    ));
    let executor = Executor::new(runner, "worker-0").with_block(Duration::from_millis(20));
    let executor_task = tokio::spawn(executor.run(shutdown_rx));

    drop(shutdown_tx);

    join_all(vec![scheduler_task, executor_task]).await;
}

/// Test: Shutdown interrupts a long-running execution instead of waiting
/// for it; the interrupted attempt's row stays running for the sweep and
/// its entry stays pending for a later reclaim.
#[tokio::test]
async fn test_shutdown_interrupts_long_running_task() {
    let storage = Arc::new(InMemoryStorage::new());
    let queue = Arc::new(InMemoryQueue::new());
    queue.ensure_group(STREAM, GROUP).await.unwrap();

    let mut registry = StrategyRegistry::new();
    registry.register(Arc::new(BlockingStrategy::new(
        "slow",
        Duration::from_secs(30),
    )));

    let scheduler = Scheduler::new(
        storage.clone(),
        queue.clone(),
        Arc::new(LogNotifier::new()),
        STREAM,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, scheduler_task) = scheduler.start(shutdown_rx.clone());

    let runner = Arc::new(TaskRunner::new(
        queue,
        storage.clone(),
        Arc::new(registry),
        STREAM,
        GROUP,
    ));
    let executor = Executor::new(runner, "worker-0").with_block(Duration::from_millis(20));
    let executor_task = tokio::spawn(executor.run(shutdown_rx));

    let job = Job::new("slow", "Slow Job", "slow");
    storage.create_job(job.clone()).await.unwrap();
    let history_id = handle.trigger_job("slow").await.unwrap();

    // Give the worker time to pick the task up, then pull the plug.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let stopped_at = tokio::time::Instant::now();
    shutdown_tx.send(true).unwrap();

    join_all(vec![scheduler_task, executor_task]).await;
    assert!(stopped_at.elapsed() < Duration::from_secs(2));

    // No terminal write happened; recovery is the sweep's job later.
    let row = storage.get_history(history_id).await.unwrap();
    assert_eq!(row.status, ExecutionStatus::Running);
}

/// Test: The API server honors the shutdown signal.
#[tokio::test]
async fn test_api_server_stops_on_shutdown() {
    let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
    let queue = Arc::new(InMemoryQueue::new());
    queue.ensure_group(STREAM, GROUP).await.unwrap();

    let scheduler = Scheduler::new(
        storage.clone(),
        queue,
        Arc::new(LogNotifier::new()),
        STREAM,
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (handle, scheduler_task) = scheduler.start(shutdown_rx.clone());

    // Port 0 asks the OS for any free port.
    let config = ApiConfig::new("127.0.0.1", 0);
    let state = create_api_state(handle, storage);
    let server_task = start_server(config, state, shutdown_rx).await.unwrap();

    shutdown_tx.send(true).unwrap();

    join_all(vec![scheduler_task, server_task]).await;
}
