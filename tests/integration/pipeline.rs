//! End-to-end pipeline tests.
//!
//! These run a real scheduler and executor workers over the in-memory
//! queue and verify that schedules fire, tasks execute, and every attempt
//! lands in execution history.

use relais::testing::{CountingStrategy, FailingStrategy};
use relais::{
    Executor, ExecutionStatus, InMemoryQueue, InMemoryStorage, Job, LogNotifier, Schedule,
    Scheduler, SchedulerHandle, ServiceConfig, Storage, StrategyRegistry, TaskQueue, TaskRunner,
};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::common::{wait_for_history_status, wait_for_job_history};

const STREAM: &str = "tasks";
const GROUP: &str = "workers";

/// A running scheduler plus executor workers over shared in-memory state.
struct Stack {
    storage: Arc<InMemoryStorage>,
    handle: SchedulerHandle,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Stack {
    /// Start a scheduler ticking every 20ms and `workers` executor workers.
    async fn start(registry: StrategyRegistry, workers: usize) -> Self {
        let storage = Arc::new(InMemoryStorage::new());
        let queue = Arc::new(InMemoryQueue::new());
        queue.ensure_group(STREAM, GROUP).await.unwrap();

        let scheduler = Scheduler::new(
            storage.clone(),
            queue.clone(),
            Arc::new(LogNotifier::new()),
            STREAM,
        )
        .with_tick_interval(Duration::from_millis(20));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (handle, scheduler_task) = scheduler.start(shutdown_rx.clone());

        let mut tasks = vec![scheduler_task];
        let runner = Arc::new(TaskRunner::new(
            queue,
            storage.clone(),
            Arc::new(registry),
            STREAM,
            GROUP,
        ));
        for index in 0..workers {
            let executor = Executor::new(runner.clone(), format!("worker-{index}"))
                .with_block(Duration::from_millis(20));
            tasks.push(tokio::spawn(executor.run(shutdown_rx.clone())));
        }

        Self {
            storage,
            handle,
            shutdown,
            tasks,
        }
    }

    /// Signal shutdown and wait for every task to stop.
    async fn stop(self) {
        self.shutdown.send(true).unwrap();
        for task in self.tasks {
            tokio::time::timeout(Duration::from_secs(2), task)
                .await
                .expect("task should stop after shutdown")
                .unwrap();
        }
    }
}

/// Test: A due schedule fires, the worker executes, history records success.
#[tokio::test]
async fn test_scheduled_job_runs_to_completion() {
    let tick = Arc::new(CountingStrategy::new("tick"));
    let mut registry = StrategyRegistry::new();
    registry.register(tick.clone());

    let stack = Stack::start(registry, 1).await;

    let job = Job::new("heartbeat", "Heartbeat", "tick");
    stack.storage.create_job(job.clone()).await.unwrap();
    // A fresh schedule has no next fire time yet, so it is due immediately.
    let schedule = Schedule::new("heartbeat-hourly", "heartbeat", "@hourly").unwrap();
    stack.storage.create_schedule(schedule).await.unwrap();

    let rows = wait_for_job_history(
        stack.storage.as_ref(),
        job.id(),
        ExecutionStatus::Completed,
        1,
        Duration::from_secs(5),
    )
    .await;

    assert!(tick.calls() >= 1);

    let completed = rows
        .iter()
        .find(|r| r.status == ExecutionStatus::Completed)
        .unwrap();
    assert_eq!(completed.output.as_deref(), Some("done"));
    assert_eq!(
        completed.schedule_id.as_ref().map(|s| s.as_str()),
        Some("heartbeat-hourly")
    );

    // The fire advanced the schedule: next occurrence is in the future.
    let schedule = stack
        .storage
        .get_schedule(&"heartbeat-hourly".into())
        .await
        .unwrap();
    assert!(schedule.next_execution().is_some());
    assert!(schedule.last_execution().is_some());

    stack.stop().await;
}

/// Test: A manual trigger executes once, outside any schedule.
#[tokio::test]
async fn test_manual_trigger_runs_to_completion() {
    let mut registry = StrategyRegistry::new();
    registry.register(Arc::new(CountingStrategy::new("report").with_output("42 rows")));

    let stack = Stack::start(registry, 1).await;

    let job = Job::new("report", "Daily Report", "report");
    stack.storage.create_job(job.clone()).await.unwrap();

    let history_id = stack.handle.trigger_job("report").await.unwrap();

    let row = wait_for_history_status(
        stack.storage.as_ref(),
        history_id,
        ExecutionStatus::Completed,
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(row.output.as_deref(), Some("42 rows"));
    assert!(row.schedule_id.is_none());
    assert_eq!(row.attempt, 1);
    assert!(row.completed_at.is_some());

    stack.stop().await;
}

/// Test: A permanent failure is recorded and the task is not retried.
#[tokio::test]
async fn test_permanent_failure_recorded_once() {
    let broken = Arc::new(FailingStrategy::permanent("broken"));
    let mut registry = StrategyRegistry::new();
    registry.register(broken.clone());

    let stack = Stack::start(registry, 1).await;

    let job = Job::new("doomed", "Doomed Job", "broken");
    stack.storage.create_job(job.clone()).await.unwrap();

    let history_id = stack.handle.trigger_job("doomed").await.unwrap();

    let row = wait_for_history_status(
        stack.storage.as_ref(),
        history_id,
        ExecutionStatus::Failed,
        Duration::from_secs(5),
    )
    .await;

    assert!(row.error_message.as_deref().unwrap().contains("broken input"));

    // Permanent failures settle the entry; no second attempt appears.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let rows = stack
        .storage
        .list_history_for_job(job.id(), 10)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(broken.calls(), 1);

    stack.stop().await;
}

/// Test: Several workers drain a burst of triggers without losing any.
#[tokio::test]
async fn test_multiple_workers_share_the_stream() {
    let tick = Arc::new(CountingStrategy::new("tick"));
    let mut registry = StrategyRegistry::new();
    registry.register(tick.clone());

    let stack = Stack::start(registry, 3).await;

    let job = Job::new("burst", "Burst Job", "tick");
    stack.storage.create_job(job.clone()).await.unwrap();

    for _ in 0..6 {
        stack.handle.trigger_job("burst").await.unwrap();
    }

    let rows = wait_for_job_history(
        stack.storage.as_ref(),
        job.id(),
        ExecutionStatus::Completed,
        6,
        Duration::from_secs(5),
    )
    .await;

    // Consumer-group semantics: six entries, six executions, no duplicates.
    assert_eq!(rows.len(), 6);
    assert_eq!(tick.calls(), 6);

    stack.stop().await;
}

/// Test: Triggering an unknown job fails without touching history.
#[tokio::test]
async fn test_trigger_unknown_job_fails() {
    let stack = Stack::start(StrategyRegistry::new(), 1).await;

    let result = stack.handle.trigger_job("ghost").await;
    assert!(result.is_err());

    stack.stop().await;
}

/// Test: Config seeds flow through the same pipeline as API-created rows.
#[tokio::test]
async fn test_pipeline_from_config_seeds() {
    let yaml = r#"
jobs:
  - id: cleanup
    name: Nightly Cleanup
    kind: tick
    timeout_secs: 30
schedules:
  - id: cleanup-nightly
    job_id: cleanup
    expression: "@daily"
"#;
    let config = ServiceConfig::parse(yaml).unwrap();

    let tick = Arc::new(CountingStrategy::new("tick"));
    let mut registry = StrategyRegistry::new();
    registry.register(tick.clone());

    let stack = Stack::start(registry, 1).await;

    // Seed the way the binary does at startup.
    for job in &config.jobs {
        stack.storage.create_job(job.clone()).await.unwrap();
    }
    for schedule in &config.schedules {
        stack
            .storage
            .create_schedule(schedule.clone())
            .await
            .unwrap();
    }

    let rows = wait_for_job_history(
        stack.storage.as_ref(),
        &"cleanup".into(),
        ExecutionStatus::Completed,
        1,
        Duration::from_secs(5),
    )
    .await;

    assert_eq!(
        rows[0].schedule_id.as_ref().map(|s| s.as_str()),
        Some("cleanup-nightly")
    );

    stack.stop().await;
}
