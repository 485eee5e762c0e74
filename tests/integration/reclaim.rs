//! Reclaim and dead-letter integration tests.
//!
//! A transiently failing task leaves its entry pending; the retry loop
//! reclaims it after an idle threshold and re-drives it. Tasks that never
//! succeed are dropped at the delivery ceiling with one notification.

use relais::testing::{FailingStrategy, FlakyStrategy, RecordingNotifier};
use relais::{
    Executor, ExecutionStatus, InMemoryQueue, InMemoryStorage, Job, RetryLoop, Scheduler,
    SchedulerHandle, Storage, StrategyRegistry, TaskQueue, TaskRunner,
};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::common::wait_for_job_history;

const STREAM: &str = "tasks";
const GROUP: &str = "workers";

/// Scheduler, one executor worker, and a retry loop sharing one stream.
///
/// The executor settles fresh entries quickly; `min_idle` is long enough
/// that the retry loop only ever sees entries the executor already gave
/// up on.
struct Stack {
    storage: Arc<InMemoryStorage>,
    notifier: Arc<RecordingNotifier>,
    handle: SchedulerHandle,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Stack {
    async fn start(registry: StrategyRegistry, max_retries: u32) -> Self {
        let storage = Arc::new(InMemoryStorage::new());
        let queue = Arc::new(InMemoryQueue::new());
        let notifier = Arc::new(RecordingNotifier::new());
        queue.ensure_group(STREAM, GROUP).await.unwrap();

        let scheduler = Scheduler::new(
            storage.clone(),
            queue.clone(),
            notifier.clone(),
            STREAM,
        )
        .with_tick_interval(Duration::from_millis(20));

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (handle, scheduler_task) = scheduler.start(shutdown_rx.clone());

        let runner = Arc::new(TaskRunner::new(
            queue,
            storage.clone(),
            Arc::new(registry),
            STREAM,
            GROUP,
        ));
        let executor =
            Executor::new(runner.clone(), "worker-0").with_block(Duration::from_millis(20));
        let retry_loop = RetryLoop::new(runner, notifier.clone(), "worker-reclaim")
            .with_interval(Duration::from_millis(50))
            .with_min_idle(Duration::from_millis(200))
            .with_max_retries(max_retries);

        let tasks = vec![
            scheduler_task,
            tokio::spawn(executor.run(shutdown_rx.clone())),
            tokio::spawn(retry_loop.run(shutdown_rx)),
        ];

        Self {
            storage,
            notifier,
            handle,
            shutdown,
            tasks,
        }
    }

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

/// Test: A transient failure is reclaimed and retried to success.
#[tokio::test]
async fn test_transient_failure_retried_to_success() {
    let flaky = Arc::new(FlakyStrategy::new("flaky", 1));
    let mut registry = StrategyRegistry::new();
    registry.register(flaky.clone());

    let stack = Stack::start(registry, 5).await;

    let job = Job::new("sync", "Sync Job", "flaky");
    stack.storage.create_job(job.clone()).await.unwrap();
    stack.handle.trigger_job("sync").await.unwrap();

    let rows = wait_for_job_history(
        stack.storage.as_ref(),
        job.id(),
        ExecutionStatus::Completed,
        1,
        Duration::from_secs(5),
    )
    .await;

    // The failed first attempt kept its own row; the retry got a fresh one.
    assert_eq!(rows.len(), 2);
    let failed = rows
        .iter()
        .find(|r| r.status == ExecutionStatus::Failed)
        .unwrap();
    assert_eq!(failed.attempt, 1);
    let completed = rows
        .iter()
        .find(|r| r.status == ExecutionStatus::Completed)
        .unwrap();
    assert_eq!(completed.attempt, 2);
    assert_eq!(completed.output.as_deref(), Some("recovered"));

    assert_eq!(flaky.calls(), 2);
    assert!(stack.notifier.messages().await.is_empty());

    stack.stop().await;
}

/// Test: A task that never succeeds is dropped at the delivery ceiling
/// with exactly one notification.
#[tokio::test]
async fn test_exhausted_task_dead_letters_and_notifies() {
    let down = Arc::new(FailingStrategy::transient("down"));
    let mut registry = StrategyRegistry::new();
    registry.register(down.clone());

    // Ceiling 2: the first delivery fails, the reclaim itself is the
    // second and final delivery.
    let stack = Stack::start(registry, 2).await;

    let job = Job::new("hopeless", "Hopeless Job", "down");
    stack.storage.create_job(job.clone()).await.unwrap();
    stack.handle.trigger_job("hopeless").await.unwrap();

    let start = tokio::time::Instant::now();
    loop {
        if !stack.notifier.messages().await.is_empty() {
            break;
        }
        if start.elapsed() > Duration::from_secs(5) {
            panic!("Timeout waiting for dead-letter notification");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let messages = stack.notifier.messages().await;
    assert_eq!(messages.len(), 1);
    assert!(messages[0].contains("hopeless"));
    assert!(messages[0].contains("2 deliveries"));

    // The strategy ran only once; the ceiling reclaim dropped the entry
    // without executing it again.
    assert_eq!(down.calls(), 1);
    let rows = stack
        .storage
        .list_history_for_job(job.id(), 10)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, ExecutionStatus::Failed);

    // The entry is gone: no further retries, no second notification.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(stack.notifier.messages().await.len(), 1);
    assert_eq!(down.calls(), 1);

    stack.stop().await;
}

/// Test: With a higher ceiling the task is retried before being dropped.
#[tokio::test]
async fn test_failing_task_retries_before_dead_letter() {
    let down = Arc::new(FailingStrategy::transient("down"));
    let mut registry = StrategyRegistry::new();
    registry.register(down.clone());

    let stack = Stack::start(registry, 3).await;

    let job = Job::new("stubborn", "Stubborn Job", "down");
    stack.storage.create_job(job.clone()).await.unwrap();
    stack.handle.trigger_job("stubborn").await.unwrap();

    let start = tokio::time::Instant::now();
    loop {
        if !stack.notifier.messages().await.is_empty() {
            break;
        }
        if start.elapsed() > Duration::from_secs(5) {
            panic!("Timeout waiting for dead-letter notification");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Delivery 1 (executor) and delivery 2 (reclaim) both executed and
    // failed; delivery 3 hit the ceiling and was dropped unexecuted.
    assert_eq!(down.calls(), 2);
    let rows = stack
        .storage
        .list_history_for_job(job.id(), 10)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.status == ExecutionStatus::Failed));
    assert!(stack.notifier.messages().await[0].contains("3 deliveries"));

    stack.stop().await;
}
