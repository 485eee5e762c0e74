//! Common test utilities shared across integration tests.

use relais::{ExecutionHistory, ExecutionStatus, HistoryId, JobId, Storage};
use std::time::Duration;

/// Wait for a history row to reach an expected status, polling storage.
///
/// This is more reliable than fixed sleeps since execution time can vary.
/// Polls storage every 10ms and times out after the specified duration.
///
/// # Panics
///
/// Panics if the timeout is reached before the row reaches the expected
/// status.
pub async fn wait_for_history_status(
    storage: &dyn Storage,
    history_id: HistoryId,
    expected: ExecutionStatus,
    timeout: Duration,
) -> ExecutionHistory {
    let start = tokio::time::Instant::now();
    loop {
        let row = storage.get_history(history_id).await.unwrap();
        if row.status == expected {
            return row;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for history {} to reach {:?}, current status: {:?}",
                history_id, expected, row.status
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until a job has at least `count` history rows in a given status.
///
/// Scheduled fires open their rows inside the engine, so callers do not
/// know the ids up front; this polls the per-job listing instead.
///
/// # Panics
///
/// Panics if the timeout is reached first.
pub async fn wait_for_job_history(
    storage: &dyn Storage,
    job_id: &JobId,
    status: ExecutionStatus,
    count: usize,
    timeout: Duration,
) -> Vec<ExecutionHistory> {
    let start = tokio::time::Instant::now();
    loop {
        let rows = storage.list_history_for_job(job_id, 100).await.unwrap();
        let matching = rows.iter().filter(|r| r.status == status).count();
        if matching >= count {
            return rows;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for job {} to have {} {:?} rows, currently {} of {} total",
                job_id,
                count,
                status,
                matching,
                rows.len()
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
