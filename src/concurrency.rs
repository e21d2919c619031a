use std::future::Future;

use anyhow::anyhow;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Result of one pooled task, tagged with its position in the input order.
#[derive(Debug)]
pub struct TaskOutcome<T> {
    pub index: usize,
    pub result: anyhow::Result<T>,
}

/// Runs `tasks` with at most `limit` in flight. Tasks start in FIFO order; a
/// failing task never cancels its siblings (failures come back as values).
///
/// Cancellation is cooperative: once `cancel` fires, no further tasks are
/// scheduled, but tasks already in flight drain to completion so callers can
/// commit their results. Unscheduled tasks are simply absent from the output.
pub async fn run_concurrent<T, F>(
    tasks: Vec<F>,
    limit: usize,
    cancel: &CancellationToken,
) -> Vec<TaskOutcome<T>>
where
    F: Future<Output = anyhow::Result<T>> + Send + 'static,
    T: Send + 'static,
{
    let limit = limit.max(1);
    let total = tasks.len();
    let mut queue = tasks.into_iter().enumerate();
    let mut in_flight: JoinSet<(usize, anyhow::Result<T>)> = JoinSet::new();
    let mut outcomes: Vec<TaskOutcome<T>> = Vec::with_capacity(total);

    while in_flight.len() < limit && !cancel.is_cancelled() {
        let Some((index, task)) = queue.next() else {
            break;
        };
        in_flight.spawn(async move { (index, task.await) });
    }

    while let Some(joined) = in_flight.join_next().await {
        match joined {
            Ok((index, result)) => outcomes.push(TaskOutcome { index, result }),
            Err(join_error) => outcomes.push(TaskOutcome {
                index: usize::MAX,
                result: Err(anyhow!("task panicked: {join_error}")),
            }),
        }

        if cancel.is_cancelled() {
            continue;
        }
        if let Some((index, task)) = queue.next() {
            in_flight.spawn(async move { (index, task.await) });
        }
    }

    if outcomes.len() < total {
        debug!(
            scheduled = outcomes.len(),
            total, "stopped scheduling after cancellation"
        );
    }
    outcomes.sort_by_key(|o| o.index);
    outcomes
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn respects_concurrency_limit() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..10)
            .map(|i| {
                let current = current.clone();
                let peak = peak.clone();
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                }
            })
            .collect();

        let outcomes = run_concurrent(tasks, 3, &CancellationToken::new()).await;
        assert_eq!(outcomes.len(), 10);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn failure_does_not_cancel_siblings() {
        let tasks: Vec<_> = (0..5)
            .map(|i| async move {
                if i == 2 {
                    anyhow::bail!("task {i} failed")
                }
                Ok(i)
            })
            .collect();

        let outcomes = run_concurrent(tasks, 2, &CancellationToken::new()).await;
        assert_eq!(outcomes.len(), 5);
        assert_eq!(outcomes.iter().filter(|o| o.result.is_err()).count(), 1);
        assert_eq!(outcomes.iter().filter(|o| o.result.is_ok()).count(), 4);
    }

    #[tokio::test]
    async fn results_come_back_in_input_order() {
        let tasks: Vec<_> = (0..6)
            .map(|i| async move {
                // Later tasks finish earlier.
                tokio::time::sleep(Duration::from_millis(30 - i * 5)).await;
                Ok(i)
            })
            .collect();

        let outcomes = run_concurrent(tasks, 6, &CancellationToken::new()).await;
        let order: Vec<usize> = outcomes.iter().map(|o| o.index).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn cancellation_stops_scheduling_but_drains_in_flight() {
        let started = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let started = started.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    Ok(())
                }
            })
            .collect();

        cancel.cancel();
        let outcomes = run_concurrent(tasks, 2, &cancel).await;
        // Nothing was scheduled: the token fired before the pool primed.
        assert!(outcomes.is_empty());
        assert_eq!(started.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn mid_run_cancellation_completes_started_tasks() {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let cancel = cancel_clone.clone();
                async move {
                    if i == 0 {
                        cancel.cancel();
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(i)
                }
            })
            .collect();

        let outcomes = run_concurrent(tasks, 2, &cancel).await;
        // The two primed tasks finish; the rest are never scheduled.
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.result.is_ok()));
    }
}
