// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Bounded concurrency runner.
//!
//! Executes an ordered list of async task factories with at most `max` in
//! flight, returning results aligned to the input order regardless of
//! completion order. A failing task does not cancel its siblings: every
//! task runs to completion and all failures are reported together
//! afterwards. Retry, if any, belongs to the collaborator, not here.

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use thiserror::Error;

/// One task's failure, preserved verbatim in the batch error.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    pub index: usize,
    pub message: String,
}

/// All failures of one batch, flattened; never just the first one.
#[derive(Debug, Error)]
#[error("{} of {} tasks failed: [{}]", .failures.len(), .total, format_failures(.failures))]
pub struct TaskBatchError {
    pub total: usize,
    pub failures: Vec<TaskFailure>,
}

fn format_failures(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("#{}: {}", f.index, f.message))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Run `factories` with at most `max` tasks in flight (`max >= 1`).
///
/// Output slot `i` always holds task `i`'s result. An empty input returns
/// an empty vector immediately; `max >= factories.len()` behaves as full
/// parallel execution.
pub async fn run_with_limit<T, F, Fut>(
    factories: Vec<F>,
    max: usize,
) -> Result<Vec<T>, TaskBatchError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let max = max.max(1);
    let total = factories.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let mut slots: Vec<Option<T>> = (0..total).map(|_| None).collect();
    let mut failures: Vec<TaskFailure> = Vec::new();

    let mut pending = factories.into_iter().enumerate();
    let mut in_flight = FuturesUnordered::new();

    loop {
        // Keep the window full while tasks remain.
        while in_flight.len() < max {
            match pending.next() {
                Some((index, factory)) => {
                    in_flight.push(async move { (index, factory().await) });
                }
                None => break,
            }
        }

        match in_flight.next().await {
            Some((index, Ok(value))) => slots[index] = Some(value),
            Some((index, Err(error))) => failures.push(TaskFailure {
                index,
                message: format!("{error:#}"),
            }),
            None => break,
        }
    }

    if !failures.is_empty() {
        failures.sort_by_key(|f| f.index);
        return Err(TaskBatchError { total, failures });
    }

    // Every slot was filled: no failures and each index completed once.
    Ok(slots.into_iter().map(|slot| slot.expect("task completed")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_results_align_to_input_order() {
        // Later tasks finish earlier: delays decrease with the index.
        let factories: Vec<_> = (0..10u64)
            .map(|i| {
                move || async move {
                    tokio::time::sleep(Duration::from_millis(100 - i * 10)).await;
                    Ok(i)
                }
            })
            .collect();

        let results = run_with_limit(factories, 3).await.unwrap();
        assert_eq!(results, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_count_never_exceeds_max() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let factories: Vec<_> = (0..10)
            .map(|_| {
                let active = active.clone();
                let peak = peak.clone();
                move || async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
            })
            .collect();

        run_with_limit(factories, 3).await.unwrap();
        assert!(peak.load(Ordering::SeqCst) <= 3, "cap exceeded");
    }

    #[tokio::test]
    async fn test_failure_does_not_skip_siblings() {
        let completed = Arc::new(AtomicUsize::new(0));
        let factories: Vec<_> = (0..5)
            .map(|i| {
                let completed = completed.clone();
                move || async move {
                    if i == 2 {
                        anyhow::bail!("task two exploded");
                    }
                    completed.fetch_add(1, Ordering::SeqCst);
                    Ok(i)
                }
            })
            .collect();

        let error = run_with_limit(factories, 2).await.unwrap_err();
        assert_eq!(completed.load(Ordering::SeqCst), 4);
        assert_eq!(error.failures.len(), 1);
        assert_eq!(error.failures[0].index, 2);
        assert!(error.to_string().contains("task two exploded"));
    }

    #[tokio::test]
    async fn test_multiple_failures_all_preserved() {
        let factories: Vec<_> = (0..4)
            .map(|i| {
                move || async move {
                    if i % 2 == 0 {
                        anyhow::bail!("failure {i}");
                    }
                    Ok(i)
                }
            })
            .collect();

        let error = run_with_limit(factories, 4).await.unwrap_err();
        let message = error.to_string();
        assert!(message.contains("failure 0"));
        assert!(message.contains("failure 2"));
        assert_eq!(error.failures.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_input_returns_immediately() {
        let factories: Vec<fn() -> futures::future::Ready<anyhow::Result<u8>>> = vec![];
        let results = run_with_limit(factories, 3).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_max_larger_than_task_count() {
        let factories: Vec<_> = (0..3).map(|i| move || async move { Ok(i * 2) }).collect();
        let results = run_with_limit(factories, 16).await.unwrap();
        assert_eq!(results, vec![0, 2, 4]);
    }
}
