//! Bounded-concurrency batch runner and shared progress counter.
//!
//! Work is split into fixed-size groups that run concurrently with
//! `join_all`; the next group starts only when the whole previous group has
//! finished. Per-item results are returned to the caller in input order so
//! all bookkeeping stays single-writer.

use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;
use tracing::info;

/// Run `task` over `items` in concurrent groups of at most `limit`.
pub async fn run_in_groups<T, F, Fut, R>(items: Vec<T>, limit: usize, mut task: F) -> Vec<R>
where
    F: FnMut(T) -> Fut,
    Fut: std::future::Future<Output = R>,
{
    let limit = limit.max(1);
    let mut results = Vec::with_capacity(items.len());
    let mut iter = items.into_iter();
    loop {
        let group: Vec<T> = iter.by_ref().take(limit).collect();
        if group.is_empty() {
            break;
        }
        let outcomes = join_all(group.into_iter().map(&mut task)).await;
        results.extend(outcomes);
    }
    results
}

/// Atomic `processed/total` counter shared by concurrent per-file tasks.
pub struct Progress {
    total: usize,
    done: AtomicUsize,
}

impl Progress {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            done: AtomicUsize::new(0),
        }
    }

    /// Record one terminal per-file state and emit the progress event.
    pub fn record(&self, label: &str) {
        let processed = self.done.fetch_add(1, Ordering::SeqCst) + 1;
        info!(processed, total = self.total, file = %label, "file processed");
    }

    pub fn processed(&self) -> usize {
        self.done.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_concurrency_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let items: Vec<usize> = (0..10).collect();
        let results = run_in_groups(items, 3, |i| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                i * 2
            }
        })
        .await;

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(results, (0..10).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn zero_limit_is_treated_as_one() {
        let results = run_in_groups(vec![1, 2], 0, |i| async move { i }).await;
        assert_eq!(results, vec![1, 2]);
    }

    #[test]
    fn progress_counts_up_to_total() {
        let progress = Progress::new(2);
        progress.record("a.jpg");
        progress.record("b.jpg");
        assert_eq!(progress.processed(), progress.total());
    }
}
