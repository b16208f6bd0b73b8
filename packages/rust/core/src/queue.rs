//! Bounded work queues.

use std::future::Future;

use futures::stream::{self, StreamExt};

/// Run `work` over every item with at most `limit` in flight, returning once
/// the queue has fully drained. Output order is completion order.
pub(crate) async fn drain<T, R, F, Fut>(items: Vec<T>, limit: usize, work: F) -> Vec<R>
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = R>,
{
    stream::iter(items)
        .map(work)
        .buffer_unordered(limit.max(1))
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn never_exceeds_limit() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let results = drain((0..20).collect(), 3, |i: usize| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                i * 2
            }
        })
        .await;

        assert_eq!(results.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(results.iter().sum::<usize>(), (0..20).map(|i| i * 2).sum::<usize>());
    }

    #[tokio::test]
    async fn zero_limit_still_drains() {
        let results = drain(vec![1, 2], 0, |i: i32| async move { i }).await;
        assert_eq!(results.len(), 2);
    }
}
