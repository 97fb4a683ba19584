//! Shared utilities: a fixed-capacity ring with O(1) overwrite for
//! rolling averages, and a cancellable timeout wrapper so every suspension
//! point that can hang exposes an explicit `cancel()` on every exit path.

use std::collections::VecDeque;
use std::future::Future;
use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};

/// Bounded ring buffer with O(1) push and running-sum mean; never grows
/// past `capacity`.
#[derive(Debug, Clone)]
pub struct RollingAverage {
    capacity: usize,
    samples: VecDeque<f64>,
    sum: f64,
}

impl RollingAverage {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "RollingAverage capacity must be positive");
        Self {
            capacity,
            samples: VecDeque::with_capacity(capacity),
            sum: 0.0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            if let Some(evicted) = self.samples.pop_front() {
                self.sum -= evicted;
            }
        }
        self.samples.push_back(value);
        self.sum += value;
    }

    pub fn mean(&self) -> Option<f64> {
        if self.samples.is_empty() {
            None
        } else {
            Some(self.sum / self.samples.len() as f64)
        }
    }

    pub fn median(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Some(sorted[mid])
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.samples.iter()
    }
}

/// A future that can be raced against a deadline and explicitly cancelled
/// on every exit path: callers must call `cancel()` on success too, to
/// avoid leaking the underlying timer task.
pub struct CancellableTimeout {
    cancel_tx: Option<oneshot::Sender<()>>,
}

impl CancellableTimeout {
    /// Runs `fut` racing a `duration` deadline. Returns `Ok(Err(Elapsed))`-style
    /// semantics via `Option`: `Some(value)` on completion before the
    /// deadline or before cancellation, `None` on timeout.
    pub async fn race<F, T>(duration: Duration, fut: F) -> (Option<T>, CancellableTimeout)
    where
        F: Future<Output = T>,
    {
        let (cancel_tx, cancel_rx) = oneshot::channel();
        let handle = CancellableTimeout {
            cancel_tx: Some(cancel_tx),
        };

        tokio::pin!(fut);
        tokio::select! {
            result = timeout(duration, &mut fut) => {
                (result.ok(), handle)
            }
            _ = cancel_rx => {
                (None, handle)
            }
        }
    }

    /// Cancel the timer. Idempotent: calling it twice, or after the race
    /// has already resolved, is a no-op.
    pub fn cancel(mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_average_evicts_oldest_at_capacity() {
        let mut avg = RollingAverage::new(3);
        avg.push(1.0);
        avg.push(2.0);
        avg.push(3.0);
        assert_eq!(avg.mean(), Some(2.0));
        avg.push(9.0); // evicts the 1.0
        assert_eq!(avg.mean(), Some((2.0 + 3.0 + 9.0) / 3.0));
        assert_eq!(avg.len(), 3);
    }

    #[test]
    fn median_handles_even_and_odd_counts() {
        let mut avg = RollingAverage::new(10);
        for v in [5.0, 1.0, 3.0] {
            avg.push(v);
        }
        assert_eq!(avg.median(), Some(3.0));
        avg.push(7.0);
        assert_eq!(avg.median(), Some(4.0));
    }

    #[tokio::test]
    async fn race_resolves_before_deadline() {
        let (value, timeout) = CancellableTimeout::race(Duration::from_millis(50), async { 42 }).await;
        assert_eq!(value, Some(42));
        timeout.cancel();
    }

    #[tokio::test]
    async fn race_times_out_when_future_never_resolves() {
        let (value, timeout) =
            CancellableTimeout::race(Duration::from_millis(10), std::future::pending::<u32>()).await;
        assert_eq!(value, None);
        timeout.cancel();
    }
}
