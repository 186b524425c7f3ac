//! Bounded-concurrency fan-out over a fixed list of inputs

use futures::stream::{self, StreamExt};
use std::future::Future;

/// Runs one future per input with at most `concurrency` of them in flight
#[derive(Debug, Clone, Copy)]
pub struct BoundedExecutor {
    concurrency: usize,
}

impl BoundedExecutor {
    /// A ceiling of 0 is treated as 1.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `task` for every item and return the outputs in input order.
    ///
    /// Futures are created lazily as slots free up, so no more than
    /// `concurrency` exist at once. Each future owns its own outcome: an
    /// `Err` from one item has no effect on the others.
    pub async fn run<T, R, F, Fut>(&self, items: Vec<T>, task: F) -> Vec<R>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = R>,
    {
        let mut indexed: Vec<(usize, R)> = stream::iter(items.into_iter().enumerate())
            .map(|(index, item)| {
                let fut = task(item);
                async move { (index, fut.await) }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        indexed.sort_unstable_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, result)| result).collect()
    }
}
