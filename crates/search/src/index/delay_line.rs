//! Consistency delay-line.
//!
//! Searches only see a write once the store has refreshed. Actions that must
//! observe a just-written state are queued here with a deadline and run by a
//! background consumer once the deadline passed. When too many actions are
//! pending, the caller is blocked for the delay instead and runs the action
//! itself.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, Span};

use crate::config::DelayLineConfig;

use super::metrics::IndexMetrics;

struct Entry {
    deadline: Instant,
    span: Span,
    action: BoxFuture<'static, ()>,
}

struct Shared {
    queue: Mutex<VecDeque<Entry>>,
    config: DelayLineConfig,
    metrics: Arc<IndexMetrics>,
}

impl Shared {
    /// Removes all entries due at `now`, oldest first.
    fn take_due(&self, now: Instant) -> Vec<Entry> {
        let mut queue = self.queue.lock();
        let mut due = Vec::new();
        while queue.front().is_some_and(|entry| entry.deadline <= now) {
            if let Some(entry) = queue.pop_front() {
                due.push(entry);
            }
        }
        self.metrics.record_pending(queue.len());
        due
    }
}

/// A deadline queue drained by a background task.
pub struct DelayLine {
    shared: Arc<Shared>,
    consumer: JoinHandle<()>,
}

impl std::fmt::Debug for DelayLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelayLine")
            .field("pending", &self.pending())
            .field("config", &self.shared.config)
            .finish()
    }
}

impl DelayLine {
    /// Starts the delay-line and its consumer task.
    ///
    /// Must be called within a tokio runtime.
    pub(crate) fn start(config: DelayLineConfig, metrics: Arc<IndexMetrics>) -> Self {
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            config,
            metrics,
        });

        let consumer = tokio::spawn({
            let shared = shared.clone();
            async move {
                let mut ticker = tokio::time::interval(Duration::from_millis(shared.config.tick_ms));
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                let mut previous: Option<JoinHandle<()>> = None;
                loop {
                    ticker.tick().await;
                    let due = shared.take_due(Instant::now());
                    if due.is_empty() {
                        continue;
                    }
                    // Batches run one after another, each in submission order
                    let before = previous.take();
                    previous = Some(tokio::spawn(async move {
                        if let Some(before) = before {
                            let _ = before.await;
                        }
                        for entry in due {
                            entry.action.instrument(entry.span).await;
                        }
                    }));
                }
            }
        });

        tracing::debug!(
            delay_ms = shared.config.delay_ms,
            max_pending = shared.config.max_pending,
            "Delay-line started"
        );
        Self { shared, consumer }
    }

    /// Runs `action` once the store had time to make recent writes visible.
    ///
    /// The action is queued and later runs on a background task in the caller's
    /// span, after actions queued before it. If
    /// the queue is full, the caller sleeps for the delay and then runs the
    /// action before returning.
    pub async fn call_after_update<F>(&self, action: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = Span::current();
        let delay = Duration::from_millis(self.shared.config.delay_ms);

        let mut action = Some(action.boxed());
        {
            let mut queue = self.shared.queue.lock();
            if queue.len() < self.shared.config.max_pending
                && let Some(action) = action.take()
            {
                queue.push_back(Entry {
                    deadline: Instant::now() + delay,
                    span: span.clone(),
                    action,
                });
                self.shared.metrics.record_pending(queue.len());
            }
        }

        match action {
            None => self.shared.metrics.record_delay(),
            Some(action) => {
                self.shared.metrics.record_block();
                tracing::warn!(
                    max_pending = self.shared.config.max_pending,
                    "Delay-line is full, blocking caller"
                );
                Self::block_for_update(delay).await;
                action.instrument(span).await;
            }
        }
    }

    async fn block_for_update(delay: Duration) {
        tokio::time::sleep(delay).await;
    }

    /// Runs every pending action now, oldest first, and returns their number.
    pub async fn flush(&self) -> usize {
        let entries: Vec<Entry> = self.shared.queue.lock().drain(..).collect();
        self.shared.metrics.record_pending(0);
        let count = entries.len();
        for entry in entries {
            entry.action.instrument(entry.span).await;
        }
        count
    }

    /// Returns the number of queued actions.
    pub fn pending(&self) -> usize {
        self.shared.queue.lock().len()
    }
}

impl Drop for DelayLine {
    fn drop(&mut self) {
        self.consumer.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delay_line(max_pending: usize) -> DelayLine {
        DelayLine::start(
            DelayLineConfig {
                delay_ms: 1000,
                tick_ms: 1000,
                max_pending,
            },
            Arc::new(IndexMetrics::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_action_runs_after_delay() {
        let line = delay_line(100);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let submitted = Instant::now();

        line.call_after_update(async move {
            let _ = tx.send(Instant::now());
        })
        .await;
        assert_eq!(line.pending(), 1);

        let ran_at = rx.recv().await.unwrap();
        assert!(ran_at - submitted >= Duration::from_millis(1000));
        assert_eq!(line.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_blocks_caller() {
        let line = delay_line(1);
        line.call_after_update(async {}).await;

        let started = Instant::now();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        line.call_after_update(async move {
            let _ = tx.send(());
        })
        .await;

        assert!(started.elapsed() >= Duration::from_millis(1000));
        assert!(rx.try_recv().is_ok());
        assert_eq!(line.shared.metrics.snapshot().blocks, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_tick_runs_actions_in_submission_order() {
        let line = DelayLine::start(
            DelayLineConfig {
                delay_ms: 50,
                tick_ms: 20,
                max_pending: 1000,
            },
            Arc::new(IndexMetrics::new()),
        );
        let order = Arc::new(Mutex::new(Vec::new()));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        for i in 0..90 {
            let order = order.clone();
            let tx = tx.clone();
            line.call_after_update(async move {
                tokio::task::yield_now().await;
                order.lock().push(i);
                let _ = tx.send(());
            })
            .await;
        }

        for _ in 0..90 {
            tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
        }
        assert_eq!(*order.lock(), (0..90).collect::<Vec<_>>());
        assert_eq!(line.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_runs_everything_in_order() {
        let line = delay_line(100);
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            line.call_after_update(async move { order.lock().push(i) })
                .await;
        }

        assert_eq!(line.flush().await, 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(line.pending(), 0);
    }
}
