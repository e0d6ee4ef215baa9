//! Wall-clock pacing: at most one item per interval.

use crate::block::{DataflowBlock, Source, Target};
use crate::buffer::OutputBuffer;
use crate::completion::{Completion, Outcome};
use crate::error::{BlockError, Result};
use crate::link::LinkOptions;
use crate::metrics::BlockMetrics;
use crossbeam::queue::SegQueue;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Shortest interval the pacing timer can honor reliably
pub const MIN_PACE_INTERVAL: Duration = Duration::from_millis(100);

struct PaceInner<T> {
    name: String,
    queue: SegQueue<T>,
    /// Terminal signal from upstream, applied once the queue drains
    requested: Mutex<Option<Outcome>>,
    tick_guard: Mutex<()>,
    faulted: AtomicBool,
    output: OutputBuffer<T>,
    completion: Completion,
    metrics: BlockMetrics,
}

impl<T: Send + 'static> PaceInner<T> {
    /// One timer tick. Returns `false` once the timer should stop.
    fn tick(&self) -> bool {
        let _guard = self.tick_guard.lock();
        if self.faulted.load(Ordering::Acquire) {
            return false;
        }

        if let Some(item) = self.queue.pop() {
            if let Err(error) = self.output.emit(item) {
                self.faulted.store(true, Ordering::Release);
                warn!(block = %self.name, error = %error, "block faulted");
                self.completion.resolve(Err(error));
                return false;
            }
            self.metrics.record_emitted(1);
            return true;
        }

        let outcome = {
            let requested = self.requested.lock();
            // Submissions push under this lock, so an empty queue here is final.
            match requested.as_ref() {
                Some(outcome) if self.queue.is_empty() => outcome.clone(),
                _ => return true,
            }
        };
        match &outcome {
            Ok(()) => debug!(block = %self.name, "block completed"),
            Err(error) => warn!(block = %self.name, error = %error, "block faulted"),
        }
        self.completion.resolve(outcome);
        false
    }

    fn request(&self, outcome: Outcome) {
        let mut requested = self.requested.lock();
        if requested.is_none() {
            *requested = Some(outcome);
        }
    }
}

/// Emits buffered items one per interval
///
/// Input is accepted immediately and without bound; only output is throttled.
/// `complete` and `fault` take effect after every accepted item was emitted,
/// so pacing never truncates the backlog. The timer runs on its own thread
/// until the block resolves; the first item leaves one interval after
/// construction at the earliest.
pub struct PaceBlock<T> {
    inner: Arc<PaceInner<T>>,
}

impl<T> Clone for PaceBlock<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> PaceBlock<T> {
    pub fn new(interval: Duration) -> Result<Self> {
        if interval < MIN_PACE_INTERVAL {
            return Err(BlockError::configuration(format!(
                "pace interval must be at least {}ms, got {}ms",
                MIN_PACE_INTERVAL.as_millis(),
                interval.as_millis()
            )));
        }

        let name = "pace".to_string();
        let inner = Arc::new(PaceInner {
            name: name.clone(),
            queue: SegQueue::new(),
            requested: Mutex::new(None),
            tick_guard: Mutex::new(()),
            faulted: AtomicBool::new(false),
            output: OutputBuffer::new(name.clone()),
            completion: Completion::new(),
            metrics: BlockMetrics::new(),
        });

        let timer = Arc::clone(&inner);
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                // Each tick is scheduled from the end of the previous one, so
                // consecutive emissions are at least `interval` apart.
                loop {
                    thread::sleep(interval);
                    if !timer.tick() {
                        break;
                    }
                }
            })
            .map_err(|e| BlockError::Spawn {
                block: name,
                message: e.to_string(),
            })?;

        Ok(Self { inner })
    }

    pub fn metrics(&self) -> &BlockMetrics {
        &self.inner.metrics
    }

    /// Items accepted but not yet emitted
    pub fn backlog(&self) -> usize {
        self.inner.queue.len()
    }
}

impl<T: Send + 'static> DataflowBlock for PaceBlock<T> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn complete(&self) {
        self.inner.request(Ok(()));
    }

    fn fault(&self, error: BlockError) {
        self.inner.request(Err(error));
    }

    fn completion(&self) -> Completion {
        self.inner.completion.clone()
    }
}

impl<T: Send + 'static> Target<T> for PaceBlock<T> {
    fn submit(&self, item: T) -> std::result::Result<(), T> {
        let requested = self.inner.requested.lock();
        if requested.is_some() || self.inner.faulted.load(Ordering::Acquire) {
            return Err(item);
        }
        self.inner.queue.push(item);
        self.inner.metrics.record_received();
        Ok(())
    }
}

impl<T: Send + 'static> Source<T> for PaceBlock<T> {
    fn link_to(&self, target: Arc<dyn Target<T>>, options: LinkOptions<T>) {
        self.inner
            .output
            .link_to(&self.inner.completion, target, options);
    }

    fn try_receive(&self) -> Option<T> {
        self.inner.output.try_receive()
    }

    fn receive_timeout(&self, timeout: Duration) -> Option<T> {
        self.inner.output.receive_timeout(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    const INTERVAL: Duration = Duration::from_millis(100);

    #[test]
    fn test_short_interval_rejected() {
        let result = PaceBlock::<i32>::new(Duration::from_millis(99));
        assert!(matches!(result, Err(BlockError::Configuration(_))));
    }

    #[test]
    fn test_items_are_spaced_by_interval() {
        let started = Instant::now();
        let block = PaceBlock::new(INTERVAL).unwrap();
        for i in 0..3 {
            block.submit(i).unwrap();
        }
        block.complete();

        let mut received = Vec::new();
        while let Some(item) = block.receive_timeout(Duration::from_secs(2)) {
            received.push(item);
            if received.len() == 3 {
                break;
            }
        }
        assert_eq!(received, vec![0, 1, 2]);
        assert!(started.elapsed() >= INTERVAL * 2);
        assert_eq!(
            block.completion().wait_timeout(Duration::from_secs(2)),
            Some(Ok(()))
        );
    }

    #[test]
    fn test_complete_waits_for_backlog() {
        let block = PaceBlock::new(INTERVAL).unwrap();
        block.submit("a").unwrap();
        block.submit("b").unwrap();
        block.complete();

        assert_eq!(block.submit("c"), Err("c"));
        assert!(!block.completion().is_resolved());
        assert_eq!(
            block.completion().wait_timeout(Duration::from_secs(2)),
            Some(Ok(()))
        );
        assert_eq!(block.receive_all(), vec!["a", "b"]);
        assert_eq!(block.metrics().emitted(), 2);
    }

    #[test]
    fn test_fault_applies_after_backlog() {
        let block = PaceBlock::new(INTERVAL).unwrap();
        block.submit(1).unwrap();
        block.fault(BlockError::fault("stop"));

        assert_eq!(
            block.completion().wait_timeout(Duration::from_secs(2)),
            Some(Err(BlockError::fault("stop")))
        );
        assert_eq!(block.receive_all(), vec![1]);
    }
}
