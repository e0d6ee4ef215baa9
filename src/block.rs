//! The block contract and the thread-backed [`Block`] that runs a [`Stage`].

use crate::buffer::{Capacity, OutputBuffer};
use crate::completion::Completion;
use crate::error::{BlockError, Result};
use crate::link::LinkOptions;
use crate::metrics::BlockMetrics;
use crate::stage::{Stage, StageRunner};
use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Lifecycle shared by every block
pub trait DataflowBlock: Send + Sync {
    /// Human-readable name used in errors and logs
    fn name(&self) -> &str;

    /// Signal that no more input will arrive. Accepted input is still processed.
    fn complete(&self);

    /// Abort the block, discarding buffered state.
    fn fault(&self, error: BlockError);

    /// Resolves once the block will produce no further output.
    fn completion(&self) -> Completion;
}

/// Input side of a block
pub trait Target<T>: DataflowBlock {
    /// Offer an item. May suspend the caller while a bounded input is full.
    ///
    /// Returns the item back when the block declines it (completed or faulted).
    fn submit(&self, item: T) -> std::result::Result<(), T>;
}

/// Output side of a block
pub trait Source<T>: DataflowBlock {
    /// Deliver future output (and anything already buffered) to `target`.
    fn link_to(&self, target: Arc<dyn Target<T>>, options: LinkOptions<T>);

    /// Take one buffered output item that no link accepted
    fn try_receive(&self) -> Option<T>;

    /// Wait up to `timeout` for a buffered output item
    fn receive_timeout(&self, timeout: Duration) -> Option<T>;

    /// Drain every currently buffered output item
    fn receive_all(&self) -> Vec<T> {
        std::iter::from_fn(|| self.try_receive()).collect()
    }
}

/// A block that consumes `I` and produces `O`
pub trait Propagator<I, O>: Target<I> + Source<O> {}

impl<I, O, B> Propagator<I, O> for B where B: Target<I> + Source<O> + ?Sized {}

impl<B: DataflowBlock + ?Sized> DataflowBlock for Arc<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn complete(&self) {
        (**self).complete()
    }

    fn fault(&self, error: BlockError) {
        (**self).fault(error)
    }

    fn completion(&self) -> Completion {
        (**self).completion()
    }
}

impl<T, B: Target<T> + ?Sized> Target<T> for Arc<B> {
    fn submit(&self, item: T) -> std::result::Result<(), T> {
        (**self).submit(item)
    }
}

impl<T, B: Source<T> + ?Sized> Source<T> for Arc<B> {
    fn link_to(&self, target: Arc<dyn Target<T>>, options: LinkOptions<T>) {
        (**self).link_to(target, options)
    }

    fn try_receive(&self) -> Option<T> {
        (**self).try_receive()
    }

    fn receive_timeout(&self, timeout: Duration) -> Option<T> {
        (**self).receive_timeout(timeout)
    }
}

/// Construction options for a [`Block`]
#[derive(Debug, Clone, Default)]
pub struct BlockOptions {
    pub capacity: Capacity,
    /// Overrides the stage's own name
    pub name: Option<String>,
}

impl BlockOptions {
    pub fn bounded(mut self, capacity: usize) -> Self {
        self.capacity = Capacity::Bounded(capacity);
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

struct BlockInner<I, O> {
    name: String,
    input: Mutex<Option<Sender<I>>>,
    faults: Sender<BlockError>,
    output: Arc<OutputBuffer<O>>,
    completion: Completion,
    metrics: BlockMetrics,
}

/// A message-driven block running a [`Stage`] on its own thread
///
/// Handles are cheap to clone and all refer to the same block. Dropping every
/// handle closes the input, which the block treats as completion.
pub struct Block<S: Stage> {
    inner: Arc<BlockInner<S::Input, S::Output>>,
    _stage: PhantomData<fn() -> S>,
}

impl<S: Stage> Clone for Block<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _stage: PhantomData,
        }
    }
}

impl<S: Stage> Block<S> {
    /// Start `stage` with an unbounded input queue
    pub fn new(stage: S) -> Result<Self> {
        Self::with_options(stage, BlockOptions::default())
    }

    pub fn with_options(stage: S, options: BlockOptions) -> Result<Self> {
        let capacity = options.capacity.validate()?;
        let name = options.name.unwrap_or_else(|| stage.name().to_string());

        let (input_tx, input_rx) = capacity.channel();
        let (fault_tx, fault_rx) = channel::unbounded();
        let output = Arc::new(OutputBuffer::new(name.clone()));
        let completion = Completion::new();
        let metrics = BlockMetrics::new();

        let runner = StageRunner::new(
            name.clone(),
            input_rx,
            (fault_tx.clone(), fault_rx),
            Arc::clone(&output),
            metrics.clone(),
        );
        let done = completion.clone();
        thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                done.resolve(runner.run(stage));
            })
            .map_err(|e| BlockError::Spawn {
                block: name.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            inner: Arc::new(BlockInner {
                name,
                input: Mutex::new(Some(input_tx)),
                faults: fault_tx,
                output,
                completion,
                metrics,
            }),
            _stage: PhantomData,
        })
    }

    pub fn metrics(&self) -> &BlockMetrics {
        &self.inner.metrics
    }

    /// Items waiting in the input queue
    pub fn input_count(&self) -> usize {
        self.inner
            .input
            .lock()
            .as_ref()
            .map_or(0, |sender| sender.len())
    }

    /// Items waiting in the output buffer
    pub fn output_count(&self) -> usize {
        self.inner.output.len()
    }
}

impl<S: Stage> DataflowBlock for Block<S> {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn complete(&self) {
        self.inner.input.lock().take();
    }

    fn fault(&self, error: BlockError) {
        // The fault must be queued before the input closes, or the runner
        // could mistake the closed input for graceful completion.
        let _ = self.inner.faults.send(error);
        self.inner.input.lock().take();
    }

    fn completion(&self) -> Completion {
        self.inner.completion.clone()
    }
}

impl<S: Stage> Target<S::Input> for Block<S> {
    fn submit(&self, item: S::Input) -> std::result::Result<(), S::Input> {
        let sender = match self.inner.input.lock().as_ref() {
            Some(sender) => sender.clone(),
            None => return Err(item),
        };
        // Sent outside the lock: a full bounded queue must not stall `complete`.
        sender.send(item).map_err(|rejected| rejected.into_inner())
    }
}

impl<S: Stage> Source<S::Output> for Block<S> {
    fn link_to(&self, target: Arc<dyn Target<S::Output>>, options: LinkOptions<S::Output>) {
        self.inner
            .output
            .link_to(&self.inner.completion, target, options);
    }

    fn try_receive(&self) -> Option<S::Output> {
        self.inner.output.try_receive()
    }

    fn receive_timeout(&self, timeout: Duration) -> Option<S::Output> {
        self.inner.output.receive_timeout(timeout)
    }
}
