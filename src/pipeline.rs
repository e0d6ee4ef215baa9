use crate::block::{Block, BlockOptions, DataflowBlock, Propagator, Source, Target};
use crate::blocks::{
    Accumulator, AggregatorBlock, BatchStage, ChunkStage, GroupStage, PaceBlock, ReorderSettings,
    ReorderStage, WindowSettings, WindowStage,
};
use crate::buffer::Capacity;
use crate::completion::Completion;
use crate::error::{BlockError, BoxError, Result};
use crate::link::LinkOptions;
use crate::partition::{PartitionBlock, PartitionSelector};
use crate::stage::{ActionStage, Buffer, FilterStage, FlatMapStage, MapStage, Stage, TapStage};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Fluent construction of a linear pipeline
///
/// Every step is linked to the previous one with completion propagation, so
/// completing or faulting the head eventually resolves the tail.
///
/// ```ignore
/// let pipeline = PipelineBuilder::new()?
///     .map(|line: String| Ok(line.len()))?
///     .filter(|len| Ok(*len > 0))?
///     .chunk(1024, |len| Ok(*len as u64))?
///     .build();
/// ```
pub struct PipelineBuilder<I, O> {
    head: Arc<dyn Target<I>>,
    tail: Arc<dyn Source<O>>,
    capacity: Capacity,
}

impl<I: Send + 'static> PipelineBuilder<I, I> {
    /// Start with an unbounded buffer block as the pipeline's entry point
    pub fn new() -> Result<Self> {
        Self::with_options(BlockOptions::default())
    }

    /// Start with an entry buffer built from `options`
    ///
    /// The entry's capacity also applies to every block added later, until
    /// [`with_capacity`](Self::with_capacity) changes it. A bounded entry
    /// suspends whoever submits into the pipeline, such as a partition
    /// dispatcher.
    pub fn with_options(options: BlockOptions) -> Result<Self> {
        let capacity = options.capacity;
        let entry = Arc::new(Block::with_options(Buffer::new(), options)?);
        Ok(Self {
            head: entry.clone(),
            tail: entry,
            capacity,
        })
    }
}

impl<I, O> PipelineBuilder<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Input capacity for the blocks added after this call; the entry block
    /// keeps the capacity it was built with
    pub fn with_capacity(mut self, capacity: Capacity) -> Self {
        self.capacity = capacity;
        self
    }

    /// Append an arbitrary block
    pub fn then<P, U>(self, block: P) -> PipelineBuilder<I, U>
    where
        P: Propagator<O, U> + 'static,
        U: Send + 'static,
    {
        let block = Arc::new(block);
        self.tail.link_to(block.clone(), LinkOptions::propagate());
        PipelineBuilder {
            head: self.head,
            tail: block,
            capacity: self.capacity,
        }
    }

    /// Append a stage running in its own block
    pub fn stage<S>(self, stage: S) -> Result<PipelineBuilder<I, S::Output>>
    where
        S: Stage<Input = O>,
    {
        let block = Block::with_options(stage, self.block_options())?;
        Ok(self.then(block))
    }

    fn block_options(&self) -> BlockOptions {
        BlockOptions {
            capacity: self.capacity,
            name: None,
        }
    }

    pub fn map<U, F>(self, mapper: F) -> Result<PipelineBuilder<I, U>>
    where
        U: Send + 'static,
        F: FnMut(O) -> std::result::Result<U, BoxError> + Send + 'static,
    {
        self.stage(MapStage::new("map", mapper))
    }

    pub fn filter<F>(self, predicate: F) -> Result<PipelineBuilder<I, O>>
    where
        F: FnMut(&O) -> std::result::Result<bool, BoxError> + Send + 'static,
    {
        self.stage(FilterStage::new("filter", predicate))
    }

    pub fn flat_map<U, It, F>(self, mapper: F) -> Result<PipelineBuilder<I, U>>
    where
        U: Send + 'static,
        It: IntoIterator<Item = U>,
        F: FnMut(O) -> std::result::Result<It, BoxError> + Send + 'static,
    {
        self.stage(FlatMapStage::new("flat_map", mapper))
    }

    pub fn tap<F>(self, observer: F) -> Result<PipelineBuilder<I, O>>
    where
        F: FnMut(&O) -> std::result::Result<(), BoxError> + Send + 'static,
    {
        self.stage(TapStage::new("tap", observer))
    }

    /// Terminal step consuming every item
    pub fn for_each<F>(self, action: F) -> Result<PipelineBuilder<I, ()>>
    where
        F: FnMut(O) -> std::result::Result<(), BoxError> + Send + 'static,
    {
        self.stage(ActionStage::new("for_each", action))
    }

    pub fn window<A, F, G>(
        self,
        size: Duration,
        accumulate: F,
        time_of: G,
        settings: WindowSettings,
    ) -> Result<PipelineBuilder<I, A>>
    where
        A: Accumulator,
        F: FnMut(&O, &mut A) -> std::result::Result<(), BoxError> + Send + 'static,
        G: Fn(&O) -> std::result::Result<i64, BoxError> + Send + 'static,
    {
        let stage = WindowStage::new(size, accumulate, time_of, settings)?;
        self.stage(stage)
    }

    pub fn reorder<F>(self, sequence_of: F, settings: ReorderSettings) -> Result<PipelineBuilder<I, O>>
    where
        F: Fn(&O) -> std::result::Result<i64, BoxError> + Send + 'static,
    {
        self.stage(ReorderStage::new(sequence_of, settings))
    }

    pub fn group_by<K, F>(self, key_of: F) -> Result<PipelineBuilder<I, Vec<O>>>
    where
        K: PartialEq + Send + 'static,
        F: FnMut(&O) -> std::result::Result<K, BoxError> + Send + 'static,
    {
        self.stage(GroupStage::new(key_of))
    }

    pub fn chunk<F>(self, threshold: u64, weight_of: F) -> Result<PipelineBuilder<I, Vec<O>>>
    where
        F: FnMut(&O) -> std::result::Result<u64, BoxError> + Send + 'static,
    {
        let stage = ChunkStage::new(threshold, weight_of)?;
        self.stage(stage)
    }

    /// Fixed-size batches; the last one may be short
    pub fn batch(self, size: usize) -> Result<PipelineBuilder<I, Vec<O>>> {
        let stage = BatchStage::new(size)?;
        self.stage(stage)
    }

    /// Run `inner` on each item and combine the item with its result
    pub fn aggregate<P, U, V, F>(self, inner: P, combine: F) -> Result<PipelineBuilder<I, V>>
    where
        O: Clone,
        P: Propagator<O, U> + 'static,
        U: Send + 'static,
        V: Send + 'static,
        F: FnMut(O, U) -> std::result::Result<V, BoxError> + Send + 'static,
    {
        let block = AggregatorBlock::new(inner, combine)?;
        Ok(self.then(block))
    }

    pub fn pace(self, interval: Duration) -> Result<PipelineBuilder<I, O>> {
        let block = PaceBlock::new(interval)?;
        Ok(self.then(block))
    }

    /// Fan out to one sub-pipeline per key and merge their output
    ///
    /// The dispatcher gets the current capacity, so a bounded pipeline
    /// throttles its upstream when a partition falls behind.
    pub fn partition<K, Keys, P, U, R>(
        self,
        keys: Keys,
        selector: PartitionSelector<O, K>,
        replicate: R,
    ) -> Result<PipelineBuilder<I, U>>
    where
        O: Clone,
        K: Eq + Hash + Send + 'static,
        Keys: IntoIterator<Item = K>,
        P: Propagator<O, U> + 'static,
        U: Send + 'static,
        R: FnMut(&K) -> Result<P>,
    {
        let block = PartitionBlock::with_options(keys, selector, replicate, self.block_options())?;
        Ok(self.then(block))
    }

    pub fn build(self) -> Pipeline<I, O> {
        Pipeline {
            head: self.head,
            tail: self.tail,
        }
    }
}

/// A built pipeline, usable as a single block
///
/// Input goes to the first block; output, completion and faults come from the
/// last one.
pub struct Pipeline<I, O> {
    head: Arc<dyn Target<I>>,
    tail: Arc<dyn Source<O>>,
}

impl<I, O> Clone for Pipeline<I, O> {
    fn clone(&self) -> Self {
        Self {
            head: Arc::clone(&self.head),
            tail: Arc::clone(&self.tail),
        }
    }
}

impl<I: 'static, O: 'static> DataflowBlock for Pipeline<I, O> {
    fn name(&self) -> &str {
        "pipeline"
    }

    fn complete(&self) {
        self.head.complete();
    }

    fn fault(&self, error: BlockError) {
        self.head.fault(error);
    }

    fn completion(&self) -> Completion {
        self.tail.completion()
    }
}

impl<I: 'static, O: 'static> Target<I> for Pipeline<I, O> {
    fn submit(&self, item: I) -> std::result::Result<(), I> {
        self.head.submit(item)
    }
}

impl<I: 'static, O: 'static> Source<O> for Pipeline<I, O> {
    fn link_to(&self, target: Arc<dyn Target<O>>, options: LinkOptions<O>) {
        self.tail.link_to(target, options);
    }

    fn try_receive(&self) -> Option<O> {
        self.tail.try_receive()
    }

    fn receive_timeout(&self, timeout: Duration) -> Option<O> {
        self.tail.receive_timeout(timeout)
    }
}
