//! Keyed fan-out into replicated sub-pipelines, recombined into one output.
//!
//! Three signals coordinate the lifecycle:
//!
//! - The *upstream latch* resolves when the dispatcher finishes. Every
//!   partition observes it: success completes the partition, an error faults
//!   it. A fault therefore reaches every partition even when upstream never
//!   completes.
//! - A partition that faults on its own resolves the upstream latch with its
//!   error and faults the shared output right away.
//! - The shared output completes only after every partition completed. If any
//!   of them faulted, the output is faulted with the aggregate of their errors.
//!
//! The last two can both report the same error, and the fast fault may shut the
//! output down before the joined fault arrives. The block's own completion
//! therefore joins the partitions' outcomes with the output's, which reports
//! every distinct error exactly once.

use crate::block::{Block, BlockOptions, DataflowBlock, Propagator, Source, Target};
use crate::completion::Completion;
use crate::error::{BlockError, BoxError, Result};
use crate::link::LinkOptions;
use crate::stage::{ActionStage, Buffer};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

type SelectFn<T, K> = Box<dyn FnMut(&T) -> std::result::Result<Vec<K>, BoxError> + Send>;

/// Maps an item to the partition key(s) it belongs to
pub struct PartitionSelector<T, K> {
    select: SelectFn<T, K>,
}

impl<T: 'static, K: 'static> PartitionSelector<T, K> {
    /// Each item goes to at most one partition
    pub fn single<F>(mut key_of: F) -> Self
    where
        F: FnMut(&T) -> std::result::Result<K, BoxError> + Send + 'static,
    {
        Self {
            select: Box::new(move |item| key_of(item).map(|key| vec![key])),
        }
    }

    /// Each item is duplicated into every partition it maps to
    ///
    /// The item is sent once per returned key, so a key listed twice receives
    /// it twice. Keys without a partition are skipped.
    pub fn multi<F, I>(mut keys_of: F) -> Self
    where
        F: FnMut(&T) -> std::result::Result<I, BoxError> + Send + 'static,
        I: IntoIterator<Item = K>,
    {
        Self {
            select: Box::new(move |item| keys_of(item).map(|keys| keys.into_iter().collect())),
        }
    }
}

struct Router<T, K> {
    selector: PartitionSelector<T, K>,
    partitions: HashMap<K, Arc<dyn Target<T>>>,
}

impl<T: Clone, K: Eq + Hash> Router<T, K> {
    /// One send per selected key; a key selected twice receives the item twice.
    fn route(&mut self, item: T) -> std::result::Result<(), BoxError> {
        let keys = (self.selector.select)(&item)?;
        let mut targets: Vec<&Arc<dyn Target<T>>> = keys
            .iter()
            .filter_map(|key| self.partitions.get(key))
            .collect();

        let Some(last) = targets.pop() else {
            trace!("no partition matches item, dropping it");
            return Ok(());
        };
        for partition in targets {
            send(partition, item.clone());
        }
        send(last, item);
        Ok(())
    }
}

fn send<T>(partition: &Arc<dyn Target<T>>, item: T) {
    // Blocks while a bounded partition is full.
    if partition.submit(item).is_err() {
        trace!(partition = partition.name(), "partition declined item, dropping it");
    }
}

fn dedup_keys<K: Eq>(keys: &mut Vec<K>) {
    let mut index = 0;
    while index < keys.len() {
        if keys[..index].contains(&keys[index]) {
            keys.remove(index);
        } else {
            index += 1;
        }
    }
}

/// Routes items to per-key sub-pipelines and merges their output
///
/// Each key gets its own sub-pipeline from the `replicate` factory, so stateful
/// blocks are never shared between partitions. Order is preserved within a
/// partition but not across partitions. A partition may itself contain a
/// `PartitionBlock`.
///
/// Consumers linked to the block see the shared output's outcome, which may
/// name only the first partition error. [`completion`](DataflowBlock::completion)
/// waits for every partition and reports each distinct error.
pub struct PartitionBlock<T, O>
where
    T: Send + 'static,
    O: Send + 'static,
{
    dispatcher: Arc<dyn Target<T>>,
    output: Block<Buffer<O>>,
    completion: Completion,
    partitions: usize,
}

impl<T, O> Clone for PartitionBlock<T, O>
where
    T: Send + 'static,
    O: Send + 'static,
{
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            output: self.output.clone(),
            completion: self.completion.clone(),
            partitions: self.partitions,
        }
    }
}

impl<T, O> PartitionBlock<T, O>
where
    T: Clone + Send + 'static,
    O: Send + 'static,
{
    /// Build one partition per distinct key in `keys`.
    ///
    /// Fails with a configuration error when `keys` is empty, or with whatever
    /// error `replicate` returns.
    pub fn new<K, I, P, R>(keys: I, selector: PartitionSelector<T, K>, replicate: R) -> Result<Self>
    where
        K: Eq + Hash + Send + 'static,
        I: IntoIterator<Item = K>,
        P: Propagator<T, O> + 'static,
        R: FnMut(&K) -> Result<P>,
    {
        Self::with_options(keys, selector, replicate, BlockOptions::default())
    }

    /// Like [`new`](Self::new), with `options` applied to the dispatcher that
    /// receives upstream input
    pub fn with_options<K, I, P, R>(
        keys: I,
        selector: PartitionSelector<T, K>,
        mut replicate: R,
        options: BlockOptions,
    ) -> Result<Self>
    where
        K: Eq + Hash + Send + 'static,
        I: IntoIterator<Item = K>,
        P: Propagator<T, O> + 'static,
        R: FnMut(&K) -> Result<P>,
    {
        let mut keys: Vec<K> = keys.into_iter().collect();
        dedup_keys(&mut keys);
        if keys.is_empty() {
            return Err(BlockError::configuration(
                "partitioning requires at least one key",
            ));
        }

        let output = Block::with_options(
            Buffer::new(),
            BlockOptions::default().named("partition_output"),
        )?;
        let upstream = Completion::new();
        // Stops whatever was already started when construction fails halfway.
        let abort = |error: BlockError| {
            upstream.resolve(Err(error.clone()));
            output.fault(error.clone());
            error
        };

        let mut partitions: HashMap<K, Arc<dyn Target<T>>> = HashMap::with_capacity(keys.len());
        let mut completions = Vec::with_capacity(keys.len());

        for key in keys {
            let partition = Arc::new(replicate(&key).map_err(abort)?);
            partition.link_to(Arc::new(output.clone()), LinkOptions::default());

            let observer = Arc::clone(&partition);
            upstream.on_resolve(move |outcome| match outcome {
                Ok(()) => observer.complete(),
                Err(error) => observer.fault(error.clone()),
            });

            let completion = partition.completion();
            let latch = upstream.clone();
            let sink = output.clone();
            completion.on_resolve(move |outcome| {
                if let Err(error) = outcome {
                    latch.resolve(Err(error.clone()));
                    sink.fault(BlockError::aggregate([error.clone()]));
                }
            });

            completions.push(completion);
            partitions.insert(key, partition as Arc<dyn Target<T>>);
        }

        let count = partitions.len();
        let mut router = Router {
            selector,
            partitions,
        };
        let dispatcher: Arc<dyn Target<T>> = Arc::new(
            Block::with_options(
                ActionStage::new("partition_dispatch", move |item: T| router.route(item)),
                options,
            )
            .map_err(abort)?,
        );

        let latch = upstream.clone();
        dispatcher.completion().on_resolve(move |outcome| {
            latch.resolve(outcome.clone());
        });
        // Weak, so dropping every handle still closes the dispatcher's input.
        let stop = Arc::downgrade(&dispatcher);
        upstream.on_resolve(move |outcome| {
            if let (Err(error), Some(dispatcher)) = (outcome, stop.upgrade()) {
                dispatcher.fault(error.clone());
            }
        });

        let joined = Completion::join(completions);
        let sink = output.clone();
        joined.on_resolve(move |outcome| match outcome {
            Ok(()) => sink.complete(),
            Err(error) => sink.fault(error.clone()),
        });
        let completion = Completion::join([joined, output.completion()]);

        Ok(Self {
            dispatcher,
            output,
            completion,
            partitions: count,
        })
    }

    pub fn partition_count(&self) -> usize {
        self.partitions
    }
}

impl<T, O> DataflowBlock for PartitionBlock<T, O>
where
    T: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        "partition"
    }

    fn complete(&self) {
        self.dispatcher.complete();
    }

    fn fault(&self, error: BlockError) {
        self.dispatcher.fault(error);
    }

    fn completion(&self) -> Completion {
        self.completion.clone()
    }
}

impl<T, O> Target<T> for PartitionBlock<T, O>
where
    T: Send + 'static,
    O: Send + 'static,
{
    fn submit(&self, item: T) -> std::result::Result<(), T> {
        self.dispatcher.submit(item)
    }
}

impl<T, O> Source<O> for PartitionBlock<T, O>
where
    T: Send + 'static,
    O: Send + 'static,
{
    fn link_to(&self, target: Arc<dyn Target<O>>, options: LinkOptions<O>) {
        self.output.link_to(target, options);
    }

    fn try_receive(&self) -> Option<O> {
        self.output.try_receive()
    }

    fn receive_timeout(&self, timeout: Duration) -> Option<O> {
        self.output.receive_timeout(timeout)
    }
}
