//! Pairs every input with what an inner block produced for it.

use crate::block::{Block, DataflowBlock, Propagator, Source, Target};
use crate::completion::Completion;
use crate::error::{BlockError, BoxError, Result};
use crate::link::LinkOptions;
use crate::stage::{MapStage, Stage};
use crossbeam::channel::{self, Receiver};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

type CombineFn<T, U, O> = Box<dyn FnMut(T, U) -> std::result::Result<O, BoxError> + Send>;

/// Joins each inner output with the oldest input still waiting for one
struct PairStage<T, U, O> {
    name: String,
    inputs: Receiver<T>,
    combine: CombineFn<T, U, O>,
}

impl<T, U, O> Stage for PairStage<T, U, O>
where
    T: Send + 'static,
    U: Send + 'static,
    O: Send + 'static,
{
    type Input = U;
    type Output = O;

    fn process(&mut self, output: U) -> Result<Vec<O>> {
        let input = self.inputs.try_recv().map_err(|_| {
            BlockError::processing(&self.name, "inner block emitted more items than it received")
        })?;
        let combined = (self.combine)(input, output).map_err(|e| BlockError::processing(&self.name, e))?;
        Ok(vec![combined])
    }

    fn on_complete(&mut self) -> Result<Vec<O>> {
        let unpaired = self.inputs.try_iter().count();
        if unpaired > 0 {
            trace!(block = %self.name, unpaired, "inputs without inner output, dropping them");
        }
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Feeds every input to an inner block and combines the input with the
/// inner block's output for it
///
/// The inner block must emit exactly one item per input, in input order.
/// Completion and faults flow through the inner block to the output.
///
/// ```ignore
/// let inner = Block::new(MapStage::new("lookup", |id: u32| Ok(format!("user-{id}"))))?;
/// let joined = AggregatorBlock::new(inner, |id, name| Ok((id, name)))?;
/// ```
pub struct AggregatorBlock<T, O> {
    entry: Arc<dyn Target<T>>,
    output: Arc<dyn Source<O>>,
}

impl<T, O> Clone for AggregatorBlock<T, O> {
    fn clone(&self) -> Self {
        Self {
            entry: Arc::clone(&self.entry),
            output: Arc::clone(&self.output),
        }
    }
}

impl<T, O> AggregatorBlock<T, O>
where
    T: Clone + Send + 'static,
    O: Send + 'static,
{
    pub fn new<P, U, F>(inner: P, combine: F) -> Result<Self>
    where
        P: Propagator<T, U> + 'static,
        U: Send + 'static,
        F: FnMut(T, U) -> std::result::Result<O, BoxError> + Send + 'static,
    {
        let (inputs_tx, inputs_rx) = channel::unbounded();
        // The copy is queued before the item reaches the inner block, so the
        // pairing side always finds it.
        let entry = Block::new(MapStage::new("aggregate_input", move |item: T| {
            inputs_tx
                .send(item.clone())
                .map_err(|_| BoxError::from("aggregate output stopped"))?;
            Ok(item)
        }))?;
        let pair = Block::new(PairStage {
            name: "aggregate".to_string(),
            inputs: inputs_rx,
            combine: Box::new(combine),
        })?;

        let inner = Arc::new(inner);
        entry.link_to(inner.clone(), LinkOptions::propagate());
        inner.link_to(Arc::new(pair.clone()), LinkOptions::propagate());

        Ok(Self {
            entry: Arc::new(entry),
            output: Arc::new(pair),
        })
    }
}

impl<T: 'static, O: 'static> DataflowBlock for AggregatorBlock<T, O> {
    fn name(&self) -> &str {
        "aggregate"
    }

    fn complete(&self) {
        self.entry.complete();
    }

    fn fault(&self, error: BlockError) {
        self.entry.fault(error);
    }

    fn completion(&self) -> Completion {
        self.output.completion()
    }
}

impl<T: 'static, O: 'static> Target<T> for AggregatorBlock<T, O> {
    fn submit(&self, item: T) -> std::result::Result<(), T> {
        self.entry.submit(item)
    }
}

impl<T: 'static, O: 'static> Source<O> for AggregatorBlock<T, O> {
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

#[cfg(test)]
mod tests {
    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    fn formatter() -> impl Propagator<i32, String> {
        Block::new(MapStage::new("format", |i: i32| Ok(format!("{i}")))).unwrap()
    }

    #[test]
    fn test_combines_input_with_inner_output() {
        let block = AggregatorBlock::new(formatter(), |input: i32, output: String| Ok((input + 1, output))).unwrap();
        for i in 1..=3 {
            block.submit(i).unwrap();
        }
        block.complete();

        assert_eq!(block.completion().wait_timeout(WAIT), Some(Ok(())));
        assert_eq!(
            block.receive_all(),
            vec![(2, "1".to_string()), (3, "2".to_string()), (4, "3".to_string())]
        );
    }

    #[test]
    fn test_inner_error_faults_aggregate() {
        let inner = Block::new(MapStage::new("parse", |s: String| {
            s.parse::<u8>().map_err(BoxError::from)
        }))
        .unwrap();
        let block = AggregatorBlock::new(inner, |raw: String, value: u8| Ok(format!("{raw}={value}"))).unwrap();
        block.submit("7".to_string()).unwrap();
        block.submit("x".to_string()).unwrap();

        let outcome = block.completion().wait_timeout(WAIT).unwrap();
        assert!(matches!(outcome, Err(BlockError::Processing { block: name, .. }) if name == "parse"));
    }

    #[test]
    fn test_combine_error_faults_aggregate() {
        let block = AggregatorBlock::new(formatter(), |input: i32, _: String| {
            if input == 2 {
                Err("two is not allowed".into())
            } else {
                Ok(input)
            }
        })
        .unwrap();
        for i in 1..=3 {
            let _ = block.submit(i);
        }

        let outcome = block.completion().wait_timeout(WAIT).unwrap();
        assert_eq!(
            outcome,
            Err(BlockError::processing("aggregate", "two is not allowed"))
        );
    }
}
