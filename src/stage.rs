use crate::buffer::OutputBuffer;
use crate::completion::Outcome;
use crate::error::{BlockError, BoxError, Result};
use crate::metrics::BlockMetrics;
use crossbeam::channel::{Receiver, Sender};
use crossbeam::select;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Per-message logic of a block
///
/// A stage is owned by exactly one processing thread and sees its input strictly
/// in arrival order, so it can keep plain mutable state.
pub trait Stage: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Handle one input item, producing zero or more outputs
    fn process(&mut self, input: Self::Input) -> Result<Vec<Self::Output>>;

    /// Called once after the last input; may flush buffered state
    fn on_complete(&mut self) -> Result<Vec<Self::Output>> {
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        "stage"
    }
}

/// Drives a stage: pulls from the input queue, processes, pushes to the output
pub(crate) struct StageRunner<I, O> {
    name: String,
    input: Receiver<I>,
    faults: Receiver<BlockError>,
    // Keeps the fault channel connected after every block handle is dropped.
    _faults_keepalive: Sender<BlockError>,
    output: Arc<OutputBuffer<O>>,
    metrics: BlockMetrics,
}

impl<I: Send + 'static, O: Send + 'static> StageRunner<I, O> {
    pub(crate) fn new(
        name: String,
        input: Receiver<I>,
        faults: (Sender<BlockError>, Receiver<BlockError>),
        output: Arc<OutputBuffer<O>>,
        metrics: BlockMetrics,
    ) -> Self {
        Self {
            name,
            input,
            _faults_keepalive: faults.0,
            faults: faults.1,
            output,
            metrics,
        }
    }

    /// Run `stage` until the input closes or a fault arrives.
    /// The stage and any queued input are dropped on return.
    pub(crate) fn run<S>(self, stage: S) -> Outcome
    where
        S: Stage<Input = I, Output = O>,
    {
        let outcome = self.drive(stage);
        match &outcome {
            Ok(()) => debug!(block = %self.name, "block completed"),
            Err(error) => warn!(block = %self.name, error = %error, "block faulted"),
        }
        outcome
    }

    fn drive<S>(&self, mut stage: S) -> Outcome
    where
        S: Stage<Input = I, Output = O>,
    {
        loop {
            // Faults take priority over queued input.
            if let Ok(error) = self.faults.try_recv() {
                return Err(self.collect_faults(error));
            }

            select! {
                recv(self.faults) -> fault => {
                    if let Ok(error) = fault {
                        return Err(self.collect_faults(error));
                    }
                }
                recv(self.input) -> message => match message {
                    Ok(item) => self.handle(&mut stage, item)?,
                    Err(_) => {
                        if let Ok(error) = self.faults.try_recv() {
                            return Err(self.collect_faults(error));
                        }
                        let outputs = stage.on_complete()?;
                        self.emit_all(outputs)?;
                        return Ok(());
                    }
                },
            }
        }
    }

    fn handle<S>(&self, stage: &mut S, item: I) -> Result<()>
    where
        S: Stage<Input = I, Output = O>,
    {
        self.metrics.record_received();
        let start = Instant::now();
        let outputs = stage.process(item)?;
        self.metrics.record_latency(start.elapsed());
        self.emit_all(outputs)
    }

    fn emit_all(&self, outputs: Vec<O>) -> Result<()> {
        let count = outputs.len();
        for output in outputs {
            self.output.emit(output)?;
        }
        self.metrics.record_emitted(count);
        Ok(())
    }

    /// Faults that raced in before shutdown are reported together.
    fn collect_faults(&self, first: BlockError) -> BlockError {
        let mut errors = vec![first];
        while let Ok(error) = self.faults.try_recv() {
            errors.push(error);
        }
        if errors.len() == 1 {
            errors.remove(0)
        } else {
            BlockError::aggregate(errors)
        }
    }
}

/// A pass-through stage; as a block it is a plain buffer
#[derive(Debug)]
pub struct Buffer<T> {
    _item: PhantomData<fn(T) -> T>,
}

impl<T> Buffer<T> {
    pub fn new() -> Self {
        Self { _item: PhantomData }
    }
}

impl<T> Default for Buffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> Stage for Buffer<T> {
    type Input = T;
    type Output = T;

    fn process(&mut self, input: T) -> Result<Vec<T>> {
        Ok(vec![input])
    }

    fn name(&self) -> &str {
        "buffer"
    }
}

/// Passes through items matching a predicate
pub struct FilterStage<T, F> {
    name: String,
    predicate: F,
    _item: PhantomData<fn(T) -> T>,
}

impl<T, F> FilterStage<T, F>
where
    F: FnMut(&T) -> std::result::Result<bool, BoxError> + Send + 'static,
{
    pub fn new(name: impl Into<String>, predicate: F) -> Self {
        Self {
            name: name.into(),
            predicate,
            _item: PhantomData,
        }
    }
}

impl<T, F> Stage for FilterStage<T, F>
where
    T: Send + 'static,
    F: FnMut(&T) -> std::result::Result<bool, BoxError> + Send + 'static,
{
    type Input = T;
    type Output = T;

    fn process(&mut self, input: T) -> Result<Vec<T>> {
        let keep = (self.predicate)(&input).map_err(|e| BlockError::processing(&self.name, e))?;
        Ok(if keep { vec![input] } else { Vec::new() })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Transforms each item
pub struct MapStage<T, U, F> {
    name: String,
    mapper: F,
    _types: PhantomData<fn(T) -> U>,
}

impl<T, U, F> MapStage<T, U, F>
where
    F: FnMut(T) -> std::result::Result<U, BoxError> + Send + 'static,
{
    pub fn new(name: impl Into<String>, mapper: F) -> Self {
        Self {
            name: name.into(),
            mapper,
            _types: PhantomData,
        }
    }
}

impl<T, U, F> Stage for MapStage<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> std::result::Result<U, BoxError> + Send + 'static,
{
    type Input = T;
    type Output = U;

    fn process(&mut self, input: T) -> Result<Vec<U>> {
        let output = (self.mapper)(input).map_err(|e| BlockError::processing(&self.name, e))?;
        Ok(vec![output])
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Expands each item into any number of outputs
pub struct FlatMapStage<T, U, F> {
    name: String,
    mapper: F,
    _types: PhantomData<fn(T) -> U>,
}

impl<T, U, I, F> FlatMapStage<T, U, F>
where
    I: IntoIterator<Item = U>,
    F: FnMut(T) -> std::result::Result<I, BoxError> + Send + 'static,
{
    pub fn new(name: impl Into<String>, mapper: F) -> Self {
        Self {
            name: name.into(),
            mapper,
            _types: PhantomData,
        }
    }
}

impl<T, U, I, F> Stage for FlatMapStage<T, U, F>
where
    T: Send + 'static,
    U: Send + 'static,
    I: IntoIterator<Item = U>,
    F: FnMut(T) -> std::result::Result<I, BoxError> + Send + 'static,
{
    type Input = T;
    type Output = U;

    fn process(&mut self, input: T) -> Result<Vec<U>> {
        let outputs = (self.mapper)(input).map_err(|e| BlockError::processing(&self.name, e))?;
        Ok(outputs.into_iter().collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Observes each item and passes it on unchanged
pub struct TapStage<T, F> {
    name: String,
    observer: F,
    _item: PhantomData<fn(T) -> T>,
}

impl<T, F> TapStage<T, F>
where
    F: FnMut(&T) -> std::result::Result<(), BoxError> + Send + 'static,
{
    pub fn new(name: impl Into<String>, observer: F) -> Self {
        Self {
            name: name.into(),
            observer,
            _item: PhantomData,
        }
    }
}

impl<T, F> Stage for TapStage<T, F>
where
    T: Send + 'static,
    F: FnMut(&T) -> std::result::Result<(), BoxError> + Send + 'static,
{
    type Input = T;
    type Output = T;

    fn process(&mut self, input: T) -> Result<Vec<T>> {
        (self.observer)(&input).map_err(|e| BlockError::processing(&self.name, e))?;
        Ok(vec![input])
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Terminal stage: consumes each item and emits nothing
pub struct ActionStage<T, F> {
    name: String,
    action: F,
    _item: PhantomData<fn(T)>,
}

impl<T, F> ActionStage<T, F>
where
    F: FnMut(T) -> std::result::Result<(), BoxError> + Send + 'static,
{
    pub fn new(name: impl Into<String>, action: F) -> Self {
        Self {
            name: name.into(),
            action,
            _item: PhantomData,
        }
    }
}

impl<T, F> Stage for ActionStage<T, F>
where
    T: Send + 'static,
    F: FnMut(T) -> std::result::Result<(), BoxError> + Send + 'static,
{
    type Input = T;
    type Output = ();

    fn process(&mut self, input: T) -> Result<Vec<()>> {
        (self.action)(input).map_err(|e| BlockError::processing(&self.name, e))?;
        Ok(Vec::new())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
