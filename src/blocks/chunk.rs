use crate::error::{BlockError, BoxError, Result};
use crate::stage::Stage;

type WeightFn<T> = Box<dyn FnMut(&T) -> std::result::Result<u64, BoxError> + Send>;

/// Batches items until their summed weight would pass a threshold
///
/// A chunk never weighs more than the threshold. An item that is heavier than
/// the threshold on its own can never fit and faults the block.
pub struct ChunkStage<T> {
    name: String,
    threshold: u64,
    weight_of: WeightFn<T>,
    chunk: Vec<T>,
    weight: u64,
}

impl<T> ChunkStage<T> {
    pub fn new<F>(threshold: u64, weight_of: F) -> Result<Self>
    where
        F: FnMut(&T) -> std::result::Result<u64, BoxError> + Send + 'static,
    {
        if threshold == 0 {
            return Err(BlockError::configuration("chunk threshold must be positive"));
        }
        Ok(Self {
            name: "chunk".to_string(),
            threshold,
            weight_of: Box::new(weight_of),
            chunk: Vec::new(),
            weight: 0,
        })
    }

    /// Name reported in logs and processing errors
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T: Send + 'static> Stage for ChunkStage<T> {
    type Input = T;
    type Output = Vec<T>;

    fn process(&mut self, item: T) -> Result<Vec<Vec<T>>> {
        let weight = (self.weight_of)(&item).map_err(|e| BlockError::processing(&self.name, e))?;
        if weight > self.threshold {
            return Err(BlockError::processing(
                "chunk",
                format!("item weight {} exceeds threshold {}", weight, self.threshold),
            ));
        }

        let mut out = Vec::new();
        let fits = self
            .weight
            .checked_add(weight)
            .map_or(false, |total| total <= self.threshold);
        if !fits {
            out.push(std::mem::take(&mut self.chunk));
            self.weight = 0;
        }

        self.chunk.push(item);
        self.weight += weight;
        Ok(out)
    }

    fn on_complete(&mut self) -> Result<Vec<Vec<T>>> {
        if self.chunk.is_empty() {
            return Ok(Vec::new());
        }
        self.weight = 0;
        Ok(vec![std::mem::take(&mut self.chunk)])
    }

    fn name(&self) -> &str {
        &self.name
    }
}
