use crate::error::{BlockError, Result};
use crate::stage::Stage;

/// Collects items into batches of a fixed size
///
/// A partial batch left over when the input completes is flushed as is.
pub struct BatchStage<T> {
    name: String,
    size: usize,
    batch: Vec<T>,
}

impl<T> BatchStage<T> {
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(BlockError::configuration("batch size must be positive"));
        }
        Ok(Self {
            name: "batch".to_string(),
            size,
            batch: Vec::new(),
        })
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T: Send + 'static> Stage for BatchStage<T> {
    type Input = T;
    type Output = Vec<T>;

    fn process(&mut self, item: T) -> Result<Vec<Vec<T>>> {
        self.batch.push(item);
        if self.batch.len() < self.size {
            return Ok(Vec::new());
        }
        Ok(vec![std::mem::take(&mut self.batch)])
    }

    fn on_complete(&mut self) -> Result<Vec<Vec<T>>> {
        if self.batch.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![std::mem::take(&mut self.batch)])
    }

    fn name(&self) -> &str {
        &self.name
    }
}
