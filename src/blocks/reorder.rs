//! Reassembles an out-of-order stream into a contiguous sequence.

use crate::error::{BlockError, BoxError, Result};
use crate::stage::Stage;
use std::collections::BTreeMap;
use tracing::trace;

/// Where the emitted sequence begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SequenceStart {
    /// The first item received sets the baseline and is emitted immediately
    #[default]
    FirstItem,
    /// Emission starts at this sequence number (inclusive)
    At(i64),
}

/// What to do with items still pending when the stream completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Leftovers {
    #[default]
    Discard,
    /// Flush them in ascending sequence order, gaps and all
    Emit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReorderSettings {
    pub start: SequenceStart,
    pub leftovers: Leftovers,
}

impl ReorderSettings {
    pub fn starting_at(mut self, sequence: i64) -> Self {
        self.start = SequenceStart::At(sequence);
        self
    }

    pub fn emit_leftovers(mut self) -> Self {
        self.leftovers = Leftovers::Emit;
        self
    }
}

type SequenceFn<T> = Box<dyn Fn(&T) -> std::result::Result<i64, BoxError> + Send>;

/// Buffers items until their sequence number is next in line
///
/// Pending items are held without bound: a sequence number that never arrives
/// keeps everything after it buffered until completion.
pub struct ReorderStage<T> {
    name: String,
    sequence_of: SequenceFn<T>,
    leftovers: Leftovers,
    pending: BTreeMap<i64, Vec<T>>,
    /// Last emitted sequence; `None` until a baseline exists
    last: Option<i64>,
}

impl<T> ReorderStage<T> {
    pub fn new<F>(sequence_of: F, settings: ReorderSettings) -> Self
    where
        F: Fn(&T) -> std::result::Result<i64, BoxError> + Send + 'static,
    {
        // The sequence before `i64::MIN` cannot be represented; treat that
        // start like an unset baseline seeded by the first item.
        let last = match settings.start {
            SequenceStart::FirstItem => None,
            SequenceStart::At(start) => start.checked_sub(1),
        };
        Self {
            name: "reorder".to_string(),
            sequence_of: Box::new(sequence_of),
            leftovers: settings.leftovers,
            pending: BTreeMap::new(),
            last,
        }
    }

    /// Name reported in logs and processing errors
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Number of items waiting for an earlier sequence
    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    fn drain_contiguous(&mut self, out: &mut Vec<T>) {
        while let Some(last) = self.last {
            let Some(next) = last.checked_add(1) else {
                break;
            };
            let Some(mut ready) = self.pending.remove(&next) else {
                break;
            };
            if ready.len() > 1 {
                trace!(sequence = next, dropped = ready.len() - 1, "dropping duplicate sequence numbers");
            }
            out.push(ready.swap_remove(0));
            self.last = Some(next);
        }
    }

    fn purge_stale(&mut self) {
        let Some(last) = self.last else {
            return;
        };
        while let Some(entry) = self.pending.first_entry() {
            if *entry.key() > last {
                break;
            }
            let (sequence, stale) = entry.remove_entry();
            trace!(sequence, dropped = stale.len(), "dropping item at or before last emitted sequence");
        }
    }
}

impl<T: Send + 'static> Stage for ReorderStage<T> {
    type Input = T;
    type Output = T;

    fn process(&mut self, item: T) -> Result<Vec<T>> {
        let sequence = (self.sequence_of)(&item).map_err(|e| BlockError::processing(&self.name, e))?;

        let mut out = Vec::new();
        if self.last.is_none() {
            self.last = Some(sequence);
            out.push(item);
        } else {
            self.pending.entry(sequence).or_default().push(item);
        }

        self.drain_contiguous(&mut out);
        self.purge_stale();
        Ok(out)
    }

    fn on_complete(&mut self) -> Result<Vec<T>> {
        let pending = std::mem::take(&mut self.pending);
        match self.leftovers {
            Leftovers::Discard => {
                if !pending.is_empty() {
                    trace!(sequences = pending.len(), "discarding pending items on completion");
                }
                Ok(Vec::new())
            }
            Leftovers::Emit => Ok(pending.into_values().flatten().collect()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
