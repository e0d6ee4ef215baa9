//! Tumbling-window accumulation keyed by item timestamps.

use crate::error::{BlockError, BoxError, Result};
use crate::stage::Stage;
use std::time::Duration;

/// A half-open interval `[start, end)` in nanoseconds since the epoch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Window {
    pub start: i64,
    pub end: i64,
}

impl Window {
    pub fn contains(&self, nanos: i64) -> bool {
        self.start <= nanos && nanos < self.end
    }
}

/// Caller-defined state accumulated over one window
pub trait Accumulator: Send + 'static {
    /// A fresh, empty accumulator covering `window`
    fn open(window: Window) -> Self;

    fn window(&self) -> Window;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WindowSettings {
    /// Drop the trailing window on completion instead of emitting it
    pub omit_incomplete_final_window: bool,
}

impl WindowSettings {
    pub fn omit_incomplete_final_window(mut self) -> Self {
        self.omit_incomplete_final_window = true;
        self
    }
}

type AccumulateFn<T, A> = Box<dyn FnMut(&T, &mut A) -> std::result::Result<(), BoxError> + Send>;
type TimeFn<T> = Box<dyn Fn(&T) -> std::result::Result<i64, BoxError> + Send>;

/// Buckets items into fixed-size windows and emits one accumulator per window
///
/// A window closes when an item from a later window arrives. Every window
/// between the closed one and the new one is emitted empty, so the output
/// tiles time without gaps. Items from an earlier window than the open one are
/// folded into the open accumulator.
pub struct WindowStage<T, A> {
    name: String,
    size: i64,
    accumulate: AccumulateFn<T, A>,
    time_of: TimeFn<T>,
    settings: WindowSettings,
    current: Option<(i64, A)>,
}

impl<T, A: Accumulator> WindowStage<T, A> {
    pub fn new<F, G>(size: Duration, accumulate: F, time_of: G, settings: WindowSettings) -> Result<Self>
    where
        F: FnMut(&T, &mut A) -> std::result::Result<(), BoxError> + Send + 'static,
        G: Fn(&T) -> std::result::Result<i64, BoxError> + Send + 'static,
    {
        let size = i64::try_from(size.as_nanos())
            .map_err(|_| BlockError::configuration("window size does not fit in i64 nanoseconds"))?;
        if size <= 0 {
            return Err(BlockError::configuration("window size must be positive"));
        }

        Ok(Self {
            name: "window".to_string(),
            size,
            accumulate: Box::new(accumulate),
            time_of: Box::new(time_of),
            settings,
            current: None,
        })
    }

    /// Name reported in logs and processing errors
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn bounds(&self, index: i64) -> Result<Window> {
        index
            .checked_mul(self.size)
            .and_then(|start| Some(Window { start, end: start.checked_add(self.size)? }))
            .ok_or_else(|| BlockError::processing(&self.name, "window bounds overflow i64"))
    }
}

impl<T, A> Stage for WindowStage<T, A>
where
    T: Send + 'static,
    A: Accumulator,
{
    type Input = T;
    type Output = A;

    fn process(&mut self, item: T) -> Result<Vec<A>> {
        let time = (self.time_of)(&item).map_err(|e| BlockError::processing(&self.name, e))?;
        let index = time.div_euclid(self.size);

        let mut closed = Vec::new();
        let advance = match &self.current {
            None => true,
            Some((open, _)) => index > *open,
        };
        if advance {
            let fresh = A::open(self.bounds(index)?);
            if let Some((open, finished)) = self.current.replace((index, fresh)) {
                closed.push(finished);
                for gap in open + 1..index {
                    closed.push(A::open(self.bounds(gap)?));
                }
            }
        }

        if let Some((_, accumulator)) = self.current.as_mut() {
            (self.accumulate)(&item, accumulator).map_err(|e| BlockError::processing(&self.name, e))?;
        }
        Ok(closed)
    }

    fn on_complete(&mut self) -> Result<Vec<A>> {
        match self.current.take() {
            Some((_, last)) if !self.settings.omit_incomplete_final_window => Ok(vec![last]),
            _ => Ok(Vec::new()),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}
