use crate::block::Target;
use crate::completion::Completion;
use std::sync::Arc;

type Filter<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// How a producer→consumer link behaves
pub struct LinkOptions<T> {
    /// Forward the producer's completion or fault to the consumer
    pub propagate_completion: bool,
    filter: Option<Filter<T>>,
}

impl<T> LinkOptions<T> {
    /// A link that forwards completion and faults downstream
    pub fn propagate() -> Self {
        Self {
            propagate_completion: true,
            filter: None,
        }
    }

    /// Only offer items matching `predicate` over this link
    pub fn with_filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(predicate));
        self
    }
}

impl<T> Default for LinkOptions<T> {
    fn default() -> Self {
        Self {
            propagate_completion: false,
            filter: None,
        }
    }
}

impl<T> Clone for LinkOptions<T> {
    fn clone(&self) -> Self {
        Self {
            propagate_completion: self.propagate_completion,
            filter: self.filter.clone(),
        }
    }
}

impl<T> std::fmt::Debug for LinkOptions<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkOptions")
            .field("propagate_completion", &self.propagate_completion)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

/// An established edge from a block's output to a target
pub(crate) struct Link<T> {
    target: Arc<dyn Target<T>>,
    filter: Option<Filter<T>>,
}

impl<T> Clone for Link<T> {
    fn clone(&self) -> Self {
        Self {
            target: Arc::clone(&self.target),
            filter: self.filter.clone(),
        }
    }
}

impl<T: 'static> Link<T> {
    pub(crate) fn new(target: Arc<dyn Target<T>>, options: &LinkOptions<T>) -> Self {
        Self {
            target,
            filter: options.filter.clone(),
        }
    }

    /// Forward `upstream`'s terminal event to this link's target once it resolves.
    pub(crate) fn propagate_from(&self, upstream: &Completion) {
        let downstream = Arc::clone(&self.target);
        upstream.on_resolve(move |outcome| match outcome {
            Ok(()) => downstream.complete(),
            Err(error) => downstream.fault(error.clone()),
        });
    }

    pub(crate) fn accepts(&self, item: &T) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(item))
    }

    pub(crate) fn offer(&self, item: T) -> Result<(), T> {
        self.target.submit(item)
    }
}
