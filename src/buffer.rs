use crate::block::Target;
use crate::completion::Completion;
use crate::error::{BlockError, Result};
use crate::link::{Link, LinkOptions};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Bound on how many items a block's input queue holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Capacity {
    /// Accept everything immediately
    #[default]
    Unbounded,
    /// Suspend submitters once this many items are queued
    Bounded(usize),
}

impl Capacity {
    pub(crate) fn validate(self) -> Result<Self> {
        match self {
            Capacity::Bounded(0) => Err(BlockError::configuration(
                "bounded capacity must be at least 1",
            )),
            other => Ok(other),
        }
    }

    pub(crate) fn channel<T>(self) -> (Sender<T>, Receiver<T>) {
        match self {
            Capacity::Unbounded => channel::unbounded(),
            Capacity::Bounded(capacity) => channel::bounded(capacity),
        }
    }
}

/// Output side of a block: its links plus a buffer for items no link took.
pub(crate) struct OutputBuffer<T> {
    owner: String,
    links: Mutex<Vec<Link<T>>>,
    sender: Sender<T>,
    receiver: Receiver<T>,
}

impl<T: Send + 'static> OutputBuffer<T> {
    pub(crate) fn new(owner: impl Into<String>) -> Self {
        let (sender, receiver) = channel::unbounded();
        Self {
            owner: owner.into(),
            links: Mutex::new(Vec::new()),
            sender,
            receiver,
        }
    }

    /// Offer `item` to each link in order; the first acceptor takes it.
    /// Declined items stay buffered for `try_receive` or a later link.
    pub(crate) fn emit(&self, item: T) -> Result<()> {
        let links = self.links.lock();
        let mut item = item;
        for link in links.iter() {
            if !link.accepts(&item) {
                continue;
            }
            match link.offer(item) {
                Ok(()) => return Ok(()),
                Err(declined) => item = declined,
            }
        }

        if !links.is_empty() {
            trace!(block = %self.owner, "no link accepted the message, buffering it");
        }
        self.sender.send(item).map_err(|_| BlockError::SendFailure {
            block: self.owner.clone(),
        })
    }

    pub(crate) fn link_to(
        &self,
        upstream: &Completion,
        target: Arc<dyn Target<T>>,
        options: LinkOptions<T>,
    ) {
        let link = Link::new(target, &options);
        {
            let mut links = self.links.lock();
            // Emitters hold the lock, so draining and re-queueing keeps order.
            let mut kept = Vec::new();
            while let Ok(item) = self.receiver.try_recv() {
                if !link.accepts(&item) {
                    kept.push(item);
                    continue;
                }
                if let Err(declined) = link.offer(item) {
                    kept.push(declined);
                }
            }
            for item in kept {
                // Cannot fail: `self` owns the receiving half.
                let _ = self.sender.send(item);
            }
            links.push(link.clone());
        }

        if options.propagate_completion {
            link.propagate_from(upstream);
        }
    }

    pub(crate) fn try_receive(&self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    pub(crate) fn receive_timeout(&self, timeout: Duration) -> Option<T> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Number of items currently waiting in the buffer
    pub(crate) fn len(&self) -> usize {
        self.receiver.len()
    }
}
