//! One-shot, multi-observer completion signal shared by every block.

use crate::error::{BlockError, Result};
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

/// Terminal result of a block: graceful completion or the error it faulted with.
pub type Outcome = Result<()>;

type Callback = Box<dyn FnOnce(&Outcome) + Send>;

enum State {
    Pending {
        callbacks: Vec<Callback>,
        wakers: Vec<Waker>,
    },
    Resolved(Outcome),
}

struct Latch {
    state: Mutex<State>,
    resolved: Condvar,
}

/// A latch resolved exactly once; the first writer wins.
///
/// Clones observe the same latch. Observers can block on [`Completion::wait`],
/// register a callback with [`Completion::on_resolve`], or `.await` it.
#[derive(Clone)]
pub struct Completion {
    latch: Arc<Latch>,
}

impl Completion {
    /// Create an unresolved completion
    pub fn new() -> Self {
        Self {
            latch: Arc::new(Latch {
                state: Mutex::new(State::Pending {
                    callbacks: Vec::new(),
                    wakers: Vec::new(),
                }),
                resolved: Condvar::new(),
            }),
        }
    }

    /// Resolve with `outcome` unless already resolved.
    /// Returns `true` when this call won.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        let (callbacks, wakers) = {
            let mut state = self.latch.state.lock();
            match std::mem::replace(&mut *state, State::Resolved(outcome.clone())) {
                State::Pending { callbacks, wakers } => (callbacks, wakers),
                resolved @ State::Resolved(_) => {
                    *state = resolved;
                    return false;
                }
            }
        };

        self.latch.resolved.notify_all();
        for waker in wakers {
            waker.wake();
        }
        // Callbacks run outside the lock so they may touch this completion.
        for callback in callbacks {
            callback(&outcome);
        }
        true
    }

    pub fn is_resolved(&self) -> bool {
        matches!(*self.latch.state.lock(), State::Resolved(_))
    }

    /// The outcome, if resolved
    pub fn outcome(&self) -> Option<Outcome> {
        match &*self.latch.state.lock() {
            State::Resolved(outcome) => Some(outcome.clone()),
            State::Pending { .. } => None,
        }
    }

    /// Run `callback` once resolved; immediately if that already happened.
    pub fn on_resolve<F>(&self, callback: F)
    where
        F: FnOnce(&Outcome) + Send + 'static,
    {
        let outcome = {
            let mut state = self.latch.state.lock();
            match &mut *state {
                State::Pending { callbacks, .. } => {
                    callbacks.push(Box::new(callback));
                    return;
                }
                State::Resolved(outcome) => outcome.clone(),
            }
        };
        callback(&outcome);
    }

    /// Block the calling thread until resolved
    pub fn wait(&self) -> Outcome {
        let mut state = self.latch.state.lock();
        loop {
            if let State::Resolved(outcome) = &*state {
                return outcome.clone();
            }
            self.latch.resolved.wait(&mut state);
        }
    }

    /// Block until resolved or `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        let deadline = Instant::now() + timeout;
        let mut state = self.latch.state.lock();
        loop {
            if let State::Resolved(outcome) = &*state {
                return Some(outcome.clone());
            }
            if self
                .latch
                .resolved
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return match &*state {
                    State::Resolved(outcome) => Some(outcome.clone()),
                    State::Pending { .. } => None,
                };
            }
        }
    }

    /// Resolve once every completion in `completions` resolved.
    ///
    /// Succeeds only if all of them succeeded; otherwise faults with an
    /// aggregate of the distinct errors observed.
    pub fn join<I>(completions: I) -> Completion
    where
        I: IntoIterator<Item = Completion>,
    {
        let completions: Vec<Completion> = completions.into_iter().collect();
        let joined = Completion::new();
        if completions.is_empty() {
            joined.resolve(Ok(()));
            return joined;
        }

        let remaining = Arc::new(AtomicUsize::new(completions.len()));
        let errors = Arc::new(Mutex::new(Vec::new()));
        for completion in completions {
            let remaining = Arc::clone(&remaining);
            let errors = Arc::clone(&errors);
            let joined = joined.clone();
            completion.on_resolve(move |outcome| {
                if let Err(error) = outcome {
                    errors.lock().push(error.clone());
                }
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let errors = std::mem::take(&mut *errors.lock());
                    if errors.is_empty() {
                        joined.resolve(Ok(()));
                    } else {
                        joined.resolve(Err(BlockError::aggregate(errors)));
                    }
                }
            });
        }
        joined
    }
}

impl Default for Completion {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("outcome", &self.outcome())
            .finish()
    }
}

impl Future for Completion {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Outcome> {
        let mut state = self.latch.state.lock();
        match &mut *state {
            State::Resolved(outcome) => Poll::Ready(outcome.clone()),
            State::Pending { wakers, .. } => {
                if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}
