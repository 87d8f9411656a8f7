use crate::runner::{Continuation, Runner};
use crate::{Reporter, SettleBox, SettleState, Settled, TaskError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

type ErrorHandler<E> = Box<dyn FnOnce(E) + Send + 'static>;

/// One node of a promise chain.
///
/// A node waits on the result of the stage before it. Work registered with
/// [`then`](Self::then) and [`catch`](Self::catch) is queued on the node and
/// dispatched once that result is known: right away if it already is,
/// otherwise on whichever thread settles it.
///
/// Every stage of a chain shares the error type `E`, which has to be buildable
/// from [`TaskError`] so that panicking bodies and dropped reporters can be
/// reported through the chain.
///
/// Cloning a `Chain` gives another handle to the same node.
///
/// # Examples
///
/// ```
/// use promise_chain::Chain;
/// let out = Chain::<String, String>::begin("Hello".into())
///     .then(|p, s| { p.resolve(s + ", "); Ok(()) })
///     .then(|p, s| { p.resolve(s + "World"); Ok(()) })
///     .then(|p, s: String| { p.resolve(s.len()); Ok(()) });
/// assert_eq!(out.wait(), Ok(12));
/// ```
///
/// Failures skip every `then` after them and land in the next `catch`:
///
/// ```
/// use promise_chain::{Chain, Reporter};
/// use std::sync::mpsc::channel;
/// let (tx, rx) = channel();
/// Chain::<i32, String>::begin(1)
///     .then(|p: Reporter<i32, String>, _| { p.reject("e1".into()); Ok(()) })
///     .then(|_p: Reporter<i32, String>, _| unreachable!())
///     .catch(move |e| tx.send(e).unwrap());
/// assert_eq!(rx.recv().unwrap(), "e1");
/// ```
pub struct Chain<T, E> {
    dependency: SettleBox<T, E>,
    queues: Arc<Queues<T, E>>,
}

struct Queues<T, E> {
    continuations: Mutex<VecDeque<Box<dyn Continuation<T, E>>>>,
    error_handlers: Mutex<VecDeque<ErrorHandler<E>>>,
}

impl<T, E> Queues<T, E> {
    // Each pop takes and releases the lock on its own so dispatched work can
    // register more work on this node.
    fn next_continuation(&self) -> Option<Box<dyn Continuation<T, E>>> {
        self.continuations.lock().pop_front()
    }

    fn next_error_handler(&self) -> Option<ErrorHandler<E>> {
        self.error_handlers.lock().pop_front()
    }
}

fn handle<E>(handler: ErrorHandler<E>, error: E) {
    if panic::catch_unwind(AssertUnwindSafe(move || handler(error))).is_err() {
        tracing::error!("catch handler panicked");
    }
}

impl<T, E> Clone for Chain<T, E> {
    fn clone(&self) -> Self {
        Self {
            dependency: self.dependency.clone(),
            queues: self.queues.clone(),
        }
    }
}

impl<T, E> fmt::Debug for Chain<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chain")
            .field("state", &self.dependency.state())
            .field("continuations", &self.queues.continuations.lock().len())
            .field("error_handlers", &self.queues.error_handlers.lock().len())
            .finish()
    }
}

impl<T, E> Chain<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + From<TaskError> + 'static,
{
    /// Starts a chain whose first stage completes with `input`.
    pub fn begin(input: T) -> Self {
        Self::begin_with(input, |reporter, input| {
            reporter.resolve(input);
            Ok(())
        })
    }

    /// Starts a chain by running `task` against `input` on the calling thread.
    pub fn begin_with<I, F>(input: I, task: F) -> Self
    where
        F: FnOnce(Reporter<T, E>, I) -> Result<(), E>,
    {
        let (runner, slot) = Runner::new(task);
        let chain = Self::observing(slot);
        runner.run(input);
        chain
    }

    /// A chain that has already completed with `value`.
    pub fn resolved(value: T) -> Self {
        let slot = SettleBox::new();
        slot.complete(value);
        Self::observing(slot)
    }

    /// A chain that has already failed with `error`.
    pub fn rejected(error: E) -> Self {
        let slot = SettleBox::new();
        slot.fail(error);
        Self::observing(slot)
    }

    fn observing(dependency: SettleBox<T, E>) -> Self {
        let chain = Self {
            dependency,
            queues: Arc::new(Queues {
                continuations: Mutex::new(VecDeque::new()),
                error_handlers: Mutex::new(VecDeque::new()),
            }),
        };
        // Runs immediately if the dependency is already settled.
        let node = chain.clone();
        chain.dependency.subscribe(move || node.dispatch());
        chain
    }

    /// Queues `task` to run with this node's value and returns the node for
    /// its result.
    ///
    /// Calling `then` several times on one node starts independent branches
    /// that all see the same value. If this node fails, `task` never runs and
    /// the returned node fails with the same error.
    ///
    /// On a node that has already settled, `task` runs (or is failed) on the
    /// calling thread before `then` returns. On a pending node it is queued
    /// and runs on the thread that settles the node.
    pub fn then<U, F>(&self, task: F) -> Chain<U, E>
    where
        U: Clone + Send + 'static,
        F: FnOnce(Reporter<U, E>, T) -> Result<(), E> + Send + 'static,
    {
        let (runner, slot) = Runner::new(task);
        let next = Chain::observing(slot);
        match self.dependency.outcome() {
            Some(Ok(value)) => runner.run(value),
            Some(Err(error)) => runner.propagate_error(error),
            None => {
                self.queues.continuations.lock().push_back(Box::new(runner));
                self.dispatch();
            }
        }
        next
    }

    /// Queues `handler` to receive this node's error if it fails, and returns
    /// this same node so further stages can hang off its success path.
    pub fn catch<F>(&self, handler: F) -> Self
    where
        F: FnOnce(E) + Send + 'static,
    {
        match self.dependency.outcome() {
            Some(Err(error)) => handle(Box::new(handler), error),
            _ => {
                self.queues.error_handlers.lock().push_back(Box::new(handler));
                self.dispatch();
            }
        }
        self.clone()
    }

    fn dispatch(&self) {
        match self.dependency.outcome() {
            None => {}
            Some(Ok(value)) => {
                tracing::trace!("dispatching completed value");
                while let Some(next) = self.queues.next_continuation() {
                    next.run(value.clone());
                }
            }
            Some(Err(error)) => {
                tracing::trace!("dispatching failure");
                while let Some(handler) = self.queues.next_error_handler() {
                    handle(handler, error.clone());
                }
                while let Some(next) = self.queues.next_continuation() {
                    next.propagate_error(error.clone());
                }
            }
        }
    }

    pub fn state(&self) -> SettleState {
        self.dependency.state()
    }

    /// `None` until this node's result is known.
    pub fn outcome(&self) -> Option<Result<T, E>> {
        self.dependency.outcome()
    }

    /// Resolves with this node's result, without blocking any thread.
    pub fn settled(&self) -> Settled<T, E> {
        self.dependency.settled()
    }

    /// Blocks the calling thread until this node's result is known.
    pub fn wait(&self) -> Result<T, E> {
        self.dependency.wait()
    }
}
