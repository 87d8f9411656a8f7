use crate::{SettleBox, TaskError};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Handed to every task body so it can settle its stage, now or later and
/// from whatever thread it likes.
///
/// Clones share the same stage. Once the last clone is dropped, a stage that
/// is still pending fails with [`TaskError::ReporterDropped`].
///
/// # Examples
///
/// ```
/// use promise_chain::Chain;
/// use std::thread;
/// let chain = Chain::<i32, String>::begin(20).then(|reporter, i| {
///     thread::spawn(move || reporter.resolve(i + 1));
///     Ok(())
/// });
/// assert_eq!(chain.wait(), Ok(21));
/// ```
pub struct Reporter<T, E: From<TaskError>> {
    handle: Arc<Handle<T, E>>,
}

struct Handle<T, E: From<TaskError>> {
    slot: SettleBox<T, E>,
}

impl<T, E: From<TaskError>> Drop for Handle<T, E> {
    /// If this is an unsettled stage, fail it.
    fn drop(&mut self) {
        if self.slot.fail(TaskError::ReporterDropped.into()) {
            tracing::warn!("stage failed: reporter dropped without settling");
        }
    }
}

impl<T, E: From<TaskError>> Clone for Reporter<T, E> {
    fn clone(&self) -> Self {
        Self { handle: self.handle.clone() }
    }
}

impl<T, E: From<TaskError>> fmt::Debug for Reporter<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reporter").field("slot", &self.handle.slot).finish()
    }
}

impl<T, E: From<TaskError>> Reporter<T, E> {
    pub(crate) fn new(slot: SettleBox<T, E>) -> Self {
        Self { handle: Arc::new(Handle { slot }) }
    }

    /// Completes the stage. Ignored if the stage already settled.
    pub fn resolve(&self, value: T) {
        self.handle.slot.complete(value);
    }

    /// Fails the stage. Ignored if the stage already settled.
    pub fn reject(&self, error: E) {
        self.handle.slot.fail(error);
    }
}

/// A queued stage as the node that owns it sees it: either it gets an input
/// and runs, or its ancestor failed and it is failed without running.
pub(crate) trait Continuation<T, E>: Send {
    fn run(self: Box<Self>, input: T);
    fn propagate_error(self: Box<Self>, error: E);
}

/// Binds a task body to the slot its result goes into.
pub(crate) struct Runner<U, E, F> {
    task: F,
    slot: SettleBox<U, E>,
}

impl<U, E, F> Runner<U, E, F> {
    pub(crate) fn new(task: F) -> (Self, SettleBox<U, E>) {
        let slot = SettleBox::new();
        (Runner { task, slot: slot.clone() }, slot)
    }

    /// Runs the body against `input`. An `Err` return or a panic fails the
    /// slot instead of reaching the caller.
    pub(crate) fn run<T>(self, input: T)
    where
        F: FnOnce(Reporter<U, E>, T) -> Result<(), E>,
        E: From<TaskError>,
    {
        let reporter = Reporter::new(self.slot);
        // Held across the call so unwinding out of the body cannot settle the
        // slot as ReporterDropped before the panic is recorded.
        let own = reporter.clone();
        let task = self.task;
        match panic::catch_unwind(AssertUnwindSafe(move || task(reporter, input))) {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::trace!("task returned an error");
                own.reject(error);
            }
            Err(payload) => {
                let err = TaskError::from_panic(payload);
                tracing::warn!(%err, "task panicked");
                own.reject(err.into());
            }
        }
    }

    pub(crate) fn propagate_error(self, error: E) {
        tracing::trace!("short-circuiting stage");
        self.slot.fail(error);
    }
}

impl<T, U, E, F> Continuation<T, E> for Runner<U, E, F>
where
    U: Send,
    E: From<TaskError> + Send,
    F: FnOnce(Reporter<U, E>, T) -> Result<(), E> + Send,
{
    fn run(self: Box<Self>, input: T) {
        Runner::run(*self, input)
    }

    fn propagate_error(self: Box<Self>, error: E) {
        Runner::propagate_error(*self, error)
    }
}
