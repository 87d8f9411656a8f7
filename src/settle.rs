use parking_lot::Mutex;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::thread;
use std::{future::Future, pin::Pin, task::{Context, Poll, Waker}};

/// Where a [`SettleBox`] stands. Moves out of `Pending` once and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleState {
    Pending,
    Completed,
    Failed,
}

type Observer = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    // `Some` while this thread is running observers. Settles that happen
    // underneath queue their observers here instead of recursing.
    static DEFERRED: RefCell<Option<VecDeque<Observer>>> = const { RefCell::new(None) };
}

/// Runs `observers`, or queues them when the thread is already inside an
/// outer `notify`. The outermost call drains the queue in FIFO order, so a
/// long chain settling on one thread runs in a loop rather than a recursion.
fn notify(observers: Vec<Observer>) {
    let outermost = DEFERRED.with(move |deferred| {
        let mut deferred = deferred.borrow_mut();
        if let Some(queue) = deferred.as_mut() {
            queue.extend(observers);
            return None;
        }
        *deferred = Some(VecDeque::new());
        Some(observers)
    });
    let Some(observers) = outermost else {
        return;
    };
    let _draining = Draining;
    for observer in observers {
        observer();
    }
    while let Some(observer) = next_deferred() {
        observer();
    }
}

fn next_deferred() -> Option<Observer> {
    DEFERRED.with(|deferred| deferred.borrow_mut().as_mut().and_then(VecDeque::pop_front))
}

struct Draining;

impl Drop for Draining {
    fn drop(&mut self) {
        let left = DEFERRED.with(|deferred| deferred.borrow_mut().take());
        if let Some(left) = left.filter(|left| !left.is_empty()) {
            tracing::error!(dropped = left.len(), "observer panicked, dropping queued observers");
        }
    }
}

/// A once-settable slot holding a value or an error.
///
/// Cloning the box hands out another handle to the same slot, so one side can
/// settle it from a background thread while another observes it. The first
/// call to [`complete`](Self::complete) or [`fail`](Self::fail) wins; every
/// later call is dropped without complaint.
///
/// # Examples
///
/// ```
/// use promise_chain::{SettleBox, SettleState};
/// use futures::executor::block_on;
/// use std::thread;
/// let slot = SettleBox::<i32, String>::new();
/// let remote = slot.clone();
/// let task = thread::spawn(move || remote.complete(7));
/// assert_eq!(block_on(slot.settled()), Ok(7));
/// task.join().expect("The task thread has panicked.");
/// assert!(!slot.fail("too late".into()));
/// assert_eq!(slot.state(), SettleState::Completed);
/// ```
pub struct SettleBox<T, E> {
    promise: Arc<Mutex<Inner<T, E>>>,
}

struct Inner<T, E> {
    settlement: Settlement<T, E>,
    observers: Vec<Observer>,
    waker: Vec<(u64, Waker)>,
    next_waiter: u64,
}

enum Settlement<T, E> {
    Pending,
    Completed(T),
    Failed(E),
}

impl<T, E> Settlement<T, E> {
    fn state(&self) -> SettleState {
        match self {
            Settlement::Pending => SettleState::Pending,
            Settlement::Completed(_) => SettleState::Completed,
            Settlement::Failed(_) => SettleState::Failed,
        }
    }
}

impl<T, E> Clone for SettleBox<T, E> {
    fn clone(&self) -> Self {
        Self { promise: self.promise.clone() }
    }
}

impl<T, E> Default for SettleBox<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> fmt::Debug for SettleBox<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettleBox").field("state", &self.state()).finish()
    }
}

impl<T, E> SettleBox<T, E> {
    pub fn new() -> Self {
        Self {
            promise: Arc::new(Mutex::new(Inner {
                settlement: Settlement::Pending,
                observers: vec![],
                waker: vec![],
                next_waiter: 0,
            })),
        }
    }

    /// Settles the box with `value`. Returns `false` if it was already settled.
    pub fn complete(&self, value: T) -> bool {
        self.settle(Settlement::Completed(value))
    }

    /// Settles the box with `error`. Returns `false` if it was already settled.
    pub fn fail(&self, error: E) -> bool {
        self.settle(Settlement::Failed(error))
    }

    fn settle(&self, settlement: Settlement<T, E>) -> bool {
        let (observers, wakers) = {
            let mut promise = self.promise.lock();
            if promise.settlement.state() != SettleState::Pending {
                tracing::debug!(
                    state = ?promise.settlement.state(),
                    attempted = ?settlement.state(),
                    "dropped late settle"
                );
                return false;
            }
            tracing::trace!(state = ?settlement.state(), "settled");
            promise.settlement = settlement;
            (
                std::mem::take(&mut promise.observers),
                std::mem::take(&mut promise.waker),
            )
        };
        // Lock is released here: observers read the box and may register
        // more work on it.
        for (_, waker) in wakers {
            waker.wake();
        }
        notify(observers);
        true
    }

    pub fn state(&self) -> SettleState {
        self.promise.lock().settlement.state()
    }

    /// Runs `observer` once the box settles, or right away if it already has.
    pub fn subscribe<F>(&self, observer: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut promise = self.promise.lock();
            if let Settlement::Pending = promise.settlement {
                promise.observers.push(Box::new(observer));
                return;
            }
        }
        observer();
    }
}

impl<T: Clone, E: Clone> SettleBox<T, E> {
    pub fn value(&self) -> Option<T> {
        match self.promise.lock().settlement {
            Settlement::Completed(ref value) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<E> {
        match self.promise.lock().settlement {
            Settlement::Failed(ref error) => Some(error.clone()),
            _ => None,
        }
    }

    /// `None` while pending, otherwise a copy of the settled result.
    pub fn outcome(&self) -> Option<Result<T, E>> {
        match self.promise.lock().settlement {
            Settlement::Pending => None,
            Settlement::Completed(ref value) => Some(Ok(value.clone())),
            Settlement::Failed(ref error) => Some(Err(error.clone())),
        }
    }

    /// A future that resolves with a copy of the result. Any number of them
    /// may wait on the same box; dropping one unregisters its waker.
    pub fn settled(&self) -> Settled<T, E> {
        Settled {
            promise: self.clone(),
            waiter: None,
        }
    }
}

impl<T, E> SettleBox<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    /// Parks the calling thread until the box settles.
    pub fn wait(&self) -> Result<T, E> {
        let waiter = thread::current();
        self.subscribe(move || waiter.unpark());
        loop {
            if let Some(outcome) = self.outcome() {
                return outcome;
            }
            thread::park();
        }
    }
}

/// Future returned by [`SettleBox::settled`].
#[derive(Debug)]
pub struct Settled<T, E> {
    promise: SettleBox<T, E>,
    waiter: Option<u64>,
}

impl<T: Clone, E: Clone> Future for Settled<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let mut guard = this.promise.promise.lock();
        let promise = &mut *guard;
        match promise.settlement {
            Settlement::Completed(ref value) => Poll::Ready(Ok(value.clone())),
            Settlement::Failed(ref error) => Poll::Ready(Err(error.clone())),
            Settlement::Pending => {
                let waiter = this.waiter;
                match promise.waker.iter_mut().find(|(id, _)| Some(*id) == waiter) {
                    Some((_, waker)) => {
                        if !waker.will_wake(cx.waker()) {
                            *waker = cx.waker().clone();
                        }
                    }
                    None => {
                        let id = promise.next_waiter;
                        promise.next_waiter += 1;
                        promise.waker.push((id, cx.waker().clone()));
                        this.waiter = Some(id);
                    }
                }
                Poll::Pending
            }
        }
    }
}

impl<T, E> Drop for Settled<T, E> {
    fn drop(&mut self) {
        if let Some(waiter) = self.waiter {
            self.promise.promise.lock().waker.retain(|(id, _)| *id != waiter);
        }
    }
}
