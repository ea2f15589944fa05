#![deny(unsafe_code)]

use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::{Cell, RefCell};
use core::fmt::Debug;
use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll, Waker};

use crate::error::Fault;
use crate::value::Value;

/// How a promise settled.
pub type Outcome = Result<Value, Fault>;

type Subscriber = Box<dyn FnOnce(Outcome)>;
type Canceller = Box<dyn FnOnce(&Promise)>;

/// Thread-unsafe settle-once cell with cooperative cancellation.
///
/// Clones share the same cell. Subscribers registered with
/// [`Promise::on_settle`] run synchronously, at settlement or at
/// registration when the promise is already settled.
#[derive(Clone)]
pub struct Promise {
    inner: Rc<Inner>,
}

struct Inner {
    outcome: RefCell<Option<Outcome>>,
    subscribers: RefCell<Vec<Subscriber>>,
    canceller: Cell<Option<Canceller>>,
    cancel_requested: Cell<bool>,
    wakers: RefCell<Vec<Waker>>,
}

impl Debug for Promise {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Promise")
            .field("outcome", &self.inner.outcome.borrow())
            .field("cancel_requested", &self.inner.cancel_requested.get())
            .finish()
    }
}

impl Default for Promise {
    fn default() -> Self {
        Self::new()
    }
}

impl Promise {
    /// Creates a pending promise that ignores cancellation.
    pub fn new() -> Self {
        Self::from_canceller(None)
    }

    /// Creates a pending promise. `canceller` runs at most once, on the first
    /// [`Promise::cancel`] while pending, and may settle the promise.
    pub fn with_canceller(canceller: impl FnOnce(&Promise) + 'static) -> Self {
        Self::from_canceller(Some(Box::new(canceller)))
    }

    fn from_canceller(canceller: Option<Canceller>) -> Self {
        Self {
            inner: Rc::new(Inner {
                outcome: RefCell::new(None),
                subscribers: RefCell::new(Vec::new()),
                canceller: Cell::new(canceller),
                cancel_requested: Cell::new(false),
                wakers: RefCell::new(Vec::new()),
            }),
        }
    }

    pub fn resolved(value: impl Into<Value>) -> Self {
        let promise = Self::new();
        promise.resolve(value);
        promise
    }

    pub fn rejected(fault: Fault) -> Self {
        let promise = Self::new();
        promise.reject(fault);
        promise
    }

    /// Fulfils the promise. Returns false if it was already settled.
    pub fn resolve(&self, value: impl Into<Value>) -> bool {
        self.settle(Ok(value.into()))
    }

    /// Rejects the promise. Returns false if it was already settled.
    pub fn reject(&self, fault: Fault) -> bool {
        self.settle(Err(fault))
    }

    /// Settles the promise and notifies subscribers in registration order.
    pub fn settle(&self, outcome: Outcome) -> bool {
        {
            let mut slot = self.inner.outcome.borrow_mut();
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome.clone());
        }

        // The canceller usually captures the work this promise stands for.
        drop(self.inner.canceller.take());

        let wakers = core::mem::take(&mut *self.inner.wakers.borrow_mut());
        for waker in wakers {
            waker.wake();
        }

        let subscribers = core::mem::take(&mut *self.inner.subscribers.borrow_mut());
        for subscriber in subscribers {
            subscriber(outcome.clone());
        }

        true
    }

    /// Registers a one-shot settlement handler.
    pub fn on_settle(&self, subscriber: impl FnOnce(Outcome) + 'static) {
        let settled = self.inner.outcome.borrow().clone();
        match settled {
            Some(outcome) => subscriber(outcome),
            None => self
                .inner
                .subscribers
                .borrow_mut()
                .push(Box::new(subscriber)),
        }
    }

    /// Requests cancellation. Only the first request on a pending promise
    /// has an effect.
    pub fn cancel(&self) {
        if self.is_settled() || self.inner.cancel_requested.replace(true) {
            return;
        }

        if let Some(canceller) = self.inner.canceller.take() {
            canceller(self);
        }
    }

    pub fn is_settled(&self) -> bool {
        self.inner.outcome.borrow().is_some()
    }

    pub fn is_pending(&self) -> bool {
        !self.is_settled()
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.inner.cancel_requested.get()
    }

    /// Settlement outcome, if any.
    pub fn outcome(&self) -> Option<Outcome> {
        self.inner.outcome.borrow().clone()
    }

    /// Whether both handles refer to the same promise.
    pub fn ptr_eq(&self, other: &Promise) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Future for Promise {
    type Output = Outcome;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.outcome() {
            Some(outcome) => Poll::Ready(outcome),
            None => {
                // Clones may be awaited from several tasks, each needs a wakeup.
                let mut wakers = self.inner.wakers.borrow_mut();
                if !wakers.iter().any(|waker| waker.will_wake(cx.waker())) {
                    wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
        }
    }
}

/// Cancels a batch of promises at once.
///
/// Promises enqueued after [`CancellationQueue::cancel_all`] ran are
/// cancelled immediately.
#[derive(Debug, Default)]
pub struct CancellationQueue {
    queue: RefCell<VecDeque<Promise>>,
    started: Cell<bool>,
}

impl CancellationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&self, promise: Promise) {
        self.queue.borrow_mut().push_back(promise);
        if self.started.get() {
            self.drain();
        }
    }

    pub fn cancel_all(&self) {
        self.started.set(true);
        self.drain();
    }

    fn drain(&self) {
        loop {
            // Release the borrow before cancelling: cancellers may enqueue.
            let next = self.queue.borrow_mut().pop_front();
            match next {
                Some(promise) => promise.cancel(),
                None => break,
            }
        }
    }
}
