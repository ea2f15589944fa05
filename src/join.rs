//! Await-all combinator.
//!
//! Members are awaited in parallel and their outcomes collected under their
//! keys. A rejected member does not fail the join, its fault is stored as a
//! [`Value::Fault`] at its key.

use alloc::rc::Rc;
use core::cell::{Cell, RefCell};

use log::trace;

use crate::error::{DEFAULT_CANCEL_CODE, Fault};
use crate::promise::{CancellationQueue, Promise};
use crate::value::{Keyed, Value};

/// Fault rejecting a join cancelled before all members settled.
pub fn join_cancelled() -> Fault {
    Fault::cancel("awaitable promise has been cancelled", DEFAULT_CANCEL_CODE)
}

/// Promise fulfilled with a [`Value::Map`] of every member's outcome, keys
/// and order preserved, once all members settled.
///
/// Cancelling it cancels every member still pending and rejects it with
/// [`join_cancelled`].
pub fn join(members: Keyed<Promise>) -> Promise {
    if members.is_empty() {
        return Promise::resolved(Value::Map(Keyed::new()));
    }

    let queue = Rc::new(CancellationQueue::new());
    let aggregate = Promise::with_canceller({
        let queue = queue.clone();
        move |aggregate| {
            queue.cancel_all();
            aggregate.reject(join_cancelled());
        }
    });

    let results: Rc<RefCell<Keyed<Value>>> = Rc::new(RefCell::new(
        members.keys().map(|key| (key.clone(), Value::Unit)).collect(),
    ));
    let remaining = Rc::new(Cell::new(members.len()));
    trace!("joining {} members", members.len());

    for (key, member) in members {
        let results = results.clone();
        let remaining = remaining.clone();
        let resolver = aggregate.clone();
        member.on_settle(move |outcome| {
            results.borrow_mut().insert(key, Value::from(outcome));
            remaining.set(remaining.get() - 1);

            // Members settling while the join is being cancelled don't count.
            if remaining.get() == 0 && !resolver.is_cancel_requested() {
                let values = core::mem::take(&mut *results.borrow_mut());
                resolver.resolve(Value::Map(values));
            }
        });
        queue.enqueue(member);
    }

    aggregate
}
