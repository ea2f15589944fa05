#![deny(unsafe_code)]

use core::cell::Cell;
use core::fmt::Debug;
use core::sync::atomic::Ordering;

use critical_section::Mutex;
use portable_atomic::AtomicBool;

/// Single-value slot that can be posted from other threads and drained by
/// the event loop thread.
pub struct Mailbox<T> {
    value: Mutex<Cell<Option<T>>>,
    closed: AtomicBool,
}

impl<T> Debug for Mailbox<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("sync::Mailbox")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    /// Creates empty mailbox.
    pub const fn new() -> Self {
        Self {
            value: Mutex::new(Cell::new(None)),
            closed: AtomicBool::new(false),
        }
    }

    /// Puts value into mailbox, returning previous value.
    pub fn post(&self, value: T) -> Option<T> {
        critical_section::with(|cs| self.value.borrow(cs).replace(Some(value)))
    }

    /// Takes the posted value without waiting.
    /// If there is no posted value, returns None.
    pub fn try_read(&self) -> Option<T> {
        critical_section::with(|cs| self.value.borrow(cs).take())
    }

    /// Marks the sending side as gone. A value posted before closing can
    /// still be read.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use super::*;

    #[test]
    fn try_read() {
        let mbox = Mailbox::<i32>::new();

        assert_eq!(mbox.try_read(), None);
        assert_eq!(mbox.post(42), None);
        assert_eq!(mbox.post(43), Some(42));
        assert_eq!(mbox.try_read(), Some(43));
        assert_eq!(mbox.try_read(), None);
    }

    #[test]
    fn value_survives_close() {
        let mbox = Mailbox::<&'static str>::new();

        mbox.post("hello");
        mbox.close();

        assert!(mbox.is_closed());
        assert_eq!(mbox.try_read(), Some("hello"));
    }

    #[test]
    fn post_from_other_thread() {
        let mbox = Arc::new(Mailbox::<u64>::new());

        let sender = mbox.clone();
        std::thread::spawn(move || {
            sender.post(7);
            sender.close();
        })
        .join()
        .unwrap();

        assert!(mbox.is_closed());
        assert_eq!(mbox.try_read(), Some(7));
    }
}
