//! Control requests a task yields to act on its own scheduling state.
//!
//! Opcodes are plain values. Only the scheduler interprets them, see
//! [`crate::scheduler::Scheduler`].

use alloc::rc::Rc;
use alloc::string::{String, ToString};

use crate::coroutine::Coroutine;
use crate::error::Fault;
use crate::steps::Yielded;
use crate::time::Duration;
use crate::value::Value;

pub use crate::error::DEFAULT_CANCEL_CODE;

type CallFn = dyn Fn(&dyn Coroutine) -> Result<Option<Yielded>, Fault>;

/// User-defined request, run against the yielding coroutine.
///
/// Whatever it returns is dispatched like a yielded value; `None` resumes
/// the task with [`Value::Unit`]. A returned fault is raised in the task at
/// its yield point.
#[derive(Clone)]
pub struct SystemCall {
    name: &'static str,
    call: Rc<CallFn>,
}

impl SystemCall {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn invoke(&self, coroutine: &dyn Coroutine) -> Result<Option<Yielded>, Fault> {
        (self.call)(coroutine)
    }
}

impl core::fmt::Debug for SystemCall {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("SystemCall").field(&self.name).finish()
    }
}

#[derive(Debug, Clone)]
pub enum Opcode {
    /// Suspend for the given time.
    Pause(Duration),
    /// Cancel the task with a timeout fault once the given time elapsed.
    Deadline(Duration),
    /// Cancel the task now.
    Cancel { message: String, code: i64 },
    /// Settle the task now with the given value, skipping remaining steps.
    Return(Value),
    Call(SystemCall),
}

pub fn pause(duration: Duration) -> Opcode {
    Opcode::Pause(duration)
}

pub fn deadline(duration: Duration) -> Opcode {
    Opcode::Deadline(duration)
}

/// Cancels the yielding task. Use [`DEFAULT_CANCEL_CODE`] when there is no
/// better code.
pub fn cancel(message: impl ToString, code: i64) -> Opcode {
    Opcode::Cancel {
        message: message.to_string(),
        code,
    }
}

pub fn return_value(value: impl Into<Value>) -> Opcode {
    Opcode::Return(value.into())
}

pub fn call<F>(name: &'static str, f: F) -> Opcode
where
    F: Fn(&dyn Coroutine) -> Result<Option<Yielded>, Fault> + 'static,
{
    Opcode::Call(SystemCall {
        name,
        call: Rc::new(f),
    })
}

#[cfg(test)]
mod tests {
    use alloc::format;

    use super::*;

    #[test]
    fn constructors() {
        assert!(matches!(pause(Duration::from_millis(200)), Opcode::Pause(d) if d == Duration::from_millis(200)));
        assert!(matches!(deadline(Duration::from_secs(1)), Opcode::Deadline(d) if d == Duration::from_secs(1)));
        assert!(matches!(
            cancel("bar", 422),
            Opcode::Cancel { message, code: 422 } if message == "bar"
        ));
        assert!(matches!(return_value("child"), Opcode::Return(Value::Str(s)) if s == "child"));
    }

    #[test]
    fn call_is_named() {
        let op = call("noop", |_| Ok(None));
        assert!(matches!(&op, Opcode::Call(c) if c.name() == "noop"));
        assert_eq!(format!("{:?}", op), "Call(SystemCall(\"noop\"))");
    }
}
