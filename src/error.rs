use alloc::string::{String, ToString};

/// Code carried by cancellations that don't specify one.
pub const DEFAULT_CANCEL_CODE: i64 = 500;

/// Fault settling a coroutine or promise.
///
/// Faults are values: they travel through promises, get stored in join
/// results and are thrown back into tasks at their yield points.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Fault {
    /// Task was cancelled, by opcode, by promise cancellation or by shutdown.
    #[error("cancelled: {message} (code {code})")]
    Cancel { message: String, code: i64 },

    /// Task outlived its deadline. Counts as a cancellation.
    #[error("timed out: {message}")]
    Timeout { message: String },

    /// Fault raised by the task itself.
    #[error("{message} (code {code})")]
    Raised { message: String, code: i64 },
}

impl Fault {
    pub fn cancel(message: impl ToString, code: i64) -> Self {
        Fault::Cancel {
            message: message.to_string(),
            code,
        }
    }

    pub fn timeout(message: impl ToString) -> Self {
        Fault::Timeout {
            message: message.to_string(),
        }
    }

    pub fn raised(message: impl ToString) -> Self {
        Self::raised_with_code(message, 0)
    }

    pub fn raised_with_code(message: impl ToString, code: i64) -> Self {
        Fault::Raised {
            message: message.to_string(),
            code,
        }
    }

    /// Cancellations, including timeouts.
    pub fn is_cancel(&self) -> bool {
        matches!(self, Fault::Cancel { .. } | Fault::Timeout { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Fault::Timeout { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            Fault::Cancel { message, .. }
            | Fault::Timeout { message }
            | Fault::Raised { message, .. } => message,
        }
    }

    /// Timeouts report the default cancel code.
    pub fn code(&self) -> i64 {
        match self {
            Fault::Cancel { code, .. } | Fault::Raised { code, .. } => *code,
            Fault::Timeout { .. } => DEFAULT_CANCEL_CODE,
        }
    }
}

/// Misuse of the blocking entry points.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("event loop is already running")]
    LoopRunning,

    /// Nothing left to drive but the awaited promise is still pending.
    #[error("event loop ran out of work before the task settled")]
    Stalled,

    #[error(transparent)]
    Fault(#[from] Fault),
}
