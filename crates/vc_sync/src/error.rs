use thiserror::Error;

// -----------------------------------------------------------------------------
// LogicError

/// A misuse of a primitive by its caller.
///
/// These are programming defects, not runtime conditions. How one reaches
/// the caller depends on where it is detected:
///
/// - returned as an error by operations that have one, e.g.
///   [`Thread::start`](crate::Thread::start) and [`Thread::join`](crate::Thread::join);
/// - raised as a panic by operations that do not, e.g. unlocking a lock that
///   is not held ([`handle_error`](LogicError::handle_error));
/// - escalated to a process abort when detected in `Drop`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum LogicError {
    #[error("cannot start thread twice")]
    AlreadyStarted,

    #[error("cannot join unstarted thread")]
    NotStarted,

    #[error("cannot join already-joined thread")]
    AlreadyJoined,

    #[error("{0} unlocked while not held")]
    UnlockWithoutHold(&'static str),

    #[error("{0} unlocked by a thread that does not hold it")]
    UnlockByNonHolder(&'static str),

    #[error("condition variable waited on without holding its mutex")]
    WaitWithoutLock,

    #[error("{0} destroyed while still held")]
    DestroyedWhileHeld(&'static str),

    #[error("thread destroyed after start but before join")]
    DroppedUnjoined,
}

impl LogicError {
    /// Panics with this error as the message.
    #[cold]
    #[inline(never)]
    #[track_caller]
    pub fn handle_error(&self) -> ! {
        panic!("{self}");
    }

    /// Logs this error and terminates the process.
    ///
    /// Used from `Drop`, where unwinding is not an option.
    #[cold]
    #[inline(never)]
    pub(crate) fn abort(&self) -> ! {
        log::error!("fatal: {self}");

        crate::cfg::switch! {
            crate::cfg::std => {
                ::std::process::abort()
            }
            _ => {
                // Without std there is no abort; a panic inside `Drop` is the
                // closest equivalent.
                panic!("fatal: {self}")
            }
        }
    }
}
