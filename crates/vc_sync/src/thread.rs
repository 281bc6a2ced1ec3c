//! A joinable thread that runs one owned closure.
//!
//! Unlike [`std::thread::spawn`], creating a [`Thread`] does not run it.
//! The lifecycle is explicit and checked:
//!
//! ```text
//! Created --start()--> Started --join()--> Joined
//!    \
//!     `--start() fails--> Failed
//! ```

use alloc::boxed::Box;
use alloc::string::String;
use core::fmt;
use std::io;
use std::panic;
use std::thread::{Builder, JoinHandle};

use thiserror::Error;

use crate::LogicError;

// -----------------------------------------------------------------------------
// ThreadState

/// Lifecycle state of a [`Thread`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ThreadState {
    /// Constructed, closure not yet running.
    Created,
    /// Running or finished, not yet joined.
    Started,
    /// Joined. Terminal.
    Joined,
    /// The OS refused to spawn the thread. The closure is gone. Terminal.
    Failed,
}

// -----------------------------------------------------------------------------
// ThreadError

/// The error type of [`Thread::start`] and [`Thread::join`].
#[derive(Debug, Error)]
pub enum ThreadError {
    #[error(transparent)]
    Logic(#[from] LogicError),

    #[error("failed to spawn thread: {0}")]
    Spawn(#[from] io::Error),
}

// -----------------------------------------------------------------------------
// Thread

type Closure = Box<dyn FnOnce() + Send + 'static>;

/// An OS thread that runs a closure exactly once.
///
/// A started thread must be joined before it is dropped. Dropping it in the
/// [`Started`](ThreadState::Started) state aborts the process.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use vc_sync::atomic::{AtomicUsize, Ordering::Relaxed};
/// use vc_sync::{Thread, ThreadState};
///
/// let hits = Arc::new(AtomicUsize::new(0));
/// let h2 = hits.clone();
///
/// let mut t = Thread::new(move || {
///     h2.fetch_add(1, Relaxed);
/// });
/// assert_eq!(t.state(), ThreadState::Created);
///
/// t.start().unwrap();
/// t.join().unwrap();
///
/// assert_eq!(t.state(), ThreadState::Joined);
/// assert_eq!(hits.load(Relaxed), 1);
/// ```
pub struct Thread {
    name: Option<String>,
    closure: Option<Closure>,
    handle: Option<JoinHandle<()>>,
    state: ThreadState,
}

impl Thread {
    /// Creates a thread that will run `f` once started. Nothing runs yet.
    pub fn new<F>(f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            name: None,
            closure: Some(Box::new(f)),
            handle: None,
            state: ThreadState::Created,
        }
    }

    /// Like [`new`](Self::new), and the OS thread is given `name`.
    pub fn named<F>(name: impl Into<String>, f: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let mut this = Self::new(f);
        this.name = Some(name.into());
        this
    }

    /// The name given at construction, if any.
    #[inline]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Current lifecycle state.
    #[inline]
    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Returns `true` once the closure has returned or panicked.
    ///
    /// Always `true` after [`join`](Self::join), always `false` before
    /// [`start`](Self::start).
    pub fn is_finished(&self) -> bool {
        match self.state {
            ThreadState::Joined => true,
            ThreadState::Started => self.handle.as_ref().is_some_and(JoinHandle::is_finished),
            ThreadState::Created | ThreadState::Failed => false,
        }
    }

    /// Spawns the OS thread, which runs the closure.
    ///
    /// # Errors
    ///
    /// - [`LogicError::AlreadyStarted`] if this is not the first call.
    /// - [`ThreadError::Spawn`] if the OS could not create the thread, or the
    ///   name contains a NUL byte (`InvalidInput`). The closure is dropped and
    ///   the thread moves to [`ThreadState::Failed`].
    pub fn start(&mut self) -> Result<(), ThreadError> {
        let closure = match (self.state, self.closure.take()) {
            (ThreadState::Created, Some(closure)) => closure,
            _ => return Err(LogicError::AlreadyStarted.into()),
        };

        let mut builder = Builder::new();
        if let Some(name) = &self.name {
            // `Builder::spawn` panics on these instead of returning an error.
            if name.contains('\0') {
                return Err(self.fail(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "thread name contains a NUL byte",
                )));
            }
            builder = builder.name(name.clone());
        }

        match builder.spawn(closure) {
            Ok(handle) => {
                self.handle = Some(handle);
                self.state = ThreadState::Started;
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    #[cold]
    fn fail(&mut self, e: io::Error) -> ThreadError {
        log::debug!("thread {:?} failed to start: {e}", self.name);
        self.state = ThreadState::Failed;
        e.into()
    }

    /// Blocks until the closure has returned.
    ///
    /// If the closure panicked, the panic is resumed on the calling thread
    /// after the thread is marked [`Joined`](ThreadState::Joined).
    ///
    /// # Errors
    ///
    /// - [`LogicError::NotStarted`] if [`start`](Self::start) never succeeded.
    /// - [`LogicError::AlreadyJoined`] on any call after the first.
    pub fn join(&mut self) -> Result<(), ThreadError> {
        match self.state {
            ThreadState::Created | ThreadState::Failed => {
                return Err(LogicError::NotStarted.into());
            }
            ThreadState::Joined => return Err(LogicError::AlreadyJoined.into()),
            ThreadState::Started => {}
        }

        self.state = ThreadState::Joined;
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        if let Err(payload) = handle.join() {
            panic::resume_unwind(payload);
        }
        Ok(())
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        if self.state == ThreadState::Started {
            if std::thread::panicking() {
                // Aborting here would hide the panic already in flight.
                log::error!("thread {:?} dropped unjoined during unwinding", self.name);
                return;
            }
            LogicError::DroppedUnjoined.abort();
        }
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("name", &self.name)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

// -----------------------------------------------------------------------------
// Tests
