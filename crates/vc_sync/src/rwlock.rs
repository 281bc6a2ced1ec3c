use core::fmt;
use core::marker::PhantomData;

use crate::LogicError;
use crate::atomic::{
    AtomicU32, AtomicUsize,
    Ordering::{Acquire, Relaxed, Release},
};
use crate::utils::{Backoff, futex, thread_token};

// -----------------------------------------------------------------------------
// State

const READ_LOCKED: u32 = 1;
const MASK: u32 = (1 << 30) - 1;
const WRITE_LOCKED: u32 = MASK;
const MAX_READERS: u32 = MASK - 1;
// Set by readers blocked in `futex::wait` on `state`.
const READERS_WAITING: u32 = 1 << 30;
// Set by writers blocked in `futex::wait` on `writer_notify`.
const WRITERS_WAITING: u32 = 1 << 31;

#[inline(always)]
fn is_unlocked(state: u32) -> bool {
    state & MASK == 0
}

#[inline(always)]
fn is_write_locked(state: u32) -> bool {
    state & MASK == WRITE_LOCKED
}

#[inline(always)]
fn has_readers_waiting(state: u32) -> bool {
    state & READERS_WAITING != 0
}

#[inline(always)]
fn has_writers_waiting(state: u32) -> bool {
    state & WRITERS_WAITING != 0
}

// A waiting writer blocks new readers, so writers cannot starve.
#[inline]
fn is_read_lockable(state: u32) -> bool {
    state & MASK < MAX_READERS && !has_readers_waiting(state) && !has_writers_waiting(state)
}

#[inline]
fn has_reached_max_readers(state: u32) -> bool {
    state & MASK == MAX_READERS
}

// -----------------------------------------------------------------------------
// RwLock

/// A reader/writer lock.
///
/// Any number of readers may hold the lock at the same time, or exactly one
/// writer, never both. Like [`Mutex`](crate::Mutex) it owns no data.
///
/// # Fairness
///
/// The lock prefers writers. As soon as a writer is waiting, new
/// [`rdlock`] calls block until that writer has acquired and released the
/// lock. A continuous stream of readers therefore cannot starve a writer, but
/// a thread that already holds a read lock and calls [`rdlock`] again while a
/// writer waits will deadlock.
///
/// # Contract
///
/// [`unlock`] releases whatever the caller holds, read or write, and must be
/// called exactly once per successful [`rdlock`] / [`wrlock`]. Unlocking an
/// unlocked `RwLock` panics, and so does unlocking one that another thread
/// holds for writing (`std` only). Dropping a held one aborts.
///
/// # Examples
///
/// ```
/// use vc_sync::RwLock;
///
/// let lock = RwLock::new();
///
/// lock.rdlock();
/// lock.rdlock();
/// assert!(!lock.try_wrlock());
/// lock.unlock();
/// lock.unlock();
///
/// lock.wrlock();
/// assert!(lock.is_write_locked());
/// lock.unlock();
/// ```
///
/// [`rdlock`]: RwLock::rdlock
/// [`wrlock`]: RwLock::wrlock
/// [`unlock`]: RwLock::unlock
pub struct RwLock {
    state: AtomicU32,
    writer_notify: AtomicU32,
    // Writers inside `write_contended`.
    writers: AtomicU32,
    // `thread_token` of the write holder, 0 otherwise.
    writer: AtomicUsize,
}

impl RwLock {
    /// Creates a new `RwLock` which is unlocked.
    #[inline]
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(0),
            writer_notify: AtomicU32::new(0),
            writers: AtomicU32::new(0),
            writer: AtomicUsize::new(0),
        }
    }

    /// Returns `true` if any reader or writer holds the lock.
    #[inline]
    pub fn is_locked(&self) -> bool {
        !is_unlocked(self.state.load(Relaxed))
    }

    /// Returns `true` if a writer holds the lock.
    #[inline]
    pub fn is_write_locked(&self) -> bool {
        is_write_locked(self.state.load(Relaxed))
    }

    /// Attempts to acquire shared read access without blocking.
    ///
    /// Fails while a writer holds the lock or is waiting for it.
    #[inline]
    pub fn try_rdlock(&self) -> bool {
        self.state
            .fetch_update(Acquire, Relaxed, |s| {
                is_read_lockable(s).then(|| s + READ_LOCKED)
            })
            .is_ok()
    }

    /// Attempts to acquire exclusive write access without blocking.
    #[inline]
    pub fn try_wrlock(&self) -> bool {
        let locked = self
            .state
            .fetch_update(Acquire, Relaxed, |s| {
                is_unlocked(s).then_some(s | WRITE_LOCKED)
            })
            .is_ok();
        if locked {
            self.writer.store(thread_token(), Relaxed);
        }
        locked
    }

    /// Acquires shared read access, blocking while a writer holds or waits
    /// for the lock.
    ///
    /// # Panics
    ///
    /// Panics if the number of concurrent readers would overflow.
    #[inline]
    pub fn rdlock(&self) {
        let state = self.state.load(Relaxed);
        if !is_read_lockable(state)
            || self
                .state
                .compare_exchange_weak(state, state + READ_LOCKED, Acquire, Relaxed)
                .is_err()
        {
            self.read_contended();
        }
    }

    #[cold]
    fn read_contended(&self) {
        let mut state = self.spin_read();

        loop {
            if is_read_lockable(state) {
                match self.state.compare_exchange_weak(
                    state,
                    state + READ_LOCKED,
                    Acquire,
                    Relaxed,
                ) {
                    Ok(_) => return, // Locked!
                    Err(s) => {
                        state = s;
                        continue;
                    }
                }
            }

            // Check for overflow.
            assert!(
                !has_reached_max_readers(state),
                "too many active read locks on RwLock"
            );

            // Make sure the readers waiting bit is set before we go to sleep.
            if !has_readers_waiting(state)
                && let Err(s) = self.state.compare_exchange(
                    state,
                    state | READERS_WAITING,
                    Relaxed,
                    Relaxed,
                )
            {
                state = s;
                continue;
            }

            futex::wait(&self.state, state | READERS_WAITING);

            state = self.spin_read();
        }
    }

    /// Acquires exclusive write access, blocking until no reader or writer
    /// holds the lock.
    #[inline]
    pub fn wrlock(&self) {
        if self
            .state
            .compare_exchange_weak(0, WRITE_LOCKED, Acquire, Relaxed)
            .is_err()
        {
            self.write_contended();
        }
        self.writer.store(thread_token(), Relaxed);
    }

    #[cold]
    fn write_contended(&self) {
        self.writers.fetch_add(1, Relaxed);
        let mut state = self.spin_write();
        let mut other_writers_waiting = 0;

        loop {
            // If it's unlocked, we try to lock it.
            if is_unlocked(state) {
                match self.state.compare_exchange_weak(
                    state,
                    state | WRITE_LOCKED | other_writers_waiting,
                    Acquire,
                    Relaxed,
                ) {
                    Ok(_) => {
                        self.writers.fetch_sub(1, Relaxed);
                        return; // Locked!
                    }
                    Err(s) => {
                        state = s;
                        continue;
                    }
                }
            }

            // Set the waiting bit indicating that we're waiting on it.
            if !has_writers_waiting(state)
                && let Err(s) = self.state.compare_exchange(
                    state,
                    state | WRITERS_WAITING,
                    Relaxed,
                    Relaxed,
                )
            {
                state = s;
                continue;
            }

            // Other writers might be waiting now too, keep the bit set
            // once we manage to lock it.
            other_writers_waiting = WRITERS_WAITING;

            // Examine the notification counter before we check if `state`
            // has changed, to make sure we don't miss any notifications.
            let seq = self.writer_notify.load(Acquire);

            // Don't go to sleep if the lock has become available,
            // or if the writers waiting bit is no longer set.
            state = self.state.load(Relaxed);
            if is_unlocked(state) || !has_writers_waiting(state) {
                continue;
            }

            futex::wait(&self.writer_notify, seq);

            state = self.spin_write();
        }
    }

    /// Releases the caller's read or write access.
    ///
    /// The mode is derived from the lock state: a write-locked lock can only
    /// be unlocked by its writer, anything else is a reader leaving.
    ///
    /// # Panics
    ///
    /// - [`LogicError::UnlockWithoutHold`] if the lock is not held.
    /// - [`LogicError::UnlockByNonHolder`] if another thread holds it for
    ///   writing.
    #[inline]
    #[track_caller]
    pub fn unlock(&self) {
        let state = self.state.load(Relaxed);
        if is_write_locked(state) {
            if self.writer.load(Relaxed) != thread_token() {
                LogicError::UnlockByNonHolder("RwLock").handle_error();
            }
            self.writer.store(0, Relaxed);
            self.write_unlock();
        } else if !is_unlocked(state) {
            self.read_unlock();
        } else {
            LogicError::UnlockWithoutHold("RwLock").handle_error();
        }
    }

    fn read_unlock(&self) {
        let state = self.state.fetch_sub(READ_LOCKED, Release) - READ_LOCKED;

        // It's impossible for a reader to be waiting on a read-locked RwLock,
        // except if there is also a writer waiting.
        debug_assert!(!has_readers_waiting(state) || has_writers_waiting(state));

        // Wake up a writer if we were the last reader and there's a writer waiting.
        if is_unlocked(state) && has_writers_waiting(state) {
            self.wake_writer_or_readers(state);
        }
    }

    fn write_unlock(&self) {
        let state = self.state.fetch_sub(WRITE_LOCKED, Release) - WRITE_LOCKED;

        debug_assert!(is_unlocked(state));

        if has_writers_waiting(state) || has_readers_waiting(state) {
            self.wake_writer_or_readers(state);
        }
    }

    // Called with the lock unlocked and at least one waiting bit set.
    //
    // If the lock gets locked in the meantime, we don't have to do anything:
    // the thread that locked it wakes the waiters when it unlocks.
    #[cold]
    fn wake_writer_or_readers(&self, mut state: u32) {
        assert!(is_unlocked(state));

        loop {
            if !is_unlocked(state) {
                return;
            }

            let (target, wake_readers) = match state {
                // If only writers are waiting, wake one of them up.
                WRITERS_WAITING => (0, false),
                // If both are waiting, leave the readers waiting and only wake
                // up one writer. The writers bit can outlive the last writer,
                // so trust it only while a writer is really contending.
                s if s == READERS_WAITING + WRITERS_WAITING => {
                    if self.writers.load(Relaxed) > 0 {
                        (READERS_WAITING, false)
                    } else {
                        (0, true)
                    }
                }
                // If readers are waiting, wake them all up.
                READERS_WAITING => (0, true),
                _ => return,
            };

            match self.state.compare_exchange(state, target, Relaxed, Relaxed) {
                Ok(_) => {
                    // `futex::wake_one` cannot tell whether a writer was asleep,
                    // waking one for nothing is harmless.
                    self.wake_writer();
                    if wake_readers {
                        futex::wake_all(&self.state);
                    }
                    return;
                }
                Err(s) => state = s,
            }
        }
    }

    #[inline]
    fn wake_writer(&self) {
        self.writer_notify.fetch_add(1, Release);
        futex::wake_one(&self.writer_notify);
    }

    // Spins while there is a writer holding the lock with nobody queued.
    fn spin_until(&self, f: impl Fn(u32) -> bool) -> u32 {
        let backoff = Backoff::new();
        loop {
            let state = self.state.load(Relaxed);
            if f(state) || backoff.is_completed() {
                return state;
            }
            backoff.spin();
        }
    }

    #[inline]
    fn spin_write(&self) -> u32 {
        // Stop spinning when it's unlocked or when there are waiting writers,
        // to keep things somewhat fair.
        self.spin_until(|state| is_unlocked(state) || has_writers_waiting(state))
    }

    #[inline]
    fn spin_read(&self) -> u32 {
        // Stop spinning when it's unlocked or read locked, or when there are
        // waiting threads.
        self.spin_until(|state| {
            !is_write_locked(state) || has_readers_waiting(state) || has_writers_waiting(state)
        })
    }

    /// Acquires read access and returns a [`RwLockReadHold`].
    #[inline]
    pub fn read(&self) -> RwLockReadHold<'_> {
        RwLockReadHold::new(self)
    }

    /// Acquires write access and returns a [`RwLockWriteHold`].
    #[inline]
    pub fn write(&self) -> RwLockWriteHold<'_> {
        RwLockWriteHold::new(self)
    }
}

impl Default for RwLock {
    /// Creates an unlocked `RwLock`.
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RwLock {
    fn drop(&mut self) {
        if !is_unlocked(*self.state.get_mut()) {
            LogicError::DestroyedWhileHeld("RwLock").abort();
        }
    }
}

impl fmt::Debug for RwLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.load(Relaxed);
        let mut d = f.debug_struct("RwLock");
        if is_write_locked(state) {
            d.field("state", &format_args!("<write locked>"));
        } else {
            d.field("readers", &(state & MASK));
        }
        d.finish_non_exhaustive()
    }
}

// -----------------------------------------------------------------------------
// Holds

macro_rules! define_hold {
    (
        $(#[$meta:meta])*
        $name:ident, $acquire:ident
    ) => {
        $(#[$meta])*
        #[must_use = "if unused the RwLock will immediately unlock"]
        pub struct $name<'a> {
            lock: &'a RwLock,
            held: bool,
            _not_send: PhantomData<*const ()>,
        }

        impl<'a> $name<'a> {
            #[doc = concat!("Blocks until `lock` is acquired with [`RwLock::", stringify!($acquire), "`].")]
            #[inline]
            pub fn new(lock: &'a RwLock) -> Self {
                lock.$acquire();
                Self {
                    lock,
                    held: true,
                    _not_send: PhantomData,
                }
            }

            /// Unlocks now instead of at drop.
            ///
            /// Idempotent: only the first call unlocks.
            #[inline]
            pub fn release(&mut self) {
                if self.held {
                    self.held = false;
                    self.lock.unlock();
                }
            }

            /// Returns `true` until [`release`](Self::release) is called.
            #[inline]
            pub fn is_held(&self) -> bool {
                self.held
            }
        }

        impl Drop for $name<'_> {
            #[inline]
            fn drop(&mut self) {
                self.release();
            }
        }

        impl fmt::Debug for $name<'_> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("held", &self.held)
                    .finish_non_exhaustive()
            }
        }
    };
}

define_hold! {
    /// RAII structure holding shared read access of a [`RwLock`].
    ///
    /// The lock is released when the hold is dropped, or earlier by
    /// [`release`](RwLockReadHold::release).
    RwLockReadHold, rdlock
}

define_hold! {
    /// RAII structure holding exclusive write access of a [`RwLock`].
    ///
    /// The lock is released when the hold is dropped, or earlier by
    /// [`release`](RwLockWriteHold::release).
    RwLockWriteHold, wrlock
}

// -----------------------------------------------------------------------------
// Tests
