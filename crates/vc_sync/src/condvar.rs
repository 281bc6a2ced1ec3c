use core::fmt;

use crate::atomic::{AtomicU32, Ordering::Relaxed};
use crate::utils::futex;
use crate::{LogicError, Mutex, MutexHold};

// -----------------------------------------------------------------------------
// Signal

/// The notification counter behind [`Condvar`], not bound to any mutex.
///
/// [`Barrier`](crate::Barrier) owns its mutex and uses this directly, which a
/// borrowing `Condvar` cannot express.
pub(crate) struct Signal {
    seq: AtomicU32,
}

impl Signal {
    #[inline]
    pub(crate) const fn new() -> Self {
        Self {
            seq: AtomicU32::new(0),
        }
    }

    /// `mutex` must be held by the caller.
    pub(crate) fn wait(&self, mutex: &Mutex) {
        // Examine the notification counter _before_ we unlock the mutex.
        // A notification sent after the unlock changes it, so `futex::wait`
        // returns immediately instead of missing the wakeup.
        let seq = self.seq.load(Relaxed);

        mutex.unlock();

        futex::wait(&self.seq, seq);

        mutex.lock();
    }

    #[inline]
    pub(crate) fn notify_one(&self) {
        self.seq.fetch_add(1, Relaxed);
        futex::wake_one(&self.seq);
    }

    #[inline]
    pub(crate) fn notify_all(&self) {
        self.seq.fetch_add(1, Relaxed);
        futex::wake_all(&self.seq);
    }
}

// -----------------------------------------------------------------------------
// Condvar

/// A condition variable bound to one [`Mutex`] for its whole lifetime.
///
/// [`wait`] atomically unlocks the mutex and blocks; before returning it
/// re-acquires the mutex. A [`signal`] or [`broadcast`] issued after the
/// waiter released the mutex is never lost.
///
/// `wait` can return without a matching notification, so the predicate must
/// be re-checked in a loop (or use [`wait_while`]).
///
/// # Examples
///
/// ```
/// use std::thread;
/// use vc_sync::atomic::{AtomicBool, Ordering::Relaxed};
/// use vc_sync::{Condvar, Mutex};
///
/// let mutex = Mutex::new();
/// let cond = Condvar::new(&mutex);
/// let ready = AtomicBool::new(false);
///
/// thread::scope(|s| {
///     s.spawn(|| {
///         cond.lock();
///         ready.store(true, Relaxed);
///         cond.signal();
///         cond.unlock();
///     });
///
///     cond.lock();
///     while !ready.load(Relaxed) {
///         cond.wait();
///     }
///     cond.unlock();
/// });
/// ```
///
/// [`wait`]: Condvar::wait
/// [`wait_while`]: Condvar::wait_while
/// [`signal`]: Condvar::signal
/// [`broadcast`]: Condvar::broadcast
pub struct Condvar<'a> {
    mutex: &'a Mutex,
    signal: Signal,
}

impl<'a> Condvar<'a> {
    /// Creates a condition variable associated with `mutex`.
    #[inline]
    pub const fn new(mutex: &'a Mutex) -> Self {
        Self {
            mutex,
            signal: Signal::new(),
        }
    }

    /// The associated mutex.
    #[inline]
    pub fn mutex(&self) -> &'a Mutex {
        self.mutex
    }

    /// Locks the associated mutex. Same as `self.mutex().lock()`.
    #[inline]
    pub fn lock(&self) {
        self.mutex.lock();
    }

    /// Unlocks the associated mutex. Same as `self.mutex().unlock()`.
    #[inline]
    #[track_caller]
    pub fn unlock(&self) {
        self.mutex.unlock();
    }

    /// Locks the associated mutex and returns a [`MutexHold`] for it.
    #[inline]
    pub fn hold(&self) -> MutexHold<'a> {
        MutexHold::new(self.mutex)
    }

    /// Blocks the current thread until this condition variable is notified.
    ///
    /// The caller must hold the associated mutex. It is released while
    /// blocked and held again when this returns.
    ///
    /// # Panics
    ///
    /// Panics with [`LogicError::WaitWithoutLock`] if the calling thread does
    /// not hold the mutex. Without `std` only an unlocked mutex is detected.
    #[track_caller]
    pub fn wait(&self) {
        if !self.mutex.is_held_by_current_thread() {
            LogicError::WaitWithoutLock.handle_error();
        }
        self.signal.wait(self.mutex);
    }

    /// Waits while `condition` returns `true`.
    ///
    /// `condition` is evaluated with the mutex held, first before any wait
    /// and then after every wakeup.
    #[track_caller]
    pub fn wait_while<F>(&self, mut condition: F)
    where
        F: FnMut() -> bool,
    {
        while condition() {
            self.wait();
        }
    }

    /// Wakes up at least one thread blocked in [`wait`](Self::wait).
    ///
    /// No-op when nobody is waiting.
    #[inline]
    pub fn signal(&self) {
        self.signal.notify_one();
    }

    /// Wakes up every thread blocked in [`wait`](Self::wait).
    ///
    /// No-op when nobody is waiting.
    #[inline]
    pub fn broadcast(&self) {
        self.signal.notify_all();
    }
}

impl fmt::Debug for Condvar<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condvar")
            .field("mutex", self.mutex)
            .finish_non_exhaustive()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(all(test, feature = "std"))]
mod tests {
    use std::sync::{Arc, mpsc::channel};
    use std::thread;

    use super::Condvar;
    use crate::atomic::{AtomicBool, AtomicUsize, Ordering::Relaxed};
    use crate::utils::tests::{settle, test_unwind_panic};
    use crate::{Mutex, Thread};

    #[test]
    fn ctor_and_dtor() {
        let mutex = Mutex::new();
        let cond = Condvar::new(&mutex);
        assert!(core::ptr::eq(cond.mutex(), &mutex));
    }

    #[test]
    fn notify_without_waiters() {
        let mutex = Mutex::new();
        let cond = Condvar::new(&mutex);
        cond.signal();
        cond.broadcast();
        cond.lock();
        cond.signal();
        cond.unlock();
    }

    // The waiter counts up to `N` by waking on every published value.
    #[test]
    fn simple_cond() {
        const N: usize = 10_000;

        static MUTEX: Mutex = Mutex::new();
        let cond: Arc<Condvar<'static>> = Arc::new(Condvar::new(&MUTEX));
        let value = Arc::new(AtomicUsize::new(0));

        let (c2, v2) = (cond.clone(), value.clone());
        let mut t = Thread::new(move || {
            c2.lock();
            while v2.load(Relaxed) < N {
                c2.wait();
            }
            c2.unlock();
        });
        t.start().unwrap();

        for i in 0..=N {
            cond.lock();
            value.store(i, Relaxed);
            if i % 2 == 0 {
                cond.signal();
            } else {
                cond.broadcast();
            }
            cond.unlock();
        }

        t.join().unwrap();
    }

    // The waiter only returns after a notification and with the mutex held again.
    #[test]
    fn wait_reacquires_mutex() {
        let mutex = Mutex::new();
        let cond = Condvar::new(&mutex);
        let waiting = AtomicBool::new(false);
        let ready = AtomicBool::new(false);
        let woke = AtomicBool::new(false);

        thread::scope(|s| {
            s.spawn(|| {
                let _hold = cond.hold();
                waiting.store(true, Relaxed);
                cond.wait_while(|| !ready.load(Relaxed));
                assert!(mutex.is_locked());
                woke.store(true, Relaxed);
            });

            // wait until the waiter has released the mutex inside `wait`
            loop {
                let _hold = cond.hold();
                if waiting.load(Relaxed) {
                    break;
                }
            }
            settle();
            assert!(!woke.load(Relaxed));

            cond.lock();
            ready.store(true, Relaxed);
            cond.signal();
            // still holding the mutex, so the waiter cannot have returned
            settle();
            assert!(!woke.load(Relaxed));
            cond.unlock();
        });

        assert!(woke.load(Relaxed));
        assert!(!mutex.is_locked());
    }

    #[test]
    fn broadcast_wakes_everyone() {
        const N: usize = 6;

        let mutex = Mutex::new();
        let cond = Condvar::new(&mutex);
        let flag = AtomicBool::new(false);
        let (ready_tx, ready_rx) = channel();
        let (done_tx, done_rx) = channel();

        thread::scope(|s| {
            for _ in 0..N {
                let rtx = ready_tx.clone();
                let dtx = done_tx.clone();
                let (cond, flag) = (&cond, &flag);
                s.spawn(move || {
                    cond.lock();
                    rtx.send(()).unwrap(); // about to wait
                    while !flag.load(Relaxed) {
                        cond.wait();
                    }
                    cond.unlock();
                    dtx.send(()).unwrap();
                });
            }

            for _ in 0..N {
                ready_rx.recv().unwrap();
            }

            cond.lock();
            flag.store(true, Relaxed);
            cond.broadcast();
            cond.unlock();

            for _ in 0..N {
                done_rx.recv().unwrap();
            }
        });
    }

    #[test]
    #[should_panic(expected = "condition variable waited on without holding its mutex")]
    fn wait_without_lock_panics() {
        let mutex = Mutex::new();
        let cond = Condvar::new(&mutex);
        cond.wait();
    }

    #[cfg(panic = "unwind")] // Requires unwinding support.
    #[test]
    fn wait_from_non_holder_panics() {
        let mutex = Mutex::new();
        let cond = Condvar::new(&mutex);
        cond.lock();

        let result = test_unwind_panic(|| {
            thread::scope(|s| s.spawn(|| cond.wait()).join())
        });
        assert!(result.unwrap().is_err());

        assert!(mutex.is_held_by_current_thread());
        cond.unlock();
    }
}
