use core::fmt;
use core::marker::PhantomData;

use crate::LogicError;
use crate::atomic::{
    AtomicU32, AtomicUsize,
    Ordering::{Acquire, Relaxed, Release},
};
use crate::utils::{Backoff, futex, thread_token};

const UNLOCKED: u32 = 0;
// Locked, no other threads waiting.
const LOCKED: u32 = 1;
// Locked, and other threads may be blocked in `futex::wait`.
const CONTENDED: u32 = 2;

// -----------------------------------------------------------------------------
// Mutex

/// A mutual exclusion lock.
///
/// `Mutex` owns no data. It serializes whatever state the caller associates
/// with it, so every access to that state must happen between a [`lock`] and
/// the matching [`unlock`], or inside a [`MutexHold`].
///
/// Contended threads spin briefly and then block in the OS (futex) until the
/// holder unlocks. See [`utils::futex`](crate::utils::futex) for the platforms
/// without OS support, where blocking degrades to spinning.
///
/// # Contract
///
/// - [`unlock`] must only be called by the thread that holds the lock.
///   Unlocking an unlocked mutex panics with [`LogicError::UnlockWithoutHold`],
///   unlocking a mutex held by *another* thread panics with
///   [`LogicError::UnlockByNonHolder`]. The latter is only detected with the
///   `std` feature.
/// - Dropping a mutex that is still locked aborts the process.
///
/// # Examples
///
/// ```
/// use std::{sync::Arc, thread};
/// use vc_sync::atomic::{AtomicUsize, Ordering::Relaxed};
/// use vc_sync::Mutex;
///
/// struct Counter {
///     lock: Mutex,
///     value: AtomicUsize,
/// }
///
/// let counter = Arc::new(Counter { lock: Mutex::new(), value: AtomicUsize::new(0) });
///
/// thread::scope(|s| {
///     for _ in 0..4 {
///         s.spawn(|| {
///             for _ in 0..100 {
///                 let _hold = counter.lock.hold();
///                 let v = counter.value.load(Relaxed);
///                 counter.value.store(v + 1, Relaxed);
///             }
///         });
///     }
/// });
///
/// assert_eq!(counter.value.load(Relaxed), 400);
/// ```
///
/// [`lock`]: Mutex::lock
/// [`unlock`]: Mutex::unlock
pub struct Mutex {
    state: AtomicU32,
    // `thread_token` of the holder, 0 when unlocked.
    owner: AtomicUsize,
}

impl Mutex {
    /// Creates a new mutex in an unlocked state.
    #[inline]
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
            owner: AtomicUsize::new(0),
        }
    }

    /// Returns `true` if some thread holds the lock.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.state.load(Relaxed) != UNLOCKED
    }

    /// Acquires the lock, blocking the current thread until it is able to do so.
    #[inline]
    pub fn lock(&self) {
        if self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_err()
        {
            self.lock_contended();
        }
        self.owner.store(thread_token(), Relaxed);
    }

    /// Attempts to acquire the lock without blocking.
    ///
    /// - Return `true` if the lock was acquired.
    /// - Return `false` if it is already held, by this or any other thread.
    ///
    /// # Examples
    ///
    /// ```
    /// # use vc_sync::Mutex;
    /// let mutex = Mutex::new();
    ///
    /// assert!(mutex.try_lock());
    /// assert!(!mutex.try_lock());
    ///
    /// mutex.unlock();
    /// assert!(mutex.try_lock());
    /// # mutex.unlock();
    /// ```
    #[inline]
    pub fn try_lock(&self) -> bool {
        let locked = self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            .is_ok();
        if locked {
            self.owner.store(thread_token(), Relaxed);
        }
        locked
    }

    /// Returns `true` if the calling thread holds the lock.
    ///
    /// Without the `std` feature this is the same as [`is_locked`](Self::is_locked).
    #[inline]
    pub fn is_held_by_current_thread(&self) -> bool {
        self.is_locked() && self.owner.load(Relaxed) == thread_token()
    }

    #[cold]
    fn lock_contended(&self) {
        let mut state = self.spin();

        // Unlocked while spinning, try to grab it without marking contention.
        if state == UNLOCKED {
            match self
                .state
                .compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed)
            {
                Ok(_) => return,
                Err(s) => state = s,
            }
        }

        loop {
            // We cannot tell whether other threads are blocked, so any lock
            // taken from here on is marked `CONTENDED`.
            if state != CONTENDED && self.state.swap(CONTENDED, Acquire) == UNLOCKED {
                return;
            }

            futex::wait(&self.state, CONTENDED);

            state = self.spin();
        }
    }

    // Spins while the lock is held by an uncontended owner.
    fn spin(&self) -> u32 {
        let backoff = Backoff::new();
        loop {
            let state = self.state.load(Relaxed);
            if state != LOCKED || backoff.is_completed() {
                return state;
            }
            backoff.spin();
        }
    }

    /// Releases the lock.
    ///
    /// # Panics
    ///
    /// - [`LogicError::UnlockWithoutHold`] if the mutex is not locked.
    /// - [`LogicError::UnlockByNonHolder`] if another thread holds it.
    #[inline]
    #[track_caller]
    pub fn unlock(&self) {
        if self.owner.load(Relaxed) != thread_token() {
            if self.is_locked() {
                LogicError::UnlockByNonHolder("Mutex").handle_error();
            }
            LogicError::UnlockWithoutHold("Mutex").handle_error();
        }
        // Cleared before the release, so a former holder never reads its own
        // token back once another thread has taken the lock.
        self.owner.store(0, Relaxed);

        match self.state.swap(UNLOCKED, Release) {
            LOCKED => {}
            CONTENDED => futex::wake_one(&self.state),
            _ => LogicError::UnlockWithoutHold("Mutex").handle_error(),
        }
    }

    /// Acquires the lock and returns a [`MutexHold`] that releases it on drop.
    #[inline]
    pub fn hold(&self) -> MutexHold<'_> {
        MutexHold::new(self)
    }

    /// Attempts to acquire the lock, returning a [`MutexHold`] on success.
    #[inline]
    pub fn try_hold(&self) -> Option<MutexHold<'_>> {
        self.try_lock().then(|| MutexHold {
            mutex: self,
            held: true,
            _not_send: PhantomData,
        })
    }
}

impl Default for Mutex {
    /// Creates an unlocked mutex.
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Mutex {
    fn drop(&mut self) {
        if *self.state.get_mut() != UNLOCKED {
            LogicError::DestroyedWhileHeld("Mutex").abort();
        }
    }
}

impl fmt::Debug for Mutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.is_locked())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// MutexHold

/// An RAII implementation of a "scoped lock" of a [`Mutex`].
///
/// The lock is acquired by [`MutexHold::new`] and released when the hold is
/// dropped, unless it was already given up early with [`release`].
///
/// # Examples
///
/// ```
/// use vc_sync::{Mutex, MutexHold};
///
/// let mutex = Mutex::new();
/// {
///     let mut hold = MutexHold::new(&mutex);
///     assert!(mutex.is_locked());
///
///     hold.release();
///     assert!(!mutex.is_locked());
///
///     // second release and the drop are no-ops
///     hold.release();
/// }
/// assert!(!mutex.is_locked());
/// ```
///
/// [`release`]: MutexHold::release
#[must_use = "if unused the Mutex will immediately unlock"]
pub struct MutexHold<'a> {
    mutex: &'a Mutex,
    held: bool,
    // Must be released on the thread that acquired it.
    _not_send: PhantomData<*const ()>,
}

impl<'a> MutexHold<'a> {
    /// Blocks until `mutex` is acquired.
    #[inline]
    pub fn new(mutex: &'a Mutex) -> Self {
        mutex.lock();
        Self {
            mutex,
            held: true,
            _not_send: PhantomData,
        }
    }

    /// Unlocks the mutex now instead of at drop.
    ///
    /// Idempotent: only the first call unlocks.
    #[inline]
    pub fn release(&mut self) {
        if self.held {
            self.held = false;
            self.mutex.unlock();
        }
    }

    /// Returns `true` until [`release`](Self::release) is called.
    #[inline]
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// The mutex this hold belongs to.
    #[inline]
    pub fn mutex(&self) -> &'a Mutex {
        self.mutex
    }
}

impl Drop for MutexHold<'_> {
    #[inline]
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for MutexHold<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MutexHold")
            .field("held", &self.held)
            .finish_non_exhaustive()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(all(test, feature = "std"))]
mod tests {
    use std::sync::{Arc, mpsc::channel};
    use std::thread;

    use super::{Mutex, MutexHold};
    use crate::atomic::{AtomicUsize, Ordering::Relaxed};
    use crate::utils::tests::*;

    // A counter whose increment is only correct under mutual exclusion.
    struct Guarded {
        lock: Mutex,
        value: AtomicUsize,
    }

    impl Guarded {
        fn new() -> Self {
            Self {
                lock: Mutex::new(),
                value: AtomicUsize::new(0),
            }
        }

        fn bump(&self) {
            let v = self.value.load(Relaxed);
            thread::yield_now();
            self.value.store(v + 1, Relaxed);
        }
    }

    #[test]
    fn smoke() {
        let m = Mutex::new();
        m.lock();
        m.unlock();
        m.lock();
        m.unlock();
        drop(m.hold());
        drop(m.hold());
        assert!(!m.is_locked());
    }

    #[test]
    fn lots_and_lots() {
        const J: usize = 1000;
        const K: usize = 3;

        let g = Arc::new(Guarded::new());

        fn inc(g: &Guarded) {
            for _ in 0..J {
                g.lock.lock();
                g.bump();
                g.lock.unlock();
            }
        }

        fn inc_held(g: &Guarded) {
            for _ in 0..J {
                let _hold = MutexHold::new(&g.lock);
                g.bump();
            }
        }

        let (tx, rx) = channel();
        for _ in 0..K {
            let tx2 = tx.clone();
            let g2 = g.clone();
            thread::spawn(move || {
                inc(&g2);
                tx2.send(()).unwrap();
            });
            let tx2 = tx.clone();
            let g2 = g.clone();
            thread::spawn(move || {
                inc_held(&g2);
                tx2.send(()).unwrap();
            });
        }

        drop(tx);
        for _ in 0..2 * K {
            rx.recv().unwrap();
        }
        assert_eq!(g.value.load(Relaxed), J * K * 2);
    }

    #[test]
    fn try_lock() {
        let m = Mutex::new();
        assert!(m.try_lock());
        assert!(!m.try_lock());
        m.unlock();
        assert!(m.try_lock());
        m.unlock();
    }

    #[test]
    fn try_lock_from_other_thread() {
        let m = Arc::new(Mutex::new());
        assert!(m.try_lock());

        let m2 = m.clone();
        let busy = thread::spawn(move || m2.try_lock()).join().unwrap();
        assert!(!busy);

        m.unlock();
        let m2 = m.clone();
        let acquired = thread::spawn(move || {
            let ok = m2.try_lock();
            if ok {
                m2.unlock();
            }
            ok
        })
        .join()
        .unwrap();
        assert!(acquired);
    }

    #[test]
    fn try_hold() {
        let m = Mutex::new();
        let hold = m.try_hold().unwrap();
        assert!(hold.is_held());
        assert!(m.try_hold().is_none());
        drop(hold);
        assert!(!m.is_locked());
    }

    #[test]
    fn lock_blocks_until_unlocked() {
        let m = Arc::new(Mutex::new());
        let passed = Arc::new(AtomicUsize::new(0));
        m.lock();

        let (m2, p2) = (m.clone(), passed.clone());
        let h = thread::spawn(move || {
            let _hold = m2.hold();
            p2.store(1, Relaxed);
        });

        settle();
        assert_eq!(passed.load(Relaxed), 0);
        m.unlock();
        h.join().unwrap();
        assert_eq!(passed.load(Relaxed), 1);
    }

    #[test]
    fn release_is_idempotent() {
        let m = Mutex::new();
        let mut hold = m.hold();
        hold.release();
        assert!(!hold.is_held());
        assert!(!m.is_locked());

        // Someone else takes the lock; the stale hold must not unlock it.
        m.lock();
        hold.release();
        drop(hold);
        assert!(m.is_locked());
        m.unlock();
    }

    #[test]
    #[should_panic(expected = "Mutex unlocked while not held")]
    fn unlock_without_hold_panics() {
        let m = Mutex::new();
        m.unlock();
    }

    #[cfg(panic = "unwind")] // Requires unwinding support.
    #[test]
    fn unlock_from_other_thread_panics() {
        let m = Arc::new(Mutex::new());
        m.lock();
        assert!(m.is_held_by_current_thread());

        let m2 = m.clone();
        let result = test_thread_panic(move || {
            assert!(!m2.is_held_by_current_thread());
            m2.unlock();
        });
        let msg = result.unwrap_err().downcast::<alloc::string::String>().unwrap();
        assert_eq!(*msg, "Mutex unlocked by a thread that does not hold it");

        // The holder is unaffected.
        assert!(m.is_locked());
        m.unlock();
        assert!(!m.is_held_by_current_thread());
    }

    #[cfg(panic = "unwind")] // Requires unwinding support.
    #[test]
    fn hold_released_on_unwind() {
        let m = Mutex::new();

        let result = test_unwind_panic(|| {
            let _hold = m.hold();
            panic!("test panic with mutex held");
        });

        assert!(result.is_err());
        assert!(!m.is_locked());
    }

    #[cfg(panic = "unwind")] // Requires unwinding support.
    #[test]
    fn mutex_arc_access_in_unwind() {
        let g = Arc::new(Guarded::new());
        let g2 = g.clone();

        let _ = test_thread_panic(move || -> () {
            struct Unwinder {
                g: Arc<Guarded>,
            }
            impl Drop for Unwinder {
                fn drop(&mut self) {
                    let _hold = self.g.lock.hold();
                    self.g.bump();
                }
            }
            let _u = Unwinder { g: g2 };
            panic!();
        });

        let _hold = g.lock.hold();
        assert_eq!(g.value.load(Relaxed), 1);
    }
}
