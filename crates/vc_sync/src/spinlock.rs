use core::fmt;
use core::marker::PhantomData;

use crate::LogicError;
use crate::atomic::{
    AtomicBool, AtomicUsize,
    Ordering::{Acquire, Relaxed, Release},
};
use crate::utils::{Backoff, thread_token};

// -----------------------------------------------------------------------------
// Spinlock

/// A busy-waiting mutual exclusion lock.
///
/// [`lock`] never yields to the OS scheduler, it keeps the CPU until the
/// lock is free. Only use it for critical sections that are a handful of
/// instructions long; there is no fairness and no starvation guarantee.
///
/// Owns no data, like [`Mutex`](crate::Mutex), and has the same unlock
/// contract: only the holder may unlock.
///
/// # Examples
///
/// ```
/// use core::cell::Cell;
/// use vc_sync::Spinlock;
///
/// struct Foo {
///     data: Cell<i32>,
///     spin: Spinlock,
/// }
///
/// impl Foo {
///     fn get(&self) -> i32 {
///         let _hold = self.spin.hold();
///         self.data.get()
///     }
///     fn set(&self, value: i32) {
///         self.spin.lock();
///         self.data.set(value);
///         self.spin.unlock();
///     }
/// }
///
/// let foo = Foo { data: Cell::new(0), spin: Spinlock::new() };
/// foo.set(3);
/// assert_eq!(foo.get(), 3);
/// ```
///
/// [`lock`]: Spinlock::lock
pub struct Spinlock {
    state: AtomicBool,
    // `thread_token` of the holder, 0 when unlocked.
    owner: AtomicUsize,
}

impl Spinlock {
    /// Creates an unlocked `Spinlock`.
    #[inline(always)]
    pub const fn new() -> Self {
        Self {
            state: AtomicBool::new(false),
            owner: AtomicUsize::new(0),
        }
    }

    /// Return `true` if the spinlock is held.
    #[inline(always)]
    pub fn is_locked(&self) -> bool {
        self.state.load(Relaxed)
    }

    /// Makes a single attempt to acquire the lock.
    ///
    /// - Return `true` if it was acquired.
    /// - Return `false` if it is held elsewhere.
    ///
    /// # Examples
    ///
    /// ```
    /// # use vc_sync::Spinlock;
    /// let spin = Spinlock::new();
    ///
    /// assert_eq!(spin.try_lock(), true);
    /// assert_eq!(spin.try_lock(), false);
    ///
    /// spin.unlock();
    /// assert_eq!(spin.try_lock(), true);
    /// # spin.unlock();
    /// ```
    #[inline]
    pub fn try_lock(&self) -> bool {
        let locked = self
            .state
            .compare_exchange(false, true, Acquire, Relaxed)
            .is_ok();
        if locked {
            self.owner.store(thread_token(), Relaxed);
        }
        locked
    }

    /// Spins until the lock is acquired.
    ///
    /// After failed attempts it polls with a relaxed load and exponential
    /// backoff, to keep the cache line shared while it is held.
    #[inline]
    pub fn lock(&self) {
        let backoff = Backoff::new();
        loop {
            if self.try_lock() {
                return;
            }

            while self.state.load(Relaxed) {
                backoff.spin();
            }
        }
    }

    /// Releases the lock.
    ///
    /// # Panics
    ///
    /// - [`LogicError::UnlockWithoutHold`] if the spinlock is not held.
    /// - [`LogicError::UnlockByNonHolder`] if another thread holds it
    ///   (`std` only).
    #[inline]
    #[track_caller]
    pub fn unlock(&self) {
        if self.owner.load(Relaxed) != thread_token() && self.is_locked() {
            LogicError::UnlockByNonHolder("Spinlock").handle_error();
        }
        self.owner.store(0, Relaxed);

        if !self.state.swap(false, Release) {
            LogicError::UnlockWithoutHold("Spinlock").handle_error();
        }
    }

    /// Acquires the lock and returns a [`SpinlockHold`].
    #[inline]
    pub fn hold(&self) -> SpinlockHold<'_> {
        SpinlockHold::new(self)
    }

    /// Makes a single attempt to acquire the lock, returning a [`SpinlockHold`]
    /// on success.
    #[inline]
    pub fn try_hold(&self) -> Option<SpinlockHold<'_>> {
        self.try_lock().then(|| SpinlockHold {
            spin: self,
            held: true,
            _not_send: PhantomData,
        })
    }
}

impl Default for Spinlock {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Spinlock {
    fn drop(&mut self) {
        if *self.state.get_mut() {
            LogicError::DestroyedWhileHeld("Spinlock").abort();
        }
    }
}

impl fmt::Debug for Spinlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spinlock")
            .field("locked", &self.is_locked())
            .finish()
    }
}

// -----------------------------------------------------------------------------
// SpinlockHold

/// An RAII implementation of a "scoped lock" of a [`Spinlock`].
///
/// When this structure is dropped (falls out of scope), the lock will be
/// unlocked, unless [`release`](SpinlockHold::release) already did.
#[must_use = "if unused the Spinlock will immediately unlock"]
pub struct SpinlockHold<'a> {
    spin: &'a Spinlock,
    held: bool,
    _not_send: PhantomData<*const ()>,
}

impl<'a> SpinlockHold<'a> {
    /// Spins until `spin` is acquired.
    #[inline]
    pub fn new(spin: &'a Spinlock) -> Self {
        spin.lock();
        Self {
            spin,
            held: true,
            _not_send: PhantomData,
        }
    }

    /// Unlocks now instead of at drop. Only the first call unlocks.
    #[inline]
    pub fn release(&mut self) {
        if self.held {
            self.held = false;
            self.spin.unlock();
        }
    }

    /// Returns `true` until [`release`](Self::release) is called.
    #[inline]
    pub fn is_held(&self) -> bool {
        self.held
    }
}

impl Drop for SpinlockHold<'_> {
    /// The dropping of the hold will release the lock it was created from.
    #[inline]
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for SpinlockHold<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinlockHold")
            .field("held", &self.held)
            .finish_non_exhaustive()
    }
}

// -----------------------------------------------------------------------------
// Tests
