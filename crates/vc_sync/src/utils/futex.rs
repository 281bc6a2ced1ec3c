//! Block on an [`AtomicU32`] until it changes.
//!
//! - [`wait`] blocks while `*atomic == expected`. It may return spuriously.
//! - [`wake_one`] / [`wake_all`] wake threads blocked in [`wait`] on the same atomic.
//!
//! With the `std` feature on Linux, Android, FreeBSD, macOS, iOS and Windows these
//! forward to the `atomic-wait` crate (futex, `_umtx_op`, `__ulock`,
//! `WaitOnAddress`). Elsewhere [`wait`] spins for a short while and returns,
//! and the wake functions do nothing. Every caller re-checks its condition in a
//! loop, so the two configurations are interchangeable.

use crate::atomic::AtomicU32;

crate::cfg::switch! {
    crate::cfg::futex => {
        /// Blocks the current thread while `*atomic == expected`.
        ///
        /// Returns immediately if the value is already different.
        /// Spurious returns are possible.
        #[inline]
        pub fn wait(atomic: &AtomicU32, expected: u32) {
            atomic_wait::wait(atomic, expected);
        }

        /// Wakes one thread blocked in [`wait`] on `atomic`.
        #[inline]
        pub fn wake_one(atomic: &AtomicU32) {
            atomic_wait::wake_one(atomic);
        }

        /// Wakes every thread blocked in [`wait`] on `atomic`.
        #[inline]
        pub fn wake_all(atomic: &AtomicU32) {
            atomic_wait::wake_all(atomic);
        }
    }
    _ => {
        use crate::atomic::Ordering::Relaxed;
        use crate::utils::Backoff;

        /// Spins while `*atomic == expected`, for a bounded time.
        ///
        /// There is no OS support for blocking, so this returns after the backoff
        /// completes even if the value did not change.
        #[inline]
        pub fn wait(atomic: &AtomicU32, expected: u32) {
            let backoff = Backoff::new();
            while atomic.load(Relaxed) == expected && !backoff.is_completed() {
                backoff.snooze();
            }
        }

        /// No-op, waiters poll.
        #[inline(always)]
        pub fn wake_one(_atomic: &AtomicU32) {}

        /// No-op, waiters poll.
        #[inline(always)]
        pub fn wake_all(_atomic: &AtomicU32) {}
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::{wait, wake_all, wake_one};
    use crate::atomic::{AtomicU32, Ordering::Relaxed};
    use crate::utils::tests::settle;

    #[test]
    fn wait_returns_when_value_differs() {
        let atomic = AtomicU32::new(1);
        // must not block
        wait(&atomic, 0);
    }

    #[test]
    fn wake_without_waiters_is_noop() {
        let atomic = AtomicU32::new(0);
        wake_one(&atomic);
        wake_all(&atomic);
    }

    #[test]
    fn wake_releases_waiter() {
        let atomic = Arc::new(AtomicU32::new(0));
        let a2 = atomic.clone();
        let h = thread::spawn(move || {
            while a2.load(Relaxed) == 0 {
                wait(&a2, 0);
            }
        });
        settle();
        atomic.store(1, Relaxed);
        wake_all(&atomic);
        h.join().unwrap();
    }
}
