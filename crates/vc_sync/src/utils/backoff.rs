//! Adapted from `crossbeam-utils` 0.8.21.

use core::cell::Cell;
use core::fmt;

/// The maximum exponent of spin count.
const SPIN_LIMIT: u32 = 6;

/// Performs exponential backoff in spin loops.
///
/// Each step spins roughly twice as long as the previous one, up to
/// `2^SPIN_LIMIT` pause instructions. Once the limit is reached the backoff
/// is [completed](Backoff::is_completed): a blocking primitive should stop
/// spinning and park the thread instead.
///
/// # Examples
///
/// ```
/// use vc_sync::atomic::{AtomicBool, Ordering};
/// use vc_sync::utils::Backoff;
///
/// let ready = AtomicBool::new(true);
/// let backoff = Backoff::new();
/// while !ready.load(Ordering::Acquire) {
///     backoff.spin();
/// }
/// assert!(!backoff.is_completed());
/// ```
pub struct Backoff {
    step: Cell<u32>,
}

impl Backoff {
    /// Creates a new `Backoff`.
    #[inline(always)]
    pub const fn new() -> Self {
        Self { step: Cell::new(0) }
    }

    /// Backs off in a lock-free loop.
    ///
    /// Never yields to the OS scheduler, only executes *PAUSE* / *YIELD*
    /// instructions. Used by [`Spinlock`](crate::Spinlock).
    #[inline(always)]
    pub fn spin(&self) {
        let step: u32 = 1 << self.step.get();
        for _ in 0..step {
            core::hint::spin_loop();
        }

        if self.step.get() < SPIN_LIMIT {
            self.step.set(self.step.get() + 1);
        }
    }

    /// Backs off in a blocking loop.
    ///
    /// Spins like [`spin`] until the limit, then gives up the timeslice to
    /// the OS scheduler.
    ///
    /// In `#[no_std]` environments, this method only spins.
    ///
    /// [`spin`]: Backoff::spin
    #[inline]
    pub fn snooze(&self) {
        if self.step.get() < SPIN_LIMIT {
            let step: u32 = 1 << self.step.get();

            for _ in 0..step {
                core::hint::spin_loop();
            }

            self.step.set(self.step.get() + 1);
        } else {
            crate::cfg::switch! {
                crate::cfg::std => {
                    ::std::thread::yield_now();
                }
                _ => {
                    for _ in 0..1024_u32 {
                        core::hint::spin_loop();
                    }
                }
            }
        }
    }

    /// Returns `true` once spinning has reached its limit.
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.step.get() >= SPIN_LIMIT
    }

    /// Starts over from the shortest step.
    #[inline]
    pub fn reset(&self) {
        self.step.set(0);
    }
}

impl fmt::Debug for Backoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backoff")
            .field("step", &self.step)
            .field("is_completed", &self.is_completed())
            .finish()
    }
}

impl Default for Backoff {
    #[inline(always)]
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::{Backoff, SPIN_LIMIT};

    #[test]
    fn completes_after_limit() {
        let backoff = Backoff::new();
        for _ in 0..SPIN_LIMIT {
            assert!(!backoff.is_completed());
            backoff.spin();
        }
        assert!(backoff.is_completed());

        // stays completed
        backoff.spin();
        backoff.snooze();
        assert!(backoff.is_completed());

        backoff.reset();
        assert!(!backoff.is_completed());
    }
}
