//! Low-level helpers shared by the lock implementations.
//!
//! - [`Backoff`] : exponential backoff for spin loops.
//! - [`futex`] : block on / wake an [`AtomicU32`](crate::atomic::AtomicU32).
//!   Uses the OS futex through `atomic-wait` where possible, spins otherwise.
//! - `thread_token` : identifies the calling thread for lock ownership checks.

// -----------------------------------------------------------------------------
// Modules

mod backoff;

pub mod futex;

// -----------------------------------------------------------------------------
// Exports

pub use backoff::Backoff;

// -----------------------------------------------------------------------------
// Thread token

crate::cfg::switch! {
    crate::cfg::std => {
        /// A non-zero number identifying the calling thread among live threads.
        ///
        /// Locks record it on acquire so that an unlock from another thread
        /// can be told apart from the holder's.
        #[inline]
        pub(crate) fn thread_token() -> usize {
            std::thread_local! {
                static TOKEN: u8 = const { 0 };
            }
            TOKEN.with(|t| core::ptr::from_ref(t) as usize)
        }
    }
    _ => {
        /// Always `0`: without `std` threads cannot be told apart, and the
        /// ownership checks of the locks pass unconditionally.
        #[inline(always)]
        pub(crate) fn thread_token() -> usize {
            0
        }
    }
}

// -----------------------------------------------------------------------------
// Utils for test

#[cfg(all(test, feature = "std"))]
#[allow(dead_code, reason = "tests")]
pub(crate) mod tests {
    use core::{any::Any, panic::AssertUnwindSafe, sync::atomic};
    use std::{boxed::Box, panic, thread};

    /// Runs `f`, catching its panic without printing the panic message.
    pub(crate) fn test_unwind_panic<R>(f: impl FnOnce() -> R) -> Result<R, Box<dyn Any + Send>> {
        let prev_hook = panic::take_hook();
        panic::set_hook(Box::new(|_| {}));

        let result = panic::catch_unwind(AssertUnwindSafe(f));

        panic::set_hook(prev_hook);
        result
    }

    /// Runs `f` on a plain std thread and reports whether it panicked.
    pub(crate) fn test_thread_panic<F, T>(f: F) -> Result<T, Box<dyn Any + Send>>
    where
        F: FnOnce() -> T,
        F: Send + 'static,
        T: Send + 'static,
    {
        let prev_hook = panic::take_hook();
        panic::set_hook(Box::new(|_| {}));
        atomic::fence(atomic::Ordering::SeqCst);
        let result = thread::spawn(f).join();
        panic::set_hook(prev_hook);
        result
    }

    /// Gives other threads a chance to run into whatever they are blocked on.
    pub(crate) fn settle() {
        thread::sleep(core::time::Duration::from_millis(50));
    }
}
