#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![no_std]

// -----------------------------------------------------------------------------
// Compilation config

/// Some macros used for compilation control.
pub mod cfg {
    pub(crate) use vc_cfg::switch;

    vc_cfg::define_alias! {
        #[cfg(feature = "std")] => std,
        #[cfg(all(
            feature = "std",
            any(
                target_os = "linux",
                target_os = "android",
                target_os = "freebsd",
                target_os = "macos",
                target_os = "ios",
                windows
            )
        ))] => futex,
    }
}

// -----------------------------------------------------------------------------
// no_std support

extern crate alloc;

cfg::std! { extern crate std; }

// -----------------------------------------------------------------------------
// Modules

mod barrier;
mod condvar;
mod error;
mod mutex;
mod rwlock;
mod spinlock;

pub mod atomic;
pub mod utils;

cfg::std! {
    pub mod thread;
}

// -----------------------------------------------------------------------------
// Exports

pub use barrier::Barrier;
pub use condvar::Condvar;
pub use error::LogicError;
pub use mutex::{Mutex, MutexHold};
pub use rwlock::{RwLock, RwLockReadHold, RwLockWriteHold};
pub use spinlock::{Spinlock, SpinlockHold};

cfg::std! {
    pub use thread::{Thread, ThreadError, ThreadState};
}
