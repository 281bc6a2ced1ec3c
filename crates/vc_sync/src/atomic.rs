//! Atomic types used by the lock words.
//!
//! Every primitive in this crate is a small state machine over one or two
//! atomic integers. On targets without native atomics of a given width this
//! module switches to `portable_atomic`, so the primitives keep working there
//! (always in the spinning configuration, as no futex is available).
//!
//! Atomic pointers are still required.

pub use atomic_8::AtomicBool;
pub use atomic_32::AtomicU32;
pub use core::sync::atomic::{AtomicUsize, Ordering, fence};

#[cfg(target_has_atomic = "8")]
use core::sync::atomic as atomic_8;

#[cfg(not(target_has_atomic = "8"))]
use portable_atomic as atomic_8;

#[cfg(target_has_atomic = "32")]
use core::sync::atomic as atomic_32;

#[cfg(not(target_has_atomic = "32"))]
use portable_atomic as atomic_32;

#[cfg(not(target_has_atomic = "ptr"))]
compile_error!("Platforms without atomic pointers are currently not supported.");
