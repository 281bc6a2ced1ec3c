#![expect(unsafe_code, reason = "Barrier state is guarded by its own mutex.")]

use core::cell::UnsafeCell;
use core::fmt;

use crate::condvar::Signal;
use crate::{Mutex, MutexHold};

// The inner state of a barrier, only touched with `Barrier::lock` held.
struct BarrierState {
    level: usize,
    generation: u64,
}

/// A cyclic rendezvous point for a fixed number of threads.
///
/// Each call to [`wait`] blocks until `height` calls have arrived in the
/// current generation. The last arrival (the *serial* one) starts a new
/// generation, wakes everyone and returns `true`; all others return `false`.
///
/// The barrier is reusable: the generation counter keeps a thread that
/// already passed from being confused with waiters of the next round.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
/// use vc_sync::Barrier;
///
/// let n = 10;
/// let barrier = Arc::new(Barrier::new(n));
///
/// let handles: Vec<_> = (0..n)
///     .map(|_| {
///         let c = Arc::clone(&barrier);
///         thread::spawn(move || c.wait())
///     })
///     .collect();
///
/// let serial = handles
///     .into_iter()
///     .map(|h| h.join().unwrap())
///     .filter(|&is_serial| is_serial)
///     .count();
/// assert_eq!(serial, 1);
/// ```
///
/// [`wait`]: Barrier::wait
pub struct Barrier {
    lock: Mutex,
    signal: Signal,
    height: usize,
    state: UnsafeCell<BarrierState>,
}

// SAFETY: `state` is only accessed while `lock` is held.
unsafe impl Sync for Barrier {}

impl Barrier {
    /// Creates a barrier that releases threads in groups of `height`.
    ///
    /// A `height` of 0 is treated as 1, so every `wait` returns immediately.
    pub fn new(height: usize) -> Self {
        if height == 0 {
            log::warn!("Barrier created with height 0, using 1");
        }

        Self {
            lock: Mutex::new(),
            signal: Signal::new(),
            height: height.max(1),
            state: UnsafeCell::new(BarrierState {
                level: 0,
                generation: 0,
            }),
        }
    }

    /// Number of arrivals that complete a generation.
    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// Number of completed generations, wrapping on overflow.
    pub fn generation(&self) -> u64 {
        let _hold = self.lock.hold();
        self.generation_locked()
    }

    // The caller must hold `lock`.
    #[inline]
    fn generation_locked(&self) -> u64 {
        // SAFETY: `lock` is held, and no `&mut` to the state is live.
        unsafe { (*self.state.get()).generation }
    }

    /// Blocks until `height` threads have called `wait` in this generation.
    ///
    /// Returns `true` for exactly one caller per generation, the one whose
    /// arrival completed it. That caller never blocks.
    pub fn wait(&self) -> bool {
        let _hold = MutexHold::new(&self.lock);
        let state = self.state.get();

        // SAFETY: `lock` is held. No reference outlives a `Signal::wait`,
        // which releases the lock.
        let generation = unsafe {
            (*state).level += 1;
            (*state).generation
        };

        // SAFETY: as above.
        if unsafe { (*state).level } >= self.height {
            unsafe {
                (*state).level = 0;
                (*state).generation = generation.wrapping_add(1);
            }
            self.signal.notify_all();
            return true;
        }

        // `Signal::wait` re-acquires `lock` before returning.
        while self.generation_locked() == generation {
            self.signal.wait(&self.lock);
        }
        false
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier")
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(all(test, feature = "std"))]
mod tests {
    use std::sync::{Arc, mpsc::channel};
    use std::thread;
    use std::vec::Vec;

    use super::Barrier;
    use crate::utils::tests::settle;

    #[test]
    fn height_one_is_always_serial() {
        let barrier = Barrier::new(1);
        assert_eq!(barrier.height(), 1);
        for round in 0..3 {
            assert_eq!(barrier.generation(), round);
            assert!(barrier.wait());
        }
        assert_eq!(barrier.generation(), 3);
    }

    #[test]
    fn zero_height_acts_as_one() {
        let barrier = Barrier::new(0);
        assert_eq!(barrier.height(), 1);
        assert!(barrier.wait());
    }

    #[test]
    fn test_barrier() {
        const N: usize = 4;

        let barrier = Arc::new(Barrier::new(N));
        let (tx, rx) = channel();

        for _ in 0..N - 1 {
            let c = barrier.clone();
            let tx = tx.clone();
            thread::spawn(move || {
                tx.send(c.wait()).unwrap();
            });
        }

        // Nobody may pass until the last arrival.
        settle();
        assert!(rx.try_recv().is_err());
        assert_eq!(barrier.generation(), 0);

        let mut serial = 0;
        if barrier.wait() {
            serial += 1;
        }
        for _ in 0..N - 1 {
            if rx.recv().unwrap() {
                serial += 1;
            }
        }
        assert_eq!(serial, 1);
        assert_eq!(barrier.generation(), 1);
    }

    #[test]
    fn rounds_are_independent() {
        const N: usize = 4;
        const ROUNDS: usize = 20;

        let barrier = Arc::new(Barrier::new(N));

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let c = barrier.clone();
                thread::spawn(move || {
                    let mut serial = Vec::with_capacity(ROUNDS);
                    for _ in 0..ROUNDS {
                        serial.push(c.wait());
                    }
                    serial
                })
            })
            .collect();

        let results: Vec<Vec<bool>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for round in 0..ROUNDS {
            let count = results.iter().filter(|r| r[round]).count();
            assert_eq!(count, 1, "round {round}");
        }
        assert_eq!(barrier.generation(), ROUNDS as u64);
    }
}
