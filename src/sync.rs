//! Cooperative sync primitives
//!
//! Mutex, counting semaphore, and generation barrier, all built on
//! [`threading::yield_now`]: blocking means yielding in a loop until the
//! condition clears. Correctness rests on the single-core cooperative
//! model; between two yields a thread's read-modify-write sequences are
//! atomic with respect to every other thread, so relaxed atomics are
//! enough.

use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use crate::threading;

/// Spin-yield mutex. Not reentrant; `unlock` performs no ownership check
/// (the `owner` field is purely informational).
pub struct Mutex {
    locked: AtomicBool,
    /// Tid of the last locker, 0 when free. Advisory only.
    owner: AtomicU32,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            owner: AtomicU32::new(0),
        }
    }

    /// Acquire, yielding while another thread holds the lock.
    pub fn lock(&self) {
        while self.locked.swap(true, Ordering::Relaxed) {
            threading::yield_now();
        }
        let tid = threading::current_tid().map(|t| t.0).unwrap_or(0);
        self.owner.store(tid, Ordering::Relaxed);
    }

    /// Acquire without blocking; `Err(())` if already held.
    pub fn try_lock(&self) -> Result<(), ()> {
        if self.locked.swap(true, Ordering::Relaxed) {
            return Err(());
        }
        let tid = threading::current_tid().map(|t| t.0).unwrap_or(0);
        self.owner.store(tid, Ordering::Relaxed);
        Ok(())
    }

    /// Release unconditionally. Releasing a mutex the caller does not
    /// hold is not detected.
    pub fn unlock(&self) {
        self.owner.store(0, Ordering::Relaxed);
        self.locked.store(false, Ordering::Relaxed);
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

/// Counting semaphore. Wakeup order follows the scheduler's round-robin;
/// no further fairness is promised.
pub struct Semaphore {
    count: AtomicI32,
}

impl Semaphore {
    pub const fn new(initial: i32) -> Self {
        Self {
            count: AtomicI32::new(initial),
        }
    }

    /// Decrement, yielding while the count is exhausted.
    pub fn wait(&self) {
        loop {
            if self.count.load(Ordering::Relaxed) > 0 {
                self.count.fetch_sub(1, Ordering::Relaxed);
                return;
            }
            threading::yield_now();
        }
    }

    pub fn post(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count(&self) -> i32 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Generation barrier for a fixed party size. The generation counter lets
/// a late sleeper distinguish its own rendezvous from the next one.
pub struct Barrier {
    needed: u32,
    count: AtomicU32,
    generation: AtomicU32,
}

impl Barrier {
    /// Party sizes below 1 are clamped to 1.
    pub const fn new(needed: u32) -> Self {
        Self {
            needed: if needed < 1 { 1 } else { needed },
            count: AtomicU32::new(0),
            generation: AtomicU32::new(0),
        }
    }

    /// Block until `needed` threads have arrived in the current
    /// generation. The last arrival resets the count and releases the
    /// rest by advancing the generation.
    pub fn wait(&self) {
        let my_gen = self.generation.load(Ordering::Relaxed);
        let arrived = self.count.fetch_add(1, Ordering::Relaxed) + 1;
        if arrived >= self.needed {
            self.count.store(0, Ordering::Relaxed);
            self.generation.fetch_add(1, Ordering::Relaxed);
            return;
        }
        while self.generation.load(Ordering::Relaxed) == my_gen {
            threading::yield_now();
        }
    }

    pub fn generation(&self) -> u32 {
        self.generation.load(Ordering::Relaxed)
    }
}
