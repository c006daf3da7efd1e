// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synchronization primitives (C2): a non-yielding IRQ-safe spinlock, plus
//! the yielding mutex and counting semaphore built over it.
//!
//! Single-core only — §5 says multiprocessor support is out of scope, so the
//! spinlock's "spin on CAS" degenerates to a single check-and-set guarded by
//! a global critical section rather than a real cross-core busy loop. The
//! shape (acquire/release, balance checked) is kept so the contract doesn't
//! change if a core-local variant is split out later.

use core::cell::UnsafeCell;

use alloc::collections::VecDeque;

use abi::{PanicCode, TaskId};

use crate::fail::die;

/// Non-yielding, IRQ-safe lock. Acquiring disables interrupts (via
/// `critical-section`) and remembers the token needed to restore them;
/// releasing restores interrupts to exactly that state. It is illegal to
/// sleep while holding one — nothing in this module enforces that at
/// runtime, the same trust boundary the teacher's own `Irq`/`Borrow`
/// machinery leans on.
pub struct Spinlock {
    locked: UnsafeCell<bool>,
}

// Safety: all access to `locked` happens while holding the global critical
// section (see `acquire`/`release`), so there is no data race to guard
// against beyond what `critical_section` already serializes.
unsafe impl Sync for Spinlock {}

impl Spinlock {
    pub const fn new() -> Self {
        Spinlock {
            locked: UnsafeCell::new(false),
        }
    }

    pub fn acquire(&self) -> SpinlockGuard<'_> {
        // Safety: paired with `critical_section::release` in `release`,
        // called exactly once from the guard's `Drop`.
        let restore = unsafe { critical_section::acquire() };
        // Safety: holding the critical section gives us exclusive access to
        // `locked` on this core.
        let locked = unsafe { &mut *self.locked.get() };
        if *locked {
            // Re-acquiring a spinlock already held by the same path of
            // execution is a kernel bug (no recursion, no real contention
            // under a single core): die rather than deadlock silently.
            unsafe { critical_section::release(restore) };
            die(PanicCode::UnexpectedFault, "spinlock re-acquired while held");
        }
        *locked = true;
        SpinlockGuard { lock: self, restore }
    }

    fn release(&self, restore: critical_section::RawRestoreState) {
        // Safety: see `acquire`; we hold the critical section here too.
        let locked = unsafe { &mut *self.locked.get() };
        if !*locked {
            die(PanicCode::UnacquiredMutexReleased, "spinlock released while not held");
        }
        *locked = false;
        // Safety: `restore` was produced by the matching `acquire` call and
        // has not been used to release before.
        unsafe { critical_section::release(restore) };
    }
}

impl Default for Spinlock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct SpinlockGuard<'a> {
    lock: &'a Spinlock,
    restore: critical_section::RawRestoreState,
}

impl Drop for SpinlockGuard<'_> {
    fn drop(&mut self) {
        self.lock.release(self.restore);
    }
}

/// What the caller of a blocking `acquire` should do next; threaded back to
/// [`crate::sched::Scheduler`] rather than calling into it directly, so this
/// module stays ignorant of the scheduler's internals.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    /// Acquired without blocking.
    Acquired,
    /// Caller must block until woken; scheduler should pick a new task.
    MustBlock,
}

/// A yielding mutual-exclusion lock with FIFO waiters.
pub struct Mutex {
    guard: Spinlock,
    held: UnsafeCell<bool>,
    holder: UnsafeCell<Option<TaskId>>,
    waiters: UnsafeCell<VecDeque<TaskId>>,
}

// Safety: all access to the interior fields happens under `guard`.
unsafe impl Sync for Mutex {}

impl Mutex {
    pub const fn new() -> Self {
        Mutex {
            guard: Spinlock::new(),
            held: UnsafeCell::new(false),
            holder: UnsafeCell::new(None),
            waiters: UnsafeCell::new(VecDeque::new()),
        }
    }

    /// Attempts to acquire on behalf of `current`. Returns
    /// [`WaitOutcome::MustBlock`] if the caller needs to transition to
    /// WAITING and yield; the mutex has already enqueued it by then.
    pub fn acquire(&self, current: TaskId) -> WaitOutcome {
        let _g = self.guard.acquire();
        // Safety: `_g` holds the spinlock for the duration of these accesses.
        let held = unsafe { &mut *self.held.get() };
        let holder = unsafe { &mut *self.holder.get() };
        if !*held {
            *held = true;
            *holder = Some(current);
            return WaitOutcome::Acquired;
        }
        if *holder == Some(current) {
            die(PanicCode::BusyMutexAcquired, "mutex re-acquired by its own holder");
        }
        let waiters = unsafe { &mut *self.waiters.get() };
        waiters.push_back(current);
        WaitOutcome::MustBlock
    }

    /// Releases on behalf of `current`. Returns the task that becomes the
    /// new holder (already marked READY by the caller), or `None` if the
    /// mutex is now free.
    pub fn release(&self, current: TaskId) -> Option<TaskId> {
        let _g = self.guard.acquire();
        let held = unsafe { &mut *self.held.get() };
        let holder = unsafe { &mut *self.holder.get() };
        if !*held || *holder != Some(current) {
            die(PanicCode::UnacquiredMutexReleased, "mutex released by non-holder or while free");
        }
        let waiters = unsafe { &mut *self.waiters.get() };
        match waiters.pop_front() {
            Some(next) => {
                *holder = Some(next);
                Some(next)
            }
            None => {
                *held = false;
                *holder = None;
                None
            }
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

/// A counting semaphore with FIFO waiters, identical discipline to [`Mutex`]
/// beyond the counter.
pub struct Semaphore {
    guard: Spinlock,
    current: UnsafeCell<u32>,
    max: u32,
    waiters: UnsafeCell<VecDeque<TaskId>>,
}

// Safety: all access to the interior fields happens under `guard`.
unsafe impl Sync for Semaphore {}

impl Semaphore {
    pub const fn new(initial: u32, max: u32) -> Self {
        Semaphore {
            guard: Spinlock::new(),
            current: UnsafeCell::new(initial),
            max,
            waiters: UnsafeCell::new(VecDeque::new()),
        }
    }

    pub fn acquire(&self, current_task: TaskId) -> WaitOutcome {
        let _g = self.guard.acquire();
        let current = unsafe { &mut *self.current.get() };
        if *current > 0 {
            *current -= 1;
            return WaitOutcome::Acquired;
        }
        let waiters = unsafe { &mut *self.waiters.get() };
        waiters.push_back(current_task);
        WaitOutcome::MustBlock
    }

    /// Increments the count, waking one waiter (if any) rather than letting
    /// it observe the incremented count itself — ownership transfers
    /// directly, same as `Mutex::release`.
    pub fn release(&self) -> Option<TaskId> {
        let _g = self.guard.acquire();
        let waiters = unsafe { &mut *self.waiters.get() };
        if let Some(next) = waiters.pop_front() {
            return Some(next);
        }
        let current = unsafe { &mut *self.current.get() };
        if *current < self.max {
            *current += 1;
        }
        None
    }

    pub fn value(&self) -> u32 {
        let _g = self.guard.acquire();
        unsafe { *self.current.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tid(n: u16) -> TaskId {
        TaskId::new(n, 0)
    }

    #[test]
    fn spinlock_round_trips() {
        let lock = Spinlock::new();
        {
            let _g = lock.acquire();
        }
        let _g = lock.acquire();
    }

    #[test]
    #[should_panic(expected = "re-acquired while held")]
    fn spinlock_recursive_acquire_panics() {
        let lock = Spinlock::new();
        let _g1 = lock.acquire();
        let _g2 = lock.acquire();
    }

    #[test]
    fn mutex_uncontended_fast_path() {
        let m = Mutex::new();
        assert_eq!(m.acquire(tid(1)), WaitOutcome::Acquired);
        assert_eq!(m.release(tid(1)), None);
    }

    #[test]
    fn mutex_fifo_wakes_in_enqueue_order() {
        let m = Mutex::new();
        assert_eq!(m.acquire(tid(1)), WaitOutcome::Acquired);
        assert_eq!(m.acquire(tid(2)), WaitOutcome::MustBlock);
        assert_eq!(m.acquire(tid(3)), WaitOutcome::MustBlock);
        assert_eq!(m.release(tid(1)), Some(tid(2)));
        assert_eq!(m.release(tid(2)), Some(tid(3)));
        assert_eq!(m.release(tid(3)), None);
    }

    #[test]
    #[should_panic(expected = "released by non-holder")]
    fn mutex_release_by_non_holder_panics() {
        let m = Mutex::new();
        m.acquire(tid(1));
        m.release(tid(2));
    }

    #[test]
    #[should_panic(expected = "released while free")]
    fn mutex_release_while_free_panics() {
        let m = Mutex::new();
        m.release(tid(1));
    }

    #[test]
    #[should_panic(expected = "re-acquired by its own holder")]
    fn mutex_reacquire_by_holder_panics() {
        let m = Mutex::new();
        m.acquire(tid(1));
        m.acquire(tid(1));
    }

    #[test]
    fn semaphore_counts_down_then_blocks() {
        let s = Semaphore::new(1, 4);
        assert_eq!(s.acquire(tid(1)), WaitOutcome::Acquired);
        assert_eq!(s.acquire(tid(2)), WaitOutcome::MustBlock);
        assert_eq!(s.release(), Some(tid(2)));
        assert_eq!(s.value(), 0);
    }

    #[test]
    fn semaphore_release_without_waiters_increments() {
        let s = Semaphore::new(0, 2);
        assert_eq!(s.release(), None);
        assert_eq!(s.value(), 1);
    }

}
