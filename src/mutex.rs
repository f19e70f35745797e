//! A reentrant blocking mutex, fair or non-fair.
//!
//! This is the framework's reference client: two small [`Protocol`]
//! implementations (differing only in whether the uncontended fast path
//! consults the wait queue) drive everything else; queueing, blocking,
//! timeout, interruption, and conditions all come from the
//! [`Synchronizer`].

use crate::{
    park::{self, Thread},
    AcquireError, Condition, Interrupted, Protocol, RawSynchronizer, Synchronizer,
};
use core::fmt;
use std::time::Duration;


/// A reentrant mutual-exclusion lock.
///
/// The state word counts the owner's holds: zero means unlocked, and
/// each [`lock`] by the owning thread adds one. The lock is freed when
/// the count returns to zero, so every [`lock`] must be balanced by an
/// [`unlock`] from the same thread.
///
/// This type deliberately has no guard; it exercises the raw
/// synchronizer surface (ownership is tracked, not borrowed). Misuse is
/// caught at runtime: unlocking from a non-owning thread panics.
///
/// # Fairness
///
/// A mutex from [`new`](Self::new) is *non-fair*: a thread arriving at
/// an exact release may barge in ahead of longer-waiting queued threads,
/// which improves throughput at the cost of ordering. A mutex from
/// [`fair`](Self::fair) refuses the fast path whenever another thread
/// has been queued longer, so the lock is granted in arrival order.
/// [`try_lock`](Self::try_lock) barges even on a fair mutex; use
/// [`try_lock_for`](Self::try_lock_for) with a short timeout if fairness
/// matters there too.
///
/// # Examples
///
/// ```
/// use turnstile::ReentrantMutex;
///
/// let mutex = ReentrantMutex::new();
/// mutex.lock();
/// mutex.lock(); // reentrant: the owner may lock again
/// assert_eq!(mutex.hold_count(), 2);
///
/// mutex.unlock();
/// assert!(mutex.is_locked()); // one hold remains
/// mutex.unlock();
/// assert!(!mutex.is_locked());
/// ```
///
/// [`lock`]: Self::lock
/// [`unlock`]: Self::unlock
#[derive(Debug)]
pub struct ReentrantMutex {
    sync: Synchronizer<Reentrant>,
}

/// The [`Protocol`] implementation backing [`ReentrantMutex`].
///
/// Public only so that [`Condition`]s over the mutex can be named; there
/// is nothing to do with it directly.
#[derive(Debug)]
pub struct Reentrant {
    fair: bool,
}

// === impl Reentrant ===

impl Reentrant {
    /// The acquisition predicate. `respect_queue` is the only difference
    /// between the fair and non-fair variants: the fair fast path yields
    /// to queued predecessors instead of racing them.
    fn try_acquire_inner(&self, raw: &RawSynchronizer, arg: i32, respect_queue: bool) -> bool {
        let current = park::current();
        let state = raw.state();
        if state == 0 {
            if respect_queue && raw.has_queued_predecessors() {
                return false;
            }
            if raw.compare_and_set_state(0, arg) {
                raw.set_exclusive_owner(Some(current));
                return true;
            }
            false
        } else if raw.exclusive_owner() == Some(current) {
            let next = match state.checked_add(arg) {
                Some(next) => next,
                None => panic!("reentrant mutex hold count overflow"),
            };
            // No CAS needed: only the owner writes while state is
            // nonzero.
            raw.set_state(next);
            true
        } else {
            false
        }
    }
}

impl Protocol for Reentrant {
    fn try_acquire(&self, raw: &RawSynchronizer, arg: i32) -> bool {
        self.try_acquire_inner(raw, arg, self.fair)
    }

    fn try_release(&self, raw: &RawSynchronizer, arg: i32) -> bool {
        assert_eq!(
            raw.exclusive_owner(),
            Some(park::current()),
            "unlocked a reentrant mutex from a thread that does not hold it",
        );
        let next = raw.state() - arg;
        let freed = next == 0;
        if freed {
            raw.set_exclusive_owner(None);
        }
        raw.set_state(next);
        freed
    }

    fn is_held_exclusively(&self, raw: &RawSynchronizer) -> bool {
        raw.exclusive_owner() == Some(park::current())
    }
}

// === impl ReentrantMutex ===

impl ReentrantMutex {
    loom_const_fn! {
        /// Returns a new non-fair reentrant mutex.
        #[must_use]
        pub fn new() -> Self {
            Self {
                sync: Synchronizer::new(Reentrant { fair: false }),
            }
        }
    }

    loom_const_fn! {
        /// Returns a new fair reentrant mutex: the lock is granted in
        /// arrival order, at some cost in throughput.
        #[must_use]
        pub fn fair() -> Self {
            Self {
                sync: Synchronizer::new(Reentrant { fair: true }),
            }
        }
    }

    /// Acquires the lock, blocking until it is available.
    ///
    /// If the calling thread already holds the lock, the hold count is
    /// incremented and this returns immediately.
    ///
    /// # Panics
    ///
    /// Panics if incrementing the hold count would overflow. That is a
    /// fatal bookkeeping error, not a recoverable condition.
    pub fn lock(&self) {
        self.sync.acquire(1);
    }

    /// Acquires the lock, blocking until it is available or the calling
    /// thread is interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the thread's interrupt flag was set on
    /// entry or becomes set while waiting.
    pub fn lock_interruptibly(&self) -> Result<(), Interrupted> {
        self.sync.acquire_interruptibly(1)
    }

    /// Acquires the lock only if it is available right now (or already
    /// held by the caller).
    ///
    /// This *barges*: it takes an available lock even on a fair mutex
    /// with queued waiters, mirroring the usual try-lock idiom.
    #[must_use]
    pub fn try_lock(&self) -> bool {
        self.sync
            .protocol()
            .try_acquire_inner(self.sync.raw(), 1, false)
    }

    /// Acquires the lock, giving up after `timeout`.
    ///
    /// Unlike [`try_lock`](Self::try_lock), this respects fairness on a
    /// fair mutex.
    ///
    /// # Errors
    ///
    /// Returns [`AcquireError::TimedOut`] if the timeout elapsed, or
    /// [`AcquireError::Interrupted`] if the thread was interrupted while
    /// waiting.
    pub fn try_lock_for(&self, timeout: Duration) -> Result<(), AcquireError> {
        self.sync.acquire_timeout(1, timeout)
    }

    /// Releases one hold on the lock. The lock becomes available once
    /// every hold has been released.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the lock.
    pub fn unlock(&self) {
        self.sync.release(1);
    }

    /// Returns a new [`Condition`] bound to this mutex.
    ///
    /// # Examples
    ///
    /// ```
    /// use turnstile::ReentrantMutex;
    ///
    /// let mutex = ReentrantMutex::new();
    /// let condition = mutex.condition();
    ///
    /// mutex.lock();
    /// assert!(!condition.has_waiters());
    /// condition.signal_all(); // no-op, but legal while holding the lock
    /// mutex.unlock();
    /// ```
    #[must_use]
    pub fn condition(&self) -> Condition<'_, Reentrant> {
        self.sync.condition()
    }

    /// The number of holds the calling thread has on this lock, or zero
    /// if it does not hold it.
    #[must_use]
    pub fn hold_count(&self) -> usize {
        if self.is_held_by_current_thread() {
            self.sync.raw().state() as usize
        } else {
            0
        }
    }

    /// Is this lock held by any thread?
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.sync.raw().state() != 0
    }

    /// Is this lock held by the calling thread?
    #[must_use]
    pub fn is_held_by_current_thread(&self) -> bool {
        self.sync
            .protocol()
            .is_held_exclusively(self.sync.raw())
    }

    /// Was this mutex constructed with [`fair`](Self::fair)?
    #[must_use]
    pub fn is_fair(&self) -> bool {
        self.sync.protocol().fair
    }

    /// The token of the thread currently holding the lock, if any.
    /// Best-effort snapshot.
    #[must_use]
    pub fn owner(&self) -> Option<Thread> {
        if self.is_locked() {
            self.sync.raw().exclusive_owner()
        } else {
            None
        }
    }

    /// Are any threads waiting for this lock?
    #[must_use]
    pub fn has_queued_threads(&self) -> bool {
        self.sync.raw().has_queued_threads()
    }

    /// An estimate of the number of threads waiting for this lock.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.sync.raw().queue_len()
    }

    /// Is `thread` waiting for this lock? Best-effort snapshot.
    #[must_use]
    pub fn has_queued_thread(&self, thread: Thread) -> bool {
        self.sync.raw().is_queued(thread)
    }

    /// The underlying synchronizer, for inspection.
    #[must_use]
    pub fn synchronizer(&self) -> &Synchronizer<Reentrant> {
        &self.sync
    }
}

impl Default for ReentrantMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReentrantMutex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.owner() {
            Some(owner) => write!(f, "ReentrantMutex(locked by {owner:?})"),
            None => f.write_str("ReentrantMutex(unlocked)"),
        }
    }
}
