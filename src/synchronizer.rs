//! The synchronizer framework: user-supplied acquisition predicates
//! driving a shared wait queue.
//!
//! See the [`Synchronizer`] type's documentation for details.

use crate::{
    arena::Ptr,
    loom::sync::atomic::{AtomicI32, AtomicU64, Ordering::*},
    park::{self, Thread},
    queue::{SyncQueue, WaitStatus},
    util::{CachePadded, DeadlineSpin, SPIN_FOR_TIMEOUT_THRESHOLD},
    AcquireError, Interrupted,
};
use core::fmt;
use std::time::{Duration, Instant};

#[cfg(test)]
mod tests;

/// The client half of a synchronizer: predicates that decide, from the
/// state word alone, whether an acquisition attempt succeeds.
///
/// Implementations override the subset of hooks matching the modes they
/// support; the defaults panic, so a synchronizer used in a mode its
/// protocol never defined fails loudly. Hooks must not block. They may
/// read and CAS the state word through the [`RawSynchronizer`] they are
/// handed, and may consult
/// [`has_queued_predecessors`](RawSynchronizer::has_queued_predecessors)
/// to implement fair variants.
///
/// # Examples
///
/// A one-shot gate, open once its state becomes nonzero:
///
/// ```
/// use turnstile::{Protocol, RawSynchronizer, Synchronizer};
///
/// struct Gate;
///
/// impl Protocol for Gate {
///     fn try_acquire_shared(&self, raw: &RawSynchronizer, _arg: i32) -> i32 {
///         if raw.state() != 0 {
///             1
///         } else {
///             -1
///         }
///     }
///
///     fn try_release_shared(&self, raw: &RawSynchronizer, _arg: i32) -> bool {
///         raw.set_state(1);
///         true
///     }
/// }
///
/// let gate = Synchronizer::new(Gate);
/// assert!(gate.release_shared(1)); // open the gate
/// gate.acquire_shared(1); // does not block; the gate is open
/// ```
pub trait Protocol {
    /// Attempts to acquire in exclusive mode. Must be internally atomic.
    ///
    /// Returning `true` means the caller now holds the synchronizer
    /// exclusively.
    fn try_acquire(&self, raw: &RawSynchronizer, arg: i32) -> bool {
        let _ = (raw, arg);
        panic!("this synchronizer's protocol does not support exclusive acquisition")
    }

    /// Attempts to release in exclusive mode.
    ///
    /// Returns `true` iff the synchronizer is now fully released, so
    /// that waiting threads may attempt to acquire.
    fn try_release(&self, raw: &RawSynchronizer, arg: i32) -> bool {
        let _ = (raw, arg);
        panic!("this synchronizer's protocol does not support exclusive release")
    }

    /// Attempts to acquire in shared mode.
    ///
    /// Negative means failure; zero means success with nothing to spare;
    /// positive means success *and* subsequent shared acquisitions may
    /// also succeed, so the wakeup should propagate.
    fn try_acquire_shared(&self, raw: &RawSynchronizer, arg: i32) -> i32 {
        let _ = (raw, arg);
        panic!("this synchronizer's protocol does not support shared acquisition")
    }

    /// Attempts to release in shared mode.
    ///
    /// Returns `true` iff a waiting acquisition (shared or exclusive)
    /// may now succeed.
    fn try_release_shared(&self, raw: &RawSynchronizer, arg: i32) -> bool {
        let _ = (raw, arg);
        panic!("this synchronizer's protocol does not support shared release")
    }

    /// Is the synchronizer held exclusively by the calling thread?
    ///
    /// Required only if [conditions](crate::Condition) are used.
    fn is_held_exclusively(&self, raw: &RawSynchronizer) -> bool {
        let _ = raw;
        panic!("this synchronizer's protocol does not support conditions")
    }
}

/// The framework half of a synchronizer: the 32-bit atomic state word,
/// the wait queue, and exclusive-owner tracking.
///
/// Protocol hooks receive a `&RawSynchronizer` rather than the full
/// [`Synchronizer`], which keeps them from re-entering the acquisition
/// engine while it is mid-flight on their behalf.
pub struct RawSynchronizer {
    /// The synchronization state. Its interpretation belongs entirely to
    /// the protocol.
    state: CachePadded<AtomicI32>,

    /// Token of the thread holding exclusive access, if the protocol
    /// chooses to track one. Maintained by protocols, read by protocols;
    /// the framework only stores it.
    owner: AtomicU64,

    pub(crate) queue: SyncQueue,
}

// === impl RawSynchronizer ===

impl RawSynchronizer {
    loom_const_fn! {
        pub(crate) fn new() -> Self {
            Self {
                state: CachePadded::new(AtomicI32::new(0)),
                owner: AtomicU64::new(Ptr::NONE.bits()),
                queue: SyncQueue::new(),
            }
        }
    }

    /// Reads the current synchronization state.
    #[must_use]
    pub fn state(&self) -> i32 {
        self.state.load(SeqCst)
    }

    /// Writes the synchronization state.
    ///
    /// Safe for the holder to use directly; contended transitions should
    /// go through [`compare_and_set_state`](Self::compare_and_set_state).
    pub fn set_state(&self, value: i32) {
        self.state.store(value, SeqCst);
    }

    /// Atomically sets the state to `new` if it currently equals
    /// `current`. Full-fence semantics on success and failure.
    pub fn compare_and_set_state(&self, current: i32, new: i32) -> bool {
        self.state
            .compare_exchange(current, new, SeqCst, SeqCst)
            .is_ok()
    }

    /// Records `owner` as the thread holding exclusive access.
    ///
    /// A bookkeeping slot for protocols (reentrant locks need it);
    /// nothing in the framework reads it.
    pub fn set_exclusive_owner(&self, owner: Option<Thread>) {
        let bits = match owner {
            Some(thread) => thread.ptr().bits(),
            None => Ptr::NONE.bits(),
        };
        self.owner.store(bits, SeqCst);
    }

    /// Returns the recorded exclusive owner, if any.
    #[must_use]
    pub fn exclusive_owner(&self) -> Option<Thread> {
        let ptr = Ptr::from_bits(self.owner.load(SeqCst));
        if ptr.is_none() {
            None
        } else {
            Some(Thread::from_ptr(ptr))
        }
    }

    /// Are any threads waiting to acquire?
    #[must_use]
    pub fn has_queued_threads(&self) -> bool {
        self.queue.has_queued_threads()
    }

    /// Has any thread ever had to wait on this synchronizer?
    #[must_use]
    pub fn has_contended(&self) -> bool {
        self.queue.has_contended()
    }

    /// The thread that has been waiting longest, if any. Best-effort
    /// snapshot.
    #[must_use]
    pub fn first_queued_thread(&self) -> Option<Thread> {
        self.queue.first_queued_thread()
    }

    /// Is `thread` currently waiting to acquire? Best-effort snapshot.
    #[must_use]
    pub fn is_queued(&self, thread: Thread) -> bool {
        self.queue.is_queued(thread)
    }

    /// An estimate of the number of waiting threads.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.queue_len()
    }

    /// Tokens of the waiting threads, in no particular order.
    /// Best-effort snapshot.
    #[must_use]
    pub fn queued_threads(&self) -> Vec<Thread> {
        self.queue.queued_threads()
    }

    /// Tokens of the threads waiting in exclusive mode.
    #[must_use]
    pub fn exclusive_queued_threads(&self) -> Vec<Thread> {
        self.queue.exclusive_queued_threads()
    }

    /// Tokens of the threads waiting in shared mode.
    #[must_use]
    pub fn shared_queued_threads(&self) -> Vec<Thread> {
        self.queue.shared_queued_threads()
    }

    /// Is some *other* thread queued ahead of the caller?
    ///
    /// This is the fairness gate: a fair protocol refuses the barging
    /// fast path while this returns `true`. Precise only when the caller
    /// re-checks after a failed CAS, as the acquisition loop naturally
    /// does.
    #[must_use]
    pub fn has_queued_predecessors(&self) -> bool {
        self.queue.has_queued_predecessors()
    }

    /// The shared-mode release/propagation loop.
    ///
    /// Wakes the head's successor if the head promised a signal, or
    /// records `Propagate` on an idle head so the wakeup survives the
    /// head being replaced mid-release. Loops as long as the head keeps
    /// moving, helping each new head along.
    pub(crate) fn do_release_shared(&self) {
        loop {
            let head = self.queue.head();
            if !head.is_sentinel() && head != self.queue.tail() {
                match self.queue.status(head) {
                    Some(WaitStatus::Signal) => {
                        if !self
                            .queue
                            .cas_status(head, WaitStatus::Signal, WaitStatus::Normal)
                        {
                            continue;
                        }
                        self.queue.unpark_successor(head);
                    }
                    Some(WaitStatus::Normal) => {
                        if !self
                            .queue
                            .cas_status(head, WaitStatus::Normal, WaitStatus::Propagate)
                        {
                            continue;
                        }
                    }
                    // Cancelled cannot be the head; a dead head means it
                    // was just replaced, which the re-check below sees.
                    _ => {}
                }
            }
            if self.queue.head() == head {
                break;
            }
        }
    }
}

impl fmt::Debug for RawSynchronizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawSynchronizer")
            .field("state", &self.state())
            .field("queue", &self.queue)
            .finish()
    }
}

/// A blocking synchronizer: a [`RawSynchronizer`] driven by a
/// [`Protocol`].
///
/// The framework supplies the queuing, blocking, cancellation, and
/// propagation machinery; the protocol supplies the meaning of the state
/// word. Acquisition comes in three flavors per mode: uninterruptible
/// ([`acquire`], [`acquire_shared`]), interruptible
/// ([`acquire_interruptibly`], [`acquire_shared_interruptibly`]), and
/// timed ([`acquire_timeout`], [`acquire_shared_timeout`]).
///
/// Ordering: acquisition is *not* strictly FIFO. A newly-arriving thread
/// races its `try_acquire` against the wakeup of the queue's first
/// waiter and may win (barging); protocols that want fairness gate
/// their fast path on
/// [`has_queued_predecessors`](RawSynchronizer::has_queued_predecessors).
/// Wakeups themselves are always delivered in queue order to the first
/// non-cancelled waiter.
///
/// [`acquire`]: Self::acquire
/// [`acquire_shared`]: Self::acquire_shared
/// [`acquire_interruptibly`]: Self::acquire_interruptibly
/// [`acquire_shared_interruptibly`]: Self::acquire_shared_interruptibly
/// [`acquire_timeout`]: Self::acquire_timeout
/// [`acquire_shared_timeout`]: Self::acquire_shared_timeout
pub struct Synchronizer<P> {
    raw: RawSynchronizer,
    protocol: P,
}

// === impl Synchronizer ===

impl<P> Synchronizer<P> {
    loom_const_fn! {
        /// Returns a new `Synchronizer` driven by `protocol`, with the
        /// state word at zero and an empty queue.
        #[must_use]
        pub fn new(protocol: P) -> Self {
            Self {
                raw: RawSynchronizer::new(),
                protocol,
            }
        }
    }

    /// Returns the protocol driving this synchronizer.
    #[must_use]
    pub fn protocol(&self) -> &P {
        &self.protocol
    }

    /// Returns the framework state: the state word, owner slot, and
    /// queue inspection surface.
    #[must_use]
    pub fn raw(&self) -> &RawSynchronizer {
        &self.raw
    }
}

impl<P: Protocol> Synchronizer<P> {
    /// Acquires in exclusive mode, blocking until successful.
    ///
    /// Asks the protocol first (the barging fast path); on refusal,
    /// enqueues and parks until granted. Ignores interrupts, but if one
    /// was observed while waiting, re-asserts the thread's interrupt
    /// flag before returning.
    pub fn acquire(&self, arg: i32) {
        if !self.protocol.try_acquire(&self.raw, arg) {
            let node = self.raw.queue.add_waiter(Ptr::NONE);
            if self.acquire_queued(node, arg) {
                // Swallowed an interrupt while waiting; put it back.
                park::current().interrupt();
            }
        }
    }

    /// Acquires in exclusive mode, blocking until successful or
    /// [interrupted](crate::park::Thread::interrupt).
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the calling thread's interrupt flag
    /// was set on entry or becomes set while waiting. The flag is
    /// consumed, and the caller's queue node is cancelled before the
    /// error is returned.
    pub fn acquire_interruptibly(&self, arg: i32) -> Result<(), Interrupted> {
        if park::interrupted() {
            return Err(Interrupted::new());
        }
        if self.protocol.try_acquire(&self.raw, arg) {
            return Ok(());
        }
        self.do_acquire_interruptibly(arg)
    }

    /// Acquires in exclusive mode, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// - [`AcquireError::Interrupted`] if the calling thread was
    ///   interrupted before or during the wait.
    /// - [`AcquireError::TimedOut`] if `timeout` elapsed first.
    pub fn acquire_timeout(&self, arg: i32, timeout: Duration) -> Result<(), AcquireError> {
        if park::interrupted() {
            return Err(AcquireError::Interrupted);
        }
        if self.protocol.try_acquire(&self.raw, arg) {
            return Ok(());
        }
        self.do_acquire_timed(arg, timeout)
    }

    /// Releases in exclusive mode.
    ///
    /// If the protocol reports the synchronizer fully released, unparks
    /// the head's successor (when one has asked to be signalled) and
    /// returns `true`.
    pub fn release(&self, arg: i32) -> bool {
        if !self.protocol.try_release(&self.raw, arg) {
            return false;
        }
        let head = self.raw.queue.head();
        if !head.is_none() {
            match self.raw.queue.status(head) {
                Some(WaitStatus::Normal) | None => {}
                Some(_) => self.raw.queue.unpark_successor(head),
            }
        }
        self.raw.queue.reclaim_if_quiet();
        true
    }

    /// Acquires in shared mode, blocking until successful.
    ///
    /// Like [`acquire`](Self::acquire), but a success that reports
    /// surplus (positive return from the protocol) cascades: each waiter
    /// that gets in wakes the next, until the surplus runs out or a
    /// non-shared waiter is reached.
    pub fn acquire_shared(&self, arg: i32) {
        if self.protocol.try_acquire_shared(&self.raw, arg) < 0 && self.do_acquire_shared(arg) {
            park::current().interrupt();
        }
    }

    /// Acquires in shared mode, blocking until successful or
    /// interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] under the same conditions as
    /// [`acquire_interruptibly`](Self::acquire_interruptibly).
    pub fn acquire_shared_interruptibly(&self, arg: i32) -> Result<(), Interrupted> {
        if park::interrupted() {
            return Err(Interrupted::new());
        }
        if self.protocol.try_acquire_shared(&self.raw, arg) >= 0 {
            return Ok(());
        }
        self.do_acquire_shared_interruptibly(arg)
    }

    /// Acquires in shared mode, giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// As [`acquire_timeout`](Self::acquire_timeout).
    pub fn acquire_shared_timeout(&self, arg: i32, timeout: Duration) -> Result<(), AcquireError> {
        if park::interrupted() {
            return Err(AcquireError::Interrupted);
        }
        if self.protocol.try_acquire_shared(&self.raw, arg) >= 0 {
            return Ok(());
        }
        self.do_acquire_shared_timed(arg, timeout)
    }

    /// Releases in shared mode.
    ///
    /// If the protocol reports that a waiting acquisition may now
    /// succeed, runs the propagation loop and returns `true`.
    pub fn release_shared(&self, arg: i32) -> bool {
        if !self.protocol.try_release_shared(&self.raw, arg) {
            return false;
        }
        self.raw.do_release_shared();
        self.raw.queue.reclaim_if_quiet();
        true
    }

    /// Returns a new [condition](crate::Condition) bound to this
    /// synchronizer.
    ///
    /// The protocol must implement
    /// [`is_held_exclusively`](Protocol::is_held_exclusively), and its
    /// `try_release`/`try_acquire` must round-trip the full state value
    /// (a wait releases *everything*, then restores it on wakeup).
    #[must_use]
    pub fn condition(&self) -> crate::Condition<'_, P> {
        crate::Condition::new(self)
    }

    /// The queued-acquisition loop, entered with `node` already on the
    /// queue. Returns whether an interrupt was observed (and consumed)
    /// while waiting.
    ///
    /// Shared with the condition-wait path, which re-acquires with its
    /// saved state after being transferred back to the queue.
    pub(crate) fn acquire_queued(&self, node: Ptr, arg: i32) -> bool {
        let queue = &self.raw.queue;
        let mut guard = CancelGuard::new(queue, node);
        let mut interrupted = false;
        loop {
            let pred = queue.slot(node).prev();
            if pred == queue.head() && self.protocol.try_acquire(&self.raw, arg) {
                queue.set_head(node);
                guard.disarm();
                queue.dequeue_old_head(pred);
                return interrupted;
            }
            if queue.should_park_after_failed_acquire(pred, node) {
                park::park();
                if park::interrupted() {
                    interrupted = true;
                }
            }
        }
    }

    fn do_acquire_interruptibly(&self, arg: i32) -> Result<(), Interrupted> {
        let queue = &self.raw.queue;
        let node = queue.add_waiter(Ptr::NONE);
        let mut guard = CancelGuard::new(queue, node);
        loop {
            let pred = queue.slot(node).prev();
            if pred == queue.head() && self.protocol.try_acquire(&self.raw, arg) {
                queue.set_head(node);
                guard.disarm();
                queue.dequeue_old_head(pred);
                return Ok(());
            }
            if queue.should_park_after_failed_acquire(pred, node) {
                park::park();
                if park::interrupted() {
                    // The guard cancels our node on the way out.
                    return Err(Interrupted::new());
                }
            }
        }
    }

    fn do_acquire_timed(&self, arg: i32, timeout: Duration) -> Result<(), AcquireError> {
        if timeout.is_zero() {
            return Err(AcquireError::TimedOut);
        }
        // An unrepresentable deadline is "wait forever".
        let deadline = Instant::now().checked_add(timeout);
        let queue = &self.raw.queue;
        let node = queue.add_waiter(Ptr::NONE);
        let mut guard = CancelGuard::new(queue, node);
        let mut spin = DeadlineSpin::new();
        loop {
            let pred = queue.slot(node).prev();
            if pred == queue.head() && self.protocol.try_acquire(&self.raw, arg) {
                queue.set_head(node);
                guard.disarm();
                queue.dequeue_old_head(pred);
                return Ok(());
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if remaining.is_zero() {
                return Err(AcquireError::TimedOut);
            }
            if queue.should_park_after_failed_acquire(pred, node) {
                if remaining > SPIN_FOR_TIMEOUT_THRESHOLD {
                    match deadline {
                        Some(deadline) => park::park_deadline(deadline),
                        None => park::park(),
                    }
                } else {
                    spin.spin();
                }
            }
            if park::interrupted() {
                return Err(AcquireError::Interrupted);
            }
        }
    }

    fn do_acquire_shared(&self, arg: i32) -> bool {
        let queue = &self.raw.queue;
        let node = queue.add_waiter(Ptr::SHARED);
        let mut guard = CancelGuard::new(queue, node);
        let mut interrupted = false;
        loop {
            let pred = queue.slot(node).prev();
            if pred == queue.head() {
                let r = self.protocol.try_acquire_shared(&self.raw, arg);
                if r >= 0 {
                    self.set_head_and_propagate(node, r);
                    guard.disarm();
                    queue.dequeue_old_head(pred);
                    return interrupted;
                }
            }
            if queue.should_park_after_failed_acquire(pred, node) {
                park::park();
                if park::interrupted() {
                    interrupted = true;
                }
            }
        }
    }

    fn do_acquire_shared_interruptibly(&self, arg: i32) -> Result<(), Interrupted> {
        let queue = &self.raw.queue;
        let node = queue.add_waiter(Ptr::SHARED);
        let mut guard = CancelGuard::new(queue, node);
        loop {
            let pred = queue.slot(node).prev();
            if pred == queue.head() {
                let r = self.protocol.try_acquire_shared(&self.raw, arg);
                if r >= 0 {
                    self.set_head_and_propagate(node, r);
                    guard.disarm();
                    queue.dequeue_old_head(pred);
                    return Ok(());
                }
            }
            if queue.should_park_after_failed_acquire(pred, node) {
                park::park();
                if park::interrupted() {
                    return Err(Interrupted::new());
                }
            }
        }
    }

    fn do_acquire_shared_timed(&self, arg: i32, timeout: Duration) -> Result<(), AcquireError> {
        if timeout.is_zero() {
            return Err(AcquireError::TimedOut);
        }
        let deadline = Instant::now().checked_add(timeout);
        let queue = &self.raw.queue;
        let node = queue.add_waiter(Ptr::SHARED);
        let mut guard = CancelGuard::new(queue, node);
        let mut spin = DeadlineSpin::new();
        loop {
            let pred = queue.slot(node).prev();
            if pred == queue.head() {
                let r = self.protocol.try_acquire_shared(&self.raw, arg);
                if r >= 0 {
                    self.set_head_and_propagate(node, r);
                    guard.disarm();
                    queue.dequeue_old_head(pred);
                    return Ok(());
                }
            }
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if remaining.is_zero() {
                return Err(AcquireError::TimedOut);
            }
            if queue.should_park_after_failed_acquire(pred, node) {
                if remaining > SPIN_FOR_TIMEOUT_THRESHOLD {
                    match deadline {
                        Some(deadline) => park::park_deadline(deadline),
                        None => park::park(),
                    }
                } else {
                    spin.spin();
                }
            }
            if park::interrupted() {
                return Err(AcquireError::Interrupted);
            }
        }
    }

    /// Replaces the head with `node` after a shared-mode success, then
    /// decides whether to keep waking successors.
    ///
    /// The decision is deliberately conservative: propagate if the
    /// protocol reported surplus (`propagate > 0`), *or* if either the
    /// outgoing or incoming head carries a negative status, which
    /// includes `Propagate`, the breadcrumb a concurrent release leaves
    /// when it finds the head not yet asking for a signal. This can wake
    /// one more waiter than necessary; removing any clause opens a
    /// missed-wakeup race between a release and a head replacement.
    fn set_head_and_propagate(&self, node: Ptr, propagate: i32) {
        let queue = &self.raw.queue;
        let old_head = queue.head();
        queue.set_head(node);

        let negative_or_gone = |ptr: Ptr| {
            ptr.is_sentinel()
                || match queue.status(ptr) {
                    Some(status) => status < WaitStatus::Normal,
                    None => true,
                }
        };
        if propagate > 0 || negative_or_gone(old_head) || negative_or_gone(queue.head()) {
            let succ = queue.slot(node).next();
            let succ_shared = match queue.node(succ) {
                Some(s) if !succ.is_sentinel() => s.is_shared(),
                // Unknown successor: propagate rather than risk leaving
                // a shared waiter asleep.
                _ => true,
            };
            if succ.is_none() || succ_shared {
                self.raw.do_release_shared();
            }
        }
    }
}

impl<P: fmt::Debug> fmt::Debug for Synchronizer<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Synchronizer")
            .field("raw", &self.raw)
            .field("protocol", &self.protocol)
            .finish()
    }
}

/// Cancels a queued node unless disarmed.
///
/// Acquisition loops hold one of these so that a panicking protocol
/// hook, an interrupt, or a timeout leaves the queue clean: the node is
/// cancelled (and its successor repaired) before the error or panic
/// escapes the acquisition call.
struct CancelGuard<'a> {
    queue: &'a SyncQueue,
    node: Ptr,
    armed: bool,
}

impl<'a> CancelGuard<'a> {
    fn new(queue: &'a SyncQueue, node: Ptr) -> Self {
        Self {
            queue,
            node,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CancelGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.queue.cancel_acquire(self.node);
        }
    }
}
