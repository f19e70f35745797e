//! Condition variables bound to a synchronizer.
//!
//! See the [`Condition`] type's documentation for details.

use crate::{
    arena::Ptr,
    loom::sync::atomic::{AtomicU64, Ordering::*},
    park,
    queue::{SyncQueue, WaitStatus},
    util::{DeadlineSpin, SPIN_FOR_TIMEOUT_THRESHOLD},
    Interrupted, Protocol, Synchronizer,
};
use core::fmt;
use std::time::{Duration, Instant};


/// A condition variable bound to a [`Synchronizer`].
///
/// Each condition owns a private queue of waiters, linked through the
/// same node records as the main wait queue. A [`wait`] atomically
/// releases the synchronizer's *entire* held state, parks until
/// [`signal`]led (at which point the node is transferred onto the main
/// queue), and then re-acquires with the saved state before returning,
/// so a reentrant holder gets all of its holds back.
///
/// Every operation on a condition requires that the calling thread hold
/// the owning synchronizer exclusively, which is also what makes the
/// condition queue safe to mutate without CAS: there is never more than
/// one mutator.
///
/// Constructed by [`Synchronizer::condition`]. A synchronizer may have
/// any number of conditions, each with its own waiter queue.
///
/// [`wait`]: Self::wait
/// [`signal`]: Self::signal
pub struct Condition<'sync, P> {
    sync: &'sync Synchronizer<P>,

    /// Head of the condition queue, linked through `next_waiter`.
    ///
    /// These are atomics only so the type stays `Sync`; they are read
    /// and written exclusively by a thread holding the synchronizer.
    first_waiter: AtomicU64,

    /// Tail of the condition queue.
    last_waiter: AtomicU64,
}

/// How an interrupt observed during a wait is reported once the
/// synchronizer has been re-acquired.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum InterruptMode {
    /// No interrupt observed.
    None,
    /// The interrupt arrived after a signal had already begun the
    /// transfer; the wait completes and the flag is re-asserted.
    Reinterrupt,
    /// The interrupt beat any signal; the wait reports it as an error.
    Throw,
}

// === impl Condition ===

impl<'sync, P: Protocol> Condition<'sync, P> {
    pub(crate) fn new(sync: &'sync Synchronizer<P>) -> Self {
        Self {
            sync,
            first_waiter: AtomicU64::new(Ptr::NONE.bits()),
            last_waiter: AtomicU64::new(Ptr::NONE.bits()),
        }
    }

    fn queue(&self) -> &SyncQueue {
        &self.sync.raw().queue
    }

    fn first_waiter(&self) -> Ptr {
        Ptr::from_bits(self.first_waiter.load(SeqCst))
    }

    fn set_first_waiter(&self, ptr: Ptr) {
        self.first_waiter.store(ptr.bits(), SeqCst);
    }

    fn last_waiter(&self) -> Ptr {
        Ptr::from_bits(self.last_waiter.load(SeqCst))
    }

    fn set_last_waiter(&self, ptr: Ptr) {
        self.last_waiter.store(ptr.bits(), SeqCst);
    }

    #[track_caller]
    fn check_owned(&self) {
        assert!(
            self.sync.protocol().is_held_exclusively(self.sync.raw()),
            "condition used by a thread that does not hold its synchronizer exclusively",
        );
    }

    /// Releases the synchronizer and waits until signalled or
    /// interrupted.
    ///
    /// On return (either way) the synchronizer is held again with the
    /// same state as before the call.
    ///
    /// # Errors
    ///
    /// Returns [`Interrupted`] if the thread's interrupt flag was set on
    /// entry, or if it was interrupted before a signal began
    /// transferring it back to the main queue. An interrupt that lands
    /// *after* a signal is not an error; the wait completes normally and
    /// the flag is re-asserted for the caller to observe.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the synchronizer
    /// exclusively.
    pub fn wait(&self) -> Result<(), Interrupted> {
        if park::interrupted() {
            return Err(Interrupted::new());
        }
        let node = self.add_condition_waiter();
        let saved_state = self.fully_release(node);
        let mut interrupt_mode = InterruptMode::None;
        while !self.queue().is_on_sync_queue(node) {
            park::park();
            interrupt_mode = self.check_interrupt_while_waiting(node);
            if interrupt_mode != InterruptMode::None {
                break;
            }
        }
        self.finish_wait(node, saved_state, interrupt_mode)
    }

    /// Releases the synchronizer and waits until signalled, ignoring
    /// interrupts.
    ///
    /// If an interrupt was observed while waiting, the flag is
    /// re-asserted before returning.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the synchronizer
    /// exclusively.
    pub fn wait_uninterruptibly(&self) {
        let node = self.add_condition_waiter();
        let saved_state = self.fully_release(node);
        let mut interrupted = false;
        while !self.queue().is_on_sync_queue(node) {
            park::park();
            if park::interrupted() {
                interrupted = true;
            }
        }
        if self.sync.acquire_queued(node, saved_state) || interrupted {
            park::current().interrupt();
        }
        if !self.queue().slot(node).next_waiter().is_none() {
            self.unlink_cancelled_waiters();
        }
    }

    /// Releases the synchronizer and waits until signalled, interrupted,
    /// or `timeout` elapses.
    ///
    /// Returns the time remaining before the deadline (zero if the wait
    /// timed out), which can be used to re-wait for the balance.
    ///
    /// # Errors
    ///
    /// As [`wait`](Self::wait).
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the synchronizer
    /// exclusively.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<Duration, Interrupted> {
        if park::interrupted() {
            return Err(Interrupted::new());
        }
        let deadline = Instant::now().checked_add(timeout);
        let node = self.add_condition_waiter();
        let saved_state = self.fully_release(node);
        let mut interrupt_mode = InterruptMode::None;
        let mut spin = DeadlineSpin::new();
        while !self.queue().is_on_sync_queue(node) {
            let remaining = match deadline {
                Some(deadline) => deadline.saturating_duration_since(Instant::now()),
                None => Duration::MAX,
            };
            if remaining.is_zero() {
                // Same race as an interrupt: whoever flips the node off
                // `Condition` first decides whether this was a timeout
                // or a signal.
                self.transfer_after_cancelled_wait(node);
                break;
            }
            if remaining > SPIN_FOR_TIMEOUT_THRESHOLD {
                match deadline {
                    Some(deadline) => park::park_deadline(deadline),
                    None => park::park(),
                }
            } else {
                spin.spin();
            }
            interrupt_mode = self.check_interrupt_while_waiting(node);
            if interrupt_mode != InterruptMode::None {
                break;
            }
        }
        let remaining = move || match deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => Duration::MAX,
        };
        self.finish_wait(node, saved_state, interrupt_mode)
            .map(|()| remaining())
    }

    /// Releases the synchronizer and waits until signalled, interrupted,
    /// or `deadline` passes.
    ///
    /// Returns `true` if the wait was signalled before the deadline, and
    /// `false` if it timed out.
    ///
    /// # Errors
    ///
    /// As [`wait`](Self::wait).
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the synchronizer
    /// exclusively.
    pub fn wait_deadline(&self, deadline: Instant) -> Result<bool, Interrupted> {
        if park::interrupted() {
            return Err(Interrupted::new());
        }
        let node = self.add_condition_waiter();
        let saved_state = self.fully_release(node);
        let mut interrupt_mode = InterruptMode::None;
        let mut timed_out = false;
        while !self.queue().is_on_sync_queue(node) {
            if Instant::now() >= deadline {
                timed_out = self.transfer_after_cancelled_wait(node);
                break;
            }
            park::park_deadline(deadline);
            interrupt_mode = self.check_interrupt_while_waiting(node);
            if interrupt_mode != InterruptMode::None {
                break;
            }
        }
        self.finish_wait(node, saved_state, interrupt_mode)
            .map(|()| !timed_out)
    }

    /// Wakes the longest-waiting waiter, transferring its node from this
    /// condition's queue to the main wait queue.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the synchronizer
    /// exclusively.
    pub fn signal(&self) {
        self.check_owned();
        let first = self.first_waiter();
        if !first.is_none() {
            self.do_signal(first);
        }
    }

    /// Wakes every waiter, transferring the entire condition queue to
    /// the main wait queue.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the synchronizer
    /// exclusively.
    pub fn signal_all(&self) {
        self.check_owned();
        let first = self.first_waiter();
        if !first.is_none() {
            self.do_signal_all(first);
        }
    }

    /// Are any threads waiting on this condition?
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the synchronizer
    /// exclusively.
    #[must_use]
    pub fn has_waiters(&self) -> bool {
        self.check_owned();
        let mut cursor = self.first_waiter();
        while !cursor.is_none() {
            if self.queue().status(cursor) == Some(WaitStatus::Condition) {
                return true;
            }
            let Some(node) = self.queue().node(cursor) else {
                break;
            };
            cursor = node.next_waiter();
        }
        false
    }

    /// An estimate of the number of threads waiting on this condition.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the synchronizer
    /// exclusively.
    #[must_use]
    pub fn wait_queue_len(&self) -> usize {
        self.check_owned();
        let mut len = 0;
        let mut cursor = self.first_waiter();
        while !cursor.is_none() {
            if self.queue().status(cursor) == Some(WaitStatus::Condition) {
                len += 1;
            }
            let Some(node) = self.queue().node(cursor) else {
                break;
            };
            cursor = node.next_waiter();
        }
        len
    }

    /// Tokens of the threads waiting on this condition.
    ///
    /// # Panics
    ///
    /// Panics if the calling thread does not hold the synchronizer
    /// exclusively.
    #[must_use]
    pub fn waiting_threads(&self) -> Vec<crate::park::Thread> {
        self.check_owned();
        let mut threads = Vec::new();
        let mut cursor = self.first_waiter();
        while !cursor.is_none() {
            let Some(node) = self.queue().node(cursor) else {
                break;
            };
            if self.queue().status(cursor) == Some(WaitStatus::Condition) {
                if let Some(thread) = node.thread() {
                    threads.push(thread);
                }
            }
            cursor = node.next_waiter();
        }
        threads
    }

    /// Common tail of every wait flavor: re-acquire with the saved
    /// state, clean up stale condition links, and report interruption.
    fn finish_wait(
        &self,
        node: Ptr,
        saved_state: i32,
        mut interrupt_mode: InterruptMode,
    ) -> Result<(), Interrupted> {
        if self.sync.acquire_queued(node, saved_state) && interrupt_mode != InterruptMode::Throw {
            interrupt_mode = InterruptMode::Reinterrupt;
        }
        if !self.queue().slot(node).next_waiter().is_none() {
            self.unlink_cancelled_waiters();
        }
        match interrupt_mode {
            InterruptMode::Throw => Err(Interrupted::new()),
            InterruptMode::Reinterrupt => {
                park::current().interrupt();
                Ok(())
            }
            InterruptMode::None => Ok(()),
        }
    }

    /// Appends a fresh `Condition`-status node for the calling thread,
    /// pruning cancelled entries off the tail first if there are any.
    fn add_condition_waiter(&self) -> Ptr {
        let queue = self.queue();
        let mut last = self.last_waiter();
        if !last.is_none() && queue.status(last) != Some(WaitStatus::Condition) {
            self.unlink_cancelled_waiters();
            last = self.last_waiter();
        }
        let node = queue.alloc_condition_node();
        if last.is_none() {
            self.set_first_waiter(node);
        } else {
            queue.slot(last).set_next_waiter(node);
        }
        self.set_last_waiter(node);
        node
    }

    /// Releases the *entire* current state, so a reentrant holder's
    /// every hold is dropped by one wait.
    ///
    /// # Panics
    ///
    /// Panics (after marking the node cancelled, so it is pruned rather
    /// than signalled) if the release fails, which means the caller did
    /// not actually hold the synchronizer.
    fn fully_release(&self, node: Ptr) -> i32 {
        struct MarkCancelled<'q> {
            queue: &'q SyncQueue,
            node: Ptr,
            armed: bool,
        }
        impl Drop for MarkCancelled<'_> {
            fn drop(&mut self) {
                if self.armed {
                    let slot = self.queue.slot(self.node);
                    slot.set_status(self.node.generation(), WaitStatus::Cancelled);
                }
            }
        }

        let mut guard = MarkCancelled {
            queue: self.queue(),
            node,
            armed: true,
        };
        let saved_state = self.sync.raw().state();
        assert!(
            self.sync.release(saved_state),
            "waited on a condition without holding its synchronizer exclusively",
        );
        guard.armed = false;
        saved_state
    }

    fn check_interrupt_while_waiting(&self, node: Ptr) -> InterruptMode {
        if park::interrupted() {
            if self.transfer_after_cancelled_wait(node) {
                InterruptMode::Throw
            } else {
                InterruptMode::Reinterrupt
            }
        } else {
            InterruptMode::None
        }
    }

    /// Claims the node for a cancelled (interrupted or timed-out) wait.
    ///
    /// Returns `true` if the cancellation won the race with any signal
    /// (this thread then enqueues the node itself), and `false` if a
    /// signal got there first, in which case we merely wait out the
    /// signaller's enqueue. The busy wait is bounded: the signaller
    /// holds the synchronizer and finishes the transfer without
    /// blocking.
    fn transfer_after_cancelled_wait(&self, node: Ptr) -> bool {
        let queue = self.queue();
        if queue.cas_status(node, WaitStatus::Condition, WaitStatus::Normal) {
            queue.enqueue(node);
            return true;
        }
        while !queue.is_on_sync_queue(node) {
            crate::loom::yield_now();
        }
        false
    }

    fn do_signal(&self, mut first: Ptr) {
        let queue = self.queue();
        loop {
            let Some(node) = queue.node(first) else {
                // A dead entry means the list was abandoned mid-cleanup
                // (a waiter's re-acquire panicked); drop what's left.
                self.set_first_waiter(Ptr::NONE);
                self.set_last_waiter(Ptr::NONE);
                return;
            };
            let next = node.next_waiter();
            self.set_first_waiter(next);
            if next.is_none() {
                self.set_last_waiter(Ptr::NONE);
            }
            node.set_next_waiter(Ptr::NONE);
            if self.transfer_for_signal(first) {
                return;
            }
            first = self.first_waiter();
            if first.is_none() {
                return;
            }
        }
    }

    fn do_signal_all(&self, mut first: Ptr) {
        let queue = self.queue();
        self.set_first_waiter(Ptr::NONE);
        self.set_last_waiter(Ptr::NONE);
        loop {
            let Some(node) = queue.node(first) else {
                return;
            };
            let next = node.next_waiter();
            node.set_next_waiter(Ptr::NONE);
            self.transfer_for_signal(first);
            if next.is_none() {
                return;
            }
            first = next;
        }
    }

    /// Moves a condition waiter onto the main queue.
    ///
    /// Returns `false` if the node's wait was already cancelled (the
    /// caller then tries the next waiter). After enqueueing, tries to
    /// leave the signal promise on the node's new predecessor; if the
    /// predecessor refuses (cancelled, recycled, or racing), unparks the
    /// waiter directly so it can resynchronize on its own.
    fn transfer_for_signal(&self, node: Ptr) -> bool {
        let queue = self.queue();
        if !queue.cas_status(node, WaitStatus::Condition, WaitStatus::Normal) {
            return false;
        }
        probe!(?node, "transfer_for_signal");
        let pred = queue.enqueue(node);
        let handed_off = match queue.status(pred) {
            Some(WaitStatus::Cancelled) | None => false,
            Some(status) => queue.cas_status(pred, status, WaitStatus::Signal),
        };
        if !handed_off {
            if let Some(n) = queue.node(node) {
                if let Some(thread) = n.thread() {
                    thread.unpark();
                }
            }
        }
        true
    }

    /// Prunes every non-`Condition` node out of the condition list.
    ///
    /// Called only while holding the synchronizer, and only when a wait
    /// ended with a stale link or a new waiter found a cancelled tail.
    /// Nodes that were cancelled *before ever reaching the main queue*
    /// (a failed `fully_release`; their `prev` was never written) are
    /// retired here, since nothing else will ever see them again. Nodes
    /// that left for the main queue are that queue's to reclaim.
    fn unlink_cancelled_waiters(&self) {
        let queue = self.queue();
        let mut cursor = self.first_waiter();
        let mut trail = Ptr::NONE;
        while !cursor.is_none() {
            let Some(cursor_node) = queue.node(cursor) else {
                // Dead entry (see `do_signal`): truncate the list here.
                if trail.is_none() {
                    self.set_first_waiter(Ptr::NONE);
                } else {
                    queue.slot(trail).set_next_waiter(Ptr::NONE);
                }
                self.set_last_waiter(trail);
                return;
            };
            let next = cursor_node.next_waiter();
            if queue.status(cursor) == Some(WaitStatus::Condition) {
                trail = cursor;
            } else {
                cursor_node.set_next_waiter(Ptr::NONE);
                if trail.is_none() {
                    self.set_first_waiter(next);
                } else {
                    queue.slot(trail).set_next_waiter(next);
                }
                if next.is_none() {
                    self.set_last_waiter(trail);
                }
                if queue.status(cursor) == Some(WaitStatus::Cancelled)
                    && cursor_node.prev().is_none()
                {
                    queue.retire_condition_node(cursor);
                }
            }
            cursor = next;
        }
    }
}

impl<P> fmt::Debug for Condition<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Condition")
            .field("first_waiter", &Ptr::from_bits(self.first_waiter.load(Relaxed)))
            .field("last_waiter", &Ptr::from_bits(self.last_waiter.load(Relaxed)))
            .finish()
    }
}
