//! The main wait queue: a CLH-style doubly-linked list of parked waiters.
//!
//! The queue is lock-free on the enqueue and release paths. The `tail`
//! word advances by CAS; `head` is only ever replaced by a thread that has
//! just been granted acquisition. A node's `prev` link is published
//! *before* the CAS that makes the node the new tail, so walking backward
//! from `tail` always sees a complete chain; `next` links are written
//! after publication and are only ever a hint, so every consumer of
//! `next` falls back to the backward scan.
//!
//! # Reclamation invariants
//!
//! Nodes live in a generational [`Arena`], which never deallocates slot
//! memory while the queue exists; a stale link is therefore always safe
//! to chase and always detectable (the generation check fails). Slot
//! *reuse* follows three rules, each of which is load-bearing:
//!
//! 1. **A dequeued head is freed immediately** by the thread that
//!    replaced it ([`SyncQueue::dequeue_old_head`]). This is sound
//!    because only the first non-cancelled waiter in the queue can
//!    acquire and advance the head: while any waiter is still linked,
//!    the `prev` chain from that waiter toward the head passes only
//!    through cancelled nodes (never freed while the queue is occupied,
//!    rule 2) and the current head. A freed slot encountered on a
//!    backward walk can only mean the walk crossed into territory behind
//!    the current head, so scans treat a dead edge as "reached the
//!    head" and stop.
//!
//! 2. **A cancelled node is retired, not freed.** Cancellation unlinks
//!    lazily; a parked waiter may hold a `prev` link to a cancelled node
//!    for arbitrarily long, and the backward scan must be able to walk
//!    *through* cancelled nodes. Retired slots keep their generation and
//!    contents until [`SyncQueue::reclaim_if_quiet`] observes the queue
//!    empty (`head == tail`, or never initialized); with no waiters
//!    linked, no stored `prev` link can name a retired slot. (A stale
//!    `next` hint on the old head may, which is fine: hints are
//!    revalidated and the scan is authoritative.)
//!
//! 3. **A condition-queue node that never reached this queue** is the
//!    condition list's problem; it is retired at unlink time, under the
//!    exclusive hold that guards all condition-list mutation.
//!
//! One consequence of generations: any CAS that must not land on a
//! recycled slot is fused with the generation. For the status word this
//! matters for correctness (clearing a `Signal` promise on the wrong
//! node would lose a wakeup), so status and generation share one atomic
//! word ([`Node::meta`]). Link words are hints or owner-written, and a
//! CAS that lands on a recycled slot can at worst plant a stale hint,
//! which decays into a spurious unpark.

use crate::{
    arena::{Arena, Ptr, Slot},
    loom::sync::atomic::{AtomicU64, Ordering::*},
    park::{self, Thread},
};
use core::fmt;


/// A waiter's status, stored in the low byte of the node's meta word.
///
/// `Signal` is a promise by the node to unpark its successor when it
/// releases or cancels. `Propagate` appears only on the head, only in
/// shared mode, and exists to keep a release visible across the
/// head-replacement race (see the shared acquisition engine). Variants
/// are declared in ascending numeric order so that derived comparisons
/// match the sign conventions the protocol is written in
/// (`status < Normal` means "waiting or propagating").
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
#[repr(i8)]
pub(crate) enum WaitStatus {
    /// A shared release occurred here and must keep propagating.
    Propagate = -3,
    /// The node waits on a condition queue, not the main queue.
    Condition = -2,
    /// This node will unpark its successor on release or cancellation.
    Signal = -1,
    /// Initial state; nothing promised.
    Normal = 0,
    /// The waiter gave up. Terminal.
    Cancelled = 1,
}

impl WaitStatus {
    fn from_raw(raw: u8) -> Self {
        match raw as i8 {
            0 => Self::Normal,
            -1 => Self::Signal,
            1 => Self::Cancelled,
            -2 => Self::Condition,
            -3 => Self::Propagate,
            bits => unreachable!("invalid wait status ({bits})"),
        }
    }

    fn raw(self) -> u8 {
        self as i8 as u8
    }
}

fn pack_meta(generation: u32, status: WaitStatus) -> u64 {
    ((generation as u64) << 32) | status.raw() as u64
}

const fn meta_generation(bits: u64) -> u32 {
    (bits >> 32) as u32
}

fn meta_status(bits: u64) -> WaitStatus {
    WaitStatus::from_raw(bits as u8)
}

/// One waiter record.
///
/// Every field is a single atomic word: slots are recycled in place, so a
/// reader with a stale handle may race a reset, and the worst that may
/// come of it is a stale value, never a torn one.
pub(crate) struct Node {
    /// Fused `(generation, status)`.
    meta: AtomicU64,
    /// Predecessor in the main queue. Authoritative. Written by the
    /// owning thread (at enqueue, and when relinking past cancelled
    /// predecessors), read by everyone.
    prev: AtomicU64,
    /// Successor hint. May lag reality or dangle; never trusted without
    /// revalidation.
    next: AtomicU64,
    /// On the main queue: the acquisition-mode marker ([`Ptr::NONE`] for
    /// exclusive, [`Ptr::SHARED`] for shared). On a condition queue: the
    /// next condition waiter.
    next_waiter: AtomicU64,
    /// The parked waiter's token; [`Ptr::NONE`] on the dummy head and
    /// after dequeue.
    thread: AtomicU64,
}

// === impl Node ===

impl Node {
    pub(crate) fn prev(&self) -> Ptr {
        Ptr::from_bits(self.prev.load(SeqCst))
    }

    pub(crate) fn set_prev(&self, ptr: Ptr) {
        self.prev.store(ptr.bits(), SeqCst);
    }

    pub(crate) fn next(&self) -> Ptr {
        Ptr::from_bits(self.next.load(SeqCst))
    }

    pub(crate) fn set_next(&self, ptr: Ptr) {
        self.next.store(ptr.bits(), SeqCst);
    }

    pub(crate) fn cas_next(&self, old: Ptr, new: Ptr) -> bool {
        self.next
            .compare_exchange(old.bits(), new.bits(), SeqCst, SeqCst)
            .is_ok()
    }

    pub(crate) fn next_waiter(&self) -> Ptr {
        Ptr::from_bits(self.next_waiter.load(SeqCst))
    }

    pub(crate) fn set_next_waiter(&self, ptr: Ptr) {
        self.next_waiter.store(ptr.bits(), SeqCst);
    }

    pub(crate) fn is_shared(&self) -> bool {
        self.next_waiter().is_shared()
    }

    pub(crate) fn thread(&self) -> Option<Thread> {
        let bits = self.thread.load(SeqCst);
        let ptr = Ptr::from_bits(bits);
        if ptr.is_none() {
            None
        } else {
            Some(Thread::from_ptr(ptr))
        }
    }

    pub(crate) fn set_thread(&self, thread: Option<Thread>) {
        let bits = match thread {
            Some(thread) => thread.ptr().bits(),
            None => Ptr::NONE.bits(),
        };
        self.thread.store(bits, SeqCst);
    }

    /// Unconditionally sets the status, preserving the generation.
    ///
    /// Only the node's owner may use this (enqueue initialization and the
    /// terminal `Cancelled` store); everyone else must CAS.
    pub(crate) fn set_status(&self, generation: u32, status: WaitStatus) {
        self.meta.store(pack_meta(generation, status), SeqCst);
    }

    /// Generation-fused status CAS: fails if the slot has been recycled.
    pub(crate) fn cas_status(&self, generation: u32, old: WaitStatus, new: WaitStatus) -> bool {
        self.meta
            .compare_exchange(
                pack_meta(generation, old),
                pack_meta(generation, new),
                SeqCst,
                SeqCst,
            )
            .is_ok()
    }
}

impl Default for Node {
    fn default() -> Self {
        Self {
            meta: AtomicU64::new(0),
            prev: AtomicU64::new(Ptr::NONE.bits()),
            next: AtomicU64::new(Ptr::NONE.bits()),
            next_waiter: AtomicU64::new(Ptr::NONE.bits()),
            thread: AtomicU64::new(Ptr::NONE.bits()),
        }
    }
}

impl Slot for Node {
    fn generation(&self) -> u32 {
        meta_generation(self.meta.load(Acquire))
    }

    fn invalidate(&self) {
        // Bump the generation first so stale handles die before the link
        // words are recycled out from under them.
        let mut bits = self.meta.load(SeqCst);
        loop {
            let next = pack_meta(meta_generation(bits).wrapping_add(1), WaitStatus::Normal);
            match self.meta.compare_exchange(bits, next, SeqCst, SeqCst) {
                Ok(_) => break,
                Err(actual) => bits = actual,
            }
        }
        self.prev.store(Ptr::NONE.bits(), SeqCst);
        self.next.store(Ptr::NONE.bits(), SeqCst);
        self.next_waiter.store(Ptr::NONE.bits(), SeqCst);
        self.thread.store(Ptr::NONE.bits(), SeqCst);
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let meta = self.meta.load(Relaxed);
        f.debug_struct("Node")
            .field("generation", &meta_generation(meta))
            .field("status", &meta_status(meta))
            .field("prev", &Ptr::from_bits(self.prev.load(Relaxed)))
            .field("next", &Ptr::from_bits(self.next.load(Relaxed)))
            .field("next_waiter", &Ptr::from_bits(self.next_waiter.load(Relaxed)))
            .finish()
    }
}

/// The queue itself: `head`/`tail` words plus the node arena.
pub(crate) struct SyncQueue {
    head: AtomicU64,
    tail: AtomicU64,
    nodes: Arena<Node>,
}

// === impl SyncQueue ===

impl SyncQueue {
    loom_const_fn! {
        pub(crate) fn new() -> Self {
            Self {
                head: AtomicU64::new(Ptr::NONE.bits()),
                tail: AtomicU64::new(Ptr::NONE.bits()),
                nodes: Arena::new(),
            }
        }
    }

    pub(crate) fn head(&self) -> Ptr {
        Ptr::from_bits(self.head.load(SeqCst))
    }

    pub(crate) fn tail(&self) -> Ptr {
        Ptr::from_bits(self.tail.load(SeqCst))
    }

    fn cas_head(&self, old: Ptr, new: Ptr) -> bool {
        self.head
            .compare_exchange(old.bits(), new.bits(), SeqCst, SeqCst)
            .is_ok()
    }

    fn cas_tail(&self, old: Ptr, new: Ptr) -> bool {
        self.tail
            .compare_exchange(old.bits(), new.bits(), SeqCst, SeqCst)
            .is_ok()
    }

    /// Generation-checked node access for fields other than status.
    pub(crate) fn node(&self, ptr: Ptr) -> Option<&Node> {
        self.nodes.get(ptr)
    }

    /// Unchecked node access, for a node the caller owns (its own waiter
    /// record, which cannot be recycled out from under it).
    pub(crate) fn slot(&self, ptr: Ptr) -> &Node {
        self.nodes.slot(ptr)
    }

    /// The node's status, or [`None`] if the slot has been recycled.
    /// One load: the status and the generation that validates it come
    /// from the same word.
    pub(crate) fn status(&self, ptr: Ptr) -> Option<WaitStatus> {
        if ptr.is_sentinel() {
            return None;
        }
        let bits = self.nodes.slot(ptr).meta.load(SeqCst);
        (meta_generation(bits) == ptr.generation()).then(|| meta_status(bits))
    }

    pub(crate) fn cas_status(&self, ptr: Ptr, old: WaitStatus, new: WaitStatus) -> bool {
        self.nodes.slot(ptr).cas_status(ptr.generation(), old, new)
    }

    /// Allocates and enqueues a node for the calling thread. `mode` is
    /// [`Ptr::NONE`] for exclusive waiters or [`Ptr::SHARED`] for shared
    /// ones.
    pub(crate) fn add_waiter(&self, mode: Ptr) -> Ptr {
        let (ptr, node) = self.nodes.alloc();
        node.set_thread(Some(park::current()));
        node.set_next_waiter(mode);
        test_probe!(?ptr, ?mode, "add_waiter");

        // Fast path: one shot at appending directly to a known tail.
        let tail = self.tail();
        if !tail.is_none() {
            node.set_prev(tail);
            if self.cas_tail(tail, ptr) {
                if let Some(t) = self.node(tail) {
                    t.set_next(ptr);
                }
                return ptr;
            }
        }
        self.enqueue(ptr);
        ptr
    }

    /// Allocates a node for the calling thread destined for a condition
    /// queue; the caller links it.
    pub(crate) fn alloc_condition_node(&self) -> Ptr {
        let (ptr, node) = self.nodes.alloc();
        node.set_thread(Some(park::current()));
        node.set_status(ptr.generation(), WaitStatus::Condition);
        ptr
    }

    /// Appends `ptr` to the queue, initializing the dummy head if the
    /// queue has never been contended. Returns the node's predecessor.
    ///
    /// `prev` is published before the tail CAS; `next` after. Observers
    /// arriving through `tail` can always walk backward, and a `next`
    /// that still reads as absent merely sends them there.
    pub(crate) fn enqueue(&self, ptr: Ptr) -> Ptr {
        let node = self.nodes.slot(ptr);
        loop {
            let tail = self.tail();
            if tail.is_none() {
                // First contention: install the dummy head.
                let (dummy, _) = self.nodes.alloc();
                if self.cas_head(Ptr::NONE, dummy) {
                    self.tail.store(dummy.bits(), SeqCst);
                } else {
                    // Lost the race; the dummy was never published, so it
                    // can be recycled on the spot.
                    self.nodes.free(dummy);
                }
            } else {
                node.set_prev(tail);
                if self.cas_tail(tail, ptr) {
                    if let Some(t) = self.node(tail) {
                        t.set_next(ptr);
                    }
                    return tail;
                }
            }
        }
    }

    /// Installs `ptr` as the new head. Called only by the thread that
    /// just won acquisition with this node.
    pub(crate) fn set_head(&self, ptr: Ptr) {
        self.head.store(ptr.bits(), SeqCst);
        let node = self.nodes.slot(ptr);
        node.set_thread(None);
        node.set_prev(Ptr::NONE);
    }

    /// Unlinks and frees the old head after [`set_head`] replaced it
    /// (reclamation rule 1: only the acquiring thread gets here, and its
    /// own `prev` no longer names the slot).
    ///
    /// [`set_head`]: Self::set_head
    pub(crate) fn dequeue_old_head(&self, old: Ptr) {
        if let Some(node) = self.node(old) {
            node.set_next(Ptr::DETACHED);
        }
        self.nodes.free(old);
    }

    /// The park gate: decides whether a waiter that just failed
    /// `try_acquire` may park, repairing the queue as a side effect.
    ///
    /// - Predecessor already promised `Signal`: park.
    /// - Predecessor cancelled: relink past every cancelled predecessor
    ///   and retry without parking.
    /// - Otherwise: CAS the predecessor to `Signal` and retry without
    ///   parking; the retry re-checks that the predecessor did not
    ///   release in the meantime. A waiter never parks without a live
    ///   predecessor committed to waking it.
    pub(crate) fn should_park_after_failed_acquire(&self, pred: Ptr, ptr: Ptr) -> bool {
        let mut pred = pred;
        match self.status(pred) {
            Some(WaitStatus::Signal) => true,
            Some(WaitStatus::Cancelled) => {
                let node = self.nodes.slot(ptr);
                loop {
                    let Some(p) = self.node(pred) else {
                        // A freed slot on our prev chain is unreachable
                        // while we are linked (module docs); bail to the
                        // acquire loop rather than walk garbage.
                        debug_assert!(false, "freed predecessor on a live waiter's prev chain");
                        return false;
                    };
                    pred = p.prev();
                    node.set_prev(pred);
                    if self.status(pred) != Some(WaitStatus::Cancelled) {
                        break;
                    }
                }
                if let Some(p) = self.node(pred) {
                    p.set_next(ptr);
                }
                false
            }
            Some(status) => {
                // `Normal` or `Propagate` (a condition status cannot be a
                // main-queue predecessor's). Demand the signal promise,
                // then retry the acquire once more before parking.
                self.cas_status(pred, status, WaitStatus::Signal);
                false
            }
            None => {
                debug_assert!(false, "freed predecessor on a live waiter's prev chain");
                false
            }
        }
    }

    /// Unparks `ptr`'s successor: the `next` hint if it is live and not
    /// cancelled, otherwise the queue-order-first live waiter found by
    /// scanning backward from `tail`.
    ///
    /// The backward scan is required for correctness, not just hygiene:
    /// `next` may still be unset when a successor exists. A dead edge on
    /// the scan means the walk crossed behind the current head
    /// (reclamation rule 1) and terminates it.
    pub(crate) fn unpark_successor(&self, ptr: Ptr) {
        // Clear the signal promise if we can; failing is fine (the node
        // moved on or someone else is signalling too).
        if let Some(status) = self.status(ptr) {
            if status < WaitStatus::Normal {
                self.cas_status(ptr, status, WaitStatus::Normal);
            }
        }

        let mut succ = match self.node(ptr) {
            Some(node) => node.next(),
            None => Ptr::NONE,
        };
        let hint_usable = !succ.is_sentinel()
            && matches!(self.status(succ), Some(status) if status <= WaitStatus::Normal);
        if !hint_usable {
            succ = Ptr::NONE;
            let mut cursor = self.tail();
            while !cursor.is_sentinel() && cursor != ptr {
                match self.status(cursor) {
                    Some(status) => {
                        if status <= WaitStatus::Normal {
                            succ = cursor;
                        }
                        match self.node(cursor) {
                            Some(node) => cursor = node.prev(),
                            None => break,
                        }
                    }
                    // Dead edge: past the head, nothing further to find.
                    None => break,
                }
            }
        }

        if !succ.is_sentinel() {
            if let Some(node) = self.node(succ) {
                if let Some(thread) = node.thread() {
                    test_probe!(?succ, ?thread, "unpark_successor");
                    thread.unpark();
                }
            }
        }
    }

    /// Abandons the wait: marks the node cancelled, unlinks what can be
    /// unlinked cheaply, and leaves the rest for neighbors to clean up
    /// lazily.
    pub(crate) fn cancel_acquire(&self, ptr: Ptr) {
        let Some(node) = self.node(ptr) else {
            return;
        };
        probe!(?ptr, "cancel_acquire");
        node.set_thread(None);

        // Skip over cancelled predecessors. None of these slots can have
        // been recycled while we are still linked and not yet cancelled
        // (module docs, rules 1 and 2).
        let mut pred = node.prev();
        while self.status(pred) == Some(WaitStatus::Cancelled) {
            let Some(p) = self.node(pred) else {
                debug_assert!(false, "freed predecessor on a live waiter's prev chain");
                break;
            };
            pred = p.prev();
            node.set_prev(pred);
        }

        // The splice CASes below use this as their expected value; if it
        // is stale they simply fail and someone else has already cleaned
        // up.
        let pred_next = match self.node(pred) {
            Some(p) => p.next(),
            None => Ptr::NONE,
        };

        // Terminal. After this store no thread will wait on us, and our
        // status never changes again.
        node.set_status(ptr.generation(), WaitStatus::Cancelled);

        if ptr == self.tail() && self.cas_tail(ptr, pred) {
            // We were the tail: retreat it and drop the stale hint.
            if let Some(p) = self.node(pred) {
                p.cas_next(pred_next, Ptr::NONE);
            }
        } else {
            // If the predecessor is an interior node committed to
            // signalling, splice our successor onto it directly;
            // otherwise wake the successor so it can find its new
            // predecessor itself.
            let mut spliced = false;
            if pred != self.head() {
                let signalling = match self.status(pred) {
                    Some(WaitStatus::Signal) => true,
                    Some(status) if status <= WaitStatus::Normal => {
                        self.cas_status(pred, status, WaitStatus::Signal)
                    }
                    _ => false,
                };
                let pred_live = self
                    .node(pred)
                    .map(|p| p.thread().is_some())
                    .unwrap_or(false);
                if signalling && pred_live {
                    let next = node.next();
                    if !next.is_sentinel()
                        && matches!(self.status(next), Some(status) if status <= WaitStatus::Normal)
                    {
                        if let Some(p) = self.node(pred) {
                            p.cas_next(pred_next, next);
                        }
                    }
                    spliced = true;
                }
            }
            if !spliced {
                self.unpark_successor(ptr);
            }
            node.set_next(Ptr::DETACHED);
        }

        // Slot reuse waits until the queue drains (rule 2).
        self.nodes.retire(ptr);
        self.reclaim_if_quiet();
    }

    /// Retires a node that only ever lived on a condition queue
    /// (rule 3). The caller holds the synchronizer exclusively and has
    /// already unlinked it.
    pub(crate) fn retire_condition_node(&self, ptr: Ptr) {
        self.nodes.retire(ptr);
    }

    /// Recycles retired slots if the queue is observed empty. Called
    /// from release paths and after cancellation, so a cancellation
    /// storm on an otherwise idle synchronizer reclaims promptly.
    pub(crate) fn reclaim_if_quiet(&self) {
        let head = self.head();
        if head.is_none() || head == self.tail() {
            self.nodes.drain_retired();
        }
    }

    /// Is this node on the main queue? (Used by condition waits to
    /// detect that a signal has transferred them.)
    pub(crate) fn is_on_sync_queue(&self, ptr: Ptr) -> bool {
        if self.status(ptr) == Some(WaitStatus::Condition) {
            return false;
        }
        let node = self.nodes.slot(ptr);
        if node.prev().is_none() {
            return false;
        }
        // A set `next` (including the detached sentinel) can only mean
        // main-queue linkage happened. An unset one proves nothing; the
        // node may be mid-enqueue, so search from the tail; it will be
        // near it if it is there at all.
        if !node.next().is_none() {
            return true;
        }
        self.find_node_from_tail(ptr)
    }

    fn find_node_from_tail(&self, ptr: Ptr) -> bool {
        let mut cursor = self.tail();
        loop {
            if cursor == ptr {
                return true;
            }
            if cursor.is_sentinel() {
                return false;
            }
            match self.node(cursor) {
                Some(node) => cursor = node.prev(),
                None => return false,
            }
        }
    }

    // === inspection; all best-effort snapshots ===

    pub(crate) fn has_queued_threads(&self) -> bool {
        self.head() != self.tail()
    }

    pub(crate) fn has_contended(&self) -> bool {
        !self.head().is_none()
    }

    pub(crate) fn first_queued_thread(&self) -> Option<Thread> {
        // The hint is usually right; give it two chances before paying
        // for the scan.
        for _ in 0..2 {
            let head = self.head();
            if head.is_sentinel() {
                return None;
            }
            let Some(h) = self.node(head) else { continue };
            let succ = h.next();
            if succ.is_sentinel() {
                break;
            }
            let Some(s) = self.node(succ) else { continue };
            if s.prev() == head {
                if let Some(thread) = s.thread() {
                    return Some(thread);
                }
            }
        }

        // The hint lost a race; the scan keeps the last (head-most)
        // thread it saw.
        let head = self.head();
        let mut first = None;
        let mut cursor = self.tail();
        while !cursor.is_sentinel() && cursor != head {
            let Some(node) = self.node(cursor) else { break };
            if let Some(thread) = node.thread() {
                first = Some(thread);
            }
            cursor = node.prev();
        }
        first
    }

    pub(crate) fn is_queued(&self, thread: Thread) -> bool {
        self.scan(|node| node.thread() == Some(thread)).is_some()
    }

    pub(crate) fn queue_len(&self) -> usize {
        let mut len = 0;
        self.scan(|node| {
            if node.thread().is_some() {
                len += 1;
            }
            false
        });
        len
    }

    pub(crate) fn queued_threads(&self) -> Vec<Thread> {
        self.collect_threads(|_| true)
    }

    pub(crate) fn exclusive_queued_threads(&self) -> Vec<Thread> {
        self.collect_threads(|node| !node.is_shared())
    }

    pub(crate) fn shared_queued_threads(&self) -> Vec<Thread> {
        self.collect_threads(|node| node.is_shared())
    }

    fn collect_threads(&self, mut keep: impl FnMut(&Node) -> bool) -> Vec<Thread> {
        let mut threads = Vec::new();
        self.scan(|node| {
            if keep(node) {
                if let Some(thread) = node.thread() {
                    threads.push(thread);
                }
            }
            false
        });
        threads
    }

    /// Walks the queue backward from `tail`, stopping early if `visit`
    /// returns `true`; returns the node it stopped on.
    fn scan(&self, mut visit: impl FnMut(&Node) -> bool) -> Option<Ptr> {
        let mut cursor = self.tail();
        while !cursor.is_sentinel() {
            let Some(node) = self.node(cursor) else { break };
            if visit(node) {
                return Some(cursor);
            }
            cursor = node.prev();
        }
        None
    }

    /// The fair-acquisition gate: is some other thread queued ahead of
    /// the caller?
    ///
    /// `tail` is read before `head`: the queue is initialized head
    /// first, so a non-sentinel tail guarantees the head read that
    /// follows observes an initialized queue.
    pub(crate) fn has_queued_predecessors(&self) -> bool {
        let tail = self.tail();
        let head = self.head();
        if head == tail {
            return false;
        }
        let Some(h) = self.node(head) else {
            // Head replaced (or mid-initialization) under us; report
            // contention and let the caller re-run the gate.
            return true;
        };
        let succ = h.next();
        if succ.is_sentinel() {
            return true;
        }
        match self.node(succ).and_then(Node::thread) {
            Some(thread) => thread != park::current(),
            None => true,
        }
    }
}

impl fmt::Debug for SyncQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncQueue")
            .field("head", &self.head())
            .field("tail", &self.tail())
            .finish_non_exhaustive()
    }
}
