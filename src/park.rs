//! The blocking primitive: a per-thread permit with interruption.
//!
//! Every thread that touches a synchronizer owns a *parker*: a counting
//! permit that saturates at one, plus an interrupt flag. [`park`] blocks
//! the calling thread until a permit is available (consuming it), until
//! the thread is [interrupted](Thread::interrupt), or spuriously;
//! [`Thread::unpark`] makes a permit available (two unparks are
//! indistinguishable from one). Because a permit may be delivered *before*
//! the park, the primitive is usable in the classic
//! check-condition-then-park loops the acquisition engine is built from,
//! with no window for a lost wakeup.
//!
//! Interruption is cooperative and crate-supplied (OS threads have no
//! such notion): [`Thread::interrupt`] sets the flag and wakes the thread
//! if it is parked, [`park`] returns early while the flag is set, and
//! [`interrupted`] polls-and-clears the current thread's flag. The
//! acquisition loops poll after every park return.
//!
//! # Tokens
//!
//! A [`Thread`] is a small `Copy` token naming a slot in a global parker
//! registry (an [`Arena`] keyed by generation). Tokens are valid for the
//! lifetime of their thread; a token that outlives its thread goes inert:
//! the generation check turns `unpark`/`interrupt` into no-ops once the
//! slot has been recycled. The worst a racing stale token can do is
//! deliver a spurious permit to the slot's next owner, which every park
//! site already tolerates.
//!
//! # Blocking
//!
//! The slow path is the classic mutex+condvar parker: the parker
//! publishes its `PARKED` state while holding the slot's mutex and then
//! waits on the condvar, and a waker that observes `PARKED` locks and
//! unlocks that mutex before notifying, so the notification cannot fall
//! into the gap between the parker's publish and its wait.

use crate::{
    arena::{Arena, Ptr, Slot},
    loom::{
        lock_ignore_poison,
        sync::{
            atomic::{AtomicU64, Ordering::*},
            Condvar, Mutex,
        },
    },
};
use core::fmt;
use std::time::{Duration, Instant};

#[cfg(test)]
mod tests;

/// A token naming a live (or once-live) thread.
///
/// Obtained from [`current`]. Tokens are freely copyable and remain safe
/// to use after their thread exits; they simply stop doing anything.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct Thread(Ptr);

/// One registry slot: the fused state word, and the mutex/condvar pair
/// the slow path sleeps on.
///
/// State word layout: bits 0..2 are the permit state, bit 2 is the
/// interrupt flag, bits 32..64 are the slot generation. Fusing the
/// generation into the word makes every state transition validate the
/// token in the same CAS.
struct ParkSlot {
    state: AtomicU64,
    lock: Mutex<()>,
    cond: Condvar,
}

/// No permit, no parked thread.
const EMPTY: u64 = 0b000;
/// The owning thread is blocked (or about to block) in [`park`].
const PARKED: u64 = 0b001;
/// A permit is available.
const NOTIFIED: u64 = 0b010;

const STATE_MASK: u64 = 0b011;
const INTERRUPTED: u64 = 0b100;
const GEN_SHIFT: u32 = 32;

const fn gen_of(bits: u64) -> u32 {
    (bits >> GEN_SHIFT) as u32
}

const fn with_state(bits: u64, state: u64) -> u64 {
    (bits & !STATE_MASK) | state
}

struct Registry {
    slots: Arena<ParkSlot>,
}

#[cfg(not(loom))]
static REGISTRY: Registry = Registry {
    slots: Arena::new(),
};

#[cfg(not(loom))]
fn registry() -> &'static Registry {
    &REGISTRY
}

#[cfg(loom)]
loom::lazy_static! {
    static ref REGISTRY: Registry = Registry {
        slots: Arena::new(),
    };
}

#[cfg(loom)]
fn registry() -> &'static Registry {
    &REGISTRY
}

/// The calling thread's registration, living in a thread-local so the
/// slot is claimed on first use and retired when the thread exits.
struct Registration(Thread);

impl Registration {
    fn new() -> Self {
        let (ptr, _) = registry().slots.alloc();
        probe!(?ptr, "registered parker");
        Self(Thread(ptr))
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        // Invalidates the slot, turning any token still naming it inert,
        // and recycles it for a future thread.
        registry().slots.free(self.0 .0);
    }
}

#[cfg(not(loom))]
std::thread_local! {
    static CURRENT: Registration = Registration::new();
}

#[cfg(loom)]
loom::thread_local! {
    static CURRENT: Registration = Registration::new();
}

/// Returns the token for the calling thread.
pub fn current() -> Thread {
    CURRENT.with(|registration| registration.0)
}

/// Blocks the calling thread until a permit is available, the thread is
/// interrupted, or a spurious wakeup occurs.
///
/// If a permit is already available it is consumed and this returns
/// immediately. If the thread's interrupt flag is set, this returns
/// immediately *without* clearing the flag (poll it with
/// [`interrupted`]).
///
/// Callers must re-check their wait condition after every return; this
/// function makes no promise about *why* it returned.
pub fn park() {
    park_inner(None);
}

/// Like [`park`], but also returns once `deadline` has passed.
pub fn park_deadline(deadline: Instant) {
    park_inner(Some(deadline));
}

/// Like [`park`], but also returns once `timeout` has elapsed.
pub fn park_timeout(timeout: Duration) {
    park_inner(Instant::now().checked_add(timeout));
}

/// Polls and clears the calling thread's interrupt flag.
///
/// Mirrors the shape the acquisition loops need: observing an interrupt
/// consumes it, and the caller decides whether to surface it as an error
/// or re-assert it before returning.
pub fn interrupted() -> bool {
    let token = current();
    let slot = own_slot(token);
    let mut bits = slot.state.load(SeqCst);
    loop {
        if bits & INTERRUPTED == 0 {
            return false;
        }
        match slot
            .state
            .compare_exchange(bits, bits & !INTERRUPTED, SeqCst, SeqCst)
        {
            Ok(_) => return true,
            Err(actual) => bits = actual,
        }
    }
}

/// Looks up the calling thread's own slot, which cannot have been
/// recycled while the thread is alive to ask for it.
fn own_slot(token: Thread) -> &'static ParkSlot {
    match registry().slots.get(token.0) {
        Some(slot) => slot,
        None => unreachable!("a live thread's parker slot cannot be recycled"),
    }
}

fn park_inner(deadline: Option<Instant>) {
    let token = current();
    let slot = own_slot(token);

    // Fast path: consume a pending permit, or bail on a pending
    // interrupt, without touching the mutex.
    let mut bits = slot.state.load(SeqCst);
    loop {
        if bits & INTERRUPTED != 0 {
            return;
        }
        if bits & STATE_MASK != NOTIFIED {
            break;
        }
        match slot
            .state
            .compare_exchange(bits, with_state(bits, EMPTY), SeqCst, SeqCst)
        {
            Ok(_) => return,
            Err(actual) => bits = actual,
        }
    }

    let mut guard = lock_ignore_poison(&slot.lock);

    // Publish PARKED while holding the lock; a waker that sees PARKED
    // takes the lock before notifying, so it cannot slip in between this
    // store and the wait below.
    let mut bits = slot.state.load(SeqCst);
    loop {
        if bits & INTERRUPTED != 0 {
            return;
        }
        match bits & STATE_MASK {
            NOTIFIED => {
                match slot
                    .state
                    .compare_exchange(bits, with_state(bits, EMPTY), SeqCst, SeqCst)
                {
                    Ok(_) => return,
                    Err(actual) => bits = actual,
                }
            }
            EMPTY => {
                match slot
                    .state
                    .compare_exchange(bits, with_state(bits, PARKED), SeqCst, SeqCst)
                {
                    Ok(_) => break,
                    Err(actual) => bits = actual,
                }
            }
            _ => unreachable!("only the owning thread parks on a slot"),
        }
    }

    // Wait once. Spurious condvar wakeups become spurious park returns,
    // which the contract permits.
    #[cfg(not(loom))]
    {
        match deadline {
            Some(deadline) => {
                // A deadline already in the past skips the wait entirely;
                // the state transition below still runs.
                if let Some(timeout) = deadline.checked_duration_since(Instant::now()) {
                    guard = match slot.cond.wait_timeout(guard, timeout) {
                        Ok((guard, _)) => guard,
                        Err(err) => err.into_inner().0,
                    };
                }
            }
            None => {
                guard = match slot.cond.wait(guard) {
                    Ok(guard) => guard,
                    Err(err) => err.into_inner(),
                };
            }
        }
    }
    #[cfg(loom)]
    {
        // Loom does not model time; timed parks degrade to plain parks
        // and loom tests must not rely on timeouts firing.
        let _ = deadline;
        guard = slot.cond.wait(guard).expect("loom mutex will never poison");
    }
    drop(guard);

    // Un-publish PARKED, consuming a permit if one was delivered while
    // we slept.
    let mut bits = slot.state.load(SeqCst);
    loop {
        match slot
            .state
            .compare_exchange(bits, with_state(bits, EMPTY), SeqCst, SeqCst)
        {
            Ok(_) => return,
            Err(actual) => bits = actual,
        }
    }
}

// === impl Thread ===

impl Thread {
    /// Makes a permit available to this thread.
    ///
    /// If the thread is currently parked it wakes; otherwise its next
    /// [`park`] returns immediately. The permit saturates: unparking an
    /// already-unparked thread does nothing. Unparking an exited thread
    /// does nothing.
    pub fn unpark(self) {
        let Some(slot) = registry().slots.get(self.0) else {
            return;
        };
        let mut bits = slot.state.load(SeqCst);
        loop {
            // The full-word CAS below re-validates this, but checking
            // first avoids waking a recycled slot's owner for nothing.
            if gen_of(bits) != self.0.generation() {
                return;
            }
            let state = bits & STATE_MASK;
            if state == NOTIFIED {
                return;
            }
            match slot
                .state
                .compare_exchange(bits, with_state(bits, NOTIFIED), SeqCst, SeqCst)
            {
                Ok(_) => {
                    if state == PARKED {
                        // Rendezvous with the parker's publish (see
                        // `park_inner`) before notifying.
                        drop(lock_ignore_poison(&slot.lock));
                        slot.cond.notify_one();
                    }
                    return;
                }
                Err(actual) => bits = actual,
            }
        }
    }

    /// Sets this thread's interrupt flag and wakes it if it is parked.
    ///
    /// The flag stays set until the thread polls it with [`interrupted`].
    /// Interrupting an exited thread does nothing.
    pub fn interrupt(self) {
        let Some(slot) = registry().slots.get(self.0) else {
            return;
        };
        let mut bits = slot.state.load(SeqCst);
        loop {
            if gen_of(bits) != self.0.generation() {
                return;
            }
            if bits & INTERRUPTED != 0 {
                return;
            }
            let state = bits & STATE_MASK;
            match slot
                .state
                .compare_exchange(bits, bits | INTERRUPTED, SeqCst, SeqCst)
            {
                Ok(_) => {
                    if state == PARKED {
                        drop(lock_ignore_poison(&slot.lock));
                        slot.cond.notify_all();
                    }
                    return;
                }
                Err(actual) => bits = actual,
            }
        }
    }

    /// Returns `true` if this thread's interrupt flag is set.
    ///
    /// Does not clear the flag. Returns `false` for exited threads.
    #[must_use]
    pub fn is_interrupted(self) -> bool {
        let Some(slot) = registry().slots.get(self.0) else {
            return false;
        };
        let bits = slot.state.load(SeqCst);
        gen_of(bits) == self.0.generation() && bits & INTERRUPTED != 0
    }

    /// An opaque identifier, unique among live threads.
    #[must_use]
    pub fn id(self) -> u64 {
        self.0.bits()
    }

    pub(crate) fn ptr(self) -> Ptr {
        self.0
    }

    pub(crate) fn from_ptr(ptr: Ptr) -> Self {
        Self(ptr)
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Thread").field(&self.0).finish()
    }
}

// === impl ParkSlot ===

impl Default for ParkSlot {
    fn default() -> Self {
        Self {
            state: AtomicU64::new(0),
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }
}

impl Slot for ParkSlot {
    fn generation(&self) -> u32 {
        gen_of(self.state.load(Acquire))
    }

    fn invalidate(&self) {
        let mut bits = self.state.load(SeqCst);
        loop {
            let next = ((gen_of(bits).wrapping_add(1)) as u64) << GEN_SHIFT;
            match self.state.compare_exchange(bits, next, SeqCst, SeqCst) {
                Ok(_) => return,
                Err(actual) => bits = actual,
            }
        }
    }
}

impl fmt::Debug for ParkSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits = self.state.load(Relaxed);
        f.debug_struct("ParkSlot")
            .field("generation", &gen_of(bits))
            .field("state", &(bits & STATE_MASK))
            .field("interrupted", &(bits & INTERRUPTED != 0))
            .finish()
    }
}
