#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg, doc_cfg_hide))]
#![cfg_attr(docsrs, doc(cfg_hide(docsrs, loom)))]
#![warn(missing_docs, missing_debug_implementations)]

pub(crate) mod loom;

#[macro_use]
pub mod util;

mod arena;
mod condition;
pub mod mutex;
pub mod park;
mod queue;
mod synchronizer;

#[doc(inline)]
pub use self::condition::Condition;
#[doc(inline)]
pub use self::mutex::{Reentrant, ReentrantMutex};
#[doc(inline)]
pub use self::park::Thread;
#[doc(inline)]
pub use self::synchronizer::{Protocol, RawSynchronizer, Synchronizer};

use core::fmt;

/// An error indicating that a waiting thread was
/// [interrupted](crate::park::Thread::interrupt).
///
/// Returned by the interruptible acquisition methods and by
/// [`Condition`] waits. By the time a caller sees this error, its queue
/// node has been cancelled and the thread's interrupt flag has been
/// consumed.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Interrupted(());

impl Interrupted {
    pub(crate) const fn new() -> Self {
        Self(())
    }
}

impl fmt::Display for Interrupted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad("interrupted")
    }
}

impl core::error::Error for Interrupted {}

/// Errors returned by the timed acquisition methods
/// ([`Synchronizer::acquire_timeout`] and friends).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AcquireError {
    /// The waiting thread was
    /// [interrupted](crate::park::Thread::interrupt).
    Interrupted,

    /// The timeout elapsed before the synchronizer could be acquired.
    TimedOut,
}

impl fmt::Display for AcquireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupted => f.pad("interrupted while waiting to acquire"),
            Self::TimedOut => f.pad("timed out before acquiring"),
        }
    }
}

impl core::error::Error for AcquireError {}

impl From<Interrupted> for AcquireError {
    fn from(_: Interrupted) -> Self {
        Self::Interrupted
    }
}
