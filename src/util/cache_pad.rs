use core::{
    fmt,
    ops::{Deref, DerefMut},
};

/// Aligns and pads the wrapped value to the size of a cache line.
///
/// In concurrent code, the heavily-mutated state word of a synchronizer
/// should not share a cache line with its neighbors, or writes to it will
/// invalidate their lines as well ([false sharing]).
///
/// Alignment values are chosen per target architecture the same way
/// `crossbeam-utils` chooses them; 128 bytes covers the paired-line
/// prefetcher on modern x86_64 and the large lines on aarch64.
///
/// [false sharing]: https://en.wikipedia.org/wiki/False_sharing
#[cfg_attr(
    any(target_arch = "x86_64", target_arch = "aarch64"),
    repr(align(128))
)]
#[cfg_attr(
    not(any(target_arch = "x86_64", target_arch = "aarch64")),
    repr(align(64))
)]
#[derive(Clone, Copy, Default, Hash, PartialEq, Eq)]
pub struct CachePadded<T>(pub(crate) T);

// === impl CachePadded ===

impl<T> CachePadded<T> {
    /// Pads `value` to the length of a cache line.
    pub const fn new(value: T) -> Self {
        Self(value)
    }

    /// Unwraps the inner value and returns it.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for CachePadded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

impl<T: fmt::Debug> fmt::Debug for CachePadded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CachePadded").field(&self.0).finish()
    }
}

impl<T: fmt::Display> fmt::Display for CachePadded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
