//! Reusable utilities for the synchronizer implementation.
//!
//! One type is exposed publicly because protocol implementations may
//! want it for their own state:
//!
//! - [`CachePadded`]: pads and aligns a value to the size of a cache
//!   line
//!
//! The rest (diagnostics macros, the loom-aware `const fn` shim, and
//! the deadline spinner used by the timed acquisition paths) is
//! crate-internal.

use core::time::Duration;

/// Records a protocol-level event: an enqueue, a cancellation, a signal
/// transfer. Compiled in when the `tracing` feature is enabled, in
/// tests, and under loom; otherwise expands to nothing.
#[cfg(any(test, feature = "tracing", loom))]
macro_rules! probe {
    ($($event:tt)+) => {
        tracing::trace!($($event)+)
    };
}

#[cfg(not(any(test, feature = "tracing", loom)))]
macro_rules! probe {
    ($($event:tt)+) => {};
}

/// Like `probe!`, but for chatter that is only useful when debugging
/// this crate's own tests: queue edges, slot recycling, park-gate
/// decisions. Never compiled into non-test builds, even with the
/// `tracing` feature enabled.
#[cfg(test)]
macro_rules! test_probe {
    ($($event:tt)+) => {
        tracing::debug!($($event)+)
    };
}

#[cfg(not(test))]
macro_rules! test_probe {
    ($($event:tt)+) => {};
}

/// Declares a function that is a `const fn` in real builds but a plain
/// `fn` under loom: loom's simulated atomics cannot be constructed in
/// const contexts, so constructors shared between the two worlds give
/// up their `const`ness when the model checker is driving.
macro_rules! loom_const_fn {
    (
        $(#[$meta:meta])*
        $vis:vis fn $name:ident($($args:tt)*) -> $ret:ty $body:block
    ) => {
        $(#[$meta])*
        #[cfg(not(loom))]
        $vis const fn $name($($args)*) -> $ret $body

        $(#[$meta])*
        #[cfg(loom)]
        $vis fn $name($($args)*) -> $ret $body
    };
}

mod cache_pad;

pub use self::cache_pad::CachePadded;

/// Timed waits this close to their deadline spin instead of parking:
/// arming a timer and blocking costs more than the remaining wait
/// itself.
pub(crate) const SPIN_FOR_TIMEOUT_THRESHOLD: Duration = Duration::from_micros(1);

/// Burns down the tail of a timed wait without parking.
///
/// Used by the timed acquisition and condition-wait loops once the time
/// remaining drops under [`SPIN_FOR_TIMEOUT_THRESHOLD`]. Each round
/// doubles the number of spin-loop hints issued; after a few rounds it
/// gives up on pure spinning and yields the thread instead, so a waiter
/// preempted just before its deadline does not pin a core re-checking
/// the clock.
#[derive(Debug)]
pub(crate) struct DeadlineSpin {
    #[cfg_attr(loom, allow(dead_code))]
    rounds: u32,
}

// === impl DeadlineSpin ===

impl DeadlineSpin {
    /// Rounds of pure spinning before escalating to `yield_now`.
    #[cfg_attr(loom, allow(dead_code))]
    const SPIN_ROUNDS: u32 = 6;

    pub(crate) const fn new() -> Self {
        Self { rounds: 0 }
    }

    pub(crate) fn spin(&mut self) {
        #[cfg(not(loom))]
        {
            if self.rounds < Self::SPIN_ROUNDS {
                for _ in 0..(1u32 << self.rounds) {
                    crate::loom::hint::spin_loop();
                }
                self.rounds += 1;
                return;
            }
            crate::loom::yield_now();
        }

        // Loom degrades timed parks to plain parks, so its tests never
        // drive this path; yield anyway to keep a model moving if one
        // ever does.
        #[cfg(loom)]
        crate::loom::yield_now();
    }
}

#[cfg(test)]
pub(crate) mod test {
    /// Holds the test's tracing subscriber. Keep it alive for the whole
    /// test body, or late assertions log into the void.
    #[must_use]
    pub struct TestGuard {
        _guard: tracing::subscriber::DefaultGuard,
    }

    /// Installs a per-test tracing subscriber.
    ///
    /// Filtering comes from `RUST_LOG` (`LOOM_LOG` under loom) when
    /// set, and otherwise defaults to debug-level output for this crate
    /// plus loom's iteration traces.
    pub(crate) fn trace_init() -> TestGuard {
        use tracing_subscriber::{
            filter::{EnvFilter, LevelFilter},
            util::SubscriberInitExt,
        };

        let env_var = if cfg!(loom) { "LOOM_LOG" } else { "RUST_LOG" };
        let env = std::env::var(env_var).unwrap_or_default();
        let builder = EnvFilter::builder().with_default_directive(LevelFilter::INFO.into());
        let filter = if env.is_empty() {
            builder.parse("turnstile=debug,loom=info").unwrap()
        } else {
            builder.parse_lossy(env)
        };
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .without_time()
            .finish();
        TestGuard {
            _guard: subscriber.set_default(),
        }
    }

    /// Spins (politely) until `f` returns `true`, panicking if it has
    /// not within ten seconds. For bringing background test threads to a
    /// known point without sleeping.
    #[cfg(not(loom))]
    #[track_caller]
    pub(crate) fn wait_until(mut f: impl FnMut() -> bool) {
        use std::time::{Duration, Instant};
        let deadline = Instant::now() + Duration::from_secs(10);
        while !f() {
            assert!(
                Instant::now() < deadline,
                "background thread did not reach the expected state in time",
            );
            std::thread::yield_now();
        }
    }
}
