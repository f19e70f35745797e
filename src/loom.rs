#[allow(unused_imports)]
pub(crate) use self::inner::*;

#[cfg(loom)]
mod inner {
    #![allow(dead_code)]
    #![allow(unused_imports)]

    pub(crate) use loom::{hint, model, thread};

    pub(crate) use loom::thread::yield_now;

    pub(crate) mod sync {
        pub(crate) use loom::sync::*;
    }

    /// Acquires a blocking mutex, ignoring poisoning.
    ///
    /// Loom's mutex cannot actually poison (a panicking thread fails the
    /// whole model), so this just unwraps.
    #[track_caller]
    pub(crate) fn lock_ignore_poison<'a, T>(
        mutex: &'a sync::Mutex<T>,
    ) -> sync::MutexGuard<'a, T> {
        mutex.lock().expect("loom mutex will never poison")
    }
}

#[cfg(not(loom))]
mod inner {
    #![allow(dead_code, unused_imports)]

    pub(crate) mod sync {
        pub(crate) use std::sync::*;

        pub(crate) mod atomic {
            pub(crate) use portable_atomic::*;
        }
    }

    pub(crate) use portable_atomic::hint;

    pub(crate) use std::thread::yield_now;

    /// Acquires a blocking mutex, ignoring poisoning.
    ///
    /// The data protected by the parker mutexes is a unit; the interesting
    /// state lives in atomics. A thread that panics while parked must not
    /// render the slot unusable for the slot's next occupant.
    #[track_caller]
    pub(crate) fn lock_ignore_poison<'a, T>(
        mutex: &'a sync::Mutex<T>,
    ) -> sync::MutexGuard<'a, T> {
        mutex
            .lock()
            .unwrap_or_else(sync::PoisonError::into_inner)
    }

    #[cfg(test)]
    pub(crate) mod thread {
        pub(crate) use std::thread::{yield_now, JoinHandle};

        pub(crate) fn spawn<F, T>(f: F) -> JoinHandle<T>
        where
            F: FnOnce() -> T + Send + 'static,
            T: Send + 'static,
        {
            use super::sync::atomic::{AtomicUsize, Ordering::Relaxed};
            thread_local! {
                static CHILDREN: AtomicUsize = const { AtomicUsize::new(1) };
            }

            let subscriber = tracing::Dispatch::default();
            let span = tracing::Span::current();
            let num = CHILDREN.with(|children| children.fetch_add(1, Relaxed));
            std::thread::spawn(move || {
                let _tracing = tracing::dispatcher::set_default(&subscriber);
                let _span = tracing::info_span!(parent: span, "thread", message = num).entered();

                tracing::info!(num, "spawned child thread");
                let res = f();
                tracing::info!(num, "child thread completed");

                res
            })
        }
    }


    #[cfg(test)]
    pub(crate) fn model(f: impl FnOnce()) {
        model::Builder::new().check(f)
    }
}
