use super::*;

#[cfg(not(loom))]
mod std_tests {
    use super::*;
    use crate::loom::thread;
    use crate::util::test::trace_init;
    use std::sync::mpsc::channel;
    use std::time::{Duration, Instant};

    const LONG: Duration = Duration::from_secs(10);

    #[test]
    fn unpark_before_park() {
        let _trace = trace_init();
        current().unpark();
        // the stored permit makes this return immediately
        park();
    }

    #[test]
    fn permit_saturates_at_one() {
        let _trace = trace_init();
        current().unpark();
        current().unpark();
        park(); // consumes the single permit

        // no permit remains, so this park must run out the clock
        let start = Instant::now();
        park_timeout(Duration::from_millis(200));
        assert!(
            start.elapsed() >= Duration::from_millis(100),
            "a second permit was stored; two unparks must equal one",
        );
    }

    #[test]
    fn unpark_wakes_parked_thread() {
        let _trace = trace_init();
        let (done_tx, done_rx) = channel();
        let (token_tx, token_rx) = channel();
        let handle = thread::spawn(move || {
            token_tx.send(current()).unwrap();
            park();
            done_tx.send(()).unwrap();
        });
        let token = token_rx.recv_timeout(LONG).unwrap();
        token.unpark();
        done_rx.recv_timeout(LONG).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn interrupt_wakes_parked_thread() {
        let _trace = trace_init();
        let (done_tx, done_rx) = channel();
        let (token_tx, token_rx) = channel();
        let handle = thread::spawn(move || {
            token_tx.send(current()).unwrap();
            loop {
                park();
                if interrupted() {
                    break;
                }
            }
            done_tx.send(()).unwrap();
        });
        let token = token_rx.recv_timeout(LONG).unwrap();
        token.interrupt();
        done_rx.recv_timeout(LONG).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn interrupted_polls_and_clears() {
        let _trace = trace_init();
        assert!(!interrupted());

        current().interrupt();
        assert!(current().is_interrupted(), "is_interrupted must not clear");
        assert!(current().is_interrupted());

        assert!(interrupted(), "the flag was set");
        assert!(!interrupted(), "the previous poll consumed it");
        assert!(!current().is_interrupted());
    }

    #[test]
    fn park_with_pending_interrupt_returns_immediately() {
        let _trace = trace_init();
        current().interrupt();
        park(); // must not block
        assert!(interrupted(), "park must not consume the interrupt flag");
    }

    #[test]
    fn park_deadline_expires() {
        let _trace = trace_init();
        let deadline = Instant::now() + Duration::from_millis(150);
        // spurious wakeups are allowed, so re-park until the deadline
        // has truly passed
        loop {
            park_deadline(deadline);
            if Instant::now() >= deadline {
                break;
            }
        }
    }

    #[test]
    fn stale_token_is_inert() {
        let _trace = trace_init();
        let (token_tx, token_rx) = channel();
        thread::spawn(move || {
            token_tx.send(current()).unwrap();
        })
        .join()
        .unwrap();

        // the thread is gone; its token must do nothing
        let token = token_rx.recv_timeout(LONG).unwrap();
        token.unpark();
        token.interrupt();
        assert!(!token.is_interrupted());
    }

    #[test]
    fn tokens_are_stable_identities() {
        let _trace = trace_init();
        let me = current();
        assert_eq!(me, current());

        let (token_tx, token_rx) = channel();
        let handle = thread::spawn(move || {
            token_tx.send(current()).unwrap();
        });
        let other = token_rx.recv_timeout(LONG).unwrap();
        assert_ne!(me, other);
        handle.join().unwrap();
    }
}

#[cfg(loom)]
mod loom_tests {
    use super::*;
    use crate::loom::{self, sync::atomic::{AtomicUsize, Ordering::SeqCst}, sync::Arc, thread};

    #[test]
    fn park_unpark_handoff() {
        loom::model(|| {
            let me = current();
            let flag = Arc::new(AtomicUsize::new(0));
            let flag2 = flag.clone();
            let t = thread::spawn(move || {
                flag2.store(1, SeqCst);
                me.unpark();
            });
            while flag.load(SeqCst) == 0 {
                park();
            }
            t.join().unwrap();
        });
    }

    #[test]
    fn interrupt_handoff() {
        loom::model(|| {
            let me = current();
            let t = thread::spawn(move || {
                me.interrupt();
            });
            while !interrupted() {
                park();
            }
            t.join().unwrap();
        });
    }
}
