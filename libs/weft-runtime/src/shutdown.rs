//! Distributed shutdown barrier.
//!
//! Teardown of `USER_OK` is an all-to-all quiescence protocol: the first
//! domain to shut down notifies every neighbor and self-acknowledges; a
//! domain receiving a notify while still running starts its own teardown,
//! carrying the exit code forward. The barrier opens — and the local
//! runlevel walk resumes — once `neighbor_count + 1` acknowledgements are in
//! (one per neighbor plus the domain's own).

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, Ordering};

use tokio_util::sync::CancellationToken;

pub struct ShutdownBarrier {
    neighbor_count: u32,
    ack_count: AtomicU32,
    begun: AtomicBool,
    exit_code: AtomicI32,
    open: CancellationToken,
}

impl ShutdownBarrier {
    pub fn new(neighbor_count: u32) -> Self {
        Self {
            neighbor_count,
            ack_count: AtomicU32::new(0),
            begun: AtomicBool::new(false),
            exit_code: AtomicI32::new(0),
            open: CancellationToken::new(),
        }
    }

    /// Try to start local teardown with `code`. Returns `false` when some
    /// earlier notify already began it; the first beginner's code wins.
    pub fn begin(&self, code: i32) -> bool {
        if self
            .begun
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.exit_code.store(code, Ordering::Release);
            tracing::info!(code, "Beginning distributed shutdown");
            true
        } else {
            false
        }
    }

    pub fn has_begun(&self) -> bool {
        self.begun.load(Ordering::Acquire)
    }

    /// Record one acknowledgement; opens the barrier on the last one.
    pub fn ack(&self) -> u32 {
        let acks = self.ack_count.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(acks, expected = self.neighbor_count + 1, "Shutdown ack");
        if acks == self.neighbor_count + 1 {
            self.open.cancel();
        }
        acks
    }

    pub fn is_open(&self) -> bool {
        self.open.is_cancelled()
    }

    /// Resolves when every expected acknowledgement has arrived.
    pub async fn wait_open(&self) {
        self.open.cancelled().await;
    }

    pub fn exit_code(&self) -> i32 {
        self.exit_code.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_beginner_sets_the_exit_code() {
        let barrier = ShutdownBarrier::new(2);
        assert!(barrier.begin(42));
        assert!(!barrier.begin(7));
        assert_eq!(barrier.exit_code(), 42);
    }

    #[test]
    fn barrier_opens_at_neighbor_count_plus_one() {
        let barrier = ShutdownBarrier::new(2);
        barrier.begin(0);
        barrier.ack();
        assert!(!barrier.is_open());
        barrier.ack();
        assert!(!barrier.is_open());
        barrier.ack();
        assert!(barrier.is_open());
    }

    #[tokio::test]
    async fn wait_open_resolves_once_all_acks_land() {
        let barrier = std::sync::Arc::new(ShutdownBarrier::new(1));
        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait_open().await })
        };
        barrier.ack();
        barrier.ack();
        waiter.await.unwrap();
    }
}
