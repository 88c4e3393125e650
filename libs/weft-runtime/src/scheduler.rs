//! Ready-task queue with the two-slot worker interface.
//!
//! This is the minimal collaborator the request engine needs: a FIFO of
//! ready tasks (`give_work`/`take_work`), a wakeup for idle workers and the
//! pre/post-process notification hooks the router drives around dispatch.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::Notify;

use weft_proto::{PolicyMsg, SchedNotifyKind};
use weft_types::Guid;

#[derive(Default)]
pub struct Scheduler {
    ready: Mutex<VecDeque<Guid>>,
    wakeup: Notify,
    pre_processed: AtomicU64,
    post_processed: AtomicU64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand ready tasks to the scheduler.
    pub fn give_work(&self, tasks: &[Guid]) {
        if tasks.is_empty() {
            return;
        }
        let mut ready = self.ready.lock();
        ready.extend(tasks.iter().copied());
        drop(ready);
        self.wakeup.notify_waiters();
        self.wakeup.notify_one();
    }

    /// Pop up to `count` ready tasks; may return fewer, never blocks.
    pub fn take_work(&self, count: usize) -> Vec<Guid> {
        let mut ready = self.ready.lock();
        let n = count.min(ready.len());
        ready.drain(..n).collect()
    }

    /// Park until `give_work` lands something.
    pub async fn wait_for_work(&self) {
        self.wakeup.notified().await;
    }

    pub fn pending(&self) -> usize {
        self.ready.lock().len()
    }

    /// Router hook before a message is dispatched. Idempotent per message;
    /// the router marks the message so re-entries skip it.
    pub fn notify_pre_process(&self, msg: &PolicyMsg) {
        self.pre_processed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(kind = ?msg.kind(), "Scheduler pre-process notification");
    }

    /// Router hook after dispatch, when the message requested it.
    pub fn notify_post_process(&self, msg: &PolicyMsg) {
        self.post_processed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(kind = ?msg.kind(), "Scheduler post-process notification");
    }

    /// `SCHED_NOTIFY` entry: out-of-band notifications from workers.
    pub fn notify(&self, kind: SchedNotifyKind, subject: Guid) {
        match kind {
            SchedNotifyKind::TaskReady => self.give_work(&[subject]),
            SchedNotifyKind::PreProcessMsg
            | SchedNotifyKind::PostProcessMsg
            | SchedNotifyKind::Idle => {
                tracing::trace!(?kind, %subject, "Scheduler notification");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::{GuidKind, Location};

    fn task(serial: u64) -> Guid {
        Guid::encode(GuidKind::Task, Location(0), serial)
    }

    #[test]
    fn fifo_order_is_preserved() {
        let sched = Scheduler::new();
        sched.give_work(&[task(1), task(2)]);
        sched.give_work(&[task(3)]);
        assert_eq!(sched.take_work(2), vec![task(1), task(2)]);
        assert_eq!(sched.take_work(8), vec![task(3)]);
        assert_eq!(sched.take_work(1), Vec::<Guid>::new());
    }

    #[tokio::test]
    async fn wait_for_work_wakes_on_give() {
        let sched = std::sync::Arc::new(Scheduler::new());
        let waiter = {
            let sched = sched.clone();
            tokio::spawn(async move {
                sched.wait_for_work().await;
                sched.take_work(1)
            })
        };
        tokio::task::yield_now().await;
        sched.give_work(&[task(9)]);
        assert_eq!(waiter.await.unwrap(), vec![task(9)]);
    }
}
