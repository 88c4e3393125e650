//! Worker loops and the worker-facing bridge.
//!
//! One communication worker per domain drains the transport: responses are
//! matched against the pending table, everything else re-enters the router
//! on a fresh task. Computation workers pop ready tasks from the scheduler,
//! acquire the slot datablocks, run the registered EDT body and walk the
//! completion protocol.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinHandle;

use crate::comm::PollOutcome;
use crate::domain::PolicyDomain;
use crate::error::EngineResult;
use crate::task::{EdtDep, TaskContext};
use weft_proto::codec::{self, Frame};
use weft_proto::{MsgBody, PolicyMsg};
use weft_types::{Guid, GuidKind, StatusCode, LATCH_DECR_SLOT};

pub(crate) fn spawn_comm_worker(domain: Arc<PolicyDomain>) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!(pd = %domain.location(), "Comm worker up");
        loop {
            tokio::select! {
                _ = domain.cancel.cancelled() => break,
                frame = domain.transport.recv() => match frame {
                    Some(bytes) => handle_frame(&domain, bytes),
                    None => break,
                },
            }
        }
        tracing::debug!(pd = %domain.location(), "Comm worker down");
    })
}

fn handle_frame(domain: &Arc<PolicyDomain>, bytes: Bytes) {
    let frame = Frame {
        head: bytes,
        payload: Bytes::new(),
    };
    let msg = match codec::decode(&frame) {
        Ok(msg) => msg,
        Err(err) => {
            tracing::error!(error = %err, "Dropping corrupt frame");
            return;
        }
    };
    if msg.is_response() {
        if let Some((_, tx)) = domain.pending.remove(&msg.id.0) {
            let _ = tx.send(msg);
            return;
        }
        // Asynchronous two-way response (acquire, clone): route it.
    }
    let domain = domain.clone();
    tokio::spawn(async move {
        if let Err(err) = domain.process_message(msg, false).await {
            tracing::error!(error = %err, "Incoming message processing failed");
        }
    });
}

pub(crate) fn spawn_compute_worker(domain: Arc<PolicyDomain>, id: usize) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::debug!(pd = %domain.location(), worker = id, "Compute worker up");
        loop {
            if domain.cancel.is_cancelled() {
                break;
            }
            let work = domain.scheduler.take_work(1);
            match work.first() {
                Some(task) => execute_task(&domain, *task).await,
                None => {
                    tokio::select! {
                        _ = domain.cancel.cancelled() => break,
                        _ = domain.scheduler.wait_for_work() => {}
                        _ = tokio::time::sleep(Duration::from_millis(20)) => {}
                    }
                }
            }
        }
        tracing::debug!(pd = %domain.location(), worker = id, "Compute worker down");
    })
}

/// Run one ready task through acquire → body → completion.
async fn execute_task(domain: &Arc<PolicyDomain>, guid: Guid) {
    let Some(task) = domain.registry.lookup_task(guid) else {
        tracing::warn!(task = %guid, "Ready task vanished before execution");
        return;
    };
    let Some(func) = domain.funcs.get(task.func_id) else {
        tracing::error!(task = %guid, func_id = task.func_id, "No EDT body registered");
        return;
    };

    let slots = task.resolved_slots();
    let mut deps = Vec::with_capacity(slots.len());
    let mut acquired = Vec::new();
    for (slot, resolved) in slots.iter().enumerate() {
        // Persistent-event slots were never pushed; pull the value now.
        let payload = match resolved.pull {
            Some(event) => match domain.event_get(event).await {
                Ok((true, payload)) => payload,
                Ok((false, _)) => Guid::NULL,
                Err(err) => {
                    tracing::error!(task = %guid, %event, error = %err, "Slot pull failed");
                    Guid::NULL
                }
            },
            None => resolved.payload,
        };
        let mode = resolved.mode;
        if payload.kind() == Ok(GuidKind::Datablock) {
            match domain.db_acquire(payload, guid, slot as u32, mode).await {
                Ok(handle) => {
                    acquired.push(payload);
                    deps.push(EdtDep {
                        guid: payload,
                        mode,
                        data: Some(handle),
                    });
                }
                Err(err) => {
                    tracing::error!(task = %guid, db = %payload, error = %err, "Slot acquire failed");
                    deps.push(EdtDep {
                        guid: payload,
                        mode,
                        data: None,
                    });
                }
            }
        } else {
            deps.push(EdtDep {
                guid: payload,
                mode,
                data: None,
            });
        }
    }

    let scope_latch = if task.is_finish() {
        task.finish_latch
    } else {
        task.parent_latch
    };
    let ctx = TaskContext {
        domain: domain.clone(),
        task: guid,
        paramv: task.paramv.clone(),
        deps,
        scope_latch,
    };
    tracing::debug!(task = %guid, "Executing task");
    let output = func(ctx).await;

    // Completion: write-backs land home before anything downstream can
    // observe the output event.
    for db in acquired {
        if let Err(err) = domain.db_release(db, guid).await {
            tracing::error!(task = %guid, db = %db, error = %err, "Release failed");
        }
    }
    if !task.output_event.is_null() && !task.is_finish() {
        let payload = output.unwrap_or(Guid::NULL);
        if let Err(err) = domain.event_satisfy(task.output_event, payload, 0).await {
            tracing::error!(task = %guid, error = %err, "Output event satisfy failed");
        }
    }
    let checkout = if task.is_finish() {
        task.finish_latch
    } else {
        task.parent_latch
    };
    if !checkout.is_null() {
        if let Err(err) = domain.latch_decr(checkout).await {
            tracing::error!(task = %guid, latch = %checkout, error = %err, "Scope check-out failed");
        }
    }
    let destroy = domain.request_oneway(MsgBody::WorkDestroy { guid });
    if let Err(err) = domain.process_message(destroy, false).await {
        tracing::error!(task = %guid, error = %err, "Task destroy failed");
    }
    tracing::debug!(task = %guid, "Task complete");
}

/// Two-way response handle, fulfilled by the comm worker.
pub struct MsgHandle {
    rx: tokio::sync::oneshot::Receiver<PolicyMsg>,
    msg_id: u64,
    dest: u32,
}

/// The thin contract the engine exposes to worker threads.
#[derive(Clone)]
pub struct WorkerBridge {
    domain: Arc<PolicyDomain>,
}

impl WorkerBridge {
    pub fn new(domain: Arc<PolicyDomain>) -> Self {
        Self { domain }
    }

    pub fn domain(&self) -> &Arc<PolicyDomain> {
        &self.domain
    }

    pub async fn process_message(
        &self,
        msg: PolicyMsg,
        blocking: bool,
    ) -> EngineResult<PolicyMsg> {
        self.domain.process_message(msg, blocking).await
    }

    /// Raw send; returns a handle when the message is a two-way.
    pub async fn send_message(&self, msg: &PolicyMsg) -> EngineResult<Option<MsgHandle>> {
        let handle = if msg.expects_response() {
            let (tx, rx) = tokio::sync::oneshot::channel();
            self.domain.pending.insert(msg.id.0, tx);
            Some(MsgHandle {
                rx,
                msg_id: msg.id.0,
                dest: msg.dst.0,
            })
        } else {
            None
        };
        self.domain.send_frame(msg).await?;
        Ok(handle)
    }

    /// Non-blocking look at the transport.
    pub fn poll_message(&self) -> PollOutcome {
        self.domain.transport.poll()
    }

    /// Block on a two-way handle until its response lands.
    pub async fn wait_message(&self, handle: MsgHandle) -> EngineResult<PolicyMsg> {
        handle
            .rx
            .await
            .map_err(|_| crate::error::EngineError::ResponseDropped {
                msg_id: handle.msg_id,
                dest: handle.dest,
            })
    }

    pub fn take_work(&self, count: usize) -> Vec<Guid> {
        self.domain.scheduler.take_work(count)
    }

    pub fn give_work(&self, tasks: &[Guid]) {
        self.domain.scheduler.give_work(tasks);
    }

    pub async fn monitor_progress(&self, monitoree: Guid) -> EngineResult<()> {
        self.domain.monitor_progress(monitoree).await
    }
}

impl PolicyDomain {
    /// Decrement a latch slot, waiting for the satisfaction to apply.
    pub(crate) async fn latch_decr(self: &Arc<Self>, latch: Guid) -> EngineResult<()> {
        let msg = self.request_oneway(MsgBody::DepSatisfy {
            guid: latch,
            payload: Guid::NULL,
            slot: LATCH_DECR_SLOT,
        });
        let out = self.process_message(msg, true).await?;
        match out.status {
            StatusCode::Ok | StatusCode::Pending => Ok(()),
            status => Err(crate::error::EngineError::Status(status)),
        }
    }
}
