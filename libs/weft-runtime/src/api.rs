//! User-facing operations of a policy domain.
//!
//! These wrappers build the corresponding request message, run it through
//! the router and translate the response. They are what EDT bodies (through
//! their [`crate::task::TaskContext`]) and the host binary call; nothing
//! here touches engine internals beyond handle lookup.

use std::sync::Arc;

use crate::db::DbHandle;
use crate::domain::PolicyDomain;
use crate::error::{EngineError, EngineResult};
use crate::event::EventSnapshot;
use crate::task::EdtFunc;
use weft_proto::{MsgBody, PolicyMsg, TaskProps, WorkType};
use weft_types::{
    ChannelParams, DbAccessMode, DbFlags, EventKind, Guid, GuidKind, GuidProps, Hint, StatusCode,
    EDT_PARAM_DEF, EDT_SLOT_NONE,
};

/// Everything needed to create a task.
#[derive(Clone)]
pub struct EdtSpec {
    pub template: Guid,
    pub paramv: Vec<u64>,
    /// Provided dependences; `Guid::UNINITIALIZED` slots attach later.
    pub depv: Vec<Guid>,
    pub hint: Hint,
    pub finish: bool,
    pub output_event: bool,
    /// Latch of the enclosing finish scope, if any.
    pub parent_latch: Guid,
    /// Task issuing the creation, for provenance.
    pub current_edt: Guid,
}

impl EdtSpec {
    pub fn new(template: Guid) -> Self {
        Self {
            template,
            paramv: Vec::new(),
            depv: Vec::new(),
            hint: Hint::new(),
            finish: false,
            output_event: false,
            parent_latch: Guid::NULL,
            current_edt: Guid::NULL,
        }
    }
}

impl PolicyDomain {
    /// Register an EDT body under a function id shared by every domain.
    pub fn register_func(&self, func_id: u64, func: EdtFunc) {
        self.funcs().register(func_id, func);
    }

    fn status_err(status: StatusCode) -> EngineError {
        EngineError::Status(status)
    }

    fn db_handle_for(&self, guid: Guid, mode: DbAccessMode) -> Option<DbHandle> {
        if self.registry.is_home(guid) {
            self.registry.lookup_db(guid).map(|db| db.handle(mode))
        } else {
            self.proxy_dbs.handle(guid)
        }
    }

    /// Create a datablock (placed by affinity hint) and acquire it.
    pub async fn db_create(
        self: &Arc<Self>,
        edt: Guid,
        size: u64,
        mode: DbAccessMode,
        hint: Hint,
    ) -> EngineResult<(Guid, DbHandle)> {
        let msg = self.request(MsgBody::DbCreate {
            guid: Guid::NULL,
            edt,
            size,
            flags: DbFlags::ACQUIRE_ON_CREATE,
            props: GuidProps::empty(),
            mode,
            hint,
        });
        let response = self.process_message(msg, true).await?;
        response.status.into_result().map_err(Self::status_err)?;
        let guid = match response.body {
            MsgBody::DbCreate { guid, .. } => guid,
            _ => Guid::NULL,
        };
        let handle = self.db_handle_for(guid, mode).ok_or(EngineError::Protocol {
            detail: "created datablock has no local payload",
            guid,
        })?;
        Ok((guid, handle))
    }

    /// Acquire a datablock in `mode` for `edt`'s `slot`.
    ///
    /// Blocks through the proxy/queue machinery until the payload is
    /// available locally.
    pub async fn db_acquire(
        self: &Arc<Self>,
        guid: Guid,
        edt: Guid,
        slot: u32,
        mode: DbAccessMode,
    ) -> EngineResult<DbHandle> {
        let msg = self.request(MsgBody::DbAcquire {
            guid,
            edt,
            edt_slot: slot,
            mode,
            flags: DbFlags::empty(),
            size: 0,
        });
        let id = msg.id;
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.acquire_waiters.insert(id.0, tx);
        let out = match self.process_message(msg, true).await {
            Ok(out) => out,
            Err(err) => {
                self.acquire_waiters.remove(&id.0);
                return Err(err);
            }
        };
        match out.status {
            StatusCode::Ok | StatusCode::Pending => {}
            status => {
                self.acquire_waiters.remove(&id.0);
                return Err(Self::status_err(status));
            }
        }
        let granted = rx.await.map_err(|_| EngineError::ResponseDropped {
            msg_id: id.0,
            dest: guid.location().0,
        })?;
        granted.status.into_result().map_err(Self::status_err)?;
        self.db_handle_for(guid, mode).ok_or(EngineError::Protocol {
            detail: "granted acquire has no payload",
            guid,
        })
    }

    /// Runtime-internal acquire not bound to a task slot.
    pub async fn db_acquire_oblivious(
        self: &Arc<Self>,
        guid: Guid,
        mode: DbAccessMode,
    ) -> EngineResult<DbHandle> {
        self.db_acquire(guid, Guid::NULL, EDT_SLOT_NONE, mode).await
    }

    /// Release `edt`'s hold on a datablock, writing back when required.
    pub async fn db_release(self: &Arc<Self>, guid: Guid, edt: Guid) -> EngineResult<()> {
        let msg = self.request(MsgBody::DbRelease {
            guid,
            edt,
            flags: DbFlags::empty(),
            size: 0,
        });
        let response = self.process_message(msg, true).await?;
        response.status.into_result().map_err(Self::status_err)
    }

    /// Destroy a datablock at its home; later acquires fail `EINVAL`.
    pub async fn db_destroy(self: &Arc<Self>, guid: Guid) -> EngineResult<()> {
        let msg = self.request(MsgBody::DbDestroy { guid });
        let response = self.process_message(msg, true).await?;
        response.status.into_result().map_err(Self::status_err)
    }

    /// Create an event of `kind` homed on this domain.
    pub async fn event_create(self: &Arc<Self>, kind: EventKind) -> EngineResult<Guid> {
        self.event_create_with(kind, Guid::NULL, GuidProps::empty(), 0, None)
            .await
    }

    /// Create a latch event with an initial counter.
    pub async fn latch_create(self: &Arc<Self>, init: u32) -> EngineResult<Guid> {
        self.event_create_with(EventKind::Latch, Guid::NULL, GuidProps::empty(), init, None)
            .await
    }

    /// Create a channel event with explicit generation parameters.
    pub async fn channel_create(self: &Arc<Self>, params: ChannelParams) -> EngineResult<Guid> {
        self.event_create_with(
            EventKind::Channel,
            Guid::NULL,
            GuidProps::empty(),
            0,
            Some(params),
        )
        .await
    }

    /// Full-control event creation: labeled GUIDs go to the label's home;
    /// a lost creation race reports `EGUIDEXISTS`.
    pub async fn event_create_with(
        self: &Arc<Self>,
        kind: EventKind,
        labeled: Guid,
        props: GuidProps,
        latch_init: u32,
        channel: Option<ChannelParams>,
    ) -> EngineResult<Guid> {
        let msg = self.request(MsgBody::EvtCreate {
            guid: labeled,
            kind,
            props,
            latch_init,
            channel,
        });
        let response = self.process_message(msg, true).await?;
        response.status.into_result().map_err(Self::status_err)?;
        match response.body {
            MsgBody::EvtCreate { guid, .. } => Ok(guid),
            _ => Err(EngineError::Protocol {
                detail: "event create response without event body",
                guid: labeled,
            }),
        }
    }

    /// Satisfy an event slot with a data GUID (or null).
    pub async fn event_satisfy(
        self: &Arc<Self>,
        guid: Guid,
        payload: Guid,
        slot: u32,
    ) -> EngineResult<()> {
        let msg = self.request_oneway(MsgBody::EvtSatisfy {
            guid,
            payload,
            slot,
        });
        let out = self.process_message(msg, true).await?;
        match out.status {
            StatusCode::Ok | StatusCode::Pending => Ok(()),
            status => Err(Self::status_err(status)),
        }
    }

    /// Destroy an event at its home.
    pub async fn event_destroy(self: &Arc<Self>, guid: Guid) -> EngineResult<()> {
        let msg = self.request(MsgBody::EvtDestroy { guid });
        let response = self.process_message(msg, true).await?;
        response.status.into_result().map_err(Self::status_err)
    }

    /// Query a (possibly remote) event's completion state.
    pub async fn event_get(self: &Arc<Self>, guid: Guid) -> EngineResult<(bool, Guid)> {
        let msg = self.request(MsgBody::EvtGet {
            guid,
            payload: Guid::NULL,
            satisfied: false,
        });
        let response = self.process_message(msg, true).await?;
        response.status.into_result().map_err(Self::status_err)?;
        match response.body {
            MsgBody::EvtGet {
                payload, satisfied, ..
            } => Ok((satisfied, payload)),
            _ => Err(EngineError::Protocol {
                detail: "event get response without body",
                guid,
            }),
        }
    }

    /// Local observability: the firing state of an event homed here.
    pub fn event_snapshot(&self, guid: Guid) -> Option<EventSnapshot> {
        self.registry.lookup_event(guid).map(|evt| evt.snapshot())
    }

    /// Add a dependence edge per the decision table.
    pub async fn add_dependence(
        self: &Arc<Self>,
        source: Guid,
        dest: Guid,
        slot: u32,
        mode: DbAccessMode,
    ) -> EngineResult<()> {
        let msg = self.request(MsgBody::DepAdd {
            source,
            dest,
            slot,
            mode,
        });
        let response = self.process_message(msg, true).await?;
        response.status.into_result().map_err(Self::status_err)
    }

    /// Create a task template homed on this domain.
    pub async fn template_create(
        self: &Arc<Self>,
        func_id: u64,
        paramc: u32,
        depc: u32,
        name: &str,
    ) -> EngineResult<Guid> {
        let msg = self.request(MsgBody::EdtTempCreate {
            guid: Guid::NULL,
            func_id,
            paramc,
            depc,
            name: name.to_owned(),
        });
        let response = self.process_message(msg, true).await?;
        response.status.into_result().map_err(Self::status_err)?;
        match response.body {
            MsgBody::EdtTempCreate { guid, .. } => Ok(guid),
            _ => Err(EngineError::Protocol {
                detail: "template create response without body",
                guid: Guid::NULL,
            }),
        }
    }

    /// Destroy a template at its home.
    pub async fn template_destroy(self: &Arc<Self>, guid: Guid) -> EngineResult<()> {
        let msg = self.request(MsgBody::EdtTempDestroy { guid });
        let response = self.process_message(msg, true).await?;
        response.status.into_result().map_err(Self::status_err)
    }

    /// Create a task; returns `(task, output_event)`.
    ///
    /// Placement honours the affinity hint or round-robins over the
    /// domain set; the template is pull-cloned on first remote use.
    pub async fn edt_create(self: &Arc<Self>, spec: EdtSpec) -> EngineResult<(Guid, Guid)> {
        let mut props = TaskProps::empty();
        if spec.finish {
            props.insert(TaskProps::FINISH);
        }
        if spec.output_event {
            props.insert(TaskProps::OUTPUT_EVENT);
        }
        let paramc = spec.paramv.len() as u32;
        let msg = self.request(MsgBody::WorkCreate {
            guid: Guid::NULL,
            template: spec.template,
            work_type: WorkType::User,
            paramc,
            depc: EDT_PARAM_DEF,
            paramv: spec.paramv,
            depv: spec.depv,
            props,
            hint: spec.hint,
            output_event: Guid::NULL,
            parent_latch: spec.parent_latch,
            current_edt: spec.current_edt,
        });
        let response = self.process_message(msg, true).await?;
        response.status.into_result().map_err(Self::status_err)?;
        match response.body {
            MsgBody::WorkCreate {
                guid, output_event, ..
            } => Ok((guid, output_event)),
            _ => Err(EngineError::Protocol {
                detail: "work create response without body",
                guid: spec.template,
            }),
        }
    }

    /// Reserve a labeled GUID range on this domain.
    pub async fn guid_reserve(
        self: &Arc<Self>,
        kind: GuidKind,
        count: u64,
    ) -> EngineResult<(Guid, u64)> {
        let msg = self.request(MsgBody::GuidReserve {
            kind,
            count,
            start: Guid::NULL,
            stride: 0,
        });
        let response = self.process_message(msg, true).await?;
        response.status.into_result().map_err(Self::status_err)?;
        match response.body {
            MsgBody::GuidReserve { start, stride, .. } => Ok((start, stride)),
            _ => Err(EngineError::Protocol {
                detail: "reserve response without body",
                guid: Guid::NULL,
            }),
        }
    }

    /// Affinity GUID of policy domain `rank`, for placement hints.
    pub fn affinity_of(&self, rank: u32) -> Option<Guid> {
        self.placer.affinity_at(rank as usize)
    }
}

/// Convenience: a `PolicyMsg` pretty-printer for operator logs.
pub fn describe(msg: &PolicyMsg) -> String {
    format!(
        "{:?} {} -> {} (id {}, status {})",
        msg.kind(),
        msg.src,
        msg.dst,
        msg.id.0,
        msg.status
    )
}
