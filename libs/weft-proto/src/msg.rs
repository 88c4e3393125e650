use bytes::Bytes;
use serde::{Deserialize, Serialize};

use weft_types::{
    ChannelParams, DbAccessMode, DbFlags, EventKind, Guid, GuidKind, GuidProps, Hint, Location,
    Runlevel, RunlevelProps, StatusCode,
};

/// Monotonic per-source message identifier.
///
/// A request and its response carry the same id; correlation is on
/// `(src, id)` since two domains may hand out the same sequence numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MsgId(pub u64);

bitflags::bitflags! {
    /// Routing and processing flags OR'd with the operation kind.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct MsgFlags: u16 {
        /// Message travels from caller to destination.
        const REQUEST = 1 << 0;
        /// Message carries the destination's answer.
        const RESPONSE = 1 << 1;
        /// The caller expects a response to this request.
        const REQ_RESPONSE = 1 << 2;
        /// Serve through the local proxy even though the subject is remote.
        const LOCAL_PROCESS = 1 << 3;
        /// The scheduler pre-process hook already ran for this message.
        const IGNORE_PRE_PROCESS = 1 << 4;
        /// The scheduler post-process hook must run after dispatch.
        const REQ_POST_PROCESS = 1 << 5;
        /// Two-way whose response is delivered asynchronously.
        const ASYNC = 1 << 6;
        /// The transport must not assume the buffer dies at send time.
        const PERSIST = 1 << 7;
    }
}

/// Work category of a created task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkType {
    /// User EDT, subject to affinity placement.
    User,
    /// Runtime-internal EDT, always local.
    Runtime,
}

bitflags::bitflags! {
    /// Properties of a task creation request.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct TaskProps: u8 {
        /// The task's output event tracks its whole transitive spawn tree.
        const FINISH = 1 << 0;
        /// The caller wants an output event created and returned.
        const OUTPUT_EVENT = 1 << 1;
    }
}

/// Scheduler notification channels surfaced through `SCHED_NOTIFY`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedNotifyKind {
    PreProcessMsg,
    PostProcessMsg,
    TaskReady,
    Idle,
}

/// Task-template metadata as it crosses the wire during a pull-clone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateMeta {
    pub func_id: u64,
    pub paramc: u32,
    pub depc: u32,
    pub name: String,
    pub hint: Hint,
}

/// Typed request/response record, one variant per operation kind.
///
/// Fields marked `out` in the comments are filled by the destination and
/// only meaningful once the message carries `RESPONSE`. Bulk data (datablock
/// payloads, cloned metadata) never lives in the body; it rides in the
/// envelope's payload region.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MsgBody {
    DbCreate {
        /// in: labeled GUID or null; out: the created block's GUID.
        guid: Guid,
        /// Task the creation-time acquire is accounted to.
        edt: Guid,
        size: u64,
        flags: DbFlags,
        props: GuidProps,
        mode: DbAccessMode,
        hint: Hint,
    },
    DbDestroy {
        guid: Guid,
    },
    DbFree {
        guid: Guid,
        edt: Guid,
    },
    DbAcquire {
        guid: Guid,
        edt: Guid,
        edt_slot: u32,
        mode: DbAccessMode,
        /// io: FETCH on an outbound proxy fill, WRITE_BACK echo on response.
        flags: DbFlags,
        /// out: block size; payload region carries the bytes on a fetch.
        size: u64,
    },
    DbRelease {
        guid: Guid,
        edt: Guid,
        flags: DbFlags,
        /// in: payload size when WRITE_BACK is set.
        size: u64,
    },
    EvtCreate {
        /// io: labeled GUID or null; out: the created event's GUID.
        guid: Guid,
        kind: EventKind,
        props: GuidProps,
        latch_init: u32,
        channel: Option<ChannelParams>,
    },
    EvtDestroy {
        guid: Guid,
    },
    EvtSatisfy {
        guid: Guid,
        payload: Guid,
        slot: u32,
    },
    EvtGet {
        guid: Guid,
        /// out: the data GUID the event fired with, if it fired.
        payload: Guid,
        /// out
        satisfied: bool,
    },
    DepAdd {
        source: Guid,
        dest: Guid,
        slot: u32,
        mode: DbAccessMode,
    },
    DepSatisfy {
        guid: Guid,
        payload: Guid,
        slot: u32,
    },
    DepRegSignaler {
        signaler: Guid,
        dest: Guid,
        slot: u32,
        mode: DbAccessMode,
    },
    DepRegWaiter {
        waiter: Guid,
        dest: Guid,
        slot: u32,
    },
    WorkCreate {
        /// out: the created task's GUID.
        guid: Guid,
        template: Guid,
        work_type: WorkType,
        /// io: `EDT_PARAM_DEF` resolves from the template before marshalling.
        paramc: u32,
        /// io: same resolution rule as `paramc`.
        depc: u32,
        paramv: Vec<u64>,
        depv: Vec<Guid>,
        props: TaskProps,
        hint: Hint,
        /// out: only set when `props` request an output event.
        output_event: Guid,
        parent_latch: Guid,
        current_edt: Guid,
    },
    WorkDestroy {
        guid: Guid,
    },
    EdtTempCreate {
        /// io: labeled GUID or null; out: the created template's GUID.
        guid: Guid,
        func_id: u64,
        paramc: u32,
        depc: u32,
        name: String,
    },
    EdtTempDestroy {
        guid: Guid,
    },
    GuidInfo {
        guid: Guid,
        /// out
        kind: Option<GuidKind>,
        /// out
        location: Location,
    },
    MetadataClone {
        guid: Guid,
        /// out: kind of the cloned metadata; bytes ride in the payload region.
        kind: Option<GuidKind>,
    },
    GuidReserve {
        kind: GuidKind,
        count: u64,
        /// out
        start: Guid,
        /// out
        stride: u64,
    },
    GuidUnreserve {
        start: Guid,
        count: u64,
    },
    HintSet {
        guid: Guid,
        hint: Hint,
    },
    HintGet {
        guid: Guid,
        /// out
        hint: Hint,
    },
    SchedGetWork {
        /// io: requested on the way in, granted on the way out.
        count: u32,
        /// out
        tasks: Vec<Guid>,
    },
    SchedNotify {
        kind: SchedNotifyKind,
        subject: Guid,
    },
    SchedTransact {
        op: u32,
    },
    SchedAnalyze {
        op: u32,
    },
    MgtRlNotify {
        runlevel: Runlevel,
        props: RunlevelProps,
        exit_code: i32,
    },
    MonitorProgress {
        monitoree: Guid,
    },
}

/// Operation kind tag, used for logging and frame headers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum MsgKind {
    DbCreate = 0,
    DbDestroy = 1,
    DbFree = 2,
    DbAcquire = 3,
    DbRelease = 4,
    EvtCreate = 5,
    EvtDestroy = 6,
    EvtSatisfy = 7,
    EvtGet = 8,
    DepAdd = 9,
    DepSatisfy = 10,
    DepRegSignaler = 11,
    DepRegWaiter = 12,
    WorkCreate = 13,
    WorkDestroy = 14,
    EdtTempCreate = 15,
    EdtTempDestroy = 16,
    GuidInfo = 17,
    MetadataClone = 18,
    GuidReserve = 19,
    GuidUnreserve = 20,
    HintSet = 21,
    HintGet = 22,
    SchedGetWork = 23,
    SchedNotify = 24,
    SchedTransact = 25,
    SchedAnalyze = 26,
    MgtRlNotify = 27,
    MonitorProgress = 28,
}

impl MsgBody {
    pub fn kind(&self) -> MsgKind {
        match self {
            MsgBody::DbCreate { .. } => MsgKind::DbCreate,
            MsgBody::DbDestroy { .. } => MsgKind::DbDestroy,
            MsgBody::DbFree { .. } => MsgKind::DbFree,
            MsgBody::DbAcquire { .. } => MsgKind::DbAcquire,
            MsgBody::DbRelease { .. } => MsgKind::DbRelease,
            MsgBody::EvtCreate { .. } => MsgKind::EvtCreate,
            MsgBody::EvtDestroy { .. } => MsgKind::EvtDestroy,
            MsgBody::EvtSatisfy { .. } => MsgKind::EvtSatisfy,
            MsgBody::EvtGet { .. } => MsgKind::EvtGet,
            MsgBody::DepAdd { .. } => MsgKind::DepAdd,
            MsgBody::DepSatisfy { .. } => MsgKind::DepSatisfy,
            MsgBody::DepRegSignaler { .. } => MsgKind::DepRegSignaler,
            MsgBody::DepRegWaiter { .. } => MsgKind::DepRegWaiter,
            MsgBody::WorkCreate { .. } => MsgKind::WorkCreate,
            MsgBody::WorkDestroy { .. } => MsgKind::WorkDestroy,
            MsgBody::EdtTempCreate { .. } => MsgKind::EdtTempCreate,
            MsgBody::EdtTempDestroy { .. } => MsgKind::EdtTempDestroy,
            MsgBody::GuidInfo { .. } => MsgKind::GuidInfo,
            MsgBody::MetadataClone { .. } => MsgKind::MetadataClone,
            MsgBody::GuidReserve { .. } => MsgKind::GuidReserve,
            MsgBody::GuidUnreserve { .. } => MsgKind::GuidUnreserve,
            MsgBody::HintSet { .. } => MsgKind::HintSet,
            MsgBody::HintGet { .. } => MsgKind::HintGet,
            MsgBody::SchedGetWork { .. } => MsgKind::SchedGetWork,
            MsgBody::SchedNotify { .. } => MsgKind::SchedNotify,
            MsgBody::SchedTransact { .. } => MsgKind::SchedTransact,
            MsgBody::SchedAnalyze { .. } => MsgKind::SchedAnalyze,
            MsgBody::MgtRlNotify { .. } => MsgKind::MgtRlNotify,
            MsgBody::MonitorProgress { .. } => MsgKind::MonitorProgress,
        }
    }
}

/// A routed operation: envelope plus typed body plus optional payload bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyMsg {
    pub id: MsgId,
    pub src: Location,
    pub dst: Location,
    pub flags: MsgFlags,
    pub status: StatusCode,
    pub body: MsgBody,
    /// Bulk bytes appended after the body on the wire; empty for most kinds.
    pub payload: Bytes,
}

impl PolicyMsg {
    /// A one-way request originating at `at`, destination to be resolved by
    /// the router (placement starts from `dst == src`).
    pub fn request(id: MsgId, at: Location, body: MsgBody) -> Self {
        Self {
            id,
            src: at,
            dst: at,
            flags: MsgFlags::REQUEST,
            status: StatusCode::Ok,
            body,
            payload: Bytes::new(),
        }
    }

    /// A two-way request: the caller expects a response.
    pub fn request_response(id: MsgId, at: Location, body: MsgBody) -> Self {
        let mut msg = Self::request(id, at, body);
        msg.flags |= MsgFlags::REQ_RESPONSE;
        msg
    }

    pub fn kind(&self) -> MsgKind {
        self.body.kind()
    }

    pub fn is_request(&self) -> bool {
        self.flags.contains(MsgFlags::REQUEST)
    }

    pub fn is_response(&self) -> bool {
        self.flags.contains(MsgFlags::RESPONSE)
    }

    pub fn expects_response(&self) -> bool {
        self.flags.contains(MsgFlags::REQ_RESPONSE)
    }

    /// Flip the message into a response to its own request: clears the
    /// request flags, swaps the endpoints, records the completion status.
    pub fn respond(&mut self, status: StatusCode) {
        self.flags.remove(MsgFlags::REQUEST | MsgFlags::REQ_RESPONSE);
        self.flags.insert(MsgFlags::RESPONSE);
        self.status = status;
        std::mem::swap(&mut self.src, &mut self.dst);
    }

    /// Flip into a locally-served response without touching the endpoints.
    pub fn respond_local(&mut self, status: StatusCode) {
        self.flags.remove(MsgFlags::REQUEST | MsgFlags::REQ_RESPONSE);
        self.flags.insert(MsgFlags::RESPONSE);
        self.status = status;
        self.dst = self.src;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> PolicyMsg {
        PolicyMsg::request_response(
            MsgId(7),
            Location(2),
            MsgBody::DbDestroy { guid: Guid::NULL },
        )
    }

    #[test]
    fn response_flip_swaps_endpoints_and_flags() {
        let mut msg = sample();
        msg.dst = Location(5);
        msg.respond(StatusCode::InvalidArg);
        assert!(msg.is_response());
        assert!(!msg.is_request());
        assert!(!msg.expects_response());
        assert_eq!(msg.src, Location(5));
        assert_eq!(msg.dst, Location(2));
        assert_eq!(msg.status, StatusCode::InvalidArg);
    }

    #[test]
    fn local_response_keeps_origin() {
        let mut msg = sample();
        msg.respond_local(StatusCode::Ok);
        assert_eq!(msg.src, Location(2));
        assert_eq!(msg.dst, Location(2));
        assert!(msg.is_response());
    }

    #[test]
    fn kind_matches_body() {
        assert_eq!(sample().kind(), MsgKind::DbDestroy);
    }
}
