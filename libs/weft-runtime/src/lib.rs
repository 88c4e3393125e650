//! Weft policy-domain request engine.
//!
//! One [`PolicyDomain`] per address space routes every runtime operation —
//! task/event/datablock lifecycle, dependences, metadata cloning, shutdown —
//! as a typed message. Remote subjects are reached through the comm
//! transport; foreign datablocks and templates are cached behind per-object
//! proxy state machines. See `DESIGN.md` at the workspace root for the
//! component map.

mod api;
mod comm;
mod db;
mod dispatch;
mod domain;
mod error;
mod event;
mod placer;
mod proxy_db;
mod proxy_template;
mod registry;
mod router;
mod scheduler;
mod shutdown;
mod task;
mod worker;

pub use api::{describe, EdtSpec};
pub use comm::{CommError, CommTransport, InProcTransport, PollOutcome};
pub use db::{DataBlock, DbHandle};
pub use domain::{DomainConfig, PolicyDomain};
pub use error::{EngineError, EngineResult};
pub use event::{Delivery, EventRecord, EventSnapshot, Waiter};
pub use placer::PlacementOracle;
pub use proxy_db::{ProxyDbTable, ProxyState};
pub use proxy_template::ProxyTemplateTable;
pub use registry::{Binding, GuidRegistry, LabeledRange};
pub use scheduler::Scheduler;
pub use shutdown::ShutdownBarrier;
pub use task::{EdtDep, EdtFunc, FuncRegistry, ResolvedSlot, TaskContext, TaskRecord, TemplateRecord};
pub use worker::{MsgHandle, WorkerBridge};
