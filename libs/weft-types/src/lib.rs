//! Core identifier and policy types shared by every Weft crate.
//!
//! Everything here is plain data: GUIDs with their bit-encoded kind and home
//! location, access modes, hints, runlevels and the user-visible status codes.
//! No I/O, no async, no interior mutability.

mod error;
mod event;
mod guid;
mod hint;
mod mode;
mod runlevel;

pub use error::StatusCode;
pub use event::{ChannelParams, EventKind, LATCH_DECR_SLOT, LATCH_INCR_SLOT};
pub use guid::{Guid, GuidError, GuidKind, Location};
pub use hint::{Hint, HintKey};
pub use mode::{DbAccessMode, DbFlags, GuidProps};
pub use runlevel::{Runlevel, RunlevelProps};

/// Sentinel for "use the template's stored count" in task creation.
pub const EDT_PARAM_DEF: u32 = u32::MAX;

/// Sentinel for an acquire that is not bound to a task dependence slot.
pub const EDT_SLOT_NONE: u32 = u32::MAX;
