//! Message types and wire codec of the policy-domain request engine.
//!
//! Every operation a policy domain can perform — locally or on behalf of a
//! peer — is a [`PolicyMsg`]: a routed envelope around one typed [`MsgBody`]
//! variant. The codec renders envelopes into self-describing frames with the
//! payload region appended after the typed body (see [`codec`]).

pub mod codec;
mod msg;

pub use msg::{
    MsgBody, MsgFlags, MsgId, MsgKind, PolicyMsg, SchedNotifyKind, TaskProps, TemplateMeta,
    WorkType,
};
