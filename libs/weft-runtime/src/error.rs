use weft_proto::codec::CodecError;
use weft_types::{Guid, StatusCode};

/// Infrastructure failures of the request engine.
///
/// These are distinct from operation outcomes: a handler that rejects a
/// request reports a [`StatusCode`] inside the response message, while an
/// `EngineError` means the engine itself can no longer make progress (a dead
/// transport, a corrupt frame, a protocol invariant broken by a peer).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("comm transport closed while {context}")]
    TransportClosed { context: &'static str },

    #[error("no route to {dest} from {src}")]
    NoRoute { src: u32, dest: u32 },

    #[error("frame codec failure: {0}")]
    Codec(#[from] CodecError),

    #[error("peer never answered message {msg_id} to {dest}")]
    ResponseDropped { msg_id: u64, dest: u32 },

    #[error("protocol violation: {detail} (guid {guid})")]
    Protocol { detail: &'static str, guid: Guid },

    #[error("operation failed: {0}")]
    Status(StatusCode),
}

impl EngineError {
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            EngineError::Status(code) => Some(*code),
            _ => None,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
