//! Frame layout and marshalling for [`PolicyMsg`].
//!
//! A frame is a fixed header, the postcard-encoded typed body, and an
//! optional payload region. Pointers never cross the wire: the header records
//! the payload as a byte offset/length pair relative to the frame start.
//!
//! Two marshal modes exist. `FullCopy` produces one self-contained buffer and
//! is mandatory for any message leaving the address space. `Append` keeps the
//! payload as a zero-copy handle onto the sender's buffer and is only valid
//! between endpoints sharing an address space.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::msg::{MsgFlags, MsgId, MsgKind, PolicyMsg};
use weft_types::{Location, StatusCode};

/// Size of the fixed frame header in bytes.
pub const HEADER_LEN: usize = 44;

const MAGIC: u16 = 0x5746;
const VERSION: u8 = 2;

/// How the payload region is materialised relative to the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarshalMode {
    /// Payload rides as a shared handle next to the head buffer.
    Append,
    /// Payload bytes are copied into the frame; the result is self-contained.
    FullCopy,
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("frame truncated: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    #[error("bad frame magic {found:#06x}")]
    BadMagic { found: u16 },

    #[error("unsupported frame version {found}")]
    BadVersion { found: u8 },

    #[error("header kind {header:?} does not match body kind {body:?}")]
    KindMismatch { header: u8, body: MsgKind },

    #[error("frame useful size {useful} exceeds buffer size {buffer}")]
    SizeInvariant { useful: u32, buffer: u32 },

    #[error("payload region [{off}, {off}+{len}) escapes the frame")]
    PayloadRange { off: u32, len: u32 },

    #[error("unknown status code {found}")]
    BadStatus { found: u8 },

    #[error("body encode/decode failed: {0}")]
    Body(#[from] postcard::Error),
}

/// An encoded message: head buffer plus (for `Append` frames) the detached
/// payload handle. `FullCopy` frames keep `payload` empty.
#[derive(Clone, Debug)]
pub struct Frame {
    pub head: Bytes,
    pub payload: Bytes,
}

impl Frame {
    /// Serialised byte count, header included.
    pub fn useful_size(&self) -> usize {
        self.head.len() + self.payload.len()
    }

    /// Whether this frame can leave the address space as-is.
    pub fn is_self_contained(&self) -> bool {
        self.payload.is_empty()
    }

    /// Collapse into one contiguous self-contained buffer, copying the
    /// detached payload if there is one.
    pub fn into_contiguous(self) -> Bytes {
        if self.payload.is_empty() {
            return self.head;
        }
        let mut buf = BytesMut::with_capacity(self.head.len() + self.payload.len());
        buf.put_slice(&self.head);
        buf.put_slice(&self.payload);
        buf.freeze()
    }
}

/// Encode with the default buffer capacity (exactly the useful size).
pub fn encode(msg: &PolicyMsg, mode: MarshalMode) -> Result<Frame, CodecError> {
    encode_with_capacity(msg, mode, 0)
}

/// Encode, reserving at least `min_buffer` bytes of backing capacity so the
/// same buffer can be reused for a response larger than the request.
pub fn encode_with_capacity(
    msg: &PolicyMsg,
    mode: MarshalMode,
    min_buffer: usize,
) -> Result<Frame, CodecError> {
    let body = postcard::to_stdvec(&msg.body)?;
    let payload_len = msg.payload.len();
    let in_head = mode == MarshalMode::FullCopy && payload_len > 0;

    let head_len = HEADER_LEN + body.len() + if in_head { payload_len } else { 0 };
    let useful = HEADER_LEN + body.len() + payload_len;
    let capacity = head_len.max(min_buffer);

    let mut head = BytesMut::with_capacity(capacity);
    head.put_u16_le(MAGIC);
    head.put_u8(VERSION);
    head.put_u8(msg.kind() as u8);
    head.put_u16_le(msg.flags.bits());
    head.put_u8(msg.status as u8);
    head.put_u8(0); // reserved
    head.put_u32_le(msg.src.0);
    head.put_u32_le(msg.dst.0);
    head.put_u64_le(msg.id.0);
    head.put_u32_le(useful as u32);
    head.put_u32_le(capacity.max(useful) as u32);
    head.put_u32_le(body.len() as u32);
    if in_head {
        head.put_u32_le((HEADER_LEN + body.len()) as u32);
    } else {
        head.put_u32_le(0);
    }
    head.put_u32_le(payload_len as u32);
    debug_assert_eq!(head.len(), HEADER_LEN);

    head.put_slice(&body);
    if in_head {
        head.put_slice(&msg.payload);
    }

    let payload = if in_head || payload_len == 0 {
        Bytes::new()
    } else {
        // Zero-copy: the receiver shares the sender's payload allocation.
        msg.payload.clone()
    };
    Ok(Frame {
        head: head.freeze(),
        payload,
    })
}

/// Decode a frame back into a structurally equal message.
pub fn decode(frame: &Frame) -> Result<PolicyMsg, CodecError> {
    let head = &frame.head;
    if head.len() < HEADER_LEN {
        return Err(CodecError::Truncated {
            need: HEADER_LEN,
            have: head.len(),
        });
    }
    let mut cursor = &head[..];
    let magic = cursor.get_u16_le();
    if magic != MAGIC {
        return Err(CodecError::BadMagic { found: magic });
    }
    let version = cursor.get_u8();
    if version != VERSION {
        return Err(CodecError::BadVersion { found: version });
    }
    let kind_byte = cursor.get_u8();
    let flags = MsgFlags::from_bits_truncate(cursor.get_u16_le());
    let status_byte = cursor.get_u8();
    let _reserved = cursor.get_u8();
    let src = Location(cursor.get_u32_le());
    let dst = Location(cursor.get_u32_le());
    let id = MsgId(cursor.get_u64_le());
    let useful = cursor.get_u32_le();
    let buffer = cursor.get_u32_le();
    let body_len = cursor.get_u32_le() as usize;
    let payload_off = cursor.get_u32_le();
    let payload_len = cursor.get_u32_le() as usize;

    if useful > buffer {
        return Err(CodecError::SizeInvariant { useful, buffer });
    }
    if head.len() < HEADER_LEN + body_len {
        return Err(CodecError::Truncated {
            need: HEADER_LEN + body_len,
            have: head.len(),
        });
    }

    let body = postcard::from_bytes(&head[HEADER_LEN..HEADER_LEN + body_len])?;
    let status = status_code_from(status_byte)?;

    let payload = if payload_len == 0 {
        Bytes::new()
    } else if payload_off != 0 {
        // FullCopy: payload lives inside the frame at the recorded offset.
        let off = payload_off as usize;
        if off + payload_len > head.len() {
            return Err(CodecError::PayloadRange {
                off: payload_off,
                len: payload_len as u32,
            });
        }
        head.slice(off..off + payload_len)
    } else {
        // Append: payload was handed over as a detached region.
        if frame.payload.len() != payload_len {
            return Err(CodecError::PayloadRange {
                off: 0,
                len: payload_len as u32,
            });
        }
        frame.payload.clone()
    };

    let msg = PolicyMsg {
        id,
        src,
        dst,
        flags,
        status,
        body,
        payload,
    };
    if msg.kind() as u8 != kind_byte {
        return Err(CodecError::KindMismatch {
            header: kind_byte,
            body: msg.kind(),
        });
    }
    Ok(msg)
}

fn status_code_from(byte: u8) -> Result<StatusCode, CodecError> {
    Ok(match byte {
        0 => StatusCode::Ok,
        1 => StatusCode::NoMemory,
        2 => StatusCode::InvalidArg,
        3 => StatusCode::NotSupported,
        4 => StatusCode::Busy,
        5 => StatusCode::Pending,
        6 => StatusCode::Access,
        7 => StatusCode::GuidExists,
        8 => StatusCode::NotFound,
        9 => StatusCode::NotPermitted,
        other => return Err(CodecError::BadStatus { found: other }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{MsgBody, TaskProps, WorkType};
    use weft_types::{DbAccessMode, DbFlags, Guid, GuidKind, Hint};

    fn acquire_response() -> PolicyMsg {
        let mut msg = PolicyMsg::request_response(
            MsgId(11),
            Location(1),
            MsgBody::DbAcquire {
                guid: Guid::encode(GuidKind::Datablock, Location(0), 4),
                edt: Guid::encode(GuidKind::Task, Location(1), 9),
                edt_slot: 2,
                mode: DbAccessMode::ReadWrite,
                flags: DbFlags::FETCH,
                size: 4,
            },
        );
        msg.dst = Location(0);
        msg.respond(StatusCode::Ok);
        msg.payload = Bytes::from_static(&[1, 2, 3, 4]);
        msg
    }

    fn work_create() -> PolicyMsg {
        PolicyMsg::request(
            MsgId(3),
            Location(0),
            MsgBody::WorkCreate {
                guid: Guid::NULL,
                template: Guid::encode(GuidKind::TaskTemplate, Location(0), 1),
                work_type: WorkType::User,
                paramc: 2,
                depc: 1,
                paramv: vec![10, 20],
                depv: vec![Guid::encode(GuidKind::Datablock, Location(0), 4)],
                props: TaskProps::OUTPUT_EVENT,
                hint: Hint::new(),
                output_event: Guid::NULL,
                parent_latch: Guid::NULL,
                current_edt: Guid::NULL,
            },
        )
    }

    #[test]
    fn full_copy_round_trip_is_structural_identity() {
        for msg in [acquire_response(), work_create()] {
            let frame = encode(&msg, MarshalMode::FullCopy).unwrap();
            assert!(frame.is_self_contained());
            let back = decode(&frame).unwrap();
            assert_eq!(back, msg);
        }
    }

    #[test]
    fn append_round_trip_shares_the_payload_allocation() {
        let msg = acquire_response();
        let frame = encode(&msg, MarshalMode::Append).unwrap();
        assert!(!frame.is_self_contained());
        assert_eq!(frame.payload.as_ptr(), msg.payload.as_ptr());
        let back = decode(&frame).unwrap();
        assert_eq!(back, msg);
        assert_eq!(back.payload.as_ptr(), msg.payload.as_ptr());
    }

    #[test]
    fn append_collapses_to_a_sendable_buffer() {
        let msg = acquire_response();
        let frame = encode(&msg, MarshalMode::Append).unwrap();
        let useful = frame.useful_size();
        let contiguous = frame.into_contiguous();
        assert_eq!(contiguous.len(), useful);
    }

    #[test]
    fn capacity_reservation_keeps_size_invariant() {
        let msg = work_create();
        let frame = encode_with_capacity(&msg, MarshalMode::FullCopy, 4096).unwrap();
        // useful_size and buffer_size sit right after the 24-byte envelope.
        let mut cursor = &frame.head[24..];
        let useful = cursor.get_u32_le();
        let buffer = cursor.get_u32_le();
        assert!(useful <= buffer);
        assert_eq!(buffer, 4096);
        assert_eq!(decode(&frame).unwrap(), msg);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let msg = work_create();
        let frame = encode(&msg, MarshalMode::FullCopy).unwrap();
        let mut corrupted = BytesMut::from(&frame.head[..]);
        corrupted[0] ^= 0xFF;
        let bad = Frame {
            head: corrupted.freeze(),
            payload: Bytes::new(),
        };
        assert!(matches!(decode(&bad), Err(CodecError::BadMagic { .. })));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let msg = work_create();
        let frame = encode(&msg, MarshalMode::FullCopy).unwrap();
        let bad = Frame {
            head: frame.head.slice(..HEADER_LEN + 2),
            payload: Bytes::new(),
        };
        assert!(matches!(decode(&bad), Err(CodecError::Truncated { .. })));
    }
}
