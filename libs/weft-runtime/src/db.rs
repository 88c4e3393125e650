//! Locally-owned datablocks.
//!
//! A block's canonical metadata and payload live on its creator's domain;
//! every other domain sees it through a proxy. Exclusive-write acquires are
//! serialised here at the home: a contender parks its acquire message on the
//! block and is replayed by the next release.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use weft_proto::PolicyMsg;
use weft_types::{DbAccessMode, DbFlags, Guid, Hint, Location, StatusCode};

/// Shared handle onto a block's (or proxy's) payload storage.
#[derive(Clone, Debug)]
pub struct DbHandle {
    pub guid: Guid,
    pub size: u64,
    pub mode: DbAccessMode,
    data: Arc<RwLock<Vec<u8>>>,
}

impl PartialEq for DbHandle {
    fn eq(&self, other: &Self) -> bool {
        self.guid == other.guid
            && self.size == other.size
            && self.mode == other.mode
            && *self.data.read() == *other.data.read()
    }
}

impl DbHandle {
    pub fn new(guid: Guid, size: u64, mode: DbAccessMode, data: Arc<RwLock<Vec<u8>>>) -> Self {
        Self {
            guid,
            size,
            mode,
            data,
        }
    }

    pub fn read(&self) -> Vec<u8> {
        self.data.read().clone()
    }

    pub fn read_bytes(&self) -> Bytes {
        Bytes::from(self.data.read().clone())
    }

    pub fn write(&self, offset: usize, bytes: &[u8]) {
        let mut data = self.data.write();
        let end = offset + bytes.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[offset..end].copy_from_slice(bytes);
    }

    pub fn write_u64(&self, offset: usize, value: u64) {
        self.write(offset, &value.to_le_bytes());
    }

    pub fn read_u64(&self, offset: usize) -> u64 {
        let data = self.data.read();
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&data[offset..offset + 8]);
        u64::from_le_bytes(buf)
    }
}

struct DbState {
    flags: DbFlags,
    dead: bool,
    acquirers: Vec<(Guid, DbAccessMode)>,
    /// Exclusive-write contenders parked until the block drains.
    parked: Vec<PolicyMsg>,
}

/// Canonical metadata of a block owned by this domain.
pub struct DataBlock {
    pub guid: Guid,
    pub size: u64,
    pub creator: Location,
    data: Arc<RwLock<Vec<u8>>>,
    state: Mutex<DbState>,
    hint: Mutex<Hint>,
}

impl DataBlock {
    pub fn new(guid: Guid, size: u64, flags: DbFlags, hint: Hint, creator: Location) -> Self {
        Self {
            guid,
            size,
            creator,
            data: Arc::new(RwLock::new(vec![0u8; size as usize])),
            state: Mutex::new(DbState {
                flags,
                dead: false,
                acquirers: Vec::new(),
                parked: Vec::new(),
            }),
            hint: Mutex::new(hint),
        }
    }

    pub fn flags(&self) -> DbFlags {
        self.state.lock().flags
    }

    pub fn hint(&self) -> Hint {
        self.hint.lock().clone()
    }

    pub fn set_hint(&self, hint: Hint) {
        *self.hint.lock() = hint;
    }

    pub fn handle(&self, mode: DbAccessMode) -> DbHandle {
        DbHandle::new(self.guid, self.size, mode, self.data.clone())
    }

    pub fn payload_bytes(&self) -> Bytes {
        Bytes::from(self.data.read().clone())
    }

    /// Overwrite the canonical payload with bytes carried home by a release.
    pub fn write_back(&self, bytes: &[u8]) {
        let mut data = self.data.write();
        let len = bytes.len().min(data.len());
        data[..len].copy_from_slice(&bytes[..len]);
    }

    /// Grant an acquire or report why it cannot be granted now.
    ///
    /// `Busy` means the caller should park its message via [`Self::park`];
    /// `InvalidArg` means the block is already destroyed.
    pub fn try_acquire(&self, edt: Guid, mode: DbAccessMode) -> Result<DbHandle, StatusCode> {
        let mut state = self.state.lock();
        if state.dead {
            return Err(StatusCode::InvalidArg);
        }
        let exclusive_held = state
            .acquirers
            .iter()
            .any(|(_, m)| *m == DbAccessMode::ExclusiveWrite);
        if exclusive_held || (mode == DbAccessMode::ExclusiveWrite && !state.acquirers.is_empty())
        {
            return Err(StatusCode::Busy);
        }
        state.acquirers.push((edt, mode));
        Ok(self.handle(mode))
    }

    /// Park a contending acquire message for replay on the next release.
    pub fn park(&self, msg: PolicyMsg) {
        self.state.lock().parked.push(msg);
    }

    /// Drop an acquirer; returns one parked acquire to replay, if any.
    ///
    /// A release by a non-acquirer is a double release (`EACCES`).
    pub fn release(&self, edt: Guid) -> Result<Option<PolicyMsg>, StatusCode> {
        let mut state = self.state.lock();
        let Some(idx) = state.acquirers.iter().position(|(g, _)| *g == edt) else {
            return Err(StatusCode::Access);
        };
        state.acquirers.swap_remove(idx);
        if state.acquirers.is_empty() && !state.parked.is_empty() {
            return Ok(Some(state.parked.remove(0)));
        }
        Ok(None)
    }

    /// Mark destroyed. Outstanding handles stay valid; new acquires fail.
    pub fn destroy(&self) {
        self.state.lock().dead = true;
    }

    pub fn is_dead(&self) -> bool {
        self.state.lock().dead
    }

    pub fn acquirer_count(&self) -> usize {
        self.state.lock().acquirers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::GuidKind;

    fn block() -> DataBlock {
        let guid = Guid::encode(GuidKind::Datablock, Location(0), 1);
        DataBlock::new(guid, 16, DbFlags::empty(), Hint::new(), Location(0))
    }

    fn edt(serial: u64) -> Guid {
        Guid::encode(GuidKind::Task, Location(0), serial)
    }

    #[test]
    fn concurrent_shared_acquires_are_granted() {
        let db = block();
        db.try_acquire(edt(1), DbAccessMode::ReadOnly).unwrap();
        db.try_acquire(edt(2), DbAccessMode::ReadWrite).unwrap();
        assert_eq!(db.acquirer_count(), 2);
    }

    #[test]
    fn exclusive_write_waits_for_drain() {
        let db = block();
        db.try_acquire(edt(1), DbAccessMode::ReadWrite).unwrap();
        assert_eq!(
            db.try_acquire(edt(2), DbAccessMode::ExclusiveWrite),
            Err(StatusCode::Busy)
        );
        db.release(edt(1)).unwrap();
        db.try_acquire(edt(2), DbAccessMode::ExclusiveWrite).unwrap();
        // While EW is held nothing else gets in.
        assert_eq!(
            db.try_acquire(edt(3), DbAccessMode::ReadOnly),
            Err(StatusCode::Busy)
        );
    }

    #[test]
    fn double_release_is_access_error() {
        let db = block();
        db.try_acquire(edt(1), DbAccessMode::ReadWrite).unwrap();
        db.release(edt(1)).unwrap();
        assert_eq!(db.release(edt(1)), Err(StatusCode::Access));
    }

    #[test]
    fn destroyed_block_rejects_new_acquires() {
        let db = block();
        db.destroy();
        assert_eq!(
            db.try_acquire(edt(1), DbAccessMode::ReadOnly),
            Err(StatusCode::InvalidArg)
        );
    }

    #[test]
    fn handle_reads_observe_write_back() {
        let db = block();
        let handle = db.try_acquire(edt(1), DbAccessMode::ReadOnly).unwrap();
        db.write_back(&[7u8; 16]);
        assert_eq!(handle.read()[0], 7);
        assert_eq!(handle.read().len(), 16);
    }
}
