//! Proxy cache for foreign datablocks.
//!
//! A proxy exists only on non-home domains. Its lifecycle:
//!
//! `Created` → registered, no payload; the first acquire turns into a fetch.
//! `Fetch` → outbound acquire in flight; compatible acquires queue.
//! `Run` → payload cached; identical-mode acquires are served locally.
//! `Relinquish` → outbound release in flight; acquires queue until it lands.
//!
//! All transitions of one proxy are serialised under its internal lock. The
//! table lock (the map shard) guards lookup/insert/evict and the reference
//! count; it is never held while posting to the transport — every method
//! here returns the messages the caller must route after unlocking.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};

use crate::db::DbHandle;
use weft_proto::{MsgBody, PolicyMsg};
use weft_types::{DbAccessMode, DbFlags, Guid, StatusCode};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProxyState {
    Created,
    Fetch,
    Run,
    Relinquish,
}

struct ProxyInner {
    state: ProxyState,
    nb_users: u32,
    mode: DbAccessMode,
    size: u64,
    flags: DbFlags,
    /// Cached payload storage, reused across fetches of the same block.
    data: Arc<RwLock<Vec<u8>>>,
    /// Acquire requests stalled until the proxy can serve them.
    queue: Vec<PolicyMsg>,
}

pub struct ProxyDb {
    pub guid: Guid,
    /// Outstanding table handles; evicting requires this to be exactly the
    /// caller's own reference and the queue to be empty.
    ref_count: AtomicU32,
    inner: Mutex<ProxyInner>,
}

impl ProxyDb {
    fn new(guid: Guid) -> Self {
        Self {
            guid,
            ref_count: AtomicU32::new(0),
            inner: Mutex::new(ProxyInner {
                state: ProxyState::Created,
                nb_users: 0,
                mode: DbAccessMode::ReadWrite,
                size: 0,
                flags: DbFlags::empty(),
                data: Arc::new(RwLock::new(Vec::new())),
                queue: Vec::new(),
            }),
        }
    }

    pub fn state(&self) -> ProxyState {
        self.inner.lock().state
    }

    pub fn users(&self) -> u32 {
        self.inner.lock().nb_users
    }

    fn handle_locked(&self, inner: &ProxyInner) -> DbHandle {
        DbHandle::new(self.guid, inner.size, inner.mode, inner.data.clone())
    }
}

/// What the router must do after an outbound acquire hit the proxy table.
#[derive(Debug)]
pub enum AcquireAction {
    /// Cache hit; the message was flipped into a local response.
    Served,
    /// Proxy moved `Created → Fetch`; send the (now FETCH-flagged) message.
    SendFetch,
    /// Stalled; a copy was queued and the caller reports `EPEND`.
    Enqueued,
}

/// What the router must do after an outbound release hit the proxy table.
#[derive(Debug, PartialEq, Eq)]
pub enum ReleaseAction {
    /// Other local users remain; the message was flipped into a response.
    LocalResponse,
    /// Last user: proxy moved `Run → Relinquish`; send the message home.
    SendRelease,
}

#[derive(Default)]
pub struct ProxyDbTable {
    proxies: DashMap<Guid, Arc<ProxyDb>>,
}

impl ProxyDbTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, guid: Guid, create: bool) -> Option<Arc<ProxyDb>> {
        if create {
            let entry = self
                .proxies
                .entry(guid)
                .or_insert_with(|| Arc::new(ProxyDb::new(guid)));
            entry.ref_count.fetch_add(1, Ordering::AcqRel);
            Some(entry.clone())
        } else {
            let entry = self.proxies.get(&guid)?;
            entry.ref_count.fetch_add(1, Ordering::AcqRel);
            Some(entry.clone())
        }
    }

    fn put(&self, proxy: &Arc<ProxyDb>) {
        proxy.ref_count.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn contains(&self, guid: Guid) -> bool {
        self.proxies.contains_key(&guid)
    }

    /// Payload handle of a proxy currently able to serve readers.
    pub fn handle(&self, guid: Guid) -> Option<DbHandle> {
        let proxy = self.proxies.get(&guid)?;
        let inner = proxy.inner.lock();
        Some(proxy.handle_locked(&inner))
    }

    /// Route an outbound `DB_ACQUIRE` through the proxy state machine.
    pub fn acquire(&self, msg: &mut PolicyMsg) -> AcquireAction {
        let MsgBody::DbAcquire { guid, mode, .. } = msg.body else {
            unreachable!("proxy acquire on a non-acquire message");
        };
        let proxy = self
            .get(guid, true)
            .expect("create-if-absent always yields a proxy");
        let mut inner = proxy.inner.lock();
        let action = match inner.state {
            ProxyState::Created => {
                inner.state = ProxyState::Fetch;
                if let MsgBody::DbAcquire { flags, .. } = &mut msg.body {
                    flags.insert(DbFlags::FETCH);
                }
                tracing::debug!(db = %guid, ?mode, "Proxy acquire: creation fetch");
                AcquireAction::SendFetch
            }
            ProxyState::Run if mode.proxy_reuse_ok(inner.mode) => {
                inner.nb_users += 1;
                fill_acquire_response(msg, &inner);
                msg.respond_local(StatusCode::Ok);
                tracing::debug!(db = %guid, users = inner.nb_users, "Proxy acquire: cache hit");
                AcquireAction::Served
            }
            ProxyState::Run | ProxyState::Fetch | ProxyState::Relinquish => {
                inner.queue.push(msg.clone());
                tracing::debug!(db = %guid, state = ?inner.state, "Proxy acquire: enqueued");
                AcquireAction::Enqueued
            }
        };
        drop(inner);
        self.put(&proxy);
        action
    }

    /// Process an incoming acquire response (only valid in `Fetch`).
    ///
    /// Fills the cache, transitions to `Run`, then drains every queued
    /// acquire whose mode matches the freshly cached one. Returns those
    /// served messages, each already flipped into a local response; the
    /// caller completes them once the proxy lock is long gone. The initiator
    /// of the fetch is accounted as the first user.
    pub fn on_acquire_response(&self, msg: &mut PolicyMsg) -> Result<Vec<PolicyMsg>, StatusCode> {
        let MsgBody::DbAcquire { guid, mode, size, .. } = msg.body else {
            return Err(StatusCode::InvalidArg);
        };
        let Some(proxy) = self.get(guid, false) else {
            // A response without a proxy means the protocol broke.
            return Err(StatusCode::InvalidArg);
        };
        let mut inner = proxy.inner.lock();
        if inner.state != ProxyState::Fetch {
            drop(inner);
            self.put(&proxy);
            return Err(StatusCode::InvalidArg);
        }

        let mut flags = match &mut msg.body {
            MsgBody::DbAcquire { flags, .. } => {
                flags.remove(DbFlags::FETCH);
                *flags
            }
            _ => DbFlags::empty(),
        };
        if mode.wants_write_back(flags.contains(DbFlags::SINGLE_ASSIGNMENT)) {
            flags.insert(DbFlags::WRITE_BACK);
        }

        // Blocks do not resize; reuse the cached allocation on a refetch.
        debug_assert!(inner.size == 0 || inner.size == size);
        inner.state = ProxyState::Run;
        inner.nb_users = 1;
        inner.mode = mode;
        inner.size = size;
        inner.flags = flags;
        {
            let mut data = inner.data.write();
            data.clear();
            data.extend_from_slice(&msg.payload);
        }
        if let MsgBody::DbAcquire { flags: f, .. } = &mut msg.body {
            *f = flags;
        }
        tracing::debug!(db = %guid, ?mode, size, "Proxy fetch complete, caching payload");

        let mut served = Vec::new();
        let cached_mode = inner.mode;
        let mut idx = 0;
        while idx < inner.queue.len() {
            let queued_mode = match &inner.queue[idx].body {
                MsgBody::DbAcquire { mode, .. } => *mode,
                _ => DbAccessMode::ReadWrite,
            };
            if queued_mode.proxy_reuse_ok(cached_mode) {
                let mut queued = inner.queue.remove(idx);
                inner.nb_users += 1;
                fill_acquire_response(&mut queued, &inner);
                queued.respond_local(StatusCode::Ok);
                served.push(queued);
            } else {
                idx += 1;
            }
        }
        drop(inner);
        self.put(&proxy);
        Ok(served)
    }

    /// Route an outbound `DB_RELEASE` through the proxy state machine.
    ///
    /// `EACCES` with no proxy present: the block was already fully released
    /// by this domain (a double release in user code).
    pub fn release(&self, msg: &mut PolicyMsg) -> Result<ReleaseAction, StatusCode> {
        let MsgBody::DbRelease { guid, .. } = msg.body else {
            return Err(StatusCode::InvalidArg);
        };
        let Some(proxy) = self.get(guid, false) else {
            return Err(StatusCode::Access);
        };
        let mut inner = proxy.inner.lock();
        if inner.state != ProxyState::Run {
            drop(inner);
            self.put(&proxy);
            return Err(StatusCode::InvalidArg);
        }
        let action = if inner.nb_users > 1 {
            inner.nb_users -= 1;
            msg.respond_local(StatusCode::Ok);
            tracing::debug!(db = %guid, users = inner.nb_users, "Proxy release: local");
            ReleaseAction::LocalResponse
        } else {
            inner.state = ProxyState::Relinquish;
            if inner.flags.contains(DbFlags::WRITE_BACK) {
                let bytes = Bytes::from(inner.data.read().clone());
                if let MsgBody::DbRelease { flags, size, .. } = &mut msg.body {
                    flags.insert(DbFlags::WRITE_BACK);
                    *size = inner.size;
                }
                msg.payload = bytes;
            }
            tracing::debug!(
                db = %guid,
                write_back = inner.flags.contains(DbFlags::WRITE_BACK),
                "Proxy release: relinquish"
            );
            ReleaseAction::SendRelease
        };
        drop(inner);
        self.put(&proxy);
        Ok(action)
    }

    /// Process the home's answer to a relinquish.
    ///
    /// With an empty queue and no other table references the proxy is
    /// evicted outright. Otherwise it is reset to `Created` — keeping the
    /// payload allocation for the next fetch — and exactly one queued
    /// acquire is handed back for re-submission; the rest are served
    /// transitively by the fetch that re-submission triggers. Fairness
    /// between the repopped acquire and newly arriving ones is whatever the
    /// proxy lock hands out.
    pub fn on_release_response(&self, guid: Guid) -> Result<Option<PolicyMsg>, StatusCode> {
        let Some(proxy) = self.get(guid, false) else {
            return Err(StatusCode::InvalidArg);
        };
        let mut inner = proxy.inner.lock();
        if inner.state != ProxyState::Relinquish || inner.nb_users != 1 {
            drop(inner);
            self.put(&proxy);
            return Err(StatusCode::InvalidArg);
        }
        inner.nb_users = 0;
        if inner.queue.is_empty() {
            // Our own `get` above holds one reference.
            if proxy.ref_count.load(Ordering::Acquire) == 1 {
                drop(inner);
                self.proxies.remove(&guid);
                tracing::debug!(db = %guid, "Proxy evicted after release");
                return Ok(None);
            }
            reset_to_created(&mut inner);
            drop(inner);
            self.put(&proxy);
            tracing::debug!(db = %guid, "Proxy reset, still referenced");
            return Ok(None);
        }
        reset_to_created(&mut inner);
        let repop = inner.queue.pop();
        drop(inner);
        self.put(&proxy);
        tracing::debug!(db = %guid, "Proxy reset, repopping one queued acquire");
        Ok(repop)
    }

    /// The home refused a fetch (destroyed block): fail the machine back to
    /// `Created` and hand every queued acquire back to the caller so each
    /// can be failed or retried.
    pub fn abort_fetch(&self, guid: Guid) -> Vec<PolicyMsg> {
        let Some(proxy) = self.get(guid, false) else {
            return Vec::new();
        };
        let mut inner = proxy.inner.lock();
        let queued = if inner.state == ProxyState::Fetch {
            inner.state = ProxyState::Created;
            std::mem::take(&mut inner.queue)
        } else {
            Vec::new()
        };
        drop(inner);
        self.put(&proxy);
        queued
    }

    /// Install a proxy for a block this domain just created remotely.
    ///
    /// A remote `DB_CREATE` acquires at the destination on the creator's
    /// behalf, so the proxy starts directly in `Run` with one user and
    /// write-back pre-set: even a single-assignment block must be written
    /// back the first time.
    pub fn adopt_created(
        &self,
        guid: Guid,
        size: u64,
        mode: DbAccessMode,
        mut flags: DbFlags,
    ) -> DbHandle {
        let proxy = Arc::new(ProxyDb::new(guid));
        flags.insert(DbFlags::WRITE_BACK);
        {
            let mut inner = proxy.inner.lock();
            inner.state = ProxyState::Run;
            inner.nb_users = 1;
            inner.mode = mode;
            inner.size = size;
            inner.flags = flags;
            *inner.data.write() = vec![0u8; size as usize];
        }
        let handle = {
            let inner = proxy.inner.lock();
            proxy.handle_locked(&inner)
        };
        self.proxies.insert(guid, proxy);
        tracing::debug!(db = %guid, size, "Adopted remotely created block as Run proxy");
        handle
    }

    pub fn state(&self, guid: Guid) -> Option<ProxyState> {
        self.proxies.get(&guid).map(|p| p.state())
    }

    pub fn users(&self, guid: Guid) -> Option<u32> {
        self.proxies.get(&guid).map(|p| p.users())
    }
}

fn fill_acquire_response(msg: &mut PolicyMsg, inner: &ProxyInner) {
    if let MsgBody::DbAcquire { size, flags, .. } = &mut msg.body {
        *size = inner.size;
        *flags = inner.flags;
    }
}

fn reset_to_created(inner: &mut ProxyInner) {
    inner.state = ProxyState::Created;
    inner.nb_users = 0;
    inner.mode = DbAccessMode::ReadWrite;
    inner.flags = DbFlags::empty();
    // Size and payload storage survive for reuse by the next fetch.
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_proto::{MsgFlags, MsgId};
    use weft_types::{GuidKind, Location};

    fn db_guid() -> Guid {
        Guid::encode(GuidKind::Datablock, Location(0), 3)
    }

    fn acquire_msg(id: u64, mode: DbAccessMode) -> PolicyMsg {
        PolicyMsg::request_response(
            MsgId(id),
            Location(1),
            MsgBody::DbAcquire {
                guid: db_guid(),
                edt: Guid::encode(GuidKind::Task, Location(1), id),
                edt_slot: 0,
                mode,
                flags: DbFlags::empty(),
                size: 0,
            },
        )
    }

    fn release_msg(id: u64) -> PolicyMsg {
        PolicyMsg::request_response(
            MsgId(id),
            Location(1),
            MsgBody::DbRelease {
                guid: db_guid(),
                edt: Guid::encode(GuidKind::Task, Location(1), id),
                flags: DbFlags::empty(),
                size: 0,
            },
        )
    }

    fn respond_fetch(msg: &mut PolicyMsg, payload: &[u8]) {
        msg.respond(StatusCode::Ok);
        if let MsgBody::DbAcquire { size, .. } = &mut msg.body {
            *size = payload.len() as u64;
        }
        msg.payload = Bytes::copy_from_slice(payload);
    }

    #[test]
    fn first_acquire_becomes_a_fetch() {
        let table = ProxyDbTable::new();
        let mut msg = acquire_msg(1, DbAccessMode::ReadWrite);
        assert!(matches!(table.acquire(&mut msg), AcquireAction::SendFetch));
        assert_eq!(table.state(db_guid()), Some(ProxyState::Fetch));
        match msg.body {
            MsgBody::DbAcquire { flags, .. } => assert!(flags.contains(DbFlags::FETCH)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn fetch_response_serves_compatible_queue() {
        let table = ProxyDbTable::new();
        let mut fetch = acquire_msg(1, DbAccessMode::ReadWrite);
        table.acquire(&mut fetch);
        // Two more acquires arrive while the fetch is in flight.
        let mut same_mode = acquire_msg(2, DbAccessMode::ReadWrite);
        let mut other_mode = acquire_msg(3, DbAccessMode::ReadOnly);
        assert!(matches!(table.acquire(&mut same_mode), AcquireAction::Enqueued));
        assert!(matches!(table.acquire(&mut other_mode), AcquireAction::Enqueued));

        respond_fetch(&mut fetch, &[1, 2, 3, 4]);
        let served = table.on_acquire_response(&mut fetch).unwrap();
        assert_eq!(served.len(), 1);
        assert_eq!(served[0].id, MsgId(2));
        assert!(served[0].is_response());
        // Initiator + one compatible queued acquire.
        assert_eq!(table.users(db_guid()), Some(2));
        assert_eq!(table.state(db_guid()), Some(ProxyState::Run));
        assert_eq!(table.handle(db_guid()).unwrap().read(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn run_state_serves_identical_mode_only() {
        let table = ProxyDbTable::new();
        let mut fetch = acquire_msg(1, DbAccessMode::ReadOnly);
        table.acquire(&mut fetch);
        respond_fetch(&mut fetch, &[9]);
        table.on_acquire_response(&mut fetch).unwrap();

        let mut hit = acquire_msg(2, DbAccessMode::ReadOnly);
        assert!(matches!(table.acquire(&mut hit), AcquireAction::Served));
        assert!(hit.is_response());

        let mut miss = acquire_msg(3, DbAccessMode::ReadWrite);
        assert!(matches!(table.acquire(&mut miss), AcquireAction::Enqueued));
    }

    #[test]
    fn exclusive_write_never_reuses_the_cache() {
        let table = ProxyDbTable::new();
        let mut fetch = acquire_msg(1, DbAccessMode::ExclusiveWrite);
        table.acquire(&mut fetch);
        respond_fetch(&mut fetch, &[5]);
        table.on_acquire_response(&mut fetch).unwrap();

        let mut again = acquire_msg(2, DbAccessMode::ExclusiveWrite);
        assert!(matches!(table.acquire(&mut again), AcquireAction::Enqueued));
    }

    #[test]
    fn release_protocol_writes_back_and_evicts() {
        let table = ProxyDbTable::new();
        let mut fetch = acquire_msg(1, DbAccessMode::ReadWrite);
        table.acquire(&mut fetch);
        respond_fetch(&mut fetch, &[0, 0]);
        table.on_acquire_response(&mut fetch).unwrap();
        table.handle(db_guid()).unwrap().write(0, &[7, 8]);

        let mut rel = release_msg(4);
        let action = table.release(&mut rel).unwrap();
        assert!(matches!(action, ReleaseAction::SendRelease));
        assert_eq!(table.state(db_guid()), Some(ProxyState::Relinquish));
        match rel.body {
            MsgBody::DbRelease { flags, size, .. } => {
                assert!(flags.contains(DbFlags::WRITE_BACK));
                assert_eq!(size, 2);
            }
            _ => unreachable!(),
        }
        assert_eq!(&rel.payload[..], &[7, 8]);

        assert!(table.on_release_response(db_guid()).unwrap().is_none());
        assert!(!table.contains(db_guid()));
    }

    #[test]
    fn read_only_release_skips_write_back() {
        let table = ProxyDbTable::new();
        let mut fetch = acquire_msg(1, DbAccessMode::ReadOnly);
        table.acquire(&mut fetch);
        respond_fetch(&mut fetch, &[1]);
        table.on_acquire_response(&mut fetch).unwrap();

        let mut rel = release_msg(2);
        assert!(matches!(
            table.release(&mut rel).unwrap(),
            ReleaseAction::SendRelease
        ));
        assert!(rel.payload.is_empty());
    }

    #[test]
    fn second_user_release_stays_local() {
        let table = ProxyDbTable::new();
        let mut fetch = acquire_msg(1, DbAccessMode::ReadWrite);
        table.acquire(&mut fetch);
        respond_fetch(&mut fetch, &[1]);
        table.on_acquire_response(&mut fetch).unwrap();
        let mut hit = acquire_msg(2, DbAccessMode::ReadWrite);
        table.acquire(&mut hit);
        assert_eq!(table.users(db_guid()), Some(2));

        let mut rel = release_msg(3);
        assert!(matches!(
            table.release(&mut rel).unwrap(),
            ReleaseAction::LocalResponse
        ));
        assert_eq!(table.users(db_guid()), Some(1));
        assert!(rel.is_response());
        assert!(!rel.flags.contains(MsgFlags::REQUEST));
    }

    #[test]
    fn release_with_queued_acquire_resets_and_repops_once() {
        let table = ProxyDbTable::new();
        let mut fetch = acquire_msg(1, DbAccessMode::ReadWrite);
        table.acquire(&mut fetch);
        respond_fetch(&mut fetch, &[1]);
        table.on_acquire_response(&mut fetch).unwrap();
        // Incompatible acquire parks in the queue.
        let mut parked = acquire_msg(2, DbAccessMode::ReadOnly);
        table.acquire(&mut parked);

        let mut rel = release_msg(3);
        assert!(matches!(
            table.release(&mut rel).unwrap(),
            ReleaseAction::SendRelease
        ));
        let repop = table.on_release_response(db_guid()).unwrap();
        assert_eq!(repop.unwrap().id, MsgId(2));
        assert_eq!(table.state(db_guid()), Some(ProxyState::Created));
        // The repop happens exactly once; the queue is now empty.
        assert!(table.on_release_response(db_guid()).is_err());
    }

    #[test]
    fn double_release_reports_access_error() {
        let table = ProxyDbTable::new();
        let mut rel = release_msg(1);
        assert_eq!(table.release(&mut rel), Err(StatusCode::Access));
    }

    #[test]
    fn adopted_block_behaves_like_a_running_proxy() {
        let table = ProxyDbTable::new();
        let guid = db_guid();
        let handle = table.adopt_created(guid, 8, DbAccessMode::ReadWrite, DbFlags::empty());
        assert_eq!(table.state(guid), Some(ProxyState::Run));
        assert_eq!(table.users(guid), Some(1));
        handle.write_u64(0, 42);
        let mut rel = release_msg(1);
        assert!(matches!(
            table.release(&mut rel).unwrap(),
            ReleaseAction::SendRelease
        ));
        assert_eq!(rel.payload.len(), 8);
    }
}
