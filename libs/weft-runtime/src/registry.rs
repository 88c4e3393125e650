//! Process-local GUID registry.
//!
//! Maps every GUID this domain has heard of to a tagged binding: the owned
//! metadata record when the object lives here, or `RemoteOnly` when only the
//! identity is known. Proxy records are owned by their dedicated tables, not
//! by the registry. Lock order across the engine is registry → proxy; no
//! registry method calls into a proxy table.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::db::DataBlock;
use crate::event::EventRecord;
use crate::task::{TaskRecord, TemplateRecord};
use weft_types::{Guid, GuidKind, Location, StatusCode};

/// What a registered GUID resolves to on this domain.
#[derive(Clone)]
pub enum Binding {
    Db(Arc<DataBlock>),
    Event(Arc<EventRecord>),
    Task(Arc<TaskRecord>),
    Template(Arc<TemplateRecord>),
    /// Known identity, no local materialisation.
    RemoteOnly,
}

impl Binding {
    fn same_target(&self, other: &Binding) -> bool {
        match (self, other) {
            (Binding::Db(a), Binding::Db(b)) => Arc::ptr_eq(a, b),
            (Binding::Event(a), Binding::Event(b)) => Arc::ptr_eq(a, b),
            (Binding::Task(a), Binding::Task(b)) => Arc::ptr_eq(a, b),
            (Binding::Template(a), Binding::Template(b)) => Arc::ptr_eq(a, b),
            (Binding::RemoteOnly, Binding::RemoteOnly) => true,
            _ => false,
        }
    }
}

/// A reserved labeled range: `count` slots starting at `start`, one serial
/// apart. Slots bind at most once per epoch; unreserving opens a new epoch.
#[derive(Clone, Copy, Debug)]
pub struct LabeledRange {
    pub start: Guid,
    pub stride: u64,
    pub count: u64,
}

/// Sharded GUID → binding table plus the domain's GUID mint.
pub struct GuidRegistry {
    home: Location,
    bindings: DashMap<Guid, Binding>,
    next_serial: AtomicU64,
    ranges: Mutex<Vec<LabeledRange>>,
}

impl GuidRegistry {
    pub fn new(home: Location) -> Self {
        Self {
            home,
            bindings: DashMap::new(),
            // Serial 0 is never minted so a zeroed GUID stays the null sentinel.
            next_serial: AtomicU64::new(1),
            ranges: Mutex::new(Vec::new()),
        }
    }

    /// Mint a fresh GUID homed on this domain.
    pub fn mint(&self, kind: GuidKind) -> Guid {
        let serial = self.next_serial.fetch_add(1, Ordering::Relaxed);
        Guid::encode(kind, self.home, serial)
    }

    /// Reserve a contiguous labeled range of `count` GUIDs of `kind`.
    pub fn reserve(&self, kind: GuidKind, count: u64) -> LabeledRange {
        let first = self.next_serial.fetch_add(count.max(1), Ordering::Relaxed);
        let range = LabeledRange {
            start: Guid::encode(kind, self.home, first),
            stride: 1,
            count,
        };
        self.ranges.lock().push(range);
        tracing::debug!(start = %range.start, count, "Reserved labeled GUID range");
        range
    }

    /// Drop the bindings of a previously reserved range.
    pub fn unreserve(&self, start: Guid, count: u64) {
        let mut ranges = self.ranges.lock();
        ranges.retain(|r| r.start != start);
        drop(ranges);
        let Ok(kind) = start.kind() else { return };
        for i in 0..count {
            let guid = Guid::encode(kind, start.location(), start.serial() + i);
            self.bindings.remove(&guid);
        }
    }

    /// Bind `guid` to local metadata or a remote identity.
    ///
    /// Concurrent registration of the same binding is idempotent; a
    /// conflicting binding fails with `EGUIDEXISTS`. Upgrading a
    /// `RemoteOnly` marker to a real binding is allowed.
    pub fn register(&self, guid: Guid, binding: Binding) -> Result<(), StatusCode> {
        if guid.is_null() || guid.is_uninitialized() {
            return Err(StatusCode::InvalidArg);
        }
        match self.bindings.entry(guid) {
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(binding);
                Ok(())
            }
            dashmap::mapref::entry::Entry::Occupied(mut slot) => {
                if slot.get().same_target(&binding) {
                    Ok(())
                } else if matches!(slot.get(), Binding::RemoteOnly) {
                    slot.insert(binding);
                    Ok(())
                } else {
                    Err(StatusCode::GuidExists)
                }
            }
        }
    }

    /// Non-blocking lookup; `None` when the GUID was never registered here.
    pub fn lookup(&self, guid: Guid) -> Option<Binding> {
        self.bindings.get(&guid).map(|entry| entry.value().clone())
    }

    pub fn lookup_db(&self, guid: Guid) -> Option<Arc<DataBlock>> {
        match self.lookup(guid) {
            Some(Binding::Db(db)) => Some(db),
            _ => None,
        }
    }

    pub fn lookup_event(&self, guid: Guid) -> Option<Arc<EventRecord>> {
        match self.lookup(guid) {
            Some(Binding::Event(evt)) => Some(evt),
            _ => None,
        }
    }

    pub fn lookup_task(&self, guid: Guid) -> Option<Arc<TaskRecord>> {
        match self.lookup(guid) {
            Some(Binding::Task(task)) => Some(task),
            _ => None,
        }
    }

    pub fn lookup_template(&self, guid: Guid) -> Option<Arc<TemplateRecord>> {
        match self.lookup(guid) {
            Some(Binding::Template(tpl)) => Some(tpl),
            _ => None,
        }
    }

    /// Home location, decoded from the GUID bits.
    pub fn location_of(&self, guid: Guid) -> Location {
        guid.location()
    }

    /// Whether the GUID's canonical metadata lives on this domain.
    pub fn is_home(&self, guid: Guid) -> bool {
        guid.location() == self.home
    }

    /// Remove the binding; used on destroy and on proxy eviction.
    pub fn unregister(&self, guid: Guid) -> Option<Binding> {
        self.bindings.remove(&guid).map(|(_, b)| b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> GuidRegistry {
        GuidRegistry::new(Location(0))
    }

    #[test]
    fn mint_encodes_kind_and_home() {
        let reg = registry();
        let g = reg.mint(GuidKind::Datablock);
        assert_eq!(g.kind().unwrap(), GuidKind::Datablock);
        assert_eq!(g.location(), Location(0));
        assert!(reg.is_home(g));
    }

    #[test]
    fn register_is_idempotent_for_identical_bindings() {
        let reg = registry();
        let g = reg.mint(GuidKind::EventSticky);
        let evt = Arc::new(EventRecord::sticky(g));
        assert!(reg.register(g, Binding::Event(evt.clone())).is_ok());
        assert!(reg.register(g, Binding::Event(evt)).is_ok());
    }

    #[test]
    fn conflicting_register_fails_guid_exists() {
        let reg = registry();
        let g = reg.mint(GuidKind::EventSticky);
        let a = Arc::new(EventRecord::sticky(g));
        let b = Arc::new(EventRecord::sticky(g));
        assert!(reg.register(g, Binding::Event(a)).is_ok());
        assert_eq!(
            reg.register(g, Binding::Event(b)),
            Err(StatusCode::GuidExists)
        );
    }

    #[test]
    fn remote_only_upgrades_to_real_binding() {
        let reg = registry();
        let g = reg.mint(GuidKind::EventSticky);
        assert!(reg.register(g, Binding::RemoteOnly).is_ok());
        let evt = Arc::new(EventRecord::sticky(g));
        assert!(reg.register(g, Binding::Event(evt)).is_ok());
        assert!(reg.lookup_event(g).is_some());
    }

    #[test]
    fn labeled_range_slots_are_distinct_and_reusable_after_unreserve() {
        let reg = registry();
        let range = reg.reserve(GuidKind::EventSticky, 4);
        let slot0 = range.start;
        let slot1 = Guid::encode(
            GuidKind::EventSticky,
            slot0.location(),
            slot0.serial() + range.stride,
        );
        assert_ne!(slot0, slot1);
        assert!(reg.register(slot0, Binding::RemoteOnly).is_ok());
        reg.unreserve(range.start, range.count);
        assert!(reg.lookup(slot0).is_none());
    }

    #[test]
    fn null_guid_cannot_bind() {
        let reg = registry();
        assert_eq!(
            reg.register(Guid::NULL, Binding::RemoteOnly),
            Err(StatusCode::InvalidArg)
        );
    }
}
