//! Affinity-driven placement of locally-originated messages.
//!
//! The oracle only ever touches a message whose source *and* destination are
//! still this domain — once a peer directed a message at us, placement is
//! fixed. User task creations and datablock creations honour their affinity
//! hint when present and round-robin over the affinity set otherwise.
//! Everything keyed by a subject GUID follows that GUID's home.

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;

use weft_proto::{MsgBody, PolicyMsg, WorkType};
use weft_types::{Guid, HintKey, Location};

/// The set of policy-domain affinity GUIDs, indexed by rank.
pub struct PlacementOracle {
    home: Location,
    affinities: ArcSwap<Vec<Guid>>,
    last_placement_index: Mutex<usize>,
}

impl PlacementOracle {
    pub fn new(home: Location, affinities: Vec<Guid>) -> Self {
        Self {
            home,
            affinities: ArcSwap::from_pointee(affinities),
            last_placement_index: Mutex::new(0),
        }
    }

    /// Replace the affinity set (topology changes at bring-up only).
    pub fn publish(&self, affinities: Vec<Guid>) {
        self.affinities.store(Arc::new(affinities));
    }

    pub fn affinity_count(&self) -> usize {
        self.affinities.load().len()
    }

    /// Affinity GUID representing policy domain `rank`.
    pub fn affinity_at(&self, rank: usize) -> Option<Guid> {
        self.affinities.load().get(rank).copied()
    }

    /// Every peer location except this domain.
    pub fn neighbors(&self) -> Vec<Location> {
        self.affinities
            .load()
            .iter()
            .map(|g| g.location())
            .filter(|loc| *loc != self.home)
            .collect()
    }

    fn next_round_robin(&self) -> Option<Location> {
        let affinities = self.affinities.load();
        if affinities.is_empty() {
            return None;
        }
        let mut index = self.last_placement_index.lock();
        let chosen = affinities[*index % affinities.len()];
        *index = (*index + 1) % affinities.len();
        Some(chosen.location())
    }

    /// Decide the destination of a locally-originated message.
    pub fn place(&self, msg: &mut PolicyMsg) {
        if msg.src != self.home || msg.dst != self.home {
            // Incoming or already-placed messages are never moved.
            return;
        }
        let dst = match &msg.body {
            MsgBody::WorkCreate {
                work_type: WorkType::User,
                hint,
                ..
            } => match hint.affinity(HintKey::EdtAffinity) {
                Some(aff) => Some(aff.location()),
                None => self.next_round_robin(),
            },
            // Runtime-internal tasks always run where they were asked for.
            MsgBody::WorkCreate {
                work_type: WorkType::Runtime,
                ..
            } => None,
            MsgBody::DbCreate { hint, .. } => match hint.affinity(HintKey::DbAffinity) {
                Some(aff) => Some(aff.location()),
                None => self.next_round_robin(),
            },
            // Subject-homed operations.
            MsgBody::DbDestroy { guid }
            | MsgBody::DbFree { guid, .. }
            | MsgBody::DbAcquire { guid, .. }
            | MsgBody::DbRelease { guid, .. }
            | MsgBody::EvtDestroy { guid }
            | MsgBody::EvtSatisfy { guid, .. }
            | MsgBody::EvtGet { guid, .. }
            | MsgBody::DepSatisfy { guid, .. }
            | MsgBody::WorkDestroy { guid }
            | MsgBody::EdtTempDestroy { guid }
            | MsgBody::HintSet { guid, .. }
            | MsgBody::HintGet { guid, .. }
            | MsgBody::MetadataClone { guid, .. } => Some(guid.location()),
            // Dependence edges follow the destination object's home.
            MsgBody::DepAdd { dest, .. }
            | MsgBody::DepRegSignaler { dest, .. }
            | MsgBody::DepRegWaiter { dest, .. } => Some(dest.location()),
            // Labeled event creation must happen at the label's home.
            MsgBody::EvtCreate { guid, .. } if !guid.is_null() => Some(guid.location()),
            _ => None,
        };
        if let Some(dst) = dst {
            if dst != msg.dst {
                tracing::trace!(kind = ?msg.kind(), %dst, "Placed message");
                msg.dst = dst;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_proto::{MsgId, TaskProps};
    use weft_types::{DbAccessMode, DbFlags, GuidKind, GuidProps, Hint};

    fn affinities(n: u32) -> Vec<Guid> {
        (0..n)
            .map(|r| Guid::encode(GuidKind::Affinity, Location(r), u64::from(r) + 1))
            .collect()
    }

    fn work_create(at: Location, hint: Hint) -> PolicyMsg {
        PolicyMsg::request_response(
            MsgId(1),
            at,
            MsgBody::WorkCreate {
                guid: Guid::NULL,
                template: Guid::encode(GuidKind::TaskTemplate, Location(0), 1),
                work_type: WorkType::User,
                paramc: 0,
                depc: 0,
                paramv: vec![],
                depv: vec![],
                props: TaskProps::empty(),
                hint,
                output_event: Guid::NULL,
                parent_latch: Guid::NULL,
                current_edt: Guid::NULL,
            },
        )
    }

    #[test]
    fn hinted_creation_goes_to_the_affinity_home() {
        let oracle = PlacementOracle::new(Location(0), affinities(3));
        let mut hint = Hint::new();
        hint.set_affinity(HintKey::EdtAffinity, oracle.affinity_at(2).unwrap());
        let mut msg = work_create(Location(0), hint);
        oracle.place(&mut msg);
        assert_eq!(msg.dst, Location(2));
    }

    #[test]
    fn hintless_user_tasks_round_robin() {
        let oracle = PlacementOracle::new(Location(0), affinities(3));
        let destinations: Vec<Location> = (0..4)
            .map(|_| {
                let mut msg = work_create(Location(0), Hint::new());
                oracle.place(&mut msg);
                msg.dst
            })
            .collect();
        assert_eq!(
            destinations,
            vec![Location(0), Location(1), Location(2), Location(0)]
        );
    }

    #[test]
    fn incoming_messages_are_never_replaced() {
        let oracle = PlacementOracle::new(Location(1), affinities(3));
        let mut msg = work_create(Location(0), Hint::new());
        msg.dst = Location(1);
        oracle.place(&mut msg);
        assert_eq!(msg.dst, Location(1));
    }

    #[test]
    fn subject_operations_follow_the_guid_home() {
        let oracle = PlacementOracle::new(Location(0), affinities(3));
        let guid = Guid::encode(GuidKind::Datablock, Location(2), 9);
        let mut msg = PolicyMsg::request_response(
            MsgId(2),
            Location(0),
            MsgBody::DbAcquire {
                guid,
                edt: Guid::NULL,
                edt_slot: 0,
                mode: DbAccessMode::ReadOnly,
                flags: DbFlags::empty(),
                size: 0,
            },
        );
        oracle.place(&mut msg);
        assert_eq!(msg.dst, Location(2));
    }

    #[test]
    fn hintless_db_creation_round_robins() {
        let oracle = PlacementOracle::new(Location(0), affinities(3));
        let destinations: Vec<Location> = (0..4)
            .map(|_| {
                let mut msg = PolicyMsg::request_response(
                    MsgId(3),
                    Location(0),
                    MsgBody::DbCreate {
                        guid: Guid::NULL,
                        edt: Guid::NULL,
                        size: 8,
                        flags: DbFlags::empty(),
                        props: GuidProps::empty(),
                        mode: DbAccessMode::ReadWrite,
                        hint: Hint::new(),
                    },
                );
                oracle.place(&mut msg);
                msg.dst
            })
            .collect();
        assert_eq!(
            destinations,
            vec![Location(0), Location(1), Location(2), Location(0)]
        );
    }

    #[test]
    fn neighbors_exclude_self() {
        let oracle = PlacementOracle::new(Location(1), affinities(3));
        assert_eq!(oracle.neighbors(), vec![Location(0), Location(2)]);
    }
}
