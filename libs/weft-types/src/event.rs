use serde::{Deserialize, Serialize};

use crate::guid::GuidKind;

/// Latch slot that raises the counter.
pub const LATCH_INCR_SLOT: u32 = 0;
/// Latch slot that lowers the counter; the latch fires when it reaches zero.
pub const LATCH_DECR_SLOT: u32 = 1;

/// Event flavor requested at creation.
///
/// Kinds differ in how many satisfies they accept and whether the payload
/// persists after firing; see `GuidKind::is_persistent_event`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Once,
    Sticky,
    Idempotent,
    Latch,
    Channel,
}

impl EventKind {
    pub fn guid_kind(self) -> GuidKind {
        match self {
            EventKind::Once => GuidKind::EventOnce,
            EventKind::Sticky => GuidKind::EventSticky,
            EventKind::Idempotent => GuidKind::EventIdempotent,
            EventKind::Latch => GuidKind::EventLatch,
            EventKind::Channel => GuidKind::EventChannel,
        }
    }

    pub fn from_guid_kind(kind: GuidKind) -> Option<Self> {
        Some(match kind {
            GuidKind::EventOnce => EventKind::Once,
            GuidKind::EventSticky => EventKind::Sticky,
            GuidKind::EventIdempotent => EventKind::Idempotent,
            GuidKind::EventLatch => EventKind::Latch,
            GuidKind::EventChannel => EventKind::Channel,
            _ => return None,
        })
    }
}

/// Sizing parameters for a channel event.
///
/// A channel pairs satisfies with waiters generation by generation, in
/// submission order, keeping at most `max_generations` in flight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelParams {
    pub max_generations: u32,
    pub satisfies_per_gen: u32,
    pub waiters_per_gen: u32,
}

impl Default for ChannelParams {
    fn default() -> Self {
        Self {
            max_generations: 1,
            satisfies_per_gen: 1,
            waiters_per_gen: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_kind_guid_kind_round_trip() {
        for kind in [
            EventKind::Once,
            EventKind::Sticky,
            EventKind::Idempotent,
            EventKind::Latch,
            EventKind::Channel,
        ] {
            assert_eq!(EventKind::from_guid_kind(kind.guid_kind()), Some(kind));
        }
        assert_eq!(EventKind::from_guid_kind(GuidKind::Datablock), None);
    }
}
