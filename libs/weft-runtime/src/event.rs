//! Event pool: once, sticky, idempotent, latch and channel events.
//!
//! Satisfying an event never performs delivery directly; it returns the set
//! of deliveries the caller (the dispatcher) must route, so the event lock is
//! never held across messaging.

use std::collections::VecDeque;

use parking_lot::Mutex;

use weft_types::{
    ChannelParams, EventKind, Guid, Hint, StatusCode, LATCH_DECR_SLOT, LATCH_INCR_SLOT,
};

/// A registered consumer of an event: a task slot or another event's slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Waiter {
    pub guid: Guid,
    pub slot: u32,
}

/// A satisfaction the dispatcher must deliver to `target`'s `slot`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub target: Guid,
    pub slot: u32,
    pub payload: Guid,
}

struct ChannelState {
    params: ChannelParams,
    satisfies: VecDeque<Guid>,
    waiters: VecDeque<Waiter>,
}

struct EventInner {
    fired: bool,
    payload: Guid,
    dead: bool,
    latch_count: i64,
    waiters: Vec<Waiter>,
    channel: Option<ChannelState>,
}

/// One event's metadata and firing state.
pub struct EventRecord {
    pub guid: Guid,
    pub kind: EventKind,
    inner: Mutex<EventInner>,
    hint: Mutex<Hint>,
}

/// Observable completion state, as reported by `EVT_GET`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EventSnapshot {
    pub fired: bool,
    pub payload: Guid,
    pub latch_count: i64,
}

impl EventRecord {
    pub fn new(guid: Guid, kind: EventKind, latch_init: u32, channel: Option<ChannelParams>) -> Self {
        let channel = match kind {
            EventKind::Channel => Some(ChannelState {
                params: channel.unwrap_or_default(),
                satisfies: VecDeque::new(),
                waiters: VecDeque::new(),
            }),
            _ => None,
        };
        Self {
            guid,
            kind,
            inner: Mutex::new(EventInner {
                fired: false,
                payload: Guid::NULL,
                dead: false,
                latch_count: i64::from(latch_init),
                waiters: Vec::new(),
                channel,
            }),
            hint: Mutex::new(Hint::new()),
        }
    }

    #[cfg(test)]
    pub fn sticky(guid: Guid) -> Self {
        Self::new(guid, EventKind::Sticky, 0, None)
    }

    pub fn hint(&self) -> Hint {
        self.hint.lock().clone()
    }

    pub fn set_hint(&self, hint: Hint) {
        *self.hint.lock() = hint;
    }

    /// Apply one satisfy; returns the deliveries it unlocked.
    pub fn satisfy(&self, slot: u32, payload: Guid) -> Result<Vec<Delivery>, StatusCode> {
        let mut inner = self.inner.lock();
        if inner.dead {
            return Err(StatusCode::InvalidArg);
        }
        match self.kind {
            EventKind::Once | EventKind::Sticky => {
                if inner.fired {
                    return Err(StatusCode::InvalidArg);
                }
                inner.fired = true;
                inner.payload = payload;
                if self.kind == EventKind::Once {
                    inner.dead = true;
                }
                Ok(drain_waiters(&mut inner, payload))
            }
            EventKind::Idempotent => {
                if inner.fired {
                    // Re-delivery of an idempotent satisfy changes nothing.
                    return Ok(Vec::new());
                }
                inner.fired = true;
                inner.payload = payload;
                Ok(drain_waiters(&mut inner, payload))
            }
            EventKind::Latch => {
                if inner.fired {
                    return Err(StatusCode::InvalidArg);
                }
                match slot {
                    LATCH_INCR_SLOT => inner.latch_count += 1,
                    LATCH_DECR_SLOT => inner.latch_count -= 1,
                    _ => return Err(StatusCode::InvalidArg),
                }
                if inner.latch_count == 0 {
                    inner.fired = true;
                    inner.dead = true;
                    Ok(drain_waiters(&mut inner, payload))
                } else {
                    Ok(Vec::new())
                }
            }
            EventKind::Channel => {
                let channel = inner.channel.as_mut().ok_or(StatusCode::InvalidArg)?;
                if channel.satisfies.len() >= channel.params.max_generations as usize {
                    return Err(StatusCode::Busy);
                }
                channel.satisfies.push_back(payload);
                Ok(pair_channel(channel))
            }
        }
    }

    /// Register a waiter; persistent fired events deliver immediately.
    pub fn add_waiter(&self, waiter: Waiter) -> Result<Vec<Delivery>, StatusCode> {
        let mut inner = self.inner.lock();
        if inner.dead {
            return Err(StatusCode::InvalidArg);
        }
        match self.kind {
            EventKind::Channel => {
                let channel = inner.channel.as_mut().ok_or(StatusCode::InvalidArg)?;
                channel.waiters.push_back(waiter);
                Ok(pair_channel(channel))
            }
            _ => {
                if inner.fired {
                    let payload = inner.payload;
                    Ok(vec![Delivery {
                        target: waiter.guid,
                        slot: waiter.slot,
                        payload,
                    }])
                } else {
                    inner.waiters.push(waiter);
                    Ok(Vec::new())
                }
            }
        }
    }

    pub fn snapshot(&self) -> EventSnapshot {
        let inner = self.inner.lock();
        EventSnapshot {
            fired: inner.fired,
            payload: inner.payload,
            latch_count: inner.latch_count,
        }
    }

    pub fn destroy(&self) {
        self.inner.lock().dead = true;
    }

    pub fn is_dead(&self) -> bool {
        self.inner.lock().dead
    }
}

fn drain_waiters(inner: &mut EventInner, payload: Guid) -> Vec<Delivery> {
    inner
        .waiters
        .drain(..)
        .map(|w| Delivery {
            target: w.guid,
            slot: w.slot,
            payload,
        })
        .collect()
}

fn pair_channel(channel: &mut ChannelState) -> Vec<Delivery> {
    let mut out = Vec::new();
    while let (Some(&payload), Some(&waiter)) =
        (channel.satisfies.front(), channel.waiters.front())
    {
        channel.satisfies.pop_front();
        channel.waiters.pop_front();
        out.push(Delivery {
            target: waiter.guid,
            slot: waiter.slot,
            payload,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::{GuidKind, Location};

    fn guid(kind: GuidKind, serial: u64) -> Guid {
        Guid::encode(kind, Location(0), serial)
    }

    fn waiter(serial: u64) -> Waiter {
        Waiter {
            guid: guid(GuidKind::Task, serial),
            slot: 0,
        }
    }

    #[test]
    fn sticky_satisfies_late_waiters() {
        let evt = EventRecord::new(guid(GuidKind::EventSticky, 1), EventKind::Sticky, 0, None);
        let payload = guid(GuidKind::Datablock, 9);
        assert!(evt.satisfy(0, payload).unwrap().is_empty());
        let deliveries = evt.add_waiter(waiter(2)).unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].payload, payload);
        assert_eq!(evt.satisfy(0, payload), Err(StatusCode::InvalidArg));
    }

    #[test]
    fn idempotent_swallows_re_delivery() {
        let evt = EventRecord::new(
            guid(GuidKind::EventIdempotent, 1),
            EventKind::Idempotent,
            0,
            None,
        );
        let payload = guid(GuidKind::Datablock, 9);
        evt.satisfy(0, payload).unwrap();
        assert_eq!(evt.satisfy(0, payload).unwrap(), Vec::new());
        assert!(evt.snapshot().fired);
    }

    #[test]
    fn latch_fires_exactly_at_zero() {
        let evt = EventRecord::new(guid(GuidKind::EventLatch, 1), EventKind::Latch, 2, None);
        evt.add_waiter(waiter(5)).unwrap();
        assert!(evt.satisfy(LATCH_DECR_SLOT, Guid::NULL).unwrap().is_empty());
        assert!(evt.satisfy(LATCH_INCR_SLOT, Guid::NULL).unwrap().is_empty());
        assert!(evt.satisfy(LATCH_DECR_SLOT, Guid::NULL).unwrap().is_empty());
        let fired = evt.satisfy(LATCH_DECR_SLOT, Guid::NULL).unwrap();
        assert_eq!(fired.len(), 1);
        assert_eq!(evt.snapshot().latch_count, 0);
        // A latch fires at most once.
        assert_eq!(
            evt.satisfy(LATCH_DECR_SLOT, Guid::NULL),
            Err(StatusCode::InvalidArg)
        );
    }

    #[test]
    fn once_event_dies_after_firing() {
        let evt = EventRecord::new(guid(GuidKind::EventOnce, 1), EventKind::Once, 0, None);
        evt.add_waiter(waiter(3)).unwrap();
        let deliveries = evt.satisfy(0, Guid::NULL).unwrap();
        assert_eq!(deliveries.len(), 1);
        assert!(evt.is_dead());
        assert!(evt.add_waiter(waiter(4)).is_err());
    }

    #[test]
    fn channel_pairs_in_submission_order() {
        let params = ChannelParams {
            max_generations: 4,
            satisfies_per_gen: 1,
            waiters_per_gen: 1,
        };
        let evt = EventRecord::new(
            guid(GuidKind::EventChannel, 1),
            EventKind::Channel,
            0,
            Some(params),
        );
        let d0 = guid(GuidKind::Datablock, 10);
        let d1 = guid(GuidKind::Datablock, 11);
        assert!(evt.satisfy(0, d0).unwrap().is_empty());
        assert!(evt.satisfy(0, d1).unwrap().is_empty());
        let first = evt.add_waiter(waiter(2)).unwrap();
        assert_eq!(first[0].payload, d0);
        let second = evt.add_waiter(waiter(3)).unwrap();
        assert_eq!(second[0].payload, d1);
    }

    #[test]
    fn channel_bounds_generations_in_flight() {
        let params = ChannelParams {
            max_generations: 1,
            satisfies_per_gen: 1,
            waiters_per_gen: 1,
        };
        let evt = EventRecord::new(
            guid(GuidKind::EventChannel, 1),
            EventKind::Channel,
            0,
            Some(params),
        );
        evt.satisfy(0, Guid::NULL).unwrap();
        assert_eq!(evt.satisfy(0, Guid::NULL), Err(StatusCode::Busy));
    }
}
