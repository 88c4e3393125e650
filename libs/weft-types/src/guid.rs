use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a policy domain (one per address space).
///
/// Locations are dense ranks `[0, N)` assigned at configuration time; they
/// double as transport addresses for the comm layer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location(pub u32);

impl Location {
    #[inline]
    pub fn rank(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pd{}", self.0)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pd{}", self.0)
    }
}

/// Kind of the object a GUID names, encoded in the GUID's top bits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum GuidKind {
    Datablock = 1,
    EventOnce = 2,
    EventSticky = 3,
    EventIdempotent = 4,
    EventLatch = 5,
    EventChannel = 6,
    Task = 7,
    TaskTemplate = 8,
    Affinity = 9,
    GuidMap = 10,
    PolicyDomain = 11,
    Worker = 12,
    Scheduler = 13,
}

impl GuidKind {
    pub fn is_event(self) -> bool {
        matches!(
            self,
            GuidKind::EventOnce
                | GuidKind::EventSticky
                | GuidKind::EventIdempotent
                | GuidKind::EventLatch
                | GuidKind::EventChannel
        )
    }

    /// Persistent events keep their payload after firing; non-persistent
    /// events deliver to the waiters present at fire time and go away.
    pub fn is_persistent_event(self) -> bool {
        matches!(self, GuidKind::EventSticky | GuidKind::EventIdempotent)
    }

    fn from_bits(bits: u8) -> Result<Self, GuidError> {
        Ok(match bits {
            1 => GuidKind::Datablock,
            2 => GuidKind::EventOnce,
            3 => GuidKind::EventSticky,
            4 => GuidKind::EventIdempotent,
            5 => GuidKind::EventLatch,
            6 => GuidKind::EventChannel,
            7 => GuidKind::Task,
            8 => GuidKind::TaskTemplate,
            9 => GuidKind::Affinity,
            10 => GuidKind::GuidMap,
            11 => GuidKind::PolicyDomain,
            12 => GuidKind::Worker,
            13 => GuidKind::Scheduler,
            other => return Err(GuidError::BadKind { bits: other }),
        })
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GuidError {
    #[error("GUID kind bits {bits} do not name a known kind")]
    BadKind { bits: u8 },

    #[error("operation on a null or reserved GUID")]
    Reserved,
}

/// Opaque 128-bit identifier carrying the object kind and home location.
///
/// Layout: `[kind:8][location:32][serial:88]`. The null, error and
/// uninitialized values are reserved sentinels that never decode to a kind.
/// Equality is bitwise.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Guid(u128);

const KIND_SHIFT: u32 = 120;
const LOCATION_SHIFT: u32 = 88;
const SERIAL_MASK: u128 = (1u128 << LOCATION_SHIFT) - 1;

impl Guid {
    pub const NULL: Guid = Guid(0);
    pub const UNINITIALIZED: Guid = Guid(u128::MAX);
    pub const ERROR: Guid = Guid(u128::MAX - 1);

    pub fn encode(kind: GuidKind, home: Location, serial: u64) -> Self {
        let bits = ((kind as u128) << KIND_SHIFT)
            | ((home.0 as u128) << LOCATION_SHIFT)
            | (serial as u128 & SERIAL_MASK);
        Guid(bits)
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self == Guid::NULL
    }

    #[inline]
    pub fn is_uninitialized(self) -> bool {
        self == Guid::UNINITIALIZED
    }

    /// Decoded object kind. Errors on the reserved sentinels.
    pub fn kind(self) -> Result<GuidKind, GuidError> {
        if self.is_null() || self.is_uninitialized() || self == Guid::ERROR {
            return Err(GuidError::Reserved);
        }
        GuidKind::from_bits((self.0 >> KIND_SHIFT) as u8)
    }

    /// Home location, decoded from the GUID bits. Never consults a table.
    pub fn location(self) -> Location {
        Location(((self.0 >> LOCATION_SHIFT) & 0xFFFF_FFFF) as u32)
    }

    pub fn serial(self) -> u64 {
        (self.0 & SERIAL_MASK) as u64
    }

    /// Raw bits, for wire encoding only.
    pub fn to_bits(self) -> u128 {
        self.0
    }

    pub fn from_bits(bits: u128) -> Self {
        Guid(bits)
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("Guid(null)");
        }
        if self.is_uninitialized() {
            return f.write_str("Guid(uninit)");
        }
        if *self == Guid::ERROR {
            return f.write_str("Guid(error)");
        }
        match self.kind() {
            Ok(kind) => write!(f, "Guid({kind:?}@{}#{})", self.location(), self.serial()),
            Err(_) => write!(f, "Guid(raw:{:#x})", self.0),
        }
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_round_trips_kind_location_serial() {
        let g = Guid::encode(GuidKind::Datablock, Location(7), 42);
        assert_eq!(g.kind().unwrap(), GuidKind::Datablock);
        assert_eq!(g.location(), Location(7));
        assert_eq!(g.serial(), 42);
    }

    #[test]
    fn sentinels_do_not_decode() {
        assert_eq!(Guid::NULL.kind(), Err(GuidError::Reserved));
        assert_eq!(Guid::UNINITIALIZED.kind(), Err(GuidError::Reserved));
        assert_eq!(Guid::ERROR.kind(), Err(GuidError::Reserved));
    }

    #[test]
    fn equality_is_bitwise() {
        let a = Guid::encode(GuidKind::Task, Location(1), 9);
        let b = Guid::from_bits(a.to_bits());
        assert_eq!(a, b);
        assert_ne!(a, Guid::encode(GuidKind::Task, Location(2), 9));
    }

    #[test]
    fn persistence_classification() {
        assert!(GuidKind::EventSticky.is_persistent_event());
        assert!(GuidKind::EventIdempotent.is_persistent_event());
        assert!(!GuidKind::EventOnce.is_persistent_event());
        assert!(!GuidKind::EventLatch.is_persistent_event());
        assert!(!GuidKind::Datablock.is_event());
    }
}
