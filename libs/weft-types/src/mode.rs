use serde::{Deserialize, Serialize};

/// Access mode requested when acquiring a datablock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DbAccessMode {
    ReadOnly,
    Const,
    #[default]
    ReadWrite,
    ExclusiveWrite,
}

impl DbAccessMode {
    /// Whether a local acquire in `self` may be served from a proxy cached
    /// in `cached` mode. Exclusive-write never reuses the cache; every other
    /// mode reuses only an identical-mode cache.
    pub fn proxy_reuse_ok(self, cached: DbAccessMode) -> bool {
        cached != DbAccessMode::ExclusiveWrite && self == cached
    }

    /// Whether a proxy running in this mode must carry its payload back to
    /// the home domain on release. Single-assignment blocks are written back
    /// once at creation and never again.
    pub fn wants_write_back(self, single_assignment: bool) -> bool {
        !single_assignment && !matches!(self, DbAccessMode::ReadOnly | DbAccessMode::Const)
    }
}

bitflags::bitflags! {
    /// Runtime flags attached to a datablock or carried on acquire/release.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct DbFlags: u16 {
        /// Payload travels home with the release.
        const WRITE_BACK = 1 << 0;
        /// Outbound acquire must fetch the payload from the home domain.
        const FETCH = 1 << 1;
        /// Block is written exactly once by its creator.
        const SINGLE_ASSIGNMENT = 1 << 2;
        /// Runtime-internal acquire that bypasses user accounting.
        const RT_OBLIVIOUS = 1 << 3;
        /// Create implies an immediate read-write acquire by the caller.
        const ACQUIRE_ON_CREATE = 1 << 4;
    }
}

bitflags::bitflags! {
    /// Properties governing labeled-GUID creation races.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct GuidProps: u8 {
        /// The GUID was taken from a reserved labeled range.
        const LABELED = 1 << 0;
        /// On `EGUIDEXISTS`, wait for the winning creation to complete.
        const BLOCK = 1 << 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exclusive_write_never_reuses_cache() {
        assert!(!DbAccessMode::ExclusiveWrite.proxy_reuse_ok(DbAccessMode::ExclusiveWrite));
        assert!(!DbAccessMode::ReadWrite.proxy_reuse_ok(DbAccessMode::ExclusiveWrite));
    }

    #[test]
    fn reuse_requires_identical_mode() {
        assert!(DbAccessMode::ReadOnly.proxy_reuse_ok(DbAccessMode::ReadOnly));
        assert!(!DbAccessMode::ReadOnly.proxy_reuse_ok(DbAccessMode::ReadWrite));
        assert!(DbAccessMode::ReadWrite.proxy_reuse_ok(DbAccessMode::ReadWrite));
    }

    #[test]
    fn write_back_policy() {
        assert!(DbAccessMode::ReadWrite.wants_write_back(false));
        assert!(DbAccessMode::ExclusiveWrite.wants_write_back(false));
        assert!(!DbAccessMode::ReadOnly.wants_write_back(false));
        assert!(!DbAccessMode::Const.wants_write_back(false));
        assert!(!DbAccessMode::ReadWrite.wants_write_back(true));
    }
}
