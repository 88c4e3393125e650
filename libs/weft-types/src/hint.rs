use serde::{Deserialize, Serialize};

use crate::guid::Guid;

/// Keys understood by the hint framework.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HintKey {
    /// Affinity group a task should be placed with.
    EdtAffinity,
    /// Affinity group a datablock should be allocated with.
    DbAffinity,
    /// Scheduler priority, higher runs earlier.
    Priority,
}

/// Sparse set of placement and scheduling hints attached to an entity.
///
/// Hints are advisory: an unknown key is preserved and ignored, and absence
/// of a key means "runtime's choice". Values are wide enough to carry a raw
/// GUID for the affinity keys.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hint {
    entries: Vec<(HintKey, u128)>,
}

impl Hint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: HintKey, value: u128) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: HintKey) -> Option<u128> {
        self.entries.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Affinity GUID carried under `key`, if any non-null one is present.
    pub fn affinity(&self, key: HintKey) -> Option<Guid> {
        self.get(key)
            .map(Guid::from_bits)
            .filter(|g| !g.is_null())
    }

    pub fn set_affinity(&mut self, key: HintKey, guid: Guid) {
        self.set(key, guid.to_bits());
    }

    pub fn with(mut self, key: HintKey, value: u128) -> Self {
        self.set(key, value);
        self
    }
}
