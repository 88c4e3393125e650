use serde::{Deserialize, Serialize};

/// Globally ordered phase of the runtime's lifecycle.
///
/// Bring-up walks the levels left to right, tear-down right to left. Phases
/// within a level are ordered separately for each direction; the distributed
/// shutdown barrier lives in the last tear-down phase of `UserOk`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Runlevel {
    ConfigParse = 0,
    NetworkOk = 1,
    PdOk = 2,
    MemoryOk = 3,
    GuidOk = 4,
    ComputeOk = 5,
    UserOk = 6,
}

impl Runlevel {
    pub const ALL: [Runlevel; 7] = [
        Runlevel::ConfigParse,
        Runlevel::NetworkOk,
        Runlevel::PdOk,
        Runlevel::MemoryOk,
        Runlevel::GuidOk,
        Runlevel::ComputeOk,
        Runlevel::UserOk,
    ];

    pub fn next_up(self) -> Option<Runlevel> {
        let idx = self as usize;
        Runlevel::ALL.get(idx + 1).copied()
    }

    pub fn next_down(self) -> Option<Runlevel> {
        let idx = self as usize;
        idx.checked_sub(1).map(|i| Runlevel::ALL[i])
    }
}

bitflags::bitflags! {
    /// Properties carried on a runlevel-notify message.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct RunlevelProps: u8 {
        const REQUEST = 1 << 0;
        const BARRIER = 1 << 1;
        const BRING_UP = 1 << 2;
        const TEAR_DOWN = 1 << 3;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn walk_is_total_and_bounded() {
        assert_eq!(Runlevel::ConfigParse.next_down(), None);
        assert_eq!(Runlevel::UserOk.next_up(), None);
        let mut rl = Runlevel::ConfigParse;
        let mut steps = 0;
        while let Some(next) = rl.next_up() {
            rl = next;
            steps += 1;
        }
        assert_eq!(rl, Runlevel::UserOk);
        assert_eq!(steps, 6);
    }
}
