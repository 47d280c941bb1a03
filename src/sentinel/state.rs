//! Sentinel state representation.

use std::sync::atomic::{AtomicU8, Ordering};

/// Role of the local PostgreSQL instance as established by the sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClusterState {
    /// No confirmed role; the next check re-arbitrates.
    Detached = 0,
    /// This instance holds the master mutex and accepts writes.
    Master = 1,
    /// This instance streams from the published master.
    Replica = 2,
}

impl ClusterState {
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Master,
            2 => Self::Replica,
            _ => Self::Detached,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detached => "detached",
            Self::Master => "master",
            Self::Replica => "replica",
        }
    }
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic [`ClusterState`] cell so observers read the role without taking
/// the instance lock.
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: ClusterState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> ClusterState {
        ClusterState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: ClusterState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [
            ClusterState::Detached,
            ClusterState::Master,
            ClusterState::Replica,
        ] {
            assert_eq!(ClusterState::from_u8(state as u8), state);
        }
        assert_eq!(ClusterState::from_u8(42), ClusterState::Detached);
    }

    #[test]
    fn test_state_cell() {
        let cell = StateCell::new(ClusterState::Detached);
        assert_eq!(cell.load(), ClusterState::Detached);
        cell.store(ClusterState::Master);
        assert_eq!(cell.load(), ClusterState::Master);
    }
}
