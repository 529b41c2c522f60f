//! Scene lifecycle states and status reporting

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::device::DeviceKey;

/// Scene lifecycle phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScenePhase {
    /// No scene active
    #[default]
    Idle,
    /// Waiting out the initial delay
    Delaying,
    /// Main loop is firing devices
    Running,
    /// Loop has exited and cleanup hooks are running
    Terminating,
}

impl ScenePhase {
    /// Whether a scene is occupying the engine
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle)
    }

    /// Label shown on the dashboard
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Delaying => "Waiting",
            Self::Running => "Running",
            Self::Terminating => "Stopping",
        }
    }
}

impl fmt::Display for ScenePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Snapshot returned by the engine's status query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneStatus {
    pub phase: ScenePhase,
    /// Delaying: until the delay ends. Running: until the deadline.
    pub seconds_remaining: u64,
    /// Until the deadline in every active phase, including the delay
    #[serde(default)]
    pub scene_seconds_remaining: u64,
}

impl SceneStatus {
    pub fn idle() -> Self {
        Self {
            phase: ScenePhase::Idle,
            seconds_remaining: 0,
            scene_seconds_remaining: 0,
        }
    }

    pub fn remaining_minutes(&self) -> u64 {
        self.seconds_remaining / 60
    }

    pub fn remaining_seconds(&self) -> u64 {
        self.seconds_remaining % 60
    }
}

impl fmt::Display for SceneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}m {:02}s remaining)",
            self.phase,
            self.remaining_minutes(),
            self.remaining_seconds()
        )
    }
}

/// Why a scene ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndReason {
    /// Deadline reached
    Completed,
    /// Stop requested by the user
    Stopped,
    /// Killswitch reported off
    Aborted,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::Stopped => f.write_str("stopped"),
            Self::Aborted => f.write_str("aborted"),
        }
    }
}

/// Summary of a finished scene
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SceneOutcome {
    pub reason: EndReason,
    /// Successful firings per device that was armed during the run
    pub fire_counts: BTreeMap<DeviceKey, u32>,
    /// Seconds spent in the running phase
    pub running_secs: u64,
}

impl SceneOutcome {
    pub fn fired(&self, key: DeviceKey) -> u32 {
        self.fire_counts.get(&key).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        let status = SceneStatus {
            phase: ScenePhase::Running,
            seconds_remaining: 125,
            scene_seconds_remaining: 125,
        };
        assert_eq!(status.remaining_minutes(), 2);
        assert_eq!(status.remaining_seconds(), 5);
        assert_eq!(status.to_string(), "Running (2m 05s remaining)");
        assert_eq!(SceneStatus::idle().phase, ScenePhase::Idle);
    }
}
