//! Engine configuration

use std::path::PathBuf;
use std::time::Duration;

use super::events::DEFAULT_CAPACITY;

/// What to do when the tracee exits on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitPolicy {
    /// Relaunch the target immediately so a debuggable instance stays alive
    #[default]
    Restart,
    /// Leave the engine idle until the next start command
    Stop,
}

/// Engine tunables
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Sleep between engine loop ticks
    pub poll_interval: Duration,
    /// Capacity of the event output buffer in bytes
    pub event_capacity: usize,
    pub exit_policy: ExitPolicy,
    /// Directory holding the per-session target stdout capture file
    pub capture_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            event_capacity: DEFAULT_CAPACITY,
            exit_policy: ExitPolicy::Restart,
            capture_dir: std::env::temp_dir(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn with_exit_policy(mut self, policy: ExitPolicy) -> Self {
        self.exit_policy = policy;
        self
    }

    pub fn with_capture_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.capture_dir = dir.into();
        self
    }
}
