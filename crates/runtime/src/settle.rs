use std::time::Duration;

use serde::Deserialize;

/// Quiescence delays used to report a reconciliation pass as settled.
///
/// The engine offers no "finished rendering these layers" acknowledgement, so
/// settling is a heuristic: a short wait when nothing is displayed, a longer
/// one while tiles for the desired layers are still streaming in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SettleDelays {
    pub empty_ms: u64,
    pub populated_ms: u64,
}

impl SettleDelays {
    pub fn delay_for(&self, desired_len: usize) -> Duration {
        if desired_len == 0 {
            Duration::from_millis(self.empty_ms)
        } else {
            Duration::from_millis(self.populated_ms)
        }
    }
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            empty_ms: 100,
            populated_ms: 1_000,
        }
    }
}
