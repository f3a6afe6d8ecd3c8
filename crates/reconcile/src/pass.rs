use std::sync::Arc;

use layers::DesiredLayer;
use tokio::sync::watch;

/// A published desired-layer set. `None` until the first publish.
pub type Snapshot = Option<Arc<[DesiredLayer]>>;

/// Tells a running pass whether its work is still wanted.
///
/// A pass is superseded once a newer snapshot has been published or the
/// processing gate has closed since the pass started. The reconciler checks
/// this before each engine mutation and stops early when it is set.
#[derive(Debug, Clone, Default)]
pub struct PassToken {
    snapshot: Option<watch::Receiver<Snapshot>>,
    gate: Option<watch::Receiver<bool>>,
}

impl PassToken {
    /// A token that is never superseded.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Both receivers must already have seen the values the pass runs with.
    pub fn watching(snapshot: watch::Receiver<Snapshot>, gate: watch::Receiver<bool>) -> Self {
        Self {
            snapshot: Some(snapshot),
            gate: Some(gate),
        }
    }

    pub fn is_superseded(&self) -> bool {
        let newer_snapshot = self
            .snapshot
            .as_ref()
            .is_some_and(|rx| rx.has_changed().unwrap_or(false));
        let gate_closed = self.gate.as_ref().is_some_and(|rx| !*rx.borrow());
        newer_snapshot || gate_closed
    }
}
