//! Change journal over consecutive desired-layer snapshots.

use std::collections::BTreeMap;

use layers::{DesiredLayer, LayerKey};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum LayerChange {
    Added { key: LayerKey },
    Removed { key: LayerKey },
    VisibilityChanged { key: LayerKey, visible: bool },
}

/// Key and effective visibility of every desired layer, in key order.
///
/// Two snapshots with equal fingerprints produce the same reconciliation
/// result as long as the engine has not been replaced underneath.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprint(BTreeMap<LayerKey, bool>);

impl Fingerprint {
    pub fn of(desired: &[DesiredLayer]) -> Self {
        let mut entries = BTreeMap::new();
        for layer in desired {
            entries
                .entry(layer.key.clone())
                .or_insert_with(|| layer.effective_visible());
        }
        Self(entries)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Logs which layers were added, removed or toggled between snapshots.
///
/// The first snapshot is the initial load and produces no entries.
#[derive(Debug, Default)]
pub struct ChangeJournal {
    last: Option<Fingerprint>,
}

impl ChangeJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, desired: &[DesiredLayer]) -> Vec<LayerChange> {
        let current = Fingerprint::of(desired);
        let Some(previous) = self.last.replace(current.clone()) else {
            debug!("Initial layer load: {} layers", current.len());
            return Vec::new();
        };

        let mut changes = Vec::new();
        for key in previous.0.keys() {
            if !current.0.contains_key(key) {
                changes.push(LayerChange::Removed { key: key.clone() });
            }
        }
        for (key, &visible) in &current.0 {
            match previous.0.get(key) {
                None => changes.push(LayerChange::Added { key: key.clone() }),
                Some(&before) if before != visible => changes.push(LayerChange::VisibilityChanged {
                    key: key.clone(),
                    visible,
                }),
                Some(_) => {}
            }
        }

        for change in &changes {
            match change {
                LayerChange::Added { key } => info!("Layer added: {key}"),
                LayerChange::Removed { key } => info!("Layer removed: {key}"),
                LayerChange::VisibilityChanged { key, visible } => {
                    info!("Layer {key} visibility changed to {visible}")
                }
            }
        }
        changes
    }
}
