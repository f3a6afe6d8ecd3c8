use std::collections::BTreeMap;

use layers::LayerKey;
use serde::Serialize;

use crate::filter::FilterSource;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PassOutcome {
    /// Every step ran; individual keys may still have failed.
    Completed,
    /// A newer snapshot arrived (or processing was paused) mid-pass.
    Superseded,
    /// The engine never accepted mutations within the retry budget.
    NotReady,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Add,
    Removal,
    Filter,
    Visibility,
}

/// A per-key failure absorbed by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerFailure {
    pub key: LayerKey,
    pub kind: FailureKind,
    pub message: String,
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub outcome: PassOutcome,
    /// Size of the desired set the pass ran against.
    pub desired: usize,
    /// How many times the pass waited for the style to load.
    pub deferrals: u32,
    pub removed: Vec<LayerKey>,
    pub added: Vec<LayerKey>,
    pub duplicates: Vec<LayerKey>,
    pub filters: BTreeMap<LayerKey, FilterSource>,
    pub visibility_updates: usize,
    pub failures: Vec<LayerFailure>,
}

impl PassReport {
    pub fn new(desired: usize) -> Self {
        Self {
            outcome: PassOutcome::Completed,
            desired,
            deferrals: 0,
            removed: Vec::new(),
            added: Vec::new(),
            duplicates: Vec::new(),
            filters: BTreeMap::new(),
            visibility_updates: 0,
            failures: Vec::new(),
        }
    }

    /// Completed without any absorbed failure.
    pub fn is_clean(&self) -> bool {
        self.outcome == PassOutcome::Completed && self.failures.is_empty()
    }

    pub fn failures_of(&self, kind: FailureKind) -> impl Iterator<Item = &LayerFailure> {
        self.failures.iter().filter(move |f| f.kind == kind)
    }

    pub(crate) fn fail(&mut self, key: &LayerKey, kind: FailureKind, message: impl ToString) {
        self.failures.push(LayerFailure {
            key: key.clone(),
            kind,
            message: message.to_string(),
        });
    }
}
