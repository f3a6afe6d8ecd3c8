use std::collections::BTreeMap;

use crate::definition::{FilterExpression, LayerDefinition, SourceDefinition};
use crate::layer::LayerKey;
use crate::visibility::effective_visible;

/// What has actually been applied to the engine for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedLayer {
    pub source_definition: SourceDefinition,
    pub layer_definition: LayerDefinition,
    pub filter: Option<FilterExpression>,
    /// Added, but the filter step has not completed for it yet.
    pub filter_pending: bool,
    pub persisted_visible: bool,
    pub local_visible: Option<bool>,
}

impl TrackedLayer {
    pub fn new(source_definition: SourceDefinition, layer_definition: LayerDefinition) -> Self {
        Self {
            source_definition,
            layer_definition,
            filter: None,
            filter_pending: true,
            persisted_visible: false,
            local_visible: None,
        }
    }

    pub fn effective_visible(&self) -> bool {
        effective_visible(self.local_visible, Some(self.persisted_visible))
    }
}

/// Authoritative record of the sources and layers live in one engine session.
///
/// Single writer: only the reconciler mutates it. Keys are kept in a
/// `BTreeMap` so diffs and removals run in a stable order.
#[derive(Debug, Default, Clone)]
pub struct ResourceTracker {
    layers: BTreeMap<LayerKey, TrackedLayer>,
}

impl ResourceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn contains(&self, key: &LayerKey) -> bool {
        self.layers.contains_key(key)
    }

    pub fn get(&self, key: &LayerKey) -> Option<&TrackedLayer> {
        self.layers.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &LayerKey> {
        self.layers.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&LayerKey, &TrackedLayer)> {
        self.layers.iter()
    }

    pub fn insert(&mut self, key: LayerKey, layer: TrackedLayer) -> Option<TrackedLayer> {
        self.layers.insert(key, layer)
    }

    pub fn remove(&mut self, key: &LayerKey) -> Option<TrackedLayer> {
        self.layers.remove(key)
    }

    /// Records the visibility inputs last pushed to the engine.
    ///
    /// Returns `false` if `key` is not tracked.
    pub fn record_visibility(
        &mut self,
        key: &LayerKey,
        persisted_visible: bool,
        local_visible: Option<bool>,
    ) -> bool {
        let Some(layer) = self.layers.get_mut(key) else {
            return false;
        };
        layer.persisted_visible = persisted_visible;
        layer.local_visible = local_visible;
        true
    }

    /// Records the filter applied to `key` and clears its pending flag.
    pub fn record_filter(&mut self, key: &LayerKey, filter: Option<FilterExpression>) -> bool {
        let Some(layer) = self.layers.get_mut(key) else {
            return false;
        };
        layer.filter = filter;
        layer.filter_pending = false;
        true
    }

    pub fn filter_pending(&self, key: &LayerKey) -> bool {
        self.layers.get(key).is_some_and(|layer| layer.filter_pending)
    }

    /// Tracked keys for which `keep` returns `false`, in key order.
    pub fn keys_not_in(&self, keep: impl Fn(&LayerKey) -> bool) -> Vec<LayerKey> {
        self.layers.keys().filter(|k| !keep(k)).cloned().collect()
    }

    /// Forgets everything.
    ///
    /// Used when the engine or its style is replaced wholesale: whatever was
    /// added before is gone even if the engine handle is the same.
    pub fn clear(&mut self) {
        self.layers.clear();
    }
}
