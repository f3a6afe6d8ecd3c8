//! An in-memory engine that records every call made against it.
//!
//! It enforces the registry rules a real map engine enforces (unique ids, a
//! layer needs its source, a source in use cannot be removed, nothing can be
//! mutated while a style is loading) so reconciliation bugs surface as
//! errors instead of silently passing.

use std::collections::BTreeMap;
use std::sync::Arc;

use layers::{FilterExpression, LayerDefinition, SourceDefinition};
use parking_lot::Mutex;
use runtime::{EngineEvent, EventBus, ReadinessProbe};
use serde::Serialize;
use serde_json::Value;

use crate::engine::{EngineError, EngineOp, MapEngine};

/// One call as issued by the caller, whether or not it succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum EngineCall {
    AddSource { id: String, definition: Value },
    AddLayer { definition: Value },
    RemoveLayer { id: String },
    RemoveSource { id: String },
    SetLayoutVisibility { layer_id: String, visible: bool },
    SetFilter { layer_id: String, filter: Option<Value> },
    RequestRepaint,
}

impl EngineCall {
    /// Adds and removes; the calls that change which ids exist.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EngineCall::AddSource { .. }
                | EngineCall::AddLayer { .. }
                | EngineCall::RemoveLayer { .. }
                | EngineCall::RemoveSource { .. }
        )
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, EngineCall::RequestRepaint)
    }
}

#[derive(Debug, Clone)]
struct LayerState {
    definition: LayerDefinition,
    source: String,
    visible: bool,
    filter: Option<FilterExpression>,
}

#[derive(Debug)]
struct Inner {
    style_loaded: bool,
    loaded: bool,
    sources: BTreeMap<String, SourceDefinition>,
    layers: BTreeMap<String, LayerState>,
    calls: Vec<EngineCall>,
    faults: Vec<(EngineOp, String)>,
}

impl Inner {
    fn new(ready: bool) -> Self {
        Self {
            style_loaded: ready,
            loaded: ready,
            sources: BTreeMap::new(),
            layers: BTreeMap::new(),
            calls: Vec::new(),
            faults: Vec::new(),
        }
    }

    fn admit(&mut self, op: EngineOp, id: &str) -> Result<(), EngineError> {
        if let Some(pos) = self.faults.iter().position(|(o, i)| *o == op && i == id) {
            self.faults.remove(pos);
            return Err(EngineError::new(op, id, "injected failure"));
        }
        if !self.style_loaded {
            return Err(EngineError::new(op, id, "style is not done loading"));
        }
        Ok(())
    }

    fn layer_mut(&mut self, op: EngineOp, id: &str) -> Result<&mut LayerState, EngineError> {
        self.layers
            .get_mut(id)
            .ok_or_else(|| EngineError::new(op, id, "layer does not exist"))
    }
}

/// Cloneable handle to one shared in-memory engine.
#[derive(Debug, Clone)]
pub struct RecordingEngine {
    inner: Arc<Mutex<Inner>>,
    events: Option<EventBus>,
}

impl RecordingEngine {
    /// An engine that is loaded and accepts mutations.
    pub fn new() -> Self {
        Self::with_state(true)
    }

    /// An engine whose style and data are still loading.
    pub fn loading() -> Self {
        Self::with_state(false)
    }

    fn with_state(ready: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::new(ready))),
            events: None,
        }
    }

    /// Publishes load and style events on `bus` as the engine state changes.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.events = Some(bus);
        self
    }

    fn emit(&self, event: EngineEvent) {
        if let Some(bus) = &self.events {
            bus.emit(event);
        }
    }

    pub fn finish_load(&self) {
        {
            let mut inner = self.inner.lock();
            inner.loaded = true;
        }
        self.emit(EngineEvent::Load);
    }

    pub fn finish_style_load(&self) {
        {
            let mut inner = self.inner.lock();
            inner.style_loaded = true;
        }
        self.emit(EngineEvent::StyleData);
    }

    /// Swaps the style: every source and layer is dropped and the new style
    /// starts loading.
    pub fn reload_style(&self) {
        {
            let mut inner = self.inner.lock();
            inner.sources.clear();
            inner.layers.clear();
            inner.style_loaded = false;
        }
        self.emit(EngineEvent::StyleReplaced);
    }

    /// Makes the next `op` against `id` fail.
    pub fn fail_next(&self, op: EngineOp, id: impl Into<String>) {
        self.inner.lock().faults.push((op, id.into()));
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.inner.lock().calls.clone()
    }

    pub fn take_calls(&self) -> Vec<EngineCall> {
        std::mem::take(&mut self.inner.lock().calls)
    }

    pub fn source_ids(&self) -> Vec<String> {
        self.inner.lock().sources.keys().cloned().collect()
    }

    pub fn layer_ids(&self) -> Vec<String> {
        self.inner.lock().layers.keys().cloned().collect()
    }

    pub fn source(&self, id: &str) -> Option<SourceDefinition> {
        self.inner.lock().sources.get(id).cloned()
    }

    pub fn layer(&self, id: &str) -> Option<LayerDefinition> {
        self.inner.lock().layers.get(id).map(|l| l.definition.clone())
    }

    pub fn layer_visible(&self, id: &str) -> Option<bool> {
        self.inner.lock().layers.get(id).map(|l| l.visible)
    }

    pub fn layer_filter(&self, id: &str) -> Option<FilterExpression> {
        self.inner.lock().layers.get(id).and_then(|l| l.filter.clone())
    }
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadinessProbe for RecordingEngine {
    fn is_style_loaded(&self) -> bool {
        self.inner.lock().style_loaded
    }

    fn is_loaded(&self) -> bool {
        self.inner.lock().loaded
    }
}

impl MapEngine for RecordingEngine {
    fn has_source(&self, id: &str) -> bool {
        self.inner.lock().sources.contains_key(id)
    }

    fn has_layer(&self, id: &str) -> bool {
        self.inner.lock().layers.contains_key(id)
    }

    fn add_source(&mut self, id: &str, definition: &SourceDefinition) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        inner.calls.push(EngineCall::AddSource {
            id: id.to_string(),
            definition: definition.to_value(),
        });
        inner.admit(EngineOp::AddSource, id)?;
        if inner.sources.contains_key(id) {
            return Err(EngineError::new(EngineOp::AddSource, id, "source already exists"));
        }
        inner.sources.insert(id.to_string(), definition.clone());
        Ok(())
    }

    fn add_layer(&mut self, definition: &LayerDefinition) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        inner.calls.push(EngineCall::AddLayer {
            definition: definition.to_value(),
        });
        let id = definition.id().unwrap_or_default().to_string();
        inner.admit(EngineOp::AddLayer, &id)?;
        if id.is_empty() {
            return Err(EngineError::new(EngineOp::AddLayer, id, "layer has no id"));
        }
        if inner.layers.contains_key(&id) {
            return Err(EngineError::new(EngineOp::AddLayer, id, "layer already exists"));
        }
        let source = definition.source().unwrap_or_default().to_string();
        if !inner.sources.contains_key(&source) {
            return Err(EngineError::new(
                EngineOp::AddLayer,
                id,
                format!("source \"{source}\" not found"),
            ));
        }
        inner.layers.insert(
            id,
            LayerState {
                definition: definition.clone(),
                source,
                visible: definition.visibility().unwrap_or(true),
                filter: None,
            },
        );
        Ok(())
    }

    fn remove_layer(&mut self, id: &str) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        inner.calls.push(EngineCall::RemoveLayer { id: id.to_string() });
        inner.admit(EngineOp::RemoveLayer, id)?;
        inner
            .layers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::new(EngineOp::RemoveLayer, id, "layer does not exist"))
    }

    fn remove_source(&mut self, id: &str) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        inner.calls.push(EngineCall::RemoveSource { id: id.to_string() });
        inner.admit(EngineOp::RemoveSource, id)?;
        if let Some(user) = inner.layers.iter().find(|(_, l)| l.source == id) {
            let message = format!("source is in use by layer \"{}\"", user.0);
            return Err(EngineError::new(EngineOp::RemoveSource, id, message));
        }
        inner
            .sources
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::new(EngineOp::RemoveSource, id, "source does not exist"))
    }

    fn set_layout_visibility(&mut self, layer_id: &str, visible: bool) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        inner.calls.push(EngineCall::SetLayoutVisibility {
            layer_id: layer_id.to_string(),
            visible,
        });
        inner.admit(EngineOp::SetLayoutVisibility, layer_id)?;
        inner
            .layer_mut(EngineOp::SetLayoutVisibility, layer_id)?
            .visible = visible;
        Ok(())
    }

    fn set_filter(
        &mut self,
        layer_id: &str,
        filter: Option<&FilterExpression>,
    ) -> Result<(), EngineError> {
        let mut inner = self.inner.lock();
        inner.calls.push(EngineCall::SetFilter {
            layer_id: layer_id.to_string(),
            filter: filter.map(|f| f.as_value().clone()),
        });
        inner.admit(EngineOp::SetFilter, layer_id)?;
        inner.layer_mut(EngineOp::SetFilter, layer_id)?.filter = filter.cloned();
        Ok(())
    }

    fn request_repaint(&mut self) {
        self.inner.lock().calls.push(EngineCall::RequestRepaint);
    }
}

#[cfg(test)]
mod tests {
    use layers::{DefaultDefinitions, LayerKey, RendererType};
    use runtime::{EngineEvent, EventBus, ReadinessProbe};

    use super::{EngineCall, RecordingEngine};
    use crate::engine::{EngineOp, MapEngine};

    fn add(engine: &mut RecordingEngine, key: &str) {
        let defaults = DefaultDefinitions::default();
        let key = LayerKey::from(key);
        engine.add_source(&key.source_id(), &defaults.source(&key)).unwrap();
        engine
            .add_layer(&defaults.layer(&key, RendererType::Line, None, false))
            .unwrap();
    }

    #[test]
    fn registry_rules_are_enforced() {
        let mut engine = RecordingEngine::new();
        add(&mut engine, "roads");
        assert_eq!(engine.layer_visible("roads-layer"), Some(false));

        let defaults = DefaultDefinitions::default();
        let key = LayerKey::from("roads");
        assert!(engine.add_source("roads-source", &defaults.source(&key)).is_err());
        assert!(engine.remove_source("roads-source").is_err());

        let orphan = defaults.layer(&LayerKey::from("parks"), RendererType::Fill, None, true);
        assert!(engine.add_layer(&orphan).is_err());

        engine.remove_layer("roads-layer").unwrap();
        engine.remove_source("roads-source").unwrap();
        assert!(engine.layer_ids().is_empty());
        assert!(engine.source_ids().is_empty());
    }

    #[test]
    fn style_reload_wipes_registry_and_blocks_mutation() {
        let bus = EventBus::default();
        let mut events = bus.subscribe();
        let mut engine = RecordingEngine::new().with_events(bus);
        add(&mut engine, "roads");

        engine.reload_style();
        assert_eq!(events.try_recv().unwrap(), EngineEvent::StyleReplaced);
        assert!(!engine.is_style_loaded());
        assert!(!engine.has_layer("roads-layer"));
        assert!(engine.set_layout_visibility("roads-layer", true).is_err());

        engine.finish_style_load();
        assert_eq!(events.try_recv().unwrap(), EngineEvent::StyleData);
        add(&mut engine, "roads");
    }

    #[test]
    fn injected_faults_fire_once() {
        let mut engine = RecordingEngine::new();
        engine.fail_next(EngineOp::AddSource, "roads-source");
        let defaults = DefaultDefinitions::default();
        let key = LayerKey::from("roads");
        let err = engine
            .add_source("roads-source", &defaults.source(&key))
            .unwrap_err();
        assert_eq!(err.op, EngineOp::AddSource);
        engine.add_source("roads-source", &defaults.source(&key)).unwrap();
    }

    #[test]
    fn calls_are_recorded_even_when_rejected() {
        let mut engine = RecordingEngine::loading();
        assert!(engine.remove_layer("x-layer").is_err());
        engine.request_repaint();
        let calls = engine.take_calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].is_structural());
        assert!(!calls[1].is_mutation());
        assert!(engine.calls().is_empty());
        assert_eq!(
            serde_json::to_value(&calls[0]).unwrap(),
            serde_json::json!({"call": "remove_layer", "id": "x-layer"})
        );
        assert_eq!(calls[1], EngineCall::RequestRepaint);
    }
}
