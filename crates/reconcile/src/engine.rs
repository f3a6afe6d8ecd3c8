//! The rendering-engine surface the reconciler drives.

use layers::{FilterExpression, LayerDefinition, SourceDefinition};
use runtime::ReadinessProbe;
use serde::{Deserialize, Serialize};

/// Mutating engine operations, named for error reporting and fault injection.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineOp {
    AddSource,
    AddLayer,
    RemoveLayer,
    RemoveSource,
    SetLayoutVisibility,
    SetFilter,
}

impl EngineOp {
    pub fn as_str(self) -> &'static str {
        match self {
            EngineOp::AddSource => "addSource",
            EngineOp::AddLayer => "addLayer",
            EngineOp::RemoveLayer => "removeLayer",
            EngineOp::RemoveSource => "removeSource",
            EngineOp::SetLayoutVisibility => "setLayoutVisibility",
            EngineOp::SetFilter => "setFilter",
        }
    }
}

impl std::fmt::Display for EngineOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An engine call that was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineError {
    pub op: EngineOp,
    /// Source or layer id the call targeted.
    pub id: String,
    pub message: String,
}

impl EngineError {
    pub fn new(op: EngineOp, id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            op,
            id: id.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}) failed: {}", self.op, self.id, self.message)
    }
}

impl std::error::Error for EngineError {}

/// A map rendering engine with a registry of sources and layers.
///
/// Existence queries are cheap and side-effect free. Mutations may fail at
/// any time (most commonly while a style is being swapped); callers are
/// expected to check existence first so that adds and removes stay
/// idempotent.
pub trait MapEngine: ReadinessProbe {
    fn has_source(&self, id: &str) -> bool;
    fn has_layer(&self, id: &str) -> bool;

    fn add_source(&mut self, id: &str, definition: &SourceDefinition) -> Result<(), EngineError>;
    /// The layer id and its source id are taken from the definition.
    fn add_layer(&mut self, definition: &LayerDefinition) -> Result<(), EngineError>;
    fn remove_layer(&mut self, id: &str) -> Result<(), EngineError>;
    fn remove_source(&mut self, id: &str) -> Result<(), EngineError>;

    fn set_layout_visibility(&mut self, layer_id: &str, visible: bool) -> Result<(), EngineError>;
    /// `None` clears any filter on the layer.
    fn set_filter(
        &mut self,
        layer_id: &str,
        filter: Option<&FilterExpression>,
    ) -> Result<(), EngineError>;

    fn request_repaint(&mut self);
}

#[cfg(test)]
mod tests {
    use super::{EngineError, EngineOp};

    #[test]
    fn errors_name_the_call() {
        let err = EngineError::new(EngineOp::RemoveSource, "roads-source", "source in use");
        assert_eq!(err.to_string(), "removeSource(roads-source) failed: source in use");
        assert_eq!(
            serde_json::to_string(&EngineOp::SetLayoutVisibility).unwrap(),
            "\"set_layout_visibility\""
        );
    }
}
