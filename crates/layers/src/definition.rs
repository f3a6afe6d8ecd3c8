use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::layer::LayerKey;
use crate::visibility::layout_visibility;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    NotAnObject { found: &'static str },
    Malformed(String),
}

impl std::fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DefinitionError::NotAnObject { found } => {
                write!(f, "definition must be a JSON object, found {found}")
            }
            DefinitionError::Malformed(msg) => write!(f, "malformed definition: {msg}"),
        }
    }
}

impl std::error::Error for DefinitionError {}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn object_from_value(value: Value) -> Result<Map<String, Value>, DefinitionError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(DefinitionError::NotAnObject {
            found: json_kind(&other),
        }),
    }
}

fn object_from_str(raw: &str) -> Result<Map<String, Value>, DefinitionError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| DefinitionError::Malformed(e.to_string()))?;
    object_from_value(value)
}

/// Engine source description (`{"type": "vector", "tiles": [...]}` and friends).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct SourceDefinition(Map<String, Value>);

impl SourceDefinition {
    pub(crate) fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn from_value(value: Value) -> Result<Self, DefinitionError> {
        object_from_value(value).map(Self)
    }

    pub fn parse(raw: &str) -> Result<Self, DefinitionError> {
        object_from_str(raw).map(Self)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl TryFrom<Value> for SourceDefinition {
    type Error = DefinitionError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl From<SourceDefinition> for Value {
    fn from(def: SourceDefinition) -> Self {
        Value::Object(def.0)
    }
}

/// Engine layer description (`id`, `type`, `source`, `layout`, `paint`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct LayerDefinition(Map<String, Value>);

impl LayerDefinition {
    pub(crate) fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    pub fn from_value(value: Value) -> Result<Self, DefinitionError> {
        object_from_value(value).map(Self)
    }

    pub fn parse(raw: &str) -> Result<Self, DefinitionError> {
        object_from_str(raw).map(Self)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    pub fn source(&self) -> Option<&str> {
        self.0.get("source").and_then(Value::as_str)
    }

    /// Renderer type as written in the definition (`circle`, `line`, ...).
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    /// `layout.visibility` decoded to a boolean, if present.
    pub fn visibility(&self) -> Option<bool> {
        match self.0.get("layout")?.get("visibility")?.as_str()? {
            "visible" => Some(true),
            "none" => Some(false),
            _ => None,
        }
    }

    /// Pins the definition to the engine ids derived from `key`.
    pub fn bind_to(mut self, key: &LayerKey) -> Self {
        self.0.insert("id".to_string(), Value::String(key.layer_id()));
        self.0
            .insert("source".to_string(), Value::String(key.source_id()));
        self
    }

    pub fn with_visibility(mut self, visible: bool) -> Self {
        let layout = self
            .0
            .entry("layout")
            .or_insert_with(|| Value::Object(Map::new()));
        if !layout.is_object() {
            *layout = Value::Object(Map::new());
        }
        if let Value::Object(layout) = layout {
            layout.insert(
                "visibility".to_string(),
                Value::String(layout_visibility(visible).to_string()),
            );
        }
        self
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.0.clone())
    }
}

impl TryFrom<Value> for LayerDefinition {
    type Error = DefinitionError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl From<LayerDefinition> for Value {
    fn from(def: LayerDefinition) -> Self {
        Value::Object(def.0)
    }
}

/// Render filter expression, e.g. `["==", ["get", "kind"], "primary"]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterExpression(Value);

impl FilterExpression {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn parse(raw: &str) -> Result<Self, DefinitionError> {
        serde_json::from_str(raw)
            .map(Self)
            .map_err(|e| DefinitionError::Malformed(e.to_string()))
    }

    /// A non-empty array led by a string operator.
    pub fn is_well_formed(&self) -> bool {
        self.operator().is_some()
    }

    pub fn operator(&self) -> Option<&str> {
        match &self.0 {
            Value::Array(items) => items.first()?.as_str().filter(|op| !op.is_empty()),
            _ => None,
        }
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{DefinitionError, FilterExpression, LayerDefinition, SourceDefinition};
    use crate::layer::LayerKey;

    #[test]
    fn parses_stringified_definitions() {
        let def = SourceDefinition::parse(r#"{"type":"geojson","data":"x.json"}"#).unwrap();
        assert_eq!(def.kind(), Some("geojson"));
    }

    #[test]
    fn rejects_non_objects() {
        let err = LayerDefinition::from_value(json!(["circle"])).unwrap_err();
        assert_eq!(err, DefinitionError::NotAnObject { found: "array" });
        assert!(matches!(
            SourceDefinition::parse("{not json"),
            Err(DefinitionError::Malformed(_))
        ));
    }

    #[test]
    fn binding_overrides_foreign_ids() {
        let def = LayerDefinition::from_value(json!({
            "id": "legacy",
            "type": "fill",
            "source": "elsewhere",
        }))
        .unwrap()
        .bind_to(&LayerKey::from("parcels"));
        assert_eq!(def.id(), Some("parcels-layer"));
        assert_eq!(def.source(), Some("parcels-source"));
        assert_eq!(def.kind(), Some("fill"));
    }

    #[test]
    fn visibility_is_written_into_layout() {
        let def = LayerDefinition::from_value(json!({"id": "a", "layout": "bogus"}))
            .unwrap()
            .with_visibility(false);
        assert_eq!(def.visibility(), Some(false));
        assert_eq!(def.get("layout"), Some(&json!({"visibility": "none"})));

        let def = def.with_visibility(true);
        assert_eq!(def.visibility(), Some(true));
    }

    #[test]
    fn filter_shape_checks() {
        assert!(FilterExpression::new(json!(["==", "kind", "road"])).is_well_formed());
        assert!(!FilterExpression::new(json!([])).is_well_formed());
        assert!(!FilterExpression::new(json!({"op": "=="})).is_well_formed());
        assert!(!FilterExpression::new(json!([1, 2])).is_well_formed());
        assert_eq!(
            FilterExpression::parse(r#"["has","name"]"#).unwrap().operator(),
            Some("has")
        );
    }
}
