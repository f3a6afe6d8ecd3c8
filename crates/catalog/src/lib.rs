//! Desired-layer ingestion.
//!
//! Layer records come from the backend in one loose shape whose fields are
//! present or absent depending on where the layer came from. They are split
//! into [`CatalogLayer`] and [`UploadedLayer`] here, each carrying only what it
//! guarantees, and normalized into [`DesiredLayer`] before reconciliation sees
//! them.

use std::collections::BTreeMap;

use layers::{
    DesiredLayer, FilterExpression, GeometryType, LayerDefinition, LayerKey, RendererType,
    SourceDefinition,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod session;

pub use session::LayerSession;

/// A JSON document stored either inline or as an encoded string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddedJson {
    Text(String),
    Value(Value),
}

impl EmbeddedJson {
    pub fn into_value(self) -> Result<Value, serde_json::Error> {
        match self {
            EmbeddedJson::Text(raw) => serde_json::from_str(&raw),
            EmbeddedJson::Value(value) => Ok(value),
        }
    }
}

/// A persisted map layer, as the backend stores it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRecord {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default = "default_layer_type")]
    pub layer_type: String,
    #[serde(default)]
    pub geometry_type: Option<String>,
    #[serde(default)]
    pub is_visible: Option<bool>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub mapbox_type: Option<String>,
    #[serde(default)]
    pub mapbox_source: Option<EmbeddedJson>,
    #[serde(default)]
    pub mapbox_layer: Option<EmbeddedJson>,
    #[serde(default)]
    pub filter: Option<EmbeddedJson>,
}

fn default_layer_type() -> String {
    "catalog".to_string()
}

impl LayerRecord {
    /// The original (table) name, falling back to the display name.
    pub fn key_name(&self) -> &str {
        match self.original_name.as_deref() {
            Some(original) if !original.trim().is_empty() => original,
            _ => &self.name,
        }
    }

    pub fn is_upload(&self) -> bool {
        matches!(
            self.layer_type.to_ascii_lowercase().as_str(),
            "upload" | "uploaded" | "geojson"
        )
    }
}

/// Request to create a layer record; unset fields take backend defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLayer {
    pub name: String,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub layer_type: Option<String>,
    #[serde(default)]
    pub geometry_type: Option<String>,
    #[serde(default)]
    pub is_visible: Option<bool>,
    #[serde(default)]
    pub color: Option<String>,
}

impl NewLayer {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn into_record(self, id: u64) -> LayerRecord {
        let original_name = self.original_name.unwrap_or_else(|| self.name.clone());
        LayerRecord {
            id,
            name: self.name,
            original_name: Some(original_name),
            layer_type: self.layer_type.unwrap_or_else(default_layer_type),
            geometry_type: self.geometry_type,
            is_visible: Some(self.is_visible.unwrap_or(true)),
            color: Some(self.color.unwrap_or_else(|| "#000000".to_string())),
            mapbox_type: None,
            mapbox_source: None,
            mapbox_layer: None,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    MissingKey {
        id: u64,
    },
    MalformedDefinition {
        id: u64,
        field: &'static str,
        reason: String,
    },
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::MissingKey { id } => write!(f, "layer record {id} has no usable name"),
            IngestError::MalformedDefinition { id, field, reason } => {
                write!(f, "layer record {id}: malformed {field}: {reason}")
            }
        }
    }
}

impl std::error::Error for IngestError {}

/// A layer added from the backend's dataset catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogLayer {
    pub table: String,
    pub geometry_type: Option<GeometryType>,
    pub renderer: Option<RendererType>,
    pub color: Option<String>,
    pub source_definition: Option<SourceDefinition>,
    pub layer_definition: Option<LayerDefinition>,
    pub filter: Option<FilterExpression>,
    pub visible: bool,
}

/// A layer created from a user upload. Uploads never carry a stored layer
/// definition or filter; their styling is always derived.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadedLayer {
    pub name: String,
    pub geometry_type: Option<GeometryType>,
    pub color: Option<String>,
    pub source_definition: Option<SourceDefinition>,
    pub visible: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerOrigin {
    Catalog(CatalogLayer),
    Uploaded(UploadedLayer),
}

fn embedded<T>(
    id: u64,
    field: &'static str,
    raw: Option<&EmbeddedJson>,
    decode: impl FnOnce(Value) -> Result<T, String>,
) -> Result<Option<T>, IngestError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let malformed = |reason: String| IngestError::MalformedDefinition { id, field, reason };
    let value = raw.clone().into_value().map_err(|e| malformed(e.to_string()))?;
    if value.is_null() {
        return Ok(None);
    }
    decode(value).map(Some).map_err(malformed)
}

impl LayerOrigin {
    pub fn from_record(record: &LayerRecord) -> Result<Self, IngestError> {
        let key = record.key_name().trim();
        if key.is_empty() {
            return Err(IngestError::MissingKey { id: record.id });
        }

        let geometry_type = record.geometry_type.as_deref().map(GeometryType::parse);
        let visible = record.is_visible.unwrap_or(false);
        let source_definition = embedded(
            record.id,
            "mapbox_source",
            record.mapbox_source.as_ref(),
            |v| SourceDefinition::from_value(v).map_err(|e| e.to_string()),
        )?;

        if record.is_upload() {
            return Ok(LayerOrigin::Uploaded(UploadedLayer {
                name: key.to_string(),
                geometry_type,
                color: record.color.clone(),
                source_definition,
                visible,
            }));
        }

        let layer_definition = embedded(
            record.id,
            "mapbox_layer",
            record.mapbox_layer.as_ref(),
            |v| LayerDefinition::from_value(v).map_err(|e| e.to_string()),
        )?;
        let filter = embedded(record.id, "filter", record.filter.as_ref(), |v| {
            Ok(FilterExpression::new(v))
        })?;

        Ok(LayerOrigin::Catalog(CatalogLayer {
            table: key.to_string(),
            geometry_type,
            renderer: record.mapbox_type.as_deref().and_then(RendererType::parse),
            color: record.color.clone(),
            source_definition,
            layer_definition,
            filter,
            visible,
        }))
    }

    pub fn key(&self) -> LayerKey {
        match self {
            LayerOrigin::Catalog(layer) => LayerKey::new(layer.table.clone()),
            LayerOrigin::Uploaded(layer) => LayerKey::new(layer.name.clone()),
        }
    }

    pub fn into_desired(self, local_visible: Option<bool>) -> DesiredLayer {
        match self {
            LayerOrigin::Catalog(layer) => DesiredLayer {
                key: LayerKey::new(layer.table),
                geometry_type: layer.geometry_type,
                renderer: layer.renderer,
                color: layer.color,
                source_definition: layer.source_definition,
                layer_definition: layer.layer_definition,
                filter_spec: layer.filter,
                persisted_visible: layer.visible,
                local_visible,
            },
            LayerOrigin::Uploaded(layer) => DesiredLayer {
                key: LayerKey::new(layer.name),
                geometry_type: layer.geometry_type,
                renderer: None,
                color: layer.color,
                source_definition: layer.source_definition,
                layer_definition: None,
                filter_spec: None,
                persisted_visible: layer.visible,
                local_visible,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    NotFound { id: u64 },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound { id } => write!(f, "layer record {id} not found"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Persistence for a user's map layers.
pub trait LayerStore {
    fn list(&self) -> Result<Vec<LayerRecord>, StoreError>;
    fn get(&self, id: u64) -> Result<Option<LayerRecord>, StoreError>;
    fn create(&mut self, layer: NewLayer) -> Result<LayerRecord, StoreError>;
    fn upsert(&mut self, record: LayerRecord) -> Result<(), StoreError>;
    fn set_visible(&mut self, id: u64, visible: bool) -> Result<LayerRecord, StoreError>;
    fn delete(&mut self, id: u64) -> Result<bool, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryLayerStore {
    records: BTreeMap<u64, LayerRecord>,
    next_id: u64,
}

impl InMemoryLayerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = LayerRecord>) -> Self {
        let mut store = Self::new();
        for record in records {
            store.next_id = store.next_id.max(record.id);
            store.records.insert(record.id, record);
        }
        store
    }
}

impl LayerStore for InMemoryLayerStore {
    fn list(&self) -> Result<Vec<LayerRecord>, StoreError> {
        Ok(self.records.values().cloned().collect())
    }

    fn get(&self, id: u64) -> Result<Option<LayerRecord>, StoreError> {
        Ok(self.records.get(&id).cloned())
    }

    fn create(&mut self, layer: NewLayer) -> Result<LayerRecord, StoreError> {
        self.next_id += 1;
        let record = layer.into_record(self.next_id);
        self.records.insert(record.id, record.clone());
        Ok(record)
    }

    fn upsert(&mut self, record: LayerRecord) -> Result<(), StoreError> {
        self.next_id = self.next_id.max(record.id);
        self.records.insert(record.id, record);
        Ok(())
    }

    fn set_visible(&mut self, id: u64, visible: bool) -> Result<LayerRecord, StoreError> {
        let record = self
            .records
            .get_mut(&id)
            .ok_or(StoreError::NotFound { id })?;
        record.is_visible = Some(visible);
        Ok(record.clone())
    }

    fn delete(&mut self, id: u64) -> Result<bool, StoreError> {
        Ok(self.records.remove(&id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use layers::{GeometryType, LayerKey, RendererType};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{
        EmbeddedJson, InMemoryLayerStore, IngestError, LayerOrigin, LayerRecord, LayerStore,
        NewLayer, StoreError,
    };

    fn record(value: serde_json::Value) -> LayerRecord {
        serde_json::from_value(value).expect("record")
    }

    #[test]
    fn catalog_record_normalizes_with_stringified_definitions() {
        let rec = record(json!({
            "id": 7,
            "name": "Roads",
            "original_name": "roads",
            "layer_type": "catalog",
            "geometry_type": "LINESTRING",
            "is_visible": true,
            "mapbox_source": "{\"type\":\"vector\",\"tiles\":[\"t\"]}",
            "mapbox_layer": {"id": "roads-layer", "type": "line"},
            "filter": "[\"==\",\"class\",\"primary\"]",
        }));

        let origin = LayerOrigin::from_record(&rec).unwrap();
        assert!(matches!(origin, LayerOrigin::Catalog(_)));
        assert_eq!(origin.key(), LayerKey::from("roads"));

        let desired = origin.into_desired(None);
        assert_eq!(desired.geometry_type, Some(GeometryType::LineString));
        assert_eq!(desired.source_definition.unwrap().kind(), Some("vector"));
        assert_eq!(desired.layer_definition.unwrap().kind(), Some("line"));
        assert_eq!(desired.filter_spec.unwrap().operator(), Some("=="));
        assert!(desired.persisted_visible);
    }

    #[test]
    fn key_falls_back_to_display_name() {
        let rec = record(json!({"id": 1, "name": "parks", "original_name": ""}));
        assert_eq!(LayerOrigin::from_record(&rec).unwrap().key(), LayerKey::from("parks"));

        let rec = record(json!({"id": 2, "name": "  "}));
        assert_eq!(
            LayerOrigin::from_record(&rec).unwrap_err(),
            IngestError::MissingKey { id: 2 }
        );
    }

    #[test]
    fn uploads_drop_catalog_only_fields() {
        let rec = record(json!({
            "id": 3,
            "name": "my_points",
            "layer_type": "upload",
            "geometry_type": "Point",
            "is_visible": false,
            "mapbox_type": "fill",
            "mapbox_layer": {"id": "ignored"},
            "filter": ["has", "x"],
        }));
        let desired = LayerOrigin::from_record(&rec).unwrap().into_desired(Some(true));
        assert_eq!(desired.renderer, None);
        assert_eq!(desired.layer_definition, None);
        assert_eq!(desired.filter_spec, None);
        assert!(desired.effective_visible());
    }

    #[test]
    fn renderer_override_comes_from_mapbox_type() {
        let rec = record(json!({"id": 4, "name": "zones", "mapbox_type": "Fill"}));
        let desired = LayerOrigin::from_record(&rec).unwrap().into_desired(None);
        assert_eq!(desired.renderer, Some(RendererType::Fill));
        assert!(!desired.persisted_visible);
    }

    #[test]
    fn malformed_definitions_are_reported() {
        let rec = LayerRecord {
            mapbox_source: Some(EmbeddedJson::Text("{oops".to_string())),
            ..record(json!({"id": 5, "name": "bad"}))
        };
        assert!(matches!(
            LayerOrigin::from_record(&rec),
            Err(IngestError::MalformedDefinition { id: 5, field: "mapbox_source", .. })
        ));

        let rec = record(json!({"id": 6, "name": "bad", "mapbox_layer": [1, 2]}));
        assert!(matches!(
            LayerOrigin::from_record(&rec),
            Err(IngestError::MalformedDefinition { field: "mapbox_layer", .. })
        ));
    }

    #[test]
    fn null_definitions_count_as_absent() {
        let rec = record(json!({"id": 8, "name": "x", "mapbox_source": null, "mapbox_layer": "null"}));
        let desired = LayerOrigin::from_record(&rec).unwrap().into_desired(None);
        assert_eq!(desired.source_definition, None);
        assert_eq!(desired.layer_definition, None);
    }

    #[test]
    fn store_create_applies_backend_defaults() {
        let mut store = InMemoryLayerStore::new();
        let rec = store.create(NewLayer::named("rivers")).unwrap();
        assert_eq!(rec.id, 1);
        assert_eq!(rec.original_name.as_deref(), Some("rivers"));
        assert_eq!(rec.layer_type, "catalog");
        assert_eq!(rec.is_visible, Some(true));
        assert_eq!(rec.color.as_deref(), Some("#000000"));

        let updated = store.set_visible(1, false).unwrap();
        assert_eq!(updated.is_visible, Some(false));
        assert_eq!(
            store.set_visible(99, true).unwrap_err(),
            StoreError::NotFound { id: 99 }
        );
        assert!(store.delete(1).unwrap());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn seeded_store_continues_ids() {
        let mut store = InMemoryLayerStore::with_records([record(json!({"id": 10, "name": "a"}))]);
        assert_eq!(store.create(NewLayer::named("b")).unwrap().id, 11);
    }
}
