use serde::{Deserialize, Serialize};

use crate::definition::{FilterExpression, LayerDefinition, SourceDefinition};
use crate::layer::LayerKey;
use crate::symbology::RendererType;
use crate::visibility::effective_visible;

/// Geometry type of a dataset as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GeometryType {
    Point,
    MultiPoint,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
    Other(String),
}

impl GeometryType {
    /// Case-insensitive; unknown names are kept verbatim.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "point" => GeometryType::Point,
            "multipoint" => GeometryType::MultiPoint,
            "linestring" => GeometryType::LineString,
            "multilinestring" => GeometryType::MultiLineString,
            "polygon" => GeometryType::Polygon,
            "multipolygon" => GeometryType::MultiPolygon,
            _ => GeometryType::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            GeometryType::Point => "Point",
            GeometryType::MultiPoint => "MultiPoint",
            GeometryType::LineString => "LineString",
            GeometryType::MultiLineString => "MultiLineString",
            GeometryType::Polygon => "Polygon",
            GeometryType::MultiPolygon => "MultiPolygon",
            GeometryType::Other(name) => name,
        }
    }
}

impl std::fmt::Display for GeometryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<String> for GeometryType {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<GeometryType> for String {
    fn from(geometry: GeometryType) -> Self {
        geometry.as_str().to_string()
    }
}

/// One layer the application wants rendered.
///
/// Immutable for the duration of a reconciliation pass; a new desired set is
/// a new snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct DesiredLayer {
    pub key: LayerKey,
    pub geometry_type: Option<GeometryType>,
    /// Explicit renderer choice; wins over the geometry-derived one.
    pub renderer: Option<RendererType>,
    pub color: Option<String>,
    pub source_definition: Option<SourceDefinition>,
    pub layer_definition: Option<LayerDefinition>,
    pub filter_spec: Option<FilterExpression>,
    pub persisted_visible: bool,
    pub local_visible: Option<bool>,
}

impl DesiredLayer {
    pub fn new(key: impl Into<LayerKey>, persisted_visible: bool) -> Self {
        Self {
            key: key.into(),
            geometry_type: None,
            renderer: None,
            color: None,
            source_definition: None,
            layer_definition: None,
            filter_spec: None,
            persisted_visible,
            local_visible: None,
        }
    }

    pub fn with_geometry(mut self, geometry: GeometryType) -> Self {
        self.geometry_type = Some(geometry);
        self
    }

    pub fn with_renderer(mut self, renderer: RendererType) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = Some(color.into());
        self
    }

    pub fn with_source_definition(mut self, def: SourceDefinition) -> Self {
        self.source_definition = Some(def);
        self
    }

    pub fn with_layer_definition(mut self, def: LayerDefinition) -> Self {
        self.layer_definition = Some(def);
        self
    }

    pub fn with_filter(mut self, filter: FilterExpression) -> Self {
        self.filter_spec = Some(filter);
        self
    }

    pub fn with_local_visible(mut self, visible: Option<bool>) -> Self {
        self.local_visible = visible;
        self
    }

    pub fn effective_visible(&self) -> bool {
        effective_visible(self.local_visible, Some(self.persisted_visible))
    }
}

#[cfg(test)]
mod tests {
    use super::{DesiredLayer, GeometryType};

    #[test]
    fn geometry_names_are_case_insensitive() {
        assert_eq!(GeometryType::parse("multipolygon"), GeometryType::MultiPolygon);
        assert_eq!(GeometryType::parse("LINESTRING"), GeometryType::LineString);
        assert_eq!(
            GeometryType::parse("GeometryCollection"),
            GeometryType::Other("GeometryCollection".to_string())
        );
    }

    #[test]
    fn geometry_serializes_as_canonical_name() {
        let json = serde_json::to_string(&GeometryType::parse("point")).unwrap();
        assert_eq!(json, "\"Point\"");
        let back: GeometryType = serde_json::from_str("\"polygon\"").unwrap();
        assert_eq!(back, GeometryType::Polygon);
    }

    #[test]
    fn effective_visibility_prefers_local_override() {
        let layer = DesiredLayer::new("roads", false).with_local_visible(Some(true));
        assert!(layer.effective_visible());
        let layer = layer.with_local_visible(None);
        assert!(!layer.effective_visible());
    }
}
