use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::definition::{LayerDefinition, SourceDefinition};
use crate::desired::{DesiredLayer, GeometryType};
use crate::layer::LayerKey;
use crate::visibility::layout_visibility;

/// The engine's primitive drawing mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererType {
    Circle,
    Line,
    Fill,
}

impl RendererType {
    /// Points draw as circles, lines as lines, areas as fills. Anything else,
    /// including an unknown geometry, falls back to circles.
    pub fn from_geometry(geometry: Option<&GeometryType>) -> Self {
        match geometry {
            Some(GeometryType::Point | GeometryType::MultiPoint) => RendererType::Circle,
            Some(GeometryType::LineString | GeometryType::MultiLineString) => RendererType::Line,
            Some(GeometryType::Polygon | GeometryType::MultiPolygon) => RendererType::Fill,
            Some(GeometryType::Other(_)) | None => RendererType::Circle,
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "circle" => Some(RendererType::Circle),
            "line" => Some(RendererType::Line),
            "fill" => Some(RendererType::Fill),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RendererType::Circle => "circle",
            RendererType::Line => "line",
            RendererType::Fill => "fill",
        }
    }
}

/// Minimal paint for a renderer type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Paint {
    Circle {
        #[serde(rename = "circle-radius")]
        radius: f64,
        #[serde(rename = "circle-color")]
        color: String,
    },
    Line {
        #[serde(rename = "line-color")]
        color: String,
        #[serde(rename = "line-width")]
        width: f64,
    },
    Fill {
        #[serde(rename = "fill-color")]
        color: String,
        #[serde(rename = "fill-opacity")]
        opacity: f64,
    },
}

impl Paint {
    pub fn to_value(&self) -> Value {
        match self {
            Paint::Circle { radius, color } => json!({
                "circle-radius": radius,
                "circle-color": color,
            }),
            Paint::Line { color, width } => json!({
                "line-color": color,
                "line-width": width,
            }),
            Paint::Fill { color, opacity } => json!({
                "fill-color": color,
                "fill-opacity": opacity,
            }),
        }
    }
}

/// Parameters for definitions derived when a layer carries none of its own.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DefaultDefinitions {
    /// Vector tile URL; `{key}` is replaced by the layer key, `{z}/{x}/{y}`
    /// are left for the engine.
    pub tile_url_template: String,
    pub min_zoom: u8,
    pub max_zoom: u8,
    /// Layer name inside the vector tiles.
    pub source_layer: String,
    pub color: String,
    pub circle_radius: f64,
    pub line_width: f64,
    pub fill_opacity: f64,
}

impl Default for DefaultDefinitions {
    fn default() -> Self {
        Self {
            tile_url_template: "http://localhost:8000/api/tiling/mvt/{key}/{z}/{x}/{y}.pbf"
                .to_string(),
            min_zoom: 0,
            max_zoom: 22,
            source_layer: "features".to_string(),
            color: "#000000".to_string(),
            circle_radius: 2.0,
            line_width: 0.75,
            fill_opacity: 0.3,
        }
    }
}

/// Source and layer definitions ready to hand to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDefinitions {
    pub source: SourceDefinition,
    pub layer: LayerDefinition,
}

impl DefaultDefinitions {
    pub fn paint(&self, renderer: RendererType, color: Option<&str>) -> Paint {
        let color = color.unwrap_or(&self.color).to_string();
        match renderer {
            RendererType::Circle => Paint::Circle {
                radius: self.circle_radius,
                color,
            },
            RendererType::Line => Paint::Line {
                color,
                width: self.line_width,
            },
            RendererType::Fill => Paint::Fill {
                color,
                opacity: self.fill_opacity,
            },
        }
    }

    pub fn tile_url(&self, key: &LayerKey) -> String {
        self.tile_url_template.replace("{key}", key.as_str())
    }

    pub fn source(&self, key: &LayerKey) -> SourceDefinition {
        let mut map = Map::new();
        map.insert("type".to_string(), json!("vector"));
        map.insert("tiles".to_string(), json!([self.tile_url(key)]));
        map.insert("minzoom".to_string(), json!(self.min_zoom));
        map.insert("maxzoom".to_string(), json!(self.max_zoom));
        SourceDefinition::from_map(map)
    }

    pub fn layer(
        &self,
        key: &LayerKey,
        renderer: RendererType,
        color: Option<&str>,
        visible: bool,
    ) -> LayerDefinition {
        let mut map = Map::new();
        map.insert("id".to_string(), json!(key.layer_id()));
        map.insert("type".to_string(), json!(renderer.as_str()));
        map.insert("source".to_string(), json!(key.source_id()));
        map.insert("source-layer".to_string(), json!(self.source_layer));
        map.insert(
            "layout".to_string(),
            json!({ "visibility": layout_visibility(visible) }),
        );
        map.insert(
            "paint".to_string(),
            self.paint(renderer, color).to_value(),
        );
        LayerDefinition::from_map(map)
    }

    /// Definitions for `layer`: explicit ones win, the rest are derived from
    /// its geometry type and color.
    ///
    /// The layer definition is always bound to the key's engine ids and
    /// carries the layer's current effective visibility in its layout.
    pub fn resolve(&self, layer: &DesiredLayer) -> ResolvedDefinitions {
        let visible = layer.effective_visible();
        let source = layer
            .source_definition
            .clone()
            .unwrap_or_else(|| self.source(&layer.key));

        let definition = match &layer.layer_definition {
            Some(explicit) => explicit
                .clone()
                .bind_to(&layer.key)
                .with_visibility(visible),
            None => {
                let renderer = layer
                    .renderer
                    .unwrap_or_else(|| RendererType::from_geometry(layer.geometry_type.as_ref()));
                self.layer(&layer.key, renderer, layer.color.as_deref(), visible)
            }
        };

        ResolvedDefinitions {
            source,
            layer: definition,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::{DefaultDefinitions, Paint, RendererType};
    use crate::definition::{LayerDefinition, SourceDefinition};
    use crate::desired::{DesiredLayer, GeometryType};
    use crate::layer::LayerKey;

    #[test]
    fn renderer_follows_geometry() {
        let cases = [
            ("Point", RendererType::Circle),
            ("MultiPoint", RendererType::Circle),
            ("LineString", RendererType::Line),
            ("MultiLineString", RendererType::Line),
            ("Polygon", RendererType::Fill),
            ("MultiPolygon", RendererType::Fill),
            ("GeometryCollection", RendererType::Circle),
        ];
        for (name, expected) in cases {
            let geometry = GeometryType::parse(name);
            assert_eq!(RendererType::from_geometry(Some(&geometry)), expected, "{name}");
        }
        assert_eq!(RendererType::from_geometry(None), RendererType::Circle);
    }

    #[test]
    fn paint_uses_fixed_defaults() {
        let defaults = DefaultDefinitions::default();
        assert_eq!(
            defaults.paint(RendererType::Line, None).to_value(),
            json!({"line-color": "#000000", "line-width": 0.75})
        );
        assert_eq!(
            defaults.paint(RendererType::Fill, Some("#ff0000")),
            Paint::Fill {
                color: "#ff0000".to_string(),
                opacity: 0.3
            }
        );
        assert_eq!(
            defaults.paint(RendererType::Circle, None).to_value(),
            json!({"circle-radius": 2.0, "circle-color": "#000000"})
        );
    }

    #[test]
    fn paint_serializes_like_its_value() {
        let paint = DefaultDefinitions::default().paint(RendererType::Circle, Some("#00ff00"));
        assert_eq!(serde_json::to_value(&paint).unwrap(), paint.to_value());
    }

    #[test]
    fn default_source_is_a_vector_tile_source() {
        let source = DefaultDefinitions::default().source(&LayerKey::from("roads"));
        assert_eq!(
            source.to_value(),
            json!({
                "type": "vector",
                "tiles": ["http://localhost:8000/api/tiling/mvt/roads/{z}/{x}/{y}.pbf"],
                "minzoom": 0,
                "maxzoom": 22,
            })
        );
    }

    #[test]
    fn derived_layer_for_lines() {
        let layer = DesiredLayer::new("roads", true).with_geometry(GeometryType::LineString);
        let resolved = DefaultDefinitions::default().resolve(&layer);
        assert_eq!(
            resolved.layer.to_value(),
            json!({
                "id": "roads-layer",
                "type": "line",
                "source": "roads-source",
                "source-layer": "features",
                "layout": {"visibility": "visible"},
                "paint": {"line-color": "#000000", "line-width": 0.75},
            })
        );
    }

    #[test]
    fn explicit_definitions_take_priority() {
        let source = SourceDefinition::from_value(json!({"type": "geojson", "data": "/x"})).unwrap();
        let layer_def =
            LayerDefinition::from_value(json!({"id": "x", "type": "fill", "paint": {}})).unwrap();
        let layer = DesiredLayer::new("parcels", false)
            .with_geometry(GeometryType::Point)
            .with_source_definition(source.clone())
            .with_layer_definition(layer_def);

        let resolved = DefaultDefinitions::default().resolve(&layer);
        assert_eq!(resolved.source, source);
        assert_eq!(resolved.layer.kind(), Some("fill"));
        assert_eq!(resolved.layer.id(), Some("parcels-layer"));
        assert_eq!(resolved.layer.visibility(), Some(false));
    }

    #[test]
    fn renderer_override_beats_geometry() {
        let layer = DesiredLayer::new("stops", true)
            .with_geometry(GeometryType::Polygon)
            .with_renderer(RendererType::Circle);
        let resolved = DefaultDefinitions::default().resolve(&layer);
        assert_eq!(resolved.layer.kind(), Some("circle"));
    }
}
