use serde::{Deserialize, Serialize};

/// Stable identity of a layer, derived from the dataset's original name.
///
/// The engine-side source and layer ids are pure functions of the key, so a
/// key maps to at most one source and one layer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LayerKey(String);

impl LayerKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn source_id(&self) -> String {
        format!("{}-source", self.0)
    }

    pub fn layer_id(&self) -> String {
        format!("{}-layer", self.0)
    }
}

impl std::fmt::Display for LayerKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LayerKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for LayerKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}
