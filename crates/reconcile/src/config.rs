use layers::DefaultDefinitions;
use runtime::{ReadinessConfig, RetryPolicy, SettleDelays};
use serde::Deserialize;

/// Everything tunable about layer synchronization. Missing fields keep
/// their defaults, so a partial JSON document is a valid config.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Backoff while the engine style is still loading.
    pub retry: RetryPolicy,
    pub readiness: ReadinessConfig,
    pub settle: SettleDelays,
    pub defaults: DefaultDefinitions,
}

impl SyncConfig {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::SyncConfig;

    #[test]
    fn partial_documents_keep_defaults() {
        let config = SyncConfig::from_json(
            r#"{
                "retry": {"max_attempts": 3},
                "settle": {"populated_ms": 250},
                "defaults": {"tile_url_template": "https://tiles.example/{key}/{z}/{x}/{y}.pbf"}
            }"#,
        )
        .unwrap();

        let defaults = SyncConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.initial_delay_ms, defaults.retry.initial_delay_ms);
        assert_eq!(config.settle.populated_ms, 250);
        assert_eq!(config.settle.empty_ms, 100);
        assert_eq!(config.readiness, defaults.readiness);
        assert_eq!(config.defaults.source_layer, "features");
        assert_eq!(
            config.defaults.tile_url_template,
            "https://tiles.example/{key}/{z}/{x}/{y}.pbf"
        );
    }

    #[test]
    fn empty_document_is_the_default() {
        assert_eq!(SyncConfig::from_json("{}").unwrap(), SyncConfig::default());
    }
}
