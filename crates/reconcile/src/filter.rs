//! Dynamic filter resolution for newly added layers.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;

use layers::{DesiredLayer, FilterExpression, LayerKey};
use serde::Serialize;
use tracing::warn;

/// Type alias for a boxed future that can be sent between threads.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterError {
    pub message: String,
}

impl FilterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FilterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "filter resolution failed: {}", self.message)
    }
}

impl std::error::Error for FilterError {}

/// Looks up the filter a layer should currently be drawn with.
///
/// `Ok(None)` means no dynamic filter is available for the layer. Methods
/// return boxed futures for dyn-compatibility.
pub trait FilterResolver: Send + Sync {
    fn resolve<'a>(
        &'a self,
        layer: &'a DesiredLayer,
    ) -> BoxFuture<'a, Result<Option<FilterExpression>, FilterError>>;
}

/// Resolver for deployments without dynamic filtering.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDynamicFilters;

impl FilterResolver for NoDynamicFilters {
    fn resolve<'a>(
        &'a self,
        _layer: &'a DesiredLayer,
    ) -> BoxFuture<'a, Result<Option<FilterExpression>, FilterError>> {
        Box::pin(async { Ok(None) })
    }
}

/// A fixed table of per-key answers.
#[derive(Debug, Default, Clone)]
pub struct FixedFilters {
    answers: BTreeMap<LayerKey, Result<FilterExpression, FilterError>>,
}

impl FixedFilters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, key: impl Into<LayerKey>, filter: FilterExpression) -> Self {
        self.answers.insert(key.into(), Ok(filter));
        self
    }

    pub fn with_failure(mut self, key: impl Into<LayerKey>, message: impl Into<String>) -> Self {
        self.answers
            .insert(key.into(), Err(FilterError::new(message)));
        self
    }
}

impl FilterResolver for FixedFilters {
    fn resolve<'a>(
        &'a self,
        layer: &'a DesiredLayer,
    ) -> BoxFuture<'a, Result<Option<FilterExpression>, FilterError>> {
        let answer = self.answers.get(&layer.key).cloned().transpose();
        Box::pin(async move { answer })
    }
}

/// Where the filter applied to a layer came from.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterSource {
    Dynamic,
    Static,
    None,
}

/// Picks the filter for `layer` given what the resolver returned.
///
/// Resolver errors and malformed answers fall back to the layer's static
/// filter, and to no filter at all when that is missing too.
pub fn choose_filter(
    layer: &DesiredLayer,
    resolved: Result<Option<FilterExpression>, FilterError>,
) -> (Option<FilterExpression>, FilterSource) {
    match resolved {
        Ok(Some(filter)) if filter.is_well_formed() => return (Some(filter), FilterSource::Dynamic),
        Ok(Some(filter)) => warn!(
            "Ignoring malformed dynamic filter for {}: {}",
            layer.key,
            filter.as_value()
        ),
        Ok(None) => {}
        Err(e) => warn!("Filter resolution for {} failed: {e}", layer.key),
    }

    match &layer.filter_spec {
        Some(filter) if filter.is_well_formed() => (Some(filter.clone()), FilterSource::Static),
        Some(filter) => {
            warn!(
                "Ignoring malformed static filter for {}: {}",
                layer.key,
                filter.as_value()
            );
            (None, FilterSource::None)
        }
        None => (None, FilterSource::None),
    }
}

#[cfg(test)]
mod tests {
    use layers::{DesiredLayer, FilterExpression};
    use serde_json::json;

    use super::{FilterError, FilterResolver, FilterSource, FixedFilters, choose_filter};

    fn expr(value: serde_json::Value) -> FilterExpression {
        FilterExpression::new(value)
    }

    #[test]
    fn dynamic_filter_wins_when_well_formed() {
        let layer = DesiredLayer::new("roads", true).with_filter(expr(json!(["has", "name"])));
        let dynamic = expr(json!(["==", "class", "primary"]));
        assert_eq!(
            choose_filter(&layer, Ok(Some(dynamic.clone()))),
            (Some(dynamic), FilterSource::Dynamic)
        );
    }

    #[test]
    fn falls_back_to_static_filter() {
        let fallback = expr(json!(["has", "name"]));
        let layer = DesiredLayer::new("roads", true).with_filter(fallback.clone());

        for resolved in [
            Err(FilterError::new("backend down")),
            Ok(Some(expr(json!({"not": "an array"})))),
            Ok(None),
        ] {
            assert_eq!(
                choose_filter(&layer, resolved),
                (Some(fallback.clone()), FilterSource::Static)
            );
        }
    }

    #[test]
    fn no_filter_without_fallback() {
        let layer = DesiredLayer::new("roads", true);
        assert_eq!(
            choose_filter(&layer, Err(FilterError::new("boom"))),
            (None, FilterSource::None)
        );

        let layer = DesiredLayer::new("roads", true).with_filter(expr(json!([])));
        assert_eq!(choose_filter(&layer, Ok(None)), (None, FilterSource::None));
    }

    #[tokio::test]
    async fn fixed_filters_answer_per_key() {
        let resolver = FixedFilters::new()
            .with_filter("roads", expr(json!(["has", "lanes"])))
            .with_failure("parks", "timeout");

        let roads = DesiredLayer::new("roads", true);
        let parks = DesiredLayer::new("parks", true);
        let rivers = DesiredLayer::new("rivers", true);

        assert!(resolver.resolve(&roads).await.unwrap().is_some());
        assert_eq!(
            resolver.resolve(&parks).await,
            Err(FilterError::new("timeout"))
        );
        assert_eq!(resolver.resolve(&rivers).await, Ok(None));
    }
}
