//! Scripted sessions replayed against an in-memory engine.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use catalog::{InMemoryLayerStore, LayerRecord, LayerSession, NewLayer};
use layers::FilterExpression;
use parking_lot::Mutex;
use reconcile::{
    EngineCall, EngineOp, FixedFilters, PassReport, RecordingEngine, SyncConfig, SyncHandle,
    Synchronizer,
};
use runtime::EventBus;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct Scenario {
    /// Whether the engine has finished loading when the session starts.
    #[serde(default = "default_true")]
    pub engine_ready: bool,
    /// Layer records persisted before the session starts.
    #[serde(default)]
    pub layers: Vec<LayerRecord>,
    /// Dynamic filter answers by layer key.
    #[serde(default)]
    pub filters: BTreeMap<String, FilterAnswer>,
    pub steps: Vec<Step>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum FilterAnswer {
    Failure { error: String },
    Expression(Value),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    /// Publish the session's current desired set.
    Publish,
    Toggle { layer: String },
    Delete { layer: String },
    Add { layer: NewLayer },
    /// Remount the view: local visibility overrides are dropped.
    Reload,
    ReloadStyle,
    FinishStyleLoad,
    SetReady,
    Pause,
    Resume,
    WaitMs { ms: u64 },
    FailNext { op: EngineOp, id: String },
}

#[derive(Debug, Serialize)]
pub struct ReplayOutput {
    pub calls: Vec<EngineCall>,
    pub settled: Vec<PassReport>,
    pub live_layers: Vec<String>,
    pub teardown: Vec<EngineCall>,
}

impl Scenario {
    pub fn parse(raw: &str) -> Result<Self, String> {
        serde_json::from_str(raw).map_err(|e| format!("invalid scenario: {e}"))
    }

    fn filter_resolver(&self) -> FixedFilters {
        let mut filters = FixedFilters::new();
        for (key, answer) in &self.filters {
            filters = match answer {
                FilterAnswer::Failure { error } => filters.with_failure(key.as_str(), error.clone()),
                FilterAnswer::Expression(value) => {
                    filters.with_filter(key.as_str(), FilterExpression::new(value.clone()))
                }
            };
        }
        filters
    }
}

struct Replay {
    session: LayerSession<InMemoryLayerStore>,
    handle: SyncHandle,
    engine: RecordingEngine,
}

impl Replay {
    fn publish(&self) -> Result<(), String> {
        let desired = self.session.desired().map_err(|e| e.to_string())?;
        self.handle.publish(desired);
        Ok(())
    }

    fn record_id(&self, key: &str) -> Result<u64, String> {
        self.session
            .find_by_key(key)
            .map_err(|e| e.to_string())?
            .map(|record| record.id)
            .ok_or_else(|| format!("no layer named {key:?}"))
    }

    async fn apply(&mut self, step: Step) -> Result<(), String> {
        match step {
            Step::Publish => self.publish()?,
            Step::Toggle { layer } => {
                let id = self.record_id(&layer)?;
                self.session.toggle_visibility(id).map_err(|e| e.to_string())?;
                self.publish()?;
            }
            Step::Delete { layer } => {
                let id = self.record_id(&layer)?;
                self.session.delete(id).map_err(|e| e.to_string())?;
                self.publish()?;
            }
            Step::Add { layer } => {
                self.session.add(layer).map_err(|e| e.to_string())?;
                self.publish()?;
            }
            Step::Reload => {
                self.session.reload();
                self.publish()?;
            }
            Step::ReloadStyle => self.engine.reload_style(),
            Step::FinishStyleLoad => self.engine.finish_style_load(),
            Step::SetReady => {
                self.engine.finish_load();
                self.engine.finish_style_load();
            }
            Step::Pause => self.handle.set_should_process(false),
            Step::Resume => self.handle.set_should_process(true),
            Step::WaitMs { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
            Step::FailNext { op, id } => self.engine.fail_next(op, id),
        }
        Ok(())
    }
}

/// Runs `scenario` to completion and collects what the engine saw.
pub async fn replay(scenario: Scenario, config: &SyncConfig) -> Result<ReplayOutput, String> {
    let bus = EventBus::default();
    let engine = if scenario.engine_ready {
        RecordingEngine::new()
    } else {
        RecordingEngine::loading()
    }
    .with_events(bus.clone());

    let settled = Arc::new(Mutex::new(Vec::new()));
    let sink = settled.clone();
    let (sync, handle) = Synchronizer::new(engine.clone(), bus.subscribe(), config);
    let task = sync
        .with_filter_resolver(Arc::new(scenario.filter_resolver()))
        .on_settled(move |report| sink.lock().push(report.clone()))
        .spawn();

    let mut replay = Replay {
        session: LayerSession::new(InMemoryLayerStore::with_records(scenario.layers)),
        handle,
        engine,
    };
    for (index, step) in scenario.steps.into_iter().enumerate() {
        debug!("Step {index}: {step:?}");
        replay.apply(step).await?;
        tokio::task::yield_now().await;
    }

    let longest = config.settle.empty_ms.max(config.settle.populated_ms);
    tokio::time::sleep(Duration::from_millis(longest + 50)).await;

    let calls = replay.engine.take_calls();
    let live_layers = replay.engine.layer_ids();
    let Replay { handle, .. } = replay;
    drop(handle);
    let engine = task.await.map_err(|e| format!("synchronizer task failed: {e}"))?;

    let settled = std::mem::take(&mut *settled.lock());
    Ok(ReplayOutput {
        calls,
        settled,
        live_layers,
        teardown: engine.take_calls(),
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use reconcile::{EngineCall, SyncConfig};
    use serde_json::json;

    use super::{Scenario, replay};

    fn scenario(value: serde_json::Value) -> Scenario {
        serde_json::from_value(value).expect("scenario")
    }

    fn visibility_calls(calls: &[EngineCall]) -> Vec<(String, bool)> {
        calls
            .iter()
            .filter_map(|call| match call {
                EngineCall::SetLayoutVisibility { layer_id, visible } => {
                    Some((layer_id.clone(), *visible))
                }
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn replays_a_session() {
        let scenario = scenario(json!({
            "layers": [
                {"id": 1, "name": "roads", "geometry_type": "LineString", "is_visible": true},
                {"id": 2, "name": "parks", "geometry_type": "Polygon", "is_visible": false}
            ],
            "filters": {
                "roads": ["==", "class", "primary"],
                "parks": {"error": "filter service down"}
            },
            "steps": [
                {"step": "publish"},
                {"step": "wait_ms", "ms": 10},
                {"step": "toggle", "layer": "parks"},
                {"step": "wait_ms", "ms": 10},
                {"step": "delete", "layer": "roads"},
                {"step": "add", "layer": {"name": "rivers", "geometry_type": "MultiLineString"}}
            ]
        }));

        let output = replay(scenario, &SyncConfig::default()).await.unwrap();

        assert_eq!(output.live_layers, vec!["parks-layer", "rivers-layer"]);
        assert!(output.calls.contains(&EngineCall::SetFilter {
            layer_id: "roads-layer".to_string(),
            filter: Some(json!(["==", "class", "primary"])),
        }));
        assert!(
            visibility_calls(&output.calls).contains(&("parks-layer".to_string(), true))
        );
        assert_eq!(output.settled.last().unwrap().desired, 2);
        assert_eq!(output.teardown.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_happens_until_the_engine_loads() {
        let scenario = scenario(json!({
            "engine_ready": false,
            "layers": [{"id": 1, "name": "roads", "geometry_type": "LineString", "is_visible": true}],
            "steps": [
                {"step": "publish"},
                {"step": "wait_ms", "ms": 300},
                {"step": "set_ready"},
                {"step": "wait_ms", "ms": 10}
            ]
        }));

        let output = replay(scenario, &SyncConfig::default()).await.unwrap();
        assert_eq!(output.live_layers, vec!["roads-layer"]);
        assert!(matches!(output.calls[0], EngineCall::AddSource { .. }));
    }

    #[test]
    fn unknown_steps_are_rejected() {
        let err = Scenario::parse(r#"{"steps": [{"step": "explode"}]}"#).unwrap_err();
        assert!(err.starts_with("invalid scenario"));
    }
}
