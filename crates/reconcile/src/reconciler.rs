//! Diffs a desired layer set against what is tracked and converges the
//! engine toward it.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::future::join_all;
use layers::{
    DefaultDefinitions, DesiredLayer, LayerKey, ResolvedDefinitions, ResourceTracker,
    TrackedLayer,
};
use runtime::RetryPolicy;
use tracing::{debug, info, warn};

use crate::engine::MapEngine;
use crate::filter::{FilterResolver, NoDynamicFilters, choose_filter};
use crate::pass::PassToken;
use crate::report::{FailureKind, PassOutcome, PassReport};

/// Converges an engine toward a desired layer set, one pass at a time.
pub struct Reconciler {
    defaults: DefaultDefinitions,
    retry: RetryPolicy,
    filters: Arc<dyn FilterResolver>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("defaults", &self.defaults)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new(DefaultDefinitions::default(), RetryPolicy::default())
    }
}

impl Reconciler {
    pub fn new(defaults: DefaultDefinitions, retry: RetryPolicy) -> Self {
        Self {
            defaults,
            retry,
            filters: Arc::new(NoDynamicFilters),
        }
    }

    pub fn with_filter_resolver(mut self, resolver: Arc<dyn FilterResolver>) -> Self {
        self.filters = resolver;
        self
    }

    /// Runs one reconciliation pass.
    ///
    /// Order within the pass: wait for the style, remove stale keys, add new
    /// keys, resolve filters for keys still waiting on one, converge
    /// visibility of every desired key, then request one repaint. Failures are absorbed per key and
    /// reported; nothing here returns an error.
    pub async fn reconcile<E: MapEngine + ?Sized>(
        &self,
        engine: &mut E,
        desired: &[DesiredLayer],
        tracker: &mut ResourceTracker,
        pass: &PassToken,
    ) -> PassReport {
        let mut report = PassReport::new(desired.len());

        let mut budget = self.retry.budget();
        while !engine.is_style_loaded() {
            if pass.is_superseded() {
                return superseded(report);
            }
            let Some(delay) = budget.next_delay() else {
                warn!(
                    "Style still loading after {} attempts; giving up on this pass",
                    budget.attempts()
                );
                report.outcome = PassOutcome::NotReady;
                return report;
            };
            report.deferrals += 1;
            debug!("Style not loaded; retrying pass in {}ms", delay.as_millis());
            tokio::time::sleep(delay).await;
        }

        let mut wanted = Vec::with_capacity(desired.len());
        let mut keys = BTreeSet::new();
        for layer in desired {
            if keys.insert(&layer.key) {
                wanted.push(layer);
            } else {
                warn!("Duplicate desired layer {}; keeping the first", layer.key);
                report.duplicates.push(layer.key.clone());
            }
        }

        for key in tracker.keys_not_in(|key| keys.contains(key)) {
            if pass.is_superseded() {
                return superseded(report);
            }
            remove_tracked(engine, tracker, &key, &mut report);
        }

        for layer in &wanted {
            if tracker.contains(&layer.key) {
                continue;
            }
            if pass.is_superseded() {
                return superseded(report);
            }
            self.add(engine, tracker, layer, &mut report);
        }

        // Fresh additions plus any key whose filter never landed in an
        // earlier pass (superseded mid-resolution, or `set_filter` failed).
        let unfiltered: Vec<&DesiredLayer> = wanted
            .iter()
            .copied()
            .filter(|layer| tracker.filter_pending(&layer.key))
            .collect();
        if !unfiltered.is_empty() {
            let resolved =
                join_all(unfiltered.iter().map(|layer| self.filters.resolve(layer))).await;
            for (layer, result) in unfiltered.iter().zip(resolved) {
                if pass.is_superseded() {
                    return superseded(report);
                }
                let (filter, source) = choose_filter(layer, result);
                report.filters.insert(layer.key.clone(), source);
                let Some(filter) = filter else {
                    tracker.record_filter(&layer.key, None);
                    continue;
                };
                let layer_id = layer.key.layer_id();
                match engine.set_filter(&layer_id, Some(&filter)) {
                    Ok(()) => {
                        tracker.record_filter(&layer.key, Some(filter));
                    }
                    Err(e) => {
                        warn!("Could not apply filter to {layer_id}: {e}");
                        report.fail(&layer.key, FailureKind::Filter, e);
                    }
                }
            }
        }

        for layer in &wanted {
            if !tracker.contains(&layer.key) {
                continue;
            }
            if pass.is_superseded() {
                return superseded(report);
            }
            let layer_id = layer.key.layer_id();
            let visible = layer.effective_visible();
            match engine.set_layout_visibility(&layer_id, visible) {
                Ok(()) => {
                    tracker.record_visibility(
                        &layer.key,
                        layer.persisted_visible,
                        layer.local_visible,
                    );
                    report.visibility_updates += 1;
                }
                Err(e) => {
                    warn!("Could not set visibility of {layer_id}: {e}");
                    report.fail(&layer.key, FailureKind::Visibility, e);
                }
            }
        }

        engine.request_repaint();
        info!(
            "Reconciled {} layers: {} added, {} removed, {} failures",
            wanted.len(),
            report.added.len(),
            report.removed.len(),
            report.failures.len()
        );
        report
    }

    /// Removes every tracked layer, e.g. when the session ends.
    pub fn teardown<E: MapEngine + ?Sized>(
        &self,
        engine: &mut E,
        tracker: &mut ResourceTracker,
    ) -> PassReport {
        let mut report = PassReport::new(0);
        for key in tracker.keys_not_in(|_| false) {
            remove_tracked(engine, tracker, &key, &mut report);
        }
        if !report.removed.is_empty() {
            engine.request_repaint();
        }
        debug!("Tore down {} layers", report.removed.len());
        report
    }

    /// Adds the source and layer for `layer`. On success the key is tracked
    /// right away with its filter pending; on failure nothing is tracked so
    /// the next pass retries.
    fn add<E: MapEngine + ?Sized>(
        &self,
        engine: &mut E,
        tracker: &mut ResourceTracker,
        layer: &DesiredLayer,
        report: &mut PassReport,
    ) {
        let key = &layer.key;
        let ResolvedDefinitions { source, layer: definition } = self.defaults.resolve(layer);
        let source_id = key.source_id();
        let layer_id = key.layer_id();

        let mut added_source = false;
        if !engine.has_source(&source_id) {
            if let Err(e) = engine.add_source(&source_id, &source) {
                warn!("Failed to add source {source_id}: {e}");
                report.fail(key, FailureKind::Add, e);
                return;
            }
            added_source = true;
        }

        if !engine.has_layer(&layer_id)
            && let Err(e) = engine.add_layer(&definition)
        {
            warn!("Failed to add layer {layer_id}: {e}");
            if added_source && let Err(rollback) = engine.remove_source(&source_id) {
                warn!("Could not roll back source {source_id}: {rollback}");
            }
            report.fail(key, FailureKind::Add, e);
            return;
        }

        let mut tracked = TrackedLayer::new(source, definition);
        tracked.persisted_visible = layer.persisted_visible;
        tracked.local_visible = layer.local_visible;
        tracker.insert(key.clone(), tracked);
        report.added.push(key.clone());
        debug!("Added layer {layer_id}");
    }
}

fn superseded(mut report: PassReport) -> PassReport {
    debug!("Pass superseded; stopping early");
    report.outcome = PassOutcome::Superseded;
    report
}

/// Removes the layer, then its source. The key is untracked even if the
/// engine rejects either call.
fn remove_tracked<E: MapEngine + ?Sized>(
    engine: &mut E,
    tracker: &mut ResourceTracker,
    key: &LayerKey,
    report: &mut PassReport,
) {
    let layer_id = key.layer_id();
    let source_id = key.source_id();
    let mut failure = None;

    if engine.has_layer(&layer_id)
        && let Err(e) = engine.remove_layer(&layer_id)
    {
        warn!("Failed to remove layer {layer_id}: {e}");
        failure = Some(e);
    }
    if engine.has_source(&source_id)
        && let Err(e) = engine.remove_source(&source_id)
    {
        warn!("Failed to remove source {source_id}: {e}");
        failure.get_or_insert(e);
    }

    tracker.remove(key);
    if let Some(e) = failure {
        report.fail(key, FailureKind::Removal, e);
    }
    report.removed.push(key.clone());
    debug!("Removed layer {layer_id}");
}
