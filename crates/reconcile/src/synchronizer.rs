//! Drives reconciliation from published desired-layer snapshots.
//!
//! The [`Synchronizer`] owns the engine and the tracker for one engine
//! session and runs passes one at a time. Callers talk to it through a
//! cloneable [`SyncHandle`]; dropping every handle ends the session.

use std::sync::Arc;

use layers::{DesiredLayer, ResourceTracker};
use runtime::{EngineEvent, ReadinessGate, SettleDelays};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::engine::MapEngine;
use crate::filter::FilterResolver;
use crate::journal::{ChangeJournal, Fingerprint};
use crate::pass::{PassToken, Snapshot};
use crate::reconciler::Reconciler;
use crate::report::{PassOutcome, PassReport};

/// Invoked once a completed pass has had time to settle.
pub type SettledCallback = Arc<dyn Fn(&PassReport) + Send + Sync>;

#[derive(Debug)]
struct Channels {
    snapshot: watch::Sender<Snapshot>,
    should_process: watch::Sender<bool>,
}

/// Publishing side of a [`Synchronizer`].
#[derive(Debug, Clone)]
pub struct SyncHandle {
    channels: Arc<Channels>,
}

impl SyncHandle {
    /// Replaces the desired layer set.
    pub fn publish(&self, desired: Vec<DesiredLayer>) {
        self.channels.snapshot.send_replace(Some(desired.into()));
    }

    /// Opens or closes the processing gate. While closed no pass starts and
    /// a running pass stops at its next mutation.
    pub fn set_should_process(&self, open: bool) {
        self.channels.should_process.send_if_modified(|current| {
            let changed = *current != open;
            *current = open;
            changed
        });
    }
}

/// Owns one engine session and reconciles it against every published snapshot.
pub struct Synchronizer<E> {
    engine: E,
    tracker: ResourceTracker,
    reconciler: Reconciler,
    gate: ReadinessGate,
    journal: ChangeJournal,
    settle: SettleDelays,
    events: broadcast::Receiver<EngineEvent>,
    snapshots: watch::Receiver<Snapshot>,
    should_process: watch::Receiver<bool>,
    on_settled: Option<SettledCallback>,
    /// Fingerprint of the last pass that completed without failures.
    last_clean: Option<Fingerprint>,
    /// The last pass gave up waiting for the style.
    stalled: bool,
    pending_settle: Option<JoinHandle<()>>,
}

impl<E: MapEngine> Synchronizer<E> {
    pub fn new(
        engine: E,
        events: broadcast::Receiver<EngineEvent>,
        config: &SyncConfig,
    ) -> (Self, SyncHandle) {
        let (snapshot, snapshots) = watch::channel(None);
        let (should_process_tx, should_process) = watch::channel(true);

        let mut gate = ReadinessGate::new(config.readiness);
        gate.on_ready(|| info!("Map engine ready; layer synchronization enabled"));

        let synchronizer = Self {
            engine,
            tracker: ResourceTracker::new(),
            reconciler: Reconciler::new(config.defaults.clone(), config.retry),
            gate,
            journal: ChangeJournal::new(),
            settle: config.settle,
            events,
            snapshots,
            should_process,
            on_settled: None,
            last_clean: None,
            stalled: false,
            pending_settle: None,
        };
        let handle = SyncHandle {
            channels: Arc::new(Channels {
                snapshot,
                should_process: should_process_tx,
            }),
        };
        (synchronizer, handle)
    }

    pub fn with_filter_resolver(mut self, resolver: Arc<dyn FilterResolver>) -> Self {
        self.reconciler = std::mem::take(&mut self.reconciler).with_filter_resolver(resolver);
        self
    }

    pub fn on_settled(mut self, callback: impl Fn(&PassReport) + Send + Sync + 'static) -> Self {
        self.on_settled = Some(Arc::new(callback));
        self
    }

    /// Runs until every [`SyncHandle`] is dropped, then removes whatever is
    /// still tracked and hands the engine back.
    pub async fn run(mut self) -> E {
        if !self.wait_for_engine().await {
            debug!("Handles dropped before the engine became ready");
            return self.engine;
        }

        let mut dirty = true;
        let mut events_open = true;
        loop {
            if dirty && *self.should_process.borrow_and_update() && self.gate.check(&self.engine) {
                dirty = false;
                self.run_pass().await;
            }

            tokio::select! {
                changed = self.snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    dirty = true;
                }
                changed = self.should_process.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    dirty = true;
                }
                event = self.events.recv(), if events_open => match event {
                    Ok(EngineEvent::StyleReplaced) => {
                        info!(
                            "Style replaced; forgetting {} tracked layers",
                            self.tracker.len()
                        );
                        self.tracker.clear();
                        self.last_clean = None;
                        dirty = true;
                    }
                    Ok(event) if event.may_change_readiness() => {
                        if self.stalled || !self.gate.is_ready() {
                            dirty = true;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("Missed {skipped} engine events; forcing a full pass");
                        self.last_clean = None;
                        dirty = true;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("Engine event stream closed");
                        events_open = false;
                    }
                },
            }
        }

        self.shutdown()
    }

    /// Waits for the readiness gate to open. Returns `false` if the handles
    /// were dropped first.
    async fn wait_for_engine(&mut self) -> bool {
        let wait = self.gate.wait_ready(&self.engine, &mut self.events);
        tokio::pin!(wait);
        loop {
            tokio::select! {
                result = &mut wait => {
                    if let Err(e) = result {
                        warn!("{e}; waiting for engine events instead");
                    }
                    return true;
                }
                changed = self.snapshots.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    async fn run_pass(&mut self) {
        let Some(snapshot) = self.snapshots.borrow_and_update().clone() else {
            return;
        };
        self.journal.observe(&snapshot);

        let fingerprint = Fingerprint::of(&snapshot);
        if self.last_clean.as_ref() == Some(&fingerprint) {
            debug!("Desired layers unchanged; skipping pass");
            return;
        }

        if let Some(pending) = self.pending_settle.take() {
            pending.abort();
        }

        let token = PassToken::watching(self.snapshots.clone(), self.should_process.clone());
        let report = self
            .reconciler
            .reconcile(&mut self.engine, &snapshot, &mut self.tracker, &token)
            .await;

        self.stalled = report.outcome == PassOutcome::NotReady;
        self.last_clean = report.is_clean().then_some(fingerprint);
        match report.outcome {
            PassOutcome::Completed => self.schedule_settle(report),
            PassOutcome::Superseded => debug!("Pass superseded by a newer snapshot"),
            PassOutcome::NotReady => {
                warn!("Engine style never loaded; waiting for the next load event")
            }
        }
    }

    fn schedule_settle(&mut self, report: PassReport) {
        let Some(callback) = self.on_settled.clone() else {
            return;
        };
        let delay = self.settle.delay_for(report.desired);
        self.pending_settle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            callback(&report);
        }));
    }

    fn shutdown(mut self) -> E {
        if let Some(pending) = self.pending_settle.take() {
            pending.abort();
        }
        let report = self.reconciler.teardown(&mut self.engine, &mut self.tracker);
        info!(
            "Layer synchronization stopped; removed {} layers",
            report.removed.len()
        );
        self.engine
    }
}

impl<E: MapEngine + Send + Sync + 'static> Synchronizer<E> {
    pub fn spawn(self) -> JoinHandle<E> {
        tokio::spawn(self.run())
    }
}
