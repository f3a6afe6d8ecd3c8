use std::time::Duration;

use serde::Deserialize;
use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

use crate::events::EngineEvent;

/// Engine introspection needed to decide whether mutations are safe.
pub trait ReadinessProbe {
    fn is_style_loaded(&self) -> bool;
    fn is_loaded(&self) -> bool;

    fn is_ready(&self) -> bool {
        self.is_style_loaded() && self.is_loaded()
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    /// Interval of the fallback poll.
    pub poll_interval_ms: u64,
    /// How long the fallback poll runs before only events are trusted.
    pub poll_window_ms: u64,
}

impl ReadinessConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn poll_window(&self) -> Duration {
        Duration::from_millis(self.poll_window_ms)
    }
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 250,
            poll_window_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessError {
    /// The poll window elapsed and the event stream closed without the
    /// engine ever reporting ready.
    Exhausted { waited: Duration },
}

impl std::fmt::Display for ReadinessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReadinessError::Exhausted { waited } => write!(
                f,
                "engine never became ready (waited {}ms, event stream closed)",
                waited.as_millis()
            ),
        }
    }
}

impl std::error::Error for ReadinessError {}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Readiness {
    NotReady,
    Ready,
}

/// One-way `NotReady -> Ready` latch over a [`ReadinessProbe`].
///
/// Once the engine has been observed ready the gate stays open for the rest
/// of the session. Transient states (a style reload in progress) are the
/// concern of whoever mutates the engine, not of the gate.
pub struct ReadinessGate {
    state: Readiness,
    config: ReadinessConfig,
    on_ready: Option<Box<dyn FnOnce() + Send>>,
    notify: watch::Sender<bool>,
}

impl std::fmt::Debug for ReadinessGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessGate")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("has_callback", &self.on_ready.is_some())
            .finish()
    }
}

impl ReadinessGate {
    pub fn new(config: ReadinessConfig) -> Self {
        let (notify, _rx) = watch::channel(false);
        Self {
            state: Readiness::NotReady,
            config,
            on_ready: None,
            notify,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state == Readiness::Ready
    }

    /// Registers the transition callback. Runs immediately if the gate is
    /// already open. Replaces a previously registered callback.
    pub fn on_ready(&mut self, callback: impl FnOnce() + Send + 'static) {
        if self.is_ready() {
            callback();
            return;
        }
        self.on_ready = Some(Box::new(callback));
    }

    /// Readiness as a watchable value; flips to `true` exactly once.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.notify.subscribe()
    }

    /// Checks the probe, opening the gate on the first positive observation.
    pub fn check<P: ReadinessProbe + ?Sized>(&mut self, probe: &P) -> bool {
        if self.is_ready() {
            return true;
        }
        if !probe.is_ready() {
            return false;
        }

        self.state = Readiness::Ready;
        debug!("rendering engine ready");
        self.notify.send_replace(true);
        if let Some(callback) = self.on_ready.take() {
            callback();
        }
        true
    }

    /// Resolves once the engine is ready.
    ///
    /// Readiness is re-checked after every readiness-relevant engine event and,
    /// for the first `poll_window`, on a fixed poll. Whichever observes it
    /// first opens the gate.
    pub async fn wait_ready<P: ReadinessProbe + ?Sized>(
        &mut self,
        probe: &P,
        events: &mut broadcast::Receiver<EngineEvent>,
    ) -> Result<(), ReadinessError> {
        if self.check(probe) {
            return Ok(());
        }

        let started = Instant::now();
        let deadline = started + self.config.poll_window();
        let mut poll = tokio::time::interval(self.config.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut events_open = true;

        loop {
            let polling = Instant::now() < deadline;
            if !polling && !events_open {
                let waited = started.elapsed();
                warn!("gave up waiting for engine readiness after {}ms", waited.as_millis());
                return Err(ReadinessError::Exhausted { waited });
            }

            tokio::select! {
                event = events.recv(), if events_open => match event {
                    Ok(event) => {
                        trace!("engine event: {}", event.kind());
                        if !event.may_change_readiness() {
                            continue;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        trace!("readiness listener lagged by {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("engine event stream closed; relying on poll");
                        events_open = false;
                    }
                },
                _ = poll.tick(), if polling => {}
                _ = tokio::time::sleep_until(deadline), if polling => {}
            }

            if self.check(probe) {
                return Ok(());
            }
        }
    }
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new(ReadinessConfig::default())
    }
}
