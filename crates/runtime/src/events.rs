use tokio::sync::broadcast;

/// Load-related notifications emitted by a rendering engine.
///
/// These mirror the engine's own event names closely enough that an adapter
/// can forward them one to one.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EngineEvent {
    /// The engine finished its initial load.
    Load,
    /// The style (or part of it) finished loading.
    StyleData,
    /// The whole style was swapped. Every source and layer added before is gone.
    StyleReplaced,
    /// No tiles or transitions are pending.
    Idle,
}

impl EngineEvent {
    pub fn kind(self) -> &'static str {
        match self {
            EngineEvent::Load => "load",
            EngineEvent::StyleData => "styledata",
            EngineEvent::StyleReplaced => "style.replaced",
            EngineEvent::Idle => "idle",
        }
    }

    /// Events after which readiness is worth re-checking.
    pub fn may_change_readiness(self) -> bool {
        matches!(
            self,
            EngineEvent::Load | EngineEvent::StyleData | EngineEvent::Idle
        )
    }
}

/// Fan-out of engine events to any number of subscribers.
///
/// Slow subscribers lag instead of blocking the engine; a lagged receiver
/// only loses intermediate events, which is fine because every consumer
/// re-derives state from the engine itself.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publishes `event`, returning how many subscribers will see it.
    pub fn emit(&self, event: EngineEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineEvent, EventBus};

    #[test]
    fn subscribers_receive_events_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.emit(EngineEvent::StyleData), 1);
        assert_eq!(bus.emit(EngineEvent::Load), 1);
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::StyleData);
        assert_eq!(rx.try_recv().unwrap(), EngineEvent::Load);
    }

    #[test]
    fn emit_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        assert_eq!(bus.emit(EngineEvent::Idle), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn style_replacement_does_not_signal_readiness() {
        assert!(!EngineEvent::StyleReplaced.may_change_readiness());
        assert!(EngineEvent::Load.may_change_readiness());
        assert_eq!(EngineEvent::StyleData.kind(), "styledata");
    }
}
