//! Quality events and the bus that carries them
//!
//! Every engine owns one [`EventBus`]; the host subscribes to the active
//! engine's bus and republishes onto its own. Dropping an engine drops its
//! sender, so every subscription made against it closes with it.

use crate::types::{PlayList, QualityLevel};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events pushed to the host, at most once per change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PlayerEvent {
    /// The known quality levels changed (or are announced empty)
    PlayListChanged { levels: PlayList },

    /// A switch toward `level` was requested from the backend
    QualitySwitchStart { level: QualityLevel },

    /// The switch announced by `QualitySwitchStart` was committed
    QualitySwitchEnd { level: QualityLevel },

    /// The level being played changed
    QualityChanged { level: QualityLevel },

    /// Auto quality was enabled or disabled
    AutoChanged { auto: bool },

    /// Levels are known and quality switches can be requested
    Ready,

    /// The effective selected quality ID, `auto` included
    QualityIdSelected { id: String },

    /// Diagnostic error from a backend or from adapter construction
    Error {
        code: String,
        message: String,
        fatal: bool,
    },
}

impl PlayerEvent {
    /// Short event name for logs
    pub fn name(&self) -> &'static str {
        match self {
            PlayerEvent::PlayListChanged { .. } => "playlist_changed",
            PlayerEvent::QualitySwitchStart { .. } => "quality_switch_start",
            PlayerEvent::QualitySwitchEnd { .. } => "quality_switch_end",
            PlayerEvent::QualityChanged { .. } => "quality_changed",
            PlayerEvent::AutoChanged { .. } => "auto_changed",
            PlayerEvent::Ready => "ready",
            PlayerEvent::QualityIdSelected { .. } => "quality_id_selected",
            PlayerEvent::Error { .. } => "error",
        }
    }
}

/// Broadcast bus for [`PlayerEvent`]s
///
/// `publish()` is synchronous; with no subscribers events are dropped.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: broadcast::Sender<PlayerEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn publish(&self, event: PlayerEvent) {
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Drain every event currently queued on `rx` without waiting
///
/// A lagged receiver loses the events it missed and keeps the most recent
/// ones; the loss is only logged. A closed bus ends the drain.
pub fn drain(rx: &mut broadcast::Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event receiver lagged");
            }
            Err(_) => break,
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::new(4);
        bus.publish(PlayerEvent::Ready);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn drain_collects_in_order() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(PlayerEvent::AutoChanged { auto: true });
        bus.publish(PlayerEvent::Ready);

        assert_eq!(
            drain(&mut rx),
            vec![PlayerEvent::AutoChanged { auto: true }, PlayerEvent::Ready]
        );
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn lagged_drain_keeps_latest_events() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        bus.publish(PlayerEvent::PlayListChanged { levels: vec![] });
        bus.publish(PlayerEvent::Ready);
        bus.publish(PlayerEvent::AutoChanged { auto: true });

        assert_eq!(
            drain(&mut rx),
            vec![PlayerEvent::Ready, PlayerEvent::AutoChanged { auto: true }]
        );
    }

    #[test]
    fn dropping_bus_closes_subscriptions() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        bus.publish(PlayerEvent::Ready);
        drop(bus);

        assert_eq!(drain(&mut rx), vec![PlayerEvent::Ready]);
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        ));
    }

    #[test]
    fn event_json_shape() {
        let event = PlayerEvent::QualityIdSelected {
            id: "auto".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"event":"quality_id_selected","id":"auto"}"#);
        assert_eq!(event.name(), "quality_id_selected");
    }
}
