//! Player - host integration shim
//!
//! Coordinates:
//! - source selection through a [`SourcePolicy`]
//! - asynchronous engine construction, one epoch per `set_source`
//! - stale construction discard
//! - quality requests by ID or playlist index
//! - event relay from the active engine onto the player's own bus

use crate::{
    engine::CorePlayer,
    events::{drain, EventBus, PlayerEvent},
    factory::{AdapterFactory, CreateRequest},
    policy::{DefaultSourcePolicy, SourcePolicy},
    quality::{self, AUTO_QUALITY_ID},
    types::{Capabilities, EngineState, PlayerConfig, QualityLevel, SessionId, Source},
    Error, Result,
};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// A finished construction, tagged with the generation that started it
struct Arrival {
    generation: u64,
    result: Result<Box<dyn CorePlayer>>,
}

struct ActiveCore {
    core: Box<dyn CorePlayer>,
    events: broadcast::Receiver<PlayerEvent>,
    generation: u64,
}

/// Player facade over one engine at a time
pub struct Player {
    /// Unique session ID
    session_id: SessionId,
    config: PlayerConfig,
    capabilities: Capabilities,
    factory: Arc<dyn AdapterFactory>,
    policy: Box<dyn SourcePolicy>,
    /// Bumped by every accepted `set_source`
    generation: u64,
    /// Cancelled when the next `set_source` supersedes it
    epoch: CancellationToken,
    /// Constructions spawned but not yet received
    in_flight: usize,
    arrivals_tx: mpsc::UnboundedSender<Arrival>,
    arrivals_rx: mpsc::UnboundedReceiver<Arrival>,
    active: Option<ActiveCore>,
    /// Last ID requested by the host, re-applied to every new engine
    requested_quality_id: String,
    bus: EventBus,
}

impl Player {
    /// Create a player with the default source policy
    pub fn new(
        config: PlayerConfig,
        capabilities: Capabilities,
        factory: Arc<dyn AdapterFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let (arrivals_tx, arrivals_rx) = mpsc::unbounded_channel();
        let bus = EventBus::new(config.event_capacity);
        let session_id = SessionId::new();
        info!(session_id = %session_id, "Player created");

        Ok(Self {
            session_id,
            config,
            capabilities,
            factory,
            policy: Box::new(DefaultSourcePolicy),
            generation: 0,
            epoch: CancellationToken::new(),
            in_flight: 0,
            arrivals_tx,
            arrivals_rx,
            active: None,
            requested_quality_id: AUTO_QUALITY_ID.to_string(),
            bus,
        })
    }

    pub fn with_policy(mut self, policy: impl SourcePolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Select a source and start building its engine
    ///
    /// Returns false, keeping the current engine, when nothing is playable.
    #[instrument(skip(self, sources), fields(session_id = %self.session_id))]
    pub fn set_source(&mut self, sources: Vec<Source>) -> bool {
        let Some(selected) = self.policy.select(&sources, &self.capabilities) else {
            warn!(candidates = sources.len(), "No playable source");
            return false;
        };

        if let Some(previous) = self.active.take() {
            debug!(core = %previous.core.name(), generation = previous.generation, "Dropping engine");
        }
        self.epoch.cancel();
        self.epoch = CancellationToken::new();
        self.generation += 1;
        self.in_flight += 1;

        let generation = self.generation;
        info!(src = %selected.source.src, kind = %selected.kind, generation, "Source set");

        let request = CreateRequest {
            selected,
            config: self.config.clone(),
            capabilities: self.capabilities,
            generation,
        };
        let factory = Arc::clone(&self.factory);
        let cancel = self.epoch.clone();
        let arrivals = self.arrivals_tx.clone();
        tokio::spawn(async move {
            let result = factory.create(request, cancel).await;
            let _ = arrivals.send(Arrival { generation, result });
        });
        true
    }

    /// Process finished constructions, tick the active engine, relay its events
    pub fn pump(&mut self) {
        while let Ok(arrival) = self.arrivals_rx.try_recv() {
            self.handle_arrival(arrival);
        }

        if let Some(active) = self.active.as_mut() {
            if let Err(err) = active.core.tick() {
                warn!(core = %active.core.name(), error = %err, "Engine tick failed");
            }
        }
        self.relay();
    }

    /// Wait for every in-flight construction, then pump
    pub async fn settle(&mut self) {
        while self.in_flight > 0 {
            match self.arrivals_rx.recv().await {
                Some(arrival) => self.handle_arrival(arrival),
                None => break,
            }
        }
        self.pump();
    }

    fn handle_arrival(&mut self, arrival: Arrival) {
        self.in_flight = self.in_flight.saturating_sub(1);

        if arrival.generation != self.generation {
            // Dropping a stale engine tears its adapter down
            debug!(
                generation = arrival.generation,
                current = self.generation,
                "Discarding stale construction"
            );
            return;
        }

        match arrival.result {
            Ok(core) => self.activate(core, arrival.generation),
            Err(Error::ConstructionCancelled) => {
                debug!(generation = arrival.generation, "Construction cancelled");
            }
            Err(err) => {
                warn!(generation = arrival.generation, error = %err, "Engine construction failed");
                self.bus.publish(PlayerEvent::Error {
                    code: err.error_code().to_string(),
                    message: err.to_string(),
                    fatal: !err.is_recoverable(),
                });
            }
        }
    }

    fn activate(&mut self, mut core: Box<dyn CorePlayer>, generation: u64) {
        let events = core.subscribe();
        if let Some(bitrate) = self.config.initial_bitrate {
            core.set_initial_bitrate(bitrate);
        }
        core.set_cap_level_to_player_size(self.config.cap_level_to_player_size);
        if !quality::is_auto_quality(&self.requested_quality_id) {
            core.set_quality_by_id(&self.requested_quality_id);
        }

        info!(core = %core.name(), generation, "Engine activated");
        self.active = Some(ActiveCore {
            core,
            events,
            generation,
        });
    }

    fn relay(&mut self) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        for event in drain(&mut active.events) {
            debug!(event = event.name(), generation = active.generation, "Relaying event");
            self.bus.publish(event);
        }
    }

    /// Request a quality by ID, `auto` included
    #[instrument(skip(self), fields(session_id = %self.session_id))]
    pub fn request_quality_by_id(&mut self, id: &str) {
        if self.requested_quality_id == id {
            debug!("Quality already requested");
            return;
        }
        self.requested_quality_id = id.to_string();

        if let Some(active) = self.active.as_mut() {
            active.core.set_quality_by_id(id);
        }
        self.relay();
    }

    /// Request a quality by playlist index, `-1` for auto
    pub fn request_quality_by_index(&mut self, index: isize) {
        if index == -1 {
            self.request_quality_by_id(AUTO_QUALITY_ID);
            return;
        }

        let level = usize::try_from(index)
            .ok()
            .and_then(|index| self.play_list().get(index).copied());
        match level {
            Some(level) => self.request_quality_by_id(&quality::encode(&level)),
            None => warn!(index, levels = self.play_list().len(), "Quality index out of range"),
        }
    }

    /// Subscribe to the player's events
    ///
    /// The bus holds `event_capacity` events. A receiver must be drained at
    /// least that often: once it lags, the oldest unread events (playlist
    /// and `ready` announcements included) are gone and only a warning is
    /// logged by [`drain`].
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.bus.subscribe()
    }

    pub fn play_list(&self) -> &[QualityLevel] {
        self.active
            .as_ref()
            .map_or(&[][..], |active| active.core.play_list())
    }

    /// ID of the level being played, `auto` while unknown
    pub fn current_quality_id(&self) -> String {
        self.active.as_ref().map_or_else(
            || AUTO_QUALITY_ID.to_string(),
            |active| active.core.quality_id(),
        )
    }

    /// ID the active engine resolved the last request to
    pub fn selected_quality_id(&self) -> String {
        self.active.as_ref().map_or_else(
            || AUTO_QUALITY_ID.to_string(),
            |active| active.core.selected_quality_id().to_string(),
        )
    }

    /// ID of the switch target, `auto` in auto mode
    pub fn next_quality_id(&self) -> String {
        self.active.as_ref().map_or_else(
            || AUTO_QUALITY_ID.to_string(),
            |active| active.core.next_quality_id(),
        )
    }

    pub fn requested_quality_id(&self) -> &str {
        &self.requested_quality_id
    }

    pub fn auto_quality(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.core.auto_quality())
    }

    pub fn supports_auto_quality(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.core.supports_auto_quality())
    }

    pub fn bandwidth_estimate(&self) -> Option<u64> {
        self.active.as_ref()?.core.bandwidth_estimate()
    }

    pub fn ready(&self) -> bool {
        self.active.as_ref().is_some_and(|active| active.core.ready())
    }

    pub fn core_name(&self) -> Option<String> {
        self.active.as_ref().map(|active| active.core.name())
    }

    pub fn state(&self) -> EngineState {
        self.active
            .as_ref()
            .map_or(EngineState::Uninitialized, |active| active.core.state())
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.epoch.cancel();
    }
}
