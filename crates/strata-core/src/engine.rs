//! Quality-reconciliation engine
//!
//! Owns the backend-independent quality state of one adapter and turns the
//! adapter's loosely timed signals into at-most-once-per-change events:
//!
//! - playlist diffing (sorted by bitrate, empty lists always announced)
//! - ready gating (exactly once, after the first playlist announcement)
//! - auto/manual tracking, with a quality re-announcement on entering auto
//! - switch-start / switch-end pairing
//! - quality ID resolution, deferred until the playlist is known

use crate::{
    adapter::{Adapter, AdapterSignal},
    events::{EventBus, PlayerEvent},
    quality::{self, AUTO_QUALITY_ID},
    types::{EngineState, PlayList, QualityLevel},
    Error, Result,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Upper bound on signal rounds per tick, for adapters that keep reacting
/// to their own side effects
const MAX_SIGNAL_ROUNDS: usize = 32;

/// Object-safe view of an engine, as held by the host
pub trait CorePlayer: Send {
    /// Backend name and version
    fn name(&self) -> String;

    /// Receiver for this engine's events
    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent>;

    /// Run deferred initialization and apply pending adapter signals
    fn tick(&mut self) -> Result<()>;

    fn state(&self) -> EngineState;

    fn play_list(&self) -> &[QualityLevel];

    fn quality_level(&self) -> Option<QualityLevel>;

    fn next_quality_level(&self) -> Option<QualityLevel>;

    fn auto_quality(&self) -> bool;

    /// ID of the committed level, `auto` while unknown
    fn quality_id(&self) -> String;

    fn selected_quality_id(&self) -> &str;

    /// ID of the switch target, `auto` in auto mode
    fn next_quality_id(&self) -> String;

    fn supports_auto_quality(&self) -> bool;

    fn ready(&self) -> bool;

    fn bandwidth_estimate(&self) -> Option<u64>;

    fn cap_level_to_player_size(&self) -> bool;

    /// Select a quality by ID, `auto` included
    fn set_quality_by_id(&mut self, id: &str);

    fn set_initial_bitrate(&mut self, bitrate: u64);

    fn set_cap_level_to_player_size(&mut self, cap: bool);
}

/// A manual selection waiting for a non-empty playlist
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingSelection {
    id: String,
    generation: u64,
}

/// Reconciliation state machine over one adapter
pub struct QualityEngine<A: Adapter> {
    adapter: A,
    bus: EventBus,
    state: EngineState,
    initialized: bool,
    /// Last diffed playlist
    play_list: PlayList,
    play_list_announced: bool,
    /// Last committed level
    quality_level: Option<QualityLevel>,
    /// Switch target, `None` in auto mode
    next_quality_level: Option<QualityLevel>,
    /// Target of the last switch-start not yet committed
    switch_in_flight: Option<QualityLevel>,
    /// `None` until first observed
    auto_quality: Option<bool>,
    ready: bool,
    selected_quality_id: String,
    pending_selection: Option<PendingSelection>,
    selection_generation: u64,
    signals: Vec<AdapterSignal>,
}

impl<A: Adapter> QualityEngine<A> {
    /// Wrap an adapter; nothing reaches the backend before the first tick
    pub fn new(adapter: A, event_capacity: usize) -> Self {
        debug!(core = %adapter.name(), "Engine created");
        Self {
            adapter,
            bus: EventBus::new(event_capacity),
            state: EngineState::Initializing,
            initialized: false,
            play_list: Vec::new(),
            play_list_announced: false,
            quality_level: None,
            next_quality_level: None,
            switch_in_flight: None,
            auto_quality: None,
            ready: false,
            selected_quality_id: AUTO_QUALITY_ID.to_string(),
            pending_selection: None,
            selection_generation: 0,
            signals: Vec::new(),
        }
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    pub fn tick(&mut self) -> Result<()> {
        if !self.initialized {
            self.initialized = true;
            debug!(core = %self.adapter.name(), "Initializing adapter");
            if let Err(err) = self.adapter.on_init() {
                warn!(core = %self.adapter.name(), error = %err, "Adapter initialization failed");
                self.publish_error(&err);
                return Err(err);
            }
        }

        let mut signals = std::mem::take(&mut self.signals);
        for _ in 0..MAX_SIGNAL_ROUNDS {
            self.adapter.poll_signals(&mut signals);
            if signals.is_empty() {
                break;
            }
            for signal in signals.drain(..) {
                self.apply(signal);
            }
        }
        self.signals = signals;
        Ok(())
    }

    fn apply(&mut self, signal: AdapterSignal) {
        match signal {
            AdapterSignal::PlayListChanged => self.update_play_list(),
            AdapterSignal::SwitchRequested => self.update_next_quality_level(),
            AdapterSignal::SwitchCommitted => self.update_quality_level(),
            AdapterSignal::AutoStateChanged => self.update_auto_quality(),
            AdapterSignal::Ready => self.set_ready(),
            AdapterSignal::Error { message, fatal } => {
                warn!(core = %self.adapter.name(), fatal, %message, "Backend error");
                self.publish_error(&Error::backend(message, fatal));
            }
        }
    }

    fn publish_error(&self, err: &Error) {
        self.bus.publish(PlayerEvent::Error {
            code: err.error_code().to_string(),
            message: err.to_string(),
            fatal: !err.is_recoverable(),
        });
    }

    fn translate(&self, level: Option<A::Level>) -> Option<QualityLevel> {
        level.map(|level| self.adapter.level_to_quality(&level))
    }

    fn translate_play_list(&self) -> PlayList {
        let mut play_list: PlayList = self
            .adapter
            .levels()
            .iter()
            .map(|level| self.adapter.level_to_quality(level))
            .collect();
        play_list.sort_by_key(|level| level.bitrate);
        play_list
    }

    fn update_play_list(&mut self) {
        let play_list = self.translate_play_list();
        let changed = play_list.len() != self.play_list.len()
            || play_list
                .iter()
                .zip(&self.play_list)
                .any(|(new, old)| !quality::is_same_level(Some(new), Some(old)));

        // An empty list is announced every time so hosts can clear stale menus
        if changed || play_list.is_empty() {
            self.play_list = play_list;
            self.play_list_announced = true;
            debug!(levels = self.play_list.len(), "Playlist changed");
            self.bus.publish(PlayerEvent::PlayListChanged {
                levels: self.play_list.clone(),
            });
            if !self.play_list.is_empty() {
                self.flush_pending_selection();
            }
        }

        self.update_next_quality_level();
        self.update_auto_quality();
        self.update_quality_level();
    }

    fn update_next_quality_level(&mut self) {
        if self.adapter.auto_quality_enabled() {
            self.next_quality_level = None;
            self.switch_in_flight = None;
            return;
        }

        match self.translate(self.adapter.next_level()) {
            Some(level) => {
                if !quality::is_same_level(Some(&level), self.next_quality_level.as_ref()) {
                    self.next_quality_level = Some(level);
                    self.switch_in_flight = Some(level);
                    debug!(next = %level, "Quality switch started");
                    self.bus.publish(PlayerEvent::QualitySwitchStart { level });
                }
            }
            None => self.next_quality_level = None,
        }
    }

    fn update_quality_level(&mut self) {
        let Some(level) = self.translate(self.adapter.current_level()) else {
            self.quality_level = None;
            return;
        };

        if !quality::is_same_level(Some(&level), self.quality_level.as_ref()) {
            self.quality_level = Some(level);
            if !self.ready && !self.adapter.supports_auto_quality() {
                self.selected_quality_id = quality::encode(&level);
            }
            debug!(quality = %level, "Quality changed");
            self.bus.publish(PlayerEvent::QualityChanged { level });
        }

        let completes_switch = self
            .switch_in_flight
            .is_some_and(|target| quality::is_same_level(Some(&target), Some(&level)));
        if completes_switch {
            self.switch_in_flight = None;
            self.bus.publish(PlayerEvent::QualitySwitchEnd { level });
        }
    }

    fn update_auto_quality(&mut self) {
        let auto = self.adapter.supports_auto_quality() && self.adapter.auto_quality_enabled();
        if self.auto_quality == Some(auto) {
            return;
        }

        self.auto_quality = Some(auto);
        debug!(auto, "Auto quality changed");
        self.bus.publish(PlayerEvent::AutoChanged { auto });

        // Listeners that only follow quality changes still learn which level
        // the backend is now choosing on its own
        if auto {
            self.update_next_quality_level();
            if let Some(level) = self.translate(self.adapter.current_level()) {
                self.bus.publish(PlayerEvent::QualityChanged { level });
            }
        }
    }

    fn set_ready(&mut self) {
        if self.ready {
            return;
        }
        if !self.play_list_announced {
            self.update_play_list();
        }

        let selected = if self.auto_quality() {
            AUTO_QUALITY_ID.to_string()
        } else {
            self.quality_id()
        };
        self.selected_quality_id = selected.clone();
        self.bus.publish(PlayerEvent::QualityIdSelected { id: selected });

        self.ready = true;
        self.state = EngineState::Ready;
        info!(
            core = %self.adapter.name(),
            selected = %self.selected_quality_id,
            levels = self.play_list.len(),
            "Engine ready"
        );
        self.adapter.on_ready();
        self.bus.publish(PlayerEvent::Ready);
    }

    pub fn set_quality_by_id(&mut self, id: &str) {
        let auto = quality::is_auto_quality(id);
        if auto && !self.adapter.supports_auto_quality() {
            debug!(core = %self.adapter.name(), "Auto quality unsupported, ignoring request");
            return;
        }

        debug!(id, "Quality requested");
        self.adapter.set_auto_quality_state(auto);
        self.update_auto_quality();

        if auto {
            self.pending_selection = None;
            self.selected_quality_id = AUTO_QUALITY_ID.to_string();
            if self.ready {
                self.bus.publish(PlayerEvent::QualityIdSelected {
                    id: AUTO_QUALITY_ID.to_string(),
                });
            }
            return;
        }

        self.selection_generation += 1;
        self.pending_selection = Some(PendingSelection {
            id: id.to_string(),
            generation: self.selection_generation,
        });
        if !self.play_list.is_empty() {
            self.flush_pending_selection();
        }
    }

    /// Resolve the pending selection; `take()` makes this at-most-once
    fn flush_pending_selection(&mut self) {
        let Some(pending) = self.pending_selection.take() else {
            return;
        };

        let index = quality::decode(&pending.id)
            .and_then(|level| self.adapter.find_level_index(&level));
        debug!(
            id = %pending.id,
            generation = pending.generation,
            index = ?index,
            "Resolving quality selection"
        );

        self.adapter.set_next_level_index(index);
        self.selected_quality_id = self.level_index_to_quality_id(index, &pending.id);
        if self.ready {
            self.bus.publish(PlayerEvent::QualityIdSelected {
                id: self.selected_quality_id.clone(),
            });
        }
    }

    fn level_index_to_quality_id(&self, index: Option<usize>, requested: &str) -> String {
        let Some(index) = index else {
            warn!(id = requested, "No level matches quality, falling back to auto");
            return AUTO_QUALITY_ID.to_string();
        };
        match self.adapter.levels().get(index) {
            Some(level) => quality::encode(&self.adapter.level_to_quality(level)),
            None => {
                warn!(index, "Level index out of bounds, falling back to auto");
                AUTO_QUALITY_ID.to_string()
            }
        }
    }

    pub fn auto_quality(&self) -> bool {
        self.auto_quality.unwrap_or(false)
    }

    pub fn quality_id(&self) -> String {
        quality::id_or_auto(self.quality_level.as_ref())
    }
}

impl<A: Adapter> CorePlayer for QualityEngine<A> {
    fn name(&self) -> String {
        self.adapter.name()
    }

    fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.bus.subscribe()
    }

    fn tick(&mut self) -> Result<()> {
        QualityEngine::tick(self)
    }

    fn state(&self) -> EngineState {
        self.state
    }

    fn play_list(&self) -> &[QualityLevel] {
        &self.play_list
    }

    fn quality_level(&self) -> Option<QualityLevel> {
        self.quality_level
    }

    fn next_quality_level(&self) -> Option<QualityLevel> {
        self.next_quality_level
    }

    fn auto_quality(&self) -> bool {
        QualityEngine::auto_quality(self)
    }

    fn quality_id(&self) -> String {
        QualityEngine::quality_id(self)
    }

    fn selected_quality_id(&self) -> &str {
        &self.selected_quality_id
    }

    fn next_quality_id(&self) -> String {
        quality::id_or_auto(self.next_quality_level.as_ref())
    }

    fn supports_auto_quality(&self) -> bool {
        self.adapter.supports_auto_quality()
    }

    fn ready(&self) -> bool {
        self.ready
    }

    fn bandwidth_estimate(&self) -> Option<u64> {
        self.adapter.bandwidth_estimate()
    }

    fn cap_level_to_player_size(&self) -> bool {
        self.adapter.cap_level_to_player_size()
    }

    fn set_quality_by_id(&mut self, id: &str) {
        QualityEngine::set_quality_by_id(self, id)
    }

    fn set_initial_bitrate(&mut self, bitrate: u64) {
        self.adapter.set_initial_bitrate(bitrate)
    }

    fn set_cap_level_to_player_size(&mut self, cap: bool) {
        self.adapter.set_cap_level_to_player_size(cap)
    }
}

impl<A: Adapter> Drop for QualityEngine<A> {
    fn drop(&mut self) {
        debug!(core = %self.adapter.name(), "Engine dropped");
    }
}
