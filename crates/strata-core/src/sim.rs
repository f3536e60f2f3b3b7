//! Simulated backends
//!
//! In-memory [`Surface`], [`HlsEngine`] and [`DashEngine`] implementations.
//! Each hands out a cloneable handle onto its state so a test or a scripted
//! session can play the backend's part (parse a manifest, finish a switch,
//! decode a frame) and inspect what the adapters asked for.

use crate::{
    backend::{DashEngine, DashEngineEvent, HlsEngine, HlsEngineEvent, HlsLevel, VariantTrack},
    factory::BackendFactory,
    surface::{SharedSurface, Surface, SurfaceEvent},
    types::MP4_MIME_TYPES,
};
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Bandwidth reported once loading starts, when no estimate was configured
const DEFAULT_SIM_BANDWIDTH: u64 = 5_000_000;

fn broadcast<E: Clone>(listeners: &mut Vec<mpsc::UnboundedSender<E>>, event: E) {
    listeners.retain(|tx| tx.send(event.clone()).is_ok());
}

// ============================================================================
// Surface
// ============================================================================

#[derive(Debug)]
pub struct SimSurfaceState {
    /// Mime types `can_play_type` accepts
    pub playable: Vec<String>,
    pub src: Option<String>,
    /// Every source ever set, in order
    pub src_history: Vec<String>,
    pub current_time: f64,
    pub playback_rate: f64,
    pub paused: bool,
    pub autoplay: bool,
    pub video_size: (u32, u32),
    pub client_size: (u32, u32),
    pub device_pixel_ratio: f64,
    listeners: Vec<mpsc::UnboundedSender<SurfaceEvent>>,
}

impl SimSurfaceState {
    fn emit(&mut self, event: SurfaceEvent) {
        broadcast(&mut self.listeners, event);
    }
}

pub struct SimSurface {
    state: Arc<Mutex<SimSurfaceState>>,
}

impl SimSurface {
    /// A paused 1280x720 surface playing progressive MP4 only
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimSurfaceState {
                playable: MP4_MIME_TYPES.iter().map(|mime| mime.to_string()).collect(),
                src: None,
                src_history: Vec::new(),
                current_time: 0.0,
                playback_rate: 1.0,
                paused: true,
                autoplay: false,
                video_size: (0, 0),
                client_size: (1280, 720),
                device_pixel_ratio: 1.0,
                listeners: Vec::new(),
            })),
        }
    }

    pub fn with_playable(self, mimes: &[&str]) -> Self {
        self.state.lock().playable = mimes.iter().map(|mime| mime.to_string()).collect();
        self
    }

    pub fn with_autoplay(self, autoplay: bool) -> Self {
        self.state.lock().autoplay = autoplay;
        self
    }

    pub fn handle(&self) -> SimSurfaceHandle {
        SimSurfaceHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl Surface for SimSurface {
    fn can_play_type(&self, mime: &str) -> bool {
        self.state
            .lock()
            .playable
            .iter()
            .any(|playable| playable.eq_ignore_ascii_case(mime))
    }

    fn src(&self) -> Option<String> {
        self.state.lock().src.clone()
    }

    fn set_src(&mut self, src: &str) {
        let mut state = self.state.lock();
        state.src = Some(src.to_string());
        state.src_history.push(src.to_string());
        state.current_time = 0.0;
        state.video_size = (0, 0);
        state.emit(SurfaceEvent::LoadStart);
    }

    fn current_time(&self) -> f64 {
        self.state.lock().current_time
    }

    fn set_current_time(&mut self, time: f64) {
        self.state.lock().current_time = time;
    }

    fn playback_rate(&self) -> f64 {
        self.state.lock().playback_rate
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.state.lock().playback_rate = rate;
    }

    fn paused(&self) -> bool {
        self.state.lock().paused
    }

    fn play(&mut self) {
        let mut state = self.state.lock();
        if state.paused {
            state.paused = false;
            state.emit(SurfaceEvent::Play);
        }
    }

    fn pause(&mut self) {
        let mut state = self.state.lock();
        if !state.paused {
            state.paused = true;
            state.emit(SurfaceEvent::Pause);
        }
    }

    fn autoplay(&self) -> bool {
        self.state.lock().autoplay
    }

    fn set_autoplay(&mut self, autoplay: bool) {
        self.state.lock().autoplay = autoplay;
    }

    fn video_size(&self) -> (u32, u32) {
        self.state.lock().video_size
    }

    fn client_size(&self) -> (u32, u32) {
        self.state.lock().client_size
    }

    fn device_pixel_ratio(&self) -> f64 {
        self.state.lock().device_pixel_ratio
    }

    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SurfaceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().listeners.push(tx);
        rx
    }
}

#[derive(Clone)]
pub struct SimSurfaceHandle {
    state: Arc<Mutex<SimSurfaceState>>,
}

impl SimSurfaceHandle {
    pub fn state(&self) -> MutexGuard<'_, SimSurfaceState> {
        self.state.lock()
    }

    /// Finish loading the current source at the given frame size
    pub fn finish_load(&self, width: u32, height: u32) {
        let mut state = self.state.lock();
        state.video_size = (width, height);
        state.emit(SurfaceEvent::LoadedMetadata);
        state.emit(SurfaceEvent::CanPlay);
    }

    pub fn start_playback(&self) {
        let mut state = self.state.lock();
        if state.paused {
            state.paused = false;
            state.emit(SurfaceEvent::Play);
        }
    }

    pub fn set_video_size(&self, width: u32, height: u32) {
        self.state.lock().video_size = (width, height);
    }

    pub fn set_client_size(&self, width: u32, height: u32) {
        self.state.lock().client_size = (width, height);
    }

    pub fn set_device_pixel_ratio(&self, ratio: f64) {
        self.state.lock().device_pixel_ratio = ratio;
    }
}

// ============================================================================
// HLS engine
// ============================================================================

/// Which level setter an adapter used
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchMode {
    Next,
    Load,
    Start,
}

#[derive(Debug)]
pub struct SimHlsState {
    /// Levels the manifest will reveal
    pub catalog: Vec<HlsLevel>,
    /// Levels revealed so far
    pub levels: Vec<HlsLevel>,
    pub current_level: Option<usize>,
    pub auto: bool,
    pub start_level: Option<usize>,
    pub pending_switch: Option<usize>,
    pub switch_calls: Vec<(SwitchMode, Option<usize>)>,
    pub default_estimate: Option<u64>,
    pub bandwidth: Option<u64>,
    pub cap: bool,
    pub attached: bool,
    pub loaded_src: Option<String>,
    pub destroyed: bool,
    listeners: Vec<mpsc::UnboundedSender<HlsEngineEvent>>,
}

impl SimHlsState {
    fn emit(&mut self, event: HlsEngineEvent) {
        broadcast(&mut self.listeners, event);
    }

    fn request_switch(&mut self, mode: SwitchMode, index: Option<usize>) {
        self.switch_calls.push((mode, index));
        self.auto = index.is_none();
        if let Some(index) = index.filter(|index| *index < self.levels.len()) {
            self.pending_switch = Some(index);
            self.emit(HlsEngineEvent::LevelSwitching(index));
        }
    }
}

pub struct SimHlsEngine {
    state: Arc<Mutex<SimHlsState>>,
}

impl SimHlsEngine {
    pub fn new(catalog: Vec<HlsLevel>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimHlsState {
                catalog,
                levels: Vec::new(),
                current_level: None,
                auto: true,
                start_level: None,
                pending_switch: None,
                switch_calls: Vec::new(),
                default_estimate: None,
                bandwidth: None,
                cap: false,
                attached: false,
                loaded_src: None,
                destroyed: false,
                listeners: Vec::new(),
            })),
        }
    }

    pub fn handle(&self) -> SimHlsHandle {
        SimHlsHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl HlsEngine for SimHlsEngine {
    fn version(&self) -> String {
        "sim-hls 1.0".to_string()
    }

    fn levels(&self) -> Vec<HlsLevel> {
        self.state.lock().levels.clone()
    }

    fn current_level(&self) -> Option<usize> {
        self.state.lock().current_level
    }

    fn auto_level_enabled(&self) -> bool {
        self.state.lock().auto
    }

    fn set_next_level(&mut self, index: Option<usize>) {
        self.state.lock().request_switch(SwitchMode::Next, index);
    }

    fn load_level(&mut self, index: Option<usize>) {
        self.state.lock().request_switch(SwitchMode::Load, index);
    }

    fn set_start_level(&mut self, index: Option<usize>) {
        let mut state = self.state.lock();
        state.switch_calls.push((SwitchMode::Start, index));
        state.start_level = index;
        state.auto = index.is_none();
    }

    fn set_default_bandwidth_estimate(&mut self, bitrate: u64) {
        self.state.lock().default_estimate = Some(bitrate);
    }

    fn set_cap_level_to_player_size(&mut self, cap: bool) {
        self.state.lock().cap = cap;
    }

    fn cap_level_to_player_size(&self) -> bool {
        self.state.lock().cap
    }

    fn bandwidth_estimate(&self) -> Option<u64> {
        self.state.lock().bandwidth
    }

    fn attach_media(&mut self, _surface: SharedSurface) {
        self.state.lock().attached = true;
    }

    fn load_source(&mut self, src: &str) {
        self.state.lock().loaded_src = Some(src.to_string());
    }

    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<HlsEngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().listeners.push(tx);
        rx
    }

    fn destroy(&mut self) {
        let mut state = self.state.lock();
        state.destroyed = true;
        state.listeners.clear();
    }
}

#[derive(Clone)]
pub struct SimHlsHandle {
    state: Arc<Mutex<SimHlsState>>,
}

impl SimHlsHandle {
    pub fn state(&self) -> MutexGuard<'_, SimHlsState> {
        self.state.lock()
    }

    /// Reveal the catalog and start on the start level (or the first one)
    pub fn parse_manifest(&self) {
        let mut state = self.state.lock();
        state.levels = state.catalog.clone();
        let count = state.levels.len();
        state.current_level = state
            .start_level
            .filter(|index| *index < count)
            .or((count > 0).then_some(0));
        state.bandwidth = state.default_estimate.or(Some(DEFAULT_SIM_BANDWIDTH));
        state.emit(HlsEngineEvent::ManifestParsed);
    }

    /// Replace the level list, as a live playlist refresh would
    pub fn update_levels(&self, levels: Vec<HlsLevel>) {
        let mut state = self.state.lock();
        state.catalog = levels.clone();
        state.levels = levels;
        state.emit(HlsEngineEvent::LevelUpdated);
    }

    /// Commit the pending manual switch; false when none is pending
    pub fn complete_switch(&self) -> bool {
        let mut state = self.state.lock();
        let Some(index) = state.pending_switch.take() else {
            return false;
        };
        state.current_level = Some(index);
        state.emit(HlsEngineEvent::LevelSwitched(index));
        true
    }

    /// ABR moves to `index` on its own; only honoured in auto mode
    pub fn adapt_to(&self, index: usize) -> bool {
        let mut state = self.state.lock();
        if !state.auto || index >= state.levels.len() {
            return false;
        }
        state.emit(HlsEngineEvent::LevelSwitching(index));
        state.current_level = Some(index);
        state.emit(HlsEngineEvent::LevelSwitched(index));
        true
    }

    pub fn fail(&self, message: &str, fatal: bool) {
        self.state.lock().emit(HlsEngineEvent::Error {
            message: message.to_string(),
            fatal,
        });
    }
}

// ============================================================================
// DASH engine
// ============================================================================

#[derive(Debug)]
pub struct SimDashState {
    /// Tracks the manifest will reveal
    pub catalog: Vec<VariantTrack>,
    pub tracks: Vec<VariantTrack>,
    pub abr: bool,
    /// `(track id, clear buffer, safe margin)` per selection
    pub selections: Vec<(u64, bool, f64)>,
    pub default_estimate: Option<u64>,
    pub max_resolution: Option<(u32, u32)>,
    pub buffering_goal: Option<f64>,
    pub bandwidth: Option<u64>,
    pub attached: bool,
    /// `(url, mime)` passed to `load`
    pub loaded: Option<(String, String)>,
    pub destroyed: bool,
    listeners: Vec<mpsc::UnboundedSender<DashEngineEvent>>,
}

impl SimDashState {
    fn emit(&mut self, event: DashEngineEvent) {
        broadcast(&mut self.listeners, event);
    }

    fn activate(&mut self, track_id: u64) -> bool {
        if !self.tracks.iter().any(|track| track.id == track_id) {
            return false;
        }
        for track in &mut self.tracks {
            track.active = track.id == track_id;
        }
        true
    }
}

pub struct SimDashEngine {
    state: Arc<Mutex<SimDashState>>,
}

impl SimDashEngine {
    pub fn new(catalog: Vec<VariantTrack>) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimDashState {
                catalog,
                tracks: Vec::new(),
                abr: true,
                selections: Vec::new(),
                default_estimate: None,
                max_resolution: None,
                buffering_goal: None,
                bandwidth: None,
                attached: false,
                loaded: None,
                destroyed: false,
                listeners: Vec::new(),
            })),
        }
    }

    pub fn handle(&self) -> SimDashHandle {
        SimDashHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl DashEngine for SimDashEngine {
    fn version(&self) -> String {
        "sim-dash 1.0".to_string()
    }

    fn variant_tracks(&self) -> Vec<VariantTrack> {
        self.state.lock().tracks.clone()
    }

    fn abr_enabled(&self) -> bool {
        self.state.lock().abr
    }

    fn set_abr_enabled(&mut self, enabled: bool) {
        self.state.lock().abr = enabled;
    }

    fn select_variant_track(&mut self, track_id: u64, clear_buffer: bool, safe_margin: f64) {
        let mut state = self.state.lock();
        state.selections.push((track_id, clear_buffer, safe_margin));
        if state.activate(track_id) {
            state.emit(DashEngineEvent::VariantChanged);
        }
    }

    fn set_default_bandwidth_estimate(&mut self, bitrate: u64) {
        self.state.lock().default_estimate = Some(bitrate);
    }

    fn set_max_resolution(&mut self, width: u32, height: u32) {
        self.state.lock().max_resolution = Some((width, height));
    }

    fn set_buffering_goal(&mut self, seconds: f64) {
        self.state.lock().buffering_goal = Some(seconds);
    }

    fn estimated_bandwidth(&self) -> Option<u64> {
        self.state.lock().bandwidth
    }

    fn attach(&mut self, _surface: SharedSurface) {
        self.state.lock().attached = true;
    }

    fn load(&mut self, url: &str, mime: &str) {
        self.state.lock().loaded = Some((url.to_string(), mime.to_string()));
    }

    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<DashEngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state.lock().listeners.push(tx);
        rx
    }

    fn destroy(&mut self) {
        let mut state = self.state.lock();
        state.destroyed = true;
        state.listeners.clear();
    }
}

#[derive(Clone)]
pub struct SimDashHandle {
    state: Arc<Mutex<SimDashState>>,
}

impl SimDashHandle {
    pub fn state(&self) -> MutexGuard<'_, SimDashState> {
        self.state.lock()
    }

    /// Reveal the catalog; the first track plays unless one was selected
    pub fn reveal_tracks(&self) {
        let mut state = self.state.lock();
        let selected = state.selections.last().map(|(id, _, _)| *id);
        state.tracks = state.catalog.clone();
        let activated = selected.is_some_and(|id| state.activate(id));
        if !activated {
            if let Some(first) = state.tracks.first_mut() {
                first.active = true;
            }
        }
        state.emit(DashEngineEvent::TracksChanged);
    }

    pub fn finish_loading(&self) {
        let mut state = self.state.lock();
        state.bandwidth = state.default_estimate.or(Some(DEFAULT_SIM_BANDWIDTH));
        state.emit(DashEngineEvent::Loaded);
    }

    /// Reveal tracks and finish loading
    pub fn load_manifest(&self) {
        self.reveal_tracks();
        self.finish_loading();
    }

    /// ABR moves to `track_id`; only honoured while ABR is enabled
    pub fn adapt_to(&self, track_id: u64) -> bool {
        let mut state = self.state.lock();
        if !state.abr || !state.activate(track_id) {
            return false;
        }
        state.emit(DashEngineEvent::Adaptation);
        true
    }

    pub fn fail(&self, message: &str, fatal: bool) {
        self.state.lock().emit(DashEngineEvent::Error {
            message: message.to_string(),
            fatal,
        });
    }
}

// ============================================================================
// Environment
// ============================================================================

/// A simulated surface plus engine catalogs, wired into a [`BackendFactory`]
///
/// Engines built through [`factory`](SimEnvironment::factory) are registered
/// so their handles can be reached after the host constructs them.
pub struct SimEnvironment {
    surface: SharedSurface,
    surface_handle: SimSurfaceHandle,
    hls_levels: Vec<HlsLevel>,
    dash_tracks: Vec<VariantTrack>,
    hls_engines: Arc<Mutex<Vec<SimHlsHandle>>>,
    dash_engines: Arc<Mutex<Vec<SimDashHandle>>>,
}

impl SimEnvironment {
    pub fn new(surface: SimSurface) -> Self {
        let surface_handle = surface.handle();
        Self {
            surface: crate::surface::shared(surface),
            surface_handle,
            hls_levels: Vec::new(),
            dash_tracks: Vec::new(),
            hls_engines: Arc::new(Mutex::new(Vec::new())),
            dash_engines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_hls_levels(mut self, levels: Vec<HlsLevel>) -> Self {
        self.hls_levels = levels;
        self
    }

    pub fn with_dash_tracks(mut self, tracks: Vec<VariantTrack>) -> Self {
        self.dash_tracks = tracks;
        self
    }

    pub fn surface(&self) -> &SimSurfaceHandle {
        &self.surface_handle
    }

    pub fn shared_surface(&self) -> SharedSurface {
        Arc::clone(&self.surface)
    }

    pub fn factory(&self) -> BackendFactory {
        let hls_levels = self.hls_levels.clone();
        let hls_engines = Arc::clone(&self.hls_engines);
        let dash_tracks = self.dash_tracks.clone();
        let dash_engines = Arc::clone(&self.dash_engines);

        BackendFactory::new(self.shared_surface())
            .with_hls(move || -> Box<dyn HlsEngine> {
                let engine = SimHlsEngine::new(hls_levels.clone());
                hls_engines.lock().push(engine.handle());
                Box::new(engine)
            })
            .with_dash(move || -> Box<dyn DashEngine> {
                let engine = SimDashEngine::new(dash_tracks.clone());
                dash_engines.lock().push(engine.handle());
                Box::new(engine)
            })
    }

    /// Handles of every HLS engine built so far, oldest first
    pub fn hls_engines(&self) -> Vec<SimHlsHandle> {
        self.hls_engines.lock().clone()
    }

    pub fn dash_engines(&self) -> Vec<SimDashHandle> {
        self.dash_engines.lock().clone()
    }

    pub fn latest_hls(&self) -> Option<SimHlsHandle> {
        self.hls_engines.lock().last().cloned()
    }

    pub fn latest_dash(&self) -> Option<SimDashHandle> {
        self.dash_engines.lock().last().cloned()
    }
}
