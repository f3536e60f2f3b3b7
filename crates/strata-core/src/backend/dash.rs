//! DASH adapter over a track-based engine (shaka-style)

use super::drain_events;
use crate::{
    adapter::{Adapter, AdapterSignal},
    quality::compute_fps,
    surface::{SharedSurface, SurfaceEvent},
    types::{MediaKind, PlayerConfig, QualityLevel, Source},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Resolution restriction meaning "no restriction"
const UNRESTRICTED_RESOLUTION: u32 = 100_000;

/// Buffer kept ahead of the playhead when switching, in seconds
const FAST_SWITCH_SAFE_MARGIN: f64 = 5.0;
const SAFE_MARGIN: f64 = 8.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    #[default]
    Variant,
    Text,
    Image,
}

/// A variant (video + audio pairing) as listed by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantTrack {
    pub id: u64,
    #[serde(default)]
    pub kind: TrackKind,
    pub bandwidth: u64,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    /// As written in the manifest, e.g. `"30000/1001"`
    #[serde(default)]
    pub frame_rate: Option<String>,
    #[serde(default)]
    pub video_id: Option<u64>,
    #[serde(default)]
    pub audio_id: Option<u64>,
    #[serde(default)]
    pub video_codec: Option<String>,
    #[serde(default)]
    pub active: bool,
}

impl VariantTrack {
    fn is_video_variant(&self) -> bool {
        self.kind == TrackKind::Variant && self.video_id.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DashEngineEvent {
    TracksChanged,
    Loaded,
    /// The ABR picked a new variant
    Adaptation,
    /// A variant was selected explicitly
    VariantChanged,
    Error { message: String, fatal: bool },
}

/// Track-based DASH playback engine
pub trait DashEngine: Send {
    fn version(&self) -> String;

    fn variant_tracks(&self) -> Vec<VariantTrack>;

    fn abr_enabled(&self) -> bool;

    fn set_abr_enabled(&mut self, enabled: bool);

    /// `safe_margin` seconds of buffer survive a `clear_buffer` switch
    fn select_variant_track(&mut self, track_id: u64, clear_buffer: bool, safe_margin: f64);

    fn set_default_bandwidth_estimate(&mut self, bitrate: u64);

    fn set_max_resolution(&mut self, width: u32, height: u32);

    fn set_buffering_goal(&mut self, seconds: f64);

    fn estimated_bandwidth(&self) -> Option<u64>;

    fn attach(&mut self, surface: SharedSurface);

    fn load(&mut self, url: &str, mime: &str);

    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<DashEngineEvent>;

    fn destroy(&mut self);
}

pub struct DashAdapter {
    engine: Box<dyn DashEngine>,
    surface: SharedSurface,
    source: Source,
    mime: String,
    fast_switch: bool,
    cap_level_to_player_size: bool,
    next_track: Option<VariantTrack>,
    /// Initial bitrate waiting for the first track list
    pending_initial_bitrate: Option<u64>,
    observing_video_size: bool,
    video_size: (u32, u32),
    max_resolution: (u32, u32),
    ready: bool,
    events: Option<mpsc::UnboundedReceiver<DashEngineEvent>>,
    surface_events: Option<mpsc::UnboundedReceiver<SurfaceEvent>>,
}

impl DashAdapter {
    pub fn new(
        mut engine: Box<dyn DashEngine>,
        surface: SharedSurface,
        source: Source,
        config: &PlayerConfig,
    ) -> Result<Self> {
        let mime = source.resolved_mime().ok_or_else(|| Error::MissingMimeType {
            src: source.src.clone(),
        })?;
        engine.set_buffering_goal(config.dash_buffering_goal);

        Ok(Self {
            engine,
            surface,
            source,
            mime,
            fast_switch: config.fast_switch,
            cap_level_to_player_size: false,
            next_track: None,
            pending_initial_bitrate: None,
            observing_video_size: false,
            video_size: (0, 0),
            max_resolution: (UNRESTRICTED_RESOLUTION, UNRESTRICTED_RESOLUTION),
            ready: false,
            events: None,
            surface_events: None,
        })
    }

    /// Select the highest track whose bandwidth fits `bitrate`
    fn apply_initial_bitrate(&mut self, bitrate: u64) {
        let levels = self.levels();
        let mut index = 0;
        for (i, track) in levels.iter().enumerate() {
            if track.bandwidth <= bitrate {
                index = i;
            } else {
                break;
            }
        }
        if let Some(track) = levels.get(index) {
            debug!(index, bandwidth = track.bandwidth, "DASH start track from initial bitrate");
            self.engine.select_variant_track(track.id, true, 0.0);
        }
    }

    /// Whether the decoded frame size changed since the last poll
    fn video_size_changed(&mut self) -> bool {
        let size = self.surface.lock().video_size();
        if size == self.video_size {
            return false;
        }
        self.video_size = size;
        true
    }

    fn apply_resolution_cap(&mut self) {
        let max_resolution = if self.cap_level_to_player_size {
            let surface = self.surface.lock();
            let (width, height) = surface.client_size();
            let ratio = surface.device_pixel_ratio();
            let ratio = if ratio.is_finite() && ratio > 0.0 { ratio } else { 1.0 };
            (
                (f64::from(width) * ratio) as u32,
                (f64::from(height) * ratio) as u32,
            )
        } else {
            (UNRESTRICTED_RESOLUTION, UNRESTRICTED_RESOLUTION)
        };

        if max_resolution != self.max_resolution {
            self.max_resolution = max_resolution;
            debug!(width = max_resolution.0, height = max_resolution.1, "DASH resolution cap");
            self.engine
                .set_max_resolution(max_resolution.0, max_resolution.1);
        }
    }
}

impl Adapter for DashAdapter {
    type Level = VariantTrack;

    fn name(&self) -> String {
        format!("DASH ({})", self.engine.version())
    }

    fn levels(&self) -> Vec<VariantTrack> {
        self.engine
            .variant_tracks()
            .into_iter()
            .filter(|track| track.is_video_variant() && track.video_codec.is_some())
            .collect()
    }

    fn current_level(&self) -> Option<VariantTrack> {
        self.engine
            .variant_tracks()
            .into_iter()
            .find(|track| track.is_video_variant() && track.active)
    }

    fn next_level(&self) -> Option<VariantTrack> {
        self.next_track.clone()
    }

    fn auto_quality_enabled(&self) -> bool {
        self.engine.abr_enabled()
    }

    fn supports_auto_quality(&self) -> bool {
        true
    }

    fn level_to_quality(&self, track: &VariantTrack) -> QualityLevel {
        let mut quality = QualityLevel::new(
            track.bandwidth,
            track.width.unwrap_or(0),
            track.height.unwrap_or(0),
        );
        if track.video_id.is_some() {
            quality = quality.with_kind(MediaKind::Video);
        } else if track.audio_id.is_some() {
            quality = quality.with_kind(MediaKind::Audio);
        }
        if let Some(fps) = track.frame_rate.as_deref().and_then(compute_fps) {
            quality = quality.with_fps(fps);
        }
        quality
    }

    fn set_auto_quality_state(&mut self, auto: bool) {
        self.engine.set_abr_enabled(auto);
        if !auto {
            self.pending_initial_bitrate = None;
        }
    }

    fn set_next_level_index(&mut self, index: Option<usize>) {
        let Some(track) = index.and_then(|index| self.levels().into_iter().nth(index)) else {
            return;
        };

        if self.ready {
            let margin = if self.fast_switch {
                FAST_SWITCH_SAFE_MARGIN
            } else {
                SAFE_MARGIN
            };
            self.engine.select_variant_track(track.id, true, margin);
        } else if !self.engine.abr_enabled() {
            debug!(track = track.id, width = ?track.width, height = ?track.height, "DASH start track");
            self.engine.select_variant_track(track.id, false, 0.0);
        }
        self.next_track = Some(track);
        self.pending_initial_bitrate = None;
    }

    fn set_initial_bitrate(&mut self, bitrate: u64) {
        self.engine.set_default_bandwidth_estimate(bitrate);
        if self.ready {
            return;
        }
        if self.levels().is_empty() {
            self.pending_initial_bitrate = Some(bitrate);
        } else {
            self.apply_initial_bitrate(bitrate);
        }
    }

    fn set_cap_level_to_player_size(&mut self, cap: bool) {
        debug!(cap, "DASH cap level to player size");
        self.cap_level_to_player_size = cap;
    }

    fn cap_level_to_player_size(&self) -> bool {
        self.cap_level_to_player_size
    }

    fn bandwidth_estimate(&self) -> Option<u64> {
        self.engine.estimated_bandwidth()
    }

    fn on_init(&mut self) -> Result<()> {
        self.events = Some(self.engine.subscribe());
        self.surface_events = Some(self.surface.lock().subscribe());
        self.engine.attach(Arc::clone(&self.surface));
        self.engine.load(&self.source.src, &self.mime);
        info!(src = %self.source.src, version = %self.engine.version(), "DASH source loading");
        Ok(())
    }

    fn on_ready(&mut self) {
        self.ready = true;
    }

    fn poll_signals(&mut self, signals: &mut Vec<AdapterSignal>) {
        for event in drain_events(&mut self.events) {
            match event {
                DashEngineEvent::TracksChanged => {
                    signals.push(AdapterSignal::PlayListChanged);
                    if let Some(bitrate) = self.pending_initial_bitrate {
                        if !self.levels().is_empty() {
                            self.pending_initial_bitrate = None;
                            self.apply_initial_bitrate(bitrate);
                        }
                    }
                }
                DashEngineEvent::Loaded => {
                    let mut surface = self.surface.lock();
                    if surface.autoplay() {
                        surface.play();
                    }
                    signals.push(AdapterSignal::Ready);
                }
                DashEngineEvent::Adaptation => {
                    self.next_track = self.current_level();
                    signals.push(AdapterSignal::SwitchCommitted);
                }
                DashEngineEvent::VariantChanged => signals.push(AdapterSignal::SwitchRequested),
                DashEngineEvent::Error { message, fatal } => {
                    signals.push(AdapterSignal::Error { message, fatal })
                }
            }
        }

        for event in drain_events(&mut self.surface_events) {
            match event {
                SurfaceEvent::Play => self.observing_video_size = true,
                SurfaceEvent::Pause => self.observing_video_size = false,
                _ => {}
            }
        }

        // A new decoded size is the only commit signal for manual switches
        if self.observing_video_size && self.video_size_changed() {
            signals.push(AdapterSignal::SwitchCommitted);
        }
        self.apply_resolution_cap();
    }
}

impl Drop for DashAdapter {
    fn drop(&mut self) {
        debug!(version = %self.engine.version(), "Destroying DASH engine");
        self.engine.destroy();
    }
}
