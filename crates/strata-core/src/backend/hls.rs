//! HLS adapter
//!
//! Drives an hls.js-style engine when MediaSource is available. Without an
//! engine the surface plays the manifest itself and no levels are exposed.

use super::drain_events;
use crate::{
    adapter::{Adapter, AdapterSignal},
    surface::SharedSurface,
    types::{MediaKind, PlayerConfig, QualityLevel, Source},
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One variant stream of the master playlist
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HlsLevel {
    pub bitrate: u64,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HlsEngineEvent {
    ManifestParsed,
    LevelUpdated,
    /// A switch toward this level index started
    LevelSwitching(usize),
    /// This level index is now playing
    LevelSwitched(usize),
    Error { message: String, fatal: bool },
}

/// Segmented HLS playback engine
///
/// Level arguments of `None` hand the choice back to the engine's ABR.
pub trait HlsEngine: Send {
    fn version(&self) -> String;

    fn levels(&self) -> Vec<HlsLevel>;

    fn current_level(&self) -> Option<usize>;

    fn auto_level_enabled(&self) -> bool;

    /// Switch from the next fragment, dropping the forward buffer
    fn set_next_level(&mut self, index: Option<usize>);

    /// Switch on the next loaded fragment, keeping the buffer
    fn load_level(&mut self, index: Option<usize>);

    /// Level to start with once the manifest is parsed
    fn set_start_level(&mut self, index: Option<usize>);

    fn set_default_bandwidth_estimate(&mut self, bitrate: u64);

    fn set_cap_level_to_player_size(&mut self, cap: bool);

    fn cap_level_to_player_size(&self) -> bool;

    fn bandwidth_estimate(&self) -> Option<u64>;

    fn attach_media(&mut self, surface: SharedSurface);

    fn load_source(&mut self, src: &str);

    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<HlsEngineEvent>;

    fn destroy(&mut self);
}

pub struct HlsAdapter {
    engine: Option<Box<dyn HlsEngine>>,
    surface: SharedSurface,
    source: Source,
    mime: String,
    fast_switch: bool,
    next_level: Option<usize>,
    native_cap: bool,
    ready: bool,
    events: Option<mpsc::UnboundedReceiver<HlsEngineEvent>>,
    queued: Vec<AdapterSignal>,
}

impl HlsAdapter {
    /// `engine` is `None` for native playback on the surface
    pub fn new(
        engine: Option<Box<dyn HlsEngine>>,
        surface: SharedSurface,
        source: Source,
        config: &PlayerConfig,
    ) -> Result<Self> {
        let mime = source.resolved_mime().ok_or_else(|| Error::MissingMimeType {
            src: source.src.clone(),
        })?;

        Ok(Self {
            engine,
            surface,
            source,
            mime,
            fast_switch: config.fast_switch,
            next_level: None,
            native_cap: false,
            ready: false,
            events: None,
            queued: Vec::new(),
        })
    }

    pub fn is_native(&self) -> bool {
        self.engine.is_none()
    }

    fn apply_level(&mut self, index: Option<usize>) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if !self.ready {
            engine.set_start_level(index);
        } else if self.fast_switch {
            engine.set_next_level(index);
        } else {
            engine.load_level(index);
        }
    }

    fn autoplay(&self) {
        let mut surface = self.surface.lock();
        if surface.autoplay() {
            surface.play();
        }
    }
}

impl Adapter for HlsAdapter {
    type Level = HlsLevel;

    fn name(&self) -> String {
        match &self.engine {
            Some(engine) => format!("HLS ({})", engine.version()),
            None => "HLS (native)".to_string(),
        }
    }

    fn levels(&self) -> Vec<HlsLevel> {
        self.engine
            .as_ref()
            .map(|engine| engine.levels())
            .unwrap_or_default()
    }

    fn current_level(&self) -> Option<HlsLevel> {
        let engine = self.engine.as_ref()?;
        let index = engine.current_level()?;
        engine.levels().get(index).cloned()
    }

    fn next_level(&self) -> Option<HlsLevel> {
        let index = self.next_level?;
        self.levels().get(index).cloned()
    }

    fn auto_quality_enabled(&self) -> bool {
        self.engine
            .as_ref()
            .map_or(true, |engine| engine.auto_level_enabled())
    }

    fn supports_auto_quality(&self) -> bool {
        true
    }

    fn level_to_quality(&self, level: &HlsLevel) -> QualityLevel {
        let mut quality = QualityLevel::new(level.bitrate, level.width, level.height);
        if level.video_codec.is_some() {
            quality = quality.with_kind(MediaKind::Video);
        }
        if let Some(rate) = level.frame_rate.filter(|rate| rate.is_finite()) {
            quality = quality.with_fps(rate.round().max(0.0) as u32);
        }
        quality
    }

    fn set_auto_quality_state(&mut self, auto: bool) {
        if auto {
            self.next_level = None;
            self.apply_level(None);
        }
    }

    fn set_next_level_index(&mut self, index: Option<usize>) {
        debug!(index = ?index, ready = self.ready, "HLS next level");
        self.next_level = index;
        self.apply_level(index);
        self.queued.push(AdapterSignal::AutoStateChanged);
    }

    fn set_initial_bitrate(&mut self, bitrate: u64) {
        if let Some(engine) = self.engine.as_mut() {
            engine.set_default_bandwidth_estimate(bitrate);
        }
    }

    fn set_cap_level_to_player_size(&mut self, cap: bool) {
        match self.engine.as_mut() {
            Some(engine) => engine.set_cap_level_to_player_size(cap),
            None => self.native_cap = cap,
        }
    }

    fn cap_level_to_player_size(&self) -> bool {
        self.engine
            .as_ref()
            .map_or(self.native_cap, |engine| engine.cap_level_to_player_size())
    }

    fn bandwidth_estimate(&self) -> Option<u64> {
        self.engine.as_ref()?.bandwidth_estimate()
    }

    fn on_init(&mut self) -> Result<()> {
        if let Some(engine) = self.engine.as_mut() {
            self.events = Some(engine.subscribe());
            engine.attach_media(Arc::clone(&self.surface));
            engine.load_source(&self.source.src);
            info!(src = %self.source.src, version = %engine.version(), "HLS source loading");
            return Ok(());
        }

        let playable = {
            let mut surface = self.surface.lock();
            surface.set_src(&self.source.src);
            surface.can_play_type(&self.mime)
        };
        if !playable {
            warn!(src = %self.source.src, mime = %self.mime, "Surface cannot play HLS natively");
            self.queued.push(AdapterSignal::Error {
                message: format!(
                    "HLS source not supported natively: {} ({})",
                    self.source.src, self.mime
                ),
                fatal: true,
            });
        }
        info!(src = %self.source.src, "HLS native playback");
        self.queued.push(AdapterSignal::PlayListChanged);
        self.queued.push(AdapterSignal::Ready);
        Ok(())
    }

    fn on_ready(&mut self) {
        self.ready = true;
    }

    fn poll_signals(&mut self, signals: &mut Vec<AdapterSignal>) {
        signals.append(&mut self.queued);

        for event in drain_events(&mut self.events) {
            match event {
                HlsEngineEvent::ManifestParsed => {
                    signals.push(AdapterSignal::PlayListChanged);
                    signals.push(AdapterSignal::Ready);
                    self.autoplay();
                }
                HlsEngineEvent::LevelUpdated => signals.push(AdapterSignal::PlayListChanged),
                HlsEngineEvent::LevelSwitching(index) => {
                    self.next_level = Some(index);
                    signals.push(AdapterSignal::SwitchRequested);
                }
                HlsEngineEvent::LevelSwitched(_) => signals.push(AdapterSignal::SwitchCommitted),
                HlsEngineEvent::Error { message, fatal } => {
                    signals.push(AdapterSignal::Error { message, fatal })
                }
            }
        }
    }
}

impl Drop for HlsAdapter {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.as_mut() {
            debug!(version = %engine.version(), "Destroying HLS engine");
            engine.destroy();
        }
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::sim::{SimHlsEngine, SimSurface, SwitchMode};
    use crate::surface::shared;

    fn levels() -> Vec<HlsLevel> {
        vec![
            HlsLevel {
                bitrate: 800_000,
                width: 854,
                height: 480,
                video_codec: Some("avc1.4d401f".into()),
                frame_rate: Some(29.97),
            },
            HlsLevel {
                bitrate: 2_400_000,
                width: 1280,
                height: 720,
                video_codec: Some("avc1.4d401f".into()),
                frame_rate: None,
            },
        ]
    }

    fn source() -> Source {
        Source::new("https://cdn.example.com/master.m3u8")
    }

    #[test]
    fn test_level_translation() {
        let surface = shared(SimSurface::new());
        let adapter = HlsAdapter::new(None, surface, source(), &PlayerConfig::default()).unwrap();
        let quality = adapter.level_to_quality(&levels()[0]);
        assert_eq!(quality.kind, Some(MediaKind::Video));
        assert_eq!(quality.fps, Some(30));
        assert_eq!(quality.bitrate, 800_000);

        let audio_only = HlsLevel {
            bitrate: 64_000,
            width: 0,
            height: 0,
            video_codec: None,
            frame_rate: None,
        };
        assert_eq!(adapter.level_to_quality(&audio_only), QualityLevel::new(64_000, 0, 0));
    }

    #[test]
    fn test_start_level_before_ready_then_fast_switch() {
        let surface = shared(SimSurface::new());
        let engine = SimHlsEngine::new(levels());
        let handle = engine.handle();
        let mut adapter =
            HlsAdapter::new(Some(Box::new(engine)), surface, source(), &PlayerConfig::default())
                .unwrap();

        adapter.set_next_level_index(Some(1));
        adapter.on_ready();
        adapter.set_next_level_index(Some(0));

        assert_eq!(
            handle.state().switch_calls,
            vec![(SwitchMode::Start, Some(1)), (SwitchMode::Next, Some(0))]
        );
    }

    #[test]
    fn test_load_level_without_fast_switch() {
        let surface = shared(SimSurface::new());
        let engine = SimHlsEngine::new(levels());
        let handle = engine.handle();
        let config = PlayerConfig {
            fast_switch: false,
            ..Default::default()
        };
        let mut adapter =
            HlsAdapter::new(Some(Box::new(engine)), surface, source(), &config).unwrap();

        adapter.on_ready();
        adapter.set_next_level_index(Some(1));
        assert_eq!(handle.state().switch_calls, vec![(SwitchMode::Load, Some(1))]);
    }

    #[test]
    fn test_native_playback_reports_unsupported_mime() {
        let surface_impl = SimSurface::new();
        let surface_handle = surface_impl.handle();
        let mut adapter = HlsAdapter::new(
            None,
            shared(surface_impl),
            source(),
            &PlayerConfig::default(),
        )
        .unwrap();

        adapter.on_init().unwrap();
        let mut signals = Vec::new();
        adapter.poll_signals(&mut signals);

        assert!(matches!(signals[0], AdapterSignal::Error { fatal: true, .. }));
        assert_eq!(
            &signals[1..],
            &[AdapterSignal::PlayListChanged, AdapterSignal::Ready]
        );
        assert_eq!(
            surface_handle.state().src.as_deref(),
            Some("https://cdn.example.com/master.m3u8")
        );
        assert!(adapter.is_native());
        assert!(adapter.auto_quality_enabled());
    }

    #[test]
    fn test_drop_destroys_engine() {
        let engine = SimHlsEngine::new(levels());
        let handle = engine.handle();
        let adapter = HlsAdapter::new(
            Some(Box::new(engine)),
            shared(SimSurface::new()),
            source(),
            &PlayerConfig::default(),
        )
        .unwrap();

        assert!(!handle.state().destroyed);
        drop(adapter);
        assert!(handle.state().destroyed);
    }
}
