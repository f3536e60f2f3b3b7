//! Progressive adapter: one plain file per rendition
//!
//! Switching swaps the surface source and restores position, rate and
//! paused state once the new file can play. There is no automatic
//! selection.

use super::drain_events;
use crate::{
    adapter::{Adapter, AdapterSignal},
    quality::compute_fps,
    surface::{SharedSurface, SurfaceEvent},
    types::{MediaKind, QualityLevel, Source},
    Error, Result,
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const DEFAULT_MIME: &str = "video/mp4";

/// A fully described progressive rendition
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressiveLevel {
    pub src: String,
    pub mime: String,
    pub bitrate: u64,
    pub width: u32,
    pub height: u32,
    pub fps: Option<String>,
}

impl ProgressiveLevel {
    fn from_source(source: Source) -> Result<Self> {
        let mime = source
            .resolved_mime()
            .unwrap_or_else(|| DEFAULT_MIME.to_string());
        match (source.bitrate, source.width, source.height) {
            (Some(bitrate), Some(width), Some(height))
                if bitrate > 0 && width > 0 && height > 0 =>
            {
                Ok(Self {
                    src: source.src,
                    mime,
                    bitrate,
                    width,
                    height,
                    fps: source.fps,
                })
            }
            _ => Err(Error::IncompleteSource { src: source.src }),
        }
    }
}

/// Surface state captured before a source swap
#[derive(Debug, Clone, Copy)]
struct PlaybackSnapshot {
    current_time: f64,
    playback_rate: f64,
    paused: bool,
    autoplay: bool,
}

pub struct ProgressiveAdapter {
    surface: SharedSurface,
    levels: Vec<ProgressiveLevel>,
    current: usize,
    next: usize,
    start: usize,
    cap_level_to_player_size: bool,
    ready: bool,
    restore: Option<PlaybackSnapshot>,
    surface_events: Option<mpsc::UnboundedReceiver<SurfaceEvent>>,
    queued: Vec<AdapterSignal>,
}

impl ProgressiveAdapter {
    /// Every source needs bitrate, width and height
    pub fn new(surface: SharedSurface, sources: Vec<Source>) -> Result<Self> {
        if sources.is_empty() {
            return Err(Error::NoPlayableSource);
        }
        let mut levels = sources
            .into_iter()
            .map(ProgressiveLevel::from_source)
            .collect::<Result<Vec<_>>>()?;
        levels.sort_by_key(|level| level.bitrate);

        Ok(Self {
            surface,
            levels,
            current: 0,
            next: 0,
            start: 0,
            cap_level_to_player_size: false,
            ready: false,
            restore: None,
            surface_events: None,
            queued: Vec::new(),
        })
    }

    /// Swap the surface source, keeping playback state for the can-play restore
    fn swap_source(&mut self, index: usize) {
        let Some(level) = self.levels.get(index) else {
            return;
        };
        let mut surface = self.surface.lock();
        let snapshot = PlaybackSnapshot {
            current_time: surface.current_time(),
            playback_rate: surface.playback_rate(),
            paused: surface.paused(),
            autoplay: surface.autoplay(),
        };
        info!(src = %level.src, at = snapshot.current_time, "Progressive source swap");

        surface.pause();
        surface.set_autoplay(true);
        surface.set_src(&level.src);
        self.restore = Some(snapshot);
    }

    fn restore_playback(&mut self) {
        let Some(snapshot) = self.restore.take() else {
            return;
        };
        self.current = self.next;

        let mut surface = self.surface.lock();
        surface.set_current_time(snapshot.current_time);
        surface.set_autoplay(snapshot.autoplay);
        surface.set_playback_rate(snapshot.playback_rate);
        if snapshot.paused {
            surface.pause();
        } else {
            surface.play();
        }
        debug!(at = snapshot.current_time, "Progressive playback restored");
    }
}

impl Adapter for ProgressiveAdapter {
    type Level = ProgressiveLevel;

    fn name(&self) -> String {
        "Progressive".to_string()
    }

    fn levels(&self) -> Vec<ProgressiveLevel> {
        self.levels.clone()
    }

    fn current_level(&self) -> Option<ProgressiveLevel> {
        self.levels.get(self.current).cloned()
    }

    fn next_level(&self) -> Option<ProgressiveLevel> {
        self.levels.get(self.next).cloned()
    }

    fn auto_quality_enabled(&self) -> bool {
        false
    }

    fn supports_auto_quality(&self) -> bool {
        false
    }

    fn level_to_quality(&self, level: &ProgressiveLevel) -> QualityLevel {
        let quality = QualityLevel::new(level.bitrate, level.width, level.height)
            .with_kind(MediaKind::Video);
        match level.fps.as_deref().and_then(compute_fps) {
            Some(fps) => quality.with_fps(fps),
            None => quality,
        }
    }

    fn set_auto_quality_state(&mut self, auto: bool) {
        if auto {
            warn!("Progressive playback has no automatic quality");
        }
    }

    fn set_next_level_index(&mut self, index: Option<usize>) {
        let Some(index) = index.filter(|index| *index < self.levels.len()) else {
            if self.ready {
                warn!(index = ?index, "Progressive level unresolved, pausing");
                self.surface.lock().pause();
            }
            return;
        };

        self.next = index;
        if !self.ready {
            // Nothing is loaded yet; the start level is what on_ready loads
            debug!(index, "Progressive start level");
            self.start = index;
            self.current = index;
            return;
        }
        self.swap_source(index);
    }

    fn set_initial_bitrate(&mut self, bitrate: u64) {
        let mut index = 0;
        for (i, level) in self.levels.iter().enumerate() {
            if level.bitrate <= bitrate {
                index = i;
            } else {
                break;
            }
        }
        debug!(index, bitrate, "Progressive start level from initial bitrate");
        self.start = index;
    }

    fn set_cap_level_to_player_size(&mut self, cap: bool) {
        self.cap_level_to_player_size = cap;
    }

    fn cap_level_to_player_size(&self) -> bool {
        self.cap_level_to_player_size
    }

    fn bandwidth_estimate(&self) -> Option<u64> {
        None
    }

    fn on_init(&mut self) -> Result<()> {
        let start = self.levels.get(self.start).ok_or(Error::NoPlayableSource)?;
        let mut surface = self.surface.lock();
        if !surface.can_play_type(&start.mime) {
            return Err(Error::UnsupportedMimeType {
                mime: start.mime.clone(),
            });
        }
        self.surface_events = Some(surface.subscribe());
        drop(surface);

        self.next = self.start;
        self.current = self.start;
        self.queued.push(AdapterSignal::PlayListChanged);
        self.queued.push(AdapterSignal::Ready);
        Ok(())
    }

    fn on_ready(&mut self) {
        self.ready = true;
        let Some(level) = self.levels.get(self.current) else {
            return;
        };
        info!(src = %level.src, bitrate = level.bitrate, "Progressive source loading");

        let mut surface = self.surface.lock();
        surface.set_src(&level.src);
        if surface.autoplay() {
            surface.play();
        }
    }

    fn poll_signals(&mut self, signals: &mut Vec<AdapterSignal>) {
        signals.append(&mut self.queued);

        for event in drain_events(&mut self.surface_events) {
            match event {
                SurfaceEvent::LoadStart => signals.push(AdapterSignal::SwitchRequested),
                SurfaceEvent::LoadedMetadata => {
                    self.current = self.next;
                    signals.push(AdapterSignal::SwitchCommitted);
                }
                SurfaceEvent::CanPlay => self.restore_playback(),
                SurfaceEvent::Play | SurfaceEvent::Pause => {}
            }
        }
    }
}

impl Drop for ProgressiveAdapter {
    fn drop(&mut self) {
        // Never attached: the surface belongs to another adapter
        if self.surface_events.is_some() {
            self.surface.lock().pause();
        }
    }
}

#[cfg(all(test, feature = "sim"))]
mod tests {
    use super::*;
    use crate::sim::{SimSurface, SimSurfaceHandle};
    use crate::surface::shared;

    fn sources() -> Vec<Source> {
        vec![
            Source::new("https://cdn.example.com/720.mp4").with_rendition(2_400_000, 1280, 720),
            Source::new("https://cdn.example.com/360.mp4")
                .with_rendition(600_000, 640, 360)
                .with_fps("25"),
            Source::new("https://cdn.example.com/540.mp4").with_rendition(1_200_000, 960, 540),
        ]
    }

    fn adapter() -> (ProgressiveAdapter, SimSurfaceHandle) {
        let surface = SimSurface::new();
        let handle = surface.handle();
        (ProgressiveAdapter::new(shared(surface), sources()).unwrap(), handle)
    }

    #[test]
    fn test_levels_sorted_and_translated() {
        let (adapter, _surface) = adapter();
        let bitrates: Vec<u64> = adapter.levels.iter().map(|level| level.bitrate).collect();
        assert_eq!(bitrates, vec![600_000, 1_200_000, 2_400_000]);

        let quality = adapter.level_to_quality(&adapter.levels[0]);
        assert_eq!(quality.kind, Some(MediaKind::Video));
        assert_eq!(quality.fps, Some(25));
        assert!(!adapter.supports_auto_quality());
    }

    #[test]
    fn test_incomplete_source_rejected() {
        let mut incomplete = sources();
        incomplete.push(Source::new("https://cdn.example.com/unknown.mp4"));
        let result = ProgressiveAdapter::new(shared(SimSurface::new()), incomplete);
        assert!(matches!(result, Err(Error::IncompleteSource { .. })));

        let zero = vec![Source::new("a.mp4").with_rendition(0, 640, 360)];
        let result = ProgressiveAdapter::new(shared(SimSurface::new()), zero);
        assert!(matches!(result, Err(Error::IncompleteSource { .. })));
    }

    #[test]
    fn test_initial_bitrate_picks_highest_fitting() {
        let (mut adapter, _surface) = adapter();
        adapter.set_initial_bitrate(2_000_000);
        assert_eq!(adapter.start, 1);
        adapter.set_initial_bitrate(1);
        assert_eq!(adapter.start, 0);
    }

    #[test]
    fn test_init_rejects_unplayable_mime() {
        let surface = SimSurface::new().with_playable(&["application/dash+xml"]);
        let mut adapter = ProgressiveAdapter::new(shared(surface), sources()).unwrap();
        assert!(matches!(
            adapter.on_init(),
            Err(Error::UnsupportedMimeType { .. })
        ));
    }

    #[test]
    fn test_start_level_loaded_on_ready() {
        let (mut adapter, surface) = adapter();
        adapter.set_initial_bitrate(1_500_000);
        adapter.on_init().unwrap();
        assert_eq!(surface.state().src, None);

        adapter.on_ready();
        assert_eq!(
            surface.state().src.as_deref(),
            Some("https://cdn.example.com/540.mp4")
        );
    }

    #[test]
    fn test_swap_restores_playback_state() {
        let (mut adapter, surface) = adapter();
        adapter.on_init().unwrap();
        adapter.on_ready();
        surface.finish_load(640, 360);
        {
            let mut state = surface.state();
            state.current_time = 42.5;
            state.playback_rate = 1.5;
            state.paused = false;
        }
        let mut signals = Vec::new();
        adapter.poll_signals(&mut signals);

        adapter.set_next_level_index(Some(2));
        assert_eq!(
            surface.state().src.as_deref(),
            Some("https://cdn.example.com/720.mp4")
        );
        assert!(surface.state().paused);

        signals.clear();
        surface.finish_load(1280, 720);
        adapter.poll_signals(&mut signals);
        assert_eq!(
            signals,
            vec![AdapterSignal::SwitchRequested, AdapterSignal::SwitchCommitted]
        );

        let state = surface.state();
        assert_eq!(state.current_time, 42.5);
        assert_eq!(state.playback_rate, 1.5);
        assert!(!state.paused);
        assert!(!state.autoplay);
        drop(state);
        assert_eq!(adapter.current, 2);
    }

    #[test]
    fn test_unresolved_level_pauses_after_ready() {
        let (mut adapter, surface) = adapter();
        adapter.on_init().unwrap();
        adapter.on_ready();
        surface.start_playback();

        adapter.set_next_level_index(None);
        assert!(surface.state().paused);
        assert_eq!(adapter.next, 0);
    }

    #[test]
    fn test_drop_pauses_only_when_attached() {
        let (detached, surface) = adapter();
        surface.start_playback();
        drop(detached);
        assert!(!surface.state().paused);

        let (mut attached, surface) = adapter();
        attached.on_init().unwrap();
        attached.on_ready();
        surface.start_playback();
        drop(attached);
        assert!(surface.state().paused);
    }
}
