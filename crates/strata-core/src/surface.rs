//! Playback surface shared by the backends

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Media element events the adapters listen to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceEvent {
    LoadStart,
    LoadedMetadata,
    CanPlay,
    Play,
    Pause,
}

/// The media element a backend renders into
pub trait Surface: Send {
    fn can_play_type(&self, mime: &str) -> bool;

    fn src(&self) -> Option<String>;

    /// Replace the source; a load cycle follows
    fn set_src(&mut self, src: &str);

    fn current_time(&self) -> f64;

    fn set_current_time(&mut self, time: f64);

    fn playback_rate(&self) -> f64;

    fn set_playback_rate(&mut self, rate: f64);

    fn paused(&self) -> bool;

    fn play(&mut self);

    fn pause(&mut self);

    fn autoplay(&self) -> bool;

    fn set_autoplay(&mut self, autoplay: bool);

    /// Decoded frame size, `(0, 0)` until metadata is known
    fn video_size(&self) -> (u32, u32);

    /// On-screen size in CSS pixels
    fn client_size(&self) -> (u32, u32);

    fn device_pixel_ratio(&self) -> f64;

    /// New receiver for element events; dropping it unsubscribes
    fn subscribe(&mut self) -> mpsc::UnboundedReceiver<SurfaceEvent>;
}

/// Surface handle passed to every adapter
pub type SharedSurface = Arc<Mutex<dyn Surface>>;

pub fn shared<S: Surface + 'static>(surface: S) -> SharedSurface {
    Arc::new(Mutex::new(surface))
}
