//! Backend adapters
//!
//! The closed set of playback backends behind [`Adapter`](crate::adapter::Adapter):
//!
//! - [`hls`]: segmented HLS through an MSE engine, or natively on the surface
//! - [`dash`]: DASH through a track-based MSE engine
//! - [`progressive`]: one plain file per rendition, swapped on the surface

pub mod dash;
pub mod hls;
pub mod progressive;

pub use dash::{DashAdapter, DashEngine, DashEngineEvent, TrackKind, VariantTrack};
pub use hls::{HlsAdapter, HlsEngine, HlsEngineEvent, HlsLevel};
pub use progressive::{ProgressiveAdapter, ProgressiveLevel};

use tokio::sync::mpsc;

/// Everything queued on an optional receiver, without waiting
pub(crate) fn drain_events<T>(rx: &mut Option<mpsc::UnboundedReceiver<T>>) -> Vec<T> {
    let mut events = Vec::new();
    if let Some(rx) = rx.as_mut() {
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
    }
    events
}
