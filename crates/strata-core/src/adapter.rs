//! Backend adapter contract
//!
//! An adapter wraps one playback backend and exposes its native levels
//! through a handful of primitives. Everything else (diffing, readiness,
//! auto tracking, ID resolution, event sequencing) lives once in
//! [`QualityEngine`](crate::engine::QualityEngine).

use crate::types::QualityLevel;
use crate::Result;

/// Progress reported by an adapter, applied by the engine in order
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterSignal {
    /// The native level list may have changed
    PlayListChanged,
    /// The backend started switching toward its next level
    SwitchRequested,
    /// The backend committed a level
    SwitchCommitted,
    /// The backend's automatic selection may have been toggled
    AutoStateChanged,
    /// The first playable level set is known
    Ready,
    Error { message: String, fatal: bool },
}

/// Primitives every backend variant provides
pub trait Adapter: Send {
    /// Backend-native level representation
    type Level: Clone;

    /// Backend name and version, for logs and the host
    fn name(&self) -> String;

    /// Native levels, in backend order
    fn levels(&self) -> Vec<Self::Level>;

    fn current_level(&self) -> Option<Self::Level>;

    fn next_level(&self) -> Option<Self::Level>;

    fn auto_quality_enabled(&self) -> bool;

    fn supports_auto_quality(&self) -> bool;

    /// Translate a native level; must be pure
    fn level_to_quality(&self, level: &Self::Level) -> QualityLevel;

    /// Index into [`levels`](Adapter::levels) best matching `target`
    fn find_level_index(&self, target: &QualityLevel) -> Option<usize> {
        let levels: Vec<QualityLevel> = self
            .levels()
            .iter()
            .map(|level| self.level_to_quality(level))
            .collect();
        resolve_level_index(&levels, target)
    }

    fn set_auto_quality_state(&mut self, auto: bool);

    /// Point the backend at a native level; `None` leaves the choice to it
    fn set_next_level_index(&mut self, index: Option<usize>);

    fn set_initial_bitrate(&mut self, bitrate: u64);

    fn set_cap_level_to_player_size(&mut self, cap: bool);

    fn cap_level_to_player_size(&self) -> bool;

    /// Estimated bandwidth in bps, when the backend measures one
    fn bandwidth_estimate(&self) -> Option<u64>;

    /// Attach to the surface and start loading. Called once, on the first tick.
    fn on_init(&mut self) -> Result<()>;

    /// Called by the engine right after it turns ready
    fn on_ready(&mut self) {}

    /// Drain backend events and append the resulting signals
    fn poll_signals(&mut self, signals: &mut Vec<AdapterSignal>);
}

/// Shared level-index resolution
///
/// Exact bitrate match first, then the first level with the same short side.
pub fn resolve_level_index(levels: &[QualityLevel], target: &QualityLevel) -> Option<usize> {
    levels
        .iter()
        .position(|level| level.bitrate == target.bitrate)
        .or_else(|| {
            let short_side = target.short_side();
            levels
                .iter()
                .position(|level| level.short_side() == short_side)
        })
}
