//! Source selection
//!
//! Picks the backend family and bootstrap source for a set of candidates:
//!
//! 1. Safari or mobile with an HLS source: lowest HLS
//! 2. MediaSource with a DASH source: lowest DASH
//! 3. MediaSource or native HLS with an HLS source: lowest HLS
//! 4. lowest progressive source
//!
//! "Lowest" follows [`compare_sources`].

use crate::types::{source_kind_for_mime, Capabilities, Source, SourceKind};
use serde::Serialize;
use std::cmp::Ordering;
use tracing::debug;

/// The chosen source and every candidate of the same family
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedSource {
    /// Bootstrap source, mime resolved
    pub source: Source,
    pub kind: SourceKind,
    /// The whole family, sorted; progressive playback needs every rendition
    pub alternatives: Vec<Source>,
}

pub trait SourcePolicy: Send + Sync {
    fn select(&self, sources: &[Source], capabilities: &Capabilities) -> Option<SelectedSource>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSourcePolicy;

#[derive(Debug, Default)]
struct SourceMap {
    hls: Vec<Source>,
    dash: Vec<Source>,
    progressive: Vec<Source>,
}

impl SourceMap {
    fn from_sources(sources: &[Source]) -> Self {
        let mut map = SourceMap::default();
        for source in sources {
            let Some(mime) = source.resolved_mime() else {
                debug!(src = %source.src, "Skipping source without mime type");
                continue;
            };
            let Some(kind) = source_kind_for_mime(&mime) else {
                debug!(src = %source.src, %mime, "Skipping unsupported source");
                continue;
            };
            let resolved = Source {
                mime: Some(mime),
                ..source.clone()
            };
            match kind {
                SourceKind::Hls => map.hls.push(resolved),
                SourceKind::Dash => map.dash.push(resolved),
                SourceKind::Progressive => map.progressive.push(resolved),
            }
        }

        stable_sort(&mut map.hls);
        stable_sort(&mut map.dash);
        stable_sort(&mut map.progressive);
        map
    }

    fn take(&mut self, kind: SourceKind) -> Option<SelectedSource> {
        let bucket = match kind {
            SourceKind::Hls => std::mem::take(&mut self.hls),
            SourceKind::Dash => std::mem::take(&mut self.dash),
            SourceKind::Progressive => std::mem::take(&mut self.progressive),
        };
        let source = bucket.first()?.clone();
        Some(SelectedSource {
            source,
            kind,
            alternatives: bucket,
        })
    }
}

impl SourcePolicy for DefaultSourcePolicy {
    fn select(&self, sources: &[Source], capabilities: &Capabilities) -> Option<SelectedSource> {
        let mut map = SourceMap::from_sources(sources);

        let kind = if (capabilities.safari || capabilities.mobile) && !map.hls.is_empty() {
            SourceKind::Hls
        } else if capabilities.media_source && !map.dash.is_empty() {
            SourceKind::Dash
        } else if (capabilities.media_source || capabilities.native_hls) && !map.hls.is_empty() {
            SourceKind::Hls
        } else if !map.progressive.is_empty() {
            SourceKind::Progressive
        } else {
            debug!(candidates = sources.len(), "No source fits the environment");
            return None;
        };

        let selected = map.take(kind)?;
        debug!(src = %selected.source.src, %kind, "Source selected");
        Some(selected)
    }
}

/// Rendition order: bitrate if both have one, else short side, else frame rate
///
/// Not a total order: sources comparing on different keys can be
/// inconsistent, so sorting must tolerate that.
pub fn compare_sources(a: &Source, b: &Source) -> Ordering {
    if let (Some(a), Some(b)) = (nonzero(a.bitrate), nonzero(b.bitrate)) {
        return a.cmp(&b);
    }
    if let (Some(a), Some(b)) = (nonzero_short_side(a), nonzero_short_side(b)) {
        return a.cmp(&b);
    }
    if let (Some(a), Some(b)) = (frame_rate(a), frame_rate(b)) {
        return a.partial_cmp(&b).unwrap_or(Ordering::Equal);
    }
    Ordering::Equal
}

fn nonzero(value: Option<u64>) -> Option<u64> {
    value.filter(|value| *value > 0)
}

fn nonzero_short_side(source: &Source) -> Option<u32> {
    source.short_side().filter(|side| *side > 0)
}

fn frame_rate(source: &Source) -> Option<f64> {
    source
        .fps
        .as_deref()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|fps| *fps != 0.0)
}

/// Stable insertion sort; never panics on an inconsistent comparator
fn stable_sort(sources: &mut [Source]) {
    for i in 1..sources.len() {
        let mut j = i;
        while j > 0 && compare_sources(&sources[j - 1], &sources[j]) == Ordering::Greater {
            sources.swap(j - 1, j);
            j -= 1;
        }
    }
}
