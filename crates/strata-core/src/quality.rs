//! Quality ID codec
//!
//! Quality IDs are the only quality vocabulary crossing the host boundary and
//! the format hosts persist ("preferred quality"), so the grammar must stay
//! stable across backends:
//!
//! ```text
//! br<bitrate>-<width>x<height>[-video|-audio][-<fps>]
//! ```
//!
//! e.g. `br2000000-1920x1080-video-30`, `br1200000-1280x720`, or the sentinel
//! `auto`.

use crate::types::{MediaKind, QualityLevel};
use nom::{
    bytes::complete::tag,
    character::complete::{char, digit1, multispace0},
    combinator::{map_res, opt},
    number::complete::double,
    sequence::preceded,
    IResult, Parser,
};
use std::fmt::Write;
use std::str::FromStr;

/// Sentinel ID selecting backend-driven adaptation
pub const AUTO_QUALITY_ID: &str = "auto";

const LINE_TERMINATORS: [char; 4] = ['\n', '\r', '\u{2028}', '\u{2029}'];

/// Whether `id` selects auto quality
pub fn is_auto_quality(id: &str) -> bool {
    id == AUTO_QUALITY_ID
}

/// Encode a level as its quality ID
pub fn encode(level: &QualityLevel) -> String {
    let mut id = format!("br{}-{}x{}", level.bitrate, level.width, level.height);
    if let Some(kind) = level.kind {
        let _ = write!(id, "-{}", kind);
    }
    if let Some(fps) = level.fps.filter(|fps| *fps != 0) {
        let _ = write!(id, "-{}", fps);
    }
    id
}

/// ID of an optional level, `auto` when there is none
pub fn id_or_auto(level: Option<&QualityLevel>) -> String {
    level
        .map(encode)
        .unwrap_or_else(|| AUTO_QUALITY_ID.to_string())
}

/// Decode a quality ID
///
/// Returns `None` for anything outside the grammar, including `auto` and
/// numbers that overflow. A trailing segment that is not a non-zero integer
/// is dropped rather than rejected.
pub fn decode(id: &str) -> Option<QualityLevel> {
    let (rest, (bitrate, width, height)) = level_head(id).ok()?;
    if rest.contains(LINE_TERMINATORS) {
        return None;
    }

    let mut level = QualityLevel::new(bitrate, width, height);
    if rest.is_empty() {
        return Some(level);
    }

    let rest = rest.strip_prefix('-')?;
    let (kind, tail) = split_kind(rest);
    level.kind = kind;
    if let Some(fps) = tail.and_then(leading_integer) {
        level = level.with_fps(fps);
    }
    Some(level)
}

/// Whether two optional levels describe the same rendition
///
/// Bitrate and dimensions must match exactly; kind and fps are only compared
/// when both sides carry them.
pub fn is_same_level(a: Option<&QualityLevel>, b: Option<&QualityLevel>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => {
            a.bitrate == b.bitrate
                && a.width == b.width
                && a.height == b.height
                && wildcard_eq(a.kind, b.kind)
                && wildcard_eq(a.fps, b.fps)
        }
        _ => false,
    }
}

/// Normalise a frame rate such as `"30"`, `"29.97"` or `"30000/1001"`
pub fn compute_fps(raw: &str) -> Option<u32> {
    let fps = match raw.split_once('/') {
        Some((numerator, denominator)) => leading_float(numerator)? / leading_float(denominator)?,
        None => leading_float(raw)?,
    };
    let fps = fps.round();
    (fps.is_finite() && fps >= 1.0 && fps <= u32::MAX as f64).then_some(fps as u32)
}

fn wildcard_eq<T: PartialEq>(a: Option<T>, b: Option<T>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

fn number<T: FromStr>(input: &str) -> IResult<&str, T> {
    map_res(digit1, |digits: &str| digits.parse::<T>()).parse(input)
}

fn level_head(input: &str) -> IResult<&str, (u64, u32, u32)> {
    (
        preceded(tag("br"), number::<u64>),
        preceded(char('-'), number::<u32>),
        preceded(char('x'), number::<u32>),
    )
        .parse(input)
}

/// Split `video[-tail]` / `audio[-tail]`; anything else is all tail
fn split_kind(rest: &str) -> (Option<MediaKind>, Option<&str>) {
    for kind in [MediaKind::Video, MediaKind::Audio] {
        if let Some(after) = rest.strip_prefix(kind.as_str()) {
            if after.is_empty() {
                return (Some(kind), None);
            }
            if let Some(tail) = after.strip_prefix('-') {
                return (Some(kind), Some(tail));
            }
        }
    }
    (None, Some(rest))
}

/// Integer prefix of `input`, zero counts as absent
fn leading_integer(input: &str) -> Option<u32> {
    let parsed: IResult<&str, u32> =
        preceded((multispace0, opt(char('+'))), number::<u32>).parse(input);
    parsed.ok().map(|(_, value)| value).filter(|value| *value != 0)
}

fn leading_float(input: &str) -> Option<f64> {
    let parsed: IResult<&str, f64> = preceded(multispace0, double).parse(input);
    parsed.ok().map(|(_, value)| value)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(bitrate: u64, width: u32, height: u32) -> QualityLevel {
        QualityLevel::new(bitrate, width, height)
    }

    #[test]
    fn test_encode() {
        assert_eq!(encode(&level(1_200_000, 1280, 720)), "br1200000-1280x720");
        assert_eq!(
            encode(&level(2_000_000, 1920, 1080).with_kind(MediaKind::Video)),
            "br2000000-1920x1080-video"
        );
        assert_eq!(
            encode(&level(2_000_000, 1920, 1080).with_kind(MediaKind::Video).with_fps(60)),
            "br2000000-1920x1080-video-60"
        );
        assert_eq!(encode(&level(64_000, 0, 0).with_fps(25)), "br64000-0x0-25");
    }

    #[test]
    fn test_decode() {
        assert_eq!(decode("br1200000-1280x720"), Some(level(1_200_000, 1280, 720)));
        assert_eq!(
            decode("br500000-640x360-video"),
            Some(level(500_000, 640, 360).with_kind(MediaKind::Video))
        );
        assert_eq!(
            decode("br128000-0x0-audio-48"),
            Some(level(128_000, 0, 0).with_kind(MediaKind::Audio).with_fps(48))
        );
        assert_eq!(decode("br800000-854x480-30"), Some(level(800_000, 854, 480).with_fps(30)));
    }

    #[test]
    fn test_decode_drops_bad_fps() {
        assert_eq!(
            decode("br500000-640x360-video-fast"),
            Some(level(500_000, 640, 360).with_kind(MediaKind::Video))
        );
        assert_eq!(decode("br500000-640x360-video-0"), decode("br500000-640x360-video"));
        assert_eq!(decode("br500000-640x360-"), Some(level(500_000, 640, 360)));
        // parseInt-style prefix
        assert_eq!(decode("br500000-640x360-24fps").and_then(|l| l.fps), Some(24));
    }

    #[test]
    fn test_decode_kind_needs_separator() {
        // "videox" is not a kind; the whole tail is an unparseable fps
        assert_eq!(decode("br500000-640x360-videox"), Some(level(500_000, 640, 360)));
        // image is encodable but not part of the decode grammar
        assert_eq!(decode("br500000-640x360-image"), Some(level(500_000, 640, 360)));
    }

    #[test]
    fn test_decode_rejects() {
        assert_eq!(decode("auto"), None);
        assert_eq!(decode(""), None);
        assert_eq!(decode("br-640x360"), None);
        assert_eq!(decode("br500000-640"), None);
        assert_eq!(decode("500000-640x360"), None);
        assert_eq!(decode("br500000-640x360video"), None);
        assert_eq!(decode("br99999999999999999999999-640x360"), None);
        assert_eq!(decode("br500000-640x360-video\n"), None);
    }

    #[test]
    fn test_round_trip() {
        let levels = [
            level(0, 0, 0),
            level(500_000, 640, 360),
            level(800_000, 854, 480).with_kind(MediaKind::Video),
            level(96_000, 0, 0).with_kind(MediaKind::Audio),
            level(6_000_000, 3840, 2160).with_fps(60),
            level(4_500_000, 1920, 1080).with_kind(MediaKind::Video).with_fps(30),
            level(u64::MAX, u32::MAX, u32::MAX).with_kind(MediaKind::Audio).with_fps(u32::MAX),
        ];
        for original in levels {
            assert_eq!(decode(&encode(&original)), Some(original), "{}", encode(&original));
        }
    }

    #[test]
    fn test_same_level_wildcards() {
        let plain = level(1, 2, 3);
        let video = plain.with_kind(MediaKind::Video);
        let audio = plain.with_kind(MediaKind::Audio);

        assert!(is_same_level(Some(&plain), Some(&video)));
        assert!(is_same_level(Some(&video), Some(&plain)));
        assert!(!is_same_level(Some(&video), Some(&audio)));

        assert!(is_same_level(Some(&video.with_fps(30)), Some(&video)));
        assert!(!is_same_level(Some(&video.with_fps(30)), Some(&video.with_fps(60))));
        assert!(!is_same_level(Some(&plain), Some(&level(1, 2, 4))));
        assert!(!is_same_level(Some(&plain), Some(&level(9, 2, 3))));
    }

    #[test]
    fn test_same_level_missing_sides() {
        let plain = level(1, 2, 3);
        assert!(is_same_level(None, None));
        assert!(!is_same_level(Some(&plain), None));
        assert!(!is_same_level(None, Some(&plain)));
    }

    #[test]
    fn test_auto_quality() {
        assert!(is_auto_quality("auto"));
        assert!(!is_auto_quality("AUTO"));
        assert!(!is_auto_quality("br1-2x3"));
        assert_eq!(id_or_auto(None), "auto");
        assert_eq!(id_or_auto(Some(&level(1, 2, 3))), "br1-2x3");
    }

    #[test]
    fn test_compute_fps() {
        assert_eq!(compute_fps("30"), Some(30));
        assert_eq!(compute_fps("29.97"), Some(30));
        assert_eq!(compute_fps("30000/1001"), Some(30));
        assert_eq!(compute_fps("24000/1001"), Some(24));
        assert_eq!(compute_fps("25/0"), None);
        assert_eq!(compute_fps("0"), None);
        assert_eq!(compute_fps(""), None);
        assert_eq!(compute_fps("n/a"), None);
    }
}
