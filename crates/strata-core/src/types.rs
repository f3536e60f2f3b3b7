//! Core types for Strata

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use uuid::Uuid;

/// Unique identifier for a host player session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Media kind of a rendition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
    Image,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Image => "image",
        }
    }
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One rendition of the content, in the backend-independent vocabulary
///
/// Compared by value. `kind` and `fps` are optional and act as wildcards in
/// [`is_same_level`](crate::quality::is_same_level).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QualityLevel {
    /// Bandwidth in bits per second
    pub bitrate: u64,
    pub width: u32,
    pub height: u32,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<MediaKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<u32>,
}

impl QualityLevel {
    pub fn new(bitrate: u64, width: u32, height: u32) -> Self {
        Self {
            bitrate,
            width,
            height,
            kind: None,
            fps: None,
        }
    }

    /// Build from floating-point metadata: truncates toward zero, saturates
    /// at the integer bounds, NaN becomes 0
    pub fn from_f64_parts(bitrate: f64, width: f64, height: f64) -> Self {
        Self::new(bitrate as u64, width as u32, height as u32)
    }

    pub fn with_kind(mut self, kind: MediaKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Attach a frame rate; zero means unknown and is dropped
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = (fps != 0).then_some(fps);
        self
    }

    /// `min(width, height)`, used to match renditions across ladders
    pub fn short_side(&self) -> u32 {
        self.width.min(self.height)
    }
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&crate::quality::encode(self))
    }
}

/// Sorted (ascending bitrate) list of known quality levels
pub type PlayList = Vec<QualityLevel>;

/// Family of playback backend a source is served by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// HLS manifest; played by an MSE engine or natively by the surface
    Hls,
    /// DASH manifest; played by a track-based MSE engine
    Dash,
    /// Plain progressive file, one per rendition
    Progressive,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::Hls => write!(f, "hls"),
            SourceKind::Dash => write!(f, "dash"),
            SourceKind::Progressive => write!(f, "progressive"),
        }
    }
}

/// Known mime types, grouped by file extension
pub const HLS_MIME_TYPES: &[&str] = &["application/x-mpegURL", "application/vnd.apple.mpegURL"];
pub const DASH_MIME_TYPES: &[&str] = &["application/dash+xml"];
pub const MP4_MIME_TYPES: &[&str] = &["video/mp4"];

const EXTENSION_MIME_TYPES: &[(&str, &str)] = &[
    ("m3u8", "application/x-mpegURL"),
    ("mpd", "application/dash+xml"),
    ("mp4", "video/mp4"),
    ("m4s", "video/iso.segment"),
    ("m4a", "audio/mp4"),
    ("mp3", "audio/mpeg"),
    ("aac", "audio/aac"),
    ("ts", "video/mp2t"),
];

/// Map a mime type to the backend family able to play it
pub fn source_kind_for_mime(mime: &str) -> Option<SourceKind> {
    if HLS_MIME_TYPES.contains(&mime) {
        Some(SourceKind::Hls)
    } else if DASH_MIME_TYPES.contains(&mime) {
        Some(SourceKind::Dash)
    } else if MP4_MIME_TYPES.contains(&mime) {
        Some(SourceKind::Progressive)
    } else {
        None
    }
}

/// Infer a mime type from the extension of a source URL or path
pub fn mime_from_src(src: &str) -> Option<&'static str> {
    // Query and fragment never carry the extension
    let path = match url::Url::parse(src) {
        Ok(url) => url.path().to_string(),
        Err(_) => src.split(['?', '#']).next().unwrap_or(src).to_string(),
    };

    let (_, extension) = path.rsplit_once('.')?;
    if extension.is_empty() || extension.contains(['/', '\\']) {
        return None;
    }
    let extension = extension.to_lowercase();

    EXTENSION_MIME_TYPES
        .iter()
        .find(|(ext, _)| *ext == extension)
        .map(|(_, mime)| *mime)
}

/// A candidate playback source as provided by the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Frame rate as written by the source, e.g. `"30"` or `"30000/1001"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<String>,
}

impl Source {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            ..Default::default()
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn with_rendition(mut self, bitrate: u64, width: u32, height: u32) -> Self {
        self.bitrate = Some(bitrate);
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_fps(mut self, fps: impl Into<String>) -> Self {
        self.fps = Some(fps.into());
        self
    }

    /// Explicit mime type, or one inferred from the URL extension
    pub fn resolved_mime(&self) -> Option<String> {
        self.mime
            .clone()
            .or_else(|| mime_from_src(&self.src).map(str::to_string))
    }

    /// Backend family for this source
    pub fn kind(&self) -> Result<SourceKind> {
        let mime = self.resolved_mime().ok_or_else(|| Error::MissingMimeType {
            src: self.src.clone(),
        })?;
        source_kind_for_mime(&mime).ok_or(Error::UnsupportedMimeType { mime })
    }

    pub fn short_side(&self) -> Option<u32> {
        Some(self.width?.min(self.height?))
    }
}

/// Runtime environment inputs for source selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    /// MediaSource extensions available to MSE engines
    pub media_source: bool,
    /// The surface can play HLS without an MSE engine
    pub native_hls: bool,
    pub safari: bool,
    pub mobile: bool,
}

impl Capabilities {
    /// A desktop browser with MSE and no native HLS
    pub fn desktop() -> Self {
        Self {
            media_source: true,
            ..Default::default()
        }
    }

    /// Derive browser flags from a user-agent string
    pub fn from_user_agent(user_agent: &str, media_source: bool) -> Self {
        let ua = user_agent.to_lowercase();
        let safari = ua.contains("safari") && !ua.contains("chrome");
        let mobile = ["mobi", "android", "iphone", "ipad"]
            .iter()
            .any(|marker| ua.contains(marker));

        Self {
            media_source,
            native_hls: safari,
            safari,
            mobile,
        }
    }
}

/// Reconciliation engine lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineState {
    Uninitialized,
    /// Waiting for the adapter to report its first playable level set
    Initializing,
    Ready,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Uninitialized => write!(f, "uninitialized"),
            EngineState::Initializing => write!(f, "initializing"),
            EngineState::Ready => write!(f, "ready"),
        }
    }
}

/// Player configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Switch at the next fragment boundary instead of after the buffer drains
    pub fast_switch: bool,
    /// Restrict renditions to the surface's on-screen size
    pub cap_level_to_player_size: bool,
    /// Starting bandwidth estimate in bps
    pub initial_bitrate: Option<u64>,
    /// Capacity of each event bus
    ///
    /// A subscriber that falls further behind than this loses the oldest
    /// events it has not read.
    pub event_capacity: usize,
    /// DASH buffering goal in seconds
    pub dash_buffering_goal: f64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            fast_switch: true,
            cap_level_to_player_size: false,
            initial_bitrate: None,
            event_capacity: 64,
            dash_buffering_goal: 15.0,
        }
    }
}

impl PlayerConfig {
    /// Parse and validate a JSON configuration document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(Error::InvalidConfig(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        if self.dash_buffering_goal.is_nan() || self.dash_buffering_goal <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "dash_buffering_goal must be positive, got {}",
                self.dash_buffering_goal
            )));
        }
        Ok(())
    }
}
