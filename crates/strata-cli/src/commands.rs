//! CLI command implementations

use crate::output::{or_dash, print_json, print_table, OutputFormat};
use crate::script::{self, Script, SessionReport};
use anyhow::{bail, Context};
use serde::Serialize;
use std::path::Path;
use strata_core::{
    policy::{DefaultSourcePolicy, SourcePolicy},
    quality, Capabilities, MediaKind, PlayerConfig, PlayerEvent, QualityLevel, Source,
};
use tabled::Tabled;
use tracing::info;

#[derive(Debug, Serialize)]
struct Decoded {
    id: String,
    auto: bool,
    level: Option<QualityLevel>,
}

#[derive(Tabled)]
struct LevelRow {
    id: String,
    bitrate: String,
    width: String,
    height: String,
    kind: String,
    fps: String,
}

impl LevelRow {
    fn new(id: &str, level: Option<&QualityLevel>) -> Self {
        Self {
            id: id.to_string(),
            bitrate: or_dash(level.map(|level| level.bitrate)),
            width: or_dash(level.map(|level| level.width)),
            height: or_dash(level.map(|level| level.height)),
            kind: or_dash(level.and_then(|level| level.kind)),
            fps: or_dash(level.and_then(|level| level.fps)),
        }
    }
}

#[derive(Tabled)]
struct SourceRow {
    rank: usize,
    src: String,
    mime: String,
    bitrate: String,
    size: String,
    fps: String,
}

#[derive(Tabled)]
struct EventRow {
    step: usize,
    action: String,
    event: String,
    detail: String,
}

fn parse_kind(kind: &str) -> anyhow::Result<MediaKind> {
    match kind.to_ascii_lowercase().as_str() {
        "video" => Ok(MediaKind::Video),
        "audio" => Ok(MediaKind::Audio),
        "image" => Ok(MediaKind::Image),
        other => bail!("unknown media kind '{other}' (expected video, audio or image)"),
    }
}

/// Encode a quality level
pub fn encode(
    bitrate: f64,
    width: f64,
    height: f64,
    kind: Option<&str>,
    fps: Option<&str>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let mut level = QualityLevel::from_f64_parts(bitrate, width, height);
    if let Some(kind) = kind {
        level = level.with_kind(parse_kind(kind)?);
    }
    if let Some(raw) = fps {
        let fps = quality::compute_fps(raw).with_context(|| format!("invalid frame rate '{raw}'"))?;
        level = level.with_fps(fps);
    }
    let id = quality::encode(&level);

    match format {
        OutputFormat::Text => println!("{id}"),
        OutputFormat::Json => print_json(&Decoded {
            id,
            auto: false,
            level: Some(level),
        })?,
        OutputFormat::Table => print_table([LevelRow::new(&id, Some(&level))]),
    }
    Ok(())
}

/// Decode quality IDs; IDs outside the grammar are reported, not fatal
pub fn decode(ids: &[String], format: OutputFormat) -> anyhow::Result<()> {
    let decoded: Vec<Decoded> = ids
        .iter()
        .map(|id| Decoded {
            id: id.clone(),
            auto: quality::is_auto_quality(id),
            level: quality::decode(id),
        })
        .collect();

    match format {
        OutputFormat::Text => {
            for entry in &decoded {
                match (&entry.level, entry.auto) {
                    (Some(level), _) => println!(
                        "{}: {} bps, {}x{}, kind {}, fps {}",
                        entry.id,
                        level.bitrate,
                        level.width,
                        level.height,
                        or_dash(level.kind),
                        or_dash(level.fps)
                    ),
                    (None, true) => println!("{}: automatic selection", entry.id),
                    (None, false) => println!("{}: not a quality ID", entry.id),
                }
            }
        }
        OutputFormat::Json => print_json(&decoded)?,
        OutputFormat::Table => print_table(
            decoded
                .iter()
                .map(|entry| LevelRow::new(&entry.id, entry.level.as_ref())),
        ),
    }
    Ok(())
}

/// Environment from a user agent, or from explicit flags
pub fn capabilities(
    user_agent: Option<&str>,
    safari: bool,
    mobile: bool,
    media_source: bool,
) -> Capabilities {
    match user_agent {
        Some(user_agent) => Capabilities::from_user_agent(user_agent, media_source),
        None => Capabilities {
            media_source,
            native_hls: safari,
            safari,
            mobile,
        },
    }
}

fn source_rows(sources: &[Source]) -> Vec<SourceRow> {
    sources
        .iter()
        .enumerate()
        .map(|(rank, source)| SourceRow {
            rank,
            src: source.src.clone(),
            mime: or_dash(source.mime.as_deref()),
            bitrate: or_dash(source.bitrate),
            size: match (source.width, source.height) {
                (Some(width), Some(height)) => format!("{width}x{height}"),
                _ => "-".to_string(),
            },
            fps: or_dash(source.fps.as_deref()),
        })
        .collect()
}

/// Run the source policy over a JSON source list
pub fn select(path: &Path, capabilities: Capabilities, format: OutputFormat) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let sources: Vec<Source> = serde_json::from_str(&json)
        .with_context(|| format!("parsing {}", path.display()))?;
    info!(candidates = sources.len(), ?capabilities, "Selecting source");

    let selected = DefaultSourcePolicy.select(&sources, &capabilities);
    if format == OutputFormat::Json {
        return print_json(&selected);
    }

    for source in &sources {
        if let Err(err) = source.kind() {
            eprintln!("Skipped: {} ({err})", source.src);
        }
    }

    let Some(selected) = selected else {
        bail!("no playable source among {} candidates", sources.len());
    };
    match format {
        OutputFormat::Table => print_table(source_rows(&selected.alternatives)),
        _ => {
            println!("Selected: {} ({})", selected.source.src, selected.kind);
            println!("  Mime: {}", or_dash(selected.source.mime.as_deref()));
            println!("  Family ({} sources):", selected.alternatives.len());
            for (i, source) in selected.alternatives.iter().enumerate() {
                println!("    {}. {}", i + 1, source.src);
            }
        }
    }
    Ok(())
}

fn describe(event: &PlayerEvent) -> String {
    match event {
        PlayerEvent::PlayListChanged { levels } if levels.is_empty() => "(empty)".to_string(),
        PlayerEvent::PlayListChanged { levels } => levels
            .iter()
            .map(quality::encode)
            .collect::<Vec<_>>()
            .join(", "),
        PlayerEvent::QualitySwitchStart { level }
        | PlayerEvent::QualitySwitchEnd { level }
        | PlayerEvent::QualityChanged { level } => quality::encode(level),
        PlayerEvent::AutoChanged { auto } => auto.to_string(),
        PlayerEvent::Ready => String::new(),
        PlayerEvent::QualityIdSelected { id } => id.clone(),
        PlayerEvent::Error {
            code,
            message,
            fatal,
        } => format!("{code}: {message} (fatal: {fatal})"),
    }
}

fn print_report(report: &SessionReport, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => return print_json(report),
        OutputFormat::Table => print_table(report.steps.iter().flat_map(|record| {
            record.events.iter().map(|event| EventRow {
                step: record.step,
                action: record.action.clone(),
                event: event.name().to_string(),
                detail: describe(event),
            })
        })),
        OutputFormat::Text => {
            for record in &report.steps {
                println!("[{}] {}", record.step, record.action);
                for event in &record.events {
                    println!("    {:<22} {}", event.name(), describe(event));
                }
            }
        }
    }

    println!();
    println!("Session:   {}", report.session_id);
    println!("Core:      {}", or_dash(report.core.as_deref()));
    println!("State:     {}", report.state);
    println!("Quality:   {}", report.quality_id);
    println!("Next:      {}", report.next_quality_id);
    println!("Selected:  {}", report.selected_quality_id);
    println!("Auto:      {}", report.auto_quality);
    println!("Bandwidth: {}", or_dash(report.bandwidth_estimate));
    println!("Playlist:  {}", report.play_list.join(", "));
    Ok(())
}

/// Replay a session script against simulated backends
pub async fn simulate(
    path: &Path,
    config: Option<&Path>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let script: Script = serde_json::from_str(&json)
        .with_context(|| format!("parsing {}", path.display()))?;
    let config = config.map(PlayerConfig::load).transpose()?;

    let report = script::run(script, config).await?;
    print_report(&report, format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!(parse_kind("Video").unwrap(), MediaKind::Video);
        assert!(parse_kind("subtitle").is_err());
    }

    #[test]
    fn test_encode_accepts_fractional_metadata() {
        assert!(encode(1500.9, 1279.7, 719.2, Some("video"), Some("29.97"), OutputFormat::Text).is_ok());
        assert!(encode(1500.0, 1280.0, 720.0, Some("subtitle"), None, OutputFormat::Text).is_err());
    }

    #[test]
    fn test_capabilities_from_flags() {
        let caps = capabilities(None, true, false, false);
        assert!(caps.safari && caps.native_hls && !caps.media_source);

        let caps = capabilities(Some("Mozilla/5.0 (X11; Linux x86_64) Chrome/120.0"), true, true, true);
        assert!(!caps.safari && !caps.mobile && caps.media_source);
    }

    #[test]
    fn test_describe_events() {
        let level = QualityLevel::new(800_000, 960, 540);
        assert_eq!(
            describe(&PlayerEvent::QualityChanged { level }),
            "br800000-960x540"
        );
        assert_eq!(describe(&PlayerEvent::PlayListChanged { levels: vec![] }), "(empty)");
    }
}
