//! Scripted playback sessions
//!
//! A script names the environment, the simulated backend catalogs and the
//! initial sources, then lists the steps to replay. Every step is followed
//! by a pump and records the events the player published meanwhile.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strata_core::{
    backend::{HlsLevel, VariantTrack},
    events::drain,
    quality,
    sim::{SimDashHandle, SimEnvironment, SimHlsHandle, SimSurface},
    Capabilities, Player, PlayerConfig, PlayerEvent, Source, MP4_MIME_TYPES,
};
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    #[serde(default = "Capabilities::desktop")]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub config: PlayerConfig,
    /// Mime types the surface plays natively besides MP4
    #[serde(default)]
    pub playable: Vec<String>,
    #[serde(default)]
    pub autoplay: bool,
    #[serde(default)]
    pub hls_levels: Vec<HlsLevel>,
    #[serde(default)]
    pub dash_tracks: Vec<VariantTrack>,
    pub sources: Vec<Source>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    SetSource { sources: Vec<Source> },
    RequestQuality { id: String },
    RequestIndex { index: isize },
    /// HLS engine reveals its levels
    ParseManifest,
    UpdateLevels { levels: Vec<HlsLevel> },
    /// HLS engine commits the pending manual switch
    CompleteSwitch,
    AdaptHls { index: usize },
    /// DASH engine reveals its tracks and finishes loading
    LoadDashManifest,
    AdaptDash { track_id: u64 },
    /// Surface finishes loading its source at this frame size
    FinishLoad { width: u32, height: u32 },
    Play,
    VideoSize { width: u32, height: u32 },
    ClientSize { width: u32, height: u32 },
    Fail {
        message: String,
        #[serde(default)]
        fatal: bool,
    },
}

impl Step {
    pub fn label(&self) -> String {
        match self {
            Step::SetSource { sources } => format!("set_source ({} candidates)", sources.len()),
            Step::RequestQuality { id } => format!("request_quality {id}"),
            Step::RequestIndex { index } => format!("request_index {index}"),
            Step::ParseManifest => "parse_manifest".to_string(),
            Step::UpdateLevels { levels } => format!("update_levels ({})", levels.len()),
            Step::CompleteSwitch => "complete_switch".to_string(),
            Step::AdaptHls { index } => format!("adapt_hls {index}"),
            Step::LoadDashManifest => "load_dash_manifest".to_string(),
            Step::AdaptDash { track_id } => format!("adapt_dash {track_id}"),
            Step::FinishLoad { width, height } => format!("finish_load {width}x{height}"),
            Step::Play => "play".to_string(),
            Step::VideoSize { width, height } => format!("video_size {width}x{height}"),
            Step::ClientSize { width, height } => format!("client_size {width}x{height}"),
            Step::Fail { message, fatal } => format!("fail {message:?} (fatal: {fatal})"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StepRecord {
    pub step: usize,
    pub action: String,
    pub events: Vec<PlayerEvent>,
}

#[derive(Debug, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub core: Option<String>,
    pub state: String,
    pub ready: bool,
    pub quality_id: String,
    pub next_quality_id: String,
    pub selected_quality_id: String,
    pub auto_quality: bool,
    pub bandwidth_estimate: Option<u64>,
    pub play_list: Vec<String>,
    pub steps: Vec<StepRecord>,
}

fn hls(env: &SimEnvironment) -> anyhow::Result<SimHlsHandle> {
    env.latest_hls().context("no HLS engine has been built")
}

fn dash(env: &SimEnvironment) -> anyhow::Result<SimDashHandle> {
    env.latest_dash().context("no DASH engine has been built")
}

async fn apply(player: &mut Player, env: &SimEnvironment, step: &Step) -> anyhow::Result<()> {
    match step {
        Step::SetSource { sources } => {
            if !player.set_source(sources.clone()) {
                warn!("No playable source, keeping the current engine");
            }
            player.settle().await;
            return Ok(());
        }
        Step::RequestQuality { id } => player.request_quality_by_id(id),
        Step::RequestIndex { index } => player.request_quality_by_index(*index),
        Step::ParseManifest => hls(env)?.parse_manifest(),
        Step::UpdateLevels { levels } => hls(env)?.update_levels(levels.clone()),
        Step::CompleteSwitch => {
            if !hls(env)?.complete_switch() {
                warn!("No HLS switch pending");
            }
        }
        Step::AdaptHls { index } => {
            if !hls(env)?.adapt_to(*index) {
                warn!(index, "HLS adaptation refused");
            }
        }
        Step::LoadDashManifest => dash(env)?.load_manifest(),
        Step::AdaptDash { track_id } => {
            if !dash(env)?.adapt_to(*track_id) {
                warn!(track_id, "DASH adaptation refused");
            }
        }
        Step::FinishLoad { width, height } => env.surface().finish_load(*width, *height),
        Step::Play => env.surface().start_playback(),
        Step::VideoSize { width, height } => env.surface().set_video_size(*width, *height),
        Step::ClientSize { width, height } => env.surface().set_client_size(*width, *height),
        Step::Fail { message, fatal } => {
            if let Some(engine) = env.latest_hls() {
                engine.fail(message, *fatal);
            } else {
                dash(env)?.fail(message, *fatal);
            }
        }
    }
    player.pump();
    Ok(())
}

/// Replay `script`; `config` replaces the script's player configuration
pub async fn run(script: Script, config: Option<PlayerConfig>) -> anyhow::Result<SessionReport> {
    let mut surface = SimSurface::new().with_autoplay(script.autoplay);
    if !script.playable.is_empty() {
        let mut mimes: Vec<&str> = MP4_MIME_TYPES.to_vec();
        mimes.extend(script.playable.iter().map(String::as_str));
        surface = surface.with_playable(&mimes);
    }
    let env = SimEnvironment::new(surface)
        .with_hls_levels(script.hls_levels)
        .with_dash_tracks(script.dash_tracks);

    let config = config.unwrap_or(script.config);
    let mut player = Player::new(config, script.capabilities, Arc::new(env.factory()))?;
    let mut rx = player.subscribe();
    info!(session_id = %player.session_id(), steps = script.steps.len(), "Replaying session");

    let initial = Step::SetSource {
        sources: script.sources,
    };
    let mut steps = Vec::new();
    for (n, step) in std::iter::once(initial).chain(script.steps).enumerate() {
        apply(&mut player, &env, &step)
            .await
            .with_context(|| format!("step {n} ({})", step.label()))?;
        steps.push(StepRecord {
            step: n,
            action: step.label(),
            events: drain(&mut rx),
        });
    }

    Ok(SessionReport {
        session_id: player.session_id().to_string(),
        core: player.core_name(),
        state: player.state().to_string(),
        ready: player.ready(),
        quality_id: player.current_quality_id(),
        next_quality_id: player.next_quality_id(),
        selected_quality_id: player.selected_quality_id(),
        auto_quality: player.auto_quality(),
        bandwidth_estimate: player.bandwidth_estimate(),
        play_list: player.play_list().iter().map(quality::encode).collect(),
        steps,
    })
}
