//! Integration tests for Strata Core

use std::sync::Arc;

use strata_core::{
    backend::{HlsLevel, TrackKind, VariantTrack},
    events::drain,
    quality,
    sim::{SimEnvironment, SimSurface},
    Capabilities, DefaultSourcePolicy, EngineState, Error, MediaKind, Player, PlayerConfig,
    PlayerEvent, QualityLevel, Source, SourceKind, SourcePolicy, AUTO_QUALITY_ID,
};
use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};

fn hls_levels() -> Vec<HlsLevel> {
    [(400_000, 640, 360), (1_500_000, 1280, 720), (4_000_000, 1920, 1080)]
        .into_iter()
        .map(|(bitrate, width, height)| HlsLevel {
            bitrate,
            width,
            height,
            video_codec: Some("avc1.64001f".to_string()),
            frame_rate: Some(30.0),
        })
        .collect()
}

fn dash_track(id: u64, bandwidth: u64, height: u32) -> VariantTrack {
    VariantTrack {
        id,
        kind: TrackKind::Variant,
        bandwidth,
        width: Some(height * 16 / 9),
        height: Some(height),
        frame_rate: Some("30000/1001".to_string()),
        video_id: Some(id + 100),
        audio_id: Some(1),
        video_codec: Some("avc1.64001f".to_string()),
        active: false,
    }
}

fn dash_tracks() -> Vec<VariantTrack> {
    vec![
        dash_track(1, 400_000, 360),
        dash_track(2, 1_000_000, 540),
        dash_track(3, 2_500_000, 720),
    ]
}

fn progressive_sources() -> Vec<Source> {
    vec![
        Source::new("https://cdn.example.com/720.mp4").with_rendition(2_400_000, 1280, 720),
        Source::new("https://cdn.example.com/360.mp4").with_rendition(600_000, 640, 360),
        Source::new("https://cdn.example.com/540.mp4").with_rendition(1_200_000, 960, 540),
    ]
}

fn player(env: &SimEnvironment, capabilities: Capabilities) -> Player {
    Player::new(PlayerConfig::default(), capabilities, Arc::new(env.factory())).unwrap()
}

/// Only the switch-related events, in order
fn switch_events(rx: &mut broadcast::Receiver<PlayerEvent>) -> Vec<PlayerEvent> {
    drain(rx)
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                PlayerEvent::QualitySwitchStart { .. }
                    | PlayerEvent::QualityChanged { .. }
                    | PlayerEvent::QualitySwitchEnd { .. }
            )
        })
        .collect()
}

// =============================================================================
// Quality ID Tests
// =============================================================================

#[test]
fn test_quality_id_wire_format() {
    let level = QualityLevel::new(2_000_000, 1920, 1080)
        .with_kind(MediaKind::Video)
        .with_fps(30);
    assert_eq!(quality::encode(&level), "br2000000-1920x1080-video-30");
    assert_eq!(quality::decode("br2000000-1920x1080-video-30"), Some(level));
    assert_eq!(quality::decode(AUTO_QUALITY_ID), None);
}

#[test]
fn test_quality_id_matches_across_backends() {
    // A preference saved from a backend without kind or fps still matches
    let saved = quality::decode("br1500000-1280x720").unwrap();
    let offered = QualityLevel::new(1_500_000, 1280, 720)
        .with_kind(MediaKind::Video)
        .with_fps(30);
    assert!(quality::is_same_level(Some(&saved), Some(&offered)));
}

// =============================================================================
// Source Policy Tests
// =============================================================================

#[test]
fn test_policy_by_environment() {
    let sources = vec![
        Source::new("https://cdn.example.com/master.m3u8"),
        Source::new("https://cdn.example.com/manifest.mpd"),
        Source::new("https://cdn.example.com/360.mp4").with_rendition(600_000, 640, 360),
    ];

    let desktop = DefaultSourcePolicy.select(&sources, &Capabilities::desktop());
    assert_eq!(desktop.map(|selected| selected.kind), Some(SourceKind::Dash));

    let iphone = Capabilities::from_user_agent(
        "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 \
         (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
        false,
    );
    let mobile = DefaultSourcePolicy.select(&sources, &iphone);
    assert_eq!(mobile.map(|selected| selected.kind), Some(SourceKind::Hls));

    let bare = DefaultSourcePolicy.select(&sources, &Capabilities::default());
    assert_eq!(
        bare.map(|selected| selected.kind),
        Some(SourceKind::Progressive)
    );
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[test]
fn test_config_from_json() {
    let config = assert_ok!(PlayerConfig::from_json_str(
        r#"{ "fast_switch": false, "initial_bitrate": 1000000 }"#
    ));
    assert!(!config.fast_switch);
    assert_eq!(config.initial_bitrate, Some(1_000_000));
    assert_eq!(config.event_capacity, 64);

    let invalid = PlayerConfig::from_json_str(r#"{ "dash_buffering_goal": -1.0 }"#);
    assert!(matches!(assert_err!(invalid), Error::InvalidConfig(_)));
}

// =============================================================================
// HLS Session Tests
// =============================================================================

#[tokio::test]
async fn test_hls_manual_switch_event_order() {
    let env = SimEnvironment::new(SimSurface::new()).with_hls_levels(hls_levels());
    let mut player = player(&env, Capabilities::desktop());
    let mut rx = player.subscribe();

    assert!(player.set_source(vec![Source::new("https://cdn.example.com/master.m3u8")]));
    player.settle().await;
    let engine = env.latest_hls().unwrap();
    engine.parse_manifest();
    player.pump();
    assert!(player.ready());
    assert_eq!(player.state(), EngineState::Ready);
    drain(&mut rx);

    player.request_quality_by_index(2);
    player.pump();
    assert!(engine.complete_switch());
    player.pump();

    let target = player.play_list()[2];
    assert_eq!(
        switch_events(&mut rx),
        vec![
            PlayerEvent::QualitySwitchStart { level: target },
            PlayerEvent::QualityChanged { level: target },
            PlayerEvent::QualitySwitchEnd { level: target },
        ]
    );
    assert_eq!(player.current_quality_id(), quality::encode(&target));
    assert!(!player.auto_quality());
}

#[tokio::test]
async fn test_hls_abr_adaptation_reports_quality_only() {
    let env = SimEnvironment::new(SimSurface::new()).with_hls_levels(hls_levels());
    let mut player = player(&env, Capabilities::desktop());
    let mut rx = player.subscribe();

    player.set_source(vec![Source::new("https://cdn.example.com/master.m3u8")]);
    player.settle().await;
    let engine = env.latest_hls().unwrap();
    engine.parse_manifest();
    player.pump();
    drain(&mut rx);

    assert!(engine.adapt_to(1));
    player.pump();
    assert_eq!(
        switch_events(&mut rx),
        vec![PlayerEvent::QualityChanged {
            level: player.play_list()[1]
        }]
    );
    assert!(player.auto_quality());
}

#[tokio::test]
async fn test_hls_back_to_auto_reannounces_quality() {
    let env = SimEnvironment::new(SimSurface::new()).with_hls_levels(hls_levels());
    let mut player = player(&env, Capabilities::desktop());
    let mut rx = player.subscribe();

    player.set_source(vec![Source::new("https://cdn.example.com/master.m3u8")]);
    player.settle().await;
    let engine = env.latest_hls().unwrap();
    engine.parse_manifest();
    player.pump();

    player.request_quality_by_index(1);
    player.pump();
    engine.complete_switch();
    player.pump();
    drain(&mut rx);

    player.request_quality_by_id(AUTO_QUALITY_ID);
    player.pump();
    let events = drain(&mut rx);
    assert!(events.contains(&PlayerEvent::AutoChanged { auto: true }));
    assert!(events.contains(&PlayerEvent::QualityChanged {
        level: player.play_list()[1]
    }));
    assert!(events.contains(&PlayerEvent::QualityIdSelected {
        id: AUTO_QUALITY_ID.to_string()
    }));
}

#[tokio::test]
async fn test_hls_preference_resolved_when_levels_arrive() {
    let env = SimEnvironment::new(SimSurface::new()).with_hls_levels(hls_levels());
    let mut player = player(&env, Capabilities::desktop());

    player.set_source(vec![Source::new("https://cdn.example.com/master.m3u8")]);
    player.settle().await;
    player.request_quality_by_id("br1500000-1280x720-video-30");
    let engine = env.latest_hls().unwrap();
    assert!(engine.state().switch_calls.is_empty());

    engine.parse_manifest();
    player.pump();
    assert_eq!(
        engine.state().switch_calls,
        vec![(strata_core::sim::SwitchMode::Start, Some(1))]
    );

    // A later playlist refresh must not re-apply the selection
    engine.update_levels(hls_levels()[..2].to_vec());
    player.pump();
    assert_eq!(engine.state().switch_calls.len(), 1);
}

#[tokio::test]
async fn test_hls_engine_error_is_relayed() {
    let env = SimEnvironment::new(SimSurface::new()).with_hls_levels(hls_levels());
    let mut player = player(&env, Capabilities::desktop());
    let mut rx = player.subscribe();

    player.set_source(vec![Source::new("https://cdn.example.com/master.m3u8")]);
    player.settle().await;
    env.latest_hls().unwrap().fail("fragment load timeout", false);
    player.pump();

    assert_eq!(
        drain(&mut rx),
        vec![PlayerEvent::Error {
            code: "BACKEND".to_string(),
            message: "Backend error: fragment load timeout".to_string(),
            fatal: false,
        }]
    );
}

#[tokio::test]
async fn test_native_hls_exposes_no_levels() {
    let surface = SimSurface::new().with_playable(&["application/vnd.apple.mpegURL"]);
    let env = SimEnvironment::new(surface).with_hls_levels(hls_levels());
    let safari = Capabilities {
        native_hls: true,
        safari: true,
        ..Default::default()
    };
    let mut player = player(&env, safari);
    let mut rx = player.subscribe();

    player.set_source(vec![
        Source::new("https://cdn.example.com/master.m3u8").with_mime("application/vnd.apple.mpegURL"),
    ]);
    player.settle().await;

    assert_eq!(player.core_name().as_deref(), Some("HLS (native)"));
    assert!(env.hls_engines().is_empty());
    assert!(player.ready());
    assert!(player.play_list().is_empty());
    assert!(player.auto_quality());

    let events = drain(&mut rx);
    assert_eq!(
        events.first(),
        Some(&PlayerEvent::PlayListChanged { levels: vec![] })
    );
    assert_eq!(events.last(), Some(&PlayerEvent::Ready));
    assert_eq!(
        env.surface().state().src.as_deref(),
        Some("https://cdn.example.com/master.m3u8")
    );
}

// =============================================================================
// DASH Session Tests
// =============================================================================

#[tokio::test]
async fn test_dash_manual_switch_commits_on_frame_size() {
    let env = SimEnvironment::new(SimSurface::new()).with_dash_tracks(dash_tracks());
    let mut player = player(&env, Capabilities::desktop());
    let mut rx = player.subscribe();

    player.set_source(vec![Source::new("https://cdn.example.com/manifest.mpd")]);
    player.settle().await;
    let engine = env.latest_dash().unwrap();
    assert_eq!(engine.state().buffering_goal, Some(15.0));

    engine.load_manifest();
    player.pump();
    assert!(player.ready());
    assert_eq!(player.play_list().len(), 3);
    assert_eq!(player.bandwidth_estimate(), Some(5_000_000));

    env.surface().start_playback();
    env.surface().set_video_size(640, 360);
    player.pump();
    drain(&mut rx);

    player.request_quality_by_index(2);
    player.pump();
    assert_eq!(engine.state().selections.last(), Some(&(3, true, 5.0)));
    assert!(!engine.state().abr);

    let target = player.play_list()[2];
    assert_eq!(
        switch_events(&mut rx),
        vec![PlayerEvent::QualitySwitchStart { level: target }]
    );

    env.surface().set_video_size(1280, 720);
    player.pump();
    assert_eq!(
        switch_events(&mut rx),
        vec![
            PlayerEvent::QualityChanged { level: target },
            PlayerEvent::QualitySwitchEnd { level: target },
        ]
    );
}

#[tokio::test]
async fn test_dash_initial_bitrate_and_cap() {
    let env = SimEnvironment::new(SimSurface::new()).with_dash_tracks(dash_tracks());
    let config = PlayerConfig {
        initial_bitrate: Some(1_200_000),
        cap_level_to_player_size: true,
        ..Default::default()
    };
    let mut player = Player::new(config, Capabilities::desktop(), Arc::new(env.factory())).unwrap();

    player.set_source(vec![Source::new("https://cdn.example.com/manifest.mpd")]);
    player.settle().await;
    let engine = env.latest_dash().unwrap();
    assert_eq!(engine.state().default_estimate, Some(1_200_000));
    assert_eq!(engine.state().max_resolution, Some((1280, 720)));

    engine.load_manifest();
    player.pump();
    assert_eq!(engine.state().selections.first(), Some(&(2, true, 0.0)));

    env.surface().set_device_pixel_ratio(2.0);
    player.pump();
    assert_eq!(engine.state().max_resolution, Some((2560, 1440)));
}

// =============================================================================
// Progressive Session Tests
// =============================================================================

#[tokio::test]
async fn test_progressive_swap_keeps_position() {
    let env = SimEnvironment::new(SimSurface::new());
    let mut player = player(&env, Capabilities::default());
    let mut rx = player.subscribe();

    player.set_source(progressive_sources());
    player.settle().await;
    assert_eq!(player.core_name().as_deref(), Some("Progressive"));
    assert!(player.ready());
    assert!(!player.supports_auto_quality());
    assert_eq!(
        env.surface().state().src.as_deref(),
        Some("https://cdn.example.com/360.mp4")
    );

    env.surface().finish_load(640, 360);
    player.pump();
    {
        let mut surface = env.surface().state();
        surface.current_time = 31.0;
        surface.paused = false;
    }
    drain(&mut rx);

    player.request_quality_by_index(2);
    player.pump();
    assert_eq!(
        env.surface().state().src.as_deref(),
        Some("https://cdn.example.com/720.mp4")
    );

    env.surface().finish_load(1280, 720);
    player.pump();

    let target = player.play_list()[2];
    assert_eq!(
        switch_events(&mut rx),
        vec![
            PlayerEvent::QualitySwitchStart { level: target },
            PlayerEvent::QualityChanged { level: target },
            PlayerEvent::QualitySwitchEnd { level: target },
        ]
    );
    let surface = env.surface().state();
    assert_eq!(surface.current_time, 31.0);
    assert!(!surface.paused);
}

#[tokio::test]
async fn test_progressive_ignores_auto_requests() {
    let env = SimEnvironment::new(SimSurface::new());
    let mut player = player(&env, Capabilities::default());

    player.request_quality_by_id("br1200000-960x540");
    player.set_source(progressive_sources());
    player.settle().await;
    assert_eq!(
        env.surface().state().src.as_deref(),
        Some("https://cdn.example.com/540.mp4")
    );
    assert_eq!(player.selected_quality_id(), "br1200000-960x540-video");

    player.request_quality_by_index(-1);
    assert!(!player.auto_quality());
    assert_eq!(player.selected_quality_id(), "br1200000-960x540-video");
}

// =============================================================================
// Source Swap Tests
// =============================================================================

#[tokio::test]
async fn test_source_swap_tears_down_previous_engine() {
    let env = SimEnvironment::new(SimSurface::new())
        .with_hls_levels(hls_levels())
        .with_dash_tracks(dash_tracks());
    let mut player = player(&env, Capabilities::desktop());

    player.set_source(vec![Source::new("https://cdn.example.com/manifest.mpd")]);
    player.settle().await;
    let dash = env.latest_dash().unwrap();
    dash.load_manifest();
    player.pump();
    assert!(player.ready());

    player.set_source(vec![Source::new("https://cdn.example.com/master.m3u8")]);
    assert!(dash.state().destroyed);
    assert_eq!(player.state(), EngineState::Uninitialized);

    player.settle().await;
    assert_eq!(player.generation(), 2);
    assert!(player.core_name().unwrap().starts_with("HLS"));
    assert!(!player.ready());
}

#[test]
fn test_rapid_source_changes_keep_only_last() {
    tokio_test::block_on(async {
        let env = SimEnvironment::new(SimSurface::new()).with_hls_levels(hls_levels());
        let mut player = player(&env, Capabilities::desktop());
        let mut rx = player.subscribe();

        for n in 0..5 {
            player.set_source(vec![Source::new(format!("https://cdn.example.com/{n}.m3u8"))]);
        }
        player.settle().await;

        assert_eq!(player.generation(), 5);
        assert_eq!(env.hls_engines().len(), 1);
        assert_eq!(
            env.latest_hls().unwrap().state().loaded_src.as_deref(),
            Some("https://cdn.example.com/4.m3u8")
        );
        assert!(drain(&mut rx).is_empty());
    });
}
