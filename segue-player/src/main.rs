//! segue - gapless command-line audio player
//!
//! Plays a list of local files and stream URLs in order, staging each
//! following local track for gapless handoff. Progress and state changes
//! are logged; Ctrl-C stops playback cleanly.

use anyhow::{bail, Context, Result};
use clap::Parser;
use segue_common::{EventBus, PlayerEvent, Tuning};
use segue_player::{cpal_sink_factory, Config, CpalSink, PlaybackEngine, TrackDecoder};
use std::path::PathBuf;
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "segue")]
#[command(about = "Gapless audio player")]
#[command(version)]
struct Args {
    /// Files or http(s) stream URLs to play, in order
    tracks: Vec<String>,

    /// Configuration file (TOML)
    #[arg(short, long, env = "SEGUE_CONFIG")]
    config: Option<PathBuf>,

    /// Output device name (overrides config)
    #[arg(short, long)]
    device: Option<String>,

    /// Volume 0.0-1.0 (overrides config)
    #[arg(long)]
    volume: Option<f32>,

    /// List available output devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load_or_default(args.config.as_deref())
        .context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("segue={}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if args.list_devices {
        for name in CpalSink::list_devices().context("device enumeration failed")? {
            println!("{name}");
        }
        return Ok(());
    }

    if args.tracks.is_empty() {
        bail!("no tracks given (try --help)");
    }

    let device = args.device.or(config.audio.device.clone());
    let volume = args.volume.unwrap_or(config.audio.volume);
    let tuning = config.tuning();

    let events = EventBus::default();
    let volume_cell = std::sync::Arc::new(std::sync::Mutex::new(volume.clamp(0.0, 1.0)));
    let mut engine = PlaybackEngine::start(
        cpal_sink_factory(device, std::sync::Arc::clone(&volume_cell)),
        events.clone(),
        tuning.clone(),
        volume_cell,
    );

    let mut rx = events.subscribe();
    let tracks = args.tracks;
    let mut index = 0usize;

    info!("playing {} track(s)", tracks.len());
    if !play_track(&engine, &tracks[index], &events, &tuning)? {
        bail!("could not start {}", tracks[index]);
    }
    let mut staged = stage_following(&engine, &events, &tuning, tracks.get(index + 1));

    let exit_err: Option<String> = loop {
        tokio::select! {
            event = rx.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("event stream lagged by {n}");
                        continue;
                    }
                    Err(_) => break Some("engine event stream closed".into()),
                };
                match event {
                    PlayerEvent::Completion { track_id, .. } => {
                        debug!("completion for {track_id}");
                        index += 1;
                        if index >= tracks.len() {
                            info!("playlist finished");
                            break None;
                        }
                        // With a staged handoff the engine is already
                        // playing the next track; otherwise start it cold.
                        if staged.is_none()
                            && !play_track(&engine, &tracks[index], &events, &tuning)?
                        {
                            break Some(format!("could not start {}", tracks[index]));
                        }
                        staged = stage_following(&engine, &events, &tuning, tracks.get(index + 1));
                    }
                    PlayerEvent::Error { kind, message, .. } => {
                        error!("playback error ({kind:?}): {message}");
                        break Some(message);
                    }
                    PlayerEvent::Progress { position_ms, duration_ms, .. } => {
                        match duration_ms {
                            Some(total) => info!(
                                "{} / {}",
                                format_ms(position_ms),
                                format_ms(total)
                            ),
                            None => info!("{} (live)", format_ms(position_ms)),
                        }
                    }
                    PlayerEvent::BufferingStart { .. } => info!("buffering..."),
                    PlayerEvent::BufferingEnd { .. } => info!("buffering done"),
                    PlayerEvent::MetadataUpdate { sample_rate, channels, duration_ms, .. } => {
                        info!(
                            "track: {sample_rate} Hz, {channels} ch, {}",
                            duration_ms
                                .map(format_ms)
                                .unwrap_or_else(|| "unknown length".into())
                        );
                    }
                    other => debug!("event: {other:?}"),
                }
            }
            _ = signal::ctrl_c() => {
                info!("interrupted, stopping");
                engine.reset();
                break None;
            }
        }
    };

    engine.shutdown();
    if let Some(message) = exit_err {
        bail!(message);
    }
    Ok(())
}

/// Prepare and play one track. Network URLs prepare asynchronously; the
/// engine waits out the prepare when it adopts the decoder.
fn play_track(
    engine: &PlaybackEngine,
    source: &str,
    events: &EventBus,
    tuning: &Tuning,
) -> Result<bool> {
    info!("starting: {source}");
    let mut decoder = TrackDecoder::new(events.clone(), engine.generation(), tuning.clone());
    decoder
        .attach_source(source)
        .with_context(|| format!("cannot open {source}"))?;
    if decoder.is_network() {
        decoder.prepare_async().context("stream prepare failed")?;
    } else {
        decoder
            .prepare()
            .with_context(|| format!("cannot prepare {source}"))?;
    }
    Ok(engine.play(decoder))
}

/// Stage the following track for gapless handoff, when eligible.
///
/// Streams and rate-mismatched tracks are rejected by the engine; that is
/// expected, and the track will be started normally at the boundary.
fn stage_following(
    engine: &PlaybackEngine,
    events: &EventBus,
    tuning: &Tuning,
    source: Option<&String>,
) -> Option<Uuid> {
    let source = source?;
    let mut decoder = TrackDecoder::new(events.clone(), engine.generation(), tuning.clone());
    if let Err(e) = decoder.attach_source(source) {
        warn!("cannot stage {source}: {e}");
        return None;
    }
    if decoder.is_network() {
        debug!("{source} is a stream, not eligible for gapless staging");
        return None;
    }
    if let Err(e) = decoder.prepare() {
        warn!("cannot stage {source}: {e}");
        return None;
    }

    let id = decoder.id();
    if engine.set_next(Some(decoder)) {
        debug!("staged {source} for gapless handoff");
        Some(id)
    } else {
        debug!("{source} not eligible for gapless handoff, will start normally");
        None
    }
}

fn format_ms(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}
