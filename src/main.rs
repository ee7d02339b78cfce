use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use rust_artrack::backend::{AlvarBackend, ArTagBackend, BackendKind, FeatureBackend, TrackerBackend};
use rust_artrack::config::SessionConfig;
use rust_artrack::geometry::Pose;
use rust_artrack::io::{BlankVideo, ReplayLibrary};
use rust_artrack::system::TrackingSystem;
use rust_artrack::tracking::frame::VideoSource;
use rust_artrack::tracking::{FrameProcessingPipeline, PoseSink};

/// Replay recorded marker detections through the tracking pipeline.
#[derive(Parser, Debug)]
#[command(name = "rust-artrack", version, about)]
struct Cli {
    /// Session file (backend, pipeline and markers)
    #[arg(long)]
    session: PathBuf,

    /// Recorded detections (CSV)
    #[arg(long)]
    detections: PathBuf,

    /// Run the pipeline on a tracking thread and read the latest-pose slot
    #[arg(long)]
    threaded: bool,
}

/// Logs every published pose.
struct LogSink;

impl PoseSink for LogSink {
    fn publish(&mut self, name: &str, pose: &Pose) {
        let t = pose.translation();
        let angles = pose.euler_angles();
        info!(
            marker = name,
            x = t.x,
            y = t.y,
            z = t.z,
            pitch = angles.pitch.to_degrees(),
            yaw = angles.yaw.to_degrees(),
            roll = angles.roll.to_degrees(),
            "pose"
        );
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let session = SessionConfig::load(&cli.session)?;
    let library = ReplayLibrary::from_csv(&cli.detections)?;

    let (width, height) = session.backend.dimensions();
    let video = BlankVideo::new(
        width,
        height,
        session.backend.camera().color_format,
        library.frame_count(),
    );
    info!(
        backend = ?session.backend.kind(),
        frames = library.frame_count(),
        markers = session.markers.len(),
        "starting replay"
    );

    match session.backend.kind() {
        BackendKind::ArTag => replay(ArTagBackend::new(library), &session, video, cli.threaded),
        BackendKind::Alvar => replay(AlvarBackend::new(library), &session, video, cli.threaded),
        BackendKind::AlvarFeature => {
            replay(FeatureBackend::new(library), &session, video, cli.threaded)
        }
    }
}

fn replay<B>(backend: B, session: &SessionConfig, mut video: BlankVideo, threaded: bool) -> Result<()>
where
    B: TrackerBackend + Send + 'static,
{
    let mut pipeline = FrameProcessingPipeline::new(backend, session.pipeline.clone())?;
    pipeline
        .configure(session.backend.clone())
        .context("Failed to configure backend")?;
    for marker in &session.markers {
        pipeline
            .register(marker.name.clone(), marker.spec.clone(), marker.smooth)
            .with_context(|| format!("Failed to register marker '{}'", marker.name))?;
    }

    if !threaded {
        let stats = pipeline.run(&mut video, &mut LogSink)?;
        info!(
            ticks = stats.ticks,
            dropped = stats.dropped_ticks,
            published = stats.published,
            "replay finished"
        );
        return Ok(());
    }

    let mut system = TrackingSystem::spawn(pipeline);
    let latest = system.latest();
    while let Some(frame) = video.next_frame() {
        system.submit(frame)?;
    }
    let stats = system.shutdown();

    let snapshot = latest.snapshot();
    let mut names: Vec<_> = snapshot.poses.keys().cloned().collect();
    names.sort();
    for name in names {
        LogSink.publish(&name, &snapshot.poses[&name]);
    }
    if let Some(stats) = stats {
        info!(
            ticks = stats.ticks,
            dropped = stats.dropped_ticks,
            sequence = snapshot.sequence,
            "threaded replay finished"
        );
    }
    Ok(())
}
