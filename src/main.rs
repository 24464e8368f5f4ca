//! Pose telemetry server: camera -> pose model -> kinematics -> WebSocket.
//!
//! Usage: `posecast [config.toml]` (default `posecast.toml`, defaults if absent).
//! Console keys: `0`-`4` filter mode, `q` quit.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;

use posecast::camera::{FrameSource, OpenCvCamera};
use posecast::config::Config;
use posecast::control::ControlChannel;
use posecast::hub::BroadcastHub;
use posecast::orchestrator::Orchestrator;
use posecast::pose::OnnxPoseDetector;
use posecast::preprocess::{FilterMode, Preprocessor};
use posecast::{logging, server};

const CONFIG_PATH: &str = "posecast.toml";
const CLOSE_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| CONFIG_PATH.to_string());
    let config = Config::load_or_default(&config_path)?;
    logging::init(&config.logging)?;

    tracing::info!("posecast ({})", env!("GIT_VERSION"));
    tracing::info!("Config: {}", config_path);
    tracing::info!("Listen: {}", config.server.listen_addr);
    tracing::info!("Stages: {:?} (analyze_filtered={})", config.pipeline.stages, config.pipeline.analyze_filtered);
    let keys: Vec<String> = FilterMode::ALL
        .iter()
        .enumerate()
        .map(|(i, m)| format!("{i}={}", m.label()))
        .collect();
    tracing::info!("Keys: {}  q=quit (press Enter to submit)", keys.join(" "));

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&shutdown))
        .context("failed to register SIGINT handler")?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&shutdown))
        .context("failed to register SIGTERM handler")?;

    let camera = OpenCvCamera::open(&config.camera)?;
    let (width, height) = camera.resolution();
    tracing::info!("Camera {}: {}x{} (mirror={})", config.camera.index, width, height, config.camera.mirror);

    let detector = OnnxPoseDetector::new(&config.model)?;

    let cancel = CancellationToken::new();
    let hub = BroadcastHub::from_config(&config.server, cancel.clone());
    let listener = server::bind(&config.server.listen_addr).await?;
    let server_task = tokio::spawn(server::serve(listener, hub.clone(), cancel.clone()));

    let preprocessor = Preprocessor::from_config(&config.pipeline, &config.color);
    let orchestrator = Orchestrator::new(
        camera,
        detector,
        preprocessor,
        hub.clone(),
        ControlChannel::stdin(),
        shutdown,
    )
    .configure(&config);

    tokio::task::block_in_place(|| orchestrator.run());

    cancel.cancel();
    match server_task.await {
        Ok(Err(e)) => tracing::warn!("server error: {:#}", e),
        Err(e) => tracing::warn!("server task failed: {}", e),
        Ok(Ok(())) => {}
    }
    if tokio::time::timeout(CLOSE_GRACE, hub.wait_closed()).await.is_err() {
        tracing::warn!("some clients did not close within {:?}", CLOSE_GRACE);
    }
    tracing::info!("bye");
    Ok(())
}
