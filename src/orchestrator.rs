//! Main producer loop: capture -> preprocess -> pose -> kinematics -> fan-out.
//!
//! Runs synchronously on one thread (under `block_in_place` in the server
//! binary). The active filter mode is a plain field: it is read once per
//! frame and control commands are applied only between frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::camera::{Frame, FrameSource};
use crate::config::Config;
use crate::control::{ControlChannel, ControlCommand};
use crate::hub::BroadcastHub;
use crate::kinematics;
use crate::pose::PoseEstimator;
use crate::preprocess::{ColorDetection, FilterMode, Preprocessor};
use crate::protocol::PoseTelemetry;

/// What happened during one iteration
#[derive(Debug)]
pub enum Tick {
    /// No frame this iteration; the loop backed off
    Unavailable,
    Processed(TickReport),
}

#[derive(Debug)]
pub struct TickReport {
    /// Filter mode used for this frame
    pub mode: FilterMode,
    pub filtered: bool,
    pub color: Option<ColorDetection>,
    /// None when no person was detected
    pub telemetry: Option<PoseTelemetry>,
    /// Clients the telemetry was queued for
    pub recipients: usize,
}

#[derive(Debug, Default)]
struct LoopStats {
    frames: u32,
    tracked: u32,
    unavailable: u32,
    /// Sum of per-frame mean landmark confidence over tracked frames
    confidence: f64,
}

impl LoopStats {
    fn mean_confidence(&self) -> f64 {
        if self.tracked > 0 {
            self.confidence / self.tracked as f64
        } else {
            0.0
        }
    }
}

pub struct Orchestrator<S: FrameSource, E: PoseEstimator> {
    source: S,
    estimator: E,
    preprocessor: Preprocessor,
    hub: BroadcastHub,
    controls: ControlChannel,
    shutdown: Arc<AtomicBool>,
    mode: FilterMode,
    mirror: bool,
    retry_backoff: Duration,
    stats: LoopStats,
    stats_timer: Instant,
}

impl<S: FrameSource, E: PoseEstimator> Orchestrator<S, E> {
    pub fn new(
        source: S,
        estimator: E,
        preprocessor: Preprocessor,
        hub: BroadcastHub,
        controls: ControlChannel,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        Self {
            source,
            estimator,
            preprocessor,
            hub,
            controls,
            shutdown,
            mode: FilterMode::Normal,
            mirror: false,
            retry_backoff: Duration::from_millis(500),
            stats: LoopStats::default(),
            stats_timer: Instant::now(),
        }
    }

    /// Apply mode, mirroring and backoff settings from the config file.
    pub fn configure(self, config: &Config) -> Self {
        self.with_initial_mode(config.pipeline.initial_filter)
            .with_mirror(config.camera.mirror)
            .with_retry_backoff(config.camera.retry_backoff())
    }

    pub fn with_initial_mode(mut self, mode: FilterMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn mode(&self) -> FilterMode {
        self.mode
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    /// Process at most one frame with the current mode.
    pub fn tick(&mut self) -> Tick {
        let mut frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(e) => {
                self.stats.unavailable += 1;
                tracing::warn!("frame unavailable: {:#}, retrying in {:?}", e, self.retry_backoff);
                std::thread::sleep(self.retry_backoff);
                return Tick::Unavailable;
            }
        };
        self.stats.frames += 1;

        if self.mirror {
            frame.mirror();
        }

        let mode = self.mode;
        let out = self.preprocessor.run(frame, mode);
        let detected_color = out.color.as_ref().map(|c| c.label.as_str());
        let telemetry = self.track(&out.analysis, detected_color);

        let mut recipients = 0;
        if let Some(t) = &telemetry {
            self.stats.tracked += 1;
            match self.hub.broadcast(t) {
                Ok(n) => recipients = n,
                Err(e) => tracing::warn!("broadcast failed: {:#}", e),
            }
        }

        Tick::Processed(TickReport {
            mode,
            filtered: out.filtered,
            color: out.color,
            telemetry,
            recipients,
        })
    }

    fn track(&mut self, frame: &Frame, detected_color: Option<&str>) -> Option<PoseTelemetry> {
        let landmarks = match self.estimator.estimate(frame) {
            Ok(Some(landmarks)) => landmarks,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!("pose estimation failed: {:#}", e);
                return None;
            }
        };
        self.stats.confidence += landmarks.average_confidence() as f64;
        let (width, height) = frame.dimensions();
        Some(kinematics::extract(&landmarks, width, height, frame.timestamp, detected_color))
    }

    /// Apply every pending control command. Returns false once shutdown was
    /// requested.
    pub fn apply_controls(&mut self) -> bool {
        for command in self.controls.poll() {
            match command {
                ControlCommand::SetFilter(mode) => {
                    if mode != self.mode {
                        tracing::info!("filter mode: {} -> {}", self.mode.label(), mode.label());
                    }
                    self.mode = mode;
                }
                ControlCommand::Quit => {
                    tracing::info!("quit requested");
                    self.shutdown.store(true, Ordering::Relaxed);
                }
            }
        }
        !self.is_shutdown()
    }

    /// One full iteration: a tick, then pending controls.
    pub fn step(&mut self) -> Tick {
        let tick = self.tick();
        self.apply_controls();
        self.maybe_log_stats();
        tick
    }

    fn maybe_log_stats(&mut self) {
        let elapsed = self.stats_timer.elapsed();
        if elapsed < Duration::from_secs(1) {
            return;
        }
        let secs = elapsed.as_secs_f64();
        let hub = self.hub.stats();
        let tracked_ratio = if self.stats.frames > 0 {
            self.stats.tracked as f64 / self.stats.frames as f64
        } else {
            0.0
        };
        tracing::info!(
            "fps={:.1} tracked={:.0}% conf={:.2} unavailable={} mode={} clients={} sent={} dropped={} pruned={}",
            self.stats.frames as f64 / secs,
            tracked_ratio * 100.0,
            self.stats.mean_confidence(),
            self.stats.unavailable,
            self.mode.label(),
            self.hub.client_count(),
            hub.broadcasts,
            hub.dropped,
            hub.pruned,
        );
        self.stats = LoopStats::default();
        self.stats_timer = Instant::now();
    }

    /// Loop until shutdown, then close every client and release the source.
    pub fn run(mut self) {
        tracing::info!(
            "pipeline running: mode={} stages={:?} mirror={}",
            self.mode.label(),
            self.preprocessor.stages(),
            self.mirror
        );
        while !self.is_shutdown() {
            self.step();
        }
        tracing::info!("shutting down pipeline");
        self.hub.close_all();
        drop(self.source);
    }
}
