use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::preprocess::color::{default_palette, ColorRange};
use crate::preprocess::{FilterMode, StageKind};

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub color: ColorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// WebSocket listen address. Binds all interfaces by default.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Upper bound for a single send to one subscriber
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Per-subscriber queue depth; the oldest message is dropped when full
    #[serde(default = "default_client_queue_capacity")]
    pub client_queue_capacity: usize,
}

fn default_listen_addr() -> String { "0.0.0.0:8765".to_string() }
fn default_send_timeout_ms() -> u64 { 250 }
fn default_client_queue_capacity() -> usize { 8 }

impl ServerConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            send_timeout_ms: default_send_timeout_ms(),
            client_queue_capacity: default_client_queue_capacity(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraConfig {
    #[serde(default)]
    pub index: i32,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub fps: Option<u32>,
    /// Flip frames horizontally (selfie view)
    #[serde(default = "default_mirror")]
    pub mirror: bool,
    /// Sleep after a failed read before trying again
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_mirror() -> bool { true }
fn default_retry_backoff_ms() -> u64 { 500 }

impl CameraConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: None,
            height: None,
            fps: None,
            mirror: default_mirror(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default = "default_model_path")]
    pub path: String,
    /// Square input resolution expected by the landmark model
    #[serde(default = "default_input_size")]
    pub input_size: u32,
    #[serde(default = "default_input_name")]
    pub input_name: String,
    #[serde(default = "default_landmarks_output")]
    pub landmarks_output: String,
    #[serde(default = "default_presence_output")]
    pub presence_output: String,
    /// Pose presence score below this counts as no detection
    #[serde(default = "default_min_detection_confidence")]
    pub min_detection_confidence: f32,
}

fn default_model_path() -> String { "models/pose_landmark_full.onnx".to_string() }
fn default_input_size() -> u32 { 256 }
fn default_input_name() -> String { "input_1".to_string() }
fn default_landmarks_output() -> String { "Identity".to_string() }
fn default_presence_output() -> String { "Identity_1".to_string() }
fn default_min_detection_confidence() -> f32 { 0.5 }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            path: default_model_path(),
            input_size: default_input_size(),
            input_name: default_input_name(),
            landmarks_output: default_landmarks_output(),
            presence_output: default_presence_output(),
            min_detection_confidence: default_min_detection_confidence(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Active preprocessing stages, run in this order
    #[serde(default = "default_stages")]
    pub stages: Vec<StageKind>,
    #[serde(default)]
    pub initial_filter: FilterMode,
    /// Feed the filtered frame (instead of the raw capture) to color
    /// detection and pose estimation
    #[serde(default)]
    pub analyze_filtered: bool,
}

fn default_stages() -> Vec<StageKind> { vec![StageKind::Filter, StageKind::Color] }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stages: default_stages(),
            initial_filter: FilterMode::default(),
            analyze_filtered: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ColorConfig {
    /// Evaluated in order; the first range with a large enough region wins
    #[serde(default = "default_palette")]
    pub palette: Vec<ColorRange>,
    /// Region area (px) that must be exceeded to count as a detection
    #[serde(default = "default_min_area")]
    pub min_area: u32,
    /// Side of the square structuring element used for open/close
    #[serde(default = "default_kernel_size")]
    pub kernel_size: usize,
}

fn default_min_area() -> u32 { 1000 }
fn default_kernel_size() -> usize { 5 }

impl Default for ColorConfig {
    fn default() -> Self {
        Self {
            palette: default_palette(),
            min_area: default_min_area(),
            kernel_size: default_kernel_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    /// Used when RUST_LOG is not set
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_dir() -> String { "logs".to_string() }
fn default_log_filter() -> String { "info".to_string() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            filter: default_log_filter(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Missing file falls back to defaults; a present but malformed file is an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}
