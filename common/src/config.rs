use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Pick from the locator: `http(s)://` is MJPEG, a directory is an image
    /// sequence, anything else goes to ffmpeg.
    Auto,
    Ffmpeg,
    Images,
    Mjpeg,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub locator: String,
    #[serde(default = "default_source_kind")]
    pub kind: SourceKind,
    #[serde(default)]
    pub loop_playback: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_diff_threshold")]
    pub diff_threshold: u8,
    #[serde(default = "default_dilate_iterations")]
    pub dilate_iterations: u8,
    #[serde(default = "default_min_area")]
    pub min_area: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayKind {
    Headless,
    Preview,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenderConfig {
    #[serde(default)]
    pub blur: bool,
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,
    #[serde(default = "default_box_thickness")]
    pub box_thickness: u32,
    #[serde(default = "default_true")]
    pub timestamp: bool,
    #[serde(default = "default_display")]
    pub display: DisplayKind,
    #[serde(default)]
    pub frame_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewConfig {
    #[serde(default = "default_preview_bind")]
    pub bind: String,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            locator: String::new(),
            kind: default_source_kind(),
            loop_playback: false,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_channel_capacity(),
            queue_timeout_ms: default_queue_timeout_ms(),
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl PipelineConfig {
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            diff_threshold: default_diff_threshold(),
            dilate_iterations: default_dilate_iterations(),
            min_area: default_min_area(),
        }
    }
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            blur: false,
            blur_sigma: default_blur_sigma(),
            box_thickness: default_box_thickness(),
            timestamp: true,
            display: default_display(),
            frame_interval_ms: 0,
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            bind: default_preview_bind(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.locator.trim().is_empty() {
            return Err(ConfigError::Invalid("source.locator is empty".into()));
        }
        if self.pipeline.channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.channel_capacity must be at least 1".into(),
            ));
        }
        if self.pipeline.queue_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "pipeline.queue_timeout_ms must be positive".into(),
            ));
        }
        if !(self.render.blur_sigma > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "render.blur_sigma must be positive, got {}",
                self.render.blur_sigma
            )));
        }
        if self.preview.jpeg_quality == 0 || self.preview.jpeg_quality > 100 {
            return Err(ConfigError::Invalid(format!(
                "preview.jpeg_quality must be in 1..=100, got {}",
                self.preview.jpeg_quality
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_source_kind() -> SourceKind {
    SourceKind::Auto
}
fn default_channel_capacity() -> usize {
    8
}
fn default_queue_timeout_ms() -> u64 {
    500
}
fn default_grace_period_ms() -> u64 {
    2000
}
fn default_diff_threshold() -> u8 {
    25
}
fn default_dilate_iterations() -> u8 {
    2
}
fn default_min_area() -> f64 {
    500.0
}
fn default_blur_sigma() -> f32 {
    8.0
}
fn default_box_thickness() -> u32 {
    2
}
fn default_true() -> bool {
    true
}
fn default_display() -> DisplayKind {
    DisplayKind::Headless
}
fn default_preview_bind() -> String {
    "127.0.0.1:8090".into()
}
fn default_jpeg_quality() -> u8 {
    80
}
fn default_log_level() -> String {
    "info".into()
}
