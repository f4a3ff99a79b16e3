use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::camera::SourceRequest;
use crate::error::{ClientError, ClientResult};
use crate::render::DEFAULT_VISIBILITY_THRESHOLD;
use crate::streaming::{Pacing, DEFAULT_JPEG_QUALITY, DEFAULT_TIMER_INTERVAL};

/// Environment variable that overrides `server.ws_url`.
pub const ENDPOINT_ENV: &str = "KINETICOACH_WS_URL";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub window: WindowConfig,
    /// Debug-level logging
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    /// WebSocket endpoint of the analysis service (ws:// or wss://)
    #[serde(default)]
    pub ws_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Camera,
    File,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    pub initial: SourceKind,
    /// Video file used when `initial = "file"`
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Played when camera access is denied
    #[serde(default)]
    pub fallback_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub index: i32,
    /// Requested resolution; the device may choose another
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacingMode {
    #[default]
    Feedback,
    Pipelined,
    Timer,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// JPEG quality factor in (0, 1]
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: f32,
    #[serde(default)]
    pub pacing: PacingMode,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_timer_interval_ms")]
    pub timer_interval_ms: u64,
    /// Send START_SESSION when the connection opens
    #[serde(default)]
    pub announce_session: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverlayConfig {
    /// Landmarks at or below this visibility are not drawn
    #[serde(default = "default_visibility_threshold")]
    pub visibility_threshold: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WindowConfig {
    #[serde(default = "default_window_width")]
    pub width: usize,
    #[serde(default = "default_window_height")]
    pub height: usize,
}

fn default_camera_width() -> u32 { 640 }
fn default_camera_height() -> u32 { 480 }
fn default_jpeg_quality() -> f32 { DEFAULT_JPEG_QUALITY }
fn default_max_in_flight() -> usize { 2 }
fn default_timer_interval_ms() -> u64 { DEFAULT_TIMER_INTERVAL.as_millis() as u64 }
fn default_visibility_threshold() -> f32 { DEFAULT_VISIBILITY_THRESHOLD }
fn default_window_width() -> usize { 800 }
fn default_window_height() -> usize { 450 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            jpeg_quality: default_jpeg_quality(),
            pacing: PacingMode::default(),
            max_in_flight: default_max_in_flight(),
            timer_interval_ms: default_timer_interval_ms(),
            announce_session: false,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            visibility_threshold: default_visibility_threshold(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_window_width(),
            height: default_window_height(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_toml_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Loads `path` if present, otherwise defaults, then applies the
    /// endpoint environment override. A file that exists but does not parse
    /// is an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() { Self::load(path)? } else { Self::default() };
        config.apply_endpoint_override(std::env::var(ENDPOINT_ENV).ok());
        Ok(config)
    }

    pub fn apply_endpoint_override(&mut self, value: Option<String>) {
        if let Some(url) = value.filter(|v| !v.trim().is_empty()) {
            self.server.ws_url = Some(url);
        }
    }

    /// The configured endpoint, or `MissingEndpointConfig` when unset or blank.
    pub fn endpoint(&self) -> ClientResult<&str> {
        self.server
            .ws_url
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .ok_or(ClientError::MissingEndpointConfig)
    }

    pub fn pacing(&self) -> Pacing {
        match self.stream.pacing {
            PacingMode::Feedback => Pacing::Feedback,
            PacingMode::Pipelined => Pacing::Pipelined {
                max_in_flight: self.stream.max_in_flight,
            },
            PacingMode::Timer => Pacing::Timer {
                interval: Duration::from_millis(self.stream.timer_interval_ms),
            },
        }
    }

    pub fn initial_source(&self) -> ClientResult<SourceRequest> {
        match self.source.initial {
            SourceKind::Camera => Ok(SourceRequest::Camera),
            SourceKind::File => self
                .source
                .file
                .clone()
                .map(SourceRequest::File)
                .ok_or(ClientError::EmptyFileHandle),
        }
    }

    pub fn validate(&self) -> ClientResult<()> {
        let q = self.stream.jpeg_quality;
        if !(q > 0.0 && q <= 1.0) {
            return Err(ClientError::Config(format!("stream.jpeg_quality {q} not in (0, 1]")));
        }
        let t = self.overlay.visibility_threshold;
        if !(0.0..=1.0).contains(&t) {
            return Err(ClientError::Config(format!("overlay.visibility_threshold {t} not in [0, 1]")));
        }
        if self.stream.max_in_flight == 0 {
            return Err(ClientError::Config("stream.max_in_flight must be at least 1".into()));
        }
        if self.stream.timer_interval_ms == 0 {
            return Err(ClientError::Config("stream.timer_interval_ms must be positive".into()));
        }
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ClientError::Config("window size must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = Config::from_toml_str("").unwrap();
        assert!(config.server.ws_url.is_none());
        assert_eq!(config.source.initial, SourceKind::Camera);
        assert_eq!((config.camera.width, config.camera.height), (640, 480));
        assert_eq!(config.stream.jpeg_quality, 0.7);
        assert_eq!(config.pacing(), Pacing::Feedback);
        assert_eq!(config.overlay.visibility_threshold, 0.5);
        assert_eq!((config.window.width, config.window.height), (800, 450));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full() {
        let config = Config::from_toml_str(
            r#"
            verbose = true

            [server]
            ws_url = "wss://coach.example.org/ws"

            [source]
            initial = "file"
            file = "clips/squat.mp4"
            fallback_file = "clips/demo.mp4"

            [stream]
            pacing = "timer"
            timer_interval_ms = 250
            announce_session = true
            "#,
        )
        .unwrap();
        assert!(config.verbose);
        assert_eq!(config.endpoint().unwrap(), "wss://coach.example.org/ws");
        assert_eq!(
            config.initial_source().unwrap(),
            SourceRequest::File(PathBuf::from("clips/squat.mp4"))
        );
        assert_eq!(
            config.pacing(),
            Pacing::Timer {
                interval: Duration::from_millis(250)
            }
        );
        assert!(config.stream.announce_session);
    }

    #[test]
    fn test_missing_endpoint() {
        let mut config = Config::default();
        assert!(matches!(config.endpoint(), Err(ClientError::MissingEndpointConfig)));
        config.server.ws_url = Some("   ".into());
        assert!(matches!(config.endpoint(), Err(ClientError::MissingEndpointConfig)));
    }

    #[test]
    fn test_endpoint_override() {
        let mut config = Config::from_toml_str("[server]\nws_url = \"ws://file\"").unwrap();
        config.apply_endpoint_override(Some(String::new()));
        assert_eq!(config.endpoint().unwrap(), "ws://file");
        config.apply_endpoint_override(Some("ws://env:8000/ws".into()));
        assert_eq!(config.endpoint().unwrap(), "ws://env:8000/ws");
    }

    #[test]
    fn test_file_source_without_path() {
        let config = Config::from_toml_str("[source]\ninitial = \"file\"").unwrap();
        assert!(matches!(config.initial_source(), Err(ClientError::EmptyFileHandle)));
    }

    #[test]
    fn test_validate_rejects_bad_quality() {
        let config = Config::from_toml_str("[stream]\njpeg_quality = 0.0").unwrap();
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_or_default(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.camera.width, 640);
    }

    #[test]
    fn test_load_or_default_reports_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kineticoach.toml");
        fs::write(&path, "[server]\nws_url = ws://unquoted\n").unwrap();
        let err = Config::load_or_default(&path).unwrap_err();
        assert!(format!("{err:#}").contains("parsing"));
    }

    #[test]
    fn test_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kineticoach.toml");
        fs::write(&path, "[camera]\nindex = 2\nwidth = 1280\nheight = 720\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.camera.index, 2);
        assert_eq!((config.camera.width, config.camera.height), (1280, 720));
    }
}
