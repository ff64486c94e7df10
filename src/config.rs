use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::encode::DEFAULT_JPEG_QUALITY;
use crate::server::ServerConfig;

const DEFAULT_SOURCE: &str = "csi";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_FPS: u32 = 30;
/// Pacing ceiling applied when no target fps is configured.
pub const MAX_DEFAULT_TARGET_FPS: u32 = 30;
const DEFAULT_BACKOFF_MS: u64 = 10;
const DEFAULT_READ_TIMEOUT_MS: u64 = 500;
const DEFAULT_STOP_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Deserialize, Default)]
struct StreamerConfigFile {
    capture: Option<CaptureConfigFile>,
    server: Option<ServerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    fps: Option<u32>,
    target_fps: Option<u32>,
    jpeg_quality: Option<u8>,
    backoff_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    stop_timeout_ms: Option<u64>,
    sensor_id: Option<u32>,
    sensor_mode: Option<u32>,
    flip: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ServerConfigFile {
    bind: Option<String>,
    port: Option<u16>,
    poll_interval_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
    write_timeout_ms: Option<u64>,
    keepalive_ms: Option<u64>,
    shutdown_timeout_ms: Option<u64>,
    log_requests: Option<bool>,
}

/// Everything the streamer needs at startup. Built once; never mutated
/// after the capture loop and server are spawned.
#[derive(Debug, Clone, Default)]
pub struct StreamerConfig {
    pub capture: CaptureConfig,
    pub server: ServerConfig,
}

/// Camera and capture loop settings.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// `stub://<name>`, `csi`, `csi://<sensor-id>` or `/dev/videoN`.
    pub source: String,
    pub width: u32,
    pub height: u32,
    /// Native rate requested from the camera.
    pub fps: u32,
    /// Capture loop pacing. `None` paces at `min(fps, 30)`; `Some(0)`
    /// disables pacing.
    pub target_fps: Option<u32>,
    pub jpeg_quality: u8,
    /// Sleep after a failed read.
    pub backoff: Duration,
    /// Longest a single source read may block.
    pub read_timeout: Duration,
    /// How long to wait for the capture thread on shutdown.
    pub stop_timeout: Duration,
    /// CSI only. Passed to Argus as-is.
    pub sensor_id: u32,
    /// CSI only. Passed to Argus as-is.
    pub sensor_mode: Option<u32>,
    /// CSI only. `nvvidconv flip-method`, passed as-is.
    pub flip: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            source: DEFAULT_SOURCE.to_string(),
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            fps: DEFAULT_FPS,
            target_fps: None,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
            read_timeout: Duration::from_millis(DEFAULT_READ_TIMEOUT_MS),
            stop_timeout: Duration::from_millis(DEFAULT_STOP_TIMEOUT_MS),
            sensor_id: 0,
            sensor_mode: None,
            flip: 0,
        }
    }
}

impl CaptureConfig {
    /// Interval between capture iterations, or `None` when unpaced.
    pub fn frame_interval(&self) -> Option<Duration> {
        let fps = match self.target_fps {
            Some(0) => return None,
            Some(fps) => fps,
            None => self.fps.min(MAX_DEFAULT_TARGET_FPS),
        };
        if fps == 0 {
            return None;
        }
        Some(Duration::from_nanos(1_000_000_000 / fps as u64))
    }
}

impl StreamerConfig {
    /// Load from `CAMSTREAM_CONFIG` (if set), then apply the environment.
    pub fn load() -> Result<Self> {
        let path = std::env::var_os("CAMSTREAM_CONFIG").map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Load from an explicit config file (if any), then apply the environment.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => StreamerConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg);
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: StreamerConfigFile) -> Self {
        let capture_defaults = CaptureConfig::default();
        let c = file.capture.unwrap_or_default();
        let capture = CaptureConfig {
            source: c.source.unwrap_or(capture_defaults.source),
            width: c.width.unwrap_or(capture_defaults.width),
            height: c.height.unwrap_or(capture_defaults.height),
            fps: c.fps.unwrap_or(capture_defaults.fps),
            target_fps: c.target_fps,
            jpeg_quality: c.jpeg_quality.unwrap_or(capture_defaults.jpeg_quality),
            backoff: c
                .backoff_ms
                .map(Duration::from_millis)
                .unwrap_or(capture_defaults.backoff),
            read_timeout: c
                .read_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(capture_defaults.read_timeout),
            stop_timeout: c
                .stop_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(capture_defaults.stop_timeout),
            sensor_id: c.sensor_id.unwrap_or(capture_defaults.sensor_id),
            sensor_mode: c.sensor_mode,
            flip: c.flip.unwrap_or(capture_defaults.flip),
        };

        let server_defaults = ServerConfig::default();
        let s = file.server.unwrap_or_default();
        let server = ServerConfig {
            bind: s.bind.unwrap_or(server_defaults.bind),
            port: s.port.unwrap_or(server_defaults.port),
            poll_interval: s
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(server_defaults.poll_interval),
            read_timeout: s
                .read_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(server_defaults.read_timeout),
            write_timeout: s
                .write_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(server_defaults.write_timeout),
            keepalive_interval: s
                .keepalive_ms
                .map(Duration::from_millis)
                .unwrap_or(server_defaults.keepalive_interval),
            shutdown_timeout: s
                .shutdown_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(server_defaults.shutdown_timeout),
            log_requests: s.log_requests.unwrap_or(server_defaults.log_requests),
        };

        Self { capture, server }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(source) = env_value("CAMERA_SOURCE") {
            self.capture.source = source;
        }
        if let Some(width) = env_parse("CSI_WIDTH")? {
            self.capture.width = width;
        }
        if let Some(height) = env_parse("CSI_HEIGHT")? {
            self.capture.height = height;
        }
        if let Some(fps) = env_parse("CSI_FPS")? {
            self.capture.fps = fps;
        }
        if let Some(flip) = env_parse("CSI_FLIP")? {
            self.capture.flip = flip;
        }
        if let Some(sensor_id) = env_parse("CSI_SENSOR_ID")? {
            self.capture.sensor_id = sensor_id;
        }
        if let Some(sensor_mode) = env_parse("CSI_SENSOR_MODE")? {
            self.capture.sensor_mode = Some(sensor_mode);
        }
        if let Some(target_fps) = env_parse("STREAM_TARGET_FPS")? {
            self.capture.target_fps = Some(target_fps);
        }
        if let Some(quality) = env_parse("JPEG_QUALITY")? {
            self.capture.jpeg_quality = quality;
        }
        if let Some(bind) = env_value("STREAM_BIND") {
            self.server.bind = bind;
        }
        if let Some(port) = env_parse("STREAM_PORT")? {
            self.server.port = port;
        }
        if let Some(value) = env_value("STREAM_LOG_REQUESTS") {
            self.server.log_requests = is_truthy(&value);
        }
        Ok(())
    }

    /// Check invariants. Call again after applying command-line overrides.
    pub fn validate(&self) -> Result<()> {
        let capture = &self.capture;
        if capture.source.trim().is_empty() {
            return Err(anyhow!("camera source must not be empty"));
        }
        if capture.width == 0 || capture.height == 0 {
            return Err(anyhow!(
                "capture size must be non-zero (got {}x{})",
                capture.width,
                capture.height
            ));
        }
        if capture.fps == 0 {
            return Err(anyhow!("capture fps must be greater than zero"));
        }
        if !(1..=100).contains(&capture.jpeg_quality) {
            return Err(anyhow!(
                "jpeg quality must be between 1 and 100 (got {})",
                capture.jpeg_quality
            ));
        }
        for (name, value) in [
            ("capture backoff", capture.backoff),
            ("capture read timeout", capture.read_timeout),
            ("capture stop timeout", capture.stop_timeout),
            ("server poll interval", self.server.poll_interval),
            ("server read timeout", self.server.read_timeout),
            ("server write timeout", self.server.write_timeout),
            ("server keepalive interval", self.server.keepalive_interval),
            ("server shutdown timeout", self.server.shutdown_timeout),
        ] {
            if value.is_zero() {
                return Err(anyhow!("{} must be greater than zero", name));
            }
        }
        self.server
            .bind
            .parse::<IpAddr>()
            .map_err(|_| anyhow!("bind address '{}' is not an IP address", self.server.bind))?;
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<StreamerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_value(name) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|err| anyhow!("invalid {} '{}': {}", name, value, err)),
        None => Ok(None),
    }
}

/// `1`, `true`, `yes` and `on` (any case) are truthy; everything else is not.
pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
