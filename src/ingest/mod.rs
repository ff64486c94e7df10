//! Camera sources.
//!
//! Capture itself is delegated to existing stacks; this module only adapts
//! them to the `CameraSource` trait the capture loop drives:
//! - Jetson CSI sensors through Argus + GStreamer (`csi`, `csi://<sensor-id>`;
//!   feature: csi-gstreamer). The default source.
//! - Synthetic moving gradient (`stub://<name>`), always available
//! - USB/V4L2 device nodes (`/dev/videoN`; feature: ingest-v4l2)
//!
//! A source is owned by exactly one capture thread. It declares its pixel
//! layout once, when opened.

pub mod csi;
pub mod diagnostics;
pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

use crate::config::CaptureConfig;
use crate::error::SourceError;
use crate::frame::{PixelLayout, RawFrame};

#[cfg(feature = "csi-gstreamer")]
pub use csi::CsiSource;
pub use csi::CsiSettings;
pub use synthetic::SyntheticSource;
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::V4l2Source;

/// A camera the capture loop can pull frames from.
pub trait CameraSource: Send {
    /// Identifier used in log lines.
    fn describe(&self) -> String;

    /// Layout of every frame this source returns.
    fn layout(&self) -> PixelLayout;

    /// Block for the next frame, at most for the source's read timeout.
    ///
    /// Any error is treated as transient by the capture loop.
    fn read_frame(&mut self) -> Result<RawFrame, SourceError>;

    /// Release the underlying device handle. Called once, after the capture
    /// loop exits.
    fn release(&mut self) -> Result<(), SourceError> {
        Ok(())
    }
}

/// Source family selected from a configured identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceKind {
    Synthetic(String),
    Csi { sensor_id: Option<u32> },
    V4l2(String),
}

impl SourceKind {
    pub fn from_id(id: &str) -> Result<Self, SourceError> {
        let id = id.trim();
        if let Some(name) = id.strip_prefix("stub://") {
            return Ok(SourceKind::Synthetic(name.to_string()));
        }
        if id == "csi" {
            return Ok(SourceKind::Csi { sensor_id: None });
        }
        if let Some(sensor) = id.strip_prefix("csi://") {
            let sensor_id = sensor.parse().map_err(|_| {
                SourceError::unavailable(id, format!("invalid CSI sensor id '{}'", sensor))
            })?;
            return Ok(SourceKind::Csi {
                sensor_id: Some(sensor_id),
            });
        }
        if id.starts_with("/dev/") {
            return Ok(SourceKind::V4l2(id.to_string()));
        }
        Err(SourceError::unavailable(
            id,
            "unrecognized source; expected stub://<name>, csi, csi://<sensor-id> or /dev/videoN",
        ))
    }
}

/// Open the camera named by `config.source`.
///
/// Failure here is the one fatal camera error: the caller should exit.
pub fn open_source(config: &CaptureConfig) -> Result<Box<dyn CameraSource>, SourceError> {
    match SourceKind::from_id(&config.source)? {
        SourceKind::Synthetic(name) => {
            let source = SyntheticSource::new(name, config.width, config.height);
            log::info!("camera source {} opened (synthetic)", source.describe());
            Ok(Box::new(source))
        }
        SourceKind::Csi { sensor_id } => {
            let settings = CsiSettings::from_config(config, sensor_id);
            open_csi(settings, config)
        }
        SourceKind::V4l2(device) => open_v4l2(device, config),
    }
}

#[cfg(feature = "csi-gstreamer")]
fn open_csi(
    settings: CsiSettings,
    config: &CaptureConfig,
) -> Result<Box<dyn CameraSource>, SourceError> {
    Ok(Box::new(CsiSource::open(settings, config.read_timeout)?))
}

#[cfg(not(feature = "csi-gstreamer"))]
fn open_csi(
    settings: CsiSettings,
    _config: &CaptureConfig,
) -> Result<Box<dyn CameraSource>, SourceError> {
    Err(SourceError::unavailable(
        format!("csi://{}", settings.sensor_id),
        "CSI capture requires the csi-gstreamer feature",
    ))
}

#[cfg(feature = "ingest-v4l2")]
fn open_v4l2(device: String, config: &CaptureConfig) -> Result<Box<dyn CameraSource>, SourceError> {
    Ok(Box::new(V4l2Source::open(
        device,
        config.width,
        config.height,
        config.fps,
    )?))
}

#[cfg(not(feature = "ingest-v4l2"))]
fn open_v4l2(device: String, _config: &CaptureConfig) -> Result<Box<dyn CameraSource>, SourceError> {
    Err(SourceError::unavailable(
        device,
        "V4L2 capture requires the ingest-v4l2 feature",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_ids_select_families() {
        assert_eq!(
            SourceKind::from_id("stub://bench").unwrap(),
            SourceKind::Synthetic("bench".to_string())
        );
        assert_eq!(
            SourceKind::from_id("csi").unwrap(),
            SourceKind::Csi { sensor_id: None }
        );
        assert_eq!(
            SourceKind::from_id("csi://1").unwrap(),
            SourceKind::Csi { sensor_id: Some(1) }
        );
        assert_eq!(
            SourceKind::from_id("/dev/video2").unwrap(),
            SourceKind::V4l2("/dev/video2".to_string())
        );
    }

    #[test]
    fn unknown_source_ids_are_unavailable() {
        assert!(matches!(
            SourceKind::from_id("rtsp://camera"),
            Err(SourceError::Unavailable { .. })
        ));
        assert!(matches!(
            SourceKind::from_id("csi://left"),
            Err(SourceError::Unavailable { .. })
        ));
    }

    #[cfg(not(feature = "csi-gstreamer"))]
    #[test]
    fn default_source_is_unavailable_without_csi_support() {
        let config = CaptureConfig::default();
        match open_source(&config) {
            Err(SourceError::Unavailable { device, reason }) => {
                assert_eq!(device, "csi://0");
                assert!(reason.contains("csi-gstreamer"), "{}", reason);
            }
            Err(other) => panic!("expected Unavailable, got {}", other),
            Ok(source) => panic!("default source opened: {}", source.describe()),
        }
    }

    #[test]
    fn open_source_returns_synthetic_rgba() {
        let config = CaptureConfig {
            source: "stub://unit".to_string(),
            width: 32,
            height: 16,
            ..CaptureConfig::default()
        };
        let mut source = open_source(&config).expect("open synthetic");
        assert_eq!(source.layout(), PixelLayout::Rgba32);
        let frame = source.read_frame().expect("frame");
        assert_eq!((frame.width, frame.height), (32, 16));
    }
}
