//! Error types shared by the capture path.
//!
//! Only `SourceError::Unavailable` is fatal, and only when it is returned from
//! `ingest::open_source` at startup. Everything raised inside the capture loop
//! is counted, logged and recovered there.

use thiserror::Error;

use crate::frame::PixelLayout;

/// Failures raised by a camera source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The device could not be opened. Startup-only.
    #[error("camera source {device} unavailable: {reason}")]
    Unavailable { device: String, reason: String },

    /// The source had no frame ready within its read timeout.
    #[error("no frame available from camera source")]
    NoFrame,

    /// A single read failed. The capture loop backs off and retries.
    #[error("camera read failed: {0}")]
    Read(String),

    /// Releasing the underlying handle failed. Logged, never propagated.
    #[error("camera release failed: {0}")]
    Release(String),
}

impl SourceError {
    pub fn unavailable(device: impl Into<String>, reason: impl ToString) -> Self {
        SourceError::Unavailable {
            device: device.into(),
            reason: reason.to_string(),
        }
    }
}

/// Failures raised while turning a raw frame into JPEG bytes.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("frame layout {actual:?} does not match encoder layout {expected:?}")]
    LayoutMismatch {
        expected: PixelLayout,
        actual: PixelLayout,
    },

    #[error("frame has zero dimensions ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    #[error("frame length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("jpeg codec rejected frame: {0}")]
    Codec(#[from] image::ImageError),
}
