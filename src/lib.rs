//! camstream: live camera frames over HTTP as MJPEG.
//!
//! One capture thread reads frames from a camera, JPEG-encodes them and
//! stores the newest one in a shared cache. An HTTP server fans that frame
//! out to any number of viewers, either as a single snapshot or as a
//! `multipart/x-mixed-replace` stream.
//!
//! # Module Structure
//!
//! - `ingest`: Camera sources (synthetic, Jetson CSI via GStreamer, V4L2)
//! - `frame`: Raw and encoded frame types
//! - `encode`: Raw frame to JPEG
//! - `cache`: Latest-frame cache (single writer, many readers)
//! - `capture`: Capture loop thread
//! - `server`: HTTP routes and the MJPEG stream
//! - `config`: Defaults, config file and environment layering

pub mod cache;
pub mod capture;
pub mod config;
pub mod encode;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod server;

pub use cache::FrameCache;
pub use capture::{CaptureHandle, CaptureLoop, CaptureStats, LoopSettings};
pub use config::{CaptureConfig, StreamerConfig};
pub use encode::{FrameEncoder, DEFAULT_JPEG_QUALITY};
pub use error::{EncodeError, SourceError};
pub use frame::{EncodedFrame, PixelLayout, PublishedFrame, RawFrame};
pub use ingest::{open_source, CameraSource, SourceKind, SyntheticSource};
pub use server::{ServerConfig, ServerHandle, StreamServer};
