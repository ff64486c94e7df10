//! Synthetic camera source (`stub://`).
//!
//! Produces a diagonal RGBA gradient that scrolls by one pixel per frame, so
//! a browser pointed at the stream can see that frames are moving. The alpha
//! byte is always opaque; it exists to exercise the encoder's channel drop.

use crate::error::SourceError;
use crate::frame::{PixelLayout, RawFrame};

use super::CameraSource;

pub struct SyntheticSource {
    name: String,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl SyntheticSource {
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            frame_count: 0,
        }
    }

    pub fn frames_read(&self) -> u64 {
        self.frame_count
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let w = self.width as usize;
        let h = self.height as usize;
        let shift = self.frame_count as usize;
        let mut pixels = Vec::with_capacity(w * h * 4);
        for y in 0..h {
            for x in 0..w {
                let r = ((x + shift) % 256) as u8;
                let g = ((y + shift / 2) % 256) as u8;
                let b = ((x + y) % 256) as u8;
                pixels.extend_from_slice(&[r, g, b, 0xFF]);
            }
        }
        pixels
    }
}

impl CameraSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("stub://{}", self.name)
    }

    fn layout(&self) -> PixelLayout {
        PixelLayout::Rgba32
    }

    fn read_frame(&mut self) -> Result<RawFrame, SourceError> {
        self.frame_count += 1;
        Ok(RawFrame::new(
            self.generate_pixels(),
            self.width,
            self.height,
            PixelLayout::Rgba32,
        ))
    }
}
