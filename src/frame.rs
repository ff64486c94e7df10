//! Frame types passed between the capture loop, the encoder and the cache.
//!
//! - `RawFrame`: decoded pixels straight from a camera source. Owned by the
//!   capture loop for one iteration and dropped afterwards.
//! - `EncodedFrame`: immutable JPEG bytes. Cheap to clone, never mutable.
//! - `PublishedFrame`: an `EncodedFrame` stamped with its cache sequence number.

use std::sync::Arc;

// ----------------------------------------------------------------------------
// PixelLayout
// ----------------------------------------------------------------------------

/// Byte layout of a single pixel in a `RawFrame`.
///
/// A camera source reports its layout once when it is opened; the encoder is
/// built for that layout and never re-detects it per frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelLayout {
    /// 8-bit blue, green, red.
    Bgr24,
    /// 8-bit red, green, blue.
    Rgb24,
    /// 8-bit red, green, blue, alpha.
    Rgba32,
    /// 8-bit blue, green, red, unused padding.
    Bgrx32,
}

impl PixelLayout {
    /// Bytes per pixel.
    pub fn channels(self) -> usize {
        match self {
            PixelLayout::Bgr24 | PixelLayout::Rgb24 => 3,
            PixelLayout::Rgba32 | PixelLayout::Bgrx32 => 4,
        }
    }

    /// True when the fourth byte carries alpha or padding that JPEG drops.
    pub fn has_extra_channel(self) -> bool {
        self.channels() == 4
    }
}

// ----------------------------------------------------------------------------
// RawFrame
// ----------------------------------------------------------------------------

/// Decoded pixel buffer from a camera source.
///
/// Not `Clone`: a raw frame lives for exactly one capture iteration.
pub struct RawFrame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub layout: PixelLayout,
}

impl RawFrame {
    /// Wrap a pixel buffer. The length is checked by the encoder, not here,
    /// so that a malformed read surfaces as an encode failure.
    pub fn new(data: Vec<u8>, width: u32, height: u32, layout: PixelLayout) -> Self {
        Self {
            data,
            width,
            height,
            layout,
        }
    }

    /// Copy a frame out of a buffer whose rows are `stride` bytes apart.
    ///
    /// Row padding and any bytes after the last row are dropped. `stride`
    /// of zero means rows are packed. Returns `None` when the buffer is too
    /// short for the dimensions.
    pub fn from_strided(
        data: &[u8],
        width: u32,
        height: u32,
        stride: usize,
        layout: PixelLayout,
    ) -> Option<Self> {
        let row_bytes = (width as usize).checked_mul(layout.channels())?;
        let rows = height as usize;
        let stride = if stride == 0 { row_bytes } else { stride };
        if stride < row_bytes {
            return None;
        }

        let pixels = if stride == row_bytes {
            data.get(..row_bytes.checked_mul(rows)?)?.to_vec()
        } else {
            let mut pixels = Vec::with_capacity(row_bytes * rows);
            for row in 0..rows {
                let start = row * stride;
                pixels.extend_from_slice(data.get(start..start + row_bytes)?);
            }
            pixels
        };
        Some(Self::new(pixels, width, height, layout))
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    /// Expected buffer length for the frame's dimensions and layout.
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.layout.channels())
    }
}

// ----------------------------------------------------------------------------
// EncodedFrame
// ----------------------------------------------------------------------------

/// JPEG-encoded image. Clones share one immutable buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedFrame {
    bytes: Arc<[u8]>,
}

impl EncodedFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::from(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl From<Vec<u8>> for EncodedFrame {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

/// A frame as stored in the cache, with the sequence number of its publish.
#[derive(Clone, Debug)]
pub struct PublishedFrame {
    pub sequence: u64,
    pub frame: EncodedFrame,
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
