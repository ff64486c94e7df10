//! JPEG encoding of raw camera frames.
//!
//! The encoder is built for one `PixelLayout`. Four-channel layouts lose
//! their alpha/padding byte and BGR layouts are reordered before the frame
//! reaches the codec, which only ever sees packed RGB.

use std::borrow::Cow;

use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;

use crate::error::EncodeError;
use crate::frame::{EncodedFrame, PixelLayout, RawFrame};

pub const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Conversion {
    Passthrough,
    SwapRedBlue,
    DropAlpha,
    DropPaddingSwapRedBlue,
}

impl Conversion {
    fn for_layout(layout: PixelLayout) -> Self {
        match layout {
            PixelLayout::Rgb24 => Conversion::Passthrough,
            PixelLayout::Bgr24 => Conversion::SwapRedBlue,
            PixelLayout::Rgba32 => Conversion::DropAlpha,
            PixelLayout::Bgrx32 => Conversion::DropPaddingSwapRedBlue,
        }
    }
}

/// Encodes raw frames of a fixed layout into JPEG at a fixed quality.
#[derive(Clone, Debug)]
pub struct FrameEncoder {
    quality: u8,
    layout: PixelLayout,
    conversion: Conversion,
}

impl FrameEncoder {
    /// Build an encoder for frames in `layout`.
    ///
    /// `quality` is clamped to `1..=100`.
    pub fn new(quality: u8, layout: PixelLayout) -> Self {
        Self {
            quality: quality.clamp(1, 100),
            layout,
            conversion: Conversion::for_layout(layout),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    pub fn encode(&self, frame: &RawFrame) -> Result<EncodedFrame, EncodeError> {
        if frame.layout != self.layout {
            return Err(EncodeError::LayoutMismatch {
                expected: self.layout,
                actual: frame.layout,
            });
        }
        if frame.width == 0 || frame.height == 0 {
            return Err(EncodeError::EmptyFrame {
                width: frame.width,
                height: frame.height,
            });
        }
        let actual = frame.pixels().len();
        let expected = frame
            .expected_len()
            .ok_or(EncodeError::LengthMismatch {
                expected: usize::MAX,
                actual,
            })?;
        if actual != expected {
            return Err(EncodeError::LengthMismatch { expected, actual });
        }

        let rgb = to_packed_rgb(frame.pixels(), self.conversion);
        let mut out = Vec::with_capacity(rgb.len() / 8);
        JpegEncoder::new_with_quality(&mut out, self.quality).encode(
            &rgb,
            frame.width,
            frame.height,
            ExtendedColorType::Rgb8,
        )?;
        Ok(EncodedFrame::new(out))
    }
}

fn to_packed_rgb(pixels: &[u8], conversion: Conversion) -> Cow<'_, [u8]> {
    match conversion {
        Conversion::Passthrough => Cow::Borrowed(pixels),
        Conversion::SwapRedBlue => Cow::Owned(
            pixels
                .chunks_exact(3)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
        ),
        Conversion::DropAlpha => Cow::Owned(
            pixels
                .chunks_exact(4)
                .flat_map(|px| [px[0], px[1], px[2]])
                .collect(),
        ),
        Conversion::DropPaddingSwapRedBlue => Cow::Owned(
            pixels
                .chunks_exact(4)
                .flat_map(|px| [px[2], px[1], px[0]])
                .collect(),
        ),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const WIDTH: u32 = 16;
    const HEIGHT: u32 = 16;
    const TOLERANCE: i16 = 8;

    fn solid(layout: PixelLayout, pixel: &[u8]) -> RawFrame {
        let data = pixel
            .iter()
            .copied()
            .cycle()
            .take((WIDTH * HEIGHT) as usize * pixel.len())
            .collect();
        RawFrame::new(data, WIDTH, HEIGHT, layout)
    }

    fn assert_decodes_to(frame: &EncodedFrame, expected_rgb: [u8; 3]) {
        let decoded = image::load_from_memory(frame.as_bytes())
            .expect("decode jpeg")
            .into_rgb8();
        assert_eq!(decoded.dimensions(), (WIDTH, HEIGHT));
        for pixel in decoded.pixels() {
            for (got, want) in pixel.0.iter().zip(expected_rgb.iter()) {
                let diff = (*got as i16 - *want as i16).abs();
                assert!(
                    diff <= TOLERANCE,
                    "decoded {:?}, expected {:?}",
                    pixel.0,
                    expected_rgb
                );
            }
        }
    }

    #[test]
    fn rgba_frame_drops_alpha_and_round_trips() {
        let encoder = FrameEncoder::new(90, PixelLayout::Rgba32);
        let frame = solid(PixelLayout::Rgba32, &[200, 100, 50, 255]);

        let encoded = encoder.encode(&frame).expect("encode rgba");

        assert_eq!(&encoded.as_bytes()[..2], &[0xFF, 0xD8]);
        assert_decodes_to(&encoded, [200, 100, 50]);
    }

    #[test]
    fn alpha_value_does_not_affect_output() {
        let encoder = FrameEncoder::new(90, PixelLayout::Rgba32);
        let opaque = encoder
            .encode(&solid(PixelLayout::Rgba32, &[10, 120, 240, 255]))
            .expect("encode opaque");
        let transparent = encoder
            .encode(&solid(PixelLayout::Rgba32, &[10, 120, 240, 0]))
            .expect("encode transparent");
        assert_eq!(opaque, transparent);
    }

    #[test]
    fn bgr_layouts_are_reordered_before_encoding() {
        let bgr = FrameEncoder::new(90, PixelLayout::Bgr24)
            .encode(&solid(PixelLayout::Bgr24, &[50, 100, 200]))
            .expect("encode bgr");
        assert_decodes_to(&bgr, [200, 100, 50]);

        let bgrx = FrameEncoder::new(90, PixelLayout::Bgrx32)
            .encode(&solid(PixelLayout::Bgrx32, &[50, 100, 200, 0]))
            .expect("encode bgrx");
        assert_decodes_to(&bgrx, [200, 100, 50]);
    }

    #[test]
    fn rejects_length_mismatch() {
        let encoder = FrameEncoder::new(80, PixelLayout::Rgb24);
        let frame = RawFrame::new(vec![0u8; 10], WIDTH, HEIGHT, PixelLayout::Rgb24);

        match encoder.encode(&frame) {
            Err(EncodeError::LengthMismatch { expected, actual }) => {
                assert_eq!(expected, (WIDTH * HEIGHT * 3) as usize);
                assert_eq!(actual, 10);
            }
            other => panic!("expected length mismatch, got {:?}", other),
        }
    }

    #[test]
    fn rejects_layout_mismatch_and_empty_frames() {
        let encoder = FrameEncoder::new(80, PixelLayout::Rgb24);
        let rgba = solid(PixelLayout::Rgba32, &[0, 0, 0, 0]);
        assert!(matches!(
            encoder.encode(&rgba),
            Err(EncodeError::LayoutMismatch { .. })
        ));

        let empty = RawFrame::new(Vec::new(), 0, 480, PixelLayout::Rgb24);
        assert!(matches!(
            encoder.encode(&empty),
            Err(EncodeError::EmptyFrame { .. })
        ));
    }

    #[test]
    fn quality_is_clamped_into_range() {
        assert_eq!(FrameEncoder::new(0, PixelLayout::Rgb24).quality(), 1);
        assert_eq!(FrameEncoder::new(150, PixelLayout::Rgb24).quality(), 100);
        assert_eq!(FrameEncoder::new(80, PixelLayout::Rgb24).quality(), 80);
    }
}
