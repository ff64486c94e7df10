//! V4L2 camera source.
//!
//! Opens a local device node (e.g. /dev/video0), asks for packed RGB at the
//! configured size and frame rate, and reads frames from an mmap stream.
//! Devices that only offer compressed or YUV formats are rejected at open.

use ouroboros::self_referencing;

use crate::error::SourceError;
use crate::frame::{PixelLayout, RawFrame};
use crate::ingest::CameraSource;

const STREAM_BUFFERS: u32 = 4;

#[self_referencing]
struct DeviceState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Source {
    path: String,
    state: Option<DeviceState>,
    layout: PixelLayout,
    width: u32,
    height: u32,
    frame_count: u64,
}

impl V4l2Source {
    pub fn open(path: String, width: u32, height: u32, fps: u32) -> Result<Self, SourceError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&path)
            .map_err(|err| SourceError::unavailable(&path, err))?;
        let mut format = device
            .format()
            .map_err(|err| SourceError::unavailable(&path, err))?;
        format.width = width;
        format.height = height;
        format.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!("V4l2Source: failed to set format on {}: {}", path, err);
                device
                    .format()
                    .map_err(|err| SourceError::unavailable(&path, err))?
            }
        };

        let layout = if format.fourcc == v4l::FourCC::new(b"RGB3") {
            PixelLayout::Rgb24
        } else if format.fourcc == v4l::FourCC::new(b"BGR3") {
            PixelLayout::Bgr24
        } else {
            return Err(SourceError::unavailable(
                &path,
                format!("unsupported pixel format {}", format.fourcc),
            ));
        };

        if fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", path, err);
            }
        }

        let state = DeviceStateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, STREAM_BUFFERS)
            },
        }
        .try_build()
        .map_err(|err| SourceError::unavailable(&path, err))?;

        log::info!(
            "V4l2Source: opened {} ({}x{} {:?})",
            path,
            format.width,
            format.height,
            layout
        );
        Ok(Self {
            path,
            state: Some(state),
            layout,
            width: format.width,
            height: format.height,
            frame_count: 0,
        })
    }
}

impl CameraSource for V4l2Source {
    fn describe(&self) -> String {
        self.path.clone()
    }

    fn layout(&self) -> PixelLayout {
        self.layout
    }

    fn read_frame(&mut self) -> Result<RawFrame, SourceError> {
        use v4l::io::traits::CaptureStream;

        let state = self
            .state
            .as_mut()
            .ok_or_else(|| SourceError::Read("v4l2 device released".to_string()))?;
        let pixels = state.with_stream_mut(|stream| {
            let (buf, meta) = stream.next()?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            Ok::<_, std::io::Error>(buf[..used].to_vec())
        });
        let pixels = pixels.map_err(|err| SourceError::Read(err.to_string()))?;

        self.frame_count += 1;
        Ok(RawFrame::new(pixels, self.width, self.height, self.layout))
    }

    fn release(&mut self) -> Result<(), SourceError> {
        // Dropping the stream issues STREAMOFF and unmaps the buffers.
        self.state = None;
        log::debug!(
            "V4l2Source: released {} after {} frames",
            self.path,
            self.frame_count
        );
        Ok(())
    }
}
