//! Jetson CSI camera source.
//!
//! Builds an `nvarguscamerasrc` pipeline that converts to RGBA in NVMM and
//! hands frames to an appsink configured to keep only the newest buffer.
//! Flip method and sensor mode are passed through to Argus untouched.
//!
//! The pipeline description is always available (it is useful for logging
//! and for testing with `gst-launch-1.0`); the GStreamer-backed source needs
//! the `csi-gstreamer` feature.

use crate::config::CaptureConfig;

/// Parameters of the Argus pipeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CsiSettings {
    pub sensor_id: u32,
    pub sensor_mode: Option<u32>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub flip: u32,
}

impl CsiSettings {
    /// Take settings from the capture config. A sensor id embedded in the
    /// source identifier (`csi://<id>`) wins over `config.sensor_id`.
    pub fn from_config(config: &CaptureConfig, sensor_id: Option<u32>) -> Self {
        Self {
            sensor_id: sensor_id.unwrap_or(config.sensor_id),
            sensor_mode: config.sensor_mode,
            width: config.width,
            height: config.height,
            fps: config.fps,
            flip: config.flip,
        }
    }

    pub fn pipeline_description(&self) -> String {
        format!(
            "{} ! appsink name=appsink drop=true max-buffers=1 sync=false",
            self.capture_chain()
        )
    }

    /// The same capture chain ending in a fakesink that stops after one
    /// buffer. Used to get a plain pipeline error when opening fails.
    pub fn fakesink_pipeline_description(&self) -> String {
        format!("{} ! fakesink num-buffers=1 sync=false", self.capture_chain())
    }

    fn capture_chain(&self) -> String {
        let mode = self
            .sensor_mode
            .map(|mode| format!(" sensor-mode={}", mode))
            .unwrap_or_default();
        format!(
            "nvarguscamerasrc sensor-id={sensor_id}{mode} ! \
             video/x-raw(memory:NVMM), width={width}, height={height}, framerate={fps}/1 ! \
             nvvidconv flip-method={flip} ! video/x-raw, format=RGBA",
            sensor_id = self.sensor_id,
            mode = mode,
            width = self.width,
            height = self.height,
            fps = self.fps,
            flip = self.flip,
        )
    }
}

// ----------------------------------------------------------------------------
// GStreamer-backed source
// ----------------------------------------------------------------------------

#[cfg(feature = "csi-gstreamer")]
pub use gst_source::CsiSource;

#[cfg(feature = "csi-gstreamer")]
mod gst_source {
    use std::time::Duration;

    use gstreamer::prelude::*;

    use super::CsiSettings;
    use crate::error::SourceError;
    use crate::ingest::diagnostics;
    use crate::frame::{PixelLayout, RawFrame};
    use crate::ingest::CameraSource;

    pub struct CsiSource {
        settings: CsiSettings,
        pipeline: gstreamer::Pipeline,
        appsink: gstreamer_app::AppSink,
        read_timeout: Duration,
        frame_count: u64,
    }

    impl CsiSource {
        /// Launch the Argus pipeline. On failure the host diagnostics and a
        /// fakesink run of the same pipeline are logged at debug before the
        /// error is returned.
        pub fn open(settings: CsiSettings, read_timeout: Duration) -> Result<Self, SourceError> {
            match Self::launch(&settings, read_timeout) {
                Ok(source) => Ok(source),
                Err(err) => {
                    log::debug!("CsiSource: open failed: {}", err);
                    diagnostics::log_environment(&settings);
                    log_element_availability();
                    log_fakesink_run(&settings, read_timeout);
                    Err(err)
                }
            }
        }

        fn launch(settings: &CsiSettings, read_timeout: Duration) -> Result<Self, SourceError> {
            let device = format!("csi://{}", settings.sensor_id);
            gstreamer::init().map_err(|err| SourceError::unavailable(&device, err))?;

            let description = settings.pipeline_description();
            log::debug!("CsiSource: launching pipeline: {}", description);
            let pipeline = gstreamer::parse::launch(&description)
                .map_err(|err| SourceError::unavailable(&device, err))?
                .downcast::<gstreamer::Pipeline>()
                .map_err(|_| SourceError::unavailable(&device, "pipeline is not a Pipeline"))?;

            let appsink = pipeline
                .by_name("appsink")
                .ok_or_else(|| SourceError::unavailable(&device, "appsink element missing"))?
                .downcast::<gstreamer_app::AppSink>()
                .map_err(|_| {
                    SourceError::unavailable(&device, "appsink element has unexpected type")
                })?;
            appsink.set_max_buffers(1);
            appsink.set_drop(true);
            appsink.set_sync(false);

            if let Err(err) = pipeline.set_state(gstreamer::State::Playing) {
                let _ = pipeline.set_state(gstreamer::State::Null);
                return Err(SourceError::unavailable(&device, err));
            }
            let (result, _, _) = pipeline.state(clock_time(read_timeout));
            if let Err(err) = result {
                let _ = pipeline.set_state(gstreamer::State::Null);
                return Err(SourceError::unavailable(&device, err));
            }

            let source = Self {
                settings: settings.clone(),
                pipeline,
                appsink,
                read_timeout,
                frame_count: 0,
            };
            if let Err(err) = source.poll_bus() {
                let _ = source.pipeline.set_state(gstreamer::State::Null);
                return Err(SourceError::unavailable(&device, err));
            }
            log::info!(
                "CsiSource: opened {} ({}x{}@{})",
                device,
                settings.width,
                settings.height,
                settings.fps
            );
            source.log_negotiated_caps();
            Ok(source)
        }

        /// Log what the sink actually negotiated, which can differ from the
        /// requested size and rate.
        fn log_negotiated_caps(&self) {
            let caps = self
                .appsink
                .static_pad("sink")
                .and_then(|pad| pad.current_caps());
            let Some(caps) = caps else {
                log::debug!("CsiSource: caps not negotiated yet");
                return;
            };
            match gstreamer_video::VideoInfo::from_caps(&caps) {
                Ok(info) => log::debug!(
                    "CsiSource: negotiated {}x{} @ {}/{} fps, format {:?}, stride {}",
                    info.width(),
                    info.height(),
                    info.fps().numer(),
                    info.fps().denom(),
                    info.format(),
                    info.stride()[0]
                ),
                Err(_) => log::debug!("CsiSource: negotiated caps {}", caps),
            }
        }

        fn poll_bus(&self) -> Result<(), SourceError> {
            let Some(bus) = self.pipeline.bus() else {
                return Ok(());
            };
            while let Some(message) = bus.pop() {
                use gstreamer::MessageView;
                match message.view() {
                    MessageView::Error(err) => {
                        return Err(SourceError::Read(format!(
                            "gstreamer error from {:?}: {}",
                            err.src().map(|s| s.path_string()),
                            err.error()
                        )));
                    }
                    MessageView::Eos(..) => {
                        return Err(SourceError::Read("gstreamer reached EOS".to_string()));
                    }
                    _ => {}
                }
            }
            Ok(())
        }
    }

    impl CameraSource for CsiSource {
        fn describe(&self) -> String {
            format!("csi://{}", self.settings.sensor_id)
        }

        fn layout(&self) -> PixelLayout {
            PixelLayout::Rgba32
        }

        fn read_frame(&mut self) -> Result<RawFrame, SourceError> {
            self.poll_bus()?;
            let sample = self
                .appsink
                .try_pull_sample(clock_time(self.read_timeout))
                .ok_or(SourceError::NoFrame)?;
            let frame = sample_to_frame(&sample)?;
            self.frame_count += 1;
            Ok(frame)
        }

        fn release(&mut self) -> Result<(), SourceError> {
            self.pipeline
                .set_state(gstreamer::State::Null)
                .map_err(|err| SourceError::Release(err.to_string()))?;
            log::debug!(
                "CsiSource: released {} after {} frames",
                self.describe(),
                self.frame_count
            );
            Ok(())
        }
    }

    fn clock_time(duration: Duration) -> gstreamer::ClockTime {
        gstreamer::ClockTime::from_mseconds(duration.as_millis() as u64)
    }

    fn log_element_availability() {
        for name in ["nvarguscamerasrc", "nvvidconv", "appsink"] {
            match gstreamer::ElementFactory::find(name) {
                Some(factory) => log::debug!(
                    "CsiSource diagnostics: element {} available (plugin {})",
                    name,
                    factory
                        .plugin_name()
                        .map(|plugin| plugin.to_string())
                        .unwrap_or_else(|| "?".to_string())
                ),
                None => log::debug!("CsiSource diagnostics: element {} NOT FOUND", name),
            }
        }
    }

    /// Run the capture chain into a fakesink for one buffer and log how it
    /// ends. Argus reports the underlying cause on the bus here.
    fn log_fakesink_run(settings: &CsiSettings, timeout: Duration) {
        let description = settings.fakesink_pipeline_description();
        log::debug!("CsiSource diagnostics: testing pipeline: {}", description);
        let pipeline = match gstreamer::parse::launch(&description) {
            Ok(pipeline) => pipeline,
            Err(err) => {
                log::debug!("CsiSource diagnostics: test pipeline did not parse: {}", err);
                return;
            }
        };
        if let Err(err) = pipeline.set_state(gstreamer::State::Playing) {
            log::debug!("CsiSource diagnostics: test pipeline failed to start: {}", err);
        }
        let outcome = pipeline.bus().and_then(|bus| {
            bus.timed_pop_filtered(
                clock_time(timeout),
                &[gstreamer::MessageType::Error, gstreamer::MessageType::Eos],
            )
        });
        match outcome.as_ref().map(|message| message.view()) {
            Some(gstreamer::MessageView::Error(err)) => log::debug!(
                "CsiSource diagnostics: test pipeline error from {:?}: {} ({:?})",
                err.src().map(|s| s.path_string()),
                err.error(),
                err.debug()
            ),
            Some(_) => log::debug!("CsiSource diagnostics: test pipeline produced a buffer"),
            None => log::debug!(
                "CsiSource diagnostics: test pipeline gave no result within {:?}",
                timeout
            ),
        }
        let _ = pipeline.set_state(gstreamer::State::Null);
    }

    fn sample_to_frame(sample: &gstreamer::Sample) -> Result<RawFrame, SourceError> {
        let buffer = sample
            .buffer()
            .ok_or_else(|| SourceError::Read("sample missing buffer".to_string()))?;
        let caps = sample
            .caps()
            .ok_or_else(|| SourceError::Read("sample missing caps".to_string()))?;
        let info = gstreamer_video::VideoInfo::from_caps(caps)
            .map_err(|err| SourceError::Read(format!("parse caps as video info: {}", err)))?;

        let width = info.width();
        let height = info.height();
        let stride = usize::try_from(info.stride()[0])
            .map_err(|_| SourceError::Read("negative buffer stride".to_string()))?;

        let map = buffer
            .map_readable()
            .map_err(|err| SourceError::Read(format!("map buffer: {}", err)))?;
        RawFrame::from_strided(map.as_slice(), width, height, stride, PixelLayout::Rgba32)
            .ok_or_else(|| {
                SourceError::Read(format!(
                    "buffer of {} bytes is too short for {}x{} at stride {}",
                    map.size(),
                    width,
                    height,
                    stride
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> CsiSettings {
        CsiSettings {
            sensor_id: 0,
            sensor_mode: None,
            width: 1280,
            height: 720,
            fps: 30,
            flip: 0,
        }
    }

    #[test]
    fn pipeline_without_sensor_mode() {
        let description = settings().pipeline_description();
        assert_eq!(
            description,
            "nvarguscamerasrc sensor-id=0 ! \
             video/x-raw(memory:NVMM), width=1280, height=720, framerate=30/1 ! \
             nvvidconv flip-method=0 ! video/x-raw, format=RGBA ! \
             appsink name=appsink drop=true max-buffers=1 sync=false"
        );
    }

    #[test]
    fn pipeline_passes_sensor_mode_and_flip_through() {
        let settings = CsiSettings {
            sensor_id: 1,
            sensor_mode: Some(4),
            flip: 7,
            ..settings()
        };
        let description = settings.pipeline_description();
        assert!(description.starts_with("nvarguscamerasrc sensor-id=1 sensor-mode=4 ! "));
        assert!(description.contains("nvvidconv flip-method=7"));
    }

    #[test]
    fn fakesink_pipeline_keeps_the_capture_chain() {
        let settings = CsiSettings {
            sensor_mode: Some(1),
            ..settings()
        };
        let test_pipeline = settings.fakesink_pipeline_description();
        let (chain, sink) = test_pipeline
            .rsplit_once(" ! ")
            .expect("pipeline has a sink");

        assert_eq!(sink, "fakesink num-buffers=1 sync=false");
        assert!(!test_pipeline.contains("appsink"));
        assert!(settings.pipeline_description().starts_with(&format!("{} ! appsink ", chain)));
    }

    #[test]
    fn sensor_id_from_identifier_wins() {
        let config = CaptureConfig {
            sensor_id: 0,
            flip: 2,
            ..CaptureConfig::default()
        };
        let settings = CsiSettings::from_config(&config, Some(3));
        assert_eq!(settings.sensor_id, 3);
        assert_eq!(settings.flip, 2);
        assert_eq!(CsiSettings::from_config(&config, None).sensor_id, 0);
    }
}
