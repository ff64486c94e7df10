//! camstream - serve a camera as an MJPEG stream over HTTP
//!
//! Opens the configured camera, starts the capture loop and the stream
//! server, then waits for Ctrl-C. Settings come from defaults, an optional
//! config file, the environment and finally these flags.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use camstream::{
    open_source, CaptureLoop, FrameCache, FrameEncoder, LoopSettings, StreamServer,
    StreamerConfig,
};

const STATS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve a camera as an MJPEG stream over HTTP")]
struct Args {
    /// Config file (.toml, otherwise JSON).
    #[arg(long, env = "CAMSTREAM_CONFIG")]
    config: Option<PathBuf>,

    /// Camera source: stub://<name>, csi, csi://<sensor-id> or /dev/videoN.
    #[arg(long)]
    source: Option<String>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Frame rate requested from the camera.
    #[arg(long)]
    fps: Option<u32>,

    /// Capture pacing. 0 disables pacing.
    #[arg(long)]
    target_fps: Option<u32>,

    /// CSI flip method, passed to nvvidconv as-is.
    #[arg(long)]
    flip: Option<u32>,

    #[arg(long)]
    sensor_id: Option<u32>,

    #[arg(long)]
    sensor_mode: Option<u32>,

    /// JPEG quality (1-100).
    #[arg(long, value_parser = clap::value_parser!(u8).range(1..=100))]
    quality: Option<u8>,

    /// Address to listen on.
    #[arg(long)]
    bind: Option<String>,

    #[arg(long)]
    port: Option<u16>,

    /// Log one line per HTTP request.
    #[arg(long)]
    log_requests: bool,
}

impl Args {
    fn apply(&self, cfg: &mut StreamerConfig) {
        let capture = &mut cfg.capture;
        if let Some(source) = &self.source {
            capture.source = source.clone();
        }
        if let Some(width) = self.width {
            capture.width = width;
        }
        if let Some(height) = self.height {
            capture.height = height;
        }
        if let Some(fps) = self.fps {
            capture.fps = fps;
        }
        if let Some(target_fps) = self.target_fps {
            capture.target_fps = Some(target_fps);
        }
        if let Some(flip) = self.flip {
            capture.flip = flip;
        }
        if let Some(sensor_id) = self.sensor_id {
            capture.sensor_id = sensor_id;
        }
        if let Some(sensor_mode) = self.sensor_mode {
            capture.sensor_mode = Some(sensor_mode);
        }
        if let Some(quality) = self.quality {
            capture.jpeg_quality = quality;
        }

        let server = &mut cfg.server;
        if let Some(bind) = &self.bind {
            server.bind = bind.clone();
        }
        if let Some(port) = self.port {
            server.port = port;
        }
        if self.log_requests {
            server.log_requests = true;
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = StreamerConfig::load_from(args.config.as_deref())?;
    args.apply(&mut cfg);
    cfg.validate()?;

    let source = open_source(&cfg.capture).context("failed to open camera")?;
    let encoder = FrameEncoder::new(cfg.capture.jpeg_quality, source.layout());
    let cache = Arc::new(FrameCache::new());
    let capture = CaptureLoop::new(
        source,
        encoder,
        cache.clone(),
        LoopSettings::from_config(&cfg.capture),
    )
    .spawn()?;

    let server = match StreamServer::new(cfg.server.clone(), cache).spawn() {
        Ok(server) => server,
        Err(err) => {
            if let Err(stop_err) = capture.stop(cfg.capture.stop_timeout) {
                log::warn!("{}", stop_err);
            }
            return Err(err);
        }
    };
    log::info!(
        "camstream {} streaming {} ({}x{}@{}) on http://{}/stream.mjpg",
        env!("CARGO_PKG_VERSION"),
        cfg.capture.source,
        cfg.capture.width,
        cfg.capture.height,
        cfg.capture.fps,
        server.addr
    );

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|err| anyhow!("error setting Ctrl-C handler: {}", err))?;

    loop {
        match rx.recv_timeout(STATS_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                let stats = capture.stats();
                log::debug!(
                    "capture stats: published={} read_failures={} encode_failures={} viewers={}",
                    stats.frames_published,
                    stats.read_failures,
                    stats.encode_failures,
                    server.active_connections()
                );
                if capture.is_finished() {
                    log::error!("capture thread exited unexpectedly");
                    break;
                }
            }
        }
    }

    server.stop()?;
    match capture.stop(cfg.capture.stop_timeout) {
        Ok(stats) => log::info!(
            "capture stopped after {} frames ({} read failures, {} encode failures)",
            stats.frames_published,
            stats.read_failures,
            stats.encode_failures
        ),
        Err(err) => log::warn!("{}", err),
    }
    Ok(())
}
