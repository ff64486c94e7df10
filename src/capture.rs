//! Capture loop: the single writer to the frame cache.
//!
//! Runs on its own thread. Each iteration reads one frame, encodes it and
//! publishes it. Read and encode failures are counted and logged; neither
//! ends the loop. Only `CaptureHandle::stop` does.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::cache::FrameCache;
use crate::config::CaptureConfig;
use crate::encode::FrameEncoder;
use crate::ingest::CameraSource;

const DEFAULT_BACKOFF: Duration = Duration::from_millis(10);

/// Timing of the capture loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoopSettings {
    /// Minimum time between the starts of two iterations that obtained a
    /// frame. `None` runs as fast as the source delivers.
    pub frame_interval: Option<Duration>,
    /// Sleep after a failed read.
    pub backoff: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            frame_interval: None,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

impl LoopSettings {
    pub fn from_config(config: &CaptureConfig) -> Self {
        Self {
            frame_interval: config.frame_interval(),
            backoff: config.backoff,
        }
    }
}

/// Counters reported by a running capture loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_published: u64,
    pub read_failures: u64,
    pub encode_failures: u64,
}

#[derive(Default)]
struct Counters {
    frames_published: AtomicU64,
    read_failures: AtomicU64,
    encode_failures: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> CaptureStats {
        CaptureStats {
            frames_published: self.frames_published.load(Ordering::Relaxed),
            read_failures: self.read_failures.load(Ordering::Relaxed),
            encode_failures: self.encode_failures.load(Ordering::Relaxed),
        }
    }
}

/// Stop flag whose sleeps wake early when the flag is raised.
#[derive(Default)]
struct StopSignal {
    raised: Mutex<bool>,
    wake: Condvar,
}

impl StopSignal {
    fn raise(&self) {
        *self.raised.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.wake.notify_all();
    }

    fn is_raised(&self) -> bool {
        *self.raised.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `duration` or until raised. Returns true if raised.
    fn sleep(&self, duration: Duration) -> bool {
        let guard = self.raised.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .wake
            .wait_timeout_while(guard, duration, |raised| !*raised)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

/// A capture loop ready to be spawned.
pub struct CaptureLoop {
    source: Box<dyn CameraSource>,
    encoder: FrameEncoder,
    cache: Arc<FrameCache>,
    settings: LoopSettings,
}

impl CaptureLoop {
    pub fn new(
        source: Box<dyn CameraSource>,
        encoder: FrameEncoder,
        cache: Arc<FrameCache>,
        settings: LoopSettings,
    ) -> Self {
        Self {
            source,
            encoder,
            cache,
            settings,
        }
    }

    /// Start the loop on a dedicated thread. The source moves to that thread
    /// and is released there when the loop ends.
    pub fn spawn(self) -> Result<CaptureHandle> {
        let stop = Arc::new(StopSignal::default());
        let counters = Arc::new(Counters::default());
        let (done_tx, done_rx) = mpsc::channel();

        let thread_stop = stop.clone();
        let thread_counters = counters.clone();
        let join = thread::Builder::new()
            .name("camstream-capture".into())
            .spawn(move || {
                self.run(&thread_stop, &thread_counters);
                let _ = done_tx.send(());
            })
            .context("failed to spawn capture thread")?;

        Ok(CaptureHandle {
            stop,
            counters,
            done: done_rx,
            join: Some(join),
        })
    }

    fn run(mut self, stop: &StopSignal, counters: &Counters) {
        let source_name = self.source.describe();
        log::info!(
            "capture loop started on {} (quality {}, interval {:?})",
            source_name,
            self.encoder.quality(),
            self.settings.frame_interval
        );

        while !stop.is_raised() {
            let started = Instant::now();
            let frame = match self.source.read_frame() {
                Ok(frame) => frame,
                Err(err) => {
                    counters.read_failures.fetch_add(1, Ordering::Relaxed);
                    log::debug!("capture read failed on {}: {}", source_name, err);
                    if stop.sleep(self.settings.backoff) {
                        break;
                    }
                    continue;
                }
            };

            match self.encoder.encode(&frame) {
                Ok(encoded) => {
                    self.cache.publish(encoded);
                    counters.frames_published.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    let failures = counters.encode_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    log::debug!("frame encode failed ({} so far): {}", failures, err);
                }
            }
            drop(frame);

            if let Some(interval) = self.settings.frame_interval {
                let remaining = interval.saturating_sub(started.elapsed());
                if !remaining.is_zero() && stop.sleep(remaining) {
                    break;
                }
            }
        }

        if let Err(err) = self.source.release() {
            log::warn!("releasing {} failed: {}", source_name, err);
        }
        let stats = counters.snapshot();
        log::info!(
            "capture loop stopped on {}: {} published, {} read failures, {} encode failures",
            source_name,
            stats.frames_published,
            stats.read_failures,
            stats.encode_failures
        );
    }
}

/// Handle to a running capture loop. Dropping it signals the loop to stop
/// without waiting.
pub struct CaptureHandle {
    stop: Arc<StopSignal>,
    counters: Arc<Counters>,
    done: mpsc::Receiver<()>,
    join: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn stats(&self) -> CaptureStats {
        self.counters.snapshot()
    }

    /// True once the loop thread has exited (normally or by panic).
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, |join| join.is_finished())
    }

    /// Signal the loop to stop and wait up to `timeout` for it to exit and
    /// release its source. Returns the final counters.
    pub fn stop(mut self, timeout: Duration) -> Result<CaptureStats> {
        self.stop.raise();
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(join) = self.join.take() {
                    join.join()
                        .map_err(|_| anyhow!("capture thread panicked"))?;
                }
                Ok(self.stats())
            }
            Err(RecvTimeoutError::Timeout) => Err(anyhow!(
                "capture loop did not stop within {:?}; leaving it to finish on its own",
                timeout
            )),
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop.raise();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::frame::{PixelLayout, RawFrame};

    struct BrokenSource;

    impl CameraSource for BrokenSource {
        fn describe(&self) -> String {
            "broken".to_string()
        }

        fn layout(&self) -> PixelLayout {
            PixelLayout::Rgb24
        }

        fn read_frame(&mut self) -> Result<RawFrame, SourceError> {
            Err(SourceError::Read("sensor offline".to_string()))
        }
    }

    #[test]
    fn stop_signal_sleep_wakes_early() {
        let signal = Arc::new(StopSignal::default());
        let raiser = signal.clone();
        let started = Instant::now();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            raiser.raise();
        });

        assert!(signal.sleep(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(2));
        handle.join().expect("raiser thread");
    }

    #[test]
    fn stop_signal_sleep_times_out_when_not_raised() {
        let signal = StopSignal::default();
        let started = Instant::now();
        assert!(!signal.sleep(Duration::from_millis(20)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn read_failures_never_end_the_loop() -> Result<()> {
        let cache = Arc::new(FrameCache::new());
        let handle = CaptureLoop::new(
            Box::new(BrokenSource),
            FrameEncoder::new(80, PixelLayout::Rgb24),
            cache.clone(),
            LoopSettings {
                frame_interval: None,
                backoff: Duration::from_millis(5),
            },
        )
        .spawn()?;

        thread::sleep(Duration::from_millis(100));
        assert!(!handle.is_finished());
        let stats = handle.stop(Duration::from_secs(2))?;

        assert!(stats.read_failures > 1);
        assert_eq!(stats.frames_published, 0);
        assert!(cache.read().is_none());
        Ok(())
    }
}
