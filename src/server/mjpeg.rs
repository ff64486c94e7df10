//! multipart/x-mixed-replace framing and the per-connection stream loop.

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::cache::FrameCache;
use crate::frame::EncodedFrame;

use super::http::write_stream_head;

/// Random boundary token, fixed for the life of one server.
pub fn new_boundary() -> String {
    format!("camstream-{}", hex::encode(rand::random::<[u8; 8]>()))
}

/// Write one part. Header and payload go out in a single write so a part is
/// never interleaved with a partial header.
pub(crate) fn write_part<W: Write>(
    out: &mut W,
    boundary: &str,
    frame: &EncodedFrame,
) -> io::Result<()> {
    let header = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        boundary,
        frame.len()
    );
    let mut part = Vec::with_capacity(header.len() + frame.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(frame.as_bytes());
    part.extend_from_slice(b"\r\n");
    out.write_all(&part)?;
    out.flush()
}

/// Errors that mean the viewer went away, including a write that timed out.
pub(crate) fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::WriteZero
            | io::ErrorKind::TimedOut
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::NotConnected
    )
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    ClientDisconnected { parts: u64 },
    Shutdown { parts: u64 },
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct StreamPacing {
    pub poll_interval: Duration,
    pub keepalive_interval: Duration,
}

/// Stream the cache to `out` until the client disconnects or `shutdown` is
/// raised. A part is written for every new sequence number, and the current
/// frame is re-sent once `keepalive_interval` passes without a write.
pub(crate) fn serve<W: Write>(
    out: &mut W,
    cache: &FrameCache,
    boundary: &str,
    shutdown: &AtomicBool,
    pacing: StreamPacing,
) -> io::Result<StreamEnd> {
    let mut parts = 0u64;
    if let Err(err) = write_stream_head(out, boundary) {
        return disconnect_or(err, parts);
    }

    let mut last_sequence = None;
    let mut last_write = Instant::now();
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return Ok(StreamEnd::Shutdown { parts });
        }

        let due = cache.latest().filter(|published| {
            last_sequence != Some(published.sequence)
                || last_write.elapsed() >= pacing.keepalive_interval
        });
        let Some(published) = due else {
            thread::sleep(pacing.poll_interval);
            continue;
        };

        if let Err(err) = write_part(out, boundary, &published.frame) {
            return disconnect_or(err, parts);
        }
        parts += 1;
        last_sequence = Some(published.sequence);
        last_write = Instant::now();
    }
}

fn disconnect_or(err: io::Error, parts: u64) -> io::Result<StreamEnd> {
    if is_disconnect(&err) {
        Ok(StreamEnd::ClientDisconnected { parts })
    } else {
        Err(err)
    }
}
