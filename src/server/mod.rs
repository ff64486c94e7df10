//! HTTP server for the latest camera frame.
//!
//! Routes:
//! - `GET /` and `/index.html`: viewer page
//! - `GET /snapshot.jpg`: the current frame, or 503 before the first one
//! - `GET /stream.mjpg`: multipart/x-mixed-replace stream of frames
//!
//! Every connection gets its own thread. A stalled viewer only blocks its
//! own thread, up to the socket write timeout.

mod http;
mod mjpeg;

pub use mjpeg::{new_boundary, StreamEnd};

use anyhow::{anyhow, Context, Result};
use std::net::{IpAddr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::cache::FrameCache;

use http::{read_request, write_error, write_response, write_response_with_headers};
use mjpeg::StreamPacing;

const ACCEPT_IDLE_SLEEP: Duration = Duration::from_millis(25);

const INDEX_HTML: &str = "<html><head><title>Camera Stream</title></head><body>\
<h3>Live MJPEG Stream</h3>\
<img src=\"/stream.mjpg\" style=\"max-width:100%;\"/>\
<p><a href=\"/snapshot.jpg\">Snapshot</a></p>\
</body></html>";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Sleep between cache checks in a stream loop.
    pub poll_interval: Duration,
    /// Limit on receiving the request head.
    pub read_timeout: Duration,
    /// Socket write timeout; a viewer that stops reading is dropped after it.
    pub write_timeout: Duration,
    /// Re-send the current frame after this long without a new one.
    pub keepalive_interval: Duration,
    /// How long `ServerHandle::stop` waits for connection threads.
    pub shutdown_timeout: Duration,
    pub log_requests: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            poll_interval: Duration::from_millis(10),
            read_timeout: Duration::from_secs(2),
            write_timeout: Duration::from_secs(5),
            keepalive_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(2),
            log_requests: false,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .bind
            .parse()
            .with_context(|| format!("invalid bind address '{}'", self.bind))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

struct ServerContext {
    cfg: ServerConfig,
    cache: Arc<FrameCache>,
    boundary: String,
    shutdown: AtomicBool,
    connections: AtomicUsize,
}

/// Decrements the live connection count when a connection thread ends,
/// including by panic.
struct ConnectionGuard {
    ctx: Arc<ServerContext>,
}

impl ConnectionGuard {
    fn enter(ctx: Arc<ServerContext>) -> Self {
        ctx.connections.fetch_add(1, Ordering::SeqCst);
        Self { ctx }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.ctx.connections.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Index,
    Snapshot,
    Stream,
    NotFound,
}

impl Route {
    fn from_path(path: &str) -> Self {
        match path {
            "/" | "/index.html" => Route::Index,
            "/snapshot.jpg" => Route::Snapshot,
            "/stream.mjpg" => Route::Stream,
            _ => Route::NotFound,
        }
    }
}

pub struct ServerHandle {
    pub addr: SocketAddr,
    pub boundary: String,
    ctx: Arc<ServerContext>,
    join: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Connections currently being served, streams included.
    pub fn active_connections(&self) -> usize {
        self.ctx.connections.load(Ordering::SeqCst)
    }

    /// Stop accepting, then wait up to the shutdown timeout for connection
    /// threads to finish. Returns how many were still running; those exit on
    /// their next loop check.
    pub fn stop(mut self) -> Result<usize> {
        self.ctx.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("stream server thread panicked"))?;
        }

        let deadline = Instant::now() + self.ctx.cfg.shutdown_timeout;
        let mut remaining = self.active_connections();
        while remaining > 0 && Instant::now() < deadline {
            thread::sleep(self.ctx.cfg.poll_interval);
            remaining = self.active_connections();
        }
        if remaining > 0 {
            log::warn!(
                "stream server stopped with {} connection(s) still open after {:?}",
                remaining,
                self.ctx.cfg.shutdown_timeout
            );
        } else {
            log::info!("stream server stopped");
        }
        Ok(remaining)
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.ctx.shutdown.store(true, Ordering::SeqCst);
    }
}

pub struct StreamServer {
    cfg: ServerConfig,
    cache: Arc<FrameCache>,
}

impl StreamServer {
    pub fn new(cfg: ServerConfig, cache: Arc<FrameCache>) -> Self {
        Self { cfg, cache }
    }

    pub fn spawn(self) -> Result<ServerHandle> {
        let configured_addr = self.cfg.socket_addr()?;
        let listener = TcpListener::bind(configured_addr)
            .with_context(|| format!("failed to bind stream server on {}", configured_addr))?;
        let addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let boundary = new_boundary();
        let ctx = Arc::new(ServerContext {
            cfg: self.cfg,
            cache: self.cache,
            boundary: boundary.clone(),
            shutdown: AtomicBool::new(false),
            connections: AtomicUsize::new(0),
        });

        let thread_ctx = ctx.clone();
        let join = thread::Builder::new()
            .name("camstream-http".into())
            .spawn(move || {
                if let Err(err) = run_server(listener, thread_ctx) {
                    log::error!("stream server stopped: {}", err);
                }
            })
            .context("failed to spawn stream server thread")?;

        log::info!("stream server listening on http://{}/", addr);
        Ok(ServerHandle {
            addr,
            boundary,
            ctx,
            join: Some(join),
        })
    }
}

fn run_server(listener: TcpListener, ctx: Arc<ServerContext>) -> Result<()> {
    loop {
        if ctx.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, peer)) => {
                let guard = ConnectionGuard::enter(ctx.clone());
                let spawned = thread::Builder::new()
                    .name("camstream-conn".into())
                    .spawn(move || {
                        let guard = guard;
                        if let Err(err) = handle_connection(stream, peer, &guard.ctx) {
                            log::warn!("request from {} failed: {}", peer, err);
                        }
                    });
                if let Err(err) = spawned {
                    log::warn!("failed to spawn connection thread for {}: {}", peer, err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_IDLE_SLEEP);
                continue;
            }
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                log::warn!("accept failed: {}", err);
                thread::sleep(ACCEPT_IDLE_SLEEP);
            }
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, peer: SocketAddr, ctx: &ServerContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(ctx.cfg.read_timeout))?;
    stream.set_write_timeout(Some(ctx.cfg.write_timeout))?;
    let _ = stream.set_nodelay(true);

    let request = match read_request(&mut stream) {
        Ok(request) => request,
        Err(err) => {
            let _ = write_error(&mut stream, 400, "Bad Request");
            return Err(err.context("malformed request"));
        }
    };
    if ctx.cfg.log_requests {
        log::info!(
            "{} {} from {} ({})",
            request.method,
            request.path,
            peer,
            request.header("user-agent").unwrap_or("-")
        );
    }

    if request.method != "GET" {
        write_response_with_headers(
            &mut stream,
            405,
            "text/plain; charset=utf-8",
            &[("Allow", "GET")],
            b"Method Not Allowed",
        )?;
        return Ok(());
    }

    match Route::from_path(&request.path) {
        Route::Index => {
            write_response(
                &mut stream,
                200,
                "text/html; charset=utf-8",
                INDEX_HTML.as_bytes(),
            )?;
        }
        Route::Snapshot => match ctx.cache.read() {
            Some(frame) => write_response(&mut stream, 200, "image/jpeg", frame.as_bytes())?,
            None => write_error(&mut stream, 503, "No frame available yet")?,
        },
        Route::Stream => {
            let pacing = StreamPacing {
                poll_interval: ctx.cfg.poll_interval,
                keepalive_interval: ctx.cfg.keepalive_interval,
            };
            match mjpeg::serve(&mut stream, &ctx.cache, &ctx.boundary, &ctx.shutdown, pacing)? {
                StreamEnd::ClientDisconnected { parts } => {
                    log::debug!("stream viewer {} disconnected after {} parts", peer, parts);
                }
                StreamEnd::Shutdown { parts } => {
                    log::debug!("stream to {} closed by shutdown after {} parts", peer, parts);
                }
            }
        }
        Route::NotFound => write_error(&mut stream, 404, "Not Found")?,
    }
    Ok(())
}
