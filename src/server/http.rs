use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{self, Read, Write};

pub(crate) const MAX_REQUEST_BYTES: usize = 8192;

#[derive(Debug)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// Read the request line and headers. The body, if any, is ignored.
pub(crate) fn read_request<R: Read>(stream: &mut R) -> Result<HttpRequest> {
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    let text = String::from_utf8_lossy(&data);
    let mut lines = text.split("\r\n");
    let request_line = lines
        .next()
        .filter(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if line.is_empty() {
            break;
        }
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let path = raw_path.split('?').next().unwrap_or(raw_path).to_string();
    Ok(HttpRequest {
        method: method.to_string(),
        path,
        headers,
    })
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "HTTP/1.1 200 OK",
        400 => "HTTP/1.1 400 Bad Request",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        503 => "HTTP/1.1 503 Service Unavailable",
        _ => "HTTP/1.1 500 Internal Server Error",
    }
}

pub(crate) fn write_response<W: Write>(
    stream: &mut W,
    status: u16,
    content_type: &str,
    body: &[u8],
) -> io::Result<()> {
    write_response_with_headers(stream, status, content_type, &[], body)
}

pub(crate) fn write_response_with_headers<W: Write>(
    stream: &mut W,
    status: u16,
    content_type: &str,
    extra_headers: &[(&str, &str)],
    body: &[u8],
) -> io::Result<()> {
    let mut header = format!(
        "{status_line}\r\nContent-Type: {content_type}\r\nContent-Length: {len}\r\nCache-Control: no-store\r\nConnection: close\r\n",
        status_line = status_line(status),
        content_type = content_type,
        len = body.len()
    );
    for (name, value) in extra_headers {
        header.push_str(name);
        header.push_str(": ");
        header.push_str(value);
        header.push_str("\r\n");
    }
    header.push_str("\r\n");

    let mut out = Vec::with_capacity(header.len() + body.len());
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(body);
    stream.write_all(&out)?;
    stream.flush()
}

pub(crate) fn write_error<W: Write>(stream: &mut W, status: u16, message: &str) -> io::Result<()> {
    write_response(stream, status, "text/plain; charset=utf-8", message.as_bytes())
}

/// Response head of a multipart stream. No Content-Length; the body runs
/// until either side closes.
pub(crate) fn write_stream_head<W: Write>(stream: &mut W, boundary: &str) -> io::Result<()> {
    let header = format!(
        "{status_line}\r\nContent-Type: multipart/x-mixed-replace; boundary={boundary}\r\nCache-Control: no-cache, no-store, must-revalidate\r\nPragma: no-cache\r\nConnection: close\r\n\r\n",
        status_line = status_line(200),
        boundary = boundary
    );
    stream.write_all(header.as_bytes())?;
    stream.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn parses_request_line_and_headers() {
        let mut input =
            Cursor::new(b"GET /stream.mjpg?t=123 HTTP/1.1\r\nHost: cam.local\r\nUser-Agent: test\r\n\r\n".to_vec());
        let request = read_request(&mut input).expect("request");

        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/stream.mjpg");
        assert_eq!(request.header("host"), Some("cam.local"));
        assert_eq!(request.header("User-Agent"), Some("test"));
    }

    #[test]
    fn rejects_empty_and_oversized_requests() {
        let mut empty = Cursor::new(Vec::new());
        assert!(read_request(&mut empty).is_err());

        let mut huge = b"GET / HTTP/1.1\r\nX-Pad: ".to_vec();
        huge.extend(std::iter::repeat(b'a').take(MAX_REQUEST_BYTES + 1));
        let mut huge = Cursor::new(huge);
        let err = read_request(&mut huge).expect_err("oversized request");
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn response_carries_length_and_extra_headers() {
        let mut out = Vec::new();
        write_response_with_headers(&mut out, 405, "text/plain", &[("Allow", "GET")], b"nope")
            .expect("write");
        let text = String::from_utf8(out).expect("utf8");

        assert!(text.starts_with("HTTP/1.1 405 Method Not Allowed\r\n"));
        assert!(text.contains("Content-Length: 4\r\n"));
        assert!(text.contains("Allow: GET\r\n"));
        assert!(text.ends_with("\r\n\r\nnope"));
    }

    #[test]
    fn stream_head_names_the_boundary() {
        let mut out = Vec::new();
        write_stream_head(&mut out, "camstream-00ff").expect("write");
        let text = String::from_utf8(out).expect("utf8");

        assert!(text.contains("Content-Type: multipart/x-mixed-replace; boundary=camstream-00ff\r\n"));
        assert!(text.contains("Pragma: no-cache\r\n"));
        assert!(!text.contains("Content-Length"));
    }
}
