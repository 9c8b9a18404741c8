//! WebSocket proxy engine: connects to the backend terminal service,
//! performs the backend-side WebSocket handshake, then forwards bytes
//! bidirectionally between the client and backend sockets.
//!
//! The original uses Linux `splice()` for zero-copy forwarding with a
//! buffered read/write fallback for other platforms. No crate in this
//! project's dependency stack wraps `splice()`, and reaching for raw
//! `libc` FFI for a single syscall would be a one-off unfamiliar to the
//! rest of the stack, so only the buffered path is implemented here; this
//! drops a platform-specific optimization, not a behavior.

use std::time::Duration;

use base64::Engine;
use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::errors::GatewayError;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_READ_BUF: usize = 64 * 1024;

/// Resolves `host:port` and connects, off the async runtime thread
/// (`ToSocketAddrs` resolution can block on DNS), matching the original's
/// synchronous `gethostbyname` fallback after a fast `inet_pton` attempt.
pub async fn connect_to_backend(host: &str, port: u16) -> Result<TcpStream, GatewayError> {
    let target = format!("{host}:{port}");
    let stream = tokio::task::spawn_blocking(move || std::net::TcpStream::connect(&target))
        .await
        .map_err(|_| GatewayError::Backend("backend connect task panicked".into()))?
        .map_err(|e| GatewayError::Backend(e.to_string()))?;
    stream
        .set_nonblocking(true)
        .map_err(|e| GatewayError::Backend(e.to_string()))?;
    let stream =
        TcpStream::from_std(stream).map_err(|e| GatewayError::Backend(e.to_string()))?;
    stream
        .set_nodelay(true)
        .map_err(|e| GatewayError::Backend(e.to_string()))?;
    Ok(stream)
}

fn random_ws_key() -> String {
    let mut raw = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut raw);
    base64::engine::general_purpose::STANDARD.encode(raw)
}

/// Sends the backend-side WebSocket handshake request over `stream`.
pub async fn send_backend_handshake(stream: &mut TcpStream, path: &str) -> Result<(), GatewayError> {
    let key = random_ws_key();
    let request = format!(
        "GET {path} HTTP/1.1\r\n\
         Host: terminal\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Key: {key}\r\n\
         Sec-WebSocket-Version: 13\r\n\
         \r\n"
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|e| GatewayError::Backend(e.to_string()))
}

/// Reads from `stream` until the backend's handshake response headers are
/// fully buffered, then checks for a `101` status line. Returns any bytes
/// read past the header terminator so they aren't dropped from the
/// ensuing data stream.
pub async fn read_backend_handshake_response(
    stream: &mut TcpStream,
) -> Result<Vec<u8>, GatewayError> {
    let mut buf = vec![0u8; HANDSHAKE_READ_BUF];
    let mut filled = 0;

    let deadline = tokio::time::sleep(HANDSHAKE_TIMEOUT);
    tokio::pin!(deadline);

    loop {
        if let Some(header_end) = find_header_end(&buf[..filled]) {
            let status_line = &buf[..filled.min(12)];
            if !status_line.starts_with(b"HTTP/1.1 101") {
                return Err(GatewayError::Backend(
                    "backend did not accept websocket upgrade".into(),
                ));
            }
            return Ok(buf[header_end..filled].to_vec());
        }
        if filled == buf.len() {
            return Err(GatewayError::Backend("backend handshake too large".into()));
        }

        tokio::select! {
            result = stream.read(&mut buf[filled..]) => {
                let n = result.map_err(|e| GatewayError::Backend(e.to_string()))?;
                if n == 0 {
                    return Err(GatewayError::Backend("backend closed during handshake".into()));
                }
                filled += n;
            }
            _ = &mut deadline => {
                return Err(GatewayError::Backend("backend handshake timed out".into()));
            }
        }
    }
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n").map(|p| p + 4)
}

/// Forwards bytes bidirectionally between `client` and `backend` until
/// either side closes or errors. Leftover bytes already read from the
/// backend during handshake parsing are flushed to the client first.
pub async fn forward(
    client: &mut TcpStream,
    backend: &mut TcpStream,
    backend_leftover: &[u8],
) -> Result<(), GatewayError> {
    if !backend_leftover.is_empty() {
        client
            .write_all(backend_leftover)
            .await
            .map_err(|e| GatewayError::Backend(e.to_string()))?;
    }

    let mut client_buf = vec![0u8; 64 * 1024];
    let mut backend_buf = vec![0u8; 64 * 1024];

    loop {
        tokio::select! {
            result = client.read(&mut client_buf) => {
                let n = result.map_err(|e| GatewayError::Backend(e.to_string()))?;
                if n == 0 {
                    return Ok(());
                }
                backend.write_all(&client_buf[..n]).await
                    .map_err(|e| GatewayError::Backend(e.to_string()))?;
            }
            result = backend.read(&mut backend_buf) => {
                let n = result.map_err(|e| GatewayError::Backend(e.to_string()))?;
                if n == 0 {
                    return Ok(());
                }
                client.write_all(&backend_buf[..n]).await
                    .map_err(|e| GatewayError::Backend(e.to_string()))?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_header_terminator() {
        let buf = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\nleftover";
        let end = find_header_end(buf).unwrap();
        assert_eq!(&buf[end..], b"leftover");
    }

    #[test]
    fn header_end_absent_when_incomplete() {
        let buf = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: web";
        assert_eq!(find_header_end(buf), None);
    }

    #[tokio::test]
    async fn handshake_request_has_expected_shape() {
        // send_backend_handshake writes through a real socket pair so we
        // exercise the exact bytes placed on the wire.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client_task = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            send_backend_handshake(&mut stream, "/ws").await.unwrap();
        });
        let (mut server_side, _) = listener.accept().await.unwrap();
        client_task.await.unwrap();

        let mut buf = vec![0u8; 1024];
        let n = server_side.read(&mut buf).await.unwrap();
        let text = String::from_utf8_lossy(&buf[..n]);
        assert!(text.starts_with("GET /ws HTTP/1.1\r\n"));
        assert!(text.contains("Sec-WebSocket-Key:"));
        assert!(text.contains("Sec-WebSocket-Version: 13"));
    }
}
