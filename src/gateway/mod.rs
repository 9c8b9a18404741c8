//! Request router: the [`Handler`] implementation that ties the session
//! manager, password verifier, static file cache, and proxy engine
//! together into the routing table described by the component design.
//!
//! Routing order, evaluated once per request: `/api/*` goes to the JSON
//! API; a WebSocket upgrade to `/terminal-proxy` goes to the backend
//! proxy engine; any other WebSocket upgrade gets a plain echo; anything
//! else falls through to the static file cache.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::auth::PasswordVerifier;
use crate::limits::ProxyConfig;
use crate::proxy;
use crate::session::{self, SessionManager, Session, SESSION_ID_LEN};
use crate::staticfile::{StaticCache, StaticError};
use crate::ws::{self, Opcode, ParseOutcome};
use crate::{ConnectionData, Handled, Handler, Method, Request, Response, StatusCode};

/// What a WebSocket upgrade response committed this connection to; read by
/// [`Handler::on_upgrade`] once the 101 response has been flushed.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Upgrade {
    TerminalProxy,
    Echo,
}

/// Per-connection gateway state: which WebSocket target (if any) the most
/// recent request upgraded to.
pub struct GatewayState {
    pending_upgrade: Option<Upgrade>,
}

impl ConnectionData for GatewayState {
    fn new() -> Self {
        Self {
            pending_upgrade: None,
        }
    }

    fn reset(&mut self) {
        self.pending_upgrade = None;
    }
}

/// Telemetry counters sampled without locking, per the concurrency model's
/// "external reporting path could sample without locking" note.
#[derive(Default)]
pub struct Counters {
    pub active_connections: AtomicU64,
    pub total_requests: AtomicU64,
}

pub struct Gateway {
    sessions: Arc<Mutex<SessionManager>>,
    verifier: Arc<dyn PasswordVerifier>,
    password_hash: String,
    static_cache: StaticCache,
    proxy_config: ProxyConfig,
    compression: bool,
    pub counters: Counters,
}

/// How often the background task sweeps the session table for expired
/// entries, independent of the configured per-session timeout.
const SESSION_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(60);

impl Gateway {
    /// Builds the gateway and spawns its background session-sweep task.
    ///
    /// The sweep task only needs the session table, not the gateway as a
    /// whole, so it is spawned here against a private `Arc<Mutex<..>>`
    /// rather than requiring the caller to keep a handle to the gateway
    /// around (the [`Server`](crate::Server) builder takes ownership of
    /// its handler and never hands a reference back).
    pub fn new(
        sessions: SessionManager,
        verifier: Arc<dyn PasswordVerifier>,
        password_hash: String,
        static_dir: PathBuf,
        proxy_config: ProxyConfig,
        compression: bool,
    ) -> Self {
        let sessions = Arc::new(Mutex::new(sessions));

        let sweep_sessions = Arc::clone(&sessions);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(SESSION_SWEEP_INTERVAL).await;
                let removed = sweep_sessions.lock().await.sweep_expired();
                if removed > 0 {
                    tracing::debug!(removed, "session sweep evicted expired sessions");
                }
            }
        });

        Self {
            sessions,
            verifier,
            password_hash,
            static_cache: StaticCache::new(static_dir),
            proxy_config,
            compression,
            counters: Counters::default(),
        }
    }

    pub async fn active_sessions(&self) -> usize {
        self.sessions.lock().await.active_sessions()
    }
}

impl Handler<GatewayState> for Gateway {
    async fn handle(
        &self,
        data: &mut GatewayState,
        request: &Request,
        response: &mut Response,
    ) -> Handled {
        self.counters.total_requests.fetch_add(1, Ordering::Relaxed);

        let path = request.url().path().to_vec();

        if path.starts_with(b"/api/") {
            return self.handle_api(&path, request, response).await;
        }

        if is_websocket_upgrade(request) {
            data.pending_upgrade = Some(if path == b"/terminal-proxy" {
                Upgrade::TerminalProxy
            } else {
                Upgrade::Echo
            });
            return handle_ws_upgrade(request, response);
        }

        self.handle_static(&path, request, response).await
    }

    async fn on_upgrade(&self, data: &mut GatewayState, stream: &mut TcpStream) {
        match data.pending_upgrade.take() {
            Some(Upgrade::TerminalProxy) => self.run_terminal_proxy(stream).await,
            Some(Upgrade::Echo) => run_echo(stream).await,
            None => {}
        }
    }
}

// API handlers

impl Gateway {
    async fn handle_api(&self, path: &[u8], request: &Request, response: &mut Response) -> Handled {
        if path == b"/api/login" {
            return self.api_login(request, response).await;
        }

        let mut sessions = self.sessions.lock().await;
        let Some(session) = authenticated_session(request, &mut sessions) else {
            return unauthorized(response);
        };

        match (request.method(), path) {
            (Method::Post, b"/api/logout") => {
                let id = session.id;
                sessions.destroy(&id);
                drop(sessions);
                response
                    .status(StatusCode::Ok)
                    .header("set-cookie", "sessionId=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
                    .body(r#"{"success":true}"#)
            }
            (Method::Get, b"/api/terminal-config") => {
                let body = format!(
                    r#"{{"host":"{}","port":{}}}"#,
                    self.proxy_config.backend_host, self.proxy_config.backend_port
                );
                response
                    .status(StatusCode::Ok)
                    .header("content-type", "application/json")
                    .body(body)
            }
            (Method::Get, b"/api/session-status") => {
                let body = format!(
                    r#"{{"authenticated":true,"age_secs":{},"idle_secs":{}}}"#,
                    session.created.elapsed().as_secs(),
                    session.last_access.elapsed().as_secs(),
                );
                response
                    .status(StatusCode::Ok)
                    .header("content-type", "application/json")
                    .body(body)
            }
            _ => response
                .status(StatusCode::NotFound)
                .header("content-type", "application/json")
                .body(r#"{"error":"not found"}"#),
        }
    }

    async fn api_login(&self, request: &Request, response: &mut Response) -> Handled {
        let Some(password) = extract_json_field(request.body().unwrap_or(b""), "password") else {
            return response
                .status(StatusCode::BadRequest)
                .header("content-type", "application/json")
                .body(r#"{"success":false,"message":"Missing password"}"#);
        };

        let mut sessions = self.sessions.lock().await;
        let id = match session_id_from_request(request, &mut sessions) {
            Some(id) => id,
            None => {
                let Some(created) = sessions.create() else {
                    return response
                        .status(StatusCode::InternalServerError)
                        .header("content-type", "application/json")
                        .body(r#"{"success":false,"message":"Session error"}"#);
                };
                let id = created.id;
                response.header("set-cookie", session::set_cookie_header(&id));
                id
            }
        };

        if self.verifier.verify(&password, &self.password_hash) {
            sessions.authenticate(&id);
            response
                .status(StatusCode::Ok)
                .header("content-type", "application/json")
                .body(r#"{"success":true,"sessionInfo":{"expiresIn":"30 days","persistent":true}}"#)
        } else {
            response
                .status(StatusCode::Unauthorized)
                .header("content-type", "application/json")
                .body(r#"{"success":false,"message":"Invalid password"}"#)
        }
    }
}

fn handle_ws_upgrade(request: &Request, response: &mut Response) -> Handled {
    let Some(key) = request.header(b"sec-websocket-key") else {
        return response
            .status(StatusCode::BadRequest)
            .body("missing Sec-WebSocket-Key");
    };
    let Ok(key_str) = std::str::from_utf8(key) else {
        return response
            .status(StatusCode::BadRequest)
            .body("invalid Sec-WebSocket-Key");
    };

    let accept = ws::accept_key(key_str);
    response
        .status(StatusCode::SwitchingProtocols)
        .header("upgrade", "websocket")
        .header("connection", "Upgrade")
        .header("sec-websocket-accept", accept)
        .request_upgrade()
        .body(&b""[..])
}

fn unauthorized(response: &mut Response) -> Handled {
    response
        .status(StatusCode::Unauthorized)
        .header("content-type", "application/json")
        .body(r#"{"error":"unauthenticated","redirect":"/"}"#)
}

fn is_websocket_upgrade(request: &Request) -> bool {
    let Some(upgrade) = request.header(b"upgrade") else {
        return false;
    };
    request.header(b"sec-websocket-key").is_some() && upgrade.eq_ignore_ascii_case(b"websocket")
}

/// Resolves the `sessionId` cookie to a live, already-authenticated
/// session, refreshing its position in the expiry index on the way.
fn authenticated_session<'a>(
    request: &Request,
    sessions: &'a mut SessionManager,
) -> Option<&'a Session> {
    let id = session_id_from_request_ref(request)?;
    let session = sessions.find(id.as_bytes())?;
    session.authenticated.then_some(())?;
    sessions.find(id.as_bytes())
}

fn session_id_from_request(
    request: &Request,
    sessions: &mut SessionManager,
) -> Option<[u8; SESSION_ID_LEN]> {
    let id = session_id_from_request_ref(request)?;
    sessions.find(id.as_bytes()).map(|s| s.id)
}

fn session_id_from_request_ref(request: &Request) -> Option<String> {
    let cookie = request.header(b"cookie")?;
    let cookie_str = std::str::from_utf8(cookie).ok()?;
    session::session_id_from_cookie(cookie_str).map(|s| s.to_string())
}

fn extract_json_field(body: &[u8], field: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    value.get(field)?.as_str().map(|s| s.to_string())
}

// Static files

impl Gateway {
    async fn handle_static(&self, path: &[u8], request: &Request, response: &mut Response) -> Handled {
        if request.method() != Method::Get {
            return response
                .status(StatusCode::MethodNotAllowed)
                .body("method not allowed");
        }

        match self.static_cache.get(path).await {
            Ok(file) => {
                response
                    .status(StatusCode::Ok)
                    .header("content-type", file.content_type);

                if self.compression && accepts_gzip(request) {
                    let compressed = gzip(&file.body);
                    response.header("content-encoding", "gzip").body(compressed)
                } else {
                    response.body(file.body.as_slice())
                }
            }
            Err(StaticError::NotFound) => response
                .status(StatusCode::NotFound)
                .header("content-type", "application/json")
                .body(r#"{"error":"not found"}"#),
            Err(StaticError::PathTraversal) => response
                .status(StatusCode::Forbidden)
                .header("content-type", "application/json")
                .body(r#"{"error":"forbidden"}"#),
            Err(StaticError::Io) => response
                .status(StatusCode::InternalServerError)
                .header("content-type", "application/json")
                .body(r#"{"error":"internal error"}"#),
        }
    }
}

fn accepts_gzip(request: &Request) -> bool {
    request
        .header(b"accept-encoding")
        .map(|value| contains_token(value, b"gzip"))
        .unwrap_or(false)
}

fn contains_token(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w.eq_ignore_ascii_case(needle))
}

fn gzip(data: &[u8]) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("writing to an in-memory buffer never fails");
    encoder.finish().expect("writing to an in-memory buffer never fails")
}

// WebSocket proxy / echo, driven once a request's response has set
// `request_upgrade()` and the 101 bytes are already on the wire.

impl Gateway {
    async fn run_terminal_proxy(&self, client: &mut TcpStream) {
        let host = self.proxy_config.backend_host.clone();
        let port = self.proxy_config.backend_port;

        let mut backend = match proxy::connect_to_backend(&host, port).await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "terminal backend connect failed");
                close_with_error(client, &e).await;
                return;
            }
        };

        if let Err(e) = proxy::send_backend_handshake(&mut backend, &self.proxy_config.backend_path).await {
            tracing::warn!(error = %e, "terminal backend handshake send failed");
            close_with_error(client, &e).await;
            return;
        }

        let leftover = match proxy::read_backend_handshake_response(&mut backend).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(error = %e, "terminal backend handshake response invalid");
                close_with_error(client, &e).await;
                return;
            }
        };

        if let Err(e) = proxy::forward(client, &mut backend, &leftover).await {
            tracing::warn!(error = %e, "terminal proxy forwarding ended with an error");
        }
    }
}

async fn close_with_error(client: &mut TcpStream, error: &crate::errors::GatewayError) {
    let (code, reason) = error.as_ws_close();
    let mut out = Vec::new();
    ws::build_close_frame(code, reason.as_bytes(), &mut out);
    let _ = client.write_all(&out).await;
}

/// Loopback WebSocket echo, served for any upgrade that isn't
/// `/terminal-proxy` — used as a connectivity check independent of the
/// backend terminal service.
async fn run_echo(stream: &mut TcpStream) {
    let mut buf = vec![0u8; 64 * 1024];
    let mut filled = 0usize;

    loop {
        if filled == buf.len() {
            buf.resize(buf.len() * 2, 0);
        }
        let n = match stream.read(&mut buf[filled..]).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        filled += n;

        loop {
            match ws::parse_frame(&mut buf[..filled]) {
                ParseOutcome::NeedMore => break,
                ParseOutcome::Invalid => {
                    let mut out = Vec::new();
                    ws::build_close_frame(1002, b"", &mut out);
                    let _ = stream.write_all(&out).await;
                    return;
                }
                ParseOutcome::Frame {
                    opcode,
                    consumed,
                    payload_range,
                    ..
                } => {
                    match opcode {
                        Opcode::Close => {
                            let peer_payload = &buf[payload_range.clone()];
                            let code = if peer_payload.len() >= 2 {
                                u16::from_be_bytes([peer_payload[0], peer_payload[1]])
                            } else {
                                1000
                            };
                            let mut out = Vec::new();
                            ws::build_close_frame(code, b"", &mut out);
                            let _ = stream.write_all(&out).await;
                            return;
                        }
                        Opcode::Ping => {
                            let mut out = Vec::new();
                            ws::build_frame(Opcode::Pong, &buf[payload_range.clone()], &mut out);
                            if stream.write_all(&out).await.is_err() {
                                return;
                            }
                        }
                        Opcode::Text | Opcode::Binary => {
                            let mut out = Vec::new();
                            ws::build_frame(opcode, &buf[payload_range.clone()], &mut out);
                            if stream.write_all(&out).await.is_err() {
                                return;
                            }
                        }
                        Opcode::Pong => {}
                        Opcode::Continuation => {
                            let mut out = Vec::new();
                            ws::build_close_frame(1002, b"", &mut out);
                            let _ = stream.write_all(&out).await;
                            return;
                        }
                    }

                    buf.copy_within(consumed..filled, 0);
                    filled -= consumed;
                }
            }
        }
    }
}
