use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use reqwest::Url;
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use super::error::{BindError, ListenerError};
use super::payload::CredentialPayload;

/// Port the admin UI posts tokens to.
pub const DEFAULT_CALLBACK_PORT: u16 = 4242;
pub const DEFAULT_CALLBACK_PATH: &str = "/amplifyadminui/";

const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 64 * 1024;
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    NotStarted,
    Listening,
    Fulfilled,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub host: IpAddr,
    pub port: u16,
    pub callback_path: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_CALLBACK_PORT,
            callback_path: DEFAULT_CALLBACK_PATH.to_string(),
        }
    }
}

type DeliveryHook = Box<dyn FnOnce(CredentialPayload) + Send>;

/// One-shot local endpoint the browser posts the credential record to.
///
/// The owner drives the lifecycle: `start` binds before returning, `stop`
/// tears the socket down and waits until it is released. Only the first
/// well-formed delivery is accepted.
pub struct CallbackListener {
    config: ListenerConfig,
    shared: Arc<Shared>,
    local_addr: Option<SocketAddr>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    stops: usize,
}

impl CallbackListener {
    pub fn new(config: ListenerConfig, origin_url: &str) -> Self {
        let shared = Arc::new(Shared::new(origin_url, &config.callback_path));
        Self {
            config,
            shared,
            local_addr: None,
            shutdown: None,
            task: None,
            stops: 0,
        }
    }

    pub fn state(&self) -> ListenerState {
        *self.shared.state()
    }

    pub fn callback_url(&self) -> Option<String> {
        self.local_addr
            .map(|addr| format!("http://{addr}{}", self.config.callback_path))
    }

    /// Number of `stop` calls that actually transitioned to `Stopped`.
    pub fn stop_count(&self) -> usize {
        self.stops
    }

    /// Bind and begin accepting. `on_delivered` runs on the accept task the
    /// moment a valid record arrives, before the browser gets its response.
    pub fn start<F>(&mut self, on_delivered: F) -> Result<SocketAddr, ListenerError>
    where
        F: FnOnce(CredentialPayload) + Send + 'static,
    {
        if self.state() != ListenerState::NotStarted {
            return Err(ListenerError::AlreadyStarted);
        }

        let addr = SocketAddr::new(self.config.host, self.config.port);
        let (listener, local_addr) = bind(addr).map_err(|source| BindError {
            addr: addr.to_string(),
            source,
        })?;
        let loopback_v6 = if self.config.host == IpAddr::V4(Ipv4Addr::LOCALHOST) {
            bind_loopback_v6(local_addr.port())
        } else {
            None
        };

        *lock(&self.shared.on_delivered) = Some(Box::new(on_delivered));
        *self.shared.state() = ListenerState::Listening;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.task = Some(tokio::spawn(accept_loop(
            listener,
            loopback_v6,
            Arc::clone(&self.shared),
            shutdown_rx,
        )));
        self.shutdown = Some(shutdown_tx);
        self.local_addr = Some(local_addr);

        debug!(%local_addr, "callback listener listening");
        Ok(local_addr)
    }

    /// Idempotent. Returns true only for the call that performed the
    /// transition; the socket is closed by the time it returns.
    pub async fn stop(&mut self) -> bool {
        {
            let mut state = self.shared.state();
            if *state == ListenerState::Stopped {
                return false;
            }
            *state = ListenerState::Stopped;
        }
        lock(&self.shared.on_delivered).take();

        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "callback listener task ended abnormally");
            }
        }

        self.stops += 1;
        debug!(addr = ?self.local_addr, "callback listener stopped");
        true
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            *self.shared.state() = ListenerState::Stopped;
        }
    }
}

fn bind(addr: SocketAddr) -> io::Result<(TcpListener, SocketAddr)> {
    let listener = std::net::TcpListener::bind(addr)?;
    listener.set_nonblocking(true)?;
    let local_addr = listener.local_addr()?;
    Ok((TcpListener::from_std(listener)?, local_addr))
}

/// Browsers may resolve `localhost` to `::1`, so the IPv4 loopback listener
/// gets an IPv6 twin on the same port when the host allows it.
fn bind_loopback_v6(port: u16) -> Option<TcpListener> {
    let addr = SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), port);
    match bind(addr) {
        Ok((listener, _)) => {
            debug!(%addr, "callback listener also listening on IPv6 loopback");
            Some(listener)
        }
        Err(err) => {
            debug!(%addr, error = %err, "IPv6 loopback unavailable; IPv4 only");
            None
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn accept_loop(
    listener: TcpListener,
    loopback_v6: Option<TcpListener>,
    shared: Arc<Shared>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();

    loop {
        let accepted = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                if let Err(err) = joined {
                    warn!(error = %err, "callback connection task failed");
                }
                continue;
            }
            accepted = listener.accept() => accepted,
            accepted = accept_optional(loopback_v6.as_ref()) => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                debug!(%peer, "callback connection accepted");
                connections.spawn(serve_connection(stream, peer, Arc::clone(&shared)));
            }
            Err(err) => warn!(error = %err, "callback accept failed"),
        }
    }

    // requests still in flight are dropped along with the sockets
    connections.shutdown().await;
}

async fn accept_optional(listener: Option<&TcpListener>) -> io::Result<(TcpStream, SocketAddr)> {
    match listener {
        Some(listener) => listener.accept().await,
        None => std::future::pending().await,
    }
}

async fn serve_connection(stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) {
    match tokio::time::timeout(CONNECTION_TIMEOUT, handle_connection(stream, &shared)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => debug!(%peer, error = %err, "callback connection failed"),
        Err(_) => debug!(%peer, "callback connection timed out"),
    }
}

async fn handle_connection(mut stream: TcpStream, shared: &Shared) -> io::Result<()> {
    let response = match read_request(&mut stream).await? {
        Ok(request) => shared.respond(&request),
        Err(rejection) => rejection,
    };

    stream.write_all(&response.render(&shared.origin)).await?;
    stream.flush().await?;
    let _ = stream.shutdown().await;
    Ok(())
}

struct Shared {
    state: Mutex<ListenerState>,
    on_delivered: Mutex<Option<DeliveryHook>>,
    origin: String,
    callback_path: String,
}

impl Shared {
    fn new(origin_url: &str, callback_path: &str) -> Self {
        Self {
            state: Mutex::new(ListenerState::NotStarted),
            on_delivered: Mutex::new(None),
            origin: web_origin(origin_url),
            callback_path: callback_path.to_string(),
        }
    }

    fn state(&self) -> MutexGuard<'_, ListenerState> {
        lock(&self.state)
    }

    fn respond(&self, request: &Request) -> Response {
        if let Some(origin) = request.origin.as_deref() {
            if origin.trim_end_matches('/') != self.origin {
                warn!(origin, "rejecting callback from unexpected origin");
                return Response::error(403, "origin not allowed");
            }
        }
        if request.path != self.callback_path {
            return Response::error(404, "not found");
        }

        match request.method.as_str() {
            "OPTIONS" => Response::preflight(),
            "POST" => {
                let payload: CredentialPayload = match serde_json::from_slice(&request.body) {
                    Ok(payload) => payload,
                    Err(err) => {
                        warn!(error = %err, "callback body is not a credential record");
                        return Response::error(400, "invalid credential record");
                    }
                };
                if self.fulfil(payload) {
                    info!("credentials delivered via browser callback");
                    Response::json(200, json!({ "status": "ok" }))
                } else {
                    Response::error(409, "credentials already received")
                }
            }
            _ => Response::error(405, "method not allowed"),
        }
    }

    fn fulfil(&self, payload: CredentialPayload) -> bool {
        let hook = {
            let mut state = self.state();
            if *state != ListenerState::Listening {
                return false;
            }
            let Some(hook) = lock(&self.on_delivered).take() else {
                return false;
            };
            *state = ListenerState::Fulfilled;
            hook
        };
        hook(payload);
        true
    }
}

/// Serialized origin of the admin UI, the form browsers send in `Origin`.
fn web_origin(origin_url: &str) -> String {
    match Url::parse(origin_url) {
        Ok(url) if url.origin().is_tuple() => url.origin().ascii_serialization(),
        _ => origin_url.trim_end_matches('/').to_string(),
    }
}

#[derive(Debug)]
struct Request {
    method: String,
    path: String,
    origin: Option<String>,
    body: Vec<u8>,
}

#[derive(Debug, PartialEq)]
struct RequestHead {
    method: String,
    path: String,
    origin: Option<String>,
    content_length: usize,
}

fn parse_head(head: &str) -> Option<RequestHead> {
    let mut lines = head.split("\r\n");
    let mut parts = lines.next()?.split_whitespace();
    let method = parts.next()?.to_ascii_uppercase();
    let target = parts.next()?;
    let path = target.split('?').next().unwrap_or(target).to_string();

    let mut origin = None;
    let mut content_length = 0;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse().ok()?;
        } else if name.eq_ignore_ascii_case("origin") {
            origin = Some(value.to_string());
        }
    }

    Some(RequestHead {
        method,
        path,
        origin,
        content_length,
    })
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|window| window == b"\r\n\r\n")
}

async fn read_request(stream: &mut TcpStream) -> io::Result<Result<Request, Response>> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = find_head_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Ok(Err(Response::error(413, "request head too large")));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let Some(head) = parse_head(&String::from_utf8_lossy(&buf[..head_end])) else {
        return Ok(Err(Response::error(400, "malformed request")));
    };
    if head.content_length > MAX_BODY_BYTES {
        return Ok(Err(Response::error(413, "request body too large")));
    }

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < head.content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(head.content_length);

    Ok(Ok(Request {
        method: head.method,
        path: head.path,
        origin: head.origin,
        body,
    }))
}

#[derive(Debug)]
struct Response {
    status: u16,
    body: Option<serde_json::Value>,
    preflight: bool,
}

impl Response {
    fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            body: Some(body),
            preflight: false,
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, json!({ "error": message }))
    }

    fn preflight() -> Self {
        Self {
            status: 204,
            body: None,
            preflight: true,
        }
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            204 => "No Content",
            400 => "Bad Request",
            403 => "Forbidden",
            404 => "Not Found",
            405 => "Method Not Allowed",
            409 => "Conflict",
            413 => "Payload Too Large",
            _ => "Error",
        }
    }

    fn render(&self, origin: &str) -> Vec<u8> {
        let body = self
            .body
            .as_ref()
            .map(|body| body.to_string())
            .unwrap_or_default();

        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason());
        out.push_str(&format!("Access-Control-Allow-Origin: {origin}\r\n"));
        out.push_str("Vary: Origin\r\n");
        if self.preflight {
            out.push_str("Access-Control-Allow-Methods: POST, OPTIONS\r\n");
            out.push_str("Access-Control-Allow-Headers: Content-Type\r\n");
            out.push_str("Access-Control-Max-Age: 600\r\n");
        }
        if self.body.is_some() {
            out.push_str("Content-Type: application/json\r\n");
        }
        out.push_str(&format!("Content-Length: {}\r\n", body.len()));
        out.push_str("Connection: close\r\n\r\n");
        out.push_str(&body);
        out.into_bytes()
    }
}
