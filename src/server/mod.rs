//! Request Server - HTTP front door of the host
//!
//! Every accepted connection gets its own tokio task; handlers share nothing
//! but the [`Bridge`]. An invocation handler enqueues a command and then
//! waits on that command's completion signal, with no timeout: the main loop
//! is trusted to tick.
//!
//! # Request Flow
//!
//! ```text
//! GET  /<token>/   ──► status JSON (never touches the queue)
//! POST /<token>/   ──► enqueue(name) ──► wait ──► 200|500 + "<severity>: <message>" lines
//! GET  /metrics    ──► Prometheus text
//! *    anything else ──► 404 / 405
//! ```
//!
//! Connections are not kept alive: one request per connection, so a finished
//! connection task means the response has been written. Shutdown relies on
//! that to drain in-flight responses.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::address::HostAddress;
use crate::bridge::Bridge;
use crate::metrics::{encode_metrics, HANDLERS_WAITING, HTTP_REQUESTS_TOTAL, STATUS_PROBES_TOTAL};

/// Header carrying a caller-supplied trace id
pub const TRACE_ID_HEADER: &str = "x-trace-id";
/// Header carrying the id of the command a response belongs to
pub const COMMAND_ID_HEADER: &str = "x-command-id";

/// Server errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// Body of the status probe
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusReport {
    pub status: String,
    /// Normalized project path the host serves
    pub project: String,
    pub uptime_secs: f64,
    pub pid: u32,
    pub version: String,
}

type ResponseBody = Full<Bytes>;

/// Counts live connection tasks and wakes waiters when it drops to zero
#[derive(Debug, Default)]
struct ConnectionTracker {
    active: AtomicUsize,
    idle: Notify,
}

impl ConnectionTracker {
    fn enter(self: &Arc<Self>) -> ConnectionGuard {
        self.active.fetch_add(1, Ordering::AcqRel);
        ConnectionGuard(Arc::clone(self))
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.active.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct ConnectionGuard(Arc<ConnectionTracker>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.0.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Holds `HANDLERS_WAITING` up while a handler waits for its command.
/// Dropping the handler (client gone) releases it too.
struct WaitingGuard;

impl WaitingGuard {
    fn enter() -> Self {
        HANDLERS_WAITING.inc();
        WaitingGuard
    }
}

impl Drop for WaitingGuard {
    fn drop(&mut self) {
        HANDLERS_WAITING.dec();
    }
}

struct ServerState {
    bridge: Arc<Bridge>,
    address: HostAddress,
}

/// A running request server
pub struct HostServer {
    local_addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    accept_task: JoinHandle<()>,
    connections: Arc<ConnectionTracker>,
}

impl HostServer {
    /// Bind `address` (port 0 picks a free port) and start accepting.
    ///
    /// Must be called from inside a tokio runtime.
    pub async fn bind(bridge: Arc<Bridge>, address: HostAddress) -> Result<Self, ServerError> {
        let bind_addr = address.socket_addr();
        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: bind_addr,
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| ServerError::Bind {
            addr: bind_addr,
            source,
        })?;

        let address = address.with_port(local_addr.port());
        tracing::info!(
            url = %address.url(),
            project = address.project(),
            "request server listening"
        );

        let state = Arc::new(ServerState { bridge, address });
        let connections = Arc::new(ConnectionTracker::default());
        let (stop, stop_rx) = oneshot::channel();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            state,
            Arc::clone(&connections),
            stop_rx,
        ));

        Ok(Self {
            local_addr,
            stop: Some(stop),
            accept_task,
            connections,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting, then wait up to `grace` for open connections to finish
    pub async fn shutdown(mut self, grace: Duration) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.accept_task).await {
            tracing::warn!("accept loop ended abnormally: {e}");
        }
        if tokio::time::timeout(grace, self.connections.wait_idle())
            .await
            .is_err()
        {
            tracing::warn!(
                open = self.connections.active.load(Ordering::Acquire),
                "connections still open after shutdown grace period"
            );
        }
        tracing::info!("request server stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    state: Arc<ServerState>,
    connections: Arc<ConnectionTracker>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        let (stream, peer) = tokio::select! {
            _ = &mut stop => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!("accept error: {e}");
                    continue;
                }
            },
        };

        let state = Arc::clone(&state);
        let guard = connections.enter();
        tokio::spawn(async move {
            let _guard = guard;
            let service = service_fn(move |request| handle(request, Arc::clone(&state)));
            if let Err(e) = http1::Builder::new()
                .keep_alive(false)
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!(%peer, "connection error: {e}");
            }
        });
    }
}

fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<ResponseBody> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

async fn handle(
    request: Request<Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<ResponseBody>, Infallible> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let response = if method == Method::GET && path == "/metrics" {
        text_response(StatusCode::OK, encode_metrics())
    } else if !state.address.matches_request_path(&path) {
        text_response(
            StatusCode::NOT_FOUND,
            format!("no host is serving {path} on this port"),
        )
    } else if method == Method::GET {
        status(&state)
    } else if method == Method::POST {
        invoke(request, &state).await
    } else {
        text_response(StatusCode::METHOD_NOT_ALLOWED, "use GET or POST")
    };

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[method.as_str(), response.status().as_str()])
        .inc();
    Ok(response)
}

fn status(state: &ServerState) -> Response<ResponseBody> {
    STATUS_PROBES_TOTAL.inc();
    let report = StatusReport {
        status: "running".to_string(),
        project: state.address.project().to_string(),
        uptime_secs: state.bridge.uptime().as_secs_f64(),
        pid: std::process::id(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };

    match serde_json::to_vec(&report) {
        Ok(json) => {
            let mut response = Response::new(Full::new(Bytes::from(json)));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            response
        }
        Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn invoke(request: Request<Incoming>, state: &ServerState) -> Response<ResponseBody> {
    let trace_id = request
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::now_v7().to_string());

    let body = match request.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            return text_response(
                StatusCode::BAD_REQUEST,
                format!("failed to read request body: {e}"),
            )
        }
    };
    let procedure = match std::str::from_utf8(&body) {
        Ok(text) => text.trim().to_string(),
        Err(_) => return text_response(StatusCode::BAD_REQUEST, "procedure name must be UTF-8"),
    };
    if procedure.is_empty() {
        return text_response(StatusCode::BAD_REQUEST, "missing procedure name");
    }

    let span = info_span!("invoke", trace_id = %trace_id, procedure = %procedure);
    async {
        let ticket = state.bridge.enqueue(procedure.as_str());
        let command_id = ticket.id();
        tracing::info!(command_id = %command_id, "command queued");

        let waited = {
            let _waiting = WaitingGuard::enter();
            ticket.wait().await
        };

        let mut response = match waited {
            Ok(outcome) => {
                let status = StatusCode::from_u16(outcome.result.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                text_response(status, outcome.body())
            }
            Err(abandoned) => text_response(StatusCode::SERVICE_UNAVAILABLE, abandoned.to_string()),
        };
        if let Ok(value) = HeaderValue::from_str(&command_id.to_string()) {
            response.headers_mut().insert(COMMAND_ID_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Instant;

    use crate::bridge::Tick;
    use crate::Registry;

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry.register("Demo.Method", |log| {
            log.log("Test method");
            Ok(())
        });
        registry
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_waiting_gauge_released_when_caller_gives_up() {
        let bridge = Arc::new(Bridge::new(true));
        let address = HostAddress::for_project(Path::new("/srv/game"), 0);
        let server = HostServer::bind(Arc::clone(&bridge), address.clone())
            .await
            .unwrap();
        let url = address.with_port(server.local_addr().port()).url();

        let client = reqwest::Client::builder()
            .no_proxy()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let err = client.post(&url).body("Demo.Method").send().await.unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(bridge.queue().len(), 1);

        let mut registry = registry();
        assert!(matches!(bridge.tick(&mut registry), Tick::Ran(_)));

        let deadline = Instant::now() + Duration::from_secs(2);
        while HANDLERS_WAITING.get() != 0.0 {
            assert!(Instant::now() < deadline, "handler still counted as waiting");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        server.shutdown(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn test_status_and_unknown_project() {
        let bridge = Arc::new(Bridge::new(true));
        let address = HostAddress::for_project(Path::new("/srv/game"), 0);
        let server = HostServer::bind(Arc::clone(&bridge), address.clone())
            .await
            .unwrap();
        let address = address.with_port(server.local_addr().port());
        let client = reqwest::Client::builder().no_proxy().build().unwrap();

        let report: StatusReport = client
            .get(address.url())
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(report.status, "running");
        assert_eq!(report.project, "/srv/game");

        let other = HostAddress::for_project(Path::new("/srv/other"), address.port());
        let response = client.get(other.url()).send().await.unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
        assert!(bridge.queue().is_empty());

        server.shutdown(Duration::from_millis(200)).await;
    }
}
