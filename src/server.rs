//! HTTP server implementation using hyper.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper::header::HeaderValue;
use hyper::service::service_fn;
use hyper::{Request, StatusCode};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use tokio::net::TcpListener;
use tokio::sync::{Semaphore, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::SharedConfig;
use crate::db::Handle;
use crate::response::{self, HttpResponse};
use crate::router::{Context, RouteMatch, RouterHandle};

/// Maximum request body size in bytes (1 MB).
const MAX_BODY_SIZE: usize = 1_048_576;

/// Maximum number of concurrent connections.
const MAX_CONNECTIONS: usize = 128;

/// Timeout for reading request headers.
const HEADER_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared server state.
pub struct State {
    pub config: SharedConfig,
    pub db: Option<Handle>,
    pub router: Arc<RouterHandle>,
}

/// Handle to a running server instance.
pub struct Server {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<crate::Result<()>>,
}

impl Server {
    /// The address the server is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shut down the accept loop and wait for it to finish.
    pub async fn shutdown(self) -> crate::Result<()> {
        let _ = self.shutdown_tx.send(());
        self.task.await.unwrap_or(Ok(()))
    }
}

fn add_standard_headers(response: &mut HttpResponse) {
    let headers = response.headers_mut();
    headers.insert("X-Content-Type-Options", HeaderValue::from_static("nosniff"));
    headers.insert("Cache-Control", HeaderValue::from_static("no-store"));
}

fn payload_too_large() -> HttpResponse {
    response::error(StatusCode::PAYLOAD_TOO_LARGE, "Payload too large")
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<State>,
) -> Result<HttpResponse, std::convert::Infallible> {
    let started = Instant::now();
    let (parts, body) = req.into_parts();

    // Reject oversized bodies early via Content-Length header
    let declared = parts
        .headers
        .get(hyper::header::CONTENT_LENGTH)
        .and_then(|cl| cl.to_str().ok())
        .and_then(|cl| cl.parse::<usize>().ok());
    if declared.is_some_and(|len| len > MAX_BODY_SIZE) {
        let mut response = payload_too_large();
        add_standard_headers(&mut response);
        return Ok(response);
    }

    // Read body with size limit (fallback for chunked encoding)
    let body_bytes = match BodyExt::collect(Limited::new(body, MAX_BODY_SIZE)).await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => {
            let mut response = payload_too_large();
            add_standard_headers(&mut response);
            return Ok(response);
        }
    };

    let method = parts.method.clone();
    let path = parts.uri.path().to_string();

    let mut response = match state.router.match_route(&method, &path) {
        RouteMatch::Matched { handler, params } => {
            let ctx = Context {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                params,
                body: body_bytes,
                db: state.db.clone(),
                config: Arc::clone(&state.config),
            };

            match handler(ctx).await {
                Ok(response) => response,
                Err(e) => e.into_response(),
            }
        }
        RouteMatch::MethodNotAllowed => {
            response::error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
        }
        RouteMatch::NotFound => response::error(StatusCode::NOT_FOUND, "Not found"),
    };

    add_standard_headers(&mut response);
    debug!(
        %method,
        path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request served"
    );
    Ok(response)
}

/// Bind, start accepting connections, and return a handle.
pub async fn start(
    config: SharedConfig,
    db: Option<Handle>,
    router: Arc<RouterHandle>,
) -> crate::Result<Server> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    let addr = listener.local_addr()?;

    let state = Arc::new(State { config, db, router });

    info!("Server listening on http://{}", addr);

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let semaphore = Arc::new(Semaphore::new(MAX_CONNECTIONS));

    let task = tokio::spawn(async move {
        tokio::pin!(shutdown_rx);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, remote_addr) = result?;
                    let io = TokioIo::new(stream);

                    let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                        warn!("Connection limit reached, rejecting {}", remote_addr);
                        tokio::spawn(async move {
                            let service = service_fn(|_req: Request<Incoming>| async {
                                Ok::<_, std::convert::Infallible>(response::error(
                                    StatusCode::SERVICE_UNAVAILABLE,
                                    "Service unavailable",
                                ))
                            });
                            let mut builder = auto::Builder::new(TokioExecutor::new());
                            builder.http1()
                                .timer(TokioTimer::new())
                                .header_read_timeout(HEADER_READ_TIMEOUT);
                            let _ = builder.serve_connection(io, service).await;
                        });
                        continue;
                    };

                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            handle_request(req, state)
                        });

                        let mut builder = auto::Builder::new(TokioExecutor::new());
                        builder.http1()
                            .timer(TokioTimer::new())
                            .header_read_timeout(HEADER_READ_TIMEOUT);

                        if let Err(e) = builder.serve_connection(io, service).await {
                            error!("Error serving connection from {}: {}", remote_addr, e);
                        }

                        drop(permit);
                    });
                }
                _ = &mut shutdown_rx => {
                    break;
                }
            }
        }

        Ok(())
    });

    Ok(Server {
        addr,
        shutdown_tx,
        task,
    })
}

/// Run the HTTP server until the accept loop stops.
pub async fn run(
    config: SharedConfig,
    db: Option<Handle>,
    router: Arc<RouterHandle>,
) -> crate::Result<()> {
    let server = start(config, db, router).await?;
    server.task.await.unwrap_or(Ok(()))
}
