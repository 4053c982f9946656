use crate::tls::TlsConfig;
use crate::{Config, OpError};
use axum::*;
use axum_server::tls_rustls::RustlsAcceptor;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Value of the `Server` header on every response.
pub const SERVER_NAME: &str =
    concat!("fragstore-srv/", env!("CARGO_PKG_VERSION"));

/// Value of the [PROTOCOL_HEADER] header on every response.
pub const PROTOCOL_VERSION: &str = "1";

/// Header naming the storage protocol version.
pub const PROTOCOL_HEADER: &str = "x-fragstore-protocol";

/// Header carrying an encrypted challenge on 401 responses.
pub const CHALLENGE_HEADER: &str = "x-fragstore-challenge";

/// Extra response headers.
pub type Headers = Vec<(&'static str, String)>;

/// Produces a streamed response body on a worker thread.
pub type BodyWriter = Box<
    dyn FnOnce(&mut dyn std::io::Write) -> std::io::Result<()>
        + 'static
        + Send,
>;

/// The outcome of an operation, before it is handed to the transport.
pub enum Reply {
    /// A complete, small response.
    Full {
        /// Http status.
        status: u16,

        /// Extra headers.
        headers: Headers,

        /// Body bytes.
        body: Vec<u8>,
    },

    /// A 200 response whose body is written incrementally.
    Stream {
        /// Extra headers.
        headers: Headers,

        /// Body producer.
        writer: BodyWriter,
    },
}

impl std::fmt::Debug for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full { status, body, .. } => f
                .debug_struct("Full")
                .field("status", status)
                .field("len", &body.len())
                .finish(),
            Self::Stream { .. } => f.write_str("Stream"),
        }
    }
}

impl Reply {
    /// A plain text response.
    pub fn text(status: u16, body: impl Into<String>) -> Self {
        Self::Full {
            status,
            headers: vec![("Content-Type", "text/plain".into())],
            body: body.into().into_bytes(),
        }
    }

    /// A json response.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::Full {
            status,
            headers: vec![("Content-Type", "application/json".into())],
            body: body.to_string().into_bytes(),
        }
    }

    /// The error response for `err`.
    pub fn error(err: &OpError) -> Self {
        Self::json(
            err.status(),
            &serde_json::json!({ "error": err.to_string() }),
        )
    }

    /// A 401 carrying an encrypted challenge. The connection is closed
    /// after it, the requester answers on a new one.
    pub fn challenge(encrypted: &str) -> Self {
        Self::Full {
            status: 401,
            headers: vec![
                ("Content-Type", "text/plain".into()),
                ("WWW-Authenticate", "Basic realm=\"default\"".into()),
                ("Connection", "close".into()),
                (CHALLENGE_HEADER, encrypted.to_string()),
            ],
            body: format!("challenge = {encrypted}").into_bytes(),
        }
    }

    /// Http status of this reply.
    pub fn status(&self) -> u16 {
        match self {
            Self::Full { status, .. } => *status,
            Self::Stream { .. } => 200,
        }
    }
}

pub enum HttpBody {
    Full(Vec<u8>),
    Stream(async_channel::Receiver<std::io::Result<bytes::Bytes>>),
}

pub struct HttpResponse {
    pub status: u16,
    pub headers: Headers,
    pub body: HttpBody,
}

impl HttpResponse {
    fn error(status: u16, msg: &str) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", "application/json".into())],
            body: HttpBody::Full(
                serde_json::json!({ "error": msg }).to_string().into_bytes(),
            ),
        }
    }

    fn respond(self) -> response::Response {
        let mut builder = response::Response::builder()
            .status(self.status)
            .header("Server", SERVER_NAME)
            .header(PROTOCOL_HEADER, PROTOCOL_VERSION);
        for (name, value) in self.headers {
            builder = builder.header(name, value);
        }
        let body = match self.body {
            HttpBody::Full(body) => body::Body::from(body),
            HttpBody::Stream(recv) => body::Body::from_stream(recv),
        };
        builder.body(body).unwrap_or_else(|err| {
            tracing::error!(?err, "failed to encode response");
            let mut res = response::Response::new(body::Body::empty());
            *res.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
            res
        })
    }
}

pub type HttpRespondCb = Box<dyn FnOnce(HttpResponse) + 'static + Send>;

/// The storage operations reachable over http.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    Identify,
    Store,
    Retrieve,
    Verify,
    Delete,
}

impl OpKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Identify => "ID",
            Self::Store => "STORE",
            Self::Retrieve => "RETRIEVE",
            Self::Verify => "VERIFY",
            Self::Delete => "DELETE",
        }
    }
}

pub struct OpRequest {
    pub kind: OpKind,
    pub key: String,
    pub peer: SocketAddr,
    pub query: HashMap<String, String>,
    pub authorization: Option<String>,
    pub body: bytes::Bytes,
}

pub enum HttpRequest {
    HealthGet,
    Op(OpRequest),
}

type HSend = async_channel::Sender<(HttpRequest, HttpRespondCb)>;
type HRecv = async_channel::Receiver<(HttpRequest, HttpRespondCb)>;

#[derive(Clone)]
pub struct HttpReceiver(HRecv);

impl HttpReceiver {
    pub fn recv(&self) -> Option<(HttpRequest, HttpRespondCb)> {
        match self.0.recv_blocking() {
            Ok(r) => Some(r),
            Err(_) => None,
        }
    }
}

pub struct ServerConfig {
    pub addrs: Vec<std::net::SocketAddr>,
    pub worker_thread_count: usize,
    pub tls_config: Option<TlsConfig>,
}

pub struct Server {
    t_join: Option<std::thread::JoinHandle<()>>,
    addrs: Vec<std::net::SocketAddr>,
    receiver: HttpReceiver,
    runtime: tokio::runtime::Handle,
    h_send: HSend,
    shutdown: Option<axum_server::Handle>,
}

impl Drop for Server {
    fn drop(&mut self) {
        self.h_send.close();
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.shutdown();
        }
        if let Some(t_join) = self.t_join.take() {
            let _ = t_join.join();
        }
    }
}

impl Server {
    pub fn new(
        config: Arc<Config>,
        server_config: ServerConfig,
    ) -> std::io::Result<Self> {
        let (s_ready, r_ready) = tokio::sync::oneshot::channel();
        let t_join = std::thread::spawn(move || {
            tokio_thread(config, server_config, s_ready)
        });
        match r_ready.blocking_recv() {
            Ok(Ok(Ready {
                h_send,
                addrs,
                receiver,
                runtime,
                shutdown,
            })) => Ok(Self {
                t_join: Some(t_join),
                addrs,
                receiver,
                runtime,
                h_send,
                shutdown: Some(shutdown),
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(std::io::Error::other("failed to bind server")),
        }
    }

    pub fn server_addrs(&self) -> &[std::net::SocketAddr] {
        self.addrs.as_slice()
    }

    pub fn receiver(&self) -> &HttpReceiver {
        &self.receiver
    }

    /// Handle to the runtime driving the http front end, also used for
    /// challenge expiry timers.
    pub fn runtime(&self) -> &tokio::runtime::Handle {
        &self.runtime
    }
}

struct Ready {
    h_send: HSend,
    addrs: Vec<std::net::SocketAddr>,
    receiver: HttpReceiver,
    runtime: tokio::runtime::Handle,
    shutdown: axum_server::Handle,
}

#[derive(Clone)]
pub struct AppState {
    pub h_send: HSend,
    pub request_timeout: std::time::Duration,
}

type BoxFut<'a, T> =
    std::pin::Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

fn tokio_thread(
    config: Arc<Config>,
    server_config: ServerConfig,
    ready: tokio::sync::oneshot::Sender<std::io::Result<Ready>>,
) {
    tracing::trace!(?config, "Starting tokio thread");

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };

    runtime.block_on(async move {
        let (h_send, h_recv) =
            async_channel::bounded(server_config.worker_thread_count);

        let app = Router::<AppState>::new()
            .route("/health", routing::get(handle_health_get))
            .route("/id", routing::get(handle_id_get))
            .route(
                "/file/:key",
                routing::post(handle_file_post)
                    .get(handle_file_get)
                    .delete(handle_file_delete),
            )
            .route("/hash/:key", routing::get(handle_hash_get));

        let app: Router = app
            .layer(extract::DefaultBodyLimit::max(config.max_upload_bytes))
            .with_state(AppState {
                h_send: h_send.clone(),
                request_timeout: config.request_timeout,
            });

        let receiver = HttpReceiver(h_recv);

        let mut addrs = Vec::with_capacity(server_config.addrs.len());
        let mut servers: Vec<BoxFut<'static, std::io::Result<()>>> =
            Vec::with_capacity(server_config.addrs.len());

        let shutdown_handle = axum_server::Handle::new();

        let tls_config = match &server_config.tls_config {
            None => None,
            Some(tls_config) => match tls_config.create_tls_config().await {
                Ok(tls_config) => Some(tls_config),
                Err(err) => {
                    let _ = ready.send(Err(err));
                    return;
                }
            },
        };

        for addr in server_config.addrs {
            tracing::info!("Binding to: {}", addr);

            let listener = match tokio::task::spawn_blocking(move || {
                let listener = std::net::TcpListener::bind(addr)?;
                listener.set_nonblocking(true)?;
                Ok(listener)
            })
            .await
            .map_err(std::io::Error::other)
            .and_then(|r| r)
            {
                Ok(listener) => listener,
                Err(err) => {
                    let _ = ready.send(Err(err));
                    return;
                }
            };

            match listener.local_addr() {
                Ok(addr) => {
                    tracing::info!("Bound with local address: {}", addr);
                    addrs.push(addr)
                }
                Err(err) => {
                    let _ = ready.send(Err(err));
                    return;
                }
            }

            let service = app
                .clone()
                .into_make_service_with_connect_info::<SocketAddr>();
            let shutdown_handle = shutdown_handle.clone();
            if let Some(tls_config) = &tls_config {
                let acceptor = RustlsAcceptor::new(tls_config.clone());

                let s = axum_server::Server::from_tcp(listener)
                    .acceptor(acceptor)
                    .handle(shutdown_handle)
                    .serve(service);

                servers.push(Box::pin(s));
            } else {
                let s = std::future::IntoFuture::into_future(
                    axum_server::Server::from_tcp(listener)
                        .handle(shutdown_handle)
                        .serve(service),
                );
                servers.push(Box::pin(s));
            };
        }

        tracing::info!("Sending ready signal");

        if ready
            .send(Ok(Ready {
                h_send,
                addrs,
                receiver,
                runtime: tokio::runtime::Handle::current(),
                shutdown: shutdown_handle,
            }))
            .is_err()
        {
            return;
        }

        let _ = futures::future::join_all(servers).await;
    });
}

async fn handle_dispatch(
    state: &AppState,
    req: HttpRequest,
) -> response::Response {
    let (s, r) = tokio::sync::oneshot::channel();
    let s = Box::new(move |res| {
        let _ = s.send(res);
    });
    let h_send = &state.h_send;
    tokio::time::timeout(state.request_timeout, async move {
        let _ = h_send.send((req, s)).await;
        match r.await {
            Ok(r) => r.respond(),
            Err(_) => HttpResponse::error(500, "request dropped").respond(),
        }
    })
    .await
    .unwrap_or_else(|_| HttpResponse::error(500, "internal timeout").respond())
}

fn op_request(
    kind: OpKind,
    key: String,
    peer: SocketAddr,
    query: HashMap<String, String>,
    headers: &http::HeaderMap,
    body: bytes::Bytes,
) -> HttpRequest {
    let authorization = headers
        .get(http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    HttpRequest::Op(OpRequest {
        kind,
        key,
        peer,
        query,
        authorization,
        body,
    })
}

async fn handle_health_get(
    extract::State(state): extract::State<AppState>,
) -> response::Response {
    handle_dispatch(&state, HttpRequest::HealthGet).await
}

async fn handle_id_get(
    extract::Query(query): extract::Query<HashMap<String, String>>,
    extract::ConnectInfo(peer): extract::ConnectInfo<SocketAddr>,
    extract::State(state): extract::State<AppState>,
    headers: http::HeaderMap,
) -> response::Response {
    let req = op_request(
        OpKind::Identify,
        String::new(),
        peer,
        query,
        &headers,
        bytes::Bytes::new(),
    );
    handle_dispatch(&state, req).await
}

async fn handle_file_post(
    extract::Path(key): extract::Path<String>,
    extract::Query(query): extract::Query<HashMap<String, String>>,
    extract::ConnectInfo(peer): extract::ConnectInfo<SocketAddr>,
    extract::State(state): extract::State<AppState>,
    headers: http::HeaderMap,
    body: bytes::Bytes,
) -> response::Response {
    let req = op_request(OpKind::Store, key, peer, query, &headers, body);
    handle_dispatch(&state, req).await
}

async fn handle_file_get(
    extract::Path(key): extract::Path<String>,
    extract::Query(query): extract::Query<HashMap<String, String>>,
    extract::ConnectInfo(peer): extract::ConnectInfo<SocketAddr>,
    extract::State(state): extract::State<AppState>,
    headers: http::HeaderMap,
) -> response::Response {
    let req = op_request(
        OpKind::Retrieve,
        key,
        peer,
        query,
        &headers,
        bytes::Bytes::new(),
    );
    handle_dispatch(&state, req).await
}

async fn handle_file_delete(
    extract::Path(key): extract::Path<String>,
    extract::Query(query): extract::Query<HashMap<String, String>>,
    extract::ConnectInfo(peer): extract::ConnectInfo<SocketAddr>,
    extract::State(state): extract::State<AppState>,
    headers: http::HeaderMap,
) -> response::Response {
    let req = op_request(
        OpKind::Delete,
        key,
        peer,
        query,
        &headers,
        bytes::Bytes::new(),
    );
    handle_dispatch(&state, req).await
}

async fn handle_hash_get(
    extract::Path(key): extract::Path<String>,
    extract::Query(query): extract::Query<HashMap<String, String>>,
    extract::ConnectInfo(peer): extract::ConnectInfo<SocketAddr>,
    extract::State(state): extract::State<AppState>,
    headers: http::HeaderMap,
) -> response::Response {
    let req = op_request(
        OpKind::Verify,
        key,
        peer,
        query,
        &headers,
        bytes::Bytes::new(),
    );
    handle_dispatch(&state, req).await
}
