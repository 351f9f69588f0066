//! The HTTP/1.1 adapter.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{ACCEPT, ACCEPT_CHARSET, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Method, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use indexmap::IndexMap;
use matchit::Router;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use switchyard_config::HttpConfig;
use switchyard_content::{group_query, split_content_type, Rendered};
use switchyard_core::{
    Accept, BoxFuture, Context, DispatchResult, Dispatcher, Endpoint, RequestContent, RpcError,
    RpcResult, Scope, SetupError, TransportError,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use super::route::{MultiParams, Route};
use super::selection::{RepeatedParams, ValueSelection, SELECTION_WEIGHT};
use crate::adapter::{Adapter, AdapterState, Lifecycle, Runtime};
use crate::mapping::http_status;
use crate::shutdown::{ConnectionTracker, ShutdownSignal};
use crate::transport::{process, Transport};

/// Header carrying the request id on every response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const FORM_MIME_TYPE: &str = "application/x-www-form-urlencoded";

/// Serves endpoints carrying a [`Route`] over HTTP/1.1.
///
/// The route table is built from the registered services when the adapter
/// starts. Each connection runs on its own task; `stop()` lets in-flight
/// requests finish for up to one request timeout.
///
/// ```no_run
/// use std::sync::Arc;
/// use switchyard_config::HttpConfig;
/// use switchyard_server::http::HttpAdapter;
/// use switchyard_server::Server;
///
/// # async fn run() -> Result<(), switchyard_core::SetupError> {
/// let server = Server::builder().build()?;
/// server.add_adapter(Arc::new(HttpAdapter::new(HttpConfig::default())))?;
/// server.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct HttpAdapter {
    scope: Arc<Scope>,
    config: HttpConfig,
    lifecycle: Lifecycle,
    runtime: RwLock<Option<Arc<Runtime>>>,
    running: Mutex<Option<Running>>,
    local_addr: RwLock<Option<SocketAddr>>,
}

struct Running {
    shutdown: ShutdownSignal,
    tracker: ConnectionTracker,
    task: JoinHandle<()>,
}

impl HttpAdapter {
    /// An adapter named `http`.
    pub fn new(config: HttpConfig) -> Self {
        Self::with_scope(Scope::new("http"), config)
    }

    /// An adapter with its own scope, for a custom name or settings.
    pub fn with_scope(scope: Scope, config: HttpConfig) -> Self {
        let lifecycle = Lifecycle::new(scope.name());
        Self {
            scope: Arc::new(scope),
            config,
            lifecycle,
            runtime: RwLock::new(None),
            running: Mutex::new(None),
            local_addr: RwLock::new(None),
        }
    }

    /// The bound address once started. Useful with port `0`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }
}

#[async_trait]
impl Adapter for HttpAdapter {
    fn name(&self) -> &str {
        self.scope.name()
    }

    fn scope(&self) -> &Arc<Scope> {
        &self.scope
    }

    fn state(&self) -> AdapterState {
        self.lifecycle.state()
    }

    fn attach(&self, runtime: Arc<Runtime>) -> Result<(), SetupError> {
        self.lifecycle.check(AdapterState::Attached)?;
        self.scope.stage().add_caller(ValueSelection, SELECTION_WEIGHT)?;
        *self.runtime.write() = Some(runtime);
        self.lifecycle.transition(AdapterState::Attached)
    }

    async fn start(&self) -> Result<(), SetupError> {
        let _starting = self.lifecycle.begin_start().await?;
        let runtime = self
            .runtime
            .read()
            .clone()
            .ok_or_else(|| SetupError::invalid_setting(self.name(), "adapter has no runtime"))?;

        let router = build_router(&runtime)?;
        let addr: SocketAddr = self
            .config
            .addr
            .parse()
            .map_err(|e| SetupError::invalid_setting("http.addr", format!("{e}")))?;
        let listener = TcpListener::bind(addr).await.map_err(TransportError::from)?;
        let local = listener.local_addr().map_err(TransportError::from)?;

        let shared = Arc::new(HttpShared {
            runtime,
            scope: Arc::clone(&self.scope),
            router,
            max_body: self.config.max_body_bytes,
            timeout: self.config.request_timeout(),
        });
        let shutdown = ShutdownSignal::new();
        let tracker = ConnectionTracker::new();
        let task = tokio::spawn(accept_loop(listener, shared, shutdown.clone(), tracker.clone()));

        *self.running.lock() = Some(Running {
            shutdown,
            tracker,
            task,
        });
        *self.local_addr.write() = Some(local);
        self.lifecycle.transition(AdapterState::Started)?;
        tracing::info!(adapter = self.name(), addr = %local, "http adapter listening");
        Ok(())
    }

    async fn stop(&self) -> Result<(), SetupError> {
        self.lifecycle.transition(AdapterState::Stopped)?;
        let running = self.running.lock().take();
        if let Some(running) = running {
            running.shutdown.trigger();
            if let Err(e) = running.task.await {
                tracing::warn!(adapter = self.name(), error = %e, "accept loop ended abnormally");
            }
            let grace = self.config.request_timeout();
            if !running.tracker.drain(grace).await {
                tracing::warn!(
                    adapter = self.name(),
                    active = running.tracker.active(),
                    "connections still open after drain timeout"
                );
            }
        }
        tracing::info!(adapter = self.name(), "http adapter stopped");
        Ok(())
    }
}

struct Binding {
    route: Route,
    endpoint: Arc<Endpoint>,
    service: Arc<Scope>,
}

fn build_router(runtime: &Runtime) -> Result<Router<Vec<Binding>>, SetupError> {
    let mut grouped: IndexMap<String, Vec<Binding>> = IndexMap::new();
    for service in runtime.services() {
        for endpoint in service.endpoints() {
            for route in endpoint.children::<Route>() {
                let bindings = grouped.entry(route.path.clone()).or_default();
                let taken = route
                    .methods
                    .iter()
                    .find(|m| bindings.iter().any(|b| b.route.accepts(m)));
                if let Some(method) = taken {
                    return Err(SetupError::duplicate("route", format!("{method} {}", route.path)));
                }
                bindings.push(Binding {
                    route,
                    endpoint: Arc::clone(endpoint),
                    service: Arc::clone(service.scope()),
                });
            }
        }
    }

    let mut router = Router::new();
    for (path, bindings) in grouped {
        router
            .insert(path.clone(), bindings)
            .map_err(|e| SetupError::invalid_setting(format!("route {path}"), e.to_string()))?;
    }
    Ok(router)
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<HttpShared>,
    shutdown: ShutdownSignal,
    tracker: ConnectionTracker,
) {
    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, remote)) => {
                    let shared = Arc::clone(&shared);
                    let token = tracker.acquire();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(stream, shared, shutdown).await {
                            tracing::debug!(%remote, error = %e, "connection error");
                        }
                        drop(token);
                    });
                }
                Err(e) => tracing::error!(error = %e, "failed to accept connection"),
            },
            () = shutdown.recv() => {
                tracing::debug!("accept loop stopping");
                break;
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    shared: Arc<HttpShared>,
    shutdown: ShutdownSignal,
) -> Result<(), hyper::Error> {
    let service = service_fn(move |request: hyper::Request<Incoming>| {
        let shared = Arc::clone(&shared);
        async move { Ok::<_, Infallible>(shared.handle(request).await) }
    });
    let connection = http1::Builder::new().serve_connection(TokioIo::new(stream), service);
    tokio::pin!(connection);

    tokio::select! {
        result = connection.as_mut() => result,
        () = shutdown.recv() => {
            connection.as_mut().graceful_shutdown();
            connection.await
        }
    }
}

/// One HTTP request as read off the connection.
struct HttpUnit {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: RpcResult<Bytes>,
}

#[derive(Debug, Clone)]
struct RequestLine {
    method: Method,
    path: String,
}

/// State shared by every connection of a started adapter.
struct HttpShared {
    runtime: Arc<Runtime>,
    scope: Arc<Scope>,
    router: Router<Vec<Binding>>,
    max_body: usize,
    timeout: Duration,
}

impl HttpShared {
    async fn handle(&self, request: hyper::Request<Incoming>) -> Response<Full<Bytes>> {
        let (parts, body) = request.into_parts();
        let collected = tokio::time::timeout(self.timeout, Limited::new(body, self.max_body).collect()).await;
        let body = match collected {
            Ok(Ok(collected)) => Ok(collected.to_bytes()),
            Ok(Err(e)) if e.is::<LengthLimitError>() => Err(RpcError::payload_too_large(self.max_body)),
            Ok(Err(e)) => Err(RpcError::bad_request(format!("cannot read request body: {e}"))),
            Err(_) => Err(RpcError::request_timeout()),
        };

        let unit = HttpUnit {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
        };
        process(&self.runtime, &self.scope, self, unit, Some(self.timeout)).await
    }

    fn resolve(&self, ctx: &mut Context) -> RpcResult<DispatchResult> {
        let line = ctx
            .extension::<RequestLine>()
            .cloned()
            .ok_or_else(|| RpcError::internal("request line missing"))?;
        let matched = self
            .router
            .at(&line.path)
            .map_err(|_| RpcError::not_found(format!("no endpoint at {}", line.path)))?;
        let binding = matched
            .value
            .iter()
            .find(|b| b.route.accepts(&line.method))
            .ok_or_else(|| RpcError::method_not_allowed(&line.method))?;

        // query < body fields < path
        let mut params = ctx.request.params.clone();
        let mut repeated_form_keys = Vec::new();
        if let Some(content) = &ctx.request.content {
            if let Some(Value::Object(fields)) = &content.data {
                let form = content.mime_type.as_deref() == Some(FORM_MIME_TYPE);
                for (key, value) in fields {
                    if form && value.is_array() {
                        repeated_form_keys.push(key.clone());
                    }
                    params.insert(key.clone(), value.clone());
                }
            }
        }
        for (key, raw) in matched.params.iter() {
            let value = urlencoding::decode(raw).map_err(|_| {
                RpcError::bad_request(format!("path parameter {key} is not valid UTF-8 once decoded"))
            })?;
            params.insert(key.to_string(), Value::String(value.into_owned()));
        }
        if !repeated_form_keys.is_empty() {
            let RepeatedParams(mut repeated) = ctx.remove_extension::<RepeatedParams>().unwrap_or_default();
            for key in repeated_form_keys {
                if !repeated.contains(&key) {
                    repeated.push(key);
                }
            }
            ctx.insert_extension(RepeatedParams(repeated));
        }

        ctx.insert_extension::<MultiParams>(binding.route.allowed_multi_params.clone());
        Ok(DispatchResult::new(Arc::clone(&binding.endpoint), params).with_service(Arc::clone(&binding.service)))
    }
}

impl Dispatcher for HttpShared {
    fn dispatch<'a>(&'a self, ctx: &'a mut Context) -> BoxFuture<'a, RpcResult<DispatchResult>> {
        Box::pin(std::future::ready(self.resolve(ctx)))
    }
}

impl Transport for HttpShared {
    type Unit = HttpUnit;
    type Reply = Response<Full<Bytes>>;

    fn parse_request(&self, unit: HttpUnit, ctx: &mut Context) -> RpcResult<()> {
        let HttpUnit {
            method,
            uri,
            headers,
            body,
        } = unit;
        ctx.insert_extension(RequestLine {
            method,
            path: uri.path().to_string(),
        });

        let header = |name: HeaderName| headers.get(name).and_then(|v| v.to_str().ok());
        ctx.request.accept = Accept {
            mime_types: header(ACCEPT).map(Accept::parse_list).unwrap_or_default(),
            charsets: header(ACCEPT_CHARSET).map(Accept::parse_list).unwrap_or_default(),
        };
        let content_type = header(CONTENT_TYPE).map(split_content_type);

        let params = group_query(uri.query().unwrap_or_default())?;
        let repeated = params
            .iter()
            .filter(|(_, v)| v.is_array())
            .map(|(k, _)| k.clone())
            .collect();
        ctx.insert_extension(RepeatedParams(repeated));
        ctx.request.params = params;
        ctx.request.headers = headers;

        let body = body?;
        if !body.is_empty() || content_type.is_some() {
            let (mime_type, encoding) = match content_type {
                Some((mime_type, encoding)) => (Some(mime_type), encoding),
                None => (None, None),
            };
            ctx.request.content = Some(RequestContent::new(body, mime_type, encoding));
        }
        Ok(())
    }

    fn build_response(&self, ctx: &mut Context, rendered: Rendered) -> Response<Full<Bytes>> {
        reply(ctx, StatusCode::OK, Some(rendered))
    }

    fn error_reply(&self, ctx: &mut Context, error: &RpcError, rendered: Option<Rendered>) -> Response<Full<Bytes>> {
        reply(ctx, http_status(error.kind()), rendered)
    }
}

fn reply(ctx: &Context, status: StatusCode, rendered: Option<Rendered>) -> Response<Full<Bytes>> {
    let body = rendered.as_ref().map(|r| r.body.clone()).unwrap_or_default();
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    if let Some(rendered) = &rendered {
        insert_header(headers, CONTENT_TYPE.as_str(), &rendered.content_type());
        for (name, value) in &rendered.headers {
            insert_header(headers, name, value);
        }
    }
    insert_header(headers, REQUEST_ID_HEADER, &ctx.id().to_string());
    response
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) {
    match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
        (Ok(name), Ok(value)) => {
            headers.insert(name, value);
        }
        _ => tracing::warn!(header = name, "dropping response header that is not valid HTTP"),
    }
}
