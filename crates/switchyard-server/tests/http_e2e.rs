//! End-to-end tests of the HTTP adapter over a real socket.
//!
//! Each test starts a server on an ephemeral port and talks to it with a
//! hyper client connection.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::{header, Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use switchyard_config::HttpConfig;
use switchyard_core::{handler_fn, Args, Endpoint, ExecutionResult, HandlerShape, RpcError};
use switchyard_server::files::StaticFiles;
use switchyard_server::http::{HttpAdapter, MultiParams, Route, REQUEST_ID_HEADER};
use switchyard_server::{Adapter, AdapterState, Server, Service};
use tokio::net::TcpStream;

struct Reply {
    status: StatusCode,
    headers: http::HeaderMap,
    body: String,
}

fn echo_service() -> Service {
    let echo = Endpoint::builder(
        "echo",
        HandlerShape::function().param("data"),
        handler_fn(|args: Args| async move {
            Ok(ExecutionResult::single(args.get("data").cloned().unwrap_or_default()))
        }),
    )
    .build()
    .unwrap();
    echo.attach_child(Route::new("/echo").methods([Method::GET, Method::POST]));

    let fail = Endpoint::builder(
        "fail",
        HandlerShape::function(),
        handler_fn(|_: Args| async { Err::<(), _>(RpcError::internal("database password is hunter2")) }),
    )
    .build()
    .unwrap();
    fail.attach_child(Route::new("/fail"));

    let file = Endpoint::builder(
        "file",
        HandlerShape::function().param("name"),
        handler_fn(|args: Args| async move { Ok(args.get("name").cloned().unwrap_or_default()) }),
    )
    .build()
    .unwrap();
    file.attach_child(Route::new("/files/{name}").methods([Method::GET]));

    let tags = Endpoint::builder(
        "tags",
        HandlerShape::function()
            .params(["tag", "page"])
            .defaults([serde_json::Value::Null]),
        handler_fn(|args: Args| async move { Ok(args.get("tag").cloned().unwrap_or_default()) }),
    )
    .build()
    .unwrap();
    tags.attach_child(
        Route::new("/tags")
            .methods([Method::GET, Method::POST])
            .allow_multi(MultiParams::Only(vec!["tag".into()])),
    );

    let mut service = Service::new("demo");
    service.add_endpoint(echo).unwrap();
    service.add_endpoint(fail).unwrap();
    service.add_endpoint(file).unwrap();
    service.add_endpoint(tags).unwrap();
    service
}

async fn start() -> (Server, SocketAddr) {
    start_with(vec![echo_service()]).await
}

async fn start_with(services: Vec<Service>) -> (Server, SocketAddr) {
    let server = Server::builder().build().unwrap();
    for service in services {
        server.add_service(service).unwrap();
    }
    let adapter = Arc::new(HttpAdapter::new(HttpConfig {
        addr: "127.0.0.1:0".to_string(),
        ..HttpConfig::default()
    }));
    server.add_adapter(adapter.clone()).unwrap();
    server.start().await.unwrap();
    let addr = adapter.local_addr().unwrap();
    (server, addr)
}

async fn send(addr: SocketAddr, request: Request<Full<Bytes>>) -> Reply {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
        .await
        .unwrap();
    tokio::spawn(connection);

    let response = sender.send_request(request).await.unwrap();
    let (parts, body) = response.into_parts();
    let bytes = body.collect().await.unwrap().to_bytes();
    Reply {
        status: parts.status,
        headers: parts.headers,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    }
}

fn get(uri: &str) -> http::request::Builder {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::HOST, "localhost")
}

#[tokio::test]
async fn test_echo_over_query() {
    let (server, addr) = start().await;

    let reply = send(addr, get("/echo?data=x").body(Full::default()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "x");
    assert!(reply.headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/plain"));
    assert!(reply.headers.contains_key(REQUEST_ID_HEADER));

    let reply = send(
        addr,
        get("/echo?data=x")
            .header(header::ACCEPT, "application/json")
            .body(Full::default())
            .unwrap(),
    )
    .await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "\"x\"");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_echo_over_json_body() {
    let (server, addr) = start().await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/echo")
        .header(header::HOST, "localhost")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from_static(br#"{"data": "from body"}"#)))
        .unwrap();
    let reply = send(addr, request).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "from body");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_unknown_parameter_is_bad_request() {
    let (server, addr) = start().await;

    let reply = send(addr, get("/echo?data=x&extra=y").body(Full::default()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    let error = reply.headers["x-server-error"].to_str().unwrap();
    assert!(error.contains("unknown parameter extra"), "{error}");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_internal_error_hides_reason() {
    let (server, addr) = start().await;

    let reply = send(addr, get("/fail").body(Full::default()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    let error = reply.headers["x-server-error"].to_str().unwrap();
    assert!(!error.contains("hunter2"), "{error}");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_routing_errors() {
    let (server, addr) = start().await;

    let reply = send(addr, get("/missing").body(Full::default()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::NOT_FOUND);

    let request = Request::builder()
        .method(Method::DELETE)
        .uri("/echo")
        .header(header::HOST, "localhost")
        .body(Full::default())
        .unwrap();
    let reply = send(addr, request).await;
    assert_eq!(reply.status, StatusCode::METHOD_NOT_ALLOWED);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_ping() {
    let (server, addr) = start().await;

    let reply = send(addr, get("/_ping").body(Full::default()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "OK");

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_stopped_server_refuses_connections() {
    let (server, addr) = start().await;
    server.stop().await.unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
}

fn json_get(uri: &str) -> Request<Full<Bytes>> {
    get(uri)
        .header(header::ACCEPT, "application/json")
        .body(Full::default())
        .unwrap()
}

fn form_post(uri: &str, body: &'static str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::HOST, "localhost")
        .header(header::ACCEPT, "application/json")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap()
}

#[tokio::test]
async fn test_path_parameters_are_decoded() {
    let (server, addr) = start().await;

    let reply = send(addr, get("/files/hello%20world").body(Full::default()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "hello world");

    let reply = send(addr, get("/files/a%2Fb+c").body(Full::default()).unwrap()).await;
    assert_eq!(reply.body, "a/b+c");

    let reply = send(addr, get("/files/%C3%28").body(Full::default()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_multi_value_parameters_keep_one_shape() {
    let (server, addr) = start().await;

    let reply = send(addr, json_get("/tags?tag=a")).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, r#"["a"]"#);

    let reply = send(addr, json_get("/tags?tag=a&tag=b")).await;
    assert_eq!(reply.body, r#"["a","b"]"#);

    let reply = send(addr, form_post("/tags", "tag=x")).await;
    assert_eq!(reply.body, r#"["x"]"#);

    let reply = send(addr, json_get("/tags?tag=a&page=1&page=2")).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);

    let reply = send(addr, form_post("/tags", "tag=x&page=1&page=2")).await;
    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert!(reply.headers["x-server-error"].to_str().unwrap().contains("page"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_unsupported_body_type() {
    let (server, addr) = start().await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/echo")
        .header(header::HOST, "localhost")
        .header(header::CONTENT_TYPE, "application/x-unknown")
        .body(Full::new(Bytes::from_static(b"??")))
        .unwrap();
    let reply = send(addr, request).await;
    assert_eq!(reply.status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(reply.headers.contains_key("x-server-error"));

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_static_files() {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("css")).unwrap();
    std::fs::write(root.path().join("index.html"), "<h1>hi</h1>").unwrap();
    std::fs::write(root.path().join("css/site.css"), "h1 {}").unwrap();
    std::fs::write(root.path().join("data.bin"), "abc").unwrap();
    let outside = tempfile::NamedTempFile::new_in(root.path().parent().unwrap()).unwrap();
    std::fs::write(outside.path(), "secret").unwrap();
    let outside_name = outside.path().file_name().unwrap().to_str().unwrap().to_string();

    let assets = StaticFiles::new(root.path(), "/static/").into_service("assets").unwrap();
    let (server, addr) = start_with(vec![assets]).await;

    let reply = send(addr, get("/static/index.html").body(Full::default()).unwrap()).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "<h1>hi</h1>");
    assert!(reply.headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));

    let reply = send(addr, get("/static/css/site.css").body(Full::default()).unwrap()).await;
    assert_eq!(reply.body, "h1 {}");
    assert!(reply.headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/css"));

    let reply = send(addr, get("/static/data.bin").body(Full::default()).unwrap()).await;
    assert_eq!(reply.body, "abc");
    assert_eq!(reply.headers[header::CONTENT_TYPE], "application/octet-stream");

    let head = Request::builder()
        .method(Method::HEAD)
        .uri("/static/index.html")
        .header(header::HOST, "localhost")
        .body(Full::default())
        .unwrap();
    let reply = send(addr, head).await;
    assert_eq!(reply.status, StatusCode::OK);
    assert!(reply.body.is_empty());

    let escape = format!("/static/..%2F{outside_name}");
    for missing in ["/static/nope.txt", "/static/css", escape.as_str()] {
        let reply = send(addr, get(missing).body(Full::default()).unwrap()).await;
        assert_eq!(reply.status, StatusCode::NOT_FOUND, "{missing}");
        assert!(!reply.body.contains("secret"));
    }

    server.stop().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_start_runs_once() {
    let server = Server::builder().build().unwrap();
    server.add_service(echo_service()).unwrap();
    let adapter = Arc::new(HttpAdapter::new(HttpConfig {
        addr: "127.0.0.1:0".to_string(),
        ..HttpConfig::default()
    }));
    server.add_adapter(adapter.clone()).unwrap();

    let (a, b) = tokio::join!(adapter.start(), adapter.start());
    assert_eq!(usize::from(a.is_ok()) + usize::from(b.is_ok()), 1, "{a:?} {b:?}");
    assert_eq!(adapter.state(), AdapterState::Started);

    let addr = adapter.local_addr().unwrap();
    adapter.stop().await.unwrap();
    assert!(TcpStream::connect(addr).await.is_err());
}
