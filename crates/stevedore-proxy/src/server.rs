//! The reverse-proxy request path.
//!
//! Resolves the target app from the Host header, selects a healthy
//! instance, and streams the exchange both ways without buffering bodies.
//! End users only ever see a bare status and minimal text; internal
//! errors stay internal.

use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST};
use http::{Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper_util::rt::TokioIo;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use stevedore_health::HealthMap;
use stevedore_store::Instance;

use crate::table::RoutingTable;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Unified response body: fixed texts and streamed upstream bodies.
pub type ProxyBody = UnsyncBoxBody<Bytes, BoxError>;

const UPSTREAM_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on waiting for upstream response *headers*. Streaming bodies are
/// deliberately not bounded; a slow body only affects its own request.
const UPSTREAM_HEADER_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle one inbound request.
///
/// `GET /_ping` short-circuits with the router's own liveness answer. A
/// transport failure while proxying marks the chosen instance unhealthy
/// immediately (faster than the next sweep) and answers `503`; there is
/// no retry against a different instance.
pub async fn handle<B>(
    req: Request<B>,
    table: &RoutingTable,
    health: &HealthMap,
) -> Response<ProxyBody>
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    if req.uri().path() == "/_ping" {
        return text(StatusCode::OK, "pong");
    }

    let app = req
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(|host| host.split(':').next().unwrap_or_default().to_string())
        .filter(|host| !host.is_empty());
    let Some(app) = app else {
        return text(StatusCode::BAD_REQUEST, "Invalid hostname");
    };

    let Some(instances) = table.lookup(&app) else {
        return text(StatusCode::NOT_FOUND, &format!("No backend found for {app}"));
    };
    if instances.is_empty() {
        return text(
            StatusCode::SERVICE_UNAVAILABLE,
            &format!("No available backend for {app}"),
        );
    }
    let Some(instance) = table.select_instance(&app, health) else {
        return text(
            StatusCode::SERVICE_UNAVAILABLE,
            &format!("No available backend for {app}"),
        );
    };

    debug!(%app, backend = %instance, method = %req.method(), path = %req.uri().path(), "proxying");
    match forward(req, &instance).await {
        Ok(response) => response,
        Err(err) => {
            warn!(%app, backend = %instance, error = %err, "proxy failed; marking backend unhealthy");
            health.mark_unhealthy(&instance.endpoint());
            text(StatusCode::SERVICE_UNAVAILABLE, "Upstream unavailable")
        }
    }
}

/// Stream the request to `instance` and relay the response verbatim.
async fn forward<B>(req: Request<B>, instance: &Instance) -> Result<Response<ProxyBody>, BoxError>
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Into<BoxError>,
{
    let endpoint = instance.endpoint();
    let stream = timeout(UPSTREAM_CONNECT_TIMEOUT, TcpStream::connect(&endpoint)).await??;
    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;
    tokio::spawn(async move {
        let _ = conn.await;
    });

    // Same method, path, and headers; only the request target changes to
    // origin-form against the backend.
    let (parts, body) = req.into_parts();
    let target = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let mut outbound = Request::builder()
        .method(parts.method)
        .uri(target)
        .body(body)?;
    *outbound.headers_mut() = parts.headers;

    let response = timeout(UPSTREAM_HEADER_TIMEOUT, sender.send_request(outbound)).await??;
    Ok(response.map(|body| body.map_err(|e| Box::new(e) as BoxError).boxed_unsync()))
}

fn text(status: StatusCode, message: &str) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(
            Full::new(Bytes::from(message.to_string()))
                .map_err(|never| match never {})
                .boxed_unsync(),
        )
        .expect("static response")
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;
    use std::convert::Infallible;
    use std::net::SocketAddr;

    use hyper::server::conn::http1;
    use hyper::service::service_fn;
    use tokio::net::TcpListener;

    fn table_of(app: &str, addrs: &[SocketAddr]) -> RoutingTable {
        let table = RoutingTable::new();
        let mut snapshot = HashMap::new();
        snapshot.insert(
            app.to_string(),
            addrs
                .iter()
                .map(|a| Instance::new(a.ip().to_string(), a.port()))
                .collect(),
        );
        table.replace(snapshot);
        table
    }

    fn request(path: &str, host: Option<&str>) -> Request<Full<Bytes>> {
        let mut builder = Request::builder().method("GET").uri(path);
        if let Some(host) = host {
            builder = builder.header(HOST, host);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    async fn body_text(response: Response<ProxyBody>) -> String {
        let collected = response.into_body().collect().await.unwrap();
        String::from_utf8(collected.to_bytes().to_vec()).unwrap()
    }

    /// Backend that echoes the request's method and path.
    async fn spawn_echo_backend() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (stream, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    let svc = service_fn(|req: Request<hyper::body::Incoming>| async move {
                        let body = format!("{} {}", req.method(), req.uri());
                        Ok::<_, Infallible>(
                            Response::builder()
                                .status(200)
                                .header("x-backend", "echo")
                                .body(Full::new(Bytes::from(body)))
                                .unwrap(),
                        )
                    });
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), svc)
                        .await;
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn ping_short_circuits_for_any_host() {
        let table = RoutingTable::new();
        let health = HealthMap::new();
        let response = handle(request("/_ping", None), &table, &health).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "pong");
    }

    #[tokio::test]
    async fn missing_host_header_is_a_bad_request() {
        let table = RoutingTable::new();
        let health = HealthMap::new();
        let response = handle(request("/", None), &table, &health).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_app_is_not_found() {
        let table = RoutingTable::new();
        let health = HealthMap::new();
        let response = handle(request("/", Some("ghost.example.com")), &table, &health).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn app_with_no_instances_is_unavailable() {
        let table = table_of("bare.example.com", &[]);
        let health = HealthMap::new();
        let response = handle(request("/", Some("bare.example.com")), &table, &health).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn fully_unhealthy_app_is_unavailable() {
        let backend = spawn_echo_backend().await;
        let table = table_of("app.example.com", &[backend]);
        let health = HealthMap::new();
        health.mark_unhealthy(&backend.to_string());

        let response = handle(request("/", Some("app.example.com")), &table, &health).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn proxies_method_path_and_response_verbatim() {
        let backend = spawn_echo_backend().await;
        let table = table_of("app.example.com", &[backend]);
        let health = HealthMap::new();

        let response = handle(
            request("/widgets?page=2", Some("app.example.com:80")),
            &table,
            &health,
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-backend"], "echo");
        assert_eq!(body_text(response).await, "GET /widgets?page=2");
    }

    #[tokio::test]
    async fn upstream_failure_marks_instance_and_answers_503() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead = listener.local_addr().unwrap();
        drop(listener);

        let table = table_of("app.example.com", &[dead]);
        let health = HealthMap::new();

        let response = handle(request("/", Some("app.example.com")), &table, &health).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(health.is_unhealthy(&dead.to_string()));
    }
}
