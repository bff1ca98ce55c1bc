//! Host-header dispatch between the admin API and the reverse proxy.
//!
//! One listener serves both planes: requests whose hostname matches the
//! configured controller host go to the admin router, everything else is
//! proxied to the named app's instances.

use std::sync::Arc;

use axum::Router;
use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST};
use http::{Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use tower::ServiceExt;

use stevedore_health::HealthMap;
use stevedore_proxy::{BoxError, ProxyBody, RoutingTable};

pub struct Gateway {
    controller_host: String,
    admin: Router,
    table: Arc<RoutingTable>,
    health: Arc<HealthMap>,
}

impl Gateway {
    pub fn new(
        controller_host: String,
        admin: Router,
        table: Arc<RoutingTable>,
        health: Arc<HealthMap>,
    ) -> Self {
        Self {
            controller_host,
            admin,
            table,
            health,
        }
    }

    /// Route one request to the admin router or the proxy.
    pub async fn dispatch<B>(&self, req: Request<B>) -> Response<ProxyBody>
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<BoxError>,
    {
        let hostname = req
            .headers()
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .map(|host| host.split(':').next().unwrap_or_default().to_string())
            .filter(|host| !host.is_empty());
        let Some(hostname) = hostname else {
            return bad_request();
        };

        if hostname == self.controller_host {
            let response = match self.admin.clone().oneshot(req.map(axum::body::Body::new)).await {
                Ok(response) => response,
                Err(never) => match never {},
            };
            response.map(|body| body.map_err(|e| Box::new(e) as BoxError).boxed_unsync())
        } else {
            stevedore_proxy::handle(req, &self.table, &self.health).await
        }
    }
}

fn bad_request() -> Response<ProxyBody> {
    Response::builder()
        .status(StatusCode::BAD_REQUEST)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(
            Full::new(Bytes::from_static(b"Invalid hostname"))
                .map_err(|never| match never {})
                .boxed_unsync(),
        )
        .expect("static response")
}
