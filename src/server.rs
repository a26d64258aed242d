//! HTTP server
//!
//! Accepts HTTP/1 connections with hyper and routes them to the spatial
//! query handler, the health check or the metrics endpoint. Every
//! connection is served on its own tokio task.

use crate::body::{full_body, SpatialBody};
use crate::config::ServerConfig;
use crate::engine::SpatialIndexEngine;
use crate::error::{Result, SpatialError};
use crate::handler::{error_response, SpatialQueryHandler};
use crate::metrics::QueryMetrics;
use crate::models::IndexTarget;
use http::header::CONTENT_TYPE;
use http::{Method, Request, Response, StatusCode};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use percent_encoding::percent_decode_str;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// Where a request path leads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Health,
    Metrics,
    Spatial(IndexTarget),
    NotFound,
}

/// Map a request path to a [`Route`]
///
/// Spatial queries live at `/{db}/_design/{ddoc}/_spatial/{index}`. Each
/// segment is percent-decoded after splitting, so an encoded `/` stays part
/// of its segment.
pub fn route(path: &str) -> Route {
    match path {
        "/_health" => return Route::Health,
        "/_metrics" => return Route::Metrics,
        _ => {}
    }

    let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let [db, design, ddoc, spatial, index] = segments.as_slice() else {
        return Route::NotFound;
    };
    if *design != "_design" || *spatial != "_spatial" {
        return Route::NotFound;
    }

    let decoded = [db, ddoc, index].map(|segment| {
        percent_decode_str(segment)
            .decode_utf8()
            .ok()
            .filter(|s| !s.is_empty())
    });
    match decoded {
        [Some(db), Some(ddoc), Some(index)] => {
            Route::Spatial(IndexTarget::new(db.into_owned(), &ddoc, index.into_owned()))
        }
        _ => Route::NotFound,
    }
}

/// The spatial view HTTP server
pub struct SpatialServer<E: SpatialIndexEngine> {
    handler: Arc<SpatialQueryHandler<E>>,
    metrics: Arc<QueryMetrics>,
    expose_metrics: bool,
}

impl<E: SpatialIndexEngine> Clone for SpatialServer<E> {
    fn clone(&self) -> Self {
        SpatialServer {
            handler: Arc::clone(&self.handler),
            metrics: Arc::clone(&self.metrics),
            expose_metrics: self.expose_metrics,
        }
    }
}

impl<E: SpatialIndexEngine> SpatialServer<E> {
    /// Create a server over an engine
    ///
    /// # Arguments
    /// * `engine` - Spatial index engine answering the queries
    /// * `config` - Server configuration (stream buffer, metrics exposure)
    pub fn new(engine: Arc<E>, config: &ServerConfig) -> Self {
        let metrics = Arc::new(QueryMetrics::new());
        let handler = SpatialQueryHandler::new(engine)
            .with_stream_buffer(config.stream_buffer)
            .with_metrics(Arc::clone(&metrics));

        Self {
            handler: Arc::new(handler),
            metrics,
            expose_metrics: config.expose_metrics,
        }
    }

    pub fn metrics(&self) -> &Arc<QueryMetrics> {
        &self.metrics
    }

    /// Bind `addr` and serve until the task is cancelled
    pub async fn run(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve connections accepted on `listener`
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        info!("Spatial view server listening on http://{}", listener.local_addr()?);

        loop {
            let (stream, peer) = listener.accept().await?;
            debug!("Accepted connection from {}", peer);
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::task::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.dispatch(req).await) }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    error!("Error serving connection from {}: {:?}", peer, err);
                }
            });
        }
    }

    /// Route one request
    pub async fn dispatch(&self, req: Request<Incoming>) -> Response<SpatialBody> {
        match route(req.uri().path()) {
            Route::Spatial(target) => self.handler.handle(req, &target).await,
            Route::Health => read_only(req.method()).unwrap_or_else(health_response),
            Route::Metrics if self.expose_metrics => {
                read_only(req.method()).unwrap_or_else(|| self.metrics_response())
            }
            Route::Metrics | Route::NotFound => {
                debug!("No route for {} {}", req.method(), req.uri().path());
                error_response(&SpatialError::NotFound("no_route".to_string()))
            }
        }
    }

    fn metrics_response(&self) -> Response<SpatialBody> {
        let body = self.metrics.get_stats().format_prometheus();
        text_response(body, "text/plain; version=0.0.4; charset=utf-8")
    }
}

/// 405 for anything but GET/HEAD, `None` otherwise
fn read_only(method: &Method) -> Option<Response<SpatialBody>> {
    if method == Method::GET || method == Method::HEAD {
        None
    } else {
        Some(error_response(&SpatialError::MethodNotAllowed))
    }
}

fn health_response() -> Response<SpatialBody> {
    text_response(r#"{"status":"ok"}"#, "application/json")
}

fn text_response(body: impl Into<bytes::Bytes>, content_type: &'static str) -> Response<SpatialBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, http::HeaderValue::from_static(content_type));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_fixed_paths() {
        assert_eq!(route("/_health"), Route::Health);
        assert_eq!(route("/_metrics"), Route::Metrics);
        assert_eq!(route("/"), Route::NotFound);
        assert_eq!(route("/db"), Route::NotFound);
    }

    #[test]
    fn test_route_spatial_path() {
        assert_eq!(
            route("/places/_design/geo/_spatial/points"),
            Route::Spatial(IndexTarget::new("places", "geo", "points"))
        );
    }

    #[test]
    fn test_route_decodes_segments() {
        let Route::Spatial(target) = route("/my%2Fdb/_design/geo%20x/_spatial/pts") else {
            panic!("expected a spatial route");
        };
        assert_eq!(target.database, "my/db");
        assert_eq!(target.design_doc_id, "_design/geo x");
        assert_eq!(target.index_name, "pts");
    }

    #[test]
    fn test_route_rejects_malformed_spatial_paths() {
        assert_eq!(route("/places/_design/geo/_view/points"), Route::NotFound);
        assert_eq!(route("/places/design/geo/_spatial/points"), Route::NotFound);
        assert_eq!(route("/places/_design/geo/_spatial/points/extra"), Route::NotFound);
        assert_eq!(route("/places/_design//_spatial/points"), Route::NotFound);
        assert_eq!(route("/places/_design/geo/_spatial/%FF"), Route::NotFound);
    }

    #[test]
    fn test_read_only() {
        assert!(read_only(&Method::GET).is_none());
        assert!(read_only(&Method::HEAD).is_none());
        let response = read_only(&Method::DELETE).unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }
}
