//! Spatial query handler
//!
//! Answers `GET /{db}/_design/{ddoc}/_spatial/{index}` requests:
//!
//! 1. Reject anything but GET/HEAD with 405
//! 2. Parse and validate the query string
//! 3. Resolve the index through the engine
//! 4. Count mode: reply with the number of matches
//! 5. Row mode: reply 304 when the client's validator matches the ETag,
//!    otherwise stream the matching rows

use crate::body::{empty_body, full_body, HyperSink, SpatialBody};
use crate::encoder::RowStreamEncoder;
use crate::engine::{IndexResolver, ResolvedIndex, SpatialIndexEngine};
use crate::error::{Result, SpatialError, ALLOWED_METHODS};
use crate::etag::{etag_matches, make_etag};
use crate::metrics::QueryMetrics;
use crate::models::{BoundingBox, IndexTarget, QueryArgs};
use http::header::{ALLOW, CACHE_CONTROL, CONTENT_TYPE, ETAG};
use http::request::Parts;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Default capacity of the per-request chunk channel
pub const DEFAULT_STREAM_BUFFER: usize = 16;

/// Spatial query request handler
pub struct SpatialQueryHandler<E: SpatialIndexEngine> {
    resolver: IndexResolver<E>,
    /// Chunks buffered between the encoder task and the connection
    stream_buffer: usize,
    metrics: Option<Arc<QueryMetrics>>,
}

impl<E: SpatialIndexEngine> SpatialQueryHandler<E> {
    /// Create a new handler over an engine
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            resolver: IndexResolver::new(engine),
            stream_buffer: DEFAULT_STREAM_BUFFER,
            metrics: None,
        }
    }

    /// Set the chunk channel capacity
    pub fn with_stream_buffer(mut self, stream_buffer: usize) -> Self {
        self.stream_buffer = stream_buffer.max(1);
        self
    }

    /// Enable metrics collection
    pub fn with_metrics(mut self, metrics: Arc<QueryMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn metrics(&self) -> Option<&Arc<QueryMetrics>> {
        self.metrics.as_ref()
    }

    /// Handle a spatial query request
    ///
    /// Never fails: errors detected before the response starts are rendered
    /// as JSON error responses. Errors after a row stream started abort the
    /// response body instead.
    pub async fn handle<B: Send>(&self, req: Request<B>, target: &IndexTarget) -> Response<SpatialBody> {
        let start_time = Instant::now();
        let (parts, _body) = req.into_parts();

        if let Some(metrics) = &self.metrics {
            metrics.record_request();
        }

        let response = match self.process(&parts, target).await {
            Ok(response) => response,
            Err(e) => {
                if e.is_client_error() {
                    info!("{} {} rejected: {}", parts.method, parts.uri, e);
                } else {
                    warn!("{} {} failed: {}", parts.method, parts.uri, e);
                }
                if let Some(metrics) = &self.metrics {
                    metrics.record_error(&e);
                }
                error_response(&e)
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_head_duration(start_time.elapsed());
        }
        response
    }

    async fn process(&self, parts: &Parts, target: &IndexTarget) -> Result<Response<SpatialBody>> {
        if parts.method != Method::GET && parts.method != Method::HEAD {
            return Err(SpatialError::MethodNotAllowed);
        }

        let args = QueryArgs::from_query(parts.uri.query())?;
        let resolved = self.resolver.resolve(target, args.staleness).await?;

        if args.count_only {
            return self.count_response(&resolved, args.bbox.as_ref()).await;
        }

        let etag = make_etag(&resolved.group, None);
        if etag_matches(&parts.headers, &etag) {
            debug!("{} not modified, ETag {}", target, etag);
            if let Some(metrics) = &self.metrics {
                metrics.record_not_modified();
            }
            return not_modified_response(&etag);
        }

        self.stream_rows(resolved, args.bbox, etag).await
    }

    /// Count mode, no conditional negotiation
    async fn count_response(
        &self,
        resolved: &ResolvedIndex<E::Handle>,
        bbox: Option<&BoundingBox>,
    ) -> Result<Response<SpatialBody>> {
        let count = self.resolver.engine().count(&resolved.handle, bbox).await?;
        debug!("Count mode: {} matches", count);

        let body = count.to_string();
        if let Some(metrics) = &self.metrics {
            metrics.record_count();
            metrics.record_output(0, body.len() as u64);
        }

        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(full_body(body))?)
    }

    /// Row mode: run the fold in its own task and return the response head
    /// as soon as the encoder produced one
    async fn stream_rows(
        &self,
        resolved: ResolvedIndex<E::Handle>,
        bbox: Option<BoundingBox>,
        etag: String,
    ) -> Result<Response<SpatialBody>> {
        let metrics = self.metrics.clone();
        let (sink, head) = HyperSink::new(self.stream_buffer);
        let sink = sink.with_metrics(metrics.clone());
        let encoder = RowStreamEncoder::new(sink, etag, resolved.group.current_generation);
        let engine = Arc::clone(self.resolver.engine());

        if let Some(metrics) = &metrics {
            metrics.record_row_stream();
        }

        let task = tokio::spawn(async move {
            let ResolvedIndex { handle, .. } = resolved;
            let result = encoder.run(engine.as_ref(), &handle, bbox.as_ref()).await;
            if let (Ok(summary), Some(metrics)) = (&result, &metrics) {
                metrics.record_output(summary.rows, summary.bytes);
            }
            result
        });

        match head.await {
            Ok(response) => Ok(response),
            // The task ended without producing a response head.
            Err(_) => match task.await {
                Ok(Ok(_)) => Err(SpatialError::InternalError(
                    "row stream ended without a response".to_string(),
                )),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(SpatialError::InternalError(format!("row stream task failed: {}", e))),
            },
        }
    }
}

/// 304 with the validator that matched
fn not_modified_response(etag: &str) -> Result<Response<SpatialBody>> {
    Ok(Response::builder()
        .status(StatusCode::NOT_MODIFIED)
        .header(ETAG, etag)
        .header(CACHE_CONTROL, "must-revalidate")
        .body(empty_body())?)
}

/// Render an error as a JSON response
pub fn error_response(error: &SpatialError) -> Response<SpatialBody> {
    let status = StatusCode::from_u16(error.to_http_status())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut response = Response::new(full_body(error.to_json_body()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if matches!(error, SpatialError::MethodNotAllowed) {
        response
            .headers_mut()
            .insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    }
    response
}
