//! Response bodies and the hyper-backed response sink
//!
//! Complete responses use a [`Full`] body. Row streams use a
//! [`ChannelBody`] fed by a bounded channel: the encoder task writes chunks
//! into it while hyper drains it to the socket. The channel gives
//! backpressure, and a dropped receiver (client gone) turns the next write
//! into `SpatialError::ClientDisconnected`.

use crate::encoder::ResponseSink;
use crate::error::{Result, SpatialError};
use crate::metrics::QueryMetrics;
use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body, Frame};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Body type of every response this crate produces
pub type SpatialBody = BoxBody<Bytes, SpatialError>;

/// A complete body
pub fn full_body(data: impl Into<Bytes>) -> SpatialBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

/// A body with no data
pub fn empty_body() -> SpatialBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

/// Chunked body fed through a channel
///
/// An `Err` item ends the body with an error, which makes hyper abort the
/// connection instead of terminating the chunked encoding cleanly.
pub struct ChannelBody {
    rx: mpsc::Receiver<Result<Bytes>>,
}

impl ChannelBody {
    pub fn new(rx: mpsc::Receiver<Result<Bytes>>) -> Self {
        ChannelBody { rx }
    }
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = SpatialError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Bytes>, SpatialError>>> {
        match ready!(self.rx.poll_recv(cx)) {
            Some(Ok(data)) => Poll::Ready(Some(Ok(Frame::data(data)))),
            Some(Err(e)) => Poll::Ready(Some(Err(e))),
            None => Poll::Ready(None),
        }
    }
}

/// [`ResponseSink`] that hands the response to hyper
///
/// The response head is delivered once through a oneshot channel, either
/// with a [`ChannelBody`] (chunked) or a complete body.
pub struct HyperSink {
    head: Option<oneshot::Sender<Response<SpatialBody>>>,
    chunks: Option<mpsc::Sender<Result<Bytes>>>,
    buffer: usize,
    metrics: Option<Arc<QueryMetrics>>,
}

impl HyperSink {
    /// Create a sink and the receiver its response head will arrive on
    ///
    /// # Arguments
    /// * `buffer` - Chunks that may be queued before the writer has to wait
    pub fn new(buffer: usize) -> (Self, oneshot::Receiver<Response<SpatialBody>>) {
        let (tx, rx) = oneshot::channel();
        let sink = HyperSink {
            head: Some(tx),
            chunks: None,
            buffer: buffer.max(1),
            metrics: None,
        };
        (sink, rx)
    }

    /// Count aborted streams
    pub fn with_metrics(mut self, metrics: Option<Arc<QueryMetrics>>) -> Self {
        self.metrics = metrics;
        self
    }

    fn send_head(&mut self, response: Response<SpatialBody>) -> Result<()> {
        let head = self
            .head
            .take()
            .ok_or_else(|| SpatialError::InternalError("response already started".to_string()))?;
        head.send(response)
            .map_err(|_| SpatialError::ClientDisconnected)
    }
}

fn build_response(status: StatusCode, headers: HeaderMap, body: SpatialBody) -> Response<SpatialBody> {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

#[async_trait]
impl ResponseSink for HyperSink {
    async fn start_chunked(&mut self, headers: HeaderMap) -> Result<()> {
        let (tx, rx) = mpsc::channel(self.buffer);
        let body = ChannelBody::new(rx).boxed();
        self.send_head(build_response(StatusCode::OK, headers, body))?;
        self.chunks = Some(tx);
        Ok(())
    }

    async fn send_chunk(&mut self, chunk: Bytes) -> Result<()> {
        let chunks = self
            .chunks
            .as_ref()
            .ok_or_else(|| SpatialError::InternalError("chunk sent before response start".to_string()))?;
        chunks
            .send(Ok(chunk))
            .await
            .map_err(|_| SpatialError::ClientDisconnected)
    }

    async fn finish_chunked(&mut self) -> Result<()> {
        // Dropping the sender ends the body.
        self.chunks.take();
        Ok(())
    }

    async fn abort(&mut self, error: SpatialError) {
        if let Some(chunks) = self.chunks.take() {
            if let Some(metrics) = &self.metrics {
                metrics.record_aborted_stream();
                metrics.record_error(&error);
            }
            if chunks.send(Err(error)).await.is_err() {
                debug!("Abort after client already went away");
            }
        }
    }

    async fn send_complete(&mut self, status: StatusCode, headers: HeaderMap, body: Bytes) -> Result<()> {
        self.send_head(build_response(status, headers, full_body(body)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_body_yields_chunks_in_order() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"ab"))).await.unwrap();
        tx.send(Ok(Bytes::from_static(b"cd"))).await.unwrap();
        drop(tx);

        let collected = ChannelBody::new(rx).collect().await.unwrap().to_bytes();
        assert_eq!(collected.as_ref(), b"abcd");
    }

    #[tokio::test]
    async fn test_channel_body_error_ends_body() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(Ok(Bytes::from_static(b"ab"))).await.unwrap();
        tx.send(Err(SpatialError::engine("disk gone"))).await.unwrap();
        drop(tx);

        let result = ChannelBody::new(rx).collect().await;
        assert_eq!(result.unwrap_err(), SpatialError::engine("disk gone"));
    }

    #[tokio::test]
    async fn test_hyper_sink_complete_response() {
        let (mut sink, head) = HyperSink::new(4);
        sink.send_complete(StatusCode::OK, HeaderMap::new(), Bytes::from_static(b"{}"))
            .await
            .unwrap();

        let response = head.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.as_ref(), b"{}");
    }

    #[tokio::test]
    async fn test_hyper_sink_detects_disconnect() {
        let (mut sink, head) = HyperSink::new(1);
        sink.start_chunked(HeaderMap::new()).await.unwrap();
        drop(head.await.unwrap());

        let err = sink.send_chunk(Bytes::from_static(b"x")).await.unwrap_err();
        assert_eq!(err, SpatialError::ClientDisconnected);
    }
}
