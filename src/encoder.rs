//! Streaming result encoder
//!
//! Turns the rows produced by an engine fold into a chunked response without
//! ever holding more than one row in memory. The encoder is a small state
//! machine:
//!
//! - `NotStarted`: nothing written yet. The first row starts the chunked
//!   response (status, headers, body prefix) and is written right after
//!   the prefix.
//! - `Started`: every further row is preceded by the separator held back
//!   from the previous row, so the last row is never followed by one.
//!
//! When the fold completes, a started stream gets its suffix and is closed;
//! a stream that never started is answered with the formatter's (non-chunked)
//! empty body instead.

use crate::engine::{RowVisitor, SpatialIndexEngine};
use crate::error::{Result, SpatialError};
use crate::models::{BoundingBox, Row};
use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use http::header::{CACHE_CONTROL, CONTENT_TYPE, ETAG};
use http::{HeaderMap, HeaderValue, StatusCode};
use tracing::{debug, info, warn};

/// Output format of a row stream
pub trait RowFormatter: Send + Sync {
    fn content_type(&self) -> &'static str;

    /// Body prefix written when the stream begins
    fn begin(&self, update_seq: u64) -> Bytes;

    /// Encoding of a single row
    fn row(&self, row: &Row) -> Result<Bytes>;

    /// Written between two consecutive rows
    fn separator(&self) -> &'static [u8];

    /// Body suffix written after the last row
    fn end(&self) -> &'static [u8];

    /// Complete body for a fold that produced no rows
    fn empty(&self) -> Bytes;
}

/// `{"update_seq":N,"rows":[ ... ]}` with one row object per line
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRowFormatter;

impl RowFormatter for JsonRowFormatter {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn begin(&self, update_seq: u64) -> Bytes {
        Bytes::from(format!("{{\"update_seq\":{},\"rows\":[\r\n", update_seq))
    }

    fn row(&self, row: &Row) -> Result<Bytes> {
        Ok(Bytes::from(serde_json::to_vec(row)?))
    }

    fn separator(&self) -> &'static [u8] {
        b",\r\n"
    }

    fn end(&self) -> &'static [u8] {
        b"\r\n]}"
    }

    fn empty(&self) -> Bytes {
        Bytes::from_static(b"{}")
    }
}

/// Destination of an encoded response
///
/// A response is either one chunked stream (`start_chunked`, any number of
/// `send_chunk`, then `finish_chunked` or `abort`) or a single complete
/// body (`send_complete`).
#[async_trait]
pub trait ResponseSink: Send {
    /// Send the response head of a 200 chunked response
    async fn start_chunked(&mut self, headers: HeaderMap) -> Result<()>;

    async fn send_chunk(&mut self, chunk: Bytes) -> Result<()>;

    /// Close a chunked response normally
    async fn finish_chunked(&mut self) -> Result<()>;

    /// Terminate a chunked response after a failure; the client sees an
    /// incomplete body
    async fn abort(&mut self, error: SpatialError);

    /// Send a complete, non-chunked response
    async fn send_complete(&mut self, status: StatusCode, headers: HeaderMap, body: Bytes) -> Result<()>;
}

/// Encoder state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    NotStarted,
    Started {
        /// Separator owed to the next row
        pending_separator: &'static [u8],
    },
}

/// What a finished encoder wrote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamSummary {
    pub rows: u64,
    pub bytes: u64,
    /// Whether the chunked shape was used (false for the empty body)
    pub streamed: bool,
}

/// Fold-driven row stream encoder
pub struct RowStreamEncoder<S: ResponseSink, F: RowFormatter = JsonRowFormatter> {
    sink: S,
    formatter: F,
    etag: String,
    update_seq: u64,
    state: StreamState,
    rows: u64,
    bytes: u64,
}

impl<S: ResponseSink> RowStreamEncoder<S, JsonRowFormatter> {
    /// Create a JSON encoder for one response
    ///
    /// # Arguments
    /// * `sink` - Where the response goes
    /// * `etag` - Negotiated ETag, sent with the stream's headers
    /// * `update_seq` - Generation the index was resolved at
    pub fn new(sink: S, etag: String, update_seq: u64) -> Self {
        Self::with_formatter(sink, JsonRowFormatter, etag, update_seq)
    }
}

impl<S: ResponseSink, F: RowFormatter> RowStreamEncoder<S, F> {
    pub fn with_formatter(sink: S, formatter: F, etag: String, update_seq: u64) -> Self {
        RowStreamEncoder {
            sink,
            formatter,
            etag,
            update_seq,
            state: StreamState::NotStarted,
            rows: 0,
            bytes: 0,
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        matches!(self.state, StreamState::Started { .. })
    }

    /// Drive `engine`'s fold through this encoder and finish the response
    ///
    /// A fold failure after the stream started aborts the response; before
    /// that, nothing has been written and the error is simply returned. A
    /// client that went away has no response left to abort.
    pub async fn run<E: SpatialIndexEngine>(
        mut self,
        engine: &E,
        handle: &E::Handle,
        bbox: Option<&BoundingBox>,
    ) -> Result<StreamSummary> {
        match engine.fold(handle, bbox, &mut self).await {
            Ok(()) => self.finish().await,
            Err(SpatialError::ClientDisconnected) => {
                info!(
                    "Client disconnected after {} rows ({} bytes)",
                    self.rows, self.bytes
                );
                Err(SpatialError::ClientDisconnected)
            }
            Err(e) => {
                if self.is_started() {
                    warn!(
                        "Row stream failed after {} rows ({} bytes): {}",
                        self.rows, self.bytes, e
                    );
                    self.sink.abort(e.clone()).await;
                }
                Err(e)
            }
        }
    }

    /// Encode one row, starting the response if this is the first
    pub async fn push_row(&mut self, row: &Row) -> Result<()> {
        let encoded = self.formatter.row(row)?;
        let separator = self.formatter.separator();

        let chunk = match self.state {
            StreamState::NotStarted => {
                let headers = self.stream_headers()?;
                self.sink.start_chunked(headers).await?;
                let prefix = self.formatter.begin(self.update_seq);
                let mut chunk = BytesMut::with_capacity(prefix.len() + encoded.len());
                chunk.put(prefix);
                chunk.put(encoded);
                debug!("Row stream started: update_seq={}", self.update_seq);
                chunk.freeze()
            }
            StreamState::Started { pending_separator } => {
                let mut chunk = BytesMut::with_capacity(pending_separator.len() + encoded.len());
                chunk.put_slice(pending_separator);
                chunk.put(encoded);
                chunk.freeze()
            }
        };

        self.state = StreamState::Started {
            pending_separator: separator,
        };
        self.send(chunk).await?;
        self.rows += 1;
        Ok(())
    }

    /// Complete the response once the fold is done
    pub async fn finish(mut self) -> Result<StreamSummary> {
        match self.state {
            StreamState::Started { .. } => {
                self.send(Bytes::from_static(self.formatter.end())).await?;
                self.sink.finish_chunked().await?;
                debug!("Row stream finished: {} rows, {} bytes", self.rows, self.bytes);
                Ok(StreamSummary {
                    rows: self.rows,
                    bytes: self.bytes,
                    streamed: true,
                })
            }
            StreamState::NotStarted => {
                let body = self.formatter.empty();
                let bytes = body.len() as u64;
                let mut headers = HeaderMap::new();
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.formatter.content_type()));
                self.sink.send_complete(StatusCode::OK, headers, body).await?;
                debug!("No rows matched, sent empty body");
                Ok(StreamSummary {
                    rows: 0,
                    bytes,
                    streamed: false,
                })
            }
        }
    }

    fn stream_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(self.formatter.content_type()));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("must-revalidate"));
        headers.insert(
            ETAG,
            HeaderValue::from_str(&self.etag)
                .map_err(|e| SpatialError::HttpError(format!("Invalid ETag header value: {}", e)))?,
        );
        Ok(headers)
    }

    async fn send(&mut self, chunk: Bytes) -> Result<()> {
        let len = chunk.len() as u64;
        self.sink.send_chunk(chunk).await?;
        self.bytes += len;
        Ok(())
    }
}

#[async_trait]
impl<S: ResponseSink, F: RowFormatter> RowVisitor for RowStreamEncoder<S, F> {
    async fn visit(&mut self, row: Row) -> Result<()> {
        self.push_row(&row).await
    }
}
