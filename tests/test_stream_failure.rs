//! Failure handling while rows are being streamed
//!
//! An engine failure before the first row is rendered as a clean error
//! response. After the first row the status line is already on the wire, so
//! the body is cut short instead. A client that goes away stops the fold.

use async_trait::async_trait;
use http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use spatial_view::{
    BoundingBox, IndexGroup, IndexTarget, QueryMetrics, Result, Row, RowVisitor, Signature,
    SpatialError, SpatialIndexEngine, SpatialQueryHandler, Staleness,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Engine that produces `rows` rows, then fails if `fail` is set
struct ScriptedEngine {
    rows: usize,
    fail: bool,
    visited: AtomicUsize,
    outcome: Mutex<Option<Result<()>>>,
}

impl ScriptedEngine {
    fn new(rows: usize, fail: bool) -> Self {
        ScriptedEngine {
            rows,
            fail,
            visited: AtomicUsize::new(0),
            outcome: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SpatialIndexEngine for ScriptedEngine {
    type Handle = ();

    async fn get_index(
        &self,
        _database: &str,
        _design_doc_id: &str,
        _index_name: &str,
        _staleness: Staleness,
    ) -> Result<((), IndexGroup)> {
        Ok((
            (),
            IndexGroup {
                signature: Signature([1; 16]),
                current_generation: 7,
            },
        ))
    }

    async fn fold(
        &self,
        _handle: &(),
        _bbox: Option<&BoundingBox>,
        visitor: &mut (dyn RowVisitor + '_),
    ) -> Result<()> {
        let result: Result<()> = async {
            for i in 0..self.rows {
                let row = Row::new(format!("doc{}", i), BoundingBox::new(vec![0.0, 0.0, 1.0, 1.0]), json!(i));
                visitor.visit(row).await?;
                self.visited.fetch_add(1, Ordering::SeqCst);
            }
            if self.fail {
                Err(SpatialError::engine("disk gone"))
            } else {
                Ok(())
            }
        }
        .await;

        *self.outcome.lock().unwrap() = Some(result.clone());
        result
    }

    async fn count(&self, _handle: &(), _bbox: Option<&BoundingBox>) -> Result<u64> {
        Ok(self.rows as u64)
    }
}

fn request() -> Request<()> {
    Request::builder()
        .uri("/db/_design/geo/_spatial/idx")
        .body(())
        .unwrap()
}

fn target() -> IndexTarget {
    IndexTarget::new("db", "geo", "idx")
}

#[tokio::test]
async fn test_failure_before_first_row_is_a_clean_error() {
    let handler = SpatialQueryHandler::new(Arc::new(ScriptedEngine::new(0, true)));

    let response = handler.handle(request(), &target()).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "engine_failure");
}

#[tokio::test]
async fn test_failure_after_first_row_aborts_the_body() {
    let metrics = Arc::new(QueryMetrics::new());
    let handler = SpatialQueryHandler::new(Arc::new(ScriptedEngine::new(2, true)))
        .with_metrics(Arc::clone(&metrics));

    let response = handler.handle(request(), &target()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let mut body = response.into_body();
    let mut received = Vec::new();
    let mut error = None;
    while let Some(frame) = body.frame().await {
        match frame {
            Ok(frame) => {
                if let Ok(data) = frame.into_data() {
                    received.extend_from_slice(&data);
                }
            }
            Err(e) => {
                error = Some(e);
                break;
            }
        }
    }

    assert_eq!(error, Some(SpatialError::engine("disk gone")));
    let received = String::from_utf8(received).unwrap();
    assert!(received.starts_with("{\"update_seq\":7,\"rows\":[\r\n"));
    assert!(received.contains("\"doc1\""));
    assert!(!received.ends_with("]}"));

    let stats = metrics.get_stats();
    assert_eq!(stats.aborted_streams, 1);
    assert_eq!(stats.engine_failures, 1);
}

#[tokio::test]
async fn test_client_disconnect_stops_the_fold() {
    let engine = Arc::new(ScriptedEngine::new(10_000, false));
    let metrics = Arc::new(QueryMetrics::new());
    let handler = SpatialQueryHandler::new(Arc::clone(&engine))
        .with_stream_buffer(1)
        .with_metrics(Arc::clone(&metrics));

    let response = handler.handle(request(), &target()).await;
    assert_eq!(response.status(), StatusCode::OK);
    drop(response);

    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(outcome) = engine.outcome.lock().unwrap().clone() {
                return outcome;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(outcome, Err(SpatialError::ClientDisconnected));
    assert!(engine.visited.load(Ordering::SeqCst) < 10_000);

    // A departed client is neither an aborted stream nor an engine failure
    let stats = metrics.get_stats();
    assert_eq!(stats.aborted_streams, 0);
    assert_eq!(stats.engine_failures, 0);
}
