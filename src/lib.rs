//! Spatial View
//!
//! An HTTP query layer for spatial (bounding-box) indexes. A client asks for
//! every entry of a named spatial index whose bounding box intersects a query
//! box, and gets the matches back as a streamed JSON document, as a bare
//! count, or as `304 Not Modified` when its cached copy is still current.
//!
//! # Overview
//!
//! ```text
//! GET /{db}/_design/{ddoc}/_spatial/{index}?bbox=[w,s,e,n]&stale=ok&count=true
//! ```
//!
//! A request goes through four stages:
//!
//! - [`QueryArgs`]: parses and validates the query string (`bbox`, `stale`,
//!   `count`)
//! - [`IndexResolver`]: asks the [`SpatialIndexEngine`] for the index and the
//!   generation it reflects
//! - [`make_etag`] / [`etag_matches`]: derives the validator and answers 304
//!   when the client already has it
//! - [`RowStreamEncoder`]: folds over the matching rows and writes them as a
//!   chunked JSON document
//!
//! The document looks like this:
//!
//! ```text
//! {"update_seq":12,"rows":[
//! {"id":"a","bbox":[0.0,0.0,1.0,1.0],"value":null},
//! {"id":"b","bbox":[2.0,2.0,3.0,3.0],"value":null}
//! ]}
//! ```
//!
//! and an index with no matching rows answers a plain `{}`.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use spatial_view::{MemorySpatialEngine, ServerConfig, SpatialServer};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ServerConfig::from_file("spatial_view.yaml")?;
//! let engine = Arc::new(MemorySpatialEngine::from_seed_file("demos/places.json")?);
//!
//! SpatialServer::new(engine, &config)
//!     .run(config.socket_addr()?)
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod body;
pub mod config;
pub mod encoder;
pub mod engine;
pub mod error;
pub mod etag;
pub mod handler;
pub mod memory_engine;
pub mod metrics;
pub mod models;
pub mod query_args;
pub mod server;

pub use body::{ChannelBody, HyperSink, SpatialBody};
pub use config::ServerConfig;
pub use encoder::{JsonRowFormatter, ResponseSink, RowFormatter, RowStreamEncoder, StreamState, StreamSummary};
pub use engine::{IndexResolver, ResolvedIndex, RowVisitor, SpatialIndexEngine};
pub use error::{Result, SpatialError};
pub use etag::{etag_matches, make_etag};
pub use handler::SpatialQueryHandler;
pub use memory_engine::{EngineSeed, MemoryIndexHandle, MemorySpatialEngine};
pub use metrics::{MetricsSnapshot, QueryMetrics};
pub use models::{BoundingBox, IndexGroup, IndexTarget, QueryArgs, Row, Signature, Staleness};
pub use query_args::QueryParam;
pub use server::{route, Route, SpatialServer};
