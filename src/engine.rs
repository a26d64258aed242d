//! Interfaces to the spatial index engine, and the index resolver adapter
//!
//! The engine owns index construction and storage. This crate only asks it
//! for a handle to a named index, then folds over (or counts) the rows that
//! fall inside a bounding box.

use crate::error::Result;
use crate::models::{BoundingBox, IndexGroup, IndexTarget, Row, Staleness};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Consumer of the rows produced by [`SpatialIndexEngine::fold`]
///
/// Returning an error stops the fold; the engine must propagate it
/// unchanged.
#[async_trait]
pub trait RowVisitor: Send {
    async fn visit(&mut self, row: Row) -> Result<()>;
}

/// A spatial index engine
#[async_trait]
pub trait SpatialIndexEngine: Send + Sync + 'static {
    /// Reference to a resolved index; read-only for the request's duration
    type Handle: Send + Sync + 'static;

    /// Resolve a named index of a design document
    ///
    /// With [`Staleness::Default`] the returned index reflects every change
    /// committed before the call; with [`Staleness::AllowStale`] a previously
    /// built snapshot may be returned. Missing design documents or index
    /// names are reported as `SpatialError::NotFound`.
    async fn get_index(
        &self,
        database: &str,
        design_doc_id: &str,
        index_name: &str,
        staleness: Staleness,
    ) -> Result<(Self::Handle, IndexGroup)>;

    /// Feed every row intersecting `bbox` (all rows when `None`) to `visitor`,
    /// in engine order
    async fn fold(
        &self,
        handle: &Self::Handle,
        bbox: Option<&BoundingBox>,
        visitor: &mut (dyn RowVisitor + '_),
    ) -> Result<()>;

    /// Number of rows [`SpatialIndexEngine::fold`] would visit for the same arguments
    async fn count(&self, handle: &Self::Handle, bbox: Option<&BoundingBox>) -> Result<u64>;
}

/// An index handle together with the generation it was resolved at
pub struct ResolvedIndex<H> {
    pub handle: H,
    pub group: IndexGroup,
}

/// Thin adapter over [`SpatialIndexEngine::get_index`]
pub struct IndexResolver<E: SpatialIndexEngine> {
    engine: Arc<E>,
}

impl<E: SpatialIndexEngine> Clone for IndexResolver<E> {
    fn clone(&self) -> Self {
        IndexResolver {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<E: SpatialIndexEngine> IndexResolver<E> {
    pub fn new(engine: Arc<E>) -> Self {
        IndexResolver { engine }
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Resolve the target index; errors are passed through untouched
    pub async fn resolve(
        &self,
        target: &IndexTarget,
        staleness: Staleness,
    ) -> Result<ResolvedIndex<E::Handle>> {
        let (handle, group) = self
            .engine
            .get_index(
                &target.database,
                &target.design_doc_id,
                &target.index_name,
                staleness,
            )
            .await?;

        debug!(
            "Resolved {} ({:?}): signature={}, generation={}",
            target, staleness, group.signature, group.current_generation
        );

        Ok(ResolvedIndex { handle, group })
    }
}
