//! In-memory spatial index engine
//!
//! Keeps every spatial index as an immutable, reference-counted snapshot of
//! rows. Writes are queued per design document and only folded into the
//! snapshots when a query asks for an up-to-date index, which mirrors how a
//! real view engine lazily updates its indexes:
//!
//! - `Staleness::Default` applies the queued writes, bumping the design
//!   group's update sequence by the number applied, then returns the new
//!   snapshot
//! - `Staleness::AllowStale` returns the last built snapshot as is
//!
//! A handle owns its snapshot, so a fold in progress never sees rows from a
//! later generation.

use crate::engine::{RowVisitor, SpatialIndexEngine};
use crate::error::{Result, SpatialError};
use crate::models::{BoundingBox, IndexGroup, Row, Signature, Staleness};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};
use xxhash_rust::xxh3::xxh3_128;

/// Seed document for [`MemorySpatialEngine::from_seed`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineSeed {
    #[serde(default)]
    pub databases: Vec<DatabaseSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSeed {
    pub name: String,
    #[serde(default)]
    pub design_docs: Vec<DesignDocSeed>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignDocSeed {
    /// Design document id; the `_design/` prefix is added when missing
    pub id: String,
    #[serde(default)]
    pub indexes: BTreeMap<String, Vec<Row>>,
}

/// Read-only snapshot of one spatial index
#[derive(Debug, Clone)]
pub struct MemoryIndexHandle {
    rows: Arc<Vec<Row>>,
}

impl MemoryIndexHandle {
    /// Total number of rows in the snapshot, ignoring any bounding box
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

struct DesignGroup {
    signature: Signature,
    update_seq: u64,
    indexes: HashMap<String, Arc<Vec<Row>>>,
    pending: Vec<(String, Row)>,
}

impl DesignGroup {
    fn new(design_doc_id: &str) -> Self {
        DesignGroup {
            signature: compute_signature(design_doc_id, std::iter::empty()),
            update_seq: 0,
            indexes: HashMap::new(),
            pending: Vec::new(),
        }
    }

    fn define(&mut self, design_doc_id: &str, index_name: &str) {
        if self.indexes.contains_key(index_name) {
            return;
        }
        self.indexes.insert(index_name.to_string(), Arc::new(Vec::new()));
        self.signature = compute_signature(design_doc_id, self.indexes.keys().map(String::as_str));
    }

    /// Fold queued writes into the index snapshots, returning how many were applied
    fn apply_pending(&mut self) -> usize {
        let applied = self.pending.len();
        for (index_name, row) in self.pending.drain(..) {
            if let Some(rows) = self.indexes.get_mut(&index_name) {
                Arc::make_mut(rows).push(row);
            }
        }
        self.update_seq += applied as u64;
        applied
    }

    fn group(&self) -> IndexGroup {
        IndexGroup {
            signature: self.signature,
            current_generation: self.update_seq,
        }
    }
}

/// Signature over the design document id and its sorted index names
fn compute_signature<'a>(design_doc_id: &str, index_names: impl Iterator<Item = &'a str>) -> Signature {
    let mut names: Vec<&str> = index_names.collect();
    names.sort_unstable();

    let mut material = Vec::with_capacity(design_doc_id.len() + 1);
    material.extend_from_slice(design_doc_id.as_bytes());
    for name in names {
        material.push(0);
        material.extend_from_slice(name.as_bytes());
    }
    Signature(xxh3_128(&material).to_be_bytes())
}

fn normalize_design_id(id: &str) -> String {
    if id.starts_with("_design/") {
        id.to_string()
    } else {
        format!("_design/{}", id)
    }
}

type Databases = HashMap<String, HashMap<String, DesignGroup>>;

/// Spatial index engine backed by in-process snapshots
#[derive(Default)]
pub struct MemorySpatialEngine {
    databases: RwLock<Databases>,
}

impl MemorySpatialEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an engine from a seed, with every index already built
    pub fn from_seed(seed: EngineSeed) -> Result<Self> {
        let engine = Self::new();
        let mut total_rows = 0usize;

        for database in seed.databases {
            for ddoc in database.design_docs {
                let ddoc_id = normalize_design_id(&ddoc.id);
                for (index_name, rows) in ddoc.indexes {
                    engine.define_index(&database.name, &ddoc_id, &index_name)?;
                    for row in rows {
                        engine.insert_row(&database.name, &ddoc_id, &index_name, row)?;
                        total_rows += 1;
                    }
                }
                engine.build(&database.name, &ddoc_id)?;
            }
        }

        info!("Loaded seed data: {} rows", total_rows);
        Ok(engine)
    }

    /// Load a JSON seed file, see [`EngineSeed`]
    pub fn from_seed_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SpatialError::ConfigError(format!(
                "Failed to read seed file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;

        let seed: EngineSeed = serde_json::from_str(&content).map_err(|e| {
            SpatialError::ConfigError(format!("Failed to parse seed file: {}", e))
        })?;

        Self::from_seed(seed)
    }

    /// Declare a spatial index, creating the database and design document as needed
    ///
    /// Adding an index changes the design document's signature.
    pub fn define_index(&self, database: &str, design_doc_id: &str, index_name: &str) -> Result<()> {
        let ddoc_id = normalize_design_id(design_doc_id);
        let mut databases = self.write()?;
        databases
            .entry(database.to_string())
            .or_default()
            .entry(ddoc_id.clone())
            .or_insert_with(|| DesignGroup::new(&ddoc_id))
            .define(&ddoc_id, index_name);
        Ok(())
    }

    /// Queue a row for an index; it becomes visible on the next up-to-date resolve
    ///
    /// Returns the number of writes now pending for the design document.
    pub fn insert_row(
        &self,
        database: &str,
        design_doc_id: &str,
        index_name: &str,
        row: Row,
    ) -> Result<usize> {
        let ddoc_id = normalize_design_id(design_doc_id);
        let mut databases = self.write()?;
        let group = lookup_group(&mut databases, database, &ddoc_id)?;
        if !group.indexes.contains_key(index_name) {
            return Err(SpatialError::NotFound("missing_named_index".to_string()));
        }
        group.pending.push((index_name.to_string(), row));
        Ok(group.pending.len())
    }

    /// Apply queued writes for a design document, returning the new update sequence
    pub fn build(&self, database: &str, design_doc_id: &str) -> Result<u64> {
        let ddoc_id = normalize_design_id(design_doc_id);
        let mut databases = self.write()?;
        let group = lookup_group(&mut databases, database, &ddoc_id)?;
        group.apply_pending();
        Ok(group.update_seq)
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Databases>> {
        self.databases
            .write()
            .map_err(|_| SpatialError::InternalError("index registry lock poisoned".to_string()))
    }
}

fn lookup_group<'a>(
    databases: &'a mut Databases,
    database: &str,
    design_doc_id: &str,
) -> Result<&'a mut DesignGroup> {
    databases
        .get_mut(database)
        .and_then(|ddocs| ddocs.get_mut(design_doc_id))
        .ok_or_else(|| SpatialError::NotFound("missing".to_string()))
}

fn matches(bbox: Option<&BoundingBox>, row: &Row) -> bool {
    bbox.map_or(true, |b| b.intersects(&row.bbox))
}

#[async_trait]
impl SpatialIndexEngine for MemorySpatialEngine {
    type Handle = MemoryIndexHandle;

    async fn get_index(
        &self,
        database: &str,
        design_doc_id: &str,
        index_name: &str,
        staleness: Staleness,
    ) -> Result<(MemoryIndexHandle, IndexGroup)> {
        let mut databases = self.write()?;
        let group = lookup_group(&mut databases, database, design_doc_id)?;

        if staleness == Staleness::Default && !group.pending.is_empty() {
            let applied = group.apply_pending();
            debug!(
                "Updated {} in {}: {} pending writes applied, update_seq={}",
                design_doc_id, database, applied, group.update_seq
            );
        }

        let rows = group
            .indexes
            .get(index_name)
            .cloned()
            .ok_or_else(|| SpatialError::NotFound("missing_named_index".to_string()))?;

        Ok((MemoryIndexHandle { rows }, group.group()))
    }

    async fn fold(
        &self,
        handle: &MemoryIndexHandle,
        bbox: Option<&BoundingBox>,
        visitor: &mut (dyn RowVisitor + '_),
    ) -> Result<()> {
        for row in handle.rows.iter().filter(|row| matches(bbox, row)) {
            visitor.visit(row.clone()).await?;
        }
        Ok(())
    }

    async fn count(&self, handle: &MemoryIndexHandle, bbox: Option<&BoundingBox>) -> Result<u64> {
        Ok(handle.rows.iter().filter(|row| matches(bbox, row)).count() as u64)
    }
}
