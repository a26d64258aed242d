//! Core data models for spatial view queries

use crate::error::{Result, SpatialError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An axis-aligned bounding box as a flat, fixed-order coordinate tuple
///
/// For `n` dimensions the box holds `2n` numbers: the `n` minimum
/// coordinates followed by the `n` maximum coordinates, e.g.
/// `[west, south, east, north]` in two dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BoundingBox(Vec<f64>);

impl BoundingBox {
    /// Create a bounding box from its coordinates, in order
    pub fn new(coords: Vec<f64>) -> Self {
        BoundingBox(coords)
    }

    /// Parse a bounding box from a JSON array of numbers, e.g. `[0,0,10,10]`
    ///
    /// The array must be non-empty and hold an even number of coordinates.
    pub fn from_json(value: &str) -> Result<Self> {
        let parsed: serde_json::Value = serde_json::from_str(value).map_err(|e| {
            SpatialError::query_parse(format!("invalid bbox, {}", e))
        })?;

        let items = parsed.as_array().ok_or_else(|| {
            SpatialError::query_parse("bbox must be a JSON array of numbers")
        })?;

        let coords = items
            .iter()
            .map(|item| {
                item.as_f64().ok_or_else(|| {
                    SpatialError::query_parse("bbox must be a JSON array of numbers")
                })
            })
            .collect::<Result<Vec<_>>>()?;

        if coords.is_empty() || coords.len() % 2 != 0 {
            return Err(SpatialError::query_parse(format!(
                "bbox must hold a minimum and a maximum for every dimension, got {} values",
                coords.len()
            )));
        }

        Ok(BoundingBox(coords))
    }

    /// Coordinates in their original order
    pub fn coords(&self) -> &[f64] {
        &self.0
    }

    /// Number of dimensions, or `None` when the coordinate count is odd
    pub fn dimensions(&self) -> Option<usize> {
        if self.0.len() % 2 == 0 {
            Some(self.0.len() / 2)
        } else {
            None
        }
    }

    /// Whether two boxes overlap (touching edges count) in every dimension
    ///
    /// Boxes of different dimensionality never intersect.
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        let (Some(dims), Some(other_dims)) = (self.dimensions(), other.dimensions()) else {
            return false;
        };
        if dims != other_dims {
            return false;
        }
        (0..dims).all(|d| {
            let (min, max) = (self.0[d], self.0[d + dims]);
            let (other_min, other_max) = (other.0[d], other.0[d + dims]);
            min <= other_max && other_min <= max
        })
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|c| c.to_string()).collect();
        write!(f, "[{}]", parts.join(","))
    }
}

/// Whether a query may be answered from a possibly outdated index snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Staleness {
    /// The index must reflect every change committed before the query
    #[default]
    Default,
    /// A previously built snapshot is acceptable (`stale=ok`)
    AllowStale,
}

/// Validated query arguments for one spatial request
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryArgs {
    /// Restricts the search to this box; `None` searches everything
    pub bbox: Option<BoundingBox>,
    pub staleness: Staleness,
    /// Answer with the number of matches instead of the rows
    pub count_only: bool,
}

/// One match produced by the spatial engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    #[serde(rename = "id")]
    pub doc_id: String,
    pub bbox: BoundingBox,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Row {
    pub fn new(doc_id: impl Into<String>, bbox: BoundingBox, value: serde_json::Value) -> Self {
        Row {
            doc_id: doc_id.into(),
            bbox,
            value,
        }
    }
}

/// Identity of a design document's index definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; 16]);

impl Signature {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Versioned state of the indexes defined by one design document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexGroup {
    pub signature: Signature,
    /// Update sequence the resolved indexes reflect
    pub current_generation: u64,
}

/// Which spatial index a request addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTarget {
    pub database: String,
    /// Full design document id, including the `_design/` prefix
    pub design_doc_id: String,
    pub index_name: String,
}

impl IndexTarget {
    /// Build a target from the short design document name found in the URL path
    pub fn new(database: impl Into<String>, ddoc_name: &str, index_name: impl Into<String>) -> Self {
        IndexTarget {
            database: database.into(),
            design_doc_id: format!("_design/{}", ddoc_name),
            index_name: index_name.into(),
        }
    }
}

impl fmt::Display for IndexTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/_spatial/{}", self.database, self.design_doc_id, self.index_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_from_json() {
        let bbox = BoundingBox::from_json("[0,0,10,10]").unwrap();
        assert_eq!(bbox.coords(), &[0.0, 0.0, 10.0, 10.0]);
        assert_eq!(bbox.dimensions(), Some(2));
    }

    #[test]
    fn test_bbox_from_json_rejects_non_arrays() {
        assert!(matches!(
            BoundingBox::from_json("{\"a\":1}"),
            Err(SpatialError::QueryParse(_))
        ));
        assert!(matches!(
            BoundingBox::from_json("[1,\"two\"]"),
            Err(SpatialError::QueryParse(_))
        ));
        assert!(matches!(
            BoundingBox::from_json("[1,2"),
            Err(SpatialError::QueryParse(_))
        ));
    }

    #[test]
    fn test_bbox_intersects() {
        let query = BoundingBox::new(vec![0.0, 0.0, 10.0, 10.0]);
        let inside = BoundingBox::new(vec![1.0, 1.0, 2.0, 2.0]);
        let touching = BoundingBox::new(vec![10.0, 10.0, 12.0, 12.0]);
        let outside = BoundingBox::new(vec![11.0, 0.0, 12.0, 1.0]);
        let point = BoundingBox::new(vec![5.0, 5.0, 5.0, 5.0]);

        assert!(query.intersects(&inside));
        assert!(query.intersects(&touching));
        assert!(!query.intersects(&outside));
        assert!(query.intersects(&point));
    }

    #[test]
    fn test_bbox_from_json_rejects_empty_and_odd_lengths() {
        for value in ["[]", "[0,0,10]", "[1]"] {
            let err = BoundingBox::from_json(value).unwrap_err();
            assert!(
                err.to_string().starts_with("bbox must hold a minimum and a maximum"),
                "{} gave {}",
                value,
                err
            );
        }
        assert_eq!(BoundingBox::from_json("[0,10]").unwrap().dimensions(), Some(1));
    }

    #[test]
    fn test_bbox_dimension_mismatch_never_intersects() {
        let flat = BoundingBox::new(vec![0.0, 10.0]);
        let plane = BoundingBox::new(vec![0.0, 0.0, 10.0, 10.0]);
        let odd = BoundingBox::new(vec![0.0, 0.0, 10.0]);
        assert!(!flat.intersects(&plane));
        assert!(!odd.intersects(&odd));
    }

    #[test]
    fn test_row_serializes_in_wire_order() {
        let row = Row::new(
            "doc1",
            BoundingBox::new(vec![1.5, 2.0, 1.5, 2.0]),
            serde_json::json!({"name": "x"}),
        );
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"{"id":"doc1","bbox":[1.5,2.0,1.5,2.0],"value":{"name":"x"}}"#);
    }

    #[test]
    fn test_index_target_design_id() {
        let target = IndexTarget::new("places", "geo", "points");
        assert_eq!(target.design_doc_id, "_design/geo");
        assert_eq!(target.to_string(), "places/_design/geo/_spatial/points");
    }

    #[test]
    fn test_signature_hex() {
        let sig = Signature([0xab; 16]);
        assert_eq!(sig.to_string(), "ab".repeat(16));
    }
}
