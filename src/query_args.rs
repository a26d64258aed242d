//! Query-string parsing and validation for spatial requests

use crate::error::{Result, SpatialError};
use crate::models::{BoundingBox, QueryArgs, Staleness};
use tracing::debug;
use url::form_urlencoded;

/// One recognized query parameter, typed
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Bbox(BoundingBox),
    Stale,
    Count,
    /// Unrecognized or empty parameter; accepted and ignored
    Extra,
}

impl QueryParam {
    /// Parse a single key/value pair
    ///
    /// Recognized keys are `bbox`, `stale` and `count`; anything else is
    /// [`QueryParam::Extra`].
    pub fn parse(key: &str, value: &str) -> Result<Self> {
        match key {
            "bbox" => BoundingBox::from_json(value).map(QueryParam::Bbox),
            "stale" => match value {
                "ok" => Ok(QueryParam::Stale),
                "" => Ok(QueryParam::Extra),
                _ => Err(SpatialError::query_parse("stale only available as stale=ok")),
            },
            "count" => match value {
                "true" => Ok(QueryParam::Count),
                _ => Err(SpatialError::query_parse("count only available as count=true")),
            },
            _ => Ok(QueryParam::Extra),
        }
    }

    /// Fold this parameter into the argument record
    fn apply(self, args: &mut QueryArgs) {
        match self {
            QueryParam::Bbox(bbox) => args.bbox = Some(bbox),
            QueryParam::Stale => args.staleness = Staleness::AllowStale,
            QueryParam::Count => args.count_only = true,
            QueryParam::Extra => {}
        }
    }
}

impl QueryArgs {
    /// Parse decoded key/value pairs, in request order
    ///
    /// Fails on the first malformed value. A later `bbox` replaces an
    /// earlier one.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut args = QueryArgs::default();
        for (key, value) in pairs {
            let param = QueryParam::parse(key.as_ref(), value.as_ref())?;
            param.apply(&mut args);
        }
        Ok(args)
    }

    /// Parse a raw (still percent-encoded) query string
    pub fn from_query(query: Option<&str>) -> Result<Self> {
        let Some(query) = query else {
            return Ok(QueryArgs::default());
        };

        let args = Self::from_pairs(form_urlencoded::parse(query.as_bytes()))?;
        debug!(
            "Parsed query args: bbox={:?}, staleness={:?}, count_only={}",
            args.bbox.as_ref().map(|b| b.to_string()),
            args.staleness,
            args.count_only
        );
        Ok(args)
    }
}
