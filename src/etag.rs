//! Conditional-GET negotiation
//!
//! The ETag of a row stream is derived from the design group's signature and
//! the generation the index was resolved at, so it changes whenever either
//! the index definitions or the indexed data change.

use crate::models::IndexGroup;
use http::header::IF_NONE_MATCH;
use http::HeaderMap;
use tracing::debug;
use xxhash_rust::xxh3::xxh3_128;

/// Compute the quoted ETag for `(signature, generation, extra)`
pub fn make_etag(group: &IndexGroup, extra: Option<&[u8]>) -> String {
    let signature = group.signature.as_bytes();
    let mut material = Vec::with_capacity(signature.len() + 9 + extra.map_or(0, <[u8]>::len));
    material.extend_from_slice(signature);
    material.extend_from_slice(&group.current_generation.to_be_bytes());
    match extra {
        None => material.push(0),
        Some(extra) => {
            material.push(1);
            material.extend_from_slice(extra);
        }
    }
    format!("\"{:032x}\"", xxh3_128(&material))
}

/// Whether the request's `If-None-Match` validator matches `etag`
///
/// The header may carry a comma-separated list; any exact member or `*`
/// counts as a match.
pub fn etag_matches(headers: &HeaderMap, etag: &str) -> bool {
    let matched = headers
        .get_all(IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|candidate| candidate == etag || candidate == "*");

    if matched {
        debug!("Validator matches ETag {}", etag);
    }
    matched
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Signature;
    use http::HeaderValue;

    fn group(seq: u64) -> IndexGroup {
        IndexGroup {
            signature: Signature([7; 16]),
            current_generation: seq,
        }
    }

    #[test]
    fn test_etag_is_deterministic_and_quoted() {
        let a = make_etag(&group(5), None);
        let b = make_etag(&group(5), None);
        assert_eq!(a, b);
        assert!(a.starts_with('"') && a.ends_with('"'));
        assert_eq!(a.len(), 34);
    }

    #[test]
    fn test_etag_changes_with_generation_and_signature() {
        let base = make_etag(&group(5), None);
        assert_ne!(base, make_etag(&group(6), None));

        let other = IndexGroup {
            signature: Signature([8; 16]),
            current_generation: 5,
        };
        assert_ne!(base, make_etag(&other, None));
    }

    #[test]
    fn test_etag_extra_is_distinct_from_none() {
        assert_ne!(make_etag(&group(1), None), make_etag(&group(1), Some(b"")));
    }

    #[test]
    fn test_etag_matches() {
        let etag = make_etag(&group(1), None);
        let mut headers = HeaderMap::new();
        assert!(!etag_matches(&headers, &etag));

        headers.insert(IF_NONE_MATCH, HeaderValue::from_str(&etag).unwrap());
        assert!(etag_matches(&headers, &etag));

        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("\"other\""));
        assert!(!etag_matches(&headers, &etag));

        let list = format!("\"other\", {}", etag);
        headers.insert(IF_NONE_MATCH, HeaderValue::from_str(&list).unwrap());
        assert!(etag_matches(&headers, &etag));

        headers.insert(IF_NONE_MATCH, HeaderValue::from_static("*"));
        assert!(etag_matches(&headers, &etag));
    }
}
