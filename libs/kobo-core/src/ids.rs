//! Identifier alternates for lookups keyed by a URL path segment.
//!
//! A ContentID reaches the service through a path segment that the transport
//! may or may not have percent-decoded already, so lookups try the identifier
//! as presented and then its decoded form.

/// Ordered, de-duplicated identifiers to try for a lookup.
pub fn lookup_candidates(id: &str) -> Vec<String> {
    let mut candidates = vec![id.to_string()];

    if let Ok(decoded) = urlencoding::decode(id) {
        if decoded != id {
            candidates.push(decoded.into_owned());
        }
    }

    candidates
}
