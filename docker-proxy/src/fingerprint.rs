//! Cache keys for manifest requests

/// Path segment that marks a request as a manifest request.
pub const MANIFEST_SEGMENT: &str = "/manifests/";

/// Whether a request path takes part in response caching.
///
/// Only the path is inspected; the HTTP method is deliberately ignored, so a
/// `HEAD` or `DELETE` against a manifest path shares the entry of a `GET`.
pub fn is_manifest_path(path: &str) -> bool {
    path.contains(MANIFEST_SEGMENT)
}

/// Build the cache key for a request.
///
/// The key is the plain concatenation of host, path and the raw
/// `Authorization` value. There is no separator, so two different triples can
/// in principle produce the same key (`"a" + "/b"` vs `"a/" + "b"`); hosts and
/// registry paths make this unlikely in practice and the format is kept stable.
pub fn fingerprint(host: &str, path: &str, authorization: &str) -> String {
    let mut key = String::with_capacity(host.len() + path.len() + authorization.len());
    key.push_str(host);
    key.push_str(path);
    key.push_str(authorization);
    key
}
