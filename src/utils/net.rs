use tonic::transport::Uri;

use crate::ApiError;
use crate::Result;

/// accept ip either like 127.0.0.1 or docker host name: asset1
pub(crate) fn address_str(addr: &str) -> String {
    // Strip existing "http://" or "https://" prefixes if duplicated.
    let normalized = addr.trim_start_matches("http://").trim_start_matches("https://");
    // Re-add a single "http://" prefix.
    format!("http://{}", normalized)
}

/// Turns a configured target into a dialable URI string, rejecting anything
/// that is not a `host[:port]` address.
pub(crate) fn normalize_target(target: &str) -> Result<String> {
    let invalid = |reason: String| ApiError::InvalidTarget {
        target: target.to_string(),
        reason,
    };

    let trimmed = target.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty address".to_string()).into());
    }

    let addr = address_str(trimmed);
    let uri: Uri = addr.parse().map_err(|e| invalid(format!("{e}")))?;
    match uri.host() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(invalid("missing host".to_string()).into()),
    }
    if uri.path_and_query().is_some_and(|pq| pq.as_str() != "/" && !pq.as_str().is_empty()) {
        return Err(invalid("path is not allowed".to_string()).into());
    }

    Ok(addr)
}
