//! Client key extraction and upstream key selection.

use axum::http::{header, HeaderMap};

use crate::config::ProxyConfig;
use crate::error::{ProxyError, Result};

/// The key a client presented: `Authorization: Bearer <key>` first, then `x-api-key`.
pub fn extract_client_key(headers: &HeaderMap) -> Option<String> {
    if let Some(key) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(strip_bearer_prefix)
        .filter(|k| !k.is_empty())
    {
        return Some(key.to_string());
    }

    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}

/// Decide which key to send upstream for this request.
///
/// With `auth.client_keys` configured, the client must present one of them and
/// the server-side key (if any) is used upstream. Otherwise the client's own
/// key is forwarded, falling back to the server-side key.
pub fn resolve_upstream_key(headers: &HeaderMap, config: &ProxyConfig) -> Result<String> {
    let client_key = extract_client_key(headers);

    if !config.auth.client_keys.is_empty() {
        let key = client_key.ok_or_else(|| ProxyError::authentication("Missing API key"))?;
        if !config.auth.client_keys.iter().any(|k| *k == key) {
            return Err(ProxyError::authentication("Invalid API key"));
        }
        return Ok(config.server_api_key().unwrap_or(key));
    }

    client_key
        .or_else(|| config.server_api_key())
        .ok_or_else(|| ProxyError::authentication("Missing API key"))
}

fn strip_bearer_prefix(auth: &str) -> Option<&str> {
    let (scheme, rest) = auth.trim().split_once(char::is_whitespace)?;
    scheme.eq_ignore_ascii_case("bearer").then(|| rest.trim())
}
