//! HTTP authentication helpers for attaching the detection API key to every
//! request issued by the `reqwest` client.

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine as _};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};

/// Builds a Basic `Authorization` header carrying `api_key` as the user-info
/// username with an empty password.
pub(crate) fn build_auth_headers(api_key: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    let credentials = format!("{api_key}:");
    let encoded = BASE64_STANDARD.encode(credentials);
    let mut value = HeaderValue::from_str(&format!("Basic {encoded}"))
        .context("failed to build Authorization header")?;
    value.set_sensitive(true);
    headers.insert(AUTHORIZATION, value);
    Ok(headers)
}
