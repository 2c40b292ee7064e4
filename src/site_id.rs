use std::future::Future;

use tracing::warn;
use url::Url;

use crate::error::Result;

const DOMAIN_PREFIX: &str = "sc-domain:";

/// Rewrites a site identifier into its other form.
///
/// `https://www.example.com/` becomes `sc-domain:www.example.com`; anything
/// that is not an http(s) URL becomes `https://<identifier>`.
pub fn normalize_site_identifier(identifier: &str) -> String {
    if let Ok(parsed) = Url::parse(identifier) {
        if matches!(parsed.scheme(), "http" | "https") {
            if let Some(host) = parsed.host_str() {
                return format!("{DOMAIN_PREFIX}{host}");
            }
        }
    }
    format!("https://{identifier}")
}

/// Runs `op` with the caller's identifier and, if the remote side answers
/// with a permission error, once more with the normalized identifier.
pub async fn with_permission_fallback<T, F, Fut>(site_identifier: &str, op: F) -> Result<T>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match op(site_identifier.to_string()).await {
        Ok(value) => Ok(value),
        Err(err) if err.is_permission_error() => {
            let normalized = normalize_site_identifier(site_identifier);
            warn!(
                site = site_identifier,
                retry_with = %normalized,
                error = %err,
                "permission denied, retrying with normalized site identifier"
            );
            op(normalized).await
        }
        Err(err) => Err(err),
    }
}
