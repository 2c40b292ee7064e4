use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{ApiConfig, GoogleConfig};
use crate::error::{ConsoleError, Result};
use crate::model::{InspectionRequest, SearchAnalyticsResponse, Sitemap, SitemapsList, SitesList};
use crate::shaper::WireQuery;
use crate::store::GoogleAccount;

/// Remote search analytics API. Implementations perform I/O only.
#[async_trait]
pub trait AnalyticsApi: Send + Sync {
    async fn list_sites(&self) -> Result<SitesList>;

    async fn query(&self, site_url: &str, query: &WireQuery) -> Result<SearchAnalyticsResponse>;

    async fn list_sitemaps(&self, site_url: &str, sitemap_index: Option<&str>) -> Result<SitemapsList>;

    async fn get_sitemap(&self, site_url: &str, feedpath: &str) -> Result<Sitemap>;

    async fn submit_sitemap(&self, site_url: &str, feedpath: &str) -> Result<()>;

    async fn inspect_url(&self, request: &InspectionRequest) -> Result<Value>;
}

/// Supplies a bearer credential on demand.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

// refresh a minute before Google says the token expires
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// OAuth2 refresh-token grant with an in-memory copy of the current token.
pub struct RefreshingToken {
    http: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    cached: Mutex<Option<CachedToken>>,
}

impl RefreshingToken {
    pub fn new(
        http: reqwest::Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
            cached: Mutex::new(None),
        }
    }

    /// Seeds the cache with a token that is still valid for `valid_for`.
    pub fn with_current(self, access_token: impl Into<String>, valid_for: Duration) -> Self {
        let cached = CachedToken {
            value: access_token.into(),
            expires_at: Instant::now() + valid_for,
        };
        Self {
            cached: Mutex::new(Some(cached)),
            ..self
        }
    }

    async fn refresh(&self) -> Result<CachedToken> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", self.refresh_token.as_str()),
        ];
        let resp = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| ConsoleError::Auth(format!("Failed to refresh access token: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ConsoleError::Auth(format!(
                "Failed to refresh access token (status {}): {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = resp
            .json()
            .await
            .map_err(|e| ConsoleError::Auth(format!("Failed to refresh access token: {e}")))?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        info!(expires_in = lifetime.as_secs(), "refreshed access token");
        Ok(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        })
    }
}

#[async_trait]
impl TokenSource for RefreshingToken {
    async fn access_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }
        let fresh = self.refresh().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct GoogleError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

fn remote_error(status: u16, body: &str) -> ConsoleError {
    let message = match serde_json::from_str::<GoogleErrorBody>(body) {
        Ok(parsed) => match parsed.error.status {
            Some(code) => format!("{} ({code})", parsed.error.message),
            None => parsed.error.message,
        },
        Err(_) => body.to_string(),
    };
    ConsoleError::Remote { status, message }
}

/// reqwest-backed client for the Search Console REST endpoints.
pub struct SearchConsoleClient {
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    base_url: String,
    inspection_base_url: String,
}

impl SearchConsoleClient {
    pub fn new(http: reqwest::Client, tokens: Arc<dyn TokenSource>, api: &ApiConfig) -> Self {
        Self {
            http,
            tokens,
            base_url: api.base_url.trim_end_matches('/').to_string(),
            inspection_base_url: api.inspection_base_url.trim_end_matches('/').to_string(),
        }
    }

    fn site_path(&self, site_url: &str) -> String {
        format!("{}/sites/{}", self.base_url, urlencoding::encode(site_url))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let token = self.tokens.access_token().await?;
        let resp = request.bearer_auth(token).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(remote_error(status.as_u16(), &body));
        }
        Ok(resp)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let resp = self.send(request).await?;
        let bytes = resp.bytes().await?;
        if bytes.iter().all(u8::is_ascii_whitespace) {
            // empty bodies decode as `{}`
            return Ok(serde_json::from_slice(b"{}")?);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[async_trait]
impl AnalyticsApi for SearchConsoleClient {
    async fn list_sites(&self) -> Result<SitesList> {
        let url = format!("{}/sites", self.base_url);
        self.send_json(self.http.get(url)).await
    }

    async fn query(&self, site_url: &str, query: &WireQuery) -> Result<SearchAnalyticsResponse> {
        let url = format!("{}/searchAnalytics/query", self.site_path(site_url));
        debug!(site_url, "POST searchAnalytics/query");
        self.send_json(self.http.post(url).json(query)).await
    }

    async fn list_sitemaps(&self, site_url: &str, sitemap_index: Option<&str>) -> Result<SitemapsList> {
        let url = format!("{}/sitemaps", self.site_path(site_url));
        let mut request = self.http.get(url);
        if let Some(index) = sitemap_index {
            request = request.query(&[("sitemapIndex", index)]);
        }
        self.send_json(request).await
    }

    async fn get_sitemap(&self, site_url: &str, feedpath: &str) -> Result<Sitemap> {
        let url = format!(
            "{}/sitemaps/{}",
            self.site_path(site_url),
            urlencoding::encode(feedpath)
        );
        self.send_json(self.http.get(url)).await
    }

    async fn submit_sitemap(&self, site_url: &str, feedpath: &str) -> Result<()> {
        let url = format!(
            "{}/sitemaps/{}",
            self.site_path(site_url),
            urlencoding::encode(feedpath)
        );
        self.send(self.http.put(url)).await?;
        Ok(())
    }

    async fn inspect_url(&self, request: &InspectionRequest) -> Result<Value> {
        let url = format!("{}/urlInspection/index:inspect", self.inspection_base_url);
        self.send_json(self.http.post(url).json(request)).await
    }
}

/// Builds a remote client for a linked account.
pub trait ClientFactory: Send + Sync {
    fn client_for(&self, account: &GoogleAccount) -> Arc<dyn AnalyticsApi>;
}

/// Clients authorized with the account's stored tokens and the app's OAuth
/// client credentials.
pub struct GoogleClientFactory {
    http: reqwest::Client,
    google: GoogleConfig,
    api: ApiConfig,
}

impl GoogleClientFactory {
    pub fn new(http: reqwest::Client, google: GoogleConfig, api: ApiConfig) -> Self {
        Self { http, google, api }
    }
}

impl ClientFactory for GoogleClientFactory {
    fn client_for(&self, account: &GoogleAccount) -> Arc<dyn AnalyticsApi> {
        let mut tokens = RefreshingToken::new(
            self.http.clone(),
            self.google.token_url.clone(),
            self.google.client_id.clone().unwrap_or_default(),
            self.google.client_secret.clone().unwrap_or_default(),
            account.refresh_token.clone(),
        );
        if let Some(expiry) = account.token_expiry {
            let remaining = (expiry - chrono::Utc::now()).to_std().unwrap_or_default();
            if remaining > EXPIRY_MARGIN {
                tokens = tokens.with_current(account.access_token.clone(), remaining - EXPIRY_MARGIN);
            }
        }
        Arc::new(SearchConsoleClient::new(self.http.clone(), Arc::new(tokens), &self.api))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn google_error_body_is_unwrapped() {
        let body = r#"{"error":{"code":403,"message":"User does not have sufficient permission for site 'https://example.com/'.","status":"PERMISSION_DENIED"}}"#;
        let err = remote_error(403, body);
        assert!(err.is_permission_error());
        match err {
            ConsoleError::Remote { status, message } => {
                assert_eq!(status, 403);
                assert!(message.starts_with("User does not have sufficient permission"));
                assert!(message.ends_with("(PERMISSION_DENIED)"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn non_json_error_body_is_kept_verbatim() {
        let err = remote_error(502, "Bad Gateway");
        assert_eq!(err.to_string(), "remote API error (status 502): Bad Gateway");
        assert!(!err.is_permission_error());
    }

    #[tokio::test]
    async fn seeded_token_is_served_without_refresh() {
        let tokens = RefreshingToken::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/token",
            "id",
            "secret",
            "refresh",
        )
        .with_current("ya29.current", Duration::from_secs(600));
        assert_eq!(tokens.access_token().await.unwrap(), "ya29.current");
    }

    #[test]
    fn site_urls_are_percent_encoded_in_paths() {
        let api = ApiConfig::default();
        let client = SearchConsoleClient::new(
            reqwest::Client::new(),
            Arc::new(StaticToken("t".into())),
            &api,
        );
        assert_eq!(
            client.site_path("sc-domain:example.com"),
            "https://www.googleapis.com/webmasters/v3/sites/sc-domain%3Aexample.com"
        );
    }
}
