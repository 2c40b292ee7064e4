use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ConsoleError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    #[default]
    Stdio,
    Http,
    Both,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub mode: ServerMode,
    pub http_addr: Option<String>,
    pub http_port: Option<u16>,
}

/// OAuth client and credentials for the account the tool server acts as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    /// Pre-issued bearer token; used as-is, never refreshed.
    pub access_token: Option<String>,
    #[serde(default = "default_token_url")]
    pub token_url: String,
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: None,
            client_secret: None,
            refresh_token: None,
            access_token: None,
            token_url: default_token_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_inspection_base_url")]
    pub inspection_base_url: String,
}

fn default_base_url() -> String {
    "https://www.googleapis.com/webmasters/v3".to_string()
}

fn default_inspection_base_url() -> String {
    "https://searchconsole.googleapis.com/v1".to_string()
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            inspection_base_url: default_inspection_base_url(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Header carrying the e-mail of the user an upstream proxy signed in.
    #[serde(default = "default_identity_header")]
    pub identity_header: String,
    /// Dashboard users created in the store at startup.
    #[serde(default)]
    pub users: Vec<SeedUser>,
}

/// A dashboard user known before anyone signs in. With a refresh token the
/// user also gets a linked Google account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedUser {
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

fn default_identity_header() -> String {
    "x-authenticated-email".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            identity_header: default_identity_header(),
            users: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

/// How the tool server authenticates against the remote API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    AccessToken(String),
    RefreshToken {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
}

impl Config {
    /// Loads YAML (`.yaml`/`.yml`) or JSON, then applies environment overrides.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ConsoleError::Config(format!("read {} failed: {e}", path.display())))?;
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        let mut cfg: Config = if is_yaml {
            serde_yaml::from_str(&raw)
                .map_err(|e| ConsoleError::Config(format!("parse {} failed: {e}", path.display())))?
        } else {
            serde_json::from_str(&raw)
                .map_err(|e| ConsoleError::Config(format!("parse {} failed: {e}", path.display())))?
        };
        cfg.apply_env_with(|key| env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn from_env() -> Result<Self> {
        let mut cfg = Config::default();
        cfg.apply_env_with(|key| env::var(key).ok())?;
        Ok(cfg)
    }

    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("GOOGLE_CLIENT_ID") {
            self.google.client_id = Some(v);
        }
        if let Some(v) = get("GOOGLE_CLIENT_SECRET") {
            self.google.client_secret = Some(v);
        }
        if let Some(v) = get("GOOGLE_REFRESH_TOKEN") {
            self.google.refresh_token = Some(v);
        }
        if let Some(v) = get("GSC_ACCESS_TOKEN") {
            self.google.access_token = Some(v);
        }
        if let Some(v) = get("GSC_SERVER_MODE") {
            self.server.mode = serde_yaml::from_str(&v)
                .map_err(|_| ConsoleError::Config(format!("GSC_SERVER_MODE: unknown mode `{v}`")))?;
        }
        if let Some(v) = get("GSC_HTTP_ADDR") {
            self.server.http_addr = Some(v);
        }
        if let Some(v) = get("GSC_DASHBOARD_USERS") {
            let listed = v.split(',').map(str::trim).filter(|e| !e.is_empty());
            for email in listed {
                if !self.auth.users.iter().any(|u| u.email == email) {
                    self.auth.users.push(SeedUser {
                        email: email.to_string(),
                        ..SeedUser::default()
                    });
                }
            }
        }
        if let Some(v) = get("GSC_HTTP_PORT") {
            let port = v
                .parse()
                .map_err(|_| ConsoleError::Config(format!("GSC_HTTP_PORT: invalid port `{v}`")))?;
            self.server.http_port = Some(port);
        }
        Ok(())
    }

    /// Credentials for the tool server. Missing credentials are fatal.
    pub fn credentials(&self) -> Result<Credentials> {
        let g = &self.google;
        if let Some(token) = &g.access_token {
            return Ok(Credentials::AccessToken(token.clone()));
        }
        match (&g.client_id, &g.client_secret, &g.refresh_token) {
            (Some(id), Some(secret), Some(refresh)) => Ok(Credentials::RefreshToken {
                client_id: id.clone(),
                client_secret: secret.clone(),
                refresh_token: refresh.clone(),
            }),
            _ => Err(ConsoleError::Config(
                "Google credentials are required: set GSC_ACCESS_TOKEN, or GOOGLE_CLIENT_ID, GOOGLE_CLIENT_SECRET and GOOGLE_REFRESH_TOKEN".into(),
            )),
        }
    }

    /// The dashboard refreshes per-account tokens and needs the OAuth client.
    pub fn require_oauth_client(&self) -> Result<()> {
        if self.google.client_id.is_none() || self.google.client_secret.is_none() {
            return Err(ConsoleError::Config(
                "GOOGLE_CLIENT_ID and GOOGLE_CLIENT_SECRET are required for the HTTP server".into(),
            ));
        }
        Ok(())
    }

    pub fn http_bind_addr(&self) -> String {
        format!(
            "{}:{}",
            self.server.http_addr.clone().unwrap_or_else(|| "0.0.0.0".to_string()),
            self.server.http_port.unwrap_or(3000)
        )
    }
}
