use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use search_console_mcp::auth::{seed_users, HeaderAuthenticator};
use search_console_mcp::client::{GoogleClientFactory, RefreshingToken, SearchConsoleClient, StaticToken, TokenSource};
use search_console_mcp::config::{Config, Credentials, ServerMode};
use search_console_mcp::http::{serve_http, AppState};
use search_console_mcp::mcp::run_stdio;
use search_console_mcp::service::SearchConsoleService;
use search_console_mcp::store::{InMemoryStore, Store};

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries JSON-RPC; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match env::args().nth(1) {
        Some(path) => Config::load_from_path(Path::new(&path)).with_context(|| format!("loading config {path}"))?,
        None => Config::from_env().context("reading configuration from environment")?,
    };

    let http = reqwest::Client::new();
    let tokens: Arc<dyn TokenSource> = match config.credentials()? {
        Credentials::AccessToken(token) => Arc::new(StaticToken(token)),
        Credentials::RefreshToken {
            client_id,
            client_secret,
            refresh_token,
        } => Arc::new(RefreshingToken::new(
            http.clone(),
            config.google.token_url.clone(),
            client_id,
            client_secret,
            refresh_token,
        )),
    };
    let client = SearchConsoleClient::new(http.clone(), tokens, &config.api);
    let service = SearchConsoleService::new(Arc::new(client));
    info!(mode = ?config.server.mode, "starting search console MCP server");

    match config.server.mode {
        ServerMode::Stdio => run_stdio(service).await?,
        ServerMode::Http => {
            let state = app_state(&config, http, service).await?;
            serve_http(&config.http_bind_addr(), state).await?;
        }
        ServerMode::Both => {
            let state = app_state(&config, http, service.clone()).await?;
            let addr = config.http_bind_addr();
            tokio::select! {
                res = serve_http(&addr, state) => res?,
                res = run_stdio(service) => res?,
            }
        }
    }

    Ok(())
}

async fn app_state(config: &Config, http: reqwest::Client, service: SearchConsoleService) -> Result<AppState> {
    config.require_oauth_client()?;
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    seed_users(store.as_ref(), &config.auth.users)
        .await
        .context("seeding dashboard users")?;
    info!(users = config.auth.users.len(), "dashboard store ready");
    let clients = Arc::new(GoogleClientFactory::new(http, config.google.clone(), config.api.clone()));
    let authenticator = Arc::new(HeaderAuthenticator::new(config.auth.identity_header.clone()));
    Ok(AppState::new(service, store, clients, authenticator))
}
