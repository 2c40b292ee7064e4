use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::try_join_all;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::auth::{AuthenticatedUser, Authenticator, Identity};
use crate::client::ClientFactory;
use crate::error::{ConsoleError, Result};
use crate::mcp::{parse_error, process_request, RpcRequest};
use crate::model::{DateRange, Dimension, EnhancedOptions, QueryDescriptor, DEFAULT_ROW_LIMIT, MAX_ROW_LIMIT};
use crate::service::SearchConsoleService;
use crate::store::{GoogleAccount, NewSite, SiteRecord, Store, User};

type Sessions = Arc<RwLock<HashMap<String, mpsc::UnboundedSender<Event>>>>;

#[derive(Clone)]
pub struct AppState {
    /// Backs the MCP tools served over SSE.
    pub service: SearchConsoleService,
    pub store: Arc<dyn Store>,
    pub clients: Arc<dyn ClientFactory>,
    pub authenticator: Arc<dyn Authenticator>,
    pub sessions: Sessions,
}

impl AppState {
    pub fn new(
        service: SearchConsoleService,
        store: Arc<dyn Store>,
        clients: Arc<dyn ClientFactory>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            service,
            store,
            clients,
            authenticator,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    #[serde(skip)]
    status: StatusCode,
    error: String,
}

impl ErrorResponse {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            error: error.into(),
        }
    }

    fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    fn not_found(error: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<ConsoleError> for ErrorResponse {
    fn from(e: ConsoleError) -> Self {
        error!(error = %e, "request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

type ApiResult<T> = std::result::Result<T, ErrorResponse>;

async fn current_user(state: &AppState, identity: &Identity) -> ApiResult<User> {
    state
        .store
        .find_user_by_email(&identity.email)
        .await?
        .ok_or_else(|| ErrorResponse::not_found("User not found"))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SiteView {
    id: Uuid,
    site_url: String,
    permission_level: String,
    verified: bool,
    account_email: String,
    google_account_id: Uuid,
}

async fn list_sites_handler(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> ApiResult<Json<Vec<SiteView>>> {
    let user = current_user(&state, &identity).await?;
    let sites = state
        .store
        .sites_for_user(user.id)
        .await?
        .into_iter()
        .map(|(site, account)| SiteView {
            id: site.id,
            site_url: site.site_url,
            permission_level: site.permission_level,
            verified: site.verified,
            account_email: account.account_email,
            google_account_id: account.id,
        })
        .collect();
    Ok(Json(sites))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AccountView {
    id: Uuid,
    account_email: String,
    account_name: Option<String>,
    is_active: bool,
    created_at: DateTime<Utc>,
    sites: Vec<SiteRecord>,
}

async fn list_accounts_handler(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
) -> ApiResult<Json<Vec<AccountView>>> {
    let user = current_user(&state, &identity).await?;
    let accounts = state.store.accounts_for_user(user.id).await?;
    let store = &state.store;
    let views = try_join_all(accounts.into_iter().map(|account: GoogleAccount| async move {
        let sites = store.sites_for_account(account.id).await?;
        Ok::<_, ConsoleError>(AccountView {
            id: account.id,
            account_email: account.account_email,
            account_name: account.account_name,
            is_active: account.is_active,
            created_at: account.created_at,
            sites,
        })
    }))
    .await?;
    Ok(Json(views))
}

#[derive(Debug, Serialize)]
struct SyncResponse {
    success: bool,
    message: &'static str,
}

async fn sync_sites_handler(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
    Path(account_id): Path<String>,
) -> ApiResult<Json<SyncResponse>> {
    let user = current_user(&state, &identity).await?;
    let account = match Uuid::parse_str(&account_id) {
        Ok(id) => state.store.account_for_user(user.id, id).await?,
        Err(_) => None,
    }
    .ok_or_else(|| ErrorResponse::not_found("Account not found"))?;

    let remote = state.clients.client_for(&account);
    let listed = remote.list_sites().await.map_err(|e| {
        error!(account = %account.id, error = %e, "listing sites failed");
        ErrorResponse::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to sync sites from Google Search Console",
        )
    })?;

    if let Some(entries) = listed.site_entry {
        let sites = entries
            .into_iter()
            .map(|entry| NewSite {
                site_url: entry.site_url,
                permission_level: if entry.permission_level.is_empty() {
                    "unknown".to_string()
                } else {
                    entry.permission_level
                },
                verified: true,
            })
            .collect();
        let stored = state.store.replace_sites(account.id, sites).await?;
        info!(account = %account.id, sites = stored.len(), "synced sites");
    }

    Ok(Json(SyncResponse {
        success: true,
        message: "Sites synced successfully",
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalyticsQuery {
    site_id: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    dimensions: Option<String>,
    row_limit: Option<String>,
    enable_quick_wins: Option<String>,
}

struct AnalyticsRequest {
    site_id: Uuid,
    date_range: DateRange,
    dimensions: Vec<Dimension>,
    row_limit: u32,
    enable_quick_wins: bool,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl AnalyticsQuery {
    fn validate(self) -> ApiResult<AnalyticsRequest> {
        let (Some(site_id), Some(start), Some(end)) =
            (non_empty(self.site_id), non_empty(self.start_date), non_empty(self.end_date))
        else {
            return Err(ErrorResponse::bad_request(
                "Missing required parameters: siteId, startDate, endDate",
            ));
        };

        let site_id =
            Uuid::parse_str(&site_id).map_err(|_| ErrorResponse::bad_request("Invalid parameter: siteId"))?;
        let parse_date = |field: &str, raw: &str| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| ErrorResponse::bad_request(format!("Invalid parameter: {field}")))
        };
        let date_range = DateRange::new(parse_date("startDate", &start)?, parse_date("endDate", &end)?)
            .map_err(|e| ErrorResponse::bad_request(e.to_string()))?;

        let dimensions = Dimension::parse_list(self.dimensions.as_deref().unwrap_or("query,page"))
            .map_err(|e| ErrorResponse::bad_request(format!("Invalid parameter: dimensions: {e}")))?;

        let row_limit = match non_empty(self.row_limit) {
            None => DEFAULT_ROW_LIMIT,
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(n) if n >= 1 => n.min(u64::from(MAX_ROW_LIMIT)) as u32,
                _ => return Err(ErrorResponse::bad_request("Invalid parameter: rowLimit")),
            },
        };

        Ok(AnalyticsRequest {
            site_id,
            date_range,
            dimensions,
            row_limit,
            enable_quick_wins: self.enable_quick_wins.as_deref() == Some("true"),
        })
    }
}

async fn search_analytics_handler(
    State(state): State<AppState>,
    AuthenticatedUser(identity): AuthenticatedUser,
    q: std::result::Result<Query<AnalyticsQuery>, QueryRejection>,
) -> ApiResult<Response> {
    let request = match q {
        Ok(Query(q)) => q.validate()?,
        Err(e) => return Err(ErrorResponse::bad_request(format!("invalid query: {e}"))),
    };

    let user = current_user(&state, &identity).await?;
    let (site, account) = state
        .store
        .site_for_user(user.id, request.site_id)
        .await?
        .ok_or_else(|| ErrorResponse::not_found("Site not found"))?;

    let service = SearchConsoleService::new(state.clients.client_for(&account));
    let descriptor = QueryDescriptor {
        row_limit: request.row_limit,
        ..QueryDescriptor::new(site.site_url.clone(), request.date_range, request.dimensions)
    };

    let outcome = if request.enable_quick_wins {
        let options = EnhancedOptions {
            enable_quick_wins: true,
            ..EnhancedOptions::default()
        };
        service
            .enhanced_search_analytics(Some(&descriptor), options)
            .await
            .map(|r| Json(r).into_response())
    } else {
        service
            .search_analytics(&descriptor)
            .await
            .map(|r| Json(r).into_response())
    };

    outcome.map_err(|e| {
        error!(site = %site.site_url, error = %e, "fetching analytics failed");
        ErrorResponse::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to fetch analytics data from Google Search Console",
        )
    })
}

async fn sse_handler(State(state): State<AppState>) -> Sse<SessionStream> {
    let (tx, rx) = mpsc::unbounded_channel();
    let session_id = Uuid::new_v4().to_string();

    let endpoint_url = format!("/message?session_id={session_id}");
    let _ = tx.send(Event::default().event("endpoint").data(endpoint_url));

    state.sessions.write().await.insert(session_id.clone(), tx);
    info!(session = %session_id, "sse session opened");

    let stream = SessionStream {
        events: UnboundedReceiverStream::new(rx),
        session_id,
        sessions: state.sessions.clone(),
    };
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Event stream of one SSE session. Dropping it, which happens when the
/// client disconnects, removes the session from the map.
struct SessionStream {
    events: UnboundedReceiverStream<Event>,
    session_id: String,
    sessions: Sessions,
}

impl Stream for SessionStream {
    type Item = std::result::Result<Event, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_next_unpin(cx).map(|event| event.map(Ok))
    }
}

impl Drop for SessionStream {
    fn drop(&mut self) {
        debug!(session = %self.session_id, "sse session closed");
        if let Ok(mut sessions) = self.sessions.try_write() {
            sessions.remove(&self.session_id);
            return;
        }
        // map is busy; finish the removal on the runtime
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let sessions = self.sessions.clone();
            let session_id = std::mem::take(&mut self.session_id);
            handle.spawn(async move {
                sessions.write().await.remove(&session_id);
            });
        }
    }
}

#[derive(Deserialize)]
struct MessageQuery {
    session_id: String,
}

async fn message_handler(
    State(state): State<AppState>,
    Query(q): Query<MessageQuery>,
    payload: std::result::Result<Json<RpcRequest>, JsonRejection>,
) -> Response {
    let sender = state.sessions.read().await.get(&q.session_id).cloned();
    let Some(sender) = sender else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let sessions = state.sessions.clone();
    let service = state.service.clone();
    tokio::spawn(async move {
        let resp = match payload {
            Ok(Json(req)) => process_request(&service, req).await,
            Err(e) => Some(parse_error(e.body_text())),
        };
        let Some(resp) = resp else { return };
        if let Ok(json_str) = serde_json::to_string(&resp) {
            if sender.send(Event::default().event("message").data(json_str)).is_err() {
                sessions.write().await.remove(&q.session_id);
            }
        }
    });
    StatusCode::ACCEPTED.into_response()
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sites", get(list_sites_handler))
        .route("/api/accounts", get(list_accounts_handler))
        .route("/api/accounts/:account_id/sync", post(sync_sites_handler))
        .route("/api/analytics/search", get(search_analytics_handler))
        .route("/sse", get(sse_handler))
        .route("/message", post(message_handler))
        .with_state(state)
}

pub async fn serve_http(addr: &str, state: AppState) -> Result<()> {
    let router = build_router(state);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| ConsoleError::Config(format!("bind {addr} failed: {e}")))?;
    info!("HTTP server listening on http://{addr}");
    axum::serve(listener, router).await.map_err(Into::into)
}
