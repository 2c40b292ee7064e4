use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::SeedUser;
use crate::error::Result;
use crate::http::AppState;
use crate::store::{AccountTokens, GoogleAccount, Store};

/// Signed-in user as resolved by the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub email: String,
}

/// Resolves the caller of a dashboard request. Session handling lives
/// outside this crate; implementations only read what it left behind.
pub trait Authenticator: Send + Sync {
    fn identify(&self, headers: &HeaderMap) -> Option<Identity>;
}

/// Trusts an e-mail header set by an authenticating reverse proxy.
pub struct HeaderAuthenticator {
    header: String,
}

impl HeaderAuthenticator {
    pub fn new(header: impl Into<String>) -> Self {
        Self {
            header: header.into().to_ascii_lowercase(),
        }
    }
}

impl Authenticator for HeaderAuthenticator {
    fn identify(&self, headers: &HeaderMap) -> Option<Identity> {
        let email = headers.get(self.header.as_str())?.to_str().ok()?.trim();
        if email.is_empty() {
            return None;
        }
        Some(Identity {
            email: email.to_string(),
        })
    }
}

/// Extractor for handlers that require a signed-in user; rejects with 401.
pub struct AuthenticatedUser(pub Identity);

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> std::result::Result<Self, Self::Rejection> {
        match state.authenticator.identify(&parts.headers) {
            Some(identity) => Ok(AuthenticatedUser(identity)),
            None => Err((StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response()),
        }
    }
}

/// Tokens handed over by the OAuth provider at sign-in.
#[derive(Debug, Clone)]
pub struct OAuthGrant {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    Updated,
    UnknownUser,
    Failed,
}

/// Stores the sign-in grant on the user's Google account record.
///
/// Sign-in must go ahead whatever happens here, so store failures are
/// logged and reported as `LinkOutcome::Failed` instead of returned.
pub async fn link_google_account(
    store: &dyn Store,
    email: &str,
    name: Option<&str>,
    grant: &OAuthGrant,
) -> LinkOutcome {
    match try_link(store, email, name, grant).await {
        Ok(outcome) => {
            info!(email, ?outcome, "linked google account");
            outcome
        }
        Err(e) => {
            error!(email, error = %e, "failed to save google account on sign-in");
            LinkOutcome::Failed
        }
    }
}

async fn try_link(store: &dyn Store, email: &str, name: Option<&str>, grant: &OAuthGrant) -> Result<LinkOutcome> {
    let Some(user) = store.find_user_by_email(email).await? else {
        return Ok(LinkOutcome::UnknownUser);
    };

    let existing = store.accounts_for_user(user.id).await?;
    if let Some(account) = existing.first() {
        store
            .update_account_tokens(
                account.id,
                AccountTokens {
                    access_token: grant.access_token.clone(),
                    refresh_token: grant.refresh_token.clone(),
                    token_expiry: grant.expires_at,
                },
            )
            .await?;
        return Ok(LinkOutcome::Updated);
    }

    store
        .insert_account(GoogleAccount {
            id: Uuid::new_v4(),
            user_id: user.id,
            account_email: email.to_string(),
            account_name: Some(name.unwrap_or_default().to_string()),
            access_token: grant.access_token.clone(),
            refresh_token: grant.refresh_token.clone(),
            token_expiry: grant.expires_at,
            scopes: grant.scopes.clone(),
            is_active: true,
            created_at: Utc::now(),
        })
        .await?;
    Ok(LinkOutcome::Created)
}

const WEBMASTERS_SCOPE: &str = "https://www.googleapis.com/auth/webmasters";

/// Creates configured dashboard users that the store does not know yet and
/// links the Google account of those that carry a refresh token.
pub async fn seed_users(store: &dyn Store, users: &[SeedUser]) -> Result<()> {
    for seed in users {
        if store.find_user_by_email(&seed.email).await?.is_none() {
            store.insert_user(&seed.email, seed.name.clone()).await?;
        }
        let Some(refresh_token) = &seed.refresh_token else {
            continue;
        };
        // no access token yet; the first client call refreshes it
        let grant = OAuthGrant {
            access_token: String::new(),
            refresh_token: refresh_token.clone(),
            expires_at: None,
            scopes: vec![WEBMASTERS_SCOPE.to_string()],
        };
        let outcome = try_link(store, &seed.email, seed.name.as_deref(), &grant).await?;
        info!(email = %seed.email, ?outcome, "seeded dashboard user");
    }
    Ok(())
}
