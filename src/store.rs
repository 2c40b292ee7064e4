//! Record store for users, linked Google accounts and their sites.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleAccount {
    pub id: Uuid,
    pub user_id: Uuid,
    pub account_email: String,
    pub account_name: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: String,
    #[serde(skip_serializing)]
    pub refresh_token: String,
    pub token_expiry: Option<DateTime<Utc>>,
    pub scopes: Vec<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRecord {
    pub id: Uuid,
    pub google_account_id: Uuid,
    pub site_url: String,
    pub permission_level: String,
    pub verified: bool,
    pub last_synced: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewSite {
    pub site_url: String,
    pub permission_level: String,
    pub verified: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AccountTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub token_expiry: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn insert_user(&self, email: &str, name: Option<String>) -> Result<User>;

    async fn accounts_for_user(&self, user_id: Uuid) -> Result<Vec<GoogleAccount>>;

    async fn account_for_user(&self, user_id: Uuid, account_id: Uuid) -> Result<Option<GoogleAccount>>;

    async fn insert_account(&self, account: GoogleAccount) -> Result<()>;

    async fn update_account_tokens(&self, account_id: Uuid, tokens: AccountTokens) -> Result<()>;

    async fn sites_for_account(&self, account_id: Uuid) -> Result<Vec<SiteRecord>>;

    /// Every site of every account the user linked, with its account.
    async fn sites_for_user(&self, user_id: Uuid) -> Result<Vec<(SiteRecord, GoogleAccount)>>;

    async fn site_for_user(&self, user_id: Uuid, site_id: Uuid) -> Result<Option<(SiteRecord, GoogleAccount)>>;

    /// Drops the account's sites and stores `sites` in their place.
    async fn replace_sites(&self, account_id: Uuid, sites: Vec<NewSite>) -> Result<Vec<SiteRecord>>;
}

#[derive(Default)]
struct Tables {
    users: HashMap<Uuid, User>,
    accounts: HashMap<Uuid, GoogleAccount>,
    sites: Vec<SiteRecord>,
}

impl Tables {
    fn owned_account(&self, user_id: Uuid, account_id: Uuid) -> Option<&GoogleAccount> {
        self.accounts
            .get(&account_id)
            .filter(|a| a.user_id == user_id)
    }
}

/// Process-local store. Data lives as long as the handle.
#[derive(Default)]
pub struct InMemoryStore {
    tables: RwLock<Tables>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let tables = self.tables.read().await;
        Ok(tables.users.values().find(|u| u.email == email).cloned())
    }

    async fn insert_user(&self, email: &str, name: Option<String>) -> Result<User> {
        let user = User {
            id: Uuid::new_v4(),
            email: email.to_string(),
            name,
            created_at: Utc::now(),
        };
        self.tables.write().await.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn accounts_for_user(&self, user_id: Uuid) -> Result<Vec<GoogleAccount>> {
        let tables = self.tables.read().await;
        let mut accounts: Vec<_> = tables
            .accounts
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect();
        accounts.sort_by_key(|a| a.created_at);
        Ok(accounts)
    }

    async fn account_for_user(&self, user_id: Uuid, account_id: Uuid) -> Result<Option<GoogleAccount>> {
        let tables = self.tables.read().await;
        Ok(tables.owned_account(user_id, account_id).cloned())
    }

    async fn insert_account(&self, account: GoogleAccount) -> Result<()> {
        self.tables.write().await.accounts.insert(account.id, account);
        Ok(())
    }

    async fn update_account_tokens(&self, account_id: Uuid, tokens: AccountTokens) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(account) = tables.accounts.get_mut(&account_id) {
            account.access_token = tokens.access_token;
            account.refresh_token = tokens.refresh_token;
            account.token_expiry = tokens.token_expiry;
        }
        Ok(())
    }

    async fn sites_for_account(&self, account_id: Uuid) -> Result<Vec<SiteRecord>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sites
            .iter()
            .filter(|s| s.google_account_id == account_id)
            .cloned()
            .collect())
    }

    async fn sites_for_user(&self, user_id: Uuid) -> Result<Vec<(SiteRecord, GoogleAccount)>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sites
            .iter()
            .filter_map(|site| {
                tables
                    .owned_account(user_id, site.google_account_id)
                    .map(|account| (site.clone(), account.clone()))
            })
            .collect())
    }

    async fn site_for_user(&self, user_id: Uuid, site_id: Uuid) -> Result<Option<(SiteRecord, GoogleAccount)>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sites
            .iter()
            .find(|s| s.id == site_id)
            .and_then(|site| {
                tables
                    .owned_account(user_id, site.google_account_id)
                    .map(|account| (site.clone(), account.clone()))
            }))
    }

    async fn replace_sites(&self, account_id: Uuid, sites: Vec<NewSite>) -> Result<Vec<SiteRecord>> {
        let now = Utc::now();
        let records: Vec<SiteRecord> = sites
            .into_iter()
            .map(|s| SiteRecord {
                id: Uuid::new_v4(),
                google_account_id: account_id,
                site_url: s.site_url,
                permission_level: s.permission_level,
                verified: s.verified,
                last_synced: Some(now),
                created_at: now,
            })
            .collect();

        let mut tables = self.tables.write().await;
        tables.sites.retain(|s| s.google_account_id != account_id);
        tables.sites.extend(records.iter().cloned());
        Ok(records)
    }
}
