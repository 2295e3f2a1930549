//! Contact lookup against the directory service.
//!
//! The directory is a PostgREST-style RPC endpoint returning one row per
//! friendship. A failed lookup never stops the client: [`load_contacts`]
//! logs it and hands back an empty list.

use async_trait::async_trait;
use log::{debug, error, warn};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

use crate::http::{HttpClient, HttpRequest};
use crate::types::{Contact, Identity};

pub const DEFAULT_CONTACTS_FUNCTION: &str = "get_friends_with_user_data";

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory request failed: {0}")]
    Request(#[source] anyhow::Error),
    #[error("directory returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid directory response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("failed to encode directory request: {0}")]
    Encode(#[source] serde_json::Error),
}

#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn fetch_contacts(&self, identity: &Identity) -> Result<Vec<Contact>, DirectoryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, Deserialize)]
pub struct DirectoryConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.
    pub base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// RPC function name. Defaults to [`DEFAULT_CONTACTS_FUNCTION`] when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,
}

impl DirectoryConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn rpc_url(&self) -> String {
        format!(
            "{}/rest/v1/rpc/{}",
            self.base_url.trim_end_matches('/'),
            self.function.as_deref().unwrap_or(DEFAULT_CONTACTS_FUNCTION)
        )
    }
}

#[derive(Debug, Deserialize)]
struct FriendRow {
    #[serde(default)]
    user2: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

/// Directory backed by an RPC call over [`HttpClient`].
pub struct RpcDirectory<H: HttpClient> {
    http_client: Arc<H>,
    config: DirectoryConfig,
}

impl<H: HttpClient> RpcDirectory<H> {
    pub fn new(http_client: Arc<H>, config: DirectoryConfig) -> Self {
        Self {
            http_client,
            config,
        }
    }

    fn request(&self, identity: &Identity) -> Result<HttpRequest, DirectoryError> {
        let body = serde_json::to_vec(&json!({ "user_uuid": identity }))
            .map_err(DirectoryError::Encode)?;
        let mut request = HttpRequest::post(self.config.rpc_url())
            .with_header("Content-Type", "application/json")
            .with_body(body);
        if let Some(key) = &self.config.api_key {
            request = request
                .with_header("apikey", key.clone())
                .with_header("Authorization", format!("Bearer {key}"));
        }
        Ok(request)
    }
}

#[async_trait]
impl<H: HttpClient + 'static> ContactDirectory for RpcDirectory<H> {
    async fn fetch_contacts(&self, identity: &Identity) -> Result<Vec<Contact>, DirectoryError> {
        let request = self.request(identity)?;
        debug!("Fetching contacts for {} from {}", identity, request.url);

        let response = self
            .http_client
            .execute(request)
            .await
            .map_err(DirectoryError::Request)?;
        if !response.is_success() {
            return Err(DirectoryError::Status {
                status: response.status_code,
                body: String::from_utf8_lossy(&response.body).into_owned(),
            });
        }

        let rows: Vec<FriendRow> = serde_json::from_slice(&response.body)?;
        let contacts = rows
            .into_iter()
            .filter_map(|row| {
                let identity = row.user2.and_then(|u| Identity::new(u).ok());
                match (identity, row.username) {
                    (Some(identity), Some(name)) => Some(Contact::new(identity, name)),
                    _ => {
                        warn!("Skipping directory row without user2/username");
                        None
                    }
                }
            })
            .collect();
        Ok(contacts)
    }
}

/// Fetch contacts, treating every failure as an empty list.
pub async fn load_contacts(directory: &dyn ContactDirectory, identity: &Identity) -> Vec<Contact> {
    match directory.fetch_contacts(identity).await {
        Ok(contacts) => contacts,
        Err(e) => {
            error!("Contact lookup for {} failed: {}", identity, e);
            Vec::new()
        }
    }
}
