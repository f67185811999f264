use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::auth::SessionManager;
use crate::error::RemoteError;

/// Profile row as held by the remote store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteProfile {
    pub name: Option<String>,
    pub nickname: Option<String>,
    pub interests: Option<i64>,
    pub profile_picture: Option<String>,
    pub step_goal: Option<i64>,
}

/// Remote row-store collaborator.
///
/// Updates return `Ok(false)` when the store answered but refused the write,
/// and `Err` when it could not be reached.
#[async_trait]
pub trait RemoteProfileStore: Send + Sync {
    async fn update_step_goal(&self, user_id: &str, goal: i64) -> Result<bool, RemoteError>;

    async fn update_interests(&self, user_id: &str, code: i64) -> Result<bool, RemoteError>;

    async fn update_nickname(&self, user_id: &str, nickname: &str) -> Result<bool, RemoteError>;

    async fn update_name(&self, user_id: &str, name: &str) -> Result<bool, RemoteError>;

    async fn update_profile_picture(&self, user_id: &str, payload: &str) -> Result<bool, RemoteError>;

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<RemoteProfile>, RemoteError>;
}

/// Row-store client for the hosted backend's REST interface
pub struct HttpProfileApi {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    session: Arc<SessionManager>,
}

impl HttpProfileApi {
    pub fn new(
        base_url: Url,
        api_key: Option<String>,
        timeout: Duration,
        session: Arc<SessionManager>,
    ) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
            session,
        })
    }

    fn profile_url(&self, user_id: &str) -> Result<Url, RemoteError> {
        let mut url = self.base_url.join("rest/v1/profiles")?;
        url.query_pairs_mut().append_pair("id", &format!("eq.{}", user_id));
        Ok(url)
    }

    async fn patch(&self, user_id: &str, body: serde_json::Value) -> Result<bool, RemoteError> {
        let token = self.session.access_token().await.ok_or(RemoteError::NotAuthenticated)?;

        let mut request = self
            .client
            .patch(self.profile_url(user_id)?)
            .bearer_auth(token)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            warn!("Profile update refused: {} - {}", status, text);
            return Ok(false);
        }

        debug!("Profile row updated for {}", user_id);
        Ok(true)
    }
}

#[async_trait]
impl RemoteProfileStore for HttpProfileApi {
    async fn update_step_goal(&self, user_id: &str, goal: i64) -> Result<bool, RemoteError> {
        self.patch(user_id, json!({ "step_goal": goal })).await
    }

    async fn update_interests(&self, user_id: &str, code: i64) -> Result<bool, RemoteError> {
        self.patch(user_id, json!({ "interests": code })).await
    }

    async fn update_nickname(&self, user_id: &str, nickname: &str) -> Result<bool, RemoteError> {
        self.patch(user_id, json!({ "nickname": nickname })).await
    }

    async fn update_name(&self, user_id: &str, name: &str) -> Result<bool, RemoteError> {
        self.patch(user_id, json!({ "name": name })).await
    }

    async fn update_profile_picture(&self, user_id: &str, payload: &str) -> Result<bool, RemoteError> {
        self.patch(user_id, json!({ "profile_picture": payload })).await
    }

    async fn fetch_profile(&self, user_id: &str) -> Result<Option<RemoteProfile>, RemoteError> {
        let token = self.session.access_token().await.ok_or(RemoteError::NotAuthenticated)?;

        let mut url = self.profile_url(user_id)?;
        url.query_pairs_mut()
            .append_pair("select", "name,nickname,interests,profile_picture,step_goal");

        let mut request = self.client.get(url).bearer_auth(token);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status { status, body });
        }

        let rows: Vec<RemoteProfile> = response.json().await?;
        Ok(rows.into_iter().next())
    }
}
