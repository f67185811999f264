use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::error::RemoteError;

/// An authenticated session issued by the remote auth service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub user_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
}

impl AuthSession {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

/// Answer to a refresh request
#[derive(Debug, Clone)]
pub enum RefreshResponse {
    /// New session; its refresh token may have been rotated
    Accepted(AuthSession),
    /// The credential is no longer valid
    Rejected { reason: String },
}

/// Remote authentication collaborator
#[async_trait]
pub trait RemoteAuth: Send + Sync {
    async fn refresh_session(&self, refresh_token: &str) -> Result<RefreshResponse, RemoteError>;
}

/// Auth client for the hosted backend's token endpoint
pub struct HttpAuthClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpAuthClient {
    pub fn new(base_url: Url, api_key: Option<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }
}

#[async_trait]
impl RemoteAuth for HttpAuthClient {
    async fn refresh_session(&self, refresh_token: &str) -> Result<RefreshResponse, RemoteError> {
        #[derive(Serialize)]
        struct RefreshRequest<'a> {
            refresh_token: &'a str,
        }

        #[derive(Deserialize)]
        struct RefreshUser {
            id: String,
        }

        #[derive(Deserialize)]
        struct RefreshBody {
            access_token: String,
            refresh_token: String,
            expires_in: i64,
            user: RefreshUser,
        }

        let url = self.base_url.join("auth/v1/token?grant_type=refresh_token")?;
        let mut request = self.client.post(url).json(&RefreshRequest { refresh_token });
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request.send().await?;
        let status = response.status();

        if matches!(status, StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            let reason = response.text().await.unwrap_or_default();
            debug!("Refresh rejected with status {}", status);
            return Ok(RefreshResponse::Rejected { reason });
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Status { status: status.as_u16(), body });
        }

        let body: RefreshBody = response.json().await?;
        Ok(RefreshResponse::Accepted(AuthSession {
            user_id: body.user.id,
            access_token: body.access_token,
            refresh_token: body.refresh_token,
            expires_at: Utc::now() + ChronoDuration::seconds(body.expires_in),
        }))
    }
}
