//! Lark Open API client: tenant access token handling and text message send.
//!
//! Replies are addressed by one of two modes: `chat_id` for group
//! conversations, `open_id` for direct conversations. One outbound call per
//! send, no retry; a delivery failure is the caller's to log.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

/// Refresh the cached tenant token this long before it actually expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(120);

/// How an outbound message target is addressed on the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    /// Group conversation (wire field "chat_id").
    ChatId,
    /// Direct conversation (wire field "open_id").
    OpenId,
}

impl AddressMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AddressMode::ChatId => "chat_id",
            AddressMode::OpenId => "open_id",
        }
    }
}

/// Outbound send failure. No retry is performed; the event is still
/// considered processed (at-most-once delivery).
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("lark request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("lark api error: {0}")]
    Api(String),
    #[error("lark auth failed: {0}")]
    Auth(String),
}

/// Sends a text message to a conversation target. Implemented by the Lark
/// client; handlers depend on this trait so tests can record sends.
#[async_trait]
pub trait Responder: Send + Sync {
    async fn send_text(
        &self,
        mode: AddressMode,
        target: &str,
        text: &str,
    ) -> Result<(), DeliveryError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    code: i64,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    tenant_access_token: Option<String>,
    #[serde(default)]
    expire: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    code: i64,
    #[serde(default)]
    msg: String,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Client for the Lark Open API. Holds the app credentials and a cached
/// tenant access token behind a lock; safe to share across handler tasks.
pub struct LarkClient {
    endpoint: String,
    app_id: String,
    app_secret: String,
    client: reqwest::Client,
    token: RwLock<Option<CachedToken>>,
}

impl LarkClient {
    pub fn new(endpoint: impl Into<String>, app_id: String, app_secret: String) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            endpoint,
            app_id,
            app_secret,
            client: reqwest::Client::new(),
            token: RwLock::new(None),
        }
    }

    /// Cached tenant access token, fetching a fresh one when missing or
    /// near expiry.
    async fn tenant_access_token(&self) -> Result<String, DeliveryError> {
        {
            let guard = self.token.read().await;
            if let Some(cached) = guard.as_ref() {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.value.clone());
                }
            }
        }
        let url = format!(
            "{}/open-apis/auth/v3/tenant_access_token/internal",
            self.endpoint
        );
        let body = json!({ "app_id": self.app_id, "app_secret": self.app_secret });
        let res = self.client.post(&url).json(&body).send().await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(DeliveryError::Auth(format!("{} {}", status, body)));
        }
        let data: TokenResponse = res.json().await?;
        if data.code != 0 {
            return Err(DeliveryError::Auth(format!("{} {}", data.code, data.msg)));
        }
        let value = data
            .tenant_access_token
            .ok_or_else(|| DeliveryError::Auth("token missing from response".to_string()))?;
        let ttl = Duration::from_secs(data.expire.unwrap_or(0));
        let expires_at = Instant::now() + ttl.saturating_sub(TOKEN_EXPIRY_MARGIN);
        let mut guard = self.token.write().await;
        *guard = Some(CachedToken {
            value: value.clone(),
            expires_at,
        });
        Ok(value)
    }
}

#[async_trait]
impl Responder for LarkClient {
    /// POST /open-apis/message/v4/send/ with the target keyed by addressing mode.
    async fn send_text(
        &self,
        mode: AddressMode,
        target: &str,
        text: &str,
    ) -> Result<(), DeliveryError> {
        let token = self.tenant_access_token().await?;
        let url = format!("{}/open-apis/message/v4/send/", self.endpoint);
        let mut body = json!({
            "msg_type": "text",
            "content": { "text": text },
        });
        body[mode.as_str()] = serde_json::Value::String(target.to_string());
        let res = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(DeliveryError::Api(format!("{} {}", status, body)));
        }
        let data: SendResponse = res.json().await?;
        if data.code != 0 {
            return Err(DeliveryError::Api(format!("{} {}", data.code, data.msg)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_mode_wire_strings() {
        assert_eq!(AddressMode::ChatId.as_str(), "chat_id");
        assert_eq!(AddressMode::OpenId.as_str(), "open_id");
    }

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let client = LarkClient::new(
            "https://open.larksuite.com/",
            "id".to_string(),
            "secret".to_string(),
        );
        assert_eq!(client.endpoint, "https://open.larksuite.com");
    }
}
