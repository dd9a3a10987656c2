//! HTTP client for the chat API.
//!
//! [`ChatBackend`] is the seam between the engine and the network. The
//! production implementation is [`ChatClient`]; anything that can hand back a
//! byte stream for a [`ChatRequest`] can stand in for it.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::{Client, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use crate::error::{DEFAULT_REQUEST_FAILURE, Result, SidekickError};
use sidekick_protocol::{ApiErrorBody, AppInfo, AppParameters, ChatRequest, SuggestedQuestions};

/// User-Agent string for all HTTP requests.
pub const USER_AGENT: &str = concat!("sidekick/", env!("CARGO_PKG_VERSION"));

/// Connection establishment timeout. No overall timeout is applied: a
/// stream ends when the server closes it or the caller cancels.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw response body as delivered by the transport.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Where and as whom requests are sent.
#[derive(Clone)]
pub struct Endpoint {
    api_url: String,
    token: SecretString,
    user: String,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("api_url", &self.api_url)
            .field("token", &"[REDACTED]")
            .field("user", &self.user)
            .finish()
    }
}

impl Endpoint {
    pub fn new(api_url: impl Into<String>, token: SecretString, user: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            token,
            user: user.into(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn token(&self) -> &SecretString {
        &self.token
    }

    /// Join `path` onto the API base URL.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// `path?user=<user>`
    fn url_with_user(&self, path: &str) -> String {
        format!("{}?user={}", self.url(path), urlencoding::encode(&self.user))
    }
}

/// Network operations the engine needs.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send a streaming chat request and return its body once the response
    /// head arrived with a success status.
    async fn open_stream(&self, endpoint: &Endpoint, request: &ChatRequest) -> Result<ByteStream>;

    /// Application metadata.
    async fn app_info(&self, _endpoint: &Endpoint) -> Result<AppInfo> {
        Ok(AppInfo::default())
    }

    /// Application parameters, including opening suggestions.
    async fn parameters(&self, _endpoint: &Endpoint) -> Result<AppParameters> {
        Ok(AppParameters::default())
    }

    /// Follow-up questions for a finished message.
    async fn suggested_questions(
        &self,
        _endpoint: &Endpoint,
        _message_id: &str,
    ) -> Result<Vec<String>> {
        Ok(Vec::new())
    }
}

/// reqwest-backed [`ChatBackend`].
#[derive(Clone)]
pub struct ChatClient {
    http: Client,
}

impl ChatClient {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(CONNECT_TIMEOUT)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| SidekickError::internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { http })
    }

    /// Turn a non-success response into [`SidekickError::Network`], using the
    /// `message` field of the JSON body when present.
    async fn check_status(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorBody>(&body)
            .ok()
            .and_then(|b| b.message)
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| DEFAULT_REQUEST_FAILURE.to_string());

        tracing::warn!(status = %status, body = %body, "API request failed");
        Err(SidekickError::Network {
            status: status.as_u16(),
            message,
        })
    }

    /// `GET {api}/{path}?user=...` decoded as JSON.
    async fn get_json<T: DeserializeOwned>(&self, endpoint: &Endpoint, path: &str) -> Result<T> {
        let url = endpoint.url_with_user(path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(endpoint.token.expose_secret())
            .send()
            .await
            .map_err(|e| SidekickError::from_reqwest(e, &url))?;
        let body = Self::check_status(response)
            .await?
            .text()
            .await
            .map_err(|e| SidekickError::from_reqwest(e, &url))?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl ChatBackend for ChatClient {
    async fn open_stream(&self, endpoint: &Endpoint, request: &ChatRequest) -> Result<ByteStream> {
        let url = endpoint.url("chat-messages");
        tracing::debug!(url = %url, user = %request.user, "Opening answer stream");

        let response = self
            .http
            .post(&url)
            .bearer_auth(endpoint.token.expose_secret())
            .json(request)
            .send()
            .await
            .map_err(|e| SidekickError::from_reqwest(e, &url))?;
        let response = Self::check_status(response).await?;

        let stream = response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| SidekickError::from_reqwest(e, &url)));
        Ok(stream.boxed())
    }

    async fn app_info(&self, endpoint: &Endpoint) -> Result<AppInfo> {
        self.get_json(endpoint, "info").await
    }

    async fn parameters(&self, endpoint: &Endpoint) -> Result<AppParameters> {
        self.get_json(endpoint, "parameters").await
    }

    async fn suggested_questions(&self, endpoint: &Endpoint, message_id: &str) -> Result<Vec<String>> {
        let path = format!("messages/{}/suggested", urlencoding::encode(message_id));
        let suggested: SuggestedQuestions = self.get_json(endpoint, &path).await?;
        Ok(suggested.data)
    }
}
