//! REST backend over HTTP.
//!
//! Thin layer over `reqwest`: builds requests, attaches the host's auth
//! header and maps failures onto [`ApiError`].

use std::time::Duration;

use async_trait::async_trait;
use courier_core::{ConversationId, Message, OutgoingMessage};
use reqwest::{Method, RequestBuilder, Response};

use crate::{api::MessageApi, error::ApiError};

/// Timeout for a single REST request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Header carrying the host's opaque credential.
pub const DEFAULT_AUTH_HEADER: &str = "X-Init-Data";

/// [`MessageApi`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpMessageApi {
    client: reqwest::Client,
    base_url: String,
    auth: Option<(String, String)>,
}

impl HttpMessageApi {
    /// Create a client for the backend at `base_url`.
    ///
    /// # Errors
    ///
    /// `ApiError::Network` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Network(format!("client build failed: {e}")))?;

        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Ok(Self { client, base_url, auth: None })
    }

    /// Attach `value` as the `header` on every request.
    #[must_use]
    pub fn with_auth(mut self, header: impl Into<String>, value: impl Into<String>) -> Self {
        self.auth = Some((header.into(), value.into()));
        self
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let request = self.client.request(method, format!("{}{path}", self.base_url));
        match &self.auth {
            Some((header, value)) => request.header(header.as_str(), value.as_str()),
            None => request,
        }
    }
}

#[async_trait]
impl MessageApi for HttpMessageApi {
    async fn fetch_messages(&self, conversation_id: ConversationId) -> Result<Vec<Message>, ApiError> {
        let response = self
            .request(Method::GET, &format!("/api/messages/{conversation_id}"))
            .send()
            .await
            .map_err(request_error)?;
        check(response).await?.json().await.map_err(request_error)
    }

    async fn send_message(&self, message: &OutgoingMessage) -> Result<Message, ApiError> {
        let response = self
            .request(Method::POST, "/api/messages")
            .json(message)
            .send()
            .await
            .map_err(request_error)?;
        check(response).await?.json().await.map_err(request_error)
    }

    async fn mark_read(&self, conversation_id: ConversationId) -> Result<(), ApiError> {
        let response = self
            .request(Method::PUT, &format!("/api/conversations/{conversation_id}/read"))
            .send()
            .await
            .map_err(request_error)?;
        check(response).await.map(|_| ())
    }
}

async fn check(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    tracing::debug!(status = status.as_u16(), "backend rejected request");
    Err(ApiError::Status { status: status.as_u16(), body })
}

fn request_error(error: reqwest::Error) -> ApiError {
    if error.is_decode() {
        ApiError::Decode(error.to_string())
    } else {
        ApiError::Network(error.to_string())
    }
}
