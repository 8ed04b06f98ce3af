//! # HTTP Retrieval Utilities
//!
//! An asynchronous API client wrapper around `reqwest`. Unary calls go
//! through `reqwest_middleware` with exponential backoff retries; the
//! long-lived event stream uses a plain client, since retrying a stream
//! request belongs to the supervisor.

use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, Url};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{de::DeserializeOwned, Serialize};

use crate::errors::{IngestError, IngestResult};

/// A standardized container for API responses.
///
/// This struct wraps the deserialized data along with metadata about the
/// HTTP transaction, such as status codes and headers.
#[derive(Debug)]
pub struct ApiResponse<T> {
    /// The successfully deserialized response body, if any.
    pub data: Option<T>,
    /// The raw error body returned by the server if the request failed.
    pub error_body: Option<String>,
    /// The numeric HTTP status code.
    pub status: u16,
    /// Indicates if the status code was in the 2xx range.
    pub success: bool,
    /// The headers returned by the server.
    pub headers: HeaderMap,
}

/// A flexible asynchronous HTTP client rooted at one base URL.
#[derive(Clone)]
pub struct ApiClient {
    /// Middleware-enabled client for unary requests.
    inner: ClientWithMiddleware,
    /// Retry-free client for streaming responses.
    streaming: reqwest::Client,
    /// The base URL to which all relative paths are joined.
    base_url: Url,
}

impl ApiClient {
    /// Creates a new `ApiClient` with `max_retries` transient retries.
    ///
    /// # Arguments
    /// * `base_url` - Absolute base URL; relative paths are joined onto it, so
    ///   it should end with `/` when it has a path component.
    /// * `max_retries` - Exponential backoff retries for unary calls.
    pub fn new(base_url: Url, max_retries: u32) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);

        let client = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Self {
            inner: client,
            streaming: reqwest::Client::new(),
            base_url,
        }
    }

    /// The absolute URL for `path`.
    pub fn url(&self, path: &str) -> IngestResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// Performs a request and returns the body as text.
    ///
    /// # Arguments
    /// * `method` - The HTTP verb (GET, POST, etc.).
    /// * `path` - The relative path to append to the base URL.
    /// * `bearer` - Token for the `Authorization: Bearer` header, if any.
    /// * `headers` - Optional additional headers for this specific request.
    /// * `body` - Optional serializable object to send as the JSON body.
    ///
    /// # Errors
    /// Returns `IngestError::Transport` if URL joining or network execution
    /// fails. HTTP error statuses are reported in the `ApiResponse`, not as
    /// errors.
    pub async fn send<B>(
        &self,
        method: Method,
        path: &str,
        bearer: Option<&str>,
        headers: Option<HeaderMap>,
        body: Option<&B>,
    ) -> IngestResult<ApiResponse<String>>
    where
        B: Serialize + ?Sized,
    {
        let full_url = self.url(path)?;
        let mut req = self.inner.request(method, full_url);

        if let Some(h) = headers {
            req = req.headers(h);
        }

        if let Some(token) = bearer {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        if let Some(b) = body {
            let json_body = serde_json::to_string(b)
                .map_err(|e| IngestError::Decode(format!("request body serialization failed: {}", e)))?;
            req = req.header(CONTENT_TYPE, "application/json").body(json_body);
        }

        let response: reqwest::Response = req.send().await?;
        let status = response.status();
        let resp_headers = response.headers().clone();
        let text = response.text().await?;

        if status.is_success() {
            Ok(ApiResponse {
                data: Some(text),
                error_body: None,
                status: status.as_u16(),
                success: true,
                headers: resp_headers,
            })
        } else {
            Ok(ApiResponse {
                data: None,
                error_body: Some(text),
                status: status.as_u16(),
                success: false,
                headers: resp_headers,
            })
        }
    }

    /// Performs a request and deserializes a successful JSON body into `T`.
    ///
    /// # Errors
    /// Transport failures as in [`ApiClient::send`]; a 2xx body that is not
    /// valid `T` yields `IngestError::Decode`.
    pub async fn request<T, B>(
        &self,
        method: Method,
        path: &str,
        bearer: Option<&str>,
        headers: Option<HeaderMap>,
        body: Option<&B>,
    ) -> IngestResult<ApiResponse<T>>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let raw = self.send(method, path, bearer, headers, body).await?;
        let data = match raw.data {
            Some(text) => Some(
                serde_json::from_str::<T>(&text)
                    .map_err(|e| IngestError::Decode(format!("unexpected response body: {}", e)))?,
            ),
            None => None,
        };
        Ok(ApiResponse {
            data,
            error_body: raw.error_body,
            status: raw.status,
            success: raw.success,
            headers: raw.headers,
        })
    }

    /// Opens a streaming request and returns the live response.
    ///
    /// Non-2xx statuses are mapped to errors here since a failed stream has
    /// no usable body: 401/403 become `Auth`, everything else `Transport`.
    pub async fn open_stream(&self, method: Method, path: &str, bearer: &str) -> IngestResult<reqwest::Response> {
        let full_url = self.url(path)?;
        let response = self
            .streaming
            .request(method, full_url)
            .header(AUTHORIZATION, format!("Bearer {}", bearer))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        match status.as_u16() {
            401 | 403 => Err(IngestError::Auth(format!("stream rejected with status {}: {}", status, body))),
            _ => Err(IngestError::Transport(format!("stream rejected with status {}: {}", status, body))),
        }
    }
}
