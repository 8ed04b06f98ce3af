//! # Metasys Platform Client
//!
//! `PlatformApi` over the platform's v4 REST API: login, token refresh,
//! stream keepalive, present-value subscriptions and the event stream itself.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Serialize;

use crate::configs::IngestSettings;
use crate::core::ports::{ByteStream, PlatformApi, PlatformReply};
use crate::errors::{IngestError, IngestResult};
use crate::model::{Credential, TokenResponse};
use crate::retrieve::ky_http::{ApiClient, ApiResponse};

#[derive(Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

/// HTTP client for one platform instance.
pub struct MetasysClient {
    api: ApiClient,
    subscribe_header: HeaderName,
}

impl MetasysClient {
    /// Builds a client from validated settings.
    pub fn new(settings: &IngestSettings) -> IngestResult<Self> {
        let subscribe_header = HeaderName::from_bytes(settings.subscribe_header.as_bytes())
            .map_err(|e| IngestError::Config(format!("invalid subscribe header name: {}", e)))?;
        Ok(Self {
            api: ApiClient::new(settings.api_root()?, settings.http_retries),
            subscribe_header,
        })
    }

    fn credential_from(response: ApiResponse<TokenResponse>, what: &str) -> IngestResult<Credential> {
        if !response.success {
            return Err(IngestError::Auth(format!(
                "{} failed with status {}: {}",
                what,
                response.status,
                response.error_body.unwrap_or_default()
            )));
        }
        response
            .data
            .ok_or_else(|| IngestError::Auth(format!("{} returned an empty body", what)))?
            .into_credential()
    }

    /// Token endpoints report malformed bodies as auth failures.
    fn auth_decode(e: IngestError) -> IngestError {
        match e {
            IngestError::Decode(msg) => IngestError::Auth(msg),
            other => other,
        }
    }
}

#[async_trait]
impl PlatformApi for MetasysClient {
    async fn login(&self, username: &str, password: &str) -> IngestResult<Credential> {
        let body = LoginRequest { username, password };
        let response = self
            .api
            .request::<TokenResponse, _>(Method::POST, "login", None, None, Some(&body))
            .await
            .map_err(Self::auth_decode)?;
        Self::credential_from(response, "login")
    }

    async fn refresh(&self, token: &str) -> IngestResult<Credential> {
        let response = self
            .api
            .request::<TokenResponse, ()>(Method::GET, "refreshToken", Some(token), None, None)
            .await
            .map_err(Self::auth_decode)?;
        Self::credential_from(response, "token refresh")
    }

    async fn keepalive(&self, token: &str) -> IngestResult<()> {
        let response = self
            .api
            .send::<()>(Method::GET, "stream/keepalive", Some(token), None, None)
            .await?;
        match response.status {
            s if response.success => {
                tracing::debug!(status = s, body = response.data.as_deref().unwrap_or(""), "Keepalive acknowledged");
                Ok(())
            }
            401 | 403 => Err(IngestError::Auth(format!("keepalive rejected with status {}", response.status))),
            s => Err(IngestError::Transport(format!(
                "keepalive failed with status {}: {}",
                s,
                response.error_body.unwrap_or_default()
            ))),
        }
    }

    async fn subscribe(&self, token: &str, stream_id: &str, guid: &str) -> IngestResult<PlatformReply> {
        let mut headers = HeaderMap::new();
        let value = HeaderValue::from_str(stream_id)
            .map_err(|e| IngestError::Protocol(format!("stream id is not a valid header value: {}", e)))?;
        headers.insert(self.subscribe_header.clone(), value);

        let path = IngestSettings::subscribe_path(guid)?;
        let response = self.api.send::<()>(Method::GET, &path, Some(token), Some(headers), None).await?;
        let body = if response.success { response.data } else { response.error_body };
        Ok(PlatformReply { status: response.status, body: body.unwrap_or_default() })
    }

    async fn open_stream(&self, token: &str) -> IngestResult<ByteStream> {
        let response = self.api.open_stream(Method::POST, "stream", token).await?;
        Ok(response.bytes_stream().map(|chunk| chunk.map_err(IngestError::from)).boxed())
    }
}
