//! Authenticated request pipeline
//!
//! Attaches the stored access token as a Bearer header, sends the request,
//! and on 401 drives exactly one coordinator-mediated refresh followed by at
//! most one resend. Whatever the resend returns is final.
//!
//! `execute_without_interception` skips the refresh-on-401 step. The refresh
//! call itself never goes through here at all (see `HttpRefreshTransport`),
//! so a 401 from the refresh endpoint cannot recurse.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::Secret;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use session_auth::{CredentialStore, SecretName, TokenPair};
use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use crate::coordinator::RefreshCoordinator;
use crate::error::{Error, Result};
use crate::invalidation::AuthFailureSignal;

/// Outbound request description. The pipeline only touches `Authorization`.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path and query relative to the client's base URL, e.g. `/v1/posts?page=2`
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body and set `Content-Type`.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|e| Error::InvalidRequest(format!("serializing body: {e}")))?;
        self.headers.insert(
            reqwest::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        self.body = Some(Bytes::from(body));
        Ok(self)
    }
}

/// Buffered 2xx response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::Transport(format!("decoding response body: {e}")))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client that keeps itself authenticated.
pub struct AuthenticatedClient {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
    store: Arc<dyn CredentialStore>,
    coordinator: RefreshCoordinator,
}

impl AuthenticatedClient {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        timeout: Duration,
        store: Arc<dyn CredentialStore>,
        coordinator: RefreshCoordinator,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into(),
            timeout,
            store,
            coordinator,
        }
    }

    /// Send `request` with the current access token, refreshing once on 401.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.run(request, new_request_id(), true).await
    }

    /// Send `request` with the current access token. A 401 is returned as
    /// `Error::Unauthorized` without attempting a refresh.
    pub async fn execute_without_interception(&self, request: ApiRequest) -> Result<ApiResponse> {
        self.run(request, new_request_id(), false).await
    }

    /// Store a token pair obtained out of band (e.g. from a login screen).
    pub fn login(&self, pair: &TokenPair) -> Result<()> {
        self.store.save_pair(pair)?;
        info!("session credentials stored");
        Ok(())
    }

    /// Clear credentials and notify subscribers.
    pub fn logout(&self) {
        self.coordinator.invalidator().invalidate();
    }

    /// Subscribe to session-expired notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<AuthFailureSignal> {
        self.coordinator.invalidator().subscribe()
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    #[instrument(
        skip_all,
        fields(request_id = %request_id, method = %request.method, path = %request.path)
    )]
    async fn run(
        &self,
        request: ApiRequest,
        request_id: String,
        intercept: bool,
    ) -> Result<ApiResponse> {
        let token = self.access_token()?;
        let response = self.send(&request, token.as_ref()).await?;

        if response.status != StatusCode::UNAUTHORIZED {
            return finish(response);
        }

        if !intercept {
            debug!("unauthorized, interception disabled");
            crate::metrics::record_request("unauthorized");
            return Err(Error::Unauthorized);
        }

        info!("unauthorized, refreshing session");
        if !self.coordinator.ensure_fresh_token().await {
            warn!("token refresh failed, session expired");
            crate::metrics::record_request("refresh_expired");
            return Err(Error::RefreshExpired);
        }

        // The pair was just committed; if it is already gone another attempt
        // invalidated the session in between.
        let Some(token) = self.access_token()? else {
            warn!("access token missing after refresh");
            crate::metrics::record_request("refresh_expired");
            return Err(Error::RefreshExpired);
        };

        let retry = self.send(&request, Some(&token)).await?;
        if retry.status == StatusCode::UNAUTHORIZED {
            warn!("still unauthorized after token refresh");
            crate::metrics::record_request("unauthorized");
            return Err(Error::Unauthorized);
        }
        finish(retry)
    }

    fn access_token(&self) -> Result<Option<Secret<String>>> {
        Ok(self.store.load(SecretName::AccessToken)?)
    }

    fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    async fn send(
        &self,
        request: &ApiRequest,
        token: Option<&Secret<String>>,
    ) -> Result<RawResponse> {
        let mut headers = request.headers.clone();
        headers.remove(AUTHORIZATION);
        match token {
            Some(token) => {
                let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
                    .map_err(|e| {
                        Error::Credential(format!("access token is not a valid header: {e}"))
                    })?;
                value.set_sensitive(true);
                headers.insert(AUTHORIZATION, value);
            }
            None => debug!("no access token stored, sending unauthenticated"),
        }

        let mut builder = self
            .http
            .request(request.method.clone(), self.url(&request.path))
            .headers(headers)
            .timeout(self.timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(|e| {
            crate::metrics::record_request("transport_error");
            if e.is_timeout() {
                Error::Transport(format!("request timed out after {}s", self.timeout.as_secs()))
            } else {
                Error::Transport(format!("request failed: {e}"))
            }
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(|e| {
            crate::metrics::record_request("transport_error");
            Error::Transport(format!("reading response body: {e}"))
        })?;
        debug!(status = status.as_u16(), "response received");

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }
}

struct RawResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

fn finish(response: RawResponse) -> Result<ApiResponse> {
    if response.status.is_success() {
        crate::metrics::record_request("success");
        return Ok(ApiResponse {
            status: response.status,
            headers: response.headers,
            body: response.body,
        });
    }

    crate::metrics::record_request("status_error");
    Err(Error::Status {
        status: response.status.as_u16(),
        body: String::from_utf8_lossy(&response.body).into_owned(),
    })
}

fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}
