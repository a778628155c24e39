//! Token pair and the refresh call
//!
//! `HttpRefreshTransport` POSTs the refresh token as JSON to the refresh
//! endpoint and decodes the new pair from the response body. It talks to the
//! endpoint with a plain `reqwest::Client`, never through the authenticated
//! pipeline, so a 401 from the refresh endpoint cannot trigger another
//! refresh.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use common::Secret;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Access/refresh token pair, replaced wholesale on every refresh.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
}

impl TokenPair {
    pub fn new(access: impl Into<String>, refresh: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access.into()),
            refresh_token: Secret::new(refresh.into()),
        }
    }
}

/// Exchanges a refresh token for a new token pair.
///
/// Timeouts are the transport's concern; callers treat them like any other
/// failure. Uses `Pin<Box<dyn Future>>` so it can be held as
/// `Arc<dyn RefreshTransport>`.
pub trait RefreshTransport: Send + Sync {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenPair>> + Send + 'a>>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Refresh transport backed by a single HTTP POST.
#[derive(Clone)]
pub struct HttpRefreshTransport {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpRefreshTransport {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send(&self, refresh_token: &str) -> Result<TokenPair> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Http(format!(
                        "token refresh timed out after {}ms",
                        self.timeout.as_millis()
                    ))
                } else {
                    Error::Http(format!("token refresh request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));

            // 401/403 means the refresh token is revoked or expired
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(Error::InvalidCredentials(format!(
                    "refresh token rejected ({status}): {body}"
                )));
            }

            return Err(Error::Refresh(format!(
                "refresh endpoint returned {status}: {body}"
            )));
        }

        let pair = response
            .json::<TokenPair>()
            .await
            .map_err(|e| Error::Decode(e.to_string()))?;
        debug!(endpoint = %self.endpoint, "refresh endpoint returned new token pair");
        Ok(pair)
    }
}

impl RefreshTransport for HttpRefreshTransport {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<TokenPair>> + Send + 'a>> {
        Box::pin(self.send(refresh_token))
    }
}
