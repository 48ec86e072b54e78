//! `RemoteSource` over HTTP using reqwest.

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, COOKIE, HeaderMap, HeaderValue};
use reqwest::redirect::Policy;
use secrecy::{ExposeSecret, SecretString};

use super::{ClaimResponse, ProbeResponse, RemoteSource, TaskListing};
use crate::error::RemoteError;

/// HTTP client for the task site.
pub struct HttpRemote {
    base_url: String,
    /// Follows redirects; used for the listing and claims.
    client: reqwest::Client,
    /// Never follows redirects; used for the session probe.
    probe_client: reqwest::Client,
}

impl HttpRemote {
    /// Create a client. `session_cookie` is sent on every request when set.
    pub fn new(
        base_url: impl Into<String>,
        session_cookie: Option<SecretString>,
    ) -> Result<Self, RemoteError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();

        let mut headers = HeaderMap::new();
        if let Some(cookie) = session_cookie {
            let mut value = HeaderValue::from_str(cookie.expose_secret()).map_err(|e| {
                RemoteError::Transport {
                    url: base_url.clone(),
                    reason: format!("invalid session cookie: {e}"),
                }
            })?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }

        let build = |policy: Policy| {
            reqwest::Client::builder()
                .default_headers(headers.clone())
                .redirect(policy)
                .build()
                .map_err(|e| RemoteError::Transport {
                    url: base_url.clone(),
                    reason: e.to_string(),
                })
        };

        Ok(Self {
            client: build(Policy::default())?,
            probe_client: build(Policy::none())?,
            base_url,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

fn transport(url: &str, e: reqwest::Error) -> RemoteError {
    RemoteError::Transport {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

#[async_trait]
impl RemoteSource for HttpRemote {
    async fn fetch_listing(&self) -> Result<TaskListing, RemoteError> {
        let url = self.url("/tasks.json");
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if !content_type
            .as_deref()
            .is_some_and(|ct| ct.contains("application/json"))
        {
            return Err(RemoteError::ContentType { url, content_type });
        }

        response
            .json::<TaskListing>()
            .await
            .map_err(|e| RemoteError::Decode {
                url,
                reason: e.to_string(),
            })
    }

    async fn accept_random(&self, target: &str) -> Result<ClaimResponse, RemoteError> {
        let request_url = self.url(&format!("/projects/{target}/tasks/accept_random"));
        let response = self
            .client
            .get(&request_url)
            .send()
            .await
            .map_err(|e| transport(&request_url, e))?;

        Ok(ClaimResponse {
            final_url: response.url().to_string(),
            status: response.status().as_u16(),
            request_url,
        })
    }

    async fn probe_session(&self) -> Result<ProbeResponse, RemoteError> {
        let url = self.url("/tasks");
        let response = self
            .probe_client
            .get(&url)
            .send()
            .await
            .map_err(|e| transport(&url, e))?;

        if response.status().is_redirection() {
            Ok(ProbeResponse::Redirect)
        } else {
            Ok(ProbeResponse::Answered(response.status().as_u16()))
        }
    }
}
