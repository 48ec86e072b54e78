//! Remote task site abstraction.
//!
//! The orchestrator talks to the site through `RemoteSource` so the HTTP
//! transport (`http::HttpRemote`) can be swapped for stubs in tests.

pub mod http;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::RemoteError;

pub use http::HttpRemote;

/// The queue listing returned by the site.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskListing {
    #[serde(default)]
    pub tasks: Vec<TaskEntry>,
}

/// One accepted task in the listing.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskEntry {
    /// Site-relative task URL.
    pub task_url: String,
}

/// Outcome of an accept-random request after redirects were followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimResponse {
    /// URL the request was issued against.
    pub request_url: String,
    /// URL of the final response.
    pub final_url: String,
    pub status: u16,
}

impl ClaimResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outcome of the session probe, with redirects not followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeResponse {
    /// The site answered with a redirect (to its sign-in page).
    Redirect,
    /// Any non-redirect answer.
    Answered(u16),
}

/// Backend-agnostic access to the task site.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Fetch the current queue listing.
    async fn fetch_listing(&self) -> Result<TaskListing, RemoteError>;

    /// Ask the site to assign a random task from `target`.
    async fn accept_random(&self, target: &str) -> Result<ClaimResponse, RemoteError>;

    /// Probe an endpoint that requires a signed-in session.
    async fn probe_session(&self) -> Result<ProbeResponse, RemoteError>;
}
