//! HTTP client for the admin commands.

use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use wh_core::{ActivitySubmission, PendingSession, Session, WorkBlock};

use crate::api::{CloseAllResponse, ErrorResponse, HealthReport, SubmitResponse};

#[derive(Debug, Clone)]
pub struct DaemonClient {
    base_url: String,
    http: Client,
}

impl DaemonClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    pub async fn health(&self) -> Result<HealthReport> {
        self.get("/health").await
    }

    pub async fn active_sessions(&self) -> Result<Vec<Session>> {
        self.get("/sessions/active").await
    }

    pub async fn pending_sessions(&self) -> Result<Vec<PendingSession>> {
        self.get("/sessions/pending").await
    }

    pub async fn work_blocks(&self, session_id: &str) -> Result<Vec<WorkBlock>> {
        self.get(&format!("/sessions/{session_id}/work-blocks")).await
    }

    pub async fn close_all(&self) -> Result<CloseAllResponse> {
        let response = self
            .http
            .post(self.url("/sessions/close-all"))
            .send()
            .await
            .with_context(|| self.unreachable())?;
        decode(response).await
    }

    pub async fn submit(&self, submission: &ActivitySubmission) -> Result<SubmitResponse> {
        let response = self
            .http
            .post(self.url("/activity"))
            .json(submission)
            .send()
            .await
            .with_context(|| self.unreachable())?;
        decode(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self
            .http
            .get(self.url(path))
            .send()
            .await
            .with_context(|| self.unreachable())?;
        decode(response).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn unreachable(&self) -> String {
        format!("daemon not reachable at {} (is `wh daemon` running?)", self.base_url)
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return response
            .json()
            .await
            .context("failed to decode daemon response");
    }
    match response.json::<ErrorResponse>().await {
        Ok(body) => bail!("daemon returned {status}: {} ({})", body.error, body.code),
        Err(_) => bail!("daemon returned {status}"),
    }
}
