use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::Client;
use shared::protocol::{InterpretRequest, InterpretResponse};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// Why a relayed call produced a fallback reply instead of an interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Network,
    UpstreamStatus(u16),
    Malformed,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("upstream responded with status {0}")]
    UpstreamStatus(u16),
    #[error("malformed upstream payload: {0}")]
    Malformed(String),
    #[error("network failure reaching upstream: {0}")]
    Network(String),
    #[error("upstream call cancelled")]
    Cancelled,
}

impl TransportError {
    /// `None` for cancellation, which is not a failure from the user's side.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            TransportError::UpstreamStatus(code) => Some(FailureKind::UpstreamStatus(*code)),
            TransportError::Malformed(_) => Some(FailureKind::Malformed),
            TransportError::Network(_) => Some(FailureKind::Network),
            TransportError::Cancelled => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Network(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpretation {
    pub text: String,
    pub sources: Vec<String>,
}

#[async_trait]
pub trait Interpreter: Send + Sync {
    /// Makes exactly one attempt. Resolves with `Cancelled` as soon as
    /// `cancel` fires, dropping whatever is still outstanding.
    async fn interpret(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Interpretation, TransportError>;
}

#[derive(Clone)]
pub struct HttpInterpreter {
    http: Client,
    endpoint: Url,
}

impl HttpInterpreter {
    pub fn new(endpoint: Url, timeout: Duration) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build upstream http client")?;
        Ok(Self { http, endpoint })
    }

    async fn post_prompt(&self, prompt: &str) -> Result<Interpretation, TransportError> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&InterpretRequest {
                dream: prompt.to_string(),
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::UpstreamStatus(status.as_u16()));
        }

        let body = response.bytes().await?;
        debug!(status = status.as_u16(), bytes = body.len(), "upstream replied");
        parse_interpretation(&body)
    }
}

#[async_trait]
impl Interpreter for HttpInterpreter {
    async fn interpret(
        &self,
        prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Interpretation, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TransportError::Cancelled),
            result = self.post_prompt(prompt) => result,
        }
    }
}

/// Parses an http(s) url, the only schemes either hop speaks.
pub fn parse_http_url(raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("invalid url '{raw}'"))?;
    if !matches!(url.scheme(), "http" | "https") {
        bail!("url '{raw}' must use http or https");
    }
    Ok(url)
}

pub(crate) fn parse_interpretation(body: &[u8]) -> Result<Interpretation, TransportError> {
    let payload: InterpretResponse =
        serde_json::from_slice(body).map_err(|err| TransportError::Malformed(err.to_string()))?;
    let sources = payload.source_list();
    let text = payload
        .interpretation
        .ok_or_else(|| TransportError::Malformed("missing `interpretation` field".to_string()))?;
    Ok(Interpretation { text, sources })
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
