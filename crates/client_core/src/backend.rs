use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use relay::{
    parse_http_url, relay_conversation, FailureKind, RelayContext, RelayOutcome, RelayStatus,
    ReplyEnvelope,
};
use reqwest::Client;
use shared::{
    domain::{Message, MessageIdGenerator, Role},
    protocol::{ChatReply, ChatRequest},
    DEFAULT_DELIVERY_FAILURE_MESSAGE,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

const CHAT_ROUTE: &str = "api/chat";

#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Never fails: anything short of a real reply comes back as a fallback
    /// assistant message, except cancellation.
    async fn send(&self, transcript: &[Message], cancel: &CancellationToken) -> RelayOutcome;
}

pub struct HttpChatBackend {
    http: Client,
    chat_url: Url,
    ids: MessageIdGenerator,
    delivery_failure_message: String,
}

impl HttpChatBackend {
    pub fn new(relay_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut base = parse_http_url(relay_url).context("relay url")?;
        // Relative join keeps any path prefix the relay is mounted under.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let chat_url = base
            .join(CHAT_ROUTE)
            .with_context(|| format!("cannot derive chat route from '{relay_url}'"))?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build relay http client")?;
        Ok(Self {
            http,
            chat_url,
            ids: MessageIdGenerator::new(),
            delivery_failure_message: DEFAULT_DELIVERY_FAILURE_MESSAGE.to_string(),
        })
    }

    pub fn with_delivery_failure_message(mut self, message: impl Into<String>) -> Self {
        self.delivery_failure_message = message.into();
        self
    }

    pub fn chat_url(&self) -> &Url {
        &self.chat_url
    }

    fn delivery_failure(&self, kind: FailureKind) -> RelayOutcome {
        RelayOutcome::Reply(ReplyEnvelope {
            message: Message::assistant(self.ids.next_id(), self.delivery_failure_message.clone()),
            status: RelayStatus::Failed(kind),
            sources: Vec::new(),
        })
    }

    async fn post_conversation(&self, transcript: &[Message]) -> RelayOutcome {
        let request = ChatRequest {
            messages: transcript.to_vec(),
        };
        let response = match self
            .http
            .post(self.chat_url.clone())
            .json(&request)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, url = %self.chat_url, "relay unreachable");
                return self.delivery_failure(FailureKind::Network);
            }
        };

        // Failure statuses still carry a renderable message.
        let status = response.status();
        let reply: ChatReply = match response.json().await {
            Ok(reply) => reply,
            Err(err) if err.is_decode() => {
                warn!(error = %err, status = status.as_u16(), "relay replied with an unreadable body");
                return self.delivery_failure(FailureKind::Malformed);
            }
            Err(err) => {
                warn!(error = %err, status = status.as_u16(), "relay reply interrupted");
                return self.delivery_failure(FailureKind::Network);
            }
        };
        if reply.message.role != Role::Assistant {
            warn!(status = status.as_u16(), "relay replied with a non-assistant message");
            return self.delivery_failure(FailureKind::Malformed);
        }

        debug!(status = status.as_u16(), "relay replied");
        let status = if status.is_success() {
            RelayStatus::Success
        } else {
            RelayStatus::Failed(FailureKind::UpstreamStatus(status.as_u16()))
        };
        RelayOutcome::Reply(ReplyEnvelope {
            message: reply.message,
            status,
            sources: reply.sources,
        })
    }
}

#[async_trait]
impl ChatBackend for HttpChatBackend {
    async fn send(&self, transcript: &[Message], cancel: &CancellationToken) -> RelayOutcome {
        if cancel.is_cancelled() {
            return RelayOutcome::Cancelled;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => RelayOutcome::Cancelled,
            outcome = self.post_conversation(transcript) => outcome,
        }
    }
}

/// Runs the relay in the same process, talking to the upstream service
/// directly.
#[derive(Clone)]
pub struct LocalChatBackend {
    relay: RelayContext,
}

impl LocalChatBackend {
    pub fn new(relay: RelayContext) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl ChatBackend for LocalChatBackend {
    async fn send(&self, transcript: &[Message], cancel: &CancellationToken) -> RelayOutcome {
        match relay_conversation(&self.relay, transcript, cancel).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(error = %err, "relay rejected conversation");
                RelayOutcome::Reply(ReplyEnvelope {
                    message: Message::assistant(
                        self.relay.ids.next_id(),
                        self.relay.fallback_message.clone(),
                    ),
                    status: RelayStatus::Failed(FailureKind::Malformed),
                    sources: Vec::new(),
                })
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/backend_tests.rs"]
mod tests;
