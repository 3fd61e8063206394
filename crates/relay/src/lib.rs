use std::sync::Arc;

use shared::{
    domain::{Message, MessageIdGenerator, Role},
    error::{ApiError, ErrorCode},
    protocol::ChatReply,
    DEFAULT_FALLBACK_MESSAGE,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod transport;

pub use transport::{
    parse_http_url, FailureKind, HttpInterpreter, Interpretation, Interpreter, TransportError,
};

#[derive(Clone)]
pub struct RelayContext {
    pub interpreter: Arc<dyn Interpreter>,
    pub ids: Arc<MessageIdGenerator>,
    pub fallback_message: String,
}

impl RelayContext {
    pub fn new(interpreter: Arc<dyn Interpreter>) -> Self {
        Self {
            interpreter,
            ids: Arc::new(MessageIdGenerator::new()),
            fallback_message: DEFAULT_FALLBACK_MESSAGE.to_string(),
        }
    }

    pub fn with_fallback_message(mut self, fallback_message: impl Into<String>) -> Self {
        self.fallback_message = fallback_message.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStatus {
    Success,
    Failed(FailureKind),
}

/// What the relay hands back for a completed call: always an assistant
/// message, with the status kept on the side for logging and status codes.
#[derive(Debug, Clone)]
pub struct ReplyEnvelope {
    pub message: Message,
    pub status: RelayStatus,
    pub sources: Vec<String>,
}

impl ReplyEnvelope {
    pub fn is_success(&self) -> bool {
        self.status == RelayStatus::Success
    }

    pub fn into_chat_reply(self) -> ChatReply {
        ChatReply {
            message: self.message,
            sources: self.sources,
        }
    }
}

#[derive(Debug, Clone)]
pub enum RelayOutcome {
    Reply(ReplyEnvelope),
    Cancelled,
}

/// Newest user utterance in the conversation, if any.
pub fn latest_user_prompt(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|message| message.role == Role::User)
        .map(|message| message.content.as_str())
}

/// Relays the newest user message upstream. Upstream failures never escape:
/// they become a fallback assistant message. The only error is a
/// conversation that contains nothing to relay.
pub async fn relay_conversation(
    ctx: &RelayContext,
    messages: &[Message],
    cancel: &CancellationToken,
) -> Result<RelayOutcome, ApiError> {
    let prompt = latest_user_prompt(messages).ok_or_else(|| {
        ApiError::new(
            ErrorCode::Validation,
            "conversation must contain at least one user message",
        )
    })?;
    debug!(
        messages = messages.len(),
        prompt_chars = prompt.chars().count(),
        "relaying prompt upstream"
    );

    let result = ctx.interpreter.interpret(prompt, cancel).await;
    let envelope = match result {
        Ok(interpretation) => ReplyEnvelope {
            message: Message::assistant(ctx.ids.next_id(), interpretation.text),
            status: RelayStatus::Success,
            sources: interpretation.sources,
        },
        Err(err) => match err.failure_kind() {
            None => {
                info!("relay cancelled before upstream replied");
                return Ok(RelayOutcome::Cancelled);
            }
            Some(kind) => {
                warn!(error = %err, ?kind, "upstream interpretation failed; replying with fallback");
                ReplyEnvelope {
                    message: Message::assistant(ctx.ids.next_id(), ctx.fallback_message.clone()),
                    status: RelayStatus::Failed(kind),
                    sources: Vec::new(),
                }
            }
        },
    };

    Ok(RelayOutcome::Reply(envelope))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
