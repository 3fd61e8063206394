use serde::{Deserialize, Serialize};

use crate::domain::Message;

/// Body of `POST /api/chat`: the whole conversation, oldest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
}

/// Reply of `POST /api/chat`. Sent for both success and fail-soft failure;
/// only the status code tells them apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: Message,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<String>,
}

/// Body sent to the upstream interpretation service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpretRequest {
    pub dream: String,
}

/// Upstream success body. `interpretation` is optional here so a payload
/// missing it still parses and can be reported as malformed. `sources` is
/// kept raw: it is metadata, and a bad shape must not sink the reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterpretResponse {
    #[serde(default)]
    pub interpretation: Option<String>,
    #[serde(default)]
    pub sources: Option<serde_json::Value>,
}

impl InterpretResponse {
    /// String entries of `sources`; anything else is dropped.
    pub fn source_list(&self) -> Vec<String> {
        match &self.sources {
            Some(serde_json::Value::Array(entries)) => entries
                .iter()
                .filter_map(|entry| entry.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}
