use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use relay::{RelayOutcome, RelayStatus};
use shared::domain::{Message, MessageIdGenerator};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::backend::ChatBackend;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    MessageAppended(Message),
    RequestStarted {
        generation: u64,
    },
    /// `status` is `None` when the request ended without a reply.
    RequestFinished {
        generation: u64,
        status: Option<RelayStatus>,
    },
    RequestCancelled {
        generation: u64,
    },
    ReplyDiscarded {
        generation: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    Empty,
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Ignored(IgnoreReason),
    Completed {
        message: Message,
        status: RelayStatus,
    },
    Cancelled,
    /// A reply arrived for a request that had already been invalidated.
    Discarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    Idle,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestState {
    pub in_flight: bool,
    pub active_generation: Option<u64>,
}

struct ActiveRequest {
    generation: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct ControllerState {
    transcript: Vec<Message>,
    active: Option<ActiveRequest>,
    last_generation: u64,
}

pub struct ConversationController {
    backend: Arc<dyn ChatBackend>,
    ids: MessageIdGenerator,
    inner: Mutex<ControllerState>,
    events: broadcast::Sender<ConversationEvent>,
}

impl ConversationController {
    pub fn new(backend: Arc<dyn ChatBackend>) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Arc::new(Self {
            backend,
            ids: MessageIdGenerator::new(),
            inner: Mutex::new(ControllerState::default()),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    pub fn transcript(&self) -> Vec<Message> {
        self.state().transcript.clone()
    }

    pub fn is_in_flight(&self) -> bool {
        self.state().active.is_some()
    }

    pub fn request_state(&self) -> RequestState {
        let state = self.state();
        RequestState {
            in_flight: state.active.is_some(),
            active_generation: state.active.as_ref().map(|active| active.generation),
        }
    }

    /// Appends the trimmed text as a user message and waits for the reply.
    /// Ignored when the text is blank or another request is in flight.
    pub async fn submit(self: &Arc<Self>, text: &str) -> SubmitOutcome {
        match self.start(text) {
            Ok(pending) => pending.wait().await,
            Err(reason) => SubmitOutcome::Ignored(reason),
        }
    }

    /// Admits a request without waiting for it: on return the user message
    /// is in the transcript and the request is in flight, so `cancel()`
    /// applies to it even if the reply is awaited elsewhere.
    pub fn start(self: &Arc<Self>, text: &str) -> Result<PendingReply, IgnoreReason> {
        let content = text.trim();
        if content.is_empty() {
            return Err(IgnoreReason::Empty);
        }

        let mut state = self.state();
        if let Some(active) = &state.active {
            debug!(active = active.generation, "submit ignored while a request is in flight");
            return Err(IgnoreReason::Busy);
        }

        let message = Message::user(self.ids.next_id(), content);
        self.append(&mut state, message);

        state.last_generation += 1;
        let generation = state.last_generation;
        let cancel = CancellationToken::new();
        state.active = Some(ActiveRequest {
            generation,
            cancel: cancel.clone(),
        });
        self.emit(ConversationEvent::RequestStarted { generation });
        let transcript = state.transcript.clone();
        info!(generation, messages = transcript.len(), "prompt submitted");

        Ok(PendingReply {
            controller: Arc::clone(self),
            generation,
            cancel,
            transcript,
            settled: false,
        })
    }

    /// Invalidates the in-flight request at once; its reply, whenever it
    /// lands, is dropped.
    pub fn cancel(&self) -> CancelOutcome {
        let mut state = self.state();
        let Some(active) = state.active.take() else {
            return CancelOutcome::Idle;
        };
        active.cancel.cancel();
        info!(generation = active.generation, "request cancelled");
        self.emit(ConversationEvent::RequestCancelled {
            generation: active.generation,
        });
        CancelOutcome::Cancelled
    }

    fn finish(&self, generation: u64, outcome: RelayOutcome) -> SubmitOutcome {
        let mut state = self.state();
        let is_current = state
            .active
            .as_ref()
            .is_some_and(|active| active.generation == generation);

        if !is_current {
            return match outcome {
                RelayOutcome::Cancelled => SubmitOutcome::Cancelled,
                RelayOutcome::Reply(_) => {
                    debug!(generation, "discarding reply for invalidated request");
                    self.emit(ConversationEvent::ReplyDiscarded { generation });
                    SubmitOutcome::Discarded
                }
            };
        }

        state.active = None;
        match outcome {
            RelayOutcome::Cancelled => {
                self.emit(ConversationEvent::RequestFinished {
                    generation,
                    status: None,
                });
                SubmitOutcome::Cancelled
            }
            RelayOutcome::Reply(envelope) => {
                let message = self.append(&mut state, envelope.message);
                self.emit(ConversationEvent::RequestFinished {
                    generation,
                    status: Some(envelope.status),
                });
                info!(generation, status = ?envelope.status, "reply appended");
                SubmitOutcome::Completed {
                    message,
                    status: envelope.status,
                }
            }
        }
    }

    /// Clears a request whose reply was dropped before it settled.
    fn abandon(&self, generation: u64) {
        let mut state = self.state();
        if state
            .active
            .as_ref()
            .is_some_and(|active| active.generation == generation)
        {
            if let Some(active) = state.active.take() {
                active.cancel.cancel();
            }
            debug!(generation, "submit dropped mid-flight");
            self.emit(ConversationEvent::RequestFinished {
                generation,
                status: None,
            });
        }
    }

    /// Ids stay unique across the transcript even when a relay hands back
    /// one that collides with an existing entry.
    fn append(&self, state: &mut ControllerState, mut message: Message) -> Message {
        while state.transcript.iter().any(|existing| existing.id == message.id) {
            message.id = self.ids.next_id();
        }
        state.transcript.push(message.clone());
        self.emit(ConversationEvent::MessageAppended(message.clone()));
        message
    }

    fn emit(&self, event: ConversationEvent) {
        let _ = self.events.send(event);
    }

    fn state(&self) -> MutexGuard<'_, ControllerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An admitted request. Dropping it unawaited clears the in-flight state.
pub struct PendingReply {
    controller: Arc<ConversationController>,
    generation: u64,
    cancel: CancellationToken,
    transcript: Vec<Message>,
    settled: bool,
}

impl PendingReply {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn wait(mut self) -> SubmitOutcome {
        let outcome = self
            .controller
            .backend
            .send(&self.transcript, &self.cancel)
            .await;
        self.settled = true;
        self.controller.finish(self.generation, outcome)
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if !self.settled {
            self.controller.abandon(self.generation);
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
