pub mod backend;
pub mod controller;

pub use backend::{ChatBackend, HttpChatBackend, LocalChatBackend};
pub use controller::{
    CancelOutcome, ConversationController, ConversationEvent, IgnoreReason, PendingReply,
    RequestState, SubmitOutcome,
};
pub use relay::{FailureKind, RelayOutcome, RelayStatus};
