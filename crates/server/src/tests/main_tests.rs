use super::*;
use async_trait::async_trait;
use axum::{body, body::Body, http::Request};
use relay::{Interpretation, Interpreter, TransportError};
use shared::{
    domain::{Message, MessageId, Role},
    DEFAULT_FALLBACK_MESSAGE,
};
use tower::ServiceExt;

enum Behaviour {
    Reply(&'static str),
    Fail(u16),
    WaitForCancel,
}

struct StubInterpreter(Behaviour);

#[async_trait]
impl Interpreter for StubInterpreter {
    async fn interpret(
        &self,
        _prompt: &str,
        cancel: &CancellationToken,
    ) -> Result<Interpretation, TransportError> {
        match self.0 {
            Behaviour::Reply(text) => Ok(Interpretation {
                text: text.to_string(),
                sources: vec!["book of dreams".to_string()],
            }),
            Behaviour::Fail(code) => Err(TransportError::UpstreamStatus(code)),
            Behaviour::WaitForCancel => {
                cancel.cancelled().await;
                Err(TransportError::Cancelled)
            }
        }
    }
}

fn test_app(behaviour: Behaviour) -> (Router, CancellationToken) {
    let shutdown = CancellationToken::new();
    let state = AppState {
        relay: RelayContext::new(Arc::new(StubInterpreter(behaviour))),
        shutdown: shutdown.clone(),
    };
    (build_router(Arc::new(state)), shutdown)
}

fn chat_request(messages: Vec<Message>) -> Request<Body> {
    Request::post("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::to_string(&ChatRequest { messages }).expect("json"),
        ))
        .expect("request")
}

fn one_prompt() -> Vec<Message> {
    vec![Message::user(MessageId("1".into()), "I was flying")]
}

async fn read_body<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

#[tokio::test]
async fn healthz_reports_ok() {
    let (app, _shutdown) = test_app(Behaviour::Reply("X"));
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn chat_returns_assistant_message_on_success() {
    let (app, _shutdown) = test_app(Behaviour::Reply("X"));
    let response = app
        .oneshot(chat_request(one_prompt()))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let reply: ChatReply = read_body(response).await;
    assert_eq!(reply.message.role, Role::Assistant);
    assert_eq!(reply.message.content, "X");
    assert_eq!(reply.sources, vec!["book of dreams".to_string()]);
}

#[tokio::test]
async fn chat_returns_renderable_fallback_on_upstream_failure() {
    let (app, _shutdown) = test_app(Behaviour::Fail(502));
    let response = app
        .oneshot(chat_request(one_prompt()))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let reply: ChatReply = read_body(response).await;
    assert_eq!(reply.message.role, Role::Assistant);
    assert_eq!(reply.message.content, DEFAULT_FALLBACK_MESSAGE);
    assert!(reply.sources.is_empty());
}

#[tokio::test]
async fn chat_rejects_conversation_without_user_message() {
    let (app, _shutdown) = test_app(Behaviour::Reply("X"));
    let response = app
        .oneshot(chat_request(Vec::new()))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let error: ApiError = read_body(response).await;
    assert_eq!(error.code, ErrorCode::Validation);
}

#[tokio::test]
async fn chat_rejects_malformed_body() {
    let (app, _shutdown) = test_app(Behaviour::Reply("X"));
    let request = Request::post("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"messages": "nope"}"#))
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert!(response.status().is_client_error());
}

#[tokio::test]
async fn shutdown_cancels_in_flight_relay() {
    let (app, shutdown) = test_app(Behaviour::WaitForCancel);
    let pending = tokio::spawn(app.oneshot(chat_request(one_prompt())));

    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.cancel();

    let response = pending.await.expect("join").expect("response");
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let error: ApiError = read_body(response).await;
    assert_eq!(error.code, ErrorCode::Unavailable);
}

#[tokio::test]
async fn chat_refuses_oversized_body() {
    let (app, _shutdown) = test_app(Behaviour::Reply("X"));
    let dream = "a".repeat(MAX_CHAT_BODY_BYTES);
    let body = serde_json::to_vec(&ChatRequest {
        messages: vec![Message::user(MessageId("1".into()), dream)],
    })
    .expect("json");
    assert!(body.len() > MAX_CHAT_BODY_BYTES);

    let request = Request::post("/api/chat")
        .header("content-type", "application/json")
        .header("content-length", body.len())
        .body(Body::from(body))
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}
