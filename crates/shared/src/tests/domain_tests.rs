use super::*;

#[test]
fn generated_ids_are_strictly_increasing() {
    let ids = MessageIdGenerator::new();
    let mut previous: i64 = ids.next_id().0.parse().expect("numeric id");
    for _ in 0..1_000 {
        let next: i64 = ids.next_id().0.parse().expect("numeric id");
        assert!(next > previous, "{next} should follow {previous}");
        previous = next;
    }
}

#[test]
fn message_serializes_with_lowercase_role() {
    let message = Message {
        id: MessageId("42".to_string()),
        role: Role::Assistant,
        content: "hello".to_string(),
        created_at: None,
    };
    let json = serde_json::to_value(&message).expect("json");
    assert_eq!(
        json,
        serde_json::json!({ "id": "42", "role": "assistant", "content": "hello" })
    );
}

#[test]
fn message_accepts_payload_without_timestamp() {
    let message: Message =
        serde_json::from_str(r#"{"id":"1","role":"user","content":"I was flying"}"#)
            .expect("parse");
    assert_eq!(message.role, Role::User);
    assert_eq!(message.created_at, None);
}
