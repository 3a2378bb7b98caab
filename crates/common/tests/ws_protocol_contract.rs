use chrono::{TimeZone, Utc};
use lectern_common::protocol::ws::{ClientFrame, RoomUser, ServerFrame};
use lectern_common::types::{ChatMessage, Role};
use serde_json::Value;
use uuid::Uuid;

fn sample_message(classroom_id: Uuid, user_id: Uuid) -> ChatMessage {
    ChatMessage {
        id: Uuid::new_v4(),
        classroom_id,
        user_id,
        user_name: "Ada".to_string(),
        role: Role::Facilitator,
        content: "hello".to_string(),
        created_at: Utc.with_ymd_and_hms(2026, 2, 7, 0, 0, 0).unwrap(),
        edited: false,
        deleted: false,
        attachment: None,
    }
}

#[test]
fn client_frame_shapes_match_protocol() {
    let classroom_id = Uuid::new_v4();
    let message_id = Uuid::new_v4();

    let samples = [
        (
            ClientFrame::JoinRoom { classroom_id },
            "join_room",
            &["type", "classroom_id"][..],
        ),
        (
            ClientFrame::LeaveRoom { classroom_id },
            "leave_room",
            &["type", "classroom_id"][..],
        ),
        (
            ClientFrame::SendMessage {
                classroom_id: Some(classroom_id),
                content: "hi".to_string(),
            },
            "send_message",
            &["type", "classroom_id", "content"][..],
        ),
        (
            ClientFrame::EditMessage { message_id, content: "hi again".to_string() },
            "edit_message",
            &["type", "message_id", "content"][..],
        ),
        (
            ClientFrame::DeleteMessage { message_id },
            "delete_message",
            &["type", "message_id"][..],
        ),
        (
            ClientFrame::GetHistory { classroom_id, limit: Some(25), before: None },
            "get_history",
            &["type", "classroom_id", "limit"][..],
        ),
    ];

    for (frame, expected_type, expected_keys) in samples {
        let value = serde_json::to_value(frame).expect("client frame should serialize");
        assert_eq!(value["type"], expected_type);
        for key in expected_keys {
            assert!(
                value.get(key).is_some(),
                "serialized `{expected_type}` frame must include `{key}`",
            );
        }
    }
}

#[test]
fn server_frame_shapes_match_protocol() {
    let classroom_id = Uuid::new_v4();
    let user_id = Uuid::new_v4();
    let message_id = Uuid::new_v4();
    let timestamp = Utc.with_ymd_and_hms(2026, 2, 7, 0, 0, 0).unwrap();

    let samples = [
        (
            ServerFrame::AuthSuccess {
                user_id,
                user_name: "Ada".to_string(),
                role: Role::Facilitator,
            },
            "auth_success",
            &["type", "user_id", "user_name", "role"][..],
        ),
        (
            ServerFrame::MessageHistory { messages: vec![sample_message(classroom_id, user_id)] },
            "message_history",
            &["type", "messages"][..],
        ),
        (
            ServerFrame::NewMessage { message: sample_message(classroom_id, user_id) },
            "new_message",
            // flattened ChatMessage fields appear at the top level
            &["type", "id", "classroom_id", "user_id", "user_name", "role", "content", "created_at", "edited", "deleted"][..],
        ),
        (
            ServerFrame::MessageEdited {
                id: message_id,
                content: "fixed".to_string(),
                edited: true,
                user_id,
                user_name: "Ada".to_string(),
            },
            "message_edited",
            &["type", "id", "content", "edited", "user_id", "user_name"][..],
        ),
        (
            ServerFrame::MessageDeleted { message_id },
            "message_deleted",
            &["type", "message_id"][..],
        ),
        (
            ServerFrame::UserJoined {
                user_id,
                user_name: "Ada".to_string(),
                role: Role::Learner,
                classroom_id,
                timestamp,
            },
            "user_joined",
            &["type", "user_id", "user_name", "role", "classroom_id", "timestamp"][..],
        ),
        (
            ServerFrame::UserLeft {
                user_id,
                user_name: "Ada".to_string(),
                role: Role::Learner,
                classroom_id,
                timestamp,
            },
            "user_left",
            &["type", "user_id", "user_name", "role", "classroom_id", "timestamp"][..],
        ),
        (
            ServerFrame::JoinedRoom {
                classroom_id,
                users: vec![RoomUser { id: user_id, name: "Ada".to_string(), role: Role::Learner }],
            },
            "joined_room",
            &["type", "classroom_id", "users"][..],
        ),
        (
            ServerFrame::LeftRoom { classroom_id },
            "left_room",
            &["type", "classroom_id"][..],
        ),
        (
            ServerFrame::Error { message: "denied".to_string(), timestamp },
            "error",
            &["type", "message", "timestamp"][..],
        ),
    ];

    for (frame, expected_type, expected_keys) in samples {
        let value = serde_json::to_value(frame).expect("server frame should serialize");
        assert_eq!(value["type"], expected_type);
        for key in expected_keys {
            assert!(
                value.get(key).is_some(),
                "serialized `{expected_type}` frame must include `{key}`",
            );
        }
    }
}

#[test]
fn optional_fields_are_omitted_when_absent() {
    let send_without_room =
        ClientFrame::SendMessage { classroom_id: None, content: "hi".to_string() };
    let history_without_cursor = ClientFrame::GetHistory {
        classroom_id: Uuid::new_v4(),
        limit: None,
        before: None,
    };
    let message_without_attachment =
        ServerFrame::NewMessage { message: sample_message(Uuid::new_v4(), Uuid::new_v4()) };

    let send_json = serde_json::to_value(send_without_room).expect("frame should serialize");
    let history_json =
        serde_json::to_value(history_without_cursor).expect("frame should serialize");
    let message_json =
        serde_json::to_value(message_without_attachment).expect("frame should serialize");

    assert!(!object_keys(&send_json).contains(&"classroom_id".to_string()));
    assert!(!object_keys(&history_json).contains(&"limit".to_string()));
    assert!(!object_keys(&history_json).contains(&"before".to_string()));
    assert!(!object_keys(&message_json).contains(&"attachment".to_string()));
}

#[test]
fn roles_cross_the_wire_in_screaming_snake_case() {
    let frame = ServerFrame::AuthSuccess {
        user_id: Uuid::new_v4(),
        user_name: "Grace".to_string(),
        role: Role::Learner,
    };
    let value = serde_json::to_value(frame).expect("frame should serialize");
    assert_eq!(value["role"], "LEARNER");
}

#[test]
fn unknown_frame_types_fail_to_decode() {
    let raw = r#"{"type":"upload_virus","payload":"x"}"#;
    assert!(lectern_common::protocol::ws::decode_client_frame(raw).is_err());
}

#[test]
fn decode_failures_distinguish_unknown_types_from_corrupt_json() {
    use lectern_common::protocol::ws::{classify_decode_failure, DecodeFailure};

    assert_eq!(
        classify_decode_failure(r#"{"type":"upload_virus"}"#),
        DecodeFailure::UnknownType
    );
    assert_eq!(classify_decode_failure("this is not json"), DecodeFailure::Malformed);
    assert_eq!(classify_decode_failure(r#"{"content":"no type tag"}"#), DecodeFailure::Malformed);
    // A recognized type with a broken payload is malformed, not unknown.
    assert_eq!(classify_decode_failure(r#"{"type":"join_room"}"#), DecodeFailure::Malformed);
}

#[test]
fn client_frame_type_list_matches_the_enum() {
    use lectern_common::protocol::ws::CLIENT_FRAME_TYPES;

    for kind in CLIENT_FRAME_TYPES {
        let raw = format!(r#"{{"type":"{kind}"}}"#);
        let error = lectern_common::protocol::ws::decode_client_frame(&raw)
            .expect_err("payload-free frame should not decode");
        assert!(
            !error.to_string().contains("unknown variant"),
            "`{kind}` is listed but the decoder does not recognize it",
        );
    }
}

#[test]
fn client_frames_round_trip() {
    let frame = ClientFrame::GetHistory {
        classroom_id: Uuid::new_v4(),
        limit: Some(10),
        before: Some(Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap()),
    };
    let raw = serde_json::to_string(&frame).expect("frame should serialize");
    let decoded =
        lectern_common::protocol::ws::decode_client_frame(&raw).expect("frame should decode");
    assert_eq!(decoded, frame);
}

fn object_keys(value: &Value) -> Vec<String> {
    let mut keys =
        value.as_object().expect("value should be an object").keys().cloned().collect::<Vec<_>>();
    keys.sort();
    keys
}
