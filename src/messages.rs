//! Wire message shapes and inbound classification.
//!
//! Both message kinds share the same generic JSON encoding with no explicit
//! type discriminator, so an inbound payload is classified by trial-decoding
//! against each known shape in a fixed priority order: chat first, then
//! system notification, then a raw fallback. A chat message is only accepted
//! when both `sender` and `text` are non-empty; those required fields act as
//! the discriminator between the two shapes.

use serde::{Deserialize, Serialize};

/// A user-authored chat line, published to the room topic.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
}

/// A system-level notification (join/leave announcements and the like).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SystemNotification {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

/// The classified, typed form of an inbound raw payload. Never stored;
/// consumed immediately by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEnvelope {
    Chat(ChatMessage),
    Notification(SystemNotification),
    /// Payload matched no known shape. Carries the originating peer id and
    /// the untouched bytes so the user still sees the content.
    Raw { source: String, data: Vec<u8> },
}

/// Classifies an inbound payload. First match wins; the trial order is part
/// of the wire protocol and must not change.
pub fn classify(data: &[u8], source: &str) -> InboundEnvelope {
    if let Ok(chat) = serde_json::from_slice::<ChatMessage>(data) {
        if !chat.sender.is_empty() && !chat.text.is_empty() {
            return InboundEnvelope::Chat(chat);
        }
    }

    if let Ok(notification) = serde_json::from_slice::<SystemNotification>(data) {
        return InboundEnvelope::Notification(notification);
    }

    InboundEnvelope::Raw {
        source: source.to_string(),
        data: data.to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_payload_classifies_as_chat() {
        let envelope = classify(br#"{"sender":"alice","text":"hi"}"#, "peer-a");
        assert_eq!(
            envelope,
            InboundEnvelope::Chat(ChatMessage {
                sender: "alice".into(),
                text: "hi".into(),
            })
        );
    }

    #[test]
    fn notification_payload_classifies_as_notification() {
        let envelope = classify(br#"{"type":"join","message":"alice joined"}"#, "peer-a");
        assert_eq!(
            envelope,
            InboundEnvelope::Notification(SystemNotification {
                kind: "join".into(),
                message: "alice joined".into(),
            })
        );
    }

    #[test]
    fn junk_bytes_fall_back_to_raw_with_origin() {
        let envelope = classify(b"\x00\x01not json", "peer-b");
        match envelope {
            InboundEnvelope::Raw { source, data } => {
                assert_eq!(source, "peer-b");
                assert_eq!(data, b"\x00\x01not json");
            }
            other => panic!("expected raw fallback, got {other:?}"),
        }
    }

    #[test]
    fn empty_sender_is_not_a_chat_message() {
        // Decodes as the chat shape but fails the non-empty requirement, and
        // lacks the notification fields, so it lands in the raw fallback.
        let envelope = classify(br#"{"sender":"","text":""}"#, "peer-c");
        assert!(matches!(envelope, InboundEnvelope::Raw { .. }));
    }

    #[test]
    fn chat_shape_wins_over_notification_shape() {
        // A payload carrying both shapes' fields must classify as chat: the
        // trial order is chat first.
        let envelope = classify(
            br#"{"sender":"bob","text":"hey","type":"join","message":"x"}"#,
            "peer-d",
        );
        assert!(matches!(envelope, InboundEnvelope::Chat(_)));
    }

    #[test]
    fn chat_round_trip() {
        let msg = ChatMessage {
            sender: "carol".into(),
            text: "hello mesh".into(),
        };
        let bytes = serde_json::to_vec(&msg).unwrap();
        assert_eq!(classify(&bytes, "ignored"), InboundEnvelope::Chat(msg));
    }

    #[test]
    fn notification_kind_uses_type_field_on_the_wire() {
        let json = serde_json::to_string(&SystemNotification {
            kind: "leave".into(),
            message: "bob left".into(),
        })
        .unwrap();
        assert!(json.contains(r#""type":"leave""#));
    }
}
