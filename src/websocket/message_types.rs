use crate::fanout::{ReadReceiptEvent, TypingEvent};
use crate::models::MessageView;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Frames a client may send over its connection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsInboundEvent {
    Send {
        #[serde(alias = "receiverId")]
        receiver_id: Uuid,
        #[serde(alias = "content")]
        body: String,
    },
    Subscribe {
        topic: String,
    },
    Read {
        #[serde(alias = "messageId")]
        message_id: i64,
    },
    Typing {
        #[serde(alias = "receiverId")]
        receiver_id: Uuid,
    },
}

impl WsInboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            WsInboundEvent::Send { .. } => "send",
            WsInboundEvent::Subscribe { .. } => "subscribe",
            WsInboundEvent::Read { .. } => "read",
            WsInboundEvent::Typing { .. } => "typing",
        }
    }
}

/// Frames pushed to the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WsOutboundEvent {
    /// A chat message addressed to, or sent by, this identity
    Message(MessageView),
    ReadReceipt(ReadReceiptEvent),
    Typing(TypingEvent),
    Ack {
        op: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<MessageView>,
    },
    Error {
        code: String,
        message: String,
    },
}

impl WsOutboundEvent {
    pub fn ack(op: &'static str) -> Self {
        WsOutboundEvent::Ack { op, message: None }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        WsOutboundEvent::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_in_both_casings() {
        let receiver = Uuid::new_v4();
        let snake = format!(r#"{{"type":"send","receiver_id":"{receiver}","body":"hi"}}"#);
        let camel = format!(r#"{{"type":"send","receiverId":"{receiver}","content":"hi"}}"#);

        let expected = WsInboundEvent::Send {
            receiver_id: receiver,
            body: "hi".into(),
        };
        assert_eq!(serde_json::from_str::<WsInboundEvent>(&snake).unwrap(), expected);
        assert_eq!(serde_json::from_str::<WsInboundEvent>(&camel).unwrap(), expected);
    }

    #[test]
    fn unknown_frame_type_is_rejected() {
        assert!(serde_json::from_str::<WsInboundEvent>(r#"{"type":"join","room":"x"}"#).is_err());
    }

    #[test]
    fn outbound_frames_are_tagged() {
        let json = serde_json::to_value(WsOutboundEvent::ack("subscribe")).unwrap();
        assert_eq!(json["type"], "ack");
        assert_eq!(json["op"], "subscribe");
        assert!(json.get("message").is_none());

        let json = serde_json::to_value(WsOutboundEvent::error("FORBIDDEN_TOPIC", "nope")).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "FORBIDDEN_TOPIC");
    }

    #[test]
    fn receipt_frame_keeps_event_fields() {
        let event = ReadReceiptEvent {
            notify_id: Uuid::new_v4(),
            reader_id: Uuid::new_v4(),
            message_ids: vec![4, 5],
        };
        let json = serde_json::to_value(WsOutboundEvent::ReadReceipt(event.clone())).unwrap();
        assert_eq!(json["type"], "read_receipt");
        assert_eq!(json["message_ids"], serde_json::json!([4, 5]));
        assert_eq!(json["notify_id"], event.notify_id.to_string());
    }
}
