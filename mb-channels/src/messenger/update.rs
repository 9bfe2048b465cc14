//! Messenger webhook payloads and their normalized form.
//!
//! Facebook delivers one untagged record per event and marks its kind by
//! which field is present (`message`, `postback`, `delivery`, `read`).
//! [`MessagingEvent`] converts that record into a tagged [`UpdateKind`] and
//! back. Fields this module does not model are kept in an `extra` map at the
//! level they were found, so serializing an event reproduces the record.

use crate::types::{MessageId, PageId, ParticipantId};
use chrono::{DateTime, Utc};
use mb_graph::AttachmentType;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

type JsonMap = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub object: String,
    pub entry: Vec<WebhookEntry>,
}

/// One page's batch of events from a single callback, kept as received.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WebhookEntry {
    pub id: PageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
    #[serde(default)]
    pub messaging: Vec<serde_json::Value>,
    #[serde(flatten)]
    pub extra: JsonMap,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundAttachment {
    pub kind: AttachmentType,
    pub payload: serde_json::Value,
    pub title: Option<String>,
    pub url: Option<String>,
    pub extra: JsonMap,
}

/// Event kind. Each variant's `extra` holds the unmodelled fields of the
/// object it was read from (`message`, `postback`, `delivery` or `read`).
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    Text {
        mid: MessageId,
        text: String,
        extra: JsonMap,
    },
    Attachment {
        mid: MessageId,
        text: Option<String>,
        attachments: Vec<InboundAttachment>,
        extra: JsonMap,
    },
    QuickReply {
        mid: MessageId,
        text: String,
        payload: String,
        /// Unmodelled fields of the nested `quick_reply` object.
        reply_extra: JsonMap,
        extra: JsonMap,
    },
    /// A message sent by the page itself, reflected back to the webhook.
    Echo {
        mid: MessageId,
        app_id: Option<i64>,
        text: Option<String>,
        attachments: Vec<InboundAttachment>,
        metadata: Option<String>,
        extra: JsonMap,
    },
    Postback {
        title: Option<String>,
        payload: String,
        referral: Option<serde_json::Value>,
        extra: JsonMap,
    },
    Delivery {
        mids: Vec<MessageId>,
        watermark: i64,
        extra: JsonMap,
    },
    Read {
        watermark: i64,
        extra: JsonMap,
    },
    /// None of the known event fields is present; the record's fields are
    /// kept in [`MessagingEvent::extra`].
    Unrecognized,
}

impl UpdateKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Attachment { .. } => "attachment",
            Self::QuickReply { .. } => "quick_reply",
            Self::Echo { .. } => "echo",
            Self::Postback { .. } => "postback",
            Self::Delivery { .. } => "delivery",
            Self::Read { .. } => "read",
            Self::Unrecognized => "unrecognized",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent", into = "WireEvent")]
pub struct MessagingEvent {
    pub sender: ParticipantId,
    pub recipient: ParticipantId,
    pub timestamp: Option<i64>,
    pub kind: UpdateKind,
    pub extra: JsonMap,
}

impl MessagingEvent {
    /// The page side of the conversation: the sender of an echo, the
    /// recipient of everything else.
    pub fn page_participant(&self) -> &ParticipantId {
        match self.kind {
            UpdateKind::Echo { .. } => &self.sender,
            _ => &self.recipient,
        }
    }

    /// The user side of the conversation.
    pub fn user_participant(&self) -> &ParticipantId {
        match self.kind {
            UpdateKind::Echo { .. } => &self.recipient,
            _ => &self.sender,
        }
    }
}

/// One inbound event, ready for dispatch to the host.
///
/// `raw` is the entry the event came from. It is shared by every update of
/// that entry and is never mutated, so changing `event` leaves it intact.
#[derive(Debug, Clone)]
pub struct NormalizedUpdate {
    pub page_id: PageId,
    pub event: MessagingEvent,
    pub raw: Arc<WebhookEntry>,
    pub received_at: DateTime<Utc>,
}

impl NormalizedUpdate {
    pub fn kind_label(&self) -> &'static str {
        self.event.kind.label()
    }
}

/// Split an entry into normalized updates, preserving array order.
///
/// Records that do not parse are logged and skipped; they never affect
/// their siblings.
pub fn normalize_entry(entry: WebhookEntry, received_at: DateTime<Utc>) -> Vec<NormalizedUpdate> {
    let raw = Arc::new(entry);
    raw.messaging
        .iter()
        .enumerate()
        .filter_map(
            |(index, value)| match serde_json::from_value::<MessagingEvent>(value.clone()) {
                Ok(event) => Some(NormalizedUpdate {
                    page_id: raw.id.clone(),
                    event,
                    raw: Arc::clone(&raw),
                    received_at,
                }),
                Err(error) => {
                    tracing::warn!(
                        page_id = %raw.id,
                        index,
                        %error,
                        "skipping unparseable messenger update"
                    );
                    None
                }
            },
        )
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireParticipant {
    id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireQuickReply {
    payload: String,
    #[serde(flatten)]
    extra: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireAttachment {
    #[serde(rename = "type")]
    kind: AttachmentType,
    #[serde(default)]
    payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(flatten)]
    extra: JsonMap,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct WireMessage {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    is_echo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attachments: Vec<WireAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    quick_reply: Option<WireQuickReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    app_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    metadata: Option<String>,
    #[serde(flatten)]
    extra: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WirePostback {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default)]
    payload: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    referral: Option<serde_json::Value>,
    #[serde(flatten)]
    extra: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireDelivery {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    mids: Vec<String>,
    watermark: i64,
    #[serde(flatten)]
    extra: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireRead {
    watermark: i64,
    #[serde(flatten)]
    extra: JsonMap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireEvent {
    #[serde(default)]
    sender: Option<WireParticipant>,
    #[serde(default)]
    recipient: Option<WireParticipant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<WireMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    postback: Option<WirePostback>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delivery: Option<WireDelivery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    read: Option<WireRead>,
    #[serde(flatten)]
    extra: JsonMap,
}

impl TryFrom<WireEvent> for MessagingEvent {
    type Error = String;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let sender = wire
            .sender
            .map(|p| p.id)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| "messaging update has no sender id".to_string())?;
        let recipient = wire
            .recipient
            .map(|p| p.id)
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| "messaging update has no recipient id".to_string())?;
        let mut extra = wire.extra;

        let kind = if let Some(message) = wire.message {
            message_kind(message, &mut extra)?
        } else if let Some(postback) = wire.postback {
            UpdateKind::Postback {
                title: postback.title,
                payload: postback.payload,
                referral: postback.referral,
                extra: postback.extra,
            }
        } else if let Some(delivery) = wire.delivery {
            UpdateKind::Delivery {
                mids: delivery.mids.into_iter().map(MessageId::from).collect(),
                watermark: delivery.watermark,
                extra: delivery.extra,
            }
        } else if let Some(read) = wire.read {
            UpdateKind::Read {
                watermark: read.watermark,
                extra: read.extra,
            }
        } else {
            UpdateKind::Unrecognized
        };

        Ok(Self {
            sender: sender.into(),
            recipient: recipient.into(),
            timestamp: wire.timestamp,
            kind,
            extra,
        })
    }
}

fn message_kind(message: WireMessage, extra: &mut JsonMap) -> Result<UpdateKind, String> {
    if !message.is_echo
        && message.quick_reply.is_none()
        && message.attachments.is_empty()
        && message.text.is_none()
    {
        // Keep message shapes this adapter does not model.
        let value = serde_json::to_value(&message).map_err(|e| e.to_string())?;
        extra.insert("message".to_string(), value);
        return Ok(UpdateKind::Unrecognized);
    }

    let WireMessage {
        is_echo,
        mid,
        text,
        attachments,
        quick_reply,
        app_id,
        metadata,
        extra: message_extra,
    } = message;
    let mid: MessageId = mid.ok_or_else(|| "message has no mid".to_string())?.into();
    let attachments: Vec<InboundAttachment> =
        attachments.into_iter().map(InboundAttachment::from).collect();

    if is_echo {
        return Ok(UpdateKind::Echo {
            mid,
            app_id,
            text,
            attachments,
            metadata,
            extra: message_extra,
        });
    }
    if let Some(quick_reply) = quick_reply {
        return Ok(UpdateKind::QuickReply {
            mid,
            text: text.unwrap_or_default(),
            payload: quick_reply.payload,
            reply_extra: quick_reply.extra,
            extra: message_extra,
        });
    }
    if !attachments.is_empty() {
        return Ok(UpdateKind::Attachment {
            mid,
            text,
            attachments,
            extra: message_extra,
        });
    }
    Ok(UpdateKind::Text {
        mid,
        text: text.unwrap_or_default(),
        extra: message_extra,
    })
}

impl From<WireAttachment> for InboundAttachment {
    fn from(wire: WireAttachment) -> Self {
        Self {
            kind: wire.kind,
            payload: wire.payload,
            title: wire.title,
            url: wire.url,
            extra: wire.extra,
        }
    }
}

impl From<InboundAttachment> for WireAttachment {
    fn from(attachment: InboundAttachment) -> Self {
        Self {
            kind: attachment.kind,
            payload: attachment.payload,
            title: attachment.title,
            url: attachment.url,
            extra: attachment.extra,
        }
    }
}

impl From<MessagingEvent> for WireEvent {
    fn from(event: MessagingEvent) -> Self {
        let mut wire = WireEvent {
            sender: Some(WireParticipant {
                id: event.sender.into_inner(),
            }),
            recipient: Some(WireParticipant {
                id: event.recipient.into_inner(),
            }),
            timestamp: event.timestamp,
            message: None,
            postback: None,
            delivery: None,
            read: None,
            extra: event.extra,
        };
        let wire_attachments =
            |attachments: Vec<InboundAttachment>| attachments.into_iter().map(Into::into).collect();

        match event.kind {
            UpdateKind::Text { mid, text, extra } => {
                wire.message = Some(WireMessage {
                    mid: Some(mid.into_inner()),
                    text: Some(text),
                    extra,
                    ..WireMessage::default()
                });
            }
            UpdateKind::Attachment {
                mid,
                text,
                attachments,
                extra,
            } => {
                wire.message = Some(WireMessage {
                    mid: Some(mid.into_inner()),
                    text,
                    attachments: wire_attachments(attachments),
                    extra,
                    ..WireMessage::default()
                });
            }
            UpdateKind::QuickReply {
                mid,
                text,
                payload,
                reply_extra,
                extra,
            } => {
                wire.message = Some(WireMessage {
                    mid: Some(mid.into_inner()),
                    text: Some(text),
                    quick_reply: Some(WireQuickReply {
                        payload,
                        extra: reply_extra,
                    }),
                    extra,
                    ..WireMessage::default()
                });
            }
            UpdateKind::Echo {
                mid,
                app_id,
                text,
                attachments,
                metadata,
                extra,
            } => {
                wire.message = Some(WireMessage {
                    is_echo: true,
                    mid: Some(mid.into_inner()),
                    text,
                    attachments: wire_attachments(attachments),
                    quick_reply: None,
                    app_id,
                    metadata,
                    extra,
                });
            }
            UpdateKind::Postback {
                title,
                payload,
                referral,
                extra,
            } => {
                wire.postback = Some(WirePostback {
                    title,
                    payload,
                    referral,
                    extra,
                });
            }
            UpdateKind::Delivery {
                mids,
                watermark,
                extra,
            } => {
                wire.delivery = Some(WireDelivery {
                    mids: mids.into_iter().map(MessageId::into_inner).collect(),
                    watermark,
                    extra,
                });
            }
            UpdateKind::Read { watermark, extra } => {
                wire.read = Some(WireRead { watermark, extra });
            }
            UpdateKind::Unrecognized => {}
        }
        wire
    }
}

#[cfg(test)]
mod tests {
    use super::{MessagingEvent, UpdateKind, WebhookEntry, normalize_entry};
    use chrono::Utc;
    use mb_graph::AttachmentType;
    use serde_json::json;

    fn parse(value: serde_json::Value) -> MessagingEvent {
        serde_json::from_value(value).expect("messaging event")
    }

    #[test]
    fn text_message_parses_to_text_kind() {
        let event = parse(json!({
            "sender": { "id": "user-1" },
            "recipient": { "id": "page-1" },
            "timestamp": 1458692752478_i64,
            "message": { "mid": "mid.1457764197618:41d102a3e1ae206a38", "text": "hello, world!" },
        }));
        assert_eq!(event.sender.as_str(), "user-1");
        assert_eq!(event.recipient.as_str(), "page-1");
        assert_eq!(event.timestamp, Some(1458692752478));
        assert_eq!(
            event.kind,
            UpdateKind::Text {
                mid: "mid.1457764197618:41d102a3e1ae206a38".into(),
                text: "hello, world!".to_string(),
                extra: serde_json::Map::new(),
            }
        );
        assert_eq!(event.page_participant().as_str(), "page-1");
    }

    #[test]
    fn message_variants_are_distinguished() {
        let quick_reply = parse(json!({
            "sender": { "id": "user-1" },
            "recipient": { "id": "page-1" },
            "message": { "mid": "m1", "text": "Red", "quick_reply": { "payload": "PICK_RED" } },
        }));
        assert!(matches!(
            quick_reply.kind,
            UpdateKind::QuickReply { ref payload, .. } if payload == "PICK_RED"
        ));

        let location = parse(json!({
            "sender": { "id": "user-1" },
            "recipient": { "id": "page-1" },
            "message": {
                "mid": "m2",
                "attachments": [{
                    "type": "location",
                    "title": "Pin",
                    "payload": { "coordinates": { "lat": 1.0, "long": 2.0 } },
                }],
            },
        }));
        match location.kind {
            UpdateKind::Attachment { attachments, .. } => {
                assert_eq!(attachments.len(), 1);
                assert_eq!(attachments[0].kind, AttachmentType::Location);
                assert_eq!(attachments[0].payload["coordinates"]["lat"], 1.0);
            }
            other => panic!("unexpected kind: {other:?}"),
        }

        let echo = parse(json!({
            "sender": { "id": "page-1" },
            "recipient": { "id": "user-1" },
            "message": { "is_echo": true, "app_id": 1517776481860111_i64, "mid": "m3", "text": "hi" },
        }));
        assert_eq!(echo.kind.label(), "echo");
        assert_eq!(echo.page_participant().as_str(), "page-1");
        assert_eq!(echo.user_participant().as_str(), "user-1");
    }

    #[test]
    fn receipts_and_postbacks_parse() {
        let delivery = parse(json!({
            "sender": { "id": "user-1" },
            "recipient": { "id": "page-1" },
            "delivery": { "mids": ["m1", "m2"], "watermark": 1458668856253_i64, "seq": 37 },
        }));
        assert!(matches!(
            delivery.kind,
            UpdateKind::Delivery { ref mids, watermark: 1458668856253, ref extra }
                if mids.len() == 2 && extra["seq"] == 37
        ));

        let read = parse(json!({
            "sender": { "id": "user-1" },
            "recipient": { "id": "page-1" },
            "read": { "watermark": 1458668856253_i64 },
        }));
        assert_eq!(
            read.kind,
            UpdateKind::Read {
                watermark: 1458668856253,
                extra: serde_json::Map::new(),
            }
        );

        let postback = parse(json!({
            "sender": { "id": "user-1" },
            "recipient": { "id": "page-1" },
            "postback": { "title": "Get Started", "payload": "GET_STARTED" },
        }));
        assert_eq!(postback.kind.label(), "postback");
    }

    #[test]
    fn unknown_events_keep_their_fields() {
        let value = json!({
            "sender": { "id": "user-1" },
            "recipient": { "id": "page-1" },
            "timestamp": 1234567890_i64,
            "optin": { "ref": "PASS_THROUGH_PARAM" },
        });
        let event = parse(value.clone());
        assert_eq!(event.kind, UpdateKind::Unrecognized);
        assert_eq!(event.extra["optin"]["ref"], "PASS_THROUGH_PARAM");
        assert_eq!(serde_json::to_value(&event).expect("serialize"), value);
    }

    #[test]
    fn wire_shape_is_reproduced_on_serialize() {
        let value = json!({
            "sender": { "id": "user-1" },
            "recipient": { "id": "page-1" },
            "timestamp": 1_i64,
            "message": { "mid": "m1", "text": "Red", "quick_reply": { "payload": "PICK_RED" } },
        });
        assert_eq!(serde_json::to_value(parse(value.clone())).expect("serialize"), value);
    }

    #[test]
    fn nested_unknown_fields_survive_serialization() {
        let records = [
            json!({
                "sender": { "id": "user-1" },
                "recipient": { "id": "page-1" },
                "message": {
                    "mid": "m1",
                    "text": "hi",
                    "seq": 7,
                    "nlp": { "entities": { "greetings": [{ "confidence": 0.99 }] } },
                    "reply_to": { "mid": "m0" },
                },
            }),
            json!({
                "sender": { "id": "user-1" },
                "recipient": { "id": "page-1" },
                "message": {
                    "mid": "m2",
                    "sticker_id": 369239263222822_i64,
                    "attachments": [{
                        "type": "image",
                        "payload": { "url": "https://example.com/like.png", "sticker_id": 369239263222822_i64 },
                        "extra_hint": true,
                    }],
                },
            }),
            json!({
                "sender": { "id": "user-1" },
                "recipient": { "id": "page-1" },
                "message": {
                    "mid": "m3",
                    "text": "Red",
                    "quick_reply": { "payload": "PICK_RED", "source": "menu" },
                    "seq": 9,
                },
            }),
            json!({
                "sender": { "id": "user-1" },
                "recipient": { "id": "page-1" },
                "postback": { "payload": "GET_STARTED", "mid": "m4" },
            }),
            json!({
                "sender": { "id": "user-1" },
                "recipient": { "id": "page-1" },
                "delivery": { "mids": ["m1"], "watermark": 5, "seq": 37 },
            }),
            json!({
                "sender": { "id": "user-1" },
                "recipient": { "id": "page-1" },
                "read": { "watermark": 5, "seq": 38 },
            }),
        ];
        for value in records {
            let event = parse(value.clone());
            assert_eq!(serde_json::to_value(&event).expect("serialize"), value);
        }

        let text = parse(json!({
            "sender": { "id": "user-1" },
            "recipient": { "id": "page-1" },
            "message": { "mid": "m1", "text": "hi", "seq": 7 },
        }));
        match text.kind {
            UpdateKind::Text { extra, .. } => assert_eq!(extra["seq"], 7),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn missing_sender_is_rejected() {
        let result = serde_json::from_value::<MessagingEvent>(json!({
            "recipient": { "id": "page-1" },
            "message": { "mid": "m1", "text": "hi" },
        }));
        assert!(result.is_err());
    }

    #[test]
    fn normalize_entry_preserves_order_and_skips_bad_records() {
        let entry: WebhookEntry = serde_json::from_value(json!({
            "id": "page-1",
            "time": 1458692752478_i64,
            "messaging": [
                { "sender": { "id": "u1" }, "recipient": { "id": "page-1" }, "message": { "mid": "m1", "text": "one" } },
                { "recipient": { "id": "page-1" }, "message": { "mid": "m2", "text": "no sender" } },
                { "sender": { "id": "u3" }, "recipient": { "id": "page-1" }, "read": { "watermark": 3 } },
            ],
        }))
        .expect("entry");

        let updates = normalize_entry(entry.clone(), Utc::now());
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0].event.sender.as_str(), "u1");
        assert_eq!(updates[1].kind_label(), "read");
        for update in &updates {
            assert_eq!(update.page_id.as_str(), "page-1");
            assert_eq!(*update.raw, entry);
        }
    }
}
