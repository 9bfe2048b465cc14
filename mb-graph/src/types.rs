use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentType {
    Audio,
    File,
    Image,
    Video,
    Location,
    Fallback,
    Template,
    /// Attachment types introduced after this client was written.
    #[serde(other)]
    Other,
}

impl AttachmentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::File => "file",
            Self::Image => "image",
            Self::Video => "video",
            Self::Location => "location",
            Self::Fallback => "fallback",
            Self::Template => "template",
            Self::Other => "other",
        }
    }

    /// Only media attachments can be sent by URL.
    pub fn is_sendable_media(self) -> bool {
        matches!(self, Self::Audio | Self::File | Self::Image | Self::Video)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderAction {
    TypingOn,
    TypingOff,
    MarkSeen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessagingType {
    Response,
    Update,
    MessageTag,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuickReplyContentType {
    Text,
    Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickReply {
    pub content_type: QuickReplyContentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl QuickReply {
    pub fn text(title: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            content_type: QuickReplyContentType::Text,
            title: Some(title.into()),
            payload: Some(payload.into()),
            image_url: None,
        }
    }

    pub fn location() -> Self {
        Self {
            content_type: QuickReplyContentType::Location,
            title: None,
            payload: None,
            image_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentPayload {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_reusable: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingAttachment {
    #[serde(rename = "type")]
    pub kind: AttachmentType,
    pub payload: AttachmentPayload,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<OutgoingAttachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub quick_replies: Vec<QuickReply>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
}

/// Request body of `POST /me/messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub recipient: Recipient,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messaging_type: Option<MessagingType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_action: Option<SenderAction>,
}

impl OutgoingMessage {
    pub fn message(recipient_id: impl Into<String>, body: MessageBody) -> Self {
        Self {
            recipient: Recipient {
                id: recipient_id.into(),
            },
            messaging_type: Some(MessagingType::Response),
            message: Some(body),
            sender_action: None,
        }
    }

    pub fn text(recipient_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::message(
            recipient_id,
            MessageBody {
                text: Some(text.into()),
                ..MessageBody::default()
            },
        )
    }

    pub fn sender_action(recipient_id: impl Into<String>, action: SenderAction) -> Self {
        Self {
            recipient: Recipient {
                id: recipient_id.into(),
            },
            messaging_type: None,
            message: None,
            sender_action: Some(action),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub recipient_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

pub const USER_PROFILE_FIELDS: &str = "first_name,last_name,profile_pic,locale,timezone,gender";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub profile_pic: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub timezone: Option<f64>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
