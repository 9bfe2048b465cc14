use mb_graph::{AttachmentType, QuickReply};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::new(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for String {
            fn from(value: $name) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;

            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

id_newtype!(PageId);
id_newtype!(ParticipantId);
id_newtype!(MessageId);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub kind: AttachmentType,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Page that sends the message. Required when the adapter serves
    /// several pages.
    #[serde(default)]
    pub page_id: Option<PageId>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub quick_replies: Vec<QuickReply>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn from_page(mut self, page_id: impl Into<PageId>) -> Self {
        self.page_id = Some(page_id.into());
        self
    }
}

/// What a channel can receive from and send to its platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelCapabilities {
    pub receives_text: bool,
    pub receives_attachments: bool,
    pub receives_echo: bool,
    pub receives_read: bool,
    pub receives_delivery: bool,
    pub receives_postback: bool,
    pub receives_quick_reply: bool,
    pub sends_text: bool,
    pub sends_quick_reply: bool,
    pub sends_location_quick_reply: bool,
    pub sends_sender_actions: bool,
    pub sends_attachments: bool,
    pub retrieves_user_info: bool,
}
