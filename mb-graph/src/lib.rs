//! Facebook Graph API client for the Messenger bridge.
//!
//! Pure HTTP client: builds Send API, messenger profile, and user profile
//! requests and surfaces provider errors. No webhook handling here.

mod client;
mod error;
mod profile;
mod tokens;
mod types;

pub use client::{DEFAULT_GRAPH_API_BASE_URL, DEFAULT_GRAPH_API_VERSION, GraphClient};
pub use error::{GraphError, Result};
pub use profile::{GreetingText, ProfileField, ProfileSetting};
pub use tokens::PageTokens;
pub use types::{
    AttachmentPayload, AttachmentType, MessageBody, MessagingType, OutgoingAttachment,
    OutgoingMessage, QuickReply, QuickReplyContentType, Recipient, SendResponse, SenderAction,
    UserProfile,
};
