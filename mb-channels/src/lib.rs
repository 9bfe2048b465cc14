//! Messenger channel adapter.
//!
//! The adapter is pure I/O: it verifies and normalizes inbound webhook
//! callbacks into [`NormalizedUpdate`]s for the host, and turns host
//! [`OutboundMessage`]s into Graph API Send calls.

mod error;
pub mod messenger;
mod traits;
mod types;

pub use error::WebhookError;
pub use messenger::{
    DEFAULT_WEBHOOK_PATH, MESSENGER_CHANNEL_ID, MessengerAdapter, NormalizedUpdate,
    REQUIRED_CREDENTIALS, UpdateKind,
};
pub use traits::{ChannelAdapter, UpdateSink};
pub use types::{
    Attachment, ChannelCapabilities, MessageId, OutboundMessage, PageId, ParticipantId,
};
