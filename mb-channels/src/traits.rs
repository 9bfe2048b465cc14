use crate::messenger::NormalizedUpdate;
use crate::types::{ChannelCapabilities, OutboundMessage, PageId};
use anyhow::Result;
use async_trait::async_trait;
use mb_graph::{SendResponse, UserProfile};
use tokio::sync::mpsc;

#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    /// Unique channel identifier, e.g. "messenger".
    fn channel_id(&self) -> &str;

    fn capabilities(&self) -> ChannelCapabilities;

    /// Send a message to a user on this platform.
    async fn send(&self, recipient_id: &str, message: OutboundMessage) -> Result<SendResponse>;

    /// Send typing state updates where supported.
    async fn send_typing(
        &self,
        _page_id: Option<&PageId>,
        _recipient_id: &str,
        _active: bool,
    ) -> Result<()> {
        Err(anyhow::anyhow!(
            "send_typing is not supported by this channel"
        ))
    }

    /// Look up the public profile of a user.
    async fn user_info(&self, _page_id: Option<&PageId>, _user_id: &str) -> Result<UserProfile> {
        Err(anyhow::anyhow!("user_info is not supported by this channel"))
    }
}

/// Host-side consumer of normalized inbound updates.
///
/// Each update is dispatched on its own task; an error is logged and never
/// affects sibling updates or the webhook response.
#[async_trait]
pub trait UpdateSink: Send + Sync + 'static {
    async fn dispatch(&self, update: NormalizedUpdate) -> Result<()>;
}

#[async_trait]
impl UpdateSink for mpsc::Sender<NormalizedUpdate> {
    async fn dispatch(&self, update: NormalizedUpdate) -> Result<()> {
        self.send(update)
            .await
            .map_err(|e| anyhow::anyhow!("inbound update queue closed: {e}"))
    }
}
