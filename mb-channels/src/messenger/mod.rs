//! Facebook Messenger channel: webhook receiver plus Graph API sender.

mod identity;
mod signature;
mod update;
mod webhook;

pub use identity::{BotIdentity, IdentityObservation};
pub use signature::{SIGNATURE_HEADER, sign, verify_signature};
pub use update::{
    InboundAttachment, MessagingEvent, NormalizedUpdate, UpdateKind, WebhookEntry,
    WebhookPayload, normalize_entry,
};
pub use webhook::webhook_router;

use crate::traits::ChannelAdapter;
use crate::types::{ChannelCapabilities, OutboundMessage, PageId};
use anyhow::{Result, anyhow};
use mb_graph::{GraphClient, GraphError, PageTokens, SendResponse, SenderAction, UserProfile};
use std::time::Duration;

pub const MESSENGER_CHANNEL_ID: &str = "messenger";
pub const DEFAULT_WEBHOOK_PATH: &str = "/api/v1/messenger/webhook";
pub const REQUIRED_CREDENTIALS: [&str; 3] = ["verify_token", "app_secret", "page_token | pages"];

pub struct MessengerAdapter {
    verify_token: String,
    app_secret: String,
    webhook_path: String,
    graph: GraphClient,
    identity: BotIdentity,
}

impl MessengerAdapter {
    pub fn new(verify_token: &str, app_secret: &str, tokens: PageTokens) -> mb_graph::Result<Self> {
        let verify_token = verify_token.trim();
        if verify_token.is_empty() {
            return Err(GraphError::Configuration(
                "messenger verify token is required".to_string(),
            ));
        }
        let app_secret = app_secret.trim();
        if app_secret.is_empty() {
            return Err(GraphError::Configuration(
                "messenger app secret is required".to_string(),
            ));
        }
        Ok(Self {
            verify_token: verify_token.to_string(),
            app_secret: app_secret.to_string(),
            webhook_path: DEFAULT_WEBHOOK_PATH.to_string(),
            graph: GraphClient::new(tokens)?,
            identity: BotIdentity::default(),
        })
    }

    pub fn with_bot_id(mut self, bot_id: Option<String>) -> Self {
        self.identity = BotIdentity::preset(bot_id.map(PageId::from));
        self
    }

    pub fn with_webhook_path(mut self, path: &str) -> mb_graph::Result<Self> {
        let path = path.trim();
        if !path.starts_with('/') || path.len() < 2 {
            return Err(GraphError::Configuration(format!(
                "webhook path must start with '/' and name a route, got {path:?}"
            )));
        }
        self.webhook_path = path.to_string();
        Ok(self)
    }

    pub fn with_graph_api(
        mut self,
        base_url: &str,
        api_version: &str,
        timeout: Duration,
    ) -> mb_graph::Result<Self> {
        self.graph = self
            .graph
            .with_api_base(base_url, api_version)?
            .with_timeout(timeout)?;
        Ok(self)
    }

    pub fn bot_id(&self) -> Option<&PageId> {
        self.identity.get()
    }

    pub fn is_multi_page(&self) -> bool {
        self.graph.is_multi_page()
    }

    pub fn graph(&self) -> &GraphClient {
        &self.graph
    }

    pub fn webhook_path(&self) -> &str {
        &self.webhook_path
    }

    pub(crate) fn verify_token_matches(&self, token: &str) -> bool {
        signature::constant_time_eq(token.as_bytes(), self.verify_token.as_bytes())
    }

    pub(crate) fn app_secret(&self) -> &str {
        &self.app_secret
    }

    /// Learn the bot id from an inbound update. Single-page mode only.
    pub(crate) fn observe_identity(&self, update: &NormalizedUpdate) {
        if self.is_multi_page() {
            return;
        }
        let observed = update.event.page_participant();
        match self.identity.observe(observed) {
            IdentityObservation::Learned => {
                tracing::info!(bot_id = %observed, "messenger bot id learned from inbound update");
            }
            IdentityObservation::Unchanged => {}
            IdentityObservation::Conflict { known } => {
                tracing::warn!(
                    bot_id = %known,
                    observed_page_id = %observed,
                    entry_page_id = %update.page_id,
                    "inbound update addressed to a different page than the bot id; \
                     single page token may be serving several pages"
                );
            }
        }
    }

    /// Reply to the user of `update` from the page that received it.
    pub async fn reply(
        &self,
        update: &NormalizedUpdate,
        mut message: OutboundMessage,
    ) -> Result<SendResponse> {
        if message.page_id.is_none() {
            message.page_id = Some(PageId::new(update.event.page_participant().as_str()));
        }
        self.send(update.event.user_participant(), message).await
    }

    pub async fn mark_seen(&self, page_id: Option<&PageId>, recipient_id: &str) -> Result<()> {
        self.graph
            .send_sender_action(
                page_id.map(PageId::as_str),
                recipient_id,
                SenderAction::MarkSeen,
            )
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChannelAdapter for MessengerAdapter {
    fn channel_id(&self) -> &str {
        MESSENGER_CHANNEL_ID
    }

    fn capabilities(&self) -> ChannelCapabilities {
        ChannelCapabilities {
            receives_text: true,
            receives_attachments: true,
            receives_echo: true,
            receives_read: true,
            receives_delivery: true,
            receives_postback: true,
            receives_quick_reply: true,
            sends_text: true,
            sends_quick_reply: true,
            sends_location_quick_reply: true,
            sends_sender_actions: true,
            sends_attachments: true,
            retrieves_user_info: true,
        }
    }

    async fn send(&self, recipient_id: &str, message: OutboundMessage) -> Result<SendResponse> {
        let recipient = recipient_id.trim();
        if recipient.is_empty() {
            return Err(anyhow!("recipient_id (page-scoped user id) is required"));
        }
        let text = message.content.trim();
        if text.is_empty() && message.attachments.is_empty() {
            return Err(anyhow!("message content is empty"));
        }
        if text.is_empty() && !message.quick_replies.is_empty() {
            return Err(anyhow!("quick replies require message text"));
        }
        let page_id = message.page_id.as_deref();

        let mut last = None;
        if !text.is_empty() {
            let response = if message.quick_replies.is_empty() {
                self.graph.send_text(page_id, recipient, text).await?
            } else {
                self.graph
                    .send_quick_replies(page_id, recipient, text, message.quick_replies.clone())
                    .await?
            };
            last = Some(response);
        }
        // The Send API carries one attachment per message.
        for attachment in &message.attachments {
            let response = self
                .graph
                .send_attachment(page_id, recipient, attachment.kind, &attachment.url)
                .await?;
            last = Some(response);
        }
        last.ok_or_else(|| anyhow!("nothing was sent"))
    }

    async fn send_typing(
        &self,
        page_id: Option<&PageId>,
        recipient_id: &str,
        active: bool,
    ) -> Result<()> {
        let action = if active {
            SenderAction::TypingOn
        } else {
            SenderAction::TypingOff
        };
        self.graph
            .send_sender_action(page_id.map(PageId::as_str), recipient_id, action)
            .await?;
        Ok(())
    }

    async fn user_info(&self, page_id: Option<&PageId>, user_id: &str) -> Result<UserProfile> {
        Ok(self
            .graph
            .user_profile(page_id.map(PageId::as_str), user_id)
            .await?)
    }
}
