//! Host side of the bridge: drains the inbound update queue fed by the
//! webhook and logs each update.

use anyhow::Result;
use mb_channels::messenger::UpdateKind;
use mb_channels::NormalizedUpdate;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct Gateway {
    inbound_rx: tokio::sync::Mutex<mpsc::Receiver<NormalizedUpdate>>,
    dispatched: AtomicU64,
    shutdown: CancellationToken,
}

impl Gateway {
    pub fn new(inbound_rx: mpsc::Receiver<NormalizedUpdate>, shutdown: CancellationToken) -> Self {
        Self {
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
            dispatched: AtomicU64::new(0),
            shutdown,
        }
    }

    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(e) = self.run_loop().await {
                tracing::error!(%e, "gateway loop exited");
            }
        })
    }

    /// Updates handled since start.
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    #[tracing::instrument(level = "info", skip_all)]
    async fn run_loop(&self) -> Result<()> {
        let mut rx = self.inbound_rx.lock().await;
        loop {
            let update = tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!(dispatched = self.dispatched(), "gateway stopping");
                    return Ok(());
                }
                update = rx.recv() => update,
            };
            let Some(update) = update else {
                tracing::info!("inbound update queue closed");
                return Ok(());
            };
            self.handle_update(&update);
        }
    }

    fn handle_update(&self, update: &NormalizedUpdate) {
        let total = self.dispatched.fetch_add(1, Ordering::Relaxed) + 1;
        let event = &update.event;
        match &event.kind {
            UpdateKind::Text { mid, text, .. } => tracing::info!(
                page_id = %update.page_id,
                sender = %event.sender,
                %mid,
                text_len = text.len(),
                total,
                "messenger text received"
            ),
            UpdateKind::QuickReply { mid, payload, .. } => tracing::info!(
                page_id = %update.page_id,
                sender = %event.sender,
                %mid,
                %payload,
                total,
                "messenger quick reply received"
            ),
            UpdateKind::Postback { payload, .. } => tracing::info!(
                page_id = %update.page_id,
                sender = %event.sender,
                %payload,
                total,
                "messenger postback received"
            ),
            other => tracing::debug!(
                page_id = %update.page_id,
                sender = %event.sender,
                kind = other.label(),
                total,
                "messenger update received"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Gateway;
    use chrono::Utc;
    use mb_channels::messenger::{WebhookEntry, normalize_entry};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn gateway_counts_updates_until_queue_closes() {
        let entry: WebhookEntry = serde_json::from_value(json!({
            "id": "page-1",
            "messaging": [
                { "sender": { "id": "u1" }, "recipient": { "id": "page-1" }, "message": { "mid": "m1", "text": "hi" } },
                { "sender": { "id": "u1" }, "recipient": { "id": "page-1" }, "read": { "watermark": 1 } },
                { "sender": { "id": "u1" }, "recipient": { "id": "page-1" }, "postback": { "payload": "GET_STARTED" } },
            ],
        }))
        .expect("entry");

        let (tx, rx) = mpsc::channel(8);
        let gateway = Arc::new(Gateway::new(rx, CancellationToken::new()));
        let handle = Arc::clone(&gateway).start();
        for update in normalize_entry(entry, Utc::now()) {
            tx.send(update).await.expect("queue open");
        }
        drop(tx);

        handle.await.expect("gateway task");
        assert_eq!(gateway.dispatched(), 3);
    }

    #[tokio::test]
    async fn gateway_stops_on_shutdown() {
        let (_tx, rx) = mpsc::channel(8);
        let shutdown = CancellationToken::new();
        let gateway = Arc::new(Gateway::new(rx, shutdown.clone()));
        let handle = Arc::clone(&gateway).start();

        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("gateway stopped in time")
            .expect("gateway task");
        assert_eq!(gateway.dispatched(), 0);
    }
}
