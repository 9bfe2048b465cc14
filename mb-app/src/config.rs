use mb_channels::{DEFAULT_WEBHOOK_PATH, MessengerAdapter};
use mb_graph::{DEFAULT_GRAPH_API_BASE_URL, DEFAULT_GRAPH_API_VERSION, PageTokens};
use serde::Deserialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Clone, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub messenger: MessengerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    256
}

/// `[messenger]` section. Holds secrets, so it has no `Debug` impl.
#[derive(Clone, Deserialize)]
pub struct MessengerConfig {
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    #[serde(default)]
    pub verify_token: String,
    #[serde(default)]
    pub app_secret: String,
    #[serde(default)]
    pub page_token: Option<String>,
    #[serde(default)]
    pub pages: Option<HashMap<String, String>>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default = "default_graph_api_base_url")]
    pub graph_api_base_url: String,
    #[serde(default = "default_graph_api_version")]
    pub graph_api_version: String,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_webhook_path() -> String {
    DEFAULT_WEBHOOK_PATH.to_string()
}

fn default_graph_api_base_url() -> String {
    DEFAULT_GRAPH_API_BASE_URL.to_string()
}

fn default_graph_api_version() -> String {
    DEFAULT_GRAPH_API_VERSION.to_string()
}

fn default_request_timeout_seconds() -> u64 {
    30
}

impl BridgeConfig {
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        Ok(Self::load_with_path(path).await?.0)
    }

    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let path = path.unwrap_or_else(default_config_path);
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let mut cfg = Self::parse(&contents, &path)?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok((cfg, path))
    }

    fn parse(contents: &str, path: &Path) -> anyhow::Result<Self> {
        toml::from_str(contents).map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = var("MESSENGER_VERIFY_TOKEN") {
            self.messenger.verify_token = v;
        }
        if let Some(v) = var("MESSENGER_APP_SECRET") {
            self.messenger.app_secret = v;
        }
        if let Some(v) = var("MESSENGER_PAGE_TOKEN") {
            self.messenger.page_token = Some(v);
        }
        if let Some(v) = var("MESSENGER_BOT_ID") {
            self.messenger.bot_id = Some(v);
        }
        if let Some(v) = var("MESSENGER_BIND_ADDR") {
            self.server.bind_addr = v;
        }
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.bind_addr()?;
        if self.server.http_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("server.http_timeout_seconds must be > 0"));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        if self.messenger.verify_token.trim().is_empty() {
            return Err(anyhow::anyhow!("messenger.verify_token is required"));
        }
        if self.messenger.app_secret.trim().is_empty() {
            return Err(anyhow::anyhow!("messenger.app_secret is required"));
        }
        if !self.messenger.webhook_path.starts_with('/') {
            return Err(anyhow::anyhow!(
                "messenger.webhook_path must start with '/', got {:?}",
                self.messenger.webhook_path
            ));
        }
        if self.messenger.request_timeout_seconds == 0 {
            return Err(anyhow::anyhow!(
                "messenger.request_timeout_seconds must be > 0"
            ));
        }
        self.page_tokens()?;
        Ok(())
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server
            .bind_addr
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("server.bind_addr {:?}: {e}", self.server.bind_addr))
    }

    pub fn page_tokens(&self) -> anyhow::Result<PageTokens> {
        Ok(PageTokens::from_parts(
            self.messenger.page_token.clone(),
            self.messenger.pages.clone(),
        )?)
    }

    pub fn build_adapter(&self) -> anyhow::Result<MessengerAdapter> {
        let messenger = &self.messenger;
        let adapter = MessengerAdapter::new(
            &messenger.verify_token,
            &messenger.app_secret,
            self.page_tokens()?,
        )?
        .with_bot_id(messenger.bot_id.clone())
        .with_webhook_path(&messenger.webhook_path)?
        .with_graph_api(
            &messenger.graph_api_base_url,
            &messenger.graph_api_version,
            Duration::from_secs(messenger.request_timeout_seconds),
        )?;
        Ok(adapter)
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".messenger-bridge").join("config.toml")
}
