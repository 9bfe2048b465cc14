//! Messenger bridge server and one-shot Graph API commands.

use crate::config::BridgeConfig;
use crate::gateway::Gateway;
use crate::routes;
use anyhow::Result;
use axum::Extension;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::Response;
use mb_channels::{
    ChannelAdapter, MessengerAdapter, NormalizedUpdate, OutboundMessage, PageId,
    REQUIRED_CREDENTIALS, UpdateSink,
};
use mb_graph::{ProfileField, ProfileSetting};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::classify::ServerErrorsFailureClass;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

const INBOUND_QUEUE_CAPACITY: usize = 1024;

pub struct BridgeState {
    pub adapter: Arc<MessengerAdapter>,
    pub gateway: Arc<Gateway>,
}

pub enum ProfileAction {
    Get,
    Set(serde_json::Value),
    Remove,
}

pub async fn doctor(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, path) = BridgeConfig::load_with_path(config_path).await?;
    let adapter = cfg.build_adapter()?;
    let tokens = adapter.graph().tokens();
    tracing::info!(
        config_path = %path.display(),
        required_credentials = ?REQUIRED_CREDENTIALS,
        page_mode = if tokens.is_multi_page() { "multi" } else { "single" },
        pages = ?tokens.page_ids(),
        bot_id = ?adapter.bot_id(),
        webhook_path = %adapter.webhook_path(),
        graph_api_base_url = %cfg.messenger.graph_api_base_url,
        graph_api_version = %cfg.messenger.graph_api_version,
        capabilities = ?adapter.capabilities(),
        "config ok"
    );
    Ok(())
}

pub async fn send_one_shot(
    config_path: Option<PathBuf>,
    page_id: Option<String>,
    recipient: &str,
    message: &str,
) -> Result<()> {
    let cfg = BridgeConfig::load(config_path).await?;
    let adapter = cfg.build_adapter()?;
    let mut outbound = OutboundMessage::text(message);
    outbound.page_id = page_id.map(PageId::from);
    let response = adapter.send(recipient, outbound).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

pub async fn profile(
    config_path: Option<PathBuf>,
    page_id: Option<String>,
    field: &str,
    action: ProfileAction,
) -> Result<()> {
    let cfg = BridgeConfig::load(config_path).await?;
    let adapter = cfg.build_adapter()?;
    let field: ProfileField = field.parse()?;
    let page_id = page_id.as_deref();
    let result = match action {
        ProfileAction::Get => adapter.graph().get_profile_setting(page_id, field).await?,
        ProfileAction::Set(value) => {
            let setting = ProfileSetting::from_json(field, value)?;
            adapter.graph().set_profile_setting(page_id, &setting).await?
        }
        ProfileAction::Remove => {
            adapter
                .graph()
                .remove_profile_setting(page_id, field)
                .await?
        }
    };
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

pub async fn user_info(
    config_path: Option<PathBuf>,
    page_id: Option<String>,
    user_id: &str,
) -> Result<()> {
    let cfg = BridgeConfig::load(config_path).await?;
    let adapter = cfg.build_adapter()?;
    let page_id = page_id.map(PageId::from);
    let profile = adapter.user_info(page_id.as_ref(), user_id).await?;
    println!("{}", serde_json::to_string_pretty(&profile)?);
    Ok(())
}

pub async fn serve(config_path: Option<PathBuf>) -> Result<()> {
    let (cfg, cfg_path) = BridgeConfig::load_with_path(config_path).await?;
    let addr = cfg.bind_addr()?;
    let adapter = Arc::new(cfg.build_adapter()?);
    tracing::info!(
        config_path = %cfg_path.display(),
        bind_addr = %addr,
        http_timeout_seconds = cfg.server.http_timeout_seconds,
        http_max_in_flight = cfg.server.http_max_in_flight,
        webhook_path = %adapter.webhook_path(),
        multi_page = adapter.is_multi_page(),
        bot_id = ?adapter.bot_id(),
        graph_api_version = %cfg.messenger.graph_api_version,
        "server configuration loaded"
    );
    let listener = preflight_bind_listener(addr).await?;

    let shutdown = CancellationToken::new();
    let (inbound_tx, inbound_rx) = mpsc::channel::<NormalizedUpdate>(INBOUND_QUEUE_CAPACITY);
    let gateway = Arc::new(Gateway::new(inbound_rx, shutdown.clone()));
    let gateway_handle = Arc::clone(&gateway).start();
    tracing::info!(queue_capacity = INBOUND_QUEUE_CAPACITY, "gateway started");

    let state = Arc::new(BridgeState {
        adapter: Arc::clone(&adapter),
        gateway,
    });
    let sink: Arc<dyn UpdateSink> = Arc::new(inbound_tx);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                path = %request.uri().path(),
                version = ?request.version(),
                request_id = %request_id_from_headers(request.headers())
            )
        })
        .on_request(|request: &Request<_>, _span: &tracing::Span| {
            tracing::info!(
                method = %request.method(),
                path = %request.uri().path(),
                request_id = %request_id_from_headers(request.headers()),
                "http request started"
            );
        })
        .on_response(
            |response: &Response, latency: Duration, _span: &tracing::Span| {
                tracing::info!(
                    status = response.status().as_u16(),
                    latency_ms = latency.as_millis() as u64,
                    "http request completed"
                );
            },
        )
        .on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &tracing::Span| {
                tracing::error!(
                    error_class = %error,
                    latency_ms = latency.as_millis() as u64,
                    "http request failed"
                );
            },
        );

    let app = routes::router()
        .layer(Extension(state))
        .merge(adapter.router(sink))
        .layer(GlobalConcurrencyLimitLayer::new(
            cfg.server.http_max_in_flight,
        ))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(cfg.server.http_timeout_seconds),
        ))
        .layer(trace_layer)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid));

    tracing::info!(%addr, "messenger bridge serving");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;
    tracing::info!("http server shutdown completed");

    shutdown.cancel();
    match gateway_handle.await {
        Ok(()) => tracing::info!("gateway shutdown completed"),
        Err(e) => tracing::error!(error = %e, "gateway task join failed during shutdown"),
    }

    Ok(())
}

async fn preflight_bind_listener(addr: SocketAddr) -> Result<tokio::net::TcpListener> {
    tracing::info!(%addr, "preflight bind check starting");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| anyhow::anyhow!("preflight bind failed for {addr}: {e}"))?;
    tracing::info!(%addr, "preflight bind check passed");
    Ok(listener)
}

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
        .unwrap_or_else(|| "missing".to_string())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler; falling back to ctrl_c only");
                if let Err(ctrlc_err) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %ctrlc_err, "failed to await ctrl-c signal");
                }
                shutdown.cancel();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("received ctrl-c; beginning graceful shutdown");
            }
            _ = terminate.recv() => {
                tracing::warn!("received SIGTERM; beginning graceful shutdown");
            }
            _ = shutdown.cancelled() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => tracing::warn!("received ctrl-c; beginning graceful shutdown"),
                Err(e) => tracing::error!(error = %e, "failed to await ctrl-c signal"),
            },
            _ = shutdown.cancelled() => {}
        }
    }
    shutdown.cancel();
}
