//! Gateway HTTP server and inbound message pipeline.

use crate::channels::{
    ChannelRegistry, InboundMessage, OutboundReply, TelegramChannel, TelegramUpdate,
};
use crate::channels::ChannelHandle;
use crate::config::{self, Config};
use crate::dispatch::{Answer, Dispatcher, EMPTY_ANSWER_NOTICE};
use crate::flow::{FlowClient, SenderIdentity};
use crate::trigger::{classify, Classification};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Fixed reply when a trigger-matching message comes from outside the allow-lists.
const DENIED_NOTICE: &str = "sorry, this bot is not available in this chat.";

/// Shared state for the gateway (config, dispatcher, channels).
#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    /// Sender for inbound channel messages (webhook POSTs or long-poll updates).
    pub inbound_tx: mpsc::Sender<InboundMessage>,
    pub channel_registry: Arc<ChannelRegistry>,
    pub dispatcher: Arc<Dispatcher>,
    /// In-process channel connector tasks; awaited during graceful shutdown.
    pub channel_tasks: Arc<tokio::sync::RwLock<Vec<JoinHandle<()>>>>,
}

/// Handle one inbound message end to end: classify, dispatch, reply.
/// Every path ends in either silence (Ignore) or exactly one delivered reply.
async fn process_inbound_message(state: GatewayState, msg: InboundMessage) {
    let classification = classify(&msg, &state.config.triggers.words, &state.config.access);
    let reply = match classification {
        Classification::Ignore => return,
        Classification::Identify => OutboundReply::plain(
            format!("chat id: {}\nuser id: {}", msg.conversation_id, msg.sender_id),
            Some(msg.message_id),
        ),
        Classification::Denied => {
            log::info!(
                "denied trigger message from conversation {} (sender {})",
                msg.conversation_id,
                msg.sender_id
            );
            OutboundReply::plain(DENIED_NOTICE, Some(msg.message_id))
        }
        Classification::Forward { query } => {
            log::info!("dispatching query for conversation {}", msg.conversation_id);
            let sender = state.config.flow.send_sender_info.then(|| SenderIdentity {
                name: msg.sender_name.clone(),
                handle: msg.sender_username.clone(),
            });
            match state
                .dispatcher
                .submit(&msg.conversation_id, &query, sender.as_ref())
                .await
            {
                Ok(Answer::Text(text)) => OutboundReply::answer(
                    text,
                    Some(msg.message_id),
                    state.config.channels.telegram.markdown,
                ),
                Ok(Answer::Empty) => {
                    OutboundReply::plain(EMPTY_ANSWER_NOTICE, Some(msg.message_id))
                }
                Err(e) => OutboundReply::plain(e.user_message(), Some(msg.message_id)),
            }
        }
    };

    let Some(handle) = state.channel_registry.get(&msg.channel_id).await else {
        log::debug!("inbound: no channel registered for {}", msg.channel_id);
        return;
    };
    if handle.send_reply(&msg.conversation_id, &reply).await.is_err() {
        log::warn!(
            "inbound: send_reply failed for conversation {}",
            msg.conversation_id
        );
    }
}

/// Run the gateway server; binds to config.gateway.bind:config.gateway.port.
/// Blocks until shutdown (Ctrl+C or SIGTERM).
pub async fn run_gateway(config: Config) -> Result<()> {
    let flow_id = config
        .flow
        .flow_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .context("flow.flowId is not configured")?
        .to_string();

    let flow_client = FlowClient::new(
        &config.flow.base_url,
        &flow_id,
        config::resolve_flow_api_key(&config),
        config.flow.output_component.clone(),
        config.flow.timeout_secs,
    );
    let dispatcher = Arc::new(Dispatcher::new(
        flow_client,
        std::time::Duration::from_secs(config.dispatch.busy_lease_secs),
    ));

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<InboundMessage>(64);
    let channel_tasks = Arc::new(tokio::sync::RwLock::new(Vec::new()));

    let state = GatewayState {
        config: Arc::new(config.clone()),
        inbound_tx: inbound_tx.clone(),
        channel_registry: Arc::new(ChannelRegistry::new()),
        dispatcher,
        channel_tasks: channel_tasks.clone(),
    };

    // One task per message so a slow flow call for one conversation never
    // blocks another conversation's messages.
    {
        let state_inbound = state.clone();
        tokio::spawn(async move {
            while let Some(msg) = inbound_rx.recv().await {
                tokio::spawn(process_inbound_message(state_inbound.clone(), msg));
            }
        });
    }

    let telegram_token = config::resolve_telegram_token(&config);
    let webhook_url = config.channels.telegram.webhook_url.clone();
    let telegram_webhook_for_shutdown: Option<Arc<TelegramChannel>> =
        if let Some(token) = telegram_token {
            let telegram = Arc::new(TelegramChannel::new(Some(token)));
            if let Some(ref url) = webhook_url {
                let secret = config.channels.telegram.webhook_secret.as_deref();
                if let Err(e) = telegram.set_webhook(url, secret).await {
                    log::warn!("telegram set_webhook failed: {}", e);
                } else {
                    log::info!("telegram channel registered (webhook mode): {}", url);
                }
                state
                    .channel_registry
                    .register(telegram.id().to_string(), telegram.clone())
                    .await;
                Some(telegram)
            } else {
                let handle = telegram.clone().start_inbound(inbound_tx);
                state.channel_tasks.write().await.push(handle);
                state
                    .channel_registry
                    .register(telegram.id().to_string(), telegram)
                    .await;
                log::info!("telegram channel registered and getUpdates loop started");
                None
            }
        } else {
            log::warn!("no telegram bot token configured; no channel started");
            None
        };

    let channel_registry = state.channel_registry.clone();
    let app = Router::new()
        .route("/", get(health_http))
        .route("/telegram/webhook", post(telegram_webhook))
        .with_state(state);

    let bind_addr = format!("{}:{}", config.gateway.bind.trim(), config.gateway.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding to {}", bind_addr))?;
    log::info!("gateway listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(
            channel_registry,
            channel_tasks,
            telegram_webhook_for_shutdown,
        ))
        .await
        .context("gateway server exited")?;
    log::info!("gateway stopped");
    Ok(())
}

/// Future that completes when the process should shut down (SIGINT or SIGTERM).
/// Stops channel connectors, removes the Telegram webhook if we set one, then
/// awaits in-process channel tasks.
async fn shutdown_signal(
    channel_registry: Arc<ChannelRegistry>,
    channel_tasks: Arc<tokio::sync::RwLock<Vec<JoinHandle<()>>>>,
    telegram_webhook: Option<Arc<TelegramChannel>>,
) {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received, stopping channels");

    for id in channel_registry.ids().await {
        if let Some(handle) = channel_registry.get(&id).await {
            handle.stop();
        }
    }

    if let Some(t) = telegram_webhook {
        if let Err(e) = t.delete_webhook().await {
            log::debug!("telegram delete_webhook on shutdown: {}", e);
        }
    }

    let handles = {
        let mut g = channel_tasks.write().await;
        std::mem::take(&mut *g)
    };
    for h in handles {
        let _ = h.await;
    }
    log::info!("channel tasks finished");
}

/// POST /telegram/webhook — receives Telegram update JSON; verifies optional secret, pushes InboundMessage.
async fn telegram_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(ref expected) = state.config.channels.telegram.webhook_secret {
        let provided = headers
            .get("X-Telegram-Bot-Api-Secret-Token")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != expected.as_str() {
            return StatusCode::FORBIDDEN;
        }
    }
    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(u) => u,
        Err(_) => return StatusCode::BAD_REQUEST,
    };
    let Some(inbound) = update.into_inbound("telegram") else {
        return StatusCode::OK;
    };
    if state.inbound_tx.send(inbound).await.is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }
    StatusCode::OK
}

/// GET / returns a simple health JSON (for probes).
async fn health_http(State(state): State<GatewayState>) -> Json<serde_json::Value> {
    Json(json!({
        "runtime": "running",
        "port": state.config.gateway.port,
    }))
}
