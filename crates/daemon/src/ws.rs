// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal WebSocket surface over the topic layer.
//!
//! One connection = one [`TopicSender`]. Inbound JSON requests manage topic
//! subscriptions and invoke worker lifecycle operations; outbound
//! [`ResponseEvent`]s are serialized as text frames. HTTP routing and
//! authentication live outside the core and are deliberately absent here.

use crate::backend::ControlRequest;
use crate::bus::{LogCacheRegistry, MsgBus, TopicSender};
use crate::manager::WorkerManager;
use crate::topic::{LogTopic, WorkerTopic};
use futures_util::{SinkExt, StreamExt};
use gantry_core::ResponseEvent;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

/// Outbound queue per connection; slow browsers start losing deliveries
/// once this backs up.
const CONNECTION_QUEUE_DEPTH: usize = 256;

/// Shared backend context for all connections.
pub struct WsCtx {
    pub manager: Arc<WorkerManager>,
    pub bus: MsgBus,
    pub logs: Arc<LogCacheRegistry>,
    pub control_tx: mpsc::Sender<ControlRequest>,
}

/// One inbound client request.
#[derive(Debug, Deserialize)]
struct ClientRequest {
    action: String,
    #[serde(default)]
    topic: String,
    #[serde(default)]
    config: String,
    #[serde(default, rename = "mod")]
    mod_name: String,
}

/// Accept loop; spawns a task per connection.
pub async fn serve(listener: TcpListener, ctx: Arc<WsCtx>) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                tracing::debug!(%addr, "WebSocket connection");
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    handle_connection(stream, ctx).await;
                });
            }
            Err(e) => tracing::error!(error = %e, "WebSocket accept error"),
        }
    }
}

async fn handle_connection(stream: TcpStream, ctx: Arc<WsCtx>) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket handshake failed");
            return;
        }
    };
    let (mut ws_tx, mut ws_rx) = ws.split();

    let (tx, mut rx) = mpsc::channel::<ResponseEvent>(CONNECTION_QUEUE_DEPTH);
    let sender = TopicSender::new(tx);

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if ws_tx.send(Message::text(text)).await.is_err() {
                return;
            }
        }
    });

    let mut worker_topic: Option<Arc<WorkerTopic>> = None;
    let mut log_topics: HashMap<String, Arc<LogTopic>> = HashMap::new();

    while let Some(msg) = ws_rx.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };
        let request = match serde_json::from_str::<ClientRequest>(&text) {
            Ok(request) => request,
            Err(e) => {
                send_error(&sender, "parse", &e.to_string());
                continue;
            }
        };
        handle_request(&ctx, &sender, request, &mut worker_topic, &mut log_topics).await;
    }

    // Connection gone: detach every subscription
    if let Some(topic) = worker_topic {
        topic.unsubscribe(&ctx.bus);
    }
    for topic in log_topics.values() {
        topic.unsubscribe();
    }
    writer.abort();
}

async fn handle_request(
    ctx: &Arc<WsCtx>,
    sender: &TopicSender,
    request: ClientRequest,
    worker_topic: &mut Option<Arc<WorkerTopic>>,
    log_topics: &mut HashMap<String, Arc<LogTopic>>,
) {
    match request.action.as_str() {
        "sub" => match request.topic.as_str() {
            "Worker" => {
                if worker_topic.is_none() {
                    *worker_topic =
                        Some(WorkerTopic::subscribe(&ctx.bus, &ctx.manager, sender.clone()));
                }
            }
            "Log" => {
                if request.config.is_empty() {
                    send_error(sender, "sub", "Log subscription requires a config");
                    return;
                }
                log_topics.entry(request.config.clone()).or_insert_with(|| {
                    LogTopic::subscribe(&ctx.logs, &request.config, sender.clone())
                });
            }
            other => send_error(sender, "sub", &format!("no such topic \"{other}\"")),
        },
        "unsub" => match request.topic.as_str() {
            "Worker" => {
                if let Some(topic) = worker_topic.take() {
                    topic.unsubscribe(&ctx.bus);
                }
            }
            "Log" => {
                if let Some(topic) = log_topics.remove(&request.config) {
                    topic.unsubscribe();
                }
            }
            other => send_error(sender, "unsub", &format!("no such topic \"{other}\"")),
        },
        "start" => {
            if let Err(e) = ctx.manager.worker_start(&request.mod_name, &request.config).await {
                send_error(sender, "start", &e.to_string());
            }
        }
        "scheduler-stop" => {
            if let Err(e) = ctx.manager.worker_scheduler_stop(&request.config) {
                send_error(sender, "scheduler-stop", &e.to_string());
            }
        }
        "kill" => {
            if let Err(e) = ctx.manager.worker_kill(&request.config) {
                send_error(sender, "kill", &e.to_string());
            }
        }
        "force-kill" => {
            if let Err(e) = ctx.manager.worker_force_kill(&request.config).await {
                send_error(sender, "force-kill", &e.to_string());
            }
        }
        "stop" => {
            let _ = ctx.control_tx.send(ControlRequest::Stop).await;
        }
        "restart" => {
            let _ = ctx.control_tx.send(ControlRequest::Restart).await;
        }
        other => send_error(sender, other, "unknown action"),
    }
}

/// Push a response on the reserved `Error` topic; best-effort.
fn send_error(sender: &TopicSender, action: &str, message: &str) {
    sender.send_nowait(ResponseEvent::set("Error", [action], message));
}

#[cfg(test)]
#[path = "ws_tests.rs"]
mod tests;
