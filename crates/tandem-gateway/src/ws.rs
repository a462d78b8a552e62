// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! WebSocket endpoint — bridges browser JSON frames to the agent loop.
//!
//! Each connection gets a fresh session: its own [`AgentLoop`] (and thus its
//! own conversation history), a busy flag, a cancel slot and a preview-error
//! limiter.  There is no server-side resume; a reconnecting client starts
//! over.  Disconnecting mid-turn cancels the turn and discards pending
//! events.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use tandem_config::Config;
use tandem_core::{AgentEvent, AgentLoop};
use tandem_model::ModelProvider;
use tandem_tools::{ReadTracker, ToolRegistry, Workspace};

use crate::protocol::ServerEvent;
use crate::session::{
    agent_task, handle_frame, AgentCommand, Directive, PreviewErrorLimiter, SessionEvent,
};

/// Shared dependencies from which each connection builds its session.
#[derive(Clone)]
pub struct GatewayState {
    model: Arc<dyn ModelProvider>,
    tools: Arc<ToolRegistry>,
    workspace: Arc<Workspace>,
    reads: Arc<ReadTracker>,
    config: Arc<Config>,
    repo_map: Arc<RwLock<Option<String>>>,
}

impl GatewayState {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        tools: Arc<ToolRegistry>,
        workspace: Arc<Workspace>,
        reads: Arc<ReadTracker>,
        config: Arc<Config>,
        repo_map: Arc<RwLock<Option<String>>>,
    ) -> Self {
        Self {
            model,
            tools,
            workspace,
            reads,
            config,
            repo_map,
        }
    }

    fn new_loop(&self) -> AgentLoop {
        AgentLoop::new(
            Arc::clone(&self.model),
            Arc::clone(&self.tools),
            Arc::clone(&self.workspace),
            Arc::clone(&self.reads),
            Arc::clone(&self.config),
            Arc::clone(&self.repo_map),
        )
    }
}

pub fn router(state: GatewayState) -> Router {
    Router::new().route("/ws", get(ws_handler)).with_state(state)
}

/// Bind and serve until SIGINT.
pub async fn serve(state: GatewayState) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.server.bind, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "gateway listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<GatewayState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: GatewayState) {
    let session = uuid::Uuid::new_v4();
    info!(%session, "client connected");

    let (cmd_tx, cmd_rx) = mpsc::channel::<AgentCommand>(8);
    let (event_tx, mut event_rx) = mpsc::channel::<SessionEvent>(64);
    let agent = tokio::spawn(agent_task(state.new_loop(), cmd_rx, event_tx));

    let mut busy = false;
    let mut cancel_slot: Option<oneshot::Sender<()>> = None;
    let mut limiter = PreviewErrorLimiter::new();

    loop {
        tokio::select! {
            frame = socket.recv() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let directives = handle_frame(&text, busy, &mut limiter, Instant::now());
                        for directive in directives {
                            match directive {
                                Directive::Send(event) => {
                                    send_event(&mut socket, &event).await;
                                }
                                Directive::Dispatch(user_text) => {
                                    let (tx, rx) = oneshot::channel();
                                    cancel_slot = Some(tx);
                                    busy = true;
                                    if cmd_tx
                                        .send(AgentCommand::Chat { text: user_text, cancel: rx })
                                        .await
                                        .is_err()
                                    {
                                        warn!("agent task gone; closing session");
                                        break;
                                    }
                                }
                                Directive::CancelActive => {
                                    if let Some(tx) = cancel_slot.take() {
                                        debug!("cancelling active turn");
                                        let _ = tx.send(());
                                    }
                                }
                                Directive::ResetHistory => {
                                    if cmd_tx.send(AgentCommand::Reset).await.is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary frames ignored
                    Some(Err(e)) => {
                        debug!("socket recv error: {e}");
                        break;
                    }
                }
            }
            event = event_rx.recv() => {
                match event {
                    Some(SessionEvent::Agent(agent_event)) => {
                        if matches!(
                            agent_event,
                            AgentEvent::TurnComplete | AgentEvent::Aborted
                        ) {
                            busy = false;
                            cancel_slot = None;
                        }
                        if let Some(server_event) = ServerEvent::from_agent(agent_event) {
                            send_event(&mut socket, &server_event).await;
                        }
                    }
                    Some(SessionEvent::TurnFailed(message)) => {
                        busy = false;
                        cancel_slot = None;
                        send_event(&mut socket, &ServerEvent::Error { message }).await;
                    }
                    None => break,
                }
            }
        }
    }

    // Disconnect cancels any active turn; dropping the command channel lets
    // the agent task exit.
    if let Some(tx) = cancel_slot.take() {
        let _ = tx.send(());
    }
    drop(cmd_tx);
    let _ = agent.await;
    info!(%session, "client disconnected");
}

async fn send_event(socket: &mut WebSocket, event: &ServerEvent) {
    if let Ok(json) = serde_json::to_string(event) {
        let _ = socket.send(Message::Text(json)).await;
    }
}
