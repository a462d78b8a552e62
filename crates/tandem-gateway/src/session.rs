// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Per-connection session logic, kept free of socket I/O so the decision
//! rules (busy rejection, debounce, reset gating) are directly testable.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use tandem_core::{AgentEvent, AgentLoop};

use crate::protocol::{fix_prompt, prefill_for_click, ClientMessage, ServerEvent};

/// Identical preview errors inside this window are dropped.
const PREVIEW_ERROR_WINDOW: Duration = Duration::from_secs(5);
/// Auto-fix attempts allowed per session; the next one is silently ignored.
const MAX_FIX_ATTEMPTS: u32 = 3;

// ── Agent task ────────────────────────────────────────────────────────────────

/// Commands the socket loop sends to the agent task that owns the
/// [`AgentLoop`].  One command is processed at a time, which is what makes
/// "at most one in-flight turn per session" structural.
pub(crate) enum AgentCommand {
    Chat {
        text: String,
        cancel: oneshot::Receiver<()>,
    },
    Reset,
}

/// Events flowing back from the agent task to the socket loop.
pub(crate) enum SessionEvent {
    Agent(AgentEvent),
    /// The turn ended with a fatal error (provider failure, iteration limit).
    TurnFailed(String),
}

/// Run the agent task: owns the loop, executes one command at a time.
/// Exits when the command channel closes (socket gone).
pub(crate) async fn agent_task(
    mut agent: AgentLoop,
    mut commands: mpsc::Receiver<AgentCommand>,
    events: mpsc::Sender<SessionEvent>,
) {
    while let Some(command) = commands.recv().await {
        match command {
            AgentCommand::Chat { text, mut cancel } => {
                let (tx, mut rx) = mpsc::channel::<AgentEvent>(64);
                let forward = events.clone();
                let pump = tokio::spawn(async move {
                    while let Some(event) = rx.recv().await {
                        if forward.send(SessionEvent::Agent(event)).await.is_err() {
                            break;
                        }
                    }
                });
                let result = agent.process_with_cancel(&text, tx, &mut cancel).await;
                let _ = pump.await;
                if let Err(e) = result {
                    warn!("turn failed: {e}");
                    let _ = events.send(SessionEvent::TurnFailed(e.to_string())).await;
                }
            }
            AgentCommand::Reset => {
                debug!("conversation reset");
                agent.reset();
            }
        }
    }
}

// ── Frame handling ────────────────────────────────────────────────────────────

/// What the socket loop should do in response to one inbound frame.
#[derive(Debug)]
pub(crate) enum Directive {
    Send(ServerEvent),
    /// Start a new agent turn with this user text.
    Dispatch(String),
    CancelActive,
    ResetHistory,
}

/// Debounce state for `preview_error` auto-fix dispatches.
pub(crate) struct PreviewErrorLimiter {
    last: Option<(String, Instant)>,
    attempts: u32,
}

impl PreviewErrorLimiter {
    pub(crate) fn new() -> Self {
        Self {
            last: None,
            attempts: 0,
        }
    }

    /// Decide whether this error may trigger an auto-fix now.  Recording
    /// happens only for allowed errors, so a suppressed repeat does not
    /// extend the window.
    pub(crate) fn allow(&mut self, error: &str, now: Instant) -> bool {
        if self.attempts >= MAX_FIX_ATTEMPTS {
            return false;
        }
        if let Some((last_error, at)) = &self.last {
            if last_error == error && now.duration_since(*at) < PREVIEW_ERROR_WINDOW {
                return false;
            }
        }
        self.last = Some((error.to_string(), now));
        self.attempts += 1;
        true
    }
}

/// Translate one inbound text frame into directives, given the session's
/// busy state.  Malformed JSON keeps the connection and yields an error
/// frame.
pub(crate) fn handle_frame(
    raw: &str,
    busy: bool,
    limiter: &mut PreviewErrorLimiter,
    now: Instant,
) -> Vec<Directive> {
    let message: ClientMessage = match serde_json::from_str(raw) {
        Ok(m) => m,
        Err(_) => {
            return vec![Directive::Send(ServerEvent::Error {
                message: "Invalid JSON".into(),
            })]
        }
    };

    match message {
        ClientMessage::Chat { message } => {
            if busy {
                vec![Directive::Send(ServerEvent::Error {
                    message: "Agent is busy; wait for the current turn to finish".into(),
                })]
            } else {
                vec![Directive::Dispatch(message)]
            }
        }
        ClientMessage::Cancel => vec![Directive::CancelActive],
        ClientMessage::Reset => {
            if busy {
                vec![Directive::Send(ServerEvent::Error {
                    message: "Cannot reset while a turn is active".into(),
                })]
            } else {
                vec![Directive::ResetHistory]
            }
        }
        ClientMessage::ElementClick {
            tag_name,
            text_content,
            selector,
        } => vec![Directive::Send(ServerEvent::Prefill {
            message: prefill_for_click(&tag_name, &text_content, &selector),
        })],
        ClientMessage::PreviewError { error } => {
            if busy || !limiter.allow(&error, now) {
                vec![]
            } else {
                debug!("dispatching auto-fix for preview error");
                vec![Directive::Dispatch(fix_prompt(&error))]
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> PreviewErrorLimiter {
        PreviewErrorLimiter::new()
    }

    fn frame(raw: &str, busy: bool, l: &mut PreviewErrorLimiter) -> Vec<Directive> {
        handle_frame(raw, busy, l, Instant::now())
    }

    #[test]
    fn invalid_json_yields_error_frame() {
        let d = frame("{not json", false, &mut limiter());
        match &d[..] {
            [Directive::Send(ServerEvent::Error { message })] => {
                assert_eq!(message, "Invalid JSON")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn chat_dispatches_when_idle() {
        let d = frame(r#"{"type":"chat","message":"hi"}"#, false, &mut limiter());
        assert!(matches!(&d[..], [Directive::Dispatch(t)] if t == "hi"));
    }

    #[test]
    fn chat_rejected_while_busy() {
        let d = frame(r#"{"type":"chat","message":"hi"}"#, true, &mut limiter());
        assert!(matches!(
            &d[..],
            [Directive::Send(ServerEvent::Error { message })] if message.contains("busy")
        ));
    }

    #[test]
    fn cancel_always_cancels() {
        let d = frame(r#"{"type":"cancel"}"#, true, &mut limiter());
        assert!(matches!(&d[..], [Directive::CancelActive]));
    }

    #[test]
    fn reset_rejected_while_busy() {
        let d = frame(r#"{"type":"reset"}"#, true, &mut limiter());
        assert!(matches!(
            &d[..],
            [Directive::Send(ServerEvent::Error { .. })]
        ));
        let d = frame(r#"{"type":"reset"}"#, false, &mut limiter());
        assert!(matches!(&d[..], [Directive::ResetHistory]));
    }

    #[test]
    fn element_click_yields_prefill() {
        let d = frame(
            r#"{"type":"element_click","tagName":"H1","textContent":"Title","selector":"h1"}"#,
            false,
            &mut limiter(),
        );
        assert!(matches!(
            &d[..],
            [Directive::Send(ServerEvent::Prefill { message })] if message.contains("<h1>")
        ));
    }

    // ── preview_error debounce ───────────────────────────────────────────────

    #[test]
    fn identical_error_within_window_is_ignored() {
        let mut l = limiter();
        let t0 = Instant::now();
        assert!(l.allow("TypeError", t0));
        assert!(!l.allow("TypeError", t0 + Duration::from_secs(1)));
        assert!(l.allow("TypeError", t0 + Duration::from_secs(6)));
    }

    #[test]
    fn different_error_within_window_is_allowed() {
        let mut l = limiter();
        let t0 = Instant::now();
        assert!(l.allow("TypeError", t0));
        assert!(l.allow("ReferenceError", t0 + Duration::from_secs(1)));
    }

    #[test]
    fn fourth_attempt_is_ignored() {
        let mut l = limiter();
        let t0 = Instant::now();
        assert!(l.allow("e1", t0));
        assert!(l.allow("e2", t0 + Duration::from_secs(10)));
        assert!(l.allow("e3", t0 + Duration::from_secs(20)));
        assert!(!l.allow("e4", t0 + Duration::from_secs(30)));
    }

    #[test]
    fn suppressed_repeat_does_not_extend_window() {
        let mut l = limiter();
        let t0 = Instant::now();
        assert!(l.allow("E", t0));
        // Repeats at 4s and 4.5s are suppressed and must not reset the clock.
        assert!(!l.allow("E", t0 + Duration::from_millis(4000)));
        assert!(!l.allow("E", t0 + Duration::from_millis(4500)));
        // 5s after the ORIGINAL dispatch the error is allowed again.
        assert!(l.allow("E", t0 + Duration::from_millis(5100)));
    }

    #[test]
    fn preview_error_dispatches_fix_prompt_once() {
        let mut l = limiter();
        let now = Instant::now();
        let raw = r#"{"type":"preview_error","error":"boom"}"#;
        let first = handle_frame(raw, false, &mut l, now);
        assert!(matches!(&first[..], [Directive::Dispatch(p)] if p.contains("boom")));
        let second = handle_frame(raw, false, &mut l, now + Duration::from_secs(1));
        assert!(second.is_empty(), "duplicate within 5s must be dropped");
    }

    #[test]
    fn preview_error_ignored_while_busy() {
        let mut l = limiter();
        let raw = r#"{"type":"preview_error","error":"boom"}"#;
        let d = handle_frame(raw, true, &mut l, Instant::now());
        assert!(d.is_empty());
    }
}
