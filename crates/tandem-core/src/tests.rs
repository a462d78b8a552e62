// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Agent-loop tests driven by the scripted mock provider: exact event
//! sequences in, observable event streams and history invariants out.

use std::path::Path;
use std::sync::{Arc, RwLock};

use tokio::sync::{mpsc, oneshot};

use tandem_config::Config;
use tandem_model::{ContentBlock, ModelProvider, ScriptedProvider, StopReason, StreamEvent};
use tandem_tools::{standard_registry, PreviewManager, ReadTracker, Workspace};

use crate::{AgentError, AgentEvent, AgentLoop, TaskTool};

struct Fixture {
    _dir: tempfile::TempDir,
    loop_: AgentLoop,
    provider: Arc<ScriptedProvider>,
}

fn fixture(scripts: Vec<Vec<StreamEvent>>) -> Fixture {
    fixture_with(scripts, |_| {})
}

fn fixture_with(scripts: Vec<Vec<StreamEvent>>, tweak: impl FnOnce(&mut Config)) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.project.root = dir.path().to_path_buf();
    tweak(&mut config);
    let config = Arc::new(config);

    let provider = Arc::new(ScriptedProvider::new(scripts));
    let model: Arc<dyn ModelProvider> = provider.clone();

    let workspace = Arc::new(Workspace::new(dir.path()).unwrap());
    let reads = Arc::new(ReadTracker::default());
    let preview = Arc::new(PreviewManager::new(
        "sh".into(),
        vec!["-c".into(), "sleep 30".into()],
        config.preview.port,
        dir.path().to_path_buf(),
    ));
    let repo_map: Arc<RwLock<Option<String>>> = Arc::new(RwLock::new(None));

    let registry = Arc::new_cyclic(|weak| {
        let mut reg = standard_registry(
            Arc::clone(&workspace),
            Arc::clone(&reads),
            preview,
            config.agent.bash_timeout_secs,
        );
        reg.register(TaskTool::new(
            Arc::clone(&model),
            weak.clone(),
            Arc::clone(&workspace),
            Arc::clone(&reads),
            Arc::clone(&config),
            Arc::clone(&repo_map),
        ));
        reg
    });

    let loop_ = AgentLoop::new(model, registry, workspace, reads, config, repo_map);
    Fixture {
        _dir: dir,
        loop_,
        provider,
    }
}

/// Run one turn and return (result, collected events).
async fn run_turn(
    loop_: &mut AgentLoop,
    text: &str,
) -> (Result<(), AgentError>, Vec<AgentEvent>) {
    let (tx, mut rx) = mpsc::channel(64);
    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    });
    let result = loop_.process_message(text, tx).await;
    let events = collector.await.unwrap();
    (result, events)
}

fn root(fx: &Fixture) -> &Path {
    fx._dir.path()
}

fn tool_calls(events: &[AgentEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            AgentEvent::ToolCallStarted { name, .. } => Some(name.as_str()),
            _ => None,
        })
        .collect()
}

// ── Create-then-read flow ─────────────────────────────────────────────────────

#[tokio::test]
async fn create_file_turn_emits_expected_event_sequence() {
    let mut fx = fixture(vec![
        ScriptedProvider::tool_turn(
            "tu_1",
            "write_file",
            r#"{"path":"hello.txt","content":"Hi"}"#,
        ),
        ScriptedProvider::text_turn("Done."),
    ]);

    let (result, events) = run_turn(&mut fx.loop_, "create hello.txt containing Hi").await;
    result.unwrap();

    // tool_call → tool_result → file_changed → text → done
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match e {
            AgentEvent::ThinkingDelta(_) => "thinking",
            AgentEvent::TextComplete(_) => "text",
            AgentEvent::ToolCallStarted { .. } => "tool_call",
            AgentEvent::ToolCallFinished { .. } => "tool_result",
            AgentEvent::FileChanged { .. } => "file_changed",
            AgentEvent::TurnComplete => "done",
            AgentEvent::Aborted => "aborted",
        })
        .collect();
    let filtered: Vec<&str> = kinds.into_iter().filter(|k| *k != "thinking").collect();
    assert_eq!(
        filtered,
        vec!["tool_call", "tool_result", "file_changed", "text", "done"]
    );

    match events
        .iter()
        .find(|e| matches!(e, AgentEvent::FileChanged { .. }))
        .unwrap()
    {
        AgentEvent::FileChanged { path, content } => {
            assert_eq!(path, "hello.txt");
            assert_eq!(content.as_deref(), Some("Hi"));
        }
        _ => unreachable!(),
    }

    assert_eq!(
        std::fs::read_to_string(root(&fx).join("hello.txt")).unwrap(),
        "Hi"
    );
}

// ── ToolUse↔ToolResult pairing in history ────────────────────────────────────

#[tokio::test]
async fn history_pairs_every_tool_use_with_matching_result() {
    let mut fx = fixture(vec![
        ScriptedProvider::tool_turn(
            "tu_42",
            "write_file",
            r#"{"path":"a.txt","content":"x"}"#,
        ),
        ScriptedProvider::text_turn("ok"),
    ]);
    run_turn(&mut fx.loop_, "go").await.0.unwrap();

    let history = fx.loop_.history();
    let mut open_ids: Vec<String> = Vec::new();
    for message in history {
        for block in &message.content {
            match block {
                ContentBlock::ToolUse { id, .. } => open_ids.push(id.clone()),
                ContentBlock::ToolResult { id, .. } => {
                    let pos = open_ids
                        .iter()
                        .position(|open| open == id)
                        .expect("result without preceding tool use");
                    open_ids.remove(pos);
                }
                _ => {}
            }
        }
    }
    assert!(open_ids.is_empty(), "unanswered tool uses: {open_ids:?}");
}

// ── Reasoning blocks and signatures survive into history ─────────────────────

#[tokio::test]
async fn reasoning_block_with_signature_is_preserved_verbatim() {
    let mut fx = fixture(vec![vec![
        StreamEvent::ReasoningDelta {
            index: 0,
            text: "let me think".into(),
        },
        StreamEvent::ReasoningSignatureDelta {
            index: 0,
            signature: "EqRkSig".into(),
        },
        StreamEvent::BlockStop { index: 0 },
        StreamEvent::TextDelta {
            index: 1,
            text: "answer".into(),
        },
        StreamEvent::BlockStop { index: 1 },
        StreamEvent::MessageStop {
            stop_reason: StopReason::EndTurn,
        },
    ]]);
    let (result, events) = run_turn(&mut fx.loop_, "hi").await;
    result.unwrap();

    // Reasoning streams to the client as thinking.
    assert!(events
        .iter()
        .any(|e| matches!(e, AgentEvent::ThinkingDelta(t) if t == "let me think")));

    let assistant = &fx.loop_.history()[1];
    assert_eq!(
        assistant.content[0],
        ContentBlock::Reasoning {
            text: "let me think".into(),
            signature: Some("EqRkSig".into()),
        }
    );
}

// ── Malformed tool input degrades to {} and the loop continues ───────────────

#[tokio::test]
async fn malformed_tool_input_does_not_abort_turn() {
    let mut fx = fixture(vec![
        vec![
            StreamEvent::BlockStart {
                index: 0,
                tool_use_id: "tu_1".into(),
                name: "write_file".into(),
            },
            StreamEvent::InputJsonDelta {
                index: 0,
                partial_json: r#"{"path": "x.txt", "conte"#.into(), // truncated JSON
            },
            StreamEvent::BlockStop { index: 0 },
            StreamEvent::MessageStop {
                stop_reason: StopReason::ToolUse,
            },
        ],
        ScriptedProvider::text_turn("recovered"),
    ]);
    let (result, events) = run_turn(&mut fx.loop_, "go").await;
    result.unwrap();

    // The tool ran with {} input and failed, but the turn completed.
    let failed = events.iter().any(|e| {
        matches!(e, AgentEvent::ToolCallFinished { is_error, .. } if *is_error)
    });
    assert!(failed, "tool should fail on empty input");
    assert!(events.iter().any(|e| matches!(e, AgentEvent::TurnComplete)));
}

// ── Iteration limit ──────────────────────────────────────────────────────────

#[tokio::test]
async fn iteration_limit_fails_turn_with_typed_error() {
    // Every model call asks for another tool call; the loop must stop at the
    // configured bound.
    let scripts: Vec<Vec<StreamEvent>> = (0..5)
        .map(|i| {
            ScriptedProvider::tool_turn(format!("tu_{i}"), "list_files", "{}")
        })
        .collect();
    let mut fx = fixture_with(scripts, |c| c.agent.iteration_limit = 3);

    let (result, events) = run_turn(&mut fx.loop_, "loop forever").await;
    match result {
        Err(AgentError::IterationLimitExceeded(3)) => {}
        other => panic!("expected IterationLimitExceeded, got {other:?}"),
    }
    // Exactly N model iterations ran, and no completion was signalled.
    assert_eq!(tool_calls(&events).len(), 3);
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::TurnComplete)));
}

// ── Edit uniqueness violation ────────────────────────────────────────────────

#[tokio::test]
async fn duplicate_edit_target_errors_and_emits_no_file_changed() {
    let fx_scripts = vec![
        ScriptedProvider::tool_turn(
            "tu_1",
            "edit_file",
            r#"{"path":"a.txt","old_string":"foo","new_string":"bar"}"#,
        ),
        ScriptedProvider::text_turn("I need more context."),
    ];
    let mut fx = fixture(fx_scripts);
    std::fs::write(root(&fx).join("a.txt"), "foo\nfoo\n").unwrap();
    // Capture the snapshot after seeding so the seed write isn't reported.
    let (result, events) = run_turn(&mut fx.loop_, "replace foo").await;
    result.unwrap();

    let tool_result = events
        .iter()
        .find_map(|e| match e {
            AgentEvent::ToolCallFinished { result, is_error, .. } => {
                Some((result.clone(), *is_error))
            }
            _ => None,
        })
        .unwrap();
    assert!(tool_result.1);
    assert!(tool_result.0.contains("2 times"), "{}", tool_result.0);
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, AgentEvent::FileChanged { .. })),
        "failed edit must not report a change"
    );
    assert_eq!(
        std::fs::read_to_string(root(&fx).join("a.txt")).unwrap(),
        "foo\nfoo\n"
    );
}

// ── Path escape blocked ──────────────────────────────────────────────────────

#[tokio::test]
async fn path_escape_surfaces_as_tool_error() {
    let mut fx = fixture(vec![
        ScriptedProvider::tool_turn("tu_1", "read_file", r#"{"path":"../etc/passwd"}"#),
        ScriptedProvider::text_turn("blocked, as expected"),
    ]);
    let (result, events) = run_turn(&mut fx.loop_, "read /etc/passwd").await;
    result.unwrap();

    let tool_result = events
        .iter()
        .find_map(|e| match e {
            AgentEvent::ToolCallFinished { result, .. } => Some(result.clone()),
            _ => None,
        })
        .unwrap();
    assert!(
        tool_result.contains("Path traversal blocked"),
        "{tool_result}"
    );
}

// ── Sub-agent via the task tool ──────────────────────────────────────────────

#[tokio::test]
async fn task_tool_runs_subagent_and_hides_child_events() {
    // Script order across the shared provider:
    //   1. parent — task call
    //   2. child  — read_file README.md
    //   3. child  — final summary text
    //   4. parent — final text
    let mut fx = fixture(vec![
        ScriptedProvider::tool_turn("tu_1", "task", r#"{"prompt":"summarize README"}"#),
        ScriptedProvider::tool_turn("tu_c1", "read_file", r#"{"path":"README.md"}"#),
        ScriptedProvider::text_turn("The README describes a demo project."),
        ScriptedProvider::text_turn("All done."),
    ]);
    std::fs::write(root(&fx).join("README.md"), "# Demo\n").unwrap();

    let (result, events) = run_turn(&mut fx.loop_, "summarize the README").await;
    result.unwrap();

    // Parent's client sees only the task call, not the child's read_file.
    assert_eq!(tool_calls(&events), vec!["task"]);

    let task_result = events
        .iter()
        .find_map(|e| match e {
            AgentEvent::ToolCallFinished { name, result, .. } if name == "task" => {
                Some(result.clone())
            }
            _ => None,
        })
        .unwrap();
    assert!(
        task_result.contains("The README describes a demo project."),
        "{task_result}"
    );

    // The child's history never leaks into the parent's.
    let parent_texts: Vec<String> = fx
        .loop_
        .history()
        .iter()
        .map(|m| m.text())
        .collect();
    assert!(!parent_texts.iter().any(|t| t.contains("README describes")));
}

#[tokio::test]
async fn task_depth_bound_surfaces_as_tool_error() {
    let mut fx = fixture_with(
        vec![
            ScriptedProvider::tool_turn("tu_1", "task", r#"{"prompt":"recurse"}"#),
            ScriptedProvider::text_turn("stopped"),
        ],
        |c| c.agent.subagent_depth = 0,
    );

    let (result, events) = run_turn(&mut fx.loop_, "recurse").await;
    result.unwrap();
    let depth_error = events.iter().any(|e| {
        matches!(e, AgentEvent::ToolCallFinished { result, is_error, .. }
            if *is_error && result.contains("maximum nesting depth"))
    });
    assert!(depth_error, "depth bound must reject the spawn: {events:?}");
}

// ── Cancellation ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn cancel_before_first_round_discards_everything_but_user_message() {
    let mut fx = fixture(vec![ScriptedProvider::text_turn("fresh turn works")]);

    let (cancel_tx, mut cancel_rx) = oneshot::channel();
    cancel_tx.send(()).unwrap();

    let (tx, mut rx) = mpsc::channel(64);
    let collector = tokio::spawn(async move {
        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        events
    });
    fx.loop_
        .process_with_cancel("rewrite everything", tx, &mut cancel_rx)
        .await
        .unwrap();
    let events = collector.await.unwrap();

    assert!(events.iter().any(|e| matches!(e, AgentEvent::Aborted)));
    assert!(!events.iter().any(|e| matches!(e, AgentEvent::TurnComplete)));
    assert!(tool_calls(&events).is_empty(), "no tool calls after cancel");
    assert_eq!(fx.loop_.history().len(), 1, "only the user message remains");

    // A subsequent chat starts cleanly; the cancelled turn never reached the
    // model, so the scripted reply is still queued.
    let (result, events) = run_turn(&mut fx.loop_, "try again").await;
    result.unwrap();
    assert!(events.iter().any(|e| matches!(e, AgentEvent::TurnComplete)));
}

// ── Snapshot-driven change detection ─────────────────────────────────────────

#[tokio::test]
async fn bash_created_file_is_reported_by_snapshot_diff() {
    let mut fx = fixture(vec![
        ScriptedProvider::tool_turn(
            "tu_1",
            "bash",
            r#"{"command":"printf hello > generated.txt"}"#,
        ),
        ScriptedProvider::text_turn("generated"),
    ]);
    let (result, events) = run_turn(&mut fx.loop_, "generate a file with the shell").await;
    result.unwrap();

    let changed = events
        .iter()
        .find_map(|e| match e {
            AgentEvent::FileChanged { path, content } => Some((path.clone(), content.clone())),
            _ => None,
        })
        .expect("snapshot diff should report the generated file");
    assert_eq!(changed.0, "generated.txt");
    assert_eq!(changed.1.as_deref(), Some("hello"));
}

#[tokio::test]
async fn tool_reported_paths_are_not_duplicated_by_snapshot() {
    let mut fx = fixture(vec![
        ScriptedProvider::tool_turn(
            "tu_1",
            "write_file",
            r#"{"path":"once.txt","content":"1"}"#,
        ),
        ScriptedProvider::text_turn("done"),
    ]);
    let (result, events) = run_turn(&mut fx.loop_, "write once").await;
    result.unwrap();

    let count = events
        .iter()
        .filter(|e| matches!(e, AgentEvent::FileChanged { path, .. } if path == "once.txt"))
        .count();
    assert_eq!(count, 1, "each changed path is reported exactly once");
}

// ── Repo map wiring ──────────────────────────────────────────────────────────

#[tokio::test]
async fn repo_map_lands_in_system_prompt() {
    let mut fx = fixture(vec![ScriptedProvider::text_turn("hi")]);
    fx.loop_
        .update_repo_map(Some("### src/App.tsx\nexports: App".into()));
    run_turn(&mut fx.loop_, "hello").await.0.unwrap();

    let req = fx.provider.last_request.lock().unwrap();
    let system = &req.as_ref().unwrap().system;
    assert!(system.contains("<project_map>"), "{system}");
    assert!(system.contains("src/App.tsx"));
}

#[tokio::test]
async fn inference_limits_are_forwarded() {
    let mut fx = fixture(vec![ScriptedProvider::text_turn("hi")]);
    run_turn(&mut fx.loop_, "hello").await.0.unwrap();

    let req = fx.provider.last_request.lock().unwrap();
    let req = req.as_ref().unwrap();
    assert_eq!(req.max_output_tokens, 16_384);
    assert_eq!(req.reasoning_budget, 8_192);
    assert!(req.max_output_tokens > req.reasoning_budget);
    assert!(req.tools.iter().any(|t| t.name == "task"));
    assert!(req.tools.iter().any(|t| t.name == "write_file"));
}

// ── Reset ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn reset_clears_history() {
    let mut fx = fixture(vec![
        ScriptedProvider::text_turn("one"),
        ScriptedProvider::text_turn("two"),
    ]);
    run_turn(&mut fx.loop_, "first").await.0.unwrap();
    assert!(!fx.loop_.history().is_empty());
    fx.loop_.reset();
    assert!(fx.loop_.history().is_empty());

    run_turn(&mut fx.loop_, "second").await.0.unwrap();
    // Fresh conversation: one user + one assistant message.
    assert_eq!(fx.loop_.history().len(), 2);
}

// ── ToolRegistry wiring sanity ───────────────────────────────────────────────

#[tokio::test]
async fn registry_exposes_full_catalog_including_task() {
    let fx = fixture(vec![]);
    let names = {
        // Reach the registry through a turn request instead of poking
        // internals: the schemas forwarded to the model are the catalog.
        let mut loop_ = fx.loop_;
        run_turn(&mut loop_, "anything").await.0.unwrap();
        let req = fx.provider.last_request.lock().unwrap();
        req.as_ref()
            .unwrap()
            .tools
            .iter()
            .map(|t| t.name.clone())
            .collect::<Vec<_>>()
    };
    for tool in [
        "bash",
        "edit_file",
        "glob",
        "list_files",
        "read_file",
        "restart_preview",
        "search_files",
        "task",
        "write_file",
    ] {
        assert!(names.contains(&tool.to_string()), "missing {tool}");
    }
}
