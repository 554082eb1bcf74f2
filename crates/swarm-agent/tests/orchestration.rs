//! End-to-end requests through the resolver, middleware chain and
//! inference loop.

mod common;

use std::time::{Duration, Instant};

use serde_json::json;
use swarm_agent::{AgentError, Request, ToolOutput};
use swarm_llm::{CompletionResponse, MockBackend, ToolCall};
use swarm_memory::BlobStore;
use swarm_types::{ActionResult, ArgMap, ErrorKind, Role, parse_blob_uri};

use common::{Harness, native, native_async, text};

const ECHO: &str = r#"
pack: echo
agents:
  - name: echo
    description: Repeat the user.
    instruction: Repeat the user's message back verbatim.
"#;

const ROOT: &str = r#"
pack: root
model: default/L1
agents:
  - name: root
    instruction: You are the root agent.
    embed: [echo]
"#;

#[tokio::test]
async fn test_embedded_instruction_and_memory() {
    let h = Harness::new(
        &[("agents/echo/agent.yaml", ECHO), ("agents/root/agent.yaml", ROOT)],
        MockBackend::with_text("hello"),
    );
    let resp = h.run("@root", "hello").await.unwrap();
    assert!(resp.value().contains("hello"));
    assert_eq!(resp.agent.as_ref().unwrap().name, "root");

    let saved = h.memory.all();
    assert_eq!(saved.len(), 2);
    assert_eq!(saved[0].role, Role::User);
    assert_eq!(saved[0].content, "hello");
    assert_eq!(saved[1].role, Role::Assistant);

    let sent = &h.mock.requests()[0];
    assert_eq!(sent.model, "gpt-l1");
    let system = &sent.messages[0].content;
    let echo_at = system.find("Repeat the user's message").unwrap();
    let root_at = system.find("You are the root agent").unwrap();
    assert!(echo_at < root_at, "embedded instruction comes first: {system}");
    assert_eq!(sent.messages.last().unwrap().content, "hello");
}

#[tokio::test]
async fn test_history_is_replayed() {
    let h = Harness::new(
        &[("agents/echo/agent.yaml", ECHO)],
        MockBackend::new(vec![text("first answer"), text("second answer")]),
    );
    h.run("echo", "first question").await.unwrap();
    h.run("echo", "second question").await.unwrap();

    let sent = &h.mock.requests()[1];
    let contents: Vec<&str> = sent.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents[1..],
        ["first question", "first answer", "second question"]
    );
}

const VIEWER: &str = r#"
pack: viewer
agents:
  - name: viewer
    instruction: Describe what the snapshot tool returns.
    functions: ["media:snapshot"]
tools:
  - name: snapshot
    kit: media
    type: func
    description: Take a snapshot.
"#;

#[tokio::test]
async fn test_media_tool_output_becomes_blob_uri() {
    let png = vec![0x89, b'P', b'N', b'G', 1, 2, 3];
    let bytes = png.clone();
    let h = Harness::with(
        &[("agents/viewer/agent.yaml", VIEWER)],
        MockBackend::new(vec![
            CompletionResponse::tool_calls(vec![ToolCall::new("c1", "media__snapshot", json!({}))]),
            text("a tiny image"),
        ]),
        move |b| {
            b.with_func(
                "media:snapshot",
                native(move |_| Ok(ToolOutput::Result(ActionResult::blob("image/png", bytes.clone())))),
            )
        },
    );
    let resp = h.run("viewer", "show me").await.unwrap();
    assert_eq!(resp.value(), "a tiny image");

    let second = &h.mock.requests()[1];
    let tool_msg = second.messages.last().unwrap();
    assert_eq!(tool_msg.tool_call_id.as_deref(), Some("c1"));
    assert!(
        tool_msg
            .content
            .starts_with("data:application/x.dhnt.blob;mime=image/png;")
    );
    let (mime, id) = parse_blob_uri(&tool_msg.content).unwrap();
    assert_eq!(mime, "image/png");
    let blob = h.blobs.get(&id).await.unwrap();
    assert_eq!(blob.content, png);
    assert_eq!(blob.mime_type, "image/png");
}

const PICKER: &str = r#"
pack: picker
agents:
  - name: picker
    model: "@chooser"
    instruction: Answer briefly.
"#;

const CHOOSER: &str = r#"
pack: chooser
agents:
  - name: chooser
    functions: ["pick:model"]
    flow:
      type: sequence
      actions: ["pick:model"]
tools:
  - name: model
    kit: pick
    type: func
"#;

#[tokio::test]
async fn test_model_chosen_by_agent() {
    let h = Harness::with(
        &[("agents/picker/agent.yaml", PICKER), ("agents/chooser/agent.yaml", CHOOSER)],
        MockBackend::with_text("ok"),
        |b| b.with_func("pick:model", native(|_| Ok(ToolOutput::Text("openai/L2".into())))),
    );
    let resp = h.run("picker", "which model?").await.unwrap();
    assert_eq!(resp.value(), "ok");
    let sent = h.mock.requests();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].model, "gpt-l2");
}

const LOOPER: &str = r#"
pack: looper
max_turns: 3
agents:
  - name: looper
    instruction: Keep checking the directory.
    functions: ["sh:pwd"]
"#;

#[tokio::test]
async fn test_inference_stops_at_max_turns() {
    let h = Harness::new(
        &[("agents/looper/agent.yaml", LOOPER)],
        MockBackend::repeating(CompletionResponse::tool_calls(vec![ToolCall::new(
            "c",
            "sh__pwd",
            json!({}),
        )])),
    );
    let err = h.run("looper", "go").await.unwrap_err();
    assert!(matches!(err, AgentError::MaxTurns(3)), "{err}");
    assert_eq!(err.kind(), ErrorKind::MaxTurns);
    assert_eq!(h.mock.request_count(), 3);
}

#[tokio::test]
async fn test_zero_time_budget_times_out_before_any_call() {
    let h = Harness::new(&[("agents/echo/agent.yaml", ECHO)], MockBackend::with_text("never"));
    let mut args = ArgMap::new();
    args.insert("max_time".into(), json!(-1));
    let req = Request::new("echo", "hello").with_arguments(args);
    let err = h.run_with(req, h.vars()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);
    assert_eq!(h.mock.request_count(), 0);
}

const SLEEPY: &str = r#"
pack: sleepy
agents:
  - name: sleepy
    functions: ["slow:wait"]
    flow:
      type: sequence
      actions: ["slow:wait"]
tools:
  - name: wait
    kit: slow
    type: func
"#;

#[tokio::test]
async fn test_cancel_mid_flow_returns_promptly() {
    let h = Harness::with(&[("agents/sleepy/agent.yaml", SLEEPY)], MockBackend::new(vec![]), |b| {
        b.with_func(
            "slow:wait",
            native_async(|_| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(ToolOutput::Text("late".into()))
            }),
        )
    });
    let vars = h.vars();
    let cancel = vars.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });
    let started = Instant::now();
    let err = h.run_with(Request::new("sleepy", "zzz"), vars).await.unwrap_err();
    assert!(matches!(err, AgentError::Cancelled), "{err}");
    assert!(started.elapsed() < Duration::from_secs(5));
}

const ROUTER: &str = r#"
pack: router
agents:
  - name: router
    instruction: Route the request.
    functions: ["route:go"]
tools:
  - name: go
    kit: route
    type: func
"#;

const HELPER: &str = r#"
pack: helper
agents:
  - name: helper
    adapter: echo
"#;

#[tokio::test]
async fn test_transfer_hands_over_to_next_agent() {
    let h = Harness::with(
        &[("agents/router/agent.yaml", ROUTER), ("agents/helper/agent.yaml", HELPER)],
        MockBackend::new(vec![CompletionResponse::tool_calls(vec![ToolCall::new(
            "t1",
            "route__go",
            json!({}),
        )])]),
        |b| b.with_func("route:go", native(|_| Ok(ToolOutput::Result(ActionResult::transfer("helper"))))),
    );
    let resp = h.run("router", "please help").await.unwrap();
    assert_eq!(resp.agent.as_ref().unwrap().name, "helper");
    assert_eq!(resp.value(), "please help");
    assert!(!resp.is_transfer());
    assert_eq!(h.mock.request_count(), 1);
}

const CYCLE_A: &str = r#"
pack: a
agents:
  - name: a
    model: "@b"
    instruction: A.
"#;

const CYCLE_B: &str = r#"
pack: b
agents:
  - name: b
    model: "@a"
    instruction: B.
"#;

#[tokio::test]
async fn test_model_reference_cycle_is_rejected() {
    let h = Harness::new(
        &[("agents/a/agent.yaml", CYCLE_A), ("agents/b/agent.yaml", CYCLE_B)],
        MockBackend::new(vec![]),
    );
    let err = h.run("a", "hi").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
    assert!(err.to_string().contains("a -> b -> a"), "{err}");
    assert_eq!(h.mock.request_count(), 0);
}

#[tokio::test]
async fn test_resolved_agents_are_clones() {
    let h = Harness::new(
        &[("agents/echo/agent.yaml", ECHO), ("agents/root/agent.yaml", ROOT)],
        MockBackend::new(vec![]),
    );
    let resolver = h.swarm.resolver();
    let a = resolver.resolve_agent(common::USER, "root").await.unwrap();
    let b = resolver.resolve_agent(common::USER, "root").await.unwrap();
    assert_eq!(a, b);
    assert_ne!(a.embed.as_ptr(), b.embed.as_ptr());
    assert_eq!(a.embed[0].name, "echo");
}

#[tokio::test]
async fn test_packs_and_instructions_are_cached_until_cleared() {
    let pack = |writer: &str| {
        format!(
            "pack: team\nagents:\n  - name: team\n    instruction: file:lead.md\n  - name: team/writer\n    description: {writer}\n    instruction: Write.\n"
        )
    };
    let yaml = pack("first");
    let h = Harness::new(
        &[("agents/team/agent.yaml", yaml.as_str()), ("agents/team/lead.md", "Lead v1")],
        MockBackend::new(vec![]),
    );
    let dir = h.dir.path().join("packs/agents/team");
    let resolver = h.swarm.resolver();

    let lead = resolver.resolve_agent(common::USER, "team").await.unwrap();
    assert_eq!(lead.instruction.unwrap().content, "Lead v1");

    std::fs::write(dir.join("agent.yaml"), pack("second")).unwrap();
    std::fs::write(dir.join("lead.md"), "Lead v2").unwrap();

    let writer = resolver.resolve_agent(common::USER, "team/writer").await.unwrap();
    assert_eq!(writer.description, "first");
    let reference = format!("{}:team", common::USER);
    let lead = resolver.resolve_agent("someone-else", &reference).await.unwrap();
    assert_eq!(lead.instruction.unwrap().content, "Lead v1");

    resolver.clear().await;
    let writer = resolver.resolve_agent(common::USER, "team/writer").await.unwrap();
    assert_eq!(writer.description, "second");
    let lead = resolver.resolve_agent(common::USER, "team").await.unwrap();
    assert_eq!(lead.instruction.unwrap().content, "Lead v2");
}

#[tokio::test]
async fn test_unknown_agent_is_not_found() {
    let h = Harness::new(&[], MockBackend::new(vec![]));
    let err = h.run("missing", "hi").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

const NOTES: &str = r#"
pack: notes
agents:
  - name: notes
    instruction:
      type: tpl
      content: 'Rules: {{ asset "rules.md" "more.md" }} Missing: [{{ cat "missing.txt" }}]'
  - name: logo
    instruction:
      type: tpl
      content: '{{ asset "logo.bin" }}'
"#;

#[tokio::test]
async fn test_instruction_assets_and_failing_utilities() {
    let h = Harness::new(
        &[
            ("agents/notes/agent.yaml", NOTES),
            ("agents/notes/rules.md", "use `ls`\n"),
            ("agents/notes/more.md", "be brief"),
        ],
        MockBackend::with_text("ok"),
    );
    h.run("notes", "hi").await.unwrap();

    let system = &h.mock.requests()[0].messages[0].content;
    assert!(
        system.starts_with("Rules: use &grave;ls&grave;\nbe brief Missing: [cat: "),
        "{system}"
    );
    assert!(system.contains("missing.txt"), "{system}");
    assert!(system.ends_with(']'), "{system}");
}

#[tokio::test]
async fn test_binary_asset_is_rejected() {
    let h = Harness::new(&[("agents/notes/agent.yaml", NOTES)], MockBackend::with_text("ok"));
    std::fs::write(
        h.dir.path().join("packs/agents/notes/logo.bin"),
        [0x89, b'P', b'N', b'G', 0xff, 0xfe, 0x00],
    )
    .unwrap();

    let err = h.run("notes/logo", "hi").await.unwrap_err();
    assert!(err.to_string().contains("not UTF-8"), "{err}");
    assert!(h.mock.requests().is_empty());
}
