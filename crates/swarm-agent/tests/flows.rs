//! Flow composition over native and scripted tools.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use swarm_agent::{AgentError, SwarmBuilder, ToolOutput};
use swarm_llm::MockBackend;
use swarm_types::{ArgMap, ArgMapExt, ErrorKind, Role};

use common::{Harness, native};

const TEXT_TOOLS: &str = r#"
tools:
  - name: upcase
    kit: text
    type: func
    description: Upper-case the query.
  - name: reverse
    kit: text
    type: func
    description: Reverse the query.
  - name: fail
    kit: text
    type: func
    description: Always fails.
"#;

fn pack(body: &str) -> String {
    format!("{body}{TEXT_TOOLS}")
}

fn text_kit(b: SwarmBuilder) -> SwarmBuilder {
    b.with_func(
        "text:upcase",
        native(|args: ArgMap| Ok(ToolOutput::Text(args.string_or_empty("query").to_uppercase()))),
    )
    .with_func(
        "text:reverse",
        native(|args: ArgMap| {
            Ok(ToolOutput::Text(args.string_or_empty("query").chars().rev().collect()))
        }),
    )
    .with_func(
        "text:fail",
        native(|_| Err(AgentError::tool("always fails"))),
    )
}

#[tokio::test]
async fn test_sequence_pipes_results() {
    let yaml = pack(
        r#"
pack: seq
agents:
  - name: seq
    functions: ["text:*"]
    flow:
      type: sequence
      actions: ["text:upcase", "text:reverse"]
"#,
    );
    let h = Harness::with(&[("agents/seq/agent.yaml", yaml.as_str())], MockBackend::new(vec![]), text_kit);
    let resp = h.run("seq", "abc").await.unwrap();
    assert_eq!(resp.value(), "CBA");
    assert_eq!(h.mock.request_count(), 0);

    let last = resp.messages.last().unwrap();
    assert_eq!(last.role, Role::Assistant);
    assert_eq!(last.content, "CBA");
}

#[tokio::test]
async fn test_parallel_collects_every_output() {
    let yaml = pack(
        r#"
pack: fan
agents:
  - name: fan
    functions: ["text:upcase", "text:reverse", "text:fail"]
    flow:
      type: parallel
      concurrency: 2
      actions: ["text:upcase", "text:reverse", "text:fail"]
"#,
    );
    let h = Harness::with(&[("agents/fan/agent.yaml", yaml.as_str())], MockBackend::new(vec![]), text_kit);
    let resp = h.run("fan", "abc").await.unwrap();
    let values: Vec<String> = serde_json::from_str(resp.value()).unwrap();
    assert_eq!(values.len(), 3);
    assert_eq!(values[0], "ABC");
    assert_eq!(values[1], "cba");
    assert!(values[2].contains("always fails"), "{}", values[2]);
}

#[tokio::test]
async fn test_choice_follows_expression() {
    let yaml = pack(
        r#"
pack: pick
agents:
  - name: pick
    functions: ["text:upcase", "text:reverse"]
    flow:
      type: choice
      expression: '{{ if eq .query "loud" }}text:upcase{{ else }}1{{ end }}'
      actions: ["text:upcase", "text:reverse"]
"#,
    );
    let h = Harness::with(&[("agents/pick/agent.yaml", yaml.as_str())], MockBackend::new(vec![]), text_kit);
    assert_eq!(h.run("pick", "loud").await.unwrap().value(), "LOUD");
    assert_eq!(h.run("pick", "quiet").await.unwrap().value(), "teiuq");
}

#[tokio::test]
async fn test_choice_without_expression_picks_some_action() {
    let yaml = pack(
        r#"
pack: dice
agents:
  - name: dice
    functions: ["text:upcase", "text:reverse"]
    flow:
      type: choice
      actions: ["text:upcase", "text:reverse"]
"#,
    );
    let h = Harness::with(&[("agents/dice/agent.yaml", yaml.as_str())], MockBackend::new(vec![]), text_kit);
    let value = h.run("dice", "abc").await.unwrap().value().to_string();
    assert!(value == "ABC" || value == "cba", "{value}");
}

#[tokio::test]
async fn test_map_runs_sequence_per_item() {
    let yaml = pack(
        r#"
pack: each
agents:
  - name: each
    functions: ["text:*"]
    flow:
      type: map
      actions: ["text:upcase", "text:reverse"]
"#,
    );
    let h = Harness::with(&[("agents/each/agent.yaml", yaml.as_str())], MockBackend::new(vec![]), text_kit);
    let resp = h.run("each", r#"["ab", "cd"]"#).await.unwrap();
    let values: Vec<String> = serde_json::from_str(resp.value()).unwrap();
    assert_eq!(values, ["BA", "DC"]);

    let resp = h.run("each", "xy").await.unwrap();
    let values: Vec<String> = serde_json::from_str(resp.value()).unwrap();
    assert_eq!(values, ["YX"]);
}

#[tokio::test]
async fn test_script_calls_actions_through_the_shell() {
    let yaml = pack(
        r#"
pack: scripted
agents:
  - name: scripted
    functions: ["text:*"]
    flow:
      type: sequence
      script: |
        /text:upcase "$query" | /text:reverse
      actions: ["text:upcase"]
"#,
    );
    let h = Harness::with(
        &[("agents/scripted/agent.yaml", yaml.as_str())],
        MockBackend::new(vec![]),
        text_kit,
    );
    let resp = h.run("scripted", "abc").await.unwrap();
    assert_eq!(resp.value().trim(), "CBA");
}

#[tokio::test]
async fn test_retry_reruns_failed_action() {
    let yaml = pack(
        r#"
pack: flaky
agents:
  - name: flaky
    functions: ["text:upcase"]
    flow:
      type: sequence
      retry: 2
      actions: ["text:upcase"]
"#,
    );
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    let h = Harness::with(&[("agents/flaky/agent.yaml", yaml.as_str())], MockBackend::new(vec![]), move |b| {
        b.with_func(
            "text:upcase",
            native(move |args: ArgMap| {
                if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(AgentError::tool("not yet"));
                }
                Ok(ToolOutput::Text(args.string_or_empty("query").to_uppercase()))
            }),
        )
    });
    assert_eq!(h.run("flaky", "ok").await.unwrap().value(), "OK");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_instruction_seeds_the_flow() {
    let yaml = pack(
        r#"
pack: seeded
agents:
  - name: seeded
    instruction: Suggest a word.
    functions: ["text:upcase"]
    flow:
      type: sequence
      actions: ["text:upcase"]
"#,
    );
    let h = Harness::with(
        &[("agents/seeded/agent.yaml", yaml.as_str())],
        MockBackend::with_text("banana"),
        text_kit,
    );
    let resp = h.run("seeded", "fruit please").await.unwrap();
    assert_eq!(resp.value(), "BANANA");
    assert_eq!(h.mock.request_count(), 1);

    let saved = h.memory.all();
    assert_eq!(saved.len(), 2);
    assert_eq!(saved[0].content, "fruit please");
    assert_eq!(saved[1].content, "BANANA");
}

#[tokio::test]
async fn test_flow_action_must_be_agent_tool() {
    let yaml = pack(
        r#"
pack: broken
agents:
  - name: broken
    functions: ["text:upcase"]
    flow:
      type: sequence
      actions: ["text:reverse"]
"#,
    );
    let h = Harness::with(&[("agents/broken/agent.yaml", yaml.as_str())], MockBackend::new(vec![]), text_kit);
    let err = h.run("broken", "abc").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::BadRequest);
}
