//! MCP client against a mock streamable HTTP server.

use serde_json::json;
use swarm_mcp::{McpClient, McpError, McpServerConfig};
use wiremock::matchers::{body_partial_json, header, method};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn mount_initialize(server: &MockServer) {
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "initialize"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("Mcp-Session-Id", "sess-42")
                .set_body_json(json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "result": {
                        "protocolVersion": "2025-03-26",
                        "capabilities": {"tools": {}},
                        "serverInfo": {"name": "mock-mcp", "version": "1.0.0"}
                    }
                })),
        )
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "notifications/initialized"})))
        .and(header("Mcp-Session-Id", "sess-42"))
        .respond_with(ResponseTemplate::new(202))
        .expect(1)
        .mount(server)
        .await;
}

fn config(server: &MockServer) -> McpServerConfig {
    McpServerConfig::new("mock", format!("{}/mcp", server.uri())).with_token("secret")
}

#[tokio::test]
async fn test_connect_and_list_tools_paged() {
    let server = MockServer::start().await;
    mount_initialize(&server).await;
    Mock::given(method("POST"))
        .and(header("authorization", "Bearer secret"))
        .and(body_partial_json(json!({"method": "tools/list", "params": {"cursor": "p2"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 3,
            "result": {"tools": [{"name": "add", "description": "Add two numbers"}]}
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tools/list"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {
                "tools": [{
                    "name": "echo",
                    "description": "Echo back the input",
                    "inputSchema": {"type": "object", "properties": {"text": {"type": "string"}}}
                }],
                "nextCursor": "p2"
            }
        })))
        .mount(&server)
        .await;

    let client = McpClient::connect(config(&server)).await.unwrap();
    assert_eq!(client.server_info().name, "mock-mcp");
    assert_eq!(client.session_id().as_deref(), Some("sess-42"));

    let tools = client.list_tools().await.unwrap();
    let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["echo", "add"]);
    assert!(tools[0].input_schema.is_some());
}

#[tokio::test]
async fn test_call_tool_over_event_stream() {
    let server = MockServer::start().await;
    mount_initialize(&server).await;
    let sse = "event: message\n\
data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/progress\",\"params\":{\"progress\":1}}\n\
\n\
event: message\n\
data: {\"jsonrpc\":\"2.0\",\"id\":2,\"result\":{\"content\":[{\"type\":\"text\",\"text\":\"hello\"}]}}\n\
\n";
    Mock::given(method("POST"))
        .and(body_partial_json(json!({
            "method": "tools/call",
            "params": {"name": "echo", "arguments": {"text": "hello"}}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&server)
        .await;

    let client = McpClient::connect(config(&server)).await.unwrap();
    let result = client
        .call_tool("echo", Some(json!({"text": "hello"})))
        .await
        .unwrap();
    assert_eq!(result.text(), "hello");
}

#[tokio::test]
async fn test_tool_error_is_reported() {
    let server = MockServer::start().await;
    mount_initialize(&server).await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"method": "tools/call"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {"content": [{"type": "text", "text": "division by zero"}], "isError": true}
        })))
        .mount(&server)
        .await;

    let client = McpClient::connect(config(&server)).await.unwrap();
    let err = client.call_tool("div", None).await.unwrap_err();
    assert!(matches!(err, McpError::ToolError(ref m) if m == "division by zero"));
}

#[tokio::test]
async fn test_unauthorized() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = McpClient::connect(config(&server)).await.unwrap_err();
    assert_eq!(err.kind(), swarm_types::ErrorKind::Unauthorized);
}
